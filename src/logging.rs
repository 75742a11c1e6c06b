//! Tracing subscriber setup for applications embedding the client.

use tracing_subscriber::EnvFilter;

/// Install a formatted `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `default_directive` is used
/// (for example `"lpwan_sync=info"`). Returns `false` if a global subscriber
/// was already installed, which makes repeated calls harmless.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    #[test]
    fn second_init_is_a_no_op() {
        let _ = super::init("lpwan_sync=debug");
        assert!(!super::init("lpwan_sync=debug"));
    }
}
