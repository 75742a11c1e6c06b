//! Error types for simulation synchronization.
//!
//! Every controller and monitor operation reports failures through [`SyncError`].
//! The registry keeps the human-readable rendering of the most recent one as its
//! `last_error`, while the typed value is handed back to the caller.
//!
//! ## Error Categories
//!
//! - **Request Errors**: the backend answered with a non-success status
//! - **Network Errors**: no response was received at all
//! - **Protocol Errors**: a response arrived but its shape broke the contract
//! - **Invalid Arguments**: the caller passed a malformed identifier or parameter
//! - **Integrity Errors**: frame chain data violated its structural invariants
//! - **Config Errors**: the client configuration could not be loaded or validated
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use lpwan_sync::SyncError;
//!
//! let error = SyncError::network_failed("connection refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! ## Helper Constructors
//!
//! ```rust
//! use lpwan_sync::SyncError;
//!
//! let not_found = SyncError::request_failed(404, "fetch values: 404 Not Found - details unavailable");
//! let bad_shape = SyncError::protocol_error("get_ids", "expected an array of identifiers");
//! let cycle = SyncError::integrity_error("cycle detected at frame 3");
//! ```

use thiserror::Error;

/// Result type alias for synchronization operations.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Status reported for requests that exceeded the client-side timeout.
pub const TIMEOUT_STATUS: u16 = 408;

/// Main error type for synchronization operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error("{message}")]
    Request { status: u16, message: String },

    #[error("Network failure: {reason}")]
    Network {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unexpected response from {context}: {details}")]
    Protocol { context: String, details: String },

    #[error("Invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("Frame chain integrity violated: {details}")]
    Integrity { details: String },

    #[error("Configuration error: {details}")]
    Config {
        details: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SyncError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Request { status, .. } => *status == TIMEOUT_STATUS || *status >= 500,
            SyncError::Network { .. } => true,
            SyncError::Protocol { .. } => false,
            SyncError::InvalidArgument { .. } => false,
            SyncError::Integrity { .. } => false,
            SyncError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SyncError::Request { status, .. } if *status == 404 => vec![
                "Refresh the identifier list from the backend",
                "Check that the simulation was not deleted elsewhere",
            ],
            SyncError::Request { .. } => vec![
                "Inspect the backend logs for the failing route",
                "Retry once the backend is healthy",
                "Check the request timeout setting",
            ],
            SyncError::Network { .. } => vec![
                "Ensure the simulation backend is running",
                "Verify the configured base URL",
                "Check network connectivity to the backend host",
            ],
            SyncError::Protocol { .. } => vec![
                "Check the backend version against this client",
                "Verify the values route setting (values vs get_values)",
            ],
            SyncError::InvalidArgument { .. } => vec![
                "Use an identifier returned by create or list",
                "Use a strictly positive message rate",
            ],
            SyncError::Integrity { .. } => vec![
                "Refetch the simulation values",
                "Report the malformed frame data to the backend maintainers",
            ],
            SyncError::Config { .. } => vec![
                "Check the YAML configuration syntax",
                "Verify the API_BASE_URL environment variable",
            ],
        }
    }

    /// HTTP-equivalent status carried by request errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Helper constructor for non-success backend responses.
    pub fn request_failed(status: u16, message: impl Into<String>) -> Self {
        SyncError::Request { status, message: message.into() }
    }

    /// Helper constructor for transport failures.
    pub fn network_failed(reason: impl Into<String>) -> Self {
        SyncError::Network { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport failures with source.
    pub fn network_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SyncError::Network { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for contract violations in a response body.
    pub fn protocol_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        SyncError::Protocol { context: context.into(), details: details.into() }
    }

    /// Helper constructor for rejected caller input.
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        SyncError::InvalidArgument { details: details.into() }
    }

    /// Helper constructor for frame chain violations.
    pub fn integrity_error(details: impl Into<String>) -> Self {
        SyncError::Integrity { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(details: impl Into<String>) -> Self {
        SyncError::Config { details: details.into(), source: None }
    }

    /// Helper constructor for configuration errors with source.
    pub fn config_error_with_source(
        details: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SyncError::Config { details: details.into(), source: Some(source) }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return SyncError::request_failed(TIMEOUT_STATUS, format!("Request timed out: {err}"));
        }
        if err.is_decode() {
            return SyncError::protocol_error("response body", err.to_string());
        }
        SyncError::Network { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::protocol_error("JSON payload", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn messages_carry_their_context(
                message in ".*",
                status in 100u16..600u16,
                context in "\\w+",
                details in ".*"
            ) {
                let request = SyncError::request_failed(status, message.clone());
                prop_assert_eq!(request.to_string(), message);
                prop_assert_eq!(request.status(), Some(status));

                let protocol = SyncError::protocol_error(context.clone(), details.clone());
                let rendered = protocol.to_string();
                prop_assert!(rendered.contains(&context));
                prop_assert!(rendered.contains(&details));

                let integrity = SyncError::integrity_error(details.clone());
                prop_assert!(integrity.to_string().contains(&details));
                prop_assert_eq!(integrity.status(), None);
            }

            #[test]
            fn server_side_statuses_are_retryable(status in 500u16..600u16) {
                prop_assert!(SyncError::request_failed(status, "boom").is_retryable());
            }

            #[test]
            fn client_side_statuses_are_not_retryable(status in 400u16..408u16) {
                prop_assert!(!SyncError::request_failed(status, "nope").is_retryable());
            }
        }
    }

    #[test]
    fn network_errors_chain_their_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = SyncError::network_failed_with_source("backend unreachable", Box::new(io));

        let source = std::error::Error::source(&error).expect("source should be kept");
        assert_eq!(source.to_string(), "refused");
        assert!(error.to_string().contains("backend unreachable"));
        assert!(error.is_retryable());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<SyncError>();

        let error = SyncError::invalid_argument("empty identifier");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_suggestions_are_provided_for_every_category() {
        let errors = [
            SyncError::request_failed(404, "missing"),
            SyncError::request_failed(500, "broken"),
            SyncError::network_failed("down"),
            SyncError::protocol_error("get_ids", "not an array"),
            SyncError::invalid_argument("bad id"),
            SyncError::integrity_error("cycle"),
            SyncError::config_error("bad yaml"),
        ];

        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty(), "no suggestions for {error:?}");
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn json_errors_become_protocol_errors() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let converted: SyncError = err.into();
        assert!(matches!(converted, SyncError::Protocol { .. }));
        assert!(!converted.is_retryable());
    }
}
