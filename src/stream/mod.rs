//! Stream combinators for registry change notifications

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
