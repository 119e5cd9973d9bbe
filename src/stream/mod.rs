//! Stream combinators for display-facing subscriptions

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
