//! Background loops that repair and escalate order state.
//!
//! Both loops expose `tick` for a single pass and `run` for the timer-driven
//! loop that ends when its shutdown token is cancelled.

pub mod delay_scan;
pub mod pending_cancel;

pub use delay_scan::{DelayScan, ScanReport, ScanWindow};
pub use pending_cancel::{PendingCancelRetry, RetryReport};
