//! Utility modules for encore-enricher

pub mod clock;
pub mod retry;

pub use clock::{Clock, ManualClock, Sleeper, SystemClock, TokioSleeper};
pub use retry::{retry_with_backoff, RetryFailure, RetryPolicy};
