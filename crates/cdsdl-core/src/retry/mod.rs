//! Retry and backoff policy.
//!
//! This module encapsulates error classification (staging delays, throttling,
//! token rejection, connection failures) and exponential backoff decisions
//! so that the driver can decide between requeue and permanent failure.

mod classify;
mod policy;

pub use classify::{classify_curl_error, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
