//! What a worker reports back to the driver.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::{classify_http_status, ErrorKind};

/// Terminal state of one transfer attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Body fully received and promoted to the destination.
    Committed { bytes: u64 },
    /// Stream-level failure: connection, timeout, truncated body.
    TransportError { message: String, kind: ErrorKind },
    /// The server answered with something other than 200.
    HttpRejection { code: u32, reason: String },
    /// Staging or promotion failed locally.
    LocalIoError(String),
    /// The run was cancelled mid-transfer.
    Interrupted,
}

impl Outcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed { .. })
    }

    /// Retry classification; `None` for outcomes the retry policy does not
    /// decide (success and interruption).
    pub fn retry_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Committed { .. } | Outcome::Interrupted => None,
            Outcome::TransportError { kind, .. } => Some(*kind),
            Outcome::HttpRejection { code, .. } => Some(classify_http_status(*code)),
            Outcome::LocalIoError(_) => Some(ErrorKind::Other),
        }
    }

    /// What this outcome says about the account that carried it.
    ///
    /// `Some(true)` for a commit, `Some(false)` for failures that point at
    /// the account or its connection (transport errors, 401/403). Rejections
    /// about the product itself (not yet staged, gone, throttled, server
    /// errors), local I/O trouble and interruption give `None`.
    pub fn account_verdict(&self) -> Option<bool> {
        match self {
            Outcome::Committed { .. } => Some(true),
            Outcome::TransportError { .. } => Some(false),
            Outcome::HttpRejection { code, .. } => {
                (classify_http_status(*code) == ErrorKind::Unauthorized).then_some(false)
            }
            Outcome::LocalIoError(_) | Outcome::Interrupted => None,
        }
    }

    /// Run-report counter this outcome increments.
    pub fn counter(&self) -> String {
        match self {
            Outcome::Committed { .. } => "successful_download".to_string(),
            Outcome::TransportError { .. } => "transport_error".to_string(),
            Outcome::HttpRejection { reason, .. } => format!("status_{}", snake_case(reason)),
            Outcome::LocalIoError(_) => "local_io_error".to_string(),
            Outcome::Interrupted => "interrupted".to_string(),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Committed { bytes } => write!(f, "committed ({} bytes)", bytes),
            Outcome::TransportError { message, .. } => write!(f, "transport error: {}", message),
            Outcome::HttpRejection { code, reason } => write!(f, "HTTP {} {}", code, reason),
            Outcome::LocalIoError(msg) => write!(f, "local I/O error: {}", msg),
            Outcome::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// "Too Many Requests" -> "too_many_requests".
fn snake_case(reason: &str) -> String {
    let mut out = String::with_capacity(reason.len());
    for word in reason
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if !out.is_empty() {
            out.push('_');
        }
        out.push_str(&word.to_ascii_lowercase());
    }
    if out.is_empty() {
        out.push_str("unknown");
    }
    out
}

/// Result of `DownloadWorker::download`.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub outcome: Outcome,
    /// Average speed of a committed transfer; `None` when not measurable.
    pub bytes_per_sec: Option<f64>,
    pub output_path: Option<PathBuf>,
    pub elapsed: Duration,
}
