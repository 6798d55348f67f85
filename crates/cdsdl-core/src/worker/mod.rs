//! Download worker: one authenticated transfer, staged then promoted.
//!
//! A worker never retries. It streams the body into an anonymous staging
//! file, and only a 200 response whose body was fully received is renamed
//! onto the destination. Every other path drops the staging file, so an
//! aborted transfer never leaves anything at the destination.

mod outcome;
mod staging;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::control::CancelToken;
use crate::retry::ErrorKind;
use crate::token::Token;
use crate::transport::{Transport, TransportError};

pub use outcome::{Outcome, WorkerReport};
pub use staging::{StagingFile, STAGING_PREFIX, STAGING_SUFFIX};

/// Default permission bits of committed products.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

pub struct DownloadWorker {
    transport: Arc<dyn Transport>,
    staging_dir: PathBuf,
    file_mode: u32,
    cancel: CancelToken,
}

impl DownloadWorker {
    pub fn new(transport: Arc<dyn Transport>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            staging_dir: staging_dir.into(),
            file_mode: DEFAULT_FILE_MODE,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Fetch `url` with `token` into `destination`.
    pub fn download(
        &self,
        account: &str,
        token: &Token,
        url: &str,
        destination: &Path,
    ) -> WorkerReport {
        let started = Instant::now();
        let outcome = self.transfer(token, url, destination);
        let elapsed = started.elapsed();

        let (bytes_per_sec, output_path) = match &outcome {
            Outcome::Committed { bytes } => {
                (speed(*bytes, elapsed), Some(destination.to_path_buf()))
            }
            _ => (None, None),
        };
        match &outcome {
            Outcome::Committed { bytes } => tracing::info!(
                account,
                dest = %destination.display(),
                bytes,
                elapsed_ms = elapsed.as_millis() as u64,
                "download committed"
            ),
            other => tracing::warn!(account, url, "download aborted: {}", other),
        }
        WorkerReport {
            outcome,
            bytes_per_sec,
            output_path,
            elapsed,
        }
    }

    fn transfer(&self, token: &Token, url: &str, destination: &Path) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Interrupted;
        }
        let mut staging = match StagingFile::create(&self.staging_dir) {
            Ok(s) => s,
            Err(e) => {
                return Outcome::LocalIoError(format!(
                    "create staging file in {}: {}",
                    self.staging_dir.display(),
                    e
                ))
            }
        };
        tracing::debug!(url, staging = %staging.path().display(), "transfer started");

        let result = {
            let cancel = &self.cancel;
            let mut sink = |chunk: &[u8]| -> io::Result<()> {
                cancel
                    .check()
                    .map_err(|e| io::Error::new(io::ErrorKind::Interrupted, e))?;
                staging.write_chunk(chunk)
            };
            self.transport.fetch(url, &token.value, &mut sink)
        };

        let info = match result {
            Ok(info) => info,
            Err(TransportError::Sink(e)) if e.kind() == io::ErrorKind::Interrupted => {
                return Outcome::Interrupted
            }
            Err(TransportError::Sink(e)) => {
                return Outcome::LocalIoError(format!("write staging file: {}", e))
            }
            Err(_) if self.cancel.is_cancelled() => return Outcome::Interrupted,
            Err(e) => {
                return Outcome::TransportError {
                    message: e.to_string(),
                    kind: e.kind(),
                }
            }
        };

        if info.status != 200 {
            return Outcome::HttpRejection {
                code: info.status,
                reason: info.reason,
            };
        }
        if let Some(expected) = info.content_length {
            if expected != staging.written() {
                return Outcome::TransportError {
                    message: format!(
                        "truncated body: received {} of {} bytes",
                        staging.written(),
                        expected
                    ),
                    kind: ErrorKind::Connection,
                };
            }
        }

        let bytes = staging.written();
        match staging.commit(destination, self.file_mode) {
            Ok(_) => Outcome::Committed { bytes },
            Err(e) => Outcome::LocalIoError(format!(
                "promote to {}: {}",
                destination.display(),
                e
            )),
        }
    }
}

fn speed(bytes: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 || secs <= 0.0 {
        None
    } else {
        Some(bytes as f64 / secs)
    }
}
