//! Durable advisory leases shared between cooperating processes.
//!
//! Two kinds of records live here: token records (one per issued bearer
//! token, keyed by account and issuance time) and session-slot records (one
//! per in-flight download, keyed by account and slot number). Both are plain
//! existence markers: creation is exclusive, removal is idempotent and
//! staleness is decided from the record's creation time.

mod fs;
mod record;
mod sweep;

use std::path::PathBuf;

pub use fs::FsLeaseStore;
pub use record::{local_host, LeaseKey, LeaseKind, LeaseRecord};
pub use sweep::{sweep_orphans, SweepSummary};

/// Failure of the lease store itself (not of the lease protocol).
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("lease store I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt lease record {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage backend for lease records.
///
/// Implementations must make `try_create` atomic with respect to other
/// processes using the same backing store: for a given key at most one
/// caller observes `Ok(true)` until the record is removed again.
pub trait LeaseStore: Send + Sync {
    /// Create the record if no record with this key exists.
    /// Returns `Ok(false)` when the key is already held.
    fn try_create(&self, key: &LeaseKey, record: &LeaseRecord) -> Result<bool, LeaseError>;

    /// Read one record; `None` if it does not exist.
    fn read(&self, key: &LeaseKey) -> Result<Option<LeaseRecord>, LeaseError>;

    /// List records of `kind`, optionally restricted to one account.
    fn list(
        &self,
        kind: LeaseKind,
        account: Option<&str>,
    ) -> Result<Vec<(LeaseKey, LeaseRecord)>, LeaseError>;

    /// Remove a record. Removing a missing record is not an error.
    fn remove(&self, key: &LeaseKey) -> Result<(), LeaseError>;
}
