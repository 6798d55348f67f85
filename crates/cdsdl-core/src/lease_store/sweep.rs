//! Startup reconciliation: drop records left behind by crashed processes.

use chrono::Utc;
use std::time::Duration;

use super::{LeaseError, LeaseKind, LeaseStore};

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Token records past their lifetime.
    pub expired_tokens: usize,
    /// Records (either kind) whose owning process is gone.
    pub orphaned: usize,
}

impl SweepSummary {
    pub fn total(&self) -> usize {
        self.expired_tokens + self.orphaned
    }
}

/// Remove token records older than `ttl` and any record whose owner process
/// no longer exists.
///
/// Liveness is probed only for records written on this host. Records from
/// other hosts sharing the directory, and records whose owner cannot be
/// probed, are treated as orphaned once older than `ttl`. Records owned by
/// the calling process are never touched.
pub fn sweep_orphans(store: &dyn LeaseStore, ttl: Duration) -> Result<SweepSummary, LeaseError> {
    let now = Utc::now();
    let mut summary = SweepSummary::default();

    for kind in [LeaseKind::Token, LeaseKind::Session] {
        for (key, record) in store.list(kind, None)? {
            if record.is_owned_by_current_process() {
                continue;
            }
            let expired = record.is_expired(ttl, now);
            let probed = if record.is_from_this_host() {
                owner_alive(record.pid)
            } else {
                None
            };
            let dead = match probed {
                Some(alive) => !alive,
                None => expired,
            };
            if dead {
                tracing::info!(
                    kind = kind.as_str(),
                    account = %key.account,
                    pid = record.pid,
                    "removing orphaned lease"
                );
                store.remove(&key)?;
                summary.orphaned += 1;
            } else if kind == LeaseKind::Token && expired {
                tracing::debug!(account = %key.account, "removing expired token record");
                store.remove(&key)?;
                summary.expired_tokens += 1;
            }
        }
    }
    Ok(summary)
}

/// Whether process `pid` exists on this host (`None` if that cannot be determined).
#[cfg(unix)]
pub(crate) fn owner_alive(pid: u32) -> Option<bool> {
    if pid == std::process::id() {
        return Some(true);
    }
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return None;
    };
    if raw <= 0 {
        return None;
    }
    // Signal 0 only checks for existence and permission.
    let r = unsafe { libc::kill(raw, 0) };
    if r == 0 {
        return Some(true);
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(code) if code == libc::ESRCH => Some(false),
        // EPERM: the process exists but belongs to someone else.
        _ => Some(true),
    }
}

#[cfg(not(unix))]
pub(crate) fn owner_alive(pid: u32) -> Option<bool> {
    if pid == std::process::id() {
        Some(true)
    } else {
        None
    }
}
