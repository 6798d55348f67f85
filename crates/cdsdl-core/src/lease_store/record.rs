//! Lease keys (record identity) and lease records (record content).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

/// Suffix of every record file; anything else in the lease directory is ignored.
pub(crate) const RECORD_SUFFIX: &str = ".lease";

/// Per-process sequence so two tokens issued in the same millisecond get distinct keys.
static TOKEN_SEQ: AtomicU64 = AtomicU64::new(0);

/// What a record stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseKind {
    /// A bearer token issued to an account.
    Token,
    /// One of the account's download slots.
    Session,
}

impl LeaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaseKind::Token => "token",
            LeaseKind::Session => "session",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "token" => Some(LeaseKind::Token),
            "session" => Some(LeaseKind::Session),
            _ => None,
        }
    }
}

/// Identity of a lease record: kind, owning account and a kind-specific discriminator
/// (slot number for sessions, issuance time for tokens).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    pub kind: LeaseKind,
    pub account: String,
    pub discriminator: String,
}

impl LeaseKey {
    /// Key for a token issued to `account` at `issued_at` by this process.
    pub fn token(account: &str, issued_at: DateTime<Utc>) -> Self {
        let seq = TOKEN_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            kind: LeaseKind::Token,
            account: account.to_string(),
            discriminator: format!(
                "{}-{}-{}",
                issued_at.timestamp_millis(),
                std::process::id(),
                seq
            ),
        }
    }

    /// Key for download slot `slot` of `account`.
    pub fn session(account: &str, slot: usize) -> Self {
        Self {
            kind: LeaseKind::Session,
            account: account.to_string(),
            discriminator: slot.to_string(),
        }
    }

    /// Slot number for session keys.
    pub fn slot(&self) -> Option<usize> {
        match self.kind {
            LeaseKind::Session => self.discriminator.parse().ok(),
            LeaseKind::Token => None,
        }
    }

    /// File name used by the filesystem store. The login is hex-encoded so that
    /// e-mail addresses and other punctuation never reach the path.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}{}",
            self.kind.as_str(),
            hex::encode(self.account.as_bytes()),
            self.discriminator,
            RECORD_SUFFIX
        )
    }

    /// Inverse of `file_name`. Returns `None` for foreign files.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(RECORD_SUFFIX)?;
        let mut parts = stem.splitn(3, '_');
        let kind = LeaseKind::from_prefix(parts.next()?)?;
        let account = String::from_utf8(hex::decode(parts.next()?).ok()?).ok()?;
        let discriminator = parts.next()?.to_string();
        if discriminator.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            account,
            discriminator,
        })
    }
}

/// Content of a lease record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub account: String,
    /// Host the creating process runs on. Empty in records written without one.
    #[serde(default)]
    pub host: String,
    /// Process that created the record, meaningful only on `host`.
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    /// Kind-specific data: the bearer value for tokens, the product for sessions.
    #[serde(default)]
    pub payload: String,
}

impl LeaseRecord {
    /// New record owned by the current process, created now.
    pub fn new(account: &str, payload: impl Into<String>) -> Self {
        Self::created_at(account, payload, Utc::now())
    }

    /// New record owned by the current process with an explicit creation time.
    pub fn created_at(account: &str, payload: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            account: account.to_string(),
            host: local_host().to_string(),
            pid: std::process::id(),
            created_at: at,
            payload: payload.into(),
        }
    }

    /// Age at `now`; zero if the record claims to come from the future.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// True once the record is at least `ttl` old.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) >= ttl
    }

    /// Whether the creating process ran on this host, so its pid can be probed.
    pub fn is_from_this_host(&self) -> bool {
        self.host == local_host()
    }

    pub fn is_owned_by_current_process(&self) -> bool {
        self.pid == std::process::id() && self.is_from_this_host()
    }
}

/// Name of this host as written into lease records.
pub fn local_host() -> &'static str {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(read_host_name)
}

#[cfg(unix)]
fn read_host_name() -> String {
    let mut buf = [0u8; 256];
    let r = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if r != 0 {
        return "localhost".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match String::from_utf8_lossy(&buf[..len]).into_owned() {
        name if name.is_empty() => "localhost".to_string(),
        name => name,
    }
}

#[cfg(not(unix))]
fn read_host_name() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}
