//! Bearer tokens: issuance, durable token records and lazy expiry.
//!
//! Each issued token is mirrored by a token record in the lease store so that
//! every cooperating process can see which accounts hold a live credential
//! and reuse it instead of authenticating again.

mod error;
mod identity;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

use crate::lease_store::{LeaseError, LeaseKey, LeaseKind, LeaseRecord, LeaseStore};
use crate::session::Account;

pub use error::AuthError;
pub use identity::{parse_token_response, CurlIdentity, Identity};

/// Lifetime of a token as defined by the identity provider.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(600);

/// An issued bearer token and the record that represents it.
#[derive(Clone)]
pub struct Token {
    pub account: String,
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub key: LeaseKey,
}

impl Token {
    fn from_record(key: LeaseKey, record: LeaseRecord) -> Self {
        Self {
            account: record.account,
            value: record.payload,
            issued_at: record.created_at,
            key,
        }
    }

    /// Lifetime left at `now` given `ttl` (zero once expired).
    pub fn remaining(&self, ttl: Duration, now: DateTime<Utc>) -> Duration {
        let age = (now - self.issued_at).to_std().unwrap_or(Duration::ZERO);
        ttl.saturating_sub(age)
    }

    pub fn is_live(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        !self.remaining(ttl, now).is_zero()
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("account", &self.account)
            .field("issued_at", &self.issued_at)
            .field("key", &self.key.discriminator)
            .finish_non_exhaustive()
    }
}

/// Issues tokens through an `Identity` and tracks them in a `LeaseStore`.
pub struct TokenStore {
    store: Arc<dyn LeaseStore>,
    identity: Arc<dyn Identity>,
    ttl: Duration,
    reuse_margin: Duration,
}

impl TokenStore {
    pub fn new(store: Arc<dyn LeaseStore>, identity: Arc<dyn Identity>) -> Self {
        Self {
            store,
            identity,
            ttl: DEFAULT_TOKEN_TTL,
            reuse_margin: Duration::from_secs(60),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Minimum lifetime a live token must have left to be handed out again.
    pub fn with_reuse_margin(mut self, margin: Duration) -> Self {
        self.reuse_margin = margin;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Authenticate `account` and persist a token record.
    ///
    /// The issuance time is taken before the request so the record never
    /// outlives the real token. Nothing is persisted on failure.
    pub fn acquire_token(&self, account: &Account, quiet: bool) -> Result<Token, AuthError> {
        let issued_at = Utc::now();
        if !quiet {
            tracing::info!(account = %account.login, "requesting access token");
        }
        let value = self
            .identity
            .request_token(&account.login, account.secret())
            .map_err(|e| {
                tracing::warn!(account = %account.login, "authentication failed: {}", e);
                e
            })?;

        let key = LeaseKey::token(&account.login, issued_at);
        let record = LeaseRecord::created_at(&account.login, value.clone(), issued_at);
        if !self.store.try_create(&key, &record)? {
            // Keys embed pid and a sequence number; a clash means a foreign writer.
            return Err(AuthError::Malformed(format!(
                "token record {} already exists",
                key.file_name()
            )));
        }
        tracing::debug!(account = %account.login, "access token issued");
        Ok(Token {
            account: account.login.clone(),
            value,
            issued_at,
            key,
        })
    }

    /// Token records younger than the TTL, oldest first.
    pub fn list_live_tokens(&self, account: Option<&str>) -> Result<Vec<Token>, LeaseError> {
        let now = Utc::now();
        Ok(self
            .store
            .list(LeaseKind::Token, account)?
            .into_iter()
            .filter(|(_, rec)| !rec.is_expired(self.ttl, now))
            .map(|(key, rec)| Token::from_record(key, rec))
            .collect())
    }

    /// Remove a token record. Missing or expired records are fine.
    pub fn release_token(&self, token: &Token) -> Result<(), LeaseError> {
        self.store.remove(&token.key)
    }

    /// Remove a token record only if this process issued it; tokens reused
    /// from another process stay with their issuer. Returns whether a record
    /// was removed.
    pub fn release_own_token(&self, token: &Token) -> Result<bool, LeaseError> {
        match self.store.read(&token.key)? {
            Some(record) if record.is_owned_by_current_process() => {
                self.store.remove(&token.key)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// A live token for `account`: a random one among existing records with at
    /// least the reuse margin left, otherwise a freshly issued one.
    pub fn ensure_token(&self, account: &Account, quiet: bool) -> Result<Token, AuthError> {
        let now = Utc::now();
        let reusable: Vec<Token> = self
            .list_live_tokens(Some(&account.login))?
            .into_iter()
            .filter(|t| t.remaining(self.ttl, now) > self.reuse_margin)
            .collect();
        if let Some(token) = reusable.choose(&mut rand::thread_rng()) {
            tracing::debug!(account = %account.login, "reusing live access token");
            return Ok(token.clone());
        }
        self.acquire_token(account, quiet)
    }

    /// Remove token records past their TTL; returns how many were dropped.
    pub fn collect_expired(&self) -> Result<usize, LeaseError> {
        let now = Utc::now();
        let mut removed = 0;
        for (key, rec) in self.store.list(LeaseKind::Token, None)? {
            if rec.is_expired(self.ttl, now) {
                self.store.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease_store::FsLeaseStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIdentity {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Identity for CountingIdentity {
        fn request_token(&self, login: &str, _secret: &str) -> Result<String, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AuthError::Rejected {
                    status: 401,
                    detail: "invalid_grant".into(),
                })
            } else {
                Ok(format!("tok-{login}-{n}"))
            }
        }
    }

    fn setup(fail: bool) -> (tempfile::TempDir, Arc<FsLeaseStore>, Arc<CountingIdentity>, TokenStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsLeaseStore::open(dir.path()).unwrap());
        let identity = Arc::new(CountingIdentity {
            calls: AtomicUsize::new(0),
            fail,
        });
        let tokens = TokenStore::new(store.clone(), identity.clone());
        (dir, store, identity, tokens)
    }

    #[test]
    fn acquire_persists_a_record() {
        let (_dir, _store, _id, tokens) = setup(false);
        let acc = Account::new("a@x", "pw");
        let token = tokens.acquire_token(&acc, true).unwrap();
        assert_eq!(token.value, "tok-a@x-0");
        assert_eq!(token.bearer(), "Bearer tok-a@x-0");
        let live = tokens.list_live_tokens(Some("a@x")).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].value, token.value);
        assert!(tokens.list_live_tokens(Some("b@x")).unwrap().is_empty());
    }

    #[test]
    fn failed_auth_creates_no_record() {
        let (_dir, _store, _id, tokens) = setup(true);
        let acc = Account::new("a@x", "bad");
        assert!(matches!(
            tokens.acquire_token(&acc, true),
            Err(AuthError::Rejected { status: 401, .. })
        ));
        assert!(tokens.list_live_tokens(None).unwrap().is_empty());
    }

    #[test]
    fn ensure_reuses_live_token() {
        let (_dir, _store, id, tokens) = setup(false);
        let acc = Account::new("a@x", "pw");
        let first = tokens.ensure_token(&acc, true).unwrap();
        let second = tokens.ensure_token(&acc, true).unwrap();
        assert_eq!(first.value, second.value);
        assert_eq!(id.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_records_are_ignored_and_not_reused() {
        let (_dir, store, id, tokens) = setup(false);
        let old = Utc::now() - chrono::Duration::seconds(601);
        let key = LeaseKey::token("a@x", old);
        store
            .try_create(&key, &LeaseRecord::created_at("a@x", "stale", old))
            .unwrap();
        assert!(tokens.list_live_tokens(Some("a@x")).unwrap().is_empty());

        let acc = Account::new("a@x", "pw");
        let token = tokens.ensure_token(&acc, true).unwrap();
        assert_ne!(token.value, "stale");
        assert_eq!(id.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tokens.collect_expired().unwrap(), 1);
    }

    #[test]
    fn tokens_close_to_expiry_are_not_reused() {
        let (_dir, store, id, tokens) = setup(false);
        let almost = Utc::now() - chrono::Duration::seconds(580);
        let key = LeaseKey::token("a@x", almost);
        store
            .try_create(&key, &LeaseRecord::created_at("a@x", "old", almost))
            .unwrap();
        let acc = Account::new("a@x", "pw");
        let token = tokens.ensure_token(&acc, true).unwrap();
        assert_ne!(token.value, "old");
        assert_eq!(id.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_is_idempotent_even_after_expiry() {
        let (_dir, _store, _id, tokens) = setup(false);
        let acc = Account::new("a@x", "pw");
        let token = tokens.acquire_token(&acc, true).unwrap();
        tokens.release_token(&token).unwrap();
        tokens.release_token(&token).unwrap();
        assert!(tokens.list_live_tokens(None).unwrap().is_empty());

        let short = tokens.with_ttl(Duration::ZERO);
        let t2 = short.acquire_token(&acc, true).unwrap();
        assert!(!t2.is_live(Duration::ZERO, Utc::now()));
        short.release_token(&t2).unwrap();
        short.release_token(&t2).unwrap();
    }
}
