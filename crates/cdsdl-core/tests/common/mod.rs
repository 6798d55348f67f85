//! Shared test helpers: scripted identity and transport doubles, driver harness.
#![allow(dead_code)]

pub mod http_server;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cdsdl_core::control::CancelToken;
use cdsdl_core::driver::DownloadDriver;
use cdsdl_core::lease_store::{FsLeaseStore, LeaseError, LeaseKey, LeaseKind, LeaseRecord, LeaseStore};
use cdsdl_core::presence::FsPresence;
use cdsdl_core::product::Product;
use cdsdl_core::retry::RetryPolicy;
use cdsdl_core::session::{Account, LeaseManager};
use cdsdl_core::token::{AuthError, Identity, TokenStore};
use cdsdl_core::transport::{canonical_reason, Sink, TransferInfo, Transport, TransportError};
use cdsdl_core::worker::DownloadWorker;

/// Identity double: `tok-<login>` for everyone except rejected logins.
#[derive(Default)]
pub struct MockIdentity {
    pub calls: AtomicUsize,
    pub reject: HashSet<String>,
}

impl MockIdentity {
    pub fn rejecting(logins: &[&str]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reject: logins.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Identity for MockIdentity {
    fn request_token(&self, login: &str, _secret: &str) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.contains(login) {
            return Err(AuthError::Rejected {
                status: 401,
                detail: "invalid_grant".into(),
            });
        }
        Ok(format!("tok-{login}"))
    }
}

/// Lease store over a directory that fails chosen session-record operations.
pub struct FlakyStore {
    pub inner: FsLeaseStore,
    fail_session_create: Option<usize>,
    session_creates: AtomicUsize,
    failing_session_removes: AtomicUsize,
}

impl FlakyStore {
    pub fn open(dir: &Path) -> Self {
        Self {
            inner: FsLeaseStore::open(dir).unwrap(),
            fail_session_create: None,
            session_creates: AtomicUsize::new(0),
            failing_session_removes: AtomicUsize::new(0),
        }
    }

    /// Fail the `nth` (0-based) session-record creation.
    pub fn failing_session_create(mut self, nth: usize) -> Self {
        self.fail_session_create = Some(nth);
        self
    }

    /// Fail the next `n` session-record removals.
    pub fn failing_session_removes(self, n: usize) -> Self {
        self.failing_session_removes.store(n, Ordering::SeqCst);
        self
    }

    fn injected(&self, key: &LeaseKey) -> LeaseError {
        LeaseError::Io {
            path: PathBuf::from(key.file_name()),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"),
        }
    }
}

impl LeaseStore for FlakyStore {
    fn try_create(&self, key: &LeaseKey, record: &LeaseRecord) -> Result<bool, LeaseError> {
        if key.kind == LeaseKind::Session {
            let n = self.session_creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_session_create == Some(n) {
                return Err(self.injected(key));
            }
        }
        self.inner.try_create(key, record)
    }

    fn read(&self, key: &LeaseKey) -> Result<Option<LeaseRecord>, LeaseError> {
        self.inner.read(key)
    }

    fn list(
        &self,
        kind: LeaseKind,
        account: Option<&str>,
    ) -> Result<Vec<(LeaseKey, LeaseRecord)>, LeaseError> {
        self.inner.list(kind, account)
    }

    fn remove(&self, key: &LeaseKey) -> Result<(), LeaseError> {
        if key.kind == LeaseKind::Session
            && self
                .failing_session_removes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(self.injected(key));
        }
        self.inner.remove(key)
    }
}

#[derive(Debug, Clone)]
pub enum MockReply {
    Body(Vec<u8>),
    Status(u32),
}

/// Transport double. Each URL has a reply script (the last reply repeats);
/// URLs without a script get a small body. Requests carrying a token in
/// `failing_tokens` always fail at the stream level.
#[derive(Default)]
pub struct MockTransport {
    pub calls: AtomicUsize,
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    failing_tokens: HashSet<String>,
    pub seen: Mutex<Vec<(String, String)>>,
    delay: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(tokens: &[&str]) -> Self {
        Self {
            failing_tokens: tokens.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(&self, url: &str, replies: Vec<MockReply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, url: &str) -> MockReply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(MockReply::Status(404)),
            None => MockReply::Body(format!("payload of {url}").into_bytes()),
        }
    }
}

impl Transport for MockTransport {
    fn fetch(
        &self,
        url: &str,
        token: &str,
        sink: &mut Sink<'_>,
    ) -> Result<TransferInfo, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((url.to_string(), token.to_string()));
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.failing_tokens.contains(token) {
            return Err(TransportError::Stream("connection reset by peer".into()));
        }
        match self.next_reply(url) {
            MockReply::Body(body) => {
                for chunk in body.chunks(7) {
                    sink(chunk).map_err(TransportError::Sink)?;
                }
                Ok(TransferInfo {
                    status: 200,
                    reason: "OK".into(),
                    content_length: Some(body.len() as u64),
                    received: body.len() as u64,
                })
            }
            MockReply::Status(code) => Ok(TransferInfo {
                status: code,
                reason: canonical_reason(code).into(),
                content_length: None,
                received: 0,
            }),
        }
    }
}

pub const URL_TEMPLATE: &str = "mock://products/{id}";

pub fn url_for(id: &str) -> String {
    URL_TEMPLATE.replace("{id}", id)
}

pub fn products(n: usize) -> Vec<Product> {
    (0..n)
        .map(|i| Product::new(format!("id{i}"), format!("P{i}.SAFE")))
        .collect()
}

/// Backoff short enough for tests.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    }
}

pub struct Harness {
    pub driver: DownloadDriver,
    pub identity: Arc<MockIdentity>,
    pub transport: Arc<MockTransport>,
    pub store: Arc<FsLeaseStore>,
}

pub struct HarnessOptions<'a> {
    pub logins: &'a [&'a str],
    pub max_sessions: usize,
    pub blacklist_after: Option<u32>,
    pub presence: FsPresence,
    pub cancel: CancelToken,
    pub policy: RetryPolicy,
}

impl Default for HarnessOptions<'_> {
    fn default() -> Self {
        Self {
            logins: &["a@x"],
            max_sessions: 4,
            blacklist_after: None,
            presence: FsPresence::default(),
            cancel: CancelToken::new(),
            policy: fast_policy(),
        }
    }
}

/// Driver over mock collaborators with leases and staging under `dir`.
pub fn harness(
    dir: &Path,
    opts: HarnessOptions<'_>,
    identity: MockIdentity,
    transport: MockTransport,
) -> Harness {
    let store = Arc::new(FsLeaseStore::open(dir.join("leases")).unwrap());
    let identity = Arc::new(identity);
    let transport = Arc::new(transport);
    let tokens = TokenStore::new(store.clone(), identity.clone());
    let accounts = opts
        .logins
        .iter()
        .map(|l| Account::new(*l, "secret"))
        .collect();
    let mut manager =
        LeaseManager::new(store.clone(), tokens, accounts).with_max_sessions(opts.max_sessions);
    if let Some(n) = opts.blacklist_after {
        manager = manager.with_blacklist_after(n);
    }
    let worker = DownloadWorker::new(transport.clone(), dir.join("staging"))
        .with_cancel(opts.cancel.clone());
    let driver = DownloadDriver::new(manager, worker, Arc::new(opts.presence), URL_TEMPLATE)
        .with_policy(opts.policy)
        .with_cancel(opts.cancel);
    Harness {
        driver,
        identity,
        transport,
        store,
    }
}
