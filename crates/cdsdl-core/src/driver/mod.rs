//! Download driver: the round loop.
//!
//! Each round asks the lease manager for as many sessions as the accounts
//! allow, runs one blocking worker per grant, and settles every finished
//! worker as soon as it completes: lease released, account outcome recorded,
//! product requeued (with backoff) or finalized. The loop ends when nothing is
//! pending, no account is usable, no slot can be granted, or the run is
//! cancelled.

mod queue;
mod report;
mod setup;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::control::CancelToken;
use crate::presence::Presence;
use crate::product::{product_url, Product, ProductStatus};
use crate::retry::{ErrorKind, RetryDecision, RetryPolicy};
use crate::session::{Batch, Grant, LeaseManager};
use crate::worker::{DownloadWorker, Outcome, WorkerReport};

use queue::WorkQueue;
pub use report::{ProductResult, RunReport, Throughput};
pub use setup::{build_driver, build_token_store, open_lease_store};

/// Mode of directories the driver creates.
pub const OUTPUT_DIR_MODE: u32 = 0o775;

/// Why the round loop stopped with work left.
const STOP_INTERRUPTED: &str = "interrupted";
const STOP_NO_ACCOUNT: &str = "no usable account left";
const STOP_NO_SLOT: &str = "no session slot could be granted";

pub struct DownloadDriver {
    manager: Arc<LeaseManager>,
    worker: Arc<DownloadWorker>,
    presence: Arc<dyn Presence>,
    url_template: String,
    policy: RetryPolicy,
    cancel: CancelToken,
    force: bool,
}

impl DownloadDriver {
    pub fn new(
        manager: LeaseManager,
        worker: DownloadWorker,
        presence: Arc<dyn Presence>,
        url_template: impl Into<String>,
    ) -> Self {
        Self {
            manager: Arc::new(manager),
            worker: Arc::new(worker),
            presence,
            url_template: url_template.into(),
            policy: RetryPolicy::default(),
            cancel: CancelToken::new(),
            force: false,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Cancellation token observed between rounds and while backing off.
    /// Pass the same token to the worker so transfers stop too.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Download even products already present locally.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn manager(&self) -> &LeaseManager {
        &self.manager
    }

    /// Fetch `products` into `output_dir`.
    ///
    /// Only lease-store failures and an unusable output directory are
    /// errors; per-product and per-account failures end up in the report.
    /// Records this process holds are released before an error is returned.
    pub async fn run(&self, products: Vec<Product>, output_dir: &Path) -> Result<RunReport> {
        create_output_dir(output_dir)
            .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

        let mut queue = WorkQueue::new(products);
        let mut report = RunReport::default();
        report.set("total_product_to_download", queue.len() as u64);
        for name in [
            "archived_product",
            "in_spool_product",
            "in_output_dir_product",
            "successful_download",
        ] {
            report.set(name, 0);
        }
        if !self.force {
            self.skip_present(&mut queue, output_dir, &mut report);
        }

        let mut speeds = Vec::new();
        let stop = loop {
            if self.cancel.is_cancelled() {
                break Some(STOP_INTERRUPTED);
            }
            if !queue.has_pending() {
                break None;
            }
            if !self.manager.has_usable_account() {
                tracing::warn!("every account is blacklisted; stopping");
                break Some(STOP_NO_ACCOUNT);
            }

            let now = Instant::now();
            let eligible = queue.eligible(now);
            if eligible.is_empty() {
                let wait = queue
                    .next_wakeup()
                    .map(|t| t.saturating_duration_since(now))
                    .unwrap_or(Duration::from_secs(1));
                tracing::debug!(wait_ms = wait.as_millis() as u64, "all pending products backing off");
                if !self.cancel.sleep(wait).await {
                    break Some(STOP_INTERRUPTED);
                }
                continue;
            }

            report.rounds += 1;
            let round = report.rounds;
            let pending: Vec<Product> = eligible
                .iter()
                .map(|&i| queue.entries()[i].product.clone())
                .collect();
            let blacklist = self.manager.blacklist();
            let batch = match self.acquire(pending, blacklist.clone()).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.release_own_records("lease store failure");
                    return Err(e);
                }
            };
            self.note_auth_failures(&batch, &blacklist, &mut report);
            tracing::info!(
                round,
                eligible = eligible.len(),
                granted = batch.grants.len(),
                "round started"
            );

            if batch.grants.is_empty() {
                if !batch.auth_failures.is_empty() {
                    // Identity trouble only: accounts that are not blacklisted yet
                    // get another chance next round.
                    if self.manager.has_usable_account()
                        && !self.cancel.sleep(self.policy.base_delay).await
                    {
                        break Some(STOP_INTERRUPTED);
                    }
                    continue;
                }
                tracing::warn!(round, "no session could be granted; stopping");
                break Some(STOP_NO_SLOT);
            }

            self.run_round(round, batch.grants, &eligible, &mut queue, &mut report, &mut speeds, output_dir)
                .await;
        };

        if let Some(reason) = stop {
            if reason == STOP_INTERRUPTED {
                report.interrupted = true;
                self.release_own_records(reason);
            }
            queue.fail_unfinished(reason);
        }

        report.throughput = Throughput::from_samples(&speeds);
        for entry in queue.into_entries() {
            if entry.product.status == ProductStatus::Failed {
                tracing::warn!(
                    product = %entry.product.name,
                    error = entry.last_error.as_deref().unwrap_or(""),
                    "product failed"
                );
            }
            report.results.push(ProductResult {
                id: entry.product.id,
                name: entry.product.name,
                status: entry.product.status,
                output_path: entry.product.output_path,
                attempts: entry.attempts,
                last_error: entry.last_error,
            });
        }
        tracing::info!(
            rounds = report.rounds,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "run finished"
        );
        Ok(report)
    }

    /// Mark products found on disk as Succeeded without any network I/O.
    fn skip_present(&self, queue: &mut WorkQueue, output_dir: &Path, report: &mut RunReport) {
        for i in 0..queue.len() {
            let name = queue.entries()[i].product.name.clone();
            if let Some(hit) = self.presence.locate(output_dir, &name) {
                tracing::debug!(product = %name, path = %hit.path().display(), "already present");
                report.bump(hit.counter());
                queue.mark_succeeded(i, hit.path().to_path_buf());
            }
        }
    }

    async fn acquire(&self, pending: Vec<Product>, blacklist: HashSet<String>) -> Result<Batch> {
        let manager = Arc::clone(&self.manager);
        tokio::task::spawn_blocking(move || manager.acquire_batch(&pending, &blacklist))
            .await
            .map_err(|e| anyhow::anyhow!("lease manager task join: {}", e))?
            .context("lease store failure while acquiring sessions")
    }

    fn note_auth_failures(&self, batch: &Batch, before: &HashSet<String>, report: &mut RunReport) {
        for (login, err) in &batch.auth_failures {
            tracing::warn!(account = %login, "authentication failed: {}", err);
            report.bump("auth_failure");
        }
        for login in self.manager.blacklist() {
            if !before.contains(&login) {
                report.bump("blacklisted_account");
                report.blacklisted.push(login);
            }
        }
    }

    /// Run one worker per grant and settle each as it completes.
    #[allow(clippy::too_many_arguments)]
    async fn run_round(
        &self,
        round: u32,
        grants: Vec<Grant>,
        eligible: &[usize],
        queue: &mut WorkQueue,
        report: &mut RunReport,
        speeds: &mut Vec<f64>,
        output_dir: &Path,
    ) {
        // Grants stay here until settled so a panicking worker still gets its lease released.
        let mut held: Vec<Option<Grant>> = Vec::with_capacity(grants.len());
        let mut join_set = tokio::task::JoinSet::new();

        for (slot, grant) in grants.into_iter().enumerate() {
            let qi = eligible[grant.index];
            queue.mark_downloading(qi);
            let product = &queue.entries()[qi].product;
            let url = product_url(&self.url_template, &product.id);
            let dest = product.destination(output_dir);
            let worker = Arc::clone(&self.worker);
            let account = grant.account.clone();
            let token = grant.token.clone();
            tracing::debug!(round, account = %account, product = %product.name, "worker started");
            held.push(Some(grant));
            join_set.spawn_blocking(move || (slot, worker.download(&account, &token, &url, &dest)));
        }

        while let Some(res) = join_set.join_next().await {
            let (slot, worker_report) = match res {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!("worker task join: {}", e);
                    continue;
                }
            };
            let Some(grant) = held[slot].take() else {
                continue;
            };
            let qi = eligible[grant.index];
            self.release(&grant);
            self.settle(round, qi, &grant.account, worker_report, queue, report, speeds);
        }

        for grant in held.into_iter().flatten() {
            self.release(&grant);
            let qi = eligible[grant.index];
            queue.entry_mut(qi).attempts += 1;
            queue.fail(qi, "worker panicked".to_string());
            report.bump("permanently_failed");
        }
    }

    /// Drop every record this process still holds before leaving the run early.
    fn release_own_records(&self, why: &str) {
        match self.manager.release_process_records() {
            Ok(n) if n > 0 => {
                tracing::info!(removed = n, why, "released leases held by this process")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(why, "failed to release leases held by this process: {}", e),
        }
    }

    fn release(&self, grant: &Grant) {
        if let Err(e) = self.manager.release_lease(grant) {
            tracing::warn!(account = %grant.account, "failed to release lease: {}", e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        round: u32,
        qi: usize,
        account: &str,
        worker_report: WorkerReport,
        queue: &mut WorkQueue,
        report: &mut RunReport,
        speeds: &mut Vec<f64>,
    ) {
        let WorkerReport {
            outcome,
            bytes_per_sec,
            output_path,
            ..
        } = worker_report;
        report.bump(&outcome.counter());

        if outcome == Outcome::Interrupted {
            queue.requeue(qi, None, outcome.to_string());
            return;
        }

        if let Some(ok) = outcome.account_verdict() {
            if self.manager.record_outcome(account, ok) {
                report.bump("blacklisted_account");
                report.blacklisted.push(account.to_string());
            }
        }
        let committed = outcome.is_committed();
        let entry = queue.entry_mut(qi);
        entry.attempts += 1;
        let attempts = entry.attempts;
        let name = entry.product.name.clone();

        if committed {
            if let Some(speed) = bytes_per_sec {
                speeds.push(speed);
            }
            queue.mark_succeeded(qi, output_path.unwrap_or_default());
            return;
        }

        let kind = outcome.retry_kind().unwrap_or(ErrorKind::Other);
        match self.policy.decide(attempts, kind) {
            RetryDecision::RetryAfter(delay) => {
                tracing::info!(
                    round,
                    product = %name,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "requeued: {}",
                    outcome
                );
                queue.requeue(qi, Some(Instant::now() + delay), outcome.to_string());
            }
            RetryDecision::NoRetry => {
                let reason = if kind.is_retryable() {
                    format!("{} (gave up after {} attempts)", outcome, attempts)
                } else {
                    outcome.to_string()
                };
                tracing::warn!(round, product = %name, "permanently failed: {}", reason);
                queue.fail(qi, reason);
                report.bump("permanently_failed");
            }
        }
    }
}

fn create_output_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(OUTPUT_DIR_MODE);
    }
    builder.create(dir)
}
