//! Wire a driver (and its collaborators) from configuration.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use super::DownloadDriver;
use crate::config::CdsdlConfig;
use crate::control::CancelToken;
use crate::lease_store::{sweep_orphans, FsLeaseStore, LeaseStore};
use crate::presence::FsPresence;
use crate::session::LeaseManager;
use crate::token::{CurlIdentity, TokenStore};
use crate::transport::CurlTransport;
use crate::worker::DownloadWorker;

/// Open the configured lease directory.
pub fn open_lease_store(cfg: &CdsdlConfig) -> Result<Arc<FsLeaseStore>> {
    let dir = cfg.lease_dir()?;
    let store = FsLeaseStore::open(&dir)
        .with_context(|| format!("failed to open lease dir {}", dir.display()))?;
    Ok(Arc::new(store))
}

/// Token store talking to the configured identity endpoint.
pub fn build_token_store(cfg: &CdsdlConfig, store: Arc<dyn LeaseStore>) -> TokenStore {
    let identity = CurlIdentity::new(cfg.identity_url.clone(), cfg.client_id.clone());
    TokenStore::new(store, Arc::new(identity))
        .with_ttl(cfg.token_ttl())
        .with_reuse_margin(cfg.token_reuse_margin())
}

/// Build a driver for one run of account `group` into `output_dir`.
///
/// Sweeps records orphaned by crashed processes before anything is granted.
pub fn build_driver(
    cfg: &CdsdlConfig,
    group: Option<&str>,
    output_dir: &Path,
    cancel: CancelToken,
    force: bool,
) -> Result<DownloadDriver> {
    cfg.validate()?;
    let accounts = cfg.accounts(group)?;
    let store = open_lease_store(cfg)?;
    let swept = sweep_orphans(store.as_ref(), cfg.token_ttl()).context("startup lease sweep")?;
    if swept.total() > 0 {
        tracing::info!(
            expired_tokens = swept.expired_tokens,
            orphaned = swept.orphaned,
            "startup sweep removed stale lease records"
        );
    }

    let tokens = build_token_store(cfg, store.clone());
    let manager = LeaseManager::new(store, tokens, accounts)
        .with_max_sessions(cfg.max_sessions_per_account)
        .with_blacklist_after(cfg.blacklist_threshold());
    let worker = DownloadWorker::new(
        Arc::new(CurlTransport::default()),
        cfg.staging_dir_for(output_dir),
    )
    .with_file_mode(cfg.file_mode)
    .with_cancel(cancel.clone());
    let presence = FsPresence::new(cfg.archive_dir.clone(), cfg.spool_dir.clone());

    Ok(DownloadDriver::new(
        manager,
        worker,
        Arc::new(presence),
        cfg.download_url_template.clone(),
    )
    .with_policy(cfg.retry_policy())
    .with_cancel(cancel)
    .with_force(force))
}
