use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::session::{Account, MAX_SESSIONS_PER_ACCOUNT};
use crate::token::DEFAULT_TOKEN_TTL;
use crate::worker::DEFAULT_FILE_MODE;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per product (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_secs: policy.base_delay.as_secs_f64(),
            max_delay_secs: policy.max_delay.as_secs(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(cfg.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }
}

/// Global configuration loaded from `~/.config/cdsdl/config.toml`.
///
/// Scalar keys come first so the file serializes as valid TOML (tables last).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdsdlConfig {
    /// OpenID Connect token endpoint (password grant).
    pub identity_url: String,
    pub client_id: String,
    /// Product download URL; `{id}` (or legacy `%s`) is replaced by the product id.
    pub download_url_template: String,
    pub max_sessions_per_account: usize,
    pub token_ttl_secs: u64,
    /// Live tokens with less lifetime left than this are not reused.
    pub token_reuse_margin_secs: u64,
    /// Consecutive failures before an account is blacklisted for the run
    /// (defaults to `max_sessions_per_account`).
    pub blacklist_after_errors: Option<u32>,
    /// Permission bits of committed products.
    pub file_mode: u32,
    /// Shared directory for lease records. Every cooperating process must use the same one.
    pub lease_dir: Option<PathBuf>,
    /// Staging directory for partial bodies (default: `<output>/.cdsdl-staging`).
    pub staging_dir: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub spool_dir: Option<PathBuf>,
    /// Account group used when none is given on the command line.
    pub default_group: String,
    pub retry: Option<RetryConfig>,
    /// Account groups: `[groups.<name>]` tables of `login = "secret"`.
    pub groups: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for CdsdlConfig {
    fn default() -> Self {
        Self {
            identity_url:
                "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token"
                    .to_string(),
            client_id: "cdse-public".to_string(),
            download_url_template:
                "https://zipper.dataspace.copernicus.eu/odata/v1/Products({id})/$value".to_string(),
            max_sessions_per_account: MAX_SESSIONS_PER_ACCOUNT,
            token_ttl_secs: DEFAULT_TOKEN_TTL.as_secs(),
            token_reuse_margin_secs: 60,
            blacklist_after_errors: None,
            file_mode: DEFAULT_FILE_MODE,
            lease_dir: None,
            staging_dir: None,
            archive_dir: None,
            spool_dir: None,
            default_group: "logins".to_string(),
            retry: None,
            groups: BTreeMap::new(),
        }
    }
}

impl CdsdlConfig {
    /// Check endpoints, template and limits. Accounts are checked by `accounts`.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.identity_url)
            .with_context(|| format!("invalid identity_url {:?}", self.identity_url))?;
        if !self.download_url_template.contains("{id}") && !self.download_url_template.contains("%s")
        {
            bail!("download_url_template must contain an {{id}} placeholder");
        }
        url::Url::parse(&self.product_url("probe"))
            .with_context(|| format!("invalid download_url_template {:?}", self.download_url_template))?;
        if self.max_sessions_per_account == 0 {
            bail!("max_sessions_per_account must be at least 1");
        }
        if self.token_ttl_secs == 0 {
            bail!("token_ttl_secs must be positive");
        }
        if self.token_reuse_margin_secs >= self.token_ttl_secs {
            bail!("token_reuse_margin_secs must be smaller than token_ttl_secs");
        }
        if self.blacklist_after_errors == Some(0) {
            bail!("blacklist_after_errors must be at least 1");
        }
        if self.file_mode > 0o7777 {
            bail!("file_mode {:o} is not a permission mode", self.file_mode);
        }
        Ok(())
    }

    /// Accounts of `group` (or of `default_group`).
    pub fn accounts(&self, group: Option<&str>) -> Result<Vec<Account>> {
        let name = group.unwrap_or(&self.default_group);
        let Some(entries) = self.groups.get(name) else {
            bail!("no account group {:?} in config (add a [groups.{}] table)", name, name);
        };
        if entries.is_empty() {
            bail!("account group {:?} has no accounts", name);
        }
        Ok(Account::from_group(entries))
    }

    pub fn product_url(&self, id: &str) -> String {
        crate::product::product_url(&self.download_url_template, id)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn token_reuse_margin(&self) -> Duration {
        Duration::from_secs(self.token_reuse_margin_secs)
    }

    pub fn blacklist_threshold(&self) -> u32 {
        self.blacklist_after_errors
            .unwrap_or(self.max_sessions_per_account as u32)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .as_ref()
            .map(RetryPolicy::from)
            .unwrap_or_default()
    }

    /// Lease directory: configured, else `~/.local/state/cdsdl/leases`.
    pub fn lease_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.lease_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("cdsdl")?;
        Ok(xdg_dirs.get_state_home().join("cdsdl").join("leases"))
    }

    /// Staging directory for a run writing into `output_dir`.
    pub fn staging_dir_for(&self, output_dir: &Path) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| output_dir.join(".cdsdl-staging"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("cdsdl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<CdsdlConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = CdsdlConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

/// Load configuration from an explicit file.
pub fn load_from_path(path: &Path) -> Result<CdsdlConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg: CdsdlConfig =
        toml::from_str(&data).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
