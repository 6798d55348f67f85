//! CLI for the cdsdl product downloader.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use cdsdl_core::config::{self, CdsdlConfig};
use std::path::PathBuf;

use commands::{run_check_account, run_completions, run_download, run_leases, run_sweep};

/// Top-level CLI for cdsdl.
#[derive(Debug, Parser)]
#[command(name = "cdsdl")]
#[command(about = "cdsdl: multi-account product downloader with shared session leases", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/cdsdl/config.toml, created on first use).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug logging to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download every product of a listing.
    Download {
        /// Listing file: one `id,name` line per product.
        #[arg(long, value_name = "CSV")]
        listing: PathBuf,

        /// Directory the products are written to.
        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Account group from the config (default: `default_group`).
        #[arg(long)]
        group: Option<String>,

        /// Download products even when already present locally.
        #[arg(long)]
        force: bool,

        /// Exit non-zero when any product failed.
        #[arg(long)]
        strict: bool,
    },

    /// Remove lease records left behind by dead processes and expired tokens.
    Sweep,

    /// List live token and session records.
    Leases,

    /// Acquire and release a token for each account of a group.
    CheckAccount {
        /// Check only this login.
        #[arg(long)]
        login: Option<String>,

        /// Account group from the config (default: `default_group`).
        #[arg(long)]
        group: Option<String>,
    },

    /// Print a shell completion script.
    Completions {
        shell: Shell,
    },
}

/// How a command finished, mapped to the process exit status by `main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Done,
    Failures,
    Interrupted,
}

impl Cli {
    pub async fn run(self) -> Result<Status> {
        if let CliCommand::Completions { shell } = self.command {
            run_completions(shell);
            return Ok(Status::Done);
        }
        let cfg = self.load_config()?;
        tracing::debug!("loaded config: {:?}", redacted(&cfg));

        match self.command {
            CliCommand::Download {
                listing,
                output_dir,
                group,
                force,
                strict,
            } => run_download(&cfg, &listing, &output_dir, group.as_deref(), force, strict).await,
            CliCommand::Sweep => run_sweep(&cfg).map(|()| Status::Done),
            CliCommand::Leases => run_leases(&cfg).map(|()| Status::Done),
            CliCommand::CheckAccount { login, group } => {
                run_check_account(&cfg, group.as_deref(), login.as_deref()).await
            }
            CliCommand::Completions { .. } => Ok(Status::Done),
        }
    }

    fn load_config(&self) -> Result<CdsdlConfig> {
        match &self.config {
            Some(path) => config::load_from_path(path),
            None => config::load_or_init(),
        }
    }
}

/// Config with account secrets masked, for logging.
fn redacted(cfg: &CdsdlConfig) -> CdsdlConfig {
    let mut cfg = cfg.clone();
    for accounts in cfg.groups.values_mut() {
        for secret in accounts.values_mut() {
            *secret = "***".to_string();
        }
    }
    cfg
}

#[cfg(test)]
mod tests;
