//! CLI command handlers, one file per command.

mod check_account;
mod completions;
mod download;
mod leases;
mod sweep;

pub use check_account::run_check_account;
pub use completions::run_completions;
pub use download::run_download;
pub use leases::run_leases;
pub use sweep::run_sweep;
