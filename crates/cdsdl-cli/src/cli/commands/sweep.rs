//! `cdsdl sweep` – drop lease records of dead processes and expired tokens.

use anyhow::Result;
use cdsdl_core::config::CdsdlConfig;
use cdsdl_core::driver::open_lease_store;
use cdsdl_core::lease_store::sweep_orphans;

pub fn run_sweep(cfg: &CdsdlConfig) -> Result<()> {
    let store = open_lease_store(cfg)?;
    let summary = sweep_orphans(store.as_ref(), cfg.token_ttl())?;
    println!(
        "Removed {} expired token record(s) and {} orphaned record(s) from {}.",
        summary.expired_tokens,
        summary.orphaned,
        store.dir().display()
    );
    Ok(())
}
