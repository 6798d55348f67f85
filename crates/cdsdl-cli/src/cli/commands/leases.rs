//! `cdsdl leases` – list token and session records.

use anyhow::Result;
use chrono::Utc;
use cdsdl_core::config::CdsdlConfig;
use cdsdl_core::driver::open_lease_store;
use cdsdl_core::lease_store::{LeaseKind, LeaseStore};

pub fn run_leases(cfg: &CdsdlConfig) -> Result<()> {
    let store = open_lease_store(cfg)?;
    let now = Utc::now();
    let ttl = cfg.token_ttl();

    let mut rows = Vec::new();
    for kind in [LeaseKind::Token, LeaseKind::Session] {
        for (key, rec) in store.list(kind, None)? {
            let age = rec.age(now);
            // Token payloads are bearer secrets and never printed.
            let detail = match kind {
                LeaseKind::Token if rec.is_expired(ttl, now) => "expired".to_string(),
                LeaseKind::Token => format!("{}s left", ttl.saturating_sub(age).as_secs()),
                LeaseKind::Session => rec.payload.clone(),
            };
            rows.push((kind.as_str(), key.account, rec.host, rec.pid, age.as_secs(), detail));
        }
    }

    if rows.is_empty() {
        println!("No lease records in {}.", store.dir().display());
        return Ok(());
    }
    println!(
        "{:<8} {:<32} {:<20} {:<8} {:<8} {}",
        "KIND", "ACCOUNT", "HOST", "PID", "AGE", "DETAIL"
    );
    for (kind, account, host, pid, age, detail) in rows {
        let host = if host.is_empty() { "-".to_string() } else { host };
        println!(
            "{:<8} {:<32} {:<20} {:<8} {:<8} {}",
            kind,
            account,
            host,
            pid,
            format!("{age}s"),
            detail
        );
    }
    Ok(())
}
