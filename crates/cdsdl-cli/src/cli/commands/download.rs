//! `cdsdl download` – fetch every product of a listing.

use anyhow::{Context, Result};
use cdsdl_core::config::CdsdlConfig;
use cdsdl_core::control::CancelToken;
use cdsdl_core::driver::{build_driver, RunReport};
use cdsdl_core::listing::read_listing;
use std::path::Path;

use crate::cli::Status;

pub async fn run_download(
    cfg: &CdsdlConfig,
    listing: &Path,
    output_dir: &Path,
    group: Option<&str>,
    force: bool,
    strict: bool,
) -> Result<Status> {
    let products = read_listing(listing)?;
    if products.is_empty() {
        println!("Listing {} has no products.", listing.display());
        return Ok(Status::Done);
    }

    let cancel = CancelToken::new();
    let driver = build_driver(cfg, group, output_dir, cancel.clone(), force)
        .context("failed to set up the download run")?;

    let on_ctrl_c = cancel.clone();
    let signal_handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupted; finishing up and releasing leases");
            on_ctrl_c.cancel();
        }
    });

    let result = driver.run(products, output_dir).await;
    signal_handle.abort();
    let report = result?;
    print_report(&report);

    Ok(if report.interrupted {
        Status::Interrupted
    } else if strict && !report.all_succeeded() {
        Status::Failures
    } else {
        Status::Done
    })
}

fn print_report(report: &RunReport) {
    println!("{:<10} {:<8} {:<60} {}", "STATUS", "ATTEMPTS", "PRODUCT", "DETAIL");
    for r in &report.results {
        let detail = match (&r.output_path, &r.last_error) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(err)) => err.clone(),
            (None, None) => "-".to_string(),
        };
        println!(
            "{:<10} {:<8} {:<60} {}",
            r.status.as_str(),
            r.attempts,
            r.name,
            detail
        );
    }

    println!();
    println!(
        "{} succeeded, {} failed in {} round(s)",
        report.succeeded(),
        report.failed(),
        report.rounds
    );
    if report.throughput.samples > 0 {
        println!(
            "throughput: {:.2} MiB/s mean, {:.2} MiB/s stdev over {} transfer(s)",
            report.throughput.mean / 1_048_576.0,
            report.throughput.stdev / 1_048_576.0,
            report.throughput.samples
        );
    }
    if !report.blacklisted.is_empty() {
        println!("blacklisted accounts: {}", report.blacklisted.join(", "));
    }
    for (name, value) in &report.counters {
        println!("  {:<32} {}", name, value);
    }
}
