//! Per-run work queue: products in input order plus their retry bookkeeping.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use crate::product::{Product, ProductStatus};

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub product: Product,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Backoff: not eligible before this instant.
    pub not_before: Option<Instant>,
}

#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    entries: Vec<Entry>,
}

impl WorkQueue {
    /// Build the queue. Products repeating an earlier id are dropped.
    pub fn new(products: Vec<Product>) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(products.len());
        for mut product in products {
            if !seen.insert(product.id.clone()) {
                tracing::warn!(id = %product.id, name = %product.name, "duplicate product ignored");
                continue;
            }
            product.status = ProductStatus::Pending;
            product.output_path = None;
            entries.push(Entry {
                product,
                attempts: 0,
                last_error: None,
                not_before: None,
            });
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry_mut(&mut self, i: usize) -> &mut Entry {
        &mut self.entries[i]
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn has_pending(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.product.status == ProductStatus::Pending)
    }

    /// Pending entries whose backoff has elapsed, in input order.
    pub fn eligible(&self, now: Instant) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.product.status == ProductStatus::Pending
                    && e.not_before.map_or(true, |t| t <= now)
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Earliest backoff deadline among pending entries.
    pub fn next_wakeup(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| e.product.status == ProductStatus::Pending)
            .filter_map(|e| e.not_before)
            .min()
    }

    pub fn mark_succeeded(&mut self, i: usize, path: PathBuf) {
        let e = &mut self.entries[i];
        e.product.status = ProductStatus::Succeeded;
        e.product.output_path = Some(path);
        e.not_before = None;
    }

    pub fn mark_downloading(&mut self, i: usize) {
        self.entries[i].product.status = ProductStatus::Downloading;
    }

    pub fn requeue(&mut self, i: usize, not_before: Option<Instant>, reason: String) {
        let e = &mut self.entries[i];
        e.product.status = ProductStatus::Pending;
        e.not_before = not_before;
        e.last_error = Some(reason);
    }

    pub fn fail(&mut self, i: usize, reason: String) {
        let e = &mut self.entries[i];
        e.product.status = ProductStatus::Failed;
        e.not_before = None;
        e.last_error = Some(reason);
    }

    /// Everything not finished becomes Failed with `reason` (kept if one is already recorded).
    pub fn fail_unfinished(&mut self, reason: &str) {
        for e in &mut self.entries {
            if matches!(
                e.product.status,
                ProductStatus::Pending | ProductStatus::Downloading
            ) {
                e.product.status = ProductStatus::Failed;
                let last = e.last_error.take();
                e.last_error = Some(match last {
                    Some(prev) => format!("{reason} (last error: {prev})"),
                    None => reason.to_string(),
                });
            }
        }
    }
}
