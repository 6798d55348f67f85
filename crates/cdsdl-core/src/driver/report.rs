//! Run report: per-product results, counters and throughput statistics.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::product::ProductStatus;

/// Final state of one product.
#[derive(Debug, Clone, Serialize)]
pub struct ProductResult {
    pub id: String,
    pub name: String,
    pub status: ProductStatus,
    pub output_path: Option<PathBuf>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Mean and standard deviation of transfer speeds (bytes/s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Throughput {
    pub samples: usize,
    pub mean: f64,
    pub stdev: f64,
}

impl Throughput {
    /// Population statistics of `speeds`; all zero when empty.
    pub fn from_samples(speeds: &[f64]) -> Self {
        if speeds.is_empty() {
            return Self::default();
        }
        let n = speeds.len() as f64;
        let mean = speeds.iter().sum::<f64>() / n;
        let var = speeds.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Self {
            samples: speeds.len(),
            mean,
            stdev: var.sqrt(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub results: Vec<ProductResult>,
    pub counters: BTreeMap<String, u64>,
    pub rounds: u32,
    pub throughput: Throughput,
    /// Accounts blacklisted during the run.
    pub blacklisted: Vec<String>,
    pub interrupted: bool,
}

impl RunReport {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub(crate) fn bump(&mut self, name: &str) {
        *self.counters.entry(name.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn set(&mut self, name: &str, value: u64) {
        self.counters.insert(name.to_string(), value);
    }

    pub fn succeeded(&self) -> usize {
        self.count(ProductStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(ProductStatus::Failed)
    }

    fn count(&self, status: ProductStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0 && !self.interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_statistics() {
        let t = Throughput::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(t.samples, 8);
        assert!((t.mean - 5.0).abs() < 1e-9);
        assert!((t.stdev - 2.0).abs() < 1e-9);
        assert_eq!(Throughput::from_samples(&[]), Throughput::default());
    }

    #[test]
    fn counters_default_to_zero() {
        let mut r = RunReport::default();
        assert_eq!(r.counter("auth_failure"), 0);
        r.bump("auth_failure");
        r.bump("auth_failure");
        assert_eq!(r.counter("auth_failure"), 2);
        r.set("total_product_to_download", 7);
        assert_eq!(r.counter("total_product_to_download"), 7);
    }
}
