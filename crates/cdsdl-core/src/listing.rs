//! Work-list files: one `id,name` pair per line.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::product::Product;

#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    #[error("cannot read listing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: expected `id,name`, got {content:?}")]
    Malformed { line: usize, content: String },
}

/// Parse listing text. Blank lines and `#` comments are skipped, as is an
/// `id,name` header. Repeated ids keep their first occurrence.
pub fn parse_listing(text: &str) -> Result<Vec<Product>, ListingError> {
    let mut products = Vec::new();
    let mut seen = HashSet::new();
    for (n, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = || ListingError::Malformed {
            line: n + 1,
            content: line.to_string(),
        };
        let (id, name) = line.split_once(',').ok_or_else(malformed)?;
        let (id, name) = (id.trim(), name.trim());
        if id.is_empty() || name.is_empty() || name.contains(',') {
            return Err(malformed());
        }
        if products.is_empty() && id.eq_ignore_ascii_case("id") {
            continue;
        }
        if !seen.insert(id.to_string()) {
            tracing::warn!(id, line = n + 1, "duplicate product id in listing, skipped");
            continue;
        }
        products.push(Product::new(id, name));
    }
    Ok(products)
}

pub fn read_listing(path: &Path) -> Result<Vec<Product>, ListingError> {
    let text = std::fs::read_to_string(path).map_err(|source| ListingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_listing(&text)
}
