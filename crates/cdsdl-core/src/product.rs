//! Products: the unit of work handed to the driver.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lifecycle of a product within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Pending,
    Downloading,
    Succeeded,
    Failed,
}

impl ProductStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductStatus::Pending => "pending",
            ProductStatus::Downloading => "downloading",
            ProductStatus::Succeeded => "succeeded",
            ProductStatus::Failed => "failed",
        }
    }
}

/// A remote data product: opaque catalog id plus human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub status: ProductStatus,
    /// Where the product lives locally once it is `Succeeded`.
    pub output_path: Option<PathBuf>,
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ProductStatus::Pending,
            output_path: None,
        }
    }

    /// Destination of this product inside `output_dir`.
    pub fn destination(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(output_file_name(&self.name))
    }
}

/// File name a downloaded product is stored under.
///
/// The API serves zipped products, so `X.SAFE` becomes `X.zip` and names
/// without an archive extension get `.zip` appended.
pub fn output_file_name(name: &str) -> String {
    if let Some(stem) = name.strip_suffix(".SAFE") {
        format!("{stem}.zip")
    } else if name.ends_with(".zip") {
        name.to_string()
    } else {
        format!("{name}.zip")
    }
}

/// Expand a download URL template: `{id}`, or the legacy `%s`, becomes `id`.
pub fn product_url(template: &str, id: &str) -> String {
    if template.contains("{id}") {
        template.replace("{id}", id)
    } else {
        template.replacen("%s", id, 1)
    }
}
