//! Local presence checks: is a product already somewhere on disk?
//!
//! Three places are consulted: the long-term archive (a tree derived from
//! the product name), the spool directory where freshly downloaded products
//! wait for ingestion, and the run's output directory. Each check accepts
//! the bare name, `name.zip` and the name with `.SAFE` replaced by `.zip`.

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// Where an already present product was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalPresence {
    Archived(PathBuf),
    Spool(PathBuf),
    OutputDir(PathBuf),
}

impl LocalPresence {
    pub fn path(&self) -> &Path {
        match self {
            LocalPresence::Archived(p) | LocalPresence::Spool(p) | LocalPresence::OutputDir(p) => p,
        }
    }

    /// Run-report counter for this kind of hit.
    pub fn counter(&self) -> &'static str {
        match self {
            LocalPresence::Archived(_) => "archived_product",
            LocalPresence::Spool(_) => "in_spool_product",
            LocalPresence::OutputDir(_) => "in_output_dir_product",
        }
    }
}

/// Local-presence checker consulted before any network I/O.
pub trait Presence: Send + Sync {
    fn find_archived(&self, name: &str) -> Option<PathBuf>;
    fn find_in_spool(&self, name: &str) -> Option<PathBuf>;
    fn find_in_output_dir(&self, dir: &Path, name: &str) -> Option<PathBuf>;

    fn is_archived(&self, name: &str) -> bool {
        self.find_archived(name).is_some()
    }

    fn is_in_spool(&self, name: &str) -> bool {
        self.find_in_spool(name).is_some()
    }

    fn is_in_output_dir(&self, dir: &Path, name: &str) -> bool {
        self.find_in_output_dir(dir, name).is_some()
    }

    /// First hit among archive, spool and output directory.
    fn locate(&self, output_dir: &Path, name: &str) -> Option<LocalPresence> {
        if let Some(p) = self.find_archived(name) {
            return Some(LocalPresence::Archived(p));
        }
        if let Some(p) = self.find_in_spool(name) {
            return Some(LocalPresence::Spool(p));
        }
        self.find_in_output_dir(output_dir, name)
            .map(LocalPresence::OutputDir)
    }
}

/// Filesystem presence checker. Unset directories never match.
#[derive(Debug, Clone, Default)]
pub struct FsPresence {
    pub archive_dir: Option<PathBuf>,
    pub spool_dir: Option<PathBuf>,
}

impl FsPresence {
    pub fn new(archive_dir: Option<PathBuf>, spool_dir: Option<PathBuf>) -> Self {
        Self {
            archive_dir,
            spool_dir,
        }
    }
}

impl Presence for FsPresence {
    fn find_archived(&self, name: &str) -> Option<PathBuf> {
        let root = self.archive_dir.as_deref()?;
        let dir = root.join(archive_subdir(name)?);
        find_variant(&dir, name)
    }

    fn find_in_spool(&self, name: &str) -> Option<PathBuf> {
        find_variant(self.spool_dir.as_deref()?, name)
    }

    fn find_in_output_dir(&self, dir: &Path, name: &str) -> Option<PathBuf> {
        find_variant(dir, name)
    }
}

fn find_variant(dir: &Path, name: &str) -> Option<PathBuf> {
    candidate_names(name)
        .into_iter()
        .map(|n| dir.join(n))
        .find(|p| p.exists())
}

/// `X.SAFE` -> [`X.SAFE`, `X.SAFE.zip`, `X.zip`].
pub fn candidate_names(name: &str) -> Vec<String> {
    let mut names = vec![name.to_string(), format!("{name}.zip")];
    let swapped = name.replace(".SAFE", ".zip");
    if !names.contains(&swapped) {
        names.push(swapped);
    }
    names
}

/// Archive location of a Sentinel product relative to the archive root:
/// `sentinel-<unit>/L<level>/<mode>/<sat>_<mode><subtype>/<year>/<doy>`.
///
/// Returns `None` for names that do not follow the Sentinel-1/2 layout.
pub fn archive_subdir(name: &str) -> Option<PathBuf> {
    let first_date = if name.starts_with("S1") {
        name.get(17..32)?
    } else if name.starts_with("S2") {
        name.get(11..26)?
    } else {
        return None;
    };
    let date = NaiveDateTime::parse_from_str(first_date, "%Y%m%dT%H%M%S").ok()?;

    let mut fields = name.split('_');
    let sat = fields.next()?;
    let mut mode = fields.next()?.to_string();
    if mode.starts_with('S') {
        // S1..S6 stripmap beams share one directory.
        mode = "SM".to_string();
    }
    let unit = sat.get(2..)?.to_lowercase();
    let level = name.get(12..13)?;
    let subtype = name.get(6..14)?;

    Some(
        PathBuf::from(format!("sentinel-{unit}"))
            .join(format!("L{level}"))
            .join(&mode)
            .join(format!("{sat}_{mode}{subtype}"))
            .join(date.format("%Y").to_string())
            .join(date.format("%j").to_string()),
    )
}
