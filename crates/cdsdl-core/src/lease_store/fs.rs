//! Filesystem lease store: one small JSON file per record in a shared directory.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::record::RECORD_SUFFIX;
use super::{LeaseError, LeaseKey, LeaseKind, LeaseRecord, LeaseStore};

/// Lease records stored as files under one directory.
///
/// Records are written to a temporary file first and then linked into place
/// without clobbering, so a record is either absent or complete for every
/// reader, and two creators of the same key can never both succeed.
#[derive(Debug, Clone)]
pub struct FsLeaseStore {
    dir: PathBuf,
}

impl FsLeaseStore {
    /// Open (and create if needed) the lease directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LeaseError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| LeaseError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &LeaseKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LeaseError + '_ {
        move |source| LeaseError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl LeaseStore for FsLeaseStore {
    fn try_create(&self, key: &LeaseKey, record: &LeaseRecord) -> Result<bool, LeaseError> {
        let path = self.path_for(key);
        let json = serde_json::to_vec(record).map_err(|source| LeaseError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.dir)
            .map_err(Self::io_err(&self.dir))?;
        tmp.write_all(&json).map_err(Self::io_err(tmp.path()))?;
        tmp.as_file().sync_all().map_err(Self::io_err(tmp.path()))?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(true),
            // The temp file is dropped (and deleted) together with the error.
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(LeaseError::Io {
                path,
                source: e.error,
            }),
        }
    }

    fn read(&self, key: &LeaseKey) -> Result<Option<LeaseRecord>, LeaseError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LeaseError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| LeaseError::Corrupt { path, source })
    }

    fn list(
        &self,
        kind: LeaseKind,
        account: Option<&str>,
    ) -> Result<Vec<(LeaseKey, LeaseRecord)>, LeaseError> {
        let entries = std::fs::read_dir(&self.dir).map_err(Self::io_err(&self.dir))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Self::io_err(&self.dir))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(RECORD_SUFFIX) {
                continue;
            }
            let Some(key) = LeaseKey::from_file_name(name) else {
                continue;
            };
            if key.kind != kind || account.is_some_and(|a| a != key.account) {
                continue;
            }
            match self.read(&key) {
                // Removed between read_dir and read: another process released it.
                Ok(None) => {}
                Ok(Some(record)) => out.push((key, record)),
                Err(LeaseError::Corrupt { path, source }) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable lease record: {}", source);
                }
                Err(e) => return Err(e),
            }
        }
        out.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));
        Ok(out)
    }

    fn remove(&self, key: &LeaseKey) -> Result<(), LeaseError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LeaseError::Io { path, source }),
        }
    }
}
