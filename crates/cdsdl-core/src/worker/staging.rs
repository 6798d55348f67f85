//! Staging files: anonymous temp files that become the product on commit.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Prefix of staging file names; they never carry the product name.
pub const STAGING_PREFIX: &str = ".cdsdl-";
pub const STAGING_SUFFIX: &str = ".tmp";

/// A body being received. Dropping it without `commit` deletes the file.
pub struct StagingFile {
    file: NamedTempFile,
    written: u64,
}

impl StagingFile {
    /// Create a uniquely named file in `dir` (created if missing).
    pub fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(dir)?;
        Ok(Self { file, written: 0 })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flush, apply `mode` and atomically move the file to `destination`.
    /// An existing destination is replaced.
    pub fn commit(self, destination: &Path, mode: u32) -> io::Result<PathBuf> {
        let StagingFile { mut file, .. } = self;
        file.flush()?;
        file.as_file().sync_all()?;
        set_mode(file.as_file(), mode)?;
        match file.persist(destination) {
            Ok(_) => Ok(destination.to_path_buf()),
            Err(e) if is_cross_device(&e.error) => {
                // Staging dir on another filesystem: copy next to the
                // destination first so the final step is still a rename.
                let file = e.file;
                let parent = destination.parent().unwrap_or_else(|| Path::new("."));
                let mut local = tempfile::Builder::new()
                    .prefix(STAGING_PREFIX)
                    .suffix(STAGING_SUFFIX)
                    .tempfile_in(parent)?;
                io::copy(&mut fs::File::open(file.path())?, &mut local)?;
                local.as_file().sync_all()?;
                set_mode(local.as_file(), mode)?;
                local.persist(destination).map_err(|e| e.error)?;
                Ok(destination.to_path_buf())
            }
            Err(e) => Err(e.error),
        }
    }
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}
