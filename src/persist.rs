//! Atomic file persistence with timestamped backups.
//!
//! Content is staged in a temporary file next to the target and moved over
//! it with a single rename, so a reader of the target sees either the old or
//! the new complete content. When the target already holds different bytes,
//! they are copied to a backup file first.

use crate::{PostforgeError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub path: PathBuf,
    /// False when the target already held identical bytes.
    pub written: bool,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct AtomicWriter {
    backup_dir: Option<PathBuf>,
}

impl AtomicWriter {
    /// Backups land next to the target.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    pub fn save(&self, path: &Path, content: &[u8]) -> Result<SaveReport> {
        match fs::read(path) {
            Ok(existing) if existing == content => {
                debug!(path = %path.display(), "content unchanged, skipping write");
                return Ok(SaveReport {
                    path: path.to_path_buf(),
                    written: false,
                    backup: None,
                });
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(PostforgeError::io(path, err)),
        }

        self.stage(path, content)?.commit()
    }

    /// Write `content` to a temporary file beside `path` without touching `path`.
    pub fn stage(&self, path: &Path, content: &[u8]) -> Result<StagedWrite> {
        let dir = parent_dir(path);
        fs::create_dir_all(&dir).map_err(|e| PostforgeError::io(&dir, e))?;

        // dropping the NamedTempFile on any error below removes it
        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| PostforgeError::io(&dir, e))?;
        temp.write_all(content)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| PostforgeError::io(temp.path(), e))?;

        debug!(path = %path.display(), temp = %temp.path().display(), bytes = content.len(), "staged write");
        Ok(StagedWrite {
            temp,
            target: path.to_path_buf(),
            backup_dir: self.backup_dir.clone(),
        })
    }
}

/// A fully written temporary file waiting to replace its target.
///
/// Dropping it without calling [`StagedWrite::commit`] deletes the temporary
/// file and leaves the target as it was.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
    backup_dir: Option<PathBuf>,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn commit(self) -> Result<SaveReport> {
        let backup = if self.target.exists() {
            Some(self.backup_existing()?)
        } else {
            None
        };

        self.temp
            .persist(&self.target)
            .map_err(|e| PostforgeError::io(&self.target, e.error))?;

        info!(path = %self.target.display(), backup = ?backup, "saved");
        Ok(SaveReport {
            path: self.target,
            written: true,
            backup,
        })
    }

    fn backup_existing(&self) -> Result<PathBuf> {
        let dir = self
            .backup_dir
            .clone()
            .unwrap_or_else(|| parent_dir(&self.target));
        fs::create_dir_all(&dir).map_err(|e| PostforgeError::io(&dir, e))?;

        let backup = backup_path(&dir, &self.target);
        fs::copy(&self.target, &backup).map_err(|e| PostforgeError::io(&backup, e))?;
        info!(path = %self.target.display(), backup = %backup.display(), "created backup");
        Ok(backup)
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// `<stem>_<timestamp>.<ext>` inside `dir`, with a counter on collision.
fn backup_path(dir: &Path, target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    let ext = target
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = chrono::Local::now().format("%Y%m%dT%H%M%S%.3f");

    let mut candidate = dir.join(format!("{stem}_{stamp}{ext}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{stamp}_{n}{ext}"));
        n += 1;
    }
    candidate
}
