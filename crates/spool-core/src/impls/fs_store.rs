//! FsEntryStore - one JSON file per entry.
//!
//! Layout: `<dir>/<entry_id>.json`. Writes go through a `NamedTempFile` in the
//! same directory, are fsynced, then renamed over the target, so a reader
//! sees either the previous record or the new one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::{EntryId, EntryRecord, Payload};
use crate::error::StorageError;
use crate::ports::{EntryStore, LoadReport, SkippedRecord};

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FsEntryStore {
    dir: PathBuf,
}

impl FsEntryStore {
    /// Open (creating if needed) the entry directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, entry_id: &EntryId) -> PathBuf {
        self.dir.join(format!("{entry_id}.{RECORD_EXTENSION}"))
    }

    fn read_record<P: Payload>(path: &Path) -> Result<EntryRecord<P>, StorageError> {
        let bytes = fs::read(path).map_err(|e| StorageError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::serialization(path, e))
    }
}

/// Write `bytes` to `final_path` via a temp file in `dir` + fsync + rename,
/// then fsync `dir`. `final_path` must live in `dir`.
///
/// Once the rename has happened the new record is the one on disk, so a
/// failed directory fsync after it is logged instead of returned.
pub(crate) fn write_atomic(dir: &Path, final_path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
    let temp_path = temp.path().to_path_buf();
    temp.as_file_mut()
        .write_all(bytes)
        .map_err(|e| StorageError::io(&temp_path, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(&temp_path, e))?;
    temp.persist(final_path)
        .map_err(|source| StorageError::Persist {
            path: final_path.to_path_buf(),
            source,
        })?;

    sync_dir_after_commit(dir);
    Ok(())
}

fn sync_dir(dir: &Path) -> Result<(), StorageError> {
    #[cfg(unix)]
    {
        fs::File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| StorageError::io(dir, e))?;
    }
    Ok(())
}

/// Directory fsync for a change that is already visible.
fn sync_dir_after_commit(dir: &Path) {
    if let Err(e) = sync_dir(dir) {
        warn!(dir = %dir.display(), error = %e, "directory fsync failed after commit");
    }
}

impl EntryStore for FsEntryStore {
    fn write<P: Payload>(&self, record: &EntryRecord<P>) -> Result<(), StorageError> {
        let final_path = self.path_for(&record.entry_id);
        let bytes =
            serde_json::to_vec_pretty(record).map_err(|e| StorageError::serialization(&final_path, e))?;

        write_atomic(&self.dir, &final_path, &bytes)
    }

    fn read_all<P: Payload>(&self) -> Result<LoadReport<P>, StorageError> {
        let mut report = LoadReport::default();
        let listing = fs::read_dir(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;

        for dirent in listing {
            let dirent = dirent.map_err(|e| StorageError::io(&self.dir, e))?;
            let path = dirent.path();

            // Leftover temp files from an interrupted write have no extension.
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let skip = |reason: String| {
                warn!(path = %path.display(), %reason, "skipping unreadable entry record");
                SkippedRecord {
                    location: path.display().to_string(),
                    reason,
                }
            };

            match Self::read_record::<P>(&path) {
                Ok(record) => {
                    let stem = path.file_stem().and_then(|s| s.to_str());
                    if stem == Some(record.entry_id.to_string().as_str()) {
                        report.records.push(record);
                    } else {
                        report.skipped.push(skip(format!(
                            "file name does not match entry id {}",
                            record.entry_id
                        )));
                    }
                }
                Err(e) => report.skipped.push(skip(e.to_string())),
            }
        }

        Ok(report)
    }

    fn delete(&self, entry_id: &EntryId) -> Result<(), StorageError> {
        let path = self.path_for(entry_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                sync_dir_after_commit(&self.dir);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    fn exists(&self, entry_id: &EntryId) -> bool {
        self.path_for(entry_id).exists()
    }

    fn destroy(&self) -> Result<(), StorageError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&self.dir, e)),
        }
    }
}
