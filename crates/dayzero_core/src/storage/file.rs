//! File-backed key-value store for native targets.
//!
//! One file per key under a data directory. Blob keys are short
//! identifiers chosen by [`Config`](crate::config::Config), so keys map
//! directly to file names with a `.json` suffix.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{BoxFuture, KeyValueStore};
use crate::error::{DayzeroError, Result};

/// Native [`KeyValueStore`] persisting each key as a file in a directory.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn map_write_error(key: &str, err: std::io::Error) -> DayzeroError {
        // A full disk is the native analogue of the browser's
        // QuotaExceededError and must be distinguishable so the cache can
        // evict and retry.
        if err.kind() == ErrorKind::StorageFull || err.raw_os_error() == Some(28) {
            DayzeroError::QuotaExceeded(key.to_string())
        } else {
            DayzeroError::Storage(format!("write '{key}': {err}"))
        }
    }
}

impl KeyValueStore for FileKvStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            match std::fs::read_to_string(self.path_for(key)) {
                Ok(value) => Ok(Some(value)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(DayzeroError::Storage(format!("read '{key}': {e}"))),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            std::fs::create_dir_all(&self.dir)
                .map_err(|e| Self::map_write_error(key, e))?;

            // Write to a temp file and rename so a crash mid-write never
            // truncates the previous blob.
            let target = self.path_for(key);
            let tmp = self.dir.join(format!("{key}.json.tmp"));
            std::fs::write(&tmp, value).map_err(|e| Self::map_write_error(key, e))?;
            std::fs::rename(&tmp, &target).map_err(|e| Self::map_write_error(key, e))?;
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match std::fs::remove_file(self.path_for(key)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(DayzeroError::Storage(format!("remove '{key}': {e}"))),
            }
        })
    }
}

/// Directory this store persists into.
impl AsRef<Path> for FileKvStore {
    fn as_ref(&self) -> &Path {
        &self.dir
    }
}
