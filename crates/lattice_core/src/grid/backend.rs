//! Persistent storage for evicted swatches.

use super::SwatchKey;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key/value storage for whole swatches. A swatch that was never stored
/// loads as `None`.
pub trait SwatchBackend {
    fn load(&mut self, key: SwatchKey) -> Result<Option<Vec<f64>>, StoreError>;

    fn store(&mut self, key: SwatchKey, values: &[f64]) -> Result<(), StoreError>;

    /// Makes every completed `store` durable. Backends with nothing to
    /// persist keep the default no-op.
    fn sync(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SwatchRecord {
    version: u32,
    key: SwatchKey,
    values: Vec<f64>,
}

/// One bincode file per swatch under a directory.
///
/// Each record is synced to disk before it is renamed into place; `sync`
/// then syncs the directory so the renames themselves survive a crash.
#[derive(Debug)]
pub struct DirectoryBackend {
    root: PathBuf,
    pending_renames: bool,
}

impl DirectoryBackend {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| io_error(&root, source))?;
        debug!(path = %root.display(), "opened swatch directory");
        Ok(Self {
            root,
            pending_renames: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: SwatchKey) -> PathBuf {
        self.root.join(format!("swatch_{key}.bin"))
    }
}

impl SwatchBackend for DirectoryBackend {
    fn load(&mut self, key: SwatchKey) -> Result<Option<Vec<f64>>, StoreError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path, err)),
        };
        let record: SwatchRecord = bincode::deserialize(&bytes).map_err(|e| corrupted(key, e))?;
        if record.version != FORMAT_VERSION {
            let reason = format!("unsupported record version {}", record.version);
            return Err(corrupted(key, reason));
        }
        if record.key != key {
            let reason = format!("file holds swatch {}", record.key);
            return Err(corrupted(key, reason));
        }
        Ok(Some(record.values))
    }

    fn store(&mut self, key: SwatchKey, values: &[f64]) -> Result<(), StoreError> {
        let record = SwatchRecord {
            version: FORMAT_VERSION,
            key,
            values: values.to_vec(),
        };
        let bytes = bincode::serialize(&record).map_err(|err| StoreError::Serialization {
            swatch: key.to_string(),
            reason: err.to_string(),
        })?;
        // Write then rename, so a crash never leaves a half-written swatch.
        let path = self.path_for(key);
        let staging = path.with_extension("bin.tmp");
        let staged = |source| io_error(&staging, source);
        let mut file = File::create(&staging).map_err(staged)?;
        file.write_all(&bytes).map_err(staged)?;
        file.sync_all().map_err(staged)?;
        fs::rename(&staging, &path).map_err(|source| io_error(&path, source))?;
        self.pending_renames = true;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        if !self.pending_renames {
            return Ok(());
        }
        // Directories cannot be opened for syncing outside unix.
        if cfg!(unix) {
            let at_root = |source| io_error(&self.root, source);
            let dir = File::open(&self.root).map_err(at_root)?;
            dir.sync_all().map_err(at_root)?;
        }
        self.pending_renames = false;
        debug!(path = %self.root.display(), "synced swatch directory");
        Ok(())
    }
}

fn corrupted(key: SwatchKey, reason: impl ToString) -> StoreError {
    StoreError::Corrupted {
        swatch: key.to_string(),
        reason: reason.to_string(),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Keeps evicted swatches in a map and counts traffic.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    swatches: HashMap<SwatchKey, Vec<f64>>,
    pub loads: usize,
    pub stores: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: SwatchKey) -> bool {
        self.swatches.contains_key(&key)
    }
}

impl SwatchBackend for MemoryBackend {
    fn load(&mut self, key: SwatchKey) -> Result<Option<Vec<f64>>, StoreError> {
        self.loads += 1;
        Ok(self.swatches.get(&key).cloned())
    }

    fn store(&mut self, key: SwatchKey, values: &[f64]) -> Result<(), StoreError> {
        self.stores += 1;
        self.swatches.insert(key, values.to_vec());
        Ok(())
    }
}
