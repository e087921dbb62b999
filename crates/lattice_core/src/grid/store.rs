//! Out-of-core 4-D grid: fixed-size swatches paged between memory and a
//! `SwatchBackend`.
//!
//! Every swatch is either resident (the only live copy, possibly dirty) or
//! persisted, never both with diverging contents. Eviction writes dirty
//! swatches back before dropping them, so a read always sees the latest write
//! for its coordinate. Swatches that were never written read as zero.

use super::backend::{DirectoryBackend, SwatchBackend};
use super::{check_bounds, linear_index, Field, SwatchKey};
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridStoreConfig {
    /// Cells per axis, `(t, x, y, z)`.
    pub extent: [usize; 4],
    /// Swatch size per axis.
    pub swatch: [usize; 4],
    /// Backing directory for the default backend.
    pub location: PathBuf,
    /// Swatches kept in memory before the least recently used is evicted.
    pub max_resident: usize,
}

impl Default for GridStoreConfig {
    fn default() -> Self {
        Self {
            extent: [2, 16, 16, 16],
            swatch: [1, 8, 8, 8],
            location: PathBuf::from("lattice-store"),
            max_resident: 16,
        }
    }
}

impl GridStoreConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.extent.iter().any(|&n| n == 0) {
            return Err(StoreError::InvalidConfig(format!(
                "extent {:?} has an empty axis",
                self.extent
            )));
        }
        if self.swatch.iter().any(|&n| n == 0) {
            return Err(StoreError::InvalidConfig(format!(
                "swatch {:?} has an empty axis",
                self.swatch
            )));
        }
        if self.max_resident == 0 {
            return Err(StoreError::InvalidConfig("max_resident must be positive".into()));
        }
        Ok(())
    }

    pub fn swatch_len(&self) -> usize {
        self.swatch.iter().product()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub page_ins: usize,
    pub page_outs: usize,
    pub reads: usize,
    pub writes: usize,
}

#[derive(Debug)]
struct Resident {
    values: Vec<f64>,
    dirty: bool,
    last_touch: u64,
}

pub struct GridStore<B: SwatchBackend = DirectoryBackend> {
    config: GridStoreConfig,
    backend: B,
    resident: HashMap<SwatchKey, Resident>,
    clock: u64,
    stats: StoreStats,
    closed: bool,
}

impl GridStore<DirectoryBackend> {
    /// Opens (or creates) a store backed by `config.location`.
    pub fn open(config: GridStoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let backend = DirectoryBackend::open(&config.location)?;
        Self::with_backend(config, backend)
    }

    /// Opens a directory-backed store, runs `body`, and closes the store on
    /// every path. An error from `body` takes precedence over one from
    /// closing.
    pub fn scoped<R, E>(
        config: GridStoreConfig,
        body: impl FnOnce(&mut Self) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let store = Self::open(config)?;
        store.run_scoped(body)
    }
}

impl<B: SwatchBackend> GridStore<B> {
    pub fn with_backend(config: GridStoreConfig, backend: B) -> Result<Self, StoreError> {
        config.validate()?;
        info!(
            extent = ?config.extent,
            swatch = ?config.swatch,
            max_resident = config.max_resident,
            "opened grid store"
        );
        Ok(Self {
            config,
            backend,
            resident: HashMap::new(),
            clock: 0,
            stats: StoreStats::default(),
            closed: false,
        })
    }

    /// `scoped` for an already constructed store.
    pub fn run_scoped<R, E>(mut self, body: impl FnOnce(&mut Self) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let result = body(&mut self);
        let closed = self.close();
        match (result, closed) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Ok(_)) => Err(err),
            (Err(err), Err(close_err)) => {
                error!(
                    error = %close_err,
                    "grid store close failed after an earlier error"
                );
                Err(err)
            }
        }
    }

    pub fn config(&self) -> &GridStoreConfig {
        &self.config
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn is_resident(&self, key: SwatchKey) -> bool {
        self.resident.contains_key(&key)
    }

    pub fn swatch_of(&self, coord: [usize; 4]) -> SwatchKey {
        SwatchKey::containing(coord, self.config.swatch)
    }

    /// Writes every dirty resident swatch and syncs the backend. Swatches stay
    /// resident.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let mut written = 0;
        for (key, slot) in self.resident.iter_mut().filter(|(_, s)| s.dirty) {
            self.backend.store(*key, &slot.values)?;
            slot.dirty = false;
            written += 1;
        }
        self.backend.sync()?;
        debug!(written, "flushed grid store");
        Ok(())
    }

    /// Pages `key` out if it is resident. Returns whether it was.
    pub fn evict(&mut self, key: SwatchKey) -> Result<bool, StoreError> {
        let Some(slot) = self.resident.remove(&key) else {
            return Ok(false);
        };
        if slot.dirty {
            if let Err(err) = self.backend.store(key, &slot.values) {
                self.resident.insert(key, slot);
                return Err(err);
            }
        }
        self.stats.page_outs += 1;
        debug!(swatch = %key, dirty = slot.dirty, "paged out swatch");
        Ok(true)
    }

    pub fn evict_all(&mut self) -> Result<(), StoreError> {
        let keys: Vec<SwatchKey> = self.resident.keys().copied().collect();
        for key in keys {
            self.evict(key)?;
        }
        Ok(())
    }

    /// Flushes everything and releases the store.
    pub fn close(mut self) -> Result<StoreStats, StoreError> {
        self.closed = true;
        self.flush()?;
        info!(
            page_ins = self.stats.page_ins,
            page_outs = self.stats.page_outs,
            reads = self.stats.reads,
            writes = self.stats.writes,
            "closed grid store"
        );
        Ok(self.stats)
    }

    fn locate(&self, coord: [usize; 4]) -> Result<(SwatchKey, usize), StoreError> {
        check_bounds(coord, self.config.extent)?;
        let swatch = self.config.swatch;
        let key = SwatchKey::containing(coord, swatch);
        let origin = key.origin(swatch);
        let local = std::array::from_fn(|i| coord[i] - origin[i]);
        Ok((key, linear_index(local, swatch)))
    }

    fn resident_mut(&mut self, key: SwatchKey) -> Result<&mut Resident, StoreError> {
        let loaded = if self.resident.contains_key(&key) {
            None
        } else {
            self.make_room()?;
            Some(self.page_in(key)?)
        };
        self.clock += 1;
        let clock = self.clock;
        let slot = self.resident.entry(key).or_insert_with(|| Resident {
            values: loaded.unwrap_or_default(),
            dirty: false,
            last_touch: clock,
        });
        slot.last_touch = clock;
        Ok(slot)
    }

    fn make_room(&mut self) -> Result<(), StoreError> {
        while self.resident.len() >= self.config.max_resident {
            let oldest = self
                .resident
                .iter()
                .min_by_key(|(_, slot)| slot.last_touch)
                .map(|(key, _)| *key);
            match oldest {
                Some(key) => {
                    self.evict(key)?;
                }
                None => break,
            }
        }
        Ok(())
    }

    fn page_in(&mut self, key: SwatchKey) -> Result<Vec<f64>, StoreError> {
        let expected = self.config.swatch_len();
        let values = match self.backend.load(key)? {
            Some(values) if values.len() == expected => values,
            Some(values) => {
                return Err(StoreError::Corrupted {
                    swatch: key.to_string(),
                    reason: format!("expected {expected} values, found {}", values.len()),
                })
            }
            None => vec![0.0; expected],
        };
        self.stats.page_ins += 1;
        debug!(swatch = %key, "paged in swatch");
        Ok(values)
    }
}

impl<B: SwatchBackend> Field for GridStore<B> {
    fn extent(&self) -> [usize; 4] {
        self.config.extent
    }

    fn get(&mut self, t: usize, x: usize, y: usize, z: usize) -> Result<f64, StoreError> {
        let (key, index) = self.locate([t, x, y, z])?;
        let value = self.resident_mut(key)?.values[index];
        self.stats.reads += 1;
        Ok(value)
    }

    fn set(
        &mut self,
        t: usize,
        x: usize,
        y: usize,
        z: usize,
        value: f64,
    ) -> Result<(), StoreError> {
        let (key, index) = self.locate([t, x, y, z])?;
        let slot = self.resident_mut(key)?;
        slot.values[index] = value;
        slot.dirty = true;
        self.stats.writes += 1;
        Ok(())
    }
}

impl<B: SwatchBackend> Drop for GridStore<B> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.flush() {
            error!(
                error = %err,
                "grid store dropped without close and could not flush"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::MemoryBackend;
    use tempfile::tempdir;

    fn config(location: PathBuf) -> GridStoreConfig {
        GridStoreConfig {
            extent: [2, 6, 5, 7],
            swatch: [1, 4, 4, 4],
            location,
            max_resident: 1,
        }
    }

    fn memory_store(max_resident: usize) -> GridStore<MemoryBackend> {
        let config = GridStoreConfig {
            max_resident,
            ..config(PathBuf::new())
        };
        GridStore::with_backend(config, MemoryBackend::new()).expect("store")
    }

    #[test]
    fn values_survive_eviction_and_reload() {
        let mut store = memory_store(1);
        let mut expected = Vec::new();
        for t in 0..2 {
            for x in 0..6 {
                for y in 0..5 {
                    for z in 0..7 {
                        let v = (t * 1000 + x * 100 + y * 10 + z) as f64 * 0.5;
                        store.set(t, x, y, z, v).expect("set");
                        expected.push(([t, x, y, z], v));
                    }
                }
            }
        }
        store.evict_all().expect("evict");
        assert_eq!(store.resident_count(), 0);
        for (coord, v) in expected {
            assert_eq!(store.get_at(coord).expect("get"), v, "at {coord:?}");
        }
        assert!(store.stats().page_outs > 0);
    }

    #[test]
    fn explicit_eviction_between_set_and_get() {
        let mut store = memory_store(4);
        store.set(1, 5, 4, 6, 2.75).expect("set");
        let key = store.swatch_of([1, 5, 4, 6]);
        assert!(store.evict(key).expect("evict"));
        assert!(!store.is_resident(key));
        assert!(store.backend().contains(key));
        assert_eq!(store.get(1, 5, 4, 6).expect("get"), 2.75);
    }

    #[test]
    fn never_written_cells_read_zero() {
        let mut store = memory_store(2);
        assert_eq!(store.get(0, 3, 3, 3).expect("get"), 0.0);
        assert_eq!(store.backend().stores, 0);
    }

    #[test]
    fn least_recently_used_swatch_is_evicted() {
        let mut store = memory_store(2);
        let a = [0, 0, 0, 0];
        let b = [0, 4, 0, 0];
        let c = [0, 0, 4, 0];
        store.set_at(a, 1.0).expect("set");
        store.set_at(b, 2.0).expect("set");
        store.get_at(a).expect("get");
        store.set_at(c, 3.0).expect("set");
        assert!(store.is_resident(store.swatch_of(a)));
        assert!(!store.is_resident(store.swatch_of(b)));
        assert!(store.is_resident(store.swatch_of(c)));
    }

    #[test]
    fn clean_swatches_are_not_rewritten() {
        let mut store = memory_store(1);
        store.set(0, 0, 0, 0, 1.0).expect("set");
        store.get(0, 4, 0, 0).expect("get");
        assert_eq!(store.backend().stores, 1);
        store.get(0, 0, 0, 0).expect("get");
        store.get(0, 4, 0, 0).expect("get");
        assert_eq!(store.backend().stores, 1);
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        let mut store = memory_store(1);
        let err = store.set(0, 6, 0, 0, 1.0).expect_err("x = 6 is outside");
        assert!(matches!(err, StoreError::OutOfBounds { .. }));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = GridStoreConfig {
            swatch: [1, 0, 4, 4],
            ..GridStoreConfig::default()
        };
        let err = GridStore::with_backend(bad, MemoryBackend::new())
            .err()
            .expect("zero swatch axis");
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[test]
    fn close_persists_to_directory() {
        let dir = tempdir().expect("tempdir");
        let mut store = GridStore::open(config(dir.path().to_path_buf())).expect("open");
        store.set(1, 2, 3, 4, -8.5).expect("set");
        let stats = store.close().expect("close");
        assert_eq!(stats.writes, 1);

        let mut reopened = GridStore::open(config(dir.path().to_path_buf())).expect("reopen");
        assert_eq!(reopened.get(1, 2, 3, 4).expect("get"), -8.5);
    }

    #[test]
    fn drop_flushes_best_effort() {
        let dir = tempdir().expect("tempdir");
        {
            let mut store = GridStore::open(config(dir.path().to_path_buf())).expect("open");
            store.set(0, 1, 1, 1, 4.0).expect("set");
        }
        let mut reopened = GridStore::open(config(dir.path().to_path_buf())).expect("reopen");
        assert_eq!(reopened.get(0, 1, 1, 1).expect("get"), 4.0);
    }

    #[test]
    fn scoped_closes_on_failure() {
        let dir = tempdir().expect("tempdir");
        let location = dir.path().to_path_buf();
        let result: Result<(), StoreError> = GridStore::scoped(config(location.clone()), |store| {
            store.set(0, 5, 4, 6, 9.0)?;
            store.get(0, 9, 0, 0).map(|_| ())
        });
        assert!(matches!(result, Err(StoreError::OutOfBounds { .. })));

        let value = GridStore::scoped(config(location), |store| store.get(0, 5, 4, 6));
        assert_eq!(value.expect("scoped read"), 9.0);
    }

    #[test]
    fn truncated_swatch_is_corrupted() {
        let mut backend = MemoryBackend::new();
        backend
            .store(SwatchKey([0, 0, 0, 0]), &[1.0, 2.0])
            .expect("store");
        let mut store = GridStore::with_backend(config(PathBuf::new()), backend).expect("store");
        let err = store.get(0, 0, 0, 0).expect_err("short swatch");
        assert!(err.to_string().contains("expected 64 values"), "{err}");
    }
}
