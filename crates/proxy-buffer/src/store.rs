//! Durable `device_id → (record_bytes, sku, synced, retry_count)` store.
//!
//! The whole store is kept in memory behind a mutex, and every mutation is
//! flushed to disk by writing a temp file, `fsync`-ing it, and renaming
//! it over the store path — atomic on POSIX, so a crash never leaves a
//! half-written store file. An advisory file lock guards against a
//! second process opening the same `--db-path`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// One buffered registration record, as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    device_id: String,
    sku: String,
    bytes_hex: String,
    synced: bool,
    retry_count: u32,
    seq: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    next_seq: u64,
    records: Vec<StoredRecord>,
}

/// An optional capacity; `Insert` past it fails with `ResourceExhausted`
/// ("buffer full").
#[derive(Debug, Clone, Copy)]
pub struct StoreCapacity(pub Option<usize>);

struct State {
    next_seq: u64,
    records: HashMap<String, StoredRecord>,
}

pub struct ProxyBufferStore {
    path: PathBuf,
    capacity: StoreCapacity,
    state: Mutex<State>,
}

impl ProxyBufferStore {
    /// Open (or create) the store at `path`, replaying whatever was
    /// persisted there so a restart recovers unsynced records unchanged.
    pub fn open(path: impl Into<PathBuf>, capacity: StoreCapacity) -> StoreResult<Self> {
        let path = path.into();
        let file = Self::read_file(&path)?;
        let mut records = HashMap::with_capacity(file.records.len());
        for record in file.records {
            records.insert(record.device_id.clone(), record);
        }
        Ok(Self {
            path,
            capacity,
            state: Mutex::new(State {
                next_seq: file.next_seq,
                records,
            }),
        })
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn lock_path(&self) -> PathBuf {
        let mut lock = self.path.clone();
        lock.set_extension("lock");
        lock
    }

    fn read_file(path: &Path) -> StoreResult<StoreFile> {
        if !path.exists() {
            return Ok(StoreFile::default());
        }
        let mut file = File::open(path).map_err(|e| StoreError::Io(e.to_string()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        if contents.trim().is_empty() {
            return Ok(StoreFile::default());
        }
        serde_json::from_str(&contents).map_err(|e| StoreError::Io(e.to_string()))
    }

    fn acquire_lock(&self) -> StoreResult<File> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.lock_path())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(lock_file)
    }

    fn persist(&self, state: &State) -> StoreResult<()> {
        let lock = self.acquire_lock()?;

        let file = StoreFile {
            next_seq: state.next_seq,
            records: state.records.values().cloned().collect(),
        };
        let json = serde_json::to_string(&file).map_err(|e| StoreError::Io(e.to_string()))?;

        let temp_path = self.temp_path();
        let mut temp_file = File::create(&temp_path).map_err(|e| StoreError::Io(e.to_string()))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        temp_file.sync_all().map_err(|e| StoreError::Io(e.to_string()))?;

        fs::rename(&temp_path, &self.path).map_err(|e| StoreError::Io(e.to_string()))?;

        FileExt::unlock(&lock).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Insert a new record. Durable before returning.
    /// Duplicate `device_id` is rejected with `AlreadyExists`.
    pub fn insert(&self, device_id: &str, sku: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let mut state = self.state.lock();

        if state.records.contains_key(device_id) {
            return Err(StoreError::AlreadyExists(device_id.to_string()));
        }
        if let StoreCapacity(Some(limit)) = self.capacity {
            if state.records.len() >= limit {
                return Err(StoreError::Full { capacity: limit });
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.records.insert(
            device_id.to_string(),
            StoredRecord {
                device_id: device_id.to_string(),
                sku: sku.to_string(),
                bytes_hex: hex::encode(&bytes),
                synced: false,
                retry_count: 0,
                seq,
            },
        );

        self.persist(&state)
    }

    /// Return the serialized record bytes for `device_id`.
    pub fn get(&self, device_id: &str) -> StoreResult<Vec<u8>> {
        let state = self.state.lock();
        state
            .records
            .get(device_id)
            .map(|record| hex::decode(&record.bytes_hex).expect("store only writes valid hex"))
            .ok_or_else(|| StoreError::NotFound(device_id.to_string()))
    }

    /// Up to `n` unsynced records, FIFO by insertion order.
    pub fn get_unsynced(&self, n: usize) -> Vec<(String, String, Vec<u8>)> {
        let state = self.state.lock();
        let mut unsynced: Vec<&StoredRecord> =
            state.records.values().filter(|r| !r.synced).collect();
        unsynced.sort_by_key(|r| r.seq);
        unsynced
            .into_iter()
            .take(n)
            .map(|r| {
                (
                    r.device_id.clone(),
                    r.sku.clone(),
                    hex::decode(&r.bytes_hex).expect("store only writes valid hex"),
                )
            })
            .collect()
    }

    /// Mark every id in `ids` as synced. Atomic: if any id is absent,
    /// nothing is changed.
    pub fn mark_as_synced(&self, ids: &[String]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();

        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !state.records.contains_key(id.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::MarkAsSyncedPartial(missing));
        }

        for id in ids {
            if let Some(record) = state.records.get_mut(id) {
                record.synced = true;
                record.retry_count = 0;
            }
        }

        self.persist(&state)
    }

    /// Increment the in-memory retry counter for `device_id`, returning
    /// the new count. Retry counts are not persisted and reset on
    /// restart; see DESIGN.md for the tradeoff.
    pub fn bump_retry(&self, device_id: &str) -> Option<u32> {
        let mut state = self.state.lock();
        state.records.get_mut(device_id).map(|record| {
            record.retry_count += 1;
            record.retry_count
        })
    }

    pub fn retry_count(&self, device_id: &str) -> Option<u32> {
        self.state.lock().records.get(device_id).map(|r| r.retry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> ProxyBufferStore {
        ProxyBufferStore::open(dir.join("buffer.json"), StoreCapacity(None)).unwrap()
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.insert("dev-1", "sival", vec![1, 2, 3]).unwrap();
        assert_eq!(store.get("dev-1").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.insert("dev-1", "sival", vec![1]).unwrap();
        let err = store.insert("dev-1", "sival", vec![2]).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.get("dev-1").unwrap(), vec![1]);
    }

    #[test]
    fn get_unsynced_is_fifo_and_excludes_synced() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.insert("a", "sival", vec![1]).unwrap();
        store.insert("b", "sival", vec![2]).unwrap();
        store.insert("c", "sival", vec![3]).unwrap();
        store.mark_as_synced(&["b".to_string()]).unwrap();

        let unsynced = store.get_unsynced(10);
        let ids: Vec<String> = unsynced.into_iter().map(|(id, ..)| id).collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn mark_as_synced_rolls_back_on_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.insert("a", "sival", vec![1]).unwrap();

        let err = store
            .mark_as_synced(&["a".to_string(), "missing".to_string()])
            .unwrap_err();
        assert!(matches!(err, StoreError::MarkAsSyncedPartial(_)));

        let unsynced = store.get_unsynced(10);
        assert_eq!(unsynced.len(), 1);
    }

    #[test]
    fn restart_durability_replays_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.json");
        {
            let store = ProxyBufferStore::open(&path, StoreCapacity(None)).unwrap();
            for i in 0..10 {
                store
                    .insert(&format!("dev-{i}"), "sival", vec![i as u8])
                    .unwrap();
            }
        }
        let reopened = ProxyBufferStore::open(&path, StoreCapacity(None)).unwrap();
        assert_eq!(reopened.get_unsynced(10).len(), 10);
    }

    #[test]
    fn insert_past_capacity_is_resource_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProxyBufferStore::open(dir.path().join("buffer.json"), StoreCapacity(Some(1)))
            .unwrap();
        store.insert("a", "sival", vec![1]).unwrap();
        let err = store.insert("b", "sival", vec![2]).unwrap_err();
        assert!(matches!(err, StoreError::Full { .. }));
    }
}
