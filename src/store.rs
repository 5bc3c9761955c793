use std::{
    collections::HashMap,
    path::Path,
    sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, SystemTime},
};

use crate::{
    error::SnapshotError,
    snapshot::{read_snapshot_file, write_snapshot_file},
};

/// Deadlines past this many milliseconds after the epoch are clamped to it.
const FAR_FUTURE_MILLIS: u64 = u64::MAX / 2;

fn far_future() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(FAR_FUTURE_MILLIS)
}

/// Time-keyed samples, each dropped a fixed duration after it was inserted.
///
/// The map sits behind a single `RwLock`; every mutation and every full copy
/// takes the lock exactly once, so no caller sees half of another operation.
/// Saves are serialized separately so a slow write never blocks readers.
#[derive(Debug)]
pub struct Store {
    data: RwLock<HashMap<String, StoreValue>>,
    save_lock: Mutex<()>,
    expiry: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreValue {
    pub data: f64,
    pub expires_at: SystemTime,
}

impl StoreValue {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }
}

/// One (time key, reading) pair as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub key: String,
    pub value: f64,
}

impl Store {
    pub fn new(expiry: Duration) -> Self {
        Store {
            data: RwLock::new(HashMap::new()),
            save_lock: Mutex::new(()),
            expiry,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: f64) {
        self.set_at(key, value, SystemTime::now());
    }

    /// Inserts or replaces `key`, expiring `expiry` after `now`. A deadline
    /// past the end of representable time is clamped to the far future.
    pub fn set_at(&self, key: impl Into<String>, value: f64, now: SystemTime) {
        let value = StoreValue {
            data: value,
            expires_at: now
                .checked_add(self.expiry)
                .filter(|deadline| *deadline <= far_future())
                .unwrap_or_else(far_future),
        };
        self.write().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.get_at(key, SystemTime::now())
    }

    /// Reads a single key. Entries past their deadline read as absent even
    /// before a sweep has removed them; nothing is evicted here.
    pub fn get_at(&self, key: &str, now: SystemTime) -> Option<f64> {
        self.read()
            .get(key)
            .filter(|value| !value.is_expired(now))
            .map(|value| value.data)
    }

    /// Removes every entry whose deadline is at or before `now`.
    pub fn sweep_expired(&self, now: SystemTime) -> usize {
        let mut data = self.write();
        let before = data.len();
        data.retain(|_, value| !value.is_expired(now));
        before - data.len()
    }

    /// Point-in-time copy ordered by key.
    ///
    /// Expired entries that have not been swept yet are still included.
    pub fn snapshot_all(&self) -> Vec<Sample> {
        let mut samples: Vec<Sample> = self
            .read()
            .iter()
            .map(|(key, value)| Sample {
                key: key.clone(),
                value: value.data,
            })
            .collect();
        samples.sort_by(|a, b| a.key.cmp(&b.key));
        samples
    }

    pub fn entries(&self) -> Vec<(String, StoreValue)> {
        self.read()
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect()
    }

    /// Replaces the whole contents, skipping entries already expired at `now`.
    /// Returns the number of entries kept.
    pub fn replace_entries<I>(&self, entries: I, now: SystemTime) -> usize
    where
        I: IntoIterator<Item = (String, StoreValue)>,
    {
        let fresh: HashMap<String, StoreValue> = entries
            .into_iter()
            .filter(|(_, value)| !value.is_expired(now))
            .collect();
        let kept = fresh.len();
        *self.write() = fresh;
        kept
    }

    pub fn load_from<P: AsRef<Path>>(&self, path: P, now: SystemTime) -> Result<usize, SnapshotError> {
        let entries = read_snapshot_file(path)?;
        Ok(self.replace_entries(entries, now))
    }

    /// Writes every entry with its absolute deadline. The previous file is
    /// only replaced once the new one is fully on disk. Concurrent saves run
    /// one at a time, each writing the contents as of when it got its turn.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<usize, SnapshotError> {
        let _turn = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = self.entries();
        write_snapshot_file(&entries, path)?;
        Ok(entries.len())
    }

    pub fn clear(&self) -> usize {
        let mut data = self.write();
        let removed = data.len();
        data.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, StoreValue>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, StoreValue>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}
