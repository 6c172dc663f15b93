//! Single-file JSON state store: the persisted snapshot plus a TTL-bounded
//! idempotency key set. All reads and writes are funneled through here;
//! nothing else touches the file on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("no snapshot persisted yet")]
    NoSnapshot,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileData {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    snapshot: Option<Snapshot>,
    #[serde(default)]
    idempotency_keys: BTreeMap<String, DateTime<Utc>>,
}

/// Atomic-rename JSON file backing the snapshot and idempotency key set.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn load_snapshot(&self) -> Result<Snapshot, StateError> {
        let data = self.read()?;
        data.snapshot.ok_or(StateError::NoSnapshot)
    }

    pub fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StateError> {
        let mut data = self.read().or_else(|e| match e {
            StateError::NoSnapshot => Ok(FileData::default()),
            other => Err(other),
        })?;
        data.snapshot = Some(snapshot);
        self.write(&data)
    }

    /// Returns whether `key` has already been recorded (and not expired).
    /// Purges expired entries as a side effect, regardless of the answer.
    pub fn seen_idempotency_key(&self, key: &str, now: DateTime<Utc>) -> Result<bool, StateError> {
        let mut data = self.read().or_else(|e| match e {
            StateError::NoSnapshot => Ok(FileData::default()),
            other => Err(other),
        })?;
        data.idempotency_keys.retain(|_, expiry| *expiry >= now);

        let seen = data
            .idempotency_keys
            .get(key)
            .is_some_and(|expiry| *expiry >= now);
        if !seen {
            self.write(&data)?;
        }
        Ok(seen)
    }

    pub fn record_idempotency_key(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let mut data = self.read().or_else(|e| match e {
            StateError::NoSnapshot => Ok(FileData::default()),
            other => Err(other),
        })?;
        data.idempotency_keys.insert(key.to_string(), now + ttl);
        self.write(&data)
    }

    fn read(&self) -> Result<FileData, StateError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StateError::NoSnapshot),
            Err(e) => return Err(StateError::Io(e)),
        };
        if bytes.is_empty() {
            return Ok(FileData::default());
        }
        match serde_json::from_slice::<FileData>(&bytes) {
            Ok(data) => Ok(data),
            Err(_) => {
                let corrupt = format!("{}.corrupt-{}", self.path.display(), Utc::now().timestamp());
                let _ = std::fs::rename(&self.path, corrupt);
                Ok(FileData::default())
            }
        }
    }

    fn write(&self, data: &FileData) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netmap::Netmap;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> FileStore {
        FileStore::new(dir.path().join("nested").join("state.json"))
    }

    #[test]
    fn load_snapshot_when_absent_is_no_snapshot() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let err = store.load_snapshot().unwrap_err();
        assert!(matches!(err, StateError::NoSnapshot));
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let snap = crate::snapshot::normalize(&Netmap::default(), Utc::now());
        store.save_snapshot(snap.clone()).unwrap();
        let loaded = store.load_snapshot().unwrap();
        assert_eq!(loaded.hash, snap.hash);
    }

    #[test]
    fn idempotency_key_seen_after_record() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let now = Utc::now();
        assert!(!store.seen_idempotency_key("abc", now).unwrap());
        store.record_idempotency_key("abc", Duration::hours(1), now).unwrap();
        assert!(store.seen_idempotency_key("abc", now).unwrap());
    }

    #[test]
    fn idempotency_key_expires_after_ttl() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let now = Utc::now();
        store.record_idempotency_key("abc", Duration::seconds(1), now).unwrap();
        let later = now + Duration::seconds(2);
        assert!(!store.seen_idempotency_key("abc", later).unwrap());
    }

    #[test]
    fn corrupt_file_is_renamed_aside_and_treated_as_absent() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path.parent().unwrap()).unwrap();
        std::fs::write(&store.path, b"not json").unwrap();
        let err = store.load_snapshot().unwrap_err();
        assert!(matches!(err, StateError::NoSnapshot));
        let corrupt_exists = std::fs::read_dir(store.path.parent().unwrap())
            .unwrap()
            .any(|e| e.unwrap().file_name().to_string_lossy().contains(".corrupt-"));
        assert!(corrupt_exists);
    }

    #[test]
    fn save_snapshot_preserves_existing_idempotency_keys() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let now = Utc::now();
        store.record_idempotency_key("abc", Duration::hours(1), now).unwrap();
        let snap = crate::snapshot::normalize(&Netmap::default(), now);
        store.save_snapshot(snap).unwrap();
        assert!(store.seen_idempotency_key("abc", now).unwrap());
    }
}
