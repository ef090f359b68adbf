//! On-disk records with per-interface exclusive access.
//!
//! Layout under the state directory:
//!
//! ```text
//! <state_dir>/interfaces/<name>.json   configuration record
//! <state_dir>/interfaces/<name>.lock   advisory lock file
//! <state_dir>/stats/<name>.json        accumulated traffic stats
//! ```
//!
//! Writes go to a temporary file in the target directory which is synced
//! and renamed over the target, so readers never see a partial record.
//! Every load/mutate/save sequence runs under [`InterfaceLock`], which
//! serializes callers in this process with a mutex and callers in other
//! processes with an exclusive lock on the `.lock` file.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs4::fs_std::FileExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{Result, WgkeepError};
use crate::stats::StatsRecord;
use crate::types::{InterfaceRecord, validate_interface_name};

const INTERFACES_DIR: &str = "interfaces";
const STATS_DIR: &str = "stats";
const RECORD_EXTENSION: &str = "json";
const LOCK_EXTENSION: &str = "lock";

/// Writes `bytes` to `path` atomically. The file is created mode 0600.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| WgkeepError::InvalidArgument(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir).map_err(|e| WgkeepError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| WgkeepError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| WgkeepError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| WgkeepError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| WgkeepError::io(path, e.error))?;
    Ok(())
}

/// Opens `path`, creating it if needed, and blocks until it holds an
/// exclusive lock on it. The lock is released when the file is closed.
fn lock_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| WgkeepError::io(dir, e))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| WgkeepError::io(path, e))?;
    file.lock_exclusive().map_err(|e| WgkeepError::io(path, e))?;
    Ok(file)
}

/// Removes a file, returning `false` if it did not exist.
pub(crate) fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => Err(WgkeepError::io(path, e)),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(WgkeepError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| WgkeepError::corrupt(path, e.to_string()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(value)
        .map_err(|e| WgkeepError::corrupt(path, format!("serialize: {e}")))?;
    json.push(b'\n');
    write_atomic(path, &json)
}

/// Repository of interface and stats records.
pub struct RecordStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RecordStore {
    /// Opens a store rooted at `root`. Nothing is created until the first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the configuration record of `name`.
    #[must_use]
    pub fn interface_path(&self, name: &str) -> PathBuf {
        self.root
            .join(INTERFACES_DIR)
            .join(format!("{name}.{RECORD_EXTENSION}"))
    }

    /// Path of the lock file guarding the records of `name`.
    #[must_use]
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.root
            .join(INTERFACES_DIR)
            .join(format!("{name}.{LOCK_EXTENSION}"))
    }

    /// Path of the stats record of `name`.
    #[must_use]
    pub fn stats_path(&self, name: &str) -> PathBuf {
        self.root
            .join(STATS_DIR)
            .join(format!("{name}.{RECORD_EXTENSION}"))
    }

    /// Returns `true` if a configuration record exists for `name`.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.interface_path(name).is_file()
    }

    /// Names of all stored interfaces, sorted.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the records directory cannot be read.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.root.join(INTERFACES_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WgkeepError::io(&dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| WgkeepError::io(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_interface_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Acquires exclusive access to the records of `name`.
    ///
    /// Waits for other holders in this process first, then for holders in
    /// other processes sharing the state directory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if `name` is not a valid interface name, or
    /// `Io` if the lock file cannot be opened or locked.
    pub async fn lock(&self, name: &str) -> Result<InterfaceLock<'_>> {
        validate_interface_name(name)?;
        let mutex = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        let guard = mutex.lock_owned().await;

        let path = self.lock_path(name);
        let blocking_path = path.clone();
        let file = tokio::task::spawn_blocking(move || lock_file(&blocking_path))
            .await
            .map_err(|e| WgkeepError::io(&path, std::io::Error::other(e)))??;
        debug!(interface = %name, "record lock acquired");
        Ok(InterfaceLock {
            store: self,
            name: name.to_string(),
            _file: file,
            _guard: guard,
        })
    }

    /// Loads the record of `name` under its lock.
    ///
    /// # Errors
    ///
    /// See [`InterfaceLock::load`].
    pub async fn load(&self, name: &str) -> Result<InterfaceRecord> {
        self.lock(name).await?.load()
    }

    /// Applies `f` to the record of `name` and saves it, under its lock.
    ///
    /// # Errors
    ///
    /// See [`InterfaceLock::mutate`].
    pub async fn mutate<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut InterfaceRecord) -> Result<R>,
    ) -> Result<(InterfaceRecord, R)> {
        self.lock(name).await?.mutate(f)
    }
}

/// Exclusive access to one interface's records, released on drop.
pub struct InterfaceLock<'a> {
    store: &'a RecordStore,
    name: String,
    _file: File,
    _guard: OwnedMutexGuard<()>,
}

impl InterfaceLock<'_> {
    /// Interface name this lock covers.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the configuration record exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.store.exists(&self.name)
    }

    /// Loads the configuration record.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceNotFound` if there is no record, and `Corrupt` if
    /// it cannot be decoded, names another interface, or breaks a record
    /// invariant.
    pub fn load(&self) -> Result<InterfaceRecord> {
        let path = self.store.interface_path(&self.name);
        let record: InterfaceRecord = read_json(&path)?
            .ok_or_else(|| WgkeepError::InterfaceNotFound(self.name.clone()))?;
        if record.name() != self.name {
            return Err(WgkeepError::corrupt(
                &path,
                format!("record is for interface '{}'", record.name()),
            ));
        }
        record
            .validate()
            .map_err(|e| WgkeepError::corrupt(&path, e.to_string()))?;
        Ok(record)
    }

    /// Writes the configuration record. Callers validate first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the record names another interface, or
    /// `Io` on write failure.
    pub fn save(&self, record: &InterfaceRecord) -> Result<()> {
        if record.name() != self.name {
            return Err(WgkeepError::InvalidArgument(format!(
                "record for '{}' saved under lock for '{}'",
                record.name(),
                self.name
            )));
        }
        write_json(&self.store.interface_path(&self.name), record)
    }

    /// Stores a new record.
    ///
    /// # Errors
    ///
    /// Returns `InterfaceExists` if a record is already stored, a
    /// validation error if `record` breaks an invariant, or `Io`.
    pub fn create(&self, record: &InterfaceRecord) -> Result<()> {
        if self.exists() {
            return Err(WgkeepError::InterfaceExists(self.name.clone()));
        }
        record.validate()?;
        self.save(record)
    }

    /// Loads the record, applies `f`, validates the result and saves it.
    ///
    /// Nothing is written if `f` or validation fails.
    ///
    /// # Errors
    ///
    /// Returns the load error, the error from `f`, the first violated
    /// invariant, or `Io`.
    pub fn mutate<R>(
        &self,
        f: impl FnOnce(&mut InterfaceRecord) -> Result<R>,
    ) -> Result<(InterfaceRecord, R)> {
        let mut record = self.load()?;
        let out = f(&mut record)?;
        record.validate()?;
        self.save(&record)?;
        Ok((record, out))
    }

    /// Deletes the configuration record.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file exists but cannot be removed.
    pub fn remove(&self) -> Result<bool> {
        remove_file(&self.store.interface_path(&self.name))
    }

    /// Loads the stats record, if one has been written.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if the record cannot be decoded, or `Io`.
    pub fn load_stats(&self) -> Result<Option<StatsRecord>> {
        read_json(&self.store.stats_path(&self.name))
    }

    /// Writes the stats record.
    ///
    /// # Errors
    ///
    /// Returns `Io` on write failure.
    pub fn save_stats(&self, stats: &StatsRecord) -> Result<()> {
        write_json(&self.store.stats_path(&self.name), stats)
    }

    /// Deletes the stats record.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file exists but cannot be removed.
    pub fn remove_stats(&self) -> Result<bool> {
        remove_file(&self.store.stats_path(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::keys::PrivateKey;
    use crate::types::{GlobalSettings, Hooks, InterfaceSection, PeerRecord, PeerStatus};

    fn record(name: &str) -> InterfaceRecord {
        let key = PrivateKey::from_bytes_array([5u8; 32]);
        InterfaceRecord {
            global: GlobalSettings::default(),
            interface: InterfaceSection {
                name: name.to_string(),
                public_key: key.public_key(),
                private_key: key,
                listen_port: 51820,
                address: "10.0.0.1/24".parse().expect("cidr"),
                hooks: Hooks::default(),
            },
            peers: BTreeMap::new(),
        }
    }

    fn peer(name: &str, seed: u8, ip: &str) -> PeerRecord {
        let key = PrivateKey::from_bytes_array([seed; 32]);
        PeerRecord {
            name: name.to_string(),
            public_key: key.public_key(),
            private_key: Some(key),
            allowed_ips: vec![ip.parse().expect("cidr")],
            status: PeerStatus::Enabled,
        }
    }

    #[tokio::test]
    async fn create_load_list_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        assert!(store.list().expect("list").is_empty());

        {
            let lock = store.lock("wg0").await.expect("lock");
            lock.create(&record("wg0")).expect("create");
            assert!(matches!(
                lock.create(&record("wg0")),
                Err(WgkeepError::InterfaceExists(_))
            ));
        }
        store
            .lock("wg1")
            .await
            .expect("lock")
            .create(&record("wg1"))
            .expect("create");

        assert_eq!(store.list().expect("list"), vec!["wg0", "wg1"]);
        assert_eq!(store.load("wg0").await.expect("load"), record("wg0"));

        let lock = store.lock("wg0").await.expect("lock");
        assert!(lock.remove().expect("remove"));
        assert!(!lock.remove().expect("second remove"));
        assert!(matches!(lock.load(), Err(WgkeepError::InterfaceNotFound(_))));
    }

    #[tokio::test]
    async fn lock_excludes_other_stores_on_the_same_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = RecordStore::new(dir.path());
        let second = RecordStore::new(dir.path());

        let held = first.lock("wg0").await.expect("lock");
        let waited = tokio::time::timeout(Duration::from_millis(200), second.lock("wg0")).await;
        assert!(waited.is_err(), "second store acquired a held lock");

        drop(held);
        let lock = second.lock("wg0").await.expect("lock after release");
        assert_eq!(lock.name(), "wg0");
        assert!(second.lock_path("wg0").is_file());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn interleaved_stores_keep_both_updates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = RecordStore::new(dir.path());
        let second = RecordStore::new(dir.path());
        first
            .lock("wg0")
            .await
            .expect("lock")
            .create(&record("wg0"))
            .expect("create");

        let held = first.lock("wg0").await.expect("lock");
        let mut loaded = held.load().expect("load");
        let waiting = tokio::spawn(async move {
            second
                .mutate("wg0", |r| {
                    r.peers.insert("bob".into(), peer("bob", 2, "10.0.0.3/32"));
                    Ok(())
                })
                .await
                .map(|_| ())
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        loaded
            .peers
            .insert("alice".into(), peer("alice", 1, "10.0.0.2/32"));
        held.save(&loaded).expect("save");
        drop(held);

        waiting.await.expect("join").expect("mutate");
        let names: Vec<_> = first
            .load("wg0")
            .await
            .expect("load")
            .peers
            .into_keys()
            .collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn lock_file_is_not_listed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let _lock = store.lock("wg0").await.expect("lock");
        assert!(store.list().expect("list").is_empty());
    }

    #[tokio::test]
    async fn lock_rejects_invalid_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        assert!(matches!(
            store.lock("../etc").await,
            Err(WgkeepError::InvalidName { .. })
        ));
    }

    #[tokio::test]
    async fn failed_mutation_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        store
            .lock("wg0")
            .await
            .expect("lock")
            .create(&record("wg0"))
            .expect("create");
        let before = fs::read(store.interface_path("wg0")).expect("read");

        let result = store
            .mutate("wg0", |r| {
                r.peers.insert("alice".into(), peer("alice", 1, "10.0.0.2/32"));
                Err::<(), _>(WgkeepError::MissingField("boom".into()))
            })
            .await;
        assert!(result.is_err());

        let result = store
            .mutate("wg0", |r| {
                r.peers.insert("alice".into(), peer("alice", 1, "10.0.0.1/32"));
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(WgkeepError::AddressInUse { .. })));

        assert_eq!(fs::read(store.interface_path("wg0")).expect("read"), before);
    }

    #[tokio::test]
    async fn mutate_persists_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        store
            .lock("wg0")
            .await
            .expect("lock")
            .create(&record("wg0"))
            .expect("create");

        let (saved, count) = store
            .mutate("wg0", |r| {
                r.peers.insert("alice".into(), peer("alice", 1, "10.0.0.2/32"));
                Ok(r.peers.len())
            })
            .await
            .expect("mutate");
        assert_eq!(count, 1);
        assert_eq!(store.load("wg0").await.expect("load"), saved);
    }

    #[tokio::test]
    async fn undecodable_record_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let path = store.interface_path("wg0");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, b"{ not json").expect("write");
        assert!(matches!(
            store.load("wg0").await,
            Err(WgkeepError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn tampered_public_key_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let mut bad = record("wg0");
        bad.interface.public_key = PrivateKey::from_bytes_array([6u8; 32]).public_key();
        store.lock("wg0").await.expect("lock").save(&bad).expect("save");
        assert!(matches!(
            store.load("wg0").await,
            Err(WgkeepError::Corrupt { .. })
        ));
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("wg0.conf");
        write_atomic(&path, b"first").expect("write");
        write_atomic(&path, b"second").expect("overwrite");
        assert_eq!(fs::read(&path).expect("read"), b"second");
        let entries: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("read_dir")
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wg0.conf");
        write_atomic(&path, b"secret").expect("write");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }
}
