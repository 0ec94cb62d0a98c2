//! JSON snapshot backed [`RecordStore`]
//!
//! The snapshot file is the only copy of the records. Every operation takes an
//! advisory lock on a sibling `.lock` file, re-reads the snapshot and, for
//! mutations, rewrites it (temp file, then rename) before the lock is released.
//! Several processes can therefore share one store; ids stay unique and the
//! `(owner, name)` pair is checked against what is on disk.
//!
//! File I/O runs on the blocking pool.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{AppId, Application, NewApplication, OwnerId, RecordUpdate};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    last_id: u64,
    records: Vec<Application>,
}

impl Snapshot {
    fn position(&self, id: AppId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Paths of one store; cheap to clone into blocking tasks
#[derive(Clone, Debug)]
struct StoreFiles {
    data: PathBuf,
    lock: PathBuf,
    tmp: PathBuf,
}

impl StoreFiles {
    fn new(data: PathBuf) -> Self {
        Self {
            lock: with_suffix(&data, ".lock"),
            tmp: with_suffix(&data, ".tmp"),
            data,
        }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.data.clone(),
            source,
        }
    }

    /// Held until the returned file is dropped
    fn lock(&self, mode: LockMode) -> Result<File, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock)
            .map_err(|source| StoreError::Io {
                path: self.lock.clone(),
                source,
            })?;
        let locked = match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        };
        locked.map_err(|source| StoreError::Io {
            path: self.lock.clone(),
            source,
        })?;
        Ok(file)
    }

    fn read(&self) -> Result<Snapshot, StoreError> {
        match std::fs::read_to_string(&self.data) {
            Ok(content) if content.trim().is_empty() => Ok(Snapshot::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn write(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.tmp, content).map_err(|e| self.io_error(e))?;
        std::fs::rename(&self.tmp, &self.data).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// File-backed record store, safe to share between processes
pub struct JsonFileRecordStore {
    files: StoreFiles,
}

impl JsonFileRecordStore {
    /// Open the store at `path`; a missing file is an empty store
    ///
    /// Creates the parent directory and checks that an existing snapshot
    /// parses.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let files = StoreFiles::new(path.into());
        if let Some(parent) = files.data.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| files.io_error(e))?;
        }

        let records = {
            let _lock = files.lock(LockMode::Shared)?;
            files.read()?.records.len()
        };
        debug!(path = %files.data.display(), records, "opened record store");
        Ok(Self { files })
    }

    /// Location of the snapshot file
    pub fn path(&self) -> &Path {
        &self.files.data
    }

    /// Run `f` over the snapshot under a shared lock
    async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Snapshot) -> T + Send + 'static,
    {
        let files = self.files.clone();
        run_blocking(move || {
            let _lock = files.lock(LockMode::Shared)?;
            Ok(f(&files.read()?))
        })
        .await
    }

    /// Run `f` over the snapshot under an exclusive lock and persist the
    /// result; nothing is written when `f` fails
    async fn mutate<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Snapshot) -> Result<T, StoreError> + Send + 'static,
    {
        let files = self.files.clone();
        run_blocking(move || {
            let _lock = files.lock(LockMode::Exclusive)?;
            let mut snapshot = files.read()?;
            let value = f(&mut snapshot)?;
            files.write(&snapshot)?;
            Ok(value)
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Backend(format!("record store task failed: {e}")))?
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn create(&self, new: NewApplication) -> Result<Application, StoreError> {
        self.mutate(move |snapshot| {
            if snapshot
                .records
                .iter()
                .any(|r| r.owner == new.owner && r.name == new.name)
            {
                return Err(StoreError::Duplicate {
                    owner: new.owner,
                    name: new.name,
                });
            }

            let id = AppId(snapshot.last_id + 1);
            let app = new.into_application(id, Utc::now());
            snapshot.last_id = id.0;
            snapshot.records.push(app.clone());
            Ok(app)
        })
        .await
    }

    async fn get(&self, id: AppId) -> Result<Option<Application>, StoreError> {
        self.read(move |snapshot| snapshot.position(id).map(|i| snapshot.records[i].clone()))
            .await
    }

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<Application>, StoreError> {
        self.read(move |snapshot| {
            let mut apps: Vec<Application> = snapshot
                .records
                .iter()
                .filter(|r| r.owner == owner)
                .cloned()
                .collect();
            apps.sort_by_key(|a| a.id);
            apps
        })
        .await
    }

    async fn find_by_owner_and_name(
        &self,
        owner: OwnerId,
        name: &str,
    ) -> Result<Option<Application>, StoreError> {
        let name = name.to_string();
        self.read(move |snapshot| {
            snapshot
                .records
                .iter()
                .find(|r| r.owner == owner && r.name == name)
                .cloned()
        })
        .await
    }

    async fn delete(&self, id: AppId) -> Result<(), StoreError> {
        self.mutate(move |snapshot| {
            let index = snapshot.position(id).ok_or(StoreError::NotFound { id })?;
            snapshot.records.remove(index);
            Ok(())
        })
        .await
    }

    async fn update(&self, id: AppId, update: RecordUpdate) -> Result<(), StoreError> {
        self.mutate(move |snapshot| {
            let index = snapshot.position(id).ok_or(StoreError::NotFound { id })?;
            update.apply(&mut snapshot.records[index], Utc::now());
            Ok(())
        })
        .await
    }
}
