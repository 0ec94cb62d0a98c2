//! Record store interface and the in-memory implementation

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[cfg(test)]
use mockall::automock;

use crate::model::{AppId, Application, NewApplication, OwnerId, RecordUpdate};

/// Record store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `(owner, name)` is already taken
    #[error("application '{name}' already exists for owner {owner}")]
    Duplicate {
        /// Owner of the existing record
        owner: OwnerId,
        /// Taken name
        name: String,
    },

    /// No record with this id
    #[error("application {id} not found")]
    NotFound {
        /// Requested record
        id: AppId,
    },

    /// Reading or writing the backing file failed
    #[error("record store I/O failed at {}: {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Records could not be encoded or decoded
    #[error("record store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure
    #[error("record store failed: {0}")]
    Backend(String),
}

/// Keyed store of application records
///
/// Every operation is atomic for a single record. `(owner, name)` is unique
/// among live records; `create` fails with [`StoreError::Duplicate`] when
/// the pair is taken, even under concurrent creators.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record, assigning its id and timestamps
    async fn create(&self, new: NewApplication) -> Result<Application, StoreError>;

    /// Fetch one record
    async fn get(&self, id: AppId) -> Result<Option<Application>, StoreError>;

    /// All records of one owner, ordered by id
    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<Application>, StoreError>;

    /// Look up a record by its unique `(owner, name)` pair
    async fn find_by_owner_and_name(
        &self,
        owner: OwnerId,
        name: &str,
    ) -> Result<Option<Application>, StoreError>;

    /// Remove a record and release its name
    async fn delete(&self, id: AppId) -> Result<(), StoreError>;

    /// Apply a partial status/replicas update
    async fn update(&self, id: AppId, update: RecordUpdate) -> Result<(), StoreError>;
}

/// Concurrent in-memory [`RecordStore`]
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: DashMap<AppId, Application>,
    names: DashMap<(OwnerId, String), AppId>,
    last_id: AtomicU64,
}

impl InMemoryRecordStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no record is stored
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, new: NewApplication) -> Result<Application, StoreError> {
        let id = match self.names.entry((new.owner, new.name.clone())) {
            Entry::Occupied(_) => {
                return Err(StoreError::Duplicate {
                    owner: new.owner,
                    name: new.name,
                })
            }
            Entry::Vacant(slot) => {
                let id = AppId(self.last_id.fetch_add(1, Ordering::SeqCst) + 1);
                slot.insert(id);
                id
            }
        };

        let app = new.into_application(id, Utc::now());
        self.records.insert(id, app.clone());
        Ok(app)
    }

    async fn get(&self, id: AppId) -> Result<Option<Application>, StoreError> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<Application>, StoreError> {
        let mut apps: Vec<Application> = self
            .records
            .iter()
            .filter(|r| r.owner == owner)
            .map(|r| r.clone())
            .collect();
        apps.sort_by_key(|a| a.id);
        Ok(apps)
    }

    async fn find_by_owner_and_name(
        &self,
        owner: OwnerId,
        name: &str,
    ) -> Result<Option<Application>, StoreError> {
        let Some(id) = self.names.get(&(owner, name.to_string())).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn delete(&self, id: AppId) -> Result<(), StoreError> {
        let (_, app) = self
            .records
            .remove(&id)
            .ok_or(StoreError::NotFound { id })?;
        self.names
            .remove_if(&(app.owner, app.name), |_, owner_id| *owner_id == id);
        Ok(())
    }

    async fn update(&self, id: AppId, update: RecordUpdate) -> Result<(), StoreError> {
        let mut app = self
            .records
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        update.apply(&mut app, Utc::now());
        Ok(())
    }
}
