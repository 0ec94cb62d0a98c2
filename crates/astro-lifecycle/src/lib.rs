//! Application lifecycle orchestration for Astro
//!
//! - [`LifecycleController`] - lifecycle commands with ownership checks and
//!   create-time compensation
//! - [`StatusReconciler`] - best-effort refresh of persisted status from the
//!   cluster
//! - [`RecordStore`] - persisted application records, in memory or as a JSON
//!   snapshot file
//! - [`ReconcileScheduler`] - where detached reconciliations run

#![deny(missing_docs)]

pub mod controller;
pub mod error;
pub mod file_store;
pub mod model;
pub mod reconciler;
pub mod scheduler;
pub mod store;

pub use controller::{CreateApplication, LifecycleController};
pub use error::{ErrorKind, LifecycleError};
pub use file_store::JsonFileRecordStore;
pub use model::{AppId, Application, NamespacePolicy, NewApplication, OwnerId, RecordUpdate};
pub use reconciler::{ReconcileOutcome, StatusReconciler};
pub use scheduler::{ManualScheduler, ReconcileRequest, ReconcileScheduler, TokioScheduler};
pub use store::{InMemoryRecordStore, RecordStore, StoreError};
