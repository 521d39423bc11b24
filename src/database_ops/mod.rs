//! Target relational store boundary and its implementations.
pub mod db;
pub mod memory_store;
pub mod pg_store;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::model::{
    DropRecord, ImportBatchRecord, PhotoRecord, PoleRecord, ProjectRecord, StatusHistoryEntry,
};

pub use db::Db;
pub use memory_store::MemoryStore;
pub use pg_store::PgTargetStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{kind} row `{id}` does not exist")]
    MissingParent { kind: &'static str, id: String },
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Row counts of every table the pipeline writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub projects: i64,
    pub poles: i64,
    pub drops: i64,
    pub status_history: i64,
    pub pole_photos: i64,
    pub import_batches: i64,
}

impl TableCounts {
    pub fn rows(&self) -> [(&'static str, i64); 6] {
        [
            ("projects", self.projects),
            ("poles", self.poles),
            ("drops", self.drops),
            ("status_history", self.status_history),
            ("pole_photos", self.pole_photos),
            ("import_batches", self.import_batches),
        ]
    }
}

/// Write and lookup operations the pipeline needs from the target store.
///
/// Every `upsert_*` inserts or, on a conflict with the row's primary or
/// business key, updates the mutable columns while keeping the creation
/// timestamp. The returned id is the one stored in the row, which differs from
/// the proposed id when the row already existed.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn upsert_project(&self, project: &ProjectRecord) -> Result<String, StoreError>;

    /// Conflict key: `pole_number`.
    async fn upsert_pole(&self, id: &str, pole: &PoleRecord) -> Result<String, StoreError>;

    /// Conflict key: `drop_number`. `pole_id` must name an existing pole or be `None`.
    async fn upsert_drop(
        &self,
        id: &str,
        drop: &DropRecord,
        pole_id: Option<&str>,
    ) -> Result<String, StoreError>;

    async fn upsert_status_history(&self, entry: &StatusHistoryEntry)
        -> Result<String, StoreError>;

    /// Conflict key: `(pole_id, photo_type)`.
    async fn upsert_photo(&self, photo: &PhotoRecord) -> Result<String, StoreError>;

    async fn upsert_import_batch(&self, batch: &ImportBatchRecord) -> Result<String, StoreError>;

    async fn find_pole_id(&self, pole_number: &str) -> Result<Option<String>, StoreError>;

    /// Set every pole's drop count from the drops linked to it; returns poles touched.
    async fn recompute_drop_counts(&self) -> Result<u64, StoreError>;

    async fn row_counts(&self) -> Result<TableCounts, StoreError>;
}
