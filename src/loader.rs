//! Idempotent writes of normalized records, parents before dependents.
use tracing::{debug, warn};

use crate::database_ops::{StoreError, TargetStore};
use crate::identity::IdentityResolver;
use crate::model::{
    DropRecord, EntityKind, ImportBatchRecord, PhotoRecord, PoleRecord, ProjectRecord,
    StatusChange, StatusHistoryEntry,
};
use crate::normalization::NormalizeError;

/// Result of one dependent row, tallied under its own kind.
#[derive(Debug)]
pub enum DependentOutcome {
    Written(EntityKind),
    /// The entry could not be normalized; nothing was written.
    Invalid(EntityKind, NormalizeError),
    /// The write itself failed.
    Failed(EntityKind, StoreError),
}

/// A parent row that made it into the store, with its dependents' outcomes.
#[derive(Debug)]
pub struct Loaded {
    /// Id stored in the row; on re-runs this is the id from the first run.
    pub id: String,
    pub dependents: Vec<DependentOutcome>,
}

/// Thin write layer over a [`TargetStore`]. With `dry_run` set every write is
/// skipped and reported as succeeded with the proposed id.
#[derive(Clone, Copy)]
pub struct Loader<'a> {
    store: &'a dyn TargetStore,
    dry_run: bool,
}

impl<'a> Loader<'a> {
    pub fn new(store: &'a dyn TargetStore, dry_run: bool) -> Self {
        Self { store, dry_run }
    }

    pub async fn load_project(&self, project: &ProjectRecord) -> Result<String, StoreError> {
        if self.dry_run {
            return Ok(project.id.clone());
        }
        self.store.upsert_project(project).await
    }

    pub async fn load_pole(
        &self,
        resolver: &IdentityResolver,
        proposed_id: &str,
        pole: &PoleRecord,
    ) -> Result<Loaded, StoreError> {
        let id = if self.dry_run {
            proposed_id.to_string()
        } else {
            self.store.upsert_pole(proposed_id, pole).await?
        };
        if id != proposed_id {
            debug!(pole_number = pole.pole_number.as_str(), id, "pole already present; updated in place");
        }

        let mut dependents = self
            .load_status_history(
                resolver,
                EntityKind::Pole,
                &id,
                &pole.envelope.source_id,
                &pole.status_history,
            )
            .await;

        for upload in &pole.photos {
            let outcome = match upload {
                Err(e) => DependentOutcome::Invalid(EntityKind::Photo, e.clone()),
                Ok(upload) => {
                    let photo = PhotoRecord {
                        id: resolver.dependent_id(EntityKind::Photo, &id, upload.category.as_str()),
                        pole_id: id.clone(),
                        upload: upload.clone(),
                    };
                    self.write(EntityKind::Photo, self.store.upsert_photo(&photo))
                        .await
                }
            };
            dependents.push(outcome);
        }

        Ok(Loaded { id, dependents })
    }

    /// `pole_id` must already be resolved: a known pole row or `None`.
    pub async fn load_drop(
        &self,
        resolver: &IdentityResolver,
        proposed_id: &str,
        drop: &DropRecord,
        pole_id: Option<&str>,
    ) -> Result<Loaded, StoreError> {
        let id = if self.dry_run {
            proposed_id.to_string()
        } else {
            self.store.upsert_drop(proposed_id, drop, pole_id).await?
        };
        let dependents = self
            .load_status_history(
                resolver,
                EntityKind::Drop,
                &id,
                &drop.envelope.source_id,
                &drop.status_history,
            )
            .await;
        Ok(Loaded { id, dependents })
    }

    pub async fn load_import_batch(&self, batch: &ImportBatchRecord) -> Result<String, StoreError> {
        if self.dry_run {
            return Ok(batch.id.clone());
        }
        self.store.upsert_import_batch(batch).await
    }

    async fn load_status_history(
        &self,
        resolver: &IdentityResolver,
        parent_kind: EntityKind,
        parent_id: &str,
        source_id: &str,
        changes: &[Result<StatusChange, NormalizeError>],
    ) -> Vec<DependentOutcome> {
        let mut outcomes = Vec::with_capacity(changes.len());
        for (index, change) in changes.iter().enumerate() {
            let outcome = match change {
                Err(e) => DependentOutcome::Invalid(EntityKind::StatusHistory, e.clone()),
                Ok(change) => {
                    let entry = StatusHistoryEntry {
                        id: resolver.dependent_id(
                            EntityKind::StatusHistory,
                            parent_id,
                            &format!("{source_id}:{index}"),
                        ),
                        parent_kind,
                        parent_id: parent_id.to_string(),
                        change: change.clone(),
                    };
                    self.write(
                        EntityKind::StatusHistory,
                        self.store.upsert_status_history(&entry),
                    )
                    .await
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn write(
        &self,
        kind: EntityKind,
        fut: impl std::future::Future<Output = Result<String, StoreError>>,
    ) -> DependentOutcome {
        if self.dry_run {
            return DependentOutcome::Written(kind);
        }
        match fut.await {
            Ok(_) => DependentOutcome::Written(kind),
            Err(e) => {
                warn!(%kind, error = %e, "dependent write failed");
                DependentOutcome::Failed(kind, e)
            }
        }
    }
}
