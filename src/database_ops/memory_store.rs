use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{StoreError, TableCounts, TargetStore};
use crate::model::{
    DropRecord, EntityKind, ImportBatchRecord, PhotoCategory, PhotoRecord, PoleRecord,
    ProjectRecord, StatusHistoryEntry,
};

#[derive(Debug, Clone)]
pub struct StoredPole {
    pub id: String,
    pub record: PoleRecord,
    pub drop_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredDrop {
    pub id: String,
    pub record: DropRecord,
    pub pole_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    projects: HashMap<String, ProjectRecord>,
    poles: HashMap<String, StoredPole>,
    pole_numbers: HashMap<String, String>,
    drops: HashMap<String, StoredDrop>,
    drop_numbers: HashMap<String, String>,
    status_history: HashMap<String, StatusHistoryEntry>,
    photos: HashMap<(String, PhotoCategory), PhotoRecord>,
    import_batches: HashMap<String, ImportBatchRecord>,
    writes: u64,
    lookups: u64,
    reject: HashSet<EntityKind>,
    reject_keys: HashSet<String>,
    offline: bool,
}

/// In-process [`TargetStore`] with the same conflict and foreign-key rules as
/// the Postgres schema. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose ping fails, as an unreachable database would.
    pub fn offline() -> Self {
        let store = Self::default();
        store.tables().offline = true;
        store
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail every write of `kind`.
    pub fn reject_kind(&self, kind: EntityKind) {
        self.tables().reject.insert(kind);
    }

    /// Fail writes whose business key (pole/drop number) or id equals `key`.
    pub fn reject_key(&self, key: &str) {
        self.tables().reject_keys.insert(key.to_string());
    }

    pub fn counts(&self) -> TableCounts {
        let t = self.tables();
        TableCounts {
            projects: t.projects.len() as i64,
            poles: t.poles.len() as i64,
            drops: t.drops.len() as i64,
            status_history: t.status_history.len() as i64,
            pole_photos: t.photos.len() as i64,
            import_batches: t.import_batches.len() as i64,
        }
    }

    /// Number of successful write statements.
    pub fn write_count(&self) -> u64 {
        self.tables().writes
    }

    /// Number of pole-by-number lookups served.
    pub fn lookup_count(&self) -> u64 {
        self.tables().lookups
    }

    pub fn pole_by_number(&self, number: &str) -> Option<StoredPole> {
        let t = self.tables();
        let id = t.pole_numbers.get(number)?;
        t.poles.get(id).cloned()
    }

    pub fn drop_by_number(&self, number: &str) -> Option<StoredDrop> {
        let t = self.tables();
        let id = t.drop_numbers.get(number)?;
        t.drops.get(id).cloned()
    }

    pub fn status_history_for(&self, parent_id: &str) -> Vec<StatusHistoryEntry> {
        self.tables()
            .status_history
            .values()
            .filter(|e| e.parent_id == parent_id)
            .cloned()
            .collect()
    }

    pub fn photos_for(&self, pole_id: &str) -> Vec<PhotoRecord> {
        self.tables()
            .photos
            .values()
            .filter(|p| p.pole_id == pole_id)
            .cloned()
            .collect()
    }

    /// Overwrite a pole's stored counter, e.g. to simulate a stale legacy value.
    pub fn set_drop_count(&self, pole_id: &str, count: i32) {
        if let Some(p) = self.tables().poles.get_mut(pole_id) {
            p.drop_count = count;
        }
    }

    fn check(t: &Tables, kind: EntityKind, keys: &[&str]) -> Result<(), StoreError> {
        if t.offline {
            return Err(StoreError::Rejected("store offline".into()));
        }
        if t.reject.contains(&kind) {
            return Err(StoreError::Rejected(format!("{kind} writes disabled")));
        }
        if let Some(k) = keys.iter().find(|k| t.reject_keys.contains(**k)) {
            return Err(StoreError::Rejected(format!("{kind} `{k}` rejected")));
        }
        Ok(())
    }

    fn check_project(t: &Tables, project_id: Option<&str>) -> Result<(), StoreError> {
        match project_id {
            Some(pid) if !t.projects.contains_key(pid) => Err(StoreError::MissingParent {
                kind: "project",
                id: pid.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.tables().offline {
            return Err(StoreError::Rejected("connection refused".into()));
        }
        Ok(())
    }

    async fn upsert_project(&self, project: &ProjectRecord) -> Result<String, StoreError> {
        let mut t = self.tables();
        Self::check(&t, EntityKind::Project, &[project.id.as_str()])?;
        let mut row = project.clone();
        if let Some(existing) = t.projects.get(&project.id) {
            row.created_at = existing.created_at;
        }
        t.projects.insert(row.id.clone(), row);
        t.writes += 1;
        Ok(project.id.clone())
    }

    async fn upsert_pole(&self, id: &str, pole: &PoleRecord) -> Result<String, StoreError> {
        let mut t = self.tables();
        Self::check(&t, EntityKind::Pole, &[id, pole.pole_number.as_str()])?;
        Self::check_project(&t, pole.project_id.as_deref())?;
        let existing = t.pole_numbers.get(&pole.pole_number).cloned();
        let (row_id, created_at) = match existing.and_then(|eid| t.poles.get(&eid)) {
            Some(stored) => (stored.id.clone(), stored.created_at),
            None => (id.to_string(), pole.created_at),
        };
        let mut record = pole.clone();
        record.created_at = created_at;
        t.pole_numbers.insert(pole.pole_number.clone(), row_id.clone());
        t.poles.insert(
            row_id.clone(),
            StoredPole {
                id: row_id.clone(),
                drop_count: pole.drop_count,
                record,
                created_at,
            },
        );
        t.writes += 1;
        Ok(row_id)
    }

    async fn upsert_drop(
        &self,
        id: &str,
        drop: &DropRecord,
        pole_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let mut t = self.tables();
        Self::check(&t, EntityKind::Drop, &[id, drop.drop_number.as_str()])?;
        Self::check_project(&t, drop.project_id.as_deref())?;
        if let Some(pid) = pole_id {
            if !t.poles.contains_key(pid) {
                return Err(StoreError::MissingParent {
                    kind: "pole",
                    id: pid.to_string(),
                });
            }
        }
        let existing = t.drop_numbers.get(&drop.drop_number).cloned();
        let (row_id, created_at) = match existing.and_then(|eid| t.drops.get(&eid)) {
            Some(stored) => (stored.id.clone(), stored.created_at),
            None => (id.to_string(), drop.created_at),
        };
        t.drop_numbers
            .insert(drop.drop_number.clone(), row_id.clone());
        t.drops.insert(
            row_id.clone(),
            StoredDrop {
                id: row_id.clone(),
                record: drop.clone(),
                pole_id: pole_id.map(str::to_string),
                created_at,
            },
        );
        t.writes += 1;
        Ok(row_id)
    }

    async fn upsert_status_history(
        &self,
        entry: &StatusHistoryEntry,
    ) -> Result<String, StoreError> {
        let mut t = self.tables();
        Self::check(&t, EntityKind::StatusHistory, &[entry.id.as_str()])?;
        let parent_exists = match entry.parent_kind {
            EntityKind::Pole => t.poles.contains_key(&entry.parent_id),
            EntityKind::Drop => t.drops.contains_key(&entry.parent_id),
            _ => false,
        };
        if !parent_exists {
            return Err(StoreError::MissingParent {
                kind: entry.parent_kind.as_str(),
                id: entry.parent_id.clone(),
            });
        }
        t.status_history.insert(entry.id.clone(), entry.clone());
        t.writes += 1;
        Ok(entry.id.clone())
    }

    async fn upsert_photo(&self, photo: &PhotoRecord) -> Result<String, StoreError> {
        let mut t = self.tables();
        Self::check(&t, EntityKind::Photo, &[photo.id.as_str()])?;
        if !t.poles.contains_key(&photo.pole_id) {
            return Err(StoreError::MissingParent {
                kind: "pole",
                id: photo.pole_id.clone(),
            });
        }
        let key = (photo.pole_id.clone(), photo.upload.category);
        let mut row = photo.clone();
        if let Some(existing) = t.photos.get(&key) {
            row.id = existing.id.clone();
        }
        let id = row.id.clone();
        t.photos.insert(key, row);
        t.writes += 1;
        Ok(id)
    }

    async fn upsert_import_batch(&self, batch: &ImportBatchRecord) -> Result<String, StoreError> {
        let mut t = self.tables();
        Self::check(&t, EntityKind::ImportBatch, &[batch.id.as_str()])?;
        let mut row = batch.clone();
        if let Some(existing) = t.import_batches.get(&batch.id) {
            row.imported_at = existing.imported_at;
        }
        t.import_batches.insert(row.id.clone(), row);
        t.writes += 1;
        Ok(batch.id.clone())
    }

    async fn find_pole_id(&self, pole_number: &str) -> Result<Option<String>, StoreError> {
        let mut t = self.tables();
        if t.offline {
            return Err(StoreError::Rejected("store offline".into()));
        }
        t.lookups += 1;
        Ok(t.pole_numbers.get(pole_number).cloned())
    }

    async fn recompute_drop_counts(&self) -> Result<u64, StoreError> {
        let mut t = self.tables();
        let mut per_pole: HashMap<String, i32> = HashMap::new();
        for d in t.drops.values() {
            if let Some(pid) = &d.pole_id {
                *per_pole.entry(pid.clone()).or_default() += 1;
            }
        }
        for pole in t.poles.values_mut() {
            pole.drop_count = per_pole.get(&pole.id).copied().unwrap_or(0);
        }
        let touched = t.poles.len() as u64;
        t.writes += 1;
        Ok(touched)
    }

    async fn row_counts(&self) -> Result<TableCounts, StoreError> {
        Ok(self.counts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::Normalizer;
    use crate::source::LegacyDocument;
    use serde_json::json;

    fn pole(number: &str) -> PoleRecord {
        let doc = LegacyDocument::new(
            format!("doc-{number}"),
            json!({"poleNumber": number}).as_object().cloned().unwrap(),
        );
        Normalizer::default().pole(&doc, "pole-trackers").unwrap()
    }

    #[tokio::test]
    async fn pole_upsert_keeps_first_id_and_creation_time() {
        let store = MemoryStore::new();
        let first = pole("P1");
        let id1 = store.upsert_pole("id-1", &first).await.unwrap();
        let mut second = pole("P1");
        second.created_at = first.created_at + chrono::Duration::days(3);
        second.zone = Some("Z9".into());
        let id2 = store.upsert_pole("id-2", &second).await.unwrap();

        assert_eq!(id1, "id-1");
        assert_eq!(id2, "id-1");
        assert_eq!(store.counts().poles, 1);
        let stored = store.pole_by_number("P1").unwrap();
        assert_eq!(stored.created_at, first.created_at);
        assert_eq!(stored.record.zone.as_deref(), Some("Z9"));
    }

    #[tokio::test]
    async fn drop_with_unknown_pole_is_rejected() {
        let store = MemoryStore::new();
        let doc = LegacyDocument::new(
            "d1",
            json!({"dropNumber": "DR1"}).as_object().cloned().unwrap(),
        );
        let d = Normalizer::default().drop_record(&doc, "drops", None).unwrap();
        let err = store.upsert_drop("x", &d, Some("ghost")).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { .. }));
        assert_eq!(store.counts().drops, 0);
        store.upsert_drop("x", &d, None).await.unwrap();
        assert_eq!(store.counts().drops, 1);
    }

    #[tokio::test]
    async fn rows_referencing_an_unknown_project_are_rejected() {
        let store = MemoryStore::new();
        let mut p = pole("P1");
        p.project_id = Some("no-such-project".into());
        let err = store.upsert_pole("id-1", &p).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { kind: "project", .. }));

        let doc = LegacyDocument::new(
            "d1",
            json!({"dropNumber": "DR1", "projectId": "no-such-project"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let d = Normalizer::default().drop_record(&doc, "drops", None).unwrap();
        let err = store.upsert_drop("x", &d, None).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { kind: "project", .. }));
        assert_eq!(store.counts().poles, 0);
        assert_eq!(store.counts().drops, 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn offline_store_fails_ping() {
        assert!(MemoryStore::offline().ping().await.is_err());
        assert!(MemoryStore::new().ping().await.is_ok());
    }
}
