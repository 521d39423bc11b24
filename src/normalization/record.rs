use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::warn;

use super::fields::Fields;
use super::geo::parse_location;
use super::status::{map_drop_status, map_import_type, map_pole_status};
use super::timestamp::{coerce, required};
use super::NormalizeError;
use crate::model::{
    DropRecord, DropStatus, ImportBatchRecord, PhotoCategory, PhotoUpload, PoleRecord,
    ProjectRecord, RawEnvelope, StatusChange,
};
use crate::source::LegacyDocument;

pub const MIGRATION_ACTOR: &str = "migration";
pub const DEFAULT_MAX_CAPACITY: i32 = 12;
pub const DEFAULT_PHOTO_MIME: &str = "image/jpeg";
pub const DEFAULT_BATCH_STATUS: &str = "completed";

/// Projects legacy documents into canonical records.
///
/// `now` stands in for every required timestamp that is absent in the source,
/// and is stamped on each envelope, so one run uses a single clock reading.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    now: DateTime<Utc>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Normalizer {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn envelope(&self, doc: &LegacyDocument, collection: &str) -> RawEnvelope {
        RawEnvelope {
            source_id: doc.id.clone(),
            source_collection: collection.to_string(),
            migrated_at: self.now,
            original: Value::Object(doc.fields.clone()),
        }
    }

    pub fn project(
        &self,
        doc: &LegacyDocument,
        collection: &str,
    ) -> Result<ProjectRecord, NormalizeError> {
        let f = Fields::new(&doc.fields);
        Ok(ProjectRecord {
            id: doc.id.clone(),
            name: f
                .first_text(&["title", "name"])
                .unwrap_or_else(|| "Unknown Project".to_string()),
            code: f
                .text("projectCode")
                .unwrap_or_else(|| doc.id.chars().take(10).collect()),
            created_at: required("createdAt", f.raw("createdAt"), self.now)?,
            updated_at: required("updatedAt", f.raw("updatedAt"), self.now)?,
            envelope: self.envelope(doc, collection),
        })
    }

    pub fn pole(&self, doc: &LegacyDocument, collection: &str) -> Result<PoleRecord, NormalizeError> {
        let f = Fields::new(&doc.fields);
        let (pole_number, synthetic_number) = match f.text("poleNumber") {
            Some(n) => (n, false),
            None => (format!("TEMP_{}", doc.id), true),
        };
        let legacy_drop_count = f
            .integer("dropCount")
            .filter(|n| *n > 0)
            .or_else(|| f.array("connectedDrops").map(|a| a.len() as i64))
            .unwrap_or(0);

        Ok(PoleRecord {
            project_id: f.text("projectId"),
            pole_number,
            synthetic_number,
            alternate_id: f.first_text(&["vfPoleId", "poleId"]),
            status: map_pole_status(f.text("status").as_deref()),
            installation_status: f.text("installationStatus"),
            quality_checked: f.flag("qualityChecked"),
            quality_check_date: coerce("qualityCheckDate", f.raw("qualityCheckDate"))?,
            quality_checked_by: f.text("qualityCheckedBy"),
            location: parse_location(f.first_raw(&["location", "gpsLocation"])),
            gps_accuracy: f.number("gpsAccuracy"),
            zone: f.text("zone"),
            pon: f.text("pon"),
            distribution_or_feeder: f.first_text(&["distributionFeeder", "distributionOrFeeder"]),
            contractor_id: f.text("contractorId"),
            contractor_name: f.text("contractorName"),
            working_team: f.text("workingTeam"),
            date_installed: coerce("dateInstalled", f.raw("dateInstalled"))?,
            pole_type: f.text("poleType"),
            pole_height: f.text("poleHeight"),
            import_batch_id: f.text("importBatchId"),
            onemap_id: f.first_text(&["oneMapId", "oneMapNadId"]),
            onemap_data: f.raw("oneMapData").cloned(),
            max_capacity: f
                .integer("maxCapacity")
                .filter(|n| *n > 0)
                .map(|n| n.min(i32::MAX as i64) as i32)
                .unwrap_or(DEFAULT_MAX_CAPACITY),
            drop_count: legacy_drop_count.min(i32::MAX as i64) as i32,
            created_at: required("createdAt", f.raw("createdAt"), self.now)?,
            created_by: f.text("createdBy").unwrap_or_else(|| MIGRATION_ACTOR.into()),
            updated_at: required("updatedAt", f.raw("updatedAt"), self.now)?,
            updated_by: f.text("updatedBy").unwrap_or_else(|| MIGRATION_ACTOR.into()),
            status_history: self.status_history(&doc.id, f.raw("statusHistory")),
            photos: self.photos(&doc.id, f.object("uploads")),
            envelope: self.envelope(doc, collection),
        })
    }

    pub fn drop_record(
        &self,
        doc: &LegacyDocument,
        collection: &str,
        status_hint: Option<DropStatus>,
    ) -> Result<DropRecord, NormalizeError> {
        let f = Fields::new(&doc.fields);
        let (drop_number, synthetic_number) = match f.text("dropNumber") {
            Some(n) => (n, false),
            None => (format!("TEMP_DROP_{}", doc.id), true),
        };

        Ok(DropRecord {
            project_id: f.text("projectId"),
            drop_number,
            synthetic_number,
            pole_number: f.first_text(&["connectedToPole", "poleNumber"]),
            status: map_drop_status(f.text("status").as_deref(), status_hint),
            property_id: f.text("propertyId"),
            address: f.first_text(&["address", "locationAddress"]),
            customer_name: f.text("customerName"),
            customer_phone: f.text("customerPhone"),
            customer_email: f.text("customerEmail"),
            distance_to_pole: f.number("distanceToPole"),
            cable_length: f.number("cableLength"),
            cable_type: f.text("cableType"),
            ont_serial: f.first_text(&["ontSerial", "ontReference"]),
            location: parse_location(f.first_raw(&["location", "gpsLocation"])),
            signup_date: coerce("signupDate", f.first_raw(&["signupDate", "createdAt"]))?,
            approval_date: coerce("approvalDate", f.raw("approvalDate"))?,
            installation_scheduled_date: coerce(
                "installationScheduledDate",
                f.raw("installationScheduledDate"),
            )?,
            connection_date: coerce("connectionDate", f.raw("connectionDate"))?,
            activation_date: coerce("activationDate", f.raw("activationDate"))?,
            import_batch_id: f.text("importBatchId"),
            onemap_id: f.text("oneMapId"),
            created_at: required("createdAt", f.raw("createdAt"), self.now)?,
            created_by: f.text("createdBy").unwrap_or_else(|| MIGRATION_ACTOR.into()),
            updated_at: required("updatedAt", f.raw("updatedAt"), self.now)?,
            updated_by: f.text("updatedBy").unwrap_or_else(|| MIGRATION_ACTOR.into()),
            status_history: self.status_history(&doc.id, f.raw("statusHistory")),
            envelope: self.envelope(doc, collection),
        })
    }

    pub fn import_batch(
        &self,
        doc: &LegacyDocument,
        collection: &str,
    ) -> Result<ImportBatchRecord, NormalizeError> {
        let f = Fields::new(&doc.fields);
        let count = |key: &str| f.integer(key).unwrap_or(0);
        let errors = match f.raw("errors") {
            Some(Value::Array(items)) => Value::Array(items.clone()),
            Some(other) => Value::Array(vec![other.clone()]),
            None => Value::Array(Vec::new()),
        };

        Ok(ImportBatchRecord {
            id: doc.id.clone(),
            import_type: map_import_type(f.first_text(&["importType", "type"]).as_deref()),
            file_name: f.text("fileName"),
            file_url: f.text("fileUrl"),
            project_id: f.text("projectId"),
            total_records: count("totalRecords"),
            processed_records: count("processedRecords"),
            success_count: count("successCount"),
            error_count: count("errorCount"),
            duplicate_count: count("duplicateCount"),
            status: f
                .text("status")
                .unwrap_or_else(|| DEFAULT_BATCH_STATUS.to_string()),
            started_at: coerce("startedAt", f.raw("startedAt"))?,
            completed_at: coerce("completedAt", f.raw("completedAt"))?,
            errors,
            imported_by: f.text("importedBy").unwrap_or_else(|| MIGRATION_ACTOR.into()),
            imported_at: required(
                "importedAt",
                f.first_raw(&["importedAt", "createdAt"]),
                self.now,
            )?,
            envelope: self.envelope(doc, collection),
        })
    }

    /// Each entry normalizes on its own so one bad entry never sinks the parent.
    fn status_history(
        &self,
        doc_id: &str,
        raw: Option<&Value>,
    ) -> Vec<Result<StatusChange, NormalizeError>> {
        let Some(raw) = raw else {
            return Vec::new();
        };
        let Some(entries) = raw.as_array() else {
            warn!(doc_id, "statusHistory is not an array; ignoring");
            return Vec::new();
        };
        entries
            .iter()
            .map(|entry| match entry.as_object() {
                Some(obj) => self.status_change(obj),
                None => Err(NormalizeError::InvalidField {
                    field: "statusHistory[]".into(),
                    expected: "an object",
                }),
            })
            .collect()
    }

    fn status_change(&self, obj: &Map<String, Value>) -> Result<StatusChange, NormalizeError> {
        let f = Fields::new(obj);
        let new_status = f.text("status").ok_or_else(|| NormalizeError::MissingField {
            field: "statusHistory[].status".into(),
        })?;
        Ok(StatusChange {
            old_status: f.text("previousStatus"),
            new_status,
            changed_by: f.text("changedBy").unwrap_or_else(|| MIGRATION_ACTOR.into()),
            changed_at: required("statusHistory[].changedAt", f.raw("changedAt"), self.now)?,
            reason: f.first_text(&["notes", "reason"]),
            metadata: json!({
                "source": f.raw("source"),
                "importBatchId": f.raw("importBatchId"),
                "changedByName": f.raw("changedByName"),
            }),
        })
    }

    /// Photo slots in fixed category order; empty slots and slots without a URL are skipped.
    fn photos(
        &self,
        doc_id: &str,
        uploads: Option<&Map<String, Value>>,
    ) -> Vec<Result<PhotoUpload, NormalizeError>> {
        let Some(uploads) = uploads else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for category in PhotoCategory::ALL {
            let Some(slot) = uploads.get(category.as_str()) else {
                continue;
            };
            let Some(slot) = slot.as_object() else {
                if !slot.is_null() {
                    warn!(doc_id, category = category.as_str(), "photo slot is not an object");
                }
                continue;
            };
            let f = Fields::new(slot);
            let Some(storage_url) = f.text("url") else {
                continue;
            };
            out.push(self.photo(category, storage_url, slot));
        }
        out
    }

    fn photo(
        &self,
        category: PhotoCategory,
        storage_url: String,
        slot: &Map<String, Value>,
    ) -> Result<PhotoUpload, NormalizeError> {
        let f = Fields::new(slot);
        let meta = f.object("metadata").map(Fields::new);
        Ok(PhotoUpload {
            category,
            storage_url,
            thumbnail_url: f.text("thumbnailUrl"),
            file_size: meta.and_then(|m| m.integer("originalSize")),
            mime_type: meta
                .and_then(|m| m.text("mimeType"))
                .unwrap_or_else(|| DEFAULT_PHOTO_MIME.to_string()),
            uploaded_at: required("uploads.uploadedAt", f.raw("uploadedAt"), self.now)?,
            uploaded_by: f.text("uploadedBy").unwrap_or_else(|| MIGRATION_ACTOR.into()),
            metadata: json!({
                "fileName": f.raw("fileName"),
                "approved": f.raw("approved"),
                "approvedBy": f.raw("approvedBy"),
                "approvedAt": f.raw("approvedAt"),
                "metadata": f.raw("metadata"),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PoleStatus;
    use chrono::TimeZone;

    fn doc(id: &str, v: Value) -> LegacyDocument {
        LegacyDocument::new(id, v.as_object().cloned().unwrap())
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn pole_fields_and_defaults() {
        let d = doc(
            "fb1",
            json!({
                "projectId": "proj-1",
                "poleNumber": "LAW.P.B167",
                "status": "Captured",
                "location": "-26.2041,28.0473",
                "connectedDrops": ["D1", "D2", "D3"],
                "createdAt": {"_seconds": 1_700_000_000},
                "legacyOnlyField": {"kept": true}
            }),
        );
        let p = normalizer().pole(&d, "pole-trackers").unwrap();
        assert_eq!(p.pole_number, "LAW.P.B167");
        assert!(!p.synthetic_number);
        assert_eq!(p.status, PoleStatus::Installed);
        assert_eq!(p.location.unwrap().longitude, 28.0473);
        assert_eq!(p.drop_count, 3);
        assert_eq!(p.max_capacity, DEFAULT_MAX_CAPACITY);
        assert_eq!(p.created_at.timestamp(), 1_700_000_000);
        assert_eq!(p.updated_at, normalizer().now());
        assert_eq!(p.created_by, MIGRATION_ACTOR);
        assert_eq!(p.envelope.source_collection, "pole-trackers");
        assert_eq!(p.envelope.original["legacyOnlyField"]["kept"], true);
    }

    #[test]
    fn missing_pole_number_gets_placeholder() {
        let d = doc("abc123", json!({"projectId": "p"}));
        let p = normalizer().pole(&d, "planned-poles").unwrap();
        assert_eq!(p.pole_number, "TEMP_abc123");
        assert!(p.synthetic_number);
        assert!(p.location.is_none());
    }

    #[test]
    fn malformed_required_timestamp_rejects_record() {
        let d = doc("x", json!({"poleNumber": "P1", "createdAt": {"_seconds": "nope"}}));
        let err = normalizer().pole(&d, "pole-trackers").unwrap_err();
        assert!(matches!(err, NormalizeError::MalformedTimestamp { .. }));
    }

    #[test]
    fn embedded_entries_fail_independently() {
        let d = doc(
            "x",
            json!({
                "poleNumber": "P1",
                "statusHistory": [
                    {"status": "installed", "previousStatus": "planned", "changedBy": "u1"},
                    {"previousStatus": "planned"},
                    "junk"
                ],
                "uploads": {
                    "before": {"url": "gs://b/1.jpg", "metadata": {"originalSize": 2048, "mimeType": "image/png"}},
                    "front": {"url": "gs://b/2.jpg", "uploadedAt": true},
                    "side": {"uploaded": false},
                    "notACategory": {"url": "gs://b/3.jpg"}
                }
            }),
        );
        let p = normalizer().pole(&d, "pole-trackers").unwrap();
        assert_eq!(p.status_history.len(), 3);
        assert!(p.status_history[0].is_ok());
        assert!(p.status_history[1].is_err());
        assert!(p.status_history[2].is_err());

        assert_eq!(p.photos.len(), 2);
        let before = p.photos[0].as_ref().unwrap();
        assert_eq!(before.category, PhotoCategory::Before);
        assert_eq!(before.file_size, Some(2048));
        assert_eq!(before.mime_type, "image/png");
        assert!(p.photos[1].is_err());
    }

    #[test]
    fn drop_uses_collection_hint_and_pole_reference() {
        let d = doc(
            "h1",
            json!({"dropNumber": "DR1", "connectedToPole": "P9", "status": "cancelled"}),
        );
        let r = normalizer()
            .drop_record(&d, "homes-connected", Some(DropStatus::Connected))
            .unwrap();
        assert_eq!(r.status, DropStatus::Connected);
        assert_eq!(r.pole_number.as_deref(), Some("P9"));

        let d = doc("h2", json!({"poleNumber": "P3"}));
        let r = normalizer().drop_record(&d, "drops", None).unwrap();
        assert_eq!(r.drop_number, "TEMP_DROP_h2");
        assert_eq!(r.status, DropStatus::SignupRequested);
        assert_eq!(r.pole_number.as_deref(), Some("P3"));
    }

    #[test]
    fn project_and_batch_defaults() {
        let d = doc("0123456789abcdef", json!({}));
        let p = normalizer().project(&d, "projects").unwrap();
        assert_eq!(p.name, "Unknown Project");
        assert_eq!(p.code, "0123456789");

        let d = doc("batch-1", json!({"type": "CSV", "errors": "row 4 bad", "totalRecords": 10}));
        let b = normalizer().import_batch(&d, "import-batches").unwrap();
        assert_eq!(b.import_type.as_str(), "csv");
        assert_eq!(b.status, DEFAULT_BATCH_STATUS);
        assert_eq!(b.total_records, 10);
        assert_eq!(b.errors, json!(["row 4 bad"]));
        assert_eq!(b.imported_at, normalizer().now());
    }
}
