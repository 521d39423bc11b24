//! Canonical records produced by normalization.
//!
//! Records are plain values: a child never holds its parent, only the parent's
//! target identifier, and only once that identifier is known.
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// Entity kinds tracked by the run statistics, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Pole,
    Drop,
    StatusHistory,
    Photo,
    ImportBatch,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Project,
        EntityKind::Pole,
        EntityKind::Drop,
        EntityKind::StatusHistory,
        EntityKind::Photo,
        EntityKind::ImportBatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Pole => "pole",
            EntityKind::Drop => "drop",
            EntityKind::StatusHistory => "status_history",
            EntityKind::Photo => "photo",
            EntityKind::ImportBatch => "import_batch",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A WGS84 point, always stored longitude first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn from_lat_lng(latitude: f64, longitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// Side channel carried by every record so the original document can be recovered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEnvelope {
    pub source_id: String,
    pub source_collection: String,
    pub migrated_at: DateTime<Utc>,
    pub original: Value,
}

impl RawEnvelope {
    pub fn to_json(&self) -> Value {
        json!({
            "sourceId": self.source_id,
            "sourceCollection": self.source_collection,
            "migratedAt": self.migrated_at.to_rfc3339(),
            "originalData": self.original,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoleStatus {
    Planned,
    Pending,
    InProgress,
    Installed,
    QualityChecked,
    Approved,
    Rejected,
    OnHold,
}

impl PoleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoleStatus::Planned => "planned",
            PoleStatus::Pending => "pending",
            PoleStatus::InProgress => "in_progress",
            PoleStatus::Installed => "installed",
            PoleStatus::QualityChecked => "quality_checked",
            PoleStatus::Approved => "approved",
            PoleStatus::Rejected => "rejected",
            PoleStatus::OnHold => "on_hold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropStatus {
    SignupRequested,
    SignupApproved,
    SignupDeclined,
    InstallationScheduled,
    InstallationInProgress,
    Connected,
    Activated,
    Suspended,
    Cancelled,
}

impl DropStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropStatus::SignupRequested => "signup_requested",
            DropStatus::SignupApproved => "signup_approved",
            DropStatus::SignupDeclined => "signup_declined",
            DropStatus::InstallationScheduled => "installation_scheduled",
            DropStatus::InstallationInProgress => "installation_in_progress",
            DropStatus::Connected => "connected",
            DropStatus::Activated => "activated",
            DropStatus::Suspended => "suspended",
            DropStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportType {
    Csv,
    Excel,
    Onemap,
    Manual,
    Api,
}

impl ImportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::Csv => "csv",
            ImportType::Excel => "excel",
            ImportType::Onemap => "onemap",
            ImportType::Manual => "manual",
            ImportType::Api => "api",
        }
    }
}

/// Fixed set of installation photo slots on a pole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoCategory {
    Before,
    Front,
    Side,
    Depth,
    Concrete,
    Compaction,
}

impl PhotoCategory {
    pub const ALL: [PhotoCategory; 6] = [
        PhotoCategory::Before,
        PhotoCategory::Front,
        PhotoCategory::Side,
        PhotoCategory::Depth,
        PhotoCategory::Concrete,
        PhotoCategory::Compaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoCategory::Before => "before",
            PhotoCategory::Front => "front",
            PhotoCategory::Side => "side",
            PhotoCategory::Depth => "depth",
            PhotoCategory::Concrete => "concrete",
            PhotoCategory::Compaction => "compaction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRecord {
    /// Legacy document id, reused as the target id.
    pub id: String,
    pub name: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub envelope: RawEnvelope,
}

/// A status transition not yet attached to a parent row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub old_status: Option<String>,
    pub new_status: String,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub metadata: Value,
}

/// A photo slot not yet attached to its pole row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoUpload {
    pub category: PhotoCategory,
    pub storage_url: String,
    pub thumbnail_url: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoleRecord {
    pub project_id: Option<String>,
    pub pole_number: String,
    /// True when the legacy document had no pole number and one was synthesized.
    pub synthetic_number: bool,
    pub alternate_id: Option<String>,
    pub status: PoleStatus,
    pub installation_status: Option<String>,
    pub quality_checked: bool,
    pub quality_check_date: Option<DateTime<Utc>>,
    pub quality_checked_by: Option<String>,
    pub location: Option<GeoPoint>,
    pub gps_accuracy: Option<f64>,
    pub zone: Option<String>,
    pub pon: Option<String>,
    pub distribution_or_feeder: Option<String>,
    pub contractor_id: Option<String>,
    pub contractor_name: Option<String>,
    pub working_team: Option<String>,
    pub date_installed: Option<DateTime<Utc>>,
    pub pole_type: Option<String>,
    pub pole_height: Option<String>,
    pub import_batch_id: Option<String>,
    pub onemap_id: Option<String>,
    pub onemap_data: Option<Value>,
    pub max_capacity: i32,
    /// Legacy counter; overwritten by consistency repair.
    pub drop_count: i32,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    #[serde(skip)]
    pub status_history: Vec<Result<StatusChange, crate::normalization::NormalizeError>>,
    #[serde(skip)]
    pub photos: Vec<Result<PhotoUpload, crate::normalization::NormalizeError>>,
    pub envelope: RawEnvelope,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropRecord {
    pub project_id: Option<String>,
    pub drop_number: String,
    pub synthetic_number: bool,
    /// Business number of the pole this drop hangs off, still unresolved.
    pub pole_number: Option<String>,
    pub status: DropStatus,
    pub property_id: Option<String>,
    pub address: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub distance_to_pole: Option<f64>,
    pub cable_length: Option<f64>,
    pub cable_type: Option<String>,
    pub ont_serial: Option<String>,
    pub location: Option<GeoPoint>,
    pub signup_date: Option<DateTime<Utc>>,
    pub approval_date: Option<DateTime<Utc>>,
    pub installation_scheduled_date: Option<DateTime<Utc>>,
    pub connection_date: Option<DateTime<Utc>>,
    pub activation_date: Option<DateTime<Utc>>,
    pub import_batch_id: Option<String>,
    pub onemap_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    #[serde(skip)]
    pub status_history: Vec<Result<StatusChange, crate::normalization::NormalizeError>>,
    pub envelope: RawEnvelope,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusHistoryEntry {
    pub id: String,
    pub parent_kind: EntityKind,
    pub parent_id: String,
    pub change: StatusChange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoRecord {
    pub id: String,
    pub pole_id: String,
    pub upload: PhotoUpload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportBatchRecord {
    /// Legacy document id, reused as the target id.
    pub id: String,
    pub import_type: ImportType,
    pub file_name: Option<String>,
    pub file_url: Option<String>,
    pub project_id: Option<String>,
    pub total_records: i64,
    pub processed_records: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub duplicate_count: i64,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors: Value,
    pub imported_by: String,
    pub imported_at: DateTime<Utc>,
    pub envelope: RawEnvelope,
}
