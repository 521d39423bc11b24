//! Total mappings from legacy status strings to target enums.
//!
//! Input is matched case-insensitively with spaces and hyphens folded to
//! underscores. Anything unrecognized maps to the documented default.
use crate::model::{DropStatus, ImportType, PoleStatus};

pub const DEFAULT_POLE_STATUS: PoleStatus = PoleStatus::Pending;
pub const DEFAULT_DROP_STATUS: DropStatus = DropStatus::SignupRequested;
pub const DEFAULT_IMPORT_TYPE: ImportType = ImportType::Manual;

fn fold(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

pub fn map_pole_status(raw: Option<&str>) -> PoleStatus {
    let Some(raw) = raw else {
        return DEFAULT_POLE_STATUS;
    };
    match fold(raw).as_str() {
        "planned" => PoleStatus::Planned,
        "pending" => PoleStatus::Pending,
        "in_progress" => PoleStatus::InProgress,
        "installed" => PoleStatus::Installed,
        "quality_checked" => PoleStatus::QualityChecked,
        "approved" => PoleStatus::Approved,
        "rejected" => PoleStatus::Rejected,
        "on_hold" => PoleStatus::OnHold,
        // Collapsed legacy synonyms; see DESIGN.md open questions.
        "captured" => PoleStatus::Installed,
        "completed" => PoleStatus::Approved,
        _ => DEFAULT_POLE_STATUS,
    }
}

/// Drop status. Collections that only ever held one lifecycle stage pass that
/// stage as `collection_hint`, which wins over the document's own status.
pub fn map_drop_status(raw: Option<&str>, collection_hint: Option<DropStatus>) -> DropStatus {
    if let Some(hint) = collection_hint {
        return hint;
    }
    let Some(raw) = raw else {
        return DEFAULT_DROP_STATUS;
    };
    match fold(raw).as_str() {
        "signup_requested" => DropStatus::SignupRequested,
        "signup_approved" => DropStatus::SignupApproved,
        "signup_declined" => DropStatus::SignupDeclined,
        "installation_scheduled" => DropStatus::InstallationScheduled,
        "installation_in_progress" => DropStatus::InstallationInProgress,
        "connected" => DropStatus::Connected,
        "activated" => DropStatus::Activated,
        "suspended" => DropStatus::Suspended,
        "cancelled" => DropStatus::Cancelled,
        _ => DEFAULT_DROP_STATUS,
    }
}

pub fn map_import_type(raw: Option<&str>) -> ImportType {
    let Some(raw) = raw else {
        return DEFAULT_IMPORT_TYPE;
    };
    match fold(raw).as_str() {
        "csv" => ImportType::Csv,
        "excel" => ImportType::Excel,
        "onemap" => ImportType::Onemap,
        "manual" => ImportType::Manual,
        "api" => ImportType::Api,
        _ => DEFAULT_IMPORT_TYPE,
    }
}
