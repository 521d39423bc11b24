//! Pure projection of loosely-typed legacy documents into canonical records.
pub mod fields;
pub mod geo;
pub mod record;
pub mod status;
pub mod timestamp;

use thiserror::Error;

pub use record::Normalizer;

/// Why a single legacy document (or one of its embedded entries) could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("malformed timestamp in `{field}`: {reason}")]
    MalformedTimestamp { field: String, reason: String },
    #[error("missing required field `{field}`")]
    MissingField { field: String },
    #[error("`{field}` is not {expected}")]
    InvalidField {
        field: String,
        expected: &'static str,
    },
}
