//! Legacy document store boundary.
pub mod export_dir;
pub mod extractor;
pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;

pub use export_dir::ExportDirSource;
pub use extractor::{CollectionSpec, Extracted, Extractor, ScopeFilter, ScopePolicy};
pub use memory::MemorySource;

/// One legacy document as enumerated from a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyDocument {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl LegacyDocument {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{collection} entry {position}: invalid JSON: {source}")]
    Parse {
        collection: String,
        position: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{collection} entry {position}: line is not valid UTF-8")]
    InvalidUtf8 { collection: String, position: usize },
    #[error("{collection} entry {position}: expected a JSON object")]
    NotAnObject { collection: String, position: usize },
}

pub type DocumentStream = BoxStream<'static, Result<LegacyDocument, SourceError>>;

/// "Enumerate all documents in collection X". No ordering contract.
#[async_trait]
pub trait LegacySource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn documents(&self, collection: &str) -> Result<DocumentStream, SourceError>;
}
