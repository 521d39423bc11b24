use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;

use super::{DocumentStream, LegacyDocument, LegacySource, SourceError};

/// Fixture-backed source. Unknown collections enumerate as empty.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    collections: HashMap<String, Vec<LegacyDocument>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: &str, doc: LegacyDocument) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    /// Add a document from a JSON object literal; non-objects are stored as empty maps.
    pub fn with_doc(mut self, collection: &str, id: &str, fields: Value) -> Self {
        let map = match fields {
            Value::Object(m) => m,
            _ => Default::default(),
        };
        self.insert(collection, LegacyDocument::new(id, map));
        self
    }
}

#[async_trait]
impl LegacySource for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn documents(&self, collection: &str) -> Result<DocumentStream, SourceError> {
        let docs = self.collections.get(collection).cloned().unwrap_or_default();
        Ok(stream::iter(docs.into_iter().map(Ok)).boxed())
    }
}
