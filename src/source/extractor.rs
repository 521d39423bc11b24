use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;

use super::{LegacyDocument, LegacySource, SourceError};
use crate::model::{DropStatus, EntityKind};

/// How a collection's documents carry their project reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopePolicy {
    /// The document id is the project id.
    DocumentId,
    /// `projectId` must be present and equal to the scope.
    Required,
    /// Filter on `projectId` only when the document carries one.
    WherePresent,
}

#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
    pub name: &'static str,
    pub kind: EntityKind,
    pub scope: ScopePolicy,
    /// Lifecycle stage implied by the collection itself (drop collections only).
    pub status_hint: Option<DropStatus>,
}

impl CollectionSpec {
    const fn new(name: &'static str, kind: EntityKind, scope: ScopePolicy) -> Self {
        Self {
            name,
            kind,
            scope,
            status_hint: None,
        }
    }

    const fn drops(name: &'static str, status_hint: Option<DropStatus>) -> Self {
        Self {
            name,
            kind: EntityKind::Drop,
            scope: ScopePolicy::Required,
            status_hint,
        }
    }
}

pub const REFERENCE_COLLECTIONS: &[CollectionSpec] = &[CollectionSpec::new(
    "projects",
    EntityKind::Project,
    ScopePolicy::DocumentId,
)];

/// Highest confidence first: the first-seen copy of a pole number wins.
pub const POLE_COLLECTIONS: &[CollectionSpec] = &[
    CollectionSpec::new("pole-trackers", EntityKind::Pole, ScopePolicy::Required),
    CollectionSpec::new("planned-poles", EntityKind::Pole, ScopePolicy::Required),
    CollectionSpec::new("pole-installations", EntityKind::Pole, ScopePolicy::Required),
];

pub const DROP_COLLECTIONS: &[CollectionSpec] = &[
    CollectionSpec::drops("home-signups", Some(DropStatus::SignupApproved)),
    CollectionSpec::drops("homes-connected", Some(DropStatus::Connected)),
    CollectionSpec::drops("homes-activated", Some(DropStatus::Activated)),
    CollectionSpec::drops("drops", None),
];

pub const BATCH_COLLECTIONS: &[CollectionSpec] = &[CollectionSpec::new(
    "import-batches",
    EntityKind::ImportBatch,
    ScopePolicy::WherePresent,
)];

/// Optional single-project restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    project: Option<String>,
}

impl ScopeFilter {
    pub fn new(project: Option<String>) -> Self {
        Self {
            project: project.filter(|p| !p.trim().is_empty()),
        }
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn admits(&self, policy: ScopePolicy, doc: &LegacyDocument) -> bool {
        let Some(scope) = self.project.as_deref() else {
            return true;
        };
        let project_ref = match doc.fields.get("projectId") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        };
        match policy {
            ScopePolicy::DocumentId => doc.id == scope,
            ScopePolicy::Required => project_ref == Some(scope),
            ScopePolicy::WherePresent => project_ref.map_or(true, |p| p == scope),
        }
    }
}

/// What the extractor hands to the pipeline for each enumerated entry.
#[derive(Debug)]
pub enum Extracted {
    Document(LegacyDocument),
    OutOfScope(String),
    Unreadable(SourceError),
}

pub struct Extractor<'a> {
    source: &'a dyn LegacySource,
    scope: ScopeFilter,
}

impl<'a> Extractor<'a> {
    pub fn new(source: &'a dyn LegacySource, scope: ScopeFilter) -> Self {
        Self { source, scope }
    }

    /// Open one collection with the scope predicate applied per document.
    pub async fn extract(
        &self,
        spec: &CollectionSpec,
    ) -> Result<BoxStream<'static, Extracted>, SourceError> {
        let scope = self.scope.clone();
        let policy = spec.scope;
        let docs = self.source.documents(spec.name).await?;
        Ok(docs
            .map(move |item| match item {
                Ok(doc) if scope.admits(policy, &doc) => Extracted::Document(doc),
                Ok(doc) => Extracted::OutOfScope(doc.id),
                Err(e) => Extracted::Unreadable(e),
            })
            .boxed())
    }
}
