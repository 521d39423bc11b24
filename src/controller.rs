//! Phase-ordered migration run.
//!
//! Collections are read one at a time in a fixed order and every record is
//! awaited before the next one is pulled. Only a failed connectivity check
//! ends a run early; every per-record failure is logged, tallied and skipped.
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::MigrationConfig;
use crate::database_ops::{StoreError, TableCounts, TargetStore};
use crate::identity::{IdentityResolver, ParentLink};
use crate::loader::{DependentOutcome, Loader};
use crate::model::EntityKind;
use crate::normalization::fields::Fields;
use crate::normalization::Normalizer;
use crate::repair::{repair_drop_counts, RepairOutcome};
use crate::source::extractor::{
    BATCH_COLLECTIONS, DROP_COLLECTIONS, POLE_COLLECTIONS, REFERENCE_COLLECTIONS,
};
use crate::source::{CollectionSpec, Extracted, Extractor, LegacyDocument, LegacySource};
use crate::stats::{render_row_counts, MigrationStats, DRY_RUN_BANNER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Connected,
    LoadingReference,
    LoadingPrimary,
    LoadingDependents,
    LoadingBatches,
    RepairingConsistency,
    Reported,
    Aborted,
}

impl RunPhase {
    /// Loading phases in execution order.
    pub const LOADING: [RunPhase; 4] = [
        RunPhase::LoadingReference,
        RunPhase::LoadingPrimary,
        RunPhase::LoadingDependents,
        RunPhase::LoadingBatches,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Connected => "connected",
            RunPhase::LoadingReference => "loading_reference",
            RunPhase::LoadingPrimary => "loading_primary",
            RunPhase::LoadingDependents => "loading_dependents",
            RunPhase::LoadingBatches => "loading_batches",
            RunPhase::RepairingConsistency => "repairing_consistency",
            RunPhase::Reported => "reported",
            RunPhase::Aborted => "aborted",
        }
    }

    pub fn collections(&self) -> &'static [CollectionSpec] {
        match self {
            RunPhase::LoadingReference => REFERENCE_COLLECTIONS,
            RunPhase::LoadingPrimary => POLE_COLLECTIONS,
            RunPhase::LoadingDependents => DROP_COLLECTIONS,
            RunPhase::LoadingBatches => BATCH_COLLECTIONS,
            _ => &[],
        }
    }
}

/// Everything the end-of-run summary prints.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub dry_run: bool,
    pub project: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Phases entered, in order.
    pub phases: Vec<RunPhase>,
    pub stats: MigrationStats,
    pub out_of_scope: u64,
    pub unreadable_collections: Vec<String>,
    pub counts_before: Option<TableCounts>,
    pub counts_after: Option<TableCounts>,
    pub repair: Option<RepairOutcome>,
}

impl RunReport {
    fn new(config: &MigrationConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            dry_run: config.dry_run,
            project: config.scope.project().map(str::to_string),
            started_at,
            finished_at: None,
            phases: vec![RunPhase::Idle],
            stats: MigrationStats::new(),
            out_of_scope: 0,
            unreadable_collections: Vec::new(),
            counts_before: None,
            counts_after: None,
            repair: None,
        }
    }

    pub fn final_phase(&self) -> RunPhase {
        self.phases.last().copied().unwrap_or(RunPhase::Idle)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        writeln!(out, "MIGRATION SUMMARY").ok();
        if self.dry_run {
            writeln!(out, "*** {DRY_RUN_BANNER} ***").ok();
        }
        if let Some(project) = &self.project {
            writeln!(out, "project scope: {project}").ok();
        }
        if self.final_phase() == RunPhase::Aborted {
            writeln!(out, "run aborted: target store unreachable, nothing was loaded").ok();
        }
        if let Some(finished) = self.finished_at {
            let secs = (finished - self.started_at).num_milliseconds() as f64 / 1000.0;
            writeln!(out, "elapsed: {secs:.1}s").ok();
        }
        out.push('\n');
        out.push_str(&self.stats.render_table());
        if self.out_of_scope > 0 {
            writeln!(out, "outside project scope: {}", self.out_of_scope).ok();
        }
        if !self.unreadable_collections.is_empty() {
            writeln!(
                out,
                "unreadable collections: {}",
                self.unreadable_collections.join(", ")
            )
            .ok();
        }
        match self.repair {
            Some(RepairOutcome::Recomputed { poles }) => {
                writeln!(out, "drop counts recomputed for {poles} poles").ok();
            }
            Some(RepairOutcome::SkippedDryRun) => {
                writeln!(out, "drop count repair skipped (dry run)").ok();
            }
            None => {}
        }
        if let Some(before) = &self.counts_before {
            out.push('\n');
            out.push_str(&render_row_counts(before, self.counts_after.as_ref()));
        }
        out
    }
}

#[derive(Debug, Error)]
#[error("run aborted: target store unreachable: {source}")]
pub struct RunAborted {
    pub report: Box<RunReport>,
    #[source]
    pub source: StoreError,
}

/// Owns one run's resolver, statistics and phase.
pub struct RunController<'a> {
    source: &'a dyn LegacySource,
    store: &'a dyn TargetStore,
    config: MigrationConfig,
    normalizer: Normalizer,
    resolver: IdentityResolver,
    report: RunReport,
}

impl<'a> RunController<'a> {
    pub fn new(
        source: &'a dyn LegacySource,
        store: &'a dyn TargetStore,
        config: MigrationConfig,
    ) -> Self {
        let started_at = Utc::now();
        Self {
            source,
            store,
            normalizer: Normalizer::new(started_at),
            resolver: IdentityResolver::new(),
            report: RunReport::new(&config, started_at),
            config,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.report.final_phase()
    }

    fn enter(&mut self, phase: RunPhase) {
        info!(from = self.phase().as_str(), to = phase.as_str(), "phase transition");
        self.report.phases.push(phase);
    }

    fn loader(&self) -> Loader<'a> {
        Loader::new(self.store, self.config.dry_run)
    }

    pub async fn run(mut self) -> Result<RunReport, RunAborted> {
        if self.config.dry_run {
            warn!("{DRY_RUN_BANNER}");
        }
        info!(
            source = self.source.name(),
            dry_run = self.config.dry_run,
            project = self.config.scope.project(),
            "starting migration run"
        );

        if let Err(e) = self.store.ping().await {
            error!(error = %e, "target store unreachable; aborting");
            self.enter(RunPhase::Aborted);
            self.report.finished_at = Some(Utc::now());
            return Err(RunAborted {
                report: Box::new(self.report),
                source: e,
            });
        }
        self.enter(RunPhase::Connected);
        self.report.counts_before = self.row_counts("before").await;

        for phase in RunPhase::LOADING {
            self.enter(phase);
            for spec in phase.collections() {
                self.migrate_collection(spec).await;
            }
        }

        self.enter(RunPhase::RepairingConsistency);
        match repair_drop_counts(self.store, self.config.dry_run).await {
            Ok(outcome) => self.report.repair = Some(outcome),
            Err(e) => error!(error = %e, "drop count repair failed; counts may be stale"),
        }
        if !self.config.dry_run {
            self.report.counts_after = self.row_counts("after").await;
        }

        self.enter(RunPhase::Reported);
        self.report.finished_at = Some(Utc::now());
        info!(
            migrated = self.report.stats.total_migrated(),
            errors = self.report.stats.total_errors(),
            "migration run finished"
        );
        Ok(self.report)
    }

    async fn row_counts(&self, label: &'static str) -> Option<TableCounts> {
        match self.store.row_counts().await {
            Ok(counts) => {
                info!(label, ?counts, "target row counts");
                Some(counts)
            }
            Err(e) => {
                warn!(label, error = %e, "could not read target row counts");
                None
            }
        }
    }

    async fn migrate_collection(&mut self, spec: &CollectionSpec) {
        let extractor = Extractor::new(self.source, self.config.scope.clone());
        let stream = match extractor.extract(spec).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(collection = spec.name, error = %e, "collection unreadable; continuing with the next one");
                self.report.unreadable_collections.push(spec.name.to_string());
                return;
            }
        };
        info!(collection = spec.name, kind = %spec.kind, "reading collection");

        let before = self.report.stats.get(spec.kind);
        let progress_every = self.config.progress_every.max(1);
        let mut seen: u64 = 0;
        let mut chunks = stream.chunks(self.config.chunk_size.max(1));
        let mut first_chunk = true;
        while let Some(chunk) = chunks.next().await {
            if !first_chunk && !self.config.chunk_pause.is_zero() {
                tokio::time::sleep(self.config.chunk_pause).await;
            }
            first_chunk = false;
            for item in chunk {
                seen += 1;
                self.migrate_item(spec, item).await;
                if seen % progress_every == 0 {
                    info!(collection = spec.name, seen, "progress");
                }
            }
        }

        let after = self.report.stats.get(spec.kind);
        info!(
            collection = spec.name,
            seen,
            migrated = after.migrated - before.migrated,
            errors = after.errors - before.errors,
            duplicates = after.duplicates - before.duplicates,
            "collection done"
        );
    }

    async fn migrate_item(&mut self, spec: &CollectionSpec, item: Extracted) {
        let doc = match item {
            Extracted::Document(doc) => doc,
            Extracted::OutOfScope(doc_id) => {
                debug!(doc_id, collection = spec.name, "outside project scope");
                self.report.out_of_scope += 1;
                return;
            }
            Extracted::Unreadable(e) => {
                error!(collection = spec.name, kind = %spec.kind, error = %e, "unreadable document");
                self.report.stats.record_error(spec.kind);
                return;
            }
        };
        match spec.kind {
            EntityKind::Project => self.migrate_project(spec, &doc).await,
            EntityKind::Pole => self.migrate_pole(spec, &doc).await,
            EntityKind::Drop => self.migrate_drop(spec, &doc).await,
            EntityKind::ImportBatch => self.migrate_import_batch(spec, &doc).await,
            other => warn!(collection = spec.name, kind = %other, "no loader for kind"),
        }
    }

    fn record_failure(
        &mut self,
        spec: &CollectionSpec,
        doc_id: &str,
        stage: &'static str,
        err: &dyn std::fmt::Display,
    ) {
        error!(doc_id, collection = spec.name, kind = %spec.kind, stage, error = %err, "record failed");
        self.report.stats.record_error(spec.kind);
    }

    fn tally_dependents(&mut self, doc_id: &str, outcomes: Vec<DependentOutcome>) {
        for outcome in outcomes {
            match outcome {
                DependentOutcome::Written(kind) => self.report.stats.record_migrated(kind),
                DependentOutcome::Invalid(kind, e) => {
                    error!(doc_id, kind = %kind, stage = "normalize", error = %e, "dependent record failed");
                    self.report.stats.record_error(kind);
                }
                DependentOutcome::Failed(kind, e) => {
                    error!(doc_id, kind = %kind, stage = "write", error = %e, "dependent record failed");
                    self.report.stats.record_error(kind);
                }
            }
        }
    }

    async fn migrate_project(&mut self, spec: &CollectionSpec, doc: &LegacyDocument) {
        let project = match self.normalizer.project(doc, spec.name) {
            Ok(p) => p,
            Err(e) => return self.record_failure(spec, &doc.id, "normalize", &e),
        };
        match self.loader().load_project(&project).await {
            Ok(id) => {
                debug!(doc_id = doc.id.as_str(), id, "project migrated");
                self.report.stats.record_migrated(EntityKind::Project);
            }
            Err(e) => self.record_failure(spec, &doc.id, "write", &e),
        }
    }

    /// Count `doc` as a duplicate when `number` is already registered for `kind`.
    fn skip_duplicate(
        &mut self,
        spec: &CollectionSpec,
        doc: &LegacyDocument,
        kind: EntityKind,
        number: &str,
    ) -> bool {
        let Some(existing) = self.resolver.resolve(kind, number) else {
            return false;
        };
        warn!(
            doc_id = doc.id.as_str(),
            collection = spec.name,
            %kind,
            number,
            existing,
            "duplicate business number; keeping the first copy"
        );
        self.report.stats.record_duplicate(kind);
        true
    }

    async fn migrate_pole(&mut self, spec: &CollectionSpec, doc: &LegacyDocument) {
        // Raw number first: a later copy is a duplicate even if it would not normalize.
        if let Some(number) = Fields::new(&doc.fields).text("poleNumber") {
            if self.skip_duplicate(spec, doc, EntityKind::Pole, &number) {
                return;
            }
        }
        let pole = match self.normalizer.pole(doc, spec.name) {
            Ok(p) => p,
            Err(e) => return self.record_failure(spec, &doc.id, "normalize", &e),
        };
        if self.skip_duplicate(spec, doc, EntityKind::Pole, &pole.pole_number) {
            return;
        }
        if pole.synthetic_number {
            warn!(doc_id = doc.id.as_str(), pole_number = pole.pole_number.as_str(), "pole without number; using placeholder");
        }

        let proposed = self.resolver.mint(EntityKind::Pole, &pole.pole_number);
        match self.loader().load_pole(&self.resolver, &proposed, &pole).await {
            Ok(loaded) => {
                self.resolver
                    .register(EntityKind::Pole, &pole.pole_number, &loaded.id);
                self.report.stats.record_migrated(EntityKind::Pole);
                debug!(doc_id = doc.id.as_str(), id = loaded.id.as_str(), "pole migrated");
                self.tally_dependents(&doc.id, loaded.dependents);
            }
            Err(e) => self.record_failure(spec, &doc.id, "write", &e),
        }
    }

    async fn migrate_drop(&mut self, spec: &CollectionSpec, doc: &LegacyDocument) {
        if let Some(number) = Fields::new(&doc.fields).text("dropNumber") {
            if self.skip_duplicate(spec, doc, EntityKind::Drop, &number) {
                return;
            }
        }
        let drop = match self.normalizer.drop_record(doc, spec.name, spec.status_hint) {
            Ok(d) => d,
            Err(e) => return self.record_failure(spec, &doc.id, "normalize", &e),
        };
        if self.skip_duplicate(spec, doc, EntityKind::Drop, &drop.drop_number) {
            return;
        }

        let link = match drop.pole_number.as_deref() {
            None => ParentLink::Unresolved,
            Some(pole_number) => match self.resolver.resolve_pole(self.store, pole_number).await {
                Ok(ParentLink::Unresolved) => {
                    warn!(
                        doc_id = doc.id.as_str(),
                        pole_number,
                        "referenced pole not found; storing drop without pole link"
                    );
                    ParentLink::Unresolved
                }
                Ok(link) => link,
                Err(e) => return self.record_failure(spec, &doc.id, "resolve", &e),
            },
        };

        let proposed = self.resolver.mint(EntityKind::Drop, &drop.drop_number);
        match self
            .loader()
            .load_drop(&self.resolver, &proposed, &drop, link.id())
            .await
        {
            Ok(loaded) => {
                self.resolver
                    .register(EntityKind::Drop, &drop.drop_number, &loaded.id);
                if link.id().is_some() {
                    self.report.stats.record_migrated(EntityKind::Drop);
                } else {
                    self.report.stats.record_unlinked(EntityKind::Drop);
                }
                self.tally_dependents(&doc.id, loaded.dependents);
            }
            Err(e) => self.record_failure(spec, &doc.id, "write", &e),
        }
    }

    async fn migrate_import_batch(&mut self, spec: &CollectionSpec, doc: &LegacyDocument) {
        let batch = match self.normalizer.import_batch(doc, spec.name) {
            Ok(b) => b,
            Err(e) => return self.record_failure(spec, &doc.id, "normalize", &e),
        };
        match self.loader().load_import_batch(&batch).await {
            Ok(_) => self.report.stats.record_migrated(EntityKind::ImportBatch),
            Err(e) => self.record_failure(spec, &doc.id, "write", &e),
        }
    }
}

/// Run every phase against `store` and return the report.
pub async fn run_migration(
    source: &dyn LegacySource,
    store: &dyn TargetStore,
    config: MigrationConfig,
) -> Result<RunReport, RunAborted> {
    RunController::new(source, store, config).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::MemoryStore;
    use crate::model::{DropStatus, PoleStatus};
    use crate::source::{DocumentStream, MemorySource, SourceError};
    use async_trait::async_trait;
    use serde_json::json;

    fn fixture() -> MemorySource {
        MemorySource::new()
            .with_doc("projects", "proj-1", json!({"title": "Lawley", "projectCode": "LAW"}))
            .with_doc("projects", "proj-2", json!({"name": "Mohadin"}))
            .with_doc(
                "pole-trackers",
                "pt-1",
                json!({
                    "poleNumber": "P1",
                    "projectId": "proj-1",
                    "status": "Installed",
                    "location": "-26.2041,28.0473",
                    "statusHistory": [{"status": "installed", "changedAt": "2024-03-01T08:00:00Z"}],
                    "uploads": {"front": {"url": "https://cdn.example/p1-front.jpg"}}
                }),
            )
            .with_doc("pole-trackers", "pt-2", json!({"poleNumber": "P2", "projectId": "proj-1"}))
            .with_doc(
                "planned-poles",
                "pp-1",
                json!({"poleNumber": "P1", "projectId": "proj-1", "status": "planned"}),
            )
            .with_doc("planned-poles", "pp-2", json!({"poleNumber": "P3", "projectId": "proj-2"}))
            .with_doc(
                "home-signups",
                "hs-1",
                json!({"dropNumber": "D1", "projectId": "proj-1", "connectedToPole": "P1"}),
            )
            .with_doc(
                "homes-connected",
                "hc-1",
                json!({"dropNumber": "D2", "projectId": "proj-1", "poleNumber": "P1"}),
            )
            .with_doc(
                "drops",
                "dr-1",
                json!({
                    "dropNumber": "D3",
                    "projectId": "proj-1",
                    "connectedToPole": "P404",
                    "status": "weird_status"
                }),
            )
            .with_doc("drops", "dr-2", json!({"dropNumber": "D1", "projectId": "proj-1"}))
            .with_doc(
                "drops",
                "dr-3",
                json!({
                    "dropNumber": "D4",
                    "projectId": "proj-2",
                    "connectedToPole": "P3",
                    "statusHistory": [{"status": "signup_requested"}]
                }),
            )
            .with_doc(
                "import-batches",
                "ib-1",
                json!({"importType": "csv", "projectId": "proj-1", "totalRecords": 3}),
            )
            .with_doc("import-batches", "ib-2", json!({"importType": "xml"}))
    }

    async fn run(source: &MemorySource, store: &MemoryStore, config: MigrationConfig) -> RunReport {
        run_migration(source, store, config).await.unwrap()
    }

    #[tokio::test]
    async fn full_run_loads_links_and_repairs() {
        let store = MemoryStore::new();
        let report = run(&fixture(), &store, MigrationConfig::default()).await;

        assert_eq!(report.final_phase(), RunPhase::Reported);
        assert_eq!(
            report.phases,
            vec![
                RunPhase::Idle,
                RunPhase::Connected,
                RunPhase::LoadingReference,
                RunPhase::LoadingPrimary,
                RunPhase::LoadingDependents,
                RunPhase::LoadingBatches,
                RunPhase::RepairingConsistency,
                RunPhase::Reported,
            ]
        );
        let counts = store.counts();
        assert_eq!(counts.projects, 2);
        assert_eq!(counts.poles, 3);
        assert_eq!(counts.drops, 4);
        assert_eq!(counts.status_history, 2);
        assert_eq!(counts.pole_photos, 1);
        assert_eq!(counts.import_batches, 2);
        assert_eq!(report.counts_after, Some(counts));

        let poles = report.stats.get(EntityKind::Pole);
        assert_eq!((poles.attempted, poles.migrated, poles.duplicates), (4, 3, 1));
        let drops = report.stats.get(EntityKind::Drop);
        assert_eq!((drops.attempted, drops.migrated, drops.duplicates), (5, 4, 1));
        assert_eq!(drops.unlinked, 1);
        assert_eq!(report.stats.total_errors(), 0);

        let p1 = store.pole_by_number("P1").unwrap();
        let location = p1.record.location.unwrap();
        assert_eq!((location.longitude, location.latitude), (28.0473, -26.2041));
        assert_eq!(p1.drop_count, 2);
        assert_eq!(store.pole_by_number("P2").unwrap().drop_count, 0);
        assert_eq!(store.pole_by_number("P3").unwrap().drop_count, 1);
        assert_eq!(report.repair, Some(RepairOutcome::Recomputed { poles: 3 }));
    }

    #[tokio::test]
    async fn first_collection_wins_duplicates() {
        let store = MemoryStore::new();
        run(&fixture(), &store, MigrationConfig::default()).await;
        let p1 = store.pole_by_number("P1").unwrap();
        assert_eq!(p1.record.status, PoleStatus::Installed);
        assert_eq!(p1.record.envelope.source_collection, "pole-trackers");
        assert_eq!(p1.record.envelope.source_id, "pt-1");
        let d1 = store.drop_by_number("D1").unwrap();
        assert_eq!(d1.record.envelope.source_id, "hs-1");
        assert_eq!(d1.record.status, DropStatus::SignupApproved);
    }

    #[tokio::test]
    async fn unresolved_pole_leaves_null_link() {
        let store = MemoryStore::new();
        run(&fixture(), &store, MigrationConfig::default()).await;
        let p1 = store.pole_by_number("P1").unwrap();

        let d3 = store.drop_by_number("D3").unwrap();
        assert_eq!(d3.pole_id, None);
        assert_eq!(d3.record.pole_number.as_deref(), Some("P404"));
        assert_eq!(d3.record.status, DropStatus::SignupRequested);
        assert_eq!(store.drop_by_number("D1").unwrap().pole_id, Some(p1.id.clone()));
        assert_eq!(store.drop_by_number("D2").unwrap().pole_id, Some(p1.id));
        assert_eq!(
            store.drop_by_number("D2").unwrap().record.status,
            DropStatus::Connected
        );
    }

    #[tokio::test]
    async fn rerun_changes_no_row_counts() {
        let store = MemoryStore::new();
        let source = fixture();
        let first = run(&source, &store, MigrationConfig::default()).await;
        let counts = store.counts();
        let p1_id = store.pole_by_number("P1").unwrap().id;

        let second = run(&source, &store, MigrationConfig::default()).await;
        assert_eq!(store.counts(), counts);
        assert_eq!(second.counts_before, Some(counts));
        assert_eq!(store.pole_by_number("P1").unwrap().id, p1_id);
        assert_eq!(first.stats, second.stats);
    }

    #[tokio::test]
    async fn drops_resolve_poles_from_an_earlier_run() {
        let store = MemoryStore::new();
        let poles = MemorySource::new().with_doc("pole-trackers", "pt-1", json!({"poleNumber": "P1"}));
        run(&poles, &store, MigrationConfig::default()).await;
        assert_eq!(store.lookup_count(), 0);

        let drops = MemorySource::new()
            .with_doc("drops", "d-1", json!({"dropNumber": "D1", "connectedToPole": "P1"}))
            .with_doc("drops", "d-2", json!({"dropNumber": "D2", "connectedToPole": "P1"}))
            .with_doc("drops", "d-3", json!({"dropNumber": "D3", "connectedToPole": "NOPE"}));
        let report = run(&drops, &store, MigrationConfig::default()).await;

        let p1 = store.pole_by_number("P1").unwrap();
        assert_eq!(store.drop_by_number("D1").unwrap().pole_id, Some(p1.id.clone()));
        assert_eq!(store.drop_by_number("D2").unwrap().pole_id, Some(p1.id));
        assert_eq!(store.lookup_count(), 2);
        assert_eq!(report.stats.get(EntityKind::Drop).unlinked, 1);
        assert_eq!(p1.drop_count, 2);
    }

    #[tokio::test]
    async fn project_scope_filters_every_phase() {
        let store = MemoryStore::new();
        let config = MigrationConfig::default().project(Some("proj-2".into()));
        let report = run(&fixture(), &store, config).await;

        let counts = store.counts();
        assert_eq!(counts.projects, 1);
        assert_eq!(counts.poles, 1);
        assert_eq!(counts.drops, 1);
        assert_eq!(counts.import_batches, 1);
        assert_eq!(report.out_of_scope, 9);
        assert_eq!(report.project.as_deref(), Some("proj-2"));
        assert!(store.drop_by_number("D4").unwrap().pole_id.is_some());
    }

    #[tokio::test]
    async fn dry_run_matches_live_statistics_without_writing() {
        let live_store = MemoryStore::new();
        let dry_store = MemoryStore::new();
        let source = fixture();
        let live = run(&source, &live_store, MigrationConfig::default()).await;
        let dry = run(&source, &dry_store, MigrationConfig::default().dry_run(true)).await;

        assert_eq!(dry.stats, live.stats);
        assert_eq!(dry_store.write_count(), 0);
        assert_eq!(dry_store.counts(), TableCounts::default());
        assert!(dry_store.lookup_count() > 0);
        assert_eq!(dry.repair, Some(RepairOutcome::SkippedDryRun));
        assert_eq!(dry.counts_after, None);
        assert!(dry.render().contains(DRY_RUN_BANNER));
    }

    #[tokio::test]
    async fn one_malformed_pole_does_not_stop_the_run() {
        let mut source = MemorySource::new();
        for i in 1..=10 {
            let mut fields = json!({"poleNumber": format!("P{i:02}")});
            if i == 5 {
                fields["createdAt"] = json!({"_seconds": "not-a-number"});
            }
            source = source.with_doc("pole-trackers", &format!("doc-{i}"), fields);
        }
        let store = MemoryStore::new();
        let report = run(&source, &store, MigrationConfig::default().chunking(3, 0)).await;

        assert_eq!(report.final_phase(), RunPhase::Reported);
        assert_eq!(store.counts().poles, 9);
        assert!(store.pole_by_number("P05").is_none());
        let poles = report.stats.get(EntityKind::Pole);
        assert_eq!((poles.attempted, poles.migrated, poles.errors), (10, 9, 1));
    }

    #[tokio::test]
    async fn later_copy_with_malformed_fields_is_a_duplicate() {
        let source = MemorySource::new()
            .with_doc("pole-trackers", "pt-1", json!({"poleNumber": "P1"}))
            .with_doc(
                "planned-poles",
                "pp-1",
                json!({"poleNumber": "P1", "createdAt": {"_seconds": "not-a-number"}}),
            )
            .with_doc("drops", "d-1", json!({"dropNumber": "D1"}))
            .with_doc(
                "drops",
                "d-2",
                json!({"dropNumber": "D1", "createdAt": {"_seconds": "not-a-number"}}),
            );
        let store = MemoryStore::new();
        let report = run(&source, &store, MigrationConfig::default()).await;

        let poles = report.stats.get(EntityKind::Pole);
        assert_eq!((poles.migrated, poles.duplicates, poles.errors), (1, 1, 0));
        let drops = report.stats.get(EntityKind::Drop);
        assert_eq!((drops.duplicates, drops.errors), (1, 0));
        assert_eq!(store.pole_by_number("P1").unwrap().record.envelope.source_id, "pt-1");
    }

    #[tokio::test]
    async fn rows_for_an_unknown_project_are_errors() {
        let source = MemorySource::new()
            .with_doc(
                "pole-trackers",
                "pt-1",
                json!({"poleNumber": "P1", "projectId": "no-such-project"}),
            )
            .with_doc(
                "drops",
                "d-1",
                json!({"dropNumber": "D1", "projectId": "no-such-project"}),
            );
        let store = MemoryStore::new();
        let report = run(&source, &store, MigrationConfig::default()).await;

        assert_eq!(report.final_phase(), RunPhase::Reported);
        assert_eq!(store.counts().poles, 0);
        assert_eq!(store.counts().drops, 0);
        assert_eq!(report.stats.get(EntityKind::Pole).errors, 1);
        assert_eq!(report.stats.get(EntityKind::Drop).errors, 1);
    }

    #[tokio::test]
    async fn rejected_writes_are_tallied_per_kind() {
        let store = MemoryStore::new();
        store.reject_kind(EntityKind::Photo);
        store.reject_key("P2");
        let report = run(&fixture(), &store, MigrationConfig::default()).await;

        assert_eq!(store.counts().poles, 2);
        assert_eq!(store.counts().pole_photos, 0);
        let photos = report.stats.get(EntityKind::Photo);
        assert_eq!((photos.migrated, photos.errors), (0, 1));
        assert_eq!(report.stats.get(EntityKind::Pole).errors, 1);
        assert_eq!(report.stats.get(EntityKind::StatusHistory).migrated, 2);
    }

    struct BrokenCollection {
        inner: MemorySource,
        broken: &'static str,
    }

    #[async_trait]
    impl LegacySource for BrokenCollection {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn documents(&self, collection: &str) -> Result<DocumentStream, SourceError> {
            if collection == self.broken {
                return Err(SourceError::Io {
                    path: collection.into(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            self.inner.documents(collection).await
        }
    }

    #[tokio::test]
    async fn unreadable_collection_is_skipped() {
        let source = BrokenCollection {
            inner: fixture(),
            broken: "planned-poles",
        };
        let store = MemoryStore::new();
        let report = run_migration(&source, &store, MigrationConfig::default())
            .await
            .unwrap();

        assert_eq!(report.unreadable_collections, vec!["planned-poles".to_string()]);
        assert_eq!(store.counts().poles, 2);
        assert_eq!(store.counts().drops, 4);
        assert_eq!(store.drop_by_number("D4").unwrap().pole_id, None);
    }

    #[tokio::test]
    async fn unreachable_store_aborts_before_loading() {
        let store = MemoryStore::offline();
        let err = run_migration(&fixture(), &store, MigrationConfig::default())
            .await
            .unwrap_err();

        assert_eq!(err.report.final_phase(), RunPhase::Aborted);
        assert_eq!(err.report.stats.total_migrated(), 0);
        assert!(err.report.render().contains("run aborted"));
        assert!(matches!(err.source, StoreError::Rejected(_)));
    }
}
