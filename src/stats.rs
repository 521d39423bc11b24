//! Per-kind run counters and the end-of-run summary.
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::database_ops::TableCounts;
use crate::model::EntityKind;

/// `attempted == migrated + errors + duplicates` holds at all times;
/// `unlinked` is a subset of `migrated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub attempted: u64,
    pub migrated: u64,
    pub errors: u64,
    pub duplicates: u64,
    pub unlinked: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStats {
    kinds: BTreeMap<EntityKind, KindStats>,
}

impl Default for MigrationStats {
    fn default() -> Self {
        Self {
            kinds: EntityKind::ALL
                .iter()
                .map(|k| (*k, KindStats::default()))
                .collect(),
        }
    }
}

impl MigrationStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, kind: EntityKind) -> &mut KindStats {
        self.kinds.entry(kind).or_default()
    }

    pub fn record_migrated(&mut self, kind: EntityKind) {
        let s = self.entry(kind);
        s.attempted += 1;
        s.migrated += 1;
    }

    /// Migrated, but stored without its parent link.
    pub fn record_unlinked(&mut self, kind: EntityKind) {
        let s = self.entry(kind);
        s.attempted += 1;
        s.migrated += 1;
        s.unlinked += 1;
    }

    pub fn record_error(&mut self, kind: EntityKind) {
        let s = self.entry(kind);
        s.attempted += 1;
        s.errors += 1;
    }

    pub fn record_duplicate(&mut self, kind: EntityKind) {
        let s = self.entry(kind);
        s.attempted += 1;
        s.duplicates += 1;
    }

    pub fn get(&self, kind: EntityKind) -> KindStats {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }

    pub fn total_errors(&self) -> u64 {
        self.kinds.values().map(|s| s.errors).sum()
    }

    pub fn total_migrated(&self) -> u64 {
        self.kinds.values().map(|s| s.migrated).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, KindStats)> + '_ {
        self.kinds.iter().map(|(k, s)| (*k, *s))
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();
        writeln!(
            out,
            "{:<16} {:>9} {:>9} {:>7} {:>10} {:>9}",
            "kind", "attempted", "migrated", "errors", "duplicates", "unlinked"
        )
        .ok();
        for (kind, s) in self.iter() {
            writeln!(
                out,
                "{:<16} {:>9} {:>9} {:>7} {:>10} {:>9}",
                kind.as_str(),
                s.attempted,
                s.migrated,
                s.errors,
                s.duplicates,
                s.unlinked
            )
            .ok();
        }
        out
    }
}

pub const DRY_RUN_BANNER: &str = "DRY RUN: no rows were written to the target store";

/// Two-column before/after table; `after` is absent on dry and aborted runs.
pub fn render_row_counts(before: &TableCounts, after: Option<&TableCounts>) -> String {
    let mut out = String::new();
    writeln!(out, "{:<16} {:>10} {:>10}", "table", "before", "after").ok();
    let after_rows = after.map(TableCounts::rows);
    for (i, (table, n)) in before.rows().iter().enumerate() {
        let after_cell = after_rows
            .as_ref()
            .map(|rows| rows[i].1.to_string())
            .unwrap_or_else(|| "-".into());
        writeln!(out, "{table:<16} {n:>10} {after_cell:>10}").ok();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempted_is_the_sum_of_outcomes() {
        let mut s = MigrationStats::new();
        s.record_migrated(EntityKind::Drop);
        s.record_unlinked(EntityKind::Drop);
        s.record_error(EntityKind::Drop);
        s.record_duplicate(EntityKind::Drop);
        let d = s.get(EntityKind::Drop);
        assert_eq!(d.attempted, 4);
        assert_eq!(d.attempted, d.migrated + d.errors + d.duplicates);
        assert_eq!(d.unlinked, 1);
        assert_eq!(s.total_errors(), 1);
        assert_eq!(s.get(EntityKind::Photo), KindStats::default());
    }

    #[test]
    fn table_lists_every_kind_in_order() {
        let table = MigrationStats::new().render_table();
        let kinds: Vec<&str> = table
            .lines()
            .skip(1)
            .filter_map(|l| l.split_whitespace().next())
            .collect();
        assert_eq!(
            kinds,
            ["project", "pole", "drop", "status_history", "photo", "import_batch"]
        );
    }

    #[test]
    fn row_counts_without_after_column() {
        let before = TableCounts {
            poles: 3,
            ..Default::default()
        };
        let out = render_row_counts(&before, None);
        let poles = out.lines().find(|l| l.starts_with("poles")).unwrap();
        assert_eq!(poles.split_whitespace().collect::<Vec<_>>(), ["poles", "3", "-"]);
    }
}
