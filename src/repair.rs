use tracing::{info, instrument};

use crate::database_ops::{StoreError, TargetStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Every pole's drop count was recomputed from linked drop rows.
    Recomputed { poles: u64 },
    SkippedDryRun,
}

/// Recompute per-pole drop counts in one bulk statement.
#[instrument(skip(store))]
pub async fn repair_drop_counts(
    store: &dyn TargetStore,
    dry_run: bool,
) -> Result<RepairOutcome, StoreError> {
    if dry_run {
        info!("dry run: skipping drop count recomputation");
        return Ok(RepairOutcome::SkippedDryRun);
    }
    let poles = store.recompute_drop_counts().await?;
    info!(poles, "drop counts recomputed");
    Ok(RepairOutcome::Recomputed { poles })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::MemoryStore;
    use crate::normalization::Normalizer;
    use crate::source::LegacyDocument;
    use serde_json::json;

    #[tokio::test]
    async fn stale_counts_are_overwritten() {
        let store = MemoryStore::new();
        let n = Normalizer::default();
        let doc = |id: &str, v: serde_json::Value| LegacyDocument::new(id, v.as_object().cloned().unwrap());

        let p1 = n.pole(&doc("a", json!({"poleNumber": "P1", "dropCount": 9})), "pole-trackers").unwrap();
        let p2 = n.pole(&doc("b", json!({"poleNumber": "P2"})), "pole-trackers").unwrap();
        store.upsert_pole("p1", &p1).await.unwrap();
        store.upsert_pole("p2", &p2).await.unwrap();
        for (i, pole) in [Some("p1"), Some("p1"), None].into_iter().enumerate() {
            let d = n
                .drop_record(&doc(&format!("d{i}"), json!({"dropNumber": format!("D{i}")})), "drops", None)
                .unwrap();
            store.upsert_drop(&format!("d{i}"), &d, pole).await.unwrap();
        }
        store.set_drop_count("p2", 5);

        let dry = repair_drop_counts(&store, true).await.unwrap();
        assert_eq!(dry, RepairOutcome::SkippedDryRun);
        assert_eq!(store.pole_by_number("P1").unwrap().drop_count, 9);

        let out = repair_drop_counts(&store, false).await.unwrap();
        assert_eq!(out, RepairOutcome::Recomputed { poles: 2 });
        assert_eq!(store.pole_by_number("P1").unwrap().drop_count, 2);
        assert_eq!(store.pole_by_number("P2").unwrap().drop_count, 0);
    }
}
