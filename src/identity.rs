//! Run-scoped identity bookkeeping: business key → stable target id.
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database_ops::{StoreError, TargetStore};
use crate::model::EntityKind;

/// Namespace for ids derived from a parent id, so dependent rows land on the
/// same primary key every time the same parent is migrated.
const DEPENDENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_2c4e_9a37_4d08_b5e1_0c7d_3f92_a641);

/// Where a child's parent reference was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentLink {
    /// Registered earlier in this run.
    InRun(String),
    /// Loaded by a previous run; found by the target-store lookup.
    FromStore(String),
    /// Found nowhere; the child is stored without a parent link.
    Unresolved,
}

impl ParentLink {
    pub fn id(&self) -> Option<&str> {
        match self {
            ParentLink::InRun(id) | ParentLink::FromStore(id) => Some(id),
            ParentLink::Unresolved => None,
        }
    }
}

/// Owned by exactly one run; construct a fresh one per run.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    registered: HashMap<EntityKind, HashMap<String, String>>,
    store_hits: HashMap<String, String>,
    store_misses: HashSet<String>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target id already registered for `business_number` in this run.
    pub fn resolve(&self, kind: EntityKind, business_number: &str) -> Option<&str> {
        self.registered
            .get(&kind)
            .and_then(|m| m.get(business_number))
            .map(String::as_str)
    }

    /// Mint a fresh opaque id. Does not register it.
    pub fn mint(&self, kind: EntityKind, business_number: &str) -> String {
        let id = Uuid::new_v4().to_string();
        debug!(%kind, business_number, id, "minted id");
        id
    }

    /// Record `business_number → id`. The first registration wins.
    pub fn register(&mut self, kind: EntityKind, business_number: &str, id: &str) {
        let slot = self.registered.entry(kind).or_default();
        if let Some(existing) = slot.get(business_number) {
            if existing != id {
                warn!(%kind, business_number, existing = existing.as_str(), ignored = id, "business number already registered");
            }
            return;
        }
        slot.insert(business_number.to_string(), id.to_string());
    }

    pub fn registered_count(&self, kind: EntityKind) -> usize {
        self.registered.get(&kind).map_or(0, HashMap::len)
    }

    /// Deterministic id for a dependent row, derived from its parent and position.
    pub fn dependent_id(&self, kind: EntityKind, parent_id: &str, discriminator: &str) -> String {
        let name = format!("{kind}:{parent_id}:{discriminator}");
        Uuid::new_v5(&DEPENDENT_ID_NAMESPACE, name.as_bytes()).to_string()
    }

    /// Two-tier pole lookup: this run's registrations, then one point query
    /// against the target store. Store answers are cached for the rest of the run.
    pub async fn resolve_pole(
        &mut self,
        store: &dyn TargetStore,
        pole_number: &str,
    ) -> Result<ParentLink, StoreError> {
        if let Some(id) = self.resolve(EntityKind::Pole, pole_number) {
            return Ok(ParentLink::InRun(id.to_string()));
        }
        if let Some(id) = self.store_hits.get(pole_number) {
            return Ok(ParentLink::FromStore(id.clone()));
        }
        if self.store_misses.contains(pole_number) {
            return Ok(ParentLink::Unresolved);
        }
        match store.find_pole_id(pole_number).await? {
            Some(id) => {
                debug!(pole_number, id, "pole resolved from target store");
                self.store_hits.insert(pole_number.to_string(), id.clone());
                Ok(ParentLink::FromStore(id))
            }
            None => {
                self.store_misses.insert(pole_number.to_string());
                Ok(ParentLink::Unresolved)
            }
        }
    }
}
