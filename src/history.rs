// 🧠 Match History - learned sale name → catalog name associations
//
// Confirmed matches are remembered under the normalized sale name so the next
// preview for the same name can skip fuzzy matching entirely.
//
// This is the only mutable shared state in the engine. Reads take a snapshot
// under the read lock; every write completes under the write lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

pub type HistoryMap = BTreeMap<String, Vec<MatchHistoryEntry>>;

// ============================================================================
// HISTORY ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchHistoryEntry {
    #[serde(alias = "parName")]
    pub catalog_name: String,
    pub conversion_rate: f64,
    pub unit: Option<String>,
    pub last_used: DateTime<Utc>,
    pub use_count: u32,
}

impl MatchHistoryEntry {
    fn same_tuple(&self, catalog_name: &str, conversion_rate: f64, unit: Option<&str>) -> bool {
        self.catalog_name == catalog_name
            && self.conversion_rate == conversion_rate
            && self.unit.as_deref() == unit
    }
}

/// Trim + lowercase
pub fn normalize_sale_name(sale_name: &str) -> String {
    sale_name.trim().to_lowercase()
}

// ============================================================================
// HISTORY STORE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MatchHistoryStore {
    entries: Arc<RwLock<HistoryMap>>,
}

impl MatchHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a map loaded by the persistence layer
    pub fn from_map(map: HistoryMap) -> Self {
        MatchHistoryStore {
            entries: Arc::new(RwLock::new(map)),
        }
    }

    // Writers never leave the map half-updated, so a poisoned lock is still usable
    fn read(&self) -> RwLockReadGuard<'_, HistoryMap> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HistoryMap> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a confirmed match now
    pub fn record(&self, sale_name: &str, catalog_name: &str, conversion_rate: f64, unit: Option<&str>) {
        self.record_at(sale_name, catalog_name, conversion_rate, unit, Utc::now());
    }

    /// Bump `use_count` of an identical (catalog, rate, unit) tuple, else append a new entry
    pub fn record_at(
        &self,
        sale_name: &str,
        catalog_name: &str,
        conversion_rate: f64,
        unit: Option<&str>,
        at: DateTime<Utc>,
    ) {
        let key = normalize_sale_name(sale_name);
        let mut map = self.write();
        let list = map.entry(key.clone()).or_default();

        match list
            .iter()
            .position(|entry| entry.same_tuple(catalog_name, conversion_rate, unit))
        {
            Some(index) => {
                let existing = &mut list[index];
                existing.use_count += 1;
                existing.last_used = at;
                debug!(sale = %key, catalog = catalog_name, uses = existing.use_count, "match history reinforced");
            }
            None => {
                list.push(MatchHistoryEntry {
                    catalog_name: catalog_name.to_string(),
                    conversion_rate,
                    unit: unit.map(|u| u.to_string()),
                    last_used: at,
                    use_count: 1,
                });
                debug!(sale = %key, catalog = catalog_name, "match history entry added");
            }
        }
    }

    /// All remembered matches for a sale name
    pub fn entries(&self, sale_name: &str) -> Vec<MatchHistoryEntry> {
        self.read()
            .get(&normalize_sale_name(sale_name))
            .cloned()
            .unwrap_or_default()
    }

    /// Most used entry, most recent on equal counts
    pub fn best_match(&self, sale_name: &str) -> Option<MatchHistoryEntry> {
        let mut entries = self.entries(sale_name);

        entries.sort_by(|a, b| {
            b.use_count
                .cmp(&a.use_count)
                .then_with(|| b.last_used.cmp(&a.last_used))
        });

        entries.into_iter().next()
    }

    pub fn contains(&self, sale_name: &str) -> bool {
        self.read().contains_key(&normalize_sale_name(sale_name))
    }

    /// Copy of the whole map for persistence
    pub fn snapshot(&self) -> HistoryMap {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_record_appends_then_increments() {
        let store = MatchHistoryStore::new();

        store.record_at("Chang", "Beer, Chang, 32cl", 1.0, Some("Beer"), at(8));
        store.record_at("  CHANG ", "Beer, Chang, 32cl", 1.0, Some("Beer"), at(9));

        let entries = store.entries("chang");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].use_count, 2);
        assert_eq!(entries[0].last_used, at(9));
    }

    #[test]
    fn test_distinct_tuples_are_separate_entries() {
        let store = MatchHistoryStore::new();

        store.record_at("House red", "Wine, Merlot, 75cl", 0.2, Some("Glass"), at(8));
        store.record_at("House red", "Wine, Merlot, 75cl", 1.0, Some("Glass"), at(8));
        store.record_at("House red", "Wine, Merlot, 75cl", 0.2, None, at(8));

        assert_eq!(store.entries("house red").len(), 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_best_match_prefers_use_count_then_recency() {
        let store = MatchHistoryStore::new();

        store.record_at("Leo", "Beer, Leo, 33cl", 1.0, None, at(8));
        store.record_at("Leo", "Beer, Leo, 33cl", 1.0, None, at(9));
        store.record_at("Leo", "Beer, Leo, 62cl", 1.0, None, at(12));

        let best = store.best_match("leo").unwrap();
        assert_eq!(best.catalog_name, "Beer, Leo, 33cl");

        store.record_at("Leo", "Beer, Leo, 62cl", 1.0, None, at(13));
        let best = store.best_match("leo").unwrap();
        // 2 uses each, 62cl used more recently
        assert_eq!(best.catalog_name, "Beer, Leo, 62cl");
    }

    #[test]
    fn test_unknown_name_has_no_history() {
        let store = MatchHistoryStore::new();

        assert!(store.best_match("Singha").is_none());
        assert!(store.entries("Singha").is_empty());
        assert!(!store.contains("Singha"));
    }

    #[test]
    fn test_snapshot_round_trips_through_from_map() {
        let store = MatchHistoryStore::new();
        store.record_at("Chang", "Beer, Chang, 32cl", 1.0, None, at(8));

        let restored = MatchHistoryStore::from_map(store.snapshot());
        assert_eq!(restored.entries("Chang"), store.entries("Chang"));
    }

    #[test]
    fn test_clones_share_state() {
        let store = MatchHistoryStore::new();
        let shared = store.clone();

        shared.record_at("Chang", "Beer, Chang, 32cl", 1.0, None, at(8));
        assert!(store.contains("chang"));
    }
}
