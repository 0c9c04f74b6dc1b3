// 📅 Catalog Periods - versioned PAR stock snapshots
//
// Each catalog is authoritative from its start date until the day before the
// next catalog starts (or today for the newest one). The active catalog for a
// date D is the one with the latest start date <= D.
//
// Uploads replace a period wholesale. The only surgical edits are composite
// placeholders, which arrive as CatalogMutation values and are applied here
// by the single writer that owns the catalogs.

use crate::models::{CatalogItem, CatalogSnapshot};
use crate::period::DateWindow;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

// ============================================================================
// CATALOG MUTATION
// ============================================================================

/// Catalog edit requested by composite registration, applied by persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CatalogMutation {
    /// Insert a zero-stock entry into the newest catalog
    AddPlaceholder { name: String },

    /// Drop the entry from every catalog holding it
    RemovePlaceholder { name: String },
}

impl CatalogMutation {
    pub fn name(&self) -> &str {
        match self {
            CatalogMutation::AddPlaceholder { name } => name,
            CatalogMutation::RemovePlaceholder { name } => name,
        }
    }
}

// ============================================================================
// CATALOG HISTORY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogHistory {
    periods: BTreeMap<NaiveDate, CatalogSnapshot>,
}

impl CatalogHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshots(snapshots: Vec<CatalogSnapshot>) -> Self {
        let mut history = CatalogHistory::new();
        for snapshot in snapshots {
            history.insert(snapshot);
        }
        history
    }

    /// Replace (never merge) the period starting at `snapshot.start_date`
    pub fn insert(&mut self, snapshot: CatalogSnapshot) {
        debug!(start = %snapshot.start_date, items = snapshot.items.len(), "catalog period stored");
        self.periods.insert(snapshot.start_date, snapshot);
    }

    pub fn get(&self, start_date: NaiveDate) -> Option<&CatalogSnapshot> {
        self.periods.get(&start_date)
    }

    /// Start dates, newest first
    pub fn periods(&self) -> Vec<NaiveDate> {
        self.periods.keys().rev().copied().collect()
    }

    pub fn latest(&self) -> Option<&CatalogSnapshot> {
        self.periods.values().next_back()
    }

    /// Catalog with the latest start date <= `date`
    pub fn active_for(&self, date: NaiveDate) -> Option<&CatalogSnapshot> {
        self.periods.range(..=date).next_back().map(|(_, snapshot)| snapshot)
    }

    /// Inclusive window in which the period starting at `start_date` is authoritative
    pub fn valid_window(&self, start_date: NaiveDate, today: NaiveDate) -> Option<DateWindow> {
        if !self.periods.contains_key(&start_date) {
            return None;
        }

        let next_start = self
            .periods
            .range(start_date..)
            .map(|(date, _)| *date)
            .find(|date| *date > start_date);

        let end = match next_start {
            Some(next) => next - Duration::days(1),
            None => today,
        };

        Some(DateWindow { start: start_date, end })
    }

    /// Apply a placeholder edit. Returns true if any catalog changed.
    pub fn apply(&mut self, mutation: &CatalogMutation) -> bool {
        match mutation {
            CatalogMutation::AddPlaceholder { name } => {
                let Some(latest) = self.periods.values_mut().next_back() else {
                    info!(composite = %name, "no catalog available for composite placeholder");
                    return false;
                };

                if latest.items.iter().any(|item| item.same_name(name)) {
                    debug!(composite = %name, start = %latest.start_date, "placeholder already present");
                    return false;
                }

                latest.items.push(CatalogItem::placeholder(name));
                info!(composite = %name, start = %latest.start_date, "placeholder added to catalog");
                true
            }
            CatalogMutation::RemovePlaceholder { name } => {
                let mut removed = false;

                for snapshot in self.periods.values_mut() {
                    let before = snapshot.items.len();
                    snapshot.items.retain(|item| !item.same_name(name));
                    removed |= snapshot.items.len() < before;
                }

                if removed {
                    info!(composite = %name, "placeholder removed from catalogs");
                }
                removed
            }
        }
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &CatalogSnapshot> {
        self.periods.values()
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn history() -> CatalogHistory {
        CatalogHistory::from_snapshots(vec![
            CatalogSnapshot::new(date("2025-01-01"), vec![CatalogItem::new("Beer, Leo, 33cl", "Beer", 24.0)]),
            CatalogSnapshot::new(date("2025-02-01"), vec![CatalogItem::new("Beer, Leo, 33cl", "Beer", 48.0)]),
        ])
    }

    #[test]
    fn test_active_for_picks_latest_start_not_after_date() {
        let catalogs = history();

        assert_eq!(catalogs.active_for(date("2024-12-31")), None);
        assert_eq!(catalogs.active_for(date("2025-01-31")).unwrap().start_date, date("2025-01-01"));
        assert_eq!(catalogs.active_for(date("2025-02-01")).unwrap().start_date, date("2025-02-01"));
        assert_eq!(catalogs.active_for(date("2026-06-01")).unwrap().start_date, date("2025-02-01"));
    }

    #[test]
    fn test_valid_window() {
        let catalogs = history();
        let today = date("2025-02-20");

        let first = catalogs.valid_window(date("2025-01-01"), today).unwrap();
        assert_eq!(first.end, date("2025-01-31"));

        let latest = catalogs.valid_window(date("2025-02-01"), today).unwrap();
        assert_eq!(latest.end, today);

        assert!(catalogs.valid_window(date("2025-01-15"), today).is_none());
    }

    #[test]
    fn test_insert_replaces_wholesale() {
        let mut catalogs = history();
        catalogs.insert(CatalogSnapshot::new(date("2025-02-01"), vec![CatalogItem::new("Gin, Nakin, 750ml", "Spirit", 6.0)]));

        let snapshot = catalogs.get(date("2025-02-01")).unwrap();
        assert_eq!(snapshot.names(), vec!["Gin, Nakin, 750ml".to_string()]);
        assert_eq!(catalogs.periods(), vec![date("2025-02-01"), date("2025-01-01")]);
    }

    #[test]
    fn test_add_placeholder_targets_latest_once() {
        let mut catalogs = history();
        let add = CatalogMutation::AddPlaceholder { name: "Margarita".to_string() };

        assert!(catalogs.apply(&add));
        assert!(!catalogs.apply(&add));

        let latest = catalogs.latest().unwrap();
        let placeholder = latest.find("Margarita").unwrap();
        assert_eq!(placeholder.opening_stock, 0.0);
        assert!(catalogs.get(date("2025-01-01")).unwrap().find("Margarita").is_none());
    }

    #[test]
    fn test_add_placeholder_without_catalog_is_noop() {
        let mut catalogs = CatalogHistory::new();
        assert!(!catalogs.apply(&CatalogMutation::AddPlaceholder { name: "Negroni".to_string() }));
    }

    #[test]
    fn test_remove_placeholder_is_case_insensitive_across_periods() {
        let mut catalogs = history();
        catalogs.apply(&CatalogMutation::AddPlaceholder { name: "Margarita".to_string() });

        assert!(catalogs.apply(&CatalogMutation::RemovePlaceholder { name: "margarita ".to_string() }));
        assert!(catalogs.latest().unwrap().find("Margarita").is_none());
        assert!(!catalogs.apply(&CatalogMutation::RemovePlaceholder { name: "Margarita".to_string() }));
    }
}
