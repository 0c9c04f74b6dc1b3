// 🗓️ Date Windows - inclusive ranges over date-keyed snapshots
//
// Both endpoints are always included. Windows are validated at the boundary:
// an end date before the start date is rejected before any aggregation.

use crate::error::{ReconError, ReconResult};
use crate::models::{SalesSnapshot, TransfersSnapshot};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> ReconResult<Self> {
        if end < start {
            return Err(ReconError::invalid(
                "endDate",
                format!("end date {} is before start date {}", end, start),
            ));
        }
        Ok(DateWindow { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        DateWindow { start: date, end: date }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// True for a window that ends before it starts (a period starting in the future)
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Whole calendar month
    pub fn month(year: i32, month: u32) -> ReconResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| ReconError::invalid("month", format!("{}-{:02} is not a month", year, month)))?;

        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|first| first.pred_opt())
            .ok_or_else(|| ReconError::invalid("month", format!("{}-{:02} is out of range", year, month)))?;

        Ok(DateWindow { start, end })
    }
}

// ============================================================================
// RANGE TOTALS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameTotal {
    pub name: String,
    pub category: String,
    pub total_qty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeTotals {
    pub window: DateWindow,
    pub days: usize,
    pub total_qty: f64,
    pub total_items: usize,

    /// Sorted by quantity, highest first
    pub items: Vec<NameTotal>,
}

/// Raw sold quantities per name over a window; None when no sales day falls inside it
pub fn range_totals(sales: &SalesSnapshot, window: DateWindow) -> Option<RangeTotals> {
    let mut by_name: BTreeMap<&str, NameTotal> = BTreeMap::new();
    let mut days = 0;
    let mut total_qty = 0.0;
    let mut total_items = 0;

    if window.is_empty() {
        return None;
    }

    for daily in sales.range(window.start..=window.end).map(|(_, daily)| daily) {
        days += 1;
        for record in &daily.items {
            total_qty += record.qty;
            total_items += 1;

            let entry = by_name.entry(record.name.as_str()).or_insert_with(|| NameTotal {
                name: record.name.clone(),
                category: String::new(),
                total_qty: 0.0,
            });
            entry.total_qty += record.qty;
            if entry.category.is_empty() && !record.category.is_empty() {
                entry.category = record.category.clone();
            }
        }
    }

    if days == 0 {
        return None;
    }

    let mut items: Vec<NameTotal> = by_name.into_values().collect();
    items.sort_by(|a, b| b.total_qty.total_cmp(&a.total_qty));

    Some(RangeTotals {
        window,
        days,
        total_qty,
        total_items,
        items,
    })
}

pub fn monthly_totals(sales: &SalesSnapshot, year: i32, month: u32) -> ReconResult<Option<RangeTotals>> {
    Ok(range_totals(sales, DateWindow::month(year, month)?))
}

/// Dates holding sales inside the window, newest first
pub fn dates_in_period(sales: &SalesSnapshot, window: DateWindow) -> Vec<NaiveDate> {
    if window.is_empty() {
        return Vec::new();
    }

    sales
        .range(window.start..=window.end)
        .rev()
        .map(|(date, _)| *date)
        .collect()
}

/// Dates holding transfers, newest first
pub fn transfer_dates(transfers: &TransfersSnapshot) -> Vec<NaiveDate> {
    transfers.keys().rev().copied().collect()
}

/// Year-month keys ("2025-03") with sales, newest first
pub fn months_with_sales(sales: &SalesSnapshot) -> Vec<String> {
    let mut months: Vec<String> = sales
        .keys()
        .map(|date| format!("{}-{:02}", date.year(), date.month()))
        .collect();
    months.dedup();
    months.reverse();
    months
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    pub total_days: usize,
    pub total_months: usize,
    pub latest_date: Option<NaiveDate>,
    pub oldest_date: Option<NaiveDate>,
}

pub fn snapshot_stats(sales: &SalesSnapshot) -> SnapshotStats {
    SnapshotStats {
        total_days: sales.len(),
        total_months: months_with_sales(sales).len(),
        latest_date: sales.keys().next_back().copied(),
        oldest_date: sales.keys().next().copied(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailySales, DailyTransfers, SaleRecord, TransferDirection};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sales() -> SalesSnapshot {
        let mut snapshot = SalesSnapshot::new();
        for (day, entries) in [
            ("2025-02-27", vec![("Chang", 3.0, "Beer")]),
            ("2025-03-01", vec![("Chang", 2.0, ""), ("Leo", 5.0, "Beer")]),
            ("2025-03-02", vec![("Chang", 4.0, "Beer")]),
        ] {
            let d = date(day);
            snapshot.insert(
                d,
                DailySales {
                    date: d,
                    uploaded_at: None,
                    items: entries
                        .into_iter()
                        .map(|(name, qty, category)| SaleRecord::new(d, name, qty, category))
                        .collect(),
                },
            );
        }
        snapshot
    }

    #[test]
    fn test_window_validation() {
        assert!(DateWindow::new(date("2025-03-02"), date("2025-03-01")).is_err());

        let window = DateWindow::new(date("2025-03-01"), date("2025-03-01")).unwrap();
        assert!(window.contains(date("2025-03-01")));
        assert!(!window.contains(date("2025-03-02")));
    }

    #[test]
    fn test_month_window() {
        let feb = DateWindow::month(2024, 2).unwrap();
        assert_eq!(feb.end, date("2024-02-29"));

        let dec = DateWindow::month(2025, 12).unwrap();
        assert_eq!(dec.end, date("2025-12-31"));

        assert!(DateWindow::month(2025, 13).is_err());
    }

    #[test]
    fn test_range_totals_inclusive_endpoints() {
        let window = DateWindow::new(date("2025-03-01"), date("2025-03-02")).unwrap();
        let totals = range_totals(&sales(), window).unwrap();

        assert_eq!(totals.days, 2);
        assert_eq!(totals.total_qty, 11.0);
        assert_eq!(totals.items[0].name, "Chang");
        assert_eq!(totals.items[0].total_qty, 6.0);
        // category filled from the first record that has one
        assert_eq!(totals.items[0].category, "Beer");
    }

    #[test]
    fn test_range_totals_empty_window() {
        let window = DateWindow::single(date("2025-01-01"));
        assert!(range_totals(&sales(), window).is_none());
    }

    #[test]
    fn test_monthly_totals_and_dates() {
        let march = monthly_totals(&sales(), 2025, 3).unwrap().unwrap();
        assert_eq!(march.days, 2);

        let window = DateWindow::new(date("2025-02-01"), date("2025-03-31")).unwrap();
        assert_eq!(
            dates_in_period(&sales(), window),
            vec![date("2025-03-02"), date("2025-03-01"), date("2025-02-27")]
        );
    }

    #[test]
    fn test_snapshot_stats() {
        let stats = snapshot_stats(&sales());

        assert_eq!(stats.total_days, 3);
        assert_eq!(stats.total_months, 2);
        assert_eq!(stats.latest_date, Some(date("2025-03-02")));
        assert_eq!(stats.oldest_date, Some(date("2025-02-27")));
        assert_eq!(months_with_sales(&sales()), vec!["2025-03", "2025-02"]);
    }

    #[test]
    fn test_transfer_dates_newest_first() {
        let transfers: TransfersSnapshot = ["2025-03-04", "2025-03-01", "2025-03-09"]
            .iter()
            .map(|day| {
                let d = date(day);
                (d, DailyTransfers { date: d, uploaded_at: None, direction: TransferDirection::In, items: vec![] })
            })
            .collect();

        assert_eq!(
            transfer_dates(&transfers),
            vec![date("2025-03-09"), date("2025-03-04"), date("2025-03-01")]
        );
        assert!(transfer_dates(&TransfersSnapshot::new()).is_empty());
    }
}
