// ⚖️ Reconciliation Engine - PAR stock against consumption
//
// Balance identity for every catalog line:
//   remaining = opening_stock − converted_sold_qty + transfer_qty
//
// Sales and transfers are aggregated per name over an inclusive window, then
// catalog names are matched to aggregated sale names. Every call is a pure
// function of the snapshots passed in; nothing is cached between calls.

use crate::catalog::CatalogHistory;
use crate::config::ReconConfig;
use crate::conversion::{conversion_rate, convert_qty, summarize_conversion, unit_label, ConversionSummary};
use crate::error::{ReconError, ReconResult};
use crate::history::{normalize_sale_name, MatchHistoryStore};
use crate::matching::{find_best_match, match_items};
use crate::models::{
    CatalogSnapshot, RawTransfer, SaleRecord, SalesSnapshot, TransferDirection, TransferRecord,
    TransfersSnapshot,
};
use crate::period::DateWindow;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Unit reported when the operator picked the rate explicitly
const EXPLICIT_RATE_UNIT: &str = "Bottle";

/// Category given to transfer lines that match no catalog entry
const UNKNOWN_CATEGORY: &str = "Unknown";

// ============================================================================
// REPORT LINES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    CatalogItem,

    /// Sold in the window but matched to no catalog entry in either direction
    UnmatchedSale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationLine {
    pub catalog_name: String,

    /// Sale name used for this line when it differs from the catalog name
    pub matched_sale_name: Option<String>,

    pub match_score: f64,
    pub category: String,
    pub opening_stock: f64,
    pub sold_qty_raw: f64,
    pub sold_qty_converted: f64,

    /// Signed: inbound positive, outbound negative
    pub transfer_qty: f64,

    pub conversion_rate: Option<f64>,
    pub unit: String,
    pub remaining: f64,
    pub usage_percent: f64,
    pub needs_reorder: bool,
    pub kind: LineKind,
}

/// remaining, usage %, reorder flag
fn balance(opening_stock: f64, converted: f64, transfer_qty: f64, reorder_fraction: f64) -> (f64, f64, bool) {
    let remaining = opening_stock - converted + transfer_qty;
    let usage_percent = if opening_stock > 0.0 {
        converted / opening_stock * 100.0
    } else {
        0.0
    };

    (remaining, usage_percent, remaining < opening_stock * reorder_fraction)
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub catalog_start_date: NaiveDate,

    /// Valid window of the catalog period
    pub window: DateWindow,

    /// Set when the report was narrowed to one day
    pub specific_date: Option<NaiveDate>,

    pub total_catalog_items: usize,

    /// Sorted by converted quantity, highest first
    pub lines: Vec<ReconciliationLine>,
}

impl ReconciliationReport {
    pub fn line(&self, catalog_name: &str) -> Option<&ReconciliationLine> {
        self.lines.iter().find(|line| line.catalog_name == catalog_name)
    }

    pub fn reorder_count(&self) -> usize {
        self.lines.iter().filter(|line| line.needs_reorder).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    pub catalog_start_date: NaiveDate,
    pub window: DateWindow,
    pub total_catalog_items: usize,
    pub total_sales_items: usize,

    /// Over catalog lines only
    pub total_sold: f64,
    pub total_remaining: f64,
    pub avg_usage_percent: f64,

    pub unmatched_sales_count: usize,

    /// Catalog lines by usage %, then unmatched-sale lines by converted quantity
    pub lines: Vec<ReconciliationLine>,
}

impl SummaryReport {
    pub fn catalog_lines(&self) -> impl Iterator<Item = &ReconciliationLine> {
        self.lines.iter().filter(|line| line.kind == LineKind::CatalogItem)
    }

    pub fn unmatched_lines(&self) -> impl Iterator<Item = &ReconciliationLine> {
        self.lines.iter().filter(|line| line.kind == LineKind::UnmatchedSale)
    }
}

// ============================================================================
// PREVIEW & CONFIRMATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    History,
    Fuzzy,
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewLine {
    pub original_name: String,
    pub qty: f64,
    pub category: String,
    pub suggested_name: Option<String>,
    pub score: f64,
    pub source: MatchSource,
    pub conversion_rate: Option<f64>,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesPreview {
    pub date: NaiveDate,
    pub catalog_start_date: NaiveDate,
    pub lines: Vec<PreviewLine>,
    pub history_hits: usize,
    pub fuzzy_hits: usize,
    pub unmatched: usize,
    pub conversion: ConversionSummary,

    /// Every name of the active catalog, for manual correction
    pub catalog_names: Vec<String>,
}

/// Operator-approved association of a raw sale name with a catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchConfirmation {
    pub sale_name: String,
    pub catalog_name: String,

    #[serde(default = "default_rate")]
    pub conversion_rate: f64,

    #[serde(default)]
    pub unit: Option<String>,
}

fn default_rate() -> f64 {
    1.0
}

/// Reject blank names and non-positive rates
pub fn validate_confirmations(confirmations: &[MatchConfirmation]) -> ReconResult<()> {
    for confirmation in confirmations {
        if confirmation.sale_name.trim().is_empty() {
            return Err(ReconError::invalid("saleName", "sale name is required"));
        }
        if confirmation.catalog_name.trim().is_empty() {
            return Err(ReconError::invalid(
                "catalogName",
                format!("no catalog name for '{}'", confirmation.sale_name),
            ));
        }
        if !confirmation.conversion_rate.is_finite() || confirmation.conversion_rate <= 0.0 {
            return Err(ReconError::invalid(
                "conversionRate",
                format!("rate for '{}' must be positive", confirmation.sale_name),
            ));
        }
    }
    Ok(())
}

/// Record every confirmation into history. Nothing is recorded if any confirmation is invalid.
pub fn confirm_matches(history: &MatchHistoryStore, confirmations: &[MatchConfirmation]) -> ReconResult<usize> {
    validate_confirmations(confirmations)?;

    for confirmation in confirmations {
        history.record(
            &confirmation.sale_name,
            &confirmation.catalog_name,
            confirmation.conversion_rate,
            confirmation.unit.as_deref(),
        );
    }

    info!(confirmed = confirmations.len(), "match confirmations recorded");
    Ok(confirmations.len())
}

/// Rename confirmed records to their catalog name and pin the chosen rate
pub fn apply_confirmations(items: &[SaleRecord], confirmations: &[MatchConfirmation]) -> Vec<SaleRecord> {
    let by_name: HashMap<String, &MatchConfirmation> = confirmations
        .iter()
        .map(|confirmation| (normalize_sale_name(&confirmation.sale_name), confirmation))
        .collect();

    items
        .iter()
        .map(|item| {
            let mut record = item.clone();
            if record.original_name.is_empty() {
                record.original_name = record.name.clone();
            }

            if let Some(confirmation) = by_name.get(&normalize_sale_name(item.source_name())) {
                record.name = confirmation.catalog_name.clone();
                record.conversion_rate = Some(confirmation.conversion_rate);
            }
            record
        })
        .collect()
}

// ============================================================================
// AGGREGATION
// ============================================================================

#[derive(Debug, Clone, Default)]
struct SaleAggregate {
    qty: f64,
    category: String,

    /// Rate of the first record seen (None if that record had none)
    first_rate: Option<f64>,

    /// First explicit rate seen among all records
    explicit_rate: Option<f64>,
}

/// Per-name totals; `order` keeps first-seen order for deterministic tie-breaks
#[derive(Debug, Default)]
struct SalesAggregate {
    order: Vec<String>,
    by_name: HashMap<String, SaleAggregate>,
}

impl SalesAggregate {
    fn collect(sales: &SalesSnapshot, window: DateWindow) -> Self {
        let mut aggregate = SalesAggregate::default();

        for (_, daily) in sales.iter().filter(|(date, _)| window.contains(**date)) {
            for record in &daily.items {
                if !aggregate.by_name.contains_key(&record.name) {
                    aggregate.order.push(record.name.clone());
                    aggregate.by_name.insert(
                        record.name.clone(),
                        SaleAggregate {
                            category: record.category.clone(),
                            first_rate: record.conversion_rate.filter(|rate| *rate > 0.0),
                            ..SaleAggregate::default()
                        },
                    );
                }
                let Some(entry) = aggregate.by_name.get_mut(&record.name) else {
                    continue;
                };

                entry.qty += record.qty;
                if entry.category.is_empty() && !record.category.is_empty() {
                    entry.category = record.category.clone();
                }
                // a zero rate counts as unset
                if entry.explicit_rate.is_none() {
                    entry.explicit_rate = record.conversion_rate.filter(|rate| *rate > 0.0);
                }
            }
        }

        aggregate
    }

    fn get(&self, name: &str) -> Option<&SaleAggregate> {
        self.by_name.get(name)
    }
}

#[derive(Debug, Clone, Default)]
struct TransferAggregate {
    qty: f64,
    category: String,
}

fn collect_transfers(transfers: &TransfersSnapshot, window: DateWindow) -> HashMap<String, TransferAggregate> {
    let mut by_name: HashMap<String, TransferAggregate> = HashMap::new();

    for (_, daily) in transfers.iter().filter(|(date, _)| window.contains(**date)) {
        for record in &daily.items {
            let entry = by_name.entry(record.name.clone()).or_default();
            entry.qty += record.qty;
            if entry.category.is_empty() && !record.category.is_empty() {
                entry.category = record.category.clone();
            }
        }
    }

    by_name
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    pub config: ReconConfig,

    /// End of the newest catalog period's window
    pub today: NaiveDate,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(ReconConfig::default())
    }
}

impl ReconciliationEngine {
    pub fn new(config: ReconConfig) -> Self {
        ReconciliationEngine {
            config,
            today: Utc::now().date_naive(),
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Compare one catalog period against the sales and transfers of its valid window.
    ///
    /// `specific_date` narrows aggregation to that single day. Returns None when
    /// no catalog starts on `start_date`.
    pub fn compare_one(
        &self,
        catalogs: &CatalogHistory,
        sales: &SalesSnapshot,
        transfers: &TransfersSnapshot,
        start_date: NaiveDate,
        specific_date: Option<NaiveDate>,
    ) -> Option<ReconciliationReport> {
        let Some(catalog) = catalogs.get(start_date) else {
            debug!(start = %start_date, "no catalog for period");
            return None;
        };
        let window = catalogs.valid_window(start_date, self.today)?;
        let aggregation_window = specific_date.map(DateWindow::single).unwrap_or(window);

        let aggregate = SalesAggregate::collect(sales, aggregation_window);
        let transfer_totals = collect_transfers(transfers, aggregation_window);

        let matches = match_items(&catalog.names(), &aggregate.order, self.config.compare_threshold);

        let mut lines: Vec<ReconciliationLine> = catalog
            .items
            .iter()
            .zip(matches)
            .map(|(item, matched)| {
                let sale_key = matched.sale_name.clone().unwrap_or_else(|| item.name.clone());
                let sale = aggregate.get(&sale_key);
                let transfer = transfer_totals
                    .get(&sale_key)
                    .or_else(|| transfer_totals.get(&item.name));

                let sold = sale.map(|s| s.qty).unwrap_or(0.0);
                let transfer_qty = transfer.map(|t| t.qty).unwrap_or(0.0);
                let category = match sale {
                    Some(s) if !s.category.is_empty() => s.category.clone(),
                    _ => transfer.map(|t| t.category.clone()).unwrap_or_default(),
                };

                let (converted, rate, unit) = match sale.and_then(|s| s.explicit_rate) {
                    Some(rate) => (sold * rate, Some(rate), EXPLICIT_RATE_UNIT.to_string()),
                    None => {
                        let conversion = convert_qty(sold, &category, &sale_key);
                        // cocktails carry no rate: count them as sold
                        (conversion.converted_qty.unwrap_or(sold), conversion.conversion_rate, conversion.unit)
                    }
                };

                let match_score = if matched.matched {
                    matched.score
                } else if sale.is_some() {
                    1.0
                } else {
                    0.0
                };

                let (remaining, usage_percent, needs_reorder) =
                    balance(item.opening_stock, converted, transfer_qty, self.config.reorder_fraction);

                ReconciliationLine {
                    catalog_name: item.name.clone(),
                    matched_sale_name: (sale_key != item.name).then_some(sale_key),
                    match_score,
                    category,
                    opening_stock: item.opening_stock,
                    sold_qty_raw: sold,
                    sold_qty_converted: converted,
                    transfer_qty,
                    conversion_rate: rate,
                    unit,
                    remaining,
                    usage_percent,
                    needs_reorder,
                    kind: LineKind::CatalogItem,
                }
            })
            .collect();

        lines.sort_by(|a, b| b.sold_qty_converted.total_cmp(&a.sold_qty_converted));

        info!(
            start = %start_date,
            lines = lines.len(),
            sale_names = aggregate.order.len(),
            "catalog period compared"
        );

        Some(ReconciliationReport {
            catalog_start_date: start_date,
            window,
            specific_date,
            total_catalog_items: catalog.items.len(),
            lines,
        })
    }

    /// Summarize the catalog starting on `start_date` over `start_date..=end_date`.
    ///
    /// Matching runs both ways so sale names with no catalog entry surface as
    /// unmatched-sale lines. Every sale name in the window lands in exactly one
    /// of the two groups.
    pub fn summarize_range(
        &self,
        catalogs: &CatalogHistory,
        sales: &SalesSnapshot,
        transfers: &TransfersSnapshot,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> ReconResult<Option<SummaryReport>> {
        let window = DateWindow::new(start_date, end_date)?;

        let Some(catalog) = catalogs.get(start_date) else {
            debug!(start = %start_date, "no catalog for period");
            return Ok(None);
        };

        let aggregate = SalesAggregate::collect(sales, window);
        let transfer_totals = collect_transfers(transfers, window);
        let threshold = self.config.summary_threshold;

        let (catalog_to_sale, sale_to_catalog) = bidirectional_mapping(catalog, &aggregate.order, threshold);

        let mut matched_sales: HashSet<&str> = sale_to_catalog.keys().map(|name| name.as_str()).collect();
        let mut catalog_lines = Vec::with_capacity(catalog.items.len());

        for item in &catalog.items {
            let sale_key = catalog_to_sale.get(&item.name).unwrap_or(&item.name);
            let sale = aggregate.get(sale_key);
            if sale.is_some() {
                matched_sales.insert(sale_key.as_str());
            }

            let sold = sale.map(|s| s.qty).unwrap_or(0.0);
            let rate = sale.and_then(|s| s.first_rate).unwrap_or(1.0);
            let converted = sold * rate;
            let transfer_qty = transfer_totals
                .get(sale_key)
                .or_else(|| transfer_totals.get(&item.name))
                .map(|t| t.qty)
                .unwrap_or(0.0);
            let category = sale.map(|s| s.category.clone()).unwrap_or_default();

            let (remaining, usage_percent, needs_reorder) =
                balance(item.opening_stock, converted, transfer_qty, self.config.reorder_fraction);

            catalog_lines.push(ReconciliationLine {
                catalog_name: item.name.clone(),
                matched_sale_name: (*sale_key != item.name).then(|| sale_key.clone()),
                match_score: if sale.is_some() { 1.0 } else { 0.0 },
                unit: unit_label(&category, sale_key).to_string(),
                category,
                opening_stock: item.opening_stock,
                sold_qty_raw: sold,
                sold_qty_converted: converted,
                transfer_qty,
                conversion_rate: Some(rate),
                remaining,
                usage_percent,
                needs_reorder,
                kind: LineKind::CatalogItem,
            });
        }

        let mut unmatched_lines: Vec<ReconciliationLine> = aggregate
            .order
            .iter()
            .filter(|name| !matched_sales.contains(name.as_str()))
            .filter_map(|name| aggregate.get(name).map(|sale| (name, sale)))
            .map(|(name, sale)| {
                let rate = sale.first_rate.unwrap_or(1.0);
                let converted = sale.qty * rate;
                let transfer_qty = transfer_totals.get(name).map(|t| t.qty).unwrap_or(0.0);

                ReconciliationLine {
                    catalog_name: name.clone(),
                    matched_sale_name: None,
                    match_score: 0.0,
                    category: sale.category.clone(),
                    opening_stock: 0.0,
                    sold_qty_raw: sale.qty,
                    sold_qty_converted: converted,
                    transfer_qty,
                    conversion_rate: Some(rate),
                    unit: unit_label(&sale.category, name).to_string(),
                    remaining: transfer_qty - converted,
                    usage_percent: 0.0,
                    needs_reorder: false,
                    kind: LineKind::UnmatchedSale,
                }
            })
            .collect();

        let total_sold: f64 = catalog_lines.iter().map(|line| line.sold_qty_converted).sum();
        let total_remaining: f64 = catalog_lines.iter().map(|line| line.remaining).sum();
        let avg_usage_percent = if catalog_lines.is_empty() {
            0.0
        } else {
            catalog_lines.iter().map(|line| line.usage_percent).sum::<f64>() / catalog_lines.len() as f64
        };

        catalog_lines.sort_by(|a, b| b.usage_percent.total_cmp(&a.usage_percent));
        unmatched_lines.sort_by(|a, b| b.sold_qty_converted.total_cmp(&a.sold_qty_converted));

        let unmatched_sales_count = unmatched_lines.len();
        info!(
            start = %start_date,
            end = %end_date,
            catalog_lines = catalog_lines.len(),
            unmatched = unmatched_sales_count,
            "range summarized"
        );

        let mut lines = catalog_lines;
        lines.extend(unmatched_lines);

        Ok(Some(SummaryReport {
            catalog_start_date: start_date,
            window,
            total_catalog_items: catalog.items.len(),
            total_sales_items: aggregate.order.len(),
            total_sold,
            total_remaining,
            avg_usage_percent,
            unmatched_sales_count,
            lines,
        }))
    }

    /// Suggest a catalog entry and rate for each record of an upload.
    ///
    /// Remembered matches win over fuzzy ones. Returns None when no catalog is
    /// active on `date`.
    pub fn preview_sales(
        &self,
        date: NaiveDate,
        items: &[SaleRecord],
        catalogs: &CatalogHistory,
        history: &MatchHistoryStore,
    ) -> ReconResult<Option<SalesPreview>> {
        if items.is_empty() {
            return Err(ReconError::invalid("items", "no sale records to preview"));
        }

        let Some(catalog) = catalogs.active_for(date) else {
            debug!(date = %date, "no active catalog for preview");
            return Ok(None);
        };
        let catalog_names = catalog.names();

        let mut history_hits = 0;
        let mut fuzzy_hits = 0;
        let mut unmatched = 0;

        let lines: Vec<PreviewLine> = items
            .iter()
            .map(|item| {
                let name = item.source_name();

                if let Some(entry) = history.best_match(name) {
                    history_hits += 1;
                    return PreviewLine {
                        original_name: name.to_string(),
                        qty: item.qty,
                        category: item.category.clone(),
                        suggested_name: Some(entry.catalog_name),
                        score: 1.0,
                        source: MatchSource::History,
                        conversion_rate: Some(entry.conversion_rate),
                        unit: entry
                            .unit
                            .unwrap_or_else(|| unit_label(&item.category, name).to_string()),
                    };
                }

                let result = find_best_match(name, &catalog_names, self.config.preview_threshold);
                let source = if result.matched.is_some() {
                    fuzzy_hits += 1;
                    MatchSource::Fuzzy
                } else {
                    unmatched += 1;
                    MatchSource::Unmatched
                };

                PreviewLine {
                    original_name: name.to_string(),
                    qty: item.qty,
                    category: item.category.clone(),
                    suggested_name: result.matched,
                    score: result.score,
                    source,
                    conversion_rate: conversion_rate(&item.category, name),
                    unit: unit_label(&item.category, name).to_string(),
                }
            })
            .collect();

        info!(date = %date, history_hits, fuzzy_hits, unmatched, "sales preview built");

        Ok(Some(SalesPreview {
            date,
            catalog_start_date: catalog.start_date,
            lines,
            history_hits,
            fuzzy_hits,
            unmatched,
            conversion: summarize_conversion(items),
            catalog_names,
        }))
    }

    /// Resolve raw transfer names against the catalog active on `date`.
    /// Misses keep the raw name under category "Unknown" with score 0.
    pub fn resolve_transfers(
        &self,
        date: NaiveDate,
        raw: &[RawTransfer],
        direction: TransferDirection,
        catalogs: &CatalogHistory,
    ) -> Option<Vec<TransferRecord>> {
        let catalog = catalogs.active_for(date)?;
        let names = catalog.names();

        let records: Vec<TransferRecord> = raw
            .iter()
            .map(|item| {
                let result = find_best_match(&item.original_name, &names, self.config.transfer_threshold);
                let (name, category, score) = match result.matched.as_deref().and_then(|m| catalog.find(m)) {
                    Some(entry) => (entry.name.clone(), entry.category.clone(), result.score),
                    None => (item.original_name.clone(), UNKNOWN_CATEGORY.to_string(), 0.0),
                };

                TransferRecord {
                    date,
                    name,
                    qty: item.qty.abs() * direction.sign(),
                    direction,
                    category,
                    original_name: item.original_name.clone(),
                    match_score: score,
                }
            })
            .collect();

        debug!(date = %date, direction = direction.as_str(), items = records.len(), "transfers resolved");
        Some(records)
    }
}

/// catalog → sale and sale → catalog maps.
///
/// The forward pass assigns each catalog name its best sale. The reverse pass
/// adds sale names the forward pass missed, without overriding a catalog entry
/// that already has a sale.
fn bidirectional_mapping(
    catalog: &CatalogSnapshot,
    sale_names: &[String],
    threshold: f64,
) -> (HashMap<String, String>, HashMap<String, String>) {
    let catalog_names = catalog.names();
    let mut catalog_to_sale: HashMap<String, String> = HashMap::new();
    let mut sale_to_catalog: HashMap<String, String> = HashMap::new();

    for forward in match_items(&catalog_names, sale_names, threshold) {
        if let Some(sale) = forward.sale_name {
            sale_to_catalog.insert(sale.clone(), forward.catalog_name.clone());
            catalog_to_sale.insert(forward.catalog_name, sale);
        }
    }

    // roles swap: `catalog_name` holds the sale, `sale_name` the catalog entry
    for reverse in match_items(sale_names, &catalog_names, threshold) {
        let sale = reverse.catalog_name;
        let Some(catalog_name) = reverse.sale_name else {
            continue;
        };

        if sale_to_catalog.contains_key(&sale) {
            continue;
        }
        sale_to_catalog.insert(sale.clone(), catalog_name.clone());
        catalog_to_sale.entry(catalog_name).or_insert(sale);
    }

    (catalog_to_sale, sale_to_catalog)
}

// ============================================================================
// TESTS
// ============================================================================
