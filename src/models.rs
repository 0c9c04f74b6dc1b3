// 📦 Record Model - catalog items, sales, transfers, composites
//
// Every record is an explicit struct. Optional wire fields carry serde
// defaults (category → "", conversionRate → absent = 1) so collaborators can
// send sparse shapes without ad hoc shape checks.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// CATALOG
// ============================================================================

/// Canonical inventory entry ("PAR stock" line)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub name: String,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub opening_stock: f64,
}

impl CatalogItem {
    pub fn new(name: &str, category: &str, opening_stock: f64) -> Self {
        CatalogItem {
            name: name.to_string(),
            category: category.to_string(),
            opening_stock,
        }
    }

    /// Zero-stock entry standing in for a composite item
    pub fn placeholder(name: &str) -> Self {
        CatalogItem::new(name, "", 0.0)
    }

    /// Case-insensitive, whitespace-trimmed identity check
    pub fn same_name(&self, other: &str) -> bool {
        self.name.trim().to_lowercase() == other.trim().to_lowercase()
    }
}

/// One catalog period: authoritative from `start_date` until the next period starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    pub start_date: NaiveDate,

    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,

    pub items: Vec<CatalogItem>,
}

impl CatalogSnapshot {
    pub fn new(start_date: NaiveDate, items: Vec<CatalogItem>) -> Self {
        CatalogSnapshot {
            start_date,
            uploaded_at: None,
            items,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|item| item.name.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.name == name)
    }
}

// ============================================================================
// SALES
// ============================================================================

/// Where a persisted sale record came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SaleOrigin {
    /// Uploaded as-is
    #[default]
    Direct,

    /// Negative draw on a composite item
    CompositeSale { composite: String, score: f64 },

    /// Ingredient draw derived from a composite sale
    Ingredient { composite: String, score: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub date: NaiveDate,

    /// Free text, possibly already corrected to a catalog name
    pub name: String,

    pub qty: f64,

    #[serde(default)]
    pub category: String,

    /// Explicit rate chosen by the operator; absent means 1 (or inferred, see reconciliation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_rate: Option<f64>,

    /// Name as it appeared on the point-of-sale export
    #[serde(default)]
    pub original_name: String,

    #[serde(default)]
    pub origin: SaleOrigin,
}

impl SaleRecord {
    pub fn new(date: NaiveDate, name: &str, qty: f64, category: &str) -> Self {
        SaleRecord {
            date,
            name: name.to_string(),
            qty,
            category: category.to_string(),
            conversion_rate: None,
            original_name: name.to_string(),
            origin: SaleOrigin::Direct,
        }
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.conversion_rate = Some(rate);
        self
    }

    /// Effective rate, defaulting to 1
    pub fn rate(&self) -> f64 {
        self.conversion_rate.unwrap_or(1.0)
    }

    /// Pre-correction name, falling back to the current name
    pub fn source_name(&self) -> &str {
        if self.original_name.is_empty() {
            &self.name
        } else {
            &self.original_name
        }
    }
}

/// All sale records persisted under one date key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySales {
    pub date: NaiveDate,

    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,

    pub items: Vec<SaleRecord>,
}

// ============================================================================
// TRANSFERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    In,
    Out,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::In => "in",
            TransferDirection::Out => "out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "in" => Some(TransferDirection::In),
            "out" => Some(TransferDirection::Out),
            _ => None,
        }
    }

    /// +1 for inbound, −1 for outbound
    pub fn sign(&self) -> f64 {
        match self {
            TransferDirection::In => 1.0,
            TransferDirection::Out => -1.0,
        }
    }
}

/// Manual stock movement. `qty` is already signed by direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub date: NaiveDate,
    pub name: String,
    pub qty: f64,
    pub direction: TransferDirection,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub original_name: String,

    #[serde(default)]
    pub match_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTransfers {
    pub date: NaiveDate,

    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,

    pub direction: TransferDirection,
    pub items: Vec<TransferRecord>,
}

/// Unresolved transfer line as read from an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransfer {
    pub original_name: String,

    /// Unsigned full-bottle count
    pub qty: f64,
}

// ============================================================================
// COMPOSITES
// ============================================================================

/// Ingredient of a composite, in its natural unit (e.g. ounces) per composite sold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubItem {
    pub par_name: String,
    pub qty: f64,
}

/// Sellable item consumed as a fixed recipe ("group item")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeItem {
    pub id: String,
    pub name: String,
    pub sub_items: Vec<SubItem>,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// SNAPSHOTS (collaborator contracts)
// ============================================================================

pub type SalesSnapshot = BTreeMap<NaiveDate, DailySales>;
pub type TransfersSnapshot = BTreeMap<NaiveDate, DailyTransfers>;

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_sale_record_defaults_from_sparse_json() {
        let json = r#"{"date": "2025-03-01", "name": "Chang", "qty": 4}"#;
        let sale: SaleRecord = serde_json::from_str(json).unwrap();

        assert_eq!(sale.category, "");
        assert_eq!(sale.conversion_rate, None);
        assert_eq!(sale.rate(), 1.0);
        assert_eq!(sale.origin, SaleOrigin::Direct);
        assert_eq!(sale.source_name(), "Chang");
    }

    #[test]
    fn test_source_name_prefers_original() {
        let mut sale = SaleRecord::new(date("2025-03-01"), "Beer, Chang, 32cl", 2.0, "Beer");
        sale.original_name = "Chang".to_string();

        assert_eq!(sale.source_name(), "Chang");
    }

    #[test]
    fn test_transfer_direction() {
        assert_eq!(TransferDirection::parse(" IN "), Some(TransferDirection::In));
        assert_eq!(TransferDirection::parse("out"), Some(TransferDirection::Out));
        assert_eq!(TransferDirection::parse("sideways"), None);
        assert_eq!(TransferDirection::Out.sign(), -1.0);
    }

    #[test]
    fn test_catalog_same_name_is_case_insensitive() {
        let item = CatalogItem::new("Margarita ", "", 0.0);
        assert!(item.same_name("margarita"));
        assert!(!item.same_name("margaritas"));
    }

    #[test]
    fn test_origin_serializes_with_kind_tag() {
        let origin = SaleOrigin::Ingredient {
            composite: "Margarita".to_string(),
            score: 1.0,
        };
        let json = serde_json::to_value(&origin).unwrap();

        assert_eq!(json["kind"], "ingredient");
        assert_eq!(json["composite"], "Margarita");
    }
}
