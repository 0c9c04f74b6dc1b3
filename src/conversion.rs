// 🍷 Conversion Rules - sold units → stock units
//
// Rules are evaluated in order, first match wins:
//   1. "glass" in name or category      → 0.2  (one bottle = 5 glasses)
//   2. numbered pairing ("0. Chardonnay") → 1/7 (one bottle = 7 pours)
//   3. wine category marked btl/bottle  → 1
//   4. cocktail category                → None (no unit story yet)
//   5. anything else                    → 1
//
// `unit_label` walks the same order so a rate and its label never disagree.

use crate::models::SaleRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const GLASS_RATE: f64 = 0.2;
pub const PAIRING_RATE: f64 = 1.0 / 7.0;

/// Substrings identifying a spirit in a catalog name
pub const SPIRIT_KEYWORDS: [&str; 14] = [
    "vodka", "gin", "rum", "tequila", "whisky", "whiskey", "bourbon", "cognac",
    "brandy", "aperitif", "liqueur", "mezcal", "grappa", "sake",
];

/// Fraction of a bottle per ounce, by bottle size
const OZ_PER_LITRE: f64 = 1.0 / 33.0;
const OZ_PER_75CL: f64 = 1.0 / 25.0;
const OZ_PER_70CL: f64 = 1.0 / 23.0;
const OZ_PER_50CL: f64 = 1.0 / 16.0;

// ============================================================================
// RATE INFERENCE
// ============================================================================

/// Numbered pairing pattern: leading digits followed by '.'
pub fn is_pairing(name: &str) -> bool {
    let trimmed = name.trim();
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();

    digits > 0 && trimmed[digits..].starts_with('.')
}

/// Rate turning one sold unit into catalog units, or None for "not applicable"
pub fn conversion_rate(category: &str, name: &str) -> Option<f64> {
    let cat = category.to_lowercase();
    let lower = name.to_lowercase();

    if cat.contains("glass") || lower.contains("glass") {
        return Some(GLASS_RATE);
    }

    if is_pairing(name) {
        return Some(PAIRING_RATE);
    }

    if cat.contains("wine") && (cat.contains("btl") || cat.contains("bottle")) {
        return Some(1.0);
    }

    if cat.contains("cocktail") {
        return None;
    }

    Some(1.0)
}

/// Human label for the unit chosen by `conversion_rate`
pub fn unit_label(category: &str, name: &str) -> &'static str {
    let cat = category.to_lowercase();
    let lower = name.to_lowercase();

    if cat.contains("glass") || lower.contains("glass") {
        return "Glass";
    }

    if is_pairing(name) {
        return "Pairing";
    }

    if cat.contains("wine") {
        return "Bottle";
    }

    if cat.contains("cocktail") {
        return "Cocktail (N/A)";
    }

    if cat.contains("sake") {
        return "Sake";
    }

    if cat.contains("beer") {
        return "Beer";
    }

    if cat.contains("champagn") {
        return "Champagne";
    }

    "Bottle"
}

/// How much of one bottle `oz_quantity` ounces of `catalog_name` represent.
///
/// Non-spirits pass through at 1. Spirits use the bottle size found in the
/// name (1L, 75cl/750ml, 70cl/700ml, 50cl/500ml), defaulting to 75cl.
pub fn spirit_conversion_rate(catalog_name: &str, oz_quantity: f64) -> f64 {
    let lower = catalog_name.to_lowercase();

    let is_spirit = SPIRIT_KEYWORDS.iter().any(|keyword| lower.contains(keyword));
    if !is_spirit {
        return 1.0;
    }

    let multiplier = if lower.contains("1l") || lower.contains("1 l") || lower.contains("1000ml") {
        OZ_PER_LITRE
    } else if lower.contains("75cl") || lower.contains("750ml") {
        OZ_PER_75CL
    } else if lower.contains("70cl") || lower.contains("700ml") {
        OZ_PER_70CL
    } else if lower.contains("50cl") || lower.contains("500ml") {
        OZ_PER_50CL
    } else {
        OZ_PER_75CL
    };

    multiplier * oz_quantity
}

// ============================================================================
// QUANTITY CONVERSION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    pub original_qty: f64,
    pub converted_qty: Option<f64>,
    pub conversion_rate: Option<f64>,
    pub unit: String,
}

pub fn convert_qty(qty: f64, category: &str, name: &str) -> Conversion {
    match conversion_rate(category, name) {
        Some(rate) => Conversion {
            original_qty: qty,
            converted_qty: Some(qty * rate),
            conversion_rate: Some(rate),
            unit: unit_label(category, name).to_string(),
        },
        None => Conversion {
            original_qty: qty,
            converted_qty: None,
            conversion_rate: None,
            unit: "Cocktail (N/A)".to_string(),
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitTotals {
    pub count: usize,
    pub total_original_qty: f64,
    pub total_converted_qty: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSummary {
    pub by_unit: BTreeMap<String, UnitTotals>,
    pub items: usize,
    pub with_conversion: usize,
    pub without_conversion: usize,
}

/// Per-unit breakdown of an upload before it is saved
pub fn summarize_conversion(records: &[SaleRecord]) -> ConversionSummary {
    let mut summary = ConversionSummary {
        items: records.len(),
        ..ConversionSummary::default()
    };

    for record in records {
        let conversion = convert_qty(record.qty, &record.category, &record.name);

        if conversion.conversion_rate.is_some() {
            summary.with_conversion += 1;
        } else {
            summary.without_conversion += 1;
        }

        let totals = summary.by_unit.entry(conversion.unit.clone()).or_default();
        totals.count += 1;
        totals.total_original_qty += record.qty;
        if let Some(converted) = conversion.converted_qty {
            totals.total_converted_qty += converted;
        }
    }

    summary
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_glass_rule() {
        assert_eq!(conversion_rate("Wine by glass", "House red"), Some(0.2));
        assert_eq!(conversion_rate("Wine", "Merlot glass"), Some(0.2));
        assert_eq!(unit_label("Wine", "Merlot glass"), "Glass");
    }

    #[test]
    fn test_pairing_precedes_wine_bottle() {
        let rate = conversion_rate("Wine bottle", "0. Chardonnay pairing").unwrap();

        assert!(approx(rate, 1.0 / 7.0));
        assert_eq!(unit_label("Wine bottle", "0. Chardonnay pairing"), "Pairing");
    }

    #[test]
    fn test_is_pairing() {
        assert!(is_pairing("0. Chardonnay"));
        assert!(is_pairing("  12.Riesling"));
        assert!(!is_pairing("Chardonnay 2."));
        assert!(!is_pairing("12 Riesling"));
        assert!(!is_pairing(""));
    }

    #[test]
    fn test_wine_bottle_and_default() {
        assert_eq!(conversion_rate("Wine BTL", "Chablis"), Some(1.0));
        assert_eq!(conversion_rate("Beer", "Chang"), Some(1.0));
        assert_eq!(conversion_rate("", ""), Some(1.0));
    }

    #[test]
    fn test_cocktail_is_not_applicable() {
        assert_eq!(conversion_rate("Cocktail", "Margarita"), None);
        assert_eq!(unit_label("Cocktail", "Margarita"), "Cocktail (N/A)");

        let conversion = convert_qty(3.0, "Cocktail", "Margarita");
        assert_eq!(conversion.converted_qty, None);
        assert_eq!(conversion.original_qty, 3.0);
    }

    #[test]
    fn test_unit_labels_by_category() {
        assert_eq!(unit_label("Sake", "Dassai"), "Sake");
        assert_eq!(unit_label("Beer", "Chang"), "Beer");
        assert_eq!(unit_label("Champagne", "Moet"), "Champagne");
        assert_eq!(unit_label("Water", "Evian"), "Bottle");
    }

    #[test]
    fn test_spirit_rates_by_bottle_size() {
        assert!(approx(spirit_conversion_rate("Vodka, Grey Goose, 40%, 1L", 1.0), 1.0 / 33.0));
        assert!(approx(spirit_conversion_rate("Gin, Nakin, 40%, 750ml", 1.0), 1.0 / 25.0));
        assert!(approx(spirit_conversion_rate("Rum, Bacardi, 40%, 70cl", 2.0), 2.0 / 23.0));
        assert!(approx(spirit_conversion_rate("Tequila, Patron, 50cl", 1.0), 1.0 / 16.0));
        assert!(approx(spirit_conversion_rate("Mezcal, Joven", 1.0), 1.0 / 25.0));
    }

    #[test]
    fn test_non_spirit_passes_through() {
        assert_eq!(spirit_conversion_rate("Lime juice", 2.0), 1.0);
        assert_eq!(spirit_conversion_rate("Beer, Leo, 33cl", 1.0), 1.0);
    }

    #[test]
    fn test_summarize_conversion() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let records = vec![
            SaleRecord::new(date, "House red glass", 10.0, "Wine"),
            SaleRecord::new(date, "Margarita", 4.0, "Cocktail"),
            SaleRecord::new(date, "Chang", 6.0, "Beer"),
        ];

        let summary = summarize_conversion(&records);

        assert_eq!(summary.items, 3);
        assert_eq!(summary.with_conversion, 2);
        assert_eq!(summary.without_conversion, 1);
        assert!(approx(summary.by_unit["Glass"].total_converted_qty, 2.0));
        assert_eq!(summary.by_unit["Cocktail (N/A)"].total_converted_qty, 0.0);
        assert_eq!(summary.by_unit["Beer"].count, 1);
    }
}
