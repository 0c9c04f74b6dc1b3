// 🍸 Composite Items - recipes sold as one line, consumed as ingredients
//
// A sale whose name fuzzy-matches a registered composite is rewritten into:
//   - one draw on the composite itself:   qty = −q,            rate = 1
//   - one draw per ingredient:            qty = q × per-unit,  rate = spirit rate per ounce
//
// Expansion must run exactly once, on the original upload. Running it again
// on its own output would double-count the ingredients.
//
// Registration never touches a catalog directly: it returns the catalog
// mutation (placeholder add/remove) for the persistence layer to apply.

use crate::catalog::CatalogMutation;
use crate::conversion::spirit_conversion_rate;
use crate::error::{ReconError, ReconResult};
use crate::matching::find_best_match;
use crate::models::{CompositeItem, SaleOrigin, SaleRecord, SubItem};
use chrono::Utc;
use tracing::{debug, info};

/// Default score a sale name needs to count as a composite sale
pub const COMPOSITE_THRESHOLD: f64 = 0.6;

// ============================================================================
// COMPOSITE REGISTRY
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CompositeRegistry {
    items: Vec<CompositeItem>,
}

impl CompositeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<CompositeItem>) -> Self {
        CompositeRegistry { items }
    }

    /// Register a recipe and request its zero-stock catalog placeholder
    pub fn register(&mut self, name: &str, sub_items: Vec<SubItem>) -> ReconResult<(CompositeItem, CatalogMutation)> {
        let name = name.trim();
        validate_recipe(name, &sub_items)?;

        if self.find_by_name(name).is_some() {
            return Err(ReconError::DuplicateComposite(name.to_string()));
        }

        let item = CompositeItem {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            sub_items,
            created_at: Utc::now(),
            updated_at: None,
        };

        info!(composite = %item.name, ingredients = item.sub_items.len(), "composite registered");
        self.items.push(item.clone());

        let mutation = CatalogMutation::AddPlaceholder { name: item.name.clone() };
        Ok((item, mutation))
    }

    /// Replace name and recipe. A rename moves the catalog placeholder.
    pub fn update(
        &mut self,
        id: &str,
        name: &str,
        sub_items: Vec<SubItem>,
    ) -> ReconResult<(CompositeItem, Vec<CatalogMutation>)> {
        let name = name.trim();
        validate_recipe(name, &sub_items)?;

        if let Some(other) = self.find_by_name(name) {
            if other.id != id {
                return Err(ReconError::DuplicateComposite(name.to_string()));
            }
        }

        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| ReconError::CompositeNotFound(id.to_string()))?;

        let mut mutations = Vec::new();
        if item.name != name {
            mutations.push(CatalogMutation::RemovePlaceholder { name: item.name.clone() });
            mutations.push(CatalogMutation::AddPlaceholder { name: name.to_string() });
        }

        item.name = name.to_string();
        item.sub_items = sub_items;
        item.updated_at = Some(Utc::now());

        info!(composite = %item.name, renamed = !mutations.is_empty(), "composite updated");
        Ok((item.clone(), mutations))
    }

    /// Drop a recipe and request removal of its catalog placeholder
    pub fn remove(&mut self, id: &str) -> ReconResult<(CompositeItem, CatalogMutation)> {
        let index = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| ReconError::CompositeNotFound(id.to_string()))?;

        let item = self.items.remove(index);
        info!(composite = %item.name, "composite removed");

        let mutation = CatalogMutation::RemovePlaceholder { name: item.name.clone() };
        Ok((item, mutation))
    }

    pub fn get(&self, id: &str) -> Option<&CompositeItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Case-insensitive, trimmed
    pub fn find_by_name(&self, name: &str) -> Option<&CompositeItem> {
        let wanted = name.trim().to_lowercase();
        self.items
            .iter()
            .find(|item| item.name.trim().to_lowercase() == wanted)
    }

    pub fn items(&self) -> &[CompositeItem] {
        &self.items
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|item| item.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn validate_recipe(name: &str, sub_items: &[SubItem]) -> ReconResult<()> {
    if name.is_empty() {
        return Err(ReconError::invalid("name", "composite name is required"));
    }

    if sub_items.is_empty() {
        return Err(ReconError::invalid("subItems", "a composite needs at least one ingredient"));
    }

    if let Some(bad) = sub_items
        .iter()
        .find(|sub| sub.par_name.trim().is_empty() || sub.qty.is_nan() || sub.qty <= 0.0)
    {
        return Err(ReconError::invalid(
            "subItems",
            format!("ingredient '{}' needs a name and a positive quantity", bad.par_name),
        ));
    }

    Ok(())
}

// ============================================================================
// COMPOSITE EXPANDER
// ============================================================================

pub struct CompositeExpander<'a> {
    composites: &'a [CompositeItem],
    names: Vec<String>,

    /// Score a sale name needs to count as a composite sale (default: 0.6)
    pub threshold: f64,
}

impl<'a> CompositeExpander<'a> {
    pub fn new(composites: &'a [CompositeItem]) -> Self {
        Self::with_threshold(composites, COMPOSITE_THRESHOLD)
    }

    pub fn with_threshold(composites: &'a [CompositeItem], threshold: f64) -> Self {
        CompositeExpander {
            composites,
            names: composites.iter().map(|item| item.name.clone()).collect(),
            threshold,
        }
    }

    /// Rewrite a freshly uploaded batch. Unmatched records pass through unchanged.
    pub fn expand(&self, batch: &[SaleRecord]) -> Vec<SaleRecord> {
        let mut expanded = Vec::with_capacity(batch.len());
        let mut composite_sales = 0;

        for record in batch {
            match self.expand_one(record) {
                Some(records) => {
                    composite_sales += 1;
                    expanded.extend(records);
                }
                None => expanded.push(record.clone()),
            }
        }

        debug!(
            records = batch.len(),
            composite_sales,
            output = expanded.len(),
            "composite expansion done"
        );
        expanded
    }

    /// `1 + ingredients` records for a composite sale, None otherwise
    pub fn expand_one(&self, record: &SaleRecord) -> Option<Vec<SaleRecord>> {
        if self.names.is_empty() {
            return None;
        }

        let source_name = record.source_name();
        let result = find_best_match(source_name, &self.names, self.threshold);
        let matched = result.matched?;
        let composite = self.composites.iter().find(|item| item.name == matched)?;

        let mut records = Vec::with_capacity(1 + composite.sub_items.len());

        records.push(SaleRecord {
            date: record.date,
            name: composite.name.clone(),
            qty: -record.qty,
            category: record.category.clone(),
            conversion_rate: Some(1.0),
            original_name: source_name.to_string(),
            origin: SaleOrigin::CompositeSale {
                composite: composite.name.clone(),
                score: result.score,
            },
        });

        for sub in &composite.sub_items {
            records.push(SaleRecord {
                date: record.date,
                name: sub.par_name.clone(),
                qty: record.qty * sub.qty,
                category: record.category.clone(),
                conversion_rate: Some(spirit_conversion_rate(&sub.par_name, 1.0)),
                original_name: source_name.to_string(),
                origin: SaleOrigin::Ingredient {
                    composite: composite.name.clone(),
                    score: result.score,
                },
            });
        }

        Some(records)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    fn margarita_registry() -> CompositeRegistry {
        let mut registry = CompositeRegistry::new();
        registry
            .register(
                "Margarita",
                vec![
                    SubItem { par_name: "Tequila, Patron, 70cl".to_string(), qty: 2.0 },
                    SubItem { par_name: "Liqueur, Cointreau, 70cl".to_string(), qty: 1.0 },
                    SubItem { par_name: "Lime juice".to_string(), qty: 1.0 },
                ],
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_register_returns_placeholder_mutation() {
        let mut registry = CompositeRegistry::new();
        let (item, mutation) = registry
            .register(" Negroni ", vec![SubItem { par_name: "Gin, Nakin, 750ml".to_string(), qty: 1.0 }])
            .unwrap();

        assert!(!item.id.is_empty());
        assert_eq!(item.name, "Negroni");
        assert_eq!(mutation, CatalogMutation::AddPlaceholder { name: "Negroni".to_string() });
    }

    #[test]
    fn test_register_rejects_duplicates_and_empty_recipes() {
        let mut registry = margarita_registry();

        let duplicate = registry.register("MARGARITA", vec![SubItem { par_name: "x".to_string(), qty: 1.0 }]);
        assert_eq!(duplicate.unwrap_err(), ReconError::DuplicateComposite("MARGARITA".to_string()));

        assert!(matches!(
            registry.register("Mojito", vec![]),
            Err(ReconError::InvalidInput { .. })
        ));
        assert!(matches!(
            registry.register("Mojito", vec![SubItem { par_name: "Rum".to_string(), qty: 0.0 }]),
            Err(ReconError::InvalidInput { .. })
        ));
        assert!(matches!(registry.register("  ", vec![]), Err(ReconError::InvalidInput { .. })));
    }

    #[test]
    fn test_update_rename_moves_placeholder() {
        let mut registry = margarita_registry();
        let id = registry.items()[0].id.clone();

        let (item, mutations) = registry
            .update(&id, "Frozen Margarita", registry.items()[0].sub_items.clone())
            .unwrap();

        assert_eq!(item.name, "Frozen Margarita");
        assert!(item.updated_at.is_some());
        assert_eq!(
            mutations,
            vec![
                CatalogMutation::RemovePlaceholder { name: "Margarita".to_string() },
                CatalogMutation::AddPlaceholder { name: "Frozen Margarita".to_string() },
            ]
        );

        let (_, mutations) = registry
            .update(&id, "Frozen Margarita", vec![SubItem { par_name: "Rum".to_string(), qty: 2.0 }])
            .unwrap();
        assert!(mutations.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut registry = margarita_registry();
        let id = registry.items()[0].id.clone();

        let (item, mutation) = registry.remove(&id).unwrap();
        assert_eq!(item.name, "Margarita");
        assert_eq!(mutation, CatalogMutation::RemovePlaceholder { name: "Margarita".to_string() });
        assert!(registry.is_empty());

        assert_eq!(registry.remove(&id).unwrap_err(), ReconError::CompositeNotFound(id));
    }

    #[test]
    fn test_expansion_conservation() {
        let registry = margarita_registry();
        let expander = CompositeExpander::new(registry.items());

        let sale = SaleRecord::new(date(), "Margarita", 3.0, "Cocktail");
        let records = expander.expand(&[sale]);

        assert_eq!(records.len(), 1 + 3);

        assert_eq!(records[0].name, "Margarita");
        assert_eq!(records[0].qty, -3.0);
        assert_eq!(records[0].conversion_rate, Some(1.0));

        assert_eq!(records[1].name, "Tequila, Patron, 70cl");
        assert_eq!(records[1].qty, 6.0);
        assert!((records[1].conversion_rate.unwrap() - 1.0 / 23.0).abs() < 1e-12);

        // non-spirit ingredient passes through at 1
        assert_eq!(records[3].name, "Lime juice");
        assert_eq!(records[3].conversion_rate, Some(1.0));

        assert!(records[1..]
            .iter()
            .all(|r| r.original_name == "Margarita" && matches!(r.origin, SaleOrigin::Ingredient { .. })));
    }

    #[test]
    fn test_expansion_matches_original_name_fuzzily() {
        let registry = margarita_registry();
        let expander = CompositeExpander::new(registry.items());

        let mut sale = SaleRecord::new(date(), "Tequila, Patron, 70cl", 1.0, "Cocktail");
        sale.original_name = "Margarita".to_string();

        let records = expander.expand_one(&sale).unwrap();
        assert_eq!(records[0].name, "Margarita");
    }

    #[test]
    fn test_unmatched_sale_passes_through() {
        let registry = margarita_registry();
        let expander = CompositeExpander::new(registry.items());

        let sale = SaleRecord::new(date(), "Chang", 4.0, "Beer");
        let records = expander.expand(&[sale.clone()]);

        assert_eq!(records, vec![sale]);
    }

    #[test]
    fn test_no_composites_means_no_expansion() {
        let expander = CompositeExpander::new(&[]);
        let sale = SaleRecord::new(date(), "Margarita", 1.0, "Cocktail");

        assert!(expander.expand_one(&sale).is_none());
    }
}
