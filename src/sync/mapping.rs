//! Name and category mapping.
//!
//! Source-side labels can be rewritten before the diff runs: rename a
//! Grocy product for the OurGroceries list, redirect a product group to a
//! different category, or drop an item entirely via the ignore sentinel.
//! Unmapped labels pass through unchanged.

use std::collections::HashMap;

/// Immutable mapping table, built once from config at startup.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    names: HashMap<String, String>,
    categories: HashMap<String, String>,
    ignore_sentinel: Option<String>,
}

impl MappingTable {
    pub fn new(
        names: HashMap<String, String>,
        categories: HashMap<String, String>,
        ignore_sentinel: Option<String>,
    ) -> Self {
        Self {
            names,
            categories,
            ignore_sentinel,
        }
    }

    /// Maps a source item name. Exact-match lookup, pass-through default.
    pub fn map_name<'a>(&'a self, raw: &'a str) -> &'a str {
        self.names.get(raw).map(String::as_str).unwrap_or(raw)
    }

    /// Maps a source category label. Exact-match lookup, pass-through default.
    pub fn map_category<'a>(&'a self, raw: &'a str) -> &'a str {
        self.categories.get(raw).map(String::as_str).unwrap_or(raw)
    }

    /// True when a mapped name resolves to the ignore sentinel; such items
    /// never reach the snapshot.
    pub fn is_ignored(&self, mapped_name: &str) -> bool {
        self.ignore_sentinel
            .as_deref()
            .is_some_and(|sentinel| sentinel == mapped_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(names: &[(&str, &str)], sentinel: Option<&str>) -> MappingTable {
        let names = names
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MappingTable::new(
            names,
            HashMap::new(),
            sentinel.map(String::from),
        )
    }

    #[test]
    fn test_mapped_name_is_rewritten() {
        let table = table_with(&[("Vollmilch", "Whole Milk")], None);
        assert_eq!(table.map_name("Vollmilch"), "Whole Milk");
    }

    #[test]
    fn test_unmapped_name_passes_through() {
        let table = table_with(&[("Vollmilch", "Whole Milk")], None);
        assert_eq!(table.map_name("Eggs"), "Eggs");
    }

    #[test]
    fn test_lookup_is_exact_match() {
        let table = table_with(&[("Vollmilch", "Whole Milk")], None);
        assert_eq!(table.map_name("vollmilch"), "vollmilch");
    }

    #[test]
    fn test_category_pass_through() {
        let table = MappingTable::default();
        assert_eq!(table.map_category("Produce"), "Produce");
    }

    #[test]
    fn test_ignore_sentinel_matches_mapped_name() {
        let table = table_with(&[("Test Product", "IGNORE")], Some("IGNORE"));
        assert!(table.is_ignored(table.map_name("Test Product")));
        assert!(!table.is_ignored("Whole Milk"));
    }

    #[test]
    fn test_no_sentinel_ignores_nothing() {
        let table = MappingTable::default();
        assert!(!table.is_ignored("IGNORE"));
    }
}
