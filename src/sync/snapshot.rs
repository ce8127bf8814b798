//! List snapshots.
//!
//! Both sides of a sync pass are reduced to the same in-memory shape
//! before the diff runs: a `Snapshot` of `ListItem`s keyed by normalized
//! identity. Mapping and ignore rules are applied here, on the source
//! side only, so the diff and reconciler never see pre-mapping names.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::clients::{ClientResult, DestinationClient, SourceClient, SourceItem};
use crate::sync::mapping::MappingTable;
use crate::sync::normalize::{display_unit, format_amount, ItemKey, UnitTable};

/// A shopping-list item in uniform shape, either side.
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    /// Display name, already mapped on source-built items.
    pub name: String,
    /// Composed display quantity, e.g. "2 cans". Also used for change
    /// detection between the two sides.
    pub quantity_text: Option<String>,
    /// Unit label feeding the identity key.
    pub unit: Option<String>,
    pub category: Option<String>,
    /// Crossed-off on the destination. Source items are never checked.
    pub checked: bool,
    /// Destination item id, needed for deletes. None on source items.
    pub destination_id: Option<String>,
}

impl ListItem {
    pub fn key(&self, units: &UnitTable) -> ItemKey {
        ItemKey::new(&self.name, self.unit.as_deref(), units)
    }
}

/// Insertion-ordered item collection. Duplicate keys collapse, first
/// occurrence in fetch order wins.
#[derive(Debug, Default)]
pub struct Snapshot {
    items: Vec<(ItemKey, ListItem)>,
    index: HashMap<ItemKey, usize>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts unless the key is already present. Returns whether the key
    /// was new.
    pub fn insert(&mut self, key: ItemKey, item: ListItem) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key.clone(), self.items.len());
        self.items.push((key, item));
        true
    }

    pub fn get(&self, key: &ItemKey) -> Option<&ListItem> {
        self.index.get(key).map(|&i| &self.items[i].1)
    }

    pub fn contains_key(&self, key: &ItemKey) -> bool {
        self.index.contains_key(key)
    }

    /// Items in fetch order.
    pub fn iter(&self) -> impl Iterator<Item = (&ItemKey, &ListItem)> {
        self.items.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Builds snapshots of either side. Holds the mapping and unit tables for
/// the process lifetime; the snapshots themselves live for one pass.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    mappings: MappingTable,
    units: UnitTable,
    separator: String,
    use_categories: bool,
}

impl SnapshotBuilder {
    pub fn new(
        mappings: MappingTable,
        units: UnitTable,
        separator: String,
        use_categories: bool,
    ) -> Self {
        Self {
            mappings,
            units,
            separator,
            use_categories,
        }
    }

    pub fn units(&self) -> &UnitTable {
        &self.units
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Fetches a source list and normalizes it: names mapped, ignored
    /// items dropped, amounts composed into display quantities.
    pub async fn source_snapshot<S: SourceClient>(
        &self,
        client: &S,
        list_id: u32,
    ) -> ClientResult<Snapshot> {
        let rows = client.fetch_list_items(list_id).await?;
        let mut snapshot = Snapshot::new();
        for row in rows {
            let mapped = self.mappings.map_name(&row.name);
            if mapped.trim().is_empty() {
                warn!(list_id, "skipping source item without a name");
                continue;
            }
            if self.mappings.is_ignored(mapped) {
                debug!(list_id, item = %row.name, "dropping ignored item");
                continue;
            }
            let item = self.source_item(mapped.to_string(), &row);
            let key = item.key(&self.units);
            if !snapshot.insert(key.clone(), item) {
                debug!(list_id, item = %key, "collapsing duplicate source item");
            }
        }
        Ok(snapshot)
    }

    /// Fetches a destination list, crossed-off entries included, and
    /// splits each raw value into name and quantity.
    pub async fn destination_snapshot<D: DestinationClient>(
        &self,
        client: &D,
        list_name: &str,
    ) -> ClientResult<Snapshot> {
        let rows = client.fetch_list_items(list_name).await?;
        let mut snapshot = Snapshot::new();
        for row in rows {
            let (name, quantity_text) = self.split_value(&row.value);
            if name.is_empty() {
                continue;
            }
            let unit = quantity_text.as_deref().and_then(unit_of_quantity);
            let item = ListItem {
                name,
                quantity_text,
                unit,
                category: row.category,
                checked: row.crossed_off,
                destination_id: Some(row.id),
            };
            let key = item.key(&self.units);
            if !snapshot.insert(key.clone(), item) {
                debug!(list = list_name, item = %key, "collapsing duplicate destination item");
            }
        }
        Ok(snapshot)
    }

    /// The value string sent to the destination for an item.
    pub fn compose_value(&self, item: &ListItem) -> String {
        match &item.quantity_text {
            Some(qty) => format!("{}{}{}", item.name, self.separator, qty),
            None => item.name.clone(),
        }
    }

    fn source_item(&self, name: String, row: &SourceItem) -> ListItem {
        let quantity_text = row.amount.map(|amount| match row.unit.as_deref() {
            Some(unit) if !unit.trim().is_empty() => format!(
                "{} {}",
                format_amount(amount),
                display_unit(amount, unit, row.unit_plural.as_deref())
            ),
            _ => format_amount(amount),
        });
        let category = if self.use_categories {
            row.category
                .as_deref()
                .map(|c| self.mappings.map_category(c).to_string())
        } else {
            None
        };
        ListItem {
            name,
            quantity_text,
            unit: row.unit.clone(),
            category,
            checked: false,
            destination_id: None,
        }
    }

    /// Splits a destination value into base name and quantity text:
    /// configured separator first, then the first parenthesized group.
    /// Taking the first group also drops the "(2)" counter the
    /// destination appends to duplicate adds: "Milk (2 l) (2)" parses as
    /// "Milk" with quantity "2 l".
    fn split_value(&self, value: &str) -> (String, Option<String>) {
        if let Some((base, qty)) = value.split_once(&self.separator) {
            return (base.trim().to_string(), non_blank(qty));
        }
        let trimmed = value.trim();
        if let Some(open) = trimmed.find('(') {
            let base = trimmed[..open].trim();
            if !base.is_empty() {
                if let Some(close) = trimmed[open + 1..].find(')') {
                    let qty = &trimmed[open + 1..open + 1 + close];
                    return (base.to_string(), non_blank(qty));
                }
            }
        }
        (trimmed.to_string(), None)
    }
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Unit portion of a quantity text: everything after a leading numeric
/// token. "2 cans" yields "cans", "2" yields nothing, a non-numeric text
/// is taken as a bare unit. A trailing duplicate counter ("2 l (2)")
/// never reaches the unit.
fn unit_of_quantity(qty: &str) -> Option<String> {
    let qty = strip_duplicate_counter(qty);
    let mut parts = qty.split_whitespace();
    match parts.next() {
        Some(first) if first.parse::<f64>().is_ok() => {
            let rest = parts.collect::<Vec<_>>().join(" ");
            non_blank(&rest)
        }
        Some(_) => non_blank(qty),
        None => None,
    }
}

/// Drops the "(N)" counter the destination appends to an item that was
/// added again while already on the list.
fn strip_duplicate_counter(qty: &str) -> &str {
    let trimmed = qty.trim_end();
    if let Some(rest) = trimmed.strip_suffix(')') {
        if let Some(open) = rest.rfind('(') {
            let digits = &rest[open + 1..];
            let before = rest[..open].trim_end();
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) && !before.is_empty()
            {
                return before;
            }
        }
    }
    qty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ClientError, DestinationItem, NewItem};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeSource {
        items: Vec<SourceItem>,
    }

    #[async_trait]
    impl SourceClient for FakeSource {
        async fn fetch_list_items(&self, _list_id: u32) -> ClientResult<Vec<SourceItem>> {
            Ok(self.items.clone())
        }

        async fn check_connection(&self) -> ClientResult<()> {
            Ok(())
        }
    }

    struct FakeDest {
        items: Vec<DestinationItem>,
    }

    #[async_trait]
    impl DestinationClient for FakeDest {
        async fn fetch_list_items(&self, _list_name: &str) -> ClientResult<Vec<DestinationItem>> {
            Ok(self.items.clone())
        }

        async fn add_item(&self, _list_name: &str, _item: &NewItem) -> ClientResult<()> {
            Err(ClientError::InvalidConfig("not under test".into()))
        }

        async fn remove_item(&self, _list_name: &str, _item_id: &str) -> ClientResult<()> {
            Err(ClientError::InvalidConfig("not under test".into()))
        }

        async fn check_connection(&self) -> ClientResult<()> {
            Ok(())
        }
    }

    fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new(
            MappingTable::default(),
            UnitTable::new(),
            " : ".to_string(),
            true,
        )
    }

    fn builder_with_mappings(names: &[(&str, &str)], sentinel: Option<&str>) -> SnapshotBuilder {
        let names = names
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mappings = MappingTable::new(names, HashMap::new(), sentinel.map(String::from));
        SnapshotBuilder::new(mappings, UnitTable::new(), " : ".to_string(), true)
    }

    fn source_row(name: &str, amount: Option<f64>, unit: Option<&str>) -> SourceItem {
        SourceItem {
            name: name.to_string(),
            amount,
            unit: unit.map(String::from),
            unit_plural: None,
            category: None,
        }
    }

    fn dest_row(id: &str, value: &str, crossed_off: bool) -> DestinationItem {
        DestinationItem {
            id: id.to_string(),
            value: value.to_string(),
            category: None,
            crossed_off,
        }
    }

    #[test]
    fn test_snapshot_first_seen_wins() {
        let units = UnitTable::new();
        let mut snapshot = Snapshot::new();
        let first = ListItem {
            name: "Milk".into(),
            quantity_text: Some("1 l".into()),
            unit: Some("l".into()),
            category: None,
            checked: false,
            destination_id: None,
        };
        let second = ListItem {
            quantity_text: Some("2 l".into()),
            ..first.clone()
        };
        assert!(snapshot.insert(first.key(&units), first.clone()));
        assert!(!snapshot.insert(second.key(&units), second));
        assert_eq!(snapshot.len(), 1);
        let kept = snapshot.get(&first.key(&units)).unwrap();
        assert_eq!(kept.quantity_text.as_deref(), Some("1 l"));
    }

    #[tokio::test]
    async fn test_source_snapshot_applies_name_mapping() {
        let builder = builder_with_mappings(&[("Vollmilch", "Whole Milk")], None);
        let client = FakeSource {
            items: vec![source_row("Vollmilch", Some(1.0), Some("l"))],
        };
        let snapshot = builder.source_snapshot(&client, 1).await.unwrap();
        let (key, item) = snapshot.iter().next().unwrap();
        assert_eq!(key.name, "whole milk");
        assert_eq!(item.name, "Whole Milk");
    }

    #[tokio::test]
    async fn test_source_snapshot_drops_ignored_items() {
        let builder = builder_with_mappings(&[("Test Product", "IGNORE")], Some("IGNORE"));
        let client = FakeSource {
            items: vec![
                source_row("Test Product", Some(1.0), None),
                source_row("Eggs", Some(12.0), None),
            ],
        };
        let snapshot = builder.source_snapshot(&client, 1).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.iter().next().unwrap().1.name, "Eggs");
    }

    #[tokio::test]
    async fn test_source_snapshot_composes_quantity() {
        let builder = builder();
        let client = FakeSource {
            items: vec![
                source_row("Soup", Some(2.0), Some("can")),
                source_row("Milk", Some(1.0), Some("l")),
                source_row("Eggs", Some(12.0), None),
            ],
        };
        let snapshot = builder.source_snapshot(&client, 1).await.unwrap();
        let quantities: Vec<_> = snapshot
            .iter()
            .map(|(_, item)| item.quantity_text.clone().unwrap())
            .collect();
        assert_eq!(quantities, vec!["2 cans", "1 l", "12"]);
    }

    #[tokio::test]
    async fn test_source_snapshot_collapses_duplicates() {
        let builder = builder();
        let client = FakeSource {
            items: vec![
                source_row("Milk", Some(1.0), Some("l")),
                source_row("MILK", Some(2.0), Some("L")),
            ],
        };
        let snapshot = builder.source_snapshot(&client, 1).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        let (_, kept) = snapshot.iter().next().unwrap();
        assert_eq!(kept.quantity_text.as_deref(), Some("1 l"));
    }

    #[tokio::test]
    async fn test_source_snapshot_category_mapping_respects_toggle() {
        let mut categories = HashMap::new();
        categories.insert("Molkerei".to_string(), "Dairy".to_string());
        let mappings = MappingTable::new(HashMap::new(), categories, None);

        let row = SourceItem {
            category: Some("Molkerei".to_string()),
            ..source_row("Milk", Some(1.0), Some("l"))
        };

        let with_categories = SnapshotBuilder::new(
            mappings.clone(),
            UnitTable::new(),
            " : ".to_string(),
            true,
        );
        let client = FakeSource {
            items: vec![row.clone()],
        };
        let snapshot = with_categories.source_snapshot(&client, 1).await.unwrap();
        assert_eq!(
            snapshot.iter().next().unwrap().1.category.as_deref(),
            Some("Dairy")
        );

        let without = SnapshotBuilder::new(mappings, UnitTable::new(), " : ".to_string(), false);
        let client = FakeSource { items: vec![row] };
        let snapshot = without.source_snapshot(&client, 1).await.unwrap();
        assert_eq!(snapshot.iter().next().unwrap().1.category, None);
    }

    #[tokio::test]
    async fn test_destination_snapshot_parses_separator_value() {
        let builder = builder();
        let client = FakeDest {
            items: vec![dest_row("id-1", "Milk : 2 cans", false)],
        };
        let snapshot = builder.destination_snapshot(&client, "Groceries").await.unwrap();
        let (key, item) = snapshot.iter().next().unwrap();
        assert_eq!(item.name, "Milk");
        assert_eq!(item.quantity_text.as_deref(), Some("2 cans"));
        assert_eq!(key.unit, "can");
        assert_eq!(item.destination_id.as_deref(), Some("id-1"));
    }

    #[tokio::test]
    async fn test_destination_snapshot_parses_parenthesized_fallback() {
        let builder = builder();
        let client = FakeDest {
            items: vec![dest_row("id-2", "Bread (1 loaf)", false)],
        };
        let snapshot = builder.destination_snapshot(&client, "Groceries").await.unwrap();
        let (key, item) = snapshot.iter().next().unwrap();
        assert_eq!(item.name, "Bread");
        assert_eq!(item.quantity_text.as_deref(), Some("1 loaf"));
        assert_eq!(key.unit, "loaf");
    }

    #[tokio::test]
    async fn test_destination_snapshot_ignores_duplicate_counter_in_key() {
        // OurGroceries turns a repeated add into "value (2)". The counter
        // must not leak into the identity key, or the item reads as
        // missing and gets added again forever.
        let builder = builder();
        let client = FakeDest {
            items: vec![dest_row("id-4", "Milk : 2 l (2)", false)],
        };
        let snapshot = builder.destination_snapshot(&client, "Groceries").await.unwrap();
        let (key, item) = snapshot.iter().next().unwrap();
        assert_eq!(key.name, "milk");
        assert_eq!(key.unit, "l");
        assert!(snapshot.contains_key(&ItemKey::new("Milk", Some("l"), builder.units())));
        // The counter stays in the quantity text, so the row registers as
        // a quantity change and gets rewritten without it.
        assert_eq!(item.quantity_text.as_deref(), Some("2 l (2)"));
    }

    #[tokio::test]
    async fn test_destination_snapshot_counter_after_parenthesized_quantity() {
        let builder = builder();
        let client = FakeDest {
            items: vec![dest_row("id-5", "Milk (2 l) (2)", false)],
        };
        let snapshot = builder.destination_snapshot(&client, "Groceries").await.unwrap();
        let (key, item) = snapshot.iter().next().unwrap();
        assert_eq!(item.name, "Milk");
        assert_eq!(item.quantity_text.as_deref(), Some("2 l"));
        assert_eq!(key.unit, "l");
    }

    #[tokio::test]
    async fn test_destination_snapshot_bare_value() {
        let builder = builder();
        let client = FakeDest {
            items: vec![dest_row("id-3", "Cheese", true)],
        };
        let snapshot = builder.destination_snapshot(&client, "Groceries").await.unwrap();
        let (key, item) = snapshot.iter().next().unwrap();
        assert_eq!(item.name, "Cheese");
        assert_eq!(item.quantity_text, None);
        assert_eq!(key.unit, "");
        assert!(item.checked);
    }

    #[test]
    fn test_unit_of_quantity_strips_leading_number() {
        assert_eq!(unit_of_quantity("2 cans").as_deref(), Some("cans"));
        assert_eq!(unit_of_quantity("2.5 l").as_deref(), Some("l"));
        assert_eq!(unit_of_quantity("12"), None);
        assert_eq!(unit_of_quantity("a few").as_deref(), Some("a few"));
    }

    #[test]
    fn test_unit_of_quantity_ignores_duplicate_counter() {
        assert_eq!(unit_of_quantity("2 l (2)").as_deref(), Some("l"));
        assert_eq!(unit_of_quantity("2 (2)"), None);
        // a single parenthesized number is a quantity, not a counter
        assert_eq!(strip_duplicate_counter("(2)"), "(2)");
        assert_eq!(strip_duplicate_counter("2 l (2) "), "2 l");
        assert_eq!(strip_duplicate_counter("2 l (ii)"), "2 l (ii)");
    }

    #[test]
    fn test_compose_value_round_trips_split() {
        let builder = builder();
        let item = ListItem {
            name: "Milk".into(),
            quantity_text: Some("2 l".into()),
            unit: Some("l".into()),
            category: None,
            checked: false,
            destination_id: None,
        };
        let value = builder.compose_value(&item);
        assert_eq!(value, "Milk : 2 l");
        let (name, qty) = builder.split_value(&value);
        assert_eq!(name, "Milk");
        assert_eq!(qty.as_deref(), Some("2 l"));
    }
}
