//! Computes the difference between two list snapshots.
//!
//! Pure and synchronous: same snapshots in, same delta out. Ordering
//! follows snapshot fetch order.

use serde::Deserialize;

use crate::sync::snapshot::{ListItem, Snapshot};

/// Removal gating: whether destination-only items are removed at all,
/// whether removal is only simulated, and whether crossed-off items are
/// eligible. Everything defaults to off.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeletionPolicy {
    pub enabled: bool,
    pub dry_run: bool,
    pub remove_checked: bool,
}

/// A matched item whose display quantity changed on the source side.
/// Applied as remove + re-add, since the destination has no update call.
#[derive(Debug, Clone)]
pub struct ItemUpdate {
    pub destination_id: String,
    pub old_quantity: Option<String>,
    pub item: ListItem,
}

/// What the reconciler has to apply to bring the destination in line.
#[derive(Debug, Default)]
pub struct Delta {
    pub to_add: Vec<ListItem>,
    pub to_remove: Vec<ListItem>,
    pub to_update: Vec<ItemUpdate>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }
}

/// Diffs the source snapshot against the destination snapshot.
///
/// Source items missing from the destination become additions. With
/// deletion enabled, destination items missing from the source become
/// removals; crossed-off items are spared unless the policy says
/// otherwise. Matched keys never land in either set, but a quantity
/// change on a matched unchecked item becomes an update.
pub fn diff(source: &Snapshot, destination: &Snapshot, deletion: &DeletionPolicy) -> Delta {
    let mut delta = Delta::default();

    for (key, item) in source.iter() {
        match destination.get(key) {
            None => delta.to_add.push(item.clone()),
            Some(existing) => {
                // Crossed-off matches block the re-add and are left alone.
                if existing.checked {
                    continue;
                }
                if let Some(id) = &existing.destination_id {
                    if quantity_changed(item, existing) {
                        delta.to_update.push(ItemUpdate {
                            destination_id: id.clone(),
                            old_quantity: existing.quantity_text.clone(),
                            item: item.clone(),
                        });
                    }
                }
            }
        }
    }

    if deletion.enabled {
        for (key, item) in destination.iter() {
            if source.contains_key(key) {
                continue;
            }
            if item.checked && !deletion.remove_checked {
                continue;
            }
            delta.to_remove.push(item.clone());
        }
    }

    delta
}

fn quantity_changed(new: &ListItem, existing: &ListItem) -> bool {
    canonical_quantity(new.quantity_text.as_deref())
        != canonical_quantity(existing.quantity_text.as_deref())
}

/// Case- and whitespace-insensitive form for change detection.
fn canonical_quantity(qty: Option<&str>) -> String {
    qty.unwrap_or("")
        .split_whitespace()
        .collect::<String>()
        .to_lowercase()
}
