//! Applies a delta to the destination list.
//!
//! Removals run first, then quantity updates (remove + re-add, the
//! destination has no update call), then additions. Every call goes
//! through the retry policy; a permanent failure is recorded against the
//! item and the pass moves on. One bad item never blocks the rest.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clients::{ClientError, DestinationClient, NewItem};
use crate::sync::diff::{Delta, DeletionPolicy, ItemUpdate};
use crate::sync::retry::{RetryFailure, RetryPolicy};
use crate::sync::snapshot::{ListItem, SnapshotBuilder};

/// Which operation failed for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOp {
    Add,
    Remove,
    Update,
}

impl std::fmt::Display for ItemOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemOp::Add => write!(f, "add"),
            ItemOp::Remove => write!(f, "remove"),
            ItemOp::Update => write!(f, "update"),
        }
    }
}

/// A single item the reconciler gave up on.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub item: String,
    pub op: ItemOp,
    /// Attempts made before giving up, the first call included.
    pub attempts: u32,
    pub error: ClientError,
}

/// Outcome of applying one delta.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    /// Removals only simulated because the deletion policy is in dry run.
    pub dry_run_removals: usize,
    pub failures: Vec<ItemFailure>,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies deltas against a destination list.
pub struct Reconciler<'a> {
    builder: &'a SnapshotBuilder,
    retry: RetryPolicy,
    deletion: DeletionPolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(builder: &'a SnapshotBuilder, retry: RetryPolicy, deletion: DeletionPolicy) -> Self {
        Self {
            builder,
            retry,
            deletion,
        }
    }

    pub async fn apply<D: DestinationClient>(
        &self,
        client: &D,
        list_name: &str,
        delta: &Delta,
    ) -> RunResult {
        let started = Instant::now();
        let mut result = RunResult::default();

        for item in &delta.to_remove {
            self.apply_removal(client, list_name, item, &mut result).await;
        }
        for update in &delta.to_update {
            self.apply_update(client, list_name, update, &mut result).await;
        }
        for item in &delta.to_add {
            match self.add_with_guard(client, list_name, item).await {
                Ok(()) => {
                    info!(list = list_name, item = %item.name, "added item");
                    result.added += 1;
                }
                Err(failure) => {
                    warn!(list = list_name, item = %item.name, error = %failure.error, "add failed");
                    result.failures.push(ItemFailure {
                        item: item.name.clone(),
                        op: ItemOp::Add,
                        attempts: failure.attempts,
                        error: failure.error,
                    });
                }
            }
        }

        result.elapsed = started.elapsed();
        result
    }

    async fn apply_removal<D: DestinationClient>(
        &self,
        client: &D,
        list_name: &str,
        item: &ListItem,
        result: &mut RunResult,
    ) {
        let id = match item.destination_id.as_deref() {
            Some(id) => id,
            None => return,
        };
        if self.deletion.dry_run {
            info!(list = list_name, item = %item.name, "dry run: would remove item");
            result.dry_run_removals += 1;
            return;
        }
        let removed = self
            .retry
            .execute("remove item", |_attempt| client.remove_item(list_name, id))
            .await;
        match removed {
            Ok(()) => {
                info!(list = list_name, item = %item.name, "removed item");
                result.removed += 1;
            }
            Err(failure) => {
                warn!(list = list_name, item = %item.name, error = %failure.error, "remove failed");
                result.failures.push(ItemFailure {
                    item: item.name.clone(),
                    op: ItemOp::Remove,
                    attempts: failure.attempts,
                    error: failure.error,
                });
            }
        }
    }

    /// Quantity updates are not gated by the deletion policy: the remove
    /// here is half of a rewrite, not a deletion.
    async fn apply_update<D: DestinationClient>(
        &self,
        client: &D,
        list_name: &str,
        update: &ItemUpdate,
        result: &mut RunResult,
    ) {
        let id = update.destination_id.as_str();
        let removed = self
            .retry
            .execute("update: remove stale entry", |_attempt| {
                client.remove_item(list_name, id)
            })
            .await;
        if let Err(failure) = removed {
            warn!(
                list = list_name,
                item = %update.item.name,
                error = %failure.error,
                "update failed while removing stale entry"
            );
            result.failures.push(ItemFailure {
                item: update.item.name.clone(),
                op: ItemOp::Update,
                attempts: failure.attempts,
                error: failure.error,
            });
            return;
        }

        match self.add_with_guard(client, list_name, &update.item).await {
            Ok(()) => {
                info!(
                    list = list_name,
                    item = %update.item.name,
                    old = update.old_quantity.as_deref().unwrap_or("none"),
                    new = update.item.quantity_text.as_deref().unwrap_or("none"),
                    "updated item quantity"
                );
                result.updated += 1;
            }
            Err(failure) => {
                // The stale entry is gone; the next run re-adds the item.
                warn!(
                    list = list_name,
                    item = %update.item.name,
                    error = %failure.error,
                    "update failed while re-adding entry"
                );
                result.failures.push(ItemFailure {
                    item: update.item.name.clone(),
                    op: ItemOp::Update,
                    attempts: failure.attempts,
                    error: failure.error,
                });
            }
        }
    }

    /// Adds an item under the retry policy. Replayed attempts first check
    /// a fresh destination snapshot, so an add whose response got lost is
    /// not applied twice.
    async fn add_with_guard<D: DestinationClient>(
        &self,
        client: &D,
        list_name: &str,
        item: &ListItem,
    ) -> Result<(), RetryFailure> {
        let new_item = NewItem {
            value: self.builder.compose_value(item),
            category: item.category.clone(),
        };
        let key = item.key(self.builder.units());

        self.retry
            .execute("add item", |attempt| {
                let new_item = new_item.clone();
                let key = key.clone();
                async move {
                    if attempt > 0 {
                        let current = self
                            .builder
                            .destination_snapshot(client, list_name)
                            .await?;
                        if current.contains_key(&key) {
                            debug!(list = list_name, item = %key, "already present after retry, skipping duplicate add");
                            return Ok(());
                        }
                    }
                    client.add_item(list_name, &new_item).await
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ClientResult, DestinationItem};
    use crate::sync::diff::Delta;
    use crate::sync::mapping::MappingTable;
    use crate::sync::normalize::UnitTable;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Destination fake with per-value scripted add failures. A failure
    /// with `lands_anyway` simulates a request that was applied even
    /// though the response was lost.
    #[derive(Default)]
    struct ScriptedDest {
        items: Mutex<Vec<DestinationItem>>,
        calls: Mutex<Vec<String>>,
        add_failures: Mutex<HashMap<String, Vec<ClientError>>>,
        remove_failures: Mutex<HashMap<String, Vec<ClientError>>>,
        lands_anyway: bool,
        next_id: Mutex<u32>,
    }

    impl ScriptedDest {
        fn with_items(values: &[&str]) -> Self {
            let items = values
                .iter()
                .enumerate()
                .map(|(i, v)| DestinationItem {
                    id: format!("d{i}"),
                    value: v.to_string(),
                    category: None,
                    crossed_off: false,
                })
                .collect();
            Self {
                items: Mutex::new(items),
                ..Self::default()
            }
        }

        fn fail_add(&self, value: &str, errors: Vec<ClientError>) {
            self.add_failures
                .lock()
                .unwrap()
                .insert(value.to_string(), errors);
        }

        fn fail_remove(&self, id: &str, errors: Vec<ClientError>) {
            self.remove_failures
                .lock()
                .unwrap()
                .insert(id.to_string(), errors);
        }

        fn call_log(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DestinationClient for ScriptedDest {
        async fn fetch_list_items(&self, _list_name: &str) -> ClientResult<Vec<DestinationItem>> {
            Ok(self.items.lock().unwrap().clone())
        }

        async fn add_item(&self, _list_name: &str, item: &NewItem) -> ClientResult<()> {
            self.calls.lock().unwrap().push(format!("add:{}", item.value));
            let pending = self
                .add_failures
                .lock()
                .unwrap()
                .get_mut(&item.value)
                .and_then(|queue| {
                    if queue.is_empty() {
                        None
                    } else {
                        Some(queue.remove(0))
                    }
                });
            let mut id_guard = self.next_id.lock().unwrap();
            *id_guard += 1;
            let id = format!("n{}", *id_guard);
            drop(id_guard);
            if let Some(error) = pending {
                if self.lands_anyway {
                    self.items.lock().unwrap().push(DestinationItem {
                        id,
                        value: item.value.clone(),
                        category: item.category.clone(),
                        crossed_off: false,
                    });
                }
                return Err(error);
            }
            self.items.lock().unwrap().push(DestinationItem {
                id,
                value: item.value.clone(),
                category: item.category.clone(),
                crossed_off: false,
            });
            Ok(())
        }

        async fn remove_item(&self, _list_name: &str, item_id: &str) -> ClientResult<()> {
            self.calls.lock().unwrap().push(format!("remove:{item_id}"));
            let pending = self
                .remove_failures
                .lock()
                .unwrap()
                .get_mut(item_id)
                .and_then(|queue| {
                    if queue.is_empty() {
                        None
                    } else {
                        Some(queue.remove(0))
                    }
                });
            if let Some(error) = pending {
                return Err(error);
            }
            self.items.lock().unwrap().retain(|i| i.id != item_id);
            Ok(())
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

    fn reconciler(builder: &SnapshotBuilder) -> Reconciler<'_> {
        Reconciler::new(builder, RetryPolicy::new(3, 0), DeletionPolicy::default())
    }

    fn add_item_named(name: &str, quantity: Option<&str>) -> ListItem {
        ListItem {
            name: name.to_string(),
            quantity_text: quantity.map(String::from),
            unit: None,
            category: None,
            checked: false,
            destination_id: None,
        }
    }

    fn remove_item_with_id(name: &str, id: &str) -> ListItem {
        ListItem {
            destination_id: Some(id.to_string()),
            ..add_item_named(name, None)
        }
    }

    fn transient() -> ClientError {
        ClientError::Unreachable("connection reset".into())
    }

    #[tokio::test]
    async fn test_apply_removals_before_adds() {
        let builder = builder();
        let rec = reconciler(&builder);
        let dest = ScriptedDest::with_items(&["Cheese"]);

        let delta = Delta {
            to_add: vec![add_item_named("Eggs", None)],
            to_remove: vec![remove_item_with_id("Cheese", "d0")],
            to_update: vec![],
        };
        let result = rec.apply(&dest, "Groceries", &delta).await;

        assert_eq!(result.added, 1);
        assert_eq!(result.removed, 1);
        assert!(result.is_clean());
        assert_eq!(dest.call_log(), vec!["remove:d0", "add:Eggs"]);
    }

    #[tokio::test]
    async fn test_permanent_failure_isolated_to_one_item() {
        let builder = builder();
        let rec = reconciler(&builder);
        let dest = ScriptedDest::with_items(&[]);
        dest.fail_add(
            "Eggs",
            vec![ClientError::Api {
                status: 400,
                detail: "rejected".into(),
            }],
        );

        let delta = Delta {
            to_add: vec![
                add_item_named("Milk", None),
                add_item_named("Eggs", None),
                add_item_named("Bread", None),
            ],
            to_remove: vec![],
            to_update: vec![],
        };
        let result = rec.apply(&dest, "Groceries", &delta).await;

        assert_eq!(result.added, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].item, "Eggs");
        assert_eq!(result.failures[0].op, ItemOp::Add);
        // A permanent rejection is not retried, so one attempt was made.
        assert_eq!(result.failures[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_add_retried_to_success() {
        let builder = builder();
        let rec = reconciler(&builder);
        let dest = ScriptedDest::with_items(&[]);
        dest.fail_add("Milk", vec![transient()]);

        let delta = Delta {
            to_add: vec![add_item_named("Milk", None)],
            to_remove: vec![],
            to_update: vec![],
        };
        let result = rec.apply(&dest, "Groceries", &delta).await;

        assert_eq!(result.added, 1);
        assert!(result.is_clean());
        // First call failed, second succeeded.
        assert_eq!(dest.call_log(), vec!["add:Milk", "add:Milk"]);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_recorded_once_as_permanent() {
        let builder = builder();
        let rec = Reconciler::new(&builder, RetryPolicy::new(2, 0), DeletionPolicy::default());
        let dest = ScriptedDest::with_items(&[]);
        dest.fail_add("Milk", vec![transient(), transient(), transient(), transient()]);

        let delta = Delta {
            to_add: vec![add_item_named("Milk", None)],
            to_remove: vec![],
            to_update: vec![],
        };
        let result = rec.apply(&dest, "Groceries", &delta).await;

        assert_eq!(result.added, 0);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].attempts, 3);
        match &result.failures[0].error {
            ClientError::RetriesExhausted { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_guard_skips_readd_after_lost_response() {
        let builder = builder();
        let rec = reconciler(&builder);
        let mut dest = ScriptedDest::with_items(&[]);
        dest.lands_anyway = true;
        dest.fail_add("Milk", vec![transient()]);

        let delta = Delta {
            to_add: vec![add_item_named("Milk", None)],
            to_remove: vec![],
            to_update: vec![],
        };
        let result = rec.apply(&dest, "Groceries", &delta).await;

        assert_eq!(result.added, 1);
        assert!(result.is_clean());
        // The item landed during the failed call; the retry noticed and
        // never issued a second insert.
        assert_eq!(dest.call_log(), vec!["add:Milk"]);
        assert_eq!(dest.items.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_removing() {
        let builder = builder();
        let deletion = DeletionPolicy {
            enabled: true,
            dry_run: true,
            remove_checked: false,
        };
        let rec = Reconciler::new(&builder, RetryPolicy::new(3, 0), deletion);
        let dest = ScriptedDest::with_items(&["Cheese", "Wine"]);

        let delta = Delta {
            to_add: vec![],
            to_remove: vec![
                remove_item_with_id("Cheese", "d0"),
                remove_item_with_id("Wine", "d1"),
            ],
            to_update: vec![],
        };
        let result = rec.apply(&dest, "Groceries", &delta).await;

        assert_eq!(result.removed, 0);
        assert_eq!(result.dry_run_removals, 2);
        assert!(dest.call_log().is_empty());
        assert_eq!(dest.items.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_removes_stale_then_readds() {
        let builder = builder();
        let rec = reconciler(&builder);
        let dest = ScriptedDest::with_items(&["Milk : 1 l"]);

        let delta = Delta {
            to_add: vec![],
            to_remove: vec![],
            to_update: vec![ItemUpdate {
                destination_id: "d0".into(),
                old_quantity: Some("1 l".into()),
                item: add_item_named("Milk", Some("2 l")),
            }],
        };
        let result = rec.apply(&dest, "Groceries", &delta).await;

        assert_eq!(result.updated, 1);
        assert!(result.is_clean());
        assert_eq!(dest.call_log(), vec!["remove:d0", "add:Milk : 2 l"]);
        let items = dest.items.lock().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value, "Milk : 2 l");
    }

    #[tokio::test]
    async fn test_update_stale_remove_failure_skips_readd() {
        let builder = builder();
        let rec = reconciler(&builder);
        let dest = ScriptedDest::with_items(&["Milk : 1 l"]);
        dest.fail_remove(
            "d0",
            vec![ClientError::Api {
                status: 400,
                detail: "rejected".into(),
            }],
        );

        let delta = Delta {
            to_add: vec![],
            to_remove: vec![],
            to_update: vec![ItemUpdate {
                destination_id: "d0".into(),
                old_quantity: Some("1 l".into()),
                item: add_item_named("Milk", Some("2 l")),
            }],
        };
        let result = rec.apply(&dest, "Groceries", &delta).await;

        assert_eq!(result.updated, 0);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].op, ItemOp::Update);
        assert_eq!(dest.call_log(), vec!["remove:d0"]);
    }
}
