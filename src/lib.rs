//! Grocy to OurGroceries shopping-list sync
//!
//! One-way reconciliation: configured Grocy shopping lists are mirrored
//! into OurGroceries lists. Each run fetches both sides, normalizes and
//! maps the source items, diffs against the destination and applies the
//! difference with per-item retry.

pub mod clients;
pub mod config;
pub mod sync;

pub use clients::{
    ClientError, DestinationClient, DestinationItem, GrocyClient, ListSide, NewItem,
    OurGroceriesClient, SourceClient, SourceItem,
};
pub use config::{Config, ConfigError};
pub use sync::{
    diff, DeletionPolicy, Delta, ItemKey, ListItem, MappingTable, Orchestrator, PairOutcome,
    PairReport, Reconciler, RetryPolicy, RunReport, RunResult, Snapshot, SnapshotBuilder,
    SyncError, UnitTable,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
