//! The sync engine.
//!
//! A run flows through these modules in order: snapshots of both sides
//! are built (`snapshot`, with `normalize` and `mapping` applied on the
//! source side), the pure `diff` computes what to change, and the
//! `reconcile` step applies it under the `retry` policy. `orchestrator`
//! drives that pipeline across all configured list pairs.

pub mod diff;
pub mod error;
pub mod mapping;
pub mod normalize;
pub mod orchestrator;
pub mod reconcile;
pub mod retry;
pub mod snapshot;

pub use diff::{diff, DeletionPolicy, Delta, ItemUpdate};
pub use error::SyncError;
pub use mapping::MappingTable;
pub use normalize::{normalize_name, normalize_unit, ItemKey, UnitTable};
pub use orchestrator::{Orchestrator, PairOutcome, PairReport, RunReport};
pub use reconcile::{ItemFailure, ItemOp, Reconciler, RunResult};
pub use retry::{RetryFailure, RetryPolicy};
pub use snapshot::{ListItem, Snapshot, SnapshotBuilder};
