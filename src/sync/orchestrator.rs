//! Drives a full sync run across the configured list pairs.
//!
//! Pairs are processed strictly in order. A fetch failure or a bad pair
//! definition skips that pair and is recorded in the report; only a
//! failed connection preflight aborts the whole run, since it would fail
//! every pair the same way.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::{DestinationClient, ListSide, SourceClient};
use crate::config::ListPair;
use crate::sync::diff::{diff, DeletionPolicy};
use crate::sync::error::SyncError;
use crate::sync::reconcile::{Reconciler, RunResult};
use crate::sync::retry::RetryPolicy;
use crate::sync::snapshot::SnapshotBuilder;

/// How one pair ended.
#[derive(Debug)]
pub enum PairOutcome {
    Completed(RunResult),
    Skipped(SyncError),
}

/// Per-pair entry in the run report.
#[derive(Debug)]
pub struct PairReport {
    pub source_list_id: u32,
    pub destination_list: String,
    pub outcome: PairOutcome,
}

impl PairReport {
    /// True when the pair was skipped or finished with item failures.
    pub fn failed(&self) -> bool {
        match &self.outcome {
            PairOutcome::Completed(result) => !result.is_clean(),
            PairOutcome::Skipped(_) => true,
        }
    }
}

/// Aggregated outcome of one sync run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub pairs: Vec<PairReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn total_added(&self) -> usize {
        self.completed().map(|r| r.added).sum()
    }

    pub fn total_removed(&self) -> usize {
        self.completed().map(|r| r.removed).sum()
    }

    pub fn total_updated(&self) -> usize {
        self.completed().map(|r| r.updated).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.pairs.iter().any(PairReport::failed)
    }

    fn completed(&self) -> impl Iterator<Item = &RunResult> {
        self.pairs.iter().filter_map(|p| match &p.outcome {
            PairOutcome::Completed(result) => Some(result),
            PairOutcome::Skipped(_) => None,
        })
    }
}

/// One-way sync driver: source lists into destination lists.
pub struct Orchestrator<'a, S, D> {
    source: &'a S,
    destination: &'a D,
    builder: &'a SnapshotBuilder,
    pairs: &'a [ListPair],
    retry: RetryPolicy,
    deletion: DeletionPolicy,
}

impl<'a, S, D> Orchestrator<'a, S, D>
where
    S: SourceClient,
    D: DestinationClient,
{
    pub fn new(
        source: &'a S,
        destination: &'a D,
        builder: &'a SnapshotBuilder,
        pairs: &'a [ListPair],
        retry: RetryPolicy,
        deletion: DeletionPolicy,
    ) -> Self {
        Self {
            source,
            destination,
            builder,
            pairs,
            retry,
            deletion,
        }
    }

    /// Runs one full pass over every configured pair.
    pub async fn run(&self) -> Result<RunReport, SyncError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(%run_id, pairs = self.pairs.len(), "starting sync run");

        self.source
            .check_connection()
            .await
            .map_err(|source| SyncError::Connection {
                side: ListSide::Source,
                source,
            })?;
        self.destination
            .check_connection()
            .await
            .map_err(|source| SyncError::Connection {
                side: ListSide::Destination,
                source,
            })?;

        let mut pairs = Vec::with_capacity(self.pairs.len());
        for pair in self.pairs {
            let outcome = match self.sync_pair(pair).await {
                Ok(result) => PairOutcome::Completed(result),
                Err(error) => {
                    warn!(
                        list_id = pair.grocy_list_id,
                        list = %pair.ourgroceries_list,
                        error = %error,
                        "skipping list pair"
                    );
                    PairOutcome::Skipped(error)
                }
            };
            pairs.push(PairReport {
                source_list_id: pair.grocy_list_id,
                destination_list: pair.ourgroceries_list.clone(),
                outcome,
            });
        }

        let report = RunReport {
            run_id,
            started_at,
            pairs,
            elapsed: started.elapsed(),
        };
        info!(
            %run_id,
            added = report.total_added(),
            removed = report.total_removed(),
            updated = report.total_updated(),
            failures = report.has_failures(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sync run finished"
        );
        Ok(report)
    }

    async fn sync_pair(&self, pair: &ListPair) -> Result<RunResult, SyncError> {
        validate_pair(pair)?;
        info!(
            list_id = pair.grocy_list_id,
            list = %pair.ourgroceries_list,
            "syncing list pair"
        );

        let source = self
            .builder
            .source_snapshot(self.source, pair.grocy_list_id)
            .await
            .map_err(|source| SyncError::Fetch {
                side: ListSide::Source,
                list: pair.grocy_list_id.to_string(),
                source,
            })?;
        let destination = self
            .builder
            .destination_snapshot(self.destination, &pair.ourgroceries_list)
            .await
            .map_err(|source| SyncError::Fetch {
                side: ListSide::Destination,
                list: pair.ourgroceries_list.clone(),
                source,
            })?;

        let delta = diff(&source, &destination, &self.deletion);
        if source.is_empty() && !delta.to_remove.is_empty() {
            warn!(
                list = %pair.ourgroceries_list,
                removals = delta.to_remove.len(),
                "source list is empty, every eligible destination item is up for removal"
            );
        }
        debug!(
            list = %pair.ourgroceries_list,
            adds = delta.to_add.len(),
            removes = delta.to_remove.len(),
            updates = delta.to_update.len(),
            "computed delta"
        );

        let reconciler = Reconciler::new(self.builder, self.retry.clone(), self.deletion.clone());
        Ok(reconciler
            .apply(self.destination, &pair.ourgroceries_list, &delta)
            .await)
    }
}

fn validate_pair(pair: &ListPair) -> Result<(), SyncError> {
    if pair.ourgroceries_list.trim().is_empty() {
        return Err(SyncError::InvalidPair {
            pair: format!("grocy list {}", pair.grocy_list_id),
            reason: "destination list name is empty".into(),
        });
    }
    if pair.grocy_list_id == 0 {
        return Err(SyncError::InvalidPair {
            pair: format!("'{}'", pair.ourgroceries_list),
            reason: "grocy_list_id must be a positive id".into(),
        });
    }
    Ok(())
}
