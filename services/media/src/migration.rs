//! Bulk reassignment of records from one media type to another
//!
//! A migration scans the source type page by page and moves each record with
//! a conditional update guarded on the source id. Metadata is never touched,
//! so keys the target schema does not know survive as opaque metadata.
//! Per-record failures are collected, not raised; rerunning the same
//! migration only picks up what is still typed as the source.

use futures::{StreamExt, stream};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{GovernanceError, GovernanceResult};
use crate::lifecycle::{LifecycleAction, LifecycleStateMachine, transition};
use crate::lock::{AdvisoryLock, LockLease};
use crate::models::{MediaTypeStatus, RecordPatch, UpdateOutcome};
use crate::registry::SchemaRegistry;
use crate::store::RecordStore;
use crate::usage::UsageTracker;

/// Outcome of a migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub source_id: Uuid,
    pub target_id: Uuid,
    /// Records changed by this call
    pub migrated_count: u64,
    /// Records that could not be moved; retry them later
    pub failed_ids: Vec<Uuid>,
    /// Records already moved or removed by someone else
    pub skipped_count: u64,
    /// Stopped at a batch boundary before the scan finished
    pub cancelled: bool,
    /// Status the source ended up in; `None` when it no longer exists
    ///
    /// Normally `Deprecated`. Anything else means the source was changed by
    /// someone else while the records were being moved.
    pub source_status: Option<MediaTypeStatus>,
}

impl MigrationReport {
    fn new(source_id: Uuid, target_id: Uuid) -> Self {
        Self {
            source_id,
            target_id,
            ..Default::default()
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failed_ids.is_empty()
    }
}

enum RecordMove {
    Moved,
    Skipped,
    Failed(Uuid),
}

/// Moves records between media types and drives the source's lifecycle
#[derive(Clone)]
pub struct MigrationEngine {
    registry: SchemaRegistry,
    lifecycle: LifecycleStateMachine,
    usage: UsageTracker,
    records: Arc<dyn RecordStore>,
    locks: Arc<dyn AdvisoryLock>,
    batch_size: usize,
    concurrency: usize,
}

impl MigrationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: SchemaRegistry,
        lifecycle: LifecycleStateMachine,
        usage: UsageTracker,
        records: Arc<dyn RecordStore>,
        locks: Arc<dyn AdvisoryLock>,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            usage,
            records,
            locks,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn migrate(&self, source_id: Uuid, target_id: Uuid) -> GovernanceResult<MigrationReport> {
        self.migrate_with_cancel(source_id, target_id, &CancellationToken::new())
            .await
    }

    /// Migrate every record of `source_id` to `target_id`
    ///
    /// `cancel` is checked between batches. A cancelled run leaves the source
    /// status untouched and can simply be started again.
    pub async fn migrate_with_cancel(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        cancel: &CancellationToken,
    ) -> GovernanceResult<MigrationReport> {
        self.validate(source_id, target_id).await?;

        let lease = self.locks.acquire(&lock_key(source_id)).await?;
        let result = self.scan_and_move(&lease, source_id, target_id, cancel).await;
        self.release(lease).await;
        let mut report = result?;

        self.finish(&mut report).await?;
        Ok(report)
    }

    /// Re-attempt specific records left behind by an earlier run
    pub async fn retry(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        record_ids: &[Uuid],
    ) -> GovernanceResult<MigrationReport> {
        self.validate(source_id, target_id).await?;

        let lease = self.locks.acquire(&lock_key(source_id)).await?;
        let result = self.move_listed(&lease, source_id, target_id, record_ids).await;
        self.release(lease).await;
        let mut report = result?;

        self.finish(&mut report).await?;
        Ok(report)
    }

    async fn release(&self, lease: LockLease) {
        let key = lease.key().to_string();
        if let Err(e) = self.locks.release(lease).await {
            error!("Failed to release migration lock '{}': {}", key, e);
        }
    }

    /// Renew the lease before another batch; a lost lease stops the run
    async fn keep_lease(&self, lease: &LockLease, report: &MigrationReport) -> GovernanceResult<()> {
        self.locks.extend(lease).await.inspect_err(|e| {
            warn!(
                "Stopping migration {} -> {} after {} moved, {} failed: {}",
                report.source_id,
                report.target_id,
                report.migrated_count,
                report.failed_ids.len(),
                e
            );
        })
    }

    async fn move_listed(
        &self,
        lease: &LockLease,
        source_id: Uuid,
        target_id: Uuid,
        record_ids: &[Uuid],
    ) -> GovernanceResult<MigrationReport> {
        let mut report = MigrationReport::new(source_id, target_id);
        for (i, chunk) in record_ids.chunks(self.batch_size).enumerate() {
            if i > 0 {
                self.keep_lease(lease, &report).await?;
            }
            self.move_batch(chunk.to_vec(), &mut report).await;
        }
        Ok(report)
    }

    async fn validate(&self, source_id: Uuid, target_id: Uuid) -> GovernanceResult<()> {
        if source_id == target_id {
            return Err(GovernanceError::Validation(
                "Source and target media types must differ".to_string(),
            ));
        }
        let source = self.registry.load(source_id).await?;
        let target = self.registry.load(target_id).await?;

        transition(target.status, LifecycleAction::MigrateInto)?;
        // the source must be able to end up deprecated
        transition(source.status, LifecycleAction::Deprecate)?;
        Ok(())
    }

    async fn scan_and_move(
        &self,
        lease: &LockLease,
        source_id: Uuid,
        target_id: Uuid,
        cancel: &CancellationToken,
    ) -> GovernanceResult<MigrationReport> {
        info!("Migrating records from {} to {}", source_id, target_id);
        let mut report = MigrationReport::new(source_id, target_id);
        let mut after = None;

        loop {
            if cancel.is_cancelled() {
                warn!("Migration from {} cancelled at a batch boundary", source_id);
                report.cancelled = true;
                break;
            }
            if after.is_some() {
                self.keep_lease(lease, &report).await?;
            }

            let batch = self.records.find(source_id, after, self.batch_size).await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);
            let full = batch.len() == self.batch_size;

            let ids = batch.into_iter().map(|record| record.id).collect();
            self.move_batch(ids, &mut report).await;
            info!(
                "Migration {} -> {}: {} moved, {} failed so far",
                source_id,
                target_id,
                report.migrated_count,
                report.failed_ids.len()
            );

            if !full {
                break;
            }
        }
        Ok(report)
    }

    async fn move_batch(&self, ids: Vec<Uuid>, report: &mut MigrationReport) {
        let (source_id, target_id) = (report.source_id, report.target_id);
        let outcomes: Vec<RecordMove> = stream::iter(ids)
            .map(|id| self.move_record(id, source_id, target_id))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                RecordMove::Moved => report.migrated_count += 1,
                RecordMove::Skipped => report.skipped_count += 1,
                RecordMove::Failed(id) => report.failed_ids.push(id),
            }
        }
    }

    async fn move_record(&self, id: Uuid, source_id: Uuid, target_id: Uuid) -> RecordMove {
        let patch = RecordPatch::Reassign {
            media_type_id: target_id,
        };
        match self.records.conditional_update(id, source_id, &patch).await {
            Ok(UpdateOutcome::Applied) => RecordMove::Moved,
            Ok(UpdateOutcome::Missing) => RecordMove::Skipped,
            Ok(UpdateOutcome::Conflict) => match self.records.get(id).await {
                // an earlier or concurrent run already moved it
                Ok(Some(record)) if record.media_type_id == target_id => RecordMove::Skipped,
                Ok(None) => RecordMove::Skipped,
                Ok(Some(record)) => {
                    warn!(
                        "Record {} moved to {} concurrently; leaving it in place",
                        id, record.media_type_id
                    );
                    RecordMove::Failed(id)
                }
                Err(e) => {
                    warn!("Failed to re-read record {}: {}", id, e);
                    RecordMove::Failed(id)
                }
            },
            Err(e) => {
                warn!("Failed to migrate record {}: {}", id, e);
                RecordMove::Failed(id)
            }
        }
    }

    /// Deprecate the source unless the run was cancelled, then refresh usage
    ///
    /// The records have already moved at this point, so a source that was
    /// archived or deleted underneath the run is logged and reported rather
    /// than failing the whole call.
    async fn finish(&self, report: &mut MigrationReport) -> GovernanceResult<()> {
        let source_id = report.source_id;
        let outcome = if report.cancelled {
            self.registry.load(source_id).await
        } else {
            self.lifecycle.deprecate(source_id, report.target_id).await
        };
        report.source_status = match outcome {
            Ok(source) => Some(source.status),
            Err(GovernanceError::InvalidTransition { from, .. }) => {
                warn!(
                    "Source {} became {} during migration; leaving its status as is",
                    source_id, from
                );
                Some(from)
            }
            Err(GovernanceError::NotFound { .. }) => {
                warn!("Source {} was deleted during migration", source_id);
                None
            }
            Err(e) => return Err(e),
        };

        for id in [report.source_id, report.target_id] {
            if let Err(e) = self.usage.refresh_usage_count(id).await {
                warn!("Failed to refresh cached usage count of {}: {}", id, e);
            }
        }

        info!(
            "Migration {} -> {} finished: {} migrated, {} skipped, {} failed{}",
            report.source_id,
            report.target_id,
            report.migrated_count,
            report.skipped_count,
            report.failed_ids.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(())
    }
}

fn lock_key(source_id: Uuid) -> String {
    format!("migration:{}", source_id)
}
