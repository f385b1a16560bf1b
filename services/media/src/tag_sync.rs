//! Backfill of a media type's default tags onto its existing records
//!
//! Each record is patched with a compare-and-set on its current tags, so a
//! concurrent edit is retried against fresh data instead of being clobbered.

use futures::{StreamExt, stream};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::GovernanceResult;
use crate::models::{MediaRecord, MediaType, RecordPatch, UpdateOutcome};
use crate::registry::SchemaRegistry;
use crate::store::RecordStore;
use crate::tags::{merge_tags, missing_tags};
use crate::usage::UsageTracker;

const MAX_ATTEMPTS: u32 = 3;

/// Outcome of one backfill run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagSyncReport {
    pub media_type_id: Uuid,
    /// Records whose tags were changed
    pub count: u64,
    /// Records scanned
    pub total_files: u64,
    pub tags_applied: Vec<String>,
    pub failed_ids: Vec<Uuid>,
    pub cancelled: bool,
}

enum TagOutcome {
    Updated,
    Unchanged,
    Failed(Uuid),
}

#[derive(Clone)]
pub struct DefaultTagSync {
    registry: SchemaRegistry,
    records: Arc<dyn RecordStore>,
    usage: UsageTracker,
    batch_size: usize,
    concurrency: usize,
}

impl DefaultTagSync {
    pub fn new(
        registry: SchemaRegistry,
        records: Arc<dyn RecordStore>,
        usage: UsageTracker,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            records,
            usage,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn apply_default_tags(&self, media_type_id: Uuid) -> GovernanceResult<TagSyncReport> {
        self.apply_default_tags_with_cancel(media_type_id, &CancellationToken::new())
            .await
    }

    /// Add every missing default tag to each record of `media_type_id`
    ///
    /// Existing tags, their order and their casing are kept. Running it twice
    /// changes nothing the second time.
    pub async fn apply_default_tags_with_cancel(
        &self,
        media_type_id: Uuid,
        cancel: &CancellationToken,
    ) -> GovernanceResult<TagSyncReport> {
        let media_type = self.registry.load(media_type_id).await?;
        let mut report = TagSyncReport {
            media_type_id,
            tags_applied: media_type.default_tags.clone(),
            ..Default::default()
        };
        if media_type.default_tags.is_empty() {
            debug!("Media type {} has no default tags, nothing to apply", media_type_id);
            return Ok(report);
        }

        let mut after = None;
        loop {
            if cancel.is_cancelled() {
                warn!("Default tag sync for {} cancelled", media_type_id);
                report.cancelled = true;
                break;
            }

            let batch = self
                .records
                .find(media_type_id, after, self.batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);
            let full = batch.len() == self.batch_size;
            report.total_files += batch.len() as u64;

            let outcomes: Vec<TagOutcome> = stream::iter(batch)
                .map(|record| self.tag_record(&media_type, record))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
            for outcome in outcomes {
                match outcome {
                    TagOutcome::Updated => report.count += 1,
                    TagOutcome::Unchanged => {}
                    TagOutcome::Failed(id) => report.failed_ids.push(id),
                }
            }

            if !full {
                break;
            }
        }

        info!(
            "Applied default tags of {} to {} of {} record(s), {} failed",
            media_type_id,
            report.count,
            report.total_files,
            report.failed_ids.len()
        );
        Ok(report)
    }

    async fn tag_record(&self, media_type: &MediaType, mut record: MediaRecord) -> TagOutcome {
        let id = record.id;
        for attempt in 1..=MAX_ATTEMPTS {
            let existing = record.tags();
            let missing = missing_tags(&media_type.default_tags, &existing);
            if missing.is_empty() {
                return TagOutcome::Unchanged;
            }
            if !record.has_well_formed_tags() {
                warn!("Record {} has malformed tags; leaving it for manual repair", id);
                return TagOutcome::Failed(id);
            }

            let patch = RecordPatch::ReplaceTags {
                tags: merge_tags(&existing, &missing),
                expected: existing,
            };
            match self
                .records
                .conditional_update(id, media_type.id, &patch)
                .await
            {
                Ok(UpdateOutcome::Applied) => return TagOutcome::Updated,
                Ok(UpdateOutcome::Missing) => return TagOutcome::Unchanged,
                Ok(UpdateOutcome::Conflict) => {
                    debug!("Tags of record {} changed underneath us (attempt {})", id, attempt);
                }
                Err(e) => {
                    warn!("Failed to tag record {} (attempt {}): {}", id, attempt, e);
                }
            }

            match self.records.get(id).await {
                Ok(Some(fresh)) if fresh.media_type_id == media_type.id => record = fresh,
                // gone or migrated away; no longer ours to tag
                Ok(_) => return TagOutcome::Unchanged,
                Err(e) => {
                    warn!("Failed to re-read record {}: {}", id, e);
                    return TagOutcome::Failed(id);
                }
            }
        }
        warn!("Giving up on record {} after {} attempts", id, MAX_ATTEMPTS);
        TagOutcome::Failed(id)
    }

    /// Records of `media_type_id` still missing a default tag
    pub async fn verify(&self, media_type_id: Uuid) -> GovernanceResult<u64> {
        Ok(self.usage.files_needing_tags(media_type_id).await?.count)
    }

    /// Backfill every media type that declares default tags
    pub async fn apply_all(&self) -> GovernanceResult<Vec<TagSyncReport>> {
        let mut reports = Vec::new();
        for view in self.registry.list().await? {
            if view.media_type.default_tags.is_empty() {
                continue;
            }
            reports.push(self.apply_default_tags(view.media_type.id).await?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleStateMachine;
    use crate::models::{BaseType, MediaTypeDefinition};
    use crate::store::MemoryStore;
    use crate::tags::TagVocabulary;
    use serde_json::json;

    fn sync(store: &Arc<MemoryStore>, batch_size: usize) -> (SchemaRegistry, DefaultTagSync) {
        let usage = UsageTracker::new(store.clone(), store.clone(), batch_size);
        let lifecycle = LifecycleStateMachine::new(store.clone(), usage.clone());
        let vocabulary = TagVocabulary::new(store.clone(), store.clone());
        let registry = SchemaRegistry::new(store.clone(), vocabulary, lifecycle);
        let sync = DefaultTagSync::new(registry.clone(), store.clone(), usage, batch_size, 2);
        (registry, sync)
    }

    #[tokio::test]
    async fn test_missing_default_is_appended() {
        let store = Arc::new(MemoryStore::new());
        let (registry, sync) = sync(&store, 10);
        let media_type = registry
            .create(
                MediaTypeDefinition::new("Webinar", BaseType::Video).with_default_tags(["webinar"]),
            )
            .await
            .unwrap();
        let record = MediaRecord::new(media_type.id, json!({ "tags": ["intro"], "Speaker": "Ada" }));
        store.insert_record(record.clone()).await;

        assert_eq!(sync.verify(media_type.id).await.unwrap(), 1);
        let report = sync.apply_default_tags(media_type.id).await.unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.total_files, 1);
        assert_eq!(report.tags_applied, vec!["webinar"]);
        assert_eq!(sync.verify(media_type.id).await.unwrap(), 0);

        let stored = RecordStore::get(store.as_ref(), record.id).await.unwrap().unwrap();
        assert_eq!(stored.tags(), vec!["intro", "webinar"]);
        assert_eq!(stored.metadata["Speaker"], "Ada");
    }

    #[tokio::test]
    async fn test_second_run_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let (registry, sync) = sync(&store, 2);
        let media_type = registry
            .create(MediaTypeDefinition::new("Clip", BaseType::Video).with_default_tags(["A", "B"]))
            .await
            .unwrap();
        for tags in [json!([]), json!(["a"]), json!(["B", "a"])] {
            store
                .insert_record(MediaRecord::new(media_type.id, json!({ "tags": tags })))
                .await;
        }

        let first = sync.apply_default_tags(media_type.id).await.unwrap();
        assert_eq!(first.count, 2);
        assert_eq!(first.total_files, 3);
        let second = sync.apply_default_tags(media_type.id).await.unwrap();
        assert_eq!(second.count, 0);
        assert_eq!(second.total_files, 3);
    }

    #[tokio::test]
    async fn test_type_without_defaults_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let (registry, sync) = sync(&store, 10);
        let media_type = registry
            .create(MediaTypeDefinition::new("Plain", BaseType::Generic))
            .await
            .unwrap();
        store
            .insert_record(MediaRecord::new(media_type.id, json!({})))
            .await;

        let report = sync.apply_default_tags(media_type.id).await.unwrap();
        assert_eq!(report.count, 0);
        assert_eq!(report.total_files, 0);
        assert!(report.tags_applied.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_tags_are_reported_not_rewritten() {
        let store = Arc::new(MemoryStore::new());
        let (registry, sync) = sync(&store, 10);
        let media_type = registry
            .create(MediaTypeDefinition::new("Scan", BaseType::Image).with_default_tags(["scan"]))
            .await
            .unwrap();
        let mixed = MediaRecord::new(media_type.id, json!({ "tags": ["intro", 7, null] }));
        let scalar = MediaRecord::new(media_type.id, json!({ "tags": "intro" }));
        let clean = MediaRecord::new(media_type.id, json!({ "tags": ["intro"] }));
        for record in [&mixed, &scalar, &clean] {
            store.insert_record(record.clone()).await;
        }

        let report = sync.apply_default_tags(media_type.id).await.unwrap();
        assert_eq!(report.count, 1);
        let mut failed = report.failed_ids.clone();
        failed.sort();
        let mut expected = vec![mixed.id, scalar.id];
        expected.sort();
        assert_eq!(failed, expected);

        for record in [&mixed, &scalar] {
            let stored = RecordStore::get(store.as_ref(), record.id).await.unwrap().unwrap();
            assert_eq!(stored.metadata, record.metadata);
        }
    }
}
