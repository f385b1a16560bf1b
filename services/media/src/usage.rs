//! Pull-based usage counts and default-tag drift detection
//!
//! Every figure here is recomputed from the record store on request. The
//! `usage_count` stored on a media type is only refreshed from these numbers
//! for display.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EntityKind, GovernanceError, GovernanceResult};
use crate::models::MediaType;
use crate::store::{MediaTypeStore, RecordStore};
use crate::tags::missing_tags;

/// Records of one media type lacking at least one default tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDrift {
    pub media_type_id: Uuid,
    pub count: u64,
    pub total_files: u64,
}

/// Live usage figure for one media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub media_type_id: Uuid,
    pub usage_count: u64,
}

/// Computes usage counts and tag drift from the record store
#[derive(Clone)]
pub struct UsageTracker {
    records: Arc<dyn RecordStore>,
    media_types: Arc<dyn MediaTypeStore>,
    batch_size: usize,
}

impl UsageTracker {
    pub fn new(
        records: Arc<dyn RecordStore>,
        media_types: Arc<dyn MediaTypeStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            records,
            media_types,
            batch_size: batch_size.max(1),
        }
    }

    /// Number of records referencing `media_type_id`, straight from the store
    pub async fn usage_count(&self, media_type_id: Uuid) -> GovernanceResult<u64> {
        Ok(self.records.count(media_type_id).await?)
    }

    /// Recompute and persist the cached display value
    pub async fn refresh_usage_count(&self, media_type_id: Uuid) -> GovernanceResult<u64> {
        let count = self.usage_count(media_type_id).await?;
        self.media_types
            .set_usage_count(media_type_id, i64::try_from(count).unwrap_or(i64::MAX))
            .await?;
        debug!("Refreshed usage count of {}: {}", media_type_id, count);
        Ok(count)
    }

    pub async fn refresh_all(&self) -> GovernanceResult<Vec<UsageSnapshot>> {
        let media_types = self.media_types.list().await?;
        let mut snapshots = Vec::with_capacity(media_types.len());
        for media_type in media_types {
            let usage_count = self.refresh_usage_count(media_type.id).await?;
            snapshots.push(UsageSnapshot {
                media_type_id: media_type.id,
                usage_count,
            });
        }
        info!("Refreshed usage counts for {} media type(s)", snapshots.len());
        Ok(snapshots)
    }

    /// Read-only scan counting records that lack one of the type's default tags
    pub async fn files_needing_tags(&self, media_type_id: Uuid) -> GovernanceResult<TagDrift> {
        let media_type = self
            .media_types
            .get(media_type_id)
            .await?
            .ok_or(GovernanceError::NotFound {
                kind: EntityKind::MediaType,
                id: media_type_id,
            })?;
        self.drift_of(&media_type).await
    }

    /// Drift for every media type that declares default tags
    pub async fn files_needing_tags_summary(&self) -> GovernanceResult<Vec<TagDrift>> {
        let mut summary = Vec::new();
        for media_type in self.media_types.list().await? {
            if media_type.default_tags.is_empty() {
                continue;
            }
            summary.push(self.drift_of(&media_type).await?);
        }
        Ok(summary)
    }

    async fn drift_of(&self, media_type: &MediaType) -> GovernanceResult<TagDrift> {
        let mut drift = TagDrift {
            media_type_id: media_type.id,
            count: 0,
            total_files: 0,
        };
        if media_type.default_tags.is_empty() {
            return Ok(drift);
        }

        let mut after = None;
        loop {
            let batch = self
                .records
                .find(media_type.id, after, self.batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);

            drift.total_files += batch.len() as u64;
            drift.count += batch
                .iter()
                .filter(|record| !missing_tags(&media_type.default_tags, &record.tags()).is_empty())
                .count() as u64;

            if batch.len() < self.batch_size {
                break;
            }
        }
        Ok(drift)
    }
}
