//! In-process store used by tests and database-less runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{MediaTypeStore, RecordStore, StatusChange, TagCategoryStore};
use crate::models::{MediaRecord, MediaType, RecordPatch, TagCategory, UpdateOutcome};
use crate::tags::comparison_key;

#[derive(Default)]
struct Inner {
    media_types: HashMap<Uuid, MediaType>,
    categories: HashMap<Uuid, TagCategory>,
    records: BTreeMap<Uuid, MediaRecord>,
}

/// Store keeping media types, categories and records in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record, as the external upload path would
    pub async fn insert_record(&self, record: MediaRecord) {
        self.inner.write().await.records.insert(record.id, record);
    }

    /// All records currently typed `media_type_id`
    pub async fn records_of(&self, media_type_id: Uuid) -> Vec<MediaRecord> {
        self.inner
            .read()
            .await
            .records
            .values()
            .filter(|record| record.media_type_id == media_type_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MediaTypeStore for MemoryStore {
    async fn insert(&self, media_type: &MediaType) -> DatabaseResult<()> {
        self.inner
            .write()
            .await
            .media_types
            .insert(media_type.id, media_type.clone());
        Ok(())
    }

    async fn update_definition(&self, media_type: &MediaType) -> DatabaseResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.media_types.get_mut(&media_type.id) else {
            return Ok(false);
        };
        existing.name = media_type.name.clone();
        existing.description = media_type.description.clone();
        existing.base_type = media_type.base_type;
        existing.fields = media_type.fields.clone();
        existing.accepted_file_types = media_type.accepted_file_types.clone();
        existing.default_tags = media_type.default_tags.clone();
        existing.updated_at = media_type.updated_at;
        Ok(true)
    }

    async fn set_status(&self, id: Uuid, change: &StatusChange) -> DatabaseResult<UpdateOutcome> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.media_types.get_mut(&id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if existing.status != change.expected {
            return Ok(UpdateOutcome::Conflict);
        }
        existing.status = change.status;
        if let Some(replaced_by) = change.replaced_by {
            existing.replaced_by = Some(replaced_by);
        }
        existing.updated_at = change.updated_at;
        Ok(UpdateOutcome::Applied)
    }

    async fn delete(&self, id: Uuid) -> DatabaseResult<bool> {
        Ok(self.inner.write().await.media_types.remove(&id).is_some())
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<MediaType>> {
        Ok(self.inner.read().await.media_types.get(&id).cloned())
    }

    async fn list(&self) -> DatabaseResult<Vec<MediaType>> {
        let mut media_types: Vec<MediaType> =
            self.inner.read().await.media_types.values().cloned().collect();
        media_types.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(media_types)
    }

    async fn find_by_name(&self, name: &str) -> DatabaseResult<Option<MediaType>> {
        let key = comparison_key(name);
        Ok(self
            .inner
            .read()
            .await
            .media_types
            .values()
            .find(|media_type| comparison_key(&media_type.name) == key)
            .cloned())
    }

    async fn set_usage_count(&self, id: Uuid, usage_count: i64) -> DatabaseResult<()> {
        if let Some(media_type) = self.inner.write().await.media_types.get_mut(&id) {
            media_type.usage_count = usage_count;
        }
        Ok(())
    }
}

#[async_trait]
impl TagCategoryStore for MemoryStore {
    async fn insert(&self, category: &TagCategory) -> DatabaseResult<()> {
        self.inner
            .write()
            .await
            .categories
            .insert(category.id, category.clone());
        Ok(())
    }

    async fn update(
        &self,
        category: &TagCategory,
        expected_updated_at: DateTime<Utc>,
    ) -> DatabaseResult<UpdateOutcome> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.categories.get_mut(&category.id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if existing.updated_at != expected_updated_at {
            return Ok(UpdateOutcome::Conflict);
        }
        *existing = category.clone();
        Ok(UpdateOutcome::Applied)
    }

    async fn delete(&self, id: Uuid) -> DatabaseResult<bool> {
        Ok(self.inner.write().await.categories.remove(&id).is_some())
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<TagCategory>> {
        Ok(self.inner.read().await.categories.get(&id).cloned())
    }

    async fn list(&self) -> DatabaseResult<Vec<TagCategory>> {
        let mut categories: Vec<TagCategory> =
            self.inner.read().await.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(categories)
    }

    async fn find_by_name(&self, name: &str) -> DatabaseResult<Option<TagCategory>> {
        let key = comparison_key(name);
        Ok(self
            .inner
            .read()
            .await
            .categories
            .values()
            .find(|category| comparison_key(&category.name) == key)
            .cloned())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find(
        &self,
        media_type_id: Uuid,
        after: Option<Uuid>,
        limit: usize,
    ) -> DatabaseResult<Vec<MediaRecord>> {
        let start = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        Ok(self
            .inner
            .read()
            .await
            .records
            .range((start, Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| record.media_type_id == media_type_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, media_type_id: Uuid) -> DatabaseResult<u64> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .values()
            .filter(|record| record.media_type_id == media_type_id)
            .count() as u64)
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<MediaRecord>> {
        Ok(self.inner.read().await.records.get(&id).cloned())
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected_media_type_id: Uuid,
        patch: &RecordPatch,
    ) -> DatabaseResult<UpdateOutcome> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if record.media_type_id != expected_media_type_id {
            return Ok(UpdateOutcome::Conflict);
        }

        match patch {
            RecordPatch::Reassign { media_type_id } => {
                record.media_type_id = *media_type_id;
            }
            RecordPatch::ReplaceTags { expected, tags } => {
                // same comparison as the SQL store: the raw JSON, missing meaning []
                let current = record
                    .metadata
                    .get("tags")
                    .cloned()
                    .unwrap_or_else(|| Value::Array(Vec::new()));
                if current != Value::from(expected.clone()) {
                    return Ok(UpdateOutcome::Conflict);
                }
                record.set_tags(tags);
            }
        }
        record.updated_at = Utc::now();
        Ok(UpdateOutcome::Applied)
    }
}
