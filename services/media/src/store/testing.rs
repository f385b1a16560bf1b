//! Test doubles that race one write against the caller

use async_trait::async_trait;
use chrono::Duration;
use common::error::{DatabaseError, DatabaseResult};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{MediaTypeStore, MemoryStore, StatusChange, TagCategoryStore};
use crate::models::{MediaType, Tag, TagCategory, UpdateOutcome};

/// What the other party does, once
pub(crate) enum Interference {
    /// Change the status of `id` right before the next name lookup
    StatusBeforeLookup(Uuid, StatusChange),
    /// Change the status of `id` right before the next status write
    StatusBeforeWrite(Uuid, StatusChange),
    /// Fail the next insert as a unique index would
    DuplicateOnInsert,
}

/// Media-type store over a [`MemoryStore`] that fires one [`Interference`]
pub(crate) struct InterferingMediaTypes {
    pub inner: Arc<MemoryStore>,
    pending: Mutex<Option<Interference>>,
}

impl InterferingMediaTypes {
    pub fn new(inner: Arc<MemoryStore>, interference: Interference) -> Self {
        Self {
            inner,
            pending: Mutex::new(Some(interference)),
        }
    }

    fn take_if(&self, wanted: fn(&Interference) -> bool) -> Option<Interference> {
        let mut pending = self.pending.lock().unwrap();
        if pending.as_ref().is_some_and(wanted) {
            pending.take()
        } else {
            None
        }
    }

    async fn race_status(&self, interference: Option<Interference>) {
        if let Some(
            Interference::StatusBeforeLookup(id, change)
            | Interference::StatusBeforeWrite(id, change),
        ) = interference
        {
            let outcome = self.inner.set_status(id, &change).await.unwrap();
            assert_eq!(outcome, UpdateOutcome::Applied);
        }
    }
}

#[async_trait]
impl MediaTypeStore for InterferingMediaTypes {
    async fn insert(&self, media_type: &MediaType) -> DatabaseResult<()> {
        if self
            .take_if(|i| matches!(i, Interference::DuplicateOnInsert))
            .is_some()
        {
            return Err(DatabaseError::UniqueViolation(
                "media_types_name_key".to_string(),
            ));
        }
        MediaTypeStore::insert(self.inner.as_ref(), media_type).await
    }

    async fn update_definition(&self, media_type: &MediaType) -> DatabaseResult<bool> {
        self.inner.update_definition(media_type).await
    }

    async fn set_status(&self, id: Uuid, change: &StatusChange) -> DatabaseResult<UpdateOutcome> {
        let raced = self.take_if(|i| matches!(i, Interference::StatusBeforeWrite(..)));
        self.race_status(raced).await;
        self.inner.set_status(id, change).await
    }

    async fn delete(&self, id: Uuid) -> DatabaseResult<bool> {
        MediaTypeStore::delete(self.inner.as_ref(), id).await
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<MediaType>> {
        MediaTypeStore::get(self.inner.as_ref(), id).await
    }

    async fn list(&self) -> DatabaseResult<Vec<MediaType>> {
        MediaTypeStore::list(self.inner.as_ref()).await
    }

    async fn find_by_name(&self, name: &str) -> DatabaseResult<Option<MediaType>> {
        let raced = self.take_if(|i| matches!(i, Interference::StatusBeforeLookup(..)));
        self.race_status(raced).await;
        MediaTypeStore::find_by_name(self.inner.as_ref(), name).await
    }

    async fn set_usage_count(&self, id: Uuid, usage_count: i64) -> DatabaseResult<()> {
        self.inner.set_usage_count(id, usage_count).await
    }
}

/// Tag-category store over a [`MemoryStore`] where another writer adds a tag
/// to the category right before the next conditional update lands
pub(crate) struct InterferingCategories {
    pub inner: Arc<MemoryStore>,
    pending: Mutex<Option<String>>,
}

impl InterferingCategories {
    pub fn new(inner: Arc<MemoryStore>, competing_tag: &str) -> Self {
        Self {
            inner,
            pending: Mutex::new(Some(competing_tag.to_string())),
        }
    }
}

#[async_trait]
impl TagCategoryStore for InterferingCategories {
    async fn insert(&self, category: &TagCategory) -> DatabaseResult<()> {
        TagCategoryStore::insert(self.inner.as_ref(), category).await
    }

    async fn update(
        &self,
        category: &TagCategory,
        expected_updated_at: chrono::DateTime<chrono::Utc>,
    ) -> DatabaseResult<UpdateOutcome> {
        let competing = self.pending.lock().unwrap().take();
        if let Some(tag) = competing {
            let mut current = TagCategoryStore::get(self.inner.as_ref(), category.id)
                .await?
                .unwrap();
            let seen = current.updated_at;
            current.tags.push(Tag::new(tag));
            current.updated_at = seen + Duration::milliseconds(1);
            let outcome = TagCategoryStore::update(self.inner.as_ref(), &current, seen).await?;
            assert_eq!(outcome, UpdateOutcome::Applied);
        }
        TagCategoryStore::update(self.inner.as_ref(), category, expected_updated_at).await
    }

    async fn delete(&self, id: Uuid) -> DatabaseResult<bool> {
        TagCategoryStore::delete(self.inner.as_ref(), id).await
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<TagCategory>> {
        TagCategoryStore::get(self.inner.as_ref(), id).await
    }

    async fn list(&self) -> DatabaseResult<Vec<TagCategory>> {
        TagCategoryStore::list(self.inner.as_ref()).await
    }

    async fn find_by_name(&self, name: &str) -> DatabaseResult<Option<TagCategory>> {
        TagCategoryStore::find_by_name(self.inner.as_ref(), name).await
    }
}
