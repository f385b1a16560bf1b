//! Storage seams for media types, tag categories and media records
//!
//! The engine only talks to these traits. [`PgStore`] backs them with
//! PostgreSQL, [`MemoryStore`] keeps everything in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use uuid::Uuid;

use crate::models::{
    MediaRecord, MediaType, MediaTypeStatus, RecordPatch, TagCategory, UpdateOutcome,
};

pub mod memory;
pub mod postgres;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Compare-and-set of a media type's lifecycle columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// Status the caller read; the write is refused if it changed since
    pub expected: MediaTypeStatus,
    pub status: MediaTypeStatus,
    /// New replacement, or `None` to keep the stored one
    pub replaced_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence for media-type definitions
#[async_trait]
pub trait MediaTypeStore: Send + Sync {
    async fn insert(&self, media_type: &MediaType) -> DatabaseResult<()>;

    /// Overwrite the definition columns only
    ///
    /// Status, replacement and usage count are left untouched. Returns `false`
    /// when the media type does not exist.
    async fn update_definition(&self, media_type: &MediaType) -> DatabaseResult<bool>;

    /// Move the status only while it still equals `change.expected`
    async fn set_status(&self, id: Uuid, change: &StatusChange) -> DatabaseResult<UpdateOutcome>;

    async fn delete(&self, id: Uuid) -> DatabaseResult<bool>;

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<MediaType>>;

    async fn list(&self) -> DatabaseResult<Vec<MediaType>>;

    /// Lookup by comparison form of the name
    async fn find_by_name(&self, name: &str) -> DatabaseResult<Option<MediaType>>;

    /// Persist the cached usage count display hint
    async fn set_usage_count(&self, id: Uuid, usage_count: i64) -> DatabaseResult<()>;
}

/// Persistence for tag categories
#[async_trait]
pub trait TagCategoryStore: Send + Sync {
    async fn insert(&self, category: &TagCategory) -> DatabaseResult<()>;

    /// Overwrite a category only while its stored `updated_at` equals `expected_updated_at`
    async fn update(
        &self,
        category: &TagCategory,
        expected_updated_at: DateTime<Utc>,
    ) -> DatabaseResult<UpdateOutcome>;

    async fn delete(&self, id: Uuid) -> DatabaseResult<bool>;

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<TagCategory>>;

    async fn list(&self) -> DatabaseResult<Vec<TagCategory>>;

    /// Lookup by comparison form of the name, active or not
    async fn find_by_name(&self, name: &str) -> DatabaseResult<Option<TagCategory>>;
}

/// Access to the externally owned media record collection
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// One page of records typed `media_type_id`, ordered by id, strictly after `after`
    async fn find(
        &self,
        media_type_id: Uuid,
        after: Option<Uuid>,
        limit: usize,
    ) -> DatabaseResult<Vec<MediaRecord>>;

    async fn count(&self, media_type_id: Uuid) -> DatabaseResult<u64>;

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<MediaRecord>>;

    /// Apply `patch` only while the record is still typed `expected_media_type_id`
    async fn conditional_update(
        &self,
        id: Uuid,
        expected_media_type_id: Uuid,
        patch: &RecordPatch,
    ) -> DatabaseResult<UpdateOutcome>;
}
