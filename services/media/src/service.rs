//! The operations exposed to an outer transport layer
//!
//! `GovernanceService` wires every component over one set of stores and is
//! the only type a caller needs to hold.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::GovernanceConfig;
use crate::error::GovernanceResult;
use crate::lifecycle::LifecycleStateMachine;
use crate::lock::AdvisoryLock;
use crate::migration::{MigrationEngine, MigrationReport};
use crate::models::{
    MediaType, MediaTypeDefinition, MediaTypeStatus, MediaTypeView, NewTagCategory, Tag,
    TagCategory, UpdateTagCategory,
};
use crate::registry::SchemaRegistry;
use crate::store::{MediaTypeStore, RecordStore, TagCategoryStore};
use crate::tag_sync::{DefaultTagSync, TagSyncReport};
use crate::tags::TagVocabulary;
use crate::usage::{TagDrift, UsageSnapshot, UsageTracker};

#[derive(Clone)]
pub struct GovernanceService {
    registry: SchemaRegistry,
    vocabulary: TagVocabulary,
    usage: UsageTracker,
    migrations: MigrationEngine,
    tag_sync: DefaultTagSync,
}

impl GovernanceService {
    pub fn new(
        media_types: Arc<dyn MediaTypeStore>,
        categories: Arc<dyn TagCategoryStore>,
        records: Arc<dyn RecordStore>,
        locks: Arc<dyn AdvisoryLock>,
        config: &GovernanceConfig,
    ) -> Self {
        let usage = UsageTracker::new(records.clone(), media_types.clone(), config.batch_size);
        let lifecycle = LifecycleStateMachine::new(media_types.clone(), usage.clone());
        let vocabulary = TagVocabulary::new(categories, media_types.clone());
        let registry = SchemaRegistry::new(media_types, vocabulary.clone(), lifecycle.clone());
        let migrations = MigrationEngine::new(
            registry.clone(),
            lifecycle,
            usage.clone(),
            records.clone(),
            locks,
            config.batch_size,
            config.concurrency,
        );
        let tag_sync = DefaultTagSync::new(
            registry.clone(),
            records,
            usage.clone(),
            config.batch_size,
            config.concurrency,
        );

        Self {
            registry,
            vocabulary,
            usage,
            migrations,
            tag_sync,
        }
    }

    pub fn usage_tracker(&self) -> UsageTracker {
        self.usage.clone()
    }

    // Media types

    pub async fn create_type(&self, definition: MediaTypeDefinition) -> GovernanceResult<MediaType> {
        self.registry.create(definition).await
    }

    pub async fn update_type(
        &self,
        id: Uuid,
        definition: MediaTypeDefinition,
    ) -> GovernanceResult<MediaType> {
        self.registry.update(id, definition).await
    }

    pub async fn delete_type(&self, id: Uuid) -> GovernanceResult<()> {
        self.registry.delete(id).await
    }

    pub async fn archive_type(&self, id: Uuid) -> GovernanceResult<MediaType> {
        self.registry.archive(id).await
    }

    pub async fn get_type(&self, id: Uuid) -> GovernanceResult<MediaTypeView> {
        self.registry.get(id).await
    }

    pub async fn list_types(
        &self,
        status: Option<MediaTypeStatus>,
    ) -> GovernanceResult<Vec<MediaTypeView>> {
        self.registry.list_filtered(status).await
    }

    /// Live number of records typed `id`
    pub async fn get_usage(&self, id: Uuid) -> GovernanceResult<u64> {
        self.registry.load(id).await?;
        self.usage.usage_count(id).await
    }

    pub async fn refresh_usage_counts(&self) -> GovernanceResult<Vec<UsageSnapshot>> {
        self.usage.refresh_all().await
    }

    // Migrations and tag sync

    pub async fn migrate(&self, source_id: Uuid, target_id: Uuid) -> GovernanceResult<MigrationReport> {
        self.migrations.migrate(source_id, target_id).await
    }

    pub async fn migrate_with_cancel(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        cancel: &CancellationToken,
    ) -> GovernanceResult<MigrationReport> {
        self.migrations
            .migrate_with_cancel(source_id, target_id, cancel)
            .await
    }

    pub async fn retry_migration(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        record_ids: &[Uuid],
    ) -> GovernanceResult<MigrationReport> {
        self.migrations.retry(source_id, target_id, record_ids).await
    }

    pub async fn apply_default_tags(&self, id: Uuid) -> GovernanceResult<TagSyncReport> {
        self.tag_sync.apply_default_tags(id).await
    }

    pub async fn apply_default_tags_with_cancel(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> GovernanceResult<TagSyncReport> {
        self.tag_sync.apply_default_tags_with_cancel(id, cancel).await
    }

    pub async fn apply_all_default_tags(&self) -> GovernanceResult<Vec<TagSyncReport>> {
        self.tag_sync.apply_all().await
    }

    pub async fn verify_default_tags(&self, id: Uuid) -> GovernanceResult<u64> {
        self.tag_sync.verify(id).await
    }

    pub async fn files_needing_tags_summary(&self) -> GovernanceResult<Vec<TagDrift>> {
        self.usage.files_needing_tags_summary().await
    }

    // Tag categories

    pub async fn create_category(&self, payload: NewTagCategory) -> GovernanceResult<TagCategory> {
        self.vocabulary.create_category(payload).await
    }

    pub async fn get_category(&self, id: Uuid) -> GovernanceResult<TagCategory> {
        self.vocabulary.get_category(id).await
    }

    pub async fn list_categories(&self, include_inactive: bool) -> GovernanceResult<Vec<TagCategory>> {
        self.vocabulary.list_categories(include_inactive).await
    }

    pub async fn update_category(
        &self,
        id: Uuid,
        payload: UpdateTagCategory,
    ) -> GovernanceResult<TagCategory> {
        self.vocabulary.update_category(id, payload).await
    }

    /// Soft delete deactivates; `hard_delete` removes unless a field references it
    pub async fn delete_category(&self, id: Uuid, hard_delete: bool) -> GovernanceResult<()> {
        self.vocabulary.delete_category(id, hard_delete).await
    }

    pub async fn restore_category(&self, id: Uuid) -> GovernanceResult<TagCategory> {
        self.vocabulary.restore_category(id).await
    }

    pub async fn add_tag(&self, category_id: Uuid, name: &str) -> GovernanceResult<Tag> {
        self.vocabulary.add_tag(category_id, name).await
    }

    pub async fn add_tags(&self, category_id: Uuid, names: &[String]) -> GovernanceResult<Vec<Tag>> {
        self.vocabulary.add_tags(category_id, names).await
    }

    pub async fn rename_tag(
        &self,
        category_id: Uuid,
        tag_id: Uuid,
        name: &str,
    ) -> GovernanceResult<Tag> {
        self.vocabulary.rename_tag(category_id, tag_id, name).await
    }

    pub async fn remove_tag(&self, category_id: Uuid, tag_id: Uuid) -> GovernanceResult<()> {
        self.vocabulary.remove_tag(category_id, tag_id).await
    }

    /// Media types whose fields draw options from `category_id`
    pub async fn category_references(&self, category_id: Uuid) -> GovernanceResult<Vec<MediaType>> {
        self.registry.referencing_category(category_id).await
    }
}
