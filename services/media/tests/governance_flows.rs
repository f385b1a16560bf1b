//! End-to-end flows over the in-memory store
//!
//! These exercise the public service the way an outer layer would: define
//! types, seed records, migrate, sync tags and guard deletions.

use async_trait::async_trait;
use common::error::{DatabaseError, DatabaseResult};
use media::config::GovernanceConfig;
use media::lock::LocalLocks;
use media::models::{
    BaseType, FieldDefinition, FieldType, MediaRecord, MediaTypeDefinition, MediaTypeStatus,
    NewTagCategory, RecordPatch, UpdateOutcome,
};
use media::store::{MemoryStore, RecordStore};
use media::{GovernanceError, GovernanceService};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn config(batch_size: usize) -> GovernanceConfig {
    GovernanceConfig {
        batch_size,
        concurrency: 4,
        ..Default::default()
    }
}

fn service_over(
    store: &Arc<MemoryStore>,
    records: Arc<dyn RecordStore>,
    batch_size: usize,
) -> GovernanceService {
    GovernanceService::new(
        store.clone(),
        store.clone(),
        records,
        Arc::new(LocalLocks::new(Duration::from_secs(5))),
        &config(batch_size),
    )
}

fn service(batch_size: usize) -> (Arc<MemoryStore>, GovernanceService) {
    let store = Arc::new(MemoryStore::new());
    let service = service_over(&store, store.clone(), batch_size);
    (store, service)
}

/// Record store that refuses writes to selected records
struct FailingWrites {
    inner: Arc<MemoryStore>,
    poisoned: HashSet<Uuid>,
}

#[async_trait]
impl RecordStore for FailingWrites {
    async fn find(
        &self,
        media_type_id: Uuid,
        after: Option<Uuid>,
        limit: usize,
    ) -> DatabaseResult<Vec<MediaRecord>> {
        self.inner.find(media_type_id, after, limit).await
    }

    async fn count(&self, media_type_id: Uuid) -> DatabaseResult<u64> {
        self.inner.count(media_type_id).await
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<MediaRecord>> {
        RecordStore::get(self.inner.as_ref(), id).await
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected_media_type_id: Uuid,
        patch: &RecordPatch,
    ) -> DatabaseResult<UpdateOutcome> {
        if self.poisoned.contains(&id) {
            return Err(DatabaseError::Backend(format!("write to {} rejected", id)));
        }
        self.inner
            .conditional_update(id, expected_media_type_id, patch)
            .await
    }
}

/// Record store where an administrator archives the source type while the
/// first record is being moved
struct ArchivesSourceMidway {
    inner: Arc<MemoryStore>,
    admin: GovernanceService,
    source: Uuid,
    fired: AtomicBool,
}

#[async_trait]
impl RecordStore for ArchivesSourceMidway {
    async fn find(
        &self,
        media_type_id: Uuid,
        after: Option<Uuid>,
        limit: usize,
    ) -> DatabaseResult<Vec<MediaRecord>> {
        self.inner.find(media_type_id, after, limit).await
    }

    async fn count(&self, media_type_id: Uuid) -> DatabaseResult<u64> {
        self.inner.count(media_type_id).await
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<MediaRecord>> {
        RecordStore::get(self.inner.as_ref(), id).await
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected_media_type_id: Uuid,
        patch: &RecordPatch,
    ) -> DatabaseResult<UpdateOutcome> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.admin.archive_type(self.source).await.unwrap();
        }
        self.inner
            .conditional_update(id, expected_media_type_id, patch)
            .await
    }
}

async fn old_and_new_doc(service: &GovernanceService) -> (Uuid, Uuid) {
    let old_doc = service
        .create_type(
            MediaTypeDefinition::new("OldDoc", BaseType::Document)
                .with_field(FieldDefinition::new("Title", FieldType::Text).required())
                .with_field(FieldDefinition::new("Notes", FieldType::TextArea)),
        )
        .await
        .unwrap();
    let new_doc = service
        .create_type(
            MediaTypeDefinition::new("NewDoc", BaseType::Document)
                .with_field(FieldDefinition::new("Title", FieldType::Text).required())
                .with_field(FieldDefinition::new("Summary", FieldType::Text)),
        )
        .await
        .unwrap();
    (old_doc.id, new_doc.id)
}

#[tokio::test]
async fn test_old_doc_migrates_to_new_doc_keeping_notes() {
    let (store, service) = service(2);
    let (old_doc, new_doc) = old_and_new_doc(&service).await;
    for i in 0..5 {
        store
            .insert_record(MediaRecord::new(
                old_doc,
                json!({ "Title": format!("Doc {}", i), "Notes": format!("note {}", i) }),
            ))
            .await;
    }

    let report = service.migrate(old_doc, new_doc).await.unwrap();
    assert_eq!(report.migrated_count, 5);
    assert!(report.failed_ids.is_empty());

    let migrated = store.records_of(new_doc).await;
    assert_eq!(migrated.len(), 5);
    for record in &migrated {
        let title = record.metadata["Title"].as_str().unwrap();
        let suffix = title.trim_start_matches("Doc ");
        assert_eq!(record.metadata["Notes"], format!("note {}", suffix));
    }

    let old = service.get_type(old_doc).await.unwrap().media_type;
    assert_eq!(old.status, MediaTypeStatus::Deprecated);
    assert_eq!(old.replaced_by, Some(new_doc));
    assert_eq!(service.get_usage(old_doc).await.unwrap(), 0);
    assert_eq!(service.get_usage(new_doc).await.unwrap(), 5);
}

#[tokio::test]
async fn test_repeating_a_migration_moves_nothing() {
    let (store, service) = service(10);
    let (source, target) = old_and_new_doc(&service).await;
    for _ in 0..3 {
        store.insert_record(MediaRecord::new(source, json!({}))).await;
    }

    let first = service.migrate(source, target).await.unwrap();
    assert_eq!(first.migrated_count, 3);
    assert_eq!(service.get_usage(source).await.unwrap(), 0);

    let second = service.migrate(source, target).await.unwrap();
    assert_eq!(second.migrated_count, 0);
    assert!(second.failed_ids.is_empty());
    assert_eq!(service.get_usage(target).await.unwrap(), 3);
}

#[tokio::test]
async fn test_failed_records_are_reported_and_retriable() {
    let store = Arc::new(MemoryStore::new());
    let setup = service_over(&store, store.clone(), 10);
    let (source, target) = old_and_new_doc(&setup).await;

    let stuck = MediaRecord::new(source, json!({ "Title": "stuck" }));
    store.insert_record(stuck.clone()).await;
    for _ in 0..3 {
        store.insert_record(MediaRecord::new(source, json!({}))).await;
    }

    let flaky = Arc::new(FailingWrites {
        inner: store.clone(),
        poisoned: HashSet::from([stuck.id]),
    });
    let service = service_over(&store, flaky, 10);

    let report = service.migrate(source, target).await.unwrap();
    assert_eq!(report.migrated_count, 3);
    assert_eq!(report.failed_ids, vec![stuck.id]);
    assert!(report.is_partial());
    // deprecated despite the leftover record
    let old = service.get_type(source).await.unwrap().media_type;
    assert_eq!(old.status, MediaTypeStatus::Deprecated);
    assert_eq!(service.get_usage(source).await.unwrap(), 1);

    let retried = setup
        .retry_migration(source, target, &report.failed_ids)
        .await
        .unwrap();
    assert_eq!(retried.migrated_count, 1);
    assert_eq!(setup.get_usage(source).await.unwrap(), 0);
}

#[tokio::test]
async fn test_source_archived_mid_migration_still_reports_moved_records() {
    let store = Arc::new(MemoryStore::new());
    let admin = service_over(&store, store.clone(), 10);
    let (source, target) = old_and_new_doc(&admin).await;
    for _ in 0..3 {
        store.insert_record(MediaRecord::new(source, json!({}))).await;
    }

    let racing = Arc::new(ArchivesSourceMidway {
        inner: store.clone(),
        admin: admin.clone(),
        source,
        fired: AtomicBool::new(false),
    });
    let service = service_over(&store, racing, 10);

    let report = assert_ok!(service.migrate(source, target).await);
    assert_eq!(report.migrated_count, 3);
    assert!(report.failed_ids.is_empty());
    assert_eq!(report.source_status, Some(MediaTypeStatus::Archived));
    assert_eq!(store.records_of(target).await.len(), 3);

    let old = admin.get_type(source).await.unwrap().media_type;
    assert_eq!(old.status, MediaTypeStatus::Archived);
    assert_eq!(old.replaced_by, None);
    assert_eq!(admin.get_usage(target).await.unwrap(), 3);
}

#[tokio::test]
async fn test_concurrent_migrations_of_one_source_are_serialized() {
    let (store, service) = service(3);
    let (source, target) = old_and_new_doc(&service).await;
    for _ in 0..20 {
        store.insert_record(MediaRecord::new(source, json!({}))).await;
    }

    let (a, b) = tokio::join!(service.migrate(source, target), service.migrate(source, target));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.migrated_count + b.migrated_count, 20);
    assert!(a.migrated_count == 0 || b.migrated_count == 0);
    assert!(a.failed_ids.is_empty() && b.failed_ids.is_empty());
}

#[tokio::test]
async fn test_cancelled_migration_can_be_resumed() {
    let (store, service) = service(2);
    let (source, target) = old_and_new_doc(&service).await;
    for _ in 0..4 {
        store.insert_record(MediaRecord::new(source, json!({}))).await;
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    let cancelled = assert_ok!(service.migrate_with_cancel(source, target, &cancel).await);
    assert!(cancelled.cancelled);
    assert_eq!(service.get_usage(source).await.unwrap(), 4);

    let resumed = service.migrate(source, target).await.unwrap();
    assert_eq!(resumed.migrated_count, 4);
}

#[tokio::test]
async fn test_default_tags_converge() {
    let (store, service) = service(10);
    let webinar = service
        .create_type(
            MediaTypeDefinition::new("Webinar", BaseType::Video).with_default_tags(["webinar"]),
        )
        .await
        .unwrap();
    let record = MediaRecord::new(webinar.id, json!({ "tags": ["intro"] }));
    store.insert_record(record.clone()).await;

    let summary = service.files_needing_tags_summary().await.unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].count, 1);

    let first = service.apply_default_tags(webinar.id).await.unwrap();
    assert_eq!(first.count, 1);
    let tagged = RecordStore::get(store.as_ref(), record.id).await.unwrap().unwrap();
    assert_eq!(tagged.tags(), vec!["intro", "webinar"]);

    let second = service.apply_default_tags(webinar.id).await.unwrap();
    assert_eq!(second.count, 0);
    assert_eq!(service.verify_default_tags(webinar.id).await.unwrap(), 0);
    let unchanged = RecordStore::get(store.as_ref(), record.id).await.unwrap().unwrap();
    assert_eq!(unchanged.tags(), vec!["intro", "webinar"]);
}

#[tokio::test]
async fn test_casing_variant_is_not_added_twice() {
    let (store, service) = service(10);
    let shots = service
        .create_type(
            MediaTypeDefinition::new("Shots", BaseType::Image).with_default_tags(["Product Image"]),
        )
        .await
        .unwrap();
    store
        .insert_record(MediaRecord::new(shots.id, json!({ "tags": ["product image"] })))
        .await;

    let report = service.apply_default_tags(shots.id).await.unwrap();
    assert_eq!(report.count, 0);
    assert_eq!(report.total_files, 1);
}

#[tokio::test]
async fn test_type_in_use_can_be_archived_but_not_deleted() {
    let (store, service) = service(10);
    let media_type = service
        .create_type(MediaTypeDefinition::new("Flyer", BaseType::Image))
        .await
        .unwrap();
    for _ in 0..3 {
        store.insert_record(MediaRecord::new(media_type.id, json!({}))).await;
    }
    service.refresh_usage_counts().await.unwrap();

    let err = service.delete_type(media_type.id).await.unwrap_err();
    assert!(matches!(err, GovernanceError::MediaTypeInUse { usage: 3, .. }));

    let archived = service.archive_type(media_type.id).await.unwrap();
    assert_eq!(archived.status, MediaTypeStatus::Archived);
    assert_eq!(archived.usage_count, 3);
    assert_eq!(service.get_usage(media_type.id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_unused_type_can_be_deleted() {
    let (_, service) = service(10);
    let media_type = service
        .create_type(MediaTypeDefinition::new("Scratch", BaseType::Generic))
        .await
        .unwrap();
    assert_ok!(service.delete_type(media_type.id).await);
    assert!(matches!(
        service.get_type(media_type.id).await,
        Err(GovernanceError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_referenced_category_survives_hard_delete() {
    let (_, service) = service(10);
    let category = service
        .create_category(NewTagCategory {
            name: "Topics".to_string(),
            tags: vec!["Finance".to_string(), "Sales".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    let media_type = service
        .create_type(
            MediaTypeDefinition::new("Report", BaseType::Document).with_field(
                FieldDefinition::new("Topic", FieldType::Select).with_category(category.id),
            ),
        )
        .await
        .unwrap();

    let err = assert_err!(service.delete_category(category.id, true).await);
    match err {
        GovernanceError::TagCategoryInUse { referenced_by, .. } => {
            assert_eq!(referenced_by, vec![media_type.id]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // soft delete goes through and the field resolves to no options
    service.delete_category(category.id, false).await.unwrap();
    let view = service.get_type(media_type.id).await.unwrap();
    assert_eq!(view.resolved_fields[0].options, Some(Vec::new()));

    service.restore_category(category.id).await.unwrap();
    let view = service.get_type(media_type.id).await.unwrap();
    assert_eq!(
        view.resolved_fields[0].options,
        Some(vec!["Finance".to_string(), "Sales".to_string()])
    );
}
