//! PostgreSQL implementation of the store traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::{MediaTypeStore, RecordStore, StatusChange, TagCategoryStore};
use crate::models::{Field, MediaRecord, MediaType, RecordPatch, Tag, TagCategory, UpdateOutcome};
use crate::tags::comparison_key;

const MEDIA_TYPE_COLUMNS: &str = "id, name, description, base_type, fields, accepted_file_types, \
     default_tags, status, replaced_by, usage_count, created_at, updated_at";

const TAG_CATEGORY_COLUMNS: &str =
    "id, name, description, tags, is_active, created_at, updated_at";

/// Store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Tell a failed guard from a missing row after a conditional update
    async fn conflict_or_missing(&self, table: &str, id: Uuid) -> DatabaseResult<UpdateOutcome> {
        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            table
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        Ok(if exists {
            UpdateOutcome::Conflict
        } else {
            UpdateOutcome::Missing
        })
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> DatabaseResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))
    }
}

fn decode_error(message: String) -> DatabaseError {
    DatabaseError::Query(sqlx::Error::Decode(message.into()))
}

fn media_type_from_row(row: &PgRow) -> DatabaseResult<MediaType> {
    let base_type: String = row.try_get("base_type").map_err(DatabaseError::query)?;
    let status: String = row.try_get("status").map_err(DatabaseError::query)?;
    let fields: Json<Vec<Field>> = row.try_get("fields").map_err(DatabaseError::query)?;
    let accepted: Json<BTreeSet<String>> = row
        .try_get("accepted_file_types")
        .map_err(DatabaseError::query)?;
    let default_tags: Json<Vec<String>> =
        row.try_get("default_tags").map_err(DatabaseError::query)?;

    Ok(MediaType {
        id: row.try_get("id").map_err(DatabaseError::query)?,
        name: row.try_get("name").map_err(DatabaseError::query)?,
        description: row.try_get("description").map_err(DatabaseError::query)?,
        base_type: base_type.parse().map_err(decode_error)?,
        fields: fields.0,
        accepted_file_types: accepted.0,
        default_tags: default_tags.0,
        status: status.parse().map_err(decode_error)?,
        replaced_by: row.try_get("replaced_by").map_err(DatabaseError::query)?,
        usage_count: row.try_get("usage_count").map_err(DatabaseError::query)?,
        created_at: row.try_get("created_at").map_err(DatabaseError::query)?,
        updated_at: row.try_get("updated_at").map_err(DatabaseError::query)?,
    })
}

fn tag_category_from_row(row: &PgRow) -> DatabaseResult<TagCategory> {
    let tags: Json<Vec<Tag>> = row.try_get("tags").map_err(DatabaseError::query)?;

    Ok(TagCategory {
        id: row.try_get("id").map_err(DatabaseError::query)?,
        name: row.try_get("name").map_err(DatabaseError::query)?,
        description: row.try_get("description").map_err(DatabaseError::query)?,
        tags: tags.0,
        is_active: row.try_get("is_active").map_err(DatabaseError::query)?,
        created_at: row.try_get("created_at").map_err(DatabaseError::query)?,
        updated_at: row.try_get("updated_at").map_err(DatabaseError::query)?,
    })
}

fn record_from_row(row: &PgRow) -> DatabaseResult<MediaRecord> {
    Ok(MediaRecord {
        id: row.try_get("id").map_err(DatabaseError::query)?,
        media_type_id: row.try_get("media_type_id").map_err(DatabaseError::query)?,
        metadata: row.try_get("metadata").map_err(DatabaseError::query)?,
        updated_at: row.try_get("updated_at").map_err(DatabaseError::query)?,
    })
}

#[async_trait]
impl MediaTypeStore for PgStore {
    async fn insert(&self, media_type: &MediaType) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO media_types (id, name, description, base_type, fields, accepted_file_types,
                                     default_tags, status, replaced_by, usage_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(media_type.id)
        .bind(&media_type.name)
        .bind(&media_type.description)
        .bind(media_type.base_type.to_string())
        .bind(Json(&media_type.fields))
        .bind(Json(&media_type.accepted_file_types))
        .bind(Json(&media_type.default_tags))
        .bind(media_type.status.to_string())
        .bind(media_type.replaced_by)
        .bind(media_type.usage_count)
        .bind(media_type.created_at)
        .bind(media_type.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        Ok(())
    }

    async fn update_definition(&self, media_type: &MediaType) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE media_types
            SET name = $2, description = $3, base_type = $4, fields = $5,
                accepted_file_types = $6, default_tags = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(media_type.id)
        .bind(&media_type.name)
        .bind(&media_type.description)
        .bind(media_type.base_type.to_string())
        .bind(Json(&media_type.fields))
        .bind(Json(&media_type.accepted_file_types))
        .bind(Json(&media_type.default_tags))
        .bind(media_type.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_status(&self, id: Uuid, change: &StatusChange) -> DatabaseResult<UpdateOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE media_types
            SET status = $3, replaced_by = COALESCE($4, replaced_by), updated_at = $5
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(change.expected.to_string())
        .bind(change.status.to_string())
        .bind(change.replaced_by)
        .bind(change.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        if result.rows_affected() > 0 {
            return Ok(UpdateOutcome::Applied);
        }
        self.conflict_or_missing("media_types", id).await
    }

    async fn delete(&self, id: Uuid) -> DatabaseResult<bool> {
        let result = sqlx::query("DELETE FROM media_types WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<MediaType>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM media_types WHERE id = $1",
            MEDIA_TYPE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        row.as_ref().map(media_type_from_row).transpose()
    }

    async fn list(&self) -> DatabaseResult<Vec<MediaType>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM media_types ORDER BY lower(name)",
            MEDIA_TYPE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        rows.iter().map(media_type_from_row).collect()
    }

    async fn find_by_name(&self, name: &str) -> DatabaseResult<Option<MediaType>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM media_types WHERE lower(btrim(name)) = $1",
            MEDIA_TYPE_COLUMNS
        ))
        .bind(comparison_key(name))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        row.as_ref().map(media_type_from_row).transpose()
    }

    async fn set_usage_count(&self, id: Uuid, usage_count: i64) -> DatabaseResult<()> {
        sqlx::query("UPDATE media_types SET usage_count = $2 WHERE id = $1")
            .bind(id)
            .bind(usage_count)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::query)?;

        Ok(())
    }
}

#[async_trait]
impl TagCategoryStore for PgStore {
    async fn insert(&self, category: &TagCategory) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tag_categories (id, name, description, tags, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(Json(&category.tags))
        .bind(category.is_active)
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        Ok(())
    }

    async fn update(
        &self,
        category: &TagCategory,
        expected_updated_at: DateTime<Utc>,
    ) -> DatabaseResult<UpdateOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE tag_categories
            SET name = $2, description = $3, tags = $4, is_active = $5, updated_at = $6
            WHERE id = $1 AND updated_at = $7
            "#,
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(Json(&category.tags))
        .bind(category.is_active)
        .bind(category.updated_at)
        .bind(expected_updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        if result.rows_affected() > 0 {
            return Ok(UpdateOutcome::Applied);
        }
        self.conflict_or_missing("tag_categories", category.id).await
    }

    async fn delete(&self, id: Uuid) -> DatabaseResult<bool> {
        let result = sqlx::query("DELETE FROM tag_categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<TagCategory>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM tag_categories WHERE id = $1",
            TAG_CATEGORY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        row.as_ref().map(tag_category_from_row).transpose()
    }

    async fn list(&self) -> DatabaseResult<Vec<TagCategory>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tag_categories ORDER BY lower(name)",
            TAG_CATEGORY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        rows.iter().map(tag_category_from_row).collect()
    }

    async fn find_by_name(&self, name: &str) -> DatabaseResult<Option<TagCategory>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM tag_categories WHERE lower(btrim(name)) = $1",
            TAG_CATEGORY_COLUMNS
        ))
        .bind(comparison_key(name))
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        row.as_ref().map(tag_category_from_row).transpose()
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find(
        &self,
        media_type_id: Uuid,
        after: Option<Uuid>,
        limit: usize,
    ) -> DatabaseResult<Vec<MediaRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, media_type_id, metadata, updated_at
            FROM media_items
            WHERE media_type_id = $1 AND ($2::uuid IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(media_type_id)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn count(&self, media_type_id: Uuid) -> DatabaseResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM media_items WHERE media_type_id = $1")
                .bind(media_type_id)
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::query)?;

        Ok(count.max(0) as u64)
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<MediaRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, media_type_id, metadata, updated_at
            FROM media_items
            WHERE id = $1 AND media_type_id IS NOT NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::query)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected_media_type_id: Uuid,
        patch: &RecordPatch,
    ) -> DatabaseResult<UpdateOutcome> {
        let result = match patch {
            RecordPatch::Reassign { media_type_id } => sqlx::query(
                r#"
                UPDATE media_items
                SET media_type_id = $3, updated_at = NOW()
                WHERE id = $1 AND media_type_id = $2
                "#,
            )
            .bind(id)
            .bind(expected_media_type_id)
            .bind(media_type_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::query)?,
            RecordPatch::ReplaceTags { expected, tags } => sqlx::query(
                r#"
                UPDATE media_items
                SET metadata = jsonb_set(metadata, '{tags}', $3, true), updated_at = NOW()
                WHERE id = $1 AND media_type_id = $2
                  AND COALESCE(metadata -> 'tags', '[]'::jsonb) = $4
                "#,
            )
            .bind(id)
            .bind(expected_media_type_id)
            .bind(Json(tags))
            .bind(Json(expected))
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::query)?,
        };

        if result.rows_affected() > 0 {
            return Ok(UpdateOutcome::Applied);
        }

        self.conflict_or_missing("media_items", id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaTypeStatus;
    use chrono::Utc;
    use common::database::{DatabaseConfig, init_pool};
    use serial_test::serial;

    async fn store() -> PgStore {
        let config = DatabaseConfig::from_env().expect("database config");
        let pool = init_pool(&config).await.expect("database pool");
        let store = PgStore::new(pool);
        store.migrate().await.expect("migrations");
        store
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL"]
    #[serial]
    async fn test_media_type_round_trip() {
        let store = store().await;
        let now = Utc::now();
        let media_type = MediaType {
            id: Uuid::new_v4(),
            name: format!("Round Trip {}", Uuid::new_v4()),
            description: None,
            base_type: crate::models::BaseType::Image,
            fields: Vec::new(),
            accepted_file_types: ["image/*".to_string()].into_iter().collect(),
            default_tags: vec!["Product Image".to_string()],
            status: MediaTypeStatus::Active,
            replaced_by: None,
            usage_count: 0,
            created_at: now,
            updated_at: now,
        };
        MediaTypeStore::insert(&store, &media_type).await.unwrap();

        let found = MediaTypeStore::find_by_name(&store, &media_type.name.to_uppercase())
            .await
            .unwrap()
            .expect("case-insensitive lookup");
        assert_eq!(found.id, media_type.id);
        assert_eq!(found.default_tags, media_type.default_tags);

        assert!(MediaTypeStore::delete(&store, media_type.id).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL"]
    #[serial]
    async fn test_conditional_reassign() {
        let store = store().await;
        let (source, target) = (Uuid::new_v4(), Uuid::new_v4());
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO media_items (id, media_type_id, metadata) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(source)
            .bind(serde_json::json!({ "Notes": "kept" }))
            .execute(&store.pool)
            .await
            .unwrap();

        let patch = RecordPatch::Reassign { media_type_id: target };
        assert_eq!(
            store.conditional_update(id, source, &patch).await.unwrap(),
            UpdateOutcome::Applied
        );
        assert_eq!(
            store.conditional_update(id, source, &patch).await.unwrap(),
            UpdateOutcome::Conflict
        );

        let record = RecordStore::get(&store, id).await.unwrap().unwrap();
        assert_eq!(record.media_type_id, target);
        assert_eq!(record.metadata["Notes"], "kept");
    }
}
