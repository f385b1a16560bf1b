//! Schema registry for media types
//!
//! Definitions are validated here before any write: name uniqueness in
//! comparison form, field-name uniqueness, a single option source per choice
//! field and well-formed MIME patterns. Category-backed options are never
//! copied into the media type; they are joined from the vocabulary on read.

use chrono::Utc;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::info;
use uuid::Uuid;

use crate::error::{EntityKind, GovernanceError, GovernanceResult};
use crate::lifecycle::LifecycleStateMachine;
use crate::models::{
    BaseType, Field, MediaType, MediaTypeDefinition, MediaTypeStatus, MediaTypeView,
    OptionSource, ResolvedField,
};
use crate::store::MediaTypeStore;
use crate::tags::{TagVocabulary, comparison_key, dedupe, normalize};

/// Definition after the synchronous checks
struct ValidatedDefinition {
    name: String,
    description: Option<String>,
    base_type: BaseType,
    fields: Vec<Field>,
    accepted_file_types: BTreeSet<String>,
    default_tags: Vec<String>,
}

fn validate_mime_pattern(pattern: &str) -> GovernanceResult<String> {
    static MIME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = MIME_REGEX.get_or_init(|| {
        Regex::new(r"^(\*|[a-z0-9][a-z0-9!#$&^_.+-]*)/(\*|[a-z0-9][a-z0-9!#$&^_.+-]*)$")
            .expect("Failed to compile MIME pattern regex")
    });

    let pattern = pattern.trim().to_lowercase();
    if !regex.is_match(&pattern) || (pattern.starts_with("*/") && pattern != "*/*") {
        return Err(GovernanceError::Validation(format!(
            "'{}' is not a valid MIME type pattern",
            pattern
        )));
    }
    Ok(pattern)
}

fn validate_definition(definition: MediaTypeDefinition) -> GovernanceResult<ValidatedDefinition> {
    let name = normalize(&definition.name);
    if name.is_empty() {
        return Err(GovernanceError::Validation(
            "Media type name is required".to_string(),
        ));
    }

    let mut field_names = HashSet::new();
    let mut fields = Vec::with_capacity(definition.fields.len());
    for field_definition in definition.fields {
        let field = Field::try_from(field_definition)?;
        if !field_names.insert(comparison_key(&field.name)) {
            return Err(GovernanceError::Validation(format!(
                "Field name '{}' is used more than once",
                field.name
            )));
        }
        fields.push(field);
    }

    let accepted_file_types = if definition.accepted_file_types.is_empty() {
        definition
            .base_type
            .default_accepted_file_types()
            .iter()
            .map(|pattern| pattern.to_string())
            .collect()
    } else {
        definition
            .accepted_file_types
            .iter()
            .map(|pattern| validate_mime_pattern(pattern))
            .collect::<GovernanceResult<BTreeSet<_>>>()?
    };

    let description = definition
        .description
        .map(|description| description.trim().to_string())
        .filter(|description| !description.is_empty());

    Ok(ValidatedDefinition {
        name,
        description,
        base_type: definition.base_type,
        fields,
        accepted_file_types,
        default_tags: dedupe(&definition.default_tags),
    })
}

/// Owns media-type definitions
#[derive(Clone)]
pub struct SchemaRegistry {
    media_types: Arc<dyn MediaTypeStore>,
    vocabulary: TagVocabulary,
    lifecycle: LifecycleStateMachine,
}

impl SchemaRegistry {
    pub fn new(
        media_types: Arc<dyn MediaTypeStore>,
        vocabulary: TagVocabulary,
        lifecycle: LifecycleStateMachine,
    ) -> Self {
        Self {
            media_types,
            vocabulary,
            lifecycle,
        }
    }

    async fn ensure_unique_name(&self, name: &str, except: Option<Uuid>) -> GovernanceResult<()> {
        match self.media_types.find_by_name(name).await? {
            Some(existing) if Some(existing.id) != except => Err(GovernanceError::DuplicateName {
                kind: EntityKind::MediaType,
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Category references must point at an existing, active category
    ///
    /// References in `tolerated` (already on the stored type) are let through
    /// so that a deactivated category does not block unrelated edits.
    async fn check_category_references(
        &self,
        fields: &[Field],
        tolerated: &HashSet<Uuid>,
    ) -> GovernanceResult<()> {
        for field in fields {
            let Some(category_id) = field.tag_category_id() else {
                continue;
            };
            if tolerated.contains(&category_id) {
                continue;
            }
            let category = self.vocabulary.get_category(category_id).await.map_err(|_| {
                GovernanceError::Validation(format!(
                    "Field '{}' references unknown tag category {}",
                    field.name, category_id
                ))
            })?;
            if !category.is_active {
                return Err(GovernanceError::Validation(format!(
                    "Field '{}' references inactive tag category '{}'",
                    field.name, category.name
                )));
            }
        }
        Ok(())
    }

    pub async fn create(&self, definition: MediaTypeDefinition) -> GovernanceResult<MediaType> {
        let validated = validate_definition(definition)?;
        self.ensure_unique_name(&validated.name, None).await?;
        self.check_category_references(&validated.fields, &HashSet::new())
            .await?;

        let now = Utc::now();
        let media_type = MediaType {
            id: Uuid::new_v4(),
            name: validated.name,
            description: validated.description,
            base_type: validated.base_type,
            fields: validated.fields,
            accepted_file_types: validated.accepted_file_types,
            default_tags: validated.default_tags,
            status: MediaTypeStatus::Active,
            replaced_by: None,
            usage_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.media_types
            .insert(&media_type)
            .await
            .map_err(|e| {
                GovernanceError::on_named_write(e, EntityKind::MediaType, &media_type.name)
            })?;

        info!(
            "Created media type '{}' ({}) with {} field(s)",
            media_type.name,
            media_type.id,
            media_type.fields.len()
        );
        Ok(media_type)
    }

    /// Replace the definition of an existing media type
    ///
    /// Status, replacement and the cached usage count are not part of the
    /// definition; the store leaves them as they are, so a lifecycle change
    /// landing meanwhile survives the edit.
    pub async fn update(
        &self,
        id: Uuid,
        definition: MediaTypeDefinition,
    ) -> GovernanceResult<MediaType> {
        let mut media_type = self.load(id).await?;
        let validated = validate_definition(definition)?;
        self.ensure_unique_name(&validated.name, Some(id)).await?;

        let tolerated: HashSet<Uuid> = media_type
            .fields
            .iter()
            .filter_map(Field::tag_category_id)
            .collect();
        self.check_category_references(&validated.fields, &tolerated)
            .await?;

        media_type.name = validated.name;
        media_type.description = validated.description;
        media_type.base_type = validated.base_type;
        media_type.fields = validated.fields;
        media_type.accepted_file_types = validated.accepted_file_types;
        media_type.default_tags = validated.default_tags;
        media_type.updated_at = Utc::now();

        let updated = self
            .media_types
            .update_definition(&media_type)
            .await
            .map_err(|e| {
                GovernanceError::on_named_write(e, EntityKind::MediaType, &media_type.name)
            })?;
        if !updated {
            return Err(GovernanceError::NotFound {
                kind: EntityKind::MediaType,
                id,
            });
        }
        info!("Updated media type '{}' ({})", media_type.name, id);
        self.load(id).await
    }

    /// Delete a media type; refused while any record references it
    pub async fn delete(&self, id: Uuid) -> GovernanceResult<()> {
        self.lifecycle.delete(id).await
    }

    pub async fn archive(&self, id: Uuid) -> GovernanceResult<MediaType> {
        self.lifecycle.archive(id).await
    }

    /// Raw stored definition, without option resolution
    pub async fn load(&self, id: Uuid) -> GovernanceResult<MediaType> {
        self.media_types
            .get(id)
            .await?
            .ok_or(GovernanceError::NotFound {
                kind: EntityKind::MediaType,
                id,
            })
    }

    pub async fn get(&self, id: Uuid) -> GovernanceResult<MediaTypeView> {
        let media_type = self.load(id).await?;
        let mut options = HashMap::new();
        self.resolve(media_type, &mut options).await
    }

    pub async fn list(&self) -> GovernanceResult<Vec<MediaTypeView>> {
        self.list_filtered(None).await
    }

    pub async fn list_filtered(
        &self,
        status: Option<MediaTypeStatus>,
    ) -> GovernanceResult<Vec<MediaTypeView>> {
        let mut options = HashMap::new();
        let mut views = Vec::new();
        for media_type in self.media_types.list().await? {
            if status.is_some_and(|status| status != media_type.status) {
                continue;
            }
            views.push(self.resolve(media_type, &mut options).await?);
        }
        Ok(views)
    }

    /// Media types with at least one field taking options from `category_id`
    pub async fn referencing_category(&self, category_id: Uuid) -> GovernanceResult<Vec<MediaType>> {
        Ok(self
            .media_types
            .list()
            .await?
            .into_iter()
            .filter(|media_type| media_type.references_category(category_id))
            .collect())
    }

    async fn resolve(
        &self,
        media_type: MediaType,
        options: &mut HashMap<Uuid, Vec<String>>,
    ) -> GovernanceResult<MediaTypeView> {
        let mut resolved_fields = Vec::with_capacity(media_type.fields.len());
        for field in &media_type.fields {
            let (tag_category_id, field_options) = match field.kind.option_source() {
                None => (None, None),
                Some(OptionSource::Static { options }) => (None, Some(options.clone())),
                Some(OptionSource::Category { tag_category_id }) => {
                    if !options.contains_key(tag_category_id) {
                        let current = self.vocabulary.options_for(*tag_category_id).await?;
                        options.insert(*tag_category_id, current);
                    }
                    (
                        Some(*tag_category_id),
                        options.get(tag_category_id).cloned(),
                    )
                }
            };
            resolved_fields.push(ResolvedField {
                name: field.name.clone(),
                field_type: field.kind.field_type(),
                required: field.required,
                tag_category_id,
                options: field_options,
            });
        }

        Ok(MediaTypeView {
            media_type,
            resolved_fields,
        })
    }
}
