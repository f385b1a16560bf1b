//! Tag canonicalization and the tag-category vocabulary
//!
//! Tags have two forms. The storage form is the trimmed tag with its case
//! preserved; the comparison form is the trimmed, lower-cased tag and is only
//! ever used for equality and duplicate checks.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EntityKind, GovernanceError, GovernanceResult};
use crate::models::{NewTagCategory, Tag, TagCategory, UpdateOutcome, UpdateTagCategory};
use crate::store::{MediaTypeStore, TagCategoryStore};

const MAX_ATTEMPTS: u32 = 3;

/// Storage form of a tag
pub fn normalize(tag: &str) -> String {
    tag.trim().to_string()
}

/// Comparison form of a tag
pub fn comparison_key(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Normalize, drop blanks and keep the first occurrence of each comparison form
pub fn dedupe<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| normalize(tag.as_ref()))
        .filter(|tag| !tag.is_empty() && seen.insert(comparison_key(tag)))
        .collect()
}

/// Entries of `required` with no comparison-form match in `existing`
pub fn missing_tags(required: &[String], existing: &[String]) -> Vec<String> {
    let mut present: HashSet<String> = existing.iter().map(|tag| comparison_key(tag)).collect();
    required
        .iter()
        .map(|tag| normalize(tag))
        .filter(|tag| !tag.is_empty() && present.insert(comparison_key(tag)))
        .collect()
}

/// `existing` unchanged, followed by whatever of `additions` it lacks
pub fn merge_tags(existing: &[String], additions: &[String]) -> Vec<String> {
    let mut merged = existing.to_vec();
    merged.extend(missing_tags(additions, existing));
    merged
}

/// Manages tag categories and their deduplicated tag sets
#[derive(Clone)]
pub struct TagVocabulary {
    categories: Arc<dyn TagCategoryStore>,
    media_types: Arc<dyn MediaTypeStore>,
}

impl TagVocabulary {
    pub fn new(categories: Arc<dyn TagCategoryStore>, media_types: Arc<dyn MediaTypeStore>) -> Self {
        Self {
            categories,
            media_types,
        }
    }

    async fn ensure_unique_name(&self, name: &str, except: Option<Uuid>) -> GovernanceResult<()> {
        if let Some(existing) = self.categories.find_by_name(name).await? {
            if Some(existing.id) != except {
                return Err(GovernanceError::DuplicateName {
                    kind: EntityKind::TagCategory,
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn category_name(name: &str) -> GovernanceResult<String> {
        let name = normalize(name);
        if name.is_empty() {
            return Err(GovernanceError::Validation(
                "Tag category name is required".to_string(),
            ));
        }
        Ok(name)
    }

    fn tag_name(name: &str) -> GovernanceResult<String> {
        let name = normalize(name);
        if name.is_empty() {
            return Err(GovernanceError::Validation("Tag name is required".to_string()));
        }
        Ok(name)
    }

    /// Create an active category; duplicate tags in the payload collapse
    pub async fn create_category(&self, payload: NewTagCategory) -> GovernanceResult<TagCategory> {
        let name = Self::category_name(&payload.name)?;
        self.ensure_unique_name(&name, None).await?;

        let now = next_timestamp(None);
        let category = TagCategory {
            id: Uuid::new_v4(),
            name,
            description: payload.description.map(|d| d.trim().to_string()),
            tags: dedupe(&payload.tags).into_iter().map(Tag::new).collect(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.categories
            .insert(&category)
            .await
            .map_err(|e| GovernanceError::on_named_write(e, EntityKind::TagCategory, &category.name))?;

        info!(
            "Created tag category '{}' ({}) with {} tag(s)",
            category.name,
            category.id,
            category.tags.len()
        );
        Ok(category)
    }

    pub async fn get_category(&self, id: Uuid) -> GovernanceResult<TagCategory> {
        self.categories
            .get(id)
            .await?
            .ok_or(GovernanceError::NotFound {
                kind: EntityKind::TagCategory,
                id,
            })
    }

    pub async fn list_categories(&self, include_inactive: bool) -> GovernanceResult<Vec<TagCategory>> {
        let categories = self.categories.list().await?;
        Ok(categories
            .into_iter()
            .filter(|category| include_inactive || category.is_active)
            .collect())
    }

    pub async fn update_category(
        &self,
        id: Uuid,
        payload: UpdateTagCategory,
    ) -> GovernanceResult<TagCategory> {
        let name = match payload.name {
            Some(name) => {
                let name = Self::category_name(&name)?;
                self.ensure_unique_name(&name, Some(id)).await?;
                Some(name)
            }
            None => None,
        };
        let description = payload.description.map(|description| description.trim().to_string());

        let (category, ()) = self
            .modify(id, |category| {
                if let Some(name) = &name {
                    category.name = name.clone();
                }
                if let Some(description) = &description {
                    category.description =
                        (!description.is_empty()).then(|| description.clone());
                }
                if let Some(is_active) = payload.is_active {
                    category.is_active = is_active;
                }
                Ok(())
            })
            .await?;
        Ok(category)
    }

    /// Soft delete deactivates; hard delete removes the category outright
    ///
    /// A hard delete is refused while any media-type field still takes its
    /// options from the category.
    pub async fn delete_category(&self, id: Uuid, hard: bool) -> GovernanceResult<()> {
        if !hard {
            self.modify(id, |category| {
                category.is_active = false;
                Ok(())
            })
            .await?;
            info!("Deactivated tag category {}", id);
            return Ok(());
        }

        self.get_category(id).await?;
        let referenced_by: Vec<Uuid> = self
            .media_types
            .list()
            .await?
            .into_iter()
            .filter(|media_type| media_type.references_category(id))
            .map(|media_type| media_type.id)
            .collect();
        if !referenced_by.is_empty() {
            warn!(
                "Refusing to delete tag category {}: referenced by {} media type(s)",
                id,
                referenced_by.len()
            );
            return Err(GovernanceError::TagCategoryInUse { id, referenced_by });
        }

        if !self.categories.delete(id).await? {
            return Err(GovernanceError::NotFound {
                kind: EntityKind::TagCategory,
                id,
            });
        }
        info!("Deleted tag category {}", id);
        Ok(())
    }

    /// Reverse a soft delete
    pub async fn restore_category(&self, id: Uuid) -> GovernanceResult<TagCategory> {
        let (category, ()) = self
            .modify(id, |category| {
                category.is_active = true;
                Ok(())
            })
            .await?;
        Ok(category)
    }

    /// Add one tag; rejected when its comparison form already exists
    pub async fn add_tag(&self, category_id: Uuid, name: &str) -> GovernanceResult<Tag> {
        let name = Self::tag_name(name)?;
        let (_, tag) = self
            .modify(category_id, |category| {
                if category.contains(&name) {
                    return Err(GovernanceError::DuplicateName {
                        kind: EntityKind::Tag,
                        name: name.clone(),
                    });
                }
                let tag = Tag::new(name.clone());
                category.tags.push(tag.clone());
                Ok(tag)
            })
            .await?;
        Ok(tag)
    }

    /// Add several tags at once
    ///
    /// Duplicates inside `names` collapse; a name already in the category
    /// rejects the whole batch.
    pub async fn add_tags(&self, category_id: Uuid, names: &[String]) -> GovernanceResult<Vec<Tag>> {
        let names = dedupe(names);
        let (_, tags) = self
            .modify(category_id, |category| {
                if let Some(existing) = names.iter().find(|name| category.contains(name)) {
                    return Err(GovernanceError::DuplicateName {
                        kind: EntityKind::Tag,
                        name: existing.clone(),
                    });
                }
                let tags: Vec<Tag> = names.iter().cloned().map(Tag::new).collect();
                category.tags.extend(tags.iter().cloned());
                Ok(tags)
            })
            .await?;
        Ok(tags)
    }

    pub async fn rename_tag(
        &self,
        category_id: Uuid,
        tag_id: Uuid,
        name: &str,
    ) -> GovernanceResult<Tag> {
        let name = Self::tag_name(name)?;
        let key = comparison_key(&name);
        let (_, renamed) = self
            .modify(category_id, |category| {
                if category
                    .tags
                    .iter()
                    .any(|tag| tag.id != tag_id && comparison_key(&tag.name) == key)
                {
                    return Err(GovernanceError::DuplicateName {
                        kind: EntityKind::Tag,
                        name: name.clone(),
                    });
                }

                let tag = category
                    .tags
                    .iter_mut()
                    .find(|tag| tag.id == tag_id)
                    .ok_or(GovernanceError::NotFound {
                        kind: EntityKind::Tag,
                        id: tag_id,
                    })?;
                tag.name = name.clone();
                Ok(tag.clone())
            })
            .await?;
        Ok(renamed)
    }

    pub async fn remove_tag(&self, category_id: Uuid, tag_id: Uuid) -> GovernanceResult<()> {
        self.modify(category_id, |category| {
            let before = category.tags.len();
            category.tags.retain(|tag| tag.id != tag_id);
            if category.tags.len() == before {
                return Err(GovernanceError::NotFound {
                    kind: EntityKind::Tag,
                    id: tag_id,
                });
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Current option list of a category; empty when it is gone or inactive
    pub async fn options_for(&self, category_id: Uuid) -> GovernanceResult<Vec<String>> {
        Ok(match self.categories.get(category_id).await? {
            Some(category) if category.is_active => category.tag_names(),
            _ => Vec::new(),
        })
    }

    /// Read, edit and write back a category with a compare-and-set on `updated_at`
    ///
    /// `edit` runs against the freshly read category on every attempt, so its
    /// checks (duplicates, missing tags) always see the state being replaced.
    async fn modify<T, F>(&self, id: Uuid, mut edit: F) -> GovernanceResult<(TagCategory, T)>
    where
        F: FnMut(&mut TagCategory) -> GovernanceResult<T> + Send,
        T: Send,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut category = self.get_category(id).await?;
            let expected = category.updated_at;
            let value = edit(&mut category)?;
            category.updated_at = next_timestamp(Some(expected));

            let outcome = self
                .categories
                .update(&category, expected)
                .await
                .map_err(|e| {
                    GovernanceError::on_named_write(e, EntityKind::TagCategory, &category.name)
                })?;
            match outcome {
                UpdateOutcome::Applied => return Ok((category, value)),
                UpdateOutcome::Missing => {
                    return Err(GovernanceError::NotFound {
                        kind: EntityKind::TagCategory,
                        id,
                    });
                }
                UpdateOutcome::Conflict => {
                    debug!("Tag category {} changed underneath us (attempt {})", id, attempt);
                }
            }
        }
        warn!("Giving up on tag category {} after {} attempts", id, MAX_ATTEMPTS);
        Err(GovernanceError::ConcurrentModification {
            kind: EntityKind::TagCategory,
            id,
        })
    }
}

/// Write timestamp at the precision PostgreSQL stores, strictly after `previous`
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match previous {
        Some(previous) if now <= previous => previous + Duration::microseconds(1),
        _ => now,
    }
}
