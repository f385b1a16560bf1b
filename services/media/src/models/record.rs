//! Media records as seen by the governance engine
//!
//! Records are owned by the external media store. The engine only reads them
//! and issues conditional patches against `media_type_id` and `metadata.tags`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored media record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: Uuid,
    pub media_type_id: Uuid,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl MediaRecord {
    pub fn new(media_type_id: Uuid, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            media_type_id,
            metadata,
            updated_at: Utc::now(),
        }
    }

    /// Tags in `metadata.tags`, ignoring non-string entries
    pub fn tags(&self) -> Vec<String> {
        self.metadata
            .get("tags")
            .and_then(|tags| tags.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| tag.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `metadata.tags` can be rewritten without losing anything
    ///
    /// True when the tags are absent or a plain list of strings. Lists with
    /// other JSON values, non-list tags and non-object metadata are not safe
    /// to merge into.
    pub fn has_well_formed_tags(&self) -> bool {
        match &self.metadata {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => match map.get("tags") {
                None => true,
                Some(serde_json::Value::Array(tags)) => tags.iter().all(|tag| tag.is_string()),
                Some(_) => false,
            },
            _ => false,
        }
    }

    /// Replace `metadata.tags`, keeping every other metadata key
    pub fn set_tags(&mut self, tags: &[String]) {
        let tags = serde_json::Value::from(tags.to_vec());
        match self.metadata.as_object_mut() {
            Some(map) => {
                map.insert("tags".to_string(), tags);
            }
            None => {
                self.metadata = serde_json::json!({ "tags": tags });
            }
        }
    }
}

/// Change applied by a conditional update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPatch {
    /// Point the record at another media type; metadata is left untouched
    Reassign { media_type_id: Uuid },
    /// Swap the tag list, only if it still equals `expected`
    ReplaceTags {
        expected: Vec<String>,
        tags: Vec<String>,
    },
}

/// Result of a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The guard no longer held at write time
    Conflict,
    Missing,
}
