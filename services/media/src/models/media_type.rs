//! Media-type schema containers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::field::{Field, FieldDefinition, ResolvedField};

/// Closed set of base types a media type builds on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    #[default]
    Generic,
    Image,
    Video,
    Audio,
    Document,
}

impl BaseType {
    /// MIME patterns accepted when a definition lists none
    pub fn default_accepted_file_types(&self) -> &'static [&'static str] {
        match self {
            Self::Generic => &["*/*"],
            Self::Image => &["image/*"],
            Self::Video => &["video/*"],
            Self::Audio => &["audio/*"],
            Self::Document => &[
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "text/*",
            ],
        }
    }
}

impl std::fmt::Display for BaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Document => write!(f, "document"),
        }
    }
}

impl std::str::FromStr for BaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "document" => Ok(Self::Document),
            _ => Err(format!("Invalid base type: {}", s)),
        }
    }
}

/// Lifecycle status of a media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaTypeStatus {
    #[default]
    Active,
    Deprecated,
    Archived,
}

impl std::fmt::Display for MediaTypeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Deprecated => write!(f, "deprecated"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for MediaTypeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "deprecated" => Ok(Self::Deprecated),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid media type status: {}", s)),
        }
    }
}

/// Administrator-defined schema for a class of media records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub base_type: BaseType,
    pub fields: Vec<Field>,
    pub accepted_file_types: BTreeSet<String>,
    pub default_tags: Vec<String>,
    pub status: MediaTypeStatus,
    pub replaced_by: Option<Uuid>,
    /// Display hint only; guards always ask the usage tracker
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaType {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn references_category(&self, tag_category_id: Uuid) -> bool {
        self.fields
            .iter()
            .any(|field| field.tag_category_id() == Some(tag_category_id))
    }

    /// Whether `mime` matches one of the accepted patterns
    pub fn accepts(&self, mime: &str) -> bool {
        let mime = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let Some((kind, _)) = mime.split_once('/') else {
            return false;
        };

        self.accepted_file_types.iter().any(|pattern| {
            pattern == "*/*"
                || *pattern == mime
                || pattern
                    .strip_suffix("/*")
                    .is_some_and(|prefix| prefix == kind)
        })
    }
}

/// Create/update payload for a media type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTypeDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_type: BaseType,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub accepted_file_types: Vec<String>,
    #[serde(default)]
    pub default_tags: Vec<String>,
}

impl MediaTypeDefinition {
    pub fn new(name: impl Into<String>, base_type: BaseType) -> Self {
        Self {
            name: name.into(),
            base_type,
            ..Default::default()
        }
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_default_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_accepted_file_types<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_file_types = patterns.into_iter().map(Into::into).collect();
        self
    }
}

/// Media type as returned to callers, with option lists joined at read time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTypeView {
    #[serde(flatten)]
    pub media_type: MediaType,
    pub resolved_fields: Vec<ResolvedField>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_type_accepting(patterns: &[&str]) -> MediaType {
        let now = Utc::now();
        MediaType {
            id: Uuid::new_v4(),
            name: "Clip".to_string(),
            description: None,
            base_type: BaseType::Video,
            fields: Vec::new(),
            accepted_file_types: patterns.iter().map(|p| p.to_string()).collect(),
            default_tags: Vec::new(),
            status: MediaTypeStatus::Active,
            replaced_by: None,
            usage_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_accepts_wildcard_subtype() {
        let media_type = media_type_accepting(&["video/*", "application/pdf"]);
        assert!(media_type.accepts("video/mp4"));
        assert!(media_type.accepts("VIDEO/QuickTime"));
        assert!(media_type.accepts("application/pdf; charset=binary"));
        assert!(!media_type.accepts("image/png"));
        assert!(!media_type.accepts("garbage"));
    }

    #[test]
    fn test_generic_accepts_everything() {
        let media_type = media_type_accepting(BaseType::Generic.default_accepted_file_types());
        assert!(media_type.accepts("audio/flac"));
    }

    #[test]
    fn test_status_parses_case_insensitively() {
        assert_eq!("Archived".parse::<MediaTypeStatus>(), Ok(MediaTypeStatus::Archived));
        assert!("retired".parse::<MediaTypeStatus>().is_err());
    }

    #[test]
    fn test_base_type_round_trips_through_display() {
        for base in [
            BaseType::Generic,
            BaseType::Image,
            BaseType::Video,
            BaseType::Audio,
            BaseType::Document,
        ] {
            assert_eq!(base.to_string().parse::<BaseType>(), Ok(base));
        }
    }
}
