//! Field variants for media-type schemas
//!
//! Administrators submit fields as loosely shaped [`FieldDefinition`]s. They
//! are validated once into [`Field`], whose Select/MultiSelect variants carry
//! exactly one [`OptionSource`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GovernanceError, GovernanceResult};
use crate::tags::{comparison_key, normalize};

/// Flat field type tag as it appears in submitted definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    TextArea,
    Number,
    Date,
    Boolean,
    Select,
    MultiSelect,
}

impl FieldType {
    pub fn is_choice(&self) -> bool {
        matches!(self, Self::Select | Self::MultiSelect)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::TextArea => write!(f, "text_area"),
            Self::Number => write!(f, "number"),
            Self::Date => write!(f, "date"),
            Self::Boolean => write!(f, "boolean"),
            Self::Select => write!(f, "select"),
            Self::MultiSelect => write!(f, "multi_select"),
        }
    }
}

/// Where a Select/MultiSelect field takes its options from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptionSource {
    /// Options listed on the field itself
    Static { options: Vec<String> },
    /// Options joined from a tag category at read time
    Category { tag_category_id: Uuid },
}

/// Validated field variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    TextArea,
    Number,
    Date,
    Boolean,
    Select { source: OptionSource },
    MultiSelect { source: OptionSource },
}

impl FieldKind {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Text => FieldType::Text,
            Self::TextArea => FieldType::TextArea,
            Self::Number => FieldType::Number,
            Self::Date => FieldType::Date,
            Self::Boolean => FieldType::Boolean,
            Self::Select { .. } => FieldType::Select,
            Self::MultiSelect { .. } => FieldType::MultiSelect,
        }
    }

    pub fn option_source(&self) -> Option<&OptionSource> {
        match self {
            Self::Select { source } | Self::MultiSelect { source } => Some(source),
            _ => None,
        }
    }
}

/// One typed slot in a media type's schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub required: bool,
    pub kind: FieldKind,
}

impl Field {
    /// Category this field joins its options from, if any
    pub fn tag_category_id(&self) -> Option<Uuid> {
        match self.kind.option_source() {
            Some(OptionSource::Category { tag_category_id }) => Some(*tag_category_id),
            _ => None,
        }
    }
}

/// Field definition as submitted by an administrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub tag_category_id: Option<Uuid>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            options: None,
            tag_category_id: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_category(mut self, tag_category_id: Uuid) -> Self {
        self.tag_category_id = Some(tag_category_id);
        self
    }
}

impl From<&Field> for FieldDefinition {
    fn from(field: &Field) -> Self {
        let mut definition = FieldDefinition::new(field.name.clone(), field.kind.field_type());
        definition.required = field.required;
        match field.kind.option_source() {
            Some(OptionSource::Static { options }) => definition.options = Some(options.clone()),
            Some(OptionSource::Category { tag_category_id }) => {
                definition.tag_category_id = Some(*tag_category_id)
            }
            None => {}
        }
        definition
    }
}

impl TryFrom<FieldDefinition> for Field {
    type Error = GovernanceError;

    fn try_from(definition: FieldDefinition) -> GovernanceResult<Self> {
        let name = definition.name.trim().to_string();
        if name.is_empty() {
            return Err(GovernanceError::Validation(
                "Field name is required".to_string(),
            ));
        }

        let field_type = definition.field_type;
        if !field_type.is_choice()
            && (definition.options.is_some() || definition.tag_category_id.is_some())
        {
            return Err(GovernanceError::Validation(format!(
                "Field '{}' of type {} cannot declare options or a tag category",
                name, field_type
            )));
        }

        let kind = match field_type {
            FieldType::Text => FieldKind::Text,
            FieldType::TextArea => FieldKind::TextArea,
            FieldType::Number => FieldKind::Number,
            FieldType::Date => FieldKind::Date,
            FieldType::Boolean => FieldKind::Boolean,
            FieldType::Select => FieldKind::Select {
                source: option_source(&name, definition.options, definition.tag_category_id)?,
            },
            FieldType::MultiSelect => FieldKind::MultiSelect {
                source: option_source(&name, definition.options, definition.tag_category_id)?,
            },
        };

        Ok(Field {
            name,
            required: definition.required,
            kind,
        })
    }
}

fn option_source(
    field_name: &str,
    options: Option<Vec<String>>,
    tag_category_id: Option<Uuid>,
) -> GovernanceResult<OptionSource> {
    match (options, tag_category_id) {
        (Some(_), Some(_)) => Err(GovernanceError::Validation(format!(
            "Field '{}' must use either static options or a tag category, not both",
            field_name
        ))),
        (None, None) => Err(GovernanceError::Validation(format!(
            "Field '{}' requires static options or a tag category",
            field_name
        ))),
        (None, Some(tag_category_id)) => Ok(OptionSource::Category { tag_category_id }),
        (Some(options), None) => {
            let mut seen = std::collections::HashSet::new();
            let mut cleaned = Vec::with_capacity(options.len());
            for option in options {
                let option = normalize(&option);
                if option.is_empty() {
                    return Err(GovernanceError::Validation(format!(
                        "Field '{}' contains a blank option",
                        field_name
                    )));
                }
                if !seen.insert(comparison_key(&option)) {
                    return Err(GovernanceError::Validation(format!(
                        "Field '{}' lists option '{}' more than once",
                        field_name, option
                    )));
                }
                cleaned.push(option);
            }
            if cleaned.is_empty() {
                return Err(GovernanceError::Validation(format!(
                    "Field '{}' requires at least one option",
                    field_name
                )));
            }
            Ok(OptionSource::Static { options: cleaned })
        }
    }
}

/// Field with its option list joined at read time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_category_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}
