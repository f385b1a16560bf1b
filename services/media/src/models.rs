//! Domain models for media types, fields, tag categories and records

pub mod field;
pub mod media_type;
pub mod record;
pub mod tag_category;

pub use field::{Field, FieldDefinition, FieldKind, FieldType, OptionSource, ResolvedField};
pub use media_type::{BaseType, MediaType, MediaTypeDefinition, MediaTypeStatus, MediaTypeView};
pub use record::{MediaRecord, RecordPatch, UpdateOutcome};
pub use tag_category::{NewTagCategory, Tag, TagCategory, UpdateTagCategory};
