//! Error types for the media governance engine

use common::error::DatabaseError;
use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::LifecycleAction;
use crate::models::MediaTypeStatus;

/// Kind of entity an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    MediaType,
    TagCategory,
    Tag,
    Record,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MediaType => write!(f, "media type"),
            Self::TagCategory => write!(f, "tag category"),
            Self::Tag => write!(f, "tag"),
            Self::Record => write!(f, "record"),
        }
    }
}

/// Error type for schema, lifecycle and vocabulary operations
///
/// Per-record failures inside batch operations are never reported through
/// this type; they are returned as data on the batch reports.
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// Malformed definition, rejected before any write
    #[error("Validation error: {0}")]
    Validation(String),

    /// Name collision (case-insensitive)
    #[error("A {kind} named '{name}' already exists")]
    DuplicateName { kind: EntityKind, name: String },

    /// Unknown id
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Uuid },

    /// Illegal lifecycle move
    #[error("Cannot {action} a media type that is {from}")]
    InvalidTransition {
        from: MediaTypeStatus,
        action: LifecycleAction,
    },

    /// Delete attempted while records still reference the media type
    #[error("Media type {id} is still used by {usage} record(s)")]
    MediaTypeInUse { id: Uuid, usage: u64 },

    /// Hard delete attempted while fields still reference the category
    #[error("Tag category {id} is referenced by {} media type(s)", .referenced_by.len())]
    TagCategoryInUse { id: Uuid, referenced_by: Vec<Uuid> },

    /// Lost a compare-and-set race repeatedly; safe to retry later
    #[error("{kind} {id} kept changing concurrently, try again")]
    ConcurrentModification { kind: EntityKind, id: Uuid },

    /// Advisory lock could not be acquired, kept or released
    #[error("Lock error: {0}")]
    Lock(String),

    /// Storage backend failure
    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Type alias for governance results
pub type GovernanceResult<T> = Result<T, GovernanceError>;

impl GovernanceError {
    /// Map a store failure on a named write, reporting unique-index hits as
    /// [`GovernanceError::DuplicateName`]
    pub(crate) fn on_named_write(error: DatabaseError, kind: EntityKind, name: &str) -> Self {
        match error {
            DatabaseError::UniqueViolation(_) => GovernanceError::DuplicateName {
                kind,
                name: name.to_string(),
            },
            other => GovernanceError::Store(other),
        }
    }
}
