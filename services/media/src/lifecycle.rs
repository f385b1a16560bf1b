//! Lifecycle state machine for media types
//!
//! ```text
//! active ──deprecate──▶ deprecated ──archive──▶ archived
//!    └──────────────archive─────────────────────▲
//! ```
//!
//! `deprecate` is only reachable through a migration. `archived` is terminal.
//! Only `active` types may receive migrated records.
//! `delete` leaves the model entirely and is gated on a live usage count of 0.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EntityKind, GovernanceError, GovernanceResult};
use crate::models::{MediaType, MediaTypeStatus, UpdateOutcome};
use crate::store::{MediaTypeStore, StatusChange};
use crate::usage::UsageTracker;

const MAX_ATTEMPTS: u32 = 3;

/// Transitions a media type can be asked to make
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Deprecate,
    Archive,
    Delete,
    /// Receive records migrated from another media type
    MigrateInto,
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deprecate => write!(f, "deprecate"),
            Self::Archive => write!(f, "archive"),
            Self::Delete => write!(f, "delete"),
            Self::MigrateInto => write!(f, "migrate records into"),
        }
    }
}

/// Status reached by applying `action` to `from`
///
/// `Ok(None)` means the media type leaves the model (delete). Usage guards
/// are not part of this table.
pub fn transition(
    from: MediaTypeStatus,
    action: LifecycleAction,
) -> GovernanceResult<Option<MediaTypeStatus>> {
    use LifecycleAction::*;
    use MediaTypeStatus::*;

    match (from, action) {
        (Active | Deprecated, Deprecate) => Ok(Some(Deprecated)),
        (Active | Deprecated, Archive) => Ok(Some(Archived)),
        (_, Delete) => Ok(None),
        (Active, MigrateInto) => Ok(Some(Active)),
        (Archived, Deprecate | Archive) | (Deprecated | Archived, MigrateInto) => {
            Err(GovernanceError::InvalidTransition { from, action })
        }
    }
}

/// Applies lifecycle transitions, consulting the usage tracker as a guard
#[derive(Clone)]
pub struct LifecycleStateMachine {
    media_types: Arc<dyn MediaTypeStore>,
    usage: UsageTracker,
}

impl LifecycleStateMachine {
    pub fn new(media_types: Arc<dyn MediaTypeStore>, usage: UsageTracker) -> Self {
        Self { media_types, usage }
    }

    async fn load(&self, id: Uuid) -> GovernanceResult<MediaType> {
        self.media_types
            .get(id)
            .await?
            .ok_or(GovernanceError::NotFound {
                kind: EntityKind::MediaType,
                id,
            })
    }

    /// Apply `action` with a compare-and-set on the status just read
    ///
    /// A concurrent status change makes the write miss; the transition is
    /// then re-evaluated against the fresh status. Returns the previous
    /// status and the updated media type.
    async fn apply(
        &self,
        id: Uuid,
        action: LifecycleAction,
        replaced_by: Option<Uuid>,
    ) -> GovernanceResult<(MediaTypeStatus, MediaType)> {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut media_type = self.load(id).await?;
            let from = media_type.status;
            let status = transition(from, action)?.unwrap_or(from);

            let change = StatusChange {
                expected: from,
                status,
                replaced_by,
                updated_at: Utc::now(),
            };
            match self.media_types.set_status(id, &change).await? {
                UpdateOutcome::Applied => {
                    media_type.status = status;
                    media_type.replaced_by = replaced_by.or(media_type.replaced_by);
                    media_type.updated_at = change.updated_at;
                    return Ok((from, media_type));
                }
                UpdateOutcome::Missing => {
                    return Err(GovernanceError::NotFound {
                        kind: EntityKind::MediaType,
                        id,
                    });
                }
                UpdateOutcome::Conflict => {
                    debug!(
                        "Status of media type {} changed during {} (attempt {})",
                        id, action, attempt
                    );
                }
            }
        }
        Err(GovernanceError::ConcurrentModification {
            kind: EntityKind::MediaType,
            id,
        })
    }

    /// Archive a media type regardless of how many records reference it
    pub async fn archive(&self, id: Uuid) -> GovernanceResult<MediaType> {
        let (from, media_type) = self.apply(id, LifecycleAction::Archive, None).await?;
        info!("Media type {} archived (was {})", id, from);
        Ok(media_type)
    }

    /// Mark `id` as replaced by `replaced_by`; only migrations call this
    pub(crate) async fn deprecate(&self, id: Uuid, replaced_by: Uuid) -> GovernanceResult<MediaType> {
        if id == replaced_by {
            return Err(GovernanceError::Validation(
                "A media type cannot replace itself".to_string(),
            ));
        }
        let (from, media_type) = self
            .apply(id, LifecycleAction::Deprecate, Some(replaced_by))
            .await?;
        info!(
            "Media type {} deprecated in favour of {} (was {})",
            id, replaced_by, from
        );
        Ok(media_type)
    }

    /// Permanently remove a media type that no record references
    pub async fn delete(&self, id: Uuid) -> GovernanceResult<()> {
        let media_type = self.load(id).await?;
        transition(media_type.status, LifecycleAction::Delete)?;

        let usage = self.usage.usage_count(id).await?;
        if usage > 0 {
            warn!("Refusing to delete media type {}: {} record(s) reference it", id, usage);
            return Err(GovernanceError::MediaTypeInUse { id, usage });
        }

        if !self.media_types.delete(id).await? {
            return Err(GovernanceError::NotFound {
                kind: EntityKind::MediaType,
                id,
            });
        }
        info!("Media type {} deleted", id);
        Ok(())
    }
}
