//! Media-type schema and tag governance
//!
//! Administrators define media types (typed custom fields, accepted MIME
//! patterns, default tags) and shared tag categories. The engine keeps
//! existing media records consistent as those definitions change: records
//! are migrated between types without losing metadata and default tags are
//! backfilled idempotently. Records themselves live in an external store
//! reached through [`store::RecordStore`].

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod migration;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tag_sync;
pub mod tags;
pub mod usage;

pub use error::{GovernanceError, GovernanceResult};
pub use service::GovernanceService;
