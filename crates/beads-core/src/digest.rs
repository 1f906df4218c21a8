//! Finalization records: digests for squashed instances, tombstones for
//! burned ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::Durability;

/// Permanent, agent-authored completion record. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    /// Store-assigned row id (0 before insertion).
    #[serde(default)]
    pub id: i64,

    pub instance_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template_id: String,

    /// Free text authored by the caller; opaque to the engine.
    pub summary: String,

    pub durability: Durability,

    /// Number of steps the instance had when it was squashed.
    #[serde(default)]
    pub steps_total: u32,

    /// Number of those steps that were done.
    #[serde(default)]
    pub steps_done: u32,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

/// Marker left behind by a burn so that later finalization attempts can be
/// told apart from lookups of ids that never existed.
///
/// Carries no instance data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    pub durability: Durability,
    pub burned_at: DateTime<Utc>,
}
