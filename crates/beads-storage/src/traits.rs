//! Storage and Transaction traits -- the record store the molecule engine
//! writes through.
//!
//! Consumers depend on these traits rather than on concrete implementations so
//! that alternative backends (mocks, proxies, etc.) can be substituted.

use chrono::{DateTime, Utc};

use beads_core::dependency::StepDependency;
use beads_core::digest::{Digest, Tombstone};
use beads_core::enums::{EventType, InstanceStatus, StepStatus};
use beads_core::event::Event;
use beads_core::filter::{InstanceFilter, StepFilter};
use beads_core::instance::Instance;
use beads_core::step::Step;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// Typed partial-update struct for steps.
///
/// Only `Some` fields are applied; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct StepUpdates {
    pub status: Option<StepStatus>,
    pub sealed: Option<bool>,

    /// Guard: apply only if the stored status equals this value. A mismatch
    /// is reported as [`StorageError::Conflict`](crate::StorageError::Conflict).
    pub expected_status: Option<StepStatus>,
}

impl StepUpdates {
    /// Moves a step from `from` to `to`, guarded on `from`.
    pub fn transition(from: StepStatus, to: StepStatus) -> Self {
        Self {
            status: Some(to),
            sealed: None,
            expected_status: Some(from),
        }
    }

    pub fn seal() -> Self {
        Self {
            sealed: Some(true),
            ..Self::default()
        }
    }
}

/// Typed partial-update struct for instances.
#[derive(Debug, Clone, Default)]
pub struct InstanceUpdates {
    pub status: Option<InstanceStatus>,
    pub sealed: Option<bool>,
    pub finalized_at: Option<Option<DateTime<Utc>>>,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Record store for instances, steps, edges and finalization records.
///
/// All methods return [`Result`] to propagate
/// [`StorageError`](crate::StorageError)s unchanged.
pub trait Storage: Send + Sync {
    // -- Instances -----------------------------------------------------------

    /// Inserts a new instance and its labels. Fails with `AlreadyExists` if
    /// the id is taken.
    fn put_instance(&self, instance: &Instance, actor: &str) -> Result<()>;

    fn get_instance(&self, id: &str) -> Result<Instance>;

    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>>;

    fn update_instance(&self, id: &str, updates: &InstanceUpdates, actor: &str) -> Result<()>;

    /// Deletes an instance together with its steps and edges. Returns the
    /// number of steps removed.
    fn delete_instance(&self, id: &str) -> Result<usize>;

    // -- Steps ---------------------------------------------------------------

    fn put_step(&self, step: &Step) -> Result<()>;

    fn get_step(&self, id: &str) -> Result<Step>;

    /// Steps of one instance, in ordinal order.
    fn list_steps(&self, instance_id: &str, filter: &StepFilter) -> Result<Vec<Step>>;

    fn update_step(&self, id: &str, updates: &StepUpdates, actor: &str) -> Result<()>;

    /// Deletes every step of an instance. Returns the number removed.
    fn delete_steps(&self, instance_id: &str) -> Result<usize>;

    // -- Dependencies --------------------------------------------------------

    fn add_dependency(&self, dep: &StepDependency) -> Result<()>;

    /// All edges whose steps belong to `instance_id`.
    fn list_dependencies(&self, instance_id: &str) -> Result<Vec<StepDependency>>;

    // -- Digests -------------------------------------------------------------

    /// Inserts a digest and returns its assigned id.
    fn put_digest(&self, digest: &Digest) -> Result<i64>;

    fn get_digest(&self, id: i64) -> Result<Digest>;

    /// Digests, newest first; all of them when `instance_id` is `None`.
    fn list_digests(&self, instance_id: Option<&str>) -> Result<Vec<Digest>>;

    fn delete_digest(&self, id: i64) -> Result<()>;

    // -- Tombstones ----------------------------------------------------------

    fn get_tombstone(&self, id: &str) -> Result<Option<Tombstone>>;

    // -- Events --------------------------------------------------------------

    /// Most recent events for an instance or step, newest first.
    fn get_events(&self, entity_id: &str, limit: u32) -> Result<Vec<Event>>;

    // -- Configuration -------------------------------------------------------

    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    fn get_config(&self, key: &str) -> Result<String>;

    // -- Transactions --------------------------------------------------------

    /// Executes a closure within a write transaction.
    ///
    /// The write lock is taken when the transaction begins. If the closure
    /// returns `Ok`, the transaction is committed; otherwise it is rolled
    /// back and nothing it wrote is visible to any reader.
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// Subset of [`Storage`] methods available inside a transaction.
///
/// All operations share a single database connection and are committed or
/// rolled back atomically.
pub trait Transaction {
    fn put_instance(&self, instance: &Instance, actor: &str) -> Result<()>;
    fn get_instance(&self, id: &str) -> Result<Instance>;
    fn update_instance(&self, id: &str, updates: &InstanceUpdates, actor: &str) -> Result<()>;
    fn delete_instance(&self, id: &str) -> Result<usize>;

    fn put_step(&self, step: &Step) -> Result<()>;
    fn get_step(&self, id: &str) -> Result<Step>;
    fn list_steps(&self, instance_id: &str, filter: &StepFilter) -> Result<Vec<Step>>;
    fn update_step(&self, id: &str, updates: &StepUpdates, actor: &str) -> Result<()>;
    fn delete_steps(&self, instance_id: &str) -> Result<usize>;

    fn add_dependency(&self, dep: &StepDependency) -> Result<()>;
    fn list_dependencies(&self, instance_id: &str) -> Result<Vec<StepDependency>>;

    fn put_digest(&self, digest: &Digest) -> Result<i64>;

    fn put_tombstone(&self, tombstone: &Tombstone, actor: &str) -> Result<()>;
    fn get_tombstone(&self, id: &str) -> Result<Option<Tombstone>>;
    fn delete_tombstone(&self, id: &str) -> Result<()>;

    /// Appends an audit event (a no-op on stores opened without auditing).
    fn record_event(
        &self,
        entity_id: &str,
        event_type: EventType,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<()>;
}
