//! Record store for the molecule engine.
//!
//! Provides the [`Storage`] trait and a SQLite implementation ([`SqliteStore`]).
//! One store holds durable mols (audited), another holds ephemeral wisps.

pub mod error;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience.
pub use error::StorageError;
pub use sqlite::SqliteStore;
pub use traits::{InstanceUpdates, StepUpdates, Storage, Transaction};

// ---------------------------------------------------------------------------
// Storage trait implementation for SqliteStore
// ---------------------------------------------------------------------------

use beads_core::dependency::StepDependency;
use beads_core::digest::{Digest, Tombstone};
use beads_core::event::Event;
use beads_core::filter::{InstanceFilter, StepFilter};
use beads_core::instance::Instance;
use beads_core::step::Step;

use crate::error::Result;

impl Storage for SqliteStore {
    fn put_instance(&self, instance: &Instance, actor: &str) -> Result<()> {
        self.put_instance_impl(instance, actor)
    }

    fn get_instance(&self, id: &str) -> Result<Instance> {
        self.get_instance_impl(id)
    }

    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        self.list_instances_impl(filter)
    }

    fn update_instance(&self, id: &str, updates: &InstanceUpdates, actor: &str) -> Result<()> {
        self.update_instance_impl(id, updates, actor)
    }

    fn delete_instance(&self, id: &str) -> Result<usize> {
        self.delete_instance_impl(id)
    }

    fn put_step(&self, step: &Step) -> Result<()> {
        self.put_step_impl(step)
    }

    fn get_step(&self, id: &str) -> Result<Step> {
        self.get_step_impl(id)
    }

    fn list_steps(&self, instance_id: &str, filter: &StepFilter) -> Result<Vec<Step>> {
        self.list_steps_impl(instance_id, filter)
    }

    fn update_step(&self, id: &str, updates: &StepUpdates, actor: &str) -> Result<()> {
        self.update_step_impl(id, updates, actor)
    }

    fn delete_steps(&self, instance_id: &str) -> Result<usize> {
        self.delete_steps_impl(instance_id)
    }

    fn add_dependency(&self, dep: &StepDependency) -> Result<()> {
        self.add_dependency_impl(dep)
    }

    fn list_dependencies(&self, instance_id: &str) -> Result<Vec<StepDependency>> {
        self.list_dependencies_impl(instance_id)
    }

    fn put_digest(&self, digest: &Digest) -> Result<i64> {
        self.put_digest_impl(digest)
    }

    fn get_digest(&self, id: i64) -> Result<Digest> {
        self.get_digest_impl(id)
    }

    fn list_digests(&self, instance_id: Option<&str>) -> Result<Vec<Digest>> {
        self.list_digests_impl(instance_id)
    }

    fn delete_digest(&self, id: i64) -> Result<()> {
        self.delete_digest_impl(id)
    }

    fn get_tombstone(&self, id: &str) -> Result<Option<Tombstone>> {
        self.get_tombstone_impl(id)
    }

    fn get_events(&self, entity_id: &str, limit: u32) -> Result<Vec<Event>> {
        self.get_events_impl(entity_id, limit)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.set_config_impl(key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        self.get_config_impl(key)
    }

    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        self.run_in_transaction_impl(f)
    }
}
