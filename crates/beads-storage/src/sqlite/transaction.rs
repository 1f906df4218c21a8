//! Transaction wrapper for [`SqliteStore`].

use rusqlite::{Connection, TransactionBehavior};

use beads_core::dependency::StepDependency;
use beads_core::digest::{Digest, Tombstone};
use beads_core::enums::EventType;
use beads_core::filter::StepFilter;
use beads_core::instance::Instance;
use beads_core::step::Step;

use crate::error::{Result, StorageError};
use crate::sqlite::store::{Audit, SqliteStore};
use crate::sqlite::{dependencies, digests, events, instances, steps};
use crate::traits::{InstanceUpdates, StepUpdates, Transaction};

/// A thin wrapper around a SQLite connection that is inside a transaction.
///
/// Implements [`Transaction`] by delegating to the same connection-level
/// helpers used by [`SqliteStore`].
pub(crate) struct SqliteTx<'a> {
    pub(crate) conn: &'a Connection,
    pub(crate) audited: bool,
}

impl SqliteTx<'_> {
    fn audit<'a>(&self, actor: &'a str) -> Audit<'a> {
        self.audited.then_some(actor)
    }
}

impl Transaction for SqliteTx<'_> {
    fn put_instance(&self, instance: &Instance, actor: &str) -> Result<()> {
        instances::insert_instance(self.conn, instance, self.audit(actor))
    }

    fn get_instance(&self, id: &str) -> Result<Instance> {
        instances::get_instance_on_conn(self.conn, id)
    }

    fn update_instance(&self, id: &str, updates: &InstanceUpdates, actor: &str) -> Result<()> {
        instances::update_instance_on_conn(self.conn, id, updates, self.audit(actor))
    }

    fn delete_instance(&self, id: &str) -> Result<usize> {
        instances::delete_instance_on_conn(self.conn, id)
    }

    fn put_step(&self, step: &Step) -> Result<()> {
        steps::insert_step(self.conn, step)
    }

    fn get_step(&self, id: &str) -> Result<Step> {
        steps::get_step_on_conn(self.conn, id)
    }

    fn list_steps(&self, instance_id: &str, filter: &StepFilter) -> Result<Vec<Step>> {
        steps::list_steps_on_conn(self.conn, instance_id, filter)
    }

    fn update_step(&self, id: &str, updates: &StepUpdates, actor: &str) -> Result<()> {
        steps::update_step_on_conn(self.conn, id, updates, self.audit(actor))
    }

    fn delete_steps(&self, instance_id: &str) -> Result<usize> {
        steps::delete_steps_on_conn(self.conn, instance_id)
    }

    fn add_dependency(&self, dep: &StepDependency) -> Result<()> {
        dependencies::add_dependency_on_conn(self.conn, dep)
    }

    fn list_dependencies(&self, instance_id: &str) -> Result<Vec<StepDependency>> {
        dependencies::list_dependencies_on_conn(self.conn, instance_id)
    }

    fn put_digest(&self, digest: &Digest) -> Result<i64> {
        digests::insert_digest(self.conn, digest)
    }

    fn put_tombstone(&self, tombstone: &Tombstone, actor: &str) -> Result<()> {
        digests::insert_tombstone(self.conn, tombstone, self.audit(actor))
    }

    fn get_tombstone(&self, id: &str) -> Result<Option<Tombstone>> {
        digests::get_tombstone_on_conn(self.conn, id)
    }

    fn delete_tombstone(&self, id: &str) -> Result<()> {
        digests::delete_tombstone_on_conn(self.conn, id)
    }

    fn record_event(
        &self,
        entity_id: &str,
        event_type: EventType,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<()> {
        events::emit_event(
            self.conn,
            self.audit(actor),
            events::EventRecord::new(entity_id, event_type).comment(comment),
        )
    }
}

// ---------------------------------------------------------------------------
// SqliteStore::run_in_transaction
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Runs a closure inside an IMMEDIATE transaction.
    ///
    /// The write lock is taken at `BEGIN`, so a read-then-write inside the
    /// closure cannot interleave with another writer.
    pub fn run_in_transaction_impl(
        &self,
        f: &dyn Fn(&dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let sqlite_tx = SqliteTx {
            conn: &tx,
            audited: self.audited,
        };
        // Rolled back on drop when `f` fails.
        f(&sqlite_tx)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))
    }
}
