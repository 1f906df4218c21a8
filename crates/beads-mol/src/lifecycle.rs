//! Finalization: squash into a digest, or burn without a record.
//!
//! Both are terminal and refuse an instance that is already finalized.
//! Completion of the steps is never checked; the caller decides when an
//! instance is finished.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use beads_core::digest::{Digest, Tombstone};
use beads_core::enums::{Durability, InstanceStatus, StepStatus};
use beads_core::filter::StepFilter;
use beads_core::validation::validate_summary;
use beads_storage::{InstanceUpdates, Transaction};

use crate::engine::{MolEngine, transact};
use crate::error::{MolError, Result};

/// What a burn removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BurnReport {
    pub id: String,
    pub durability: Durability,
    pub steps_deleted: usize,
    /// Echoed back to the caller and logged; never stored.
    pub reason: String,
}

impl MolEngine {
    /// Finalizes an instance into a permanent digest.
    ///
    /// A mol keeps its steps and is marked squashed. A wisp's digest is
    /// written to the durable store first; then its steps are deleted and it
    /// is marked squashed in the ephemeral store.
    pub fn squash(&self, instance_id: &str, summary: &str) -> Result<Digest> {
        validate_summary(summary)?;
        let inst = self.require_live_instance(instance_id)?;
        let store = self.store(inst.durability);

        let steps = store.list_steps(instance_id, &StepFilter::default())?;
        let mut digest = Digest {
            id: 0,
            instance_id: inst.id.clone(),
            template_id: inst.template_id.clone(),
            summary: summary.to_string(),
            durability: inst.durability,
            steps_total: steps.len() as u32,
            steps_done: steps.iter().filter(|s| s.status == StepStatus::Done).count() as u32,
            created_at: Utc::now(),
            created_by: self.actor.clone(),
        };

        let actor = self.actor.as_str();
        let squashed = match inst.durability {
            Durability::Durable => transact(store, |tx| {
                mark_squashed(tx, instance_id, actor)?;
                Ok(tx.put_digest(&digest)?)
            }),
            Durability::Ephemeral => {
                let digest_id = self.durable.put_digest(&digest)?;
                let result = transact(store, |tx| {
                    mark_squashed(tx, instance_id, actor)?;
                    tx.delete_steps(instance_id)?;
                    Ok(digest_id)
                });
                if result.is_err() {
                    // Another caller finalized the wisp first; drop our digest.
                    self.durable.delete_digest(digest_id)?;
                }
                result
            }
        };
        digest.id = match squashed {
            Ok(id) => id,
            Err(MolError::Storage(e)) if e.is_not_found() => {
                return Err(MolError::not_found("instance", instance_id));
            }
            Err(e) => return Err(e),
        };
        info!(
            id = instance_id,
            kind = inst.durability.noun(),
            digest = digest.id,
            steps_done = digest.steps_done,
            steps_total = digest.steps_total,
            "squashed"
        );
        Ok(digest)
    }

    /// Deletes an instance and its steps, leaving only a tombstone so the id
    /// reports `AlreadyFinalized` instead of being finalized twice.
    pub fn burn(&self, instance_id: &str, reason: &str) -> Result<BurnReport> {
        let inst = self.require_live_instance(instance_id)?;
        let store = self.store(inst.durability);
        let actor = self.actor.as_str();
        let burned = transact(store, |tx| {
            let current = tx.get_instance(instance_id)?;
            if current.is_terminal() {
                return Err(MolError::AlreadyFinalized(instance_id.to_string()));
            }
            let deleted = tx.delete_instance(instance_id)?;
            tx.put_tombstone(
                &Tombstone {
                    id: instance_id.to_string(),
                    durability: current.durability,
                    burned_at: Utc::now(),
                },
                actor,
            )?;
            Ok(deleted)
        });
        let steps_deleted = match burned {
            Ok(n) => n,
            Err(MolError::Storage(e)) if e.is_not_found() => {
                // Burned by someone else between lookup and write.
                return Err(MolError::AlreadyFinalized(instance_id.to_string()));
            }
            Err(e) => return Err(e),
        };

        let report = BurnReport {
            id: instance_id.to_string(),
            durability: inst.durability,
            steps_deleted,
            reason: reason.to_string(),
        };
        warn!(
            id = instance_id,
            kind = inst.durability.noun(),
            steps = report.steps_deleted,
            reason,
            "burned"
        );
        Ok(report)
    }
}

/// Marks an active instance squashed.
fn mark_squashed(tx: &dyn Transaction, instance_id: &str, actor: &str) -> Result<()> {
    if tx.get_instance(instance_id)?.is_terminal() {
        return Err(MolError::AlreadyFinalized(instance_id.to_string()));
    }
    let updates = InstanceUpdates {
        status: Some(InstanceStatus::Squashed),
        finalized_at: Some(Some(Utc::now())),
        ..Default::default()
    };
    Ok(tx.update_instance(instance_id, &updates, actor)?)
}
