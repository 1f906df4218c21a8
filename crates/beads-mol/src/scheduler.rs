//! Scheduling: which steps may run, and the status moves workers report.
//!
//! Readiness is derived on every query from the stored graph, never cached.
//! Ordinary `Needs` are checked against sibling steps. A fan-in step also
//! checks its parent's current children across both stores, so the barrier
//! grows as children are bonded and only closes once the parent is sealed.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use beads_core::dependency::StepDependency;
use beads_core::enums::StepStatus;
use beads_core::filter::StepFilter;
use beads_core::instance::Instance;
use beads_core::step::{Step, split_step_id};
use beads_storage::{InstanceUpdates, StepUpdates, StorageError, Transaction};

use crate::engine::{MolEngine, transact};
use crate::error::{MolError, Result};
use crate::graph::StepGraph;

/// Why a pending step can or cannot run right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    /// Prerequisites (or an unsealed parent) still outstanding.
    Waiting { pending: Vec<String> },
    /// A prerequisite failed; this step will never become ready by itself.
    Blocked { failed: Vec<String> },
    /// Running, done or failed.
    Settled,
}

impl Readiness {
    /// A parent step can show up both as an ordinary need and as the fan-in
    /// parent; each id is reported once, in first-seen order.
    fn from_parts(mut pending: Vec<String>, mut failed: Vec<String>) -> Self {
        let mut seen = BTreeSet::new();
        failed.retain(|id| seen.insert(id.clone()));
        seen.clear();
        pending.retain(|id| seen.insert(id.clone()));

        if !failed.is_empty() {
            Self::Blocked { failed }
        } else if pending.is_empty() {
            Self::Ready
        } else {
            Self::Waiting { pending }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// A step held back for good by failed prerequisites.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedStep {
    pub step: Step,
    pub failed: Vec<String>,
}

/// What a fan-out parent reference points at.
#[derive(Debug, Clone)]
pub(crate) enum ParentRef {
    Step { step: Step, owner: Instance },
    Instance(Instance),
}

impl ParentRef {
    pub(crate) fn id(&self) -> &str {
        match self {
            Self::Step { step, .. } => &step.id,
            Self::Instance(inst) => &inst.id,
        }
    }

    pub(crate) fn owner(&self) -> &Instance {
        match self {
            Self::Step { owner, .. } => owner,
            Self::Instance(inst) => inst,
        }
    }

    /// Sealed explicitly, or implicitly once the parent step is done or the
    /// parent instance is finalized.
    pub(crate) fn is_sealed(&self) -> bool {
        match self {
            Self::Step { step, owner } => {
                step.sealed || step.status == StepStatus::Done || owner.is_terminal()
            }
            Self::Instance(inst) => inst.sealed || inst.is_terminal(),
        }
    }

    fn failed(&self) -> bool {
        matches!(self, Self::Step { step, .. } if step.status == StepStatus::Failed)
    }

    /// Re-reads the parent inside a transaction on its own store.
    pub(crate) fn reload(&self, tx: &dyn Transaction) -> beads_storage::error::Result<ParentRef> {
        Ok(match self {
            Self::Step { step, owner } => Self::Step {
                step: tx.get_step(&step.id)?,
                owner: tx.get_instance(&owner.id)?,
            },
            Self::Instance(inst) => Self::Instance(tx.get_instance(&inst.id)?),
        })
    }
}

impl MolEngine {
    /// Resolves a parent reference to a step (`<instance>.<n>`) or an
    /// instance, in either store.
    pub(crate) fn resolve_parent(&self, parent: &str) -> Result<Option<ParentRef>> {
        if split_step_id(parent).is_some() {
            return Ok(self
                .find_step(parent)?
                .map(|(step, owner)| ParentRef::Step { step, owner }));
        }
        Ok(self.find_instance(parent)?.map(ParentRef::Instance))
    }

    /// Steps of `instance_id` that may move to `running` now, in ordinal
    /// order. A finalized instance has none.
    pub fn ready_steps(&self, instance_id: &str) -> Result<Vec<Step>> {
        let (inst, steps, graph) = self.load_tree(instance_id)?;
        if inst.is_terminal() {
            return Ok(Vec::new());
        }
        let by_id = index(&steps);
        let mut ready = Vec::new();
        for step in &steps {
            if self.evaluate(step, &by_id, &graph)?.is_ready() {
                ready.push(step.clone());
            }
        }
        Ok(ready)
    }

    /// Pending steps that a failed prerequisite holds back permanently.
    pub fn blocked_steps(&self, instance_id: &str) -> Result<Vec<BlockedStep>> {
        let (_, steps, graph) = self.load_tree(instance_id)?;
        let by_id = index(&steps);
        let mut blocked = Vec::new();
        for step in &steps {
            if let Readiness::Blocked { failed } = self.evaluate(step, &by_id, &graph)? {
                blocked.push(BlockedStep {
                    step: step.clone(),
                    failed,
                });
            }
        }
        Ok(blocked)
    }

    pub fn readiness(&self, step_id: &str) -> Result<Readiness> {
        let (step, owner) = self
            .find_step(step_id)?
            .ok_or_else(|| MolError::not_found("step", step_id))?;
        let (_, steps, graph) = self.load_tree(&owner.id)?;
        self.evaluate(&step, &index(&steps), &graph)
    }

    fn load_tree(&self, instance_id: &str) -> Result<(Instance, Vec<Step>, StepGraph)> {
        let inst = self.get_instance(instance_id)?;
        let store = self.store(inst.durability);
        let steps = store.list_steps(instance_id, &StepFilter::default())?;
        let deps = store.list_dependencies(instance_id)?;
        Ok((inst, steps, StepGraph::from_dependencies(&deps)))
    }

    fn evaluate(
        &self,
        step: &Step,
        siblings: &BTreeMap<&str, StepStatus>,
        graph: &StepGraph,
    ) -> Result<Readiness> {
        if !step.status.is_pending() {
            return Ok(Readiness::Settled);
        }
        let mut pending = Vec::new();
        let mut failed = Vec::new();
        for need in graph.needs(&step.id) {
            match siblings.get(need) {
                Some(StepStatus::Done) => {}
                Some(StepStatus::Failed) => failed.push(need.to_string()),
                _ => pending.push(need.to_string()),
            }
        }
        if let Some(ref parent) = step.waits_for {
            self.check_fan_in(parent, &mut pending, &mut failed)?;
        }
        Ok(Readiness::from_parts(pending, failed))
    }

    /// Adds what a fan-in barrier on `parent` still waits for.
    ///
    /// Every recorded step of every child must be done. A squashed wisp has
    /// no steps left and a burned child no longer exists. A squashed mol
    /// keeps its steps, and those that are not done can never finish, so
    /// they hold the barrier as failed ones do.
    fn check_fan_in(
        &self,
        parent: &str,
        pending: &mut Vec<String>,
        failed: &mut Vec<String>,
    ) -> Result<()> {
        match self.resolve_parent(parent)? {
            Some(p) if p.failed() => failed.push(p.id().to_string()),
            Some(p) if p.is_sealed() => {}
            _ => pending.push(parent.to_string()),
        }
        for child in self.children(parent)? {
            let finalized = child.is_terminal();
            let steps = self
                .store(child.durability)
                .list_steps(&child.id, &StepFilter::default())?;
            for s in steps {
                match s.status {
                    StepStatus::Done => {}
                    StepStatus::Failed => failed.push(s.id),
                    _ if finalized => failed.push(s.id),
                    _ => pending.push(s.id),
                }
            }
        }
        Ok(())
    }

    /// Applies a worker-reported status move.
    ///
    /// Allowed moves are `ready -> running`, `running -> done` and
    /// `running -> failed`; a stored `blocked` step may start once its
    /// readiness is `Ready`. Completing a step promotes same-instance
    /// dependents whose needs are now all done to `ready`.
    pub fn transition(&self, step_id: &str, to: StepStatus) -> Result<Step> {
        let (step, owner) = self
            .find_step(step_id)?
            .ok_or_else(|| MolError::not_found("step", step_id))?;
        if owner.is_terminal() {
            return Err(MolError::AlreadyFinalized(owner.id));
        }
        let from = step.status;
        if !from.can_transition_to(to) {
            return Err(MolError::InvalidTransition {
                step: step.id,
                from,
                to,
            });
        }
        if from == StepStatus::Blocked {
            match self.readiness(step_id)? {
                Readiness::Ready => {}
                Readiness::Blocked { failed } => {
                    return Err(MolError::Blocked {
                        step: step.id,
                        failed,
                    });
                }
                _ => {
                    return Err(MolError::InvalidTransition {
                        step: step.id,
                        from,
                        to,
                    });
                }
            }
        }

        let store = self.store(owner.durability);
        let actor = self.actor.as_str();
        let applied = transact(store, |tx| {
            if tx.get_instance(&owner.id)?.is_terminal() {
                return Err(MolError::AlreadyFinalized(owner.id.clone()));
            }
            tx.update_step(step_id, &StepUpdates::transition(from, to), actor)?;
            if to == StepStatus::Done {
                return Ok(promote_dependents(tx, &owner.id, step_id, actor)?);
            }
            Ok(Vec::new())
        });
        let promoted = match applied {
            Ok(promoted) => promoted,
            Err(MolError::Storage(StorageError::Conflict { .. })) => {
                let current = self.get_step(step_id)?;
                return Err(MolError::InvalidTransition {
                    step: current.id,
                    from: current.status,
                    to,
                });
            }
            Err(e) => return Err(e),
        };

        debug!(step = step_id, %from, %to, "step transitioned");
        for id in &promoted {
            debug!(step = %id, "step promoted to ready");
        }
        self.get_step(step_id)
    }

    /// Closes a fan-out: no further children may be bonded under `parent`,
    /// and fan-in steps waiting on it can now complete. Sealing twice is a
    /// no-op.
    pub fn seal(&self, parent: &str) -> Result<()> {
        let parent_ref = self
            .resolve_parent(parent)?
            .ok_or_else(|| MolError::not_found("parent", parent))?;
        let owner = parent_ref.owner();
        if owner.is_terminal() {
            return Err(MolError::AlreadyFinalized(owner.id.clone()));
        }
        let store = self.store(owner.durability);
        match parent_ref {
            ParentRef::Step { ref step, .. } if !step.sealed => {
                store.update_step(&step.id, &StepUpdates::seal(), &self.actor)?;
            }
            ParentRef::Instance(ref inst) if !inst.sealed => {
                let updates = InstanceUpdates {
                    sealed: Some(true),
                    ..Default::default()
                };
                store.update_instance(&inst.id, &updates, &self.actor)?;
            }
            _ => {
                debug!(parent, "fan-out already sealed");
                return Ok(());
            }
        }
        info!(parent, "fan-out sealed");
        Ok(())
    }
}

fn index(steps: &[Step]) -> BTreeMap<&str, StepStatus> {
    steps.iter().map(|s| (s.id.as_str(), s.status)).collect()
}

/// Promotes blocked, non-fan-in dependents of `done_id` whose needs are all
/// done. Runs inside the transaction that completed `done_id`.
fn promote_dependents(
    tx: &dyn Transaction,
    instance_id: &str,
    done_id: &str,
    actor: &str,
) -> beads_storage::error::Result<Vec<String>> {
    let deps: Vec<StepDependency> = tx.list_dependencies(instance_id)?;
    let graph = StepGraph::from_dependencies(&deps);
    let blocked = tx.list_steps(
        instance_id,
        &StepFilter {
            status: Some(StepStatus::Blocked),
            ..Default::default()
        },
    )?;

    let mut promoted = Vec::new();
    for step in blocked {
        let needs = graph.needs(&step.id);
        if step.is_fan_in() || !needs.contains(&done_id) {
            continue;
        }
        let mut all_done = true;
        for need in needs {
            if tx.get_step(need)?.status != StepStatus::Done {
                all_done = false;
                break;
            }
        }
        if all_done {
            tx.update_step(
                &step.id,
                &StepUpdates::transition(StepStatus::Blocked, StepStatus::Ready),
                actor,
            )?;
            promoted.push(step.id);
        }
    }
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bonder::BondRequest;
    use beads_formula::Catalog;
    use beads_formula::builtin;
    use pretty_assertions::assert_eq;

    fn engine() -> MolEngine {
        let catalog = Catalog::from_snapshots(vec![builtin::snapshot("builtin")]);
        MolEngine::in_memory(catalog).unwrap().with_actor("tester")
    }

    fn ids(steps: &[Step]) -> Vec<&str> {
        steps.iter().map(|s| s.id.as_str()).collect()
    }

    fn bond_arm(engine: &MolEngine, name: &str) -> Instance {
        engine
            .bond(
                &BondRequest::new("mol-polecat-arm")
                    .var("polecat_name", name)
                    .reference(format!("arm-{name}")),
            )
            .unwrap()
    }

    #[test]
    fn completing_a_step_promotes_the_next() {
        let e = engine();
        let arm = bond_arm(&e, "ace");

        e.transition("arm-ace.1", StepStatus::Running).unwrap();
        assert!(e.ready_steps(&arm.id).unwrap().is_empty());

        let done = e.transition("arm-ace.1", StepStatus::Done).unwrap();
        assert_eq!(done.status, StepStatus::Done);
        assert_eq!(e.get_step("arm-ace.2").unwrap().status, StepStatus::Ready);
        assert_eq!(ids(&e.ready_steps(&arm.id).unwrap()), vec!["arm-ace.2"]);
    }

    #[test]
    fn rejects_moves_outside_the_state_machine() {
        let e = engine();
        bond_arm(&e, "ace");

        let err = e.transition("arm-ace.1", StepStatus::Done).unwrap_err();
        assert!(
            matches!(
                err,
                MolError::InvalidTransition {
                    from: StepStatus::Ready,
                    to: StepStatus::Done,
                    ..
                }
            ),
            "{err}"
        );

        let err = e.transition("arm-ace.2", StepStatus::Running).unwrap_err();
        assert!(matches!(err, MolError::InvalidTransition { .. }), "{err}");

        assert!(e.transition("arm-ace.9", StepStatus::Running).unwrap_err().is_not_found());
    }

    #[test]
    fn failure_blocks_dependents() {
        let e = engine();
        bond_arm(&e, "nux");
        e.transition("arm-nux.1", StepStatus::Running).unwrap();
        e.transition("arm-nux.1", StepStatus::Failed).unwrap();

        assert_eq!(
            e.readiness("arm-nux.2").unwrap(),
            Readiness::Blocked {
                failed: vec!["arm-nux.1".into()]
            }
        );
        // Transitively held back, but only the direct failure is reported.
        assert_eq!(
            e.readiness("arm-nux.3").unwrap(),
            Readiness::Waiting {
                pending: vec!["arm-nux.2".into()]
            }
        );
        let blocked = e.blocked_steps("arm-nux").unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].step.id, "arm-nux.2");

        let err = e.transition("arm-nux.2", StepStatus::Running).unwrap_err();
        assert!(matches!(err, MolError::Blocked { .. }), "{err}");
        assert_eq!(e.readiness("arm-nux.1").unwrap(), Readiness::Settled);
    }

    #[test]
    fn seal_is_idempotent_and_closes_fan_out() {
        let e = engine();
        e.bond(&BondRequest::new("mol-witness-patrol").ephemeral())
            .unwrap();

        e.seal("mol-witness-patrol.2").unwrap();
        e.seal("mol-witness-patrol.2").unwrap();
        assert!(e.get_step("mol-witness-patrol.2").unwrap().sealed);

        let err = e
            .bond(
                &BondRequest::new("mol-polecat-arm")
                    .var("polecat_name", "late")
                    .reference("arm-late")
                    .parent("mol-witness-patrol.2"),
            )
            .unwrap_err();
        assert!(matches!(err, MolError::FanOutSealed { .. }), "{err}");
        assert!(e.seal("nowhere").unwrap_err().is_not_found());
    }

    #[test]
    fn sealing_an_instance_parent() {
        let e = engine();
        let arm = bond_arm(&e, "toast");
        e.seal(&arm.id).unwrap();
        assert!(e.get_instance(&arm.id).unwrap().sealed);
        let events = e.events(&arm.id, 10).unwrap();
        assert!(events.iter().any(|ev| ev.event_type == beads_core::enums::EventType::Sealed));
    }

    fn start_patrol(e: &MolEngine) {
        e.bond(&BondRequest::new("mol-witness-patrol").ephemeral())
            .unwrap();
        e.transition("mol-witness-patrol.1", StepStatus::Running).unwrap();
        e.transition("mol-witness-patrol.1", StepStatus::Done).unwrap();
        e.transition("mol-witness-patrol.2", StepStatus::Running).unwrap();
    }

    fn arm_under_patrol(name: &str) -> BondRequest {
        BondRequest::new("mol-polecat-arm")
            .var("polecat_name", name)
            .reference(format!("arm-{name}"))
            .parent("mol-witness-patrol.2")
    }

    fn run_all(e: &MolEngine, id: &str) {
        for step in e.list_steps(id).unwrap() {
            e.transition(&step.id, StepStatus::Running).unwrap();
            e.transition(&step.id, StepStatus::Done).unwrap();
        }
    }

    #[test]
    fn failed_arm_blocks_the_fan_in() {
        let e = engine();
        start_patrol(&e);
        e.bond(&arm_under_patrol("x")).unwrap();
        e.bond(&arm_under_patrol("y")).unwrap();
        e.transition("arm-x.1", StepStatus::Running).unwrap();
        e.transition("arm-x.1", StepStatus::Failed).unwrap();
        e.seal("mol-witness-patrol.2").unwrap();

        assert_eq!(
            e.readiness("mol-witness-patrol.3").unwrap(),
            Readiness::Blocked {
                failed: vec!["arm-x.1".into()]
            }
        );
        let blocked = e.blocked_steps("mol-witness-patrol").unwrap();
        let blocked_ids: Vec<&str> = blocked.iter().map(|b| b.step.id.as_str()).collect();
        assert_eq!(blocked_ids, vec!["mol-witness-patrol.3"]);
        assert_eq!(blocked[0].failed, vec!["arm-x.1".to_string()]);

        // Finishing the other arm and the fan-out step changes nothing.
        run_all(&e, "arm-y");
        e.transition("mol-witness-patrol.2", StepStatus::Done).unwrap();
        assert!(e.ready_steps("mol-witness-patrol").unwrap().is_empty());
        let err = e
            .transition("mol-witness-patrol.3", StepStatus::Running)
            .unwrap_err();
        assert!(matches!(err, MolError::Blocked { .. }), "{err}");
    }

    #[test]
    fn failed_fan_out_step_blocks_the_fan_in() {
        let e = engine();
        start_patrol(&e);
        let arm = e.bond(&arm_under_patrol("ace")).unwrap();
        run_all(&e, &arm.id);
        e.transition("mol-witness-patrol.2", StepStatus::Failed).unwrap();

        assert_eq!(
            e.readiness("mol-witness-patrol.3").unwrap(),
            Readiness::Blocked {
                failed: vec!["mol-witness-patrol.2".into()]
            }
        );
        let blocked = e.blocked_steps("mol-witness-patrol").unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].step.id, "mol-witness-patrol.3");
    }

    #[test]
    fn squashed_mol_with_unfinished_steps_blocks_the_fan_in() {
        let e = engine();
        start_patrol(&e);
        e.bond(&arm_under_patrol("ace")).unwrap();
        e.bond(&arm_under_patrol("toast")).unwrap();
        e.transition("arm-ace.1", StepStatus::Running).unwrap();
        e.transition("arm-ace.1", StepStatus::Done).unwrap();
        e.squash("arm-ace", "gave up").unwrap();
        run_all(&e, "arm-toast");
        e.squash("arm-toast", "clean").unwrap();
        e.transition("mol-witness-patrol.2", StepStatus::Done).unwrap();

        assert_eq!(
            e.readiness("mol-witness-patrol.3").unwrap(),
            Readiness::Blocked {
                failed: vec!["arm-ace.2".into(), "arm-ace.3".into()]
            }
        );
        assert!(e.ready_steps("mol-witness-patrol").unwrap().is_empty());
    }

    #[test]
    fn squashed_wisp_child_no_longer_holds_the_fan_in() {
        let e = engine();
        start_patrol(&e);
        e.bond(&arm_under_patrol("nux").ephemeral()).unwrap();
        e.transition("arm-nux.1", StepStatus::Running).unwrap();
        e.transition("arm-nux.1", StepStatus::Done).unwrap();
        e.squash("arm-nux", "handed off").unwrap();
        e.transition("mol-witness-patrol.2", StepStatus::Done).unwrap();

        assert_eq!(e.readiness("mol-witness-patrol.3").unwrap(), Readiness::Ready);
        assert_eq!(
            ids(&e.ready_steps("mol-witness-patrol").unwrap()),
            vec!["mol-witness-patrol.3"]
        );
    }

    #[test]
    fn transition_on_a_finalized_instance_is_refused() {
        let e = engine();
        bond_arm(&e, "ace");
        e.squash("arm-ace", "stopped").unwrap();
        let err = e.transition("arm-ace.1", StepStatus::Running).unwrap_err();
        assert!(matches!(err, MolError::AlreadyFinalized(ref id) if id == "arm-ace"), "{err}");
    }
}
