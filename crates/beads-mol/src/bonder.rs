//! Bonding: instantiating a proto into a live instance tree.
//!
//! [`plan`] is pure: it checks the template's declared edges for cycles,
//! resolves bindings, evaluates step conditions, substitutes text and
//! translates sibling ordinals into step ids. [`MolEngine::bond`] validates
//! the caller's id and parent against both stores and writes the plan in
//! one transaction. Nothing is written unless every check passes.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use beads_core::dependency::StepDependency;
use beads_core::enums::{Durability, EventType, StepStatus};
use beads_core::instance::{Instance, InstanceBuilder};
use beads_core::step::{Step, step_id};
use beads_core::validation::validate_instance_id;
use beads_formula::substitute::effective_bindings;
use beads_formula::{Bindings, FormulaError, Proto, evaluate_condition, resolve};
use beads_storage::{StorageError, Transaction};

use crate::engine::{MolEngine, transact};
use crate::error::{MolError, Result};
use crate::graph::StepGraph;
use crate::scheduler::ParentRef;

/// Arguments to [`MolEngine::bond`].
#[derive(Debug, Clone, Default)]
pub struct BondRequest {
    pub template_id: String,
    pub bindings: Bindings,
    pub durability: Durability,
    /// Instance id override; required to bond one template more than once.
    pub reference: Option<String>,
    /// Step or instance this instance fans out from.
    pub parent: Option<String>,
}

impl BondRequest {
    pub fn new(template_id: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            ..Self::default()
        }
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    pub fn bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn ephemeral(self) -> Self {
        self.durability(Durability::Ephemeral)
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// The id the instance will get.
    pub fn instance_id(&self) -> &str {
        self.reference.as_deref().unwrap_or(&self.template_id)
    }
}

/// The records one bond writes.
#[derive(Debug, Clone, Serialize)]
pub struct BondPlan {
    pub instance: Instance,
    pub steps: Vec<Step>,
    pub edges: Vec<StepDependency>,
}

/// Builds the instance tree for `proto` without touching storage.
///
/// Every declared edge is checked for cycles before conditions are applied,
/// so a cyclic template is rejected whatever its bindings. Steps whose
/// condition is false are then left out. Their ordinals are not reused,
/// and edges or fan-in markers pointing at them are dropped.
pub fn plan(proto: &Proto, request: &BondRequest, actor: &str) -> Result<BondPlan> {
    let id = request.instance_id().to_string();
    validate_instance_id(&id)?;

    declared_graph(proto, &id).validate_acyclic()?;

    let bindings = effective_bindings(proto, &request.bindings)?;

    let mut included = BTreeSet::new();
    for (idx, tmpl) in proto.steps.iter().enumerate() {
        let ordinal = idx as u32 + 1;
        let keep = match tmpl.condition {
            Some(ref cond) => evaluate_condition(cond, &bindings)?,
            None => true,
        };
        if keep {
            included.insert(ordinal);
        } else {
            debug!(template = %proto.id, ordinal, "step excluded by condition");
        }
    }

    let mut steps = Vec::with_capacity(included.len());
    let mut edges = Vec::new();

    for (idx, tmpl) in proto.steps.iter().enumerate() {
        let ordinal = idx as u32 + 1;
        if !included.contains(&ordinal) {
            continue;
        }
        let sid = step_id(&id, ordinal);

        let needs: BTreeSet<u32> = tmpl
            .needs
            .iter()
            .copied()
            .filter(|n| included.contains(n))
            .collect();
        for &n in &needs {
            edges.push(StepDependency::new(&id, &sid, step_id(&id, n)));
        }

        let waits_for = tmpl
            .waits_for_children_of
            .filter(|n| included.contains(n))
            .map(|n| step_id(&id, n));

        let status = if needs.is_empty() && waits_for.is_none() {
            StepStatus::Ready
        } else {
            StepStatus::Blocked
        };
        let mut step = Step::new(&id, ordinal, resolve(&tmpl.title, &bindings)?, status);
        step.description = resolve(&tmpl.description, &bindings)?;
        step.waits_for = waits_for;
        steps.push(step);
    }

    let instance = InstanceBuilder::new(&proto.id)
        .id(id)
        .title(resolve(&proto.title, &bindings)?)
        .description(resolve(&proto.description, &bindings)?)
        .labels(proto.labels.clone())
        .durability(request.durability)
        .bindings(bindings)
        .parent(request.parent.clone())
        .created_by(actor)
        .build();

    Ok(BondPlan {
        instance,
        steps,
        edges,
    })
}

/// All steps of `proto` with every `needs` and same-instance fan-in edge,
/// ignoring conditions.
fn declared_graph(proto: &Proto, id: &str) -> StepGraph {
    let mut graph = StepGraph::new();
    for (idx, tmpl) in proto.steps.iter().enumerate() {
        let sid = step_id(id, idx as u32 + 1);
        graph.add_node(&sid);
        for &n in &tmpl.needs {
            graph.add_edge(&sid, &step_id(id, n));
        }
        if let Some(n) = tmpl.waits_for_children_of {
            graph.add_edge(&sid, &step_id(id, n));
        }
    }
    graph
}

impl MolEngine {
    /// Looks up a bondable template, telling an unlabeled record apart from
    /// a missing one.
    pub fn template(&self, id: &str) -> Result<Arc<Proto>> {
        match self.catalog.get(id) {
            Ok(proto) => Ok(proto),
            Err(FormulaError::NotFound(_)) if self.catalog.lookup(id).is_some() => {
                Err(FormulaError::Unlabeled(id.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Computes what [`bond`](Self::bond) would write, checking only the
    /// template and bindings.
    pub fn preview(&self, request: &BondRequest) -> Result<BondPlan> {
        let proto = self.template(&request.template_id)?;
        plan(&proto, request, &self.actor)
    }

    /// Instantiates a template into a new mol or wisp.
    ///
    /// Every check runs before the write transaction commits. A finalized
    /// record of the same id in the other store is cleared only afterwards.
    pub fn bond(&self, request: &BondRequest) -> Result<Instance> {
        let proto = self.template(&request.template_id)?;
        let plan = plan(&proto, request, &self.actor)?;
        let id = plan.instance.id.clone();

        let parent = match request.parent {
            Some(ref p) => Some(self.check_parent(p, &id)?),
            None => None,
        };
        self.ensure_id_free(&id)?;

        let store = self.store(request.durability);
        let actor = self.actor.as_str();
        let same_store_parent = parent
            .as_ref()
            .filter(|p| p.owner().durability == request.durability);

        let written = transact(store, |tx| {
            replace_finalized(tx, &id, actor)?;
            if let Some(parent) = same_store_parent {
                if parent.reload(tx)?.is_sealed() {
                    return Err(MolError::FanOutSealed {
                        parent: parent.id().to_string(),
                    });
                }
            }
            tx.put_instance(&plan.instance, actor)?;
            for step in &plan.steps {
                tx.put_step(step)?;
            }
            for edge in &plan.edges {
                tx.add_dependency(edge)?;
            }
            Ok(())
        });
        match written {
            Ok(()) => {}
            Err(MolError::Storage(StorageError::AlreadyExists { ref entity, .. }))
                if entity == "instance" =>
            {
                return Err(MolError::DuplicateInstance(id));
            }
            Err(e) => return Err(e),
        }

        self.clear_other_store(&id, request.durability);
        info!(
            id = %id,
            template = %proto.id,
            kind = plan.instance.durability.noun(),
            steps = plan.steps.len(),
            parent = ?request.parent,
            "bonded"
        );
        Ok(plan.instance)
    }

    /// Validates a fan-out parent before any write.
    fn check_parent(&self, parent: &str, child_id: &str) -> Result<ParentRef> {
        let parent_ref = self
            .resolve_parent(parent)?
            .ok_or_else(|| MolError::not_found("parent", parent))?;
        let owner = parent_ref.owner();
        if owner.id == child_id {
            return Err(MolError::CycleError {
                cycle: vec![child_id.to_string(), parent.to_string(), child_id.to_string()],
            });
        }
        if owner.is_terminal() {
            return Err(MolError::AlreadyFinalized(owner.id.clone()));
        }
        if parent_ref.is_sealed() {
            return Err(MolError::FanOutSealed {
                parent: parent.to_string(),
            });
        }
        Ok(parent_ref)
    }

    /// Rejects an id held by an active instance in either store. Reads only.
    fn ensure_id_free(&self, id: &str) -> Result<()> {
        for (_, store) in self.stores() {
            match store.get_instance(id) {
                Ok(inst) if !inst.is_terminal() => {
                    return Err(MolError::DuplicateInstance(id.to_string()));
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Clears a finalized record or tombstone of `id` from the store the
    /// new instance does not live in. Runs after the bond committed, so a
    /// failure here only leaves a stale record that lookups rank below the
    /// live one.
    fn clear_other_store(&self, id: &str, target: Durability) {
        let actor = self.actor.as_str();
        for (durability, store) in self.stores() {
            if durability == target {
                continue;
            }
            if let Err(e) = transact(store, |tx| replace_finalized(tx, id, actor)) {
                warn!(id, kind = durability.noun(), error = %e, "could not clear finalized record");
            }
        }
    }
}

/// Removes a terminal instance or tombstone so `id` can be bonded again.
/// An active instance is left alone and reported as a duplicate.
fn replace_finalized(tx: &dyn Transaction, id: &str, actor: &str) -> Result<()> {
    match tx.get_instance(id) {
        Ok(existing) if !existing.is_terminal() => {
            return Err(MolError::DuplicateInstance(id.to_string()));
        }
        Ok(existing) => {
            tx.delete_instance(id)?;
            tx.record_event(id, EventType::Replaced, actor, Some(existing.status.as_str()))?;
            debug!(id, status = %existing.status, "cleared finalized instance for re-bond");
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    if tx.get_tombstone(id)?.is_some() {
        tx.delete_tombstone(id)?;
        tx.record_event(id, EventType::Replaced, actor, Some("burned"))?;
        debug!(id, "cleared tombstone for re-bond");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::enums::InstanceStatus;
    use beads_formula::{Catalog, StepTemplate, VarDef, builtin};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn engine() -> MolEngine {
        let catalog = Catalog::from_snapshots(vec![builtin::snapshot("builtin")]);
        MolEngine::in_memory(catalog).unwrap().with_actor("tester")
    }

    fn arm(name: &str) -> BondRequest {
        BondRequest::new("mol-polecat-arm")
            .var("polecat_name", name)
            .reference("job")
    }

    fn step(title: &str, needs: &[u32]) -> StepTemplate {
        StepTemplate {
            title: title.into(),
            needs: needs.to_vec(),
            ..Default::default()
        }
    }

    fn proto(steps: Vec<StepTemplate>) -> Proto {
        Proto {
            id: "mol-test".into(),
            title: "Test {{name}}".into(),
            description: String::new(),
            labels: vec!["template".into()],
            r#type: "molecule".into(),
            version: 1,
            vars: BTreeMap::from([(
                "name".to_string(),
                VarDef {
                    default: Some("x".into()),
                    ..Default::default()
                },
            )]),
            steps,
            source: String::new(),
        }
    }

    #[test]
    fn plan_translates_ordinals() {
        let p = proto(vec![step("a", &[]), step("b {{name}}", &[1]), step("c", &[1, 2])]);
        let plan = plan(&p, &BondRequest::new("mol-test").reference("run-1"), "t").unwrap();

        assert_eq!(plan.instance.id, "run-1");
        assert_eq!(plan.instance.title, "Test x");
        let ids: Vec<_> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["run-1.1", "run-1.2", "run-1.3"]);
        assert_eq!(plan.steps[1].title, "b x");
        assert_eq!(plan.steps[0].status, StepStatus::Ready);
        assert_eq!(plan.steps[2].status, StepStatus::Blocked);

        let edges: Vec<_> = plan
            .edges
            .iter()
            .map(|e| (e.step_id.as_str(), e.depends_on_id.as_str()))
            .collect();
        assert_eq!(
            edges,
            vec![
                ("run-1.2", "run-1.1"),
                ("run-1.3", "run-1.1"),
                ("run-1.3", "run-1.2")
            ]
        );
    }

    #[test]
    fn plan_rejects_cycles() {
        let p = proto(vec![step("a", &[2]), step("b", &[1])]);
        let err = plan(&p, &BondRequest::new("mol-test"), "t").unwrap_err();
        assert!(matches!(err, MolError::CycleError { .. }), "{err}");
    }

    #[test]
    fn plan_rejects_cycles_through_excluded_steps() {
        let mut gated = step("c", &[2]);
        gated.condition = Some("{{name}} == full".into());
        let p = proto(vec![step("a", &[3]), step("b", &[1]), gated]);

        match plan(&p, &BondRequest::new("mol-test"), "t").unwrap_err() {
            MolError::CycleError { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"mol-test.3".to_string()), "{cycle:?}");
            }
            other => panic!("expected a cycle, got {other}"),
        }
    }

    #[test]
    fn plan_rejects_fan_in_on_a_dependent() {
        let mut survey = step("survey", &[2]);
        survey.condition = Some("{{name}} == full".into());
        let mut agg = step("aggregate", &[]);
        agg.waits_for_children_of = Some(1);
        let p = proto(vec![survey, agg]);

        let err = plan(&p, &BondRequest::new("mol-test"), "t").unwrap_err();
        assert!(matches!(err, MolError::CycleError { .. }), "{err}");
    }

    #[test]
    fn plan_drops_excluded_steps() {
        let mut skipped = step("docs", &[1]);
        skipped.condition = Some("{{name}} == docs".into());
        let p = proto(vec![step("a", &[]), skipped, step("c", &[2])]);

        let plan = plan(&p, &BondRequest::new("mol-test"), "t").unwrap();
        let ids: Vec<_> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["mol-test.1", "mol-test.3"]);
        assert!(plan.edges.is_empty());
        assert_eq!(plan.steps[1].status, StepStatus::Ready);
    }

    #[test]
    fn plan_marks_fan_in() {
        let mut agg = step("aggregate", &[1]);
        agg.waits_for_children_of = Some(1);
        let p = proto(vec![step("survey", &[]), agg]);

        let plan = plan(&p, &BondRequest::new("mol-test"), "t").unwrap();
        assert_eq!(plan.steps[1].waits_for.as_deref(), Some("mol-test.1"));
        assert!(plan.steps[1].is_fan_in());
    }

    #[test]
    fn plan_rejects_numeric_reference() {
        let p = proto(vec![step("a", &[])]);
        let err = plan(&p, &BondRequest::new("mol-test").reference("run.7"), "t").unwrap_err();
        assert!(matches!(err, MolError::Invalid(_)), "{err}");
    }

    #[test]
    fn plan_requires_bindings_for_placeholders() {
        let mut p = proto(vec![step("deploy {{env}}", &[])]);
        p.vars.clear();
        p.title = "Test".into();
        let err = plan(&p, &BondRequest::new("mol-test"), "t").unwrap_err();
        assert!(matches!(err, MolError::MissingVariable(ref v) if v == "env"), "{err}");
    }

    #[test]
    fn failed_bond_leaves_the_other_store_untouched() {
        let e = engine();
        e.bond(&arm("ace")).unwrap();
        e.squash("job", "done").unwrap();
        // A live wisp under the same id, as left by an earlier bond.
        let wisp = e.preview(&arm("nux").ephemeral()).unwrap();
        e.store(Durability::Ephemeral)
            .put_instance(&wisp.instance, "tester")
            .unwrap();

        let err = e.bond(&arm("toast").ephemeral()).unwrap_err();
        assert!(matches!(err, MolError::DuplicateInstance(ref id) if id == "job"), "{err}");

        let kept = e.store(Durability::Durable).get_instance("job").unwrap();
        assert_eq!(kept.status, InstanceStatus::Squashed);
        assert_eq!(e.get_instance("job").unwrap().durability, Durability::Ephemeral);
    }

    #[test]
    fn rebond_in_the_other_store_clears_the_finalized_record() {
        let e = engine();
        e.bond(&arm("ace")).unwrap();
        e.squash("job", "done").unwrap();

        let wisp = e.bond(&arm("nux").ephemeral()).unwrap();
        assert_eq!(wisp.durability, Durability::Ephemeral);
        assert!(
            e.store(Durability::Durable)
                .get_instance("job")
                .unwrap_err()
                .is_not_found()
        );
        assert_eq!(e.get_instance("job").unwrap().status, InstanceStatus::Active);
    }
}
