//! End-to-end engine scenarios over real SQLite stores.

use std::collections::{BTreeMap, BTreeSet};

use beads_core::enums::{Durability, InstanceStatus, StepStatus};
use beads_formula::{
    Bindings, Catalog, CatalogSource, Proto, SourceSnapshot, StepTemplate, VarDef, builtin,
    resolve,
};
use beads_mol::{BondRequest, MolEngine, MolError, Readiness};
use pretty_assertions::assert_eq;

fn builtin_catalog() -> Catalog {
    Catalog::from_snapshots(vec![builtin::snapshot("builtin")])
}

fn engine() -> MolEngine {
    MolEngine::in_memory(builtin_catalog()).unwrap().with_actor("witness")
}

fn step_ids(steps: &[beads_core::step::Step]) -> Vec<String> {
    steps.iter().map(|s| s.id.clone()).collect()
}

fn run(engine: &MolEngine, step: &str) {
    engine.transition(step, StepStatus::Running).unwrap();
    engine.transition(step, StepStatus::Done).unwrap();
}

// -- Scenarios ------------------------------------------------------------------

#[test]
fn engineer_in_box_is_a_chain() {
    let e = engine();
    let inst = e
        .bond(&BondRequest::new("mol-engineer-in-box").var("feature_name", "user auth"))
        .unwrap();

    assert_eq!(inst.id, "mol-engineer-in-box");
    assert_eq!(inst.title, "Engineer in Box: user auth");
    assert_eq!(inst.durability, Durability::Durable);
    assert!(inst.labels.contains(&"tier:opus".to_string()));

    let steps = e.list_steps(&inst.id).unwrap();
    assert_eq!(
        step_ids(&steps),
        (1..=5)
            .map(|n| format!("mol-engineer-in-box.{n}"))
            .collect::<Vec<_>>()
    );
    assert_eq!(steps[1].title, "Implement user auth");

    for n in 2..=5 {
        assert_eq!(
            e.readiness(&format!("mol-engineer-in-box.{n}")).unwrap(),
            Readiness::Waiting {
                pending: vec![format!("mol-engineer-in-box.{}", n - 1)]
            }
        );
    }
    assert_eq!(
        step_ids(&e.ready_steps(&inst.id).unwrap()),
        vec!["mol-engineer-in-box.1"]
    );
}

#[test]
fn squashed_wisp_leaves_only_a_digest() {
    let e = engine();
    let inst = e
        .bond(&BondRequest::new("mol-witness-patrol").ephemeral())
        .unwrap();
    assert!(inst.is_wisp());
    assert_eq!(inst.bindings.get("rig").map(String::as_str), Some("town"));
    run(&e, "mol-witness-patrol.1");

    let digest = e.squash(&inst.id, "ok").unwrap();
    assert_eq!(digest.durability, Durability::Ephemeral);
    assert_eq!(digest.steps_total, 4);
    assert_eq!(digest.steps_done, 1);

    assert!(e.get_step("mol-witness-patrol.1").unwrap_err().is_not_found());
    assert!(e.list_steps(&inst.id).unwrap().is_empty());
    assert_eq!(
        e.get_instance(&inst.id).unwrap().status,
        InstanceStatus::Squashed
    );
    assert_eq!(e.latest_digest(&inst.id).unwrap().summary, "ok");
    // Wisps leave no audit trail.
    assert!(e.events(&inst.id, 10).unwrap().is_empty());
}

#[test]
fn fan_in_waits_for_every_arm() {
    let e = engine();
    e.bond(&BondRequest::new("mol-witness-patrol").ephemeral())
        .unwrap();
    run(&e, "mol-witness-patrol.1");
    e.transition("mol-witness-patrol.2", StepStatus::Running)
        .unwrap();

    let names = ["ace", "nux", "toast"];
    for name in names {
        let arm = e
            .bond(
                &BondRequest::new("mol-polecat-arm")
                    .var("polecat_name", name)
                    .reference(format!("arm-{name}"))
                    .parent("mol-witness-patrol.2"),
            )
            .unwrap();
        assert_eq!(arm.parent.as_deref(), Some("mol-witness-patrol.2"));
    }
    assert_eq!(e.children("mol-witness-patrol.2").unwrap().len(), 3);

    // Finishing the fan-out step seals it.
    e.transition("mol-witness-patrol.2", StepStatus::Done)
        .unwrap();
    let late = e
        .bond(
            &BondRequest::new("mol-polecat-arm")
                .var("polecat_name", "late")
                .reference("arm-late")
                .parent("mol-witness-patrol.2"),
        )
        .unwrap_err();
    assert!(matches!(late, MolError::FanOutSealed { .. }), "{late}");

    for (i, name) in names.iter().enumerate() {
        for n in 1..=3 {
            assert!(
                e.ready_steps("mol-witness-patrol").unwrap().is_empty(),
                "fan-in ready before arm-{name}.{n} finished"
            );
            run(&e, &format!("arm-{name}.{n}"));
        }
        let last = i == names.len() - 1;
        assert_eq!(
            e.readiness("mol-witness-patrol.3").unwrap().is_ready(),
            last
        );
    }
    assert_eq!(
        step_ids(&e.ready_steps("mol-witness-patrol").unwrap()),
        vec!["mol-witness-patrol.3"]
    );
    run(&e, "mol-witness-patrol.3");
    assert_eq!(
        e.get_step("mol-witness-patrol.4").unwrap().status,
        StepStatus::Ready
    );
}

#[test]
fn burn_leaves_nothing_behind() {
    let e = engine();
    e.bond(
        &BondRequest::new("mol-engineer-in-box")
            .var("feature_name", "experiment")
            .reference("exp-1"),
    )
    .unwrap();

    let report = e.burn("exp-1", "failed experiment").unwrap();
    assert_eq!(report.steps_deleted, 5);

    assert!(e.get_instance("exp-1").unwrap_err().is_not_found());
    for n in 1..=5 {
        assert!(e.get_step(&format!("exp-1.{n}")).unwrap_err().is_not_found());
    }
    assert!(e.latest_digest("exp-1").unwrap_err().is_not_found());
    assert!(e.list_digests(Some("exp-1")).unwrap().is_empty());
}

// -- Properties -------------------------------------------------------------------

#[test]
fn resolve_is_pure() {
    let bindings = Bindings::from([("feature_name".to_string(), "billing".to_string())]);
    let proto = builtin_catalog().get("mol-engineer-in-box").unwrap();
    for text in std::iter::once(&proto.title).chain(proto.steps.iter().map(|s| &s.title)) {
        assert_eq!(
            resolve(text, &bindings).unwrap(),
            resolve(text, &bindings).unwrap()
        );
    }
}

#[test]
fn distinct_refs_give_disjoint_subtrees() {
    let e = engine();
    e.bond(&BondRequest::new("mol-witness-patrol")).unwrap();
    let mut seen = BTreeSet::new();
    for name in ["ace", "nux"] {
        let arm = e
            .bond(
                &BondRequest::new("mol-polecat-arm")
                    .var("polecat_name", name)
                    .reference(format!("arm-{name}"))
                    .parent("mol-witness-patrol"),
            )
            .unwrap();
        for step in e.list_steps(&arm.id).unwrap() {
            assert!(seen.insert(step.id.clone()), "{} seen twice", step.id);
        }
    }
    assert_eq!(seen.len(), 6);
}

#[test]
fn same_id_twice_is_a_duplicate() {
    let e = engine();
    let req = BondRequest::new("mol-polecat-arm").var("polecat_name", "ace");
    e.bond(&req).unwrap();
    let err = e.bond(&req).unwrap_err();
    assert!(matches!(err, MolError::DuplicateInstance(_)), "{err}");

    // Active ids are unique across both stores.
    let err = e.bond(&req.clone().ephemeral()).unwrap_err();
    assert!(matches!(err, MolError::DuplicateInstance(_)), "{err}");
}

#[test]
fn finalizing_twice_is_an_error() {
    let e = engine();
    for (first_squash, id) in [(true, "a-run"), (false, "b-run")] {
        e.bond(
            &BondRequest::new("mol-polecat-arm")
                .var("polecat_name", id)
                .reference(id),
        )
        .unwrap();
        if first_squash {
            e.squash(id, "done").unwrap();
            let err = e.burn(id, "too late").unwrap_err();
            assert!(matches!(err, MolError::AlreadyFinalized(_)), "{err}");
        } else {
            e.burn(id, "scrapped").unwrap();
            let err = e.squash(id, "too late").unwrap_err();
            assert!(matches!(err, MolError::AlreadyFinalized(_)), "{err}");
        }
    }
}

#[test]
fn ready_steps_never_include_undone_needs() {
    let e = engine();
    let inst = e
        .bond(&BondRequest::new("mol-engineer-in-box").var("feature_name", "x"))
        .unwrap();
    let deps = |id: &str| -> Vec<String> {
        let n: u32 = id.rsplit('.').next().unwrap().parse().unwrap();
        (1..n).map(|m| format!("{}.{m}", inst.id)).collect()
    };

    loop {
        let ready = e.ready_steps(&inst.id).unwrap();
        let Some(next) = ready.first() else { break };
        for step in &ready {
            for need in deps(&step.id) {
                assert_eq!(e.get_step(&need).unwrap().status, StepStatus::Done);
            }
        }
        run(&e, &next.id);
    }
    assert!(
        e.list_steps(&inst.id)
            .unwrap()
            .iter()
            .all(|s| s.status == StepStatus::Done)
    );
}

fn cyclic_proto() -> Proto {
    Proto {
        id: "mol-loop".into(),
        title: "Loop".into(),
        description: String::new(),
        labels: vec!["template".into()],
        r#type: "molecule".into(),
        version: 1,
        vars: BTreeMap::new(),
        steps: vec![
            StepTemplate {
                title: "a".into(),
                needs: vec![3],
                ..Default::default()
            },
            StepTemplate {
                title: "b".into(),
                needs: vec![1],
                ..Default::default()
            },
            StepTemplate {
                title: "c".into(),
                needs: vec![2],
                ..Default::default()
            },
        ],
        source: String::new(),
    }
}

#[test]
fn cyclic_template_is_rejected_without_writes() {
    let catalog = builtin_catalog().push_snapshot(SourceSnapshot::from_protos(
        "project",
        vec![cyclic_proto()],
    ));
    let e = MolEngine::in_memory(catalog).unwrap();

    let err = e.bond(&BondRequest::new("mol-loop")).unwrap_err();
    match err {
        MolError::CycleError { cycle } => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.len() >= 4);
        }
        other => panic!("expected a cycle, got {other}"),
    }
    assert!(e.get_instance("mol-loop").unwrap_err().is_not_found());
}

#[test]
fn cycle_behind_a_false_condition_is_still_rejected() {
    let mut proto = cyclic_proto();
    proto.vars.insert(
        "mode".into(),
        VarDef {
            default: Some("lite".into()),
            ..Default::default()
        },
    );
    proto.steps[2].condition = Some("{{mode}} == full".into());
    let catalog =
        builtin_catalog().push_snapshot(SourceSnapshot::from_protos("project", vec![proto]));
    let e = MolEngine::in_memory(catalog).unwrap();

    let err = e.bond(&BondRequest::new("mol-loop")).unwrap_err();
    assert!(matches!(err, MolError::CycleError { .. }), "{err}");
    assert!(e.get_instance("mol-loop").unwrap_err().is_not_found());
}

#[test]
fn failed_bonds_write_nothing() {
    let e = engine();
    let err = e.bond(&BondRequest::new("mol-engineer-in-box")).unwrap_err();
    assert!(
        matches!(err, MolError::MissingVariable(ref v) if v == "feature_name"),
        "{err}"
    );
    assert!(e.get_instance("mol-engineer-in-box").unwrap_err().is_not_found());

    let err = e.bond(&BondRequest::new("mol-nope")).unwrap_err();
    assert!(err.is_not_found(), "{err}");

    let err = e
        .bond(
            &BondRequest::new("mol-polecat-arm")
                .var("polecat_name", "x")
                .parent("ghost.1"),
        )
        .unwrap_err();
    assert!(err.is_not_found(), "{err}");
    assert!(e.list_instances(&Default::default()).unwrap().is_empty());
}

#[test]
fn unlabeled_record_is_an_invalid_template() {
    let mut raw = cyclic_proto();
    raw.id = "raw-notes".into();
    raw.labels = vec!["notes".into()];
    raw.steps.truncate(1);
    raw.steps[0].needs.clear();
    let catalog = builtin_catalog().push_snapshot(SourceSnapshot::from_protos("user", vec![raw]));
    let e = MolEngine::in_memory(catalog).unwrap();

    let err = e.bond(&BondRequest::new("raw-notes")).unwrap_err();
    assert!(matches!(err, MolError::InvalidTemplate { .. }), "{err}");
}

#[test]
fn catalog_precedence_follows_source_order() {
    let dir = tempfile::tempdir().unwrap();
    let write = |sub: &str, title: &str| {
        let path = dir.path().join(sub);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(
            path.join("mol-x.formula.toml"),
            format!(
                "id = \"mol-x\"\ntitle = \"{title}\"\nlabels = [\"template\"]\n\n[[steps]]\ntitle = \"only\"\n"
            ),
        )
        .unwrap();
        CatalogSource::directory(sub, path)
    };
    let a = write("a", "from a, with a much longer title than b");
    let b = write("b", "from b");

    let ab = MolEngine::in_memory(Catalog::load(&[a.clone(), b.clone()])).unwrap();
    assert_eq!(ab.bond(&BondRequest::new("mol-x")).unwrap().title, "from b");

    let ba = MolEngine::in_memory(Catalog::load(&[b, a])).unwrap();
    assert_eq!(
        ba.bond(&BondRequest::new("mol-x")).unwrap().title,
        "from a, with a much longer title than b"
    );
}

#[test]
fn racing_bonds_of_one_id_admit_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let durable = dir.path().join("beads.db");
    let ephemeral = dir.path().join("wisps.db");
    // Create the schema before the race.
    drop(MolEngine::open(builtin_catalog(), &durable, &ephemeral).unwrap());

    let results: Vec<Result<_, MolError>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    let e = MolEngine::open(builtin_catalog(), &durable, &ephemeral)?;
                    e.bond(&BondRequest::new("mol-polecat-arm").var("polecat_name", "ace"))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    for r in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(r, MolError::DuplicateInstance(_)), "{r}");
    }
}
