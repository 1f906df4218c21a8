//! `bd mol` -- molecule operations.
//!
//! Thin wrappers over [`MolEngine`]: bond, inspect, drive steps, and
//! finalize. Every subcommand honors `--json`.

use anyhow::{Context, Result, bail};
use serde::Serialize;

use beads_core::enums::StepStatus;
use beads_core::filter::InstanceFilter;
use beads_core::step::Step;
use beads_formula::Bindings;
use beads_mol::{BondPlan, BondRequest, MolEngine, Readiness};

use crate::cli::{
    MolArgs, MolBondArgs, MolBurnArgs, MolCommands, MolHistoryArgs, MolListArgs, MolReadyArgs,
    MolSealArgs, MolShowArgs, MolSquashArgs, MolTransitionArgs,
};
use crate::context::RuntimeContext;
use crate::output::{
    format_instance_compact, format_step_row, output_json, output_table, status_symbol,
};

const STEP_HEADERS: &[&str] = &["", "STEP", "STATUS", "TITLE", "READINESS"];

/// Execute the `bd mol` command.
pub fn run(ctx: &RuntimeContext, args: &MolArgs) -> Result<()> {
    let engine = ctx.engine()?;
    match &args.command {
        MolCommands::Bond(a) => cmd_bond(ctx, &engine, a),
        MolCommands::Show(a) => cmd_show(ctx, &engine, a),
        MolCommands::List(a) => cmd_list(ctx, &engine, a),
        MolCommands::Ready(a) => cmd_ready(ctx, &engine, a),
        MolCommands::Transition(a) => cmd_transition(ctx, &engine, a),
        MolCommands::Seal(a) => cmd_seal(ctx, &engine, a),
        MolCommands::Squash(a) => cmd_squash(ctx, &engine, a),
        MolCommands::Burn(a) => cmd_burn(ctx, &engine, a),
        MolCommands::History(a) => cmd_history(ctx, &engine, a),
    }
}

/// Parse repeated `--var key=value` flags into bindings.
///
/// Later occurrences of a key override earlier ones.
pub(crate) fn parse_var_flags(vars: &[String]) -> Result<Bindings> {
    let mut map = Bindings::new();
    for v in vars {
        let Some((key, value)) = v.split_once('=') else {
            bail!("invalid variable format '{}': expected key=value", v);
        };
        if key.is_empty() {
            bail!("invalid variable format '{}': empty key", v);
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

/// A step paired with its current readiness, for display.
#[derive(Serialize)]
struct StepView {
    #[serde(flatten)]
    step: Step,
    readiness: Readiness,
}

/// Steps of a finalized instance will never run and report `Settled`.
fn step_views(engine: &MolEngine, steps: Vec<Step>, finalized: bool) -> Result<Vec<StepView>> {
    steps
        .into_iter()
        .map(|step| {
            let readiness = if finalized {
                Readiness::Settled
            } else {
                engine.readiness(&step.id)?
            };
            Ok(StepView { step, readiness })
        })
        .collect()
}

fn print_steps(views: &[StepView]) {
    let rows: Vec<Vec<String>> = views
        .iter()
        .map(|v| format_step_row(&v.step, &v.readiness))
        .collect();
    output_table(STEP_HEADERS, &rows);
}

// ---------------------------------------------------------------------------
// Bond
// ---------------------------------------------------------------------------

fn cmd_bond(ctx: &RuntimeContext, engine: &MolEngine, args: &MolBondArgs) -> Result<()> {
    let mut request = BondRequest::new(&args.template).bindings(parse_var_flags(&args.vars)?);
    if args.wisp {
        request = request.ephemeral();
    }
    if let Some(ref r) = args.reference {
        request = request.reference(r);
    }
    if let Some(ref p) = args.parent {
        request = request.parent(p);
    }

    if args.dry_run {
        let plan = engine.preview(&request)?;
        if ctx.json {
            output_json(&plan);
        } else {
            print_plan(&plan);
        }
        return Ok(());
    }

    let instance = engine
        .bond(&request)
        .with_context(|| format!("failed to bond {}", args.template))?;
    let steps = engine.list_steps(&instance.id)?;

    if ctx.json {
        output_json(&serde_json::json!({
            "instance": instance,
            "steps": steps,
        }));
        return Ok(());
    }

    if !ctx.quiet {
        println!(
            "Bonded {} {} from {} ({} steps)",
            instance.durability.noun(),
            instance.id,
            instance.template_id,
            steps.len()
        );
        for step in steps.iter().filter(|s| s.status == StepStatus::Ready) {
            println!("  ready: {} {}", step.id, step.title);
        }
    }
    Ok(())
}

fn print_plan(plan: &BondPlan) {
    println!("Would bond: {}", format_instance_compact(&plan.instance));
    println!("Steps ({}):", plan.steps.len());
    for step in &plan.steps {
        let needs: Vec<&str> = plan
            .edges
            .iter()
            .filter(|e| e.step_id == step.id)
            .map(|e| e.depends_on_id.as_str())
            .collect();
        let mut extra = String::new();
        if !needs.is_empty() {
            extra.push_str(&format!(" (needs: {})", needs.join(", ")));
        }
        if let Some(ref parent) = step.waits_for {
            extra.push_str(&format!(" (waits for children of {})", parent));
        }
        println!("  {} [{}] {}{}", step.id, step.status, step.title, extra);
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

fn cmd_show(ctx: &RuntimeContext, engine: &MolEngine, args: &MolShowArgs) -> Result<()> {
    let instance = engine.get_instance(&args.id)?;
    let steps = step_views(
        engine,
        engine.list_steps(&instance.id)?,
        instance.is_terminal(),
    )?;
    // Fan-out children hang off the instance itself or off one of its steps.
    let mut children = engine.children(&instance.id)?;
    for view in &steps {
        children.extend(engine.children(&view.step.id)?);
    }
    let digests = engine.list_digests(Some(&instance.id))?;

    if ctx.json {
        output_json(&serde_json::json!({
            "instance": instance,
            "steps": steps,
            "children": children,
            "digests": digests,
        }));
        return Ok(());
    }

    println!("{}", format_instance_compact(&instance));
    println!("Template: {}", instance.template_id);
    if !instance.bindings.is_empty() {
        let vars: Vec<String> = instance
            .bindings
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("Vars: {}", vars.join(" "));
    }
    if instance.sealed {
        println!("Fan-out: sealed");
    }
    println!(
        "Created: {} by {}",
        instance.created_at.format("%Y-%m-%d %H:%M"),
        if instance.created_by.is_empty() {
            "unknown"
        } else {
            &instance.created_by
        }
    );
    if let Some(ref at) = instance.finalized_at {
        println!("Finalized: {}", at.format("%Y-%m-%d %H:%M"));
    }

    if !steps.is_empty() {
        println!();
        print_steps(&steps);
    }

    if !children.is_empty() {
        println!();
        println!("Children ({}):", children.len());
        for child in &children {
            println!("  {}", format_instance_compact(child));
        }
    }

    if let Some(latest) = digests.first() {
        println!();
        println!(
            "Digest #{} ({}/{} steps done): {}",
            latest.id, latest.steps_done, latest.steps_total, latest.summary
        );
    }
    Ok(())
}

fn cmd_list(ctx: &RuntimeContext, engine: &MolEngine, args: &MolListArgs) -> Result<()> {
    let filter = InstanceFilter {
        labels: args.labels.clone(),
        template_id: args.template.clone(),
        parent: args.parent.clone(),
        active_only: !args.all,
        limit: args.limit,
        ..InstanceFilter::default()
    };
    let instances = engine.list_instances(&filter)?;

    if ctx.json {
        output_json(&instances);
        return Ok(());
    }
    if instances.is_empty() {
        if !ctx.quiet {
            println!("No instances.");
        }
        return Ok(());
    }
    let rows: Vec<Vec<String>> = instances
        .iter()
        .map(|i| {
            vec![
                i.id.clone(),
                i.durability.noun().to_string(),
                i.status.to_string(),
                i.template_id.clone(),
                i.title.clone(),
            ]
        })
        .collect();
    output_table(&["ID", "KIND", "STATUS", "TEMPLATE", "TITLE"], &rows);
    Ok(())
}

fn cmd_ready(ctx: &RuntimeContext, engine: &MolEngine, args: &MolReadyArgs) -> Result<()> {
    let ready = engine.ready_steps(&args.id)?;
    let blocked = engine.blocked_steps(&args.id)?;

    if ctx.json {
        output_json(&ready);
        return Ok(());
    }

    if ready.is_empty() {
        if !ctx.quiet {
            println!("No ready steps in {}.", args.id);
        }
    } else {
        for step in &ready {
            println!("{} {} {}", status_symbol(step.status), step.id, step.title);
        }
    }
    for b in &blocked {
        eprintln!(
            "warning: {} is blocked by failed {}",
            b.step.id,
            b.failed.join(", ")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn cmd_transition(
    ctx: &RuntimeContext,
    engine: &MolEngine,
    args: &MolTransitionArgs,
) -> Result<()> {
    let to: StepStatus = args
        .status
        .parse()
        .with_context(|| format!("expected one of running, done, failed; got '{}'", args.status))?;
    let step = engine.transition(&args.step, to)?;

    if ctx.json {
        output_json(&step);
    } else if !ctx.quiet {
        println!("{} {} -> {}", step.id, step.title, step.status);
        if to == StepStatus::Done {
            let ready = engine.ready_steps(&step.instance_id)?;
            for s in &ready {
                println!("  ready: {} {}", s.id, s.title);
            }
        }
    }
    Ok(())
}

fn cmd_seal(ctx: &RuntimeContext, engine: &MolEngine, args: &MolSealArgs) -> Result<()> {
    engine.seal(&args.parent)?;
    if ctx.json {
        output_json(&serde_json::json!({ "sealed": args.parent }));
    } else if !ctx.quiet {
        println!("Sealed fan-out under {}", args.parent);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

fn cmd_squash(ctx: &RuntimeContext, engine: &MolEngine, args: &MolSquashArgs) -> Result<()> {
    let digest = engine.squash(&args.id, &args.summary)?;
    if ctx.json {
        output_json(&digest);
    } else if !ctx.quiet {
        println!(
            "Squashed {} {} into digest #{} ({}/{} steps done)",
            digest.durability.noun(),
            digest.instance_id,
            digest.id,
            digest.steps_done,
            digest.steps_total
        );
    }
    Ok(())
}

fn cmd_burn(ctx: &RuntimeContext, engine: &MolEngine, args: &MolBurnArgs) -> Result<()> {
    let report = engine.burn(&args.id, &args.reason)?;
    if ctx.json {
        output_json(&report);
    } else if !ctx.quiet {
        println!(
            "Burned {} {} ({} steps deleted)",
            report.durability.noun(),
            report.id,
            report.steps_deleted
        );
    }
    Ok(())
}

fn cmd_history(ctx: &RuntimeContext, engine: &MolEngine, args: &MolHistoryArgs) -> Result<()> {
    let events = engine.events(&args.id, args.limit)?;
    if ctx.json {
        output_json(&events);
        return Ok(());
    }
    if events.is_empty() {
        if !ctx.quiet {
            println!("No history for {}.", args.id);
        }
        return Ok(());
    }
    let rows: Vec<Vec<String>> = events
        .iter()
        .map(|e| {
            let change = match (&e.old_value, &e.new_value) {
                (Some(old), Some(new)) => format!("{} -> {}", old, new),
                (None, Some(new)) => new.clone(),
                _ => String::new(),
            };
            vec![
                e.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                e.entity_id.clone(),
                e.event_type.to_string(),
                e.actor.clone(),
                change,
            ]
        })
        .collect();
    output_table(&["WHEN", "ID", "EVENT", "ACTOR", "CHANGE"], &rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn var_flags_parse() {
        let vars = vec![
            "feature_name=search".to_string(),
            "query=a=b".to_string(),
            "empty=".to_string(),
        ];
        let map = parse_var_flags(&vars).unwrap();
        assert_eq!(map["feature_name"], "search");
        assert_eq!(map["query"], "a=b");
        assert_eq!(map["empty"], "");
    }

    #[test]
    fn var_flags_last_wins() {
        let vars = vec!["a=1".to_string(), "a=2".to_string()];
        assert_eq!(parse_var_flags(&vars).unwrap()["a"], "2");
    }

    #[test]
    fn var_flags_reject_malformed() {
        assert!(parse_var_flags(&["novalue".to_string()]).is_err());
        assert!(parse_var_flags(&["=x".to_string()]).is_err());
    }
}
