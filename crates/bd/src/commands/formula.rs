//! `bd formula` -- inspect the merged template catalog.

use anyhow::{Result, bail};

use beads_formula::Catalog;

use crate::cli::{FormulaArgs, FormulaCommands, FormulaListArgs, FormulaShowArgs};
use crate::context::RuntimeContext;
use crate::output::{output_json, output_table};

/// Execute the `bd formula` command.
pub fn run(ctx: &RuntimeContext, args: &FormulaArgs) -> Result<()> {
    let catalog = ctx.catalog()?;
    for snapshot in catalog.snapshots().iter().filter(|s| s.skipped > 0) {
        if !ctx.quiet && !ctx.json {
            eprintln!(
                "warning: skipped {} malformed record(s) in source '{}'",
                snapshot.skipped, snapshot.name
            );
        }
    }
    match &args.command {
        FormulaCommands::List(a) => cmd_list(ctx, &catalog, a),
        FormulaCommands::Show(a) => cmd_show(ctx, &catalog, a),
    }
}

fn cmd_list(ctx: &RuntimeContext, catalog: &Catalog, args: &FormulaListArgs) -> Result<()> {
    let protos: Vec<_> = catalog.list(args.label.as_deref()).collect();

    if ctx.json {
        let items: Vec<_> = protos
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "title": p.title,
                    "type": p.r#type,
                    "version": p.version,
                    "steps": p.steps.len(),
                    "labels": p.labels,
                    "source": catalog.origin(&p.id),
                })
            })
            .collect();
        output_json(&items);
        return Ok(());
    }

    if protos.is_empty() {
        if !ctx.quiet {
            println!("No templates.");
        }
        return Ok(());
    }
    let rows: Vec<Vec<String>> = protos
        .iter()
        .map(|p| {
            vec![
                p.id.clone(),
                p.r#type.clone(),
                p.steps.len().to_string(),
                catalog.origin(&p.id).unwrap_or_default().to_string(),
                p.title.clone(),
            ]
        })
        .collect();
    output_table(&["ID", "TYPE", "STEPS", "SOURCE", "TITLE"], &rows);
    Ok(())
}

fn cmd_show(ctx: &RuntimeContext, catalog: &Catalog, args: &FormulaShowArgs) -> Result<()> {
    // Unlabeled records are shown too, flagged, so authors can see why a
    // bond is refused.
    let Some(proto) = catalog.lookup(&args.id) else {
        bail!("template not found: {}", args.id);
    };
    let origin = catalog.origin(&args.id).unwrap_or_default();

    if ctx.json {
        output_json(&serde_json::json!({
            "source": origin,
            "bondable": proto.is_bondable(),
            "template": &*proto,
        }));
        return Ok(());
    }

    println!("{} (v{}, {}, from {})", proto.id, proto.version, proto.r#type, origin);
    if !proto.is_bondable() {
        println!("Not bondable: missing the 'template' label");
    }
    if !proto.title.is_empty() {
        println!("Title: {}", proto.title);
    }
    if !proto.description.is_empty() {
        println!();
        println!("{}", proto.description);
    }
    if !proto.vars.is_empty() {
        println!();
        println!("Vars:");
        for (name, def) in &proto.vars {
            let mut notes = Vec::new();
            if def.required {
                notes.push("required".to_string());
            }
            if let Some(ref d) = def.default {
                notes.push(format!("default: {}", d));
            }
            let notes = if notes.is_empty() {
                String::new()
            } else {
                format!(" ({})", notes.join(", "))
            };
            println!("  {}{} {}", name, notes, def.description);
        }
    }
    println!();
    println!("Steps ({}):", proto.steps.len());
    for (idx, step) in proto.steps.iter().enumerate() {
        let mut extra = String::new();
        if !step.needs.is_empty() {
            let needs: Vec<String> = step.needs.iter().map(|n| n.to_string()).collect();
            extra.push_str(&format!(" (needs: {})", needs.join(", ")));
        }
        if let Some(parent) = step.waits_for_children_of {
            extra.push_str(&format!(" (waits for children of {})", parent));
        }
        if let Some(ref cond) = step.condition {
            extra.push_str(&format!(" (if {})", cond));
        }
        println!("  {}. {}{}", idx + 1, step.title, extra);
    }
    Ok(())
}
