//! Output formatting helpers for the `bd` CLI.
//!
//! JSON output, aligned tables, and one-line renderings of instances and
//! steps.

use std::io::{self, Write};

use serde::Serialize;

use beads_core::enums::StepStatus;
use beads_core::instance::Instance;
use beads_core::step::Step;
use beads_mol::Readiness;

/// Print a value as pretty-printed JSON to stdout.
///
/// Terminates the process with exit code 1 if serialization fails.
pub fn output_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            // Ignore broken pipe errors (e.g., piped to `head`)
            let _ = writeln!(handle, "{}", json);
        }
        Err(e) => {
            eprintln!("Error: failed to serialize JSON: {}", e);
            std::process::exit(1);
        }
    }
}

/// Print a simple table with headers and rows.
///
/// Column widths are computed from the data for alignment.
pub fn output_table(headers: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        return;
    }
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let _ = handle.write_all(render_table(headers, rows).as_bytes());
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut out = String::new();
    let header: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    push_row(&mut out, &header, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_row(&mut out, &rule, &widths);
    for row in rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let last = cells.len().saturating_sub(1);
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        match widths.get(i) {
            // No padding after the last column.
            Some(w) if i < last => out.push_str(&format!("{:<width$}", cell, width = *w)),
            _ => out.push_str(cell),
        }
    }
    out.push('\n');
}

/// Status symbol for step listings.
pub fn status_symbol(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Blocked => "!",
        StepStatus::Ready => "o",
        StepStatus::Running => "~",
        StepStatus::Done => "x",
        StepStatus::Failed => "X",
    }
}

/// Format an instance as a compact one-line string.
///
/// Format: `{id} [{mol|wisp}] {title} ({status})`
pub fn format_instance_compact(inst: &Instance) -> String {
    let parent = match inst.parent {
        Some(ref p) => format!(" <- {}", p),
        None => String::new(),
    };
    format!(
        "{} [{}] {} ({}){}",
        inst.id,
        inst.durability.noun(),
        inst.title,
        inst.status,
        parent
    )
}

/// Short description of why a step can or cannot start.
pub fn format_readiness(readiness: &Readiness) -> String {
    match readiness {
        Readiness::Ready => "ready".to_string(),
        Readiness::Waiting { pending } => format!("waiting on {}", pending.join(", ")),
        Readiness::Blocked { failed } => format!("blocked by {}", failed.join(", ")),
        Readiness::Settled => String::new(),
    }
}

/// Format a step as a row for [`output_table`].
pub fn format_step_row(step: &Step, readiness: &Readiness) -> Vec<String> {
    vec![
        status_symbol(step.status).to_string(),
        step.id.clone(),
        step.status.to_string(),
        step.title.clone(),
        format_readiness(readiness),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::enums::Durability;
    use beads_core::instance::InstanceBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn compact_instance_line() {
        let inst = InstanceBuilder::new("mol-polecat-arm")
            .id("arm-1")
            .title("Polecat arm: nux")
            .durability(Durability::Ephemeral)
            .parent(Some("patrol.2".into()))
            .build();
        assert_eq!(
            format_instance_compact(&inst),
            "arm-1 [wisp] Polecat arm: nux (active) <- patrol.2"
        );
    }

    #[test]
    fn readiness_text() {
        assert_eq!(format_readiness(&Readiness::Ready), "ready");
        assert_eq!(
            format_readiness(&Readiness::Waiting {
                pending: vec!["a.1".into(), "a.2".into()]
            }),
            "waiting on a.1, a.2"
        );
        assert_eq!(
            format_readiness(&Readiness::Blocked {
                failed: vec!["a.1".into()]
            }),
            "blocked by a.1"
        );
        assert_eq!(format_readiness(&Readiness::Settled), "");
    }

    #[test]
    fn table_aligns_columns() {
        let rows = vec![
            vec!["a.1".into(), "done".into(), "Design".into()],
            vec!["a.10".into(), "ready".into(), "Ship".into()],
        ];
        let table = render_table(&["ID", "STATUS", "TITLE"], &rows);
        assert_eq!(
            table,
            "ID    STATUS  TITLE\n\
             ----  ------  ------\n\
             a.1   done    Design\n\
             a.10  ready   Ship\n"
        );
    }

    #[test]
    fn status_symbols() {
        assert_eq!(status_symbol(StepStatus::Ready), "o");
        assert_eq!(status_symbol(StepStatus::Done), "x");
        assert_eq!(status_symbol(StepStatus::Running), "~");
    }
}
