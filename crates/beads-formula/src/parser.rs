//! Parse proto files (TOML, JSON, JSONL) and read catalog source directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::SourceSnapshot;
use crate::types::{FormulaError, Proto};

/// File suffixes recognized when scanning a directory, most specific first.
pub const PROTO_SUFFIXES: &[&str] = &[".formula.toml", ".formula.json", ".toml", ".json"];

/// Parse a proto from a TOML string.
pub fn parse_toml(source_name: &str, content: &str) -> Result<Proto, FormulaError> {
    let mut proto: Proto =
        toml::from_str(content).map_err(|e| FormulaError::parse(source_name, e))?;
    proto.source = source_name.to_string();
    proto.validate()?;
    Ok(proto)
}

/// Parse a proto from a JSON string.
pub fn parse_json(source_name: &str, content: &str) -> Result<Proto, FormulaError> {
    let mut proto: Proto =
        serde_json::from_str(content).map_err(|e| FormulaError::parse(source_name, e))?;
    proto.source = source_name.to_string();
    proto.validate()?;
    Ok(proto)
}

/// Load a proto from a file path (auto-detect TOML vs JSON by extension).
pub fn load_proto(path: &Path) -> Result<Proto, FormulaError> {
    let content = std::fs::read_to_string(path)?;
    let name = path.display().to_string();
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => parse_toml(&name, &content),
        Some("json") => parse_json(&name, &content),
        _ => parse_json(&name, &content).or_else(|_| parse_toml(&name, &content)),
    }
}

/// Reads every proto file in `dir` (non-recursive), in file-name order.
///
/// A missing directory yields an empty snapshot. Unreadable or malformed
/// files are skipped and counted.
pub fn read_directory(name: &str, dir: &Path) -> SourceSnapshot {
    let mut snapshot = SourceSnapshot::empty(name);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(source = name, dir = %dir.display(), "catalog directory absent");
            return snapshot;
        }
        Err(e) => {
            warn!(source = name, dir = %dir.display(), error = %e, "cannot read catalog directory");
            return snapshot;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_proto_suffix(p))
        .collect();
    paths.sort();

    for path in paths {
        match load_proto(&path) {
            Ok(proto) => snapshot.protos.push(Arc::new(proto)),
            Err(e) => {
                warn!(source = name, path = %path.display(), error = %e, "skipping malformed proto");
                snapshot.skipped += 1;
            }
        }
    }
    debug!(source = name, loaded = snapshot.protos.len(), skipped = snapshot.skipped, "read catalog directory");
    snapshot
}

/// Reads a JSONL file of proto fragments, one record per line.
///
/// Blank lines are ignored. A missing file yields an empty snapshot;
/// malformed lines are skipped with their line number logged.
pub fn read_jsonl(name: &str, path: &Path) -> SourceSnapshot {
    let mut snapshot = SourceSnapshot::empty(name);
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return snapshot,
        Err(e) => {
            warn!(source = name, path = %path.display(), error = %e, "cannot read fragments file");
            return snapshot;
        }
    };
    parse_jsonl_into(&mut snapshot, &path.display().to_string(), &content);
    snapshot
}

pub(crate) fn parse_jsonl_into(snapshot: &mut SourceSnapshot, source_name: &str, content: &str) {
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let line_name = format!("{source_name}:{}", idx + 1);
        match parse_json(&line_name, trimmed) {
            Ok(proto) => snapshot.protos.push(Arc::new(proto)),
            Err(e) => {
                warn!(source = %snapshot.name, line = idx + 1, error = %e, "skipping malformed fragment");
                snapshot.skipped += 1;
            }
        }
    }
}

fn has_proto_suffix(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| PROTO_SUFFIXES.iter().any(|s| n.ends_with(s)))
}
