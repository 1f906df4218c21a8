//! Protos compiled into the binary; the lowest-precedence catalog source.

use std::sync::Arc;

use tracing::warn;

use crate::catalog::SourceSnapshot;
use crate::parser;

/// `(file name, contents)` of every built-in proto.
const BUILTIN_PROTOS: &[(&str, &str)] = &[
    (
        "mol-engineer-in-box.formula.toml",
        include_str!("../builtin/mol-engineer-in-box.formula.toml"),
    ),
    (
        "mol-polecat-arm.formula.toml",
        include_str!("../builtin/mol-polecat-arm.formula.toml"),
    ),
    (
        "mol-witness-patrol.formula.toml",
        include_str!("../builtin/mol-witness-patrol.formula.toml"),
    ),
];

/// Parses the built-in protos into a snapshot named `name`.
pub fn snapshot(name: &str) -> SourceSnapshot {
    let mut snap = SourceSnapshot::empty(name);
    for (file, content) in BUILTIN_PROTOS {
        match parser::parse_toml(&format!("builtin:{file}"), content) {
            Ok(proto) => snap.protos.push(Arc::new(proto)),
            Err(e) => {
                warn!(file, error = %e, "skipping malformed built-in proto");
                snap.skipped += 1;
            }
        }
    }
    snap
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn all_builtins_parse() {
        let snap = snapshot("builtin");
        assert_eq!(snap.skipped, 0);
        let ids: Vec<_> = snap.protos.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["mol-engineer-in-box", "mol-polecat-arm", "mol-witness-patrol"]
        );
        assert!(snap.protos.iter().all(|p| p.is_bondable()));
    }

    #[test]
    fn engineer_in_box_is_a_chain() {
        let snap = snapshot("builtin");
        let p = &snap.protos[0];
        assert_eq!(p.steps.len(), 5);
        for (idx, step) in p.steps.iter().enumerate().skip(1) {
            assert_eq!(step.needs, vec![idx as u32]);
        }
        assert!(p.vars["feature_name"].required);
    }

    #[test]
    fn patrol_fans_in_on_survey() {
        let snap = snapshot("builtin");
        let p = &snap.protos[2];
        assert_eq!(p.r#type, "patrol");
        assert_eq!(p.steps[2].waits_for_children_of, Some(2));
    }
}
