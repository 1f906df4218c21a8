//! Variable substitution: `{{name}}` placeholders, binding defaults and step
//! conditions.
//!
//! Everything here is pure. Resolution is strict: a placeholder without a
//! binding is an error, never left in the output.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{FormulaError, Proto};

/// Variable bindings, name -> value.
pub type Bindings = BTreeMap<String, String>;

/// A piece of pattern text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Var(&'a str),
}

/// Replaces every `{{name}}` in `text` with its binding.
///
/// Bindings not referenced by `text` are ignored. Text that merely looks like
/// a brace (`{{ }}`, `{{1x}}`, an unclosed `{{name`) is copied through.
pub fn resolve(text: &str, bindings: &Bindings) -> Result<String, FormulaError> {
    let mut out = String::with_capacity(text.len());
    for seg in segments(text) {
        match seg {
            Segment::Literal(s) => out.push_str(s),
            Segment::Var(name) => match bindings.get(name) {
                Some(value) => out.push_str(value),
                None => return Err(FormulaError::MissingVariable(name.to_string())),
            },
        }
    }
    Ok(out)
}

/// Returns the placeholder names in `text`, in order of first appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    for seg in segments(text) {
        if let Segment::Var(name) = seg {
            if seen.insert(name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Collects every variable referenced anywhere in a proto: its own title and
/// description, every step's title and description, and step conditions.
pub fn proto_variables(proto: &Proto) -> BTreeSet<String> {
    let mut vars = BTreeSet::new();
    let mut scan = |text: &str| vars.extend(placeholders(text));
    scan(&proto.title);
    scan(&proto.description);
    for step in &proto.steps {
        scan(&step.title);
        scan(&step.description);
        if let Some(ref c) = step.condition {
            scan(c);
        }
    }
    vars
}

/// Builds the binding set used at bond time: declared defaults, overridden by
/// provided values.
///
/// A `required` variable that the caller did not provide is a
/// [`FormulaError::MissingVariable`], even if it is never referenced.
pub fn effective_bindings(proto: &Proto, provided: &Bindings) -> Result<Bindings, FormulaError> {
    let mut vars = Bindings::new();
    for (name, def) in &proto.vars {
        if def.required && !provided.contains_key(name) {
            return Err(FormulaError::MissingVariable(name.clone()));
        }
        if let Some(ref default) = def.default {
            vars.insert(name.clone(), default.clone());
        }
    }
    for (k, v) in provided {
        vars.insert(k.clone(), v.clone());
    }
    Ok(vars)
}

/// Evaluates a step condition against the bindings.
///
/// Supported formats:
/// - `"{{var}}"` -- truthy (non-empty and not "false"/"0")
/// - `"!{{var}}"` -- negated truthy
/// - `"{{var}} == value"` -- equality
/// - `"{{var}} != value"` -- inequality
///
/// Placeholders resolve strictly, so a condition over an unbound variable is
/// a [`FormulaError::MissingVariable`].
pub fn evaluate_condition(condition: &str, bindings: &Bindings) -> Result<bool, FormulaError> {
    let cond = condition.trim();
    if cond.is_empty() {
        return Ok(true);
    }

    if let Some(pos) = cond.find("!=") {
        let (lhs, rhs) = split_comparison(cond, pos, bindings)?;
        return Ok(lhs != rhs);
    }
    if let Some(pos) = cond.find("==") {
        let (lhs, rhs) = split_comparison(cond, pos, bindings)?;
        return Ok(lhs == rhs);
    }

    let (negated, expr) = match cond.strip_prefix('!') {
        Some(stripped) => (true, stripped.trim()),
        None => (false, cond),
    };
    if placeholders(expr).is_empty() {
        return Err(FormulaError::InvalidCondition(condition.to_string()));
    }

    let resolved = resolve(expr, bindings)?;
    let truthy = !resolved.is_empty() && resolved != "false" && resolved != "0";
    Ok(truthy != negated)
}

fn split_comparison(
    cond: &str,
    pos: usize,
    bindings: &Bindings,
) -> Result<(String, String), FormulaError> {
    let lhs = cond[..pos].trim();
    let rhs = cond[pos + 2..].trim();
    if lhs.is_empty() {
        return Err(FormulaError::InvalidCondition(cond.to_string()));
    }
    Ok((resolve(lhs, bindings)?, resolve(rhs, bindings)?))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn is_var_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_var_cont(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Splits `text` into literal runs and placeholder names.
fn segments(text: &str) -> Vec<Segment<'_>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while let Some(offset) = text[i..].find("{{") {
        let open = i + offset;
        let start = open + 2;
        if start < bytes.len() && is_var_start(bytes[start]) {
            let mut end = start + 1;
            while end < bytes.len() && is_var_cont(bytes[end]) {
                end += 1;
            }
            if text[end..].starts_with("}}") {
                if literal_start < open {
                    out.push(Segment::Literal(&text[literal_start..open]));
                }
                out.push(Segment::Var(&text[start..end]));
                i = end + 2;
                literal_start = i;
                continue;
            }
        }
        // '{' is ASCII, so open + 1 is a char boundary.
        i = open + 1;
    }

    if literal_start < text.len() {
        out.push(Segment::Literal(&text[literal_start..]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StepTemplate, VarDef};
    use pretty_assertions::assert_eq;

    fn make_vars(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // -- resolve -------------------------------------------------------------

    #[test]
    fn resolve_simple() {
        let vars = make_vars(&[("feature_name", "user auth")]);
        assert_eq!(
            resolve("Engineer in Box: {{feature_name}}", &vars).unwrap(),
            "Engineer in Box: user auth"
        );
    }

    #[test]
    fn resolve_multiple_and_repeated() {
        let vars = make_vars(&[("a", "X"), ("b", "Y")]);
        assert_eq!(resolve("{{a}}-{{b}}-{{a}}", &vars).unwrap(), "X-Y-X");
    }

    #[test]
    fn resolve_missing_names_placeholder() {
        let vars = make_vars(&[("a", "X")]);
        let err = resolve("{{a}} {{missing}}", &vars).unwrap_err();
        assert!(matches!(err, FormulaError::MissingVariable(ref n) if n == "missing"));
    }

    #[test]
    fn resolve_ignores_unused_bindings() {
        let vars = make_vars(&[("unused", "1")]);
        assert_eq!(resolve("plain text", &vars).unwrap(), "plain text");
    }

    #[test]
    fn resolve_leaves_non_placeholders() {
        let vars = Bindings::new();
        assert_eq!(resolve("{{ }} {{1x}} {{open", &vars).unwrap(), "{{ }} {{1x}} {{open");
    }

    #[test]
    fn resolve_handles_triple_braces_and_unicode() {
        let vars = make_vars(&[("name", "ünï")]);
        assert_eq!(resolve("→{{{name}}}←", &vars).unwrap(), "→{ünï}←");
    }

    #[test]
    fn resolve_is_deterministic() {
        let vars = make_vars(&[("x", "1"), ("y", "2")]);
        let text = "{{x}}/{{y}} then {{x}}";
        assert_eq!(resolve(text, &vars).unwrap(), resolve(text, &vars).unwrap());
    }

    #[test]
    fn values_are_not_rescanned() {
        let vars = make_vars(&[("a", "{{b}}")]);
        assert_eq!(resolve("{{a}}", &vars).unwrap(), "{{b}}");
    }

    // -- placeholders ----------------------------------------------------------

    #[test]
    fn placeholders_in_order() {
        assert_eq!(
            placeholders("{{b}} and {{a}} and {{b}}"),
            vec!["b".to_string(), "a".to_string()]
        );
    }

    // -- effective_bindings ----------------------------------------------------

    fn proto_with_vars(vars: &[(&str, VarDef)]) -> Proto {
        Proto {
            id: "mol-test".into(),
            title: "{{name}}".into(),
            description: String::new(),
            labels: vec!["template".into()],
            r#type: "molecule".into(),
            version: 1,
            vars: vars
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            steps: vec![StepTemplate {
                title: "Deploy to {{env}}".into(),
                condition: Some("{{mode}} == full".into()),
                ..Default::default()
            }],
            source: String::new(),
        }
    }

    #[test]
    fn defaults_overridden_by_provided() {
        let p = proto_with_vars(&[(
            "env",
            VarDef {
                default: Some("staging".into()),
                ..Default::default()
            },
        )]);
        let b = effective_bindings(&p, &Bindings::new()).unwrap();
        assert_eq!(b["env"], "staging");
        let b = effective_bindings(&p, &make_vars(&[("env", "prod")])).unwrap();
        assert_eq!(b["env"], "prod");
    }

    #[test]
    fn required_without_value_fails() {
        let p = proto_with_vars(&[(
            "name",
            VarDef {
                required: true,
                ..Default::default()
            },
        )]);
        let err = effective_bindings(&p, &Bindings::new()).unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn proto_variables_cover_all_text() {
        let p = proto_with_vars(&[]);
        let vars: Vec<_> = proto_variables(&p).into_iter().collect();
        assert_eq!(vars, vec!["env", "mode", "name"]);
    }

    // -- evaluate_condition ----------------------------------------------------

    #[test]
    fn condition_equality() {
        let vars = make_vars(&[("type", "feature")]);
        assert!(evaluate_condition("{{type}} == feature", &vars).unwrap());
        assert!(!evaluate_condition("{{type}} == bug", &vars).unwrap());
    }

    #[test]
    fn condition_inequality() {
        let vars = make_vars(&[("type", "feature")]);
        assert!(evaluate_condition("{{type}} != bug", &vars).unwrap());
        assert!(!evaluate_condition("{{type}} != feature", &vars).unwrap());
    }

    #[test]
    fn condition_truthy_and_negated() {
        let vars = make_vars(&[("docs", "yes"), ("skip", "false"), ("zero", "0")]);
        assert!(evaluate_condition("{{docs}}", &vars).unwrap());
        assert!(evaluate_condition("!{{skip}}", &vars).unwrap());
        assert!(!evaluate_condition("{{zero}}", &vars).unwrap());
    }

    #[test]
    fn condition_empty_passes() {
        assert!(evaluate_condition("", &Bindings::new()).unwrap());
    }

    #[test]
    fn condition_unbound_variable_fails() {
        let err = evaluate_condition("{{mode}} == full", &Bindings::new()).unwrap_err();
        assert!(matches!(err, FormulaError::MissingVariable(_)));
    }

    #[test]
    fn condition_without_placeholder_is_invalid() {
        let err = evaluate_condition("always", &Bindings::new()).unwrap_err();
        assert!(matches!(err, FormulaError::InvalidCondition(_)));
    }
}
