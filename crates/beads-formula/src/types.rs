//! Proto data model -- the read-only workflow templates a catalog serves.
//!
//! Covers: labels, versioned identity, variables (with defaults & required),
//! ordered step templates with sibling dependencies, fan-in markers and
//! optional conditions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The label that marks a record as bondable.
pub const TEMPLATE_LABEL: &str = "template";

/// Default proto type.
fn default_type() -> String {
    "molecule".to_string()
}

/// Default schema version.
fn default_version() -> u32 {
    1
}

/// Root structure for `.formula.toml` / `.formula.json` files and JSONL lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proto {
    /// Unique identifier within a catalog.
    #[serde(alias = "formula")]
    pub id: String,

    /// Instance title pattern (supports `{{variable}}` substitution).
    #[serde(default)]
    pub title: String,

    /// Instance description pattern.
    #[serde(default)]
    pub description: String,

    /// `template` marks the record as bondable; other labels are opaque.
    #[serde(default)]
    pub labels: Vec<String>,

    /// Type tag, e.g. "molecule", "patrol".
    #[serde(default = "default_type")]
    pub r#type: String,

    /// Template version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Variables with optional defaults and validation.
    #[serde(default)]
    pub vars: BTreeMap<String, VarDef>,

    /// Step templates, in declaration order. Ordinals are 1-based.
    #[serde(default)]
    pub steps: Vec<StepTemplate>,

    /// Where this proto was loaded from (set by the loader).
    #[serde(skip)]
    pub source: String,
}

/// Variable definition with optional default and required flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDef {
    #[serde(default)]
    pub description: String,

    /// Whether the variable must be provided by the caller.
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<String>,
}

/// A child step template; becomes a step record when bonded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    /// Step title (supports substitution).
    pub title: String,

    #[serde(default)]
    pub description: String,

    /// 1-based ordinals of sibling steps that must be done first.
    #[serde(default)]
    pub needs: Vec<u32>,

    /// Fan-in marker: the 1-based ordinal of the sibling step whose dynamically
    /// bonded children this step waits for.
    #[serde(default)]
    pub waits_for_children_of: Option<u32>,

    /// Condition for including this step, e.g. `"{{mode}} == full"`.
    #[serde(default)]
    pub condition: Option<String>,
}

impl Proto {
    /// Returns `true` if the record carries the `template` label.
    pub fn is_bondable(&self) -> bool {
        self.has_label(TEMPLATE_LABEL)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Checks the structure a loader can verify without bindings.
    ///
    /// Acyclicity is not checked here; it is enforced at bond time.
    pub fn validate(&self) -> Result<(), FormulaError> {
        if self.id.trim().is_empty() {
            return Err(FormulaError::invalid("<unnamed>", "missing id"));
        }
        let count = self.steps.len() as u32;
        if self.labels.iter().any(|l| l.trim().is_empty()) {
            return Err(FormulaError::invalid(&self.id, "empty label"));
        }
        for (idx, step) in self.steps.iter().enumerate() {
            let ordinal = idx as u32 + 1;
            if step.title.trim().is_empty() {
                return Err(FormulaError::invalid(
                    &self.id,
                    format!("step {ordinal} has no title"),
                ));
            }
            let refs = step.needs.iter().chain(step.waits_for_children_of.iter());
            for &target in refs {
                if target == 0 || target > count {
                    return Err(FormulaError::invalid(
                        &self.id,
                        format!("step {ordinal} references step {target}, which does not exist"),
                    ));
                }
                if target == ordinal {
                    return Err(FormulaError::invalid(
                        &self.id,
                        format!("step {ordinal} references itself"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Errors that can occur while loading protos and resolving their text.
#[derive(Debug, thiserror::Error)]
pub enum FormulaError {
    #[error("parse error in {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("invalid template {id}: {reason}")]
    Invalid { id: String, reason: String },

    #[error("template not found: {0}")]
    NotFound(String),

    #[error("record {0} is not labeled 'template' and cannot be bonded")]
    Unlabeled(String),

    #[error("missing variable: {0}")]
    MissingVariable(String),

    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FormulaError {
    pub(crate) fn invalid(id: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn parse(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }
}
