//! Error taxonomy of the molecule engine.

use beads_core::enums::StepStatus;
use beads_core::validation::ValidationError;
use beads_formula::FormulaError;
use beads_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum MolError {
    /// A template, instance or step does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The template is malformed or lacks the `template` label.
    #[error("invalid template {id}: {reason}")]
    InvalidTemplate { id: String, reason: String },

    /// A placeholder or required variable had no binding at bond time.
    #[error("missing variable: {0}")]
    MissingVariable(String),

    /// An active instance already uses this id; pick a distinct ref.
    #[error("instance {0} already exists and is active")]
    DuplicateInstance(String),

    #[error("dependency cycle: {}", cycle.join(" -> "))]
    CycleError { cycle: Vec<String> },

    /// A prerequisite failed, so the step can never become ready.
    #[error("step {step} is blocked by failed step(s): {}", failed.join(", "))]
    Blocked { step: String, failed: Vec<String> },

    #[error("instance {0} is already finalized")]
    AlreadyFinalized(String),

    #[error("step {step} cannot move from {from} to {to}")]
    InvalidTransition {
        step: String,
        from: StepStatus,
        to: StepStatus,
    },

    /// The parent no longer accepts children.
    #[error("fan-out under {parent} is sealed")]
    FanOutSealed { parent: String },

    /// A caller-supplied id or summary is malformed.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, MolError>;

impl MolError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<FormulaError> for MolError {
    fn from(err: FormulaError) -> Self {
        match err {
            FormulaError::NotFound(id) => Self::not_found("template", id),
            FormulaError::MissingVariable(name) => Self::MissingVariable(name),
            FormulaError::Invalid { id, reason } => Self::InvalidTemplate { id, reason },
            FormulaError::Unlabeled(id) => Self::InvalidTemplate {
                id,
                reason: "not labeled 'template'".into(),
            },
            FormulaError::Parse {
                source_name,
                message,
            } => Self::InvalidTemplate {
                id: source_name,
                reason: message,
            },
            other @ (FormulaError::InvalidCondition(_) | FormulaError::Io(_)) => {
                Self::InvalidTemplate {
                    id: String::new(),
                    reason: other.to_string(),
                }
            }
        }
    }
}
