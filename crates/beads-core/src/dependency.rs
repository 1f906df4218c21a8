//! Dependency edges between steps of one instance tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `step_id` needs `depends_on_id` to be done before it can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDependency {
    pub step_id: String,

    pub depends_on_id: String,

    /// Instance owning both ends of the edge.
    pub instance_id: String,

    pub created_at: DateTime<Utc>,
}

impl StepDependency {
    /// Creates an edge stamped with the current time.
    pub fn new(
        instance_id: impl Into<String>,
        step_id: impl Into<String>,
        depends_on_id: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            depends_on_id: depends_on_id.into(),
            instance_id: instance_id.into(),
            created_at: Utc::now(),
        }
    }
}
