//! Step records -- the schedulable units of an instance tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::StepStatus;

/// Helper for `skip_serializing_if` on `bool` fields.
fn is_false(b: &bool) -> bool {
    !b
}

/// One step of a bonded instance.
///
/// Ordinary prerequisites are stored as edges (see
/// [`StepDependency`](crate::dependency::StepDependency)), not on the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// `<instance-id>.<ordinal>`.
    pub id: String,

    pub instance_id: String,

    /// 1-based position of the step template this step came from.
    pub ordinal: u32,

    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub status: StepStatus,

    /// Fan-in marker: wait for every child bonded under this parent ref.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waits_for: Option<String>,

    /// Fan-out under this step is closed to new children.
    #[serde(default, skip_serializing_if = "is_false")]
    pub sealed: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Step {
    /// Creates a step in `status` with fresh timestamps.
    pub fn new(
        instance_id: impl Into<String>,
        ordinal: u32,
        title: impl Into<String>,
        status: StepStatus,
    ) -> Self {
        let instance_id = instance_id.into();
        let now = Utc::now();
        Self {
            id: step_id(&instance_id, ordinal),
            instance_id,
            ordinal,
            title: title.into(),
            description: String::new(),
            status,
            waits_for: None,
            sealed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` if this step carries a fan-in marker.
    pub fn is_fan_in(&self) -> bool {
        self.waits_for.is_some()
    }
}

/// Builds the hierarchical id of a step.
pub fn step_id(instance_id: &str, ordinal: u32) -> String {
    format!("{instance_id}.{ordinal}")
}

/// Splits a step id into its instance id and ordinal.
///
/// Returns `None` when the trailing segment is not a positive integer.
pub fn split_step_id(id: &str) -> Option<(&str, u32)> {
    let (instance, ordinal) = id.rsplit_once('.')?;
    let ordinal: u32 = ordinal.parse().ok()?;
    if instance.is_empty() || ordinal == 0 {
        return None;
    }
    Some((instance, ordinal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_step_uses_hierarchical_id() {
        let step = Step::new("mol-engineer-in-box", 3, "Implement", StepStatus::Blocked);
        assert_eq!(step.id, "mol-engineer-in-box.3");
        assert_eq!(step.ordinal, 3);
        assert!(!step.is_fan_in());
    }

    #[test]
    fn split_ids() {
        assert_eq!(split_step_id("arm-ace.2"), Some(("arm-ace", 2)));
        assert_eq!(split_step_id("patrol.v2.10"), Some(("patrol.v2", 10)));
        assert_eq!(split_step_id("patrol"), None);
        assert_eq!(split_step_id("patrol.x"), None);
        assert_eq!(split_step_id("patrol.0"), None);
        assert_eq!(split_step_id(".1"), None);
    }
}
