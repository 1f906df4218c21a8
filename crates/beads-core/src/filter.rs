//! Filter types for querying instances and steps.

use crate::enums::{InstanceStatus, StepStatus};
use crate::instance::Instance;

/// Filter for instance queries. `None` / empty fields match anything.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    /// AND semantics: instance must have ALL these labels.
    pub labels: Vec<String>,

    /// Filter by the proto the instance was bonded from.
    pub template_id: Option<String>,

    pub status: Option<InstanceStatus>,

    /// Filter by the step or instance the instance was bonded under.
    pub parent: Option<String>,

    /// Exclude squashed and burned instances.
    pub active_only: bool,

    pub limit: Option<u32>,
}

impl InstanceFilter {
    /// Matches instances bonded directly under `parent`.
    pub fn children_of(parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            ..Self::default()
        }
    }

    /// Returns `true` if `instance` passes every set criterion (ignores `limit`).
    pub fn matches(&self, instance: &Instance) -> bool {
        if let Some(ref t) = self.template_id {
            if &instance.template_id != t {
                return false;
            }
        }
        if let Some(status) = self.status {
            if instance.status != status {
                return false;
            }
        }
        if let Some(ref p) = self.parent {
            if instance.parent.as_ref() != Some(p) {
                return false;
            }
        }
        if self.active_only && instance.is_terminal() {
            return false;
        }
        self.labels.iter().all(|l| instance.labels.contains(l))
    }
}

/// Filter for step queries within one instance.
#[derive(Debug, Clone, Default)]
pub struct StepFilter {
    pub status: Option<StepStatus>,

    /// Only steps carrying a fan-in marker.
    pub fan_in_only: bool,
}
