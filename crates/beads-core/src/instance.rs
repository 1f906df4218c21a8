//! Instance records -- a bonded mol or wisp.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{Durability, InstanceStatus};

/// Helper for `skip_serializing_if` on `bool` fields.
fn is_false(b: &bool) -> bool {
    !b
}

/// A live instantiation of a proto.
///
/// The id is the caller-supplied ref, or the template id when no ref was
/// given. Step ids hang off it as `<id>.<ordinal>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,

    /// The proto this instance was bonded from.
    pub template_id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Opaque routing labels copied from the proto.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    pub durability: Durability,

    #[serde(default)]
    pub status: InstanceStatus,

    /// The resolved variable bindings used at bond time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, String>,

    /// Step or instance this one was dynamically bonded under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// No further children may be bonded under this instance.
    #[serde(default, skip_serializing_if = "is_false")]
    pub sealed: bool,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Instance {
    /// Returns `true` once the instance has been squashed or burned.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns `true` if this instance lives in the ephemeral store.
    pub fn is_wisp(&self) -> bool {
        self.durability == Durability::Ephemeral
    }
}

/// Builder for constructing [`Instance`] values.
#[derive(Debug, Clone)]
pub struct InstanceBuilder {
    instance: Instance,
}

impl InstanceBuilder {
    /// Starts a durable, active instance of `template_id` with the same id.
    pub fn new(template_id: impl Into<String>) -> Self {
        let template_id = template_id.into();
        Self {
            instance: Instance {
                id: template_id.clone(),
                template_id,
                title: String::new(),
                description: String::new(),
                labels: Vec::new(),
                durability: Durability::Durable,
                status: InstanceStatus::Active,
                bindings: BTreeMap::new(),
                parent: None,
                sealed: false,
                created_at: Utc::now(),
                created_by: String::new(),
                finalized_at: None,
            },
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.instance.id = id.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.instance.title = title.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.instance.description = description.into();
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.instance.labels = labels;
        self
    }

    pub fn durability(mut self, durability: Durability) -> Self {
        self.instance.durability = durability;
        self
    }

    pub fn status(mut self, status: InstanceStatus) -> Self {
        self.instance.status = status;
        self
    }

    pub fn bindings(mut self, bindings: BTreeMap<String, String>) -> Self {
        self.instance.bindings = bindings;
        self
    }

    pub fn parent(mut self, parent: Option<String>) -> Self {
        self.instance.parent = parent;
        self
    }

    pub fn created_by(mut self, actor: impl Into<String>) -> Self {
        self.instance.created_by = actor.into();
        self
    }

    /// Consumes the builder and returns the instance.
    pub fn build(self) -> Instance {
        self.instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_defaults_id_to_template() {
        let inst = InstanceBuilder::new("mol-engineer-in-box").build();
        assert_eq!(inst.id, "mol-engineer-in-box");
        assert_eq!(inst.template_id, "mol-engineer-in-box");
        assert_eq!(inst.status, InstanceStatus::Active);
        assert!(!inst.is_wisp());
    }

    #[test]
    fn serde_skips_empty_fields() {
        let inst = InstanceBuilder::new("mol-a")
            .id("arm-ace")
            .durability(Durability::Ephemeral)
            .build();
        let json = serde_json::to_value(&inst).unwrap();
        assert_eq!(json["id"], "arm-ace");
        assert_eq!(json["durability"], "ephemeral");
        assert!(json.get("parent").is_none());
        assert!(json.get("sealed").is_none());
        assert!(json.get("bindings").is_none());
    }
}
