//! Enum types for the molecule system.
//!
//! Each enum has:
//! - Serialize/Deserialize as its lowercase string form
//! - `as_str()`, `is_default()`, `Display`, `FromStr`
//!
//! Parsing is strict: an unknown string is an error rather than a catch-all
//! variant, because every value here drives scheduling decisions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Error returned when a string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The offending input.
    pub value: String,
}

// ---------------------------------------------------------------------------
// Macro: defines an enum with a fixed set of string variants.
// ---------------------------------------------------------------------------
macro_rules! define_enum {
    (
        $(#[$meta:meta])*
        $name:ident, kind = $kind:expr, default = $default:ident,
        variants: [
            $( $(#[$vmeta:meta])* ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// All variants, in declaration order.
            pub const ALL: &'static [Self] = &[ $( Self::$variant, )+ ];

            /// Returns the string representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $str, )+
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $str => Ok(Self::$variant), )+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_owned(),
                    }),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

// ===========================================================================
// Durability
// ===========================================================================

define_enum! {
    /// Where an instance lives: the audited store or the disposable one.
    Durability, kind = "durability", default = Durable,
    variants: [
        /// A mol: persisted in the durable, synchronized store.
        (Durable, "durable"),
        /// A wisp: persisted in the local, never-synchronized store.
        (Ephemeral, "ephemeral"),
    ]
}

impl Durability {
    /// Short glossary name for this kind of instance.
    pub fn noun(&self) -> &'static str {
        match self {
            Self::Durable => "mol",
            Self::Ephemeral => "wisp",
        }
    }
}

// ===========================================================================
// InstanceStatus
// ===========================================================================

define_enum! {
    /// Lifecycle state of a bonded instance.
    InstanceStatus, kind = "instance status", default = Active,
    variants: [
        (Active, "active"),
        (Squashed, "squashed"),
        (Burned, "burned"),
    ]
}

impl InstanceStatus {
    /// Squashed and burned instances accept no further changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Squashed | Self::Burned)
    }
}

// ===========================================================================
// StepStatus
// ===========================================================================

define_enum! {
    /// Execution state of a single step.
    StepStatus, kind = "step status", default = Blocked,
    variants: [
        (Blocked, "blocked"),
        (Ready, "ready"),
        (Running, "running"),
        (Done, "done"),
        (Failed, "failed"),
    ]
}

impl StepStatus {
    /// Returns `true` for statuses a worker can still pick up.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Blocked | Self::Ready)
    }

    /// Returns `true` if the transition `self -> to` is one a worker may report.
    ///
    /// Readiness of `blocked -> running` is checked by the scheduler; this
    /// only encodes the shape of the state machine.
    pub fn can_transition_to(&self, to: StepStatus) -> bool {
        matches!(
            (self, to),
            (Self::Ready | Self::Blocked, Self::Running)
                | (Self::Running, Self::Done)
                | (Self::Running, Self::Failed)
        )
    }
}

// ===========================================================================
// EventType
// ===========================================================================

define_enum! {
    /// Audit event kinds written alongside durable changes.
    EventType, kind = "event type", default = Bonded,
    variants: [
        (Bonded, "bonded"),
        (StatusChanged, "status_changed"),
        (Sealed, "sealed"),
        (Squashed, "squashed"),
        (Burned, "burned"),
        (Replaced, "replaced"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn step_status_roundtrip() {
        for status in StepStatus::ALL {
            assert_eq!(status.as_str().parse::<StepStatus>().unwrap(), *status);
        }
    }

    #[test]
    fn unknown_status_rejected() {
        let err = "in_progress".parse::<StepStatus>().unwrap_err();
        assert_eq!(err.kind, "step status");
        assert_eq!(err.value, "in_progress");
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&Durability::Ephemeral).unwrap();
        assert_eq!(json, "\"ephemeral\"");
        let back: Durability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Durability::Ephemeral);
        assert!(serde_json::from_str::<Durability>("\"volatile\"").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!InstanceStatus::Active.is_terminal());
        assert!(InstanceStatus::Squashed.is_terminal());
        assert!(InstanceStatus::Burned.is_terminal());
    }

    #[test]
    fn transition_shape() {
        use StepStatus::*;
        assert!(Ready.can_transition_to(Running));
        assert!(Blocked.can_transition_to(Running));
        assert!(Running.can_transition_to(Done));
        assert!(Running.can_transition_to(Failed));
        assert!(!Ready.can_transition_to(Done));
        assert!(!Done.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Running));
    }

    #[test]
    fn durability_nouns() {
        assert_eq!(Durability::Durable.noun(), "mol");
        assert_eq!(Durability::Ephemeral.noun(), "wisp");
    }
}
