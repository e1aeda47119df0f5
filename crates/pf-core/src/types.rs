//! Identifier newtypes
//!
//! All cross-references between entities go through these ids; no entity
//! stores a pointer to another, which keeps reloads free of lifetime
//! coupling.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a node (one addressable remote machine)
    NodeId
);
string_id!(
    /// Unique identifier for a cluster (a named group of nodes)
    ClusterId
);
string_id!(
    /// Unique identifier for a program (a launchable application)
    ProgramId
);
string_id!(
    /// Unique identifier for one of a program's named configurations
    ConfigurationId
);

/// Identifier of one launched process, monotonic and unique for the lifetime
/// of the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub i32);

impl ProcessId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process-{}", self.0)
    }
}

impl From<i32> for ProcessId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}
