//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Graph and node identifiers are distinct types so the compiler rejects
//! accidental mixing (a node id used as a Redis record key, say). IDs use
//! UUID v7 (time-ordered) for efficient database indexing; the graph CRUD
//! collaborator generates them, the `new()` constructors here exist for
//! tests and seed data.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl core::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse::<Uuid>()?))
            }
        }
    };
}

define_id! {
    /// Unique identifier for a dependency graph (one simulation per graph).
    GraphId
}

define_id! {
    /// Unique identifier for a node (service) in a dependency graph.
    NodeId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let graph = GraphId::new();
        let node = NodeId::new();
        // These are different types -- the compiler enforces no mixing.
        assert_ne!(graph.into_inner(), Uuid::nil());
        assert_ne!(node.into_inner(), Uuid::nil());
    }

    #[test]
    fn id_display_matches_uuid() {
        let id = GraphId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }

    #[test]
    fn id_parses_from_string() {
        let id = NodeId::new();
        let parsed: Result<NodeId, _> = id.to_string().parse();
        assert_eq!(parsed.ok(), Some(id));
    }
}
