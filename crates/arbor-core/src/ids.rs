//! Identifiers shared by the model, the deltas and the wire format.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identity of a node, stable across replicas and on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id for offline node creation.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// `(language key, version, element key)` triple naming a classifier or a
/// feature on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetaPointer {
    pub language: String,
    pub version: String,
    pub key: String,
}

impl MetaPointer {
    pub fn new(
        language: impl Into<String>,
        version: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            language: language.into(),
            version: version.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for MetaPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.language, self.version, self.key)
    }
}

/// Handle of a node inside one [`Forest`](crate::forest::Forest).
///
/// Keys are only meaningful for the forest that issued them and never leave
/// the process; use [`NodeId`] to talk about nodes across replicas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub(crate) usize);

impl NodeKey {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_meta_pointer_display_and_serde() {
        let mp = MetaPointer::new("shapes", "1", "Circle");
        assert_eq!(mp.to_string(), "shapes@1:Circle");

        let json = serde_json::to_value(&mp).unwrap();
        assert_eq!(json["language"], "shapes");
        assert_eq!(json["version"], "1");
        assert_eq!(json["key"], "Circle");
    }

    #[test]
    fn test_node_id_is_transparent_on_the_wire() {
        let id = NodeId::new("n-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"n-1\"");
    }
}
