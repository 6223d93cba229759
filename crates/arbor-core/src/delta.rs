//! The closed set of deltas describing every edit of a forest.
//!
//! A delta is an immutable record of one state transition. Value managers
//! emit exactly one delta per observable mutation; the application engine in
//! `arbor-delta` replays them, and the protocol layer turns them into commands.
//!
//! # Classification of moves
//!
//! ```text
//! same parent, same feature        => …InSameContainment / …InSameParent (annotations)
//! same parent, different feature   => …FromOtherContainmentInSameParent
//! different parent                 => …FromOtherContainment / …FromOtherParent
//! destination slot already holds   => …MovedAndReplaced… (occupant is detached)
//! ```
//!
//! # Index semantics
//!
//! `…MovedInSame…` removes the node at `old_index` and reinserts it so that it
//! ends up at `new_index`. `…MovedAndReplacedInSame…` puts the moved node in
//! place of the occupant found at `new_index` (an index into the list as it was
//! before the edit) and then removes it from `old_index`.

use crate::ids::{MetaPointer, NodeId, NodeKey};
use crate::value::{PropertyValue, ReferenceValue};
use std::hash::{Hash, Hasher};

/// A node as referenced from a delta.
///
/// The key addresses the node in the forest that produced the delta; id and
/// classifier make the record self-describing. Equality ignores the key, so
/// deltas produced by different replicas compare equal when they describe the
/// same observable change.
#[derive(Clone, Debug)]
pub struct NodeRef {
    pub key: NodeKey,
    pub id: NodeId,
    pub classifier: MetaPointer,
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.classifier == other.classifier
    }
}

impl Eq for NodeRef {}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.classifier.hash(state);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    PartitionAdded {
        partition: NodeRef,
    },
    PartitionDeleted {
        partition: NodeRef,
    },

    PropertyAdded {
        node: NodeRef,
        property: MetaPointer,
        value: PropertyValue,
    },
    PropertyDeleted {
        node: NodeRef,
        property: MetaPointer,
        old_value: PropertyValue,
    },
    PropertyChanged {
        node: NodeRef,
        property: MetaPointer,
        old_value: PropertyValue,
        new_value: PropertyValue,
    },

    ChildAdded {
        parent: NodeRef,
        containment: MetaPointer,
        index: usize,
        new_child: NodeRef,
    },
    ChildDeleted {
        parent: NodeRef,
        containment: MetaPointer,
        index: usize,
        deleted_child: NodeRef,
    },
    ChildReplaced {
        parent: NodeRef,
        containment: MetaPointer,
        index: usize,
        replaced_child: NodeRef,
        new_child: NodeRef,
    },
    ChildMovedFromOtherContainment {
        old_parent: NodeRef,
        old_containment: MetaPointer,
        old_index: usize,
        new_parent: NodeRef,
        new_containment: MetaPointer,
        new_index: usize,
        moved_child: NodeRef,
    },
    ChildMovedFromOtherContainmentInSameParent {
        parent: NodeRef,
        old_containment: MetaPointer,
        old_index: usize,
        new_containment: MetaPointer,
        new_index: usize,
        moved_child: NodeRef,
    },
    ChildMovedInSameContainment {
        parent: NodeRef,
        containment: MetaPointer,
        old_index: usize,
        new_index: usize,
        moved_child: NodeRef,
    },
    ChildMovedAndReplacedFromOtherContainment {
        old_parent: NodeRef,
        old_containment: MetaPointer,
        old_index: usize,
        new_parent: NodeRef,
        new_containment: MetaPointer,
        new_index: usize,
        moved_child: NodeRef,
        replaced_child: NodeRef,
    },
    ChildMovedAndReplacedFromOtherContainmentInSameParent {
        parent: NodeRef,
        old_containment: MetaPointer,
        old_index: usize,
        new_containment: MetaPointer,
        new_index: usize,
        moved_child: NodeRef,
        replaced_child: NodeRef,
    },
    ChildMovedAndReplacedInSameContainment {
        parent: NodeRef,
        containment: MetaPointer,
        old_index: usize,
        new_index: usize,
        moved_child: NodeRef,
        replaced_child: NodeRef,
    },

    AnnotationAdded {
        parent: NodeRef,
        index: usize,
        new_annotation: NodeRef,
    },
    AnnotationDeleted {
        parent: NodeRef,
        index: usize,
        deleted_annotation: NodeRef,
    },
    AnnotationReplaced {
        parent: NodeRef,
        index: usize,
        replaced_annotation: NodeRef,
        new_annotation: NodeRef,
    },
    AnnotationMovedFromOtherParent {
        old_parent: NodeRef,
        old_index: usize,
        new_parent: NodeRef,
        new_index: usize,
        moved_annotation: NodeRef,
    },
    AnnotationMovedInSameParent {
        parent: NodeRef,
        old_index: usize,
        new_index: usize,
        moved_annotation: NodeRef,
    },
    AnnotationMovedAndReplacedFromOtherParent {
        old_parent: NodeRef,
        old_index: usize,
        new_parent: NodeRef,
        new_index: usize,
        moved_annotation: NodeRef,
        replaced_annotation: NodeRef,
    },
    AnnotationMovedAndReplacedInSameParent {
        parent: NodeRef,
        old_index: usize,
        new_index: usize,
        moved_annotation: NodeRef,
        replaced_annotation: NodeRef,
    },

    ReferenceAdded {
        parent: NodeRef,
        reference: MetaPointer,
        index: usize,
        new_target: ReferenceValue,
    },
    ReferenceDeleted {
        parent: NodeRef,
        reference: MetaPointer,
        index: usize,
        deleted_target: ReferenceValue,
    },
    ReferenceChanged {
        parent: NodeRef,
        reference: MetaPointer,
        index: usize,
        new_target: ReferenceValue,
        old_target: ReferenceValue,
    },
    ReferenceMoved {
        old_parent: NodeRef,
        old_reference: MetaPointer,
        old_index: usize,
        new_parent: NodeRef,
        new_reference: MetaPointer,
        new_index: usize,
        target: ReferenceValue,
    },
    ReferenceMovedInSameReference {
        parent: NodeRef,
        reference: MetaPointer,
        old_index: usize,
        new_index: usize,
        target: ReferenceValue,
    },

    /// Sub-deltas applied atomically, in order.
    Composite {
        parts: Vec<Delta>,
    },
    NoOp,
}

impl Delta {
    /// Wrap several deltas; a single part is returned unwrapped and an empty
    /// list becomes [`Delta::NoOp`].
    pub fn composite(mut parts: Vec<Delta>) -> Delta {
        match parts.len() {
            0 => Delta::NoOp,
            1 => parts.remove(0),
            _ => Delta::Composite { parts },
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, Delta::NoOp)
    }

    /// Name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Delta::PartitionAdded { .. } => "PartitionAdded",
            Delta::PartitionDeleted { .. } => "PartitionDeleted",
            Delta::PropertyAdded { .. } => "PropertyAdded",
            Delta::PropertyDeleted { .. } => "PropertyDeleted",
            Delta::PropertyChanged { .. } => "PropertyChanged",
            Delta::ChildAdded { .. } => "ChildAdded",
            Delta::ChildDeleted { .. } => "ChildDeleted",
            Delta::ChildReplaced { .. } => "ChildReplaced",
            Delta::ChildMovedFromOtherContainment { .. } => "ChildMovedFromOtherContainment",
            Delta::ChildMovedFromOtherContainmentInSameParent { .. } => {
                "ChildMovedFromOtherContainmentInSameParent"
            }
            Delta::ChildMovedInSameContainment { .. } => "ChildMovedInSameContainment",
            Delta::ChildMovedAndReplacedFromOtherContainment { .. } => {
                "ChildMovedAndReplacedFromOtherContainment"
            }
            Delta::ChildMovedAndReplacedFromOtherContainmentInSameParent { .. } => {
                "ChildMovedAndReplacedFromOtherContainmentInSameParent"
            }
            Delta::ChildMovedAndReplacedInSameContainment { .. } => {
                "ChildMovedAndReplacedInSameContainment"
            }
            Delta::AnnotationAdded { .. } => "AnnotationAdded",
            Delta::AnnotationDeleted { .. } => "AnnotationDeleted",
            Delta::AnnotationReplaced { .. } => "AnnotationReplaced",
            Delta::AnnotationMovedFromOtherParent { .. } => "AnnotationMovedFromOtherParent",
            Delta::AnnotationMovedInSameParent { .. } => "AnnotationMovedInSameParent",
            Delta::AnnotationMovedAndReplacedFromOtherParent { .. } => {
                "AnnotationMovedAndReplacedFromOtherParent"
            }
            Delta::AnnotationMovedAndReplacedInSameParent { .. } => {
                "AnnotationMovedAndReplacedInSameParent"
            }
            Delta::ReferenceAdded { .. } => "ReferenceAdded",
            Delta::ReferenceDeleted { .. } => "ReferenceDeleted",
            Delta::ReferenceChanged { .. } => "ReferenceChanged",
            Delta::ReferenceMoved { .. } => "ReferenceMoved",
            Delta::ReferenceMovedInSameReference { .. } => "ReferenceMovedInSameReference",
            Delta::Composite { .. } => "Composite",
            Delta::NoOp => "NoOp",
        }
    }

    /// Nodes that become visible in the tree through this delta: new
    /// partitions, added children and annotations, and replacements.
    pub fn introduced_nodes(&self) -> Vec<&NodeRef> {
        match self {
            Delta::PartitionAdded { partition } => vec![partition],
            Delta::ChildAdded { new_child, .. } | Delta::ChildReplaced { new_child, .. } => {
                vec![new_child]
            }
            Delta::AnnotationAdded { new_annotation, .. }
            | Delta::AnnotationReplaced { new_annotation, .. } => vec![new_annotation],
            Delta::Composite { parts } => parts.iter().flat_map(|p| p.introduced_nodes()).collect(),
            _ => Vec::new(),
        }
    }

    /// Nodes that leave the tree through this delta.
    pub fn removed_nodes(&self) -> Vec<&NodeRef> {
        match self {
            Delta::PartitionDeleted { partition } => vec![partition],
            Delta::ChildDeleted { deleted_child, .. } => vec![deleted_child],
            Delta::ChildReplaced { replaced_child, .. }
            | Delta::ChildMovedAndReplacedFromOtherContainment { replaced_child, .. }
            | Delta::ChildMovedAndReplacedFromOtherContainmentInSameParent {
                replaced_child, ..
            }
            | Delta::ChildMovedAndReplacedInSameContainment { replaced_child, .. } => {
                vec![replaced_child]
            }
            Delta::AnnotationDeleted {
                deleted_annotation, ..
            } => vec![deleted_annotation],
            Delta::AnnotationReplaced {
                replaced_annotation,
                ..
            }
            | Delta::AnnotationMovedAndReplacedFromOtherParent {
                replaced_annotation,
                ..
            }
            | Delta::AnnotationMovedAndReplacedInSameParent {
                replaced_annotation,
                ..
            } => vec![replaced_annotation],
            Delta::Composite { parts } => parts.iter().flat_map(|p| p.removed_nodes()).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_ref(key: usize, id: &str) -> NodeRef {
        NodeRef {
            key: NodeKey(key),
            id: NodeId::new(id),
            classifier: MetaPointer::new("l", "1", "C"),
        }
    }

    #[test]
    fn test_node_ref_equality_ignores_key() {
        assert_eq!(node_ref(1, "a"), node_ref(7, "a"));
        assert_ne!(node_ref(1, "a"), node_ref(1, "b"));
    }

    #[test]
    fn test_composite_collapses() {
        assert!(Delta::composite(Vec::new()).is_no_op());

        let single = Delta::PartitionAdded {
            partition: node_ref(0, "p"),
        };
        assert_eq!(Delta::composite(vec![single.clone()]), single);

        let both = Delta::composite(vec![single.clone(), single]);
        assert_eq!(both.kind(), "Composite");
        assert_eq!(both.introduced_nodes().len(), 2);
    }

    #[test]
    fn test_replacements_report_both_sides() {
        let delta = Delta::ChildReplaced {
            parent: node_ref(0, "p"),
            containment: MetaPointer::new("l", "1", "c"),
            index: 0,
            replaced_child: node_ref(1, "old"),
            new_child: node_ref(2, "new"),
        };
        assert_eq!(delta.introduced_nodes()[0].id, NodeId::new("new"));
        assert_eq!(delta.removed_nodes()[0].id, NodeId::new("old"));
    }
}
