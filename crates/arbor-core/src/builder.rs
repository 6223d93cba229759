//! Selection of the delta variant for a structural edit.
//!
//! The managers describe an edit by the position a node leaves and the
//! position it lands in; the functions here pick the variant.

use crate::delta::{Delta, NodeRef};
use crate::error::{Error, Result};
use crate::forest::{Forest, Location};
use crate::ids::MetaPointer;
use crate::node::Slot;

/// Which list of the parent a position is in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotRef {
    Containment(MetaPointer),
    Annotation,
}

/// A resolved position, ready to be written into a delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub parent: NodeRef,
    pub slot: SlotRef,
    pub index: usize,
}

impl Position {
    pub fn resolve(forest: &Forest, location: Location) -> Result<Self> {
        let parent = forest.node_ref(location.parent)?;
        let slot = match location.slot {
            Slot::Containment(feature) => {
                SlotRef::Containment(forest.feature_at(location.parent, feature)?.meta_pointer.clone())
            }
            Slot::Annotation => SlotRef::Annotation,
        };
        Ok(Self {
            parent,
            slot,
            index: location.index,
        })
    }

    fn same_parent(&self, other: &Position) -> bool {
        self.parent.key == other.parent.key
    }
}

pub fn added(at: Position, node: NodeRef) -> Delta {
    match at.slot {
        SlotRef::Containment(containment) => Delta::ChildAdded {
            parent: at.parent,
            containment,
            index: at.index,
            new_child: node,
        },
        SlotRef::Annotation => Delta::AnnotationAdded {
            parent: at.parent,
            index: at.index,
            new_annotation: node,
        },
    }
}

pub fn deleted(at: Position, node: NodeRef) -> Delta {
    match at.slot {
        SlotRef::Containment(containment) => Delta::ChildDeleted {
            parent: at.parent,
            containment,
            index: at.index,
            deleted_child: node,
        },
        SlotRef::Annotation => Delta::AnnotationDeleted {
            parent: at.parent,
            index: at.index,
            deleted_annotation: node,
        },
    }
}

pub fn replaced(at: Position, replaced: NodeRef, node: NodeRef) -> Delta {
    match at.slot {
        SlotRef::Containment(containment) => Delta::ChildReplaced {
            parent: at.parent,
            containment,
            index: at.index,
            replaced_child: replaced,
            new_child: node,
        },
        SlotRef::Annotation => Delta::AnnotationReplaced {
            parent: at.parent,
            index: at.index,
            replaced_annotation: replaced,
            new_annotation: node,
        },
    }
}

fn mixed_slots() -> Error {
    Error::IllegalOperation {
        op: "move between a containment and an annotation list",
        feature: "annotations".to_string(),
    }
}

/// Classify a move of `node` from `from` to `to`.
pub fn moved(from: Position, to: Position, node: NodeRef) -> Result<Delta> {
    let same_parent = from.same_parent(&to);
    Ok(match (from.slot, to.slot) {
        (SlotRef::Containment(old), SlotRef::Containment(new)) if same_parent && old == new => {
            Delta::ChildMovedInSameContainment {
                parent: to.parent,
                containment: new,
                old_index: from.index,
                new_index: to.index,
                moved_child: node,
            }
        }
        (SlotRef::Containment(old), SlotRef::Containment(new)) if same_parent => {
            Delta::ChildMovedFromOtherContainmentInSameParent {
                parent: to.parent,
                old_containment: old,
                old_index: from.index,
                new_containment: new,
                new_index: to.index,
                moved_child: node,
            }
        }
        (SlotRef::Containment(old), SlotRef::Containment(new)) => Delta::ChildMovedFromOtherContainment {
            old_parent: from.parent,
            old_containment: old,
            old_index: from.index,
            new_parent: to.parent,
            new_containment: new,
            new_index: to.index,
            moved_child: node,
        },
        (SlotRef::Annotation, SlotRef::Annotation) if same_parent => Delta::AnnotationMovedInSameParent {
            parent: to.parent,
            old_index: from.index,
            new_index: to.index,
            moved_annotation: node,
        },
        (SlotRef::Annotation, SlotRef::Annotation) => Delta::AnnotationMovedFromOtherParent {
            old_parent: from.parent,
            old_index: from.index,
            new_parent: to.parent,
            new_index: to.index,
            moved_annotation: node,
        },
        _ => return Err(mixed_slots()),
    })
}

/// Classify a move of `node` onto the occupied position `to`.
pub fn moved_and_replaced(from: Position, to: Position, node: NodeRef, replaced: NodeRef) -> Result<Delta> {
    let same_parent = from.same_parent(&to);
    Ok(match (from.slot, to.slot) {
        (SlotRef::Containment(old), SlotRef::Containment(new)) if same_parent && old == new => {
            Delta::ChildMovedAndReplacedInSameContainment {
                parent: to.parent,
                containment: new,
                old_index: from.index,
                new_index: to.index,
                moved_child: node,
                replaced_child: replaced,
            }
        }
        (SlotRef::Containment(old), SlotRef::Containment(new)) if same_parent => {
            Delta::ChildMovedAndReplacedFromOtherContainmentInSameParent {
                parent: to.parent,
                old_containment: old,
                old_index: from.index,
                new_containment: new,
                new_index: to.index,
                moved_child: node,
                replaced_child: replaced,
            }
        }
        (SlotRef::Containment(old), SlotRef::Containment(new)) => {
            Delta::ChildMovedAndReplacedFromOtherContainment {
                old_parent: from.parent,
                old_containment: old,
                old_index: from.index,
                new_parent: to.parent,
                new_containment: new,
                new_index: to.index,
                moved_child: node,
                replaced_child: replaced,
            }
        }
        (SlotRef::Annotation, SlotRef::Annotation) if same_parent => {
            Delta::AnnotationMovedAndReplacedInSameParent {
                parent: to.parent,
                old_index: from.index,
                new_index: to.index,
                moved_annotation: node,
                replaced_annotation: replaced,
            }
        }
        (SlotRef::Annotation, SlotRef::Annotation) => Delta::AnnotationMovedAndReplacedFromOtherParent {
            old_parent: from.parent,
            old_index: from.index,
            new_parent: to.parent,
            new_index: to.index,
            moved_annotation: node,
            replaced_annotation: replaced,
        },
        _ => return Err(mixed_slots()),
    })
}
