//! Commands and events exchanged with the authority.
//!
//! A participant sends a [`Command`] for every local delta. The authority
//! orders commands, applies them and broadcasts an [`Event`] carrying a
//! sequence number and the ids of the commands it originated from. Both share
//! the [`Change`] payload, one variant per delta kind.

use crate::chunk::{SerializationChunk, SerializedReferenceTarget};
use arbor_core::{MetaPointer, NodeId};
use arbor_delta::{SequenceNumber, Sequenced};
use serde::{Deserialize, Serialize};

pub type CommandId = String;
pub type ParticipationId = String;

/// Free-form annotation on any message, ignored by the core logic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub kind: String,
    pub message: String,
    pub data: Vec<KeyValue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl ProtocolMessage {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            data: Vec::new(),
        }
    }
}

/// One edit on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Change {
    AddPartition {
        new_partition: SerializationChunk,
    },
    DeletePartition {
        deleted_partition: NodeId,
    },

    AddProperty {
        node: NodeId,
        property: MetaPointer,
        new_value: String,
    },
    DeleteProperty {
        node: NodeId,
        property: MetaPointer,
        old_value: String,
    },
    ChangeProperty {
        node: NodeId,
        property: MetaPointer,
        new_value: String,
        old_value: String,
    },

    AddChild {
        parent: NodeId,
        new_child: SerializationChunk,
        containment: MetaPointer,
        index: usize,
    },
    DeleteChild {
        parent: NodeId,
        containment: MetaPointer,
        index: usize,
        deleted_child: NodeId,
    },
    ReplaceChild {
        new_child: SerializationChunk,
        parent: NodeId,
        containment: MetaPointer,
        index: usize,
        replaced_child: NodeId,
    },
    MoveChildFromOtherContainment {
        new_parent: NodeId,
        new_containment: MetaPointer,
        new_index: usize,
        moved_child: NodeId,
        old_parent: NodeId,
        old_containment: MetaPointer,
        old_index: usize,
    },
    MoveChildFromOtherContainmentInSameParent {
        new_containment: MetaPointer,
        new_index: usize,
        moved_child: NodeId,
        parent: NodeId,
        old_containment: MetaPointer,
        old_index: usize,
    },
    MoveChildInSameContainment {
        new_index: usize,
        moved_child: NodeId,
        parent: NodeId,
        containment: MetaPointer,
        old_index: usize,
    },
    MoveAndReplaceChildFromOtherContainment {
        new_parent: NodeId,
        new_containment: MetaPointer,
        new_index: usize,
        replaced_child: NodeId,
        moved_child: NodeId,
        old_parent: NodeId,
        old_containment: MetaPointer,
        old_index: usize,
    },
    MoveAndReplaceChildFromOtherContainmentInSameParent {
        new_containment: MetaPointer,
        new_index: usize,
        replaced_child: NodeId,
        moved_child: NodeId,
        parent: NodeId,
        old_containment: MetaPointer,
        old_index: usize,
    },
    MoveAndReplaceChildInSameContainment {
        new_index: usize,
        replaced_child: NodeId,
        moved_child: NodeId,
        parent: NodeId,
        containment: MetaPointer,
        old_index: usize,
    },

    AddAnnotation {
        parent: NodeId,
        new_annotation: SerializationChunk,
        index: usize,
    },
    DeleteAnnotation {
        parent: NodeId,
        index: usize,
        deleted_annotation: NodeId,
    },
    ReplaceAnnotation {
        new_annotation: SerializationChunk,
        parent: NodeId,
        index: usize,
        replaced_annotation: NodeId,
    },
    MoveAnnotationFromOtherParent {
        new_parent: NodeId,
        new_index: usize,
        moved_annotation: NodeId,
        old_parent: NodeId,
        old_index: usize,
    },
    MoveAnnotationInSameParent {
        new_index: usize,
        moved_annotation: NodeId,
        parent: NodeId,
        old_index: usize,
    },
    MoveAndReplaceAnnotationFromOtherParent {
        new_parent: NodeId,
        new_index: usize,
        replaced_annotation: NodeId,
        moved_annotation: NodeId,
        old_parent: NodeId,
        old_index: usize,
    },
    MoveAndReplaceAnnotationInSameParent {
        new_index: usize,
        replaced_annotation: NodeId,
        moved_annotation: NodeId,
        parent: NodeId,
        old_index: usize,
    },

    AddReference {
        parent: NodeId,
        reference: MetaPointer,
        index: usize,
        new_target: SerializedReferenceTarget,
    },
    DeleteReference {
        parent: NodeId,
        reference: MetaPointer,
        index: usize,
        deleted_target: SerializedReferenceTarget,
    },
    ChangeReference {
        parent: NodeId,
        reference: MetaPointer,
        index: usize,
        old_target: SerializedReferenceTarget,
        new_target: SerializedReferenceTarget,
    },
    MoveEntryFromOtherReference {
        new_parent: NodeId,
        new_reference: MetaPointer,
        new_index: usize,
        old_parent: NodeId,
        old_reference: MetaPointer,
        old_index: usize,
        moved_target: SerializedReferenceTarget,
    },
    MoveEntryInSameReference {
        parent: NodeId,
        reference: MetaPointer,
        old_index: usize,
        new_index: usize,
        moved_target: SerializedReferenceTarget,
    },
}

impl Change {
    /// Node whose subtree leaves the tree through this change, if any.
    pub fn deleted_node(&self) -> Option<&NodeId> {
        match self {
            Change::DeletePartition { deleted_partition } => Some(deleted_partition),
            Change::DeleteChild { deleted_child, .. } => Some(deleted_child),
            Change::DeleteAnnotation {
                deleted_annotation, ..
            } => Some(deleted_annotation),
            Change::ReplaceChild { replaced_child, .. }
            | Change::MoveAndReplaceChildFromOtherContainment { replaced_child, .. }
            | Change::MoveAndReplaceChildFromOtherContainmentInSameParent {
                replaced_child, ..
            }
            | Change::MoveAndReplaceChildInSameContainment { replaced_child, .. } => Some(replaced_child),
            Change::ReplaceAnnotation {
                replaced_annotation,
                ..
            }
            | Change::MoveAndReplaceAnnotationFromOtherParent {
                replaced_annotation,
                ..
            }
            | Change::MoveAndReplaceAnnotationInSameParent {
                replaced_annotation,
                ..
            } => Some(replaced_annotation),
            _ => None,
        }
    }
}

/// A request to change the authority's model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageKind", rename_all_fields = "camelCase")]
pub enum Command {
    Change {
        command_id: CommandId,
        change: Change,
        protocol_messages: Vec<ProtocolMessage>,
    },
    /// Parts are applied atomically, in order.
    Composite {
        command_id: CommandId,
        parts: Vec<Command>,
        protocol_messages: Vec<ProtocolMessage>,
    },
}

impl Command {
    pub fn command_id(&self) -> &str {
        match self {
            Command::Change { command_id, .. } | Command::Composite { command_id, .. } => command_id,
        }
    }

    /// Number of elementary changes, counting composite parts recursively.
    pub fn change_count(&self) -> usize {
        match self {
            Command::Change { .. } => 1,
            Command::Composite { parts, .. } => parts.iter().map(Command::change_count).sum(),
        }
    }
}

/// Identifies a command that caused an event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSource {
    pub participation_id: ParticipationId,
    pub command_id: CommandId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageKind", rename_all_fields = "camelCase")]
pub enum EventPayload {
    Change {
        change: Change,
        /// Ids of every node transitively beneath the deleted or replaced node.
        deleted_descendants: Vec<NodeId>,
    },
    Composite {
        parts: Vec<EventPayload>,
    },
    /// A command could not be applied by the authority.
    Error {
        error_code: String,
        message: String,
    },
}

/// A sequenced notification broadcast by the authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub sequence_number: SequenceNumber,
    pub originating_commands: Vec<CommandSource>,
    pub payload: EventPayload,
    pub protocol_messages: Vec<ProtocolMessage>,
}

impl Sequenced for Event {
    fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }
}

impl Event {
    /// All ids of nodes this event removes from the tree, including the
    /// removed nodes themselves.
    pub fn deleted_ids(&self) -> Vec<NodeId> {
        fn collect(payload: &EventPayload, out: &mut Vec<NodeId>) {
            match payload {
                EventPayload::Change {
                    change,
                    deleted_descendants,
                } => {
                    out.extend(change.deleted_node().cloned());
                    out.extend(deleted_descendants.iter().cloned());
                }
                EventPayload::Composite { parts } => {
                    for part in parts {
                        collect(part, out);
                    }
                }
                EventPayload::Error { .. } => {}
            }
        }
        let mut out = Vec::new();
        collect(&self.payload, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_shape() {
        let command = Command::Change {
            command_id: "c-1".to_string(),
            change: Change::DeleteChild {
                parent: NodeId::new("p"),
                containment: MetaPointer::new("l", "1", "kids"),
                index: 2,
                deleted_child: NodeId::new("k"),
            },
            protocol_messages: vec![ProtocolMessage::new("note", "hello")],
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["messageKind"], "Change");
        assert_eq!(json["commandId"], "c-1");
        assert_eq!(json["change"]["kind"], "DeleteChild");
        assert_eq!(json["change"]["deletedChild"], "k");

        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back, command);
    }

    #[test]
    fn test_deleted_ids_cover_composites() {
        let event = Event {
            sequence_number: 4,
            originating_commands: Vec::new(),
            payload: EventPayload::Composite {
                parts: vec![
                    EventPayload::Change {
                        change: Change::DeletePartition {
                            deleted_partition: NodeId::new("p"),
                        },
                        deleted_descendants: vec![NodeId::new("p1"), NodeId::new("p2")],
                    },
                    EventPayload::Error {
                        error_code: "x".to_string(),
                        message: "y".to_string(),
                    },
                ],
            },
            protocol_messages: Vec::new(),
        };
        assert_eq!(
            event.deleted_ids(),
            vec![NodeId::new("p"), NodeId::new("p1"), NodeId::new("p2")]
        );
        assert_eq!(event.sequence_number(), 4);
    }
}
