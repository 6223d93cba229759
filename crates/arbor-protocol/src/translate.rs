//! Translation between deltas and wire messages.
//!
//! ```text
//! participant                       authority                      participant
//!   Delta --delta_to_command--> Command --command_as_event--> Event --event_to_delta--> Delta
//! ```
//!
//! Outgoing translation reads introduced subtrees from the forest that emitted
//! the delta, so it must run while the forest still holds the state right after
//! the edit (see [`arbor_core::DeltaObserver`]). Incoming translation resolves
//! node ids through an [`IdMapping`] and materializes embedded chunks as fresh
//! nodes, yielding a delta that can be applied directly by key.

use crate::chunk::{deserialize_subtree, serialize_subtree, SerializationChunk};
use crate::error::{Result, TranslationError};
use crate::messages::{Change, Command, CommandSource, Event, EventPayload};
use arbor_core::{Delta, Forest, MetaPointer, NodeId, NodeRef, PropertyValue};
use arbor_delta::{IdMapping, SequenceNumber};

/// Translate a local delta into the command announcing it.
///
/// Returns `None` for deltas without observable effect. Parts of a composite
/// get ids derived from `command_id` (`"{command_id}.1"`, `"{command_id}.2"`, ...).
pub fn delta_to_command(forest: &Forest, delta: &Delta, command_id: &str) -> Result<Option<Command>> {
    match delta {
        Delta::NoOp => Ok(None),
        Delta::Composite { parts } => {
            let mut commands = Vec::with_capacity(parts.len());
            for part in parts {
                let part_id = format!("{}.{}", command_id, commands.len() + 1);
                if let Some(command) = delta_to_command(forest, part, &part_id)? {
                    commands.push(command);
                }
            }
            if commands.is_empty() {
                return Ok(None);
            }
            Ok(Some(Command::Composite {
                command_id: command_id.to_string(),
                parts: commands,
                protocol_messages: Vec::new(),
            }))
        }
        other => Ok(Some(Command::Change {
            command_id: command_id.to_string(),
            change: delta_to_change(forest, other)?,
            protocol_messages: Vec::new(),
        })),
    }
}

fn chunk_of(forest: &Forest, node: &NodeRef) -> Result<SerializationChunk> {
    serialize_subtree(forest, node.key)
}

fn id(node: &NodeRef) -> NodeId {
    node.id.clone()
}

fn delta_to_change(forest: &Forest, delta: &Delta) -> Result<Change> {
    let change = match delta {
        Delta::PartitionAdded { partition } => Change::AddPartition {
            new_partition: chunk_of(forest, partition)?,
        },
        Delta::PartitionDeleted { partition } => Change::DeletePartition {
            deleted_partition: id(partition),
        },

        Delta::PropertyAdded { node, property, value } => Change::AddProperty {
            node: id(node),
            property: property.clone(),
            new_value: value.to_wire(),
        },
        Delta::PropertyDeleted {
            node,
            property,
            old_value,
        } => Change::DeleteProperty {
            node: id(node),
            property: property.clone(),
            old_value: old_value.to_wire(),
        },
        Delta::PropertyChanged {
            node,
            property,
            old_value,
            new_value,
        } => Change::ChangeProperty {
            node: id(node),
            property: property.clone(),
            new_value: new_value.to_wire(),
            old_value: old_value.to_wire(),
        },

        Delta::ChildAdded {
            parent,
            containment,
            index,
            new_child,
        } => Change::AddChild {
            parent: id(parent),
            new_child: chunk_of(forest, new_child)?,
            containment: containment.clone(),
            index: *index,
        },
        Delta::ChildDeleted {
            parent,
            containment,
            index,
            deleted_child,
        } => Change::DeleteChild {
            parent: id(parent),
            containment: containment.clone(),
            index: *index,
            deleted_child: id(deleted_child),
        },
        Delta::ChildReplaced {
            parent,
            containment,
            index,
            replaced_child,
            new_child,
        } => Change::ReplaceChild {
            new_child: chunk_of(forest, new_child)?,
            parent: id(parent),
            containment: containment.clone(),
            index: *index,
            replaced_child: id(replaced_child),
        },
        Delta::ChildMovedFromOtherContainment {
            old_parent,
            old_containment,
            old_index,
            new_parent,
            new_containment,
            new_index,
            moved_child,
        } => Change::MoveChildFromOtherContainment {
            new_parent: id(new_parent),
            new_containment: new_containment.clone(),
            new_index: *new_index,
            moved_child: id(moved_child),
            old_parent: id(old_parent),
            old_containment: old_containment.clone(),
            old_index: *old_index,
        },
        Delta::ChildMovedFromOtherContainmentInSameParent {
            parent,
            old_containment,
            old_index,
            new_containment,
            new_index,
            moved_child,
        } => Change::MoveChildFromOtherContainmentInSameParent {
            new_containment: new_containment.clone(),
            new_index: *new_index,
            moved_child: id(moved_child),
            parent: id(parent),
            old_containment: old_containment.clone(),
            old_index: *old_index,
        },
        Delta::ChildMovedInSameContainment {
            parent,
            containment,
            old_index,
            new_index,
            moved_child,
        } => Change::MoveChildInSameContainment {
            new_index: *new_index,
            moved_child: id(moved_child),
            parent: id(parent),
            containment: containment.clone(),
            old_index: *old_index,
        },
        Delta::ChildMovedAndReplacedFromOtherContainment {
            old_parent,
            old_containment,
            old_index,
            new_parent,
            new_containment,
            new_index,
            moved_child,
            replaced_child,
        } => Change::MoveAndReplaceChildFromOtherContainment {
            new_parent: id(new_parent),
            new_containment: new_containment.clone(),
            new_index: *new_index,
            replaced_child: id(replaced_child),
            moved_child: id(moved_child),
            old_parent: id(old_parent),
            old_containment: old_containment.clone(),
            old_index: *old_index,
        },
        Delta::ChildMovedAndReplacedFromOtherContainmentInSameParent {
            parent,
            old_containment,
            old_index,
            new_containment,
            new_index,
            moved_child,
            replaced_child,
        } => Change::MoveAndReplaceChildFromOtherContainmentInSameParent {
            new_containment: new_containment.clone(),
            new_index: *new_index,
            replaced_child: id(replaced_child),
            moved_child: id(moved_child),
            parent: id(parent),
            old_containment: old_containment.clone(),
            old_index: *old_index,
        },
        Delta::ChildMovedAndReplacedInSameContainment {
            parent,
            containment,
            old_index,
            new_index,
            moved_child,
            replaced_child,
        } => Change::MoveAndReplaceChildInSameContainment {
            new_index: *new_index,
            replaced_child: id(replaced_child),
            moved_child: id(moved_child),
            parent: id(parent),
            containment: containment.clone(),
            old_index: *old_index,
        },

        Delta::AnnotationAdded {
            parent,
            index,
            new_annotation,
        } => Change::AddAnnotation {
            parent: id(parent),
            new_annotation: chunk_of(forest, new_annotation)?,
            index: *index,
        },
        Delta::AnnotationDeleted {
            parent,
            index,
            deleted_annotation,
        } => Change::DeleteAnnotation {
            parent: id(parent),
            index: *index,
            deleted_annotation: id(deleted_annotation),
        },
        Delta::AnnotationReplaced {
            parent,
            index,
            replaced_annotation,
            new_annotation,
        } => Change::ReplaceAnnotation {
            new_annotation: chunk_of(forest, new_annotation)?,
            parent: id(parent),
            index: *index,
            replaced_annotation: id(replaced_annotation),
        },
        Delta::AnnotationMovedFromOtherParent {
            old_parent,
            old_index,
            new_parent,
            new_index,
            moved_annotation,
        } => Change::MoveAnnotationFromOtherParent {
            new_parent: id(new_parent),
            new_index: *new_index,
            moved_annotation: id(moved_annotation),
            old_parent: id(old_parent),
            old_index: *old_index,
        },
        Delta::AnnotationMovedInSameParent {
            parent,
            old_index,
            new_index,
            moved_annotation,
        } => Change::MoveAnnotationInSameParent {
            new_index: *new_index,
            moved_annotation: id(moved_annotation),
            parent: id(parent),
            old_index: *old_index,
        },
        Delta::AnnotationMovedAndReplacedFromOtherParent {
            old_parent,
            old_index,
            new_parent,
            new_index,
            moved_annotation,
            replaced_annotation,
        } => Change::MoveAndReplaceAnnotationFromOtherParent {
            new_parent: id(new_parent),
            new_index: *new_index,
            replaced_annotation: id(replaced_annotation),
            moved_annotation: id(moved_annotation),
            old_parent: id(old_parent),
            old_index: *old_index,
        },
        Delta::AnnotationMovedAndReplacedInSameParent {
            parent,
            old_index,
            new_index,
            moved_annotation,
            replaced_annotation,
        } => Change::MoveAndReplaceAnnotationInSameParent {
            new_index: *new_index,
            replaced_annotation: id(replaced_annotation),
            moved_annotation: id(moved_annotation),
            parent: id(parent),
            old_index: *old_index,
        },

        Delta::ReferenceAdded {
            parent,
            reference,
            index,
            new_target,
        } => Change::AddReference {
            parent: id(parent),
            reference: reference.clone(),
            index: *index,
            new_target: new_target.clone().into(),
        },
        Delta::ReferenceDeleted {
            parent,
            reference,
            index,
            deleted_target,
        } => Change::DeleteReference {
            parent: id(parent),
            reference: reference.clone(),
            index: *index,
            deleted_target: deleted_target.clone().into(),
        },
        Delta::ReferenceChanged {
            parent,
            reference,
            index,
            new_target,
            old_target,
        } => Change::ChangeReference {
            parent: id(parent),
            reference: reference.clone(),
            index: *index,
            old_target: old_target.clone().into(),
            new_target: new_target.clone().into(),
        },
        Delta::ReferenceMoved {
            old_parent,
            old_reference,
            old_index,
            new_parent,
            new_reference,
            new_index,
            target,
        } => Change::MoveEntryFromOtherReference {
            new_parent: id(new_parent),
            new_reference: new_reference.clone(),
            new_index: *new_index,
            old_parent: id(old_parent),
            old_reference: old_reference.clone(),
            old_index: *old_index,
            moved_target: target.clone().into(),
        },
        Delta::ReferenceMovedInSameReference {
            parent,
            reference,
            old_index,
            new_index,
            target,
        } => Change::MoveEntryInSameReference {
            parent: id(parent),
            reference: reference.clone(),
            old_index: *old_index,
            new_index: *new_index,
            moved_target: target.clone().into(),
        },

        Delta::Composite { .. } | Delta::NoOp => return Err(TranslationError::Untranslatable(delta.kind())),
    };
    Ok(change)
}

/// Answers which nodes lie beneath a node that is about to be deleted.
pub trait DescendantLookup {
    /// Ids of every node transitively beneath `id`, excluding `id` itself.
    fn deleted_descendants(&self, id: &NodeId) -> Vec<NodeId>;
}

/// No knowledge of descendants.
impl DescendantLookup for () {
    fn deleted_descendants(&self, _id: &NodeId) -> Vec<NodeId> {
        Vec::new()
    }
}

/// Descendants as found in a forest, with ids resolved through a mapping.
pub struct ForestDescendants<'a> {
    pub forest: &'a Forest,
    pub mapping: &'a IdMapping,
}

impl DescendantLookup for ForestDescendants<'_> {
    fn deleted_descendants(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(key) = self.mapping.try_from_id(id) else {
            return Vec::new();
        };
        self.forest
            .descendants(key)
            .unwrap_or_default()
            .into_iter()
            .skip(1)
            .filter_map(|k| self.forest.id_of(k).ok().cloned())
            .collect()
    }
}

/// Wrap a command into the event the authority broadcasts for it.
///
/// Deleted descendants must be looked up before the command is applied.
pub fn command_as_event(
    command: &Command,
    sequence_number: SequenceNumber,
    participation_id: &str,
    lookup: &impl DescendantLookup,
) -> Event {
    let protocol_messages = match command {
        Command::Change {
            protocol_messages, ..
        }
        | Command::Composite {
            protocol_messages, ..
        } => protocol_messages.clone(),
    };
    Event {
        sequence_number,
        originating_commands: vec![CommandSource {
            participation_id: participation_id.to_string(),
            command_id: command.command_id().to_string(),
        }],
        payload: payload_of(command, lookup),
        protocol_messages,
    }
}

fn payload_of(command: &Command, lookup: &impl DescendantLookup) -> EventPayload {
    match command {
        Command::Change { change, .. } => EventPayload::Change {
            deleted_descendants: change
                .deleted_node()
                .map(|id| lookup.deleted_descendants(id))
                .unwrap_or_default(),
            change: change.clone(),
        },
        Command::Composite { parts, .. } => EventPayload::Composite {
            parts: parts.iter().map(|p| payload_of(p, lookup)).collect(),
        },
    }
}

/// Translate a received event into a delta against `forest`.
///
/// Node ids are resolved through `mapping`. Nodes introduced by the event are
/// created in `forest` (free-standing) and registered in `mapping`; applying
/// the returned delta attaches them. Error payloads become [`Delta::NoOp`].
///
/// On failure neither `forest` nor `mapping` keeps anything of the event.
pub fn event_to_delta(event: &Event, forest: &mut Forest, mapping: &mut IdMapping) -> Result<Delta> {
    let base = forest.len();
    let mut staged = IdMapping::new();
    let result = stage_event(event, forest, mapping, &mut staged);
    settle(result, forest, mapping, staged, base)
}

/// Translate a bare change, as the authority does for incoming commands.
pub fn change_to_delta(change: &Change, forest: &mut Forest, mapping: &mut IdMapping) -> Result<Delta> {
    let base = forest.len();
    let mut staged = IdMapping::new();
    let result = Resolver {
        forest: &mut *forest,
        mapping: &*mapping,
        staged: &mut staged,
    }
    .change(change);
    settle(result, forest, mapping, staged, base)
}

/// Translate an event without touching `mapping`.
///
/// Introduced nodes are registered in `staged` only. Whatever the outcome,
/// the nodes created in `forest` are the ones past its length before the
/// call; a caller that gives up on the event drops them with
/// [`Forest::discard_from`].
pub fn stage_event(
    event: &Event,
    forest: &mut Forest,
    mapping: &IdMapping,
    staged: &mut IdMapping,
) -> Result<Delta> {
    Resolver {
        forest,
        mapping,
        staged,
    }
    .payload(&event.payload)
}

fn settle(
    result: Result<Delta>,
    forest: &mut Forest,
    mapping: &mut IdMapping,
    staged: IdMapping,
    base: usize,
) -> Result<Delta> {
    match result {
        Ok(delta) => {
            mapping.merge(staged);
            Ok(delta)
        }
        Err(err) => {
            forest.discard_from(base)?;
            Err(err)
        }
    }
}

struct Resolver<'a> {
    forest: &'a mut Forest,
    mapping: &'a IdMapping,
    staged: &'a mut IdMapping,
}

impl Resolver<'_> {
    fn payload(&mut self, payload: &EventPayload) -> Result<Delta> {
        match payload {
            EventPayload::Change { change, .. } => self.change(change),
            EventPayload::Composite { parts } => Ok(Delta::Composite {
                parts: parts.iter().map(|p| self.payload(p)).collect::<Result<_>>()?,
            }),
            EventPayload::Error { error_code, message } => {
                tracing::debug!(error_code = %error_code, message = %message, "error event ignored");
                Ok(Delta::NoOp)
            }
        }
    }

    fn node(&self, id: &NodeId) -> Result<NodeRef> {
        let key = self
            .staged
            .try_from_id(id)
            .or_else(|| self.mapping.try_from_id(id))
            .ok_or_else(|| TranslationError::UnknownNode(id.clone()))?;
        Ok(self.forest.node_ref(key)?)
    }

    fn introduce(&mut self, chunk: &SerializationChunk) -> Result<NodeRef> {
        let key = deserialize_subtree(chunk, self.forest, self.staged)?;
        Ok(self.forest.node_ref(key)?)
    }

    fn value(&self, node: &NodeRef, property: &MetaPointer, raw: &str) -> Result<PropertyValue> {
        let (_, feature) = self.forest.feature_by_pointer(node.key, property, "property")?;
        let ty = feature.property_type().ok_or_else(|| {
            TranslationError::MalformedChange(format!("{} has no property type", feature.name))
        })?;
        Ok(PropertyValue::from_wire(ty, raw, &feature.name)?)
    }

    fn change(&mut self, change: &Change) -> Result<Delta> {
        let delta = match change {
            Change::AddPartition { new_partition } => Delta::PartitionAdded {
                partition: self.introduce(new_partition)?,
            },
            Change::DeletePartition { deleted_partition } => Delta::PartitionDeleted {
                partition: self.node(deleted_partition)?,
            },

            Change::AddProperty {
                node,
                property,
                new_value,
            } => {
                let node = self.node(node)?;
                Delta::PropertyAdded {
                    value: self.value(&node, property, new_value)?,
                    node,
                    property: property.clone(),
                }
            }
            Change::DeleteProperty {
                node,
                property,
                old_value,
            } => {
                let node = self.node(node)?;
                Delta::PropertyDeleted {
                    old_value: self.value(&node, property, old_value)?,
                    node,
                    property: property.clone(),
                }
            }
            Change::ChangeProperty {
                node,
                property,
                new_value,
                old_value,
            } => {
                let node = self.node(node)?;
                Delta::PropertyChanged {
                    old_value: self.value(&node, property, old_value)?,
                    new_value: self.value(&node, property, new_value)?,
                    node,
                    property: property.clone(),
                }
            }

            Change::AddChild {
                parent,
                new_child,
                containment,
                index,
            } => {
                let parent = self.node(parent)?;
                Delta::ChildAdded {
                    parent,
                    containment: containment.clone(),
                    index: *index,
                    new_child: self.introduce(new_child)?,
                }
            }
            Change::DeleteChild {
                parent,
                containment,
                index,
                deleted_child,
            } => Delta::ChildDeleted {
                parent: self.node(parent)?,
                containment: containment.clone(),
                index: *index,
                deleted_child: self.node(deleted_child)?,
            },
            Change::ReplaceChild {
                new_child,
                parent,
                containment,
                index,
                replaced_child,
            } => {
                let parent = self.node(parent)?;
                let replaced_child = self.node(replaced_child)?;
                Delta::ChildReplaced {
                    parent,
                    containment: containment.clone(),
                    index: *index,
                    replaced_child,
                    new_child: self.introduce(new_child)?,
                }
            }
            Change::MoveChildFromOtherContainment {
                new_parent,
                new_containment,
                new_index,
                moved_child,
                old_parent,
                old_containment,
                old_index,
            } => Delta::ChildMovedFromOtherContainment {
                old_parent: self.node(old_parent)?,
                old_containment: old_containment.clone(),
                old_index: *old_index,
                new_parent: self.node(new_parent)?,
                new_containment: new_containment.clone(),
                new_index: *new_index,
                moved_child: self.node(moved_child)?,
            },
            Change::MoveChildFromOtherContainmentInSameParent {
                new_containment,
                new_index,
                moved_child,
                parent,
                old_containment,
                old_index,
            } => Delta::ChildMovedFromOtherContainmentInSameParent {
                parent: self.node(parent)?,
                old_containment: old_containment.clone(),
                old_index: *old_index,
                new_containment: new_containment.clone(),
                new_index: *new_index,
                moved_child: self.node(moved_child)?,
            },
            Change::MoveChildInSameContainment {
                new_index,
                moved_child,
                parent,
                containment,
                old_index,
            } => Delta::ChildMovedInSameContainment {
                parent: self.node(parent)?,
                containment: containment.clone(),
                old_index: *old_index,
                new_index: *new_index,
                moved_child: self.node(moved_child)?,
            },
            Change::MoveAndReplaceChildFromOtherContainment {
                new_parent,
                new_containment,
                new_index,
                replaced_child,
                moved_child,
                old_parent,
                old_containment,
                old_index,
            } => Delta::ChildMovedAndReplacedFromOtherContainment {
                old_parent: self.node(old_parent)?,
                old_containment: old_containment.clone(),
                old_index: *old_index,
                new_parent: self.node(new_parent)?,
                new_containment: new_containment.clone(),
                new_index: *new_index,
                moved_child: self.node(moved_child)?,
                replaced_child: self.node(replaced_child)?,
            },
            Change::MoveAndReplaceChildFromOtherContainmentInSameParent {
                new_containment,
                new_index,
                replaced_child,
                moved_child,
                parent,
                old_containment,
                old_index,
            } => Delta::ChildMovedAndReplacedFromOtherContainmentInSameParent {
                parent: self.node(parent)?,
                old_containment: old_containment.clone(),
                old_index: *old_index,
                new_containment: new_containment.clone(),
                new_index: *new_index,
                moved_child: self.node(moved_child)?,
                replaced_child: self.node(replaced_child)?,
            },
            Change::MoveAndReplaceChildInSameContainment {
                new_index,
                replaced_child,
                moved_child,
                parent,
                containment,
                old_index,
            } => Delta::ChildMovedAndReplacedInSameContainment {
                parent: self.node(parent)?,
                containment: containment.clone(),
                old_index: *old_index,
                new_index: *new_index,
                moved_child: self.node(moved_child)?,
                replaced_child: self.node(replaced_child)?,
            },

            Change::AddAnnotation {
                parent,
                new_annotation,
                index,
            } => {
                let parent = self.node(parent)?;
                Delta::AnnotationAdded {
                    parent,
                    index: *index,
                    new_annotation: self.introduce(new_annotation)?,
                }
            }
            Change::DeleteAnnotation {
                parent,
                index,
                deleted_annotation,
            } => Delta::AnnotationDeleted {
                parent: self.node(parent)?,
                index: *index,
                deleted_annotation: self.node(deleted_annotation)?,
            },
            Change::ReplaceAnnotation {
                new_annotation,
                parent,
                index,
                replaced_annotation,
            } => {
                let parent = self.node(parent)?;
                let replaced_annotation = self.node(replaced_annotation)?;
                Delta::AnnotationReplaced {
                    parent,
                    index: *index,
                    replaced_annotation,
                    new_annotation: self.introduce(new_annotation)?,
                }
            }
            Change::MoveAnnotationFromOtherParent {
                new_parent,
                new_index,
                moved_annotation,
                old_parent,
                old_index,
            } => Delta::AnnotationMovedFromOtherParent {
                old_parent: self.node(old_parent)?,
                old_index: *old_index,
                new_parent: self.node(new_parent)?,
                new_index: *new_index,
                moved_annotation: self.node(moved_annotation)?,
            },
            Change::MoveAnnotationInSameParent {
                new_index,
                moved_annotation,
                parent,
                old_index,
            } => Delta::AnnotationMovedInSameParent {
                parent: self.node(parent)?,
                old_index: *old_index,
                new_index: *new_index,
                moved_annotation: self.node(moved_annotation)?,
            },
            Change::MoveAndReplaceAnnotationFromOtherParent {
                new_parent,
                new_index,
                replaced_annotation,
                moved_annotation,
                old_parent,
                old_index,
            } => Delta::AnnotationMovedAndReplacedFromOtherParent {
                old_parent: self.node(old_parent)?,
                old_index: *old_index,
                new_parent: self.node(new_parent)?,
                new_index: *new_index,
                moved_annotation: self.node(moved_annotation)?,
                replaced_annotation: self.node(replaced_annotation)?,
            },
            Change::MoveAndReplaceAnnotationInSameParent {
                new_index,
                replaced_annotation,
                moved_annotation,
                parent,
                old_index,
            } => Delta::AnnotationMovedAndReplacedInSameParent {
                parent: self.node(parent)?,
                old_index: *old_index,
                new_index: *new_index,
                moved_annotation: self.node(moved_annotation)?,
                replaced_annotation: self.node(replaced_annotation)?,
            },

            Change::AddReference {
                parent,
                reference,
                index,
                new_target,
            } => Delta::ReferenceAdded {
                parent: self.node(parent)?,
                reference: reference.clone(),
                index: *index,
                new_target: new_target.clone().into(),
            },
            Change::DeleteReference {
                parent,
                reference,
                index,
                deleted_target,
            } => Delta::ReferenceDeleted {
                parent: self.node(parent)?,
                reference: reference.clone(),
                index: *index,
                deleted_target: deleted_target.clone().into(),
            },
            Change::ChangeReference {
                parent,
                reference,
                index,
                old_target,
                new_target,
            } => Delta::ReferenceChanged {
                parent: self.node(parent)?,
                reference: reference.clone(),
                index: *index,
                new_target: new_target.clone().into(),
                old_target: old_target.clone().into(),
            },
            Change::MoveEntryFromOtherReference {
                new_parent,
                new_reference,
                new_index,
                old_parent,
                old_reference,
                old_index,
                moved_target,
            } => Delta::ReferenceMoved {
                old_parent: self.node(old_parent)?,
                old_reference: old_reference.clone(),
                old_index: *old_index,
                new_parent: self.node(new_parent)?,
                new_reference: new_reference.clone(),
                new_index: *new_index,
                target: moved_target.clone().into(),
            },
            Change::MoveEntryInSameReference {
                parent,
                reference,
                old_index,
                new_index,
                moved_target,
            } => Delta::ReferenceMovedInSameReference {
                parent: self.node(parent)?,
                reference: reference.clone(),
                old_index: *old_index,
                new_index: *new_index,
                target: moved_target.clone().into(),
            },
        };
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::schema::{Classifier, Feature, Language, PropertyType, SchemaRegistry};
    use std::sync::Arc;

    fn forest() -> (Forest, MetaPointer) {
        let language = Language::builder("t", "1")
            .classifier(
                Classifier::concept("Folder")
                    .partition()
                    .feature(Feature::property("title", PropertyType::String).optional())
                    .feature(Feature::containment("entries", "Folder").optional().multiple()),
            )
            .build()
            .unwrap();
        let folder = language.pointer("Folder");
        let registry = SchemaRegistry::new().with_language(language).unwrap();
        (Forest::new(Arc::new(registry)), folder)
    }

    #[test]
    fn test_composite_parts_get_derived_ids() {
        let (mut forest, folder) = forest();
        let root = forest.create_node(&folder, "root").unwrap();
        forest.add_partition(root).unwrap();
        forest.property(root, "title").unwrap().set_value("a").unwrap();
        forest.property(root, "title").unwrap().set_value("b").unwrap();
        let mut parts = forest.take_deltas();
        parts.insert(1, Delta::NoOp);

        let command = delta_to_command(&forest, &Delta::Composite { parts }, "c7")
            .unwrap()
            .unwrap();
        match &command {
            Command::Composite { command_id, parts, .. } => {
                assert_eq!(command_id, "c7");
                let ids: Vec<_> = parts.iter().map(Command::command_id).collect();
                assert_eq!(ids, vec!["c7.1", "c7.2", "c7.3"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(command.change_count(), 3);
        assert!(delta_to_command(&forest, &Delta::NoOp, "c8").unwrap().is_none());
    }

    #[test]
    fn test_event_lists_deleted_descendants() {
        let (mut forest, folder) = forest();
        let root = forest.create_node(&folder, "root").unwrap();
        let a = forest.create_node(&folder, "a").unwrap();
        let b = forest.create_node(&folder, "b").unwrap();
        forest.containment(a, "entries").unwrap().add(b).unwrap();
        forest.containment(root, "entries").unwrap().add(a).unwrap();
        forest.take_deltas();

        forest.containment(root, "entries").unwrap().remove(a).unwrap();
        let delta = forest.take_deltas().remove(0);
        let command = delta_to_command(&forest, &delta, "c1").unwrap().unwrap();

        // The authority looks descendants up in its own, not yet updated, copy.
        let (mut authority, _) = self::forest();
        let a2 = authority.import_subtree(&forest, a).unwrap();
        let mut authority_mapping = IdMapping::new();
        authority_mapping.reinitialize_with(&authority, &[a2]).unwrap();
        let lookup = ForestDescendants {
            forest: &authority,
            mapping: &authority_mapping,
        };
        let event = command_as_event(&command, 3, "p1", &lookup);
        assert_eq!(event.sequence_number, 3);
        assert_eq!(event.originating_commands[0].command_id, "c1");
        assert_eq!(event.deleted_ids(), vec![NodeId::new("a"), NodeId::new("b")]);

        let bare = command_as_event(&command, 4, "p1", &());
        assert_eq!(bare.deleted_ids(), vec![NodeId::new("a")]);
    }

    #[test]
    fn test_unknown_nodes_are_reported() {
        let (mut forest, _) = forest();
        let mut mapping = IdMapping::new();
        let event = Event {
            sequence_number: 0,
            originating_commands: Vec::new(),
            payload: EventPayload::Change {
                change: Change::DeletePartition {
                    deleted_partition: NodeId::new("nowhere"),
                },
                deleted_descendants: Vec::new(),
            },
            protocol_messages: Vec::new(),
        };
        let err = event_to_delta(&event, &mut forest, &mut mapping).unwrap_err();
        assert!(matches!(err, TranslationError::UnknownNode(id) if id == NodeId::new("nowhere")));
    }

    #[test]
    fn test_failed_event_leaves_no_nodes_behind() {
        let (mut producer, folder) = forest();
        let x = producer.create_node(&folder, "x").unwrap();
        let inner = producer.create_node(&folder, "inner").unwrap();
        producer.containment(x, "entries").unwrap().add(inner).unwrap();
        let add_x = EventPayload::Change {
            change: Change::AddPartition {
                new_partition: serialize_subtree(&producer, x).unwrap(),
            },
            deleted_descendants: Vec::new(),
        };
        let delete_ghost = EventPayload::Change {
            change: Change::DeletePartition {
                deleted_partition: NodeId::new("ghost"),
            },
            deleted_descendants: Vec::new(),
        };
        let event = |parts| Event {
            sequence_number: 0,
            originating_commands: Vec::new(),
            payload: EventPayload::Composite { parts },
            protocol_messages: Vec::new(),
        };

        let (mut forest, _) = forest();
        forest.create_node(&folder, "existing").unwrap();
        let mut mapping = IdMapping::new();
        let err = event_to_delta(&event(vec![add_x.clone(), delete_ghost]), &mut forest, &mut mapping).unwrap_err();
        assert!(matches!(err, TranslationError::UnknownNode(id) if id == NodeId::new("ghost")));
        assert_eq!(forest.len(), 1);
        assert!(mapping.is_empty());

        let mut staged = IdMapping::new();
        let delta = stage_event(&event(vec![add_x]), &mut forest, &mapping, &mut staged).unwrap();
        assert_eq!(delta.kind(), "Composite");
        assert!(mapping.is_empty());
        assert!(staged.contains(&NodeId::new("x")));
        assert!(staged.contains(&NodeId::new("inner")));
        forest.discard_from(1).unwrap();
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn test_error_events_become_no_ops() {
        let (mut forest, _) = forest();
        let mut mapping = IdMapping::new();
        let event = Event {
            sequence_number: 0,
            originating_commands: Vec::new(),
            payload: EventPayload::Error {
                error_code: "rejected".to_string(),
                message: "index out of bounds".to_string(),
            },
            protocol_messages: Vec::new(),
        };
        assert!(event_to_delta(&event, &mut forest, &mut mapping).unwrap().is_no_op());
    }
}
