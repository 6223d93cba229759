//! A participant's replica of the model.
//!
//! Local edits run against the replica's forest. Every delta is translated
//! into a command the moment it is emitted and queued until the client sends
//! it. Events from the authority pass through the ordered acceptor; events
//! echoing this participant's own commands are acknowledged and skipped, all
//! others are translated back into deltas and applied.

use crate::error::{Result, SdkError};
use arbor_core::{Delta, DeltaObserver, Forest, NodeKey, NodeRef, SchemaRegistry};
use arbor_delta::{apply_delta, AcceptOutcome, IdMapping, OrderedEventAcceptor, SequenceNumber};
use arbor_protocol::{
    delta_to_command, deserialize_subtree, stage_event, Command, Event, EventPayload, ParticipationId,
    ParticipationTracker, SerializationChunk,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// Configuration for a replica.
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    /// Name used in logs.
    pub name: String,
    /// Prefix of generated command ids. A ULID when unset.
    pub command_prefix: Option<String>,
    /// First sequence number expected before sign-on tells otherwise.
    pub initial_sequence: SequenceNumber,
    /// Maximum number of early events held back.
    pub max_buffered: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            name: "replica".to_string(),
            command_prefix: None,
            initial_sequence: 0,
            max_buffered: 1024,
        }
    }
}

/// Builder for replica configuration.
pub struct ReplicaConfigBuilder {
    config: ReplicaConfig,
}

impl ReplicaConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ReplicaConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.command_prefix = Some(prefix.into());
        self
    }

    pub fn initial_sequence(mut self, sequence: SequenceNumber) -> Self {
        self.config.initial_sequence = sequence;
        self
    }

    pub fn max_buffered(mut self, max: usize) -> Self {
        self.config.max_buffered = max;
        self
    }

    pub fn build(self) -> ReplicaConfig {
        self.config
    }
}

impl Default for ReplicaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters describing what a replica did with its traffic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReplicaStats {
    pub commands_sent: u64,
    pub events_applied: u64,
    pub own_events: u64,
    pub rejected: u64,
    pub failed: u64,
    pub stale: u64,
    pub duplicates: u64,
}

/// Commands waiting to be sent, shared with the forest's observer.
struct Outgoing {
    tracker: ParticipationTracker,
    commands: Vec<Command>,
    /// Nodes the authority learns about through queued commands.
    introduced: Vec<NodeKey>,
}

struct Outbox(Arc<Mutex<Outgoing>>);

impl DeltaObserver for Outbox {
    fn on_delta(&mut self, forest: &Forest, delta: &Delta) {
        let Some(visible) = project(forest, delta) else {
            tracing::debug!(kind = delta.kind(), "edit outside partitions not sent");
            return;
        };
        let mut outgoing = self.0.lock();
        let command_id = outgoing.tracker.next_command_id();
        match delta_to_command(forest, &visible, &command_id) {
            Ok(Some(command)) => {
                outgoing.tracker.register(command_id);
                outgoing.commands.push(command);
                let introduced: Vec<NodeKey> = visible.introduced_nodes().iter().map(|n| n.key).collect();
                outgoing.introduced.extend(introduced);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(kind = delta.kind(), error = %e, "delta could not be translated"),
        }
    }
}

fn in_partition(forest: &Forest, node: &NodeRef) -> bool {
    forest
        .root_of(node.key)
        .map(|root| forest.is_partition(root))
        .unwrap_or(false)
}

/// The part of `delta` the authority can see.
///
/// Edits inside detached subtrees are invisible. A move out of a detached
/// subtree into a partition is announced as an addition (or replacement), a
/// move the other way as a deletion.
fn project(forest: &Forest, delta: &Delta) -> Option<Delta> {
    let seen = |node: &NodeRef| in_partition(forest, node);
    let keep = |anchor: &NodeRef| seen(anchor).then(|| delta.clone());

    match delta {
        Delta::NoOp => None,
        Delta::PartitionAdded { .. } | Delta::PartitionDeleted { .. } => Some(delta.clone()),
        Delta::Composite { parts } => {
            let parts: Vec<Delta> = parts.iter().filter_map(|p| project(forest, p)).collect();
            (!parts.is_empty()).then_some(Delta::Composite { parts })
        }

        Delta::PropertyAdded { node, .. }
        | Delta::PropertyDeleted { node, .. }
        | Delta::PropertyChanged { node, .. } => keep(node),

        Delta::ChildAdded { parent, .. }
        | Delta::ChildDeleted { parent, .. }
        | Delta::ChildReplaced { parent, .. }
        | Delta::ChildMovedFromOtherContainmentInSameParent { parent, .. }
        | Delta::ChildMovedInSameContainment { parent, .. }
        | Delta::ChildMovedAndReplacedFromOtherContainmentInSameParent { parent, .. }
        | Delta::ChildMovedAndReplacedInSameContainment { parent, .. }
        | Delta::AnnotationAdded { parent, .. }
        | Delta::AnnotationDeleted { parent, .. }
        | Delta::AnnotationReplaced { parent, .. }
        | Delta::AnnotationMovedInSameParent { parent, .. }
        | Delta::AnnotationMovedAndReplacedInSameParent { parent, .. }
        | Delta::ReferenceAdded { parent, .. }
        | Delta::ReferenceDeleted { parent, .. }
        | Delta::ReferenceChanged { parent, .. }
        | Delta::ReferenceMovedInSameReference { parent, .. } => keep(parent),

        Delta::ChildMovedFromOtherContainment {
            old_parent,
            old_containment,
            old_index,
            new_parent,
            new_containment,
            new_index,
            moved_child,
        } => match (seen(old_parent), seen(new_parent)) {
            (true, true) => Some(delta.clone()),
            (false, true) => Some(Delta::ChildAdded {
                parent: new_parent.clone(),
                containment: new_containment.clone(),
                index: *new_index,
                new_child: moved_child.clone(),
            }),
            (true, false) => Some(Delta::ChildDeleted {
                parent: old_parent.clone(),
                containment: old_containment.clone(),
                index: *old_index,
                deleted_child: moved_child.clone(),
            }),
            (false, false) => None,
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
        } => match (seen(old_parent), seen(new_parent)) {
            (true, true) => Some(delta.clone()),
            (false, true) => Some(Delta::ChildReplaced {
                parent: new_parent.clone(),
                containment: new_containment.clone(),
                index: *new_index,
                replaced_child: replaced_child.clone(),
                new_child: moved_child.clone(),
            }),
            (true, false) => Some(Delta::ChildDeleted {
                parent: old_parent.clone(),
                containment: old_containment.clone(),
                index: *old_index,
                deleted_child: moved_child.clone(),
            }),
            (false, false) => None,
        },

        Delta::AnnotationMovedFromOtherParent {
            old_parent,
            old_index,
            new_parent,
            new_index,
            moved_annotation,
        } => match (seen(old_parent), seen(new_parent)) {
            (true, true) => Some(delta.clone()),
            (false, true) => Some(Delta::AnnotationAdded {
                parent: new_parent.clone(),
                index: *new_index,
                new_annotation: moved_annotation.clone(),
            }),
            (true, false) => Some(Delta::AnnotationDeleted {
                parent: old_parent.clone(),
                index: *old_index,
                deleted_annotation: moved_annotation.clone(),
            }),
            (false, false) => None,
        },
        Delta::AnnotationMovedAndReplacedFromOtherParent {
            old_parent,
            old_index,
            new_parent,
            new_index,
            moved_annotation,
            replaced_annotation,
        } => match (seen(old_parent), seen(new_parent)) {
            (true, true) => Some(delta.clone()),
            (false, true) => Some(Delta::AnnotationReplaced {
                parent: new_parent.clone(),
                index: *new_index,
                replaced_annotation: replaced_annotation.clone(),
                new_annotation: moved_annotation.clone(),
            }),
            (true, false) => Some(Delta::AnnotationDeleted {
                parent: old_parent.clone(),
                index: *old_index,
                deleted_annotation: moved_annotation.clone(),
            }),
            (false, false) => None,
        },

        Delta::ReferenceMoved {
            old_parent,
            old_reference,
            old_index,
            new_parent,
            new_reference,
            new_index,
            target,
        } => match (seen(old_parent), seen(new_parent)) {
            (true, true) => Some(delta.clone()),
            (false, true) => Some(Delta::ReferenceAdded {
                parent: new_parent.clone(),
                reference: new_reference.clone(),
                index: *new_index,
                new_target: target.clone(),
            }),
            (true, false) => Some(Delta::ReferenceDeleted {
                parent: old_parent.clone(),
                reference: old_reference.clone(),
                index: *old_index,
                deleted_target: target.clone(),
            }),
            (false, false) => None,
        },
    }
}

/// One participant's local model plus its synchronization state.
pub struct Replica {
    name: String,
    forest: Forest,
    mapping: IdMapping,
    acceptor: OrderedEventAcceptor<Event>,
    outgoing: Arc<Mutex<Outgoing>>,
    stats: ReplicaStats,
}

impl Replica {
    pub fn new(registry: Arc<SchemaRegistry>, config: ReplicaConfig) -> Self {
        let tracker = match config.command_prefix {
            Some(prefix) => ParticipationTracker::new(prefix),
            None => ParticipationTracker::default(),
        };
        let outgoing = Arc::new(Mutex::new(Outgoing {
            tracker,
            commands: Vec::new(),
            introduced: Vec::new(),
        }));
        let mut forest = Forest::new(registry);
        forest.set_observer(Outbox(outgoing.clone()));

        Self {
            name: config.name,
            forest,
            mapping: IdMapping::new(),
            acceptor: OrderedEventAcceptor::new(config.initial_sequence).with_max_buffered(config.max_buffered),
            outgoing,
            stats: ReplicaStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn mapping(&self) -> &IdMapping {
        &self.mapping
    }

    pub fn stats(&self) -> &ReplicaStats {
        &self.stats
    }

    pub fn participation_id(&self) -> Option<ParticipationId> {
        self.outgoing.lock().tracker.participation_id().map(str::to_string)
    }

    /// Next sequence number the replica waits for.
    pub fn expected_sequence(&self) -> SequenceNumber {
        self.acceptor.expected()
    }

    pub fn last_received(&self) -> Option<SequenceNumber> {
        self.acceptor.expected().checked_sub(1)
    }

    pub fn missing_events(&self) -> Vec<SequenceNumber> {
        self.acceptor.missing()
    }

    pub fn pending_commands(&self) -> usize {
        self.outgoing.lock().commands.len()
    }

    pub fn in_flight(&self) -> usize {
        self.outgoing.lock().tracker.in_flight_count()
    }

    /// Adopt the participation granted on sign-on.
    pub fn signed_on(&mut self, participation_id: &str, next_sequence: SequenceNumber) {
        self.outgoing.lock().tracker.set_participation(participation_id);
        self.acceptor.reset(next_sequence);
        tracing::info!(replica = %self.name, participation_id, next_sequence, "replica signed on");
    }

    /// Run a local edit. Resulting commands are queued for sending.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut Forest) -> arbor_core::Result<R>) -> Result<R> {
        let result = f(&mut self.forest);
        self.forest.take_deltas();

        let introduced = std::mem::take(&mut self.outgoing.lock().introduced);
        for key in introduced {
            let registered = self
                .forest
                .descendants(key)
                .map_err(arbor_delta::ApplyError::from)
                .and_then(|keys| keys.into_iter().try_for_each(|k| self.mapping.update_with(&self.forest, k)));
            if let Err(e) = registered {
                tracing::warn!(replica = %self.name, error = %e, "introduced node not mapped");
            }
        }
        Ok(result?)
    }

    /// Drain the queued commands.
    pub fn take_outgoing(&mut self) -> Vec<Command> {
        let commands = std::mem::take(&mut self.outgoing.lock().commands);
        self.stats.commands_sent += commands.len() as u64;
        commands
    }

    /// Put commands that could not be sent back in front of the queue.
    pub fn requeue(&mut self, mut commands: Vec<Command>) {
        self.stats.commands_sent -= (commands.len() as u64).min(self.stats.commands_sent);
        let mut outgoing = self.outgoing.lock();
        commands.append(&mut outgoing.commands);
        outgoing.commands = commands;
    }

    /// Install a partition received from the authority.
    pub fn load_partition(&mut self, chunk: &SerializationChunk) -> Result<NodeKey> {
        if let Some(existing) = self.mapping.try_from_id(chunk.root_id()?) {
            if self.forest.is_partition(existing) {
                return Ok(existing);
            }
        }
        let base = self.forest.len();
        let mut staged = IdMapping::new();
        let loaded = deserialize_subtree(chunk, &mut self.forest, &mut staged)
            .map_err(SdkError::from)
            .and_then(|key| {
                self.forest.direct_add_partition(key)?;
                Ok(key)
            });
        match loaded {
            Ok(key) => {
                self.mapping.merge(staged);
                Ok(key)
            }
            Err(e) => {
                self.forest.discard_from(base)?;
                Err(e)
            }
        }
    }

    /// Hand an event from the authority to the replica.
    pub fn receive(&mut self, event: Event) -> AcceptOutcome {
        let (outcome, ready) = self.acceptor.accept(event);
        match outcome {
            AcceptOutcome::Stale => self.stats.stale += 1,
            AcceptOutcome::Duplicate => self.stats.duplicates += 1,
            AcceptOutcome::Overflow => {
                tracing::warn!(replica = %self.name, expected = self.acceptor.expected(), "event dropped, buffer full")
            }
            AcceptOutcome::Buffered | AcceptOutcome::Delivered(_) => {}
        }
        for event in ready {
            self.process(event);
        }
        outcome
    }

    fn process(&mut self, event: Event) {
        {
            let mut outgoing = self.outgoing.lock();
            if outgoing.tracker.is_own(&event) {
                outgoing.tracker.acknowledge(&event);
                if let EventPayload::Error { error_code, message } = &event.payload {
                    tracing::warn!(
                        replica = %self.name,
                        sequence = event.sequence_number,
                        error_code = %error_code,
                        message = %message,
                        "own command rejected by the authority"
                    );
                    self.stats.rejected += 1;
                } else {
                    self.stats.own_events += 1;
                }
                return;
            }
        }

        match self.apply_remote(&event) {
            Ok(()) => {
                self.stats.events_applied += 1;
                for id in event.deleted_ids() {
                    self.mapping.forget(&id);
                }
            }
            Err(e) => {
                tracing::warn!(
                    replica = %self.name,
                    sequence = event.sequence_number,
                    error = %e,
                    "event discarded"
                );
                self.stats.failed += 1;
            }
        }
    }

    /// Translate and apply a foreign event. Nodes and ids the event brings in
    /// are kept only when it applies.
    fn apply_remote(&mut self, event: &Event) -> Result<()> {
        let base = self.forest.len();
        let mut staged = IdMapping::new();
        let applied = stage_event(event, &mut self.forest, &self.mapping, &mut staged)
            .map_err(SdkError::from)
            .and_then(|delta| {
                apply_delta(&mut self.forest, &delta)?;
                Ok(delta)
            });
        match applied {
            Ok(delta) => {
                self.mapping.merge(staged);
                tracing::debug!(replica = %self.name, sequence = event.sequence_number, kind = delta.kind(), "event applied");
                Ok(())
            }
            Err(e) => {
                self.forest.discard_from(base)?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::schema::{Classifier, Feature, Language, PropertyType};
    use arbor_core::{MetaPointer, NodeId};
    use arbor_protocol::{command_as_event, serialize_subtree, Change};

    fn registry() -> (Arc<SchemaRegistry>, MetaPointer) {
        let language = Language::builder("notes", "1")
            .classifier(
                Classifier::concept("Note")
                    .partition()
                    .feature(Feature::property("text", PropertyType::String).optional())
                    .feature(Feature::containment("replies", "Note").optional().multiple()),
            )
            .build()
            .unwrap();
        let note = language.pointer("Note");
        (Arc::new(SchemaRegistry::new().with_language(language).unwrap()), note)
    }

    fn replica(registry: &Arc<SchemaRegistry>, prefix: &str) -> Replica {
        let config = ReplicaConfigBuilder::new().name(prefix).command_prefix(prefix).build();
        Replica::new(registry.clone(), config)
    }

    #[test]
    fn test_config_builder() {
        let config = ReplicaConfigBuilder::new()
            .name("left")
            .command_prefix("L")
            .initial_sequence(4)
            .max_buffered(8)
            .build();
        assert_eq!(config.name, "left");
        assert_eq!(config.command_prefix.as_deref(), Some("L"));
        assert_eq!(config.initial_sequence, 4);
        assert_eq!(config.max_buffered, 8);
    }

    #[test]
    fn test_edits_queue_commands() {
        let (registry, note) = registry();
        let mut left = replica(&registry, "L");
        let root = left
            .edit(|forest| {
                let root = forest.create_node(&note, "root")?;
                forest.add_partition(root)?;
                forest.property(root, "text")?.set_value("hello")?;
                Ok(root)
            })
            .unwrap();

        assert_eq!(left.pending_commands(), 2);
        assert!(left.mapping().contains(&NodeId::new("root")));
        let commands = left.take_outgoing();
        let ids: Vec<_> = commands.iter().map(Command::command_id).collect();
        assert_eq!(ids, vec!["L-1", "L-2"]);
        assert_eq!(left.in_flight(), 2);
        assert_eq!(left.stats().commands_sent, 2);

        // Detached edits stay local.
        left.edit(|forest| {
            let loose = forest.create_node(&note, "loose")?;
            forest.property(loose, "text")?.set_value("draft")
        })
        .unwrap();
        assert_eq!(left.pending_commands(), 0);

        // A failing edit queues nothing and reports the error.
        let err = left.edit(|forest| forest.containment(root, "replies")?.remove_at(3));
        assert!(err.is_err());
        assert_eq!(left.pending_commands(), 0);
    }

    #[test]
    fn test_move_out_of_detached_subtree_becomes_addition() {
        let (registry, note) = registry();
        let mut left = replica(&registry, "L");
        left.edit(|forest| {
            let root = forest.create_node(&note, "root")?;
            let draft = forest.create_node(&note, "draft")?;
            let reply = forest.create_node(&note, "reply")?;
            forest.containment(draft, "replies")?.add(reply)?;
            forest.add_partition(root)?;
            forest.containment(root, "replies")?.add(reply)
        })
        .unwrap();

        let commands = left.take_outgoing();
        assert_eq!(commands.len(), 2);
        match &commands[1] {
            Command::Change {
                change: Change::AddChild { new_child, .. },
                ..
            } => assert_eq!(new_child.root_id().unwrap(), &NodeId::new("reply")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(left.mapping().contains(&NodeId::new("reply")));
    }

    #[test]
    fn test_own_events_are_skipped_and_others_applied() {
        let (registry, note) = registry();
        let mut left = replica(&registry, "L");
        let mut right = replica(&registry, "R");
        left.signed_on("p-left", 0);
        right.signed_on("p-right", 0);

        left.edit(|forest| {
            let root = forest.create_node(&note, "root")?;
            forest.add_partition(root)
        })
        .unwrap();
        let command = left.take_outgoing().remove(0);
        let event = command_as_event(&command, 0, "p-left", &());

        assert_eq!(left.receive(event.clone()), AcceptOutcome::Delivered(1));
        assert_eq!(left.stats().own_events, 1);
        assert_eq!(left.in_flight(), 0);
        assert_eq!(left.forest().partitions().len(), 1);

        assert_eq!(right.receive(event.clone()), AcceptOutcome::Delivered(1));
        assert_eq!(right.stats().events_applied, 1);
        assert_eq!(right.forest().partitions().len(), 1);
        assert_eq!(right.pending_commands(), 0);

        assert_eq!(right.receive(event), AcceptOutcome::Stale);
        assert_eq!(right.stats().stale, 1);
    }

    #[test]
    fn test_undecodable_events_are_counted_and_skipped() {
        let (registry, _) = registry();
        let mut right = replica(&registry, "R");
        right.signed_on("p-right", 0);
        let command = Command::Change {
            command_id: "X-1".to_string(),
            change: Change::DeletePartition {
                deleted_partition: NodeId::new("unknown"),
            },
            protocol_messages: Vec::new(),
        };
        let event = command_as_event(&command, 0, "p-other", &());

        assert_eq!(right.receive(event), AcceptOutcome::Delivered(1));
        assert_eq!(right.stats().failed, 1);
        assert_eq!(right.expected_sequence(), 1);
    }

    #[test]
    fn test_failed_event_keeps_no_nodes_or_ids() {
        let (registry, note) = registry();
        let mut left = replica(&registry, "L");
        let mut right = replica(&registry, "R");
        right.signed_on("p-right", 0);
        left.edit(|forest| {
            let root = forest.create_node(&note, "root")?;
            forest.add_partition(root)
        })
        .unwrap();
        let setup = left.take_outgoing().remove(0);
        right.receive(command_as_event(&setup, 0, "p-left", &()));
        let root = right.mapping().from_id(&NodeId::new("root")).unwrap();
        let nodes = right.forest().len();

        let mut scratch = Forest::new(registry.clone());
        let reply = scratch.create_node(&note, "reply").unwrap();
        let replies = MetaPointer::new("notes", "1", "replies");
        let add_reply = Command::Change {
            command_id: "X-1".to_string(),
            change: Change::AddChild {
                parent: NodeId::new("root"),
                new_child: serialize_subtree(&scratch, reply).unwrap(),
                containment: replies.clone(),
                index: 0,
            },
            protocol_messages: Vec::new(),
        };
        // Translates fine, but the second part names an index that is not there.
        let broken = Command::Composite {
            command_id: "X-2".to_string(),
            parts: vec![
                add_reply.clone(),
                Command::Change {
                    command_id: "X-3".to_string(),
                    change: Change::DeleteChild {
                        parent: NodeId::new("root"),
                        containment: replies,
                        index: 5,
                        deleted_child: NodeId::new("reply"),
                    },
                    protocol_messages: Vec::new(),
                },
            ],
            protocol_messages: Vec::new(),
        };

        assert_eq!(
            right.receive(command_as_event(&broken, 1, "p-other", &())),
            AcceptOutcome::Delivered(1)
        );
        assert_eq!(right.stats().failed, 1);
        assert_eq!(right.forest().len(), nodes);
        assert!(!right.mapping().contains(&NodeId::new("reply")));
        assert_eq!(right.forest().descendants(root).unwrap(), vec![root]);

        assert_eq!(
            right.receive(command_as_event(&add_reply, 2, "p-other", &())),
            AcceptOutcome::Delivered(1)
        );
        assert_eq!(right.stats().events_applied, 2);
        let attached = right.mapping().from_id(&NodeId::new("reply")).unwrap();
        assert_eq!(right.forest().descendants(root).unwrap(), vec![root, attached]);
    }

    #[test]
    fn test_requeue_keeps_order() {
        let (registry, note) = registry();
        let mut left = replica(&registry, "L");
        left.edit(|forest| {
            let root = forest.create_node(&note, "root")?;
            forest.add_partition(root)
        })
        .unwrap();
        let first = left.take_outgoing();
        left.edit(|forest| {
            let root = forest.partitions()[0];
            forest.property(root, "text")?.set_value("x")
        })
        .unwrap();

        left.requeue(first);
        let ids: Vec<String> = left
            .take_outgoing()
            .iter()
            .map(|c| c.command_id().to_string())
            .collect();
        assert_eq!(ids, vec!["L-1", "L-2"]);
    }
}
