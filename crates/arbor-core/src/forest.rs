//! The forest: every node of one replica, its partitions and its delta log.
//!
//! Nodes live in an arena and are addressed by [`NodeKey`]. Containment is a
//! non-owning structural link: the child records its [`Parentage`] and the
//! parent lists the child's key in the containing value holder.
//!
//! Two layers of mutation exist:
//!
//! - the value managers (see [`crate::managers`]) validate, mutate and emit
//!   exactly one delta per observable change;
//! - the `direct_*` primitives below mutate without emitting. They are what the
//!   managers are built on and what the delta application engine replays with,
//!   so that applying a delta never re-broadcasts it.

use crate::delta::{Delta, NodeRef};
use crate::error::{Error, Result};
use crate::ids::{MetaPointer, NodeId, NodeKey};
use crate::node::{Node, Parentage, Slot, ValueSlot};
use crate::schema::{Feature, FeatureKind, SchemaRegistry};
use crate::value::{PropertyValue, ReferenceValue};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Where a node currently sits inside its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub parent: NodeKey,
    pub slot: Slot,
    pub index: usize,
}

/// Receives every recorded delta at the moment it is emitted.
///
/// The forest is passed in the state right after the edit, so an observer can
/// capture the subtree of an introduced node before later edits change it.
pub trait DeltaObserver: Send + Sync {
    fn on_delta(&mut self, forest: &Forest, delta: &Delta);
}

/// All nodes of one replica.
pub struct Forest {
    registry: Arc<SchemaRegistry>,
    nodes: Vec<Node>,
    partitions: Vec<NodeKey>,
    /// Deltas emitted since the last [`Forest::take_deltas`].
    pending: Vec<Delta>,
    recording: bool,
    observer: Option<Box<dyn DeltaObserver>>,
}

/// Clones share nodes and pending deltas but never the observer.
impl Clone for Forest {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            nodes: self.nodes.clone(),
            partitions: self.partitions.clone(),
            pending: self.pending.clone(),
            recording: self.recording,
            observer: None,
        }
    }
}

impl fmt::Debug for Forest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forest")
            .field("nodes", &self.nodes.len())
            .field("partitions", &self.partitions)
            .field("pending", &self.pending.len())
            .field("recording", &self.recording)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl Forest {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            nodes: Vec::new(),
            partitions: Vec::new(),
            pending: Vec::new(),
            recording: true,
            observer: None,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Number of nodes ever created in this forest, reachable or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node factory: create a free-standing node of `classifier`.
    pub fn create_node(&mut self, classifier: &MetaPointer, id: impl Into<NodeId>) -> Result<NodeKey> {
        let classifier = self.registry.require_classifier(classifier)?.clone();
        Ok(self.push_node(Node::new(id.into(), classifier)))
    }

    fn push_node(&mut self, node: Node) -> NodeKey {
        let key = NodeKey(self.nodes.len());
        self.nodes.push(node);
        key
    }

    pub fn node(&self, key: NodeKey) -> Result<&Node> {
        self.nodes.get(key.0).ok_or(Error::UnknownKey(key))
    }

    fn node_mut(&mut self, key: NodeKey) -> Result<&mut Node> {
        self.nodes.get_mut(key.0).ok_or(Error::UnknownKey(key))
    }

    /// Self-describing reference to a node, as carried by deltas.
    pub fn node_ref(&self, key: NodeKey) -> Result<NodeRef> {
        let node = self.node(key)?;
        Ok(NodeRef {
            key,
            id: node.id().clone(),
            classifier: node.classifier().meta_pointer.clone(),
        })
    }

    pub fn id_of(&self, key: NodeKey) -> Result<&NodeId> {
        Ok(self.node(key)?.id())
    }

    // === Features ===

    /// Resolve a feature by name (or key) and check its kind.
    pub fn feature(
        &self,
        node: NodeKey,
        name: &str,
        expected: &'static str,
    ) -> Result<(usize, Arc<Feature>)> {
        let classifier = self.node(node)?.classifier();
        let (index, feature) = classifier.require_feature(name)?;
        Self::check_kind(classifier.name.as_str(), feature, expected)?;
        Ok((index, feature.clone()))
    }

    /// Resolve a feature by meta pointer and check its kind.
    pub fn feature_by_pointer(
        &self,
        node: NodeKey,
        pointer: &MetaPointer,
        expected: &'static str,
    ) -> Result<(usize, Arc<Feature>)> {
        let classifier = self.node(node)?.classifier();
        let (index, feature) =
            classifier
                .feature_by_pointer(pointer)
                .ok_or_else(|| Error::FeatureNotFound {
                    feature: pointer.to_string(),
                    classifier: classifier.name.clone(),
                })?;
        Self::check_kind(classifier.name.as_str(), feature, expected)?;
        Ok((index, feature.clone()))
    }

    fn check_kind(classifier: &str, feature: &Feature, expected: &'static str) -> Result<()> {
        let actual = feature.kind.describe();
        if actual != expected {
            return Err(Error::FeatureKindMismatch {
                feature: feature.name.clone(),
                classifier: classifier.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub(crate) fn feature_at(&self, node: NodeKey, index: usize) -> Result<Arc<Feature>> {
        let classifier = self.node(node)?.classifier();
        classifier
            .feature_at(index)
            .cloned()
            .ok_or_else(|| Error::FeatureNotFound {
                feature: format!("#{}", index),
                classifier: classifier.name.clone(),
            })
    }

    // === Tree queries ===

    /// Children of a node: every containment value plus the annotations,
    /// de-duplicated.
    pub fn children(&self, key: NodeKey) -> Result<Vec<NodeKey>> {
        let node = self.node(key)?;
        let mut seen = HashSet::new();
        let mut children = Vec::new();
        for feature in node.populated_features() {
            for child in node.children_of(feature) {
                if seen.insert(*child) {
                    children.push(*child);
                }
            }
        }
        for annotation in node.annotations() {
            if seen.insert(*annotation) {
                children.push(*annotation);
            }
        }
        Ok(children)
    }

    /// Ids of every reference target of a node, de-duplicated.
    pub fn reference_targets(&self, key: NodeKey) -> Result<Vec<NodeId>> {
        let node = self.node(key)?;
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for feature in node.populated_features() {
            for reference in node.references_of(feature) {
                if let Some(target) = &reference.target {
                    if seen.insert(target.clone()) {
                        targets.push(target.clone());
                    }
                }
            }
        }
        Ok(targets)
    }

    /// The node and all its transitive children, pre-order.
    pub fn descendants(&self, key: NodeKey) -> Result<Vec<NodeKey>> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            out.push(current);
            let children = self.children(current)?;
            stack.extend(children.into_iter().rev());
        }
        Ok(out)
    }

    /// Whether `ancestor` is `node` or one of its parents.
    pub fn is_ancestor_or_self(&self, ancestor: NodeKey, node: NodeKey) -> Result<bool> {
        let mut current = Some(node);
        while let Some(key) = current {
            if key == ancestor {
                return Ok(true);
            }
            current = self.node(key)?.parent();
        }
        Ok(false)
    }

    /// Root of the tree a node belongs to.
    pub fn root_of(&self, key: NodeKey) -> Result<NodeKey> {
        let mut current = key;
        while let Some(parent) = self.node(current)?.parent() {
            current = parent;
        }
        Ok(current)
    }

    pub fn location(&self, key: NodeKey) -> Result<Option<Location>> {
        let Some(Parentage { parent, slot }) = self.node(key)?.parentage() else {
            return Ok(None);
        };
        let index = self
            .slot_items(parent, slot)?
            .iter()
            .position(|k| *k == key)
            .ok_or_else(|| Error::NotContained {
                node: self.nodes[key.0].id().clone(),
                parent: self.nodes[parent.0].id().clone(),
                feature: self.slot_name(parent, slot),
            })?;
        Ok(Some(Location {
            parent,
            slot,
            index,
        }))
    }

    pub(crate) fn slot_items(&self, parent: NodeKey, slot: Slot) -> Result<&[NodeKey]> {
        let node = self.node(parent)?;
        Ok(match slot {
            Slot::Containment(feature) => node.children_of(feature),
            Slot::Annotation => node.annotations(),
        })
    }

    pub(crate) fn slot_name(&self, parent: NodeKey, slot: Slot) -> String {
        match slot {
            Slot::Containment(feature) => self
                .feature_at(parent, feature)
                .map(|f| f.name.clone())
                .unwrap_or_else(|_| format!("#{}", feature)),
            Slot::Annotation => "annotations".to_string(),
        }
    }

    // === Partitions ===

    pub fn partitions(&self) -> &[NodeKey] {
        &self.partitions
    }

    pub fn is_partition(&self, key: NodeKey) -> bool {
        self.partitions.contains(&key)
    }

    /// Mark a free-standing node as a partition root.
    pub fn add_partition(&mut self, key: NodeKey) -> Result<()> {
        if self.is_partition(key) {
            return Ok(());
        }
        self.direct_add_partition(key)?;
        let partition = self.node_ref(key)?;
        self.emit(Delta::PartitionAdded { partition });
        Ok(())
    }

    pub fn remove_partition(&mut self, key: NodeKey) -> Result<()> {
        self.direct_remove_partition(key)?;
        let partition = self.node_ref(key)?;
        self.emit(Delta::PartitionDeleted { partition });
        Ok(())
    }

    // === Delta log ===

    /// Record an emitted delta.
    pub(crate) fn emit(&mut self, delta: Delta) {
        tracing::debug!(kind = delta.kind(), "delta emitted");
        if !self.recording {
            return;
        }
        if let Some(mut observer) = self.observer.take() {
            observer.on_delta(self, &delta);
            self.observer = Some(observer);
        }
        self.pending.push(delta);
    }

    /// Install `observer`, returning the one it replaces.
    pub fn set_observer(
        &mut self,
        observer: impl DeltaObserver + 'static,
    ) -> Option<Box<dyn DeltaObserver>> {
        self.observer.replace(Box::new(observer))
    }

    pub fn clear_observer(&mut self) -> Option<Box<dyn DeltaObserver>> {
        self.observer.take()
    }

    /// Drain the deltas emitted since the last call.
    pub fn take_deltas(&mut self) -> Vec<Delta> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending_deltas(&self) -> &[Delta] {
        &self.pending
    }

    /// Switch delta recording on or off. Mutations still happen while off.
    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    // === Staging ===

    /// Take over the contents of `staged`, a clone edited in place of this
    /// forest. The observer installed here stays.
    pub fn commit(&mut self, staged: Forest) {
        let Forest {
            nodes,
            partitions,
            pending,
            recording,
            ..
        } = staged;
        self.nodes = nodes;
        self.partitions = partitions;
        self.pending = pending;
        self.recording = recording;
    }

    /// Drop every node created after the forest held `len` nodes.
    ///
    /// The dropped nodes must be free-standing or contained by one another;
    /// nothing older may hold them.
    pub fn discard_from(&mut self, len: usize) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate().skip(len) {
            let held_by_older = node.parent().map_or(false, |parent| parent.0 < len);
            if held_by_older || self.partitions.contains(&NodeKey(index)) {
                return Err(Error::AlreadyAttached(node.id().clone()));
            }
        }
        self.nodes.truncate(len);
        Ok(())
    }

    // === Direct primitives (no delta emission) ===

    pub fn direct_add_partition(&mut self, key: NodeKey) -> Result<()> {
        let node = self.node(key)?;
        if !node.classifier().partition {
            return Err(Error::NotPartitionable {
                node: node.id().clone(),
                classifier: node.classifier().meta_pointer.clone(),
            });
        }
        if node.parentage().is_some() {
            return Err(Error::AlreadyAttached(node.id().clone()));
        }
        if !self.partitions.contains(&key) {
            self.partitions.push(key);
        }
        Ok(())
    }

    pub fn direct_remove_partition(&mut self, key: NodeKey) -> Result<()> {
        let Some(position) = self.partitions.iter().position(|k| *k == key) else {
            return Err(Error::NotAPartition(self.id_of(key)?.clone()));
        };
        self.partitions.remove(position);
        Ok(())
    }

    /// Write a property, returning the previous value.
    pub fn direct_set_property(
        &mut self,
        node: NodeKey,
        feature: usize,
        value: Option<PropertyValue>,
    ) -> Result<Option<PropertyValue>> {
        let slot = self.node_mut(node)?.value_mut(feature);
        if let Some(ValueSlot::Property(current)) = slot {
            return Ok(std::mem::replace(current, value));
        }
        *slot = Some(ValueSlot::Property(value));
        Ok(None)
    }

    fn children_mut(&mut self, parent: NodeKey, feature: usize) -> Result<&mut Vec<NodeKey>> {
        let slot = self.node_mut(parent)?.value_mut(feature);
        if !matches!(slot, Some(ValueSlot::Children(_))) {
            *slot = Some(ValueSlot::Children(Vec::new()));
        }
        match slot {
            Some(ValueSlot::Children(children)) => Ok(children),
            _ => Err(Error::IllegalOperation {
                op: "insert",
                feature: feature.to_string(),
            }),
        }
    }

    fn references_mut(&mut self, node: NodeKey, feature: usize) -> Result<&mut Vec<ReferenceValue>> {
        let slot = self.node_mut(node)?.value_mut(feature);
        if !matches!(slot, Some(ValueSlot::References(_))) {
            *slot = Some(ValueSlot::References(Vec::new()));
        }
        match slot {
            Some(ValueSlot::References(refs)) => Ok(refs),
            _ => Err(Error::IllegalOperation {
                op: "insert_reference",
                feature: feature.to_string(),
            }),
        }
    }

    fn slot_items_mut(&mut self, parent: NodeKey, slot: Slot) -> Result<&mut Vec<NodeKey>> {
        match slot {
            Slot::Containment(feature) => self.children_mut(parent, feature),
            Slot::Annotation => Ok(self.node_mut(parent)?.annotations_mut()),
        }
    }

    /// Check that `child` may be placed into `slot` of `parent`, ignoring
    /// where `child` currently is.
    pub(crate) fn check_placeable(&self, parent: NodeKey, slot: Slot, child: NodeKey) -> Result<()> {
        let node = self.node(child)?;
        match slot {
            Slot::Containment(feature) => {
                let feature = self.feature_at(parent, feature)?;
                if feature.kind != FeatureKind::Containment {
                    return Err(Error::FeatureKindMismatch {
                        feature: feature.name.clone(),
                        classifier: self.node(parent)?.classifier().name.clone(),
                        expected: "containment",
                        actual: feature.kind.describe(),
                    });
                }
                if node.classifier().is_annotation() {
                    return Err(Error::AnnotationInContainment(node.id().clone()));
                }
            }
            Slot::Annotation => {
                if !node.classifier().is_annotation() {
                    return Err(Error::NotAnAnnotation(node.id().clone()));
                }
            }
        }
        if self.is_partition(child) {
            return Err(Error::PartitionNotContainable(node.id().clone()));
        }
        if self.is_ancestor_or_self(child, parent)? {
            return Err(Error::ContainmentCycle {
                child: node.id().clone(),
                parent: self.id_of(parent)?.clone(),
            });
        }
        Ok(())
    }

    /// Insert a free-standing node into a slot and attach it.
    pub fn direct_insert(&mut self, parent: NodeKey, slot: Slot, index: usize, child: NodeKey) -> Result<()> {
        if self.node(child)?.parentage().is_some() {
            return Err(Error::AlreadyAttached(self.id_of(child)?.clone()));
        }
        self.check_placeable(parent, slot, child)?;
        let single = match slot {
            Slot::Containment(feature) => !self.feature_at(parent, feature)?.is_multiple(),
            Slot::Annotation => false,
        };
        let name = self.slot_name(parent, slot);
        let items = self.slot_items_mut(parent, slot)?;
        if index > items.len() {
            return Err(Error::IndexOutOfBounds {
                op: "insert",
                index,
                length: items.len(),
            });
        }
        if single && !items.is_empty() {
            return Err(Error::IllegalOperation {
                op: "insert into occupied single containment",
                feature: name,
            });
        }
        items.insert(index, child);
        self.node_mut(child)?.attach_to(parent, slot);
        Ok(())
    }

    /// Remove the node at `index` of a slot and detach it.
    pub fn direct_remove(&mut self, parent: NodeKey, slot: Slot, index: usize) -> Result<NodeKey> {
        let items = self.slot_items_mut(parent, slot)?;
        if index >= items.len() {
            return Err(Error::IndexOutOfBounds {
                op: "remove",
                index,
                length: items.len(),
            });
        }
        let removed = items.remove(index);
        self.node_mut(removed)?.detach();
        Ok(removed)
    }

    /// Put a free-standing node in place of the one at `index`, detaching the
    /// occupant.
    pub fn direct_replace(&mut self, parent: NodeKey, slot: Slot, index: usize, child: NodeKey) -> Result<NodeKey> {
        if self.node(child)?.parentage().is_some() {
            return Err(Error::AlreadyAttached(self.id_of(child)?.clone()));
        }
        self.check_placeable(parent, slot, child)?;
        let items = self.slot_items_mut(parent, slot)?;
        if index >= items.len() {
            return Err(Error::IndexOutOfBounds {
                op: "replace",
                index,
                length: items.len(),
            });
        }
        let replaced = std::mem::replace(&mut items[index], child);
        self.node_mut(replaced)?.detach();
        self.node_mut(child)?.attach_to(parent, slot);
        Ok(replaced)
    }

    /// Move a node inside one slot so that it ends up at `to`.
    pub fn direct_move(&mut self, parent: NodeKey, slot: Slot, from: usize, to: usize) -> Result<()> {
        let items = self.slot_items_mut(parent, slot)?;
        let length = items.len();
        if from >= length {
            return Err(Error::IndexOutOfBounds {
                op: "move",
                index: from,
                length,
            });
        }
        if to >= length {
            return Err(Error::IndexOutOfBounds {
                op: "move",
                index: to,
                length,
            });
        }
        let node = items.remove(from);
        items.insert(to, node);
        Ok(())
    }

    /// Inside one slot, put the node at `from` in place of the occupant at
    /// `to` and detach the occupant. Returns the occupant.
    pub fn direct_move_and_replace(&mut self, parent: NodeKey, slot: Slot, from: usize, to: usize) -> Result<NodeKey> {
        let items = self.slot_items_mut(parent, slot)?;
        let length = items.len();
        for index in [from, to] {
            if index >= length {
                return Err(Error::IndexOutOfBounds {
                    op: "move and replace",
                    index,
                    length,
                });
            }
        }
        if from == to {
            return Err(Error::IllegalOperation {
                op: "move and replace onto itself",
                feature: self.slot_name(parent, slot),
            });
        }
        let moved = items[from];
        let replaced = std::mem::replace(&mut items[to], moved);
        items.remove(from);
        self.node_mut(replaced)?.detach();
        Ok(replaced)
    }

    /// Take a node out of whatever slot holds it.
    pub fn direct_detach(&mut self, key: NodeKey) -> Result<Option<Location>> {
        let Some(location) = self.location(key)? else {
            return Ok(None);
        };
        self.direct_remove(location.parent, location.slot, location.index)?;
        Ok(Some(location))
    }

    pub fn direct_insert_reference(
        &mut self,
        node: NodeKey,
        feature: usize,
        index: usize,
        value: ReferenceValue,
    ) -> Result<()> {
        let single = !self.feature_at(node, feature)?.is_multiple();
        let name = self.feature_at(node, feature)?.name.clone();
        let refs = self.references_mut(node, feature)?;
        if index > refs.len() {
            return Err(Error::IndexOutOfBounds {
                op: "insert",
                index,
                length: refs.len(),
            });
        }
        if single && !refs.is_empty() {
            return Err(Error::IllegalOperation {
                op: "insert into occupied single reference",
                feature: name,
            });
        }
        refs.insert(index, value);
        Ok(())
    }

    pub fn direct_remove_reference(&mut self, node: NodeKey, feature: usize, index: usize) -> Result<ReferenceValue> {
        let refs = self.references_mut(node, feature)?;
        if index >= refs.len() {
            return Err(Error::IndexOutOfBounds {
                op: "remove",
                index,
                length: refs.len(),
            });
        }
        Ok(refs.remove(index))
    }

    pub fn direct_set_reference(
        &mut self,
        node: NodeKey,
        feature: usize,
        index: usize,
        value: ReferenceValue,
    ) -> Result<ReferenceValue> {
        let refs = self.references_mut(node, feature)?;
        if index >= refs.len() {
            return Err(Error::IndexOutOfBounds {
                op: "replace",
                index,
                length: refs.len(),
            });
        }
        Ok(std::mem::replace(&mut refs[index], value))
    }

    pub fn direct_move_reference(&mut self, node: NodeKey, feature: usize, from: usize, to: usize) -> Result<()> {
        let refs = self.references_mut(node, feature)?;
        let length = refs.len();
        if from >= length || to >= length {
            return Err(Error::IndexOutOfBounds {
                op: "move",
                index: from.max(to),
                length,
            });
        }
        let value = refs.remove(from);
        refs.insert(to, value);
        Ok(())
    }

    /// Deep-copy a subtree of another forest into this one, keeping ids.
    /// The copy's root is free-standing.
    pub fn import_subtree(&mut self, source: &Forest, root: NodeKey) -> Result<NodeKey> {
        let original = source.node(root)?;
        let classifier = self
            .registry
            .require_classifier(&original.classifier().meta_pointer)?
            .clone();
        let copy = self.push_node(Node::new(original.id().clone(), classifier.clone()));

        for source_feature in original.populated_features() {
            let pointer = &original.classifier().features()[source_feature].meta_pointer;
            let (feature, _) = classifier
                .feature_by_pointer(pointer)
                .ok_or_else(|| Error::FeatureNotFound {
                    feature: pointer.to_string(),
                    classifier: classifier.name.clone(),
                })?;
            match original.value(source_feature) {
                Some(ValueSlot::Property(value)) => {
                    self.direct_set_property(copy, feature, value.clone())?;
                }
                Some(ValueSlot::Children(children)) => {
                    self.children_mut(copy, feature)?;
                    for (index, child) in children.iter().enumerate() {
                        let child_copy = self.import_subtree(source, *child)?;
                        self.direct_insert(copy, Slot::Containment(feature), index, child_copy)?;
                    }
                }
                Some(ValueSlot::References(refs)) => {
                    *self.references_mut(copy, feature)? = refs.clone();
                }
                None => {}
            }
        }

        for (index, annotation) in original.annotations().iter().enumerate() {
            let annotation_copy = self.import_subtree(source, *annotation)?;
            self.direct_insert(copy, Slot::Annotation, index, annotation_copy)?;
        }

        Ok(copy)
    }
}
