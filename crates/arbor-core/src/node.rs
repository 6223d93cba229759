//! Nodes and their parentage bookkeeping.

use crate::ids::{NodeId, NodeKey};
use crate::schema::Classifier;
use crate::value::{PropertyValue, ReferenceValue};
use std::sync::Arc;

/// The slot of a parent that contains a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Containment feature, by index into the parent's classifier features.
    Containment(usize),
    /// The parent's annotation list.
    Annotation,
}

/// Owning parent and containing slot. Always set and cleared together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Parentage {
    pub parent: NodeKey,
    pub slot: Slot,
}

/// Storage behind one populated feature of a node.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ValueSlot {
    Property(Option<PropertyValue>),
    Children(Vec<NodeKey>),
    References(Vec<ReferenceValue>),
}

/// An identified instance of a classifier.
#[derive(Clone, Debug)]
pub struct Node {
    id: NodeId,
    classifier: Arc<Classifier>,
    parentage: Option<Parentage>,
    /// One entry per classifier feature; `None` until first written.
    values: Vec<Option<ValueSlot>>,
    annotations: Vec<NodeKey>,
}

impl Node {
    pub(crate) fn new(id: NodeId, classifier: Arc<Classifier>) -> Self {
        let values = vec![None; classifier.features().len()];
        Self {
            id,
            classifier,
            parentage: None,
            values,
            annotations: Vec::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }

    pub fn parentage(&self) -> Option<Parentage> {
        self.parentage
    }

    pub fn parent(&self) -> Option<NodeKey> {
        self.parentage.map(|p| p.parent)
    }

    pub fn annotations(&self) -> &[NodeKey] {
        &self.annotations
    }

    /// Indices of the features that currently hold a value holder.
    pub fn populated_features(&self) -> impl Iterator<Item = usize> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_some())
            .map(|(i, _)| i)
    }

    /// Install parentage. Both halves are written in one step.
    pub(crate) fn attach_to(&mut self, parent: NodeKey, slot: Slot) {
        self.parentage = Some(Parentage { parent, slot });
    }

    pub(crate) fn detach(&mut self) -> Option<Parentage> {
        self.parentage.take()
    }

    pub(crate) fn value(&self, feature: usize) -> Option<&ValueSlot> {
        self.values.get(feature).and_then(|v| v.as_ref())
    }

    pub(crate) fn value_mut(&mut self, feature: usize) -> &mut Option<ValueSlot> {
        &mut self.values[feature]
    }

    pub(crate) fn annotations_mut(&mut self) -> &mut Vec<NodeKey> {
        &mut self.annotations
    }

    /// Property value, `None` when unset.
    pub fn property_value(&self, feature: usize) -> Option<&PropertyValue> {
        match self.value(feature) {
            Some(ValueSlot::Property(value)) => value.as_ref(),
            _ => None,
        }
    }

    /// Children held by a containment, empty when never populated.
    pub fn children_of(&self, feature: usize) -> &[NodeKey] {
        match self.value(feature) {
            Some(ValueSlot::Children(children)) => children,
            _ => &[],
        }
    }

    /// Entries held by a reference, empty when never populated.
    pub fn references_of(&self, feature: usize) -> &[ReferenceValue] {
        match self.value(feature) {
            Some(ValueSlot::References(refs)) => refs,
            _ => &[],
        }
    }
}
