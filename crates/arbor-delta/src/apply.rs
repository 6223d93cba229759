//! Delta application engine.
//!
//! Replays a [`Delta`] against a forest through the forest's direct
//! primitives, so that applying never emits new deltas. Two modes exist:
//!
//! - **direct**: node references are resolved by key, for a forest that is
//!   the producer of the delta or a key-identical copy of it;
//! - **lookup**: node references are resolved by id through an [`IdMapping`];
//!   nodes the delta introduces are copied from the producing forest when the
//!   target does not know them yet.
//!
//! Before each structural primitive the engine checks that the node found at
//! the stated index is the stated node. A primitive that fails leaves the
//! forest as it was.

use crate::error::{ApplyError, Result};
use crate::id_mapping::IdMapping;
use arbor_core::{Delta, Forest, MetaPointer, NodeKey, NodeRef, PropertyValue, ReferenceValue, Slot};

/// How node references of a delta become keys of the target forest.
trait Resolve {
    /// A node the target already holds.
    fn existing(&mut self, forest: &mut Forest, node: &NodeRef) -> Result<NodeKey>;

    /// A node the delta makes visible (added, replacing, new partition).
    fn introduced(&mut self, forest: &mut Forest, node: &NodeRef) -> Result<NodeKey>;
}

fn check_classifier(forest: &Forest, key: NodeKey, node: &NodeRef) -> Result<()> {
    let actual = &forest.node(key)?.classifier().meta_pointer;
    if actual != &node.classifier {
        return Err(ApplyError::ClassifierMismatch {
            node: node.id.clone(),
            expected: node.classifier.clone(),
            actual: actual.clone(),
        });
    }
    Ok(())
}

struct Direct;

impl Resolve for Direct {
    fn existing(&mut self, forest: &mut Forest, node: &NodeRef) -> Result<NodeKey> {
        match forest.node(node.key) {
            Ok(found) if found.id() == &node.id => {}
            _ => return Err(ApplyError::UnknownNode(node.id.clone())),
        }
        check_classifier(forest, node.key, node)?;
        Ok(node.key)
    }

    fn introduced(&mut self, forest: &mut Forest, node: &NodeRef) -> Result<NodeKey> {
        self.existing(forest, node)
    }
}

struct Lookup<'a> {
    mapping: &'a mut IdMapping,
    source: &'a Forest,
}

impl Resolve for Lookup<'_> {
    fn existing(&mut self, forest: &mut Forest, node: &NodeRef) -> Result<NodeKey> {
        let key = self.mapping.from_id(&node.id)?;
        check_classifier(forest, key, node)?;
        Ok(key)
    }

    fn introduced(&mut self, forest: &mut Forest, node: &NodeRef) -> Result<NodeKey> {
        if self.mapping.contains(&node.id) {
            return self.existing(forest, node);
        }
        match self.source.node(node.key) {
            Ok(original) if original.id() == &node.id => {}
            _ => return Err(ApplyError::UnknownNode(node.id.clone())),
        }
        let copy = forest.import_subtree(self.source, node.key)?;
        for key in forest.descendants(copy)? {
            self.mapping.update_with(forest, key)?;
        }
        tracing::trace!(node = %node.id, "copied introduced subtree");
        Ok(copy)
    }
}

/// Apply a delta to the forest that produced it (or a key-identical copy).
///
/// A composite is applied to a copy of the forest and committed only when
/// every part succeeds.
pub fn apply_delta(forest: &mut Forest, delta: &Delta) -> Result<()> {
    if !matches!(delta, Delta::Composite { .. }) {
        return Applier {
            forest,
            resolve: Direct,
        }
        .apply(delta);
    }
    let mut staged = forest.clone();
    Applier {
        forest: &mut staged,
        resolve: Direct,
    }
    .apply(delta)?;
    forest.commit(staged);
    Ok(())
}

/// Apply a delta produced by `source` to a structurally distinct `forest`,
/// resolving every node through `mapping`.
///
/// Composites and deltas that copy nodes over are all-or-nothing for both
/// `forest` and `mapping`.
pub fn apply_delta_with_lookup(
    forest: &mut Forest,
    mapping: &mut IdMapping,
    source: &Forest,
    delta: &Delta,
) -> Result<()> {
    let staging = matches!(delta, Delta::Composite { .. }) || !delta.introduced_nodes().is_empty();
    if !staging {
        return Applier {
            forest,
            resolve: Lookup { mapping, source },
        }
        .apply(delta);
    }
    let mut staged = forest.clone();
    let mut staged_mapping = mapping.clone();
    Applier {
        forest: &mut staged,
        resolve: Lookup {
            mapping: &mut staged_mapping,
            source,
        },
    }
    .apply(delta)?;
    forest.commit(staged);
    *mapping = staged_mapping;
    Ok(())
}

struct Applier<'f, R> {
    forest: &'f mut Forest,
    resolve: R,
}

impl<R: Resolve> Applier<'_, R> {
    fn existing(&mut self, node: &NodeRef) -> Result<NodeKey> {
        self.resolve.existing(self.forest, node)
    }

    fn introduced(&mut self, node: &NodeRef) -> Result<NodeKey> {
        self.resolve.introduced(self.forest, node)
    }

    fn feature(&self, node: NodeKey, pointer: &MetaPointer, kind: &'static str) -> Result<usize> {
        Ok(self.forest.feature_by_pointer(node, pointer, kind)?.0)
    }

    fn containment(&self, node: NodeKey, pointer: &MetaPointer) -> Result<Slot> {
        Ok(Slot::Containment(self.feature(node, pointer, "containment")?))
    }

    /// Check that `expected` sits at `index` of the slot.
    fn expect_at(&self, delta: &'static str, parent: NodeKey, slot: Slot, index: usize, expected: NodeKey) -> Result<()> {
        let node = self.forest.node(parent)?;
        let items = match slot {
            Slot::Containment(feature) => node.children_of(feature),
            Slot::Annotation => node.annotations(),
        };
        match items.get(index) {
            Some(found) if *found == expected => Ok(()),
            Some(found) => Err(ApplyError::ApplicationMismatch {
                delta,
                reason: format!(
                    "expected {} at index {} of {}, found {}",
                    self.forest.id_of(expected)?,
                    index,
                    node.id(),
                    self.forest.id_of(*found)?
                ),
            }),
            None => Err(ApplyError::ApplicationMismatch {
                delta,
                reason: format!("index {} is out of range for {} ({} entries)", index, node.id(), items.len()),
            }),
        }
    }

    fn expect_property(&self, delta: &'static str, node: NodeKey, feature: usize, expected: &PropertyValue) -> Result<()> {
        let current = self.forest.node(node)?.property_value(feature);
        if current != Some(expected) {
            return Err(ApplyError::ApplicationMismatch {
                delta,
                reason: format!("property holds {:?}, delta expects {:?}", current, expected),
            });
        }
        Ok(())
    }

    fn expect_reference(
        &self,
        delta: &'static str,
        node: NodeKey,
        feature: usize,
        index: usize,
        expected: &ReferenceValue,
    ) -> Result<()> {
        let current = self.forest.node(node)?.references_of(feature).get(index);
        if current != Some(expected) {
            return Err(ApplyError::ApplicationMismatch {
                delta,
                reason: format!("reference entry {} is {:?}, delta expects {:?}", index, current, expected),
            });
        }
        Ok(())
    }

    /// Remove from one slot and insert into another, restoring the original
    /// position when the insertion fails.
    fn transfer(&mut self, from: (NodeKey, Slot, usize), to: (NodeKey, Slot, usize)) -> Result<()> {
        let moved = self.forest.direct_remove(from.0, from.1, from.2)?;
        if let Err(err) = self.forest.direct_insert(to.0, to.1, to.2, moved) {
            self.forest.direct_insert(from.0, from.1, from.2, moved)?;
            return Err(err.into());
        }
        Ok(())
    }

    /// Remove from one slot and put in place of the occupant of another,
    /// restoring the original position when the replacement fails.
    fn transfer_over(&mut self, from: (NodeKey, Slot, usize), to: (NodeKey, Slot, usize)) -> Result<()> {
        let moved = self.forest.direct_remove(from.0, from.1, from.2)?;
        if let Err(err) = self.forest.direct_replace(to.0, to.1, to.2, moved) {
            self.forest.direct_insert(from.0, from.1, from.2, moved)?;
            return Err(err.into());
        }
        Ok(())
    }

    fn apply(&mut self, delta: &Delta) -> Result<()> {
        let kind = delta.kind();
        match delta {
            Delta::PartitionAdded { partition } => {
                let key = self.introduced(partition)?;
                self.forest.direct_add_partition(key)?;
            }
            Delta::PartitionDeleted { partition } => {
                let key = self.existing(partition)?;
                self.forest.direct_remove_partition(key)?;
            }

            Delta::PropertyAdded {
                node,
                property,
                value,
            } => {
                let key = self.existing(node)?;
                let feature = self.feature(key, property, "property")?;
                if let Some(current) = self.forest.node(key)?.property_value(feature) {
                    return Err(ApplyError::ApplicationMismatch {
                        delta: kind,
                        reason: format!("property already holds {:?}", current),
                    });
                }
                self.forest.direct_set_property(key, feature, Some(value.clone()))?;
            }
            Delta::PropertyDeleted {
                node,
                property,
                old_value,
            } => {
                let key = self.existing(node)?;
                let feature = self.feature(key, property, "property")?;
                self.expect_property(kind, key, feature, old_value)?;
                self.forest.direct_set_property(key, feature, None)?;
            }
            Delta::PropertyChanged {
                node,
                property,
                old_value,
                new_value,
            } => {
                let key = self.existing(node)?;
                let feature = self.feature(key, property, "property")?;
                self.expect_property(kind, key, feature, old_value)?;
                self.forest.direct_set_property(key, feature, Some(new_value.clone()))?;
            }

            Delta::ChildAdded {
                parent,
                containment,
                index,
                new_child,
            } => {
                let parent = self.existing(parent)?;
                let slot = self.containment(parent, containment)?;
                let child = self.introduced(new_child)?;
                self.forest.direct_insert(parent, slot, *index, child)?;
            }
            Delta::ChildDeleted {
                parent,
                containment,
                index,
                deleted_child,
            } => {
                let parent = self.existing(parent)?;
                let slot = self.containment(parent, containment)?;
                let child = self.existing(deleted_child)?;
                self.expect_at(kind, parent, slot, *index, child)?;
                self.forest.direct_remove(parent, slot, *index)?;
            }
            Delta::ChildReplaced {
                parent,
                containment,
                index,
                replaced_child,
                new_child,
            } => {
                let parent = self.existing(parent)?;
                let slot = self.containment(parent, containment)?;
                let replaced = self.existing(replaced_child)?;
                self.expect_at(kind, parent, slot, *index, replaced)?;
                let child = self.introduced(new_child)?;
                self.forest.direct_replace(parent, slot, *index, child)?;
            }
            Delta::ChildMovedFromOtherContainment {
                old_parent,
                old_containment,
                old_index,
                new_parent,
                new_containment,
                new_index,
                moved_child,
            } => {
                let old_parent = self.existing(old_parent)?;
                let old_slot = self.containment(old_parent, old_containment)?;
                let new_parent = self.existing(new_parent)?;
                let new_slot = self.containment(new_parent, new_containment)?;
                let moved = self.existing(moved_child)?;
                self.expect_at(kind, old_parent, old_slot, *old_index, moved)?;
                self.transfer((old_parent, old_slot, *old_index), (new_parent, new_slot, *new_index))?;
            }
            Delta::ChildMovedFromOtherContainmentInSameParent {
                parent,
                old_containment,
                old_index,
                new_containment,
                new_index,
                moved_child,
            } => {
                let parent = self.existing(parent)?;
                let old_slot = self.containment(parent, old_containment)?;
                let new_slot = self.containment(parent, new_containment)?;
                let moved = self.existing(moved_child)?;
                self.expect_at(kind, parent, old_slot, *old_index, moved)?;
                self.transfer((parent, old_slot, *old_index), (parent, new_slot, *new_index))?;
            }
            Delta::ChildMovedInSameContainment {
                parent,
                containment,
                old_index,
                new_index,
                moved_child,
            } => {
                let parent = self.existing(parent)?;
                let slot = self.containment(parent, containment)?;
                let moved = self.existing(moved_child)?;
                self.expect_at(kind, parent, slot, *old_index, moved)?;
                self.forest.direct_move(parent, slot, *old_index, *new_index)?;
            }
            Delta::ChildMovedAndReplacedFromOtherContainment {
                old_parent,
                old_containment,
                old_index,
                new_parent,
                new_containment,
                new_index,
                moved_child,
                replaced_child,
            } => {
                let old_parent = self.existing(old_parent)?;
                let old_slot = self.containment(old_parent, old_containment)?;
                let new_parent = self.existing(new_parent)?;
                let new_slot = self.containment(new_parent, new_containment)?;
                let moved = self.existing(moved_child)?;
                let replaced = self.existing(replaced_child)?;
                self.expect_at(kind, old_parent, old_slot, *old_index, moved)?;
                self.expect_at(kind, new_parent, new_slot, *new_index, replaced)?;
                self.transfer_over((old_parent, old_slot, *old_index), (new_parent, new_slot, *new_index))?;
            }
            Delta::ChildMovedAndReplacedFromOtherContainmentInSameParent {
                parent,
                old_containment,
                old_index,
                new_containment,
                new_index,
                moved_child,
                replaced_child,
            } => {
                let parent = self.existing(parent)?;
                let old_slot = self.containment(parent, old_containment)?;
                let new_slot = self.containment(parent, new_containment)?;
                let moved = self.existing(moved_child)?;
                let replaced = self.existing(replaced_child)?;
                self.expect_at(kind, parent, old_slot, *old_index, moved)?;
                self.expect_at(kind, parent, new_slot, *new_index, replaced)?;
                self.transfer_over((parent, old_slot, *old_index), (parent, new_slot, *new_index))?;
            }
            Delta::ChildMovedAndReplacedInSameContainment {
                parent,
                containment,
                old_index,
                new_index,
                moved_child,
                replaced_child,
            } => {
                let parent = self.existing(parent)?;
                let slot = self.containment(parent, containment)?;
                let moved = self.existing(moved_child)?;
                let replaced = self.existing(replaced_child)?;
                self.expect_at(kind, parent, slot, *old_index, moved)?;
                self.expect_at(kind, parent, slot, *new_index, replaced)?;
                self.forest.direct_move_and_replace(parent, slot, *old_index, *new_index)?;
            }

            Delta::AnnotationAdded {
                parent,
                index,
                new_annotation,
            } => {
                let parent = self.existing(parent)?;
                let annotation = self.introduced(new_annotation)?;
                self.forest.direct_insert(parent, Slot::Annotation, *index, annotation)?;
            }
            Delta::AnnotationDeleted {
                parent,
                index,
                deleted_annotation,
            } => {
                let parent = self.existing(parent)?;
                let annotation = self.existing(deleted_annotation)?;
                self.expect_at(kind, parent, Slot::Annotation, *index, annotation)?;
                self.forest.direct_remove(parent, Slot::Annotation, *index)?;
            }
            Delta::AnnotationReplaced {
                parent,
                index,
                replaced_annotation,
                new_annotation,
            } => {
                let parent = self.existing(parent)?;
                let replaced = self.existing(replaced_annotation)?;
                self.expect_at(kind, parent, Slot::Annotation, *index, replaced)?;
                let annotation = self.introduced(new_annotation)?;
                self.forest.direct_replace(parent, Slot::Annotation, *index, annotation)?;
            }
            Delta::AnnotationMovedFromOtherParent {
                old_parent,
                old_index,
                new_parent,
                new_index,
                moved_annotation,
            } => {
                let old_parent = self.existing(old_parent)?;
                let new_parent = self.existing(new_parent)?;
                let moved = self.existing(moved_annotation)?;
                self.expect_at(kind, old_parent, Slot::Annotation, *old_index, moved)?;
                self.transfer(
                    (old_parent, Slot::Annotation, *old_index),
                    (new_parent, Slot::Annotation, *new_index),
                )?;
            }
            Delta::AnnotationMovedInSameParent {
                parent,
                old_index,
                new_index,
                moved_annotation,
            } => {
                let parent = self.existing(parent)?;
                let moved = self.existing(moved_annotation)?;
                self.expect_at(kind, parent, Slot::Annotation, *old_index, moved)?;
                self.forest.direct_move(parent, Slot::Annotation, *old_index, *new_index)?;
            }
            Delta::AnnotationMovedAndReplacedFromOtherParent {
                old_parent,
                old_index,
                new_parent,
                new_index,
                moved_annotation,
                replaced_annotation,
            } => {
                let old_parent = self.existing(old_parent)?;
                let new_parent = self.existing(new_parent)?;
                let moved = self.existing(moved_annotation)?;
                let replaced = self.existing(replaced_annotation)?;
                self.expect_at(kind, old_parent, Slot::Annotation, *old_index, moved)?;
                self.expect_at(kind, new_parent, Slot::Annotation, *new_index, replaced)?;
                self.transfer_over(
                    (old_parent, Slot::Annotation, *old_index),
                    (new_parent, Slot::Annotation, *new_index),
                )?;
            }
            Delta::AnnotationMovedAndReplacedInSameParent {
                parent,
                old_index,
                new_index,
                moved_annotation,
                replaced_annotation,
            } => {
                let parent = self.existing(parent)?;
                let moved = self.existing(moved_annotation)?;
                let replaced = self.existing(replaced_annotation)?;
                self.expect_at(kind, parent, Slot::Annotation, *old_index, moved)?;
                self.expect_at(kind, parent, Slot::Annotation, *new_index, replaced)?;
                self.forest
                    .direct_move_and_replace(parent, Slot::Annotation, *old_index, *new_index)?;
            }

            Delta::ReferenceAdded {
                parent,
                reference,
                index,
                new_target,
            } => {
                let parent = self.existing(parent)?;
                let feature = self.feature(parent, reference, "reference")?;
                self.forest
                    .direct_insert_reference(parent, feature, *index, new_target.clone())?;
            }
            Delta::ReferenceDeleted {
                parent,
                reference,
                index,
                deleted_target,
            } => {
                let parent = self.existing(parent)?;
                let feature = self.feature(parent, reference, "reference")?;
                self.expect_reference(kind, parent, feature, *index, deleted_target)?;
                self.forest.direct_remove_reference(parent, feature, *index)?;
            }
            Delta::ReferenceChanged {
                parent,
                reference,
                index,
                new_target,
                old_target,
            } => {
                let parent = self.existing(parent)?;
                let feature = self.feature(parent, reference, "reference")?;
                self.expect_reference(kind, parent, feature, *index, old_target)?;
                self.forest
                    .direct_set_reference(parent, feature, *index, new_target.clone())?;
            }
            Delta::ReferenceMoved {
                old_parent,
                old_reference,
                old_index,
                new_parent,
                new_reference,
                new_index,
                target,
            } => {
                let old_parent = self.existing(old_parent)?;
                let old_feature = self.feature(old_parent, old_reference, "reference")?;
                let new_parent = self.existing(new_parent)?;
                let new_feature = self.feature(new_parent, new_reference, "reference")?;
                self.expect_reference(kind, old_parent, old_feature, *old_index, target)?;
                let value = self
                    .forest
                    .direct_remove_reference(old_parent, old_feature, *old_index)?;
                if let Err(err) =
                    self.forest
                        .direct_insert_reference(new_parent, new_feature, *new_index, value.clone())
                {
                    self.forest
                        .direct_insert_reference(old_parent, old_feature, *old_index, value)?;
                    return Err(err.into());
                }
            }
            Delta::ReferenceMovedInSameReference {
                parent,
                reference,
                old_index,
                new_index,
                target,
            } => {
                let parent = self.existing(parent)?;
                let feature = self.feature(parent, reference, "reference")?;
                self.expect_reference(kind, parent, feature, *old_index, target)?;
                self.forest
                    .direct_move_reference(parent, feature, *old_index, *new_index)?;
            }

            Delta::Composite { parts } => {
                for part in parts {
                    self.apply(part)?;
                }
            }
            Delta::NoOp => {}
        }
        tracing::debug!(kind, "delta applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::schema::{Classifier, Feature, Language, PropertyType, SchemaRegistry};
    use arbor_core::NodeId;
    use std::sync::Arc;

    fn forest() -> (Forest, MetaPointer) {
        let language = Language::builder("a", "1")
            .classifier(
                Classifier::concept("N")
                    .partition()
                    .feature(Feature::property("name", PropertyType::String).optional())
                    .feature(Feature::containment("kids", "N").optional().multiple()),
            )
            .build()
            .unwrap();
        let n = language.pointer("N");
        let registry = SchemaRegistry::new().with_language(language).unwrap();
        (Forest::new(Arc::new(registry)), n)
    }

    #[test]
    fn test_direct_replay_onto_clone() {
        let (mut source, n) = forest();
        let root = source.create_node(&n, "root").unwrap();
        let a = source.create_node(&n, "a").unwrap();
        let b = source.create_node(&n, "b").unwrap();
        let mut replica = source.clone();

        source.add_partition(root).unwrap();
        source.containment(root, "kids").unwrap().add(a).unwrap();
        source.containment(root, "kids").unwrap().add(b).unwrap();
        source.containment(root, "kids").unwrap().move_to(1, 0).unwrap();
        source.property(a, "name").unwrap().set_value("alpha").unwrap();

        for delta in source.take_deltas() {
            apply_delta(&mut replica, &delta).unwrap();
        }
        assert!(replica.take_deltas().is_empty());
        assert_eq!(replica.partitions(), &[root]);
        assert_eq!(replica.containment(root, "kids").unwrap().get().unwrap(), &[b, a]);
        assert_eq!(
            replica.property(a, "name").unwrap().get().unwrap(),
            Some(&PropertyValue::from("alpha"))
        );
    }

    #[test]
    fn test_mismatched_index_is_rejected() {
        let (mut source, n) = forest();
        let root = source.create_node(&n, "root").unwrap();
        let a = source.create_node(&n, "a").unwrap();
        source.containment(root, "kids").unwrap().add(a).unwrap();
        let mut replica = source.clone();
        source.take_deltas();
        replica.take_deltas();

        let delta = Delta::ChildDeleted {
            parent: source.node_ref(root).unwrap(),
            containment: MetaPointer::new("a", "1", "kids"),
            index: 1,
            deleted_child: source.node_ref(a).unwrap(),
        };
        let err = apply_delta(&mut replica, &delta).unwrap_err();
        assert!(matches!(err, ApplyError::ApplicationMismatch { delta: "ChildDeleted", .. }));
        assert_eq!(replica.node(a).unwrap().parent(), Some(root));
    }

    #[test]
    fn test_failed_composite_leaves_forest_untouched() {
        let (mut source, n) = forest();
        let root = source.create_node(&n, "root").unwrap();
        let a = source.create_node(&n, "a").unwrap();
        let mut replica = source.clone();

        source.property(root, "name").unwrap().set_value("first").unwrap();
        let set_name = source.take_deltas().remove(0);
        let composite = Delta::Composite {
            parts: vec![
                set_name.clone(),
                Delta::ChildDeleted {
                    parent: source.node_ref(root).unwrap(),
                    containment: MetaPointer::new("a", "1", "kids"),
                    index: 0,
                    deleted_child: source.node_ref(a).unwrap(),
                },
            ],
        };

        let err = apply_delta(&mut replica, &composite).unwrap_err();
        assert!(matches!(err, ApplyError::ApplicationMismatch { delta: "ChildDeleted", .. }));
        assert_eq!(replica.property(root, "name").unwrap().get().unwrap(), None);

        apply_delta(&mut replica, &set_name).unwrap();
        assert_eq!(
            replica.property(root, "name").unwrap().get().unwrap(),
            Some(&PropertyValue::from("first"))
        );
    }

    #[test]
    fn test_failed_composite_copies_nothing_over() {
        let (mut source, n) = forest();
        let root = source.create_node(&n, "root").unwrap();
        let mut target = source.clone();
        let mut mapping = IdMapping::new();
        mapping.update_with(&target, root).unwrap();

        let a = source.create_node(&n, "a").unwrap();
        source.containment(root, "kids").unwrap().add(a).unwrap();
        let added = source.take_deltas().remove(0);
        let composite = Delta::Composite {
            parts: vec![
                added.clone(),
                Delta::ChildDeleted {
                    parent: source.node_ref(root).unwrap(),
                    containment: MetaPointer::new("a", "1", "kids"),
                    index: 3,
                    deleted_child: source.node_ref(a).unwrap(),
                },
            ],
        };

        assert!(apply_delta_with_lookup(&mut target, &mut mapping, &source, &composite).is_err());
        assert_eq!(target.len(), 1);
        assert!(!mapping.contains(&NodeId::new("a")));
        assert!(target.containment(root, "kids").unwrap().is_empty().unwrap());

        apply_delta_with_lookup(&mut target, &mut mapping, &source, &added).unwrap();
        let copy = mapping.from_id(&NodeId::new("a")).unwrap();
        assert_eq!(target.containment(root, "kids").unwrap().get().unwrap(), &[copy]);
    }

    #[test]
    fn test_lookup_reports_unknown_and_mismatched_nodes() {
        let (mut source, n) = forest();
        let root = source.create_node(&n, "root").unwrap();
        let (mut target, _) = forest();
        let mut mapping = IdMapping::new();

        source.property(root, "name").unwrap().set_value("x").unwrap();
        let delta = source.take_deltas().remove(0);
        let err = apply_delta_with_lookup(&mut target, &mut mapping, &source, &delta).unwrap_err();
        assert_eq!(err, ApplyError::UnknownNode(NodeId::new("root")));

        let other = Language::builder("b", "1")
            .classifier(Classifier::concept("M").feature(Feature::property("name", PropertyType::String).optional()))
            .build()
            .unwrap();
        let m = other.pointer("M");
        let mut registry = SchemaRegistry::new();
        registry.register(other).unwrap();
        let mut foreign = Forest::new(Arc::new(registry));
        let impostor = foreign.create_node(&m, "root").unwrap();
        mapping.register(NodeId::new("root"), impostor);
        let err = apply_delta_with_lookup(&mut foreign, &mut mapping, &source, &delta).unwrap_err();
        assert!(matches!(err, ApplyError::ClassifierMismatch { .. }));
    }
}
