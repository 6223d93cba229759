//! Value managers: the typed holders behind each feature of a node.
//!
//! A manager is a short-lived handle borrowing the forest mutably. Every
//! operation validates first, then mutates, then emits exactly one delta (or
//! nothing when the edit does not change observable state).
//!
//! ```rust
//! # use std::sync::Arc;
//! # use arbor_core::schema::{Classifier, Feature, Language, PropertyType, SchemaRegistry};
//! # use arbor_core::Forest;
//! let language = Language::builder("docs", "1")
//!     .classifier(
//!         Classifier::concept("Doc")
//!             .partition()
//!             .feature(Feature::property("title", PropertyType::String).optional())
//!             .feature(Feature::containment("sections", "Section").optional().multiple()),
//!     )
//!     .classifier(Classifier::concept("Section"))
//!     .build()
//!     .unwrap();
//! let doc_type = language.pointer("Doc");
//! let section_type = language.pointer("Section");
//! let mut forest = Forest::new(Arc::new(SchemaRegistry::new().with_language(language).unwrap()));
//!
//! let doc = forest.create_node(&doc_type, "doc").unwrap();
//! let section = forest.create_node(&section_type, "s1").unwrap();
//! forest.property(doc, "title").unwrap().set_value("Notes").unwrap();
//! forest.containment(doc, "sections").unwrap().add(section).unwrap();
//!
//! let kinds: Vec<_> = forest.take_deltas().iter().map(|d| d.kind()).collect();
//! assert_eq!(kinds, ["PropertyAdded", "ChildAdded"]);
//! ```

use crate::builder::{self, Position};
use crate::delta::Delta;
use crate::error::{Error, Result};
use crate::forest::{Forest, Location};
use crate::ids::NodeKey;
use crate::node::Slot;
use crate::schema::Feature;
use crate::value::{PropertyValue, ReferenceValue};
use std::sync::Arc;

impl Forest {
    /// Manager for the property `name` of `node`.
    pub fn property(&mut self, node: NodeKey, name: &str) -> Result<PropertyManager<'_>> {
        let (index, feature) = self.feature(node, name, "property")?;
        Ok(PropertyManager {
            forest: self,
            node,
            index,
            feature,
        })
    }

    /// Manager for the containment `name` of `node`.
    pub fn containment(&mut self, node: NodeKey, name: &str) -> Result<ContainmentManager<'_>> {
        let (index, feature) = self.feature(node, name, "containment")?;
        Ok(ContainmentManager {
            forest: self,
            node,
            index,
            feature,
        })
    }

    /// Manager for the reference `name` of `node`.
    pub fn reference(&mut self, node: NodeKey, name: &str) -> Result<ReferenceManager<'_>> {
        let (index, feature) = self.feature(node, name, "reference")?;
        Ok(ReferenceManager {
            forest: self,
            node,
            index,
            feature,
        })
    }

    /// Manager for the annotation list of `node`.
    pub fn annotations(&mut self, node: NodeKey) -> Result<AnnotationManager<'_>> {
        self.node(node)?;
        Ok(AnnotationManager { forest: self, node })
    }

    fn check_can_vacate(&self, from: &Location) -> Result<()> {
        if let Slot::Containment(feature) = from.slot {
            let feature = self.feature_at(from.parent, feature)?;
            if feature.is_required() && self.slot_items(from.parent, from.slot)?.len() == 1 {
                return Err(Error::UnsetRequired {
                    feature: feature.name.clone(),
                    node: self.id_of(from.parent)?.clone(),
                });
            }
        }
        Ok(())
    }

    /// Put `child` at `index`, inserting. A child already in this list ends
    /// up at `index` clamped to the last position.
    fn place_at(&mut self, parent: NodeKey, slot: Slot, index: usize, child: NodeKey) -> Result<()> {
        let length = self.slot_items(parent, slot)?.len();
        if index > length {
            return Err(Error::IndexOutOfBounds {
                op: "insert",
                index,
                length,
            });
        }
        let node = self.node_ref(child)?;
        match self.location(child)? {
            Some(from) if from.parent == parent && from.slot == slot => {
                let target = index.min(length - 1);
                if target == from.index {
                    return Ok(());
                }
                let origin = Position::resolve(self, from)?;
                let destination = Position::resolve(self, Location { index: target, ..from })?;
                let delta = builder::moved(origin, destination, node)?;
                self.direct_move(parent, slot, from.index, target)?;
                self.emit(delta);
            }
            Some(from) => {
                self.check_placeable(parent, slot, child)?;
                self.check_can_vacate(&from)?;
                let origin = Position::resolve(self, from)?;
                let destination = Position::resolve(self, Location { parent, slot, index })?;
                let delta = builder::moved(origin, destination, node)?;
                self.direct_remove(from.parent, from.slot, from.index)?;
                self.direct_insert(parent, slot, index, child)?;
                self.emit(delta);
            }
            None => {
                self.check_placeable(parent, slot, child)?;
                let destination = Position::resolve(self, Location { parent, slot, index })?;
                self.direct_insert(parent, slot, index, child)?;
                self.emit(builder::added(destination, node));
            }
        }
        Ok(())
    }

    /// Put `child` in place of the occupant at `index`, detaching the occupant.
    fn place_over(&mut self, parent: NodeKey, slot: Slot, index: usize, child: NodeKey) -> Result<()> {
        let items = self.slot_items(parent, slot)?;
        let Some(&occupant) = items.get(index) else {
            return Err(Error::IndexOutOfBounds {
                op: "replace",
                index,
                length: items.len(),
            });
        };
        if occupant == child {
            return Ok(());
        }
        let node = self.node_ref(child)?;
        let replaced = self.node_ref(occupant)?;
        let destination = Position::resolve(self, Location { parent, slot, index })?;
        match self.location(child)? {
            Some(from) if from.parent == parent && from.slot == slot => {
                let origin = Position::resolve(self, from)?;
                let delta = builder::moved_and_replaced(origin, destination, node, replaced)?;
                self.direct_move_and_replace(parent, slot, from.index, index)?;
                self.emit(delta);
            }
            Some(from) => {
                self.check_placeable(parent, slot, child)?;
                self.check_can_vacate(&from)?;
                let origin = Position::resolve(self, from)?;
                let delta = builder::moved_and_replaced(origin, destination, node, replaced)?;
                self.direct_remove(from.parent, from.slot, from.index)?;
                self.direct_replace(parent, slot, index, child)?;
                self.emit(delta);
            }
            None => {
                self.check_placeable(parent, slot, child)?;
                self.direct_replace(parent, slot, index, child)?;
                self.emit(builder::replaced(destination, replaced, node));
            }
        }
        Ok(())
    }

    fn take_at(&mut self, parent: NodeKey, slot: Slot, index: usize) -> Result<NodeKey> {
        let items = self.slot_items(parent, slot)?;
        let Some(&child) = items.get(index) else {
            return Err(Error::IndexOutOfBounds {
                op: "remove",
                index,
                length: items.len(),
            });
        };
        let location = Location { parent, slot, index };
        self.check_can_vacate(&location)?;
        let at = Position::resolve(self, location)?;
        let node = self.node_ref(child)?;
        self.direct_remove(parent, slot, index)?;
        self.emit(builder::deleted(at, node));
        Ok(child)
    }

    fn reorder(&mut self, parent: NodeKey, slot: Slot, from: usize, to: usize) -> Result<()> {
        let items = self.slot_items(parent, slot)?;
        let length = items.len();
        let Some(&child) = items.get(from) else {
            return Err(Error::IndexOutOfBounds {
                op: "move",
                index: from,
                length,
            });
        };
        if to >= length {
            return Err(Error::IndexOutOfBounds {
                op: "move",
                index: to,
                length,
            });
        }
        if from == to {
            return Ok(());
        }
        let origin = Position::resolve(self, Location { parent, slot, index: from })?;
        let destination = Position::resolve(self, Location { parent, slot, index: to })?;
        let delta = builder::moved(origin, destination, self.node_ref(child)?)?;
        self.direct_move(parent, slot, from, to)?;
        self.emit(delta);
        Ok(())
    }

    fn index_in(&self, parent: NodeKey, slot: Slot, child: NodeKey) -> Result<usize> {
        match self.location(child)? {
            Some(location) if location.parent == parent && location.slot == slot => Ok(location.index),
            _ => Err(Error::NotContained {
                node: self.id_of(child)?.clone(),
                parent: self.id_of(parent)?.clone(),
                feature: self.slot_name(parent, slot),
            }),
        }
    }
}

fn unset(forest: &Forest, node: NodeKey, feature: &Feature) -> Result<Error> {
    Ok(Error::UnsetRequired {
        feature: feature.name.clone(),
        node: forest.id_of(node)?.clone(),
    })
}

fn require_single(feature: &Feature, op: &'static str) -> Result<()> {
    if feature.is_multiple() {
        return Err(Error::IllegalOperation {
            op,
            feature: feature.name.clone(),
        });
    }
    Ok(())
}

fn require_multiple(feature: &Feature, op: &'static str) -> Result<()> {
    if !feature.is_multiple() {
        return Err(Error::IllegalOperation {
            op,
            feature: feature.name.clone(),
        });
    }
    Ok(())
}

/// Holder of a single primitive value.
pub struct PropertyManager<'a> {
    forest: &'a mut Forest,
    node: NodeKey,
    index: usize,
    feature: Arc<Feature>,
}

impl PropertyManager<'_> {
    pub fn feature(&self) -> &Feature {
        &self.feature
    }

    pub fn is_set(&self) -> Result<bool> {
        Ok(self.forest.node(self.node)?.property_value(self.index).is_some())
    }

    /// Current value. Reading an unset required property is an error.
    pub fn get(&self) -> Result<Option<&PropertyValue>> {
        match self.forest.node(self.node)?.property_value(self.index) {
            None if self.feature.is_required() => Err(unset(self.forest, self.node, &self.feature)?),
            value => Ok(value),
        }
    }

    pub fn set(&mut self, value: Option<PropertyValue>) -> Result<()> {
        if let Some(value) = &value {
            let expected = self.feature.property_type();
            if expected != Some(value.property_type()) {
                return Err(Error::InvalidPropertyValue {
                    property: self.feature.name.clone(),
                    reason: format!("expected {:?}, got {:?}", expected, value.property_type()),
                });
            }
        }

        let current = self.forest.node(self.node)?.property_value(self.index).cloned();
        if current == value {
            return Ok(());
        }
        let node = self.forest.node_ref(self.node)?;
        let property = self.feature.meta_pointer.clone();
        let delta = match (current, value.clone()) {
            (None, Some(value)) => Delta::PropertyAdded {
                node,
                property,
                value,
            },
            (Some(old_value), Some(new_value)) => Delta::PropertyChanged {
                node,
                property,
                old_value,
                new_value,
            },
            (Some(old_value), None) => {
                if self.feature.is_required() {
                    return Err(unset(self.forest, self.node, &self.feature)?);
                }
                Delta::PropertyDeleted {
                    node,
                    property,
                    old_value,
                }
            }
            (None, None) => return Ok(()),
        };
        self.forest.direct_set_property(self.node, self.index, value)?;
        self.forest.emit(delta);
        Ok(())
    }

    pub fn set_value(&mut self, value: impl Into<PropertyValue>) -> Result<()> {
        self.set(Some(value.into()))
    }

    pub fn clear(&mut self) -> Result<()> {
        self.set(None)
    }
}

/// Holder of the children of one containment feature.
pub struct ContainmentManager<'a> {
    forest: &'a mut Forest,
    node: NodeKey,
    index: usize,
    feature: Arc<Feature>,
}

impl ContainmentManager<'_> {
    pub fn feature(&self) -> &Feature {
        &self.feature
    }

    fn slot(&self) -> Slot {
        Slot::Containment(self.index)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.forest.node(self.node)?.children_of(self.index).len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All children. Reading an empty required containment is an error.
    pub fn get(&self) -> Result<&[NodeKey]> {
        let children = self.forest.node(self.node)?.children_of(self.index);
        if children.is_empty() && self.feature.is_required() {
            return Err(unset(self.forest, self.node, &self.feature)?);
        }
        Ok(children)
    }

    pub fn get_single(&self) -> Result<Option<NodeKey>> {
        require_single(&self.feature, "get_single")?;
        Ok(self.get()?.first().copied())
    }

    /// Set or clear a single containment.
    ///
    /// A contained `child` is moved here; a previous occupant is detached.
    pub fn set(&mut self, child: Option<NodeKey>) -> Result<()> {
        require_single(&self.feature, "set")?;
        let occupied = !self.forest.node(self.node)?.children_of(self.index).is_empty();
        match (child, occupied) {
            (Some(child), false) => self.forest.place_at(self.node, self.slot(), 0, child),
            (Some(child), true) => self.forest.place_over(self.node, self.slot(), 0, child),
            (None, true) => self.forest.take_at(self.node, self.slot(), 0).map(|_| ()),
            (None, false) => Ok(()),
        }
    }

    pub fn add(&mut self, child: NodeKey) -> Result<()> {
        require_multiple(&self.feature, "add")?;
        let length = self.len()?;
        self.forest.place_at(self.node, self.slot(), length, child)
    }

    pub fn insert_at(&mut self, index: usize, child: NodeKey) -> Result<()> {
        require_multiple(&self.feature, "insert_at")?;
        self.forest.place_at(self.node, self.slot(), index, child)
    }

    pub fn replace_at(&mut self, index: usize, child: NodeKey) -> Result<()> {
        require_multiple(&self.feature, "replace_at")?;
        self.forest.place_over(self.node, self.slot(), index, child)
    }

    pub fn remove(&mut self, child: NodeKey) -> Result<()> {
        let index = self.forest.index_in(self.node, self.slot(), child)?;
        self.forest.take_at(self.node, self.slot(), index).map(|_| ())
    }

    pub fn remove_at(&mut self, index: usize) -> Result<NodeKey> {
        require_multiple(&self.feature, "remove_at")?;
        self.forest.take_at(self.node, self.slot(), index)
    }

    pub fn move_to(&mut self, from: usize, to: usize) -> Result<()> {
        require_multiple(&self.feature, "move_to")?;
        self.forest.reorder(self.node, self.slot(), from, to)
    }
}

/// Holder of the annotations attached to a node.
pub struct AnnotationManager<'a> {
    forest: &'a mut Forest,
    node: NodeKey,
}

impl AnnotationManager<'_> {
    pub fn get(&self) -> Result<&[NodeKey]> {
        Ok(self.forest.node(self.node)?.annotations())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.get()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.get()?.is_empty())
    }

    pub fn add(&mut self, annotation: NodeKey) -> Result<()> {
        let length = self.len()?;
        self.forest.place_at(self.node, Slot::Annotation, length, annotation)
    }

    pub fn insert_at(&mut self, index: usize, annotation: NodeKey) -> Result<()> {
        self.forest.place_at(self.node, Slot::Annotation, index, annotation)
    }

    pub fn replace_at(&mut self, index: usize, annotation: NodeKey) -> Result<()> {
        self.forest.place_over(self.node, Slot::Annotation, index, annotation)
    }

    pub fn remove(&mut self, annotation: NodeKey) -> Result<()> {
        let index = self.forest.index_in(self.node, Slot::Annotation, annotation)?;
        self.forest.take_at(self.node, Slot::Annotation, index).map(|_| ())
    }

    pub fn remove_at(&mut self, index: usize) -> Result<NodeKey> {
        self.forest.take_at(self.node, Slot::Annotation, index)
    }

    pub fn move_to(&mut self, from: usize, to: usize) -> Result<()> {
        self.forest.reorder(self.node, Slot::Annotation, from, to)
    }
}

/// Holder of the entries of one reference feature.
pub struct ReferenceManager<'a> {
    forest: &'a mut Forest,
    node: NodeKey,
    index: usize,
    feature: Arc<Feature>,
}

impl ReferenceManager<'_> {
    pub fn feature(&self) -> &Feature {
        &self.feature
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.forest.node(self.node)?.references_of(self.index).len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All entries. Reading an empty required reference is an error.
    pub fn get(&self) -> Result<&[ReferenceValue]> {
        let refs = self.forest.node(self.node)?.references_of(self.index);
        if refs.is_empty() && self.feature.is_required() {
            return Err(unset(self.forest, self.node, &self.feature)?);
        }
        Ok(refs)
    }

    pub fn get_single(&self) -> Result<Option<&ReferenceValue>> {
        require_single(&self.feature, "get_single")?;
        Ok(self.get()?.first())
    }

    pub fn set(&mut self, value: Option<ReferenceValue>) -> Result<()> {
        require_single(&self.feature, "set")?;
        let current = self.forest.node(self.node)?.references_of(self.index).first().cloned();
        match (current, value) {
            (None, Some(value)) => self.insert_entry(0, value),
            (Some(current), Some(value)) => {
                if current != value {
                    self.replace_entry(0, value)?;
                }
                Ok(())
            }
            (Some(_), None) => self.remove_entry(0).map(|_| ()),
            (None, None) => Ok(()),
        }
    }

    pub fn add(&mut self, value: ReferenceValue) -> Result<()> {
        require_multiple(&self.feature, "add")?;
        let length = self.len()?;
        self.insert_entry(length, value)
    }

    pub fn insert_at(&mut self, index: usize, value: ReferenceValue) -> Result<()> {
        require_multiple(&self.feature, "insert_at")?;
        self.insert_entry(index, value)
    }

    pub fn replace_at(&mut self, index: usize, value: ReferenceValue) -> Result<()> {
        require_multiple(&self.feature, "replace_at")?;
        let refs = self.forest.node(self.node)?.references_of(self.index);
        if refs.get(index) == Some(&value) {
            return Ok(());
        }
        self.replace_entry(index, value)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<ReferenceValue> {
        require_multiple(&self.feature, "remove_at")?;
        self.remove_entry(index)
    }

    pub fn move_to(&mut self, from: usize, to: usize) -> Result<()> {
        require_multiple(&self.feature, "move_to")?;
        let refs = self.forest.node(self.node)?.references_of(self.index);
        let length = refs.len();
        let Some(target) = refs.get(from).cloned() else {
            return Err(Error::IndexOutOfBounds {
                op: "move",
                index: from,
                length,
            });
        };
        if from == to {
            return Ok(());
        }
        self.forest.direct_move_reference(self.node, self.index, from, to)?;
        let parent = self.forest.node_ref(self.node)?;
        self.forest.emit(Delta::ReferenceMovedInSameReference {
            parent,
            reference: self.feature.meta_pointer.clone(),
            old_index: from,
            new_index: to,
            target,
        });
        Ok(())
    }

    fn insert_entry(&mut self, index: usize, value: ReferenceValue) -> Result<()> {
        self.forest
            .direct_insert_reference(self.node, self.index, index, value.clone())?;
        let parent = self.forest.node_ref(self.node)?;
        self.forest.emit(Delta::ReferenceAdded {
            parent,
            reference: self.feature.meta_pointer.clone(),
            index,
            new_target: value,
        });
        Ok(())
    }

    fn replace_entry(&mut self, index: usize, value: ReferenceValue) -> Result<()> {
        let old_target = self
            .forest
            .direct_set_reference(self.node, self.index, index, value.clone())?;
        let parent = self.forest.node_ref(self.node)?;
        self.forest.emit(Delta::ReferenceChanged {
            parent,
            reference: self.feature.meta_pointer.clone(),
            index,
            new_target: value,
            old_target,
        });
        Ok(())
    }

    fn remove_entry(&mut self, index: usize) -> Result<ReferenceValue> {
        if self.feature.is_required() && self.len()? == 1 {
            return Err(unset(self.forest, self.node, &self.feature)?);
        }
        let deleted_target = self.forest.direct_remove_reference(self.node, self.index, index)?;
        let parent = self.forest.node_ref(self.node)?;
        self.forest.emit(Delta::ReferenceDeleted {
            parent,
            reference: self.feature.meta_pointer.clone(),
            index,
            deleted_target: deleted_target.clone(),
        });
        Ok(deleted_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MetaPointer;
    use crate::schema::{Classifier, Language, PropertyType, SchemaRegistry};

    struct Fixture {
        forest: Forest,
        language: Language,
    }

    impl Fixture {
        fn new() -> Self {
            let language = Language::builder("t", "1")
                .classifier(
                    Classifier::concept("Box")
                        .partition()
                        .feature(Feature::property("name", PropertyType::String).optional())
                        .feature(Feature::property("size", PropertyType::Integer))
                        .feature(Feature::containment("single", "Box").optional())
                        .feature(Feature::containment("items", "Box").optional().multiple())
                        .feature(Feature::containment("core", "Box"))
                        .feature(Feature::reference("link", "Box").optional())
                        .feature(Feature::reference("links", "Box").multiple()),
                )
                .classifier(Classifier::annotation("Note"))
                .build()
                .unwrap();
            let registry = SchemaRegistry::new().with_language(language.clone()).unwrap();
            Self {
                forest: Forest::new(Arc::new(registry)),
                language,
            }
        }

        fn make(&mut self, id: &str) -> NodeKey {
            let pointer: MetaPointer = self.language.pointer("Box");
            self.forest.create_node(&pointer, id).unwrap()
        }

        fn note(&mut self, id: &str) -> NodeKey {
            let pointer = self.language.pointer("Note");
            self.forest.create_node(&pointer, id).unwrap()
        }

        fn kinds(&mut self) -> Vec<&'static str> {
            self.forest.take_deltas().iter().map(|d| d.kind()).collect()
        }
    }

    #[test]
    fn test_property_add_change_delete() {
        let mut f = Fixture::new();
        let node = f.make("n");

        f.forest.property(node, "name").unwrap().set_value("a").unwrap();
        f.forest.property(node, "name").unwrap().set_value("b").unwrap();
        f.forest.property(node, "name").unwrap().set_value("b").unwrap();
        f.forest.property(node, "name").unwrap().clear().unwrap();

        assert_eq!(f.kinds(), ["PropertyAdded", "PropertyChanged", "PropertyDeleted"]);
    }

    #[test]
    fn test_required_property_reads_and_clears() {
        let mut f = Fixture::new();
        let node = f.make("n");

        let err = f.forest.property(node, "size").unwrap().get().unwrap_err();
        assert!(matches!(err, Error::UnsetRequired { .. }));

        f.forest.property(node, "size").unwrap().set_value(3i64).unwrap();
        assert!(f.forest.property(node, "size").unwrap().clear().is_err());
        assert_eq!(
            f.forest.property(node, "size").unwrap().get().unwrap(),
            Some(&PropertyValue::Integer(3))
        );
    }

    #[test]
    fn test_property_type_is_checked() {
        let mut f = Fixture::new();
        let node = f.make("n");
        let err = f.forest.property(node, "size").unwrap().set_value("big").unwrap_err();
        assert!(matches!(err, Error::InvalidPropertyValue { .. }));
        assert!(f.forest.take_deltas().is_empty());
    }

    #[test]
    fn test_wrong_feature_kind() {
        let mut f = Fixture::new();
        let node = f.make("n");
        assert!(matches!(
            f.forest.containment(node, "name"),
            Err(Error::FeatureKindMismatch { .. })
        ));
        assert!(matches!(
            f.forest.property(node, "colour"),
            Err(Error::FeatureNotFound { .. })
        ));
    }

    #[test]
    fn test_single_containment_replace_detaches_occupant() {
        let mut f = Fixture::new();
        let parent = f.make("p");
        let first = f.make("a");
        let second = f.make("b");

        f.forest.containment(parent, "single").unwrap().set(Some(first)).unwrap();
        f.forest.containment(parent, "single").unwrap().set(Some(second)).unwrap();

        assert_eq!(f.kinds(), ["ChildAdded", "ChildReplaced"]);
        assert!(f.forest.node(first).unwrap().parentage().is_none());
        assert_eq!(f.forest.node(second).unwrap().parent(), Some(parent));
    }

    #[test]
    fn test_multi_insert_of_own_child_moves_it() {
        let mut f = Fixture::new();
        let parent = f.make("p");
        let a = f.make("a");
        let b = f.make("b");
        let c = f.make("c");
        for child in [a, b, c] {
            f.forest.containment(parent, "items").unwrap().add(child).unwrap();
        }
        f.forest.take_deltas();

        f.forest.containment(parent, "items").unwrap().insert_at(3, a).unwrap();
        assert_eq!(f.forest.containment(parent, "items").unwrap().get().unwrap(), &[b, c, a]);

        let deltas = f.forest.take_deltas();
        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            Delta::ChildMovedInSameContainment {
                old_index,
                new_index,
                ..
            } => {
                assert_eq!((*old_index, *new_index), (0, 2));
            }
            other => panic!("unexpected delta {:?}", other),
        }
    }

    #[test]
    fn test_move_between_sibling_containments() {
        let mut f = Fixture::new();
        let parent = f.make("p");
        let child = f.make("c");
        f.forest.containment(parent, "items").unwrap().add(child).unwrap();
        f.forest.containment(parent, "single").unwrap().set(Some(child)).unwrap();

        assert_eq!(
            f.kinds(),
            ["ChildAdded", "ChildMovedFromOtherContainmentInSameParent"]
        );
        assert!(f.forest.containment(parent, "items").unwrap().is_empty().unwrap());
    }

    #[test]
    fn test_cycle_is_rejected_without_side_effects() {
        let mut f = Fixture::new();
        let outer = f.make("outer");
        let inner = f.make("inner");
        f.forest.containment(outer, "items").unwrap().add(inner).unwrap();
        f.forest.take_deltas();

        let err = f.forest.containment(inner, "items").unwrap().add(outer).unwrap_err();
        assert!(matches!(err, Error::ContainmentCycle { .. }));
        let err = f.forest.containment(inner, "single").unwrap().set(Some(inner)).unwrap_err();
        assert!(matches!(err, Error::ContainmentCycle { .. }));
        assert!(f.forest.take_deltas().is_empty());
    }

    #[test]
    fn test_required_containment_cannot_be_vacated() {
        let mut f = Fixture::new();
        let holder = f.make("holder");
        let other = f.make("other");
        let child = f.make("child");
        f.forest.containment(holder, "core").unwrap().set(Some(child)).unwrap();

        let err = f.forest.containment(other, "items").unwrap().add(child).unwrap_err();
        assert!(matches!(err, Error::UnsetRequired { .. }));
        assert!(f.forest.containment(holder, "core").unwrap().set(None).is_err());
        assert_eq!(f.forest.node(child).unwrap().parent(), Some(holder));
    }

    #[test]
    fn test_annotations_are_kept_apart_from_containments() {
        let mut f = Fixture::new();
        let node = f.make("n");
        let note = f.note("note");
        let plain = f.make("plain");

        assert!(matches!(
            f.forest.containment(node, "items").unwrap().add(note),
            Err(Error::AnnotationInContainment(_))
        ));
        assert!(matches!(
            f.forest.annotations(node).unwrap().add(plain),
            Err(Error::NotAnAnnotation(_))
        ));

        f.forest.annotations(node).unwrap().add(note).unwrap();
        assert_eq!(f.forest.children(node).unwrap(), vec![note]);
        assert_eq!(f.kinds(), ["AnnotationAdded"]);
    }

    #[test]
    fn test_partition_cannot_be_contained() {
        let mut f = Fixture::new();
        let root = f.make("root");
        let other = f.make("other");
        f.forest.add_partition(root).unwrap();

        let err = f.forest.containment(other, "items").unwrap().add(root).unwrap_err();
        assert!(matches!(err, Error::PartitionNotContainable(_)));
    }

    #[test]
    fn test_references_single_and_multi() {
        let mut f = Fixture::new();
        let node = f.make("n");

        f.forest.reference(node, "link").unwrap().set(Some(ReferenceValue::to("x"))).unwrap();
        f.forest.reference(node, "link").unwrap().set(Some(ReferenceValue::to("y"))).unwrap();
        f.forest.reference(node, "link").unwrap().set(None).unwrap();

        {
            let mut links = f.forest.reference(node, "links").unwrap();
            links.add(ReferenceValue::to("a")).unwrap();
            links.add(ReferenceValue::to("b")).unwrap();
            links.move_to(1, 0).unwrap();
            assert_eq!(links.get().unwrap()[0], ReferenceValue::to("b"));
            links.remove_at(0).unwrap();
            assert!(matches!(links.remove_at(0), Err(Error::UnsetRequired { .. })));
        }

        assert_eq!(
            f.kinds(),
            [
                "ReferenceAdded",
                "ReferenceChanged",
                "ReferenceDeleted",
                "ReferenceAdded",
                "ReferenceAdded",
                "ReferenceMovedInSameReference",
                "ReferenceDeleted",
            ]
        );
    }
}
