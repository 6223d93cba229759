//! End-to-end edits on a small schema, checking the exact deltas emitted.

use arbor_core::schema::{Classifier, Feature, Language, PropertyType, SchemaRegistry};
use arbor_core::{Delta, Error, Forest, MetaPointer, NodeId, NodeKey, PropertyValue};
use std::sync::Arc;

fn language() -> Language {
    Language::builder("test", "1")
        .classifier(
            Classifier::concept("Container")
                .partition()
                .feature(Feature::containment("c0_1", "Container").optional())
                .feature(Feature::containment("c0_n", "Container").optional().multiple())
                .feature(Feature::containment("c1_n", "Container").multiple())
                .feature(Feature::property("label", PropertyType::String).optional()),
        )
        .classifier(Classifier::annotation("Comment"))
        .build()
        .unwrap()
}

struct Setup {
    forest: Forest,
    container: MetaPointer,
    comment: MetaPointer,
}

fn setup() -> Setup {
    let language = language();
    let container = language.pointer("Container");
    let comment = language.pointer("Comment");
    let registry = SchemaRegistry::new().with_language(language).unwrap();
    Setup {
        forest: Forest::new(Arc::new(registry)),
        container,
        comment,
    }
}

impl Setup {
    fn node(&mut self, id: &str) -> NodeKey {
        let container = self.container.clone();
        self.forest.create_node(&container, id).unwrap()
    }

    fn comment(&mut self, id: &str) -> NodeKey {
        let comment = self.comment.clone();
        self.forest.create_node(&comment, id).unwrap()
    }
}

fn c0_1() -> MetaPointer {
    MetaPointer::new("test", "1", "c0_1")
}

#[test]
fn test_set_then_replace_single_child() {
    let mut s = setup();
    let parent = s.node("parent");
    let child = s.node("child");
    let child2 = s.node("child2");

    s.forest.containment(parent, "c0_1").unwrap().set(Some(child)).unwrap();
    let deltas = s.forest.take_deltas();
    assert_eq!(
        deltas,
        vec![Delta::ChildAdded {
            parent: s.forest.node_ref(parent).unwrap(),
            containment: c0_1(),
            index: 0,
            new_child: s.forest.node_ref(child).unwrap(),
        }]
    );

    s.forest.containment(parent, "c0_1").unwrap().set(Some(child2)).unwrap();
    let deltas = s.forest.take_deltas();
    assert_eq!(
        deltas,
        vec![Delta::ChildReplaced {
            parent: s.forest.node_ref(parent).unwrap(),
            containment: c0_1(),
            index: 0,
            replaced_child: s.forest.node_ref(child).unwrap(),
            new_child: s.forest.node_ref(child2).unwrap(),
        }]
    );
    assert!(s.forest.node(child).unwrap().parent().is_none());
}

#[test]
fn test_move_from_other_parent_emits_single_delta() {
    let mut s = setup();
    let src = s.node("src");
    let dst = s.node("dst");
    let child = s.node("child");

    s.forest.containment(src, "c0_1").unwrap().set(Some(child)).unwrap();
    s.forest.take_deltas();

    s.forest.containment(dst, "c0_1").unwrap().set(Some(child)).unwrap();
    let deltas = s.forest.take_deltas();
    assert_eq!(
        deltas,
        vec![Delta::ChildMovedFromOtherContainment {
            old_parent: s.forest.node_ref(src).unwrap(),
            old_containment: c0_1(),
            old_index: 0,
            new_parent: s.forest.node_ref(dst).unwrap(),
            new_containment: c0_1(),
            new_index: 0,
            moved_child: s.forest.node_ref(child).unwrap(),
        }]
    );
    assert!(s.forest.containment(src, "c0_1").unwrap().get_single().unwrap().is_none());
    assert_eq!(s.forest.node(child).unwrap().parent(), Some(dst));
}

#[test]
fn test_move_onto_occupied_slot_detaches_occupant() {
    let mut s = setup();
    let src = s.node("src");
    let dst = s.node("dst");
    let moving = s.node("moving");
    let occupant = s.node("occupant");

    s.forest.containment(src, "c0_n").unwrap().add(moving).unwrap();
    s.forest.containment(dst, "c0_1").unwrap().set(Some(occupant)).unwrap();
    s.forest.take_deltas();

    s.forest.containment(dst, "c0_1").unwrap().set(Some(moving)).unwrap();
    let deltas = s.forest.take_deltas();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].kind(), "ChildMovedAndReplacedFromOtherContainment");
    assert!(s.forest.node(occupant).unwrap().parentage().is_none());
}

#[test]
fn test_setting_current_value_is_silent() {
    let mut s = setup();
    let parent = s.node("parent");
    let child = s.node("child");

    s.forest.containment(parent, "c0_1").unwrap().set(Some(child)).unwrap();
    s.forest.property(parent, "label").unwrap().set_value("x").unwrap();
    s.forest.take_deltas();

    s.forest.containment(parent, "c0_1").unwrap().set(Some(child)).unwrap();
    s.forest.property(parent, "label").unwrap().set_value("x").unwrap();
    assert!(s.forest.take_deltas().is_empty());
    assert!(s.forest.property(parent, "label").unwrap().is_set().unwrap());
}

#[test]
fn test_required_multi_reads_unset_until_populated() {
    let mut s = setup();
    let parent = s.node("parent");
    let child = s.node("child");

    let err = s.forest.containment(parent, "c1_n").unwrap().get().unwrap_err();
    assert!(matches!(err, Error::UnsetRequired { .. }));

    s.forest.containment(parent, "c1_n").unwrap().add(child).unwrap();
    let err = s.forest.containment(parent, "c1_n").unwrap().remove(child).unwrap_err();
    assert!(matches!(err, Error::UnsetRequired { .. }));
    assert_eq!(s.forest.containment(parent, "c1_n").unwrap().get().unwrap(), &[child]);
}

#[test]
fn test_out_of_range_index() {
    let mut s = setup();
    let parent = s.node("parent");
    let child = s.node("child");

    let err = s.forest.containment(parent, "c0_n").unwrap().insert_at(1, child).unwrap_err();
    assert_eq!(
        err,
        Error::IndexOutOfBounds {
            op: "insert",
            index: 1,
            length: 0
        }
    );
    assert!(s.forest.containment(parent, "c0_n").unwrap().remove_at(0).is_err());
}

#[test]
fn test_annotation_moves_between_parents() {
    let mut s = setup();
    let first = s.node("first");
    let second = s.node("second");
    let note = s.comment("note");

    s.forest.annotations(first).unwrap().add(note).unwrap();
    s.forest.annotations(second).unwrap().add(note).unwrap();

    let kinds: Vec<_> = s.forest.take_deltas().iter().map(|d| d.kind()).collect();
    assert_eq!(kinds, ["AnnotationAdded", "AnnotationMovedFromOtherParent"]);
    assert!(s.forest.annotations(first).unwrap().is_empty().unwrap());
    assert_eq!(s.forest.node(note).unwrap().parent(), Some(second));
}

#[test]
fn test_partition_lifecycle() {
    let mut s = setup();
    let root = s.node("root");
    let child = s.node("child");

    s.forest.containment(root, "c0_1").unwrap().set(Some(child)).unwrap();
    assert!(matches!(s.forest.add_partition(child), Err(Error::AlreadyAttached(_))));

    s.forest.add_partition(root).unwrap();
    s.forest.add_partition(root).unwrap();
    assert_eq!(s.forest.partitions(), &[root]);

    s.forest.remove_partition(root).unwrap();
    assert!(matches!(s.forest.remove_partition(root), Err(Error::NotAPartition(_))));

    let kinds: Vec<_> = s.forest.take_deltas().iter().map(|d| d.kind()).collect();
    assert_eq!(kinds, ["ChildAdded", "PartitionAdded", "PartitionDeleted"]);
}

#[test]
fn test_import_subtree_copies_structure_and_values() {
    let mut s = setup();
    let root = s.node("root");
    let inner = s.node("inner");
    let note = s.comment("note");
    s.forest.containment(root, "c0_n").unwrap().add(inner).unwrap();
    s.forest.annotations(inner).unwrap().add(note).unwrap();
    s.forest.property(inner, "label").unwrap().set_value("copied").unwrap();

    let mut other = Forest::new(s.forest.registry().clone());
    let copy = other.import_subtree(&s.forest, root).unwrap();

    assert!(other.take_deltas().is_empty());
    let ids: Vec<NodeId> = other
        .descendants(copy)
        .unwrap()
        .into_iter()
        .map(|k| other.id_of(k).unwrap().clone())
        .collect();
    assert_eq!(ids, vec![NodeId::new("root"), NodeId::new("inner"), NodeId::new("note")]);

    let inner_copy = other.containment(copy, "c0_n").unwrap().get().unwrap()[0];
    assert_eq!(
        other.property(inner_copy, "label").unwrap().get().unwrap(),
        Some(&PropertyValue::from("copied"))
    );
}

#[test]
fn test_recording_can_be_paused() {
    let mut s = setup();
    let parent = s.node("parent");

    s.forest.set_recording(false);
    s.forest.property(parent, "label").unwrap().set_value("quiet").unwrap();
    s.forest.set_recording(true);

    assert!(s.forest.take_deltas().is_empty());
    assert!(s.forest.property(parent, "label").unwrap().is_set().unwrap());
}
