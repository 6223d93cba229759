//! Arbor Core - typed model trees that describe every edit as a delta
//!
//! This crate holds the in-memory model of one replica:
//! - A read-only schema of languages, classifiers and features
//! - The forest of nodes with partitions and exclusive containment
//! - Value managers, one per feature cardinality, that validate and mutate
//! - The closed delta taxonomy emitted by every observable mutation
//!
//! # Structural rules
//!
//! ```text
//! parent(c) = p  <=>  c is listed in exactly one containment or annotation list of p
//! partitions have no parent and are never contained
//! no node is its own ancestor
//! required features are never emptied by an edit
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use arbor_core::schema::{Classifier, Feature, Language, SchemaRegistry};
//! use arbor_core::Forest;
//!
//! let language = Language::builder("tree", "1")
//!     .classifier(
//!         Classifier::concept("Folder")
//!             .partition()
//!             .feature(Feature::containment("entries", "Folder").optional().multiple()),
//!     )
//!     .build()
//!     .unwrap();
//! let folder = language.pointer("Folder");
//! let registry = Arc::new(SchemaRegistry::new().with_language(language).unwrap());
//!
//! let mut forest = Forest::new(registry);
//! let root = forest.create_node(&folder, "root").unwrap();
//! let child = forest.create_node(&folder, "child").unwrap();
//! forest.add_partition(root).unwrap();
//! forest.containment(root, "entries").unwrap().add(child).unwrap();
//!
//! assert_eq!(forest.node(child).unwrap().parent(), Some(root));
//! assert_eq!(forest.take_deltas().len(), 2);
//! ```

pub mod builder;
pub mod delta;
pub mod error;
pub mod forest;
pub mod ids;
pub mod managers;
pub mod node;
pub mod schema;
pub mod value;

// Re-export main types for convenience
pub use delta::{Delta, NodeRef};
pub use error::{Error, Result};
pub use forest::{DeltaObserver, Forest, Location};
pub use ids::{MetaPointer, NodeId, NodeKey};
pub use managers::{AnnotationManager, ContainmentManager, PropertyManager, ReferenceManager};
pub use node::{Node, Parentage, Slot};
pub use schema::{
    Cardinality, Classifier, ClassifierKind, Feature, FeatureKind, Language, PropertyType,
    SchemaRegistry,
};
pub use value::{PropertyValue, ReferenceValue};
