//! Read-only schema description: languages, classifiers and features.
//!
//! The forest consumes this description to decide which value manager backs
//! each feature of a node. Languages are assembled with builders and then
//! registered in a [`SchemaRegistry`] that is constructed once and shared by
//! `Arc` between every forest of a process.
//!
//! ```rust
//! use arbor_core::schema::{Classifier, Feature, Language, PropertyType, SchemaRegistry};
//!
//! let language = Language::builder("shapes", "1")
//!     .classifier(
//!         Classifier::concept("Geometry")
//!             .partition()
//!             .feature(Feature::containment("shapes", "Shape").optional().multiple()),
//!     )
//!     .classifier(
//!         Classifier::concept("Shape").feature(Feature::property("name", PropertyType::String)),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let registry = SchemaRegistry::new().with_language(language).unwrap();
//! assert_eq!(registry.languages().len(), 1);
//! ```

use crate::error::{Error, Result};
use crate::ids::MetaPointer;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Primitive type of a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    Boolean,
    Integer,
    String,
    /// Enumeration literal, carried as the literal key.
    Enumeration,
}

/// What a feature holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeatureKind {
    Property(PropertyType),
    Containment,
    Reference,
}

impl FeatureKind {
    pub fn describe(&self) -> &'static str {
        match self {
            FeatureKind::Property(_) => "property",
            FeatureKind::Containment => "containment",
            FeatureKind::Reference => "reference",
        }
    }
}

/// Cardinality of a feature, which selects the value manager variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cardinality {
    OptionalSingle,
    RequiredSingle,
    OptionalMulti,
    RequiredMulti,
}

impl Cardinality {
    pub fn new(optional: bool, multiple: bool) -> Self {
        match (optional, multiple) {
            (true, false) => Cardinality::OptionalSingle,
            (false, false) => Cardinality::RequiredSingle,
            (true, true) => Cardinality::OptionalMulti,
            (false, true) => Cardinality::RequiredMulti,
        }
    }

    pub fn is_required(self) -> bool {
        matches!(self, Cardinality::RequiredSingle | Cardinality::RequiredMulti)
    }

    pub fn is_multiple(self) -> bool {
        matches!(self, Cardinality::OptionalMulti | Cardinality::RequiredMulti)
    }
}

/// A typed slot of a classifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Feature {
    pub meta_pointer: MetaPointer,
    pub name: String,
    pub kind: FeatureKind,
    /// Target classifier of a containment or reference.
    pub target: Option<MetaPointer>,
    pub cardinality: Cardinality,
}

impl Feature {
    /// Start describing a single, required property.
    pub fn property(key: impl Into<String>, ty: PropertyType) -> FeatureBuilder {
        FeatureBuilder::new(key.into(), FeatureKind::Property(ty), None)
    }

    /// Start describing a single, required containment of `target` nodes.
    pub fn containment(key: impl Into<String>, target: impl Into<String>) -> FeatureBuilder {
        FeatureBuilder::new(key.into(), FeatureKind::Containment, Some(target.into()))
    }

    /// Start describing a single, required reference to `target` nodes.
    pub fn reference(key: impl Into<String>, target: impl Into<String>) -> FeatureBuilder {
        FeatureBuilder::new(key.into(), FeatureKind::Reference, Some(target.into()))
    }

    pub fn is_required(&self) -> bool {
        self.cardinality.is_required()
    }

    pub fn is_multiple(&self) -> bool {
        self.cardinality.is_multiple()
    }

    pub fn property_type(&self) -> Option<PropertyType> {
        match self.kind {
            FeatureKind::Property(ty) => Some(ty),
            _ => None,
        }
    }
}

/// Builder for a [`Feature`]; the language fills in the meta pointers.
#[derive(Clone, Debug)]
pub struct FeatureBuilder {
    key: String,
    name: Option<String>,
    kind: FeatureKind,
    target: Option<String>,
    optional: bool,
    multiple: bool,
}

impl FeatureBuilder {
    fn new(key: String, kind: FeatureKind, target: Option<String>) -> Self {
        Self {
            key,
            name: None,
            kind,
            target,
            optional: false,
            multiple: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    fn build(self, language: &str, version: &str) -> Feature {
        Feature {
            meta_pointer: MetaPointer::new(language, version, &self.key),
            name: self.name.unwrap_or_else(|| self.key.clone()),
            kind: self.kind,
            target: self
                .target
                .map(|target| MetaPointer::new(language, version, target)),
            cardinality: Cardinality::new(self.optional, self.multiple),
        }
    }
}

/// Whether instances of a classifier are regular nodes or annotations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassifierKind {
    Concept,
    Annotation,
}

/// A node type with its complete (already flattened) feature list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classifier {
    pub meta_pointer: MetaPointer,
    pub name: String,
    pub kind: ClassifierKind,
    /// Instances may be independently addressable partition roots.
    pub partition: bool,
    features: Vec<Arc<Feature>>,
}

impl Classifier {
    pub fn concept(key: impl Into<String>) -> ClassifierBuilder {
        ClassifierBuilder::new(key.into(), ClassifierKind::Concept)
    }

    pub fn annotation(key: impl Into<String>) -> ClassifierBuilder {
        ClassifierBuilder::new(key.into(), ClassifierKind::Annotation)
    }

    pub fn features(&self) -> &[Arc<Feature>] {
        &self.features
    }

    pub fn feature_at(&self, index: usize) -> Option<&Arc<Feature>> {
        self.features.get(index)
    }

    /// Find a feature by name, falling back to its key.
    pub fn feature(&self, name: &str) -> Option<(usize, &Arc<Feature>)> {
        self.features
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .or_else(|| {
                self.features
                    .iter()
                    .enumerate()
                    .find(|(_, f)| f.meta_pointer.key == name)
            })
    }

    pub fn feature_by_pointer(&self, pointer: &MetaPointer) -> Option<(usize, &Arc<Feature>)> {
        self.features
            .iter()
            .enumerate()
            .find(|(_, f)| &f.meta_pointer == pointer)
    }

    /// Like [`Classifier::feature`] but raising `FeatureNotFound`.
    pub fn require_feature(&self, name: &str) -> Result<(usize, &Arc<Feature>)> {
        self.feature(name).ok_or_else(|| Error::FeatureNotFound {
            feature: name.to_string(),
            classifier: self.name.clone(),
        })
    }

    pub fn is_annotation(&self) -> bool {
        self.kind == ClassifierKind::Annotation
    }
}

#[derive(Clone, Debug)]
pub struct ClassifierBuilder {
    key: String,
    name: Option<String>,
    kind: ClassifierKind,
    partition: bool,
    features: Vec<FeatureBuilder>,
}

impl ClassifierBuilder {
    fn new(key: String, kind: ClassifierKind) -> Self {
        Self {
            key,
            name: None,
            kind,
            partition: false,
            features: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn partition(mut self) -> Self {
        self.partition = true;
        self
    }

    pub fn feature(mut self, feature: FeatureBuilder) -> Self {
        self.features.push(feature);
        self
    }

    fn build(self, language: &str, version: &str) -> Result<Classifier> {
        let mut seen = HashSet::new();
        let mut features = Vec::with_capacity(self.features.len());
        for builder in self.features {
            if !seen.insert(builder.key.clone()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate feature {} on classifier {}",
                    builder.key, self.key
                )));
            }
            if matches!(builder.kind, FeatureKind::Property(_)) && builder.multiple {
                return Err(Error::InvalidSchema(format!(
                    "property {} on classifier {} cannot be multiple",
                    builder.key, self.key
                )));
            }
            features.push(Arc::new(builder.build(language, version)));
        }

        Ok(Classifier {
            meta_pointer: MetaPointer::new(language, version, &self.key),
            name: self.name.unwrap_or_else(|| self.key.clone()),
            kind: self.kind,
            partition: self.partition,
            features,
        })
    }
}

/// A versioned collection of classifiers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Language {
    pub key: String,
    pub version: String,
    pub name: String,
    classifiers: Vec<Arc<Classifier>>,
}

impl Language {
    pub fn builder(key: impl Into<String>, version: impl Into<String>) -> LanguageBuilder {
        LanguageBuilder {
            key: key.into(),
            version: version.into(),
            name: None,
            classifiers: Vec::new(),
        }
    }

    pub fn classifiers(&self) -> &[Arc<Classifier>] {
        &self.classifiers
    }

    pub fn classifier(&self, key: &str) -> Option<&Arc<Classifier>> {
        self.classifiers.iter().find(|c| c.meta_pointer.key == key)
    }

    /// Meta pointer of an element of this language.
    pub fn pointer(&self, key: impl Into<String>) -> MetaPointer {
        MetaPointer::new(&self.key, &self.version, key)
    }
}

pub struct LanguageBuilder {
    key: String,
    version: String,
    name: Option<String>,
    classifiers: Vec<ClassifierBuilder>,
}

impl LanguageBuilder {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn classifier(mut self, classifier: ClassifierBuilder) -> Self {
        self.classifiers.push(classifier);
        self
    }

    pub fn build(self) -> Result<Language> {
        let mut seen = HashSet::new();
        let mut classifiers = Vec::with_capacity(self.classifiers.len());
        for builder in self.classifiers {
            if !seen.insert(builder.key.clone()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate classifier {} in language {}",
                    builder.key, self.key
                )));
            }
            classifiers.push(Arc::new(builder.build(&self.key, &self.version)?));
        }

        Ok(Language {
            name: self.name.unwrap_or_else(|| self.key.clone()),
            key: self.key,
            version: self.version,
            classifiers,
        })
    }
}

/// Explicitly constructed registry of every language a replica understands.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    languages: Vec<Arc<Language>>,
    classifiers: HashMap<MetaPointer, Arc<Classifier>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a language, builder style.
    pub fn with_language(mut self, language: Language) -> Result<Self> {
        self.register(language)?;
        Ok(self)
    }

    pub fn register(&mut self, language: Language) -> Result<()> {
        if self
            .languages
            .iter()
            .any(|l| l.key == language.key && l.version == language.version)
        {
            return Err(Error::InvalidSchema(format!(
                "language {}@{} is already registered",
                language.key, language.version
            )));
        }
        for classifier in language.classifiers() {
            self.classifiers
                .insert(classifier.meta_pointer.clone(), classifier.clone());
        }
        self.languages.push(Arc::new(language));
        Ok(())
    }

    pub fn languages(&self) -> &[Arc<Language>] {
        &self.languages
    }

    pub fn classifier(&self, pointer: &MetaPointer) -> Option<&Arc<Classifier>> {
        self.classifiers.get(pointer)
    }

    pub fn require_classifier(&self, pointer: &MetaPointer) -> Result<&Arc<Classifier>> {
        self.classifier(pointer)
            .ok_or_else(|| Error::UnknownClassifier(pointer.clone()))
    }
}
