//! Serialization chunks: flat node lists describing a subtree on the wire.
//!
//! Only the subtree of a single node is ever serialized (the node a command
//! introduces, or a partition handed out by a query). Property values travel
//! as strings and are parsed back with the property's declared type.

use crate::error::{Result, TranslationError};
use arbor_core::{FeatureKind, Forest, MetaPointer, NodeId, NodeKey, PropertyValue, ReferenceValue, Slot};
use arbor_delta::IdMapping;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

pub const SERIALIZATION_FORMAT_VERSION: &str = "2023.1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializationChunk {
    pub serialization_format_version: String,
    pub languages: Vec<UsedLanguage>,
    pub nodes: Vec<SerializedNode>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsedLanguage {
    pub key: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNode {
    pub id: NodeId,
    pub classifier: MetaPointer,
    pub properties: Vec<SerializedProperty>,
    pub containments: Vec<SerializedContainment>,
    pub references: Vec<SerializedReference>,
    pub annotations: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedProperty {
    pub property: MetaPointer,
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedContainment {
    pub containment: MetaPointer,
    pub children: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedReference {
    pub reference: MetaPointer,
    pub targets: Vec<SerializedReferenceTarget>,
}

/// One reference entry on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedReferenceTarget {
    pub resolve_info: Option<String>,
    pub reference: Option<NodeId>,
}

impl From<ReferenceValue> for SerializedReferenceTarget {
    fn from(value: ReferenceValue) -> Self {
        Self {
            resolve_info: value.resolve_info,
            reference: value.target,
        }
    }
}

impl From<SerializedReferenceTarget> for ReferenceValue {
    fn from(target: SerializedReferenceTarget) -> Self {
        ReferenceValue {
            target: target.reference,
            resolve_info: target.resolve_info,
        }
    }
}

impl SerializationChunk {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Id of the node no other node of the chunk contains.
    pub fn root_id(&self) -> Result<&NodeId> {
        let contained: HashSet<&NodeId> = self
            .nodes
            .iter()
            .flat_map(|n| {
                n.containments
                    .iter()
                    .flat_map(|c| c.children.iter())
                    .chain(n.annotations.iter())
            })
            .collect();
        let mut roots = self.nodes.iter().filter(|n| !contained.contains(&n.id));
        match (roots.next(), roots.next()) {
            (Some(root), None) => Ok(&root.id),
            (None, _) => Err(TranslationError::MalformedChunk("chunk has no root".to_string())),
            (Some(_), Some(_)) => Err(TranslationError::MalformedChunk(
                "chunk has more than one root".to_string(),
            )),
        }
    }
}

/// Serialize `root` and everything beneath it.
pub fn serialize_subtree(forest: &Forest, root: NodeKey) -> Result<SerializationChunk> {
    let mut languages = BTreeSet::new();
    let mut nodes = Vec::new();

    for key in forest.descendants(root)? {
        let node = forest.node(key)?;
        let classifier = node.classifier();
        languages.insert(UsedLanguage {
            key: classifier.meta_pointer.language.clone(),
            version: classifier.meta_pointer.version.clone(),
        });

        let mut properties = Vec::new();
        let mut containments = Vec::new();
        let mut references = Vec::new();
        for index in node.populated_features() {
            let feature = &classifier.features()[index];
            match feature.kind {
                FeatureKind::Property(_) => properties.push(SerializedProperty {
                    property: feature.meta_pointer.clone(),
                    value: node.property_value(index).map(PropertyValue::to_wire),
                }),
                FeatureKind::Containment => containments.push(SerializedContainment {
                    containment: feature.meta_pointer.clone(),
                    children: ids(forest, node.children_of(index))?,
                }),
                FeatureKind::Reference => references.push(SerializedReference {
                    reference: feature.meta_pointer.clone(),
                    targets: node
                        .references_of(index)
                        .iter()
                        .cloned()
                        .map(SerializedReferenceTarget::from)
                        .collect(),
                }),
            }
        }

        nodes.push(SerializedNode {
            id: node.id().clone(),
            classifier: classifier.meta_pointer.clone(),
            properties,
            containments,
            references,
            annotations: ids(forest, node.annotations())?,
            parent: node.parent().map(|p| forest.id_of(p).cloned()).transpose()?,
        });
    }

    Ok(SerializationChunk {
        serialization_format_version: SERIALIZATION_FORMAT_VERSION.to_string(),
        languages: languages.into_iter().collect(),
        nodes,
    })
}

fn ids(forest: &Forest, keys: &[NodeKey]) -> Result<Vec<NodeId>> {
    keys.iter()
        .map(|k| Ok(forest.id_of(*k)?.clone()))
        .collect()
}

/// Materialize a chunk in `forest` as a free-standing subtree and register
/// every created node in `mapping`. Returns the key of the chunk's root.
pub fn deserialize_subtree(
    chunk: &SerializationChunk,
    forest: &mut Forest,
    mapping: &mut IdMapping,
) -> Result<NodeKey> {
    let root_id = chunk.root_id()?.clone();

    let mut local: HashMap<NodeId, NodeKey> = HashMap::with_capacity(chunk.nodes.len());
    for node in &chunk.nodes {
        let key = forest.create_node(&node.classifier, node.id.clone())?;
        if local.insert(node.id.clone(), key).is_some() {
            return Err(TranslationError::MalformedChunk(format!(
                "node {} appears twice",
                node.id
            )));
        }
    }
    let find = |id: &NodeId| {
        local.get(id).copied().ok_or_else(|| {
            TranslationError::MalformedChunk(format!("child {} is not part of the chunk", id))
        })
    };

    for node in &chunk.nodes {
        let key = find(&node.id)?;
        for property in &node.properties {
            let (index, feature) = forest.feature_by_pointer(key, &property.property, "property")?;
            let value = match (&property.value, feature.property_type()) {
                (Some(raw), Some(ty)) => Some(PropertyValue::from_wire(ty, raw, &feature.name)?),
                _ => None,
            };
            forest.direct_set_property(key, index, value)?;
        }
        for reference in &node.references {
            let (index, _) = forest.feature_by_pointer(key, &reference.reference, "reference")?;
            for (position, target) in reference.targets.iter().enumerate() {
                forest.direct_insert_reference(key, index, position, target.clone().into())?;
            }
        }
        for containment in &node.containments {
            let (index, _) = forest.feature_by_pointer(key, &containment.containment, "containment")?;
            for (position, child) in containment.children.iter().enumerate() {
                forest.direct_insert(key, Slot::Containment(index), position, find(child)?)?;
            }
        }
        for (position, annotation) in node.annotations.iter().enumerate() {
            forest.direct_insert(key, Slot::Annotation, position, find(annotation)?)?;
        }
    }

    for (id, key) in &local {
        mapping.register(id.clone(), *key);
    }
    find(&root_id)
}
