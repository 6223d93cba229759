//! Error types for the model layer.

use crate::ids::{MetaPointer, NodeId, NodeKey};
use thiserror::Error;

/// Errors raised by schema construction, the forest and the value managers.
///
/// All of these indicate a caller bug and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Feature not found: {feature} is not declared on classifier {classifier}")]
    FeatureNotFound { feature: String, classifier: String },

    #[error("Feature {feature} of classifier {classifier} is a {actual}, not a {expected}")]
    FeatureKindMismatch {
        feature: String,
        classifier: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Unset required {feature} on node {node}")]
    UnsetRequired { feature: String, node: NodeId },

    #[error("Invalid index for {op}: {index} (length: {length})")]
    IndexOutOfBounds {
        op: &'static str,
        index: usize,
        length: usize,
    },

    #[error("Operation {op} is not supported by feature {feature}")]
    IllegalOperation { op: &'static str, feature: String },

    #[error("Node {node} is not contained in {feature} of node {parent}")]
    NotContained {
        node: NodeId,
        parent: NodeId,
        feature: String,
    },

    #[error("Node {child} cannot be placed beneath its own descendant {parent}")]
    ContainmentCycle { child: NodeId, parent: NodeId },

    #[error("Partition {0} cannot be contained by another node")]
    PartitionNotContainable(NodeId),

    #[error("Node {0} is not a partition")]
    NotAPartition(NodeId),

    #[error("Node {node} of classifier {classifier} cannot be a partition")]
    NotPartitionable { node: NodeId, classifier: MetaPointer },

    #[error("Node {0} is still attached")]
    AlreadyAttached(NodeId),

    #[error("Annotation {0} can only be placed in an annotation list")]
    AnnotationInContainment(NodeId),

    #[error("Node {0} is not an annotation")]
    NotAnAnnotation(NodeId),

    #[error("Unknown classifier: {0}")]
    UnknownClassifier(MetaPointer),

    #[error("Unknown node key {0}")]
    UnknownKey(NodeKey),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid value for property {property}: {reason}")]
    InvalidPropertyValue { property: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
