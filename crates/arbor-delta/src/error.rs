//! Errors raised while applying deltas.

use arbor_core::{MetaPointer, NodeId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Node {node} has classifier {actual}, but the delta expects {expected}")]
    ClassifierMismatch {
        node: NodeId,
        expected: MetaPointer,
        actual: MetaPointer,
    },

    #[error("Cannot apply {delta}: {reason}")]
    ApplicationMismatch { delta: &'static str, reason: String },

    #[error(transparent)]
    Core(#[from] arbor_core::Error),
}

pub type Result<T> = std::result::Result<T, ApplyError>;
