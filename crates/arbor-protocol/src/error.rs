//! Errors raised while translating between deltas and wire messages.

use arbor_core::NodeId;
use arbor_delta::ApplyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranslationError {
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("Malformed change: {0}")]
    MalformedChange(String),

    #[error("Delta kind {0} has no wire form")]
    Untranslatable(&'static str),

    #[error(transparent)]
    Core(#[from] arbor_core::Error),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TranslationError>;
