//! Error types for the Arbor SDK.

use crate::transport::TransportError;
use arbor_delta::ApplyError;
use arbor_protocol::TranslationError;
use std::fmt;

/// Error type for SDK operations.
#[derive(Debug)]
pub enum SdkError {
    /// The transport could not deliver a message.
    Transport(String),
    /// The authority answered a query with an error.
    QueryRejected { code: String, message: String },
    /// No response arrived within the configured timeout.
    Timeout(String),
    /// The response did not match the request.
    UnexpectedResponse(String),
    /// Operation requires a participation.
    NotSignedOn,
    /// The connection to the authority is gone.
    Disconnected,
    /// Model error raised by a local edit.
    Model(arbor_core::Error),
    Translation(TranslationError),
    Apply(ApplyError),
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdkError::Transport(e) => write!(f, "Transport error: {}", e),
            SdkError::QueryRejected { code, message } => {
                write!(f, "Query rejected ({}): {}", code, message)
            }
            SdkError::Timeout(query) => write!(f, "Query {} timed out", query),
            SdkError::UnexpectedResponse(e) => write!(f, "Unexpected response: {}", e),
            SdkError::NotSignedOn => write!(f, "Not signed on"),
            SdkError::Disconnected => write!(f, "Disconnected"),
            SdkError::Model(e) => write!(f, "Model error: {}", e),
            SdkError::Translation(e) => write!(f, "Translation error: {}", e),
            SdkError::Apply(e) => write!(f, "Apply error: {}", e),
        }
    }
}

impl std::error::Error for SdkError {}

impl From<arbor_core::Error> for SdkError {
    fn from(e: arbor_core::Error) -> Self {
        SdkError::Model(e)
    }
}

impl From<TranslationError> for SdkError {
    fn from(e: TranslationError) -> Self {
        SdkError::Translation(e)
    }
}

impl From<ApplyError> for SdkError {
    fn from(e: ApplyError) -> Self {
        SdkError::Apply(e)
    }
}

impl From<TransportError> for SdkError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Disconnected => SdkError::Disconnected,
            other => SdkError::Transport(other.to_string()),
        }
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
