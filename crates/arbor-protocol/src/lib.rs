//! Arbor Protocol - the wire form of deltas
//!
//! This crate connects a replica to the authority:
//! - Serialization chunks for subtrees introduced by an edit
//! - Commands, events and queries with their JSON encoding
//! - Translation from deltas to commands, commands to events and events back
//!   to deltas against a different forest
//! - Participation tracking to recognize the echo of one's own commands
//!
//! # Message flow
//!
//! ```text
//! replica A                         authority                        replica B
//!   edit ─▶ Delta ─▶ Command ───────▶ order, apply ─▶ Event ─────────▶ Delta ─▶ apply
//!                                                       └──────────────▶ A: own event, skipped
//! ```

pub mod chunk;
pub mod error;
pub mod messages;
pub mod origin;
pub mod query;
pub mod translate;

// Re-export main types for convenience
pub use chunk::{deserialize_subtree, serialize_subtree, SerializationChunk, SERIALIZATION_FORMAT_VERSION};
pub use error::{Result, TranslationError};
pub use messages::{
    Change, Command, CommandId, CommandSource, Event, EventPayload, ParticipationId, ProtocolMessage,
};
pub use origin::ParticipationTracker;
pub use query::{ClientMessage, QueryId, QueryRequest, QueryResponse, ServerMessage};
pub use translate::{
    change_to_delta, command_as_event, delta_to_command, event_to_delta, stage_event, DescendantLookup,
    ForestDescendants,
};
