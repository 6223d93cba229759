//! Arbor Delta - replaying deltas and ordering the event stream
//!
//! This crate implements the receiving half of delta synchronization:
//! - The application engine, which replays a delta on a forest directly or
//!   through an id mapping
//! - The id mapping from node ids to the keys of one forest
//! - The ordered event acceptor, which turns an out-of-order event stream
//!   back into the authority's sequence
//!
//! # Replaying on a structurally distinct forest
//!
//! ```text
//! source forest ── delta ──▶ resolve ids via IdMapping ──▶ target forest
//!                             │
//!                             └─ unknown introduced node: copy its subtree
//!                                from the source, register every copy
//! ```

pub mod acceptor;
pub mod apply;
pub mod error;
pub mod id_mapping;

// Re-export main types for convenience
pub use acceptor::{AcceptOutcome, OrderedEventAcceptor, Sequenced, SequenceNumber};
pub use apply::{apply_delta, apply_delta_with_lookup};
pub use error::{ApplyError, Result};
pub use id_mapping::IdMapping;
