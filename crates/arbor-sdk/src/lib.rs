//! Arbor SDK - participants of a synchronized model
//!
//! This crate connects replicas to an authority that orders every edit:
//!
//! - [`client`] - Signs on, sends the commands of local edits, runs queries
//! - [`replica`] - The local forest, its outgoing commands and incoming events
//! - [`transport`] - The transport seam and an in-memory authority
//! - [`error`] - Error types
//!
//! # Message flow
//!
//! ```text
//! edit ─▶ Forest ─delta─▶ command ──────────▶ authority (sequence, apply)
//!                                                   │
//! apply ◀─ delta ◀─ OrderedEventAcceptor ◀── event ─┘ (skipped if own)
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use arbor_core::schema::{Classifier, Feature, Language, PropertyType, SchemaRegistry};
//! use arbor_sdk::{quick, MemoryAuthority, NodeId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> arbor_sdk::Result<()> {
//! let language = Language::builder("notes", "1")
//!     .classifier(
//!         Classifier::concept("Note")
//!             .partition()
//!             .feature(Feature::property("text", PropertyType::String).optional()),
//!     )
//!     .build()?;
//! let note = language.pointer("Note");
//! let registry = Arc::new(SchemaRegistry::new().with_language(language)?);
//!
//! let authority = MemoryAuthority::new(registry.clone());
//! let clients = quick::connect_participants(&authority, registry, &["alice", "bob"]).await?;
//!
//! clients[0]
//!     .edit(|forest| {
//!         let root = forest.create_node(&note, "inbox")?;
//!         forest.add_partition(root)?;
//!         forest.property(root, "text")?.set_value("hello")
//!     })
//!     .await?;
//!
//! clients[1].caught_up(authority.next_sequence(), Duration::from_secs(1)).await?;
//! assert!(clients[1].read(|replica| replica.mapping().contains(&NodeId::new("inbox"))));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod replica;
pub mod transport;

// Re-exports for convenience
pub use client::{quick, Client, ClientConfig, ClientConfigBuilder};
pub use error::{Result, SdkError};
pub use replica::{Replica, ReplicaConfig, ReplicaConfigBuilder, ReplicaStats};
pub use transport::{Delivery, MemoryAuthority, MemoryTransport, Transport, TransportError};

// Re-export commonly used types from the model crates
pub use arbor_core::{Forest, NodeId, NodeKey, SchemaRegistry};
pub use arbor_delta::{AcceptOutcome, SequenceNumber};
pub use arbor_protocol::{Command, Event, ParticipationId};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::client::{Client, ClientConfig};
    pub use crate::error::SdkError;
    pub use crate::replica::{Replica, ReplicaConfig};
    pub use crate::transport::{Delivery, MemoryAuthority, Transport};
    pub use arbor_core::{Forest, NodeId, NodeKey};
}
