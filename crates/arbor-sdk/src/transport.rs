//! Transport abstraction and an in-memory authority.
//!
//! The [`MemoryAuthority`] plays the server: it owns the authoritative forest,
//! orders incoming commands, applies them, and broadcasts one sequenced event
//! per command to every signed-on participant. It also answers queries.
//! [`MemoryTransport`] is one participant's connection to it.

use arbor_core::{Forest, NodeId, SchemaRegistry};
use arbor_delta::{apply_delta, IdMapping, SequenceNumber};
use arbor_protocol::{
    change_to_delta, command_as_event, serialize_subtree, ClientMessage, Command, Event, EventPayload,
    ForestDescendants, ParticipationId, QueryRequest, QueryResponse, SerializationChunk, ServerMessage,
    TranslationError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use ulid::Ulid;

/// Transport error type.
#[derive(Clone, Debug)]
pub enum TransportError {
    SendFailed(String),
    Encoding(String),
    Disconnected,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::SendFailed(e) => write!(f, "Send failed: {}", e),
            TransportError::Encoding(e) => write!(f, "Encoding failed: {}", e),
            TransportError::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A participant's connection to the authority.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a command or query to the authority.
    async fn send(&self, message: ClientMessage) -> Result<(), TransportError>;

    /// Take the stream of messages from the authority. Only the first call
    /// returns it.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>>;
}

/// How the authority hands events to participants.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    /// Every event is sent as soon as it is sequenced.
    InOrder,
    /// Events are held per connection and released in shuffled batches of
    /// `window`; each released event is sent twice with probability
    /// `duplicate_ratio`.
    Shuffled {
        window: usize,
        duplicate_ratio: f64,
        seed: u64,
    },
}

struct Connection {
    outbox: mpsc::UnboundedSender<ServerMessage>,
    participation: Option<ParticipationId>,
    held: Vec<Event>,
}

struct AuthorityState {
    forest: Forest,
    mapping: IdMapping,
    history: Vec<Event>,
    next_sequence: SequenceNumber,
    connections: HashMap<u64, Connection>,
    next_connection: u64,
    next_participation: u64,
    delivery: Delivery,
    rng: StdRng,
}

/// In-memory authority for tests and simulation.
#[derive(Clone)]
pub struct MemoryAuthority {
    state: Arc<Mutex<AuthorityState>>,
}

impl MemoryAuthority {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            state: Arc::new(Mutex::new(AuthorityState {
                forest: Forest::new(registry),
                mapping: IdMapping::new(),
                history: Vec::new(),
                next_sequence: 0,
                connections: HashMap::new(),
                next_connection: 0,
                next_participation: 0,
                delivery: Delivery::InOrder,
                rng: StdRng::seed_from_u64(0),
            })),
        }
    }

    pub fn with_delivery(self, delivery: Delivery) -> Self {
        {
            let mut state = self.state.lock();
            if let Delivery::Shuffled { seed, .. } = delivery {
                state.rng = StdRng::seed_from_u64(seed);
            }
            state.delivery = delivery;
        }
        self
    }

    /// Open a new connection.
    pub fn connect(&self) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.next_connection += 1;
        let connection = state.next_connection;
        state.connections.insert(
            connection,
            Connection {
                outbox: tx,
                participation: None,
                held: Vec::new(),
            },
        );
        tracing::debug!(connection, "connection opened");
        MemoryTransport {
            authority: self.clone(),
            connection,
            inbound: Mutex::new(Some(rx)),
        }
    }

    /// Sequence number the next event will carry.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.state.lock().next_sequence
    }

    pub fn partitions(&self) -> Vec<NodeId> {
        let state = self.state.lock();
        state
            .forest
            .partitions()
            .iter()
            .filter_map(|key| state.forest.id_of(*key).ok().cloned())
            .collect()
    }

    /// Current authoritative contents of a partition.
    pub fn snapshot(&self, partition: &NodeId) -> Option<SerializationChunk> {
        let state = self.state.lock();
        let key = state.mapping.try_from_id(partition)?;
        serialize_subtree(&state.forest, key).ok()
    }

    /// Release every held event.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        let state = &mut *state;
        let ratio = state.delivery_ratio();
        for connection in state.connections.values_mut() {
            release(connection, &mut state.rng, ratio);
        }
    }

    fn disconnect(&self, connection: u64) {
        if self.state.lock().connections.remove(&connection).is_some() {
            tracing::debug!(connection, "connection closed");
        }
    }

    fn handle(&self, connection: u64, message: ClientMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connections.contains_key(&connection) {
            return Err(TransportError::Disconnected);
        }
        match message {
            ClientMessage::Command(command) => state.execute(connection, command),
            ClientMessage::Query(query) => {
                let response = state.answer(connection, query);
                state.respond(connection, response);
            }
        }
        Ok(())
    }
}

impl AuthorityState {
    fn delivery_ratio(&self) -> f64 {
        match self.delivery {
            Delivery::InOrder => 0.0,
            Delivery::Shuffled { duplicate_ratio, .. } => duplicate_ratio,
        }
    }

    fn execute(&mut self, connection: u64, command: Command) {
        let Some(participation) = self
            .connections
            .get(&connection)
            .and_then(|c| c.participation.clone())
        else {
            tracing::warn!(
                connection,
                command_id = command.command_id(),
                "command from a connection that is not signed on"
            );
            return;
        };

        let sequence = self.next_sequence;
        let lookup = ForestDescendants {
            forest: &self.forest,
            mapping: &self.mapping,
        };
        let mut event = command_as_event(&command, sequence, &participation, &lookup);
        match self.apply(&command) {
            Ok(()) => tracing::debug!(sequence, command_id = command.command_id(), "command applied"),
            Err(e) => {
                tracing::warn!(sequence, command_id = command.command_id(), error = %e, "command rejected");
                event.payload = EventPayload::Error {
                    error_code: error_code(&e).to_string(),
                    message: e.to_string(),
                };
            }
        }

        self.next_sequence += 1;
        self.history.push(event.clone());
        self.broadcast(event);
    }

    /// Apply all changes of a command, or none.
    fn apply(&mut self, command: &Command) -> arbor_protocol::Result<()> {
        let mut forest = self.forest.clone();
        let mut mapping = self.mapping.clone();
        apply_command(command, &mut forest, &mut mapping)?;
        self.forest = forest;
        self.mapping = mapping;
        Ok(())
    }

    fn broadcast(&mut self, event: Event) {
        let targets: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, c)| c.participation.is_some())
            .map(|(id, _)| *id)
            .collect();
        for connection in targets {
            self.deliver(connection, event.clone());
        }
    }

    fn deliver(&mut self, connection: u64, event: Event) {
        let ratio = self.delivery_ratio();
        let Some(target) = self.connections.get_mut(&connection) else {
            return;
        };
        match self.delivery {
            Delivery::InOrder => {
                let _ = target.outbox.send(ServerMessage::Event(event));
            }
            Delivery::Shuffled { window, .. } => {
                target.held.push(event);
                if target.held.len() >= window {
                    release(target, &mut self.rng, ratio);
                }
            }
        }
    }

    fn respond(&mut self, connection: u64, response: QueryResponse) {
        if let Some(target) = self.connections.get(&connection) {
            let _ = target.outbox.send(ServerMessage::Response(response));
        }
    }

    fn answer(&mut self, connection: u64, query: QueryRequest) -> QueryResponse {
        match query {
            QueryRequest::SignOn {
                query_id, client_id, ..
            } => {
                self.next_participation += 1;
                let participation_id = format!("participation-{}", self.next_participation);
                if let Some(c) = self.connections.get_mut(&connection) {
                    c.participation = Some(participation_id.clone());
                }
                tracing::info!(client_id = %client_id, participation_id = %participation_id, "participant signed on");
                QueryResponse::SignOn {
                    query_id,
                    participation_id,
                    next_sequence_number: self.next_sequence,
                }
            }
            QueryRequest::SignOff { query_id } => {
                if let Some(c) = self.connections.get_mut(&connection) {
                    c.participation = None;
                    c.held.clear();
                }
                QueryResponse::SignOff { query_id }
            }
            QueryRequest::SubscribeToPartitionContents { query_id, partitions } => {
                let mut contents = Vec::with_capacity(partitions.len());
                for id in &partitions {
                    let chunk = self
                        .mapping
                        .try_from_id(id)
                        .filter(|key| self.forest.is_partition(*key))
                        .and_then(|key| serialize_subtree(&self.forest, key).ok());
                    match chunk {
                        Some(chunk) => contents.push(chunk),
                        None => {
                            return QueryResponse::Error {
                                query_id,
                                error_code: "unknownPartition".to_string(),
                                message: format!("No partition {}", id),
                            }
                        }
                    }
                }
                QueryResponse::SubscribeToPartitionContents { query_id, contents }
            }
            QueryRequest::SubscribeToChangingPartitions { query_id, .. } => {
                QueryResponse::SubscribeToChangingPartitions { query_id }
            }
            QueryRequest::ListPartitions { query_id } => QueryResponse::ListPartitions {
                query_id,
                partitions: self
                    .forest
                    .partitions()
                    .iter()
                    .filter_map(|key| self.forest.id_of(*key).ok().cloned())
                    .collect(),
            },
            QueryRequest::GetAvailableIds { query_id, count } => QueryResponse::GetAvailableIds {
                query_id,
                ids: (0..count).map(|_| NodeId::new(Ulid::new().to_string())).collect(),
            },
            QueryRequest::Reconnect {
                query_id,
                participation_id,
                last_received_sequence_number,
            } => {
                for c in self.connections.values_mut() {
                    if c.participation.as_ref() == Some(&participation_id) {
                        c.participation = None;
                    }
                }
                if let Some(c) = self.connections.get_mut(&connection) {
                    c.participation = Some(participation_id.clone());
                }
                let missed: Vec<Event> = self
                    .history
                    .iter()
                    .filter(|e| last_received_sequence_number.map_or(true, |last| e.sequence_number > last))
                    .cloned()
                    .collect();
                tracing::info!(participation_id = %participation_id, resent = missed.len(), "participant reconnected");
                for event in missed {
                    self.deliver(connection, event);
                }
                QueryResponse::Reconnect {
                    query_id,
                    next_sequence_number: self.next_sequence,
                }
            }
        }
    }
}

fn apply_command(command: &Command, forest: &mut Forest, mapping: &mut IdMapping) -> arbor_protocol::Result<()> {
    match command {
        Command::Change { change, .. } => {
            let delta = change_to_delta(change, forest, mapping)?;
            apply_delta(forest, &delta)?;
        }
        Command::Composite { parts, .. } => {
            for part in parts {
                apply_command(part, forest, mapping)?;
            }
        }
    }
    Ok(())
}

fn release(connection: &mut Connection, rng: &mut StdRng, duplicate_ratio: f64) {
    let mut held = std::mem::take(&mut connection.held);
    held.shuffle(rng);
    for event in held {
        if rng.gen_bool(duplicate_ratio.clamp(0.0, 1.0)) {
            let _ = connection.outbox.send(ServerMessage::Event(event.clone()));
        }
        let _ = connection.outbox.send(ServerMessage::Event(event));
    }
}

fn error_code(error: &TranslationError) -> &'static str {
    match error {
        TranslationError::UnknownNode(_) => "unknownNode",
        TranslationError::MalformedChunk(_) => "malformedChunk",
        TranslationError::MalformedChange(_) => "malformedChange",
        TranslationError::Untranslatable(_) => "untranslatable",
        TranslationError::Core(_) => "invalidEdit",
        TranslationError::Apply(_) => "applicationFailed",
        TranslationError::Json(_) => "encoding",
    }
}

/// One participant's connection to a [`MemoryAuthority`].
///
/// Outgoing messages pass through JSON, as they would on a real wire.
pub struct MemoryTransport {
    authority: MemoryAuthority,
    connection: u64,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>,
}

impl MemoryTransport {
    pub fn connection_id(&self) -> u64 {
        self.connection
    }

    /// Drop the connection; the participant's message stream ends.
    pub fn close(&self) {
        self.authority.disconnect(self.connection);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        let json = serde_json::to_string(&message).map_err(|e| TransportError::Encoding(e.to_string()))?;
        let message: ClientMessage =
            serde_json::from_str(&json).map_err(|e| TransportError::Encoding(e.to_string()))?;
        self.authority.handle(self.connection, message)
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.inbound.lock().take()
    }
}
