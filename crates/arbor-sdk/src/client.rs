//! High-level client for the Arbor SDK.

use crate::error::{Result, SdkError};
use crate::replica::{Replica, ReplicaConfig, ReplicaStats};
use crate::transport::{MemoryAuthority, MemoryTransport, Transport};
use arbor_core::{Forest, NodeId, NodeKey, SchemaRegistry};
use arbor_delta::SequenceNumber;
use arbor_protocol::{ClientMessage, ParticipationId, QueryId, QueryRequest, QueryResponse, ServerMessage};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Configuration for the Arbor client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Identifies the client towards the authority on sign-on.
    pub client_id: String,
    /// How long to wait for a query response.
    pub query_timeout_ms: u64,
    pub replica: ReplicaConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "client".to_string(),
            query_timeout_ms: 5000,
            replica: ReplicaConfig::default(),
        }
    }
}

/// Builder for client configuration.
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Sets the client id and, unless set separately, the replica name.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if self.config.replica.name == ReplicaConfig::default().name {
            self.config.replica.name = id.clone();
        }
        self.config.client_id = id;
        self
    }

    pub fn query_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.query_timeout_ms = timeout;
        self
    }

    pub fn replica(mut self, replica: ReplicaConfig) -> Self {
        self.config.replica = replica;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type PendingQueries = Arc<Mutex<HashMap<QueryId, oneshot::Sender<QueryResponse>>>>;

/// A participant in a synchronized model.
///
/// The client owns a [`Replica`] and a background task that feeds it the
/// authority's events. Local edits go through [`Client::edit`]; the commands
/// they produce are sent right away when the client is signed on and kept
/// otherwise.
///
/// Must be created inside a Tokio runtime.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use arbor_core::schema::{Classifier, Feature, Language, SchemaRegistry};
/// use arbor_sdk::{Client, ClientConfig, MemoryAuthority};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> arbor_sdk::Result<()> {
/// let language = Language::builder("notes", "1")
///     .classifier(Classifier::concept("Note").partition().feature(
///         Feature::containment("replies", "Note").optional().multiple(),
///     ))
///     .build()?;
/// let note = language.pointer("Note");
/// let registry = Arc::new(SchemaRegistry::new().with_language(language)?);
///
/// let authority = MemoryAuthority::new(registry.clone());
/// let client = Client::connect_memory(&authority, registry, ClientConfig::default())?;
/// client.sign_on().await?;
/// client
///     .edit(|forest| {
///         let root = forest.create_node(&note, "inbox")?;
///         forest.add_partition(root)
///     })
///     .await?;
/// assert_eq!(authority.partitions().len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Client<T: Transport> {
    config: ClientConfig,
    transport: Arc<T>,
    replica: Arc<RwLock<Replica>>,
    pending: PendingQueries,
    progress: Arc<watch::Sender<SequenceNumber>>,
    queries: AtomicU64,
    connected: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl Client<MemoryTransport> {
    /// Create a client on a fresh connection to an in-memory authority.
    pub fn connect_memory(
        authority: &MemoryAuthority,
        registry: Arc<SchemaRegistry>,
        config: ClientConfig,
    ) -> Result<Self> {
        Self::new(authority.connect(), registry, config)
    }
}

impl<T: Transport> Client<T> {
    /// Create a client with a custom transport.
    pub fn new(transport: T, registry: Arc<SchemaRegistry>, config: ClientConfig) -> Result<Self> {
        let replica = Replica::new(registry, config.replica.clone());
        let (progress, _) = watch::channel(replica.expected_sequence());
        let mut client = Self {
            config,
            transport: Arc::new(transport),
            replica: Arc::new(RwLock::new(replica)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            progress: Arc::new(progress),
            queries: AtomicU64::new(0),
            connected: Arc::new(AtomicBool::new(false)),
            receiver: None,
        };
        client.attach()?;
        Ok(client)
    }

    fn attach(&mut self) -> Result<()> {
        let inbound = self
            .transport
            .subscribe()
            .ok_or_else(|| SdkError::Transport("message stream already taken".to_string()))?;
        self.connected.store(true, Ordering::SeqCst);
        self.receiver = Some(tokio::spawn(receive_loop(
            inbound,
            self.replica.clone(),
            self.pending.clone(),
            self.progress.clone(),
            self.connected.clone(),
        )));
        Ok(())
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn participation_id(&self) -> Option<ParticipationId> {
        self.replica.read().participation_id()
    }

    pub fn stats(&self) -> ReplicaStats {
        self.replica.read().stats().clone()
    }

    /// Next sequence number the replica waits for.
    pub fn expected_sequence(&self) -> SequenceNumber {
        self.replica.read().expected_sequence()
    }

    /// Inspect the replica.
    pub fn read<R>(&self, f: impl FnOnce(&Replica) -> R) -> R {
        f(&self.replica.read())
    }

    /// Edit the local model and send the resulting commands.
    ///
    /// The edit is kept locally even when sending fails; the commands stay
    /// queued for the next [`Client::flush`].
    pub async fn edit<R>(&self, f: impl FnOnce(&mut Forest) -> arbor_core::Result<R>) -> Result<R> {
        let result = self.replica.write().edit(f)?;
        if let Err(e) = self.flush().await {
            tracing::warn!(client = %self.config.client_id, error = %e, "commands kept for later");
        }
        Ok(result)
    }

    /// Send every queued command. Returns how many were sent.
    pub async fn flush(&self) -> Result<usize> {
        if !self.is_connected() || self.participation_id().is_none() {
            return Ok(0);
        }
        let commands = self.replica.write().take_outgoing();
        let mut sent = 0;
        let mut remaining = commands.into_iter();
        while let Some(command) = remaining.next() {
            if let Err(e) = self.transport.send(ClientMessage::Command(command.clone())).await {
                let mut unsent = vec![command];
                unsent.extend(remaining);
                self.replica.write().requeue(unsent);
                return Err(e.into());
            }
            sent += 1;
        }
        if sent > 0 {
            tracing::debug!(client = %self.config.client_id, sent, "commands sent");
        }
        Ok(sent)
    }

    async fn query(&self, build: impl FnOnce(QueryId) -> QueryRequest) -> Result<QueryResponse> {
        if !self.is_connected() {
            return Err(SdkError::Disconnected);
        }
        let n = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
        let query_id = format!("{}-q{}", self.config.client_id, n);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(query_id.clone(), tx);

        let request = build(query_id.clone());
        tracing::debug!(query_id = %query_id, kind = request.kind(), "sending query");
        if let Err(e) = self.transport.send(ClientMessage::Query(request)).await {
            self.pending.lock().remove(&query_id);
            return Err(e.into());
        }

        let timeout = Duration::from_millis(self.config.query_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(QueryResponse::Error {
                error_code, message, ..
            })) => Err(SdkError::QueryRejected {
                code: error_code,
                message,
            }),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(SdkError::Disconnected),
            Err(_) => {
                self.pending.lock().remove(&query_id);
                Err(SdkError::Timeout(query_id))
            }
        }
    }

    /// Sign on and send any edits made while offline.
    pub async fn sign_on(&self) -> Result<ParticipationId> {
        let client_id = self.config.client_id.clone();
        let response = self
            .query(|query_id| QueryRequest::SignOn {
                query_id,
                client_id,
                protocol_messages: Vec::new(),
            })
            .await?;
        match response {
            QueryResponse::SignOn { participation_id, .. } => {
                self.flush().await?;
                Ok(participation_id)
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn sign_off(&self) -> Result<()> {
        match self.query(|query_id| QueryRequest::SignOff { query_id }).await? {
            QueryResponse::SignOff { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn list_partitions(&self) -> Result<Vec<NodeId>> {
        match self.query(|query_id| QueryRequest::ListPartitions { query_id }).await? {
            QueryResponse::ListPartitions { partitions, .. } => Ok(partitions),
            other => Err(unexpected(&other)),
        }
    }

    /// Load the current contents of `partitions` into the replica.
    pub async fn subscribe_to_partitions(&self, partitions: &[NodeId]) -> Result<Vec<NodeKey>> {
        let requested = partitions.to_vec();
        let response = self
            .query(|query_id| QueryRequest::SubscribeToPartitionContents {
                query_id,
                partitions: requested,
            })
            .await?;
        match response {
            QueryResponse::SubscribeToPartitionContents { .. } => {
                let replica = self.replica.read();
                Ok(partitions
                    .iter()
                    .filter_map(|id| replica.mapping().try_from_id(id))
                    .collect())
            }
            other => Err(unexpected(&other)),
        }
    }

    pub async fn subscribe_to_changing_partitions(&self, creation: bool, deletion: bool) -> Result<()> {
        let response = self
            .query(|query_id| QueryRequest::SubscribeToChangingPartitions {
                query_id,
                creation,
                deletion,
            })
            .await?;
        match response {
            QueryResponse::SubscribeToChangingPartitions { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the authority for node ids no one else will use.
    pub async fn available_ids(&self, count: usize) -> Result<Vec<NodeId>> {
        match self
            .query(|query_id| QueryRequest::GetAvailableIds { query_id, count })
            .await?
        {
            QueryResponse::GetAvailableIds { ids, .. } => Ok(ids),
            other => Err(unexpected(&other)),
        }
    }

    /// Resume the participation over a new transport.
    ///
    /// The authority resends every event after the last one received; queued
    /// commands are sent afterwards.
    pub async fn reconnect(&mut self, transport: T) -> Result<()> {
        let participation_id = self.participation_id().ok_or(SdkError::NotSignedOn)?;
        if let Some(handle) = self.receiver.take() {
            handle.abort();
        }
        self.pending.lock().clear();
        self.transport = Arc::new(transport);
        self.attach()?;

        let last_received = self.replica.read().last_received();
        let response = self
            .query(|query_id| QueryRequest::Reconnect {
                query_id,
                participation_id: participation_id.clone(),
                last_received_sequence_number: last_received,
            })
            .await?;
        match response {
            QueryResponse::Reconnect {
                next_sequence_number, ..
            } => {
                tracing::info!(
                    client = %self.config.client_id,
                    participation_id = %participation_id,
                    next_sequence_number,
                    "reconnected"
                );
                self.flush().await?;
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Wait until every event before `sequence` has been received.
    pub async fn caught_up(&self, sequence: SequenceNumber, within: Duration) -> Result<()> {
        let mut progress = self.progress.subscribe();
        tokio::time::timeout(within, progress.wait_for(|expected| *expected >= sequence))
            .await
            .map_err(|_| SdkError::Timeout(format!("sequence {}", sequence)))?
            .map_err(|_| SdkError::Disconnected)?;
        Ok(())
    }
}

impl<T: Transport> Drop for Client<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.receiver.take() {
            handle.abort();
        }
    }
}

fn unexpected(response: &QueryResponse) -> SdkError {
    SdkError::UnexpectedResponse(format!("{:?}", response))
}

async fn receive_loop(
    mut inbound: mpsc::UnboundedReceiver<ServerMessage>,
    replica: Arc<RwLock<Replica>>,
    pending: PendingQueries,
    progress: Arc<watch::Sender<SequenceNumber>>,
    connected: Arc<AtomicBool>,
) {
    while let Some(message) = inbound.recv().await {
        match message {
            ServerMessage::Event(event) => {
                let expected = {
                    let mut replica = replica.write();
                    replica.receive(event);
                    replica.expected_sequence()
                };
                progress.send_replace(expected);
            }
            ServerMessage::Response(response) => {
                // State carried by a response is installed before any later
                // event is processed.
                match &response {
                    QueryResponse::SignOn {
                        participation_id,
                        next_sequence_number,
                        ..
                    } => {
                        replica.write().signed_on(participation_id, *next_sequence_number);
                        progress.send_replace(*next_sequence_number);
                    }
                    QueryResponse::SubscribeToPartitionContents { contents, .. } => {
                        let mut replica = replica.write();
                        for chunk in contents {
                            if let Err(e) = replica.load_partition(chunk) {
                                tracing::warn!(error = %e, "partition could not be loaded");
                            }
                        }
                    }
                    _ => {}
                }
                let waiting = pending.lock().remove(response.query_id());
                match waiting {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::warn!(query_id = response.query_id(), "response to unknown query"),
                }
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
    pending.lock().clear();
    tracing::debug!("message stream ended");
}

/// Quick setup helpers.
pub mod quick {
    use super::*;

    /// Connect and sign on one client per name.
    pub async fn connect_participants(
        authority: &MemoryAuthority,
        registry: Arc<SchemaRegistry>,
        names: &[&str],
    ) -> Result<Vec<Client<MemoryTransport>>> {
        let clients = names
            .iter()
            .map(|name| {
                let config = ClientConfigBuilder::new().client_id(*name).build();
                Client::connect_memory(authority, registry.clone(), config)
            })
            .collect::<Result<Vec<_>>>()?;
        futures::future::try_join_all(clients.iter().map(|client| client.sign_on())).await?;
        Ok(clients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::schema::{Classifier, Feature, Language};
    use arbor_core::MetaPointer;

    fn registry() -> (Arc<SchemaRegistry>, MetaPointer) {
        let language = Language::builder("notes", "1")
            .classifier(
                Classifier::concept("Note")
                    .partition()
                    .feature(Feature::containment("replies", "Note").optional().multiple()),
            )
            .build()
            .unwrap();
        let note = language.pointer("Note");
        (Arc::new(SchemaRegistry::new().with_language(language).unwrap()), note)
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfigBuilder::new()
            .client_id("alice")
            .query_timeout_ms(250)
            .build();
        assert_eq!(config.client_id, "alice");
        assert_eq!(config.replica.name, "alice");
        assert_eq!(config.query_timeout_ms, 250);
    }

    #[tokio::test]
    async fn test_sign_on_and_queries() {
        let (registry, note) = registry();
        let authority = MemoryAuthority::new(registry.clone());
        let client = Client::connect_memory(&authority, registry, ClientConfig::default()).unwrap();
        assert!(client.is_connected());
        assert!(client.participation_id().is_none());

        let participation = client.sign_on().await.unwrap();
        assert_eq!(client.participation_id(), Some(participation));

        client
            .edit(|forest| {
                let root = forest.create_node(&note, "inbox")?;
                forest.add_partition(root)
            })
            .await
            .unwrap();
        assert_eq!(client.list_partitions().await.unwrap(), vec![NodeId::new("inbox")]);
        assert_eq!(client.available_ids(3).await.unwrap().len(), 3);
        client.subscribe_to_changing_partitions(true, true).await.unwrap();

        match client.subscribe_to_partitions(&[NodeId::new("missing")]).await {
            Err(SdkError::QueryRejected { code, .. }) => assert_eq!(code, "unknownPartition"),
            other => panic!("unexpected {:?}", other),
        }
        client.sign_off().await.unwrap();
    }

    #[tokio::test]
    async fn test_edits_before_sign_on_are_sent_later() {
        let (registry, note) = registry();
        let authority = MemoryAuthority::new(registry.clone());
        let client = Client::connect_memory(&authority, registry, ClientConfig::default()).unwrap();

        client
            .edit(|forest| {
                let root = forest.create_node(&note, "drafts")?;
                forest.add_partition(root)
            })
            .await
            .unwrap();
        assert!(authority.partitions().is_empty());
        assert_eq!(client.read(|r| r.pending_commands()), 1);

        client.sign_on().await.unwrap();
        assert_eq!(authority.partitions(), vec![NodeId::new("drafts")]);
        client
            .caught_up(authority.next_sequence(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(client.stats().own_events, 1);
    }

    #[tokio::test]
    async fn test_closed_connection_is_reported() {
        let (registry, _) = registry();
        let authority = MemoryAuthority::new(registry.clone());
        let client = Client::connect_memory(&authority, registry, ClientConfig::default()).unwrap();
        client.transport().close();

        assert!(matches!(client.list_partitions().await, Err(SdkError::Disconnected)));
    }
}
