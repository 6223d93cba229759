//! Queries: request/response exchanges correlated by a caller-chosen id.

use crate::chunk::SerializationChunk;
use crate::messages::{Command, Event, ParticipationId, ProtocolMessage};
use arbor_core::NodeId;
use arbor_delta::SequenceNumber;
use serde::{Deserialize, Serialize};

pub type QueryId = String;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageKind", rename_all_fields = "camelCase")]
pub enum QueryRequest {
    SignOn {
        query_id: QueryId,
        client_id: String,
        protocol_messages: Vec<ProtocolMessage>,
    },
    SignOff {
        query_id: QueryId,
    },
    /// Receive events touching these partitions; the response carries their
    /// current contents.
    SubscribeToPartitionContents {
        query_id: QueryId,
        partitions: Vec<NodeId>,
    },
    /// Receive events that add or delete partitions.
    SubscribeToChangingPartitions {
        query_id: QueryId,
        creation: bool,
        deletion: bool,
    },
    ListPartitions {
        query_id: QueryId,
    },
    GetAvailableIds {
        query_id: QueryId,
        count: usize,
    },
    /// Rebind a participation to a new connection. The authority resends
    /// every event after `last_received_sequence_number` (all of them if none).
    Reconnect {
        query_id: QueryId,
        participation_id: ParticipationId,
        last_received_sequence_number: Option<SequenceNumber>,
    },
}

impl QueryRequest {
    pub fn query_id(&self) -> &str {
        match self {
            QueryRequest::SignOn { query_id, .. }
            | QueryRequest::SignOff { query_id }
            | QueryRequest::SubscribeToPartitionContents { query_id, .. }
            | QueryRequest::SubscribeToChangingPartitions { query_id, .. }
            | QueryRequest::ListPartitions { query_id }
            | QueryRequest::GetAvailableIds { query_id, .. }
            | QueryRequest::Reconnect { query_id, .. } => query_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueryRequest::SignOn { .. } => "SignOn",
            QueryRequest::SignOff { .. } => "SignOff",
            QueryRequest::SubscribeToPartitionContents { .. } => "SubscribeToPartitionContents",
            QueryRequest::SubscribeToChangingPartitions { .. } => "SubscribeToChangingPartitions",
            QueryRequest::ListPartitions { .. } => "ListPartitions",
            QueryRequest::GetAvailableIds { .. } => "GetAvailableIds",
            QueryRequest::Reconnect { .. } => "Reconnect",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageKind", rename_all_fields = "camelCase")]
pub enum QueryResponse {
    SignOn {
        query_id: QueryId,
        participation_id: ParticipationId,
        /// Sequence number of the next event the authority will send.
        next_sequence_number: SequenceNumber,
    },
    SignOff {
        query_id: QueryId,
    },
    SubscribeToPartitionContents {
        query_id: QueryId,
        contents: Vec<SerializationChunk>,
    },
    SubscribeToChangingPartitions {
        query_id: QueryId,
    },
    ListPartitions {
        query_id: QueryId,
        partitions: Vec<NodeId>,
    },
    GetAvailableIds {
        query_id: QueryId,
        ids: Vec<NodeId>,
    },
    Reconnect {
        query_id: QueryId,
        next_sequence_number: SequenceNumber,
    },
    /// The authority refused the query.
    Error {
        query_id: QueryId,
        error_code: String,
        message: String,
    },
}

impl QueryResponse {
    pub fn query_id(&self) -> &str {
        match self {
            QueryResponse::SignOn { query_id, .. }
            | QueryResponse::SignOff { query_id }
            | QueryResponse::SubscribeToPartitionContents { query_id, .. }
            | QueryResponse::SubscribeToChangingPartitions { query_id }
            | QueryResponse::ListPartitions { query_id, .. }
            | QueryResponse::GetAvailableIds { query_id, .. }
            | QueryResponse::Reconnect { query_id, .. }
            | QueryResponse::Error { query_id, .. } => query_id,
        }
    }
}

/// Everything a participant sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ClientMessage {
    Command(Command),
    Query(QueryRequest),
}

/// Everything the authority sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ServerMessage {
    Event(Event),
    Response(QueryResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelopes_round_trip_through_json() {
        let message = ClientMessage::Query(QueryRequest::GetAvailableIds {
            query_id: "q-7".to_string(),
            count: 3,
        });
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"Query\""));
        assert!(json.contains("\"messageKind\":\"GetAvailableIds\""));
        assert_eq!(serde_json::from_str::<ClientMessage>(&json).unwrap(), message);

        let response = ServerMessage::Response(QueryResponse::Error {
            query_id: "q-7".to_string(),
            error_code: "unknown".to_string(),
            message: "nope".to_string(),
        });
        let json = serde_json::to_string(&response).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        match back {
            ServerMessage::Response(r) => assert_eq!(r.query_id(), "q-7"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
