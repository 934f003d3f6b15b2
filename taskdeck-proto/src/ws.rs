//! `graphql-transport-ws` protocol messages.
//!
//! Every frame is a JSON text message tagged by `type`. The client opens
//! with `connection_init`, waits for `connection_ack`, then multiplexes
//! subscriptions by id: `subscribe` starts one, the server streams `next`
//! payloads and ends it with `complete` or `error`; the client may send
//! `complete` to stop early. Either side may `ping`; the peer answers with
//! `pong`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{self, CodecError};
use crate::operation::{GraphQlError, GraphQlRequest, GraphQlResponse};

/// WebSocket subprotocol name negotiated in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame on a new socket; carries connection params.
    ConnectionInit {
        /// Connection params (e.g. `authorization`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Keep-alive probe.
    Ping {
        /// Optional payload echoed by nobody.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Answer to a server `ping`.
    Pong {
        /// Optional payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Start a subscription.
    Subscribe {
        /// Client-chosen subscription id, unique per socket.
        id: String,
        /// The GraphQL request.
        payload: GraphQlRequest,
    },
    /// Stop a subscription.
    Complete {
        /// Subscription id.
        id: String,
    },
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted.
    ConnectionAck {
        /// Optional acknowledgment payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Keep-alive probe.
    Ping {
        /// Optional payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Answer to a client `ping`.
    Pong {
        /// Optional payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// One result of a subscription.
    Next {
        /// Subscription id.
        id: String,
        /// Execution result.
        payload: GraphQlResponse,
    },
    /// The subscription failed and is over.
    Error {
        /// Subscription id.
        id: String,
        /// Errors describing the failure.
        payload: Vec<GraphQlError>,
    },
    /// The subscription is over.
    Complete {
        /// Subscription id.
        id: String,
    },
}

/// Close code sent by the server when `connection_init` is rejected.
pub const CLOSE_FORBIDDEN: u16 = 4403;

/// Close code sent when no `connection_init` arrived in time.
pub const CLOSE_INIT_TIMEOUT: u16 = 4408;

/// Close code for a frame that is not a valid protocol message.
pub const CLOSE_BAD_REQUEST: u16 = 4400;

/// Close code for a `subscribe` reusing an active id.
pub const CLOSE_DUPLICATE_SUBSCRIBER: u16 = 4409;

/// Close code for a second `connection_init`.
pub const CLOSE_TOO_MANY_INITS: u16 = 4429;

/// Builds the `connection_init` params for an optional bearer token.
#[must_use]
pub fn connection_params(token: Option<&str>) -> Option<Value> {
    token.map(|t| serde_json::json!({ "authorization": format!("Bearer {t}") }))
}

/// Encodes a client frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if encoding fails.
pub fn encode_client(msg: &ClientMessage) -> Result<String, CodecError> {
    codec::encode(msg)
}

/// Decodes a client frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` for malformed frames.
pub fn decode_client(text: &str) -> Result<ClientMessage, CodecError> {
    codec::decode(text)
}

/// Encodes a server frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if encoding fails.
pub fn encode_server(msg: &ServerMessage) -> Result<String, CodecError> {
    codec::encode(msg)
}

/// Decodes a server frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` for malformed frames.
pub fn decode_server(text: &str) -> Result<ServerMessage, CodecError> {
    codec::decode(text)
}
