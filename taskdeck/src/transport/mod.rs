//! Transport layer for `taskdeck`.
//!
//! Operations travel on one of two channels, chosen by their kind:
//! - queries and mutations on a [`RequestChannel`] (request/response),
//! - subscriptions on a [`SubscriptionChannel`] (persistent event stream).
//!
//! [`TransportRouter`] owns both channels plus the credential store and
//! attaches the current token to every call. Concrete channels:
//! - [`http::HttpChannel`]: GraphQL over HTTP POST
//! - [`ws::WsChannel`]: `graphql-transport-ws` over WebSocket
//! - [`loopback::LoopbackChannel`]: in-process backend for tests

pub mod http;
pub mod loopback;
pub mod ws;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use taskdeck_proto::codec::CodecError;
use taskdeck_proto::operation::{GraphQlError, GraphQlRequest, Operation, OperationKind};

use crate::auth::CredentialStore;

/// Which channel an operation is sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Request/response channel (queries, mutations).
    RequestResponse,
    /// Persistent event stream (subscriptions).
    EventStream,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestResponse => write!(f, "request/response"),
            Self::EventStream => write!(f, "event stream"),
        }
    }
}

/// Maps an operation kind to its channel.
#[must_use]
pub const fn route(kind: OperationKind) -> Route {
    match kind {
        OperationKind::Query | OperationKind::Mutation => Route::RequestResponse,
        OperationKind::Subscription => Route::EventStream,
    }
}

/// Classifies a request by its document and maps it to a channel.
///
/// # Errors
///
/// Returns [`TransportError::Unroutable`] if the document does not start
/// with an operation definition.
pub fn route_request(request: &GraphQlRequest) -> Result<Route, TransportError> {
    request
        .kind()
        .map(route)
        .ok_or_else(|| TransportError::Unroutable(request.name().to_string()))
}

/// State of the event-stream link, reported for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// No socket open (nothing subscribed yet, or lazily closed).
    Idle,
    /// Opening the socket.
    Connecting,
    /// Socket open and acknowledged.
    Connected,
    /// Socket dropped; retrying.
    Reconnecting {
        /// Current attempt, starting at 1.
        attempt: u32,
        /// Maximum attempts before giving up.
        max_attempts: u32,
    },
    /// Retries exhausted.
    Disconnected,
}

/// Errors that can occur during transport operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The endpoint could not be reached.
    #[error("{0} is unreachable")]
    Unreachable(String),

    /// The server answered with a non-success HTTP status.
    #[error("server returned HTTP {status}")]
    Http {
        /// Response status code.
        status: u16,
    },

    /// The server reported GraphQL errors.
    #[error("{}", join_messages(.0))]
    GraphQl(Vec<GraphQlError>),

    /// A payload could not be encoded or decoded.
    #[error("malformed payload: {0}")]
    Codec(#[from] CodecError),

    /// The operation was sent to the wrong channel.
    #[error("{operation} cannot be sent on the {route} channel")]
    WrongRoute {
        /// Operation name.
        operation: String,
        /// Channel it was sent to.
        route: Route,
    },

    /// The request document has no recognisable operation.
    #[error("cannot route operation {0}")]
    Unroutable(String),

    /// Any other network-level failure.
    #[error("network error: {0}")]
    Network(String),
}

fn join_messages(errors: &[GraphQlError]) -> String {
    if errors.is_empty() {
        return "unknown GraphQL error".to_string();
    }
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Logs each GraphQL error with the operation it belongs to.
pub(crate) fn log_graphql_errors(operation: &str, errors: &[GraphQlError]) {
    for e in errors {
        tracing::error!(
            op = operation,
            message = %e.message,
            path = ?e.path,
            code = e.code().unwrap_or("-"),
            "GraphQL error"
        );
    }
}

/// Request/response channel for queries and mutations.
pub trait RequestChannel: Send + Sync + 'static {
    /// Sends `request` and returns the `data` object of the response.
    ///
    /// `token` is attached as `Authorization: Bearer <token>` when present.
    fn execute(
        &self,
        request: &GraphQlRequest,
        token: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Value, TransportError>> + Send;
}

/// Event-stream channel for subscriptions.
pub trait SubscriptionChannel: Send + Sync + 'static {
    /// Starts a subscription. Items arrive on the returned stream until the
    /// server completes it or the stream is closed or dropped.
    fn subscribe(
        &self,
        request: GraphQlRequest,
        token: Option<String>,
    ) -> impl std::future::Future<Output = Result<SubscriptionStream, TransportError>> + Send;

    /// Watches the link state.
    fn status(&self) -> watch::Receiver<LinkStatus>;
}

/// A lazily consumed stream of subscription results.
///
/// Closing or dropping the stream unsubscribes.
pub struct SubscriptionStream {
    id: String,
    items: mpsc::Receiver<Result<Value, TransportError>>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionStream {
    /// Wraps a receiver; `on_close` runs exactly once when the stream is
    /// closed or dropped.
    pub fn new(
        id: impl Into<String>,
        items: mpsc::Receiver<Result<Value, TransportError>>,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            items,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// The subscription id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the next result. `None` means the subscription is over.
    pub async fn next(&mut self) -> Option<Result<Value, TransportError>> {
        self.items.recv().await
    }

    /// Unsubscribes.
    pub fn close(mut self) {
        self.fire_close();
    }

    fn fire_close(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        self.fire_close();
    }
}

impl fmt::Debug for SubscriptionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("id", &self.id)
            .field("closed", &self.on_close.is_none())
            .finish_non_exhaustive()
    }
}

/// Routes operations to the right channel with the current credential.
pub struct TransportRouter<R, S> {
    requests: R,
    streams: S,
    credentials: Arc<dyn CredentialStore>,
}

impl<R: RequestChannel, S: SubscriptionChannel> TransportRouter<R, S> {
    /// Creates a router over the two channels.
    pub fn new(requests: R, streams: S, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            requests,
            streams,
            credentials,
        }
    }

    /// Sends a query or mutation and returns its `data` object.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WrongRoute`] for subscriptions, otherwise
    /// whatever the request channel reports.
    pub async fn execute(&self, operation: &Operation) -> Result<Value, TransportError> {
        let request = operation.to_request();
        let route = route_request(&request)?;
        if route != Route::RequestResponse {
            return Err(TransportError::WrongRoute {
                operation: request.name().to_string(),
                route: Route::RequestResponse,
            });
        }
        let token = self.current_token(&request);
        tracing::debug!(op = request.name(), "sending request");
        self.requests.execute(&request, token.as_deref()).await
    }

    /// Opens a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WrongRoute`] for queries and mutations,
    /// otherwise whatever the subscription channel reports.
    pub async fn subscribe(&self, operation: &Operation) -> Result<SubscriptionStream, TransportError> {
        let request = operation.to_request();
        let route = route_request(&request)?;
        if route != Route::EventStream {
            return Err(TransportError::WrongRoute {
                operation: request.name().to_string(),
                route: Route::EventStream,
            });
        }
        let token = self.current_token(&request);
        tracing::debug!(op = request.name(), "opening subscription");
        self.streams.subscribe(request, token).await
    }

    /// Watches the event-stream link.
    pub fn link_status(&self) -> watch::Receiver<LinkStatus> {
        self.streams.status()
    }

    /// The credential store consulted on every call.
    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    fn current_token(&self, request: &GraphQlRequest) -> Option<String> {
        let token = self.credentials.get();
        if token.is_none() {
            tracing::warn!(op = request.name(), "no auth token for request");
        }
        token
    }
}
