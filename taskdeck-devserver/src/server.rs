//! Server core: shared state, the GraphQL HTTP handler and the
//! `graphql-transport-ws` socket handler.
//!
//! `POST /graphql` runs one query or mutation against the [`TaskStore`].
//! `GET /graphql` upgrades to a WebSocket that multiplexes subscriptions;
//! every store event is pushed to each matching subscription as a `next`
//! frame.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use taskdeck_proto::event::SubscriptionEvent;
use taskdeck_proto::operation::{
    GraphQlError, GraphQlRequest, GraphQlResponse, Operation, OperationKind,
};
use taskdeck_proto::ws::{self as wire, ClientMessage, ServerMessage};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::store::TaskStore;

/// How long a finished connection waits for queued frames to flush.
const WRITER_DRAIN: Duration = Duration::from_millis(500);

type Outbox = mpsc::UnboundedSender<Message>;

/// Shared server state: the store, the auth policy and open sockets.
pub struct ServerState {
    /// The task list served by this instance.
    pub store: TaskStore,
    require_token: Option<String>,
    init_timeout: Duration,
    connections: RwLock<HashMap<u64, Outbox>>,
    next_connection: AtomicU64,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl ServerState {
    /// Creates state from a resolved configuration.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            store: TaskStore::with_max_title_len(config.max_title_len),
            require_token: config.require_token.clone(),
            init_timeout: config.init_timeout,
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Whether `authorization` (the raw header or `connection_init` value)
    /// satisfies the token policy.
    fn authorized(&self, authorization: Option<&str>) -> bool {
        self.require_token.as_deref().is_none_or(|required| {
            authorization.and_then(|a| a.strip_prefix("Bearer ")) == Some(required)
        })
    }

    async fn register(&self, outbox: Outbox) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(id, outbox);
        id
    }

    async fn unregister(&self, id: u64) {
        self.connections.write().await.remove(&id);
    }

    /// Number of acknowledged WebSocket connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a close frame to every connected client.
    ///
    /// Clients see the socket drop, which exercises their reconnect path.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (id, outbox) in conns.iter() {
            tracing::info!(conn = id, "closing connection");
            let _ = outbox.send(Message::Close(None));
        }
    }
}

/// axum handler for `POST /graphql`.
async fn graphql_http(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<GraphQlRequest>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !state.authorized(authorization) {
        tracing::warn!(op = request.name(), "rejected request without a valid token");
        let body = GraphQlResponse::error(GraphQlError::with_code(
            "not authenticated",
            "UNAUTHENTICATED",
        ));
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }
    Json(execute_request(&state.store, &request).await).into_response()
}

/// Runs a query or mutation and wraps the result in a GraphQL response.
async fn execute_request(store: &TaskStore, request: &GraphQlRequest) -> GraphQlResponse {
    let op = match Operation::parse(request.name(), &request.variables) {
        Ok(op) => op,
        Err(e) => {
            tracing::warn!(op = request.name(), err = %e, "unparsable operation");
            return GraphQlResponse::error(GraphQlError::with_code(e.to_string(), "BAD_REQUEST"));
        }
    };
    tracing::debug!(op = op.name(), "executing");
    match store.execute(&op).await {
        Ok(data) => GraphQlResponse::ok(data),
        Err(e) => {
            tracing::warn!(op = op.name(), err = %e, "operation failed");
            GraphQlResponse::error(e.to_graphql(op.root_field()))
        }
    }
}

/// axum handler that upgrades `GET /graphql` to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.protocols([wire::SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Wait for `connection_init` and check its token.
/// 2. Send `connection_ack` and register the connection.
/// 3. Serve `subscribe`, `complete` and `ping` until the client leaves.
/// 4. Stop every subscription and unregister.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Writer: forwards queued frames to the socket, stops after a close.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!("WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    match tokio::time::timeout(state.init_timeout, wait_for_init(&mut ws_receiver)).await {
        Ok(Some(payload)) => {
            let authorization = payload
                .as_ref()
                .and_then(|p| p.get("authorization"))
                .and_then(Value::as_str);
            if !state.authorized(authorization) {
                tracing::warn!("connection_init without a valid token");
                close(&tx, wire::CLOSE_FORBIDDEN, "Forbidden");
                finish_writer(write_task).await;
                return;
            }
        }
        Ok(None) => {
            tracing::debug!("connection closed before connection_init");
            write_task.abort();
            return;
        }
        Err(_) => {
            tracing::warn!("no connection_init in time");
            close(&tx, wire::CLOSE_INIT_TIMEOUT, "Connection initialisation timeout");
            finish_writer(write_task).await;
            return;
        }
    }

    send(&tx, &ServerMessage::ConnectionAck { payload: None });
    let conn_id = state.register(tx.clone()).await;
    tracing::info!(conn = conn_id, "client connected");

    let reader_state = Arc::clone(&state);
    let reader_tx = tx.clone();
    let mut read_task = tokio::spawn(async move {
        let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let keep_going =
                        handle_client_text(text.as_str(), &reader_state, &reader_tx, &mut subscriptions)
                            .await;
                    if !keep_going {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {
                    // Transport-level ping/pong is handled by axum.
                }
            }
        }
        for (_, handle) in subscriptions {
            handle.abort();
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            let _ = tx.send(Message::Close(None));
            finish_writer(write_task).await;
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(conn_id).await;
    tracing::info!(conn = conn_id, "client disconnected");
}

/// Waits for `connection_init`, returning its payload. `None` if the
/// connection ends or sends anything else first.
async fn wait_for_init(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<Option<Value>> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                return match wire::decode_client(text.as_str()) {
                    Ok(ClientMessage::ConnectionInit { payload }) => Some(payload),
                    Ok(other) => {
                        tracing::warn!(msg = ?other, "expected connection_init");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, "failed to decode connection_init");
                        None
                    }
                };
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Handles one client frame. Returns `false` when the connection must end.
async fn handle_client_text(
    text: &str,
    state: &Arc<ServerState>,
    tx: &Outbox,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
) -> bool {
    let msg = match wire::decode_client(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(err = %e, "invalid client frame");
            close(tx, wire::CLOSE_BAD_REQUEST, "Invalid message received");
            return false;
        }
    };

    match msg {
        ClientMessage::ConnectionInit { .. } => {
            close(tx, wire::CLOSE_TOO_MANY_INITS, "Too many initialisation requests");
            false
        }
        ClientMessage::Ping { .. } => {
            send(tx, &ServerMessage::Pong { payload: None });
            true
        }
        ClientMessage::Pong { .. } => true,
        ClientMessage::Subscribe { id, payload } => {
            subscriptions.retain(|_, handle| !handle.is_finished());
            if subscriptions.contains_key(&id) {
                close(
                    tx,
                    wire::CLOSE_DUPLICATE_SUBSCRIBER,
                    &format!("Subscriber for {id} already exists"),
                );
                return false;
            }
            match Operation::parse(payload.name(), &payload.variables) {
                Ok(op) if op.kind() == OperationKind::Subscription => {
                    tracing::debug!(sub = %id, op = op.name(), "subscription started");
                    let handle = tokio::spawn(forward_events(
                        id.clone(),
                        op,
                        state.store.subscribe(),
                        tx.clone(),
                    ));
                    subscriptions.insert(id, handle);
                }
                Ok(op) => {
                    // Single-result operation: one `next`, then `complete`.
                    let response = execute_request(&state.store, &payload).await;
                    tracing::debug!(sub = %id, op = op.name(), "single result over socket");
                    send(tx, &ServerMessage::Next {
                        id: id.clone(),
                        payload: response,
                    });
                    send(tx, &ServerMessage::Complete { id });
                }
                Err(e) => {
                    tracing::warn!(sub = %id, err = %e, "rejected subscribe");
                    send(tx, &ServerMessage::Error {
                        id,
                        payload: vec![GraphQlError::with_code(e.to_string(), "BAD_REQUEST")],
                    });
                }
            }
            true
        }
        ClientMessage::Complete { id } => {
            if let Some(handle) = subscriptions.remove(&id) {
                handle.abort();
                tracing::debug!(sub = %id, "subscription completed by client");
            }
            true
        }
    }
}

/// Pushes every store event matching `op` to subscription `id` until the
/// connection goes away.
async fn forward_events(
    id: String,
    op: Operation,
    mut events: broadcast::Receiver<SubscriptionEvent>,
    tx: Outbox,
) {
    loop {
        tokio::select! {
            () = tx.closed() => break,
            event = events.recv() => match event {
                Ok(event) if event.operation() == op => {
                    let next = ServerMessage::Next {
                        id: id.clone(),
                        payload: GraphQlResponse::ok(event.to_data()),
                    };
                    if !send(&tx, &next) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(sub = %id, skipped, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Queues a protocol message. Returns `false` if the connection is gone.
fn send(tx: &Outbox, msg: &ServerMessage) -> bool {
    match wire::encode_server(msg) {
        Ok(text) => tx.send(Message::Text(text.into())).is_ok(),
        Err(e) => {
            tracing::error!(err = %e, "failed to encode server message");
            false
        }
    }
}

fn close(tx: &Outbox, code: u16, reason: &str) {
    let _ = tx.send(Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    })));
}

async fn finish_writer(mut write_task: JoinHandle<()>) {
    if tokio::time::timeout(WRITER_DRAIN, &mut write_task)
        .await
        .is_err()
    {
        write_task.abort();
    }
}

/// Starts the server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::default())).await
}

/// Starts the server with a pre-configured [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route(
            "/graphql",
            axum::routing::get(ws_handler).post(graphql_http),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}
