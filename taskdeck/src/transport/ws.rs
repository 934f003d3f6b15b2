//! Subscriptions over WebSocket (`graphql-transport-ws`).
//!
//! A single background task owns the socket and multiplexes every
//! subscription over it:
//!
//! 1. The socket is opened lazily, on the first subscription, and
//!    `connection_init` (carrying the bearer token) must be acknowledged
//!    within the connect timeout.
//! 2. Each subscription gets a UUID v7 id; `next` frames are routed to its
//!    stream by id, `error` and `complete` end it.
//! 3. A protocol `ping` is sent every keep-alive period; server pings are
//!    answered with `pong`.
//! 4. Once the last subscription ends the socket is kept for the lazy-close
//!    timeout, then closed.
//! 5. If the socket drops while subscriptions are active it is reopened
//!    with linear backoff and every active subscription is re-sent. When
//!    the attempts run out every stream ends with
//!    [`TransportError::ConnectionClosed`].

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use taskdeck_proto::operation::GraphQlRequest;
use taskdeck_proto::ws::{self as wire, ClientMessage, ServerMessage};

use super::{
    LinkStatus, SubscriptionChannel, SubscriptionStream, TransportError, log_graphql_errors,
};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Tunables for [`WsChannel`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Limit for TCP connect plus `connection_ack`.
    pub connect_timeout: Duration,
    /// Interval between protocol pings.
    pub keep_alive: Duration,
    /// How long an unused socket stays open.
    pub lazy_close: Duration,
    /// Reconnect attempts before giving up.
    pub retry_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// Buffer per subscription stream.
    pub stream_buffer: usize,
}

impl WsConfig {
    /// Defaults for `url`: 10 s connect, 15 s keep-alive, 30 s lazy close,
    /// 5 retries with a 1 s backoff unit.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(15),
            lazy_close: Duration::from_secs(30),
            retry_attempts: 5,
            retry_backoff: Duration::from_secs(1),
            stream_buffer: 256,
        }
    }
}

enum Command {
    Subscribe {
        id: String,
        request: GraphQlRequest,
        token: Option<String>,
        items: mpsc::Sender<Result<Value, TransportError>>,
        ready: oneshot::Sender<Result<(), TransportError>>,
    },
    Complete {
        id: String,
    },
}

/// Subscription channel over a shared `graphql-transport-ws` socket.
///
/// Must be created inside a tokio runtime. The socket task exits once the
/// channel and every stream it handed out are dropped.
pub struct WsChannel {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<LinkStatus>,
    stream_buffer: usize,
}

impl WsChannel {
    /// Starts the socket task. No connection is made until the first
    /// subscription.
    #[must_use]
    pub fn new(config: WsConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::Idle);
        let stream_buffer = config.stream_buffer.max(1);
        let actor = Actor::new(config, commands_rx, status_tx);
        tokio::spawn(actor.run());
        Self {
            commands: commands_tx,
            status: status_rx,
            stream_buffer,
        }
    }
}

impl SubscriptionChannel for WsChannel {
    async fn subscribe(
        &self,
        request: GraphQlRequest,
        token: Option<String>,
    ) -> Result<SubscriptionStream, TransportError> {
        let id = uuid::Uuid::now_v7().to_string();
        let (items_tx, items_rx) = mpsc::channel(self.stream_buffer);
        let (ready_tx, ready_rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                id: id.clone(),
                request,
                token,
                items: items_tx,
                ready: ready_tx,
            })
            .map_err(|_| TransportError::ConnectionClosed)?;
        ready_rx
            .await
            .map_err(|_| TransportError::ConnectionClosed)??;

        let commands = self.commands.clone();
        let key = id.clone();
        Ok(SubscriptionStream::new(id, items_rx, move || {
            // The task may already be gone; nothing to unsubscribe then.
            let _ = commands.send(Command::Complete { id: key });
        }))
    }

    fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }
}

struct ActiveSubscription {
    request: GraphQlRequest,
    items: mpsc::Sender<Result<Value, TransportError>>,
}

enum Wake {
    Command(Option<Command>),
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    KeepAlive,
    IdleTimeout,
}

struct Actor {
    config: WsConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<LinkStatus>,
    socket: Option<Socket>,
    subscriptions: HashMap<String, ActiveSubscription>,
    token: Option<String>,
    idle_deadline: Option<Instant>,
    keep_alive: tokio::time::Interval,
}

impl Actor {
    fn new(
        config: WsConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        status: watch::Sender<LinkStatus>,
    ) -> Self {
        let keep_alive = keep_alive_timer(config.keep_alive);
        Self {
            config,
            commands,
            status,
            socket: None,
            subscriptions: HashMap::new(),
            token: None,
            idle_deadline: None,
            keep_alive,
        }
    }

    async fn run(mut self) {
        loop {
            let connected = self.socket.is_some();
            let idle_deadline = self.idle_deadline;
            let wake = tokio::select! {
                cmd = self.commands.recv() => Wake::Command(cmd),
                frame = next_frame(&mut self.socket) => Wake::Frame(frame),
                _ = self.keep_alive.tick(), if connected => Wake::KeepAlive,
                () = sleep_until(idle_deadline), if connected && idle_deadline.is_some() => {
                    Wake::IdleTimeout
                }
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Frame(Some(Ok(msg))) => self.handle_message(msg).await,
                Wake::Frame(Some(Err(e))) => {
                    tracing::warn!(err = %e, "WebSocket read error");
                    self.connection_lost().await;
                }
                Wake::Frame(None) => {
                    tracing::info!("WebSocket stream ended");
                    self.connection_lost().await;
                }
                Wake::KeepAlive => {
                    self.send(&ClientMessage::Ping { payload: None }).await;
                }
                Wake::IdleTimeout => {
                    tracing::info!("closing idle WebSocket");
                    self.close_socket().await;
                    self.set_status(LinkStatus::Idle);
                }
            }
        }
        self.close_socket().await;
        tracing::debug!("WebSocket task exiting");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe {
                id,
                request,
                token,
                items,
                ready,
            } => {
                self.token = token;
                self.idle_deadline = None;
                if self.socket.is_none() {
                    self.set_status(LinkStatus::Connecting);
                    match open(&self.config, self.token.as_deref()).await {
                        Ok(socket) => {
                            self.socket = Some(socket);
                            self.keep_alive = keep_alive_timer(self.config.keep_alive);
                            self.set_status(LinkStatus::Connected);
                        }
                        Err(e) => {
                            self.set_status(if self.subscriptions.is_empty() {
                                LinkStatus::Idle
                            } else {
                                LinkStatus::Disconnected
                            });
                            let _ = ready.send(Err(e));
                            return;
                        }
                    }
                }
                let frame = ClientMessage::Subscribe {
                    id: id.clone(),
                    payload: request.clone(),
                };
                tracing::debug!(sub = %id, op = request.name(), "subscribing");
                self.subscriptions
                    .insert(id, ActiveSubscription { request, items });
                let _ = ready.send(Ok(()));
                if !self.send(&frame).await {
                    self.connection_lost().await;
                }
            }
            Command::Complete { id } => {
                if self.subscriptions.remove(&id).is_some() {
                    tracing::debug!(sub = %id, "unsubscribing");
                    self.send(&ClientMessage::Complete { id }).await;
                }
                self.arm_lazy_close();
            }
        }
    }

    async fn handle_message(&mut self, msg: Message) {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(frame) => {
                tracing::info!(?frame, "WebSocket closed by server");
                self.connection_lost().await;
                return;
            }
            // Transport-level ping/pong is answered by tungstenite itself.
            _ => return,
        };
        let decoded = match wire::decode_server(text.as_str()) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(err = %e, "malformed server frame, skipping");
                return;
            }
        };
        match decoded {
            ServerMessage::Next { id, payload } => {
                let Some(sub) = self.subscriptions.get(&id) else {
                    tracing::debug!(sub = %id, "frame for unknown subscription");
                    return;
                };
                let item = if payload.errors.is_empty() {
                    payload.data.ok_or(TransportError::Codec(
                        taskdeck_proto::codec::CodecError::MissingField("data"),
                    ))
                } else {
                    log_graphql_errors(sub.request.name(), &payload.errors);
                    Err(TransportError::GraphQl(payload.errors))
                };
                if sub.items.send(item).await.is_err() {
                    // Stream dropped; its close command is already queued.
                    tracing::debug!(sub = %id, "subscriber gone");
                }
            }
            ServerMessage::Error { id, payload } => {
                if let Some(sub) = self.subscriptions.remove(&id) {
                    log_graphql_errors(sub.request.name(), &payload);
                    let _ = sub.items.send(Err(TransportError::GraphQl(payload))).await;
                }
                self.arm_lazy_close();
            }
            ServerMessage::Complete { id } => {
                if self.subscriptions.remove(&id).is_some() {
                    tracing::debug!(sub = %id, "server completed subscription");
                }
                self.arm_lazy_close();
            }
            ServerMessage::Ping { .. } => {
                self.send(&ClientMessage::Pong { payload: None }).await;
            }
            ServerMessage::Pong { .. } => tracing::trace!("pong"),
            ServerMessage::ConnectionAck { .. } => {
                tracing::debug!("duplicate connection_ack ignored");
            }
        }
    }

    /// Sends a frame; returns `false` if the socket is gone or the write failed.
    async fn send(&mut self, frame: &ClientMessage) -> bool {
        let Some(socket) = self.socket.as_mut() else {
            return false;
        };
        let text = match wire::encode_client(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(err = %e, "failed to encode client frame");
                return false;
            }
        };
        match socket.send(Message::Text(text.into())).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket send failed");
                false
            }
        }
    }

    async fn connection_lost(&mut self) {
        self.socket = None;
        if self.subscriptions.is_empty() {
            self.set_status(LinkStatus::Idle);
            return;
        }
        let max_attempts = self.config.retry_attempts;
        for attempt in 1..=max_attempts {
            self.set_status(LinkStatus::Reconnecting {
                attempt,
                max_attempts,
            });
            tokio::time::sleep(self.config.retry_backoff * attempt).await;
            match open(&self.config, self.token.as_deref()).await {
                Ok(socket) => {
                    self.socket = Some(socket);
                    self.keep_alive = keep_alive_timer(self.config.keep_alive);
                    if self.resubscribe().await {
                        tracing::info!(attempt, "WebSocket reconnected");
                        self.set_status(LinkStatus::Connected);
                        return;
                    }
                    self.socket = None;
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, err = %e, "WebSocket reconnect failed");
                }
            }
        }

        tracing::error!(
            subscriptions = self.subscriptions.len(),
            "WebSocket retries exhausted"
        );
        self.set_status(LinkStatus::Disconnected);
        for (_, sub) in self.subscriptions.drain() {
            let _ = sub.items.send(Err(TransportError::ConnectionClosed)).await;
        }
    }

    async fn resubscribe(&mut self) -> bool {
        let frames: Vec<ClientMessage> = self
            .subscriptions
            .iter()
            .map(|(id, sub)| ClientMessage::Subscribe {
                id: id.clone(),
                payload: sub.request.clone(),
            })
            .collect();
        for frame in &frames {
            if !self.send(frame).await {
                return false;
            }
        }
        true
    }

    fn arm_lazy_close(&mut self) {
        if self.subscriptions.is_empty() && self.socket.is_some() {
            self.idle_deadline = Some(Instant::now() + self.config.lazy_close);
        }
    }

    async fn close_socket(&mut self) {
        self.idle_deadline = None;
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }

    fn set_status(&self, status: LinkStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                tracing::debug!(?status, "link status");
                *current = status;
                true
            }
        });
    }
}

fn keep_alive_timer(period: Duration) -> tokio::time::Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_frame(
    socket: &mut Option<Socket>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Opens the socket and completes the `connection_init` handshake.
async fn open(config: &WsConfig, token: Option<&str>) -> Result<Socket, TransportError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Network(format!("invalid WebSocket URL: {e}")))?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(wire::SUBPROTOCOL),
    );

    let deadline = Instant::now() + config.connect_timeout;
    let (mut socket, _response) = tokio::time::timeout_at(deadline, connect_async(request))
        .await
        .map_err(|_| {
            tracing::warn!(url = %config.url, "WebSocket connect timed out");
            TransportError::Timeout
        })?
        .map_err(|e| {
            tracing::warn!(url = %config.url, err = %e, "WebSocket connect failed");
            map_connect_error(&config.url, e)
        })?;

    let init = wire::encode_client(&ClientMessage::ConnectionInit {
        payload: wire::connection_params(token),
    })?;
    socket
        .send(Message::Text(init.into()))
        .await
        .map_err(|e| TransportError::Network(format!("failed to send connection_init: {e}")))?;

    tokio::time::timeout_at(deadline, await_ack(&mut socket))
        .await
        .map_err(|_| {
            tracing::warn!(url = %config.url, "connection_ack timed out");
            TransportError::Timeout
        })??;
    tracing::info!(url = %config.url, authenticated = token.is_some(), "WebSocket connected");
    Ok(socket)
}

async fn await_ack(socket: &mut Socket) -> Result<(), TransportError> {
    while let Some(msg) = socket.next().await {
        match msg {
            Ok(Message::Text(text)) => match wire::decode_server(text.as_str()) {
                Ok(ServerMessage::ConnectionAck { .. }) => return Ok(()),
                Ok(ServerMessage::Ping { .. }) => {
                    let pong = wire::encode_client(&ClientMessage::Pong { payload: None })?;
                    socket
                        .send(Message::Text(pong.into()))
                        .await
                        .map_err(|e| TransportError::Network(e.to_string()))?;
                }
                Ok(other) => tracing::debug!(?other, "unexpected frame before ack"),
                Err(e) => tracing::warn!(err = %e, "malformed frame before ack"),
            },
            Ok(Message::Close(frame)) => {
                if let Some(frame) = &frame
                    && frame.code == CloseCode::from(wire::CLOSE_FORBIDDEN)
                {
                    tracing::warn!(reason = frame.reason.as_str(), "server rejected connection_init");
                }
                return Err(TransportError::ConnectionClosed);
            }
            Ok(_) => {}
            Err(e) => return Err(TransportError::Network(e.to_string())),
        }
    }
    Err(TransportError::ConnectionClosed)
}

fn map_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) =>
        {
            TransportError::Unreachable(url.to_string())
        }
        WsError::Http(response) => TransportError::Http {
            status: response.status().as_u16(),
        },
        other => TransportError::Network(format!("WebSocket connect error: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use taskdeck_proto::operation::{GraphQlResponse, Operation};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    use super::*;

    type ServerSocket = WebSocketStream<tokio::net::TcpStream>;

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_hdr_async(stream, |_: &Request, mut resp: Response| {
            resp.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static(wire::SUBPROTOCOL),
            );
            Ok(resp)
        })
        .await
        .unwrap()
    }

    async fn recv_client(socket: &mut ServerSocket) -> ClientMessage {
        loop {
            match socket.next().await.unwrap().unwrap() {
                Message::Text(text) => return wire::decode_client(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_server(socket: &mut ServerSocket, msg: &ServerMessage) {
        let text = wire::encode_server(msg).unwrap();
        socket.send(Message::Text(text.into())).await.unwrap();
    }

    /// Accepts a socket and acknowledges `connection_init`, returning its params.
    async fn handshake(listener: &TcpListener) -> (ServerSocket, Option<Value>) {
        let mut socket = accept(listener).await;
        let ClientMessage::ConnectionInit { payload } = recv_client(&mut socket).await else {
            panic!("expected connection_init");
        };
        send_server(&mut socket, &ServerMessage::ConnectionAck { payload: None }).await;
        (socket, payload)
    }

    async fn expect_subscribe(socket: &mut ServerSocket) -> (String, GraphQlRequest) {
        loop {
            match recv_client(socket).await {
                ClientMessage::Subscribe { id, payload } => return (id, payload),
                ClientMessage::Ping { .. } => continue,
                other => panic!("expected subscribe, got {other:?}"),
            }
        }
    }

    fn fast_config(addr: std::net::SocketAddr) -> WsConfig {
        WsConfig {
            connect_timeout: Duration::from_secs(2),
            lazy_close: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(20),
            ..WsConfig::new(format!("ws://{addr}/graphql"))
        }
    }

    #[tokio::test]
    async fn lazy_connect_with_bearer_params() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let channel = WsChannel::new(fast_config(listener.local_addr().unwrap()));
        assert_eq!(*channel.status().borrow(), LinkStatus::Idle);

        let client = tokio::spawn(async move {
            let stream = channel
                .subscribe(Operation::TaskAdded.to_request(), Some("tok".to_string()))
                .await
                .unwrap();
            (channel, stream)
        });

        let (mut server, params) = handshake(&listener).await;
        assert_eq!(params, Some(json!({ "authorization": "Bearer tok" })));
        let (id, request) = expect_subscribe(&mut server).await;
        assert_eq!(request.name(), "TaskAdded");

        let (channel, mut stream) = client.await.unwrap();
        assert_eq!(stream.id(), id);
        assert_eq!(*channel.status().borrow(), LinkStatus::Connected);

        let data = json!({ "taskAdded": { "id": "1", "title": "a", "completed": false } });
        send_server(
            &mut server,
            &ServerMessage::Next {
                id: id.clone(),
                payload: GraphQlResponse::ok(data.clone()),
            },
        )
        .await;
        assert_eq!(stream.next().await.unwrap().unwrap(), data);

        send_server(&mut server, &ServerMessage::Complete { id }).await;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn close_sends_complete_then_lazily_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let channel = WsChannel::new(fast_config(listener.local_addr().unwrap()));

        let client = tokio::spawn(async move {
            let stream = channel
                .subscribe(Operation::TaskDeleted.to_request(), None)
                .await
                .unwrap();
            (channel, stream)
        });
        let (mut server, params) = handshake(&listener).await;
        assert_eq!(params, None);
        let (id, _) = expect_subscribe(&mut server).await;
        let (channel, stream) = client.await.unwrap();

        stream.close();
        assert_eq!(
            recv_client(&mut server).await,
            ClientMessage::Complete { id }
        );

        // After the lazy-close timeout the client closes the socket.
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match server.next().await {
                    None | Some(Ok(Message::Close(_)) | Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "socket was not closed");
        let mut status = channel.status();
        status
            .wait_for(|s| *s == LinkStatus::Idle)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reconnects_and_resubscribes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let channel = WsChannel::new(fast_config(listener.local_addr().unwrap()));
        let client = tokio::spawn(async move {
            let stream = channel
                .subscribe(Operation::TaskUpdated.to_request(), None)
                .await
                .unwrap();
            (channel, stream)
        });

        let (mut first, _) = handshake(&listener).await;
        let (id, _) = expect_subscribe(&mut first).await;
        let (_channel, mut stream) = client.await.unwrap();
        drop(first);

        let (mut second, _) = handshake(&listener).await;
        let (resent_id, request) = expect_subscribe(&mut second).await;
        assert_eq!(resent_id, id);
        assert_eq!(request.name(), "TaskUpdated");

        let data = json!({ "taskUpdated": { "id": "3", "title": "x", "completed": true } });
        send_server(
            &mut second,
            &ServerMessage::Next {
                id,
                payload: GraphQlResponse::ok(data.clone()),
            },
        )
        .await;
        assert_eq!(stream.next().await.unwrap().unwrap(), data);
    }

    #[tokio::test]
    async fn exhausted_retries_end_streams() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = WsConfig {
            retry_attempts: 2,
            ..fast_config(addr)
        };
        let channel = WsChannel::new(config);
        let client = tokio::spawn(async move {
            let stream = channel
                .subscribe(Operation::TaskAdded.to_request(), None)
                .await
                .unwrap();
            (channel, stream)
        });
        let (mut server, _) = handshake(&listener).await;
        expect_subscribe(&mut server).await;
        let (channel, mut stream) = client.await.unwrap();

        // Stop listening so every reconnect is refused.
        drop(server);
        drop(listener);

        let item = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(matches!(item, Some(Err(TransportError::ConnectionClosed))));
        assert!(stream.next().await.is_none());
        assert_eq!(*channel.status().borrow(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn answers_server_ping_and_routes_by_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let channel = Arc::new(WsChannel::new(fast_config(listener.local_addr().unwrap())));
        let opened = Arc::new(AtomicUsize::new(0));

        let client_channel = Arc::clone(&channel);
        let counter = Arc::clone(&opened);
        let client = tokio::spawn(async move {
            let a = client_channel
                .subscribe(Operation::TaskAdded.to_request(), None)
                .await
                .unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let b = client_channel
                .subscribe(Operation::TaskDeleted.to_request(), None)
                .await
                .unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            (a, b)
        });

        let (mut server, _) = handshake(&listener).await;
        let (id_a, _) = expect_subscribe(&mut server).await;
        let (id_b, _) = expect_subscribe(&mut server).await;
        let (mut a, mut b) = client.await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_ne!(id_a, id_b);

        send_server(&mut server, &ServerMessage::Ping { payload: None }).await;
        assert_eq!(
            recv_client(&mut server).await,
            ClientMessage::Pong { payload: None }
        );

        let deleted = json!({ "taskDeleted": { "id": "9" } });
        send_server(
            &mut server,
            &ServerMessage::Next {
                id: id_b,
                payload: GraphQlResponse::ok(deleted.clone()),
            },
        )
        .await;
        assert_eq!(b.next().await.unwrap().unwrap(), deleted);
        assert!(a.items.try_recv().is_err());
    }

    #[tokio::test]
    async fn refused_connection_fails_subscribe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let channel = WsChannel::new(fast_config(addr));
        let result = channel
            .subscribe(Operation::TaskAdded.to_request(), None)
            .await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
        assert_eq!(*channel.status().borrow(), LinkStatus::Idle);
    }
}
