//! Networking coordinator for wiring the TUI to the async transport layer.
//!
//! This module bridges the synchronous TUI event loop (crossterm poll-based)
//! with the async [`TransportRouter`]. It spawns background tokio tasks and
//! communicates with the main thread via [`NetCommand`] / [`NetEvent`]
//! channels.
//!
//! # Architecture
//!
//! ```text
//! TUI (main thread)  ←── NetEvent ───  tokio background tasks
//!                     ─── NetCommand →
//! ```
//!
//! Every result (query, mutation, pushed event, link status) arrives on the
//! single [`NetEvent`] queue, so the main thread applies them one at a time.
//! Background tasks never touch the cache.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use taskdeck_proto::event::SubscriptionEvent;
use taskdeck_proto::operation::{MutationOutcome, Operation, decode_tasks};
use taskdeck_proto::task::Task;

use crate::reconcile::MutationId;
use crate::transport::{
    LinkStatus, RequestChannel, SubscriptionChannel, TransportError, TransportRouter,
};

/// Subscriptions opened when networking starts.
pub const SUBSCRIPTIONS: [Operation; 3] = [
    Operation::TaskAdded,
    Operation::TaskUpdated,
    Operation::TaskDeleted,
];

/// Commands sent from the TUI main loop to the networking background tasks.
#[derive(Debug)]
pub enum NetCommand {
    /// Re-run the task query (and reopen any subscription that ended).
    Refresh,
    /// Send a mutation; its result comes back as [`NetEvent::MutationSettled`].
    Mutate {
        /// Ledger id assigned by the reconciler.
        mutation: MutationId,
        /// The mutation to send.
        operation: Operation,
    },
    /// Close subscriptions and stop the networking tasks.
    Shutdown,
}

/// Events sent from the networking background tasks to the TUI main loop.
#[derive(Debug)]
pub enum NetEvent {
    /// The task query succeeded.
    TasksLoaded(Vec<Task>),
    /// The task query failed.
    QueryFailed(String),
    /// A mutation finished.
    MutationSettled {
        /// Ledger id of the mutation.
        mutation: MutationId,
        /// Decoded result, or a message describing the failure.
        result: Result<MutationOutcome, String>,
    },
    /// A pushed change.
    Subscription(SubscriptionEvent),
    /// A subscription failed or ended.
    SubscriptionError {
        /// Subscription operation name.
        operation: &'static str,
        /// What went wrong.
        message: String,
    },
    /// The live-update link changed state.
    LinkStatus(LinkStatus),
}

/// Configuration for the networking layer.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Channel capacity for command/event mpsc channels.
    pub channel_capacity: usize,
}

/// Default channel capacity for commands and events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handles returned by [`spawn_net`].
pub struct NetHandles {
    /// Commands to the networking tasks.
    pub commands: mpsc::Sender<NetCommand>,
    /// The single inbound event queue.
    pub events: mpsc::Receiver<NetEvent>,
    /// Finishes after [`NetCommand::Shutdown`] once every subscription is closed.
    pub task: JoinHandle<()>,
}

/// Spawn the networking background tasks.
///
/// Must be called inside a tokio runtime. Spawns:
///
/// 1. A **command handler** that runs the initial query, opens the three
///    subscriptions and then serves [`NetCommand`]s, each query or
///    mutation in its own task.
/// 2. One **subscription forwarder** per subscription that decodes pushed
///    payloads into [`NetEvent::Subscription`].
/// 3. A **status forwarder** for the live-update link.
pub fn spawn_net<R, S>(router: TransportRouter<R, S>, config: &NetConfig) -> NetHandles
where
    R: RequestChannel,
    S: SubscriptionChannel,
{
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel::<NetCommand>(capacity);
    let (evt_tx, evt_rx) = mpsc::channel::<NetEvent>(capacity);
    let router = Arc::new(router);

    let task = tokio::spawn(command_handler(router, cmd_rx, evt_tx));
    NetHandles {
        commands: cmd_tx,
        events: evt_rx,
        task,
    }
}

/// Background task: handle commands from the TUI main loop.
async fn command_handler<R, S>(
    router: Arc<TransportRouter<R, S>>,
    mut cmd_rx: mpsc::Receiver<NetCommand>,
    evt_tx: mpsc::Sender<NetEvent>,
) where
    R: RequestChannel,
    S: SubscriptionChannel,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let status = tokio::spawn(status_forwarder(
        router.link_status(),
        evt_tx.clone(),
        shutdown_rx.clone(),
    ));

    let mut forwarders: HashMap<&'static str, JoinHandle<()>> = HashMap::new();
    open_subscriptions(&router, &evt_tx, &shutdown_rx, &mut forwarders);
    spawn_query(&router, &evt_tx);

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            NetCommand::Refresh => {
                open_subscriptions(&router, &evt_tx, &shutdown_rx, &mut forwarders);
                spawn_query(&router, &evt_tx);
            }
            NetCommand::Mutate {
                mutation,
                operation,
            } => spawn_mutation(&router, &evt_tx, mutation, operation),
            NetCommand::Shutdown => {
                tracing::info!("net command handler shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    for (name, handle) in forwarders {
        if let Err(e) = handle.await {
            tracing::warn!(op = name, err = %e, "subscription forwarder panicked");
        }
    }
    let _ = status.await;
}

/// Starts a forwarder for every subscription that is not running.
fn open_subscriptions<R, S>(
    router: &Arc<TransportRouter<R, S>>,
    evt_tx: &mpsc::Sender<NetEvent>,
    shutdown: &watch::Receiver<bool>,
    forwarders: &mut HashMap<&'static str, JoinHandle<()>>,
) where
    R: RequestChannel,
    S: SubscriptionChannel,
{
    for operation in SUBSCRIPTIONS {
        let running = forwarders
            .get(operation.name())
            .is_some_and(|h| !h.is_finished());
        if running {
            continue;
        }
        let handle = tokio::spawn(subscription_forwarder(
            Arc::clone(router),
            operation.clone(),
            evt_tx.clone(),
            shutdown.clone(),
        ));
        forwarders.insert(operation.name(), handle);
    }
}

fn spawn_query<R, S>(router: &Arc<TransportRouter<R, S>>, evt_tx: &mpsc::Sender<NetEvent>)
where
    R: RequestChannel,
    S: SubscriptionChannel,
{
    let router = Arc::clone(router);
    let evt_tx = evt_tx.clone();
    tokio::spawn(async move {
        let event = match router.execute(&Operation::Tasks).await {
            Ok(data) => match decode_tasks(&data) {
                Ok(tasks) => {
                    tracing::info!(count = tasks.len(), "tasks loaded");
                    NetEvent::TasksLoaded(tasks)
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed tasks result");
                    NetEvent::QueryFailed(format!("malformed response: {e}"))
                }
            },
            Err(e) => {
                tracing::warn!(err = %e, "tasks query failed");
                NetEvent::QueryFailed(e.to_string())
            }
        };
        let _ = evt_tx.send(event).await;
    });
}

fn spawn_mutation<R, S>(
    router: &Arc<TransportRouter<R, S>>,
    evt_tx: &mpsc::Sender<NetEvent>,
    mutation: MutationId,
    operation: Operation,
) where
    R: RequestChannel,
    S: SubscriptionChannel,
{
    let router = Arc::clone(router);
    let evt_tx = evt_tx.clone();
    tokio::spawn(async move {
        let result = match router.execute(&operation).await {
            Ok(data) => MutationOutcome::decode(&operation, &data).map_err(|e| {
                tracing::warn!(%mutation, op = operation.name(), err = %e, "malformed mutation result");
                format!("malformed response: {e}")
            }),
            Err(e) => Err(e.to_string()),
        };
        let _ = evt_tx
            .send(NetEvent::MutationSettled { mutation, result })
            .await;
    });
}

/// Background task: forward one subscription's payloads as `NetEvent`s.
///
/// Ends when the stream ends, the TUI is gone, or shutdown is signalled;
/// on shutdown the stream is closed so the server sees `complete`.
async fn subscription_forwarder<R, S>(
    router: Arc<TransportRouter<R, S>>,
    operation: Operation,
    evt_tx: mpsc::Sender<NetEvent>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: RequestChannel,
    S: SubscriptionChannel,
{
    let name = operation.name();
    let mut stream = match router.subscribe(&operation).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(op = name, err = %e, "subscribe failed");
            let _ = evt_tx
                .send(NetEvent::SubscriptionError {
                    operation: name,
                    message: e.to_string(),
                })
                .await;
            return;
        }
    };
    tracing::debug!(op = name, id = stream.id(), "subscription open");

    loop {
        let item = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            item = stream.next() => item,
        };

        let event = match item {
            Some(Ok(data)) => match SubscriptionEvent::decode(&operation, &data) {
                Ok(event) => NetEvent::Subscription(event),
                Err(e) => {
                    tracing::warn!(op = name, err = %e, "malformed subscription payload dropped");
                    continue;
                }
            },
            Some(Err(e)) => {
                let fatal = matches!(e, TransportError::ConnectionClosed);
                let sent = evt_tx
                    .send(NetEvent::SubscriptionError {
                        operation: name,
                        message: e.to_string(),
                    })
                    .await;
                if fatal || sent.is_err() {
                    break;
                }
                continue;
            }
            None => {
                tracing::info!(op = name, "subscription ended");
                let _ = evt_tx
                    .send(NetEvent::SubscriptionError {
                        operation: name,
                        message: "subscription ended".to_string(),
                    })
                    .await;
                break;
            }
        };
        if evt_tx.send(event).await.is_err() {
            break;
        }
    }
    stream.close();
}

/// Background task: report link status changes.
async fn status_forwarder(
    mut status: watch::Receiver<LinkStatus>,
    evt_tx: mpsc::Sender<NetEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let initial = status.borrow_and_update().clone();
    if evt_tx.send(NetEvent::LinkStatus(initial)).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if evt_tx.send(NetEvent::LinkStatus(current)).await.is_err() {
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
