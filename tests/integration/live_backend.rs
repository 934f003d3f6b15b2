//! The full client stack (router, net tasks, app state) against a running
//! dev server over HTTP and WebSocket.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use taskdeck::app::{App, ListStatus, Severity};
use taskdeck::auth::MemoryCredentialStore;
use taskdeck::net::{NetCommand, NetConfig, NetEvent, NetHandles, spawn_net};
use taskdeck::reconcile::Reconciler;
use taskdeck::transport::http::HttpChannel;
use taskdeck::transport::ws::{WsChannel, WsConfig};
use taskdeck::transport::{LinkStatus, TransportRouter};
use taskdeck_devserver::config::ServerConfig;
use taskdeck_devserver::server::{ServerState, start_server_with_state};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    app: App,
    net: NetHandles,
    state: Arc<ServerState>,
}

async fn start_with(config: &ServerConfig, token: Option<&str>) -> Harness {
    let state = Arc::new(ServerState::from_config(config));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();

    let http = HttpChannel::new(
        format!("http://{addr}/graphql"),
        Duration::from_secs(2),
        Duration::from_secs(5),
    )
    .unwrap();
    let ws = WsChannel::new(WsConfig {
        retry_backoff: Duration::from_millis(50),
        ..WsConfig::new(format!("ws://{addr}/graphql"))
    });
    let credentials = Arc::new(match token {
        Some(token) => MemoryCredentialStore::with_token(token),
        None => MemoryCredentialStore::new(),
    });
    let router = TransportRouter::new(http, ws, credentials);
    let net = spawn_net(router, &NetConfig::default());

    Harness {
        app: App::new(Reconciler::default()),
        net,
        state,
    }
}

async fn start() -> Harness {
    start_with(&ServerConfig::default(), None).await
}

impl Harness {
    async fn send(&self, cmd: NetCommand) {
        self.net.commands.send(cmd).await.unwrap();
    }

    /// Applies events until `done` holds for the app state.
    async fn pump_until(&mut self, done: impl Fn(&App) -> bool) {
        let app = &mut self.app;
        let events = &mut self.net.events;
        tokio::time::timeout(WAIT, async {
            while !done(app) {
                let event = events.recv().await.expect("net task ended");
                app.apply_net_event(event);
            }
        })
        .await
        .expect("condition not reached");
    }

    /// Applies whatever arrives within `window`.
    async fn pump_for(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) =
            tokio::time::timeout_at(deadline, self.net.events.recv()).await
        {
            self.app.apply_net_event(event);
        }
    }

    fn titles(&self) -> Vec<String> {
        self.app.tasks().into_iter().map(|t| t.title).collect()
    }

    async fn shutdown(self) {
        let Self { net, .. } = self;
        let NetHandles {
            commands,
            mut events,
            task,
        } = net;
        commands.send(NetCommand::Shutdown).await.unwrap();
        // Keep draining so forwarders never block on a full queue.
        let drain = tokio::spawn(async move { while events.recv().await.is_some() {} });
        tokio::time::timeout(WAIT, task)
            .await
            .expect("net task did not stop")
            .unwrap();
        drain.abort();
    }
}

fn drain_pending(rx: &mut mpsc::Receiver<NetEvent>) -> usize {
    let mut n = 0;
    while rx.try_recv().is_ok() {
        n += 1;
    }
    n
}

#[tokio::test]
async fn initial_query_loads_server_tasks() {
    let mut h = start().await;
    for title in ["older", "newer"] {
        h.state.store.create(title).await.unwrap();
    }
    // The first query may have raced the inserts; refresh to be sure.
    let refresh = h.app.refresh();
    h.send(refresh).await;
    h.pump_until(|app| app.status == ListStatus::Ready && app.tasks().len() == 2)
        .await;
    assert_eq!(h.titles(), ["newer", "older"]);
    h.shutdown().await;
}

#[tokio::test]
async fn create_converges_to_one_saved_entry() {
    let mut h = start().await;
    h.pump_until(|app| app.status == ListStatus::Ready && app.link == LinkStatus::Connected)
        .await;

    let cmd = h.app.create("Buy milk");
    assert!(h.app.tasks()[0].id.is_temporary());
    h.send(cmd.unwrap()).await;

    h.pump_until(|app| app.reconciler.pending_count() == 0).await;
    // Let the broadcast for our own create arrive too.
    h.pump_for(Duration::from_millis(300)).await;

    let tasks = h.app.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Buy milk");
    assert!(!tasks[0].id.is_temporary());
    assert_eq!(h.state.store.list().await, tasks);
    h.shutdown().await;
}

#[tokio::test]
async fn changes_from_other_clients_arrive_live() {
    let mut h = start().await;
    h.pump_until(|app| app.status == ListStatus::Ready && app.link == LinkStatus::Connected)
        .await;

    // Subscriptions may still be registering; keep writing until one lands.
    let mut seen = false;
    for attempt in 0..20 {
        h.state.store.create(&format!("remote {attempt}")).await.unwrap();
        h.pump_for(Duration::from_millis(200)).await;
        if !h.app.tasks().is_empty() {
            seen = true;
            break;
        }
    }
    assert!(seen, "no live event delivered");

    let first = h.app.tasks()[0].clone();
    h.state
        .store
        .update(&first.id, &taskdeck_proto::task::TaskPatch::completed(true))
        .await
        .unwrap();
    h.pump_until(|app| app.tasks().iter().any(|t| t.id == first.id && t.completed))
        .await;

    h.state.store.delete(&first.id).await.unwrap();
    h.pump_until(|app| app.tasks().iter().all(|t| t.id != first.id))
        .await;
    h.shutdown().await;
}

#[tokio::test]
async fn failed_mutation_rolls_back_and_reports() {
    let mut h = start().await;
    let task = h.state.store.create("Keep me").await.unwrap();
    let refresh = h.app.refresh();
    h.send(refresh).await;
    h.pump_until(|app| app.tasks().len() == 1).await;

    h.state.store.fail_next_mutations(1).await;
    let cmd = h.app.delete(&task.id);
    assert!(h.app.tasks().is_empty());
    h.send(cmd.unwrap()).await;

    h.pump_until(|app| app.reconciler.pending_count() == 0).await;
    assert_eq!(h.titles(), ["Keep me"]);
    assert!(
        h.app
            .system_messages
            .iter()
            .any(|m| m.severity == Severity::Error && m.text.contains("delete"))
    );
    h.shutdown().await;
}

#[tokio::test]
async fn missing_token_shows_load_error() {
    let config = ServerConfig {
        require_token: Some("secret".to_string()),
        ..Default::default()
    };
    let mut h = start_with(&config, None).await;
    h.pump_until(|app| matches!(app.status, ListStatus::Error(_)))
        .await;
    h.shutdown().await;
}

#[tokio::test]
async fn token_grants_access() {
    let config = ServerConfig {
        require_token: Some("secret".to_string()),
        ..Default::default()
    };
    let mut h = start_with(&config, Some("secret")).await;
    h.pump_until(|app| app.status == ListStatus::Ready && app.link == LinkStatus::Connected)
        .await;
    let cmd = h.app.create("Private");
    h.send(cmd.unwrap()).await;
    h.pump_until(|app| app.reconciler.pending_count() == 0).await;
    assert_eq!(h.state.store.list().await.len(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_subscriptions() {
    let mut h = start().await;
    h.pump_until(|app| app.link == LinkStatus::Connected).await;
    drain_pending(&mut h.net.events);
    let state = Arc::clone(&h.state);
    h.shutdown().await;

    // Dropping the router ends the socket task, which closes the socket.
    tokio::time::timeout(WAIT, async {
        while state.connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("socket still open after shutdown");
}
