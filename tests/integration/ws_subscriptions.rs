//! `WsChannel` against a running dev server: delivery, reconnect and auth.

use std::sync::Arc;
use std::time::Duration;

use taskdeck::transport::ws::{WsChannel, WsConfig};
use taskdeck::transport::{LinkStatus, SubscriptionChannel, SubscriptionStream, TransportError};
use taskdeck_devserver::config::ServerConfig;
use taskdeck_devserver::server::{ServerState, start_server_with_state};
use taskdeck_proto::event::SubscriptionEvent;
use taskdeck_proto::operation::Operation;

async fn start(config: &ServerConfig) -> (String, Arc<ServerState>) {
    let state = Arc::new(ServerState::from_config(config));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("ws://{addr}/graphql"), state)
}

fn fast_config(url: String) -> WsConfig {
    WsConfig {
        connect_timeout: Duration::from_secs(2),
        retry_backoff: Duration::from_millis(50),
        lazy_close: Duration::from_millis(200),
        ..WsConfig::new(url)
    }
}

async fn subscribe(channel: &WsChannel, op: &Operation) -> SubscriptionStream {
    channel.subscribe(op.to_request(), None).await.unwrap()
}

/// Creates tasks until one shows up on `stream`.
///
/// The subscribe frame may still be in flight when `subscribe` returns, so
/// the first mutation can race it.
async fn create_until_seen(state: &ServerState, stream: &mut SubscriptionStream) -> SubscriptionEvent {
    for attempt in 0..20 {
        state.store.create(&format!("task {attempt}")).await.unwrap();
        if let Ok(item) = tokio::time::timeout(Duration::from_millis(250), stream.next()).await {
            let data = item.expect("stream ended").unwrap();
            return SubscriptionEvent::decode(&Operation::TaskAdded, &data).unwrap();
        }
    }
    panic!("no event delivered");
}

async fn wait_for_status(channel: &WsChannel, wanted: &LinkStatus) {
    let mut status = channel.status();
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s == wanted))
        .await
        .expect("status not reached")
        .unwrap();
}

#[tokio::test]
async fn delivers_events_for_each_subscription() {
    let (url, state) = start(&ServerConfig::default()).await;
    let channel = WsChannel::new(fast_config(url));

    let mut added = subscribe(&channel, &Operation::TaskAdded).await;
    let mut deleted = subscribe(&channel, &Operation::TaskDeleted).await;
    assert_eq!(*channel.status().borrow(), LinkStatus::Connected);

    let SubscriptionEvent::Added(task) = create_until_seen(&state, &mut added).await else {
        panic!("expected taskAdded");
    };
    state.store.delete(&task.id).await.unwrap();

    let data = tokio::time::timeout(Duration::from_secs(2), deleted.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        SubscriptionEvent::decode(&Operation::TaskDeleted, &data).unwrap(),
        SubscriptionEvent::Deleted(task.id)
    );
    // Both subscriptions share one socket.
    assert_eq!(state.connection_count().await, 1);
}

#[tokio::test]
async fn reconnects_and_resubscribes_after_drop() {
    let (url, state) = start(&ServerConfig::default()).await;
    let channel = WsChannel::new(fast_config(url));
    let mut added = subscribe(&channel, &Operation::TaskAdded).await;
    create_until_seen(&state, &mut added).await;

    state.close_all_connections().await;
    wait_for_status(&channel, &LinkStatus::Connected).await;

    // Events after the reconnect still arrive on the original stream.
    let event = create_until_seen(&state, &mut added).await;
    assert!(matches!(event, SubscriptionEvent::Added(_)));
}

#[tokio::test]
async fn closing_last_stream_lazily_closes_socket() {
    let (url, state) = start(&ServerConfig::default()).await;
    let channel = WsChannel::new(fast_config(url));
    let stream = subscribe(&channel, &Operation::TaskUpdated).await;
    stream.close();

    wait_for_status(&channel, &LinkStatus::Idle).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.connection_count().await, 0);
}

#[tokio::test]
async fn rejected_token_fails_subscribe() {
    let config = ServerConfig {
        require_token: Some("secret".to_string()),
        ..Default::default()
    };
    let (url, _state) = start(&config).await;
    let channel = WsChannel::new(fast_config(url));

    let result = channel
        .subscribe(Operation::TaskAdded.to_request(), Some("wrong".to_string()))
        .await;
    assert!(result.is_err());
    assert_eq!(*channel.status().borrow(), LinkStatus::Idle);

    let ok = channel
        .subscribe(Operation::TaskAdded.to_request(), Some("secret".to_string()))
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn unreachable_server_fails_subscribe() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel = WsChannel::new(fast_config(format!("ws://{addr}/graphql")));
    let result = channel.subscribe(Operation::TaskAdded.to_request(), None).await;
    assert!(matches!(
        result,
        Err(TransportError::Unreachable(_) | TransportError::Network(_) | TransportError::Timeout)
    ));
}
