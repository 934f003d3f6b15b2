//! `HttpChannel` against a running dev server.

use std::sync::Arc;
use std::time::Duration;

use taskdeck::transport::http::HttpChannel;
use taskdeck::transport::{RequestChannel, TransportError};
use taskdeck_devserver::config::ServerConfig;
use taskdeck_devserver::server::{ServerState, start_server_with_state};
use taskdeck_proto::operation::{MutationOutcome, Operation, decode_tasks};
use taskdeck_proto::task::{TaskId, TaskPatch};

async fn start(config: &ServerConfig) -> (HttpChannel, Arc<ServerState>) {
    let state = Arc::new(ServerState::from_config(config));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("bind dev server");
    let channel = HttpChannel::new(
        format!("http://{addr}/graphql"),
        Duration::from_secs(2),
        Duration::from_secs(5),
    )
    .expect("build client");
    (channel, state)
}

async fn run(
    channel: &HttpChannel,
    op: &Operation,
    token: Option<&str>,
) -> Result<serde_json::Value, TransportError> {
    channel.execute(&op.to_request(), token).await
}

#[tokio::test]
async fn create_then_query_lists_newest_first() {
    let (channel, _state) = start(&ServerConfig::default()).await;

    for title in ["first", "second"] {
        let op = Operation::CreateTask {
            title: title.to_string(),
        };
        let data = run(&channel, &op, None).await.unwrap();
        let MutationOutcome::Created(task) = MutationOutcome::decode(&op, &data).unwrap() else {
            panic!("expected a created task");
        };
        assert_eq!(task.title, title);
        assert!(!task.id.is_temporary());
        assert!(task.created_at.is_some());
    }

    let data = run(&channel, &Operation::Tasks, None).await.unwrap();
    let titles: Vec<_> = decode_tasks(&data)
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, ["second", "first"]);
}

#[tokio::test]
async fn update_and_delete_round_trip() {
    let (channel, state) = start(&ServerConfig::default()).await;
    let task = state.store.create("Walk dog").await.unwrap();

    let op = Operation::UpdateTask {
        id: task.id.clone(),
        patch: TaskPatch::completed(true),
    };
    let data = run(&channel, &op, None).await.unwrap();
    let MutationOutcome::Updated(updated) = MutationOutcome::decode(&op, &data).unwrap() else {
        panic!("expected an updated task");
    };
    assert!(updated.completed);
    assert_eq!(updated.title, "Walk dog");

    let op = Operation::DeleteTask {
        id: task.id.clone(),
    };
    let data = run(&channel, &op, None).await.unwrap();
    assert_eq!(
        MutationOutcome::decode(&op, &data).unwrap(),
        MutationOutcome::Deleted(task.id)
    );
    assert!(state.store.list().await.is_empty());
}

#[tokio::test]
async fn graphql_errors_surface_with_code() {
    let (channel, _state) = start(&ServerConfig::default()).await;
    let op = Operation::DeleteTask {
        id: TaskId::new("404"),
    };
    match run(&channel, &op, None).await {
        Err(TransportError::GraphQl(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].code(), Some("NOT_FOUND"));
        }
        other => panic!("expected GraphQL error, got {other:?}"),
    }
}

#[tokio::test]
async fn token_is_sent_as_bearer() {
    let config = ServerConfig {
        require_token: Some("secret".to_string()),
        ..Default::default()
    };
    let (channel, _state) = start(&config).await;

    match run(&channel, &Operation::Tasks, None).await {
        Err(TransportError::GraphQl(errors)) => {
            assert_eq!(errors[0].code(), Some("UNAUTHENTICATED"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(run(&channel, &Operation::Tasks, Some("wrong")).await.is_err());
    assert!(run(&channel, &Operation::Tasks, Some("secret")).await.is_ok());
}

#[tokio::test]
async fn injected_failure_is_reported() {
    let (channel, state) = start(&ServerConfig::default()).await;
    state.store.fail_next_mutations(1).await;
    let op = Operation::CreateTask {
        title: "doomed".to_string(),
    };
    assert!(matches!(
        run(&channel, &op, None).await,
        Err(TransportError::GraphQl(_))
    ));
    assert!(run(&channel, &op, None).await.is_ok());
}

#[tokio::test]
async fn unreachable_server_is_reported() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel = HttpChannel::new(
        format!("http://{addr}/graphql"),
        Duration::from_secs(1),
        Duration::from_secs(2),
    )
    .unwrap();
    assert!(matches!(
        run(&channel, &Operation::Tasks, None).await,
        Err(TransportError::Unreachable(_) | TransportError::Network(_))
    ));
}
