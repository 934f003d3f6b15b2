//! Loopback backend for testing.
//!
//! [`LoopbackChannel`] answers requests from an in-memory task list and
//! pushes the resulting change to every matching subscription, the way the
//! real API broadcasts to all connected clients. Clones share one backend,
//! so the same value can serve as both the request and the subscription
//! channel of a [`super::TransportRouter`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};

use taskdeck_proto::event::SubscriptionEvent;
use taskdeck_proto::operation::{
    GraphQlError, GraphQlRequest, MutationOutcome, Operation, OperationKind,
};
use taskdeck_proto::task::{Task, TaskId};

use super::{LinkStatus, RequestChannel, SubscriptionChannel, SubscriptionStream, TransportError};

/// Buffer per loopback subscription.
const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Default)]
struct Backend {
    /// Newest first.
    tasks: Vec<Task>,
    next_id: u64,
    fail_mutations: u32,
    last_token: Option<String>,
    next_subscription: u64,
    subscribers: HashMap<String, Subscriber>,
}

struct Subscriber {
    operation: Operation,
    tx: mpsc::Sender<Result<Value, TransportError>>,
}

impl Backend {
    fn run(&mut self, op: &Operation) -> Result<(Value, Option<SubscriptionEvent>), GraphQlError> {
        if op.kind() == OperationKind::Mutation && self.fail_mutations > 0 {
            self.fail_mutations -= 1;
            return Err(GraphQlError::with_code("injected failure", "INTERNAL_SERVER_ERROR"));
        }
        match op {
            Operation::Tasks => Ok((json!({ "tasks": self.tasks }), None)),
            Operation::CreateTask { title } => {
                self.next_id += 1;
                let task = Task::new(self.next_id.to_string(), title.clone(), false);
                self.tasks.insert(0, task.clone());
                let data = MutationOutcome::Created(task.clone()).to_data();
                Ok((data, Some(SubscriptionEvent::Added(task))))
            }
            Operation::UpdateTask { id, patch } => {
                let slot = self
                    .tasks
                    .iter_mut()
                    .find(|t| &t.id == id)
                    .ok_or_else(|| not_found(id))?;
                *slot = patch.apply_to(slot);
                let task = slot.clone();
                let data = MutationOutcome::Updated(task.clone()).to_data();
                Ok((data, Some(SubscriptionEvent::Updated(task))))
            }
            Operation::DeleteTask { id } => {
                let index = self
                    .tasks
                    .iter()
                    .position(|t| &t.id == id)
                    .ok_or_else(|| not_found(id))?;
                self.tasks.remove(index);
                let data = MutationOutcome::Deleted(id.clone()).to_data();
                Ok((data, Some(SubscriptionEvent::Deleted(id.clone()))))
            }
            Operation::TaskAdded | Operation::TaskUpdated | Operation::TaskDeleted => Err(
                GraphQlError::with_code("subscriptions are not executed", "BAD_REQUEST"),
            ),
        }
    }

    fn broadcast(&mut self, event: &SubscriptionEvent) {
        let operation = event.operation();
        let data = event.to_data();
        self.subscribers.retain(|id, sub| {
            if sub.operation != operation {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(Ok(data.clone())) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(sub = %id, "loopback subscriber lagging, event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

fn not_found(id: &TaskId) -> GraphQlError {
    GraphQlError::with_code(format!("task {id} not found"), "NOT_FOUND")
}

/// In-process task API implementing both channel traits.
#[derive(Clone)]
pub struct LoopbackChannel {
    backend: Arc<Mutex<Backend>>,
    status: Arc<watch::Sender<LinkStatus>>,
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackChannel {
    /// Creates an empty backend. Ids are assigned as `1`, `2`, ...
    #[must_use]
    pub fn new() -> Self {
        let (status, _) = watch::channel(LinkStatus::Connected);
        Self {
            backend: Arc::new(Mutex::new(Backend::default())),
            status: Arc::new(status),
        }
    }

    /// Creates a backend holding `tasks` (newest first).
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let channel = Self::new();
        {
            let mut backend = channel.backend.lock();
            backend.next_id = tasks
                .iter()
                .filter_map(|t| t.id.as_str().parse::<u64>().ok())
                .max()
                .unwrap_or(0);
            backend.tasks = tasks;
        }
        channel
    }

    /// Makes the next `n` mutations fail with a GraphQL error.
    pub fn fail_next_mutations(&self, n: u32) {
        self.backend.lock().fail_mutations = n;
    }

    /// Pushes `event` to subscribers without touching the task list.
    pub fn push(&self, event: &SubscriptionEvent) {
        self.backend.lock().broadcast(event);
    }

    /// Snapshot of the server-side task list.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.backend.lock().tasks.clone()
    }

    /// Token attached to the most recent call.
    #[must_use]
    pub fn last_token(&self) -> Option<String> {
        self.backend.lock().last_token.clone()
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut backend = self.backend.lock();
        backend.subscribers.retain(|_, sub| !sub.tx.is_closed());
        backend.subscribers.len()
    }
}

impl RequestChannel for LoopbackChannel {
    async fn execute(
        &self,
        request: &GraphQlRequest,
        token: Option<&str>,
    ) -> Result<Value, TransportError> {
        let op = Operation::parse(request.name(), &request.variables)?;
        let mut backend = self.backend.lock();
        backend.last_token = token.map(str::to_string);
        match backend.run(&op) {
            Ok((data, event)) => {
                if let Some(event) = event {
                    backend.broadcast(&event);
                }
                Ok(data)
            }
            Err(e) => {
                super::log_graphql_errors(op.name(), std::slice::from_ref(&e));
                Err(TransportError::GraphQl(vec![e]))
            }
        }
    }
}

impl SubscriptionChannel for LoopbackChannel {
    async fn subscribe(
        &self,
        request: GraphQlRequest,
        token: Option<String>,
    ) -> Result<SubscriptionStream, TransportError> {
        let operation = Operation::parse(request.name(), &request.variables)?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let id = {
            let mut backend = self.backend.lock();
            backend.last_token = token;
            backend.next_subscription += 1;
            let id = format!("loopback-{}", backend.next_subscription);
            backend
                .subscribers
                .insert(id.clone(), Subscriber { operation, tx });
            id
        };
        let backend = Arc::clone(&self.backend);
        let key = id.clone();
        Ok(SubscriptionStream::new(id, rx, move || {
            backend.lock().subscribers.remove(&key);
        }))
    }

    fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }
}
