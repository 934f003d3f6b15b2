//! In-memory task store.
//!
//! The [`TaskStore`] holds the task list (newest first), assigns ids and
//! timestamps, and publishes a [`SubscriptionEvent`] for every successful
//! mutation on a broadcast channel that WebSocket subscriptions listen to.

use serde_json::{Value, json};
use taskdeck_proto::event::SubscriptionEvent;
use taskdeck_proto::operation::{GraphQlError, MutationOutcome, Operation};
use taskdeck_proto::task::{MAX_TASK_TITLE_LENGTH, Task, TaskId, TaskPatch};
use tokio::sync::{RwLock, broadcast};

/// Capacity of the event broadcast channel.
const EVENT_BUFFER: usize = 1024;

/// Errors returned by store operations. Each maps to a GraphQL error code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Title is empty after trimming.
    #[error("title must not be empty")]
    TitleEmpty,
    /// Title exceeds the configured limit.
    #[error("title exceeds {max} characters")]
    TitleTooLong {
        /// Limit in characters.
        max: usize,
    },
    /// No task with this id.
    #[error("task {0} not found")]
    NotFound(TaskId),
    /// Update without any field to change.
    #[error("update must change title or completed")]
    EmptyPatch,
    /// Subscriptions are only served over WebSocket.
    #[error("{0} is a subscription; use the WebSocket endpoint")]
    NotExecutable(&'static str),
    /// Failure injected with [`TaskStore::fail_next_mutations`].
    #[error("injected failure")]
    Injected,
}

impl StoreError {
    /// The `extensions.code` reported to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::TitleEmpty | Self::TitleTooLong { .. } | Self::EmptyPatch => "BAD_USER_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::NotExecutable(_) => "BAD_REQUEST",
            Self::Injected => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Converts into a GraphQL error located at `field`.
    #[must_use]
    pub fn to_graphql(&self, field: &str) -> GraphQlError {
        let mut error = GraphQlError::with_code(self.to_string(), self.code());
        error.path = Some(vec![Value::String(field.to_string())]);
        error
    }
}

struct Inner {
    tasks: Vec<Task>,
    next_id: u64,
    fail_mutations: u32,
}

/// Shared in-memory task list.
pub struct TaskStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<SubscriptionEvent>,
    max_title_len: usize,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    /// Creates an empty store with the default title limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_title_len(MAX_TASK_TITLE_LENGTH)
    }

    /// Creates an empty store with a custom title limit.
    #[must_use]
    pub fn with_max_title_len(max_title_len: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: RwLock::new(Inner {
                tasks: Vec::new(),
                next_id: 1,
                fail_mutations: 0,
            }),
            events,
            max_title_len,
        }
    }

    /// Listens for events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.events.subscribe()
    }

    /// Makes the next `n` mutations fail with [`StoreError::Injected`].
    pub async fn fail_next_mutations(&self, n: u32) {
        self.inner.write().await.fail_mutations = n;
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Vec<Task> {
        self.inner.read().await.tasks.clone()
    }

    /// Creates a task and publishes `Added`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the title is invalid or a failure was injected.
    pub async fn create(&self, title: &str) -> Result<Task, StoreError> {
        let title = self.validate_title(title)?;
        let mut inner = self.inner.write().await;
        take_injected(&mut inner)?;
        let now = now_millis();
        let task = Task {
            id: TaskId::new(inner.next_id.to_string()),
            title,
            completed: false,
            created_at: Some(now),
            updated_at: Some(now),
            user_id: None,
        };
        inner.next_id += 1;
        inner.tasks.insert(0, task.clone());
        drop(inner);
        tracing::info!(id = %task.id, "task created");
        self.publish(SubscriptionEvent::Added(task.clone()));
        Ok(task)
    }

    /// Applies `patch` to task `id` and publishes `Updated`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the patch is empty or invalid, the task does
    /// not exist, or a failure was injected.
    pub async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, StoreError> {
        if patch.title.is_none() && patch.completed.is_none() {
            return Err(StoreError::EmptyPatch);
        }
        let title = patch
            .title
            .as_deref()
            .map(|t| self.validate_title(t))
            .transpose()?;
        let mut inner = self.inner.write().await;
        take_injected(&mut inner)?;
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if let Some(title) = title {
            task.title = title;
        }
        if let Some(completed) = patch.completed {
            task.completed = completed;
        }
        task.updated_at = Some(now_millis());
        let task = task.clone();
        drop(inner);
        tracing::info!(id = %task.id, "task updated");
        self.publish(SubscriptionEvent::Updated(task.clone()));
        Ok(task)
    }

    /// Removes task `id` and publishes `Deleted`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the task does not exist or a failure was
    /// injected.
    pub async fn delete(&self, id: &TaskId) -> Result<TaskId, StoreError> {
        let mut inner = self.inner.write().await;
        take_injected(&mut inner)?;
        let index = inner
            .tasks
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let removed = inner.tasks.remove(index);
        drop(inner);
        tracing::info!(id = %removed.id, "task deleted");
        self.publish(SubscriptionEvent::Deleted(removed.id.clone()));
        Ok(removed.id)
    }

    /// Runs a query or mutation and returns the GraphQL `data` object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] from the underlying operation, or
    /// [`StoreError::NotExecutable`] for subscriptions.
    pub async fn execute(&self, op: &Operation) -> Result<Value, StoreError> {
        let outcome = match op {
            Operation::Tasks => return Ok(json!({ "tasks": self.list().await })),
            Operation::CreateTask { title } => MutationOutcome::Created(self.create(title).await?),
            Operation::UpdateTask { id, patch } => {
                MutationOutcome::Updated(self.update(id, patch).await?)
            }
            Operation::DeleteTask { id } => MutationOutcome::Deleted(self.delete(id).await?),
            Operation::TaskAdded | Operation::TaskUpdated | Operation::TaskDeleted => {
                return Err(StoreError::NotExecutable(op.name()));
            }
        };
        Ok(outcome.to_data())
    }

    fn validate_title(&self, title: &str) -> Result<String, StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::TitleEmpty);
        }
        if title.chars().count() > self.max_title_len {
            return Err(StoreError::TitleTooLong {
                max: self.max_title_len,
            });
        }
        Ok(title.to_string())
    }

    fn publish(&self, event: SubscriptionEvent) {
        // No receivers just means nobody is subscribed.
        let receivers = self.events.send(event).unwrap_or(0);
        tracing::debug!(receivers, "event published");
    }
}

fn take_injected(inner: &mut Inner) -> Result<(), StoreError> {
    if inner.fail_mutations > 0 {
        inner.fail_mutations -= 1;
        return Err(StoreError::Injected);
    }
    Ok(())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
