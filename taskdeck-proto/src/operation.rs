//! GraphQL operations understood by the task API.
//!
//! Each [`Operation`] knows its document, operation name, variables and the
//! root field its result lives under. Requests and responses use the
//! standard GraphQL-over-HTTP JSON envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::codec::{CodecError, decode_field};
use crate::task::{Task, TaskId, TaskPatch};

const TASKS_DOCUMENT: &str = "query Tasks {
  tasks {
    id
    title
    completed
  }
}";

const CREATE_TASK_DOCUMENT: &str = "mutation CreateTask($t: String!) {
  createTask(input: { title: $t }) {
    id
    title
    completed
  }
}";

const UPDATE_TASK_DOCUMENT: &str =
    "mutation UpdateTask($id: ID!, $title: String, $completed: Boolean) {
  updateTask(input: { id: $id, title: $title, completed: $completed }) {
    id
    title
    completed
  }
}";

const DELETE_TASK_DOCUMENT: &str = "mutation DeleteTask($id: ID!) {
  deleteTask(id: $id) {
    id
  }
}";

const TASK_ADDED_DOCUMENT: &str = "subscription TaskAdded {
  taskAdded {
    id
    title
    completed
  }
}";

const TASK_UPDATED_DOCUMENT: &str = "subscription TaskUpdated {
  taskUpdated {
    id
    title
    completed
  }
}";

const TASK_DELETED_DOCUMENT: &str = "subscription TaskDeleted {
  taskDeleted {
    id
  }
}";

/// The kind of a GraphQL operation, which decides the channel it travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Read-only request/response.
    Query,
    /// Write request/response.
    Mutation,
    /// Long-lived stream of pushed events.
    Subscription,
}

impl OperationKind {
    /// Classifies a GraphQL document by its first operation definition.
    ///
    /// Leading whitespace, commas and `#` comments are skipped. A document
    /// starting with `{` is the query shorthand. Returns `None` when the
    /// first token is not an operation keyword.
    #[must_use]
    pub fn from_document(document: &str) -> Option<Self> {
        let mut rest = document;
        loop {
            rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
            if let Some(comment) = rest.strip_prefix('#') {
                rest = comment.split_once('\n').map_or("", |(_, tail)| tail);
            } else {
                break;
            }
        }
        if rest.starts_with('{') {
            return Some(Self::Query);
        }
        let keyword: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        match keyword.as_str() {
            "query" => Some(Self::Query),
            "mutation" => Some(Self::Mutation),
            "subscription" => Some(Self::Subscription),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// A task API operation with its variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `query Tasks`: the full task list.
    Tasks,
    /// `mutation CreateTask`.
    CreateTask {
        /// Title of the new task.
        title: String,
    },
    /// `mutation UpdateTask`: partial update.
    UpdateTask {
        /// Task to update.
        id: TaskId,
        /// Fields to change.
        patch: TaskPatch,
    },
    /// `mutation DeleteTask`.
    DeleteTask {
        /// Task to delete.
        id: TaskId,
    },
    /// `subscription TaskAdded`.
    TaskAdded,
    /// `subscription TaskUpdated`.
    TaskUpdated,
    /// `subscription TaskDeleted`.
    TaskDeleted,
}

impl Operation {
    /// The operation kind.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Tasks => OperationKind::Query,
            Self::CreateTask { .. } | Self::UpdateTask { .. } | Self::DeleteTask { .. } => {
                OperationKind::Mutation
            }
            Self::TaskAdded | Self::TaskUpdated | Self::TaskDeleted => OperationKind::Subscription,
        }
    }

    /// The GraphQL `operationName`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Tasks => "Tasks",
            Self::CreateTask { .. } => "CreateTask",
            Self::UpdateTask { .. } => "UpdateTask",
            Self::DeleteTask { .. } => "DeleteTask",
            Self::TaskAdded => "TaskAdded",
            Self::TaskUpdated => "TaskUpdated",
            Self::TaskDeleted => "TaskDeleted",
        }
    }

    /// The root field holding this operation's result.
    #[must_use]
    pub const fn root_field(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::CreateTask { .. } => "createTask",
            Self::UpdateTask { .. } => "updateTask",
            Self::DeleteTask { .. } => "deleteTask",
            Self::TaskAdded => "taskAdded",
            Self::TaskUpdated => "taskUpdated",
            Self::TaskDeleted => "taskDeleted",
        }
    }

    /// The GraphQL document text.
    #[must_use]
    pub const fn document(&self) -> &'static str {
        match self {
            Self::Tasks => TASKS_DOCUMENT,
            Self::CreateTask { .. } => CREATE_TASK_DOCUMENT,
            Self::UpdateTask { .. } => UPDATE_TASK_DOCUMENT,
            Self::DeleteTask { .. } => DELETE_TASK_DOCUMENT,
            Self::TaskAdded => TASK_ADDED_DOCUMENT,
            Self::TaskUpdated => TASK_UPDATED_DOCUMENT,
            Self::TaskDeleted => TASK_DELETED_DOCUMENT,
        }
    }

    /// The variables object. Unset patch fields are omitted.
    #[must_use]
    pub fn variables(&self) -> Value {
        match self {
            Self::CreateTask { title } => json!({ "t": title }),
            Self::UpdateTask { id, patch } => {
                let mut vars = Map::new();
                vars.insert("id".to_string(), Value::String(id.as_str().to_string()));
                if let Some(title) = &patch.title {
                    vars.insert("title".to_string(), Value::String(title.clone()));
                }
                if let Some(completed) = patch.completed {
                    vars.insert("completed".to_string(), Value::Bool(completed));
                }
                Value::Object(vars)
            }
            Self::DeleteTask { id } => json!({ "id": id }),
            Self::Tasks | Self::TaskAdded | Self::TaskUpdated | Self::TaskDeleted => {
                Value::Object(Map::new())
            }
        }
    }

    /// Builds the request envelope for this operation.
    #[must_use]
    pub fn to_request(&self) -> GraphQlRequest {
        GraphQlRequest {
            query: self.document().to_string(),
            operation_name: Some(self.name().to_string()),
            variables: self.variables(),
        }
    }

    /// Reconstructs an operation from its name and variables.
    ///
    /// This is the server-side inverse of [`Operation::to_request`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownOperation`] for unknown names and
    /// [`CodecError::InvalidVariables`] when required variables are missing
    /// or mistyped.
    pub fn parse(name: &str, variables: &Value) -> Result<Self, CodecError> {
        match name {
            "Tasks" => Ok(Self::Tasks),
            "CreateTask" => Ok(Self::CreateTask {
                title: string_var(variables, "t")?,
            }),
            "UpdateTask" => {
                let title = match variables.get("title") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => {
                        return Err(CodecError::InvalidVariables(format!(
                            "title must be a string, got {other}"
                        )));
                    }
                };
                let completed = match variables.get("completed") {
                    None | Some(Value::Null) => None,
                    Some(Value::Bool(b)) => Some(*b),
                    Some(other) => {
                        return Err(CodecError::InvalidVariables(format!(
                            "completed must be a boolean, got {other}"
                        )));
                    }
                };
                Ok(Self::UpdateTask {
                    id: TaskId::new(string_var(variables, "id")?),
                    patch: TaskPatch { title, completed },
                })
            }
            "DeleteTask" => Ok(Self::DeleteTask {
                id: TaskId::new(string_var(variables, "id")?),
            }),
            "TaskAdded" => Ok(Self::TaskAdded),
            "TaskUpdated" => Ok(Self::TaskUpdated),
            "TaskDeleted" => Ok(Self::TaskDeleted),
            other => Err(CodecError::UnknownOperation(other.to_string())),
        }
    }
}

fn string_var(variables: &Value, name: &str) -> Result<String, CodecError> {
    variables
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CodecError::InvalidVariables(format!("`{name}` must be a string")))
}

/// GraphQL request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    /// Document text.
    pub query: String,
    /// Name of the operation to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Variables object.
    #[serde(default)]
    pub variables: Value,
}

impl GraphQlRequest {
    /// Classifies this request by its document.
    #[must_use]
    pub fn kind(&self) -> Option<OperationKind> {
        OperationKind::from_document(&self.query)
    }

    /// The operation name, or `"anonymous"`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.operation_name.as_deref().unwrap_or("anonymous")
    }
}

/// A single GraphQL error entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    /// Human readable message.
    pub message: String,
    /// Response path the error applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    /// Server-specific extensions (e.g. `code`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQlError {
    /// Creates an error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Creates an error carrying an `extensions.code`.
    pub fn with_code(message: impl Into<String>, code: &str) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: Some(json!({ "code": code })),
        }
    }

    /// The `extensions.code` value, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }
}

/// GraphQL response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    /// Result data, absent on request-level errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Errors, empty on success.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

impl GraphQlResponse {
    /// A successful response.
    #[must_use]
    pub const fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// A response carrying a single error and no data.
    #[must_use]
    pub fn error(error: GraphQlError) -> Self {
        Self {
            data: None,
            errors: vec![error],
        }
    }
}

/// Decodes the result of the `Tasks` query.
///
/// # Errors
///
/// Returns a [`CodecError`] if `tasks` is missing or malformed.
pub fn decode_tasks(data: &Value) -> Result<Vec<Task>, CodecError> {
    decode_field(data, "tasks")
}

/// The typed result of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// `createTask` returned the stored task.
    Created(Task),
    /// `updateTask` returned the stored task.
    Updated(Task),
    /// `deleteTask` returned the id of the removed task.
    Deleted(TaskId),
}

#[derive(Deserialize)]
struct IdOnly {
    id: TaskId,
}

impl MutationOutcome {
    /// Decodes the `data` object returned for `op`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownOperation`] if `op` is not a mutation,
    /// or a decode error if the payload is malformed.
    pub fn decode(op: &Operation, data: &Value) -> Result<Self, CodecError> {
        match op {
            Operation::CreateTask { .. } => Ok(Self::Created(decode_field(data, "createTask")?)),
            Operation::UpdateTask { .. } => Ok(Self::Updated(decode_field(data, "updateTask")?)),
            Operation::DeleteTask { .. } => {
                let removed: IdOnly = decode_field(data, "deleteTask")?;
                Ok(Self::Deleted(removed.id))
            }
            other => Err(CodecError::UnknownOperation(format!(
                "{} is not a mutation",
                other.name()
            ))),
        }
    }

    /// Encodes the outcome as the `data` object the server returns.
    #[must_use]
    pub fn to_data(&self) -> Value {
        match self {
            Self::Created(task) => json!({ "createTask": task }),
            Self::Updated(task) => json!({ "updateTask": task }),
            Self::Deleted(id) => json!({ "deleteTask": { "id": id } }),
        }
    }
}
