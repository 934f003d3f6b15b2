//! Typed subscription events.
//!
//! Pushed payloads are decoded once, strictly, into [`SubscriptionEvent`].
//! A payload that lacks the selected field or has the wrong shape is an
//! error and is never partially applied.

use serde_json::{Value, json};

use crate::codec::{CodecError, decode_field};
use crate::operation::Operation;
use crate::task::{Task, TaskId};

/// A server-pushed change to the task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// `taskAdded`: a full task.
    Added(Task),
    /// `taskUpdated`: a full task.
    Updated(Task),
    /// `taskDeleted`: only the id.
    Deleted(TaskId),
}

#[derive(serde::Deserialize)]
struct DeletedPayload {
    id: TaskId,
}

impl SubscriptionEvent {
    /// Decodes the `data` object delivered for subscription `op`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownOperation`] if `op` is not a
    /// subscription, or a decode error if the payload is malformed.
    pub fn decode(op: &Operation, data: &Value) -> Result<Self, CodecError> {
        match op {
            Operation::TaskAdded => Ok(Self::Added(decode_field(data, "taskAdded")?)),
            Operation::TaskUpdated => Ok(Self::Updated(decode_field(data, "taskUpdated")?)),
            Operation::TaskDeleted => {
                let payload: DeletedPayload = decode_field(data, "taskDeleted")?;
                Ok(Self::Deleted(payload.id))
            }
            other => Err(CodecError::UnknownOperation(format!(
                "{} is not a subscription",
                other.name()
            ))),
        }
    }

    /// The subscription this event is delivered on.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Added(_) => Operation::TaskAdded,
            Self::Updated(_) => Operation::TaskUpdated,
            Self::Deleted(_) => Operation::TaskDeleted,
        }
    }

    /// The id of the task the event is about.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Added(task) | Self::Updated(task) => &task.id,
            Self::Deleted(id) => id,
        }
    }

    /// Encodes the event as the `data` object the server pushes.
    #[must_use]
    pub fn to_data(&self) -> Value {
        match self {
            Self::Added(task) => json!({ "taskAdded": task }),
            Self::Updated(task) => json!({ "taskUpdated": task }),
            Self::Deleted(id) => json!({ "taskDeleted": { "id": id } }),
        }
    }
}
