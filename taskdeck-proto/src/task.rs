//! Task model shared by the client and the dev server.
//!
//! A [`Task`] is the only domain entity. Its [`TaskId`] is assigned by the
//! server; the client mints temporary ids (`temp:<n>`) for optimistic
//! entries that exist only until the server confirms the mutation.

use serde::{Deserialize, Serialize};

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Prefix marking a client-generated, not yet confirmed task id.
pub const TEMP_ID_PREFIX: &str = "temp:";

/// Opaque task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps a server-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the temporary id for the `n`-th optimistic entry of a session.
    #[must_use]
    pub fn temporary(n: u64) -> Self {
        Self(format!("{TEMP_ID_PREFIX}{n}"))
    }

    /// Whether this id was minted locally for an optimistic entry.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Returns the string form of the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A task as returned by the API.
///
/// `created_at`, `updated_at` and `user_id` are optional on the wire and are
/// carried through untouched by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Server-assigned (or temporary) identifier.
    pub id: TaskId,
    /// Non-empty title.
    pub title: String,
    /// Completion flag.
    pub completed: bool,
    /// Creation time, milliseconds since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last update time, milliseconds since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    /// Owner of the task, if the server exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Task {
    /// Creates a task with only the fields the reconciliation rules look at.
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>, completed: bool) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            completed,
            created_at: None,
            updated_at: None,
            user_id: None,
        }
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A partial update of a task, as sent by `updateTask`.
///
/// Unset fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title, if changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New completion flag, if changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskPatch {
    /// A patch that only sets the completion flag.
    #[must_use]
    pub const fn completed(completed: bool) -> Self {
        Self {
            title: None,
            completed: Some(completed),
        }
    }

    /// A patch that only sets the title.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            completed: None,
        }
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none() && self.completed.is_none()
    }

    /// Returns a copy of `task` with the set fields overlaid.
    #[must_use]
    pub fn apply_to(&self, task: &Task) -> Task {
        let mut next = task.clone();
        if let Some(title) = &self.title {
            next.title.clone_from(title);
        }
        if let Some(completed) = self.completed {
            next.completed = completed;
        }
        next
    }
}

/// Why a title was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleViolation {
    /// Empty or whitespace only.
    Empty,
    /// Longer than the allowed maximum.
    TooLong,
}

/// Checks a task title against a maximum length in characters.
///
/// # Errors
///
/// Returns the [`TitleViolation`] that applies.
pub fn validate_title(title: &str, max_len: usize) -> Result<(), TitleViolation> {
    if title.trim().is_empty() {
        return Err(TitleViolation::Empty);
    }
    if title.chars().count() > max_len {
        return Err(TitleViolation::TooLong);
    }
    Ok(())
}
