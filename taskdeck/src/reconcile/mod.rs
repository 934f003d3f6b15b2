//! Reconciliation of optimistic writes, mutation results and pushed events.
//!
//! [`Reconciler`] owns the [`EntityCache`] and a ledger of mutations that
//! have been dispatched but not settled. Every input is applied to the
//! cache through the pure list rules in [`rules`], one at a time:
//!
//! | Input | Effect on the task list |
//! |---|---|
//! | create dispatched | optimistic `temp:<n>` entry prepended |
//! | create confirmed | temp entry takes the server id in place (or is dropped if the id is already listed) |
//! | task added | prepended unless already listed |
//! | update dispatched | changed fields overlaid immediately |
//! | update confirmed / task updated | server fields win; order untouched |
//! | delete dispatched | id removed, fields kept for rollback |
//! | delete confirmed / task deleted | id removed, fields evicted |
//!
//! A failed mutation restores the last server-confirmed state. Pending
//! update patches stay on top of newer server fields until their own
//! mutation settles.

pub mod rules;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use taskdeck_proto::event::SubscriptionEvent;
use taskdeck_proto::operation::{MutationOutcome, Operation};
use taskdeck_proto::task::{
    MAX_TASK_TITLE_LENGTH, Task, TaskId, TaskPatch, TitleViolation, validate_title,
};
use thiserror::Error;

use crate::cache::{EntityCache, TASK_LIST};

/// Errors rejected before anything is dispatched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Task title cannot be empty.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds the maximum length.
    #[error("task title too long (max {max} characters)")]
    TitleTooLong {
        /// Maximum allowed characters.
        max: usize,
    },
    /// No listed task has this id.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// The task has not been confirmed by the server yet.
    #[error("task {0} is still being saved")]
    NotYetSaved(TaskId),
    /// The patch changes nothing.
    #[error("nothing to update")]
    EmptyPatch,
}

/// Identifies a dispatched mutation until it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationId(u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// What a call to [`Reconciler::settle`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The server result was merged.
    Confirmed,
    /// The optimistic change was undone.
    RolledBack {
        /// `"create"`, `"update"` or `"delete"`.
        action: &'static str,
        /// Why the mutation failed.
        reason: String,
    },
    /// No pending mutation has this id (already settled).
    Unknown,
}

#[derive(Debug, Clone)]
enum Pending {
    Create {
        /// The optimistic entry, carrying the temporary id.
        task: Task,
    },
    Update {
        id: TaskId,
        patch: TaskPatch,
    },
    Delete {
        /// Fields at dispatch time (refreshed by later server updates).
        task: Task,
        /// Position at dispatch time.
        index: usize,
    },
}

impl Pending {
    const fn action(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Applies local intents, mutation results and pushed events to the cache.
#[derive(Debug)]
pub struct Reconciler {
    cache: EntityCache,
    pending: BTreeMap<MutationId, Pending>,
    /// Last server-confirmed fields of tasks with pending updates.
    confirmed: HashMap<TaskId, Task>,
    /// Ids the server reported deleted; never shown again. Pruned on
    /// [`Reconciler::load`] while no create is in flight.
    deleted: HashSet<TaskId>,
    /// Ids listed by events or create results since the last load. A query
    /// answered before they existed must not drop them.
    added_since_load: HashSet<TaskId>,
    next_mutation: u64,
    next_temp: u64,
    max_title_len: usize,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(MAX_TASK_TITLE_LENGTH)
    }
}

impl Reconciler {
    /// Creates an empty reconciler accepting titles up to `max_title_len`
    /// characters (capped at [`MAX_TASK_TITLE_LENGTH`]).
    #[must_use]
    pub fn new(max_title_len: usize) -> Self {
        Self {
            cache: EntityCache::new(),
            pending: BTreeMap::new(),
            confirmed: HashMap::new(),
            deleted: HashSet::new(),
            added_since_load: HashSet::new(),
            next_mutation: 0,
            next_temp: 0,
            max_title_len: max_title_len.min(MAX_TASK_TITLE_LENGTH),
        }
    }

    /// The visible task list, newest first.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.cache.resolve_list(TASK_LIST)
    }

    /// Read access to the cache.
    #[must_use]
    pub const fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Number of mutations awaiting a result.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is in the visible list.
    #[must_use]
    pub fn is_listed(&self, id: &TaskId) -> bool {
        self.cache.read_list(TASK_LIST).contains(id)
    }

    /// Prepends an optimistic task and returns the mutation to send.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TitleEmpty`] or [`TaskError::TitleTooLong`].
    pub fn begin_create(&mut self, title: &str) -> Result<(MutationId, Operation), TaskError> {
        let title = title.trim();
        self.check_title(title)?;

        self.next_temp += 1;
        let task = Task::new(TaskId::temporary(self.next_temp), title, false);
        self.show_optimistic(&task);

        let op = Operation::CreateTask {
            title: title.to_string(),
        };
        let mutation = self.record(Pending::Create { task });
        Ok((mutation, op))
    }

    /// Overlays `patch` on a listed task and returns the mutation to send.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the patch is empty or invalid, or the task
    /// is unknown or not yet saved.
    pub fn begin_update(
        &mut self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<(MutationId, Operation), TaskError> {
        let mut patch = patch;
        if let Some(title) = patch.title.take() {
            let title = title.trim().to_string();
            self.check_title(&title)?;
            patch.title = Some(title);
        }
        if patch.is_empty() {
            return Err(TaskError::EmptyPatch);
        }
        let current = self.listed_task(id)?.clone();

        self.confirmed
            .entry(id.clone())
            .or_insert_with(|| current.clone());
        self.cache.write_entity(patch.apply_to(&current));

        let op = Operation::UpdateTask {
            id: id.clone(),
            patch: patch.clone(),
        };
        let mutation = self.record(Pending::Update {
            id: id.clone(),
            patch,
        });
        Ok((mutation, op))
    }

    /// Hides a listed task and returns the mutation to send.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the task is unknown or not yet saved.
    pub fn begin_delete(&mut self, id: &TaskId) -> Result<(MutationId, Operation), TaskError> {
        let task = self.listed_task(id)?.clone();
        let index = self
            .cache
            .read_list(TASK_LIST)
            .iter()
            .position(|x| x == id)
            .unwrap_or(0);
        self.cache.merge(TASK_LIST, |list, _| rules::remove_id(list, id));

        let op = Operation::DeleteTask { id: id.clone() };
        let mutation = self.record(Pending::Delete { task, index });
        Ok((mutation, op))
    }

    /// Merges the result of a dispatched mutation, or rolls it back.
    pub fn settle(
        &mut self,
        mutation: MutationId,
        result: Result<MutationOutcome, String>,
    ) -> Settlement {
        let Some(pending) = self.pending.remove(&mutation) else {
            tracing::debug!(%mutation, "settle for unknown mutation ignored");
            return Settlement::Unknown;
        };

        match (pending, result) {
            (Pending::Create { task }, Ok(MutationOutcome::Created(created))) => {
                self.confirm_create(&task.id, created);
                Settlement::Confirmed
            }
            (Pending::Update { id, .. }, Ok(MutationOutcome::Updated(updated))) => {
                if updated.id != id {
                    tracing::warn!(%mutation, sent = %id, got = %updated.id, "update result for another task");
                }
                self.apply_server_task(updated);
                self.release_confirmed(&id);
                Settlement::Confirmed
            }
            (Pending::Delete { task, .. }, Ok(MutationOutcome::Deleted(id))) => {
                if id != task.id {
                    tracing::warn!(%mutation, sent = %task.id, got = %id, "delete result for another task");
                }
                self.apply_deleted(&task.id);
                Settlement::Confirmed
            }
            (pending, Ok(outcome)) => {
                tracing::warn!(%mutation, ?outcome, "mutation result does not match request");
                let action = pending.action();
                self.roll_back(pending);
                Settlement::RolledBack {
                    action,
                    reason: "unexpected server response".to_string(),
                }
            }
            (pending, Err(reason)) => {
                let action = pending.action();
                tracing::warn!(%mutation, action, %reason, "mutation failed, rolling back");
                self.roll_back(pending);
                Settlement::RolledBack { action, reason }
            }
        }
    }

    /// Merges one pushed event.
    pub fn apply_event(&mut self, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::Added(task) => {
                if self.deleted.contains(&task.id) || self.is_listed(&task.id) {
                    tracing::trace!(id = %task.id, "taskAdded already applied");
                    return;
                }
                if self.delete_pending(&task.id) {
                    // Hidden by a local delete; rollback restores it if needed.
                    return;
                }
                let id = task.id.clone();
                self.cache.write_entity(task);
                self.cache
                    .merge(TASK_LIST, |list, _| rules::prepend_unique(list, &id));
                self.added_since_load.insert(id);
            }
            SubscriptionEvent::Updated(task) => self.apply_server_task(task),
            SubscriptionEvent::Deleted(id) => self.apply_deleted(&id),
        }
    }

    /// Replaces the list with a query result, then re-applies pending
    /// creates, deletes and update patches on top of it.
    ///
    /// Tasks added live since the previous load are kept at the front when
    /// the result does not list them yet.
    pub fn load(&mut self, tasks: Vec<Task>) {
        let creating = self
            .pending
            .values()
            .any(|p| matches!(p, Pending::Create { .. }));
        if !creating {
            // Events for other ids were delivered before their deletion.
            let returned: HashSet<&TaskId> = tasks.iter().map(|t| &t.id).collect();
            self.deleted.retain(|id| returned.contains(id));
        }

        let incoming: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
        let kept: Vec<Task> = self
            .cache
            .read_list(TASK_LIST)
            .iter()
            .filter(|id| self.added_since_load.contains(*id) && !incoming.contains(*id))
            // Server fields, not the optimistic overlay.
            .filter_map(|id| self.confirmed.get(id).or_else(|| self.cache.read_entity(id)))
            .cloned()
            .collect();
        self.added_since_load.clear();

        let tasks: Vec<Task> = kept
            .into_iter()
            .chain(tasks)
            .filter(|t| !self.deleted.contains(&t.id))
            .collect();
        for task in &tasks {
            if let Some(confirmed) = self.confirmed.get_mut(&task.id) {
                confirmed.clone_from(task);
            }
        }
        self.cache.replace_list(TASK_LIST, tasks);

        let pending: Vec<Pending> = self.pending.values().cloned().collect();
        for entry in pending {
            match entry {
                Pending::Create { task } => self.show_optimistic(&task),
                Pending::Delete { task, .. } => {
                    self.cache
                        .merge(TASK_LIST, |list, _| rules::remove_id(list, &task.id));
                }
                Pending::Update { .. } => {}
            }
        }
        let updated: Vec<TaskId> = self.confirmed.keys().cloned().collect();
        for id in updated {
            self.refresh_overlay(&id);
        }
        self.cache.reclaim();
    }

    fn check_title(&self, title: &str) -> Result<(), TaskError> {
        validate_title(title, self.max_title_len).map_err(|v| match v {
            TitleViolation::Empty => TaskError::TitleEmpty,
            TitleViolation::TooLong => TaskError::TitleTooLong {
                max: self.max_title_len,
            },
        })
    }

    fn listed_task(&self, id: &TaskId) -> Result<&Task, TaskError> {
        if id.is_temporary() {
            return Err(TaskError::NotYetSaved(id.clone()));
        }
        if !self.is_listed(id) {
            return Err(TaskError::TaskNotFound(id.clone()));
        }
        self.cache
            .read_entity(id)
            .ok_or_else(|| TaskError::TaskNotFound(id.clone()))
    }

    fn record(&mut self, pending: Pending) -> MutationId {
        self.next_mutation += 1;
        let mutation = MutationId(self.next_mutation);
        tracing::debug!(%mutation, action = pending.action(), "optimistic write");
        self.pending.insert(mutation, pending);
        mutation
    }

    fn show_optimistic(&mut self, task: &Task) {
        self.cache.write_entity(task.clone());
        self.cache
            .merge(TASK_LIST, |list, _| rules::prepend_unique(list, &task.id));
    }

    fn confirm_create(&mut self, temp: &TaskId, created: Task) {
        let real = created.id.clone();
        if self.deleted.contains(&real) || self.delete_pending(&real) {
            // Deleted before our response arrived, here or elsewhere. A
            // failed local delete restores it from its own snapshot.
            self.cache.merge(TASK_LIST, |list, _| rules::remove_id(list, temp));
        } else {
            self.added_since_load.insert(real.clone());
            self.cache.write_entity(created);
            self.cache.merge(TASK_LIST, |list, _| {
                if list.contains(&real) {
                    rules::remove_id(list, temp)
                } else if list.contains(temp) {
                    rules::swap_identity(list, temp, &real)
                } else {
                    rules::prepend_unique(list, &real)
                }
            });
        }
        self.cache.evict(temp);
        self.cache.reclaim();
    }

    /// Server fields win; pending patches for the task are re-applied on top.
    fn apply_server_task(&mut self, task: Task) {
        if self.deleted.contains(&task.id) {
            return;
        }
        for pending in self.pending.values_mut() {
            if let Pending::Delete { task: snapshot, .. } = pending
                && snapshot.id == task.id
            {
                snapshot.clone_from(&task);
            }
        }
        let id = task.id.clone();
        if let Some(confirmed) = self.confirmed.get_mut(&id) {
            *confirmed = task;
            self.refresh_overlay(&id);
        } else {
            self.cache.write_entity(task);
        }
    }

    fn apply_deleted(&mut self, id: &TaskId) {
        self.deleted.insert(id.clone());
        self.confirmed.remove(id);
        self.cache.merge(TASK_LIST, |list, _| rules::remove_id(list, id));
        self.cache.evict(id);
        self.cache.reclaim();
    }

    fn roll_back(&mut self, pending: Pending) {
        match pending {
            Pending::Create { task } => {
                self.cache
                    .merge(TASK_LIST, |list, _| rules::remove_id(list, &task.id));
                self.cache.evict(&task.id);
            }
            Pending::Update { id, .. } => {
                if self.refresh_overlay(&id) {
                    self.release_confirmed(&id);
                }
            }
            Pending::Delete { task, index } => {
                if self.deleted.contains(&task.id) {
                    return;
                }
                let id = task.id.clone();
                if self.confirmed.contains_key(&id) {
                    self.refresh_overlay(&id);
                } else {
                    self.cache.write_entity(task);
                }
                self.cache
                    .merge(TASK_LIST, |list, _| rules::insert_at(list, index, &id));
            }
        }
    }

    /// Rewrites `id` as its confirmed fields plus every pending patch, in
    /// dispatch order. Returns `false` if there is no confirmed state.
    fn refresh_overlay(&mut self, id: &TaskId) -> bool {
        let Some(confirmed) = self.confirmed.get(id) else {
            return false;
        };
        let visible = self
            .pending
            .values()
            .filter_map(|p| match p {
                Pending::Update { id: target, patch } if target == id => Some(patch),
                _ => None,
            })
            .fold(confirmed.clone(), |task, patch| patch.apply_to(&task));
        self.cache.write_entity(visible);
        true
    }

    fn delete_pending(&self, id: &TaskId) -> bool {
        self.pending
            .values()
            .any(|p| matches!(p, Pending::Delete { task, .. } if &task.id == id))
    }

    /// Forgets the confirmed state once no update for `id` is pending.
    fn release_confirmed(&mut self, id: &TaskId) {
        let still_pending = self
            .pending
            .values()
            .any(|p| matches!(p, Pending::Update { id: target, .. } if target == id));
        if !still_pending {
            self.confirmed.remove(id);
        }
    }
}
