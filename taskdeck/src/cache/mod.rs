//! Normalized entity cache.
//!
//! Tasks are stored once, keyed by id, and named lists hold ordered ids
//! referencing them. Lists are only changed through [`EntityCache::merge`],
//! which hands a pure function the latest list and stores what it returns,
//! so no caller ever edits a list it read earlier.

use std::collections::{HashMap, HashSet};

use taskdeck_proto::task::{Task, TaskId};

/// Name of the list the task view renders.
pub const TASK_LIST: &str = "tasks";

/// Read-only view of the stored entities, handed to [`EntityCache::merge`].
#[derive(Debug, Clone, Copy)]
pub struct Entities<'a>(&'a HashMap<TaskId, Task>);

impl<'a> Entities<'a> {
    /// The fields of `id`, if stored.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&'a Task> {
        self.0.get(id)
    }

    /// Whether `id` has stored fields.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.0.contains_key(id)
    }
}

/// Task records plus named, ordered id lists.
#[derive(Debug, Default, Clone)]
pub struct EntityCache {
    entities: HashMap<TaskId, Task>,
    lists: HashMap<String, Vec<TaskId>>,
}

impl EntityCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The ids in list `name`, empty if the list was never written.
    #[must_use]
    pub fn read_list(&self, name: &str) -> &[TaskId] {
        self.lists.get(name).map_or(&[], Vec::as_slice)
    }

    /// The tasks in list `name`, in order. Ids without fields are skipped.
    #[must_use]
    pub fn resolve_list(&self, name: &str) -> Vec<Task> {
        self.read_list(name)
            .iter()
            .filter_map(|id| self.entities.get(id))
            .cloned()
            .collect()
    }

    /// Replaces list `name` with `f(latest list, entities)`.
    pub fn merge<F>(&mut self, name: &str, f: F)
    where
        F: FnOnce(&[TaskId], Entities<'_>) -> Vec<TaskId>,
    {
        let current = self.lists.get(name).map_or(&[][..], Vec::as_slice);
        let next = f(current, Entities(&self.entities));
        self.lists.insert(name.to_string(), next);
    }

    /// Stores a query result: `tasks` becomes list `name` as-is.
    pub fn replace_list(&mut self, name: &str, tasks: Vec<Task>) {
        let ids = tasks.iter().map(|t| t.id.clone()).collect();
        for task in tasks {
            self.write_entity(task);
        }
        self.lists.insert(name.to_string(), ids);
    }

    /// Upserts a task's fields. List membership is unaffected.
    pub fn write_entity(&mut self, task: Task) {
        self.entities.insert(task.id.clone(), task);
    }

    /// The cached fields of `id`.
    #[must_use]
    pub fn read_entity(&self, id: &TaskId) -> Option<&Task> {
        self.entities.get(id)
    }

    /// Removes the fields of `id`. Returns whether anything was removed.
    pub fn evict(&mut self, id: &TaskId) -> bool {
        self.entities.remove(id).is_some()
    }

    /// Drops every entity no list references. Returns how many were dropped.
    pub fn reclaim(&mut self) -> usize {
        let referenced: HashSet<&TaskId> = self.lists.values().flatten().collect();
        let before = self.entities.len();
        let unreferenced: Vec<TaskId> = self
            .entities
            .keys()
            .filter(|id| !referenced.contains(id))
            .cloned()
            .collect();
        for id in &unreferenced {
            self.entities.remove(id);
        }
        let dropped = before - self.entities.len();
        if dropped > 0 {
            tracing::trace!(dropped, "reclaimed unreferenced entities");
        }
        dropped
    }

    /// Number of stored entities, listed or not.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[TaskId]) -> Vec<&str> {
        list.iter().map(TaskId::as_str).collect()
    }

    #[test]
    fn unknown_list_is_empty() {
        let cache = EntityCache::new();
        assert!(cache.read_list(TASK_LIST).is_empty());
        assert!(cache.resolve_list(TASK_LIST).is_empty());
    }

    #[test]
    fn replace_list_writes_entities_in_order() {
        let mut cache = EntityCache::new();
        cache.replace_list(
            TASK_LIST,
            vec![Task::new("2", "b", false), Task::new("1", "a", true)],
        );
        assert_eq!(ids(cache.read_list(TASK_LIST)), ["2", "1"]);
        assert_eq!(cache.read_entity(&TaskId::new("1")).unwrap().title, "a");

        // Incoming replaces existing; it is not merged.
        cache.replace_list(TASK_LIST, vec![Task::new("3", "c", false)]);
        assert_eq!(ids(cache.read_list(TASK_LIST)), ["3"]);
    }

    #[test]
    fn merge_sees_latest_list_and_entities() {
        let mut cache = EntityCache::new();
        cache.replace_list(TASK_LIST, vec![Task::new("1", "a", false)]);
        cache.write_entity(Task::new("2", "b", false));
        cache.merge(TASK_LIST, |list, entities| {
            assert_eq!(entities.get(&TaskId::new("2")).unwrap().title, "b");
            let mut next = vec![TaskId::new("2")];
            next.extend_from_slice(list);
            next
        });
        assert_eq!(ids(cache.read_list(TASK_LIST)), ["2", "1"]);
    }

    #[test]
    fn write_entity_does_not_touch_membership() {
        let mut cache = EntityCache::new();
        cache.write_entity(Task::new("9", "x", false));
        assert!(cache.read_list(TASK_LIST).is_empty());
        assert_eq!(cache.entity_count(), 1);
    }

    #[test]
    fn resolve_skips_dangling_ids() {
        let mut cache = EntityCache::new();
        cache.replace_list(
            TASK_LIST,
            vec![Task::new("1", "a", false), Task::new("2", "b", false)],
        );
        assert!(cache.evict(&TaskId::new("1")));
        assert!(!cache.evict(&TaskId::new("1")));
        let titles: Vec<_> = cache
            .resolve_list(TASK_LIST)
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, ["b"]);
    }

    #[test]
    fn reclaim_drops_only_unreferenced() {
        let mut cache = EntityCache::new();
        cache.replace_list(TASK_LIST, vec![Task::new("1", "a", false)]);
        cache.write_entity(Task::new("orphan", "o", false));
        assert_eq!(cache.reclaim(), 1);
        assert_eq!(cache.reclaim(), 0);
        assert!(cache.read_entity(&TaskId::new("1")).is_some());
        assert!(cache.read_entity(&TaskId::new("orphan")).is_none());
    }
}
