//! Pure list rules.
//!
//! Each rule takes the latest id list and returns a new one. Rules are
//! idempotent by id: applying one twice gives the same list as applying it
//! once, and no rule ever produces a duplicate id.

use taskdeck_proto::task::TaskId;

/// Puts `id` at the front unless it is already listed.
#[must_use]
pub fn prepend_unique(list: &[TaskId], id: &TaskId) -> Vec<TaskId> {
    if list.contains(id) {
        return list.to_vec();
    }
    let mut next = Vec::with_capacity(list.len() + 1);
    next.push(id.clone());
    next.extend_from_slice(list);
    next
}

/// Drops every occurrence of `id`, keeping the order of the rest.
#[must_use]
pub fn remove_id(list: &[TaskId], id: &TaskId) -> Vec<TaskId> {
    list.iter().filter(|x| *x != id).cloned().collect()
}

/// Replaces `from` with `to` in place.
///
/// If `to` is already listed, `from` is simply dropped. If `from` is not
/// listed the list is returned unchanged.
#[must_use]
pub fn swap_identity(list: &[TaskId], from: &TaskId, to: &TaskId) -> Vec<TaskId> {
    if list.contains(to) {
        return remove_id(list, from);
    }
    list.iter()
        .map(|x| if x == from { to.clone() } else { x.clone() })
        .collect()
}

/// Inserts `id` at `index` (clamped to the list length) unless listed.
#[must_use]
pub fn insert_at(list: &[TaskId], index: usize, id: &TaskId) -> Vec<TaskId> {
    if list.contains(id) {
        return list.to_vec();
    }
    let mut next = list.to_vec();
    next.insert(index.min(next.len()), id.clone());
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[&str]) -> Vec<TaskId> {
        ids.iter().copied().map(TaskId::new).collect()
    }

    fn id(s: &str) -> TaskId {
        TaskId::new(s)
    }

    #[test]
    fn prepend_puts_new_id_first() {
        assert_eq!(prepend_unique(&list(&["1", "2"]), &id("3")), list(&["3", "1", "2"]));
    }

    #[test]
    fn prepend_is_idempotent() {
        let once = prepend_unique(&list(&["1"]), &id("2"));
        let twice = prepend_unique(&once, &id("2"));
        assert_eq!(once, twice);
        // An id already present keeps its position.
        assert_eq!(prepend_unique(&list(&["1", "2"]), &id("2")), list(&["1", "2"]));
    }

    #[test]
    fn remove_keeps_relative_order() {
        assert_eq!(remove_id(&list(&["1", "2", "3"]), &id("2")), list(&["1", "3"]));
        assert_eq!(remove_id(&list(&["1", "3"]), &id("2")), list(&["1", "3"]));
    }

    #[test]
    fn swap_replaces_in_place() {
        assert_eq!(
            swap_identity(&list(&["9", "temp:1", "8"]), &id("temp:1"), &id("42")),
            list(&["9", "42", "8"])
        );
    }

    #[test]
    fn swap_drops_temp_when_target_listed() {
        assert_eq!(
            swap_identity(&list(&["42", "temp:1", "8"]), &id("temp:1"), &id("42")),
            list(&["42", "8"])
        );
    }

    #[test]
    fn swap_without_source_is_noop() {
        assert_eq!(
            swap_identity(&list(&["8"]), &id("temp:1"), &id("42")),
            list(&["8"])
        );
    }

    #[test]
    fn insert_clamps_and_dedups() {
        assert_eq!(insert_at(&list(&["1", "3"]), 1, &id("2")), list(&["1", "2", "3"]));
        assert_eq!(insert_at(&list(&["1"]), 10, &id("2")), list(&["1", "2"]));
        assert_eq!(insert_at(&list(&["1", "2"]), 0, &id("2")), list(&["1", "2"]));
    }
}
