//! Reconciliation properties of the task list.
//!
//! Each property is checked on a concrete scenario; idempotent add,
//! idempotent delete and convergence are additionally checked with
//! `proptest` over random event sequences.

use proptest::prelude::*;

use taskdeck::reconcile::{Reconciler, Settlement};
use taskdeck_proto::event::SubscriptionEvent;
use taskdeck_proto::operation::{MutationOutcome, Operation};
use taskdeck_proto::task::{Task, TaskId, TaskPatch};

fn ids(r: &Reconciler) -> Vec<String> {
    r.tasks().into_iter().map(|t| t.id.to_string()).collect()
}

fn loaded(tasks: Vec<Task>) -> Reconciler {
    let mut r = Reconciler::default();
    r.load(tasks);
    r
}

// =============================================================================
// 1. Idempotent add
// =============================================================================

#[test]
fn task_added_twice_equals_once() {
    let mut once = loaded(vec![Task::new("1", "a", false)]);
    let mut twice = loaded(vec![Task::new("1", "a", false)]);
    let added = SubscriptionEvent::Added(Task::new("2", "b", false));

    once.apply_event(added.clone());
    twice.apply_event(added.clone());
    twice.apply_event(added);

    assert_eq!(once.tasks(), twice.tasks());
    assert_eq!(ids(&twice), ["2", "1"]);
}

// =============================================================================
// 2. Idempotent delete
// =============================================================================

#[test]
fn task_deleted_for_unlisted_id_is_noop() {
    let mut r = loaded(vec![Task::new("2", "b", false), Task::new("1", "a", true)]);
    let before = r.tasks();
    r.apply_event(SubscriptionEvent::Deleted(TaskId::new("9")));
    assert_eq!(r.tasks(), before);

    r.apply_event(SubscriptionEvent::Deleted(TaskId::new("1")));
    let after_first = r.tasks();
    r.apply_event(SubscriptionEvent::Deleted(TaskId::new("1")));
    assert_eq!(r.tasks(), after_first);
    assert_eq!(ids(&r), ["2"]);
}

// =============================================================================
// 3. Order invariant
// =============================================================================

#[test]
fn later_create_appears_first() {
    let mut r = Reconciler::default();
    let (a, _) = r.begin_create("A").unwrap();
    let (b, _) = r.begin_create("B").unwrap();
    r.settle(a, Ok(MutationOutcome::Created(Task::new("10", "A", false))));
    r.settle(b, Ok(MutationOutcome::Created(Task::new("11", "B", false))));
    assert_eq!(ids(&r), ["11", "10"]);
}

#[test]
fn confirmations_out_of_order_keep_creation_order() {
    let mut r = Reconciler::default();
    let (a, _) = r.begin_create("A").unwrap();
    let (b, _) = r.begin_create("B").unwrap();
    r.settle(b, Ok(MutationOutcome::Created(Task::new("11", "B", false))));
    r.settle(a, Ok(MutationOutcome::Created(Task::new("10", "A", false))));
    assert_eq!(ids(&r), ["11", "10"]);
}

// =============================================================================
// 4. Update does not reorder
// =============================================================================

#[test]
fn toggling_middle_task_keeps_position() {
    let mut r = loaded(vec![
        Task::new("3", "c", false),
        Task::new("2", "b", false),
        Task::new("1", "a", false),
    ]);
    let (m, _) = r
        .begin_update(&TaskId::new("2"), TaskPatch::completed(true))
        .unwrap();
    assert_eq!(ids(&r), ["3", "2", "1"]);
    assert!(r.tasks()[1].completed);

    r.settle(m, Ok(MutationOutcome::Updated(Task::new("2", "b", true))));
    r.apply_event(SubscriptionEvent::Updated(Task::new("2", "b", true)));
    assert_eq!(ids(&r), ["3", "2", "1"]);
    assert!(r.tasks()[1].completed);
}

// =============================================================================
// 5. Convergence under interleaving
// =============================================================================

#[test]
fn confirm_then_broadcast_leaves_one_entry() {
    let mut r = Reconciler::default();
    let (m, _) = r.begin_create("x").unwrap();
    r.settle(m, Ok(MutationOutcome::Created(Task::new("42", "x", false))));
    r.apply_event(SubscriptionEvent::Added(Task::new("42", "x", false)));
    assert_eq!(ids(&r), ["42"]);
}

#[test]
fn broadcast_then_confirm_leaves_one_entry() {
    let mut r = Reconciler::default();
    let (m, _) = r.begin_create("x").unwrap();
    r.apply_event(SubscriptionEvent::Added(Task::new("42", "x", false)));
    r.settle(m, Ok(MutationOutcome::Created(Task::new("42", "x", false))));
    assert_eq!(ids(&r), ["42"]);
}

// =============================================================================
// 6. Rollback of an optimistic delete
// =============================================================================

#[test]
fn failed_delete_restores_original_fields() {
    let original = Task::new("7", "keep me", true);
    let mut r = loaded(vec![
        Task::new("8", "newer", false),
        original.clone(),
        Task::new("6", "older", false),
    ]);
    let (m, op) = r.begin_delete(&TaskId::new("7")).unwrap();
    assert_eq!(op, Operation::DeleteTask { id: TaskId::new("7") });
    assert_eq!(ids(&r), ["8", "6"]);

    let settled = r.settle(m, Err("network down".to_string()));
    assert!(matches!(settled, Settlement::RolledBack { action: "delete", .. }));
    assert_eq!(ids(&r), ["8", "7", "6"]);
    assert_eq!(r.tasks()[1], original);
}

// =============================================================================
// 7. End-to-end scenario
// =============================================================================

#[test]
fn buy_milk_scenario() {
    let mut r = loaded(Vec::new());
    assert!(r.tasks().is_empty());

    let (create, _) = r.begin_create("Buy milk").unwrap();
    assert_eq!(r.tasks(), vec![Task::new("temp:1", "Buy milk", false)]);

    r.settle(
        create,
        Ok(MutationOutcome::Created(Task::new("42", "Buy milk", false))),
    );
    assert_eq!(r.tasks(), vec![Task::new("42", "Buy milk", false)]);

    let (toggle, _) = r
        .begin_update(&TaskId::new("42"), TaskPatch::completed(true))
        .unwrap();
    assert_eq!(r.tasks(), vec![Task::new("42", "Buy milk", true)]);
    r.settle(
        toggle,
        Ok(MutationOutcome::Updated(Task::new("42", "Buy milk", true))),
    );

    let (delete, _) = r.begin_delete(&TaskId::new("42")).unwrap();
    assert!(r.tasks().is_empty());
    r.settle(delete, Ok(MutationOutcome::Deleted(TaskId::new("42"))));
    assert!(r.tasks().is_empty());
    assert_eq!(r.cache().entity_count(), 0);
}

// =============================================================================
// Property tests
// =============================================================================

fn event_strategy() -> impl Strategy<Value = SubscriptionEvent> {
    (0u8..3, 1u32..6, any::<bool>()).prop_map(|(kind, id, completed)| {
        let task = Task::new(id.to_string().as_str(), format!("task {id}"), completed);
        match kind {
            0 => SubscriptionEvent::Added(task),
            1 => SubscriptionEvent::Updated(task),
            _ => SubscriptionEvent::Deleted(task.id),
        }
    })
}

fn has_duplicates(list: &[String]) -> bool {
    let mut seen = std::collections::HashSet::new();
    list.iter().any(|id| !seen.insert(id))
}

proptest! {
    #[test]
    fn replayed_events_change_nothing(events in prop::collection::vec(event_strategy(), 0..40)) {
        let mut once = Reconciler::default();
        let mut twice = Reconciler::default();
        for event in events {
            once.apply_event(event.clone());
            twice.apply_event(event.clone());
            twice.apply_event(event);
        }
        prop_assert_eq!(once.tasks(), twice.tasks());
        prop_assert!(!has_duplicates(&ids(&twice)));
    }

    #[test]
    fn delete_of_unlisted_id_is_noop(
        events in prop::collection::vec(event_strategy(), 0..40),
        missing in 100u32..200,
    ) {
        let mut r = Reconciler::default();
        for event in events {
            r.apply_event(event);
        }
        let before = r.tasks();
        r.apply_event(SubscriptionEvent::Deleted(TaskId::new(missing.to_string())));
        prop_assert_eq!(r.tasks(), before);
    }

    #[test]
    fn create_converges_in_either_order(
        background in prop::collection::vec(event_strategy(), 0..30),
        split in 0usize..30,
        broadcast_first in any::<bool>(),
        duplicate_broadcast in any::<bool>(),
    ) {
        let split = split.min(background.len());
        let created = Task::new("99", "mine", false);
        let mut r = Reconciler::default();
        let (m, _) = r.begin_create("mine").unwrap();

        for event in &background[..split] {
            r.apply_event(event.clone());
        }
        let broadcast = SubscriptionEvent::Added(created.clone());
        if broadcast_first {
            r.apply_event(broadcast.clone());
            r.settle(m, Ok(MutationOutcome::Created(created.clone())));
        } else {
            r.settle(m, Ok(MutationOutcome::Created(created.clone())));
            r.apply_event(broadcast.clone());
        }
        if duplicate_broadcast {
            r.apply_event(broadcast);
        }
        for event in &background[split..] {
            r.apply_event(event.clone());
        }

        let listed = ids(&r);
        prop_assert_eq!(listed.iter().filter(|id| id.as_str() == "99").count(), 1);
        prop_assert!(!listed.iter().any(|id| id.starts_with("temp:")));
        prop_assert!(!has_duplicates(&listed));
    }
}
