//! Property-based tests for the wire format.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never panics the `graphql-transport-ws` decoders.
//! 2. Mutation requests built by the client are parsed back to the same
//!    operation by the server side, for any title and patch.
//! 3. Subscription events decode back from the payload the server pushes.

use proptest::prelude::*;
use taskdeck_proto::event::SubscriptionEvent;
use taskdeck_proto::operation::{MutationOutcome, Operation};
use taskdeck_proto::task::{Task, TaskId, TaskPatch};
use taskdeck_proto::ws;

/// Strategy for server-style task ids (never temporary).
fn arb_task_id() -> impl Strategy<Value = TaskId> {
    "[a-f0-9]{1,24}".prop_map(TaskId::new)
}

/// Strategy for titles, including quotes and non-ASCII text.
fn arb_title() -> impl Strategy<Value = String> {
    "[^\x00]{1,64}"
}

fn arb_task() -> impl Strategy<Value = Task> {
    (arb_task_id(), arb_title(), any::<bool>(), proptest::option::of(any::<i64>())).prop_map(
        |(id, title, completed, created_at)| Task {
            created_at,
            ..Task::new(id, title, completed)
        },
    )
}

fn arb_patch() -> impl Strategy<Value = TaskPatch> {
    (proptest::option::of(arb_title()), proptest::option::of(any::<bool>()))
        .prop_map(|(title, completed)| TaskPatch { title, completed })
}

fn arb_mutation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        arb_title().prop_map(|title| Operation::CreateTask { title }),
        (arb_task_id(), arb_patch()).prop_map(|(id, patch)| Operation::UpdateTask { id, patch }),
        arb_task_id().prop_map(|id| Operation::DeleteTask { id }),
    ]
}

fn arb_event() -> impl Strategy<Value = SubscriptionEvent> {
    prop_oneof![
        arb_task().prop_map(SubscriptionEvent::Added),
        arb_task().prop_map(SubscriptionEvent::Updated),
        arb_task_id().prop_map(SubscriptionEvent::Deleted),
    ]
}

proptest! {
    /// Random text never causes a panic when decoded as a server frame.
    #[test]
    fn random_text_decode_server_no_panic(text in ".{0,256}") {
        let _ = ws::decode_server(&text);
    }

    /// Random text never causes a panic when decoded as a client frame.
    #[test]
    fn random_text_decode_client_no_panic(text in ".{0,256}") {
        let _ = ws::decode_client(&text);
    }

    /// The server reconstructs exactly the mutation the client sent.
    #[test]
    fn mutation_request_parses_back(op in arb_mutation()) {
        let request = op.to_request();
        let parsed = Operation::parse(request.name(), &request.variables);
        prop_assert_eq!(parsed, Ok(op));
    }

    /// Subscription payloads decode into the event that produced them.
    #[test]
    fn pushed_event_decodes(event in arb_event()) {
        let decoded = SubscriptionEvent::decode(&event.operation(), &event.to_data());
        prop_assert_eq!(decoded, Ok(event));
    }

    /// Mutation results decode into the outcome that produced them.
    #[test]
    fn mutation_outcome_decodes(task in arb_task()) {
        let op = Operation::CreateTask { title: task.title.clone() };
        let outcome = MutationOutcome::Created(task);
        prop_assert_eq!(MutationOutcome::decode(&op, &outcome.to_data()), Ok(outcome));
    }
}
