//! Property tests for the fold engine and the lifecycle status machine.

#![allow(clippy::expect_used)] // Panics: Tests fail loudly on unexpected errors

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use sagaflow_core::event::SerializedEvent;
use sagaflow_core::lifecycle::{CommandEvent, QueryEvent};
use sagaflow_core::ledger::{ProjectionKey, ProjectionLedgerProjection};
use sagaflow_core::projection::fold;
use sagaflow_core::status::{LifecycleSignal, OperationStatus};
use sagaflow_core::stream::OperationIdentity;
use sagaflow_core::summary::CommandSummaryProjection;

fn fixed_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .expect("valid date")
}

fn arb_command_event() -> impl Strategy<Value = CommandEvent> {
    prop_oneof![
        Just(CommandEvent::CommandCreated {
            command_name: "create-league".to_string(),
            command_identifier: "c-1".to_string(),
            correlation_identifier: "c-1".to_string(),
            logged_at: fixed_time(),
        }),
        ("[A-Za-z]{1,8}", "[a-z0-9 ]{0,12}").prop_map(|(name, value)| {
            CommandEvent::ParameterValueSet {
                name,
                value_json: serde_json::Value::String(value).to_string(),
            }
        }),
        Just(CommandEvent::ValidationSucceeded {
            validated_at: fixed_time(),
        }),
        any::<bool>().prop_map(|fatal| CommandEvent::ValidationErrorOccured {
            message: "rejected".to_string(),
            fatal,
        }),
        "[a-z]{1,6}".prop_map(|step_name| CommandEvent::CommandStepCompleted {
            step_name,
            logged_at: fixed_time(),
            impacted_entities: Vec::new(),
        }),
        Just(CommandEvent::CommandCompleted {
            completed_at: fixed_time(),
            notes: String::new(),
        }),
    ]
}

fn arb_stored_events() -> impl Strategy<Value = Vec<SerializedEvent>> {
    prop::collection::vec(arb_command_event(), 0..24).prop_map(|events| {
        events
            .iter()
            .map(|e| SerializedEvent::from_event(e, None).expect("serializes"))
            .collect()
    })
}

fn arb_signal() -> impl Strategy<Value = LifecycleSignal> {
    prop_oneof![
        Just(LifecycleSignal::ValidationSucceeded),
        any::<bool>().prop_map(|fatal| LifecycleSignal::ValidationFailed { fatal }),
        Just(LifecycleSignal::Completed),
    ]
}

proptest! {
    #[test]
    fn fold_is_deterministic(events in arb_stored_events()) {
        let first = fold(&CommandSummaryProjection, &events).expect("fold succeeds");
        let second = fold(&CommandSummaryProjection, &events).expect("fold succeeds");
        prop_assert_eq!(first, second);
    }

    #[test]
    fn appending_never_lowers_the_sequence(
        events in arb_stored_events(),
        extra in arb_command_event(),
    ) {
        let before = fold(&CommandSummaryProjection, &events).expect("fold succeeds");

        let mut extended = events.clone();
        extended.push(SerializedEvent::from_event(&extra, None).expect("serializes"));
        let after = fold(&CommandSummaryProjection, &extended).expect("fold succeeds");

        prop_assert!(after.sequence >= before.sequence);
    }

    #[test]
    fn terminal_status_is_never_left(
        start in prop_oneof![Just(OperationStatus::Invalid), Just(OperationStatus::Completed)],
        signals in prop::collection::vec(arb_signal(), 0..32),
    ) {
        let end = signals.into_iter().fold(start, OperationStatus::apply);
        prop_assert_eq!(end, start);
    }

    #[test]
    fn repeated_requests_leave_one_entry_per_key(
        names in prop::collection::vec("[A-C]", 1..12),
    ) {
        let events: Vec<SerializedEvent> = names
            .iter()
            .map(|name| {
                SerializedEvent::from_event(
                    &QueryEvent::ProjectionRequested {
                        key: ProjectionKey::new(
                            "League_Summary_Information",
                            OperationIdentity::new("leagues", "league", name.clone()),
                        ),
                        as_of: None,
                        requested_at: fixed_time(),
                    },
                    None,
                )
                .expect("serializes")
            })
            .collect();

        let ledger = fold(&ProjectionLedgerProjection, &events).expect("fold succeeds").state;

        let mut distinct = names.clone();
        distinct.sort();
        distinct.dedup();
        prop_assert_eq!(ledger.entries().len(), distinct.len());
        prop_assert_eq!(ledger.unprocessed_count(), distinct.len());
    }
}
