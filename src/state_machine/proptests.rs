//! Property-based tests for the session state machine
//!
//! These tests verify key invariants hold across arbitrary event sequences.

use super::transition::*;
use super::*;
use crate::config::{ClearPolicy, SessionConfig};
use crate::llm::ChatError;
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

/// Apply an event the way the runtime does: run the transition, then feed
/// back `Settle` when the effects ask for it.
fn step(
    state: &SessionState,
    ctx: &SessionContext,
    event: Event,
) -> Result<(SessionState, Vec<Effect>), TransitionError> {
    let result = transition(state, ctx, event)?;
    let mut effects = result.effects;
    let mut state = result.new_state;
    if effects.contains(&Effect::Settle) {
        let settled = transition(&state, ctx, Event::Settle)?;
        state = settled.new_state;
        effects.extend(settled.effects);
    }
    Ok((state, effects))
}

fn committed(effects: &[Effect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::CommitAnswer { answer } => Some(answer.clone()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_delta() -> impl Strategy<Value = Event> {
    "[a-zA-Z ]{1,8}".prop_map(|text| Event::TextDelta { text })
}

fn arb_user_message() -> impl Strategy<Value = Event> {
    "[a-z]{1,10}".prop_map(|text| Event::UserMessage {
        text,
        config: Box::new(SessionConfig::default()),
    })
}

fn arb_stream_failed() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(|m| Event::StreamFailed {
            error: ChatError::connection(m)
        }),
        "[a-z ]{1,20}".prop_map(|m| Event::StreamFailed {
            error: ChatError::protocol(m)
        }),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => arb_delta(),
        2 => arb_user_message(),
        1 => Just(Event::Sentinel),
        1 => arb_stream_failed(),
        1 => Just(Event::UserCancel),
        1 => Just(Event::ClearHistory),
    ]
}

fn arb_clear_policy() -> impl Strategy<Value = ClearPolicy> {
    prop_oneof![Just(ClearPolicy::Reject), Just(ClearPolicy::CancelActive)]
}

fn arb_busy_state() -> impl Strategy<Value = SessionState> {
    prop_oneof![
        Just(SessionState::Sending),
        "[a-z ]{0,20}".prop_map(|answer| SessionState::Streaming { answer }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Invariant: after any event sequence the machine rests in a
    // caller-observable resting state (terminal states always settle)
    #[test]
    fn prop_terminal_states_always_settle(
        events in proptest::collection::vec(arb_event(), 0..30),
        policy in arb_clear_policy(),
    ) {
        let ctx = SessionContext::new(policy);
        let mut state = SessionState::Idle;
        for event in events {
            if let Ok((next, _)) = step(&state, &ctx, event) {
                state = next;
            }
            let settled = !matches!(
                state,
                SessionState::Completed { .. } | SessionState::Errored { .. }
            );
            prop_assert!(settled, "left in {}", state.status());
        }
    }

    // Invariant: a busy session rejects new messages without effects
    #[test]
    fn prop_single_active_session(
        state in arb_busy_state(),
        message in arb_user_message(),
        policy in arb_clear_policy(),
    ) {
        let ctx = SessionContext::new(policy);
        let result = transition(&state, &ctx, message);
        prop_assert_eq!(result.unwrap_err(), TransitionError::Busy);
    }

    // Invariant: failures never commit an assistant turn
    #[test]
    fn prop_error_never_commits(
        deltas in proptest::collection::vec(arb_delta(), 0..10),
        failure in arb_stream_failed(),
    ) {
        let ctx = SessionContext::default();
        let (mut state, _) = step(&SessionState::Idle, &ctx, Event::UserMessage {
            text: "q".into(),
            config: Box::new(SessionConfig::default()),
        }).unwrap();
        for delta in deltas {
            state = step(&state, &ctx, delta).unwrap().0;
        }

        let (state, effects) = step(&state, &ctx, failure).unwrap();
        prop_assert_eq!(state, SessionState::Idle);
        prop_assert!(committed(&effects).is_empty());
        let failed_count = effects
            .iter()
            .filter(|e| matches!(e, Effect::NotifyFailed { .. }))
            .count();
        prop_assert_eq!(failed_count, 1);
    }

    // Invariant: the committed answer is the in-order concatenation of the
    // deltas, and folding the same deltas twice gives the same answer
    #[test]
    fn prop_delta_folding_is_order_preserving(
        texts in proptest::collection::vec("[a-zA-Z0-9 ]{1,6}", 0..20),
    ) {
        let ctx = SessionContext::default();
        let run = |texts: &[String]| -> Vec<String> {
            let (mut state, _) = step(&SessionState::Idle, &ctx, Event::UserMessage {
                text: "q".into(),
                config: Box::new(SessionConfig::default()),
            }).unwrap();
            for text in texts {
                state = step(&state, &ctx, Event::TextDelta { text: text.clone() }).unwrap().0;
            }
            let (_, effects) = step(&state, &ctx, Event::Sentinel).unwrap();
            committed(&effects)
        };

        let first = run(&texts);
        prop_assert_eq!(&first, &vec![texts.concat()]);
        prop_assert_eq!(first, run(&texts));
    }

    // Invariant: once the sentinel is processed, further deltas are refused
    #[test]
    fn prop_sentinel_is_final(
        before in proptest::collection::vec(arb_delta(), 0..5),
        after in proptest::collection::vec(arb_delta(), 1..5),
    ) {
        let ctx = SessionContext::default();
        let (mut state, _) = step(&SessionState::Idle, &ctx, Event::UserMessage {
            text: "q".into(),
            config: Box::new(SessionConfig::default()),
        }).unwrap();
        for delta in before {
            state = step(&state, &ctx, delta).unwrap().0;
        }
        let (state, _) = step(&state, &ctx, Event::Sentinel).unwrap();

        for delta in after {
            let result = transition(&state, &ctx, delta);
            prop_assert!(matches!(result, Err(TransitionError::InvalidTransition(_))));
        }
    }

    // Invariant: every path out of an active state closes the stream first
    #[test]
    fn prop_leaving_active_state_closes_stream(
        state in arb_busy_state(),
        event in prop_oneof![
            Just(Event::Sentinel),
            arb_stream_failed(),
            Just(Event::UserCancel),
            Just(Event::ClearHistory),
        ],
    ) {
        let ctx = SessionContext::new(ClearPolicy::CancelActive);
        let result = transition(&state, &ctx, event).unwrap();
        prop_assert!(!result.new_state.is_active());
        prop_assert_eq!(result.effects.first(), Some(&Effect::CloseStream));
    }
}
