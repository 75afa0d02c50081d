//! Property-based tests for handler selection and state bookkeeping

use super::router::{ConversationBuilder, ConversationHandler, Stage};
use super::state::{Outcome, StateId};
use super::testing::{text, MockHandler};
use super::ConversationKey;
use crate::update::Update;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Reference model
// ============================================================================

#[derive(Debug, Clone)]
struct Layout {
    entry_points: Vec<bool>,
    state_handlers: Vec<bool>,
    fallbacks: Vec<bool>,
    allow_reentry: bool,
}

/// Expected (stage, index) following the documented first-match order
fn expected(layout: &Layout, state: Option<&StateId>) -> Option<(Stage, usize)> {
    if state.is_none() || layout.allow_reentry {
        if let Some(i) = layout.entry_points.iter().position(|a| *a) {
            return Some((Stage::EntryPoint, i));
        }
    }
    let state = state?;
    let registered: &[bool] = if state.as_str() == "A" {
        &layout.state_handlers
    } else {
        &[]
    };
    if let Some(i) = registered.iter().position(|a| *a) {
        return Some((Stage::State(state.clone()), i));
    }
    layout
        .fallbacks
        .iter()
        .position(|a| *a)
        .map(|i| (Stage::Fallback, i))
}

struct Built {
    router: ConversationHandler<()>,
    state_handlers: Vec<Arc<MockHandler>>,
    fallbacks: Vec<Arc<MockHandler>>,
}

fn build(layout: &Layout) -> Built {
    let mut builder: ConversationBuilder<()> =
        ConversationHandler::builder().allow_reentry(layout.allow_reentry);
    for (i, accepts) in layout.entry_points.iter().copied().enumerate() {
        builder = builder.entry_point(MockHandler::new(format!("E{i}"), move |_| accepts));
    }
    let state_handlers: Vec<_> = layout
        .state_handlers
        .iter()
        .copied()
        .enumerate()
        .map(|(i, accepts)| MockHandler::new(format!("S{i}"), move |_| accepts).into_arc())
        .collect();
    for handler in &state_handlers {
        builder = builder.state("A", Arc::clone(handler));
    }
    let fallbacks: Vec<_> = layout
        .fallbacks
        .iter()
        .copied()
        .enumerate()
        .map(|(i, accepts)| MockHandler::new(format!("F{i}"), move |_| accepts).into_arc())
        .collect();
    for handler in &fallbacks {
        builder = builder.fallback(Arc::clone(handler));
    }
    Built {
        router: builder.build().unwrap(),
        state_handlers,
        fallbacks,
    }
}

// ============================================================================
// Generators
// ============================================================================

fn arb_layout() -> impl Strategy<Value = Layout> {
    (
        proptest::collection::vec(any::<bool>(), 1..4),
        proptest::collection::vec(any::<bool>(), 0..4),
        proptest::collection::vec(any::<bool>(), 0..4),
        any::<bool>(),
    )
        .prop_map(|(entry_points, state_handlers, fallbacks, allow_reentry)| Layout {
            entry_points,
            state_handlers,
            fallbacks,
            allow_reentry,
        })
}

fn arb_current_state() -> impl Strategy<Value = Option<StateId>> {
    prop_oneof![
        Just(None),
        Just(Some(StateId::from("A"))),
        // Active state with no registered handlers
        Just(Some(StateId::from("Z"))),
    ]
}

#[derive(Debug, Clone)]
enum Step {
    Next(&'static str),
    End,
    Same,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        prop_oneof![Just("A"), Just("B"), Just("C")].prop_map(Step::Next),
        Just(Step::End),
        Just(Step::Same),
    ]
}

fn step_update(update_id: i64, user_id: i64, step: &Step) -> Update {
    let body = match step {
        Step::Next(state) => format!("next:{state}"),
        Step::End => "end".to_string(),
        Step::Same => "same".to_string(),
    };
    Update::text_message(update_id, 100, user_id, &body)
}

fn outcome_from_text(update: &Update) -> Outcome {
    let body = update
        .message
        .as_ref()
        .and_then(|m| m.text.as_deref())
        .unwrap_or_default();
    match body.strip_prefix("next:") {
        Some(state) => Outcome::next(state),
        None if body == "end" => Outcome::End,
        None => Outcome::Unchanged,
    }
}

fn scripted_router() -> ConversationHandler<()> {
    let scripted = |name: &str| {
        MockHandler::always(name).responding(|update| Ok(outcome_from_text(update)))
    };
    ConversationHandler::builder()
        .entry_point(scripted("E"))
        .state("A", scripted("SA"))
        .state("B", scripted("SB"))
        .state("C", scripted("SC"))
        .build()
        .unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_selection_matches_model(layout in arb_layout(), state in arb_current_state()) {
        let built = build(&layout);
        let update = text(1, "anything");

        let actual = built
            .router
            .select(&update, state.as_ref())
            .map(|choice| (choice.stage, choice.index));
        prop_assert_eq!(actual, expected(&layout, state.as_ref()));
    }

    #[test]
    fn prop_no_state_never_consults_state_handlers(layout in arb_layout()) {
        let built = build(&layout);
        let _ = built.router.select(&text(1, "anything"), None);

        for handler in built.state_handlers.iter().chain(&built.fallbacks) {
            prop_assert_eq!(handler.check_count(), 0);
        }
    }

    #[test]
    fn prop_state_match_skips_fallbacks(layout in arb_layout()) {
        let built = build(&layout);
        let state = StateId::from("A");
        let choice = built.router.select(&text(1, "anything"), Some(&state));

        if matches!(choice.map(|c| c.stage), Some(Stage::State(_))) {
            for handler in &built.fallbacks {
                prop_assert_eq!(handler.check_count(), 0);
            }
        }
    }

    #[test]
    fn prop_store_tracks_outcomes(
        steps in proptest::collection::vec((1i64..4, arb_step()), 1..30)
    ) {
        let router = scripted_router();
        let mut model: HashMap<ConversationKey, StateId> = HashMap::new();

        runtime().block_on(async {
            for (update_id, (user_id, step)) in (1i64..).zip(steps.iter()) {
                let update = step_update(update_id, *user_id, step);
                let handled = router.handle(&update, &()).await.unwrap();
                assert!(handled);

                let key = ConversationKey::new(Some(100), *user_id);
                match step {
                    Step::Next(state) => {
                        model.insert(key, StateId::from(*state));
                    }
                    Step::End => {
                        model.remove(&key);
                    }
                    Step::Same => {}
                }
            }
        });

        prop_assert_eq!(router.store().active_states(), model.clone());
        prop_assert_eq!(router.store().len(), model.len());
    }
}
