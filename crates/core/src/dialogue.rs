//! Per-session dialogue transitions.
//!
//! [`plan_turn`] is a pure function of the current [`DialogueState`] and the
//! incoming text. It never touches storage: lookups, retrieval and incident
//! creation are returned as a [`TurnOutcome`] for the caller to resolve, and
//! the caller commits `next_state` only once the whole turn has succeeded.

use crate::models::{DialogueState, Intent, NewIncident, SlotStep};
use crate::replies::{self, CHOICE_PROMPT, CLARIFY_PROMPT, OPENING_FORM, STATUS_ID_PROMPT};

/// Confidence reported for turns the classifier does not score.
pub const DEFAULT_TURN_CONFIDENCE: f32 = 0.5;
pub const INCIDENT_FILED_CONFIDENCE: f32 = 0.95;
pub const STATUS_LOOKUP_CONFIDENCE: f32 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Reply is fully determined by the transition.
    Reply(String),
    /// Run the knowledge retriever over `query` and answer from its citations.
    SearchKnowledge { query: String },
    /// Persist the incident and answer with its public ID.
    FileIncident(NewIncident),
    /// Look up `public_id` and answer with its status, or "not found".
    LookupIncident { public_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnPlan {
    pub next_state: DialogueState,
    pub outcome: TurnOutcome,
    pub confidence: f32,
    /// Classifier verdict, present only on fresh turns.
    pub intent: Option<Intent>,
}

impl TurnPlan {
    fn reply(next_state: DialogueState, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            next_state,
            outcome: TurnOutcome::Reply(text.into()),
            confidence,
            intent: None,
        }
    }
}

/// Decides the single transition for one turn. `classify` runs only when no
/// flow is pending.
pub fn plan_turn<F>(state: &DialogueState, message: &str, classify: F) -> TurnPlan
where
    F: FnOnce(&str) -> (Intent, f32),
{
    match state {
        DialogueState::Fresh => plan_fresh(message, classify),
        DialogueState::AwaitingChoice => plan_choice(message),
        DialogueState::Collecting { step, draft } => {
            let mut draft = draft.clone();
            draft.fill(*step, message.trim());

            match step.next() {
                Some(next) => TurnPlan::reply(
                    DialogueState::Collecting { step: next, draft },
                    replies::slot_prompt(next),
                    DEFAULT_TURN_CONFIDENCE,
                ),
                None => TurnPlan {
                    next_state: DialogueState::Fresh,
                    outcome: TurnOutcome::FileIncident(draft.into_new_incident()),
                    confidence: INCIDENT_FILED_CONFIDENCE,
                    intent: None,
                },
            }
        }
        DialogueState::AwaitingIncidentId => TurnPlan {
            next_state: DialogueState::Fresh,
            outcome: TurnOutcome::LookupIncident {
                public_id: message.trim().to_string(),
            },
            confidence: STATUS_LOOKUP_CONFIDENCE,
            intent: None,
        },
    }
}

fn plan_fresh<F>(message: &str, classify: F) -> TurnPlan
where
    F: FnOnce(&str) -> (Intent, f32),
{
    let (intent, confidence) = classify(message);

    let (next_state, outcome) = match intent {
        Intent::IncidentReport => (
            DialogueState::AwaitingChoice,
            TurnOutcome::Reply(CHOICE_PROMPT.to_string()),
        ),
        Intent::StatusCheck => (
            DialogueState::AwaitingIncidentId,
            TurnOutcome::Reply(STATUS_ID_PROMPT.to_string()),
        ),
        Intent::GeneralQuery => (
            DialogueState::Fresh,
            TurnOutcome::SearchKnowledge {
                query: message.to_string(),
            },
        ),
        Intent::Unknown => (
            DialogueState::Fresh,
            TurnOutcome::Reply(CLARIFY_PROMPT.to_string()),
        ),
    };

    TurnPlan {
        next_state,
        outcome,
        confidence,
        intent: Some(intent),
    }
}

fn plan_choice(message: &str) -> TurnPlan {
    let choice = message.trim().to_lowercase();

    if choice.contains("chat") {
        TurnPlan::reply(
            DialogueState::Collecting {
                step: SlotStep::Title,
                draft: Default::default(),
            },
            replies::slot_prompt(SlotStep::Title),
            DEFAULT_TURN_CONFIDENCE,
        )
    } else if choice.contains("form") {
        TurnPlan::reply(DialogueState::Fresh, OPENING_FORM, DEFAULT_TURN_CONFIDENCE)
    } else {
        TurnPlan::reply(
            DialogueState::AwaitingChoice,
            CHOICE_PROMPT,
            DEFAULT_TURN_CONFIDENCE,
        )
    }
}
