pub mod dialogue;
pub mod intent;
pub mod models;
pub mod replies;
pub mod validation;

pub use dialogue::{plan_turn, TurnOutcome, TurnPlan};
pub use intent::{classify_intent, classify_intent_rules, normalize_text};
pub use models::*;
pub use validation::{
    generate_public_id, validate_message, validate_page, validate_session_id, validate_submission,
    IncidentSubmission, ValidationError,
};
