use crate::models::Intent;

const INCIDENT_KEYWORDS: &[&str] = &[
    "report",
    "issue",
    "problem",
    "broken",
    "damaged",
    "pothole",
    "graffiti",
    "complaint",
    "leak",
    "streetlight",
];

const STATUS_KEYWORDS: &[&str] = &[
    "status", "check", "update", "progress", "resolved", "done", "fixed", "pending",
];

const QUERY_KEYWORDS: &[&str] = &[
    "how",
    "where",
    "what",
    "when",
    "who",
    "why",
    "information",
    "details",
    "process",
    "apply",
];

pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Keyword rules, checked in priority order: incident, then status, then query.
pub fn classify_intent_rules(text: &str) -> Intent {
    let lower = text.to_lowercase();

    if contains_any(&lower, INCIDENT_KEYWORDS) {
        return Intent::IncidentReport;
    }

    if contains_any(&lower, STATUS_KEYWORDS) {
        return Intent::StatusCheck;
    }

    if contains_any(&lower, QUERY_KEYWORDS) {
        return Intent::GeneralQuery;
    }

    Intent::Unknown
}

pub fn classify_intent(text: &str) -> (Intent, f32) {
    let intent = classify_intent_rules(text);
    (intent, intent.rule_confidence())
}

fn contains_any(input: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| input.contains(needle))
}
