use crate::models::{Citation, Incident, SlotStep};

pub const CHOICE_PROMPT: &str = "Would you like to file this in chat, or open the incident form?";
pub const STATUS_ID_PROMPT: &str =
    "Sure, can you provide the incident ID so I can check its status?";
pub const CLARIFY_PROMPT: &str = "I'm not sure I understood. Could you clarify?";
pub const OPENING_FORM: &str = "Okay, opening the incident form for you.";
pub const NO_KB_ANSWER: &str =
    "I couldn't find a reliable answer in the knowledge base. Could you clarify?";
pub const INCIDENT_NOT_FOUND: &str =
    "Sorry, I couldn't find an incident with that ID. Please double-check.";

/// Question asked while waiting for `step`.
pub fn slot_prompt(step: SlotStep) -> &'static str {
    match step {
        SlotStep::Title => "Great, let's file it here. What's the title of this report?",
        SlotStep::Category => {
            "Got it. What's the category (e.g. streetlight, water, road, trash)?"
        }
        SlotStep::LocationText => "Noted. Can you provide the exact location or nearest landmark?",
        SlotStep::Email => "Thanks. Could I have your contact email in case staff need more info?",
        SlotStep::Description => "Finally, please add a short description.",
    }
}

pub fn incident_filed_reply(incident: &Incident) -> String {
    format!(
        "Thanks, I've filed your incident report: {}.\nYour incident ID is {}. We'll update you when the status changes.",
        incident.title, incident.public_id
    )
}

pub fn status_reply(incident: Option<&Incident>) -> String {
    match incident {
        Some(incident) => format!(
            "The status of incident {} is: {}.",
            incident.public_id,
            incident.status.as_str()
        ),
        None => INCIDENT_NOT_FOUND.to_string(),
    }
}

pub fn knowledge_reply(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return NO_KB_ANSWER.to_string();
    }

    let lines = citations
        .iter()
        .enumerate()
        .map(|(idx, citation)| format!("{}. {}", idx + 1, citation.title))
        .collect::<Vec<_>>();

    format!("Here's what I found:\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentStatus, NewIncident};

    #[test]
    fn lists_citation_titles_in_order() {
        let citations = vec![
            Citation {
                title: "Trash Collection Schedule".to_string(),
                snippet: String::new(),
                source_link: None,
            },
            Citation {
                title: "Noise Complaints".to_string(),
                snippet: String::new(),
                source_link: None,
            },
        ];

        assert_eq!(
            knowledge_reply(&citations),
            "Here's what I found:\n1. Trash Collection Schedule\n2. Noise Complaints"
        );
        assert_eq!(knowledge_reply(&[]), NO_KB_ANSWER);
    }

    #[test]
    fn status_reply_names_the_status() {
        let incident = Incident::from_new(
            NewIncident {
                title: "Pothole".to_string(),
                category: "road_maintenance".to_string(),
                location_text: None,
                contact_email: None,
                description: "deep".to_string(),
            },
            "AB12CD34",
            IncidentStatus::InProgress,
        );

        let reply = status_reply(Some(&incident));
        assert!(reply.contains("AB12CD34"));
        assert!(reply.contains("in_progress"));
        assert_eq!(status_reply(None), INCIDENT_NOT_FOUND);
    }
}
