use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    IncidentReport,
    StatusCheck,
    GeneralQuery,
    Unknown,
}

impl Intent {
    /// Fixed confidence reported by the keyword rules for each intent.
    pub fn rule_confidence(self) -> f32 {
        match self {
            Self::IncidentReport => 0.95,
            Self::StatusCheck => 0.95,
            Self::GeneralQuery => 0.90,
            Self::Unknown => 0.50,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncidentReport => "incident_report",
            Self::StatusCheck => "status_check",
            Self::GeneralQuery => "general_query",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingIntent {
    IncidentReportChoice,
    IncidentReportFlow,
    StatusCheck,
}

impl PendingIntent {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "incident_report_choice" => Some(Self::IncidentReportChoice),
            "incident_report_flow" => Some(Self::IncidentReportFlow),
            "status_check" => Some(Self::StatusCheck),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncidentReportChoice => "incident_report_choice",
            Self::IncidentReportFlow => "incident_report_flow",
            Self::StatusCheck => "status_check",
        }
    }
}

/// Slots of the incident report flow, in collection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStep {
    Title,
    Category,
    LocationText,
    Email,
    Description,
}

impl SlotStep {
    pub const ORDER: [SlotStep; 5] = [
        Self::Title,
        Self::Category,
        Self::LocationText,
        Self::Email,
        Self::Description,
    ];

    pub fn next(self) -> Option<Self> {
        match self {
            Self::Title => Some(Self::Category),
            Self::Category => Some(Self::LocationText),
            Self::LocationText => Some(Self::Email),
            Self::Email => Some(Self::Description),
            Self::Description => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Category => "category",
            Self::LocationText => "location_text",
            Self::Email => "email",
            Self::Description => "description",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IncidentDraft {
    pub fn fill(&mut self, step: SlotStep, value: impl Into<String>) {
        let slot = match step {
            SlotStep::Title => &mut self.title,
            SlotStep::Category => &mut self.category,
            SlotStep::LocationText => &mut self.location_text,
            SlotStep::Email => &mut self.email,
            SlotStep::Description => &mut self.description,
        };
        *slot = Some(value.into());
    }

    pub fn into_new_incident(self) -> NewIncident {
        NewIncident {
            title: self.title.unwrap_or_else(|| "No Title".to_string()),
            category: self.category.unwrap_or_else(|| "other".to_string()),
            location_text: self.location_text,
            contact_email: self.email,
            description: self.description.unwrap_or_default(),
        }
    }
}

/// Per-session dialogue state. Slot values only exist inside the report flow,
/// so leaving the flow always drops them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DialogueState {
    #[default]
    Fresh,
    AwaitingChoice,
    Collecting {
        step: SlotStep,
        draft: IncidentDraft,
    },
    AwaitingIncidentId,
}

/// Persisted shape of the slot mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<SlotStep>,
    #[serde(flatten)]
    pub draft: IncidentDraft,
}

impl SlotState {
    /// A missing or blank column is the empty mapping.
    pub fn decode(raw: Option<&str>) -> Result<Self, serde_json::Error> {
        match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => serde_json::from_str(raw),
            None => Ok(Self::default()),
        }
    }
}

impl DialogueState {
    pub fn pending_intent(&self) -> Option<PendingIntent> {
        match self {
            Self::Fresh => None,
            Self::AwaitingChoice => Some(PendingIntent::IncidentReportChoice),
            Self::Collecting { .. } => Some(PendingIntent::IncidentReportFlow),
            Self::AwaitingIncidentId => Some(PendingIntent::StatusCheck),
        }
    }

    pub fn step(&self) -> Option<SlotStep> {
        match self {
            Self::Collecting { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn slot_state(&self) -> SlotState {
        match self {
            Self::Collecting { step, draft } => SlotState {
                step: Some(*step),
                draft: draft.clone(),
            },
            _ => SlotState::default(),
        }
    }

    /// Rebuilds the state from its stored columns. Unknown intents read as
    /// `Fresh`; slots only survive inside the report flow.
    pub fn from_stored(pending_intent: Option<&str>, slots: SlotState) -> Self {
        match pending_intent.and_then(PendingIntent::parse) {
            None => Self::Fresh,
            Some(PendingIntent::IncidentReportChoice) => Self::AwaitingChoice,
            Some(PendingIntent::StatusCheck) => Self::AwaitingIncidentId,
            Some(PendingIntent::IncidentReportFlow) => Self::Collecting {
                step: slots.step.unwrap_or(SlotStep::Title),
                draft: slots.draft,
            },
        }
    }

    pub fn slot_state_json(&self) -> String {
        serde_json::to_string(&self.slot_state()).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Resident,
    Staff,
    System,
    Bot,
}

impl Sender {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "resident" => Some(Self::Resident),
            "staff" => Some(Self::Staff),
            "system" => Some(Self::System),
            "bot" => Some(Self::Bot),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resident => "resident",
            Self::Staff => "staff",
            Self::System => "system",
            Self::Bot => "bot",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub state: DialogueState,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            created_at: Utc::now(),
            state: DialogueState::Fresh,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub conversation_id: String,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Insertion sequence, breaks timestamp ties.
    pub seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: Sender,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    New,
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl IncidentStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "new" => Some(Self::New),
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentCategory {
    RoadMaintenance,
    WasteManagement,
    WaterSupply,
    Electricity,
    StreetLighting,
    Drainage,
    Other,
}

impl IncidentCategory {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "road_maintenance" => Some(Self::RoadMaintenance),
            "waste_management" => Some(Self::WasteManagement),
            "water_supply" => Some(Self::WaterSupply),
            "electricity" => Some(Self::Electricity),
            "street_lighting" => Some(Self::StreetLighting),
            "drainage" => Some(Self::Drainage),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoadMaintenance => "road_maintenance",
            Self::WasteManagement => "waste_management",
            Self::WaterSupply => "water_supply",
            Self::Electricity => "electricity",
            Self::StreetLighting => "street_lighting",
            Self::Drainage => "drainage",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIncident {
    pub title: String,
    pub category: String,
    pub location_text: Option<String>,
    pub contact_email: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub public_id: String,
    pub title: String,
    pub category: String,
    pub location_text: Option<String>,
    pub contact_email: Option<String>,
    pub description: String,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn from_new(new: NewIncident, public_id: impl Into<String>, status: IncidentStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            public_id: public_id.into(),
            title: new.title,
            category: new.category,
            location_text: new.location_text,
            contact_email: new.contact_email,
            description: new.description,
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentHistoryEntry {
    pub status: IncidentStatus,
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbChunk {
    pub id: String,
    pub text: String,
    /// JSON-encoded `[f32]`, decoded lazily at scoring time.
    pub embedding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbDocument {
    pub id: String,
    pub title: String,
    pub body: String,
    pub source_url: Option<String>,
    pub chunks: Vec<KbChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub snippet: String,
    pub source_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbSearchHit {
    pub doc_id: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInput {
    pub session_id: Option<String>,
    pub message: String,
    pub role: Option<Sender>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub session_id: String,
}
