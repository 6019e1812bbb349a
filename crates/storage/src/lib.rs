//! Persistence contracts for conversations, incidents and the knowledge base,
//! with an in-memory backend and a SQLite backend.
//!
//! Every dialogue turn is written through [`ConversationStore::commit_turn`]:
//! the conversation's new state, the turn's messages and any incident filed
//! during the turn land together or not at all.

mod memory;
mod sqlite;

use anyhow::Result;
use civic_core::{
    Conversation, DialogueState, Incident, IncidentHistoryEntry, IncidentStatus, KbDocument,
    Message, NewIncident, NewMessage, Sender,
};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub const INCIDENT_CREATED_NOTE: &str = "Incident created";
/// Attempts at drawing an unused public id for directly created incidents.
pub const PUBLIC_ID_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("incident `{0}` not found")]
    IncidentNotFound(String),
    #[error("incident public id `{0}` already exists")]
    DuplicatePublicId(String),
    #[error("conversation `{0}` not found")]
    ConversationNotFound(String),
}

/// Everything one dialogue turn writes.
#[derive(Debug, Clone)]
pub struct TurnCommit {
    /// The conversation carrying its post-turn state; inserted when new.
    pub conversation: Conversation,
    pub messages: Vec<NewMessage>,
    pub incident: Option<Incident>,
}

pub trait ConversationStore: Send + Sync {
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Conversation>>;
    /// Returns the existing conversation when `session_id` is already known.
    async fn create(&self, session_id: &str) -> Result<Conversation>;
    async fn append_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
    ) -> Result<Message>;
    async fn save_state(&self, conversation_id: &str, state: &DialogueState) -> Result<()>;
    /// Messages in creation order.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>>;
    async fn commit_turn(&self, commit: TurnCommit) -> Result<()>;
}

pub trait IncidentRepository: Send + Sync {
    async fn create_incident(&self, new: NewIncident, status: IncidentStatus) -> Result<Incident>;
    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Incident>>;
    async fn incident_history(&self, public_id: &str) -> Result<Vec<IncidentHistoryEntry>>;
    async fn list_incidents(&self, offset: usize, limit: usize) -> Result<Vec<Incident>>;
    async fn update_status(
        &self,
        public_id: &str,
        status: IncidentStatus,
        note: Option<&str>,
    ) -> Result<Incident>;
}

pub trait KnowledgeRepository: Send + Sync {
    /// Documents in the order they were first stored.
    async fn list_documents(&self) -> Result<Vec<KbDocument>>;
    async fn upsert_document(&self, doc: &KbDocument) -> Result<()>;
}

pub fn status_change_note(status: IncidentStatus, note: Option<&str>) -> String {
    note.map(str::trim)
        .filter(|note| !note.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("Status changed to {}", status.as_str()))
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl ConversationStore for Store {
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Conversation>> {
        match self {
            Store::Memory(store) => store.find_by_session(session_id).await,
            Store::Sqlite(store) => store.find_by_session(session_id).await,
        }
    }

    async fn create(&self, session_id: &str) -> Result<Conversation> {
        match self {
            Store::Memory(store) => store.create(session_id).await,
            Store::Sqlite(store) => store.create(session_id).await,
        }
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
    ) -> Result<Message> {
        match self {
            Store::Memory(store) => store.append_message(conversation_id, sender, text).await,
            Store::Sqlite(store) => store.append_message(conversation_id, sender, text).await,
        }
    }

    async fn save_state(&self, conversation_id: &str, state: &DialogueState) -> Result<()> {
        match self {
            Store::Memory(store) => store.save_state(conversation_id, state).await,
            Store::Sqlite(store) => store.save_state(conversation_id, state).await,
        }
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        match self {
            Store::Memory(store) => store.messages(conversation_id).await,
            Store::Sqlite(store) => store.messages(conversation_id).await,
        }
    }

    async fn commit_turn(&self, commit: TurnCommit) -> Result<()> {
        match self {
            Store::Memory(store) => store.commit_turn(commit).await,
            Store::Sqlite(store) => store.commit_turn(commit).await,
        }
    }
}

impl IncidentRepository for Store {
    async fn create_incident(&self, new: NewIncident, status: IncidentStatus) -> Result<Incident> {
        match self {
            Store::Memory(store) => store.create_incident(new, status).await,
            Store::Sqlite(store) => store.create_incident(new, status).await,
        }
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Incident>> {
        match self {
            Store::Memory(store) => store.find_by_public_id(public_id).await,
            Store::Sqlite(store) => store.find_by_public_id(public_id).await,
        }
    }

    async fn incident_history(&self, public_id: &str) -> Result<Vec<IncidentHistoryEntry>> {
        match self {
            Store::Memory(store) => store.incident_history(public_id).await,
            Store::Sqlite(store) => store.incident_history(public_id).await,
        }
    }

    async fn list_incidents(&self, offset: usize, limit: usize) -> Result<Vec<Incident>> {
        match self {
            Store::Memory(store) => store.list_incidents(offset, limit).await,
            Store::Sqlite(store) => store.list_incidents(offset, limit).await,
        }
    }

    async fn update_status(
        &self,
        public_id: &str,
        status: IncidentStatus,
        note: Option<&str>,
    ) -> Result<Incident> {
        match self {
            Store::Memory(store) => store.update_status(public_id, status, note).await,
            Store::Sqlite(store) => store.update_status(public_id, status, note).await,
        }
    }
}

impl KnowledgeRepository for Store {
    async fn list_documents(&self) -> Result<Vec<KbDocument>> {
        match self {
            Store::Memory(store) => store.list_documents().await,
            Store::Sqlite(store) => store.list_documents().await,
        }
    }

    async fn upsert_document(&self, doc: &KbDocument) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert_document(doc).await,
            Store::Sqlite(store) => store.upsert_document(doc).await,
        }
    }
}
