use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use civic_core::{
    generate_public_id, Conversation, DialogueState, Incident, IncidentHistoryEntry,
    IncidentStatus, KbDocument, Message, NewIncident, Sender,
};
use parking_lot::RwLock;

use crate::{
    status_change_note, ConversationStore, IncidentRepository, KnowledgeRepository,
    StorageError, TurnCommit, INCIDENT_CREATED_NOTE, PUBLIC_ID_ATTEMPTS,
};

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<String, Conversation>,
    session_index: HashMap<String, String>,
    messages: HashMap<String, Vec<Message>>,
    next_seq: i64,
    incidents: Vec<Incident>,
    history: HashMap<String, Vec<IncidentHistoryEntry>>,
    documents: Vec<KbDocument>,
}

impl MemoryState {
    fn push_message(&mut self, conversation_id: &str, sender: Sender, text: &str) -> Message {
        self.next_seq += 1;
        let message = Message {
            conversation_id: conversation_id.to_string(),
            sender,
            text: text.to_string(),
            timestamp: Utc::now(),
            seq: self.next_seq,
        };
        self.messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    fn has_public_id(&self, public_id: &str) -> bool {
        self.incidents
            .iter()
            .any(|incident| incident.public_id == public_id)
    }

    fn insert_incident(&mut self, incident: Incident) {
        self.history.insert(
            incident.public_id.clone(),
            vec![IncidentHistoryEntry {
                status: incident.status,
                note: INCIDENT_CREATED_NOTE.to_string(),
                timestamp: incident.created_at,
            }],
        );
        self.incidents.push(incident);
    }
}

/// Process-local store. A single lock guards all tables so a turn commit is
/// applied as one unit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryStore {
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Conversation>> {
        let state = self.inner.read();
        Ok(state
            .session_index
            .get(session_id)
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn create(&self, session_id: &str) -> Result<Conversation> {
        let mut state = self.inner.write();
        if let Some(existing) = state
            .session_index
            .get(session_id)
            .and_then(|id| state.conversations.get(id))
        {
            return Ok(existing.clone());
        }

        let conversation = Conversation::new(session_id);
        state
            .session_index
            .insert(session_id.to_string(), conversation.id.clone());
        state
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
    ) -> Result<Message> {
        let mut state = self.inner.write();
        if !state.conversations.contains_key(conversation_id) {
            return Err(StorageError::ConversationNotFound(conversation_id.to_string()).into());
        }
        Ok(state.push_message(conversation_id, sender, text))
    }

    async fn save_state(&self, conversation_id: &str, dialogue: &DialogueState) -> Result<()> {
        let mut state = self.inner.write();
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StorageError::ConversationNotFound(conversation_id.to_string()))?;
        conversation.state = dialogue.clone();
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .inner
            .read()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_turn(&self, commit: TurnCommit) -> Result<()> {
        let mut state = self.inner.write();

        if let Some(incident) = &commit.incident {
            if state.has_public_id(&incident.public_id) {
                return Err(StorageError::DuplicatePublicId(incident.public_id.clone()).into());
            }
        }

        let conversation = commit.conversation;
        state
            .session_index
            .insert(conversation.session_id.clone(), conversation.id.clone());
        for message in &commit.messages {
            state.push_message(&conversation.id, message.sender, &message.text);
        }
        state
            .conversations
            .insert(conversation.id.clone(), conversation);

        if let Some(incident) = commit.incident {
            state.insert_incident(incident);
        }

        Ok(())
    }
}

impl IncidentRepository for MemoryStore {
    async fn create_incident(&self, new: NewIncident, status: IncidentStatus) -> Result<Incident> {
        let mut state = self.inner.write();

        for _ in 0..PUBLIC_ID_ATTEMPTS {
            let public_id = generate_public_id();
            if state.has_public_id(&public_id) {
                continue;
            }
            let incident = Incident::from_new(new, public_id, status);
            state.insert_incident(incident.clone());
            return Ok(incident);
        }

        anyhow::bail!("could not allocate an unused incident public id")
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Incident>> {
        Ok(self
            .inner
            .read()
            .incidents
            .iter()
            .find(|incident| incident.public_id == public_id)
            .cloned())
    }

    async fn incident_history(&self, public_id: &str) -> Result<Vec<IncidentHistoryEntry>> {
        Ok(self
            .inner
            .read()
            .history
            .get(public_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_incidents(&self, offset: usize, limit: usize) -> Result<Vec<Incident>> {
        Ok(self
            .inner
            .read()
            .incidents
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        public_id: &str,
        status: IncidentStatus,
        note: Option<&str>,
    ) -> Result<Incident> {
        let mut state = self.inner.write();
        let now = Utc::now();

        let incident = state
            .incidents
            .iter_mut()
            .find(|incident| incident.public_id == public_id)
            .ok_or_else(|| StorageError::IncidentNotFound(public_id.to_string()))?;
        incident.status = status;
        incident.updated_at = now;
        let updated = incident.clone();

        state
            .history
            .entry(public_id.to_string())
            .or_default()
            .push(IncidentHistoryEntry {
                status,
                note: status_change_note(status, note),
                timestamp: now,
            });

        Ok(updated)
    }
}

impl KnowledgeRepository for MemoryStore {
    async fn list_documents(&self) -> Result<Vec<KbDocument>> {
        Ok(self.inner.read().documents.clone())
    }

    async fn upsert_document(&self, doc: &KbDocument) -> Result<()> {
        let mut state = self.inner.write();
        match state.documents.iter_mut().find(|existing| existing.id == doc.id) {
            Some(existing) => *existing = doc.clone(),
            None => state.documents.push(doc.clone()),
        }
        Ok(())
    }
}
