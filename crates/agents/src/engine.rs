use std::sync::Arc;
use std::time::Instant;

use civic_core::replies::{incident_filed_reply, knowledge_reply, status_reply};
use civic_core::{
    generate_public_id, normalize_text, plan_turn, validate_message, validate_session_id,
    ChatInput, ChatReply, Citation, Conversation, DialogueState, Incident, IncidentStatus,
    Message, NewIncident, NewMessage, Sender, TurnOutcome,
};
use civic_ml::{CivicMlStack, IntentClassifier};
use civic_observability::AppMetrics;
use civic_retrieval::{KnowledgeRetriever, RetrievalConfig};
use civic_storage::{
    ConversationStore, IncidentRepository, KnowledgeRepository, StorageError, TurnCommit,
    PUBLIC_ID_ATTEMPTS,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::session_lock::SessionLocks;
use crate::TurnError;

/// What a turn will say, before it is committed.
struct ResolvedTurn {
    reply: String,
    citations: Vec<Citation>,
    confidence: f32,
    incident: Option<NewIncident>,
}

#[derive(Clone)]
pub struct DialogueEngine<S>
where
    S: ConversationStore + IncidentRepository + KnowledgeRepository,
{
    retriever: Arc<KnowledgeRetriever>,
    classifier: Arc<dyn IntentClassifier>,
    store: Arc<S>,
    metrics: Arc<AppMetrics>,
    retrieval: RetrievalConfig,
    locks: Arc<SessionLocks>,
}

impl<S> DialogueEngine<S>
where
    S: ConversationStore + IncidentRepository + KnowledgeRepository,
{
    pub fn new(
        retriever: Arc<KnowledgeRetriever>,
        ml_stack: &CivicMlStack,
        store: Arc<S>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            retriever,
            classifier: ml_stack.classifier.clone(),
            store,
            metrics,
            retrieval: RetrievalConfig::chat(),
            locks: Arc::new(SessionLocks::new()),
        }
    }

    pub fn with_retrieval_config(mut self, config: RetrievalConfig) -> Self {
        self.retrieval = config;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Runs one turn. Turns on the same session are serialized; a failed turn
    /// leaves the stored conversation exactly as it was.
    #[instrument(skip(self, input))]
    pub async fn handle_turn(&self, input: ChatInput) -> Result<ChatReply, TurnError> {
        let started = Instant::now();
        self.metrics.inc_turn();

        let result = self.run_turn(input).await;

        self.metrics.observe_latency(started.elapsed());
        if let Err(error) = &result {
            self.metrics.inc_failed_turn();
            warn!(error = %error, "turn failed");
        }
        result
    }

    /// Current dialogue state, `None` when the session is unknown.
    pub async fn session_state(&self, session_id: &str) -> anyhow::Result<Option<DialogueState>> {
        Ok(self
            .store
            .find_by_session(session_id)
            .await?
            .map(|conversation| conversation.state))
    }

    pub async fn transcript(&self, session_id: &str) -> anyhow::Result<Vec<Message>> {
        match self.store.find_by_session(session_id).await? {
            Some(conversation) => self.store.messages(&conversation.id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn run_turn(&self, input: ChatInput) -> Result<ChatReply, TurnError> {
        validate_message(&input.message)?;
        let session_id = match input.session_id.as_deref().map(str::trim) {
            Some(session_id) if !session_id.is_empty() => {
                validate_session_id(session_id)?.to_string()
            }
            _ => Uuid::new_v4().to_string(),
        };

        let _guard = self.locks.acquire(&session_id).await;

        let conversation = self
            .store
            .find_by_session(&session_id)
            .await?
            .unwrap_or_else(|| Conversation::new(&session_id));

        let text = normalize_text(&input.message);
        let classifier = self.classifier.as_ref();
        let plan = plan_turn(&conversation.state, &text, |message| {
            let prediction = classifier.predict(message);
            (prediction.intent, prediction.confidence)
        });

        let resolved = self.resolve(plan.outcome, plan.confidence).await?;
        let next = Conversation {
            state: plan.next_state,
            ..conversation
        };
        let user_message = NewMessage {
            sender: input.role.unwrap_or(Sender::Resident),
            text: input.message,
        };
        let reply = self.commit(next, user_message, &resolved).await?;

        info!(
            session_id = %session_id,
            intent = plan.intent.map(|intent| intent.as_str()),
            citations = resolved.citations.len(),
            confidence = resolved.confidence,
            "turn handled"
        );

        Ok(ChatReply {
            reply,
            citations: resolved.citations,
            confidence: resolved.confidence,
            session_id,
        })
    }

    async fn resolve(&self, outcome: TurnOutcome, confidence: f32) -> Result<ResolvedTurn, TurnError> {
        let resolved = match outcome {
            TurnOutcome::Reply(reply) => ResolvedTurn {
                reply,
                citations: Vec::new(),
                confidence,
                incident: None,
            },
            TurnOutcome::SearchKnowledge { query } => {
                let docs = self.store.list_documents().await?;
                let retrieval = self.retriever.retrieve(&query, &docs, &self.retrieval);
                self.metrics.add_citations(retrieval.citations.len());

                ResolvedTurn {
                    reply: knowledge_reply(&retrieval.citations),
                    citations: retrieval.citations,
                    confidence: retrieval.confidence,
                    incident: None,
                }
            }
            TurnOutcome::FileIncident(incident) => ResolvedTurn {
                // reply carries the public id, assigned at commit
                reply: String::new(),
                citations: Vec::new(),
                confidence,
                incident: Some(incident),
            },
            TurnOutcome::LookupIncident { public_id } => {
                let incident = self.store.find_by_public_id(&public_id).await?;
                self.metrics.inc_status_lookup();

                ResolvedTurn {
                    reply: status_reply(incident.as_ref()),
                    citations: Vec::new(),
                    confidence,
                    incident: None,
                }
            }
        };

        Ok(resolved)
    }

    /// Writes the turn as one unit. A public id collision redraws the id and
    /// retries; any other failure aborts the turn.
    async fn commit(
        &self,
        conversation: Conversation,
        user_message: NewMessage,
        resolved: &ResolvedTurn,
    ) -> Result<String, TurnError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let incident = resolved
                .incident
                .clone()
                .map(|new| Incident::from_new(new, generate_public_id(), IncidentStatus::Open));
            let reply = match &incident {
                Some(incident) => incident_filed_reply(incident),
                None => resolved.reply.clone(),
            };

            let commit = TurnCommit {
                conversation: conversation.clone(),
                messages: vec![
                    user_message.clone(),
                    NewMessage {
                        sender: Sender::Bot,
                        text: reply.clone(),
                    },
                ],
                incident: incident.clone(),
            };

            match self.store.commit_turn(commit).await {
                Ok(()) => {
                    if let Some(incident) = &incident {
                        self.metrics.inc_incident_filed();
                        info!(public_id = %incident.public_id, "incident filed from chat");
                    }
                    return Ok(reply);
                }
                Err(error)
                    if incident.is_some()
                        && attempt < PUBLIC_ID_ATTEMPTS
                        && matches!(
                            error.downcast_ref::<StorageError>(),
                            Some(StorageError::DuplicatePublicId(_))
                        ) =>
                {
                    warn!(attempt, "public id collision, drawing a new one");
                }
                Err(error) => return Err(TurnError::Dependency(error)),
            }
        }
    }
}
