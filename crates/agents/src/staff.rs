use std::sync::Arc;

use chrono::{DateTime, Utc};
use civic_core::{
    validate_page, validate_submission, Incident, IncidentHistoryEntry, IncidentStatus,
    IncidentSubmission, KbSearchHit, ValidationError,
};
use civic_observability::AppMetrics;
use civic_retrieval::{KnowledgeRetriever, RetrievalConfig};
use civic_storage::{IncidentRepository, KnowledgeRepository};
use serde::Serialize;
use tracing::{info, instrument};

use crate::StaffError;

pub const DEFAULT_INCIDENT_PAGE_SIZE: usize = 20;
pub const MAX_INCIDENT_PAGE_SIZE: usize = 100;
pub const DEFAULT_KB_PAGE_SIZE: usize = 10;
pub const MAX_KB_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct IncidentStatusView {
    pub public_id: String,
    pub status: IncidentStatus,
    pub last_update: DateTime<Utc>,
    /// Oldest first.
    pub history: Vec<IncidentHistoryEntry>,
}

/// Incident and knowledge-base operations outside the chat flow: direct
/// filing, status lookup and the staff workflow.
#[derive(Clone)]
pub struct StaffDesk<S>
where
    S: IncidentRepository + KnowledgeRepository,
{
    store: Arc<S>,
    retriever: Arc<KnowledgeRetriever>,
    search: RetrievalConfig,
    metrics: Arc<AppMetrics>,
}

impl<S> StaffDesk<S>
where
    S: IncidentRepository + KnowledgeRepository,
{
    pub fn new(store: Arc<S>, retriever: Arc<KnowledgeRetriever>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            store,
            retriever,
            search: RetrievalConfig::staff(),
            metrics,
        }
    }

    pub fn with_search_config(mut self, config: RetrievalConfig) -> Self {
        self.search = config;
        self
    }

    #[instrument(skip(self, submission))]
    pub async fn create_incident(&self, submission: IncidentSubmission) -> Result<Incident, StaffError> {
        let new = validate_submission(submission)?;
        let incident = self.store.create_incident(new, IncidentStatus::New).await?;
        self.metrics.inc_incident_filed();

        info!(public_id = %incident.public_id, category = %incident.category, "incident created");
        Ok(incident)
    }

    pub async fn incident_status(&self, public_id: &str) -> Result<IncidentStatusView, StaffError> {
        let public_id = public_id.trim();
        let incident = self
            .store
            .find_by_public_id(public_id)
            .await?
            .ok_or_else(|| StaffError::NotFound(public_id.to_string()))?;

        let mut history = self.store.incident_history(public_id).await?;
        history.sort_by_key(|entry| entry.timestamp);
        self.metrics.inc_status_lookup();

        Ok(IncidentStatusView {
            public_id: incident.public_id,
            status: incident.status,
            last_update: incident.updated_at,
            history,
        })
    }

    pub async fn list_incidents(&self, page: usize, page_size: usize) -> Result<Vec<Incident>, StaffError> {
        validate_page(page, page_size, MAX_INCIDENT_PAGE_SIZE)?;
        let offset = (page - 1).saturating_mul(page_size);
        Ok(self.store.list_incidents(offset, page_size).await?)
    }

    #[instrument(skip(self, note))]
    pub async fn update_status(
        &self,
        public_id: &str,
        status: &str,
        note: Option<&str>,
    ) -> Result<Incident, StaffError> {
        let status = IncidentStatus::parse(status)
            .ok_or_else(|| ValidationError::UnknownStatus(status.to_string()))?;
        let incident = self
            .store
            .update_status(public_id.trim(), status, note)
            .await?;

        info!(public_id = %incident.public_id, status = status.as_str(), "incident status updated");
        Ok(incident)
    }

    /// Knowledge-base search for staff: stricter threshold, paginated, one hit
    /// per document.
    pub async fn kb_search(
        &self,
        query: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<KbSearchHit>, StaffError> {
        validate_page(page, page_size, MAX_KB_PAGE_SIZE)?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let docs = self.store.list_documents().await?;
        Ok(self
            .retriever
            .search_page(query, &docs, &self.search, page, page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_ml::CivicMlStack;
    use civic_storage::MemoryStore;

    async fn desk() -> StaffDesk<MemoryStore> {
        let ml_stack = CivicMlStack::load_default();
        let retriever = Arc::new(KnowledgeRetriever::new(ml_stack.embedder.clone()));
        let store = Arc::new(MemoryStore::new());

        let doc = retriever.index_document(
            "trash",
            "Trash Collection Schedule",
            "Trash collection happens every Monday and Thursday at 8am in residential areas.",
            None,
        );
        store.upsert_document(&doc).await.unwrap();

        StaffDesk::new(store, retriever, AppMetrics::shared())
    }

    fn submission(title: &str) -> IncidentSubmission {
        IncidentSubmission {
            title: title.to_string(),
            description: "Overflowing bins on the corner".to_string(),
            category: "waste_management".to_string(),
            location_text: None,
            contact_email: None,
        }
    }

    #[tokio::test]
    async fn direct_incidents_start_new_with_history() {
        let desk = desk().await;
        let incident = desk.create_incident(submission("Bins")).await.unwrap();
        assert_eq!(incident.status, IncidentStatus::New);

        let view = desk.incident_status(&incident.public_id).await.unwrap();
        assert_eq!(view.status, IncidentStatus::New);
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.history[0].note, "Incident created");
    }

    #[tokio::test]
    async fn invalid_submission_is_rejected() {
        let desk = desk().await;
        let error = desk.create_incident(submission("  ")).await.unwrap_err();
        assert!(matches!(
            error,
            StaffError::Invalid(ValidationError::EmptyField { field: "title" })
        ));
    }

    #[tokio::test]
    async fn unknown_incident_is_not_found() {
        let desk = desk().await;
        assert!(matches!(
            desk.incident_status("ZZZZ0000").await.unwrap_err(),
            StaffError::NotFound(_)
        ));
        assert!(matches!(
            desk.update_status("ZZZZ0000", "open", None).await.unwrap_err(),
            StaffError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn status_update_validates_and_records() {
        let desk = desk().await;
        let incident = desk.create_incident(submission("Bins")).await.unwrap();

        let error = desk
            .update_status(&incident.public_id, "exploded", None)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            StaffError::Invalid(ValidationError::UnknownStatus(_))
        ));

        let updated = desk
            .update_status(&incident.public_id, "resolved", None)
            .await
            .unwrap();
        assert_eq!(updated.status, IncidentStatus::Resolved);

        let view = desk.incident_status(&incident.public_id).await.unwrap();
        assert_eq!(view.history.len(), 2);
        assert_eq!(view.history[1].note, "Status changed to resolved");
    }

    #[tokio::test]
    async fn incidents_are_paginated() {
        let desk = desk().await;
        for idx in 0..3 {
            desk.create_incident(submission(&format!("Bins {}", idx)))
                .await
                .unwrap();
        }

        let first = desk.list_incidents(1, 2).await.unwrap();
        let second = desk.list_incidents(2, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].title, "Bins 2");
        assert!(matches!(
            desk.list_incidents(0, 2).await.unwrap_err(),
            StaffError::Invalid(ValidationError::OutOfRange { field: "page", .. })
        ));
        assert!(desk.list_incidents(1, 101).await.is_err());
    }

    #[tokio::test]
    async fn kb_search_applies_staff_threshold() {
        let desk = desk().await;

        let hits = desk
            .kb_search("trash collection Monday Thursday", 1, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "trash");
        assert!(hits[0].score > 0.3);

        assert!(desk.kb_search("when is trash collection", 1, 10).await.unwrap().is_empty());
        assert!(desk.kb_search("  ", 1, 10).await.unwrap().is_empty());
        assert!(desk.kb_search("trash", 1, 51).await.is_err());
    }
}
