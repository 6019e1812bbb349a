use std::path::PathBuf;
use std::sync::Arc;

use civic_agents::{DialogueEngine, StaffDesk};
use civic_core::{ChatInput, DialogueState, IncidentStatus, Sender};
use civic_ml::CivicMlStack;
use civic_observability::AppMetrics;
use civic_retrieval::{load_kb_dir, KnowledgeRetriever};
use civic_storage::{IncidentRepository, KnowledgeRepository, Store};
use futures::future::join_all;

fn kb_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../kb")
}

struct Harness {
    engine: DialogueEngine<Store>,
    desk: StaffDesk<Store>,
    metrics: Arc<AppMetrics>,
}

async fn harness() -> Harness {
    let ml_stack = CivicMlStack::load_default();
    let retriever = Arc::new(KnowledgeRetriever::new(ml_stack.embedder.clone()));
    let store = Arc::new(Store::sqlite("sqlite::memory:").await.unwrap());

    for doc in load_kb_dir(&kb_root(), ml_stack.embedder.as_ref()).unwrap() {
        store.upsert_document(&doc).await.unwrap();
    }

    let metrics = AppMetrics::shared();
    Harness {
        engine: DialogueEngine::new(retriever.clone(), &ml_stack, store.clone(), metrics.clone()),
        desk: StaffDesk::new(store, retriever, metrics.clone()),
        metrics,
    }
}

fn input(session_id: &str, message: &str) -> ChatInput {
    ChatInput {
        session_id: Some(session_id.to_string()),
        message: message.to_string(),
        role: None,
    }
}

const REPORT_SCRIPT: [&str; 7] = [
    "I want to report a pothole",
    "chat",
    "Pothole on Elm",
    "road",
    "Elm Street and 3rd",
    "resident@example.com",
    "Wide enough to damage tyres",
];

#[tokio::test]
async fn sqlite_backed_report_flow_persists_everything() {
    let h = harness().await;

    let mut last = None;
    for message in REPORT_SCRIPT {
        last = Some(h.engine.handle_turn(input("elm-resident", message)).await.unwrap());
    }
    let last = last.unwrap();
    assert_eq!(last.confidence, 0.95);

    let incidents = h.engine.store().list_incidents(0, 10).await.unwrap();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.status, IncidentStatus::Open);
    assert_eq!(incident.title, "Pothole on Elm");
    assert_eq!(incident.location_text.as_deref(), Some("Elm Street and 3rd"));
    assert!(last.reply.contains(&incident.public_id));

    let transcript = h.engine.transcript("elm-resident").await.unwrap();
    assert_eq!(transcript.len(), 14);
    assert!(transcript
        .iter()
        .step_by(2)
        .all(|message| message.sender == Sender::Resident));
    assert!(transcript
        .iter()
        .skip(1)
        .step_by(2)
        .all(|message| message.sender == Sender::Bot));
    assert_eq!(
        h.engine.session_state("elm-resident").await.unwrap(),
        Some(DialogueState::Fresh)
    );

    let view = h.desk.incident_status(&incident.public_id).await.unwrap();
    assert_eq!(view.history.len(), 1);
    assert_eq!(h.metrics.snapshot().incidents_filed_total, 1);
}

#[tokio::test]
async fn staff_update_is_visible_through_chat() {
    let h = harness().await;
    for message in REPORT_SCRIPT {
        h.engine.handle_turn(input("tracker", message)).await.unwrap();
    }
    let public_id = h.engine.store().list_incidents(0, 1).await.unwrap()[0]
        .public_id
        .clone();

    h.desk
        .update_status(&public_id, "in_progress", Some("crew dispatched"))
        .await
        .unwrap();

    h.engine.handle_turn(input("tracker", "any progress?")).await.unwrap();
    let reply = h.engine.handle_turn(input("tracker", &public_id)).await.unwrap();
    assert_eq!(
        reply.reply,
        format!("The status of incident {} is: in_progress.", public_id)
    );

    let view = h.desk.incident_status(&public_id).await.unwrap();
    assert_eq!(view.history[1].note, "crew dispatched");
}

#[tokio::test]
async fn distinct_sessions_progress_independently() {
    let h = harness().await;

    let sessions = (0..4).map(|idx| format!("parallel-{idx}")).collect::<Vec<_>>();
    for message in REPORT_SCRIPT {
        let turns = sessions
            .iter()
            .map(|session| h.engine.handle_turn(input(session, message)));
        for reply in join_all(turns).await {
            reply.unwrap();
        }
    }

    let incidents = h.engine.store().list_incidents(0, 10).await.unwrap();
    assert_eq!(incidents.len(), 4);
    let mut ids = incidents
        .iter()
        .map(|incident| incident.public_id.clone())
        .collect::<Vec<_>>();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);

    for session in &sessions {
        assert_eq!(h.engine.transcript(session).await.unwrap().len(), 14);
    }
}

#[tokio::test]
async fn concurrent_turns_in_one_session_are_serialized() {
    let h = harness().await;
    for message in &REPORT_SCRIPT[..6] {
        h.engine.handle_turn(input("racer", message)).await.unwrap();
    }

    // both race to answer the last slot; only one may file
    let turns = (0..2).map(|_| h.engine.handle_turn(input("racer", "Deep and wide")));
    for reply in join_all(turns).await {
        reply.unwrap();
    }

    let incidents = h.engine.store().list_incidents(0, 10).await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(h.engine.transcript("racer").await.unwrap().len(), 16);
}

#[tokio::test]
async fn knowledge_answers_come_from_the_loaded_corpus() {
    let h = harness().await;

    let reply = h
        .engine
        .handle_turn(input("asker", "Where do I find water maintenance information?"))
        .await
        .unwrap();
    assert_eq!(reply.citations.len(), 1);
    assert_eq!(reply.citations[0].title, "Water Service Outages");
    assert_eq!(reply.confidence, 0.55);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.citations_total, 1);
    assert_eq!(snapshot.unanswered_queries_total, 0);
}
