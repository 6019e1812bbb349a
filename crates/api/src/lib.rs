mod config;
mod error;
mod rate_limit;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Json, Path as AxumPath, Query, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{body::Body, Router};
use chrono::{DateTime, Utc};
use civic_agents::{
    DialogueEngine, StaffDesk, DEFAULT_INCIDENT_PAGE_SIZE, DEFAULT_KB_PAGE_SIZE,
};
use civic_core::{
    ChatInput, ChatReply, Incident, IncidentHistoryEntry, IncidentStatus, IncidentSubmission,
    KbSearchHit, Sender,
};
use civic_ml::CivicMlStack;
use civic_observability::{AppMetrics, MetricsSnapshot};
use civic_retrieval::{load_kb_dir, KnowledgeRetriever};
use civic_storage::{KnowledgeRepository, Store};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::ApiConfig;
pub use error::ApiError;
pub use rate_limit::IpRateLimiter;

const MAX_BODY_BYTES: usize = 64 * 1024;
const STAFF_PREFIX: &str = "/v1/staff/";

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<DialogueEngine<Store>>,
    pub desk: Arc<StaffDesk<Store>>,
    pub metrics: Arc<AppMetrics>,
    pub staff_api_key: String,
    pub limiter: IpRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
    pub retrieval: RetrievalStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalStats {
    pub documents: usize,
    pub embedding_model: &'static str,
    pub strategy: &'static str,
    pub store: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    metrics: MetricsSnapshot,
    retrieval: RetrievalStats,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateIncidentRequest {
    title: String,
    description: String,
    category: String,
    #[serde(default)]
    location_text: Option<String>,
    #[serde(default)]
    contact_email: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateIncidentResponse {
    incident_id: String,
    status: IncidentStatus,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct IncidentStatusResponse {
    incident_id: String,
    status: IncidentStatus,
    last_update: DateTime<Utc>,
    history: Vec<IncidentHistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct IncidentListItem {
    incident_id: String,
    title: String,
    category: String,
    status: IncidentStatus,
    location_text: Option<String>,
    created_at: DateTime<Utc>,
    last_update: DateTime<Utc>,
}

impl From<Incident> for IncidentListItem {
    fn from(incident: Incident) -> Self {
        Self {
            incident_id: incident.public_id,
            title: incident.title,
            category: incident.category,
            status: incident.status,
            location_text: incident.location_text,
            created_at: incident.created_at,
            last_update: incident.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct IncidentListResponse {
    page: usize,
    page_size: usize,
    items: Vec<IncidentListItem>,
}

#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    status: String,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusUpdateResponse {
    incident_id: String,
    status: IncidentStatus,
    last_update: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct KbSearchQuery {
    #[serde(default)]
    query: String,
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct KbSearchResponse {
    query: String,
    page: usize,
    page_size: usize,
    results: Vec<KbSearchHit>,
}

/// Builds the router from `CIVIC_*` settings, serving the knowledge base found
/// under `kb_root`.
pub async fn build_app(kb_root: impl AsRef<Path>) -> Result<Router> {
    let config = ApiConfig::from_env().with_kb_root(kb_root.as_ref());
    build_app_with_config(config).await
}

pub async fn build_app_with_config(config: ApiConfig) -> Result<Router> {
    let state = build_state(&config).await?;
    Ok(build_router(state))
}

pub async fn build_state(config: &ApiConfig) -> Result<ApiState> {
    let metrics = AppMetrics::shared();
    let ml_stack = CivicMlStack::load_default();
    let retriever = Arc::new(KnowledgeRetriever::new(ml_stack.embedder.clone()));

    let store = match &config.database_url {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };

    let docs = load_kb_dir(&config.kb_root, ml_stack.embedder.as_ref())
        .with_context(|| format!("failed loading knowledge base from {}", config.kb_root.display()))?;
    for doc in &docs {
        store
            .upsert_document(doc)
            .await
            .with_context(|| format!("failed storing knowledge document {}", doc.id))?;
    }
    info!(
        kb_root = %config.kb_root.display(),
        documents = docs.len(),
        store = store.backend_name(),
        "knowledge base loaded"
    );

    let retrieval = RetrievalStats {
        documents: docs.len(),
        embedding_model: retriever.model_name(),
        strategy: config.chat_retrieval.strategy.as_str(),
        store: store.backend_name(),
    };

    let store = Arc::new(store);
    let engine = DialogueEngine::new(retriever.clone(), &ml_stack, store.clone(), metrics.clone())
        .with_retrieval_config(config.chat_retrieval);
    let desk = StaffDesk::new(store, retriever, metrics.clone())
        .with_search_config(config.staff_retrieval);

    Ok(ApiState {
        engine: Arc::new(engine),
        desk: Arc::new(desk),
        metrics,
        staff_api_key: config.staff_api_key.clone(),
        limiter: IpRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
        allowed_origins: Arc::new(config.allowed_origins.clone()),
        retrieval,
    })
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat/message", post(chat_message))
        .route("/v1/incidents", post(create_incident))
        .route("/v1/incidents/:public_id/status", get(incident_status))
        .route("/v1/staff/incidents", get(staff_list_incidents))
        .route("/v1/staff/incidents/:public_id", patch(staff_update_status))
        .route("/v1/staff/kb/search", get(staff_kb_search))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: Utc::now().to_rfc3339(),
        metrics: state.metrics.snapshot(),
        retrieval: state.retrieval.clone(),
    };
    (StatusCode::OK, Json(payload))
}

async fn chat_message(
    State(state): State<ApiState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload?;
    let input = ChatInput {
        session_id: request.session_id,
        message: request.message,
        role: request.role.as_deref().and_then(Sender::parse),
    };

    let reply = state.engine.handle_turn(input).await?;
    Ok(Json(reply))
}

async fn create_incident(
    State(state): State<ApiState>,
    payload: Result<Json<CreateIncidentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let incident = state
        .desk
        .create_incident(IncidentSubmission {
            title: request.title,
            description: request.description,
            category: request.category,
            location_text: request.location_text,
            contact_email: request.contact_email,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateIncidentResponse {
            incident_id: incident.public_id,
            status: incident.status,
            created_at: incident.created_at,
        }),
    ))
}

async fn incident_status(
    State(state): State<ApiState>,
    AxumPath(public_id): AxumPath<String>,
) -> Result<Json<IncidentStatusResponse>, ApiError> {
    let view = state.desk.incident_status(&public_id).await?;

    Ok(Json(IncidentStatusResponse {
        incident_id: view.public_id,
        status: view.status,
        last_update: view.last_update,
        history: view.history,
    }))
}

async fn staff_list_incidents(
    State(state): State<ApiState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<IncidentListResponse>, ApiError> {
    let Query(query) = query?;
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_INCIDENT_PAGE_SIZE);
    let incidents = state.desk.list_incidents(page, page_size).await?;

    Ok(Json(IncidentListResponse {
        page,
        page_size,
        items: incidents.into_iter().map(IncidentListItem::from).collect(),
    }))
}

async fn staff_update_status(
    State(state): State<ApiState>,
    AxumPath(public_id): AxumPath<String>,
    payload: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<Json<StatusUpdateResponse>, ApiError> {
    let Json(request) = payload?;
    let incident = state
        .desk
        .update_status(&public_id, &request.status, request.note.as_deref())
        .await?;

    Ok(Json(StatusUpdateResponse {
        incident_id: incident.public_id,
        status: incident.status,
        last_update: incident.updated_at,
    }))
}

async fn staff_kb_search(
    State(state): State<ApiState>,
    query: Result<Query<KbSearchQuery>, QueryRejection>,
) -> Result<Json<KbSearchResponse>, ApiError> {
    let Query(query) = query?;
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_KB_PAGE_SIZE);
    let results = state.desk.kb_search(&query.query, page, page_size).await?;

    Ok(Json(KbSearchResponse {
        query: query.query,
        page,
        page_size,
        results,
    }))
}

fn is_staff_endpoint(path: &str) -> bool {
    path.starts_with(STAFF_PREFIX)
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if request.method() == Method::OPTIONS || !is_staff_endpoint(path) {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if header_key != state.staff_api_key {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "unauthorized",
                "message": "missing or invalid x-api-key"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let ip = request_ip(&request);
    if !state.limiter.allow(&ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "rate_limited",
                "message": "rate limit exceeded for this IP"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        header::HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'; base-uri 'none'"),
    );

    response
}
