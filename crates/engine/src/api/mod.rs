mod models;

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use deepresearch_common::types::ResearchRequest;
use deepresearch_common::{DeepResearchError, SessionId};

use crate::orchestrator::{Orchestrator, OrchestratorEvent};
use crate::store::Store;

use models::{ChatCompletionRequest, ErrorBody, HistoryResponse, ModelList, SessionSummaryList};

/// Shared state handed to every axum handler.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn Store>,
    pub metrics_handle: PrometheusHandle,
    pub start_time: chrono::DateTime<Utc>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/healthcheck", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/models", get(models_handler))
        .route("/v1/models", get(models_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/{id}", get(get_session_handler))
        .route("/sessions/{id}", delete(delete_session_handler))
        .route("/sessions/{id}/resume", post(resume_session_handler))
        .route("/sessions/{id}/history", get(history_handler))
        .route(
            "/sessions/{id}/rollback/{iteration}",
            post(rollback_handler),
        )
        .with_state(state)
}

impl IntoResponse for DeepResearchError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InputError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::IntegrityMismatch(_) => StatusCode::CONFLICT,
            Self::Config(_) | Self::StoreError(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ProviderError(_) | Self::FetchError { .. } | Self::SchedulerCancelled(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Serialization(_) => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": (Utc::now() - state.start_time).num_seconds(),
    }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

async fn models_handler() -> impl IntoResponse {
    Json(ModelList::single_deep_researcher(Utc::now().timestamp()))
}

/// `POST /v1/chat/completions`. Accepted as raw JSON first so a
/// `messages` shape that matches none of the untagged variants can be
/// turned into a 422 response rather than axum's 400 extractor rejection.
async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorBody {
                    error: format!("invalid request body: {e}"),
                }),
            )
                .into_response()
        }
    };

    let parsed: ChatCompletionRequest = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorBody {
                    error: format!("invalid `messages` shape: {e}"),
                }),
            )
                .into_response()
        }
    };

    let request: ResearchRequest = parsed.into();

    let (tx, rx) = mpsc::channel::<OrchestratorEvent>(32);
    let orchestrator = Arc::clone(&state.orchestrator);
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();

    tokio::spawn(async move {
        orchestrator.run(request, None, tx, run_cancel).await;
    });

    let stream =
        ReceiverStream::new(rx).map(|event| Ok::<_, std::convert::Infallible>(event_to_sse(event)));

    Sse::new(stream)
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response()
}

fn event_to_sse(event: OrchestratorEvent) -> Event {
    match event {
        OrchestratorEvent::SessionStarted(id) => Event::default().data(format!("SESSION_ID:{id}")),
        OrchestratorEvent::Content(text) => {
            let payload = serde_json::json!({
                "choices": [{ "delta": { "content": text } }]
            });
            Event::default().data(payload.to_string())
        }
        OrchestratorEvent::Done => Event::default().data("[DONE]"),
    }
}

async fn list_sessions_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list(None).await {
        Ok(sessions) => Json(SessionSummaryList {
            sessions,
            start_time: state.start_time.to_rfc3339(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, DeepResearchError> {
    SessionId::from_str(raw).map_err(|_| DeepResearchError::InputError(format!("invalid session id: {raw}")))
}

async fn get_session_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    match state.store.load(id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    match state.store.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /sessions/{id}/resume`. Loads the persisted state and starts a
/// *new* research run with it — partial iterations are never resumed
/// mid-link (§6.4, §9).
async fn resume_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    let session = match state.store.resume(id).await {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };

    let (tx, rx) = mpsc::channel::<OrchestratorEvent>(32);
    let orchestrator = Arc::clone(&state.orchestrator);
    let user_id = session.user_id.clone();
    let cancel = CancellationToken::new();

    tokio::spawn(async move {
        orchestrator.run(session.settings, user_id, tx, cancel).await;
    });

    let stream =
        ReceiverStream::new(rx).map(|event| Ok::<_, std::convert::Infallible>(event_to_sse(event)));
    Sse::new(stream)
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response()
}

async fn history_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    match state.store.history(id).await {
        Ok(history) => Json(HistoryResponse { history }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn rollback_handler(
    State(state): State<Arc<AppState>>,
    Path((id, iteration)): Path<(String, i32)>,
) -> Response {
    let id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    match state.store.rollback(id, iteration).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => e.into_response(),
    }
}
