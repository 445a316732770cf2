//! HTTP presenter.
//!
//! Sessions hold a model choice and a conversation; each turn returns the
//! notation plus links to the rendered MIDI and WAV under `/artifacts`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use llmchat::ConversationId;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::session::SessionStore;
use crate::turn::{Studio, TurnError};

pub const VIEWER_URL: &str = "https://notabc.app/abc-converter/";

#[derive(Clone)]
pub struct AppState {
    pub studio: Arc<Studio>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(studio: Arc<Studio>) -> Self {
        Self {
            studio,
            sessions: Arc::new(SessionStore::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/health", get(health))
        .route("/models", get(list_models))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}/turns", post(post_turn))
        .route("/sessions/{id}/history", get(session_history))
        .route("/artifacts/{name}", get(download_artifact))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON error body: `{ "error": message, "kind": kind }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn session_not_found(id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "session_not_found", format!("no session {id}"))
    }
}

impl From<TurnError> for ApiError {
    fn from(err: TurnError) -> Self {
        let status = match &err {
            TurnError::MissingFence
            | TurnError::MalformedHeader { .. }
            | TurnError::ContractViolation { .. }
            | TurnError::NotationParse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TurnError::NoFinalResponse { .. } => StatusCode::BAD_GATEWAY,
            TurnError::Gateway(llm_agent::AgentError::UnknownModel(_)) => StatusCode::BAD_REQUEST,
            TurnError::Gateway(llm_agent::AgentError::MissingApiKey { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TurnError::Gateway(_) => StatusCode::BAD_GATEWAY,
            TurnError::Synthesis(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.message,
            "kind": self.kind,
        }));
        (self.status, body).into_response()
    }
}

async fn serve_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Traditional Thai Melody Generation",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "health": "/health",
            "models": "/models",
            "sessions": "/sessions",
        },
        "viewer": VIEWER_URL,
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Serialize)]
struct ModelInfo<'a> {
    id: &'a str,
    display_name: &'a str,
    default: bool,
}

async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let config = &state.studio.config;
    let models: Vec<ModelInfo> = config
        .models
        .iter()
        .map(|m| ModelInfo {
            id: &m.id,
            display_name: &m.display_name,
            default: m.id == config.agent.default_model,
        })
        .collect();
    Json(serde_json::json!({ "models": models }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub model: Option<String>,
}

fn check_model(state: &AppState, id: &str) -> Result<(), ApiError> {
    match state.studio.config.model(id) {
        Some(_) => Ok(()),
        None => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "unknown_model",
            format!("unknown model {id}"),
        )),
    }
}

async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let model = request
        .model
        .unwrap_or_else(|| state.studio.config.agent.default_model.clone());
    check_model(&state, &model)?;

    let (id, _) = state.sessions.create(&model).await;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": id, "model": model })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub text: String,
    /// Switch the session to another model from this turn on.
    #[serde(default)]
    pub model: Option<String>,
}

#[tracing::instrument(skip_all, fields(session = %id))]
async fn post_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TurnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id: ConversationId = id.parse().map_err(|_| ApiError::session_not_found(&id))?;
    let handle = state
        .sessions
        .get(&session_id)
        .await
        .ok_or_else(|| ApiError::session_not_found(&id))?;

    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "empty_message",
            "message text is empty",
        ));
    }
    if let Some(model) = &request.model {
        check_model(&state, model)?;
    }

    let mut session = handle.lock().await;
    let model_id = request.model.unwrap_or_else(|| session.model_id.clone());
    let turn = state.studio.compose_turn(&model_id)?;
    // Only switch once the new model is usable.
    session.model_id = model_id;

    let result = turn.run(&mut session.history, text).await;

    match result {
        Ok(result) => {
            state.sessions.register(&result.artifacts).await;
            session.record_success(text, &result);
            Ok(Json(serde_json::json!({
                "title": result.composition.title,
                "notation": result.composition.body,
                "reply": result.reply,
                "refined_prompt": result.refined_prompt,
                "feedback": result.contract.feedback,
                "midi_url": format!("/artifacts/{}", result.artifacts.midi_name()),
                "wav_url": format!("/artifacts/{}", result.artifacts.wav_name()),
                "steps": result.steps,
                "tool_calls": result.tool_calls,
                "viewer": VIEWER_URL,
            })))
        }
        Err(err) => {
            tracing::warn!(kind = err.kind(), error = %err, "Turn failed");
            session.record_failure(text, &err);
            Err(err.into())
        }
    }
}

async fn session_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id: ConversationId = id.parse().map_err(|_| ApiError::session_not_found(&id))?;
    let handle = state
        .sessions
        .get(&session_id)
        .await
        .ok_or_else(|| ApiError::session_not_found(&id))?;

    let session = handle.lock().await;
    Ok(Json(serde_json::json!({
        "id": session.id(),
        "model": session.model_id,
        "turns": session.history.turns(),
        "transcript": session.transcript,
        "artifacts": session
            .artifacts
            .iter()
            .map(|a| serde_json::json!({ "midi": a.midi_name(), "wav": a.wav_name() }))
            .collect::<Vec<_>>(),
    })))
}

#[tracing::instrument(skip(state))]
async fn download_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::new(StatusCode::NOT_FOUND, "artifact_not_found", format!("no artifact {name}"));

    let path = state.sessions.artifact(&name).await.ok_or_else(not_found)?;
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("mid") => "audio/midi",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    };

    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Artifact vanished");
        not_found()
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    use anyhow::Context;

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("HTTP server failed")
}
