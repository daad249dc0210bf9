//! HTTP serving boundary for the cached engine.
//!
//! A thin axum layer: each route maps one request onto the engine and
//! serializes the outcome. All policy (screening, caching, batching)
//! lives below in [`CachedEngine`]; the boundary only authenticates,
//! validates shapes, caps `max_tokens`, and translates errors to
//! status codes:
//!
//! | outcome | status |
//! |---|---|
//! | guardrail block (input or output) | 403, structured reason |
//! | queue timeout | 504 |
//! | invalid body | 400 |
//! | missing/incorrect bearer token | 401 |
//! | streaming requested | 501 (transport binding not implemented) |
//! | anything else | 500 `{error, status: "error"}` |

pub mod config;
pub mod ingest;

pub use config::Config;

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::CachedEngine;
use crate::types::GenerationParams;
use crate::MimirError;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<CachedEngine>,
    auth_token: Option<String>,
    max_tokens_cap: usize,
}

impl AppState {
    /// Bundle an engine with the boundary settings.
    pub fn new(engine: Arc<CachedEngine>, config: &config::ServerConfig) -> Self {
        Self {
            engine,
            auth_token: config.auth_token.clone(),
            max_tokens_cap: config.max_tokens_cap,
        }
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/documents/upload", post(upload_documents))
        .route("/api/documents/clear", post(clear_documents))
        .route("/api/model/info", get(model_info))
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, address: &str) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|e| MimirError::Configuration(format!("bind {address}: {e}")))?;
    info!(%address, "mimir serving boundary listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| MimirError::Configuration(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: Option<String>,
    max_tokens: Option<usize>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    #[serde(default)]
    stream: bool,
    #[serde(default = "default_use_cache")]
    use_cache: bool,
}

fn default_use_cache() -> bool {
    true
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.auth_token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "authentication required", "status": "error" })),
        )
            .into_response())
    }
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }

    let Some(message) = body.message.filter(|m| !m.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing 'message' in request body", "status": "error" })),
        )
            .into_response();
    };

    if body.stream {
        return (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({ "error": "streaming not yet implemented", "status": "error" })),
        )
            .into_response();
    }

    let mut params = GenerationParams::default();
    params.max_tokens = body
        .max_tokens
        .unwrap_or(state.max_tokens_cap)
        .min(state.max_tokens_cap);
    if let Some(temperature) = body.temperature {
        params.temperature = temperature;
    }
    if let Some(top_p) = body.top_p {
        params.top_p = top_p;
    }

    match state.engine.generate(&message, params, body.use_cache).await {
        Ok(reply) if reply.is_blocked() => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "response blocked by security guardrails",
                "status": "blocked",
                "security": {
                    "validated": false,
                    "warnings": reply.warnings,
                    "confidence": reply.confidence,
                    "asvs_compliance": reply.asvs_compliance,
                },
            })),
        )
            .into_response(),
        Ok(reply) => (
            StatusCode::OK,
            Json(json!({
                "response": reply.response,
                "status": reply.status,
                "tokens_generated": reply.tokens_generated(),
                "cache_hit": reply.cache_hit,
                "similarity": reply.similarity,
                "security": {
                    "validated": true,
                    "warnings": reply.warnings,
                    "confidence": reply.confidence,
                    "asvs_compliance": reply.asvs_compliance,
                },
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn upload_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }

    let mut added = 0usize;
    let mut sources: Vec<String> = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("malformed multipart body: {e}"),
                                 "status": "error" })),
                )
                    .into_response();
            }
        };

        let filename = field.file_name().unwrap_or("upload.txt").to_string();
        if !ingest::is_supported(&filename) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": format!("unsupported file type: {filename}"),
                    "allowed": ingest::ALLOWED_EXTENSIONS,
                    "status": "error",
                })),
            )
                .into_response();
        }

        let text = match field.text().await {
            Ok(text) => text,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("unreadable upload: {e}"), "status": "error" })),
                )
                    .into_response();
            }
        };

        let chunks = ingest::chunk_text(&text, &filename);
        match state.engine.retrieval().add(chunks).await {
            Ok(count) => {
                added += count;
                sources.push(filename);
            }
            Err(e) => return error_response(e),
        }
    }

    (
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "chunks_added": added,
            "sources": sources,
            "total_chunks": state.engine.retrieval().len(),
        })),
    )
        .into_response()
}

async fn clear_documents(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    state.engine.retrieval().clear();
    (StatusCode::OK, Json(json!({ "status": "cleared" }))).into_response()
}

async fn model_info(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }
    let engine = &state.engine;
    (
        StatusCode::OK,
        Json(json!({
            "model": { "loaded": engine.model_loaded() },
            "cache": engine.cache().stats(),
            "batcher": engine.batcher().stats(),
            "retrieval": { "chunks": engine.retrieval().len() },
            "performance": engine.stats(),
        })),
    )
        .into_response()
}

fn error_response(error: MimirError) -> Response {
    match &error {
        MimirError::GuardrailBlocked {
            threat,
            patterns,
            asvs,
        } => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": error.to_string(),
                "threat_type": threat,
                "patterns": patterns,
                "asvs_compliance": asvs,
                "status": "blocked",
            })),
        )
            .into_response(),
        MimirError::QueueTimeout { .. } => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({ "error": error.to_string(), "status": "error" })),
        )
            .into_response(),
        MimirError::InvalidInput(_) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": error.to_string(), "status": "error" })),
        )
            .into_response(),
        MimirError::AuthDenied => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": error.to_string(), "status": "error" })),
        )
            .into_response(),
        MimirError::Unsupported(_) | MimirError::NotImplemented(_) => (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({ "error": error.to_string(), "status": "error" })),
        )
            .into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": error.to_string(), "status": "error" })),
        )
            .into_response(),
    }
}
