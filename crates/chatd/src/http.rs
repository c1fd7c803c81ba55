//! HTTP surface: login, recent history, sample generation, health.
//!
//! Error responses are JSON `{ "error": <message>, "status": <code> }`.
//! Internal failures never expose their cause to the caller.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chat_core::{Message, UserId};

use crate::auth::{AuthError, AuthService};
use crate::generator::{generate_messages, DEFAULT_SAMPLE_COUNT, DEFAULT_SAMPLE_USER};
use crate::service::DEFAULT_MESSAGE_LIMIT;
use crate::session::ChatContext;

/// Upper bound for one generate request.
pub const MAX_SAMPLE_COUNT: usize = 10_000;

// ============================================================================
// State and errors
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub ctx: ChatContext,
    pub auth: Arc<AuthService>,
}

impl AppState {
    pub fn new(ctx: ChatContext, auth: Arc<AuthService>) -> Self {
        Self { ctx, auth }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateRequest {
    pub count: Option<usize>,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerateResponse {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/messages", get(recent_messages))
        .route("/api/messages/generate", post(generate))
        .route("/health", get(health))
        .with_state(state)
}

/// Serves `router` on `listener` until `cancel_token` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    cancel_token: CancellationToken,
) -> std::io::Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// The request body is the raw username.
async fn login(State(state): State<AppState>, body: String) -> Result<Json<LoginResponse>, ApiError> {
    if body.trim().is_empty() {
        warn!("Login attempt with empty username");
        return Err(ApiError::BadRequest("Username is required".into()));
    }

    match state.auth.login(&body).await {
        Ok(user) => {
            info!(user_id = %user.id, username = %user.username, "User logged in");
            Ok(Json(LoginResponse {
                user_id: user.id,
                username: user.username,
            }))
        }
        Err(AuthError::EmptyUsername) => Err(ApiError::BadRequest("Username is required".into())),
        Err(e) => {
            error!(error = %e, "Error during login");
            Err(ApiError::Internal("An error occurred during authentication".into()))
        }
    }
}

async fn recent_messages(State(state): State<AppState>) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .ctx
        .service
        .get_recent_messages(DEFAULT_MESSAGE_LIMIT)
        .await
        .map_err(|e| {
            error!(error = %e, "Error fetching recent messages");
            ApiError::Internal("An error occurred while fetching messages".into())
        })?;

    Ok(Json(Vec::clone(&messages)))
}

/// Body is optional; an empty body uses the defaults.
async fn generate(State(state): State<AppState>, body: Bytes) -> Result<Json<GenerateResponse>, ApiError> {
    let request: GenerateRequest = if body.iter().all(u8::is_ascii_whitespace) {
        GenerateRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };

    let count = request.count.unwrap_or(DEFAULT_SAMPLE_COUNT);
    if count > MAX_SAMPLE_COUNT {
        return Err(ApiError::BadRequest(format!("count must be at most {MAX_SAMPLE_COUNT}")));
    }
    let user_id = request.user_id.unwrap_or(DEFAULT_SAMPLE_USER);

    let exists = state
        .ctx
        .service
        .store()
        .find_user_by_id(user_id)
        .await
        .map_err(|e| {
            error!(error = %e, "Error looking up sample user");
            ApiError::Internal("An error occurred while generating messages".into())
        })?;
    if exists.is_none() {
        return Err(ApiError::NotFound(format!("User {user_id} not found")));
    }

    info!(count, user_id = %user_id, "Generating sample messages");
    let stored = state
        .ctx
        .service
        .add_messages(generate_messages(count, user_id, Utc::now()))
        .await
        .map_err(|e| {
            error!(error = %e, "Error generating messages");
            ApiError::Internal("An error occurred while generating messages".into())
        })?;

    Ok(Json(GenerateResponse { count: stored.len() }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        connections: state.ctx.registry.connection_count().await,
    })
}
