//! Login and session endpoints

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::session::{SessionContext, SessionToken};

use super::bearer_token;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

fn require_token(headers: &HeaderMap) -> Result<&str> {
    bearer_token(headers).ok_or_else(|| Error::Unauthorized("missing bearer token".to_string()))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<SessionToken>> {
    let token = state
        .sessions()
        .authenticate(&request.username, &request.password)
        .await?;
    Ok(Json(token))
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<LogoutResponse>> {
    let token = require_token(&headers)?;
    let logged_out = state.sessions().invalidate(token).await?;
    Ok(Json(LogoutResponse { logged_out }))
}

/// GET /session - Current session context
pub async fn current(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<SessionContext>> {
    let token = require_token(&headers)?;
    Ok(Json(state.sessions().validate(token).await?))
}

/// POST /session/reset - Clear per-session state, keeping the login
pub async fn reset(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<SessionContext>> {
    let token = require_token(&headers)?;
    let mut context = state.sessions().validate(token).await?;
    context.reset();
    state.sessions().save(token, context.clone()).await?;
    Ok(Json(context))
}
