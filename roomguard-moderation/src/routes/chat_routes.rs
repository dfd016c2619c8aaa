use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use roomguard_shared::errors::{AppError, AppResult, ErrorCode};
use roomguard_shared::middleware::OptionalAuthUser;
use roomguard_shared::types::api::ApiResponse;
use roomguard_shared::types::auth::AuthUser;

use crate::gate::{Denial, SendDecision};
use crate::identity::Identity;
use crate::models::{Announcement, MessageEntry, SiteSettings};
use crate::AppState;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct CanSendResponse {
    pub allowed: bool,
    #[serde(flatten)]
    pub denial: Option<Denial>,
}

/// Ends the request with `SessionRevoked` when an admin forced this identity
/// out. The flag is cleared by the same call.
pub(super) async fn check_session(state: &AppState, identity: &Identity) -> AppResult<()> {
    if state.sessions.consume_force_logout(identity).await? {
        return Err(AppError::new(ErrorCode::SessionRevoked, "session ended by an administrator"));
    }
    Ok(())
}

// --- Site ---

pub async fn site_settings(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<SiteSettings>>> {
    let settings = state.chat.site_settings().await?;
    Ok(Json(ApiResponse::ok(settings)))
}

pub async fn announcements(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<ApiResponse<Vec<Announcement>>>> {
    let limit = params.limit.unwrap_or(20).clamp(1, state.config.history_limit.max(1));
    let items = state.chat.announcements(limit).await?;
    Ok(Json(ApiResponse::ok(items)))
}

// --- Messages ---

pub async fn history(
    State(state): State<Arc<AppState>>,
    OptionalAuthUser(viewer): OptionalAuthUser,
    Path(room): Path<String>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<ApiResponse<Vec<MessageEntry>>>> {
    let viewer = viewer.map(Identity::from);
    if let Some(viewer) = &viewer {
        check_session(&state, viewer).await?;
    }
    let max = state.config.history_limit.max(1);
    let limit = params.limit.unwrap_or(max).clamp(1, max);
    let messages = state.chat.history(&room, viewer.as_ref(), limit).await?;
    Ok(Json(ApiResponse::ok(messages)))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(room): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<Json<ApiResponse<MessageEntry>>> {
    let identity = Identity::from(auth);
    check_session(&state, &identity).await?;
    let entry = state.chat.send_message(&identity, &room, &body.body).await?;
    Ok(Json(ApiResponse::ok(entry)))
}

pub async fn can_send(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(room): Path<String>,
) -> AppResult<Json<ApiResponse<CanSendResponse>>> {
    let identity = Identity::from(auth);
    check_session(&state, &identity).await?;
    let response = match state.chat.gate().can_send(&identity, &room).await? {
        SendDecision::Allowed => CanSendResponse { allowed: true, denial: None },
        SendDecision::Denied(denial) => CanSendResponse { allowed: false, denial: Some(denial) },
    };
    Ok(Json(ApiResponse::ok(response)))
}
