use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use roomguard_shared::errors::{AppError, AppResult, ErrorCode};
use roomguard_shared::middleware::OptionalAuthUser;
use roomguard_shared::types::api::ApiResponse;
use roomguard_shared::types::pagination::{Paginated, PaginationParams};

use super::chat_routes::check_session;
use crate::admin::ActionReceipt;
use crate::identity::Identity;
use crate::models::{AuditLogEntry, BanRecord, Keyed, MuteRecord, SiteField, Stored, UserProfile};
use crate::AppState;

// Authorization happens inside AdminControl against the allow-list, so every
// handler takes the optional identity and lets it decide. A signed-in caller
// still goes through the forced-logout check first.

/// Longest temp mute accepted over HTTP (100 years).
const MAX_TEMP_MUTE_HOURS: f64 = 24.0 * 365.0 * 100.0;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct TempMuteRequest {
    pub email: String,
    pub hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct NicknameRequest {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SlowModeRequest {
    pub seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SiteFieldRequest {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub on: bool,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditLogParams {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize { 100 }

type Receipt = AppResult<Json<ApiResponse<ActionReceipt>>>;

fn receipt(receipt: ActionReceipt) -> Json<ApiResponse<ActionReceipt>> {
    let notice = receipt.notice.clone();
    Json(ApiResponse::ok_with_message(receipt, notice))
}

async fn actor(state: &AppState, auth: OptionalAuthUser) -> AppResult<Option<Identity>> {
    let Some(identity) = auth.0.map(Identity::from) else {
        return Ok(None);
    };
    check_session(state, &identity).await?;
    Ok(Some(identity))
}

// --- User management ---

pub async fn ban(State(state): State<Arc<AppState>>, auth: OptionalAuthUser, Json(body): Json<TargetRequest>) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.ban(actor.as_ref(), &body.email).await?))
}

pub async fn unban(State(state): State<Arc<AppState>>, auth: OptionalAuthUser, Json(body): Json<TargetRequest>) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.unban(actor.as_ref(), &body.email).await?))
}

pub async fn mute(State(state): State<Arc<AppState>>, auth: OptionalAuthUser, Json(body): Json<TargetRequest>) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.mute(actor.as_ref(), &body.email).await?))
}

pub async fn unmute(State(state): State<Arc<AppState>>, auth: OptionalAuthUser, Json(body): Json<TargetRequest>) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.unmute(actor.as_ref(), &body.email).await?))
}

pub async fn temp_mute(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Json(body): Json<TempMuteRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    let duration = match body.hours {
        Some(hours) if !hours.is_finite() || hours <= 0.0 => {
            return Err(AppError::new(ErrorCode::ValidationError, "hours must be a positive number"));
        }
        Some(hours) if hours > MAX_TEMP_MUTE_HOURS => {
            return Err(AppError::new(ErrorCode::ValidationError, "hours is too large"));
        }
        Some(hours) => Some(Duration::milliseconds((hours * 3_600_000.0) as i64)),
        None => None,
    };
    Ok(receipt(state.admin.temp_mute(actor.as_ref(), &body.email, duration).await?))
}

pub async fn shadowban(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Json(body): Json<TargetRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.shadowban(actor.as_ref(), &body.email).await?))
}

pub async fn unshadowban(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Json(body): Json<TargetRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.unshadowban(actor.as_ref(), &body.email).await?))
}

pub async fn force_logout(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Json(body): Json<TargetRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.force_logout(actor.as_ref(), &body.email).await?))
}

pub async fn change_nickname(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Json(body): Json<NicknameRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.change_display_name(actor.as_ref(), &body.email, &body.name).await?))
}

pub async fn reset_avatar(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Json(body): Json<TargetRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.reset_avatar(actor.as_ref(), &body.email).await?))
}

// --- Chat management ---

pub async fn clear_all_messages(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Path(room): Path<String>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.clear_all_messages(actor.as_ref(), &room).await?))
}

pub async fn clear_user_messages(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Path(room): Path<String>,
    Json(body): Json<TargetRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.clear_messages_by(actor.as_ref(), &body.email, &room).await?))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Path((room, key)): Path<(String, String)>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.delete_message(actor.as_ref(), &room, &key).await?))
}

pub async fn delete_room(State(state): State<Arc<AppState>>, auth: OptionalAuthUser, Path(room): Path<String>) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.delete_room(actor.as_ref(), &room).await?))
}

pub async fn lock_room(State(state): State<Arc<AppState>>, auth: OptionalAuthUser, Path(room): Path<String>) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.lock_room(actor.as_ref(), &room).await?))
}

pub async fn unlock_room(State(state): State<Arc<AppState>>, auth: OptionalAuthUser, Path(room): Path<String>) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.unlock_room(actor.as_ref(), &room).await?))
}

pub async fn set_slow_mode(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Path(room): Path<String>,
    Json(body): Json<SlowModeRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.set_slow_mode(actor.as_ref(), &room, body.seconds).await?))
}

pub async fn clear_slow_mode(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Path(room): Path<String>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.clear_slow_mode(actor.as_ref(), &room).await?))
}

pub async fn announce(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Json(body): Json<AnnouncementRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.announce(actor.as_ref(), &body.text).await?))
}

// --- Site ---

pub async fn set_site_field(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Path(field): Path<SiteField>,
    Json(body): Json<SiteFieldRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.set_site_field(actor.as_ref(), field, &body.value).await?))
}

pub async fn set_maintenance(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Json(body): Json<MaintenanceRequest>,
) -> Receipt {
    let actor = actor(&state, auth).await?;
    Ok(receipt(state.admin.set_maintenance(actor.as_ref(), body.on, body.message.as_deref()).await?))
}

// --- Views ---

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<Keyed<UserProfile>>>>> {
    let actor = actor(&state, auth).await?;
    let users = state.admin.list_users(actor.as_ref()).await?;
    Ok(Json(ApiResponse::ok(Paginated::from_all(users, &params))))
}

pub async fn list_online(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
) -> AppResult<Json<ApiResponse<Vec<Keyed<UserProfile>>>>> {
    let actor = actor(&state, auth).await?;
    Ok(Json(ApiResponse::ok(state.admin.list_online(actor.as_ref()).await?)))
}

pub async fn list_banned(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
) -> AppResult<Json<ApiResponse<Vec<Keyed<Stored<BanRecord>>>>>> {
    let actor = actor(&state, auth).await?;
    Ok(Json(ApiResponse::ok(state.admin.list_banned(actor.as_ref()).await?)))
}

pub async fn list_muted(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
) -> AppResult<Json<ApiResponse<Vec<Keyed<Stored<MuteRecord>>>>>> {
    let actor = actor(&state, auth).await?;
    Ok(Json(ApiResponse::ok(state.admin.list_muted(actor.as_ref()).await?)))
}

pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<Keyed<Value>>>>> {
    let actor = actor(&state, auth).await?;
    let reports = state.admin.list_reports(actor.as_ref()).await?;
    Ok(Json(ApiResponse::ok(Paginated::from_all(reports, &params))))
}

pub async fn audit_log(
    State(state): State<Arc<AppState>>,
    auth: OptionalAuthUser,
    Query(params): Query<AuditLogParams>,
) -> AppResult<Json<ApiResponse<Vec<Keyed<AuditLogEntry>>>>> {
    let actor = actor(&state, auth).await?;
    let limit = params.limit.clamp(1, 1000);
    Ok(Json(ApiResponse::ok(state.admin.audit_log(actor.as_ref(), limit).await?)))
}
