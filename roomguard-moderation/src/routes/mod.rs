pub mod admin_routes;
pub mod chat_routes;
pub mod health;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use roomguard_shared::errors::{AppError, ErrorCode};
use roomguard_shared::middleware::metrics_middleware;

use crate::admin::AdminError;
use crate::chat::SendError;
use crate::gate::Denial;
use crate::store::StoreError;
use crate::AppState;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AppError::new(ErrorCode::ServiceUnavailable, format!("store unavailable: {msg}")),
            other => AppError::new(ErrorCode::StoreFailure, other.to_string()),
        }
    }
}

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::AccessDenied => AppError::new(ErrorCode::AccessDenied, err.to_string()),
            AdminError::InvalidInput(msg) => AppError::new(ErrorCode::ValidationError, msg),
            AdminError::Store(e) => e.into(),
        }
    }
}

impl From<SendError> for AppError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::EmptyMessage => AppError::new(ErrorCode::EmptyMessage, err.to_string()),
            SendError::Denied(denial) => {
                let code = match denial {
                    Denial::Banned => ErrorCode::UserBanned,
                    Denial::Muted { .. } => ErrorCode::UserMuted,
                    Denial::Locked => ErrorCode::RoomLocked,
                    Denial::SlowMode { .. } => ErrorCode::SlowModeActive,
                };
                match serde_json::to_value(denial) {
                    Ok(details) => AppError::with_details(code, denial.notice(), details),
                    Err(_) => AppError::new(code, denial.notice()),
                }
            }
            SendError::Store(e) => e.into(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/users", get(admin_routes::list_users))
        .route("/users/online", get(admin_routes::list_online))
        .route("/users/ban", post(admin_routes::ban))
        .route("/users/unban", post(admin_routes::unban))
        .route("/users/mute", post(admin_routes::mute))
        .route("/users/unmute", post(admin_routes::unmute))
        .route("/users/temp-mute", post(admin_routes::temp_mute))
        .route("/users/shadowban", post(admin_routes::shadowban))
        .route("/users/unshadowban", post(admin_routes::unshadowban))
        .route("/users/force-logout", post(admin_routes::force_logout))
        .route("/users/nickname", post(admin_routes::change_nickname))
        .route("/users/reset-avatar", post(admin_routes::reset_avatar))
        .route("/banned", get(admin_routes::list_banned))
        .route("/muted", get(admin_routes::list_muted))
        .route("/reports", get(admin_routes::list_reports))
        .route("/audit-log", get(admin_routes::audit_log))
        .route("/rooms/:room", delete(admin_routes::delete_room))
        .route("/rooms/:room/clear", post(admin_routes::clear_all_messages))
        .route("/rooms/:room/clear-user", post(admin_routes::clear_user_messages))
        .route("/rooms/:room/messages/:key", delete(admin_routes::delete_message))
        .route("/rooms/:room/lock", post(admin_routes::lock_room))
        .route("/rooms/:room/unlock", post(admin_routes::unlock_room))
        .route(
            "/rooms/:room/slow-mode",
            post(admin_routes::set_slow_mode).delete(admin_routes::clear_slow_mode),
        )
        .route("/announcements", post(admin_routes::announce))
        .route("/site/:field", put(admin_routes::set_site_field))
        .route("/maintenance", put(admin_routes::set_maintenance));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/site", get(chat_routes::site_settings))
        .route("/announcements", get(chat_routes::announcements))
        .route(
            "/rooms/:room/messages",
            get(chat_routes::history).post(chat_routes::send_message),
        )
        .route("/rooms/:room/can-send", get(chat_routes::can_send))
        .nest("/admin", admin_routes)
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn denials_map_to_gate_codes() {
        let err: AppError = SendError::Denied(Denial::SlowMode { wait_ms: 500 }).into();
        assert_eq!(err.code(), Some(ErrorCode::SlowModeActive));
        assert_eq!(err.into_response().status(), StatusCode::TOO_MANY_REQUESTS);

        let err: AppError = SendError::Denied(Denial::Banned).into();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn access_denied_is_forbidden() {
        let err: AppError = AdminError::AccessDenied.into();
        assert_eq!(err.code(), Some(ErrorCode::AccessDenied));
        assert_eq!(err.to_string(), "Access denied. Not admin.");
    }

    #[test]
    fn store_outage_is_service_unavailable() {
        let err: AppError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(err.code(), Some(ErrorCode::ServiceUnavailable));
        let err: AppError = StoreError::Backend("WRONGTYPE".into()).into();
        assert_eq!(err.code(), Some(ErrorCode::StoreFailure));
    }
}
