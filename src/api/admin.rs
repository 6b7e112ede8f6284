//! Admin API
//! Mission: game lifecycle control, parameter tuning, user management, and
//! the presence monitor, all behind the ADMIN role.

use crate::auth::{require_admin, Claims};
use crate::errors::{GameError, GameResult};
use crate::state::AppState;
use crate::store::{AdminUserUpdate, GameStatus, ParamsUpdate, User};
use crate::ws::bus::PresenceSample;
use crate::ws::events::{ForceLogout, ServerEvent};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: GameStatus,
}

/// POST /api/admin/game/start
pub async fn post_game_start(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<StatusResponse>> {
    require_admin(&claims)?;
    let status = state.lifecycle.start().await?;
    Ok(Json(StatusResponse { status }))
}

/// POST /api/admin/game/stop
pub async fn post_game_stop(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<StatusResponse>> {
    require_admin(&claims)?;
    let status = state.lifecycle.stop().await?;
    Ok(Json(StatusResponse { status }))
}

/// POST /api/admin/game/resume
pub async fn post_game_resume(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<StatusResponse>> {
    require_admin(&claims)?;
    let status = state.lifecycle.resume().await?;
    Ok(Json(StatusResponse { status }))
}

/// POST /api/admin/game/restart
pub async fn post_game_restart(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<StatusResponse>> {
    require_admin(&claims)?;
    let status = state.lifecycle.restart().await?;
    Ok(Json(StatusResponse { status }))
}

/// POST /api/admin/game/reset
///
/// Destructive: additionally gated on the out-of-band admin key.
pub async fn post_game_reset(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
) -> GameResult<Json<StatusResponse>> {
    require_admin(&claims)?;
    let provided = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != state.config.admin_secret {
        return Err(GameError::Permission("admin key mismatch".to_string()));
    }
    let admin_id = claims
        .user_id()
        .ok_or_else(|| GameError::Auth("malformed token subject".to_string()))?;
    let status = state.lifecycle.reset(admin_id).await?;
    Ok(Json(StatusResponse { status }))
}

/// GET /api/admin/params
pub async fn get_params(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<GameStatus>> {
    require_admin(&claims)?;
    Ok(Json(state.store.get_status().await?))
}

/// PUT /api/admin/params
pub async fn put_params(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(update): Json<ParamsUpdate>,
) -> GameResult<Json<GameStatus>> {
    require_admin(&claims)?;
    let status = state.lifecycle.update_params(update).await?;
    Ok(Json(status))
}

/// GET /api/admin/users
pub async fn get_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<Vec<User>>> {
    require_admin(&claims)?;
    Ok(Json(state.store.list_users().await?))
}

/// PUT /api/admin/users/:id
pub async fn put_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(update): Json<AdminUserUpdate>,
) -> GameResult<Json<User>> {
    require_admin(&claims)?;
    let user = state.store.update_user_admin(id, update).await?;
    Ok(Json(user))
}

/// DELETE /api/admin/users/:id
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> GameResult<Json<serde_json::Value>> {
    require_admin(&claims)?;
    state.store.delete_user(id).await?;
    state.bus.to_user(
        id,
        ServerEvent::ForceLogout(ForceLogout {
            message: "Your account was removed by an administrator".to_string(),
        }),
    );
    info!(user_id = id, "🗑️ user deleted");
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// GET /api/admin/monitor/history
pub async fn get_monitor_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<Vec<PresenceSample>>> {
    require_admin(&claims)?;
    Ok(Json(state.bus.presence_history()))
}
