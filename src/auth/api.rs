//! Authentication API Endpoints
//! Mission: registration, login, and self-service profile updates

use crate::auth::models::{
    AccountUpdateRequest, AvatarUpdateRequest, Claims, LoginRequest, LoginResponse,
    RegisterRequest, UserResponse,
};
use crate::errors::{GameError, GameResult};
use crate::state::AppState;
use crate::store::Role;
use crate::ws::events::{ServerEvent, UserDataUpdated};
use axum::{extract::State, http::StatusCode, Extension, Json};
use bcrypt::{hash, verify, DEFAULT_COST};
use tracing::{info, warn};

fn claims_user_id(claims: &Claims) -> GameResult<i64> {
    claims
        .user_id()
        .ok_or_else(|| GameError::Auth("malformed token subject".to_string()))
}

/// Register endpoint - POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> GameResult<(StatusCode, Json<LoginResponse>)> {
    let username = payload.username.trim();
    if username.len() < 2 {
        return Err(GameError::Validation(
            "username must be at least 2 characters".to_string(),
        ));
    }
    if payload.password.len() < 6 {
        return Err(GameError::Validation(
            "password must be at least 6 characters".to_string(),
        ));
    }

    let password_hash = hash(&payload.password, DEFAULT_COST)
        .map_err(|e| GameError::Internal(e.to_string()))?;
    let display_name = payload
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(username);

    let status = state.store.get_status().await?;
    let user = state
        .store
        .create_user(
            username,
            &password_hash,
            display_name,
            Role::User,
            status.initial_cash,
        )
        .await?;

    info!("✅ Registered user: {}", user.username);

    let (token, expires_in) = state.jwt.generate_token(&user)?;
    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            token,
            expires_in,
            user: UserResponse::from_user(&user),
        }),
    ))
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> GameResult<Json<LoginResponse>> {
    let user = state
        .store
        .get_user_by_username(payload.username.trim())
        .await?
        .ok_or_else(|| GameError::Auth("invalid credentials".to_string()))?;

    let valid = verify(&payload.password, &user.password_hash)
        .map_err(|e| GameError::Internal(e.to_string()))?;
    if !valid {
        warn!("❌ Failed login attempt: {}", payload.username);
        return Err(GameError::Auth("invalid credentials".to_string()));
    }

    state.store.mark_signed_in(user.id).await?;

    let (token, expires_in) = state.jwt.generate_token(&user)?;
    info!("✅ Login successful: {}", user.username);
    Ok(Json(LoginResponse {
        token,
        expires_in,
        user: UserResponse::from_user(&user),
    }))
}

/// Current user endpoint - GET /api/auth/me
pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<UserResponse>> {
    let user = state.store.get_user(claims_user_id(&claims)?).await?;
    Ok(Json(UserResponse::from_user(&user)))
}

/// Avatar update - PATCH /api/auth/avatar
pub async fn update_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AvatarUpdateRequest>,
) -> GameResult<Json<UserResponse>> {
    if payload.avatar.trim().is_empty() {
        return Err(GameError::Validation("avatar must not be empty".to_string()));
    }
    let user = state
        .store
        .update_profile(claims_user_id(&claims)?, None, Some(payload.avatar))
        .await?;

    state
        .bus
        .global_emit(ServerEvent::UserDataUpdated(UserDataUpdated {
            user_id: user.id,
            display_name: user.display_name.clone(),
            avatar: user.avatar.clone(),
        }));
    Ok(Json(UserResponse::from_user(&user)))
}

/// Account update - PATCH /api/auth/account
pub async fn update_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AccountUpdateRequest>,
) -> GameResult<Json<UserResponse>> {
    let user_id = claims_user_id(&claims)?;

    if let Some(password) = &payload.password {
        if password.len() < 6 {
            return Err(GameError::Validation(
                "password must be at least 6 characters".to_string(),
            ));
        }
        let password_hash =
            hash(password, DEFAULT_COST).map_err(|e| GameError::Internal(e.to_string()))?;
        state.store.set_password_hash(user_id, &password_hash).await?;
    }

    let user = state
        .store
        .update_profile(user_id, payload.display_name, None)
        .await?;

    state
        .bus
        .global_emit(ServerEvent::UserDataUpdated(UserDataUpdated {
            user_id: user.id,
            display_name: user.display_name.clone(),
            avatar: user.avatar.clone(),
        }));
    Ok(Json(UserResponse::from_user(&user)))
}
