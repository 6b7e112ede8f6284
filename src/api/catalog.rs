//! Catalogue API
//! Mission: admin CRUD for script events, the generated script itself, quiz
//! and minority questions, and red-envelope prizes.

use crate::auth::{require_admin, Claims};
use crate::errors::GameResult;
use crate::script::{generate_script, GeneratorParams};
use crate::state::AppState;
use crate::store::{
    EventInput, EventRow, MinorityQuestion, QuizQuestion, RedEnvelopeItem, ScriptDay,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use tracing::info;

// --- events ---

pub async fn get_events(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<Vec<EventRow>>> {
    require_admin(&claims)?;
    Ok(Json(state.store.list_events().await?))
}

pub async fn post_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(input): Json<EventInput>,
) -> GameResult<(StatusCode, Json<EventRow>)> {
    require_admin(&claims)?;
    let event = state.store.create_event(input).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn put_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(input): Json<EventInput>,
) -> GameResult<Json<EventRow>> {
    require_admin(&claims)?;
    Ok(Json(state.store.update_event(id, input).await?))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> GameResult<Json<serde_json::Value>> {
    require_admin(&claims)?;
    state.store.delete_event(id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// --- script ---

/// GET /api/admin/script - export the full timeline.
pub async fn get_script(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<Vec<ScriptDay>>> {
    require_admin(&claims)?;
    Ok(Json(state.store.all_script_days().await?))
}

/// PUT /api/admin/script - import a timeline (broadcast flags reset).
pub async fn put_script(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(days): Json<Vec<ScriptDay>>,
) -> GameResult<Json<serde_json::Value>> {
    require_admin(&claims)?;
    state.store.replace_script(&days).await?;
    let loaded = state.cache.reload(&state.store).await?;
    info!(days = loaded, "📜 script imported");
    Ok(Json(serde_json::json!({ "days": loaded })))
}

/// POST /api/admin/script/generate - regenerate from the event list.
pub async fn post_script_generate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<Vec<ScriptDay>>> {
    require_admin(&claims)?;
    let status = state.store.get_status().await?;
    let events = state.store.list_events().await?;
    let days = generate_script(
        &events,
        status.total_days,
        status.initial_price,
        status.time_ratio,
        &GeneratorParams::default(),
        &mut rand::thread_rng(),
    );
    state.store.replace_script(&days).await?;
    state.cache.reload(&state.store).await?;
    info!(days = days.len(), events = events.len(), "🎲 script generated");
    Ok(Json(days))
}

// --- quiz questions ---

pub async fn get_quiz_questions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<Vec<QuizQuestion>>> {
    require_admin(&claims)?;
    Ok(Json(state.store.list_quiz_questions().await?))
}

pub async fn post_quiz_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(question): Json<QuizQuestion>,
) -> GameResult<(StatusCode, Json<QuizQuestion>)> {
    require_admin(&claims)?;
    let question = state.store.create_quiz_question(question).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

pub async fn put_quiz_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(question): Json<QuizQuestion>,
) -> GameResult<Json<QuizQuestion>> {
    require_admin(&claims)?;
    Ok(Json(state.store.update_quiz_question(id, question).await?))
}

pub async fn delete_quiz_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> GameResult<Json<serde_json::Value>> {
    require_admin(&claims)?;
    state.store.delete_quiz_question(id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// --- minority questions ---

pub async fn get_minority_questions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<Vec<MinorityQuestion>>> {
    require_admin(&claims)?;
    Ok(Json(state.store.list_minority_questions().await?))
}

pub async fn post_minority_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(question): Json<MinorityQuestion>,
) -> GameResult<(StatusCode, Json<MinorityQuestion>)> {
    require_admin(&claims)?;
    let question = state.store.create_minority_question(question).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

pub async fn put_minority_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(question): Json<MinorityQuestion>,
) -> GameResult<Json<MinorityQuestion>> {
    require_admin(&claims)?;
    Ok(Json(state.store.update_minority_question(id, question).await?))
}

pub async fn delete_minority_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> GameResult<Json<serde_json::Value>> {
    require_admin(&claims)?;
    state.store.delete_minority_question(id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// --- red envelope items ---

pub async fn get_red_envelope_items(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> GameResult<Json<Vec<RedEnvelopeItem>>> {
    require_admin(&claims)?;
    Ok(Json(state.store.list_red_envelope_items().await?))
}

pub async fn post_red_envelope_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(item): Json<RedEnvelopeItem>,
) -> GameResult<(StatusCode, Json<RedEnvelopeItem>)> {
    require_admin(&claims)?;
    let item = state.store.create_red_envelope_item(item).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn put_red_envelope_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(item): Json<RedEnvelopeItem>,
) -> GameResult<Json<RedEnvelopeItem>> {
    require_admin(&claims)?;
    Ok(Json(state.store.update_red_envelope_item(id, item).await?))
}

pub async fn delete_red_envelope_item(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> GameResult<Json<serde_json::Value>> {
    require_admin(&claims)?;
    state.store.delete_red_envelope_item(id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}
