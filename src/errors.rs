//! Game error taxonomy.
//!
//! Every caller-visible failure is one of these kinds, mapped once to an
//! HTTP status for the admin/auth surface and once to a typed `TRADE_ERROR`
//! style frame for the realtime surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub enum GameError {
    Validation(String),
    Auth(String),
    Permission(String),
    /// Lifecycle invariant violated (e.g. resume without a pause).
    Precondition(String),
    Conflict(String),
    GameNotRunning,
    InsufficientFunds,
    InsufficientHoldings,
    QuotaExceeded,
    NotFound(String),
    StoreUnavailable(String),
    Internal(String),
}

impl GameError {
    /// Stable machine-readable kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::Validation(_) => "VALIDATION",
            GameError::Auth(_) => "AUTH",
            GameError::Permission(_) => "PERMISSION",
            GameError::Precondition(_) => "PRECONDITION",
            GameError::Conflict(_) => "CONFLICT",
            GameError::GameNotRunning => "GAME_NOT_RUNNING",
            GameError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            GameError::InsufficientHoldings => "INSUFFICIENT_HOLDINGS",
            GameError::QuotaExceeded => "QUOTA_EXCEEDED",
            GameError::NotFound(_) => "NOT_FOUND",
            GameError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            GameError::Internal(_) => "INTERNAL",
        }
    }

    /// Human-readable message for the originating caller.
    pub fn message(&self) -> String {
        match self {
            GameError::Validation(m)
            | GameError::Auth(m)
            | GameError::Permission(m)
            | GameError::Precondition(m)
            | GameError::Conflict(m)
            | GameError::NotFound(m)
            | GameError::StoreUnavailable(m)
            | GameError::Internal(m) => m.clone(),
            GameError::GameNotRunning => "The game is not running".to_string(),
            GameError::InsufficientFunds => "Insufficient cash".to_string(),
            GameError::InsufficientHoldings => "Insufficient holdings".to_string(),
            GameError::QuotaExceeded => "Daily borrow quota exceeded".to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GameError::Validation(_)
            | GameError::Precondition(_)
            | GameError::GameNotRunning
            | GameError::InsufficientFunds
            | GameError::InsufficientHoldings
            | GameError::QuotaExceeded => StatusCode::BAD_REQUEST,
            GameError::Auth(_) => StatusCode::UNAUTHORIZED,
            GameError::Permission(_) => StatusCode::FORBIDDEN,
            GameError::Conflict(_) => StatusCode::CONFLICT,
            GameError::NotFound(_) => StatusCode::NOT_FOUND,
            GameError::StoreUnavailable(_) | GameError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl std::fmt::Display for GameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for GameError {}

impl From<rusqlite::Error> for GameError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                GameError::Conflict(e.to_string())
            }
            rusqlite::Error::QueryReturnedNoRows => GameError::NotFound("row not found".to_string()),
            _ => GameError::StoreUnavailable(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for GameError {
    fn from(e: anyhow::Error) -> Self {
        GameError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for GameError {
    fn from(e: serde_json::Error) -> Self {
        GameError::Internal(e.to_string())
    }
}

impl IntoResponse for GameError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind(),
            "message": self.message(),
        }));
        (self.status(), body).into_response()
    }
}

pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(GameError::InsufficientFunds.kind(), "INSUFFICIENT_FUNDS");
        assert_eq!(GameError::GameNotRunning.kind(), "GAME_NOT_RUNNING");
        assert_eq!(
            GameError::Precondition("already started".into()).kind(),
            "PRECONDITION"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            GameError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GameError::Auth("no token".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GameError::Permission("admin only".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GameError::Conflict("username taken".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GameError::NotFound("user".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GameError::StoreUnavailable("locked".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let err: GameError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), "NOT_FOUND");
    }
}
