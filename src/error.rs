use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors raised while talking to the chain, per the taxonomy in the design notes:
/// transient errors are retried with phase-specific backoff, fatal ones end the game.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("insufficient funds for transaction")]
    InsufficientFunds,
    #[error("caller is not authorized to perform this action")]
    NotAuthorized,
    #[error("commit block not yet mined")]
    BlockNotReady,
    #[error("commit block hash is outside the retention window")]
    BlockHashUnavailable,
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("rpc transport error: {0}")]
    Transport(String),
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::BlockNotReady | ChainError::InsufficientFunds | ChainError::Reverted(_)
        )
    }
}

/// Game-rule errors surfaced by the session runtime (C5), mapped to HTTP 400 verbatim.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GameRuleError {
    #[error("Invalid direction")]
    InvalidDirection,
    #[error("No moves remaining")]
    NoMovesRemaining,
    #[error("No mines remaining")]
    NoMinesRemaining,
    #[error("Tile already depleted")]
    TileDepleted,
    #[error("Time expired! Game over.")]
    TimerExpired,
}

/// Authentication failures (C9).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("address is not a registered player of this game")]
    NotAPlayer,
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),
}

/// Top-level error returned from HTTP handlers; maps each variant to the status code
/// prescribed in the spec's error handling design (validation 400, auth 401/403, game-rule
/// 400, not-found 404, unexpected 500).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    GameRule(#[from] GameRuleError),
    #[error("player not found")]
    PlayerNotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Auth(AuthError::MissingToken) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ApiError::Auth(AuthError::InvalidToken) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ApiError::Auth(AuthError::NotAPlayer) => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::Auth(AuthError::SignatureVerification(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::GameRule(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::PlayerNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
