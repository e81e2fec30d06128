use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("property limit reached during trial")]
    TrialLimitExceeded { current_count: i64, max_allowed: i64 },
    #[error("group members must stay within {max_distance} m")]
    GeoFenceViolation { distance: f64, max_distance: f64 },
    #[error("missing configuration: {0}")]
    ConfigMissing(String),
    #[error("{0}")]
    Message(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(?self);
        let (status, body) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, json!({"error": "not_found"})),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({"error": "unauthorized"})),
            AppError::Forbidden => (StatusCode::FORBIDDEN, json!({"error": "forbidden"})),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({"error": msg})),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({"error": msg})),
            AppError::TrialLimitExceeded {
                current_count,
                max_allowed,
            } => (
                StatusCode::FORBIDDEN,
                json!({
                    "code": "LIMIT_EXCEEDED",
                    "currentCount": current_count,
                    "maxAllowed": max_allowed,
                }),
            ),
            AppError::GeoFenceViolation {
                distance,
                max_distance,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({
                    "code": "GEO_FENCING_VIOLATION",
                    "distance": distance,
                    "maxDistance": max_distance,
                }),
            ),
            AppError::Upstream(err) => (
                StatusCode::BAD_GATEWAY,
                json!({"error": "upstream", "detail": err.to_string()}),
            ),
            AppError::ConfigMissing(name) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "config_missing", "detail": name}),
            ),
            AppError::Db(_) | AppError::Message(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": self.to_string()}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Classification of failures from external services (billing provider,
/// PMS vendors, LLM endpoints). Only `RateLimit` and `Transient` are worth
/// retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    Auth,
    RateLimit,
    NotFound,
    Transient,
    Fatal,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub kind: UpstreamKind,
    pub message: String,
}

impl UpstreamError {
    pub fn new(kind: UpstreamKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::Fatal, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::Transient, message)
    }

    pub fn retryable(&self) -> bool {
        matches!(self.kind, UpstreamKind::RateLimit | UpstreamKind::Transient)
    }

    /// Maps an HTTP status from a vendor API onto the internal taxonomy.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        let kind = match status.as_u16() {
            401 | 403 => UpstreamKind::Auth,
            404 => UpstreamKind::NotFound,
            429 => UpstreamKind::RateLimit,
            500..=599 => UpstreamKind::Transient,
            _ => UpstreamKind::Fatal,
        };
        Self::new(kind, format!("{context}: HTTP {status}"))
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::transient(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status, "request failed")
        } else {
            Self::fatal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let cases = [
            (401, UpstreamKind::Auth),
            (403, UpstreamKind::Auth),
            (404, UpstreamKind::NotFound),
            (429, UpstreamKind::RateLimit),
            (500, UpstreamKind::Transient),
            (503, UpstreamKind::Transient),
            (400, UpstreamKind::Fatal),
        ];
        for (code, kind) in cases {
            let err =
                UpstreamError::from_status(reqwest::StatusCode::from_u16(code).unwrap(), "test");
            assert_eq!(err.kind, kind, "status {code}");
        }
    }

    #[test]
    fn only_rate_limit_and_transient_retry() {
        assert!(UpstreamError::new(UpstreamKind::RateLimit, "x").retryable());
        assert!(UpstreamError::transient("x").retryable());
        assert!(!UpstreamError::fatal("x").retryable());
        assert!(!UpstreamError::new(UpstreamKind::Auth, "x").retryable());
        assert!(!UpstreamError::new(UpstreamKind::NotFound, "x").retryable());
    }
}
