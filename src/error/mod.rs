use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error kinds — each carries the envelope `code` string client code
/// matches on, per `{error:{code,message,…}}`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Gone: {0}")]
    Gone(String),

    /// A precondition wasn't met (`NOT_IN_VOICE`, `NOT_DM_PARTICIPANT`, …) —
    /// carries the explicit code since the message alone doesn't disambiguate.
    #[error("Precondition failed: {code}: {message}")]
    Precondition { code: &'static str, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        code: &'static str,
        retry_after_ms: u64,
        limit: u64,
        remaining: u64,
        reset: u64,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Federation auth failed: {0}")]
    FederationAuth(String),

    #[error("Internal server error")]
    Internal,
}

impl AppError {
    pub fn not_in_voice() -> Self {
        AppError::Precondition {
            code: "NOT_IN_VOICE",
            message: "You are not connected to a voice room".into(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Internal => "INTERNAL",
            AppError::Auth(_) => "UNAUTHORIZED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Gone(_) => "GONE",
            AppError::Precondition { code, .. } => code,
            AppError::RateLimited { code, .. } => code,
            AppError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            AppError::FederationAuth(_) => "FED_AUTH_FAILED",
        }
    }
}

/// Map sqlx errors to AppError, with special handling for unique-constraint
/// violations (PG error code 23505) so they surface as 409 Conflict rather
/// than 500 Internal Server Error.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.code().as_deref() == Some("23505") {
                let message = match db_err.constraint() {
                    Some(c) if c.contains("username") => "Username already taken",
                    Some(c) if c.contains("nonce") => "Nonce already used",
                    _ => "Resource already exists",
                };
                return AppError::Conflict(message.into());
            }
        }
        AppError::Database(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();

        if let AppError::RateLimited {
            retry_after_ms,
            limit,
            remaining,
            reset,
            ..
        } = self
        {
            let retry_after_s = retry_after_ms.div_ceil(1000);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": { "code": code, "message": "You are being rate limited.", "retry_after_ms": retry_after_ms }
                })),
            )
                .into_response();
            let headers = response.headers_mut();
            headers.insert("Retry-After", retry_after_s.to_string().parse().unwrap());
            headers.insert("X-RateLimit-Limit", limit.to_string().parse().unwrap());
            headers.insert("X-RateLimit-Remaining", remaining.to_string().parse().unwrap());
            headers.insert("X-RateLimit-Reset", reset.to_string().parse().unwrap());
            return response;
        }

        let (status, message): (StatusCode, String) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".into())
            }
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Gone(msg) => (StatusCode::GONE, msg),
            AppError::Precondition { message, .. } => (StatusCode::UNPROCESSABLE_ENTITY, message),
            AppError::UpstreamUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::FederationAuth(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::RateLimited { .. } => unreachable!("handled above"),
            AppError::Internal => {
                tracing::error!("Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        (status, Json(json!({ "error": { "code": code, "message": message } }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
