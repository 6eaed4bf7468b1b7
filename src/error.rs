/// Unified error types for SAST Link
///
/// Every variant carries a stable numeric code so clients can branch on
/// `err_code` instead of parsing `err_msg`. The HTTP status is decided here
/// and nowhere else.
use crate::response::ApiResponse;
use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum LinkError {
    /// Missing or malformed request input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    // Ticket and phase errors: the client restarts the flow
    #[error("Ticket not found")]
    TicketNotFound,

    #[error("Ticket is not in the expected phase")]
    PhaseError,

    #[error("Ticket expired")]
    TicketExpired,

    // Credential errors: the client re-authenticates
    #[error("Malformed credential")]
    Malformed,

    #[error("Credential expired")]
    Expired,

    #[error("Credential purpose mismatch")]
    PurposeMismatch,

    #[error("Access token revoked")]
    TokenRevoked,

    #[error("No credential presented")]
    NoCredential,

    #[error("Unauthorized")]
    Unauthorized,

    // Account state errors
    #[error("User already exists")]
    UserExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Password incorrect")]
    PasswordIncorrect,

    #[error("Verify code expired")]
    CodeExpired,

    #[error("Verify code incorrect")]
    CodeIncorrect,

    // OAuth2 errors
    #[error("Client authentication failed")]
    ClientInvalid,

    #[error("Refresh token invalid")]
    RefreshTokenInvalid,

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported grant type")]
    UnsupportedGrantType,

    #[error("Unsupported response type")]
    UnsupportedResponseType,

    #[error("Invalid redirect uri")]
    InvalidRedirectUri,

    #[error("Access denied")]
    AccessDenied,

    // External identity providers
    #[error("Identity provider not found: {0}")]
    IdpNotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    // Infrastructure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("JWT error: {0}")]
    Jwt(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Stable numeric error code exposed as `err_code`
    pub fn code(&self) -> i32 {
        match self {
            LinkError::InvalidInput(_) => 10001,
            LinkError::RateLimitExceeded { .. } => 10002,
            LinkError::TicketNotFound => 20001,
            LinkError::PhaseError => 20002,
            LinkError::TicketExpired => 20003,
            LinkError::Malformed => 30001,
            LinkError::Expired => 30002,
            LinkError::PurposeMismatch => 30003,
            LinkError::TokenRevoked => 30004,
            LinkError::NoCredential => 30005,
            LinkError::Unauthorized => 30006,
            LinkError::UserExists => 40001,
            LinkError::UserNotFound => 40002,
            LinkError::PasswordIncorrect => 40003,
            LinkError::CodeExpired => 40004,
            LinkError::CodeIncorrect => 40005,
            LinkError::ClientInvalid => 50001,
            LinkError::RefreshTokenInvalid => 50002,
            LinkError::InvalidGrant(_) => 50003,
            LinkError::InvalidRequest(_) => 50004,
            LinkError::UnsupportedGrantType => 50005,
            LinkError::UnsupportedResponseType => 50006,
            LinkError::InvalidRedirectUri => 50007,
            LinkError::AccessDenied => 50008,
            LinkError::IdpNotFound(_) => 60001,
            LinkError::Upstream(_) => 60002,
            LinkError::Database(_) => 90001,
            LinkError::Cache(_) => 90002,
            LinkError::Mail(_) => 90003,
            LinkError::Jwt(_) => 90004,
            LinkError::Internal(_) | LinkError::Io(_) => 90000,
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            LinkError::InvalidInput(_)
            | LinkError::TicketNotFound
            | LinkError::PhaseError
            | LinkError::TicketExpired
            | LinkError::UserExists
            | LinkError::CodeExpired
            | LinkError::CodeIncorrect
            | LinkError::RefreshTokenInvalid
            | LinkError::InvalidGrant(_)
            | LinkError::InvalidRequest(_)
            | LinkError::UnsupportedGrantType
            | LinkError::UnsupportedResponseType
            | LinkError::InvalidRedirectUri => StatusCode::BAD_REQUEST,
            LinkError::Malformed
            | LinkError::Expired
            | LinkError::PurposeMismatch
            | LinkError::TokenRevoked
            | LinkError::NoCredential
            | LinkError::Unauthorized
            | LinkError::PasswordIncorrect
            | LinkError::ClientInvalid => StatusCode::UNAUTHORIZED,
            LinkError::AccessDenied => StatusCode::FORBIDDEN,
            LinkError::UserNotFound | LinkError::IdpNotFound(_) => StatusCode::NOT_FOUND,
            LinkError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            LinkError::Upstream(_) => StatusCode::BAD_GATEWAY,
            LinkError::Database(_)
            | LinkError::Cache(_)
            | LinkError::Mail(_)
            | LinkError::Jwt(_)
            | LinkError::Internal(_)
            | LinkError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this is an infrastructure failure whose details must not leak
    pub fn is_internal(&self) -> bool {
        self.status() == StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Re-interpret a credential error raised while consuming a ticket
    pub fn into_ticket_error(self) -> Self {
        match self {
            LinkError::Expired => LinkError::TicketExpired,
            LinkError::Malformed | LinkError::PurposeMismatch => LinkError::TicketNotFound,
            other => other,
        }
    }
}

/// Convert LinkError to the standard response envelope
impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.is_internal() {
            tracing::error!(error = %self, "internal error");
            "Internal server error".to_string() // Don't leak details
        } else {
            self.to_string()
        };

        let body = Json(ApiResponse::<()>::error(self.code(), message));
        let mut response = (status, body).into_response();

        if let LinkError::RateLimitExceeded { retry_after } = &self {
            // Whole seconds, never zero
            let secs = retry_after.as_secs().max(1);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Result type alias for service operations
pub type LinkResult<T> = Result<T, LinkError>;
