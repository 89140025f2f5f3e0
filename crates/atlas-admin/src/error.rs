//! Error types for the Atlas Administration API client

use broker_core::BrokerError;
use thiserror::Error;

/// Result type alias for admin API operations
pub type AdminResult<T> = std::result::Result<T, AdminError>;

/// Coarse classification of a failed API response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    DeadlineExceeded,
    AlreadyExists,
    FailedPrecondition,
    Unavailable,
    Unimplemented,
    Unknown,
}

impl ApiErrorKind {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16) -> Self {
        match status {
            // 406: bad Accept header or API version
            400 | 406 => ApiErrorKind::InvalidArgument,
            401 => ApiErrorKind::Unauthenticated,
            403 => ApiErrorKind::PermissionDenied,
            404 => ApiErrorKind::NotFound,
            408 => ApiErrorKind::DeadlineExceeded,
            409 => ApiErrorKind::AlreadyExists,
            422 => ApiErrorKind::FailedPrecondition,
            // 429 is rate limiting
            429 | 503 => ApiErrorKind::Unavailable,
            501 => ApiErrorKind::Unimplemented,
            500..=599 => ApiErrorKind::Unavailable,
            _ => ApiErrorKind::Unknown,
        }
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ApiErrorKind::InvalidArgument => "invalid argument",
            ApiErrorKind::Unauthenticated => "unauthenticated",
            ApiErrorKind::PermissionDenied => "permission denied",
            ApiErrorKind::NotFound => "not found",
            ApiErrorKind::DeadlineExceeded => "deadline exceeded",
            ApiErrorKind::AlreadyExists => "already exists",
            ApiErrorKind::FailedPrecondition => "failed precondition",
            ApiErrorKind::Unavailable => "unavailable",
            ApiErrorKind::Unimplemented => "unimplemented",
            ApiErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Admin API error types
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Atlas API returned HTTP {status} ({kind}){}: {detail}", error_code_suffix(.error_code))]
    Api {
        status: u16,
        kind: ApiErrorKind,
        error_code: Option<String>,
        detail: String,
    },

    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid proxy configuration: {0}")]
    Proxy(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn error_code_suffix(error_code: &Option<String>) -> String {
    error_code
        .as_ref()
        .map(|code| format!(" [{}]", code))
        .unwrap_or_default()
}

impl AdminError {
    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            AdminError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn kind(&self) -> ApiErrorKind {
        match self {
            AdminError::Api { kind, .. } => *kind,
            AdminError::AuthError(_) => ApiErrorKind::Unauthenticated,
            AdminError::HttpError(_) => ApiErrorKind::Unavailable,
            AdminError::InvalidUrl(_) | AdminError::Proxy(_) => ApiErrorKind::InvalidArgument,
            AdminError::InvalidResponse(_) | AdminError::JsonError(_) => ApiErrorKind::Unknown,
        }
    }
}

impl From<reqwest::Error> for AdminError {
    fn from(e: reqwest::Error) -> Self {
        AdminError::HttpError(e.to_string())
    }
}

impl From<AdminError> for BrokerError {
    fn from(e: AdminError) -> Self {
        BrokerError::ControlPlane {
            status: e.status(),
            message: e.to_string(),
        }
    }
}
