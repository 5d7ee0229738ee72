use crate::auth::AuthError;
use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced by the mapping API, grouped the way callers react to them.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Backend unreachable: connection refused, DNS, TLS or timeout.
    #[error("Mapping service unavailable: {0}")]
    Unavailable(String),

    /// Still 401/403 after one token refresh, or no session to refresh.
    #[error("Not authorized (HTTP {status}): {message}")]
    NotAuthorized { status: u16, message: String },

    /// Business rule rejected by the backend, e.g. duplicate codes.
    #[error("Validation failed (HTTP {status}): {message}")]
    Validation {
        status: u16,
        message: String,
        field: Option<String>,
    },

    #[error("Unexpected API error: {message}")]
    Unexpected { status: Option<u16>, message: String },
}

/// RFC 7807 problem body the backend returns on errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProblemDetail {
    pub title: Option<String>,
    pub detail: Option<String>,
    pub status: Option<u16>,
    #[serde(rename = "type")]
    pub problem_type: Option<String>,
    pub field: Option<String>,
}

impl ProblemDetail {
    pub fn message(&self) -> Option<String> {
        self.detail.clone().or_else(|| self.title.clone())
    }
}

impl ApiError {
    /// Classify a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let problem: ProblemDetail = serde_json::from_str(body).unwrap_or_default();
        let message = problem
            .message()
            .unwrap_or_else(|| body.trim().chars().take(200).collect());

        match status {
            0 => ApiError::Unavailable(message),
            401 | 403 => ApiError::NotAuthorized { status, message },
            400 | 409 | 422 => ApiError::Validation {
                status,
                message,
                field: problem.field,
            },
            502..=504 => ApiError::Unavailable(format!("HTTP {status}: {message}")),
            _ => ApiError::Unexpected {
                status: Some(status),
                message,
            },
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        ApiError::Unexpected {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::NotAuthorized { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unavailable(_) => Some(0),
            ApiError::NotAuthorized { status, .. } | ApiError::Validation { status, .. } => {
                Some(*status)
            }
            ApiError::Unexpected { status, .. } => *status,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            ApiError::Unavailable(err.to_string())
        } else if err.is_decode() {
            ApiError::decode(format!("Could not decode response: {err}"))
        } else if let Some(status) = err.status() {
            ApiError::from_status(status.as_u16(), &err.to_string())
        } else {
            ApiError::Unexpected {
                status: None,
                message: err.to_string(),
            }
        }
    }
}

impl From<reqwest_middleware::Error> for ApiError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            reqwest_middleware::Error::Middleware(err) => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotLoggedIn | AuthError::NoRefreshToken => ApiError::NotAuthorized {
                status: 401,
                message: err.to_string(),
            },
            AuthError::Rejected { status, message } => ApiError::NotAuthorized {
                status,
                message: format!("token refresh rejected: {message}"),
            },
            AuthError::Provider(message) => ApiError::Unavailable(message),
            other => ApiError::Unexpected {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Message shown to the curator for a failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// Form control the message belongs to, for inline validation errors.
    pub field: Option<String>,
}

impl Notification {
    pub fn info(title: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            title: title.to_string(),
            message: message.into(),
            field: None,
        }
    }

    pub fn warning(title: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::info(title, message)
        }
    }
}

impl From<&ApiError> for Notification {
    fn from(err: &ApiError) -> Self {
        match err {
            ApiError::Unavailable(_) => Notification {
                severity: Severity::Error,
                title: "Service unavailable".to_string(),
                message: "The mapping service cannot be reached. Check your connection and try again."
                    .to_string(),
                field: None,
            },
            ApiError::NotAuthorized { .. } => Notification {
                severity: Severity::Error,
                title: "Not authorized".to_string(),
                message: "Your session has expired or you lack access. Run `snap2snomed login-url` to sign in again."
                    .to_string(),
                field: None,
            },
            ApiError::Validation { message, field, .. } => Notification {
                severity: Severity::Warning,
                title: "Invalid request".to_string(),
                message: message.clone(),
                field: field.clone(),
            },
            ApiError::Unexpected { .. } => Notification {
                severity: Severity::Error,
                title: "Something went wrong".to_string(),
                message: "An unexpected error occurred. It has been logged.".to_string(),
                field: None,
            },
        }
    }
}
