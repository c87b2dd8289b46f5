//! Authentication and authorization error types.
//!
//! Two families of errors live here. The internal taxonomy (validation,
//! authentication, authorization, conflict) is rendered as
//! `{"error": {"code", "message", "details"}}`, while OAuth protocol errors
//! keep their RFC 6749 codes and are rendered as `{"error", "error_description"}`.

use std::fmt;

use crate::storage::StorageError;
use crate::token::jwt::JwtError;

/// Errors that can occur during authentication and authorization operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed or missing input.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what is wrong with the input.
        message: String,
        /// Optional structured details (e.g. per-field problems).
        details: Option<serde_json::Value>,
    },

    /// Missing, invalid or expired credential or token.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Message safe to show to the caller.
        message: String,
    },

    /// The caller is authenticated but lacks the role, permission or scope.
    #[error("Forbidden: {message}")]
    Authorization {
        /// Description of the missing grant.
        message: String,
    },

    /// The resource already exists.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting resource.
        message: String,
    },

    /// The requested resource does not exist.
    #[error("Not found: {message}")]
    NotFound {
        /// Description of the missing resource.
        message: String,
    },

    /// The OAuth request is missing a parameter or is otherwise malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The client is unknown or failed authentication.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
        /// `true` when the client failed credential verification (401),
        /// `false` when the client id is simply unknown at `/authorize` (400).
        unauthorized: bool,
    },

    /// The authorization code or refresh token is invalid, expired, used or revoked.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The client is not registered for the grant type it used.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of the disallowed grant.
        message: String,
    },

    /// The requested scope is malformed.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// The grant type is not supported by this server.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The response type is not supported by this server.
    #[error("Unsupported response type: {response_type}")]
    UnsupportedResponseType {
        /// The unsupported response type.
        response_type: String,
    },

    /// An error occurred while storing or retrieving auth data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The auth configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    /// Creates a new `Validation` error carrying structured details.
    #[must_use]
    pub fn validation_with_details(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Creates a new `Authentication` error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates a new `Authorization` error.
    #[must_use]
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates an `InvalidClient` error for a client that failed authentication (401).
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
            unauthorized: true,
        }
    }

    /// Creates an `InvalidClient` error for an unknown client id (400).
    #[must_use]
    pub fn unknown_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
            unauthorized: false,
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `UnsupportedResponseType` error.
    #[must_use]
    pub fn unsupported_response_type(response_type: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            response_type: response_type.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is caused by the caller (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this error is caused by the server (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` for errors that carry an RFC 6749 error code.
    #[must_use]
    pub fn is_oauth_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::InvalidClient { .. }
                | Self::InvalidGrant { .. }
                | Self::UnauthorizedClient { .. }
                | Self::InvalidScope { .. }
                | Self::UnsupportedGrantType { .. }
                | Self::UnsupportedResponseType { .. }
        )
    }

    /// Returns `true` if this is an authentication failure.
    #[must_use]
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::InvalidClient {
                    unauthorized: true,
                    ..
                }
        )
    }

    /// Returns the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. }
            | Self::InvalidRequest { .. }
            | Self::InvalidGrant { .. }
            | Self::UnauthorizedClient { .. }
            | Self::InvalidScope { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::UnsupportedResponseType { .. }
            | Self::InvalidClient {
                unauthorized: false,
                ..
            } => ErrorCategory::Validation,
            Self::Authentication { .. }
            | Self::InvalidClient {
                unauthorized: true,
                ..
            } => ErrorCategory::Authentication,
            Self::Authorization { .. } => ErrorCategory::Authorization,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                ErrorCategory::Server
            }
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.category().status_code()
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } | Self::Validation { .. } => "invalid_request",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::UnsupportedResponseType { .. } => "unsupported_response_type",
            Self::Authentication { .. } => "invalid_token",
            Self::Authorization { .. } => "insufficient_scope",
            Self::Conflict { .. } | Self::NotFound { .. } => "invalid_request",
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "server_error"
            }
        }
    }

    /// Returns the machine-readable code used in the internal error envelope.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Validation => "VALIDATION_ERROR",
            ErrorCategory::Authentication => "AUTHENTICATION_ERROR",
            ErrorCategory::Authorization => "AUTHORIZATION_ERROR",
            ErrorCategory::Conflict => "CONFLICT",
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::Server => "INTERNAL_ERROR",
        }
    }

    /// Returns the caller-facing message without the variant prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Validation { message, .. }
            | Self::Authentication { message }
            | Self::Authorization { message }
            | Self::Conflict { message }
            | Self::NotFound { message }
            | Self::InvalidRequest { message }
            | Self::InvalidClient { message, .. }
            | Self::InvalidGrant { message }
            | Self::UnauthorizedClient { message }
            | Self::InvalidScope { message }
            | Self::Storage { message }
            | Self::Configuration { message }
            | Self::Internal { message } => message.clone(),
            Self::UnsupportedGrantType { grant_type } => {
                format!("Unsupported grant type: {grant_type}")
            }
            Self::UnsupportedResponseType { response_type } => {
                format!("Unsupported response type: {response_type}")
            }
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(message) => Self::Conflict { message },
            StorageError::NotFound(message) => Self::NotFound { message },
            StorageError::InvalidInput(message) => Self::validation(message),
            other => Self::storage(other.to_string()),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        if err.is_validation_error() {
            Self::authentication(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

/// Categories of errors, one per HTTP status class the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed input (400).
    Validation,
    /// Missing or invalid credentials (401).
    Authentication,
    /// Insufficient role, permission or scope (403).
    Authorization,
    /// Duplicate resource (409).
    Conflict,
    /// Missing resource (404).
    NotFound,
    /// Server-side failure (500).
    Server,
}

impl ErrorCategory {
    /// HTTP status code for the category.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Authentication => 401,
            Self::Authorization => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Server => 500,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Conflict => write!(f, "conflict"),
            Self::NotFound => write!(f, "not_found"),
            Self::Server => write!(f, "server"),
        }
    }
}
