//! Error types for the OAuth server and client engines.
//!
//! Protocol errors ([`OAuthError`]) and internal failures ([`InternalError`])
//! are kept as separate types so internal detail never reaches an OAuth
//! `error_description`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// OAuth 2.0 error codes (RFC 6749 §4.1.2.1, §5.2 and RFC 6750 §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidResource,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedResponseType,
    AccessDenied,
    InvalidToken,
    InsufficientScope,
    ServerError,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidResource => "invalid_resource",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::AccessDenied => "access_denied",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientScope => "insufficient_scope",
            Self::ServerError => "server_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol-level error, reported to the caller as an OAuth error response.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {description}")]
pub struct OAuthError {
    /// OAuth error code
    pub code: ErrorCode,
    /// Human readable `error_description`
    pub description: String,
}

impl OAuthError {
    #[must_use]
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self { code, description: description.into() }
    }

    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, description)
    }

    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidGrant, description)
    }

    #[must_use]
    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, description)
    }

    #[must_use]
    pub fn server_error(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServerError, description)
    }
}

/// Failures that must surface as a generic 5xx, never as an OAuth error body.
#[derive(thiserror::Error, Debug)]
pub enum InternalError {
    /// The access token generator could not produce a token
    #[error("access token generation failed")]
    TokenGeneration,

    /// A freshly generated token id is already registered
    #[error("access token id collision for client {client_id}")]
    TokenCollision { client_id: String },

    /// A freshly generated authorization code is already registered
    #[error("authorization code collision")]
    GrantCollision,

    /// Certificate issuance for a resource request failed
    #[error("certificate issuance failed")]
    CertificateIssuance,

    /// Server configuration does not allow the operation
    #[error("misconfiguration: {0}")]
    Misconfigured(String),
}

/// Result of an authorization server operation: either channel may fail.
#[derive(thiserror::Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    OAuth(#[from] OAuthError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl RequestError {
    /// Returns the protocol error, if this is one.
    #[must_use]
    pub const fn as_oauth(&self) -> Option<&OAuthError> {
        match self {
            Self::OAuth(err) => Some(err),
            Self::Internal(_) => None,
        }
    }
}

/// Errors loading client or resource registers.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Register file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Register file is not valid TOML for the expected layout
    #[error("invalid register file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Register content is inconsistent
    #[error("invalid register entry: {0}")]
    Invalid(String),
}

/// Lookup failures against the client and resource registers.
///
/// The messages are sent to callers as `error_description`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Client of id \"{0}\" is not registered.")]
    UnknownClient(String),

    #[error("No redirect URI is registered for the client or specified in the request.")]
    NoRedirectUri,

    #[error("Redirect URI is not registered.")]
    UnregisteredRedirectUri,

    #[error("Resource of id \"{0}\" is not registered.")]
    UnknownResource(String),
}

/// Errors from a credential backend `logon` call.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential backend rejected logon ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("credential backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the client engine.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// The authorization server reported an error, or the redirect was not legitimate
    #[error("access token retrieval failed: {error}{}", .description.as_deref().map(|d| format!(" - {d}")).unwrap_or_default())]
    AccessTokenRetrieval {
        error: String,
        description: Option<String>,
    },

    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not the expected JSON
    #[error("Failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// A configured endpoint is not a valid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Unexpected HTTP status
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// Key pair or certificate signing request generation failed
    #[error("certificate request generation failed: {0}")]
    CertificateRequest(String),

    /// Client used in a state that its configuration does not allow
    #[error("client configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Create an access token retrieval error.
    #[must_use]
    pub fn retrieval(error: impl Into<String>, description: Option<String>) -> Self {
        Self::AccessTokenRetrieval { error: error.into(), description }
    }

    /// The OAuth `error` value, if the failure was reported by the protocol.
    #[must_use]
    pub fn oauth_error(&self) -> Option<&str> {
        match self {
            Self::AccessTokenRetrieval { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Result type alias for client engine operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type alias for register loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(ErrorCode::InvalidGrant.as_str(), "invalid_grant");
        assert_eq!(ErrorCode::InsufficientScope.to_string(), "insufficient_scope");
        assert_eq!(
            serde_json::to_value(ErrorCode::UnsupportedResponseType).unwrap(),
            serde_json::json!("unsupported_response_type")
        );
    }

    #[test]
    fn test_oauth_error_display() {
        let err = OAuthError::invalid_grant("Authorization grant expired");
        assert_eq!(err.to_string(), "invalid_grant: Authorization grant expired");
    }

    #[test]
    fn test_request_error_channels() {
        let err: RequestError = OAuthError::invalid_request("Missing code").into();
        assert_eq!(err.as_oauth().map(|e| e.code), Some(ErrorCode::InvalidRequest));

        let err: RequestError = InternalError::TokenGeneration.into();
        assert!(err.as_oauth().is_none());
    }

    #[test]
    fn test_client_error_message() {
        let err = ClientError::retrieval("invalid_grant", Some("Invalid authorization code".into()));
        assert_eq!(err.oauth_error(), Some("invalid_grant"));
        assert!(err.to_string().contains("Invalid authorization code"));

        let err = ClientError::retrieval("access_denied", None);
        assert_eq!(err.to_string(), "access token retrieval failed: access_denied");
    }
}
