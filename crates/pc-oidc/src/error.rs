//! Login Error Types
//!
//! `LoginError` is the per-request taxonomy; each variant maps to exactly one
//! HTTP status. Detail strings are for logs only and never reach the response
//! body, which carries a fixed public message.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failure of a single login request.
#[derive(Error, Debug)]
pub enum LoginError {
    #[error("can't create state parameter: {0}")]
    StateGeneration(String),

    #[error("login session expired")]
    SessionExpired,

    #[error("state did not match")]
    StateMismatch,

    #[error("dev token login not allowed")]
    DevLoginDisabled,

    #[error("failed to exchange code for token: {0}")]
    Exchange(String),

    #[error("IdP did not send an id token")]
    MissingIdToken,

    #[error("id token verification failed: {0}")]
    Verification(String),

    #[error("login completion failed: {0}")]
    Hook(#[source] anyhow::Error),

    #[error("failed to render token dump: {0}")]
    Dump(#[from] serde_json::Error),
}

impl LoginError {
    pub fn status(&self) -> StatusCode {
        match self {
            LoginError::SessionExpired | LoginError::StateMismatch => StatusCode::BAD_REQUEST,
            LoginError::DevLoginDisabled => StatusCode::FORBIDDEN,
            LoginError::StateGeneration(_)
            | LoginError::Exchange(_)
            | LoginError::MissingIdToken
            | LoginError::Verification(_)
            | LoginError::Hook(_)
            | LoginError::Dump(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LoginError::StateGeneration(_) => "STATE_GENERATION_FAILED",
            LoginError::SessionExpired => "LOGIN_SESSION_EXPIRED",
            LoginError::StateMismatch => "STATE_MISMATCH",
            LoginError::DevLoginDisabled => "ACCESS_DENIED",
            LoginError::Exchange(_) => "TOKEN_EXCHANGE_FAILED",
            LoginError::MissingIdToken => "MISSING_ID_TOKEN",
            LoginError::Verification(_) => "ID_TOKEN_INVALID",
            LoginError::Hook(_) => "LOGIN_FAILED",
            LoginError::Dump(_) => "DUMP_FAILED",
        }
    }

    /// Message shown to the browser.
    pub fn public_message(&self) -> &'static str {
        match self {
            LoginError::StateGeneration(_) => "can't create state parameter",
            LoginError::SessionExpired => "login session expired",
            LoginError::StateMismatch => "state did not match",
            LoginError::DevLoginDisabled => "access denied",
            LoginError::Exchange(_) => "failed to exchange code for token",
            LoginError::MissingIdToken => "IdP did not send an id token",
            LoginError::Verification(_) => "id token verification failed",
            LoginError::Hook(_) => "Login failed",
            LoginError::Dump(_) => "Internal Server Error",
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.public_message().to_string(),
        };

        (self.status(), Json(body)).into_response()
    }
}

/// Failure talking to an identity provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("failed to parse response from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("issuer mismatch: configured {expected}, discovered {discovered}")]
    IssuerMismatch { expected: String, discovered: String },

    #[error("call cancelled")]
    Cancelled,

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("no signing key matches kid {0:?}")]
    UnknownKey(Option<String>),

    #[error("invalid id token: {0}")]
    InvalidToken(String),
}

impl ProviderError {
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken(message.into())
    }
}

/// Failure constructing an `OidcClient`.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid client configuration: {0}")]
    InvalidConfiguration(String),

    #[error("OIDC discovery failed for {issuer}: {source}")]
    Discovery {
        issuer: String,
        #[source]
        source: ProviderError,
    },
}

impl ClientError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(LoginError::SessionExpired.status(), StatusCode::BAD_REQUEST);
        assert_eq!(LoginError::StateMismatch.status(), StatusCode::BAD_REQUEST);
        assert_eq!(LoginError::DevLoginDisabled.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            LoginError::StateGeneration("os rng".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            LoginError::Exchange("invalid_grant".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(LoginError::MissingIdToken.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            LoginError::Verification("bad signature".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            LoginError::Hook(anyhow::anyhow!("db down")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_public_message_hides_detail() {
        let err = LoginError::Exchange("client_secret=hunter2 rejected".into());
        assert_eq!(err.public_message(), "failed to exchange code for token");
        assert!(!err.public_message().contains("hunter2"));
    }
}
