//! Login Completion Hook
//!
//! The application plugs account resolution into the callback through
//! `LoginCompletion`. It runs only after the ID token has been verified and
//! decides between success, a recoverable profile gap, and failure.

use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::token::{OAuth2Token, VerifiedIdentity};

/// Verified material handed to the completion hook.
#[derive(Debug)]
pub struct CompletedLogin<'a> {
    /// Name of the provider configuration that handled the login
    pub provider: &'a str,
    /// Token bundle; `None` on the developer-token path
    pub token: Option<&'a OAuth2Token>,
    pub raw_id_token: &'a str,
    pub identity: &'a VerifiedIdentity,
    /// Cookies sent with the callback request
    pub cookies: &'a CookieJar,
}

/// A profile condition the frontend knows how to recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileGap {
    /// The IdP account has no application user identifier yet.
    MissingUserId,
    /// The user belongs to no organization.
    MissingOrganization,
}

impl ProfileGap {
    /// Query parameter name appended to the frontend URL.
    pub fn marker(&self) -> &'static str {
        match self {
            ProfileGap::MissingUserId => "missingcsc",
            ProfileGap::MissingOrganization => "missingorg",
        }
    }
}

/// Result of running the completion hook.
#[derive(Debug)]
pub enum LoginOutcome {
    /// Login finished; `cookies` are set on the final redirect.
    Success { cookies: Vec<Cookie<'static>> },
    /// Redirect to the frontend with the gap's marker; `cookies` are set on
    /// that redirect so the frontend can collect the missing data.
    Incomplete {
        gap: ProfileGap,
        cookies: Vec<Cookie<'static>>,
    },
    /// Abort the login with a 500.
    Failed(anyhow::Error),
}

impl LoginOutcome {
    pub fn success() -> Self {
        LoginOutcome::Success { cookies: Vec::new() }
    }

    pub fn success_with_cookies(cookies: Vec<Cookie<'static>>) -> Self {
        LoginOutcome::Success { cookies }
    }

    pub fn incomplete(gap: ProfileGap) -> Self {
        LoginOutcome::Incomplete {
            gap,
            cookies: Vec::new(),
        }
    }
}

#[async_trait]
pub trait LoginCompletion: Send + Sync {
    async fn complete(&self, login: &CompletedLogin<'_>) -> LoginOutcome;
}

/// Hook used when none is configured: every verified login succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl LoginCompletion for AcceptAll {
    async fn complete(&self, _login: &CompletedLogin<'_>) -> LoginOutcome {
        LoginOutcome::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers() {
        assert_eq!(ProfileGap::MissingUserId.marker(), "missingcsc");
        assert_eq!(ProfileGap::MissingOrganization.marker(), "missingorg");
    }
}
