//! Portcullis OIDC Login
//!
//! Server-side OpenID Connect Authorization Code login:
//! - CSRF state sealed with the client secret and bound to a cookie
//! - Code exchange and ID token verification behind `IdentityProvider`
//! - Application completion hook with recoverable profile markers
//! - Optional developer-token login and redacted token dump

use std::time::Duration;

pub mod api;
pub mod client;
pub mod clock;
pub mod context;
pub mod dump;
pub mod error;
pub mod hook;
pub mod provider;
pub mod state;
pub mod token;

pub use api::auth_router;
pub use client::{
    AuthenticatedLogin, CallbackQuery, CompletedRedirect, LoginQuery, LoginStart, OidcClient,
    OidcClientBuilder,
};
pub use clock::{Clock, SystemClock};
pub use context::CallContext;
pub use error::{ClientError, ErrorResponse, LoginError, ProviderError};
pub use hook::{AcceptAll, CompletedLogin, LoginCompletion, LoginOutcome, ProfileGap};
pub use provider::{
    AuthorizationRequest, DiscoveredProvider, ExchangeRequest, IdentityProvider, ProviderMetadata,
    VerificationPolicy,
};
pub use state::{LoginState, STATE_COOKIE};
pub use token::{OAuth2Token, RedactedToken, VerifiedIdentity};

/// How long a login attempt may take between redirect and callback.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(600);

/// Path the state cookie is scoped to.
pub const DEFAULT_COOKIE_PATH: &str = "/api/auth";

/// Deadline for a single call to the identity provider.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
