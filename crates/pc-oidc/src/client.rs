//! OIDC Login Client
//!
//! Flow:
//! 1. `begin_login` - issue a sealed state, set it as a cookie, redirect to the IdP
//!    (or straight back to the callback with a developer token)
//! 2. User authenticates at the IdP
//! 3. `complete_login` - check the state, exchange the code, verify the ID token,
//!    run the completion hook and pick the frontend redirect
//!
//! `OidcClientBuilder` carries every setting; the built `OidcClient` is
//! immutable and shared between requests behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::context::CallContext;
use crate::dump::TokenDump;
use crate::error::{ClientError, LoginError};
use crate::hook::{AcceptAll, CompletedLogin, LoginCompletion, LoginOutcome};
use crate::provider::{
    AuthorizationRequest, DiscoveredProvider, ExchangeRequest, IdentityProvider,
    VerificationPolicy, DEFAULT_SCOPES,
};
use crate::state::{states_match, LoginState, StateSealer, STATE_COOKIE};
use crate::token::{OAuth2Token, VerifiedIdentity};
use crate::{DEFAULT_CALL_TIMEOUT, DEFAULT_COOKIE_PATH, DEFAULT_LOGIN_TIMEOUT};

/// First value of `name`; later repeats are ignored.
fn first_param(pairs: &[(String, String)], name: &str) -> Option<String> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}

/// Query parameters accepted by the login endpoint
#[derive(Debug, Clone, Default)]
pub struct LoginQuery {
    /// Raw ID token for developer login
    pub token: Option<String>,
}

impl LoginQuery {
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        Self {
            token: first_param(pairs, "token"),
        }
    }
}

/// Query parameters sent back by the IdP (or the developer redirect)
#[derive(Debug, Clone, Default)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
    /// Raw ID token for developer login
    pub token: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackQuery {
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        Self {
            state: first_param(pairs, "state"),
            code: first_param(pairs, "code"),
            token: first_param(pairs, "token"),
            error: first_param(pairs, "error"),
            error_description: first_param(pairs, "error_description"),
        }
    }
}

/// Everything needed to answer a login request.
#[derive(Debug)]
pub struct LoginStart {
    pub state: LoginState,
    pub cookie: Cookie<'static>,
    pub location: String,
}

/// Callback that passed state, exchange and verification.
#[derive(Debug)]
pub struct AuthenticatedLogin {
    /// `None` on the developer-token path
    pub token: Option<OAuth2Token>,
    pub raw_id_token: String,
    pub identity: VerifiedIdentity,
}

/// Final redirect of a finished callback.
#[derive(Debug)]
pub struct CompletedRedirect {
    pub location: String,
    /// Cookies supplied by the completion hook
    pub cookies: Vec<Cookie<'static>>,
}

/// Builder for `OidcClient`.
pub struct OidcClientBuilder {
    name: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    frontend_url: String,
    allow_dev_login: bool,
    skip_expiry_check: bool,
    login_timeout: Duration,
    cookie_path: String,
    call_timeout: Duration,
    token_dump: bool,
    clock: Arc<dyn Clock>,
    completion: Arc<dyn LoginCompletion>,
}

impl OidcClientBuilder {
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            frontend_url: frontend_url.into(),
            allow_dev_login: false,
            skip_expiry_check: false,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            cookie_path: DEFAULT_COOKIE_PATH.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            token_dump: false,
            clock: Arc::new(SystemClock),
            completion: Arc::new(AcceptAll),
        }
    }

    /// Accept raw ID tokens passed as `token` instead of the IdP round trip.
    pub fn allow_dev_login(mut self, allow: bool) -> Self {
        self.allow_dev_login = allow;
        self
    }

    /// Accept expired ID tokens. Testing only.
    pub fn skip_expiry_check(mut self, skip: bool) -> Self {
        self.skip_expiry_check = skip;
        self
    }

    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    pub fn cookie_path(mut self, path: impl Into<String>) -> Self {
        self.cookie_path = path.into();
        self
    }

    /// Deadline for each outbound IdP call.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Mount the diagnostic `/dump` route.
    pub fn token_dump(mut self, enabled: bool) -> Self {
        self.token_dump = enabled;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn completion(mut self, completion: Arc<dyn LoginCompletion>) -> Self {
        self.completion = completion;
        self
    }

    fn validate(&self) -> Result<StateSealer, ClientError> {
        if self.name.trim().is_empty() {
            return Err(ClientError::invalid("name must not be empty"));
        }
        if self.client_id.is_empty() {
            return Err(ClientError::invalid("client_id must not be empty"));
        }
        if self.client_secret.is_empty() {
            return Err(ClientError::invalid("client_secret must not be empty"));
        }
        if !is_absolute_url(&self.redirect_url) {
            return Err(ClientError::invalid(format!(
                "redirect_url must be an absolute http(s) URL, got '{}'",
                self.redirect_url
            )));
        }
        if !is_absolute_url(&self.frontend_url) {
            return Err(ClientError::invalid(format!(
                "frontend_url must be an absolute http(s) URL, got '{}'",
                self.frontend_url
            )));
        }
        if self.login_timeout.is_zero() {
            return Err(ClientError::invalid("login_timeout must be positive"));
        }
        if self.call_timeout.is_zero() {
            return Err(ClientError::invalid("call_timeout must be positive"));
        }
        if !self.cookie_path.starts_with('/') || self.cookie_path == "/" {
            return Err(ClientError::invalid(format!(
                "cookie_path must be an absolute path below the site root, got '{}'",
                self.cookie_path
            )));
        }

        StateSealer::new(self.client_secret.as_bytes())
    }

    /// Build on top of an existing provider gateway.
    pub fn with_provider(self, provider: Arc<dyn IdentityProvider>) -> Result<OidcClient, ClientError> {
        let sealer = self.validate()?;

        if self.skip_expiry_check {
            warn!(provider = %self.name, "ID token expiry check disabled");
        }
        if self.allow_dev_login {
            warn!(provider = %self.name, "Developer token login enabled");
        }

        Ok(OidcClient {
            name: self.name,
            client_id: self.client_id,
            client_secret: self.client_secret,
            redirect_url: self.redirect_url,
            frontend_url: self.frontend_url,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            allow_dev_login: self.allow_dev_login,
            skip_expiry_check: self.skip_expiry_check,
            login_timeout: self.login_timeout,
            cookie_path: self.cookie_path,
            call_timeout: self.call_timeout,
            token_dump: self.token_dump,
            sealer,
            provider,
            clock: self.clock,
            completion: self.completion,
        })
    }

    /// Discover `issuer_url` and build. Configuration is validated before
    /// any network call; discovery is attempted once.
    pub async fn discover(self, issuer_url: &str) -> Result<OidcClient, ClientError> {
        self.validate()?;

        let ctx = CallContext::detached(self.call_timeout);
        let provider = DiscoveredProvider::discover(issuer_url, &ctx)
            .await
            .map_err(|source| ClientError::Discovery {
                issuer: issuer_url.to_string(),
                source,
            })?;

        self.with_provider(Arc::new(provider))
    }
}

fn is_absolute_url(url: &str) -> bool {
    ["https://", "http://"]
        .iter()
        .filter_map(|scheme| url.strip_prefix(scheme))
        .any(|rest| !rest.is_empty() && !rest.starts_with('/'))
}

/// Append `param=value` to `base`, respecting an existing query.
fn append_query(base: &str, param: &str, value: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", base, separator, param, urlencoding::encode(value))
}

/// One configured IdP login.
pub struct OidcClient {
    name: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    frontend_url: String,
    scopes: Vec<String>,
    allow_dev_login: bool,
    skip_expiry_check: bool,
    login_timeout: Duration,
    cookie_path: String,
    call_timeout: Duration,
    token_dump: bool,
    sealer: StateSealer,
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    completion: Arc<dyn LoginCompletion>,
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("name", &self.name)
            .field("issuer", &self.provider.issuer())
            .field("client_id", &self.client_id)
            .field("redirect_url", &self.redirect_url)
            .field("frontend_url", &self.frontend_url)
            .field("allow_dev_login", &self.allow_dev_login)
            .field("skip_expiry_check", &self.skip_expiry_check)
            .field("login_timeout", &self.login_timeout)
            .field("cookie_path", &self.cookie_path)
            .finish_non_exhaustive()
    }
}

impl OidcClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn issuer(&self) -> &str {
        self.provider.issuer()
    }

    pub fn frontend_url(&self) -> &str {
        &self.frontend_url
    }

    pub fn cookie_path(&self) -> &str {
        &self.cookie_path
    }

    pub fn login_timeout(&self) -> Duration {
        self.login_timeout
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn dev_login_allowed(&self) -> bool {
        self.allow_dev_login
    }

    pub fn token_dump_enabled(&self) -> bool {
        self.token_dump
    }

    /// Start a login attempt.
    ///
    /// `nonce` is forwarded to the IdP untouched when non-empty. The returned
    /// cookie must be set on the same response that carries the redirect.
    pub fn begin_login(&self, dev_token: Option<&str>, nonce: Option<&str>) -> Result<LoginStart, LoginError> {
        let state = self.sealer.issue(self.clock.now()).map_err(|e| {
            error!(provider = %self.name, error = %e, "Failed to generate login state");
            e
        })?;

        let location = match dev_token.filter(|t| !t.is_empty()) {
            Some(_) if !self.allow_dev_login => {
                warn!(provider = %self.name, "Developer token login attempted while disabled");
                return Err(LoginError::DevLoginDisabled);
            }
            Some(token) => {
                debug!(provider = %self.name, state = %state.as_str(), "Developer login, bypassing IdP");
                let url = append_query(&self.redirect_url, "token", token);
                append_query(&url, "state", state.as_str())
            }
            None => self.provider.authorization_url(&AuthorizationRequest {
                client_id: &self.client_id,
                redirect_url: &self.redirect_url,
                scopes: &self.scopes,
                state: state.as_str(),
                nonce,
            }),
        };

        info!(provider = %self.name, state = %state.as_str(), "Login started");

        Ok(LoginStart {
            cookie: state.cookie(&self.cookie_path, self.login_timeout),
            state,
            location,
        })
    }

    /// Check the state, obtain and verify the ID token.
    pub async fn authenticate_callback(
        &self,
        query: &CallbackQuery,
        cookies: &CookieJar,
        ctx: &CallContext,
    ) -> Result<AuthenticatedLogin, LoginError> {
        let presented = query.state.as_deref().unwrap_or_default();

        let Some(expected) = cookies.get(STATE_COOKIE).map(|c| c.value()).filter(|v| !v.is_empty()) else {
            warn!(provider = %self.name, state = %presented, "Callback without state cookie");
            return Err(LoginError::SessionExpired);
        };

        if !states_match(presented, expected) {
            warn!(provider = %self.name, state = %presented, "State did not match cookie");
            return Err(LoginError::StateMismatch);
        }

        if let Err(rejection) = self.sealer.open(expected, self.clock.now(), self.login_timeout) {
            warn!(provider = %self.name, state = %presented, reason = %rejection, "State rejected");
            return Err(LoginError::StateMismatch);
        }

        let (token, raw_id_token) = match query.token.as_deref().filter(|t| !t.is_empty()) {
            Some(_) if !self.allow_dev_login => {
                warn!(provider = %self.name, "Developer token callback while dev login disabled");
                return Err(LoginError::DevLoginDisabled);
            }
            Some(raw) => (None, raw.to_string()),
            None => {
                let token = self.exchange(query, ctx).await?;
                let Some(raw) = token.id_token().map(String::from) else {
                    error!(provider = %self.name, "Token response carried no id_token");
                    return Err(LoginError::MissingIdToken);
                };
                (Some(token), raw)
            }
        };

        let policy = VerificationPolicy {
            audience: &self.client_id,
            check_expiry: !self.skip_expiry_check,
        };
        let identity = self
            .provider
            .verify_id_token(&raw_id_token, &policy, ctx)
            .await
            .map_err(|e| {
                error!(provider = %self.name, error = %e, "ID token verification failed");
                LoginError::Verification(e.to_string())
            })?;

        debug!(provider = %self.name, subject = %identity.subject, "ID token verified");

        Ok(AuthenticatedLogin {
            token,
            raw_id_token,
            identity,
        })
    }

    async fn exchange(&self, query: &CallbackQuery, ctx: &CallContext) -> Result<OAuth2Token, LoginError> {
        if let Some(idp_error) = query.error.as_deref() {
            let description = query.error_description.as_deref().unwrap_or_default();
            error!(provider = %self.name, error = %idp_error, description = %description, "IdP returned an error");
            return Err(LoginError::Exchange(format!("IdP error {}: {}", idp_error, description)));
        }

        let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
            error!(provider = %self.name, "Callback without authorization code");
            return Err(LoginError::Exchange("missing authorization code".to_string()));
        };

        let request = ExchangeRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            redirect_url: &self.redirect_url,
            code,
        };
        self.provider.exchange_code(&request, ctx).await.map_err(|e| {
            error!(provider = %self.name, error = %e, "Token exchange failed");
            LoginError::Exchange(e.to_string())
        })
    }

    /// Run the whole callback and decide where the browser goes next.
    pub async fn complete_login(
        &self,
        query: &CallbackQuery,
        cookies: &CookieJar,
        ctx: &CallContext,
    ) -> Result<CompletedRedirect, LoginError> {
        let login = self.authenticate_callback(query, cookies, ctx).await?;

        let completed = CompletedLogin {
            provider: &self.name,
            token: login.token.as_ref(),
            raw_id_token: &login.raw_id_token,
            identity: &login.identity,
            cookies,
        };

        match self.completion.complete(&completed).await {
            LoginOutcome::Success { cookies } => {
                info!(provider = %self.name, subject = %login.identity.subject, "Login completed");
                Ok(CompletedRedirect {
                    location: self.frontend_url.clone(),
                    cookies,
                })
            }
            LoginOutcome::Incomplete { gap, cookies } => {
                warn!(
                    provider = %self.name,
                    subject = %login.identity.subject,
                    marker = gap.marker(),
                    "Login incomplete, redirecting to frontend"
                );
                Ok(CompletedRedirect {
                    location: append_query(&self.frontend_url, gap.marker(), "1"),
                    cookies,
                })
            }
            LoginOutcome::Failed(e) => {
                error!(provider = %self.name, subject = %login.identity.subject, error = %e, "Login completion failed");
                Err(LoginError::Hook(e))
            }
        }
    }

    /// Redacted rendering of a verified callback for debugging.
    pub fn dump_token(&self, login: &AuthenticatedLogin) -> Result<String, LoginError> {
        let rendered = TokenDump::new(login.token.as_ref(), &login.identity).render()?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_url() {
        assert!(is_absolute_url("https://app.example.org"));
        assert!(is_absolute_url("http://localhost:8080/cb"));
        assert!(!is_absolute_url("/relative"));
        assert!(!is_absolute_url("https://"));
        assert!(!is_absolute_url("ftp://example.org"));
        assert!(!is_absolute_url(""));
    }

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_repeated_parameters_keep_first_value() {
        let login = LoginQuery::from_pairs(&pairs(&[("token", "a.b.c"), ("token", "d.e.f")]));
        assert_eq!(login.token.as_deref(), Some("a.b.c"));

        let callback = CallbackQuery::from_pairs(&pairs(&[
            ("state", "s1"),
            ("code", "c1"),
            ("state", "s2"),
            ("token", "t1"),
            ("token", "t2"),
        ]));
        assert_eq!(callback.state.as_deref(), Some("s1"));
        assert_eq!(callback.code.as_deref(), Some("c1"));
        assert_eq!(callback.token.as_deref(), Some("t1"));
        assert!(callback.error.is_none());
    }

    #[test]
    fn test_append_query() {
        assert_eq!(append_query("https://a.example/", "missingorg", "1"), "https://a.example/?missingorg=1");
        assert_eq!(
            append_query("https://a.example/?lang=fi", "missingcsc", "1"),
            "https://a.example/?lang=fi&missingcsc=1"
        );
        assert_eq!(append_query("https://a.example/cb", "token", "a b"), "https://a.example/cb?token=a%20b");
    }
}
