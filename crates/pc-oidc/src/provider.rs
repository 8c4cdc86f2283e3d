//! Identity Provider Gateway
//!
//! `IdentityProvider` is the only way the login flow talks to an IdP:
//! building the authorization redirect, exchanging a code, and verifying an
//! ID token. `DiscoveredProvider` implements it over HTTP from the issuer's
//! `.well-known/openid-configuration` and JWKS documents.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::context::CallContext;
use crate::error::ProviderError;
use crate::token::{OAuth2Token, TokenResponse, VerifiedIdentity};

/// Scopes requested on every login.
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email"];

/// How long fetched signing keys are trusted before a refetch.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// An unknown `kid` triggers a refetch at most this often.
const JWKS_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Longest error body kept from a failed IdP response.
const MAX_ERROR_BODY: usize = 512;

/// Parameters of the redirect to the authorization endpoint.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub client_id: &'a str,
    pub redirect_url: &'a str,
    pub scopes: &'a [String],
    pub state: &'a str,
    /// Opaque application data forwarded as `nonce`
    pub nonce: Option<&'a str>,
}

/// Parameters of an authorization code exchange.
pub struct ExchangeRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub redirect_url: &'a str,
    pub code: &'a str,
}

/// What an ID token must satisfy beyond a valid signature.
#[derive(Debug, Clone, Copy)]
pub struct VerificationPolicy<'a> {
    pub audience: &'a str,
    pub check_expiry: bool,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Issuer identifier tokens must carry
    fn issuer(&self) -> &str;

    /// URL the browser is sent to for authentication
    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> String;

    /// Exchange an authorization code at the token endpoint
    async fn exchange_code(
        &self,
        request: &ExchangeRequest<'_>,
        ctx: &CallContext,
    ) -> Result<OAuth2Token, ProviderError>;

    /// Verify signature, issuer, audience and (per policy) expiry of a raw ID token
    async fn verify_id_token(
        &self,
        raw_id_token: &str,
        policy: &VerificationPolicy<'_>,
        ctx: &CallContext,
    ) -> Result<VerifiedIdentity, ProviderError>;
}

/// Append the standard authorization code parameters to `endpoint`.
pub fn build_authorization_url(endpoint: &str, request: &AuthorizationRequest<'_>) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
        endpoint,
        separator,
        urlencoding::encode(request.client_id),
        urlencoding::encode(request.redirect_url),
        urlencoding::encode(&request.scopes.join(" ")),
        urlencoding::encode(request.state),
    );

    if let Some(nonce) = request.nonce.filter(|n| !n.is_empty()) {
        url.push_str(&format!("&nonce={}", urlencoding::encode(nonce)));
    }

    url
}

/// OIDC provider discovery document
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// JWKS (JSON Web Key Set)
#[derive(Debug, Clone, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

/// Individual JWK (JSON Web Key)
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default, rename = "use")]
    key_use: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

impl Jwk {
    fn is_signing_key(&self) -> bool {
        self.key_use.as_deref().map_or(true, |u| u == "sig")
    }

    fn supports(&self, alg: Algorithm) -> bool {
        let family_ok = match self.kty.as_str() {
            "RSA" => matches!(
                alg,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            "EC" => matches!(alg, Algorithm::ES256 | Algorithm::ES384),
            _ => false,
        };
        family_ok && self.alg.as_deref().map_or(true, |a| a == format!("{:?}", alg))
    }

    fn decoding_key(&self) -> Result<DecodingKey, ProviderError> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or_else(|| ProviderError::invalid_token("RSA key missing 'n' component"))?;
                let e = self.e.as_deref().ok_or_else(|| ProviderError::invalid_token("RSA key missing 'e' component"))?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| ProviderError::invalid_token(format!("invalid RSA key: {}", e)))
            }
            "EC" => {
                let x = self.x.as_deref().ok_or_else(|| ProviderError::invalid_token("EC key missing 'x' component"))?;
                let y = self.y.as_deref().ok_or_else(|| ProviderError::invalid_token("EC key missing 'y' component"))?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| ProviderError::invalid_token(format!("invalid EC key: {}", e)))
            }
            other => Err(ProviderError::invalid_token(format!("unsupported key type: {}", other))),
        }
    }
}

fn find_key<'a>(jwks: &'a Jwks, kid: Option<&str>) -> Option<&'a Jwk> {
    let mut signing = jwks.keys.iter().filter(|k| k.is_signing_key());
    match kid {
        Some(kid) => signing.find(|k| k.kid.as_deref() == Some(kid)),
        // Without a kid only an unambiguous single key is usable
        None => {
            let first = signing.next()?;
            signing.next().is_none().then_some(first)
        }
    }
}

struct KeyCache {
    jwks: Jwks,
    fetched_at: Instant,
}

/// HTTP identity provider built from OIDC discovery.
pub struct DiscoveredProvider {
    http: reqwest::Client,
    metadata: ProviderMetadata,
    keys: RwLock<KeyCache>,
}

impl DiscoveredProvider {
    /// Discover `issuer_url` and fetch its signing keys.
    pub async fn discover(issuer_url: &str, ctx: &CallContext) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(ctx.deadline())
            .build()
            .map_err(|source| ProviderError::Request {
                url: issuer_url.to_string(),
                source,
            })?;
        Self::discover_with_client(http, issuer_url, ctx).await
    }

    pub async fn discover_with_client(
        http: reqwest::Client,
        issuer_url: &str,
        ctx: &CallContext,
    ) -> Result<Self, ProviderError> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer_url.trim_end_matches('/')
        );
        info!(url = %discovery_url, "Fetching OIDC discovery document");

        let metadata: ProviderMetadata = ctx.run(get_json(&http, &discovery_url)).await?;
        if metadata.issuer.trim_end_matches('/') != issuer_url.trim_end_matches('/') {
            return Err(ProviderError::IssuerMismatch {
                expected: issuer_url.to_string(),
                discovered: metadata.issuer,
            });
        }

        debug!(jwks_uri = %metadata.jwks_uri, "Fetching JWKS");
        let jwks: Jwks = ctx.run(get_json(&http, &metadata.jwks_uri)).await?;
        info!(issuer = %metadata.issuer, keys = jwks.keys.len(), "OIDC provider discovered");

        Ok(Self {
            http,
            metadata,
            keys: RwLock::new(KeyCache {
                jwks,
                fetched_at: Instant::now(),
            }),
        })
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Find the key for `kid`, refetching the JWKS when stale or on an
    /// unknown key id (the IdP may have rotated keys).
    async fn signing_key(&self, kid: Option<&str>, ctx: &CallContext) -> Result<Jwk, ProviderError> {
        {
            let cache = self.keys.read().await;
            let age = cache.fetched_at.elapsed();
            if age < JWKS_CACHE_TTL {
                if let Some(key) = find_key(&cache.jwks, kid) {
                    return Ok(key.clone());
                }
                if age < JWKS_MIN_REFRESH_INTERVAL {
                    return Err(ProviderError::UnknownKey(kid.map(String::from)));
                }
            }
        }

        let jwks: Jwks = ctx.run(get_json(&self.http, &self.metadata.jwks_uri)).await?;
        let key = find_key(&jwks, kid).cloned();
        info!(keys = jwks.keys.len(), "JWKS cache refreshed");

        let mut cache = self.keys.write().await;
        *cache = KeyCache {
            jwks,
            fetched_at: Instant::now(),
        };

        key.ok_or_else(|| ProviderError::UnknownKey(kid.map(String::from)))
    }
}

#[async_trait]
impl IdentityProvider for DiscoveredProvider {
    fn issuer(&self) -> &str {
        &self.metadata.issuer
    }

    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> String {
        build_authorization_url(&self.metadata.authorization_endpoint, request)
    }

    async fn exchange_code(
        &self,
        request: &ExchangeRequest<'_>,
        ctx: &CallContext,
    ) -> Result<OAuth2Token, ProviderError> {
        let url = &self.metadata.token_endpoint;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", request.code),
            ("redirect_uri", request.redirect_url),
            ("client_id", request.client_id),
            ("client_secret", request.client_secret),
        ];

        ctx.run(async {
            let response = self
                .http
                .post(url)
                .header(ACCEPT, "application/json")
                .form(&params)
                .send()
                .await
                .map_err(|source| ProviderError::Request {
                    url: url.clone(),
                    source,
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                    body: truncated_body(response).await,
                });
            }

            let body: TokenResponse = response.json().await.map_err(|e| ProviderError::Parse {
                url: url.clone(),
                message: e.to_string(),
            })?;

            Ok(OAuth2Token::from_response(body, Utc::now()))
        })
        .await
    }

    async fn verify_id_token(
        &self,
        raw_id_token: &str,
        policy: &VerificationPolicy<'_>,
        ctx: &CallContext,
    ) -> Result<VerifiedIdentity, ProviderError> {
        let header = decode_header(raw_id_token)
            .map_err(|e| ProviderError::invalid_token(format!("invalid header: {}", e)))?;

        let jwk = self.signing_key(header.kid.as_deref(), ctx).await?;
        if !jwk.supports(header.alg) {
            return Err(ProviderError::invalid_token(format!(
                "algorithm {:?} not allowed for {} key",
                header.alg, jwk.kty
            )));
        }
        let key = jwk.decoding_key()?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.metadata.issuer]);
        validation.set_audience(&[policy.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_exp = policy.check_expiry;
        validation.validate_nbf = true;

        let data = decode::<Map<String, Value>>(raw_id_token, &key, &validation)
            .map_err(|e| ProviderError::invalid_token(e.to_string()))?;

        VerifiedIdentity::from_claims(data.claims).map_err(ProviderError::InvalidToken)
    }
}

async fn get_json<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> Result<T, ProviderError> {
    let response = http
        .get(url)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|source| ProviderError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: truncated_body(response).await,
        });
    }

    response.json::<T>().await.map_err(|e| ProviderError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })
}

async fn truncated_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
