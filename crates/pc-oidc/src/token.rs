//! Token material handled during a callback.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const REDACTED: &str = "***";

/// Raw token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Tokens obtained by exchanging an authorization code.
///
/// `Debug` never prints the access or refresh token.
#[derive(Clone, Default)]
pub struct OAuth2Token {
    pub access_token: String,
    pub token_type: Option<String>,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    id_token: Option<String>,
}

impl OAuth2Token {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub(crate) fn from_response(response: TokenResponse, received_at: DateTime<Utc>) -> Self {
        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            refresh_token: response.refresh_token,
            expiry: response
                .expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| received_at + Duration::seconds(secs)),
            scope: response.scope,
            id_token: response.id_token.filter(|t| !t.is_empty()),
        }
    }

    /// The raw identity token embedded in the response, if the IdP sent one.
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Copy safe to render: secrets replaced, raw ID token dropped.
    pub fn redacted(&self) -> RedactedToken {
        RedactedToken {
            access_token: redact(&self.access_token),
            token_type: self.token_type.clone(),
            refresh_token: self.refresh_token.as_deref().map(redact),
            expiry: self.expiry,
            scope: self.scope.clone(),
        }
    }
}

impl std::fmt::Debug for OAuth2Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = self.redacted();
        f.debug_struct("OAuth2Token")
            .field("access_token", &redacted.access_token)
            .field("token_type", &self.token_type)
            .field("refresh_token", &redacted.refresh_token)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .field("id_token", &self.id_token.as_ref().map(|_| REDACTED))
            .finish()
    }
}

fn redact(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        REDACTED.to_string()
    }
}

/// Serializable view of an `OAuth2Token` with secrets removed.
#[derive(Debug, Clone, Serialize)]
pub struct RedactedToken {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Identity asserted by an ID token that passed verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub expires_at: DateTime<Utc>,
    /// Full claim set, including the registered claims above
    pub claims: Map<String, Value>,
}

impl VerifiedIdentity {
    /// Build from a claim set whose signature has already been checked.
    pub fn from_claims(claims: Map<String, Value>) -> Result<Self, String> {
        let subject = string_claim(&claims, "sub")?;
        let issuer = string_claim(&claims, "iss")?;
        let audience = match claims.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(String::from))
                .collect::<Option<Vec<_>>>()
                .ok_or("aud claim contains a non-string entry")?,
            _ => return Err("missing aud claim".to_string()),
        };
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or("missing or invalid exp claim")?;

        if subject.is_empty() {
            return Err("empty sub claim".to_string());
        }

        Ok(Self {
            subject,
            issuer,
            audience,
            expires_at,
            claims,
        })
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn email(&self) -> Option<&str> {
        self.claim("email").and_then(Value::as_str)
    }
}

fn string_claim(claims: &Map<String, Value>, name: &str) -> Result<String, String> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| format!("missing {} claim", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = OAuth2Token::new("access-secret")
            .with_refresh_token("refresh-secret")
            .with_id_token("header.payload.sig");
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("access-secret"));
        assert!(!rendered.contains("refresh-secret"));
        assert!(!rendered.contains("header.payload.sig"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_redacted_keeps_empty_values_empty() {
        let redacted = OAuth2Token::new("").redacted();
        assert_eq!(redacted.access_token, "");
        assert!(redacted.refresh_token.is_none());
    }

    #[test]
    fn test_from_response_computes_expiry() {
        let received = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let response = TokenResponse {
            access_token: "a".into(),
            token_type: Some("Bearer".into()),
            expires_in: Some(300),
            refresh_token: None,
            id_token: Some(String::new()),
            scope: None,
        };
        let token = OAuth2Token::from_response(response, received);
        assert_eq!(token.expiry.unwrap().timestamp(), 1_700_000_300);
        assert!(token.id_token().is_none());
    }

    #[test]
    fn test_identity_from_claims() {
        let identity = VerifiedIdentity::from_claims(claims(json!({
            "sub": "user-1",
            "iss": "https://idp.example.org",
            "aud": ["client", "other"],
            "exp": 1_700_000_000,
            "email": "user@example.org",
        })))
        .unwrap();

        assert_eq!(identity.subject, "user-1");
        assert_eq!(identity.audience, vec!["client", "other"]);
        assert_eq!(identity.email(), Some("user@example.org"));
        assert_eq!(identity.expires_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_identity_requires_registered_claims() {
        let missing_sub = claims(json!({"iss": "i", "aud": "c", "exp": 1}));
        assert!(VerifiedIdentity::from_claims(missing_sub).is_err());

        let missing_exp = claims(json!({"sub": "s", "iss": "i", "aud": "c"}));
        assert!(VerifiedIdentity::from_claims(missing_exp).is_err());

        let bad_aud = claims(json!({"sub": "s", "iss": "i", "aud": [1], "exp": 1}));
        assert!(VerifiedIdentity::from_claims(bad_aud).is_err());
    }
}
