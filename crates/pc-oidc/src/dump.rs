//! Diagnostic token dump.
//!
//! Only reachable through the opt-in `/dump` route. Access and refresh
//! tokens are redacted before serialization; the raw ID token is omitted.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::token::{OAuth2Token, RedactedToken, VerifiedIdentity};

#[derive(Debug, Serialize)]
pub struct TokenDump<'a> {
    pub oauth2_token: Option<RedactedToken>,
    pub id_token_claims: &'a Map<String, Value>,
}

impl<'a> TokenDump<'a> {
    pub fn new(token: Option<&OAuth2Token>, identity: &'a VerifiedIdentity) -> Self {
        Self {
            oauth2_token: token.map(OAuth2Token::redacted),
            id_token_claims: &identity.claims,
        }
    }

    /// Indented JSON rendering.
    pub fn render(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> VerifiedIdentity {
        let claims = match json!({
            "sub": "user-1",
            "iss": "https://idp.example.org",
            "aud": "client",
            "exp": 1_700_000_000,
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        VerifiedIdentity::from_claims(claims).unwrap()
    }

    #[test]
    fn test_dump_redacts_secrets() {
        let token = OAuth2Token::new("access-abc")
            .with_refresh_token("refresh-def")
            .with_id_token("raw.id.token");
        let identity = identity();

        let rendered = TokenDump::new(Some(&token), &identity).render().unwrap();
        assert!(!rendered.contains("access-abc"));
        assert!(!rendered.contains("refresh-def"));
        assert!(!rendered.contains("raw.id.token"));
        assert!(rendered.contains("\"access_token\": \"***\""));
        assert!(rendered.contains("\"refresh_token\": \"***\""));
        assert!(rendered.contains("\"sub\": \"user-1\""));
        assert!(rendered.contains('\n'));
    }

    #[test]
    fn test_dev_path_dump_has_null_token() {
        let identity = identity();
        let rendered = TokenDump::new(None, &identity).render().unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert!(value["oauth2_token"].is_null());
        assert_eq!(value["id_token_claims"]["aud"], "client");
    }
}
