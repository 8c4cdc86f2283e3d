//! CSRF Login State
//!
//! A login state is an opaque, single-use value bound to the browser through
//! a cookie and echoed back by the IdP as the `state` query parameter.
//!
//! Encoding: `<nonce>.<issued_at>.<tag>`
//! - `nonce`: 16 bytes from the OS RNG, base64url without padding
//! - `issued_at`: Unix seconds
//! - `tag`: HMAC-SHA256(`<nonce>.<issued_at>`, client secret), base64url
//!
//! The tag lets the callback enforce the login timeout without keeping any
//! server-side record of issued states.

use std::time::Duration;

use axum_extra::extract::cookie::Cookie;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, TryRngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::error::{ClientError, LoginError};

type HmacSha256 = Hmac<Sha256>;

/// Name of the state cookie.
pub const STATE_COOKIE: &str = "state";

const NONCE_BYTES: usize = 16;

/// States stamped this far in the future are still accepted, for hosts
/// behind a load balancer with slightly skewed clocks.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// A freshly issued login state.
#[derive(Debug, Clone)]
pub struct LoginState {
    value: String,
    issued_at: DateTime<Utc>,
}

impl LoginState {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Cookie carrying this state, valid for `timeout` below `path`.
    ///
    /// Both `Max-Age` and an absolute `Expires` are set; some older browsers
    /// only understand the latter.
    pub fn cookie(&self, path: &str, timeout: Duration) -> Cookie<'static> {
        let secs = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
        let mut cookie = Cookie::build((STATE_COOKIE, self.value.clone()))
            .path(path.to_string())
            .secure(true)
            .http_only(true)
            .max_age(time::Duration::seconds(secs))
            .build();

        let expires = self.issued_at.timestamp().saturating_add(secs);
        if let Ok(at) = time::OffsetDateTime::from_unix_timestamp(expires) {
            cookie.set_expires(at);
        }
        cookie
    }
}

/// Cookie that, when removed from a jar, clears the state cookie at `path`.
pub fn state_removal_cookie(path: &str) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, ""))
        .path(path.to_string())
        .secure(true)
        .http_only(true)
        .build()
}

/// Byte-for-byte comparison of the echoed state and the cookie value.
pub fn states_match(presented: &str, cookie: &str) -> bool {
    presented.as_bytes().ct_eq(cookie.as_bytes()).into()
}

/// Why an otherwise matching state was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateRejection {
    #[error("malformed state value")]
    Malformed,
    #[error("state seal does not verify")]
    BadSeal,
    #[error("state issued at {0} has expired")]
    Expired(DateTime<Utc>),
    #[error("state issued at {0} is in the future")]
    FromFuture(DateTime<Utc>),
}

/// Issues and opens sealed login states.
#[derive(Clone)]
pub struct StateSealer {
    mac: HmacSha256,
}

impl StateSealer {
    pub fn new(secret: &[u8]) -> Result<Self, ClientError> {
        if secret.is_empty() {
            return Err(ClientError::invalid("state key must not be empty"));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| ClientError::invalid(format!("state key rejected: {}", e)))?;
        Ok(Self { mac })
    }

    /// Draw a new state from the OS random source.
    pub fn issue(&self, now: DateTime<Utc>) -> Result<LoginState, LoginError> {
        let mut nonce = [0u8; NONCE_BYTES];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| LoginError::StateGeneration(e.to_string()))?;
        Ok(self.seal(&nonce, now))
    }

    fn seal(&self, nonce: &[u8], issued_at: DateTime<Utc>) -> LoginState {
        let payload = format!("{}.{}", URL_SAFE_NO_PAD.encode(nonce), issued_at.timestamp());
        let tag = URL_SAFE_NO_PAD.encode(self.tag(&payload));
        LoginState {
            value: format!("{}.{}", payload, tag),
            issued_at,
        }
    }

    fn tag(&self, payload: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Check the seal and age of a state value, returning its issuance time.
    pub fn open(
        &self,
        value: &str,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<DateTime<Utc>, StateRejection> {
        let (payload, tag) = value.rsplit_once('.').ok_or(StateRejection::Malformed)?;
        let (nonce, issued_at) = payload.split_once('.').ok_or(StateRejection::Malformed)?;

        let nonce = URL_SAFE_NO_PAD
            .decode(nonce)
            .map_err(|_| StateRejection::Malformed)?;
        if nonce.len() != NONCE_BYTES {
            return Err(StateRejection::Malformed);
        }
        let issued_at = issued_at
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or(StateRejection::Malformed)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| StateRejection::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&tag).map_err(|_| StateRejection::BadSeal)?;

        let age = now.signed_duration_since(issued_at).num_seconds();
        let timeout_secs = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
        if age > timeout_secs {
            return Err(StateRejection::Expired(issued_at));
        }
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(StateRejection::FromFuture(issued_at));
        }

        Ok(issued_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const TIMEOUT: Duration = Duration::from_secs(600);

    fn sealer() -> StateSealer {
        StateSealer::new(b"client-secret").unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_issued_state_is_url_and_cookie_safe() {
        let state = sealer().issue(at(1_700_000_000)).unwrap();
        assert!(state
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
        assert_eq!(state.as_str().split('.').count(), 3);
    }

    #[test]
    fn test_states_are_unique() {
        let sealer = sealer();
        let now = at(1_700_000_000);
        let a = sealer.issue(now).unwrap();
        let b = sealer.issue(now).unwrap();
        assert_ne!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_open_within_timeout() {
        let sealer = sealer();
        let issued = at(1_700_000_000);
        let state = sealer.issue(issued).unwrap();

        let opened = sealer
            .open(state.as_str(), issued + ChronoDuration::seconds(600), TIMEOUT)
            .unwrap();
        assert_eq!(opened, issued);
    }

    #[test]
    fn test_open_after_timeout_is_expired() {
        let sealer = sealer();
        let issued = at(1_700_000_000);
        let state = sealer.issue(issued).unwrap();

        let result = sealer.open(state.as_str(), issued + ChronoDuration::seconds(601), TIMEOUT);
        assert_eq!(result, Err(StateRejection::Expired(issued)));
    }

    #[test]
    fn test_open_rejects_future_state() {
        let sealer = sealer();
        let issued = at(1_700_000_000);
        let state = sealer.issue(issued).unwrap();

        let result = sealer.open(state.as_str(), issued - ChronoDuration::seconds(3600), TIMEOUT);
        assert_eq!(result, Err(StateRejection::FromFuture(issued)));
    }

    #[test]
    fn test_tampered_timestamp_breaks_seal() {
        let sealer = sealer();
        let issued = at(1_700_000_000);
        let state = sealer.issue(issued).unwrap();

        let parts: Vec<&str> = state.as_str().split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], issued.timestamp() + 3600, parts[2]);
        assert_eq!(
            sealer.open(&forged, issued, TIMEOUT),
            Err(StateRejection::BadSeal)
        );
    }

    #[test]
    fn test_other_key_breaks_seal() {
        let issued = at(1_700_000_000);
        let state = sealer().issue(issued).unwrap();
        let other = StateSealer::new(b"another-secret").unwrap();
        assert_eq!(
            other.open(state.as_str(), issued, TIMEOUT),
            Err(StateRejection::BadSeal)
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        let sealer = sealer();
        let now = at(1_700_000_000);
        for value in ["", "foobar", "a.b", "!!!.1.abc", "AAAAAAAAAAAAAAAAAAAAAA.x.AAAA"] {
            assert_eq!(sealer.open(value, now, TIMEOUT), Err(StateRejection::Malformed), "{value}");
        }
    }

    #[test]
    fn test_states_match_is_exact() {
        assert!(states_match("abc.1.def", "abc.1.def"));
        assert!(!states_match("abc.1.de", "abc.1.def"));
        assert!(!states_match("", "abc"));
        assert!(!states_match("ABC.1.DEF", "abc.1.def"));
    }

    #[test]
    fn test_cookie_attributes() {
        let issued = at(1_700_000_000);
        let state = sealer().issue(issued).unwrap();
        let cookie = state.cookie("/api/auth", TIMEOUT);

        assert_eq!(cookie.name(), STATE_COOKIE);
        assert_eq!(cookie.value(), state.as_str());
        assert_eq!(cookie.path(), Some("/api/auth"));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(600)));
        let expires = cookie.expires_datetime().unwrap();
        assert_eq!(expires.unix_timestamp(), 1_700_000_600);
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(StateSealer::new(b"").is_err());
    }
}
