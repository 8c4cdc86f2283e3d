//! Portcullis Configuration System
//!
//! TOML-based configuration with environment variable overrides. One
//! process may serve several identity providers; each `[[providers]]` entry
//! becomes its own login client.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Age of the state cookie during login.
pub const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 600;

/// Deadline for a single call to an identity provider.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub auth: AuthSettings,
    pub providers: Vec<ProviderConfig>,

    /// Enable development mode
    pub dev_mode: bool,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Settings shared by every login client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Path the state cookie is scoped to; provider routes are nested below it.
    /// Unset means the login library's default.
    pub cookie_path: Option<String>,
    pub login_timeout_secs: u64,
    pub call_timeout_secs: u64,
    /// Mount the diagnostic token dump route. Only allowed in dev mode.
    pub token_dump: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            cookie_path: None,
            login_timeout_secs: DEFAULT_LOGIN_TIMEOUT_SECS,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            token_dump: false,
        }
    }
}

/// One OpenID Connect identity provider
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub frontend_url: String,
    pub allow_dev_login: bool,
    pub skip_expiry_check: bool,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("issuer_url", &self.issuer_url),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_url", &self.redirect_url),
            ("frontend_url", &self.frontend_url),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}' is missing {}",
                    self.name, field
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("redirect_url", &self.redirect_url)
            .field("frontend_url", &self.frontend_url)
            .field("allow_dev_login", &self.allow_dev_login)
            .field("skip_expiry_check", &self.skip_expiry_check)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check the configuration is usable for serving logins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one provider must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            let name = provider.name.trim();
            if name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "provider name must not be empty".to_string(),
                ));
            }
            if name.contains('/') {
                return Err(ConfigError::ValidationError(format!(
                    "provider name '{}' must not contain '/'",
                    name
                )));
            }
            if !names.insert(name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate provider name '{}'",
                    name
                )));
            }
            provider.validate()?;
        }

        if let Some(path) = &self.auth.cookie_path {
            if !path.starts_with('/') || path == "/" {
                return Err(ConfigError::ValidationError(
                    "auth.cookie_path must be an absolute path below the site root".to_string(),
                ));
            }
        }
        if self.auth.login_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "auth.login_timeout_secs must be positive".to_string(),
            ));
        }
        if self.auth.call_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "auth.call_timeout_secs must be positive".to_string(),
            ));
        }
        if self.auth.token_dump && !self.dev_mode {
            return Err(ConfigError::ValidationError(
                "auth.token_dump requires dev_mode".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Portcullis Configuration
# Environment variables override these settings

dev_mode = false

[http]
port = 8080
host = "0.0.0.0"

[auth]
# cookie_path = "/api/auth"
login_timeout_secs = 600
call_timeout_secs = 30
token_dump = false  # requires dev_mode

[[providers]]
name = "csc"
issuer_url = "https://login.example.org"
client_id = "portcullis"
client_secret = "change-me"
redirect_url = "https://app.example.org/api/auth/csc/cb"
frontend_url = "https://app.example.org/login"
allow_dev_login = false
skip_expiry_check = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            issuer_url: "https://idp.example.org".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_url: "https://app.example.org/api/auth/cb".to_string(),
            frontend_url: "https://app.example.org/".to_string(),
            allow_dev_login: false,
            skip_expiry_check: false,
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.http.port, 8080);
        assert!(config.auth.cookie_path.is_none());
        assert_eq!(config.auth.login_timeout_secs, 600);
        assert!(!config.auth.token_dump);
        assert!(!config.dev_mode);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_example_toml_parses() {
        let config = AppConfig::from_toml(&AppConfig::example_toml()).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].name, "csc");
        assert!(!config.providers[0].allow_dev_login);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml("[http]\nport = 9000\n").unwrap();
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.auth.login_timeout_secs, DEFAULT_LOGIN_TIMEOUT_SECS);
    }

    #[test]
    fn test_validate_requires_provider() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let config = AppConfig {
            providers: vec![provider("a"), provider("a")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn test_validate_rejects_missing_secret() {
        let mut p = provider("a");
        p.client_secret = String::new();
        let config = AppConfig {
            providers: vec![p],
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("client_secret"));
    }

    #[test]
    fn test_validate_rejects_root_cookie_path() {
        let mut config = AppConfig {
            providers: vec![provider("a")],
            ..Default::default()
        };
        config.auth.cookie_path = Some("/".to_string());
        assert!(config.validate().is_err());

        config.auth.cookie_path = Some("/login".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_dump_requires_dev_mode() {
        let mut config = AppConfig {
            providers: vec![provider("a")],
            ..Default::default()
        };
        config.auth.token_dump = true;
        assert!(config.validate().is_err());

        config.dev_mode = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", provider("a"));
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("***"));
    }
}
