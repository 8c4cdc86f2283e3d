//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError, ProviderConfig};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "portcullis.toml",
    "./config/config.toml",
    "/etc/portcullis/config.toml",
];

/// Provider touched by the `PORTCULLIS_OIDC_*` variables when
/// `PORTCULLIS_OIDC_NAME` is unset.
const DEFAULT_PROVIDER_NAME: &str = "default";

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_overrides(&mut config, |key| env::var(key).ok());

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("PORTCULLIS_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Apply overrides read through `lookup` (the process environment in `load`)
    pub fn apply_overrides<F>(&self, config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // HTTP
        if let Some(port) = lookup("PORTCULLIS_HTTP_PORT").and_then(|v| v.parse().ok()) {
            config.http.port = port;
        }
        if let Some(val) = lookup("PORTCULLIS_HTTP_HOST") {
            config.http.host = val;
        }

        // Auth
        if let Some(secs) = lookup("PORTCULLIS_LOGIN_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.auth.login_timeout_secs = secs;
        }
        if let Some(val) = lookup("PORTCULLIS_COOKIE_PATH") {
            config.auth.cookie_path = Some(val);
        }

        // General
        if let Some(val) = lookup("PORTCULLIS_DEV_MODE") {
            config.dev_mode = parse_flag(&val);
        }

        self.apply_provider_overrides(config, &lookup);
    }

    fn apply_provider_overrides<F>(&self, config: &mut AppConfig, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        const FIELDS: &[&str] = &[
            "PORTCULLIS_OIDC_ISSUER_URL",
            "PORTCULLIS_OIDC_CLIENT_ID",
            "PORTCULLIS_OIDC_CLIENT_SECRET",
            "PORTCULLIS_OIDC_REDIRECT_URL",
            "PORTCULLIS_OIDC_FRONTEND_URL",
            "PORTCULLIS_OIDC_ALLOW_DEV_LOGIN",
            "PORTCULLIS_OIDC_SKIP_EXPIRY_CHECK",
        ];

        let name = lookup("PORTCULLIS_OIDC_NAME");
        if name.is_none() && FIELDS.iter().all(|key| lookup(key).is_none()) {
            return;
        }
        let name = name.unwrap_or_else(|| DEFAULT_PROVIDER_NAME.to_string());

        let index = match config.providers.iter().position(|p| p.name == name) {
            Some(index) => index,
            None => {
                config.providers.push(ProviderConfig::new(name));
                config.providers.len() - 1
            }
        };
        let provider = &mut config.providers[index];

        if let Some(val) = lookup("PORTCULLIS_OIDC_ISSUER_URL") {
            provider.issuer_url = val;
        }
        if let Some(val) = lookup("PORTCULLIS_OIDC_CLIENT_ID") {
            provider.client_id = val;
        }
        if let Some(val) = lookup("PORTCULLIS_OIDC_CLIENT_SECRET") {
            provider.client_secret = val;
        }
        if let Some(val) = lookup("PORTCULLIS_OIDC_REDIRECT_URL") {
            provider.redirect_url = val;
        }
        if let Some(val) = lookup("PORTCULLIS_OIDC_FRONTEND_URL") {
            provider.frontend_url = val;
        }
        if let Some(val) = lookup("PORTCULLIS_OIDC_ALLOW_DEV_LOGIN") {
            provider.allow_dev_login = parse_flag(&val);
        }
        if let Some(val) = lookup("PORTCULLIS_OIDC_SKIP_EXPIRY_CHECK") {
            provider.skip_expiry_check = parse_flag(&val);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
