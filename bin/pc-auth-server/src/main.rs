//! Portcullis Auth Server
//!
//! Serves the OIDC login endpoints for every configured provider:
//! - GET {cookie_path}/{name}/login
//! - GET {cookie_path}/{name}/cb
//! - GET {cookie_path}/{name}/dump (dev mode with `token_dump` only)
//! - GET /health
//!
//! Configuration comes from a TOML file (first argument, `PORTCULLIS_CONFIG`
//! or the default search paths) with `PORTCULLIS_*` environment overrides.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PORTCULLIS_HTTP_PORT` | `8080` | HTTP port |
//! | `PORTCULLIS_DEV_MODE` | `false` | Allow development-only settings |
//! | `PORTCULLIS_OIDC_ISSUER_URL` | - | Issuer of the default provider |
//! | `LOG_FORMAT` | `text` | `json` for structured output |
//! | `RUST_LOG` | `info` | Log level |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{response::Json, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pc_common::{logging::init_logging, shutdown_signal};
use pc_config::{AppConfig, ConfigLoader, ProviderConfig};
use pc_oidc::{
    auth_router, CompletedLogin, LoginCompletion, LoginOutcome, OidcClient, OidcClientBuilder,
    DEFAULT_COOKIE_PATH,
};

/// Completion hook for the standalone server: records the login and succeeds.
/// Session issuance belongs to the application embedding `pc-oidc`.
struct LoggingCompletion;

#[async_trait]
impl LoginCompletion for LoggingCompletion {
    async fn complete(&self, login: &CompletedLogin<'_>) -> LoginOutcome {
        info!(
            provider = %login.provider,
            sub = %login.identity.subject,
            email = login.identity.email().unwrap_or_default(),
            dev_login = login.token.is_none(),
            "User logged in"
        );
        LoginOutcome::success()
    }
}

fn cookie_path(config: &AppConfig) -> &str {
    config.auth.cookie_path.as_deref().unwrap_or(DEFAULT_COOKIE_PATH)
}

async fn build_client(config: &AppConfig, provider: &ProviderConfig) -> Result<OidcClient> {
    let auth = &config.auth;
    let client = OidcClientBuilder::new(
        provider.name.clone(),
        provider.client_id.clone(),
        provider.client_secret.clone(),
        provider.redirect_url.clone(),
        provider.frontend_url.clone(),
    )
    .allow_dev_login(provider.allow_dev_login)
    .skip_expiry_check(provider.skip_expiry_check)
    .login_timeout(Duration::from_secs(auth.login_timeout_secs))
    .call_timeout(Duration::from_secs(auth.call_timeout_secs))
    .cookie_path(cookie_path(config))
    .token_dump(config.dev_mode && auth.token_dump)
    .completion(Arc::new(LoggingCompletion))
    .discover(&provider.issuer_url)
    .await
    .with_context(|| format!("failed to initialise provider '{}'", provider.name))?;

    Ok(client)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("pc-auth-server");

    let loader = match std::env::args().nth(1) {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    info!("Starting Portcullis Auth Server");
    if config.dev_mode {
        warn!("Dev mode enabled - do not use in production");
    }

    let mut app = Router::new().route("/health", get(health_handler));

    for provider in &config.providers {
        let client = build_client(&config, provider).await?;
        let mount = format!("{}/{}", cookie_path(&config).trim_end_matches('/'), provider.name);
        info!(
            provider = %provider.name,
            issuer = %client.issuer(),
            mount = %mount,
            dev_login = client.dev_login_allowed(),
            token_dump = client.token_dump_enabled(),
            "Provider ready"
        );
        app = app.nest(&mount, auth_router(Arc::new(client)));
    }

    let app = app.layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Auth server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Portcullis Auth Server shutdown complete");
    Ok(())
}
