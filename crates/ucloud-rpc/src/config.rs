// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::fmt;
use std::net::SocketAddr;

use ucloud_sql::DEFAULT_POOL_SIZE;

/// UCloud RPC server configuration
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// HTTP and WebSocket listen address
    pub http_addr: SocketAddr,
    /// Maximum pooled database connections
    pub db_pool_size: u32,
    /// HMAC secret for user and service bearer tokens
    pub token_secret: String,
    /// HMAC secret for tokens presented on provider calls (`/ucloud/...`)
    pub provider_token_secret: String,
    /// Relaxes the provider role check for privileged principals
    pub development_mode: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("http_addr", &self.http_addr)
            .field("db_pool_size", &self.db_pool_size)
            .field("token_secret", &"<redacted>")
            .field("provider_token_secret", &"<redacted>")
            .field("development_mode", &self.development_mode)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `UCLOUD_DATABASE_URL`: PostgreSQL or SQLite connection string
    /// - `UCLOUD_TOKEN_SECRET`: secret used to validate bearer tokens
    ///
    /// Optional (with defaults):
    /// - `UCLOUD_HTTP_PORT`: listen port (default: 8080)
    /// - `UCLOUD_DB_POOL_SIZE`: pooled connections (default: 8)
    /// - `UCLOUD_PROVIDER_TOKEN_SECRET`: provider token secret (default: `UCLOUD_TOKEN_SECRET`)
    /// - `UCLOUD_DEVELOPMENT_MODE`: `true`/`1` to enable (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("UCLOUD_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("UCLOUD_DATABASE_URL"))?;

        let http_port: u16 = std::env::var("UCLOUD_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("UCLOUD_HTTP_PORT", "must be a valid port number"))?;

        let db_pool_size: u32 = match std::env::var("UCLOUD_DB_POOL_SIZE") {
            Ok(value) => value.parse().map_err(|_| {
                ConfigError::Invalid("UCLOUD_DB_POOL_SIZE", "must be a positive integer")
            })?,
            Err(_) => DEFAULT_POOL_SIZE,
        };
        if db_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "UCLOUD_DB_POOL_SIZE",
                "must be a positive integer",
            ));
        }

        let token_secret = std::env::var("UCLOUD_TOKEN_SECRET")
            .map_err(|_| ConfigError::Missing("UCLOUD_TOKEN_SECRET"))?;
        if token_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "UCLOUD_TOKEN_SECRET",
                "must not be empty",
            ));
        }

        let provider_token_secret = std::env::var("UCLOUD_PROVIDER_TOKEN_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| token_secret.clone());

        let development_mode = std::env::var("UCLOUD_DEVELOPMENT_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            db_pool_size,
            token_secret,
            provider_token_secret,
            development_mode,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
