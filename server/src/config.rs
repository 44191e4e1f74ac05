//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// SQLite connection URL
    pub database_url: String,
    /// Secret key for token validation (placeholder for auth)
    pub auth_secret: Option<String>,
    /// Maximum events returned per pull page
    pub pull_page_size: i64,
    /// Maximum records returned per bootstrap page
    pub bootstrap_page_size: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://greenroom.db".to_string());

        let auth_secret = env::var("AUTH_SECRET").ok();

        let pull_page_size = env::var("PULL_PAGE_SIZE")
            .ok()
            .map(|v| v.parse().map_err(|_| ConfigError::InvalidPageSize))
            .transpose()?
            .unwrap_or(500);

        let bootstrap_page_size = env::var("BOOTSTRAP_PAGE_SIZE")
            .ok()
            .map(|v| v.parse().map_err(|_| ConfigError::InvalidPageSize))
            .transpose()?
            .unwrap_or(1000);

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            pull_page_size,
            bootstrap_page_size,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid page size value")]
    InvalidPageSize,
}
