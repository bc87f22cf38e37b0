//! Server configuration from the environment.

use std::net::SocketAddr;

use axum::http::HeaderValue;

use scrumflow_core::{Error, Result};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/scrumflow";
const DEFAULT_ORIGIN: &str = "http://localhost:4200";

/// HTTP server and gateway settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// HS256 secret for gateway tokens. `None` rejects every connection.
    pub jwt_secret: Option<String>,
    pub allowed_origins: Vec<HeaderValue>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            jwt_secret: None,
            allowed_origins: vec![HeaderValue::from_static(DEFAULT_ORIGIN)],
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `3000` |
    /// | `DATABASE_URL` | `postgres://localhost/scrumflow` |
    /// | `JWT_SECRET` | unset |
    /// | `ALLOWED_ORIGINS` | `http://localhost:4200` |
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse()
                .map_err(|_| Error::Config(format!("PORT must be a port number, got {:?}", v)))?,
            Err(_) => defaults.port,
        };

        Ok(Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port,
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            jwt_secret: std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),
            allowed_origins: parse_allowed_origins(
                &std::env::var("ALLOWED_ORIGINS").unwrap_or_default(),
            ),
        })
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address: {}", e)))
    }
}

/// Parse a comma-separated CORS origin whitelist.
///
/// Invalid entries are skipped with a warning; an empty list falls back to the
/// local frontend origin.
pub fn parse_allowed_origins(raw: &str) -> Vec<HeaderValue> {
    let origins: Vec<HeaderValue> = raw
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect();

    if origins.is_empty() {
        return vec![HeaderValue::from_static(DEFAULT_ORIGIN)];
    }
    origins
}
