use std::env;

use axum::http::HeaderValue;
use thiserror::Error;

/// AppConfig
///
/// Holds the application's entire configuration state. Loaded once at startup and
/// shared immutably with every handler through `AppState` (pulled out via `FromRef`).
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Port the HTTP server binds on 0.0.0.0.
    pub port: u16,
    // The single browser origin allowed by CORS (the frontend dev server in local).
    pub frontend_url: String,
    // MongoDB connection string.
    pub mongodb_uri: String,
    // Database holding the `users` collection.
    pub mongodb_database: String,
    // Runtime environment marker. Controls log format and which variables are mandatory.
    pub env: Env,
}

/// Env
///
/// Defines the runtime context: `Local` favours developer defaults, `Production`
/// requires every infrastructure setting to be explicit.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Env {
    pub fn as_str(&self) -> &'static str {
        match self {
            Env::Local => "local",
            Env::Production => "production",
        }
    }
}

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:4321";
pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_DATABASE: &str = "proto-sync-db";

impl Default for AppConfig {
    /// default
    ///
    /// Safe local values used by tests, so state can be scaffolded without touching
    /// the process environment.
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
            mongodb_uri: DEFAULT_MONGODB_URI.to_string(),
            mongodb_database: DEFAULT_DATABASE.to_string(),
            env: Env::Local,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads every parameter from environment variables and fails fast on anything
    /// missing or malformed. In production `MONGODB_URI` is mandatory; locally it falls
    /// back to the Dockerized MongoDB on the default port.
    pub fn load() -> Result<Self, ConfigError> {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { name: "PORT", value: raw })?,
            Err(_) => DEFAULT_PORT,
        };

        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| DEFAULT_FRONTEND_URL.to_string());
        // Becomes the CORS allow-origin header verbatim.
        if HeaderValue::from_str(&frontend_url).is_err() {
            return Err(ConfigError::Invalid {
                name: "FRONTEND_URL",
                value: frontend_url,
            });
        }

        let mongodb_uri = match (env, env::var("MONGODB_URI")) {
            (_, Ok(uri)) => uri,
            (Env::Production, Err(_)) => return Err(ConfigError::Missing("MONGODB_URI")),
            (Env::Local, Err(_)) => DEFAULT_MONGODB_URI.to_string(),
        };

        let mongodb_database =
            env::var("MONGODB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());

        Ok(Self {
            port,
            frontend_url,
            mongodb_uri,
            mongodb_database,
            env,
        })
    }
}
