//! Dashboard composition for Nimbus.
//!
//! Ties identity, preferences, location and weather together behind [`App`]
//! and owns configuration, logging setup and the application error type.

pub mod app;
pub mod config;
pub mod error;

pub use app::App;
pub use config::{
    Config, IdentityConfig, LocationConfig, PreferencesConfig, ValidationResult, WeatherConfig,
};
pub use error::{AppError, AuthError, ConfigError, LocationError, PersistenceError, WeatherFetchError};

use anyhow::Result;

/// Initialize logging for the application
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!("Nimbus core initialized");
    Ok(())
}
