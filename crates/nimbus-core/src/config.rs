use anyhow::{Context, Result};
use nimbus_auth::Identity;
use nimbus_services::DocumentStoreConfig;
use nimbus_weather::{Coordinate, PositionOptions, WeatherApiConfig, WeatherControllerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Environment variable that overrides `weather.api_key`.
pub const WEATHER_API_KEY_ENV: &str = "NIMBUS_WEATHER_API_KEY";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity delivered to the session at startup
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Remote preference document store
    #[serde(default)]
    pub preferences: PreferencesConfig,

    #[serde(default)]
    pub weather: WeatherConfig,

    #[serde(default)]
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Identity handle; the dashboard stays signed out without one
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl IdentityConfig {
    pub fn identity(&self) -> Option<Identity> {
        let email = self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())?;
        let identity = Identity::new(email);
        Some(match &self.display_name {
            Some(name) => identity.with_display_name(name.clone()),
            None => identity,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencesConfig {
    /// Base URL of the document store API
    pub base_url: String,

    /// Collection holding one document per identity handle
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Bearer token for the document store (optional)
    pub token: Option<String>,
}

fn default_collection() -> String {
    nimbus_services::document_store::DEFAULT_COLLECTION.to_string()
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            collection: default_collection(),
            token: None,
        }
    }
}

impl PreferencesConfig {
    pub fn store_config(&self) -> DocumentStoreConfig {
        let mut config = DocumentStoreConfig::new(self.base_url.clone());
        config.collection = self.collection.clone();
        config.token = self.token.clone();
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    pub api_base_url: String,

    /// API key; `NIMBUS_WEATHER_API_KEY` takes precedence when set
    pub api_key: Option<String>,

    /// Refresh interval in minutes
    #[serde(default = "default_refresh_minutes")]
    pub refresh_minutes: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Location used until the device grants one
    #[serde(default = "default_fallback_latitude")]
    pub fallback_latitude: f64,
    #[serde(default = "default_fallback_longitude")]
    pub fallback_longitude: f64,
}

fn default_refresh_minutes() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_fallback_latitude() -> f64 {
    Coordinate::FALLBACK.latitude
}

fn default_fallback_longitude() -> f64 {
    Coordinate::FALLBACK.longitude
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_base_url: nimbus_weather::provider::DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            refresh_minutes: default_refresh_minutes(),
            request_timeout_secs: default_request_timeout_secs(),
            fallback_latitude: default_fallback_latitude(),
            fallback_longitude: default_fallback_longitude(),
        }
    }
}

impl WeatherConfig {
    pub fn effective_api_key(&self) -> Option<String> {
        std::env::var(WEATHER_API_KEY_ENV)
            .ok()
            .or_else(|| self.api_key.clone())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn fallback(&self) -> Coordinate {
        Coordinate::new(self.fallback_latitude, self.fallback_longitude)
    }

    pub fn api_config(&self) -> WeatherApiConfig {
        let mut config = WeatherApiConfig::new(self.effective_api_key().unwrap_or_default());
        config.base_url = self.api_base_url.clone();
        config.timeout = Duration::from_secs(self.request_timeout_secs);
        config
    }

    pub fn controller_config(&self) -> WeatherControllerConfig {
        WeatherControllerConfig {
            refresh_interval: Duration::from_secs(u64::from(self.refresh_minutes) * 60),
            fallback: self.fallback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Fixed device position; without one the device reports no support
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    #[serde(default = "default_location_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_high_accuracy")]
    pub high_accuracy: bool,
}

fn default_location_timeout_secs() -> u64 {
    10
}

fn default_high_accuracy() -> bool {
    true
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            timeout_secs: default_location_timeout_secs(),
            high_accuracy: default_high_accuracy(),
        }
    }
}

impl LocationConfig {
    pub fn fixed_coordinate(&self) -> Option<Coordinate> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinate::new(latitude, longitude)),
            _ => None,
        }
    }

    pub fn position_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.high_accuracy,
            timeout: Duration::from_secs(self.timeout_secs),
            ..PositionOptions::default()
        }
    }
}

impl Config {
    /// Load configuration from the default path, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}; writing defaults", path.display());
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        Ok(config)
    }

    /// # Errors
    /// Returns `ConfigError::ParseError` for malformed TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.identity.identity().is_none() {
            result.add_warning(
                "identity.email",
                "No identity configured - the dashboard will stay signed out",
            );
        }

        self.validate_url(&self.preferences.base_url, "preferences.base_url", &mut result);
        if self.preferences.collection.trim().is_empty() {
            result.add_error("preferences.collection", "Collection name must not be empty");
        }

        self.validate_url(&self.weather.api_base_url, "weather.api_base_url", &mut result);
        if self.weather.effective_api_key().is_none() {
            result.add_warning(
                "weather.api_key",
                format!(
                    "No weather API key - set it here or in {}",
                    WEATHER_API_KEY_ENV
                ),
            );
        }

        if self.weather.refresh_minutes == 0 {
            result.add_error(
                "weather.refresh_minutes",
                "Refresh interval must be greater than 0",
            );
        } else if self.weather.refresh_minutes > 1440 {
            result.add_warning(
                "weather.refresh_minutes",
                "Weather refresh interval is more than 24 hours",
            );
        }

        if self.weather.request_timeout_secs == 0 {
            result.add_error(
                "weather.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        }

        if !self.weather.fallback().is_valid() {
            result.add_error(
                "weather.fallback_latitude",
                "Fallback coordinate is out of range",
            );
        }

        match (self.location.latitude, self.location.longitude) {
            (Some(_), None) | (None, Some(_)) => {
                result.add_error(
                    "location",
                    "Set both latitude and longitude, or neither",
                );
            }
            _ => {}
        }
        if let Some(coordinate) = self.location.fixed_coordinate() {
            if !coordinate.is_valid() {
                result.add_error("location", "Coordinate is out of range");
            }
        }
        if self.location.timeout_secs == 0 {
            result.add_error("location.timeout_secs", "Timeout must be greater than 0");
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("nimbus");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.field == "identity.email"));
    }

    #[test]
    fn test_defaults_match_dashboard_behaviour() {
        let config = Config::default();
        assert_eq!(config.weather.refresh_minutes, 5);
        assert_eq!(config.weather.request_timeout_secs, 15);
        assert_eq!(config.weather.fallback(), Coordinate::FALLBACK);
        assert_eq!(config.location.timeout_secs, 10);
        assert!(config.location.high_accuracy);
        assert_eq!(config.preferences.collection, "userConfig");

        let controller = config.weather.controller_config();
        assert_eq!(controller.refresh_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.preferences.base_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "preferences.base_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.weather.api_base_url = "ftp://weather.local".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_zero_refresh_is_error() {
        let mut config = Config::default();
        config.weather.refresh_minutes = 0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "weather.refresh_minutes"));
    }

    #[test]
    fn test_half_a_location_is_error() {
        let mut config = Config::default();
        config.location.latitude = Some(10.0);
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(config.location.fixed_coordinate().is_none());

        config.location.longitude = Some(200.0);
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.message.contains("out of range")));
    }

    #[test]
    fn test_identity_from_config() {
        let mut config = IdentityConfig::default();
        assert!(config.identity().is_none());

        config.email = Some("  ".into());
        assert!(config.identity().is_none());

        config.email = Some("a@x.com".into());
        config.display_name = Some("Alice".into());
        let identity = config.identity().unwrap();
        assert_eq!(identity.handle, "a@x.com");
        assert_eq!(identity.greeting_name(), "Alice");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [identity]
            email = "a@x.com"

            [weather]
            api_base_url = "https://weather.example"
            api_key = "k"
            "#,
        )
        .unwrap();

        assert_eq!(config.identity.email.as_deref(), Some("a@x.com"));
        assert_eq!(config.weather.refresh_minutes, 5);
        assert_eq!(config.preferences.collection, "userConfig");
        assert_eq!(config.location.timeout_secs, 10);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = Config::from_toml_str("[weather\napi_key = ");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_creates_defaults_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nimbus").join("config.toml");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.weather.refresh_minutes, 5);

        let mut edited = created.clone();
        edited.identity.email = Some("a@x.com".into());
        edited.location.latitude = Some(10.0);
        edited.location.longitude = Some(20.0);
        edited.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.identity.email.as_deref(), Some("a@x.com"));
        assert_eq!(
            loaded.location.fixed_coordinate(),
            Some(Coordinate::new(10.0, 20.0))
        );
    }

    #[test]
    fn test_store_and_api_configs() {
        let mut config = Config::default();
        config.preferences.token = Some("t".into());
        config.weather.api_key = Some("from-file".into());
        config.weather.request_timeout_secs = 3;

        let store = config.preferences.store_config();
        assert_eq!(store.collection, "userConfig");
        assert_eq!(store.token.as_deref(), Some("t"));

        let api = config.weather.api_config();
        assert_eq!(api.timeout, Duration::from_secs(3));
        assert_eq!(api.base_url, "https://api.openweathermap.org");
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
