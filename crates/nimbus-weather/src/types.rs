use chrono::{DateTime, Utc};
use nimbus_services::Units;
use serde::{Deserialize, Serialize};

/// Geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Jakarta, used when no device location is known.
    pub const FALLBACK: Coordinate = Coordinate::new(-6.2146, 106.8451);

    /// True when both components are finite and inside the valid ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

/// Current conditions from one successful fetch.
///
/// Numeric fields are exactly what the service returned for the requested
/// units; nothing is converted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub uv_index: f64,
    pub visibility_meters: Option<f64>,
    pub condition_summary: String,
    pub condition_main: String,
    pub icon: String,
    pub units: Units,
    pub coordinate: Coordinate,
    pub fetched_at: DateTime<Utc>,
}

impl WeatherSnapshot {
    /// Temperature formatted with the unit symbol, e.g. `31°C`.
    pub fn temperature_label(&self) -> String {
        format!("{:.0}{}", self.temperature, self.units.temperature_symbol())
    }
}

/// Location acquisition failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Location information is unavailable")]
    PositionUnavailable,
    #[error("Location request timed out")]
    Timeout,
    #[error("Geolocation is not supported on this device")]
    Unsupported,
}

impl LocationError {
    /// User-facing description stored by the acquirer.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Location permission denied. Please enable location access in your settings."
            }
            Self::PositionUnavailable => "Location information is unavailable.",
            Self::Timeout => "Location request timed out.",
            Self::Unsupported => "Geolocation is not supported by your device.",
        }
    }
}

/// Weather retrieval errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherFetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Weather API error: {message}")]
    Api {
        status: Option<u16>,
        message: String,
    },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Weather request timed out")]
    Timeout,
}

pub const DEFAULT_FETCH_ERROR: &str = "Failed to fetch weather data";

impl WeatherFetchError {
    /// Message stored in the published weather state.
    ///
    /// API errors show the service's own message; everything else maps to a
    /// generic description.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::Network(e) if e.is_timeout() => "Weather request timed out".to_string(),
            Self::Timeout => "Weather request timed out".to_string(),
            Self::Network(_) => "Unable to reach the weather service".to_string(),
            _ => DEFAULT_FETCH_ERROR.to_string(),
        }
    }
}
