//! Weather service client.
//!
//! Talks to the OpenWeather One Call endpoint. Callers depend on the
//! [`WeatherApi`] trait so the controller can run against fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nimbus_services::Units;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::types::{Coordinate, WeatherFetchError, WeatherSnapshot, DEFAULT_FETCH_ERROR};

pub const DEFAULT_API_BASE_URL: &str = "https://api.openweathermap.org";
const ONECALL_PATH: &str = "data/3.0/onecall";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Fully resolved parameters of one weather request.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherQuery {
    pub coordinate: Coordinate,
    pub units: Units,
    pub language: String,
}

#[async_trait]
pub trait WeatherApi: Send + Sync {
    async fn current(&self, query: &WeatherQuery) -> Result<WeatherSnapshot, WeatherFetchError>;
}

#[derive(Debug, Clone)]
pub struct WeatherApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl WeatherApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OneCallResponse {
    current: CurrentConditions,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    temp: f64,
    feels_like: f64,
    humidity: f64,
    pressure: f64,
    #[serde(default)]
    uvi: f64,
    visibility: Option<f64>,
    #[serde(default)]
    weather: Vec<ConditionEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ConditionEntry {
    #[serde(default)]
    description: String,
    #[serde(default)]
    main: String,
    #[serde(default)]
    icon: String,
}

/// Error fields the service may embed in a response body.
#[derive(Debug, Default, Deserialize)]
struct ErrorFields {
    error: Option<String>,
    message: Option<String>,
}

impl ErrorFields {
    fn most_specific(self) -> Option<String> {
        self.error
            .or(self.message)
            .filter(|m| !m.trim().is_empty())
    }
}

/// HTTP implementation of [`WeatherApi`].
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: Arc<Client>,
    endpoint: Url,
    api_key: String,
}

impl OpenWeatherClient {
    /// # Errors
    /// Returns `WeatherFetchError::Parse` for an unusable base URL, or
    /// `WeatherFetchError::Network` if the HTTP client cannot be built.
    pub fn new(config: WeatherApiConfig) -> Result<Self, WeatherFetchError> {
        let base = format!("{}/", config.base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&base)
            .and_then(|base| base.join(ONECALL_PATH))
            .map_err(|e| WeatherFetchError::Parse(format!("Invalid weather API URL: {}", e)))?;

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client: Arc::new(client),
            endpoint,
            api_key: config.api_key,
        })
    }

    fn request_url(&self, query: &WeatherQuery) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("lat", &query.coordinate.latitude.to_string())
            .append_pair("lon", &query.coordinate.longitude.to_string())
            .append_pair("units", query.units.as_str())
            .append_pair("lang", &query.language)
            .append_pair("appid", &self.api_key);
        url
    }

    fn parse_body(
        status: reqwest::StatusCode,
        body: &str,
        query: &WeatherQuery,
    ) -> Result<WeatherSnapshot, WeatherFetchError> {
        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) if status.is_success() => {
                return Err(WeatherFetchError::Parse(e.to_string()));
            }
            Err(_) => serde_json::Value::Null,
        };

        let embedded = serde_json::from_value::<ErrorFields>(value.clone())
            .unwrap_or_default();
        let has_error_field = embedded.error.is_some();

        // Non-2xx and a populated `error` field are the same failure
        if !status.is_success() || has_error_field {
            let message = embedded
                .most_specific()
                .unwrap_or_else(|| DEFAULT_FETCH_ERROR.to_string());
            return Err(WeatherFetchError::Api {
                status: Some(status.as_u16()),
                message,
            });
        }

        let response: OneCallResponse = serde_json::from_value(value)
            .map_err(|e| WeatherFetchError::Parse(e.to_string()))?;
        let current = response.current;
        let condition = current.weather.into_iter().next().unwrap_or_default();

        Ok(WeatherSnapshot {
            temperature: current.temp,
            feels_like: current.feels_like,
            humidity: current.humidity,
            pressure: current.pressure,
            uv_index: current.uvi,
            visibility_meters: current.visibility,
            condition_summary: condition.description,
            condition_main: condition.main,
            icon: condition.icon,
            units: query.units,
            coordinate: query.coordinate,
            fetched_at: Utc::now(),
        })
    }
}

/// The client timeout can expire while sending or while reading the body.
fn transport_error(e: reqwest::Error) -> WeatherFetchError {
    if e.is_timeout() {
        WeatherFetchError::Timeout
    } else {
        WeatherFetchError::Network(e)
    }
}

#[async_trait]
impl WeatherApi for OpenWeatherClient {
    #[instrument(skip(self), fields(coordinate = %query.coordinate, units = %query.units), level = "debug")]
    async fn current(&self, query: &WeatherQuery) -> Result<WeatherSnapshot, WeatherFetchError> {
        let response = self
            .client
            .get(self.request_url(query))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        Self::parse_body(status, &body, query)
    }
}
