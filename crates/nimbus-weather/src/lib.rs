//! Weather acquisition for Nimbus
//!
//! Provides current conditions from the OpenWeather API, device location
//! acquisition with a fallback coordinate, and a controller that schedules
//! and sequences fetches.

pub mod controller;
pub mod governance;
pub mod location;
pub mod provider;
pub mod types;

pub use controller::{
    FetchOutcome, WeatherController, WeatherControllerConfig, WeatherState, WeatherTrigger,
};
pub use location::{
    GeolocationCapability, LocationAcquirer, LocationState, PositionOptions, StaticGeolocation,
};
pub use provider::{OpenWeatherClient, WeatherApi, WeatherApiConfig, WeatherQuery};
pub use types::*;
