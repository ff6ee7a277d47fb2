//! Dashboard composition.
//!
//! Wires the identity session, preference store, location acquirer and
//! weather controller together. Identity transitions drive preference loads;
//! published preference records drive the weather controller.

use std::sync::Arc;
use std::time::Duration;

use nimbus_auth::{AuthError, Identity, IdentityEvents, IdentityProvider, IdentitySession};
use nimbus_services::{DocumentStoreClient, PreferenceBackend, PreferenceRecord, PreferenceStore, Units};
use nimbus_weather::{
    Coordinate, FetchOutcome, GeolocationCapability, LocationAcquirer, LocationState,
    OpenWeatherClient, StaticGeolocation, WeatherApi, WeatherController, WeatherState,
    WeatherTrigger,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, ConfigError};
use crate::Config;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Main application state and lifecycle manager
pub struct App {
    config: Arc<Config>,
    session: Arc<IdentitySession>,
    preferences: Arc<PreferenceStore>,
    location: Arc<LocationAcquirer>,
    weather: Arc<WeatherController>,
    cancel: CancellationToken,
    /// Forwards provider deliveries into the session.
    forwarder: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// Build the dashboard against the services named in `config`.
    ///
    /// # Errors
    /// Returns `AppError::Config` if validation fails, or the client error if
    /// a remote client cannot be constructed.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let validation = config.validate();
        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        let backend = Arc::new(DocumentStoreClient::new(config.preferences.store_config())?);
        let api = Arc::new(OpenWeatherClient::new(config.weather.api_config())?);
        let geolocation = Arc::new(StaticGeolocation::new(config.location.fixed_coordinate()));

        Ok(Self::with_parts(config, backend, api, geolocation))
    }

    /// Build the dashboard from explicit capabilities.
    pub fn with_parts(
        config: Config,
        backend: Arc<dyn PreferenceBackend>,
        api: Arc<dyn WeatherApi>,
        geolocation: Arc<dyn GeolocationCapability>,
    ) -> Self {
        let location = LocationAcquirer::with_options(geolocation, config.location.position_options());
        let weather = WeatherController::new(api, config.weather.controller_config());

        Self {
            session: Arc::new(IdentitySession::new()),
            preferences: Arc::new(PreferenceStore::new(backend)),
            location: Arc::new(location),
            weather: Arc::new(weather),
            config: Arc::new(config),
            cancel: CancellationToken::new(),
            forwarder: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Attach the identity capability and start reacting to it.
    pub fn start<P>(&self, provider: &P)
    where
        P: IdentityProvider + ?Sized,
    {
        tracing::info!("Starting dashboard");
        // Subscribe before attaching so no early transition is missed
        let events = self.session.subscribe();
        let records = self.preferences.subscribe();
        let initial = (!self.session.is_initializing()).then(|| self.session.current_identity());
        let forward = self.session.attach(provider);

        let coordinator = Coordinator {
            preferences: self.preferences.clone(),
            location: self.location.clone(),
            weather: self.weather.clone(),
            initial,
            last_handle: None,
            location_requested: false,
            cancel: self.cancel.child_token(),
        };
        let run = tokio::spawn(coordinator.run(events, records));

        if let Some(previous) = self.forwarder.lock().replace(forward) {
            previous.abort();
        }
        self.tasks.lock().push(run);
    }

    /// Stop background work and clear published weather.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down dashboard");
        self.cancel.cancel();
        if let Some(forward) = self.forwarder.lock().take() {
            forward.abort();
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for mut task in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => tracing::debug!("task aborted"),
                Ok(Err(e)) => tracing::warn!("task join error: {}", e),
                Err(_) => {
                    tracing::warn!("Dashboard task did not stop in time; aborting");
                    task.abort();
                }
            }
        }

        // After the coordinator is gone so nothing restarts the timer
        self.weather.teardown();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &IdentitySession {
        &self.session
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn weather_state(&self) -> WeatherState {
        self.weather.state()
    }

    pub fn subscribe_weather(&self) -> watch::Receiver<WeatherState> {
        self.weather.subscribe()
    }

    pub fn location_state(&self) -> LocationState {
        self.location.state()
    }

    /// True while no coordinate has been granted.
    pub fn needs_location(&self) -> bool {
        self.location.needs_permission()
    }

    /// Ask for the device location again, e.g. after a denial.
    ///
    /// This is the only path that retries a denied request.
    pub async fn enable_location(&self) -> Option<Coordinate> {
        let coordinate = self.location.request_permission().await?;
        self.weather
            .handle(WeatherTrigger::CoordinateGranted(coordinate))
            .await;
        Some(coordinate)
    }

    /// # Errors
    /// Returns `AuthError::NotSignedIn` without an identity, or the store's
    /// error if the write fails.
    pub async fn set_units(&self, units: Units) -> Result<PreferenceRecord, AppError> {
        let identity = self.require_identity()?;
        Ok(self.preferences.set_units(&identity.handle, units).await?)
    }

    /// # Errors
    /// See [`App::set_units`].
    pub async fn toggle_language(&self) -> Result<PreferenceRecord, AppError> {
        let identity = self.require_identity()?;
        Ok(self.preferences.toggle_language(&identity.handle).await?)
    }

    /// Load the signed-in user's preferences again, e.g. after an outage.
    ///
    /// Re-deliveries of the same identity never reload on their own, so this
    /// is the retry path. Returns the published record unchanged when it is
    /// already loaded.
    ///
    /// # Errors
    /// Returns `AuthError::NotSignedIn` without an identity, or the store's
    /// error if the load fails again.
    pub async fn reload_preferences(&self) -> Result<Option<PreferenceRecord>, AppError> {
        let identity = self.require_identity()?;
        Ok(self.preferences.on_identity_changed(Some(&identity)).await?)
    }

    pub async fn refresh(&self) -> FetchOutcome {
        self.weather.handle(WeatherTrigger::ManualRefresh).await
    }

    fn require_identity(&self) -> Result<Identity, AuthError> {
        self.session.current_identity().ok_or(AuthError::NotSignedIn)
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(forward) = self.forwarder.lock().take() {
            forward.abort();
        }
    }
}

/// Background task turning session and preference changes into triggers.
struct Coordinator {
    preferences: Arc<PreferenceStore>,
    location: Arc<LocationAcquirer>,
    weather: Arc<WeatherController>,
    /// Identity already resolved before the coordinator subscribed.
    initial: Option<Option<Identity>>,
    /// Handle of the last identity acted on; `None` until the first one.
    last_handle: Option<Option<String>>,
    location_requested: bool,
    cancel: CancellationToken,
}

impl Coordinator {
    async fn run(
        mut self,
        mut events: IdentityEvents,
        mut records: watch::Receiver<Option<PreferenceRecord>>,
    ) {
        if let Some(identity) = self.initial.take() {
            self.on_identity(identity).await;
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                change = events.next() => match change {
                    Some(change) => self.on_identity(change.identity().cloned()).await,
                    None => break,
                },
                changed = records.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let record = records.borrow_and_update().clone();
                    if let Some(record) = record {
                        self.weather
                            .handle(WeatherTrigger::PreferencesAvailable(record))
                            .await;
                    }
                }
            }
        }
        tracing::debug!("Dashboard coordinator stopped");
    }

    async fn on_identity(&mut self, identity: Option<Identity>) {
        let handle = identity.as_ref().map(|i| i.handle.clone());
        if self.last_handle.as_ref() == Some(&handle) {
            return;
        }
        let previous = self.last_handle.replace(handle);

        // A previous user's timer and snapshot must not outlive them
        if matches!(previous, Some(Some(_))) {
            self.weather.teardown();
        }

        if let Err(e) = self.preferences.on_identity_changed(identity.as_ref()).await {
            tracing::error!("Preferences unavailable: {}", e.user_message());
        }

        if identity.is_some() && !self.location_requested {
            self.location_requested = true;
            self.request_location();
        }
    }

    fn request_location(&self) {
        let location = self.location.clone();
        let weather = self.weather.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let granted = tokio::select! {
                _ = cancel.cancelled() => return,
                granted = location.request_permission() => granted,
            };
            match granted {
                Some(coordinate) => {
                    weather
                        .handle(WeatherTrigger::CoordinateGranted(coordinate))
                        .await;
                }
                None => {
                    if let Some(message) = location.last_error() {
                        tracing::info!("Using fallback location: {}", message);
                    }
                }
            }
        });
    }
}
