//! Weather acquisition controller.
//!
//! Turns explicit triggers (preferences delivered, coordinate granted, timer
//! tick, manual refresh) into weather fetches and publishes the latest
//! [`WeatherState`]. Completions are applied in trigger order: a slow request
//! never overwrites the result of one triggered after it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use nimbus_services::{PreferenceRecord, Units};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::governance::{FetchGovernance, FetchStart};
use crate::provider::{WeatherApi, WeatherQuery};
use crate::types::{Coordinate, WeatherFetchError, WeatherSnapshot};

const DEFAULT_REFRESH_MINUTES: u64 = 5;

#[derive(Debug, Clone)]
pub struct WeatherControllerConfig {
    pub refresh_interval: Duration,
    /// Used when no coordinate has been granted.
    pub fallback: Coordinate,
}

impl Default for WeatherControllerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_MINUTES * 60),
            fallback: Coordinate::FALLBACK,
        }
    }
}

/// Published output of the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherState {
    pub snapshot: Option<WeatherSnapshot>,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeatherTrigger {
    PreferencesAvailable(PreferenceRecord),
    CoordinateGranted(Coordinate),
    TimerTick,
    ManualRefresh,
}

/// What became of a trigger or fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The result (snapshot or error) was published.
    Applied,
    /// A later fetch had already been applied; the result was dropped.
    Stale,
    /// An identical request was already in flight.
    Coalesced,
    /// The trigger did not call for a fetch.
    Skipped,
}

struct Inner {
    api: Arc<dyn WeatherApi>,
    config: WeatherControllerConfig,
    governance: Mutex<FetchGovernance>,
    state: watch::Sender<WeatherState>,
    timer: Mutex<Option<CancellationToken>>,
}

/// Settles a fetch on every exit path, including cancellation.
struct FetchGuard<'a> {
    inner: &'a Inner,
    seq: u64,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        let mut governance = self.inner.governance.lock();
        governance.settle(self.seq);
        let loading = governance.is_loading();
        self.inner.state.send_if_modified(|state| {
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        });
    }
}

impl Inner {
    async fn fetch_weather(&self, units: Units, coordinate: Option<Coordinate>) -> FetchOutcome {
        let (query, start) = {
            let mut governance = self.governance.lock();
            if let Some(explicit) = coordinate {
                governance.remember_coordinate(explicit);
            }
            governance.remember_units(units);

            let query = WeatherQuery {
                coordinate: governance.coordinate().unwrap_or(self.config.fallback),
                units,
                language: governance.language().to_string(),
            };
            let start = governance.begin(&query);
            if let FetchStart::Started(_) = start {
                self.state.send_modify(|state| {
                    state.loading = true;
                    state.error = None;
                });
            }
            (query, start)
        };

        let seq = match start {
            FetchStart::Started(seq) => seq,
            FetchStart::Coalesced(seq) => {
                tracing::debug!("Weather request #{} already in flight; coalescing", seq);
                return FetchOutcome::Coalesced;
            }
        };

        let _guard = FetchGuard { inner: self, seq };
        tracing::debug!(
            "Fetching weather #{} for {} ({}, {})",
            seq,
            query.coordinate,
            query.units,
            query.language
        );
        let result = self.api.current(&query).await;
        self.complete(seq, result)
    }

    fn complete(&self, seq: u64, result: Result<WeatherSnapshot, WeatherFetchError>) -> FetchOutcome {
        let mut governance = self.governance.lock();
        if !governance.complete(seq) {
            tracing::debug!("Discarding stale weather result #{}", seq);
            return FetchOutcome::Stale;
        }
        let loading = governance.is_loading();

        match result {
            Ok(snapshot) => {
                tracing::info!(
                    "Weather updated: {} {}",
                    snapshot.temperature_label(),
                    snapshot.condition_summary
                );
                self.state.send_replace(WeatherState {
                    snapshot: Some(snapshot),
                    loading,
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!("Weather fetch #{} failed: {}", seq, e);
                self.state.send_replace(WeatherState {
                    snapshot: None,
                    loading,
                    error: Some(e.user_message()),
                });
            }
        }
        FetchOutcome::Applied
    }

    async fn handle(self: &Arc<Self>, trigger: WeatherTrigger) -> FetchOutcome {
        match trigger {
            WeatherTrigger::PreferencesAvailable(record) => {
                let should_fetch = self
                    .governance
                    .lock()
                    .on_preferences(record.preferred_units, &record.preferred_language);
                self.ensure_timer();
                if should_fetch {
                    self.fetch_weather(record.preferred_units, None).await
                } else {
                    tracing::debug!("Preferences unchanged; no weather fetch");
                    FetchOutcome::Skipped
                }
            }
            WeatherTrigger::CoordinateGranted(coordinate) => {
                let (should_fetch, units) = {
                    let mut governance = self.governance.lock();
                    (governance.on_coordinate(coordinate), governance.units())
                };
                if should_fetch {
                    self.fetch_weather(units, Some(coordinate)).await
                } else {
                    FetchOutcome::Skipped
                }
            }
            WeatherTrigger::TimerTick => {
                let (should_fetch, units) = {
                    let governance = self.governance.lock();
                    (governance.on_tick(), governance.units())
                };
                if should_fetch {
                    self.fetch_weather(units, None).await
                } else {
                    FetchOutcome::Skipped
                }
            }
            WeatherTrigger::ManualRefresh => {
                let units = self.governance.lock().units();
                self.fetch_weather(units, None).await
            }
        }
    }

    fn ensure_timer(self: &Arc<Self>) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }

        let token = CancellationToken::new();
        *timer = Some(token.clone());
        let period = self.config.refresh_interval;
        let weak = Arc::downgrade(self);
        tracing::debug!("Starting weather refresh every {:?}", period);
        tokio::spawn(run_refresh_timer(weak, token, Instant::now() + period, period));
    }

    fn stop_timer(&self) {
        if let Some(token) = self.timer.lock().take() {
            token.cancel();
        }
    }
}

async fn run_refresh_timer(
    inner: Weak<Inner>,
    token: CancellationToken,
    start: Instant,
    period: Duration,
) {
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // A stopped timer must not fire a late tick into the next session
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.handle(WeatherTrigger::TimerTick).await;
            }
        }
    }
    tracing::debug!("Weather refresh timer stopped");
}

/// Owns the fetch governance, the published state and the refresh timer.
///
/// Dropping the controller stops the timer.
pub struct WeatherController {
    inner: Arc<Inner>,
}

impl WeatherController {
    pub fn new(api: Arc<dyn WeatherApi>, config: WeatherControllerConfig) -> Self {
        let (state, _) = watch::channel(WeatherState::default());
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                governance: Mutex::new(FetchGovernance::new()),
                state,
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> WeatherState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WeatherState> {
        self.inner.state.subscribe()
    }

    /// Fetch now for `units`, at `coordinate` or else the session coordinate
    /// or else the fallback location.
    pub async fn fetch_weather(&self, units: Units, coordinate: Option<Coordinate>) -> FetchOutcome {
        self.inner.fetch_weather(units, coordinate).await
    }

    /// Feed one trigger into the controller.
    ///
    /// The first delivery of preferences also starts the refresh timer.
    pub async fn handle(&self, trigger: WeatherTrigger) -> FetchOutcome {
        self.inner.handle(trigger).await
    }

    pub fn is_timer_running(&self) -> bool {
        self.inner.timer.lock().is_some()
    }

    /// Stop the timer, forget preferences and clear published state.
    ///
    /// Requests still in flight complete into nothing.
    pub fn teardown(&self) {
        self.inner.stop_timer();
        let mut governance = self.inner.governance.lock();
        governance.reset();
        self.inner.state.send_replace(WeatherState::default());
        tracing::info!("Weather controller torn down");
    }
}

impl Drop for WeatherController {
    fn drop(&mut self) {
        self.inner.stop_timer();
    }
}

impl std::fmt::Debug for WeatherController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherController")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .field("timer_running", &self.is_timer_running())
            .finish()
    }
}
