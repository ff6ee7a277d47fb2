//! End-to-end dashboard flows against in-memory capabilities.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nimbus_auth::{Identity, IdentityProvider};
use nimbus_core::{App, AppError, Config, PersistenceError};
use nimbus_services::{PersistenceResult, PreferenceBackend, PreferenceRecord, Units};
use nimbus_weather::{
    Coordinate, GeolocationCapability, LocationError, LocationState, PositionOptions,
    StaticGeolocation, WeatherApi, WeatherFetchError, WeatherQuery, WeatherSnapshot, WeatherState,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

#[derive(Default)]
struct MemoryBackend {
    records: Mutex<HashMap<String, PreferenceRecord>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_reads: Mutex<bool>,
}

#[async_trait]
impl PreferenceBackend for MemoryBackend {
    async fn read(&self, owner_handle: &str) -> PersistenceResult<Option<PreferenceRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if *self.fail_reads.lock() {
            return Err(PersistenceError::Remote {
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(self.records.lock().get(owner_handle).cloned())
    }

    async fn write(&self, record: &PreferenceRecord) -> PersistenceResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .insert(record.owner_handle.clone(), record.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingWeatherApi {
    queries: Mutex<Vec<WeatherQuery>>,
}

impl RecordingWeatherApi {
    fn calls(&self) -> usize {
        self.queries.lock().len()
    }
}

#[async_trait]
impl WeatherApi for RecordingWeatherApi {
    async fn current(&self, query: &WeatherQuery) -> Result<WeatherSnapshot, WeatherFetchError> {
        self.queries.lock().push(query.clone());
        Ok(WeatherSnapshot {
            temperature: 28.0,
            feels_like: 31.0,
            humidity: 74.0,
            pressure: 1010.0,
            uv_index: 5.5,
            visibility_meters: Some(8000.0),
            condition_summary: "light rain".into(),
            condition_main: "Rain".into(),
            icon: "10d".into(),
            units: query.units,
            coordinate: query.coordinate,
            fetched_at: Utc::now(),
        })
    }
}

/// Device that denies the first request and grants later ones.
struct DenyOnceGeolocation {
    calls: AtomicUsize,
    coordinate: Coordinate,
}

#[async_trait]
impl GeolocationCapability for DenyOnceGeolocation {
    fn is_supported(&self) -> bool {
        true
    }

    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Coordinate, LocationError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(LocationError::PermissionDenied)
        } else {
            Ok(self.coordinate)
        }
    }
}

/// Identity capability driven by the test through a channel.
struct ChannelProvider {
    rx: Mutex<Option<mpsc::Receiver<Option<Identity>>>>,
}

impl ChannelProvider {
    fn new() -> (Self, mpsc::Sender<Option<Identity>>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl IdentityProvider for ChannelProvider {
    fn subscribe(&self) -> mpsc::Receiver<Option<Identity>> {
        self.rx.lock().take().expect("subscribed twice")
    }
}

struct Harness {
    app: App,
    backend: Arc<MemoryBackend>,
    api: Arc<RecordingWeatherApi>,
    identity: mpsc::Sender<Option<Identity>>,
    weather: watch::Receiver<WeatherState>,
}

fn harness(geolocation: Arc<dyn GeolocationCapability>) -> Harness {
    let backend = Arc::new(MemoryBackend::default());
    let api = Arc::new(RecordingWeatherApi::default());
    let app = App::with_parts(Config::default(), backend.clone(), api.clone(), geolocation);

    let (provider, identity) = ChannelProvider::new();
    app.start(&provider);
    let weather = app.subscribe_weather();

    Harness {
        app,
        backend,
        api,
        identity,
        weather,
    }
}

fn denied_location() -> Arc<dyn GeolocationCapability> {
    Arc::new(StaticGeolocation::new(None))
}

fn alice() -> Identity {
    Identity::new("a@x.com").with_display_name("Alice")
}

async fn wait_for_weather(
    rx: &mut watch::Receiver<WeatherState>,
    predicate: impl FnMut(&WeatherState) -> bool,
) -> WeatherState {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for weather state")
        .expect("weather channel closed")
        .clone()
}

async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn sign_in_creates_defaults_and_fetches_at_fallback() {
    let mut h = harness(denied_location());

    h.identity.send(Some(alice())).await.unwrap();
    let state = wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;

    assert!(state.error.is_none());
    let snapshot = state.snapshot.unwrap();
    assert_eq!(snapshot.coordinate, Coordinate::FALLBACK);
    assert_eq!(snapshot.units, Units::Metric);

    assert_eq!(
        h.backend.records.lock().get("a@x.com"),
        Some(&PreferenceRecord::defaults_for("a@x.com"))
    );
    assert_eq!(h.backend.writes.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.app.preferences().current(),
        Some(PreferenceRecord::defaults_for("a@x.com"))
    );

    // Location denial is advisory only
    wait_until(|| h.app.location_state() == LocationState::Denied(LocationError::Unsupported)).await;
    assert!(h.app.needs_location());
    assert!(h.app.weather_state().error.is_none());
}

#[tokio::test]
async fn token_refresh_does_not_reload_preferences() {
    let mut h = harness(denied_location());

    h.identity.send(Some(alice())).await.unwrap();
    wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;

    let refreshed = Identity::new("a@x.com").with_display_name("Alice L.");
    h.identity.send(Some(refreshed)).await.unwrap();
    wait_until(|| {
        h.app.session().current_identity().and_then(|i| i.display_name)
            == Some("Alice L.".to_string())
    })
    .await;

    assert_eq!(h.backend.reads.load(Ordering::SeqCst), 1);
    assert_eq!(h.api.calls(), 1);
}

#[tokio::test]
async fn changing_units_refetches_in_new_units() {
    let mut h = harness(denied_location());

    h.identity.send(Some(alice())).await.unwrap();
    wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;

    let record = h.app.set_units(Units::Imperial).await.unwrap();
    assert_eq!(record.preferred_units, Units::Imperial);

    let state = wait_for_weather(&mut h.weather, |s| {
        s.snapshot.as_ref().map(|snap| snap.units) == Some(Units::Imperial)
    })
    .await;
    assert!(state.error.is_none());
    assert_eq!(
        h.backend.records.lock().get("a@x.com").map(|r| r.preferred_units),
        Some(Units::Imperial)
    );

    let record = h.app.toggle_language().await.unwrap();
    assert_eq!(record.preferred_language, "id");
    wait_until(|| h.api.queries.lock().iter().any(|q| q.language == "id")).await;
}

#[tokio::test]
async fn granted_location_moves_weather_to_device_position() {
    let here = Coordinate::new(10.0, 20.0);
    let mut h = harness(Arc::new(StaticGeolocation::new(Some(here))));

    h.identity.send(Some(alice())).await.unwrap();
    let state = wait_for_weather(&mut h.weather, |s| {
        s.snapshot.as_ref().map(|snap| snap.coordinate) == Some(here)
    })
    .await;

    assert!(state.error.is_none());
    assert!(!h.app.needs_location());
}

#[tokio::test]
async fn enable_location_retries_after_denial() {
    let here = Coordinate::new(-7.25, 112.75);
    let geolocation = Arc::new(DenyOnceGeolocation {
        calls: AtomicUsize::new(0),
        coordinate: here,
    });
    let mut h = harness(geolocation.clone());

    h.identity.send(Some(alice())).await.unwrap();
    wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;
    wait_until(|| {
        h.app.location_state() == LocationState::Denied(LocationError::PermissionDenied)
    })
    .await;

    assert_eq!(h.app.enable_location().await, Some(here));
    assert_eq!(
        h.app.weather_state().snapshot.map(|s| s.coordinate),
        Some(here)
    );
    assert_eq!(geolocation.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sign_out_clears_weather_and_preferences() {
    let mut h = harness(denied_location());

    h.identity.send(Some(alice())).await.unwrap();
    wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;

    h.identity.send(None).await.unwrap();
    wait_for_weather(&mut h.weather, |s| *s == WeatherState::default()).await;
    wait_until(|| h.app.preferences().current().is_none()).await;

    let result = h.app.set_units(Units::Imperial).await;
    assert!(matches!(result, Err(AppError::Auth(_))));
}

#[tokio::test]
async fn switching_users_loads_their_preferences() {
    let mut h = harness(denied_location());
    h.backend.records.lock().insert(
        "b@x.com".into(),
        PreferenceRecord {
            preferred_units: Units::Imperial,
            preferred_language: "id".into(),
            owner_handle: "b@x.com".into(),
        },
    );

    h.identity.send(Some(alice())).await.unwrap();
    wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;

    h.identity.send(Some(Identity::new("b@x.com"))).await.unwrap();
    let state = wait_for_weather(&mut h.weather, |s| {
        s.snapshot.as_ref().map(|snap| snap.units) == Some(Units::Imperial)
    })
    .await;

    assert!(state.error.is_none());
    assert_eq!(
        h.app.preferences().current().map(|r| r.owner_handle),
        Some("b@x.com".to_string())
    );
    assert!(h.api.queries.lock().iter().any(|q| q.language == "id"));
}

#[tokio::test]
async fn preference_outage_leaves_dashboard_running() {
    let mut h = harness(denied_location());
    *h.backend.fail_reads.lock() = true;

    h.identity.send(Some(alice())).await.unwrap();
    wait_until(|| h.backend.reads.load(Ordering::SeqCst) == 1).await;

    assert!(h.app.preferences().current().is_none());
    assert_eq!(h.api.calls(), 0);

    // Manual refresh still works with default units at the fallback
    h.app.refresh().await;
    let state = wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;
    assert_eq!(state.snapshot.map(|s| s.units), Some(Units::Metric));
}

#[tokio::test]
async fn reload_after_preference_outage_starts_weather() {
    let mut h = harness(denied_location());
    *h.backend.fail_reads.lock() = true;

    h.identity.send(Some(alice())).await.unwrap();
    wait_until(|| h.backend.reads.load(Ordering::SeqCst) == 1).await;

    // A token refresh alone does not reload
    *h.backend.fail_reads.lock() = false;
    h.identity.send(Some(alice())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.backend.reads.load(Ordering::SeqCst), 1);

    let mut reloaded = None;
    for _ in 0..200 {
        if let Some(record) = h.app.reload_preferences().await.unwrap() {
            reloaded = Some(record);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(reloaded, Some(PreferenceRecord::defaults_for("a@x.com")));
    assert_eq!(h.backend.reads.load(Ordering::SeqCst), 2);

    let state = wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;
    assert!(state.error.is_none());
    assert_eq!(h.api.calls(), 1);

    // Once loaded, reloading is a no-op
    h.app.reload_preferences().await.unwrap();
    assert_eq!(h.backend.reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reload_requires_sign_in() {
    let h = harness(denied_location());
    let result = h.app.reload_preferences().await;
    assert!(matches!(result, Err(AppError::Auth(_))));
}

#[tokio::test]
async fn quick_switch_away_and_back_reloads_each_user() {
    let mut h = harness(denied_location());

    h.identity.send(Some(alice())).await.unwrap();
    wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;

    h.identity.send(Some(Identity::new("b@x.com"))).await.unwrap();
    h.identity.send(Some(alice())).await.unwrap();

    wait_until(|| h.backend.reads.load(Ordering::SeqCst) == 3).await;
    wait_until(|| {
        h.app.preferences().current().map(|r| r.owner_handle) == Some("a@x.com".to_string())
    })
    .await;
    assert!(h.backend.records.lock().contains_key("b@x.com"));

    let state = wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;
    assert!(state.error.is_none());
    assert!(h.api.calls() >= 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_periodic_refresh() {
    let mut h = harness(denied_location());

    h.identity.send(Some(alice())).await.unwrap();
    wait_for_weather(&mut h.weather, |s| s.snapshot.is_some()).await;

    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
    assert_eq!(h.api.calls(), 2);

    h.app.shutdown().await;
    assert_eq!(h.app.weather_state(), WeatherState::default());

    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    assert_eq!(h.api.calls(), 2);
}
