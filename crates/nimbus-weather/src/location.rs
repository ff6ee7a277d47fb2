//! Device location acquisition.
//!
//! [`LocationAcquirer`] asks the injected [`GeolocationCapability`] for a fix
//! at most once per grant and caches the coordinate for the session. Failures
//! are classified and stored, never returned as errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::types::{Coordinate, LocationError};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Options passed to the device for a single position request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached device fix that may be returned; zero means a fresh fix.
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            maximum_age: Duration::ZERO,
        }
    }
}

/// Platform geolocation primitive.
#[async_trait]
pub trait GeolocationCapability: Send + Sync {
    /// Whether the device can produce a position at all.
    fn is_supported(&self) -> bool;

    async fn current_position(&self, options: &PositionOptions)
        -> Result<Coordinate, LocationError>;
}

/// Capability backed by a fixed coordinate, or unsupported when there is none.
#[derive(Debug, Clone, Default)]
pub struct StaticGeolocation {
    coordinate: Option<Coordinate>,
}

impl StaticGeolocation {
    pub fn new(coordinate: Option<Coordinate>) -> Self {
        Self { coordinate }
    }
}

#[async_trait]
impl GeolocationCapability for StaticGeolocation {
    fn is_supported(&self) -> bool {
        self.coordinate.is_some()
    }

    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Coordinate, LocationError> {
        self.coordinate.ok_or(LocationError::Unsupported)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum LocationState {
    #[default]
    Unrequested,
    Requesting,
    Granted(Coordinate),
    Denied(LocationError),
}

pub struct LocationAcquirer {
    capability: Arc<dyn GeolocationCapability>,
    options: PositionOptions,
    state: watch::Sender<LocationState>,
    request_gate: tokio::sync::Mutex<()>,
    /// Completed device requests; lets waiters tell that one finished while
    /// they were queued.
    attempts: AtomicU64,
}

impl LocationAcquirer {
    pub fn new(capability: Arc<dyn GeolocationCapability>) -> Self {
        Self::with_options(capability, PositionOptions::default())
    }

    pub fn with_options(capability: Arc<dyn GeolocationCapability>, options: PositionOptions) -> Self {
        let (state, _) = watch::channel(LocationState::Unrequested);
        Self {
            capability,
            options,
            state,
            request_gate: tokio::sync::Mutex::new(()),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> LocationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LocationState> {
        self.state.subscribe()
    }

    /// The cached coordinate, if permission was granted.
    pub fn coordinate(&self) -> Option<Coordinate> {
        match &*self.state.borrow() {
            LocationState::Granted(coordinate) => Some(*coordinate),
            _ => None,
        }
    }

    /// True until a coordinate has been granted.
    pub fn needs_permission(&self) -> bool {
        self.coordinate().is_none()
    }

    /// Description of the last failed request, if the acquirer is denied.
    pub fn last_error(&self) -> Option<&'static str> {
        match &*self.state.borrow() {
            LocationState::Denied(err) => Some(err.user_message()),
            _ => None,
        }
    }

    /// Ask the device for a position.
    ///
    /// Returns the cached coordinate once granted. Callers that arrive while a
    /// request is in flight wait for it and share its outcome. After a denial
    /// a fresh call tries the device again.
    pub async fn request_permission(&self) -> Option<Coordinate> {
        if let Some(coordinate) = self.coordinate() {
            return Some(coordinate);
        }

        let seen_attempts = self.attempts.load(Ordering::SeqCst);
        let _gate = self.request_gate.lock().await;

        if let Some(coordinate) = self.coordinate() {
            return Some(coordinate);
        }
        if self.attempts.load(Ordering::SeqCst) != seen_attempts {
            tracing::debug!("Location request finished while waiting; sharing its outcome");
            return None;
        }

        self.state.send_replace(LocationState::Requesting);
        let outcome = self.acquire().await;
        self.attempts.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(coordinate) => {
                tracing::info!("Location granted: {}", coordinate);
                self.state.send_replace(LocationState::Granted(coordinate));
                Some(coordinate)
            }
            Err(err) => {
                tracing::warn!("Location unavailable: {}", err);
                self.state.send_replace(LocationState::Denied(err));
                None
            }
        }
    }

    async fn acquire(&self) -> Result<Coordinate, LocationError> {
        if !self.capability.is_supported() {
            return Err(LocationError::Unsupported);
        }

        let request = self.capability.current_position(&self.options);
        let coordinate = tokio::time::timeout(self.options.timeout, request)
            .await
            .map_err(|_| LocationError::Timeout)??;

        if !coordinate.is_valid() {
            tracing::warn!("Device reported an out-of-range position: {}", coordinate);
            return Err(LocationError::PositionUnavailable);
        }
        Ok(coordinate)
    }
}

impl std::fmt::Debug for LocationAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationAcquirer")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish()
    }
}
