//! Identity session state.
//!
//! The session holds the last identity delivered by the auth capability and
//! notifies subscribers once per transition. A re-delivery of the same handle
//! (token refresh) updates the stored identity without notifying anyone.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::AuthError;
use crate::provider::IdentityProvider;

/// Transitions buffered per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 64;

/// A signed-in user as reported by the auth capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable key for the user across sessions (e-mail address).
    pub handle: String,
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name to greet the user with, falling back to "User".
    pub fn greeting_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("User")
    }
}

/// A transition observed by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityChange {
    SignedIn(Identity),
    SignedOut,
}

impl IdentityChange {
    fn from_identity(identity: Option<Identity>) -> Self {
        match identity {
            Some(identity) => Self::SignedIn(identity),
            None => Self::SignedOut,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::SignedIn(identity) => Some(identity),
            Self::SignedOut => None,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionState {
    initializing: bool,
    identity: Option<Identity>,
    transitions: u64,
}

/// Stream of identity transitions from an [`IdentitySession`].
///
/// Only changes after the subscription are reported; read
/// [`IdentitySession::current_identity`] for the starting value.
/// Transitions are queued, so back-to-back changes are each reported in
/// order even when the subscriber is slow to poll.
pub struct IdentityEvents {
    rx: broadcast::Receiver<IdentityChange>,
}

impl IdentityEvents {
    /// Wait for the next transition. Returns `None` once the session is gone.
    pub async fn next(&mut self) -> Option<IdentityChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Identity subscriber lagged; {} transitions dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Observed identity plus an initialization flag.
pub struct IdentitySession {
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<IdentityChange>,
}

impl IdentitySession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState {
            initializing: true,
            identity: None,
            transitions: 0,
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state, events }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    /// True until the auth capability has delivered its first value.
    pub fn is_initializing(&self) -> bool {
        self.state.borrow().initializing
    }

    /// Number of transitions observed so far.
    pub fn transitions(&self) -> u64 {
        self.state.borrow().transitions
    }

    pub fn subscribe(&self) -> IdentityEvents {
        IdentityEvents {
            rx: self.events.subscribe(),
        }
    }

    /// Record a value delivered by the auth capability.
    ///
    /// Returns true when the delivery was a transition (first resolution,
    /// sign-in, sign-out or a different handle) and subscribers were notified.
    pub fn observe(&self, delivered: Option<Identity>) -> bool {
        self.state.send_if_modified(|state| {
            let was_initializing = std::mem::replace(&mut state.initializing, false);
            let same_handle = match (&state.identity, &delivered) {
                (Some(current), Some(next)) => current.handle == next.handle,
                (None, None) => true,
                _ => false,
            };
            state.identity = delivered;

            if same_handle && !was_initializing {
                tracing::debug!("Identity re-delivered without a handle change");
                return false;
            }

            state.transitions += 1;
            match &state.identity {
                Some(identity) => tracing::info!("Identity signed in: {}", identity.handle),
                None => tracing::info!("Identity signed out"),
            }
            // Sent under the state lock so events keep transition order
            let _ = self
                .events
                .send(IdentityChange::from_identity(state.identity.clone()));
            true
        })
    }

    /// Wait until the first identity value arrives.
    ///
    /// With `timeout = None` this waits indefinitely, which is the expected
    /// behaviour while the capability is still resolving.
    ///
    /// # Errors
    /// Returns `AuthError::Unavailable` if the timeout elapses first.
    pub async fn wait_initialized(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<Identity>, AuthError> {
        let mut rx = self.state.subscribe();
        let ready = rx.wait_for(|state| !state.initializing);

        let state = match timeout {
            Some(limit) => tokio::time::timeout(limit, ready)
                .await
                .map_err(|_| AuthError::Unavailable)?,
            None => ready.await,
        }
        .map_err(|_| AuthError::Unavailable)?;

        Ok(state.identity.clone())
    }

    /// Forward every delivery of `provider` into this session.
    ///
    /// The task ends when the provider closes its channel. If that happens
    /// before any delivery the session simply stays initializing.
    pub fn attach<P>(self: &Arc<Self>, provider: &P) -> JoinHandle<()>
    where
        P: IdentityProvider + ?Sized,
    {
        let mut deliveries = provider.subscribe();
        let session = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(delivered) = deliveries.recv().await {
                session.observe(delivered);
            }
            if session.is_initializing() {
                tracing::warn!("Identity provider closed before resolving an identity");
            }
        })
    }
}

impl Default for IdentitySession {
    fn default() -> Self {
        Self::new()
    }
}
