//! Auth capability seam.

use tokio::sync::mpsc;

use crate::identity::Identity;

/// External authentication capability.
///
/// Implementations deliver the current identity (or `None` when signed out)
/// every time their own state changes. Deliveries may repeat the same value;
/// the session filters those out.
pub trait IdentityProvider: Send + Sync {
    fn subscribe(&self) -> mpsc::Receiver<Option<Identity>>;
}

/// Provider that resolves once to a fixed identity and then closes.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    identity: Option<Identity>,
}

impl StaticIdentityProvider {
    pub fn new(identity: Option<Identity>) -> Self {
        Self { identity }
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self::new(Some(identity))
    }

    pub fn signed_out() -> Self {
        Self::new(None)
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn subscribe(&self) -> mpsc::Receiver<Option<Identity>> {
        let (tx, rx) = mpsc::channel(1);
        // Capacity is 1 and the channel is fresh, so this cannot fail
        let _ = tx.try_send(self.identity.clone());
        rx
    }
}
