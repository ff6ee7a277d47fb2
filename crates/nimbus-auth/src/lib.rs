//! Identity session for Nimbus.
//!
//! Observes an external auth capability and republishes the signed-in
//! identity to the preference store and weather controller.

pub mod error;
pub mod identity;
pub mod provider;

pub use error::AuthError;
pub use identity::{Identity, IdentityChange, IdentityEvents, IdentitySession};
pub use provider::{IdentityProvider, StaticIdentityProvider};
