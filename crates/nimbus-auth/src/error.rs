//! Identity session errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The identity capability never resolved a first value.
    #[error("Identity provider unavailable")]
    Unavailable,

    #[error("No signed-in identity")]
    NotSignedIn,
}

impl AuthError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unavailable => "Sign-in service is not responding. Please try again later.",
            Self::NotSignedIn => "Please sign in to change your settings.",
        }
    }
}
