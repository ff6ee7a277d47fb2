//! Preference storage backend trait and error types.
//!
//! This module defines the `PreferenceBackend` trait that abstracts over the
//! remote document store, so the store can be exercised against fakes.

use async_trait::async_trait;
use thiserror::Error;

use crate::preference::PreferenceRecord;

/// Errors that can occur while reading or writing preference records.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Transport failure talking to the document store.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The document store answered with a non-success status.
    #[error("Document store error: {status} - {message}")]
    Remote { status: u16, message: String },

    /// A stored document could not be decoded.
    #[error("Invalid preference record: {0}")]
    InvalidRecord(String),

    /// The requested change was rejected before reaching storage.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend-specific failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PersistenceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network(_) => "Unable to reach your settings. Check your connection.",
            Self::Remote { status, .. } if *status >= 500 => {
                "The settings service is having trouble. Please try again later."
            }
            Self::Remote { .. } => "Saving your settings failed. Please try again.",
            Self::InvalidRecord(_) => "Your saved settings could not be read.",
            Self::Validation(_) => "That setting is not valid.",
            Self::Storage(_) => "Saving your settings failed. Please try again.",
        }
    }
}

/// Result type for preference backend operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Remote document store holding one preference record per owner handle.
#[async_trait]
pub trait PreferenceBackend: Send + Sync {
    /// Read the record for `owner_handle`.
    ///
    /// Returns `Ok(None)` when no record exists; absence is not an error.
    async fn read(&self, owner_handle: &str) -> PersistenceResult<Option<PreferenceRecord>>;

    /// Write `record` in full under its owner handle.
    async fn write(&self, record: &PreferenceRecord) -> PersistenceResult<()>;
}
