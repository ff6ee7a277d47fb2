//! Preference record types shared by the store and the weather controller.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::{PersistenceError, PersistenceResult};

pub const DEFAULT_LANGUAGE: &str = "en";

/// Measurement system requested from the weather service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
        }
    }

    pub fn temperature_symbol(&self) -> &'static str {
        match self {
            Self::Metric => "°C",
            Self::Imperial => "°F",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Self::Metric => Self::Imperial,
            Self::Imperial => Self::Metric,
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            other => Err(PersistenceError::validation(format!(
                "Unknown units '{}', expected metric or imperial",
                other
            ))),
        }
    }
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Persisted per-user settings, one document per owner handle.
///
/// Stored as `{ "preferredUnits", "preferredLanguage", "email" }`. The
/// misspelled `preferedLanguage` key written by older clients is accepted
/// on read and never written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    #[serde(default)]
    pub preferred_units: Units,
    #[serde(default = "default_language", alias = "preferedLanguage")]
    pub preferred_language: String,
    #[serde(rename = "email", default)]
    pub owner_handle: String,
}

impl PreferenceRecord {
    /// The record created on first access for `owner_handle`.
    pub fn defaults_for(owner_handle: impl Into<String>) -> Self {
        Self {
            preferred_units: Units::default(),
            preferred_language: default_language(),
            owner_handle: owner_handle.into(),
        }
    }

    /// Field-wise merge: fields absent from `patch` keep their value.
    pub fn merged(&self, patch: &PreferencePatch) -> Self {
        Self {
            preferred_units: patch.preferred_units.unwrap_or(self.preferred_units),
            preferred_language: patch
                .preferred_language
                .clone()
                .unwrap_or_else(|| self.preferred_language.clone()),
            owner_handle: self.owner_handle.clone(),
        }
    }
}

/// Partial update for a [`PreferenceRecord`]; only `Some` fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencePatch {
    pub preferred_units: Option<Units>,
    pub preferred_language: Option<String>,
}

impl PreferencePatch {
    pub fn units(units: Units) -> Self {
        Self {
            preferred_units: Some(units),
            ..Self::default()
        }
    }

    pub fn language(language: impl Into<String>) -> Self {
        Self {
            preferred_language: Some(language.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.preferred_units.is_none() && self.preferred_language.is_none()
    }

    /// Check the patch before anything is sent to storage.
    ///
    /// # Errors
    /// Returns `PersistenceError::Validation` if the language code is empty
    /// or not of the form `xx` / `xx-YY`.
    pub fn validate(&self) -> PersistenceResult<()> {
        if let Some(language) = &self.preferred_language {
            let mut parts = language.split('-');
            let primary = parts.next().unwrap_or_default();
            let primary_ok = (2..=3).contains(&primary.len())
                && primary.chars().all(|c| c.is_ascii_alphabetic());
            let rest_ok = parts.all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric()));

            if !primary_ok || !rest_ok {
                return Err(PersistenceError::validation(format!(
                    "Invalid language code '{}'",
                    language
                )));
            }
        }
        Ok(())
    }
}
