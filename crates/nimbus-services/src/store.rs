//! Write-through preference store.
//!
//! Loads the record for the signed-in handle, applies partial updates only
//! after the remote write is confirmed, and republishes the current record on
//! a watch channel.

use std::sync::Arc;

use nimbus_auth::Identity;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::backend::{PersistenceResult, PreferenceBackend};
use crate::preference::{PreferencePatch, PreferenceRecord, Units, DEFAULT_LANGUAGE};

/// Secondary language offered by the header toggle.
pub const ALTERNATE_LANGUAGE: &str = "id";

pub struct PreferenceStore {
    backend: Arc<dyn PreferenceBackend>,
    current: watch::Sender<Option<PreferenceRecord>>,
    /// Handle the published record was loaded for.
    last_handle: Mutex<Option<String>>,
    /// Serialises read-merge-write so concurrent updates cannot interleave.
    write_gate: tokio::sync::Mutex<()>,
}

impl PreferenceStore {
    pub fn new(backend: Arc<dyn PreferenceBackend>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            backend,
            current,
            last_handle: Mutex::new(None),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The locally published record, if one is loaded.
    pub fn current(&self) -> Option<PreferenceRecord> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PreferenceRecord>> {
        self.current.subscribe()
    }

    /// Read the record for `owner_handle`, creating the default one if absent.
    ///
    /// Does not touch the published record.
    ///
    /// # Errors
    /// Returns the backend's `PersistenceError` if the read or the
    /// create-if-absent write fails.
    pub async fn get_or_create(&self, owner_handle: &str) -> PersistenceResult<PreferenceRecord> {
        if let Some(record) = self.backend.read(owner_handle).await? {
            tracing::debug!("Preference record found for {}", owner_handle);
            return Ok(record);
        }

        tracing::info!("Creating default preference record for {}", owner_handle);
        let record = PreferenceRecord::defaults_for(owner_handle);
        self.backend.write(&record).await?;
        Ok(record)
    }

    /// Merge `patch` into the record for `owner_handle` and persist it.
    ///
    /// The published record changes only after the remote write succeeded.
    ///
    /// # Errors
    /// Returns `PersistenceError::Validation` for an invalid patch, or the
    /// backend's error if loading or writing the record fails. Local state is
    /// left untouched on any error.
    pub async fn update(
        &self,
        owner_handle: &str,
        patch: PreferencePatch,
    ) -> PersistenceResult<PreferenceRecord> {
        patch.validate()?;
        let _gate = self.write_gate.lock().await;

        let base = match self.published_for(owner_handle) {
            Some(record) => record,
            None => self.get_or_create(owner_handle).await?,
        };
        if patch.is_empty() {
            return Ok(base);
        }

        let merged = base.merged(&patch);
        if let Err(e) = self.backend.write(&merged).await {
            tracing::error!("Failed to persist preferences for {}: {}", owner_handle, e);
            return Err(e);
        }

        if self.is_current_handle(owner_handle) {
            self.current.send_replace(Some(merged.clone()));
        }
        tracing::info!(
            "Updated preferences for {}: units={}, language={}",
            owner_handle,
            merged.preferred_units,
            merged.preferred_language
        );
        Ok(merged)
    }

    /// # Errors
    /// See [`PreferenceStore::update`].
    pub async fn set_units(
        &self,
        owner_handle: &str,
        units: Units,
    ) -> PersistenceResult<PreferenceRecord> {
        self.update(owner_handle, PreferencePatch::units(units)).await
    }

    /// Switch between the default and the alternate display language.
    ///
    /// # Errors
    /// See [`PreferenceStore::update`].
    pub async fn toggle_language(&self, owner_handle: &str) -> PersistenceResult<PreferenceRecord> {
        let current = match self.published_for(owner_handle) {
            Some(record) => record.preferred_language,
            None => self.get_or_create(owner_handle).await?.preferred_language,
        };
        let next = if current == DEFAULT_LANGUAGE {
            ALTERNATE_LANGUAGE
        } else {
            DEFAULT_LANGUAGE
        };
        self.update(owner_handle, PreferencePatch::language(next)).await
    }

    /// React to an identity delivery from the session.
    ///
    /// Only a change of handle reaches the backend; re-deliveries of the same
    /// handle return the published record as-is. Signing out clears it.
    ///
    /// # Errors
    /// Returns the backend's error if loading the new handle's record fails.
    /// The tracker is reset so calling again for the same handle retries.
    pub async fn on_identity_changed(
        &self,
        identity: Option<&Identity>,
    ) -> PersistenceResult<Option<PreferenceRecord>> {
        let handle = identity.map(|i| i.handle.clone());
        {
            let mut last = self.last_handle.lock();
            if *last == handle {
                tracing::debug!("Identity handle unchanged; keeping preferences");
                return Ok(self.current());
            }
            *last = handle.clone();
        }

        let handle = match handle {
            Some(handle) => handle,
            None => {
                self.current.send_replace(None);
                return Ok(None);
            }
        };

        // Never show one user's settings while another's are loading
        self.current.send_if_modified(|record| {
            let stale = record.as_ref().is_some_and(|r| r.owner_handle != handle);
            if stale {
                *record = None;
            }
            stale
        });

        match self.get_or_create(&handle).await {
            Ok(record) => {
                if !self.is_current_handle(&handle) {
                    tracing::debug!("Dropping preferences for {}: identity changed", handle);
                    return Ok(None);
                }
                self.current.send_replace(Some(record.clone()));
                Ok(Some(record))
            }
            Err(e) => {
                tracing::error!("Failed to load preferences for {}: {}", handle, e);
                let mut last = self.last_handle.lock();
                if last.as_deref() == Some(handle.as_str()) {
                    *last = None;
                }
                Err(e)
            }
        }
    }

    fn is_current_handle(&self, owner_handle: &str) -> bool {
        self.last_handle.lock().as_deref() == Some(owner_handle)
    }

    fn published_for(&self, owner_handle: &str) -> Option<PreferenceRecord> {
        self.current
            .borrow()
            .as_ref()
            .filter(|r| r.owner_handle == owner_handle)
            .cloned()
    }
}

impl std::fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceStore")
            .field("current", &self.current())
            .field("last_handle", &*self.last_handle.lock())
            .finish()
    }
}
