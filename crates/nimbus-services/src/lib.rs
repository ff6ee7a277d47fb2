//! Preference persistence for Nimbus.
//!
//! Keeps one preference record per identity handle in a remote document
//! store and republishes it locally for the weather controller.

pub mod backend;
pub mod document_store;
pub mod preference;
pub mod store;

pub use backend::{PersistenceError, PersistenceResult, PreferenceBackend};
pub use document_store::{DocumentStoreClient, DocumentStoreConfig};
pub use preference::{PreferencePatch, PreferenceRecord, Units, DEFAULT_LANGUAGE};
pub use store::PreferenceStore;
