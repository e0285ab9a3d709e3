//! Test helpers for tessera-server unit tests.

use std::sync::Arc;

use tessera_core::MemoryStore;
use tessera_types::models::RegistryConfig;

use crate::state::AppState;

/// Create an `AppState` over a fresh in-memory store.
pub fn test_app_state() -> AppState {
    AppState::new(Arc::new(MemoryStore::new()), RegistryConfig::default())
}
