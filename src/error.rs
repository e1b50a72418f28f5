//! Top-level error type for zonefabric's startup and operator-facing surfaces
//!
//! [`crate::fabric::ZoneAgent`]'s own public API (`zone_call`, `zone_cast`,
//! `broadcast_up`, ...) already returns [`crate::fabric::AgentError`] at
//! exactly the boundary where an originator observes a routing failure, a
//! remote failure, or a response timeout. `ZoneError` aggregates the
//! complementary set of failures the daemon and CLI hit outside that API,
//! at configuration load time and at storage initialization.

use thiserror::Error;

/// Error surfaced while loading configuration or opening storage, distinct
/// from [`crate::fabric::AgentError`], which [`crate::fabric::ZoneAgent`]'s
/// own public methods return.
#[derive(Error, Debug)]
pub enum ZoneError {
    /// Configuration failed to load or failed validation.
    #[error("configuration error: {0}")]
    Configuration(#[from] crate::fabric::ConfigError),

    /// Persistence-layer failure opening or migrating the zones database.
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}
