//! Instance state absorber (C8)
//!
//! Applies `instance_update` / `instance_destroy` broadcasts to the local
//! instance store, but only at the root of the tree, and only for updates
//! that genuinely came from elsewhere.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain_types::InstanceUuid;
use crate::fabric::envelope::INSTANCE_UPDATE_BLACKLIST;
use crate::fabric::topology::TopologyCache;

/// Failure applying an absorbed instance record to the store.
#[derive(Debug, Error)]
pub enum AbsorberError {
    /// The referenced instance does not exist.
    #[error("instance not found")]
    NotFound,

    /// The underlying store failed.
    #[error("instance store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The broadcast payload was missing its uuid field.
    #[error("instance_update payload missing uuid")]
    MissingUuid,
}

/// Persistence surface the absorber writes through. Deliberately narrow —
/// the absorber neither interprets instance fields nor validates them
/// beyond the uuid.
#[async_trait::async_trait]
pub trait InstanceStore: Send + Sync {
    /// Updates an existing instance's fields. Returns
    /// [`AbsorberError::NotFound`] if no such instance exists.
    async fn update_instance(
        &self,
        uuid: &InstanceUuid,
        fields: Map<String, Value>,
    ) -> Result<(), AbsorberError>;

    /// Creates a new instance row.
    async fn create_instance(&self, fields: Map<String, Value>) -> Result<(), AbsorberError>;

    /// Deletes an instance by uuid. Implementations should treat a
    /// missing instance as success; the absorber also tolerates a
    /// [`AbsorberError::NotFound`] by swallowing it.
    async fn destroy_instance(&self, uuid: &InstanceUuid) -> Result<(), AbsorberError>;

    /// Writes the instance's private info-cache value separately.
    async fn update_instance_info_cache(
        &self,
        uuid: &InstanceUuid,
        cache: Value,
    ) -> Result<(), AbsorberError>;
}

/// Returns `true` when this agent should absorb writes for an upward
/// instance broadcast: it has no parents (it is the root), and the
/// broadcast did not originate here.
fn should_absorb(topology: &TopologyCache, routing_path: &str) -> bool {
    topology.parents().is_empty() && routing_path != topology.local().name.as_ref()
}

/// Applies an `instance_update` broadcast payload.
///
/// `routing_path` is the full chain of zones the message has traveled,
/// including this hop; its reversal becomes the instance's recorded
/// `zone_name`.
///
/// # Errors
/// Returns an error if the store write fails for a reason other than
/// not-found (not-found triggers a create instead).
pub async fn absorb_instance_update(
    store: &dyn InstanceStore,
    topology: &TopologyCache,
    mut payload: Map<String, Value>,
    routing_path: &str,
) -> Result<(), AbsorberError> {
    if !should_absorb(topology, routing_path) {
        return Ok(());
    }

    let uuid_value = payload
        .get("uuid")
        .and_then(Value::as_str)
        .ok_or(AbsorberError::MissingUuid)?
        .to_string();
    let uuid = InstanceUuid::try_new(uuid_value).map_err(|_| AbsorberError::MissingUuid)?;

    let reversed_path: String = routing_path.split('.').rev().collect::<Vec<_>>().join(".");
    payload.insert("zone_name".to_string(), Value::String(reversed_path));

    let info_cache = payload.remove("info_cache");
    for field in INSTANCE_UPDATE_BLACKLIST {
        payload.remove(*field);
    }

    match store.update_instance(&uuid, payload.clone()).await {
        Ok(()) => {}
        Err(AbsorberError::NotFound) => store.create_instance(payload).await?,
        Err(other) => return Err(other),
    }

    if let Some(cache) = info_cache {
        store.update_instance_info_cache(&uuid, cache).await?;
    }

    Ok(())
}

/// Applies an `instance_destroy` broadcast payload, swallowing a
/// not-found result since the instance may already be gone.
///
/// # Errors
/// Returns an error if the store fails for a reason other than
/// not-found.
pub async fn absorb_instance_destroy(
    store: &dyn InstanceStore,
    topology: &TopologyCache,
    uuid: &InstanceUuid,
    routing_path: &str,
) -> Result<(), AbsorberError> {
    if !should_absorb(topology, routing_path) {
        return Ok(());
    }

    match store.destroy_instance(uuid).await {
        Ok(()) | Err(AbsorberError::NotFound) => Ok(()),
        Err(other) => Err(other),
    }
}
