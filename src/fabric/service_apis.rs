//! Minimal service-API implementations (§4.7 collaborators)
//!
//! The fabric treats compute, network and volume internals as opaque; these
//! in-memory implementations exist to exercise the dispatcher's rewrite and
//! passthrough rules end to end, the same role the teacher's in-memory test
//! doubles play for its own registries.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain_types::InstanceUuid;
use crate::fabric::absorber::{AbsorberError, InstanceStore};
use crate::fabric::dispatcher::{ComputeApi, DispatchError, InstanceLoader, NetworkApi, VolumeApi};
use crate::fabric::envelope::InstanceRecord;

/// In-memory instance table, doubling as an [`InstanceLoader`] for the
/// compute dispatch rewrite rule.
#[derive(Default)]
pub struct InMemoryInstances {
    records: Mutex<HashMap<InstanceUuid, InstanceRecord>>,
}

impl InMemoryInstances {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an instance record.
    pub fn insert(&self, record: InstanceRecord) {
        self.records.lock().unwrap().insert(record.uuid.clone(), record);
    }
}

#[async_trait]
impl InstanceLoader for InMemoryInstances {
    async fn load_instance(&self, uuid: &InstanceUuid) -> Result<InstanceRecord, DispatchError> {
        self.records
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| DispatchError::InstanceLoadFailed(uuid.to_string()))
    }
}

/// The same in-memory table also serves as the root zone's absorbed
/// instance store, so a deployment with no external instance database can
/// still exercise `instance_update` / `instance_destroy` end to end.
#[async_trait]
impl InstanceStore for InMemoryInstances {
    async fn update_instance(&self, uuid: &InstanceUuid, fields: Map<String, Value>) -> Result<(), AbsorberError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(uuid) {
            Some(record) => {
                record.fields.extend(fields);
                Ok(())
            }
            None => Err(AbsorberError::NotFound),
        }
    }

    async fn create_instance(&self, fields: Map<String, Value>) -> Result<(), AbsorberError> {
        let uuid_value = fields.get("uuid").and_then(Value::as_str).ok_or(AbsorberError::MissingUuid)?;
        let uuid = InstanceUuid::try_new(uuid_value.to_string()).map_err(|_| AbsorberError::MissingUuid)?;
        self.records.lock().unwrap().insert(
            uuid.clone(),
            InstanceRecord { uuid, fields, cache: None },
        );
        Ok(())
    }

    async fn destroy_instance(&self, uuid: &InstanceUuid) -> Result<(), AbsorberError> {
        match self.records.lock().unwrap().remove(uuid) {
            Some(_) => Ok(()),
            None => Err(AbsorberError::NotFound),
        }
    }

    async fn update_instance_info_cache(&self, uuid: &InstanceUuid, cache: Value) -> Result<(), AbsorberError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(uuid) {
            Some(record) => {
                record.cache = Some(cache);
                Ok(())
            }
            None => Err(AbsorberError::NotFound),
        }
    }
}

/// Compute service API backed by [`InMemoryInstances`]: reboot flips a
/// `task_state` field, diagnostics echoes back the stored fields.
pub struct InMemoryComputeApi;

#[async_trait]
impl ComputeApi for InMemoryComputeApi {
    async fn reboot(&self, instance: &InstanceRecord, _kwargs: &Map<String, Value>) -> Result<Value, DispatchError> {
        Ok(serde_json::json!({"uuid": instance.uuid.to_string(), "task_state": "rebooting"}))
    }

    async fn get_diagnostics(&self, instance: &InstanceRecord) -> Result<Value, DispatchError> {
        Ok(Value::Object(instance.fields.clone()))
    }
}

/// Network service API backed by an in-memory fixed-IP pool.
#[derive(Default)]
pub struct InMemoryNetworkApi {
    allocated: Mutex<Vec<String>>,
}

impl InMemoryNetworkApi {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NetworkApi for InMemoryNetworkApi {
    async fn allocate_fixed_ip(&self, args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, DispatchError> {
        let address = format!("10.0.0.{}", self.allocated.lock().unwrap().len() + 1);
        self.allocated.lock().unwrap().push(address.clone());
        Ok(serde_json::json!({"address": address, "args": args}))
    }

    async fn deallocate_fixed_ip(&self, args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, DispatchError> {
        if let Some(address) = args.first().and_then(Value::as_str) {
            self.allocated.lock().unwrap().retain(|a| a != address);
        }
        Ok(Value::Null)
    }
}

/// Volume service API backed by an in-memory attachment table.
#[derive(Default)]
pub struct InMemoryVolumeApi {
    attachments: Mutex<HashMap<String, String>>,
}

impl InMemoryVolumeApi {
    /// Creates an empty attachment table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolumeApi for InMemoryVolumeApi {
    async fn attach_volume(&self, args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, DispatchError> {
        let volume_id = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
        let instance_uuid = args.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
        self.attachments.lock().unwrap().insert(volume_id.clone(), instance_uuid);
        Ok(serde_json::json!({"volume_id": volume_id, "status": "attached"}))
    }

    async fn detach_volume(&self, args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, DispatchError> {
        let volume_id = args.first().and_then(Value::as_str).unwrap_or_default();
        self.attachments.lock().unwrap().remove(volume_id);
        Ok(serde_json::json!({"volume_id": volume_id, "status": "detached"}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(uuid: &str) -> InstanceRecord {
        InstanceRecord {
            uuid: InstanceUuid::try_new(uuid.to_string()).unwrap(),
            fields: Map::new(),
            cache: None,
        }
    }

    #[tokio::test]
    async fn loader_returns_inserted_instance() {
        let instances = InMemoryInstances::new();
        instances.insert(instance("u-1"));

        let loaded = instances
            .load_instance(&InstanceUuid::try_new("u-1".to_string()).unwrap())
            .await
            .unwrap();
        assert_eq!(loaded.uuid.to_string(), "u-1");
    }

    #[tokio::test]
    async fn loader_fails_for_unknown_instance() {
        let instances = InMemoryInstances::new();
        let result = instances
            .load_instance(&InstanceUuid::try_new("missing".to_string()).unwrap())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reboot_reports_task_state() {
        let api = InMemoryComputeApi;
        let result = api.reboot(&instance("u-1"), &Map::new()).await.unwrap();
        assert_eq!(result["task_state"], serde_json::json!("rebooting"));
    }

    #[tokio::test]
    async fn allocate_then_deallocate_fixed_ip_round_trips() {
        let api = InMemoryNetworkApi::new();
        let allocated = api.allocate_fixed_ip(&[], &Map::new()).await.unwrap();
        let address = allocated["address"].as_str().unwrap().to_string();

        api.deallocate_fixed_ip(&[serde_json::json!(address)], &Map::new()).await.unwrap();
        assert!(api.allocated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn instance_store_creates_on_missing_then_updates() {
        let instances = InMemoryInstances::new();
        let uuid = InstanceUuid::try_new("u-1".to_string()).unwrap();

        let mut fields = Map::new();
        fields.insert("uuid".to_string(), Value::String("u-1".to_string()));
        fields.insert("task_state".to_string(), Value::String("spawning".to_string()));

        assert!(matches!(
            instances.update_instance(&uuid, fields.clone()).await,
            Err(AbsorberError::NotFound)
        ));
        instances.create_instance(fields).await.unwrap();

        let mut update = Map::new();
        update.insert("task_state".to_string(), Value::String("running".to_string()));
        instances.update_instance(&uuid, update).await.unwrap();

        let loaded = instances.load_instance(&uuid).await.unwrap();
        assert_eq!(loaded.fields["task_state"], Value::String("running".to_string()));
    }

    #[tokio::test]
    async fn attach_then_detach_volume_round_trips() {
        let api = InMemoryVolumeApi::new();
        api.attach_volume(&[serde_json::json!("vol-1"), serde_json::json!("inst-1")], &Map::new())
            .await
            .unwrap();
        assert_eq!(api.attachments.lock().unwrap().len(), 1);

        api.detach_volume(&[serde_json::json!("vol-1")], &Map::new()).await.unwrap();
        assert!(api.attachments.lock().unwrap().is_empty());
    }
}
