//! Service-API dispatcher (C7)
//!
//! Executes an inbound, locally-destined `run_service_api_method` request
//! against one of the three registered service APIs. Dispatch is a
//! tagged-variant decode rather than dynamic method-name lookup: each
//! service exposes a small, closed set of methods, and an unrecognized
//! method name fails the same way an unregistered service does.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain_types::{InstanceUuid, ServiceName};
use crate::fabric::envelope::InstanceRecord;

/// Failure executing a service-API call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No implementation is registered for the named service.
    #[error("service API not registered: {0}")]
    ServiceNotRegistered(ServiceName),

    /// The method name is not one the service recognizes.
    #[error("method {method} not found on service {service}")]
    MethodNotFound {
        /// Service the call was addressed to.
        service: ServiceName,
        /// Requested method name.
        method: String,
    },

    /// The compute rewrite rule needed an instance that could not be
    /// loaded.
    #[error("failed to load instance {0}")]
    InstanceLoadFailed(String),

    /// The first positional argument of a compute call was not an
    /// instance uuid.
    #[error("compute calls require an instance uuid as their first argument")]
    MissingInstanceArgument,
}

/// Arguments of a `run_service_api_method` request.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    /// Name of the method to invoke.
    pub method: String,
    /// Positional arguments. For `compute`, the first entry is rewritten
    /// from an instance uuid to the loaded instance record before the call.
    pub method_args: Vec<Value>,
    /// Keyword arguments.
    pub method_kwargs: Map<String, Value>,
}

/// The closed set of methods the compute service API recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeMethod {
    /// Reboot a running instance.
    Reboot,
    /// Fetch diagnostic information for an instance.
    GetDiagnostics,
}

impl FromStr for ComputeMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reboot" => Ok(Self::Reboot),
            "get_diagnostics" => Ok(Self::GetDiagnostics),
            _ => Err(()),
        }
    }
}

/// The closed set of methods the network service API recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMethod {
    /// Allocate a fixed IP for an instance.
    AllocateFixedIp,
    /// Release a previously allocated fixed IP.
    DeallocateFixedIp,
}

impl FromStr for NetworkMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allocate_fixed_ip" => Ok(Self::AllocateFixedIp),
            "deallocate_fixed_ip" => Ok(Self::DeallocateFixedIp),
            _ => Err(()),
        }
    }
}

/// The closed set of methods the volume service API recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeMethod {
    /// Attach a volume to an instance.
    AttachVolume,
    /// Detach a volume from an instance.
    DetachVolume,
}

impl FromStr for VolumeMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attach_volume" => Ok(Self::AttachVolume),
            "detach_volume" => Ok(Self::DetachVolume),
            _ => Err(()),
        }
    }
}

/// Compute service API, the only service whose calls receive a loaded
/// instance record rather than a raw uuid.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Reboots `instance`.
    async fn reboot(&self, instance: &InstanceRecord, kwargs: &Map<String, Value>) -> Result<Value, DispatchError>;

    /// Fetches diagnostics for `instance`.
    async fn get_diagnostics(&self, instance: &InstanceRecord) -> Result<Value, DispatchError>;
}

/// Network service API.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    /// Allocates a fixed IP.
    async fn allocate_fixed_ip(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, DispatchError>;

    /// Deallocates a fixed IP.
    async fn deallocate_fixed_ip(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, DispatchError>;
}

/// Volume service API.
#[async_trait]
pub trait VolumeApi: Send + Sync {
    /// Attaches a volume.
    async fn attach_volume(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, DispatchError>;

    /// Detaches a volume.
    async fn detach_volume(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, DispatchError>;
}

/// Loads an instance record by uuid, used only to satisfy the compute
/// rewrite rule.
#[async_trait]
pub trait InstanceLoader: Send + Sync {
    /// Loads the instance identified by `uuid`.
    async fn load_instance(&self, uuid: &InstanceUuid) -> Result<InstanceRecord, DispatchError>;
}

/// Process-wide registry of the three recognized service APIs, each
/// optional until explicitly registered.
#[derive(Clone, Default)]
pub struct ServiceApiRegistry {
    compute: Option<Arc<dyn ComputeApi>>,
    network: Option<Arc<dyn NetworkApi>>,
    volume: Option<Arc<dyn VolumeApi>>,
}

impl ServiceApiRegistry {
    /// Creates a registry with no services registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the compute service API.
    #[must_use]
    pub fn with_compute(mut self, api: Arc<dyn ComputeApi>) -> Self {
        self.compute = Some(api);
        self
    }

    /// Registers the network service API.
    #[must_use]
    pub fn with_network(mut self, api: Arc<dyn NetworkApi>) -> Self {
        self.network = Some(api);
        self
    }

    /// Registers the volume service API.
    #[must_use]
    pub fn with_volume(mut self, api: Arc<dyn VolumeApi>) -> Self {
        self.volume = Some(api);
        self
    }

    /// Executes `method_info` against `service_name`, rewriting the first
    /// positional argument from an instance uuid to the loaded instance
    /// record when `service_name` is `compute`.
    pub async fn run_service_api_method(
        &self,
        loader: &dyn InstanceLoader,
        service_name: ServiceName,
        method_info: MethodInfo,
    ) -> Result<Value, DispatchError> {
        match service_name {
            ServiceName::Compute => {
                let api = self
                    .compute
                    .as_ref()
                    .ok_or(DispatchError::ServiceNotRegistered(ServiceName::Compute))?;
                let method = ComputeMethod::from_str(&method_info.method).map_err(|()| {
                    DispatchError::MethodNotFound {
                        service: ServiceName::Compute,
                        method: method_info.method.clone(),
                    }
                })?;
                let uuid_arg = method_info
                    .method_args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or(DispatchError::MissingInstanceArgument)?;
                let uuid = InstanceUuid::try_new(uuid_arg.to_string())
                    .map_err(|e| DispatchError::InstanceLoadFailed(e.to_string()))?;
                let instance = loader.load_instance(&uuid).await?;
                match method {
                    ComputeMethod::Reboot => api.reboot(&instance, &method_info.method_kwargs).await,
                    ComputeMethod::GetDiagnostics => api.get_diagnostics(&instance).await,
                }
            }
            ServiceName::Network => {
                let api = self
                    .network
                    .as_ref()
                    .ok_or(DispatchError::ServiceNotRegistered(ServiceName::Network))?;
                let method = NetworkMethod::from_str(&method_info.method).map_err(|()| {
                    DispatchError::MethodNotFound {
                        service: ServiceName::Network,
                        method: method_info.method.clone(),
                    }
                })?;
                match method {
                    NetworkMethod::AllocateFixedIp => {
                        api.allocate_fixed_ip(&method_info.method_args, &method_info.method_kwargs).await
                    }
                    NetworkMethod::DeallocateFixedIp => {
                        api.deallocate_fixed_ip(&method_info.method_args, &method_info.method_kwargs).await
                    }
                }
            }
            ServiceName::Volume => {
                let api = self
                    .volume
                    .as_ref()
                    .ok_or(DispatchError::ServiceNotRegistered(ServiceName::Volume))?;
                let method = VolumeMethod::from_str(&method_info.method).map_err(|()| {
                    DispatchError::MethodNotFound {
                        service: ServiceName::Volume,
                        method: method_info.method.clone(),
                    }
                })?;
                match method {
                    VolumeMethod::AttachVolume => {
                        api.attach_volume(&method_info.method_args, &method_info.method_kwargs).await
                    }
                    VolumeMethod::DetachVolume => {
                        api.detach_volume(&method_info.method_args, &method_info.method_kwargs).await
                    }
                }
            }
        }
    }
}
