//! # zonefabric
//!
//! An inter-zone messaging fabric for a tree-structured cloud compute
//! control plane: each zone knows only its parent and child neighbours, and
//! routes, broadcasts, and service-API calls travel hop by hop along the
//! accumulated dotted path between originator and destination.
//!
//! ## Architecture
//!
//! The fabric follows a functional-core / imperative-shell split: pure path
//! arithmetic and envelope construction ([`fabric::router`],
//! [`fabric::broadcaster`], [`fabric::envelope`]) are free functions with no
//! I/O, while [`fabric::agent::ZoneAgent`] is the single stateful object
//! that wires a topology cache, a transport, a response rendezvous and a
//! service-API registry together and answers both the public client surface
//! and inbound envelopes.

pub mod database;
pub mod domain_types;
pub mod error;
pub mod fabric;
pub mod rest_api;
pub mod server;
pub mod storage;

pub use database::{DatabaseConfig, DatabaseConnection, DatabasePath, StorageError, StorageResult};
pub use domain_types::{
    ConnectionPoolSize, Direction, HopCount, InFlightCapacity, InstanceUuid, MaxBroadcastHopCount,
    ResponseTimeoutMs, ResponseUuid, RoutingPath, ServiceName, ZoneDbCheckIntervalSecs, ZoneName,
};
pub use error::ZoneError;
pub use fabric::{
    AgentError, ComputeApi, ComputeMethod, ConfigError, ConnectionDescriptor, DispatchError, Envelope,
    HopLimitExceeded, InMemoryComputeApi, InMemoryInstances, InMemoryNetworkApi, InMemoryTransport,
    InMemoryVolumeApi, InstanceLoader, InstanceRecord, InstanceStore, LocalMethod, Message, MethodInfo,
    NetworkApi, NetworkMethod, RemoteOutcome, ReqwestRpcClient, ResponseMultiplexer, RoundRobinScheduler,
    RouterError, RunInstanceScheduler, RpcClient, RpcZoneTransport, ScheduleRunInstanceArgs, SchedulerError,
    SchedulingDecision, ServiceApiRegistry, TopologyCache, TopologyError, TransportError, VolumeApi,
    VolumeMethod, ZoneAgent, ZoneAgentBuilder, ZoneInfo, ZoneManagerConfig, ZoneManagerConfigBuilder,
    ZoneRow, ZoneRowSource, ZoneTransport,
};
pub use storage::ZoneRowStore;

// Common re-exports, mirroring what most modules in this crate already pull
// in individually.
pub use ::tracing::{debug, error, info, trace, warn};
pub use serde_json::Value;
pub use thiserror::Error;
pub use uuid::Uuid;
