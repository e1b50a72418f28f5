//! The inter-zone messaging fabric
//!
//! Submodules split the fabric along the same lines the design groups it
//! into: a topology cache, a wire envelope format, pure routing and
//! broadcast arithmetic, a response rendezvous, a service-API dispatcher,
//! an instance-state absorber, a scheduler collaborator, and the
//! [`agent::ZoneAgent`] that wires all of the above to a transport.

pub mod absorber;
pub mod agent;
pub mod broadcaster;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod multiplexer;
pub mod router;
pub mod scheduler;
pub mod service_apis;
pub mod topology;
pub mod transport;

pub use absorber::{AbsorberError, InstanceStore};
pub use agent::{AgentError, LocalMethod, ZoneAgent, ZoneAgentBuilder};
pub use broadcaster::{BroadcastPlan, HopLimitExceeded};
pub use config::{ConfigError, ZoneManagerConfig, ZoneManagerConfigBuilder};
pub use dispatcher::{
    ComputeApi, ComputeMethod, DispatchError, InstanceLoader, MethodInfo, NetworkApi, NetworkMethod,
    ServiceApiRegistry, VolumeApi, VolumeMethod,
};
pub use envelope::{Envelope, InstanceRecord, Message, ResultInfo};
pub use multiplexer::{RemoteOutcome, ResponseMultiplexer, ResponseTimedOut};
pub use router::{NextHop, RouterError};
pub use scheduler::{RoundRobinScheduler, RunInstanceScheduler, ScheduleRunInstanceArgs, SchedulingDecision, SchedulerError};
pub use service_apis::{InMemoryComputeApi, InMemoryInstances, InMemoryNetworkApi, InMemoryVolumeApi};
pub use topology::{TopologyCache, TopologyError, ZoneDbInfo, ZoneInfo, ZoneRow, ZoneRowSource};
pub use transport::{
    ConnectionDescriptor, InMemoryTransport, ReqwestRpcClient, RpcClient, RpcZoneTransport, TransportError,
    ZoneTransport,
};
