//! The zone agent: wires topology, transport, routing and dispatch together
//!
//! Everything else in [`crate::fabric`] is a pure function or a narrow
//! trait; `ZoneAgent` is the one stateful object that owns them and answers
//! both the public client surface (`zone_call`, `broadcast_up`, ...) and
//! inbound envelopes arriving over the transport.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::domain_types::{
    Direction, HopCount, InstanceUuid, ResponseUuid, RoutingPath, ServiceName, ZoneName,
};
use crate::fabric::absorber::{absorb_instance_destroy, absorb_instance_update, AbsorberError, InstanceStore};
use crate::fabric::broadcaster::{plan_broadcast, HopLimitExceeded};
use crate::fabric::config::ZoneManagerConfig;
use crate::fabric::dispatcher::{
    ComputeApi, DispatchError, InstanceLoader, MethodInfo, NetworkApi, ServiceApiRegistry, VolumeApi,
};
use crate::fabric::envelope::{
    instance_destroy_message, instance_update_message, reply_message, routing_envelope, Envelope,
    InstanceRecord, Message, ResultInfo,
};
use crate::fabric::multiplexer::{RemoteOutcome, ResponseMultiplexer, ResponseTimedOut};
use crate::fabric::router::{extend_path, find_next_hop, NextHop, RouterError};
use crate::fabric::scheduler::{
    RoundRobinScheduler, RunInstanceScheduler, ScheduleRunInstanceArgs, SchedulerError, SchedulingDecision,
};
use crate::fabric::topology::TopologyCache;
use crate::fabric::transport::{deliver_to_all, TransportError, ZoneTransport};

/// Any failure surfaced by the agent, whether local, remote, or a routing
/// inconsistency.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Routing could not find a next hop.
    #[error(transparent)]
    Routing(#[from] RouterError),

    /// A local service-API dispatch failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Instance state absorption failed.
    #[error(transparent)]
    Absorb(#[from] AbsorberError),

    /// The transport could not deliver a forwarded or reply envelope.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A `need_response` call timed out waiting for its reply.
    #[error(transparent)]
    Timeout(#[from] ResponseTimedOut),

    /// Scheduling failed to find a candidate zone.
    #[error(transparent)]
    Scheduling(#[from] SchedulerError),

    /// A message payload could not be encoded or decoded.
    #[error("malformed message payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No local method, system or application-registered, answers this
    /// method name.
    #[error("no local handler for method {0}")]
    UnknownMethod(String),

    /// The method executed remotely and raised an error there.
    #[error("remote error ({kind}): {message}")]
    Remote {
        /// Short name of the remote error kind.
        kind: String,
        /// Human readable message.
        message: String,
        /// Best-effort remote trace text.
        trace: String,
    },
}

impl AgentError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Routing(_) => "RoutingInconsistency",
            Self::Dispatch(_) => "DispatchError",
            Self::Absorb(_) => "AbsorberError",
            Self::Transport(_) => "TransportError",
            Self::Timeout(_) => "ResponseTimeout",
            Self::Scheduling(_) => "SchedulerError",
            Self::Serialization(_) => "SerializationError",
            Self::UnknownMethod(_) => "UnknownMethod",
            Self::Remote { .. } => "RemoteError",
        }
    }
}

/// An application-defined local method, invoked when an inbound message's
/// method name matches neither a system method nor a service-API call.
/// Exists so integration tests and host applications can exercise the
/// routing and broadcast machinery with their own verbs.
#[async_trait::async_trait]
pub trait LocalMethod: Send + Sync {
    /// Executes the method against its JSON arguments.
    async fn call(&self, args: Value) -> Result<Value, AgentError>;
}

struct NullInstanceLoader;

#[async_trait::async_trait]
impl InstanceLoader for NullInstanceLoader {
    async fn load_instance(&self, uuid: &InstanceUuid) -> Result<InstanceRecord, DispatchError> {
        Err(DispatchError::InstanceLoadFailed(uuid.to_string()))
    }
}

struct NullInstanceStore;

#[async_trait::async_trait]
impl InstanceStore for NullInstanceStore {
    async fn update_instance(&self, _uuid: &InstanceUuid, _fields: Map<String, Value>) -> Result<(), AbsorberError> {
        Err(AbsorberError::NotFound)
    }
    async fn create_instance(&self, _fields: Map<String, Value>) -> Result<(), AbsorberError> {
        Err(AbsorberError::Store(Box::new(std::io::Error::other(
            "no instance store configured",
        ))))
    }
    async fn destroy_instance(&self, _uuid: &InstanceUuid) -> Result<(), AbsorberError> {
        Ok(())
    }
    async fn update_instance_info_cache(&self, _uuid: &InstanceUuid, _cache: Value) -> Result<(), AbsorberError> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct RunServiceApiMethodPayload {
    service_name: ServiceName,
    method: String,
    #[serde(default)]
    method_args: Vec<Value>,
    #[serde(default)]
    method_kwargs: Map<String, Value>,
}

/// Owns the topology cache, transport, response rendezvous and dispatch
/// tables for one zone and answers both inbound envelopes and the public
/// client surface.
pub struct ZoneAgent {
    config: ZoneManagerConfig,
    topology: Arc<TopologyCache>,
    transport: Arc<dyn ZoneTransport>,
    multiplexer: ResponseMultiplexer,
    registry: ServiceApiRegistry,
    instance_loader: Arc<dyn InstanceLoader>,
    instance_store: Arc<dyn InstanceStore>,
    scheduler: Arc<dyn RunInstanceScheduler>,
    methods: dashmap::DashMap<String, Arc<dyn LocalMethod>>,
}

impl ZoneAgent {
    /// Starts a builder for a new agent.
    #[must_use]
    pub fn builder(
        config: ZoneManagerConfig,
        topology: Arc<TopologyCache>,
        transport: Arc<dyn ZoneTransport>,
    ) -> ZoneAgentBuilder {
        ZoneAgentBuilder::new(config, topology, transport)
    }

    /// The agent's own zone name.
    #[must_use]
    pub fn local_name(&self) -> ZoneName {
        self.topology.local().name
    }

    /// Registers an application-defined method, invoked for inbound
    /// messages whose method name matches no system method.
    pub fn register_method(&self, name: impl Into<String>, handler: Arc<dyn LocalMethod>) {
        self.methods.insert(name.into(), handler);
    }

    /// Sends `message` to `dest` and awaits its reply, bounded by the
    /// configured response timeout.
    ///
    /// # Errors
    /// Returns an error if routing fails, the transport cannot deliver the
    /// request, the wait times out, or the remote execution raised an
    /// error.
    pub async fn zone_call(
        &self,
        dest: ZoneName,
        direction: Direction,
        message: Message,
    ) -> Result<Value, AgentError> {
        let response_uuid = ResponseUuid::generate();
        let receiver = self.multiplexer.register(response_uuid);
        self.route_message(dest, direction, message, None, true, Some(response_uuid))
            .await?;
        match self
            .multiplexer
            .wait(response_uuid, receiver, self.config.response_timeout_ms)
            .await?
        {
            RemoteOutcome::Success(value) => Ok(value),
            RemoteOutcome::Failure { kind, message, trace } => Err(AgentError::Remote { kind, message, trace }),
        }
    }

    /// Sends `message` to `dest` without waiting for a reply.
    ///
    /// # Errors
    /// Returns an error if routing fails or the transport cannot deliver
    /// the request.
    pub async fn zone_cast(&self, dest: ZoneName, direction: Direction, message: Message) -> Result<(), AgentError> {
        self.route_message(dest, direction, message, None, false, None).await
    }

    /// Broadcasts `message` upward from this zone.
    ///
    /// # Errors
    /// Returns an error if delivery to every parent fails; individual
    /// neighbour failures are logged and do not abort the broadcast.
    pub async fn broadcast_up(&self, message: Message) -> Result<(), AgentError> {
        self.broadcast_message(Direction::Up, message, None, HopCount::default(), false)
            .await
    }

    /// Broadcasts `message` downward from this zone.
    ///
    /// # Errors
    /// Returns an error if delivery to every child fails; individual
    /// neighbour failures are logged and do not abort the broadcast.
    pub async fn broadcast_down(&self, message: Message) -> Result<(), AgentError> {
        self.broadcast_message(Direction::Down, message, None, HopCount::default(), false)
            .await
    }

    /// Calls a service-API method on `dest` and awaits its result.
    ///
    /// # Errors
    /// Returns an error under the same conditions as [`Self::zone_call`].
    pub async fn call_service_api_method(
        &self,
        dest: ZoneName,
        direction: Direction,
        service_name: ServiceName,
        method_info: MethodInfo,
    ) -> Result<Value, AgentError> {
        let message = service_api_message(service_name, method_info)?;
        self.zone_call(dest, direction, message).await
    }

    /// Casts a service-API method to `dest` without waiting for a result.
    ///
    /// # Errors
    /// Returns an error under the same conditions as [`Self::zone_cast`].
    pub async fn cast_service_api_method(
        &self,
        dest: ZoneName,
        direction: Direction,
        service_name: ServiceName,
        method_info: MethodInfo,
    ) -> Result<(), AgentError> {
        let message = service_api_message(service_name, method_info)?;
        self.zone_cast(dest, direction, message).await
    }

    /// Broadcasts an instance update upward, to be absorbed at the root.
    ///
    /// # Errors
    /// Returns an error if the instance payload cannot be encoded.
    pub async fn instance_update(&self, instance: &InstanceRecord) -> Result<(), AgentError> {
        let message = instance_update_message(instance)?;
        self.broadcast_up(message).await
    }

    /// Broadcasts an instance destruction upward, to be absorbed at the
    /// root.
    ///
    /// # Errors
    /// Returns an error if the uuid cannot be encoded.
    pub async fn instance_destroy(&self, uuid: &InstanceUuid) -> Result<(), AgentError> {
        let message = instance_destroy_message(uuid)?;
        self.broadcast_up(message).await
    }

    /// Schedules a new instance run, recursing into a child zone when the
    /// configured scheduler picks one.
    ///
    /// # Errors
    /// Returns an error if the scheduler fails or the forwarded call to a
    /// child zone fails.
    pub async fn schedule_run_instance(&self, args: ScheduleRunInstanceArgs) -> Result<Value, AgentError> {
        match self.scheduler.schedule_run_instance(&self.topology, &args).await? {
            SchedulingDecision::CreateHere => Ok(serde_json::json!({"scheduled_in": self.local_name().to_string()})),
            SchedulingDecision::Forward(child) => {
                let message = Message::new("schedule_run_instance", &args)?;
                let dest = self
                    .local_name()
                    .join(child.as_ref())
                    .expect("a local name joined with a known child's name is a valid zone name");
                Box::pin(self.zone_call(dest, Direction::Down, message)).await
            }
        }
    }

    /// Applies an already-decoded inbound envelope, used by the transport's
    /// receive loop.
    pub async fn handle_envelope(&self, envelope: Envelope) {
        let result = match envelope {
            Envelope::RouteMessage(args) => {
                self.route_message(
                    args.dest_zone_name,
                    args.direction,
                    args.message,
                    args.routing_path,
                    args.need_response,
                    args.response_uuid,
                )
                .await
            }
            Envelope::BroadcastMessage(args) => {
                self.broadcast_message(args.direction, args.message, args.routing_path, args.hopcount, args.fanout)
                    .await
            }
        };
        if let Err(error) = result {
            warn!(%error, "failed handling inbound envelope");
        }
    }

    /// Drives one hop of a routed message: extend the path, compute the
    /// next hop, then either execute locally or forward.
    ///
    /// # Errors
    /// Returns an error if routing is inconsistent or the transport fails
    /// to forward.
    pub async fn route_message(
        &self,
        dest: ZoneName,
        direction: Direction,
        message: Message,
        routing_path: Option<RoutingPath>,
        need_response: bool,
        response_uuid: Option<ResponseUuid>,
    ) -> Result<(), AgentError> {
        let local_name = self.local_name();
        let new_path = extend_path(routing_path.as_ref(), &local_name);

        match find_next_hop(&self.topology, &dest, &new_path, direction)? {
            NextHop::Local => {
                let result = self.execute_local_message(message, new_path.as_ref()).await;
                if need_response {
                    if let Some(uuid) = response_uuid {
                        self.reply(&new_path, direction, uuid, result).await?;
                    }
                } else if let Err(error) = result {
                    warn!(%error, "locally executed cast failed");
                }
                Ok(())
            }
            NextHop::Forward(neighbour) => {
                let envelope = routing_envelope(dest, direction, message, Some(new_path), need_response, response_uuid);
                self.transport.send(&neighbour, &envelope).await?;
                Ok(())
            }
        }
    }

    /// Drives one hop of a broadcast: compute the neighbour set, deliver
    /// the forwarded envelope to each, then execute the message locally.
    /// A broadcast past the hop limit is dropped, not an error.
    ///
    /// # Errors
    /// Returns an error if the message cannot be encoded for a system
    /// method's local execution.
    pub async fn broadcast_message(
        &self,
        direction: Direction,
        message: Message,
        routing_path: Option<RoutingPath>,
        hopcount: HopCount,
        fanout: bool,
    ) -> Result<(), AgentError> {
        let local_name = self.local_name();
        let plan = match plan_broadcast(
            &self.topology,
            &local_name,
            direction,
            message.clone(),
            routing_path.as_ref(),
            hopcount,
            fanout,
            self.config.zone_max_broadcast_hop_count,
        ) {
            Ok(plan) => plan,
            Err(HopLimitExceeded { hopcount, limit }) => {
                warn!(?hopcount, ?limit, "dropping broadcast past hop limit");
                return Ok(());
            }
        };

        deliver_to_all(self.transport.as_ref(), &plan.targets, &plan.forward_envelope, plan.fanout).await;

        if let Err(error) = self.execute_local_message(message, plan.new_path.as_ref()).await {
            warn!(%error, "local broadcast execution failed");
        }
        Ok(())
    }

    async fn reply(
        &self,
        new_path: &RoutingPath,
        incoming_direction: Direction,
        response_uuid: ResponseUuid,
        result: Result<Value, AgentError>,
    ) -> Result<(), AgentError> {
        // the reply travels back along the reverse of the path the request
        // took, starting fresh from this hop
        let reversed = new_path
            .reversed()
            .expect("a validated routing path reverses to a validated routing path");
        let dest = crate::domain_types::ZoneName::try_new(reversed.into_inner())
            .expect("a reversed routing path is always a valid zone name");

        let result_info = match &result {
            Ok(value) => ResultInfo::success(value.clone()),
            Err(error) => ResultInfo::failure(error.kind(), &error.to_string(), ""),
        };
        let message = reply_message(response_uuid, &result_info)?;
        Box::pin(self.route_message(dest, incoming_direction.reversed(), message, None, false, None))
            .await
    }

    async fn execute_local_message(&self, message: Message, routing_path: &str) -> Result<Value, AgentError> {
        match message.method.as_str() {
            "send_response" => {
                #[derive(Deserialize)]
                struct SendResponseArgs {
                    response_uuid: ResponseUuid,
                    result_info: ResultInfoWire,
                }
                #[derive(Deserialize)]
                struct ResultInfoWire {
                    failure: bool,
                    result: Value,
                }
                let args: SendResponseArgs = serde_json::from_value(message.args)?;
                let outcome = if args.result_info.failure {
                    let triple = args.result_info.result.as_array().cloned().unwrap_or_default();
                    RemoteOutcome::Failure {
                        kind: triple.first().and_then(Value::as_str).unwrap_or("RemoteError").to_string(),
                        message: triple.get(1).and_then(Value::as_str).unwrap_or_default().to_string(),
                        trace: triple.get(2).and_then(Value::as_str).unwrap_or_default().to_string(),
                    }
                } else {
                    RemoteOutcome::Success(args.result_info.result)
                };
                self.multiplexer.complete(args.response_uuid, outcome);
                Ok(Value::Null)
            }
            "run_service_api_method" => {
                let payload: RunServiceApiMethodPayload = serde_json::from_value(message.args)?;
                let method_info = MethodInfo {
                    method: payload.method,
                    method_args: payload.method_args,
                    method_kwargs: payload.method_kwargs,
                };
                Ok(self
                    .registry
                    .run_service_api_method(self.instance_loader.as_ref(), payload.service_name, method_info)
                    .await?)
            }
            "instance_update" => {
                let payload: Map<String, Value> = serde_json::from_value(message.args)?;
                absorb_instance_update(self.instance_store.as_ref(), &self.topology, payload, routing_path).await?;
                Ok(Value::Null)
            }
            "instance_destroy" => {
                #[derive(Deserialize)]
                struct DestroyArgs {
                    uuid: InstanceUuid,
                }
                let args: DestroyArgs = serde_json::from_value(message.args)?;
                absorb_instance_destroy(self.instance_store.as_ref(), &self.topology, &args.uuid, routing_path).await?;
                Ok(Value::Null)
            }
            "schedule_run_instance" => {
                let args: ScheduleRunInstanceArgs = serde_json::from_value(message.args)?;
                self.schedule_run_instance(args).await
            }
            other => match self.methods.get(other) {
                Some(handler) => handler.call(message.args).await,
                None => Err(AgentError::UnknownMethod(other.to_string())),
            },
        }
    }
}

fn service_api_message(service_name: ServiceName, method_info: MethodInfo) -> serde_json::Result<Message> {
    Message::new(
        "run_service_api_method",
        &RunServiceApiMethodPayload {
            service_name,
            method: method_info.method,
            method_args: method_info.method_args,
            method_kwargs: method_info.method_kwargs,
        },
    )
}

/// Builder assembling a [`ZoneAgent`] from its required collaborators plus
/// whichever optional service APIs, instance persistence and scheduler a
/// deployment needs.
pub struct ZoneAgentBuilder {
    config: ZoneManagerConfig,
    topology: Arc<TopologyCache>,
    transport: Arc<dyn ZoneTransport>,
    registry: ServiceApiRegistry,
    instance_loader: Option<Arc<dyn InstanceLoader>>,
    instance_store: Option<Arc<dyn InstanceStore>>,
    scheduler: Option<Arc<dyn RunInstanceScheduler>>,
}

impl ZoneAgentBuilder {
    fn new(config: ZoneManagerConfig, topology: Arc<TopologyCache>, transport: Arc<dyn ZoneTransport>) -> Self {
        Self {
            config,
            topology,
            transport,
            registry: ServiceApiRegistry::new(),
            instance_loader: None,
            instance_store: None,
            scheduler: None,
        }
    }

    /// Registers the compute service API.
    #[must_use]
    pub fn with_compute(mut self, api: Arc<dyn ComputeApi>) -> Self {
        self.registry = self.registry.with_compute(api);
        self
    }

    /// Registers the network service API.
    #[must_use]
    pub fn with_network(mut self, api: Arc<dyn NetworkApi>) -> Self {
        self.registry = self.registry.with_network(api);
        self
    }

    /// Registers the volume service API.
    #[must_use]
    pub fn with_volume(mut self, api: Arc<dyn VolumeApi>) -> Self {
        self.registry = self.registry.with_volume(api);
        self
    }

    /// Sets the instance loader used to satisfy the compute rewrite rule.
    #[must_use]
    pub fn with_instance_loader(mut self, loader: Arc<dyn InstanceLoader>) -> Self {
        self.instance_loader = Some(loader);
        self
    }

    /// Sets the instance store writes are absorbed into at the tree root.
    #[must_use]
    pub fn with_instance_store(mut self, store: Arc<dyn InstanceStore>) -> Self {
        self.instance_store = Some(store);
        self
    }

    /// Sets the run-instance scheduler, defaulting to
    /// [`RoundRobinScheduler`] if never called.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn RunInstanceScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Builds the agent.
    #[must_use]
    pub fn build(self) -> ZoneAgent {
        ZoneAgent {
            config: self.config,
            topology: self.topology,
            transport: self.transport,
            multiplexer: ResponseMultiplexer::new(),
            registry: self.registry,
            instance_loader: self.instance_loader.unwrap_or_else(|| Arc::new(NullInstanceLoader)),
            instance_store: self.instance_store.unwrap_or_else(|| Arc::new(NullInstanceStore)),
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(RoundRobinScheduler::new())),
            methods: dashmap::DashMap::new(),
        }
    }
}
