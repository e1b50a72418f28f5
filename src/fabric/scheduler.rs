//! Run-instance scheduler collaborator
//!
//! `schedule_run_instance` is dispatched through this trait rather than a
//! hardcoded placement policy; the fabric only owns the method name and
//! forwards to whatever implementation is injected. Placement itself is
//! opaque to the fabric (see Non-goals).

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain_types::ZoneName;
use crate::fabric::topology::TopologyCache;

/// Arguments of a `schedule_run_instance` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRunInstanceArgs {
    /// Opaque instance placement request, passed through unchanged.
    pub request_spec: Value,
    /// Opaque scheduling filter hints, passed through unchanged.
    #[serde(default)]
    pub filter_properties: Value,
}

/// Outcome of a scheduling decision.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulingDecision {
    /// Create the instance here and cast the run to the local scheduler
    /// topic.
    CreateHere,
    /// Forward `schedule_run_instance` to this child zone instead.
    Forward(ZoneName),
}

/// Scheduling failed; every candidate zone was tried and none worked, or
/// there were no candidates at all.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("could not find a zone to schedule the instance in")]
pub struct SchedulerError;

/// Picks where to run a new instance: locally, or forwarded to a child
/// zone. The fabric never implements placement policy itself.
#[async_trait]
pub trait RunInstanceScheduler: Send + Sync {
    /// Decides where `args` should run.
    async fn schedule_run_instance(
        &self,
        topology: &TopologyCache,
        args: &ScheduleRunInstanceArgs,
    ) -> Result<SchedulingDecision, SchedulerError>;
}

/// Default scheduler: runs locally when there are no children, otherwise
/// forwards to children in round-robin order. Provided so a fabric can
/// always be constructed without requiring a placement policy; real
/// deployments are expected to inject their own.
#[derive(Default)]
pub struct RoundRobinScheduler {
    next: AtomicUsize,
}

impl RoundRobinScheduler {
    /// Creates a fresh round-robin scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunInstanceScheduler for RoundRobinScheduler {
    async fn schedule_run_instance(
        &self,
        topology: &TopologyCache,
        _args: &ScheduleRunInstanceArgs,
    ) -> Result<SchedulingDecision, SchedulerError> {
        let children = topology.children();
        if children.is_empty() {
            return Ok(SchedulingDecision::CreateHere);
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed) % children.len();
        Ok(SchedulingDecision::Forward(children[index].name.clone()))
    }
}
