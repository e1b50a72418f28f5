//! Broadcaster (C5): fan-out of a message through parents or children
//!
//! Computes the neighbour set and the extended, incremented envelope; actual
//! delivery and local execution are performed by
//! [`crate::fabric::agent::ZoneAgent`], which owns the transport and the
//! dispatch table.

use crate::domain_types::{Direction, HopCount, MaxBroadcastHopCount, RoutingPath};
use crate::fabric::envelope::{broadcast_envelope, Envelope, Message};
use crate::fabric::router::extend_path;
use crate::fabric::topology::{TopologyCache, ZoneInfo};
use crate::domain_types::ZoneName;

/// A broadcast that should be dropped because it has traveled past the
/// configured hop limit. Not an error: the caller should log and return.
#[derive(Debug, Clone, PartialEq)]
pub struct HopLimitExceeded {
    /// Hop count the broadcast had already reached.
    pub hopcount: HopCount,
    /// Configured limit it exceeded.
    pub limit: MaxBroadcastHopCount,
}

/// Plan for executing one hop of a broadcast: the neighbours to forward to,
/// the envelope to send them, and the extended path local execution should
/// use.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastPlan {
    /// Neighbours to deliver the forwarded envelope to.
    pub targets: Vec<ZoneInfo>,
    /// Envelope to send to each target, with path and hopcount advanced.
    pub forward_envelope: Envelope,
    /// Extended routing path the inner message should be executed with
    /// locally.
    pub new_path: RoutingPath,
    /// Whether the transport's fanout primitive should be used.
    pub fanout: bool,
}

/// Computes the plan for one hop of a broadcast, or reports that the hop
/// limit has been exceeded and the broadcast must be dropped.
pub fn plan_broadcast(
    topology: &TopologyCache,
    local_name: &ZoneName,
    direction: Direction,
    message: Message,
    routing_path: Option<&RoutingPath>,
    hopcount: HopCount,
    fanout: bool,
    max_hops: MaxBroadcastHopCount,
) -> Result<BroadcastPlan, HopLimitExceeded> {
    if hopcount.into_inner() > max_hops.into_inner() {
        return Err(HopLimitExceeded { hopcount, limit: max_hops });
    }

    let new_path = extend_path(routing_path, local_name);
    let targets = match direction {
        Direction::Up => topology.parents(),
        Direction::Down => topology.children(),
    };

    let forward_envelope = broadcast_envelope(
        direction,
        message,
        Some(new_path.clone()),
        hopcount.next(),
        fanout,
    );

    Ok(BroadcastPlan {
        targets,
        forward_envelope,
        new_path,
        fanout,
    })
}
