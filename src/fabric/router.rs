//! Router (C4): next-hop computation for routed messages
//!
//! Pure path arithmetic lives here; the decision of what "execute locally"
//! and "forward" actually do belongs to [`crate::fabric::agent::ZoneAgent`],
//! which owns the transport, the topology cache and the dispatch table.

use thiserror::Error;

use crate::domain_types::{Direction, RoutingPath, ZoneName};
use crate::fabric::topology::{TopologyCache, ZoneInfo};

/// Failure computing or validating a next hop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouterError {
    /// The destination name is inconsistent with the accumulated routing
    /// path, or names a neighbour the local topology cache does not know
    /// in the requested direction.
    #[error(
        "routing inconsistency: cannot reach {dest} from path {routing_path} going {direction}"
    )]
    RoutingInconsistency {
        /// Destination the message was addressed to.
        dest: ZoneName,
        /// Accumulated routing path at the point of failure.
        routing_path: RoutingPath,
        /// Direction requested.
        direction: Direction,
    },
}

/// Result of computing a message's next hop.
#[derive(Debug, Clone, PartialEq)]
pub enum NextHop {
    /// The message has arrived; execute it here.
    Local,
    /// Forward the message to this neighbour.
    Forward(ZoneInfo),
}

/// Extends `routing_path` with the local zone name, the first step of
/// handling any routed or broadcast message.
#[must_use]
pub fn extend_path(routing_path: Option<&RoutingPath>, local_name: &ZoneName) -> RoutingPath {
    match routing_path {
        Some(path) => path
            .extend(local_name)
            .unwrap_or_else(|_| RoutingPath::from(local_name.clone())),
        None => RoutingPath::from(local_name.clone()),
    }
}

/// Computes the next hop for a routed message whose path has already been
/// extended with the local zone name.
///
/// # Errors
/// Returns [`RouterError::RoutingInconsistency`] when `dest` cannot be
/// reached from `new_path` in `direction`, including when it names a
/// neighbour absent from the topology cache.
pub fn find_next_hop(
    topology: &TopologyCache,
    dest: &ZoneName,
    new_path: &RoutingPath,
    direction: Direction,
) -> Result<NextHop, RouterError> {
    if dest.as_ref() == new_path.as_ref() {
        return Ok(NextHop::Local);
    }

    let dest_components = dest.components();
    let new_path_components = new_path.components();
    let next_index = new_path_components.len();

    if dest_components.len() <= next_index || dest_components[..next_index] != new_path_components[..] {
        return Err(RouterError::RoutingInconsistency {
            dest: dest.clone(),
            routing_path: new_path.clone(),
            direction,
        });
    }

    let next_name = ZoneName::try_new(dest_components[next_index].to_string()).map_err(|_| {
        RouterError::RoutingInconsistency {
            dest: dest.clone(),
            routing_path: new_path.clone(),
            direction,
        }
    })?;

    let neighbour = match direction {
        Direction::Up => topology.find_parent(&next_name),
        Direction::Down => topology.find_child(&next_name),
    };

    neighbour.map(NextHop::Forward).ok_or(RouterError::RoutingInconsistency {
        dest: dest.clone(),
        routing_path: new_path.clone(),
        direction,
    })
}
