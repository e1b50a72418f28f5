//! Domain types for the zone fabric
//!
//! Strongly-typed wrappers around the primitives the fabric passes around on
//! the wire, so that a zone name can never be confused with a routing path
//! and a raw `u32` can never be confused with a hop count.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Dotted zone name encoding a position in the zone tree, e.g. `a.b.c`.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 512),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ZoneName(String);

impl ZoneName {
    /// Splits the dotted name into its individual components.
    #[must_use]
    pub fn components(&self) -> Vec<&str> {
        self.as_ref().split('.').collect()
    }

    /// Number of dot separators, i.e. depth minus one.
    #[must_use]
    pub fn dot_count(&self) -> usize {
        self.as_ref().matches('.').count()
    }

    /// Appends a component, producing a new dotted name.
    ///
    /// # Errors
    /// Returns an error if the resulting name is empty.
    pub fn join(&self, component: &str) -> Result<Self, ZoneNameError> {
        Self::try_new(format!("{self}.{component}"))
    }
}

/// The accumulated chain of zones that have already handled a message,
/// leftmost is the originator. Shares representation with [`ZoneName`] but
/// is kept as a distinct type because the two are never interchangeable.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 4096),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct RoutingPath(String);

impl RoutingPath {
    /// Splits the path into its dotted components.
    #[must_use]
    pub fn components(&self) -> Vec<&str> {
        self.as_ref().split('.').collect()
    }

    /// Number of dot separators in the path.
    #[must_use]
    pub fn dot_count(&self) -> usize {
        self.as_ref().matches('.').count()
    }

    /// Appends the next hop to the path.
    ///
    /// # Errors
    /// Returns an error if the resulting path is empty.
    pub fn extend(&self, next_hop: &ZoneName) -> Result<Self, RoutingPathError> {
        Self::try_new(format!("{self}.{next_hop}"))
    }

    /// Reverses the order of the path's components, used to compute a reply
    /// destination from the chain of agents that forwarded a request.
    ///
    /// # Errors
    /// Returns an error if the reversed path is empty (never happens for a
    /// validated, non-empty path, but the constructor still returns
    /// `Result`).
    pub fn reversed(&self) -> Result<Self, RoutingPathError> {
        let mut parts = self.components();
        parts.reverse();
        Self::try_new(parts.join("."))
    }
}

impl From<ZoneName> for RoutingPath {
    fn from(name: ZoneName) -> Self {
        Self::try_new(name.into_inner()).expect("ZoneName is always a valid RoutingPath")
    }
}

/// Direction a routed or broadcast message travels relative to the zone
/// tree's parent/child edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Toward parent zones, i.e. toward the root.
    Up,
    /// Toward child zones, i.e. away from the root.
    Down,
}

impl Direction {
    /// The direction a reply travels relative to the request it answers.
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Correlation identifier for an in-flight request awaiting a response.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ResponseUuid(Uuid);

impl ResponseUuid {
    /// Generates a fresh random correlation identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Number of hops a broadcast has already traveled.
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        From,
        Into
    ),
    default = 0
)]
pub struct HopCount(u32);

impl HopCount {
    /// The next hop count after one more forward.
    #[must_use]
    pub fn next(self) -> Self {
        Self::new(self.into_inner() + 1)
    }
}

/// Upper bound on broadcast hops before a message is dropped.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10
)]
pub struct MaxBroadcastHopCount(u32);

/// Seconds between topology cache refreshes.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 60
)]
pub struct ZoneDbCheckIntervalSecs(u64);

/// Bound on how long an originator waits for a response before the
/// in-flight slot is reclaimed and a local timeout is surfaced.
#[nutype(
    validate(greater_or_equal = 100, less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 30_000
)]
pub struct ResponseTimeoutMs(u64);

impl ResponseTimeoutMs {
    /// The timeout as a `std::time::Duration`.
    #[must_use]
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Bounded channel / in-flight table capacity.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10_000
)]
pub struct InFlightCapacity(usize);

impl InFlightCapacity {
    /// The value as `usize`, for sizing concurrent maps.
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.into_inner()
    }
}

/// Name of a registered service API: the only three the fabric recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    /// The compute service API.
    Compute,
    /// The network service API.
    Network,
    /// The volume service API.
    Volume,
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compute => write!(f, "compute"),
            Self::Network => write!(f, "network"),
            Self::Volume => write!(f, "volume"),
        }
    }
}

impl std::str::FromStr for ServiceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compute" => Ok(Self::Compute),
            "network" => Ok(Self::Network),
            "volume" => Ok(Self::Volume),
            other => Err(format!("unrecognized service name: {other}")),
        }
    }
}

/// `SQLite` connection pool size.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10
)]
pub struct ConnectionPoolSize(usize);

impl ConnectionPoolSize {
    /// The value as `usize`, for sizing connection pools.
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.into_inner()
    }
}

/// Identifier of an instance, as exchanged between zones.
#[nutype(
    sanitize(trim),
    validate(not_empty),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct InstanceUuid(String);
