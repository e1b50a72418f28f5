//! Topology cache: the local, parent and child [`ZoneInfo`] known to an agent
//!
//! Backed by `DashMap` for O(1) lookup under concurrent readers, following
//! the same registry shape used for agent lookup elsewhere in this crate.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::domain_types::ZoneName;

/// Transport credentials and scheduling weights for one neighbour zone, as
/// projected from the persisted zone row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDbInfo {
    /// Scheduling weight multiplier.
    pub weight_scale: f64,
    /// Scheduling weight offset.
    pub weight_offset: f64,
    /// Transport username.
    pub username: String,
    /// Transport password.
    pub password: String,
    /// Transport host.
    pub host: String,
    /// Transport port.
    pub port: u16,
    /// Transport virtual host.
    pub virtual_host: String,
}

/// One row as read from the persisted zone store, prior to being folded
/// into a [`ZoneInfo`].
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneRow {
    /// Dotted zone name.
    pub name: ZoneName,
    /// Whether this neighbour is a parent (`true`) or a child (`false`).
    pub is_parent: bool,
    /// Transport credentials and weights.
    pub db_info: ZoneDbInfo,
}

/// What an agent knows about a single zone: itself, a parent, or a child.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneInfo {
    /// Dotted zone name.
    pub name: ZoneName,
    /// Whether this entry describes the local agent.
    pub is_me: bool,
    /// Whether this neighbour is a parent. Meaningless when `is_me` is set.
    pub is_parent: bool,
    /// Last time this entry was refreshed or contacted.
    pub last_seen: SystemTime,
    /// Capabilities advertised after successful contact, as `k=v` pairs.
    pub capabilities: HashMap<String, String>,
    /// Transport credentials, absent for the local entry.
    pub db_info: Option<ZoneDbInfo>,
}

impl ZoneInfo {
    fn local(name: ZoneName, capabilities: HashMap<String, String>) -> Self {
        Self {
            name,
            is_me: true,
            is_parent: false,
            last_seen: SystemTime::UNIX_EPOCH,
            capabilities,
            db_info: None,
        }
    }

    fn from_row(row: ZoneRow) -> Self {
        Self {
            name: row.name,
            is_me: false,
            is_parent: row.is_parent,
            last_seen: SystemTime::UNIX_EPOCH,
            capabilities: HashMap::new(),
            db_info: Some(row.db_info),
        }
    }
}

/// Failures reading the external zone store during a refresh.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The underlying zone store could not be read.
    #[error("failed to read zone rows: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Source of truth for known zone rows, implemented by the persistence
/// layer. Kept as a narrow trait so the cache can be exercised against an
/// in-memory fake in tests.
#[async_trait::async_trait]
pub trait ZoneRowSource: Send + Sync {
    /// Reads every currently known zone row.
    async fn list_zone_rows(&self) -> Result<Vec<ZoneRow>, TopologyError>;
}

/// Cache of local/parent/child [`ZoneInfo`], reconciled against a
/// [`ZoneRowSource`] no more often than a configured interval.
pub struct TopologyCache {
    local: ZoneInfo,
    parents: DashMap<ZoneName, ZoneInfo>,
    children: DashMap<ZoneName, ZoneInfo>,
    refresh_interval: Duration,
    last_refresh: Mutex<Option<SystemTime>>,
}

impl TopologyCache {
    /// Creates a cache with the given local zone name and refresh cadence.
    #[must_use]
    pub fn new(local_name: ZoneName, refresh_interval: Duration) -> Self {
        Self {
            local: ZoneInfo::local(local_name, HashMap::new()),
            parents: DashMap::new(),
            children: DashMap::new(),
            refresh_interval,
            last_refresh: Mutex::new(None),
        }
    }

    /// The local agent's own [`ZoneInfo`].
    #[must_use]
    pub fn local(&self) -> ZoneInfo {
        self.local.clone()
    }

    /// All known parent zones.
    #[must_use]
    pub fn parents(&self) -> Vec<ZoneInfo> {
        self.parents.iter().map(|entry| entry.value().clone()).collect()
    }

    /// All known child zones.
    #[must_use]
    pub fn children(&self) -> Vec<ZoneInfo> {
        self.children.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Looks up a parent by name.
    #[must_use]
    pub fn find_parent(&self, name: &ZoneName) -> Option<ZoneInfo> {
        self.parents.get(name).map(|entry| entry.value().clone())
    }

    /// Looks up a child by name.
    #[must_use]
    pub fn find_child(&self, name: &ZoneName) -> Option<ZoneInfo> {
        self.children.get(name).map(|entry| entry.value().clone())
    }

    /// Records capabilities advertised by a neighbour after successful
    /// contact. No-op if the neighbour is unknown.
    pub fn update_capabilities(&self, name: &ZoneName, capabilities: HashMap<String, String>) {
        if let Some(mut entry) = self.parents.get_mut(name) {
            entry.capabilities = capabilities;
            return;
        }
        if let Some(mut entry) = self.children.get_mut(name) {
            entry.capabilities = capabilities;
        }
    }

    /// Reconciles the cache against the store, skipping the read entirely
    /// if the refresh interval has not elapsed since the last attempt.
    pub async fn refresh(
        &self,
        source: &dyn ZoneRowSource,
        now: SystemTime,
    ) -> Result<(), TopologyError> {
        {
            let mut last = self.last_refresh.lock().await;
            if let Some(last_refresh) = *last {
                if now.duration_since(last_refresh).unwrap_or(Duration::ZERO) < self.refresh_interval {
                    trace!("topology refresh skipped, interval not elapsed");
                    return Ok(());
                }
            }
            *last = Some(now);
        }

        let rows = source.list_zone_rows().await?;
        self.reconcile(rows);
        Ok(())
    }

    fn reconcile(&self, rows: Vec<ZoneRow>) {
        let rows_by_name: HashMap<ZoneName, ZoneRow> =
            rows.into_iter().map(|row| (row.name.clone(), row)).collect();

        Self::evict_stale(&self.parents, &rows_by_name, true);
        Self::evict_stale(&self.children, &rows_by_name, false);

        for row in rows_by_name.values() {
            let target = if row.is_parent { &self.parents } else { &self.children };
            match target.get_mut(&row.name) {
                Some(mut existing) => existing.db_info = Some(row.db_info.clone()),
                None => {
                    debug!(zone = %row.name, is_parent = row.is_parent, "discovered new zone");
                    target.insert(row.name.clone(), ZoneInfo::from_row(row.clone()));
                }
            }
        }
    }

    fn evict_stale(
        cache: &DashMap<ZoneName, ZoneInfo>,
        rows_by_name: &HashMap<ZoneName, ZoneRow>,
        is_parent: bool,
    ) {
        let stale: Vec<ZoneName> = cache
            .iter()
            .filter(|entry| {
                rows_by_name
                    .get(entry.key())
                    .is_none_or(|row| row.is_parent != is_parent)
            })
            .map(|entry| entry.key().clone())
            .collect();
        for name in stale {
            debug!(zone = %name, "evicting stale zone entry");
            cache.remove(&name);
        }
    }
}
