//! "zones" HTTP resource (§6 External Interfaces)
//!
//! Thin pass-throughs over the persisted zone rows and the local agent's
//! [`ZoneInfo`]: list / show / create / update / delete of rows, plus an
//! `info` aggregate endpoint. No routing or broadcast logic lives here —
//! the fabric never writes its own rows, only this surface does.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain_types::ZoneName;
use crate::fabric::topology::{TopologyCache, ZoneDbInfo, ZoneRow};
use crate::fabric::{Envelope, ZoneManagerConfig};
use crate::storage::{StorageError, ZoneRowStore};

/// Shared state the zones resource reads and writes through.
#[derive(Clone)]
pub struct ZonesApiState {
    /// Persisted neighbour rows.
    pub store: Arc<ZoneRowStore>,
    /// The local agent's topology, for the `info` aggregate endpoint.
    pub topology: Arc<TopologyCache>,
    /// Configuration backing the `info` endpoint's capability list and the
    /// inbound fabric endpoint's vhost/topic validation.
    pub config: ZoneManagerConfig,
    /// Channel the local [`crate::fabric::ZoneAgent`]'s inbox loop drains,
    /// fed by envelopes arriving over the inbound fabric endpoint.
    pub inbox: mpsc::Sender<Envelope>,
}

/// Wire shape of a zone row, the JSON body accepted and returned by this
/// resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRowPayload {
    name: String,
    is_parent: bool,
    weight_scale: f64,
    weight_offset: f64,
    username: String,
    password: String,
    host: String,
    port: u16,
    virtual_host: String,
}

impl From<ZoneRow> for ZoneRowPayload {
    fn from(row: ZoneRow) -> Self {
        Self {
            name: row.name.into_inner(),
            is_parent: row.is_parent,
            weight_scale: row.db_info.weight_scale,
            weight_offset: row.db_info.weight_offset,
            username: row.db_info.username,
            password: row.db_info.password,
            host: row.db_info.host,
            port: row.db_info.port,
            virtual_host: row.db_info.virtual_host,
        }
    }
}

impl TryFrom<ZoneRowPayload> for ZoneRow {
    type Error = crate::domain_types::ZoneNameError;

    fn try_from(payload: ZoneRowPayload) -> Result<Self, Self::Error> {
        Ok(Self {
            name: ZoneName::try_new(payload.name)?,
            is_parent: payload.is_parent,
            db_info: ZoneDbInfo {
                weight_scale: payload.weight_scale,
                weight_offset: payload.weight_offset,
                username: payload.username,
                password: payload.password,
                host: payload.host,
                port: payload.port,
                virtual_host: payload.virtual_host,
            },
        })
    }
}

/// Aggregate view of the local zone returned by `GET /zones/info`.
#[derive(Debug, Serialize)]
struct ZoneInfoPayload {
    name: String,
    #[serde(rename = "type")]
    zone_type: &'static str,
    capabilities: std::collections::HashMap<String, String>,
}

fn storage_error_response(error: StorageError) -> Response {
    let status = match error {
        StorageError::NotFound => StatusCode::NOT_FOUND,
        StorageError::Configuration { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string()).into_response()
}

async fn list_zones(State(state): State<ZonesApiState>) -> Response {
    match state.store.list().await {
        Ok(rows) => Json(rows.into_iter().map(ZoneRowPayload::from).collect::<Vec<_>>()).into_response(),
        Err(error) => storage_error_response(error),
    }
}

async fn show_zone(State(state): State<ZonesApiState>, Path(name): Path<String>) -> Response {
    let Ok(name) = ZoneName::try_new(name) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match state.store.get(&name).await {
        Ok(row) => Json(ZoneRowPayload::from(row)).into_response(),
        Err(error) => storage_error_response(error),
    }
}

async fn create_zone(State(state): State<ZonesApiState>, Json(payload): Json<ZoneRowPayload>) -> Response {
    let Ok(row) = ZoneRow::try_from(payload) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match state.store.upsert(&row).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(error) => storage_error_response(error),
    }
}

async fn update_zone(
    State(state): State<ZonesApiState>,
    Path(name): Path<String>,
    Json(payload): Json<ZoneRowPayload>,
) -> Response {
    let Ok(row) = ZoneRow::try_from(payload) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if row.name.as_ref() != name {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match state.store.upsert(&row).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => storage_error_response(error),
    }
}

async fn delete_zone(State(state): State<ZonesApiState>, Path(name): Path<String>) -> Response {
    let Ok(name) = ZoneName::try_new(name) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match state.store.delete(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => storage_error_response(error),
    }
}

/// Decodes a vhost URL segment, reversing the RabbitMQ-style encoding
/// [`crate::fabric::RpcZoneTransport`]'s `ReqwestRpcClient` applies before
/// sending.
fn decode_virtual_host(segment: &str) -> String {
    if segment == "%2F" {
        "/".to_string()
    } else {
        segment.to_string()
    }
}

/// Receives an envelope posted by a neighbour's [`crate::fabric::RpcZoneTransport`],
/// the inbound side of the real inter-process transport. Rejects envelopes
/// addressed to a vhost or topic this agent doesn't recognize, and forwards
/// everything else into the local agent's inbox for `handle_envelope` to
/// process.
async fn receive_envelope(
    State(state): State<ZonesApiState>,
    Path((vhost, topic)): Path<(String, String)>,
    Json(envelope): Json<Envelope>,
) -> Response {
    if decode_virtual_host(&vhost) != state.config.virtual_host || topic != state.config.zones_topic {
        return StatusCode::NOT_FOUND.into_response();
    }

    match state.inbox.send(envelope).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn zone_info(State(state): State<ZonesApiState>) -> Response {
    let local = state.topology.local();
    Json(ZoneInfoPayload {
        name: local.name.into_inner(),
        zone_type: "self",
        capabilities: state.config.capabilities_map(),
    })
    .into_response()
}

/// Builds the `/zones` router: list/show/create/update/delete of persisted
/// rows plus the `info` aggregate endpoint.
pub fn zones_router(state: ZonesApiState) -> Router {
    Router::new()
        .route("/zones", get(list_zones).post(create_zone))
        .route("/zones/info", get(zone_info))
        .route("/zones/fabric/{vhost}/{topic}", post(receive_envelope))
        .route("/zones/{name}", get(show_zone).put(update_zone).delete(delete_zone))
        .with_state(state)
}
