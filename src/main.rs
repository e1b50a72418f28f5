//! zonefabric daemon entry point
//!
//! Loads configuration, initializes tracing, constructs a [`ZoneAgent`],
//! starts its periodic topology refresh, and serves the HTTP passthrough.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info};
use zonefabric::database::{DatabaseConfig, DatabaseConnection, DatabasePath};
use zonefabric::domain_types::ZoneName;
use zonefabric::fabric::{InMemoryInstances, ReqwestRpcClient, RpcZoneTransport, ZoneAgent, ZoneManagerConfig};
use zonefabric::rest_api::ZonesApiState;
use zonefabric::storage::ZoneRowStore;
use zonefabric::{fabric, server, ZoneError};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("zonefabric=info".parse()?),
        )
        .init();

    info!("starting zonefabric daemon");

    let zone_name = std::env::var("ZONEFABRIC_ZONE_NAME").unwrap_or_else(|_| "root".to_string());
    let zone_name = ZoneName::try_new(zone_name)?;
    let config = match std::env::var("ZONEFABRIC_CONFIG_PATH") {
        Ok(path) => ZoneManagerConfig::load_from_file(path).map_err(ZoneError::from)?,
        Err(_) => ZoneManagerConfig::development(zone_name),
    };
    info!(zone = %config.zone_name, port = config.http_port, "configuration loaded");

    let db_path = config
        .storage_path
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("./zonefabric.db"));
    let db_config = if config.enable_persistence {
        DatabaseConfig::new(DatabasePath::new(db_path)?)
    } else {
        DatabaseConfig::for_testing(DatabasePath::new(db_path)?)
    };
    let connection = DatabaseConnection::initialize(db_config).await.map_err(ZoneError::from)?;
    let store = Arc::new(ZoneRowStore::new(connection));

    let topology = Arc::new(fabric::TopologyCache::new(
        config.zone_name.clone(),
        Duration::from_secs(config.zone_db_check_interval.into_inner()),
    ));
    topology.refresh(store.as_ref(), SystemTime::now()).await?;

    let (inbox_tx, mut inbox_rx) = tokio::sync::mpsc::channel(config.in_flight_capacity.as_usize().min(10_000));
    let transport = Arc::new(RpcZoneTransport::new(ReqwestRpcClient::new(), config.zones_topic.clone()));

    let instances = Arc::new(InMemoryInstances::new());
    let agent = Arc::new(
        ZoneAgent::builder(config.clone(), topology.clone(), transport)
            .with_compute(Arc::new(zonefabric::fabric::InMemoryComputeApi))
            .with_network(Arc::new(zonefabric::fabric::InMemoryNetworkApi::new()))
            .with_volume(Arc::new(zonefabric::fabric::InMemoryVolumeApi::new()))
            .with_instance_loader(instances.clone())
            .with_instance_store(instances)
            .build(),
    );
    info!(zone = %agent.local_name(), "zone agent constructed");

    let inbox_agent = agent.clone();
    tokio::spawn(async move {
        while let Some(envelope) = inbox_rx.recv().await {
            inbox_agent.handle_envelope(envelope).await;
        }
    });

    let refresh_store = store.clone();
    let refresh_topology = topology.clone();
    let refresh_interval = Duration::from_secs(config.zone_db_check_interval.into_inner());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(refresh_interval);
        loop {
            ticker.tick().await;
            if let Err(error) = refresh_topology.refresh(refresh_store.as_ref(), SystemTime::now()).await {
                error!(%error, "topology refresh failed");
            }
        }
    });

    let state = ZonesApiState {
        store,
        topology,
        config: config.clone(),
        inbox: inbox_tx,
    };
    let router = server::create_router(state);
    let listener = TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!(port = config.http_port, "HTTP passthrough listening");
    server::serve(listener, router).await?;

    Ok(())
}
