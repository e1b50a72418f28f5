//! HTTP server wiring
//!
//! Binds and serves the thin `/zones` passthrough defined in
//! [`crate::rest_api`]. Mirrors the teacher's own server module: a router
//! builder, a bind step, and a serve step kept separate so tests can bind to
//! an ephemeral port without starting the whole process.

use std::net::SocketAddr;

use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::rest_api::{zones_router, ZonesApiState};

/// Builds the full application router: a root landing route, a health
/// check, and the `/zones` resource.
pub fn create_router(state: ZonesApiState) -> Router {
    Router::new()
        .route("/", get(|| async { Html("zonefabric") }))
        .route("/health", get(|| async { "OK" }))
        .merge(zones_router(state))
}

/// Binds a listener on the configured HTTP port.
///
/// # Errors
/// Returns an error if the port cannot be bound.
pub async fn bind(port: u16) -> std::io::Result<(TcpListener, SocketAddr)> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Binds on any available port, for tests.
///
/// # Errors
/// Returns an error if no port can be bound.
pub async fn bind_on_available_port() -> std::io::Result<(TcpListener, SocketAddr)> {
    bind(0).await
}

/// Serves `router` on `listener` until the process is terminated.
///
/// # Errors
/// Returns an error if the server fails while running.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(listener, router).await
}

/// Serves `router` on `listener`, shutting down gracefully when
/// `shutdown_token` is cancelled.
///
/// # Errors
/// Returns an error if the server fails while running.
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    router: Router,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    let shutdown_signal = async move {
        shutdown_token.cancelled().await;
    };
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseConfig, DatabaseConnection, DatabasePath};
    use crate::domain_types::ZoneName;
    use crate::fabric::{TopologyCache, ZoneManagerConfig};
    use crate::storage::ZoneRowStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn test_state() -> ZonesApiState {
        let dir = tempdir().unwrap();
        let path = DatabasePath::new(dir.path().join("zones.db")).unwrap();
        let connection = DatabaseConnection::initialize(DatabaseConfig::for_testing(path)).await.unwrap();
        std::mem::forget(dir);

        let (inbox, _rx) = tokio::sync::mpsc::channel(8);
        ZonesApiState {
            store: Arc::new(ZoneRowStore::new(connection)),
            topology: Arc::new(TopologyCache::new(ZoneName::try_new("me".to_string()).unwrap(), Duration::from_secs(60))),
            config: ZoneManagerConfig::testing(ZoneName::try_new("me".to_string()).unwrap()),
            inbox,
        }
    }

    #[tokio::test]
    async fn server_responds_on_health_and_root() {
        let (listener, addr) = bind_on_available_port().await.unwrap();
        let router = create_router(test_state().await);
        let handle = tokio::spawn(async move { serve(listener, router).await });

        tokio::time::sleep(Duration::from_millis(20)).await;

        let client = reqwest::Client::new();
        let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
        assert!(health.status().is_success());
        assert_eq!(health.text().await.unwrap(), "OK");

        let root = client.get(format!("http://{addr}/")).send().await.unwrap();
        assert!(root.status().is_success());

        handle.abort();
    }

    #[tokio::test]
    async fn server_serves_zones_info() {
        let (listener, addr) = bind_on_available_port().await.unwrap();
        let router = create_router(test_state().await);
        let handle = tokio::spawn(async move { serve(listener, router).await });

        tokio::time::sleep(Duration::from_millis(20)).await;

        let client = reqwest::Client::new();
        let response = client.get(format!("http://{addr}/zones/info")).send().await.unwrap();
        assert!(response.status().is_success());

        handle.abort();
    }
}
