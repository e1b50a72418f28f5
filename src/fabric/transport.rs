//! Transport driver: fire-and-forget delivery of an envelope to one neighbour
//!
//! The fabric is transport-agnostic; anything satisfying [`ZoneTransport`]
//! can carry envelopes between agents. [`RpcZoneTransport`] derives its
//! per-neighbour connection descriptor from the neighbour's [`ZoneDbInfo`]
//! and hands the publish off to an injected [`RpcClient`]; [`ReqwestRpcClient`]
//! is the real, over-the-wire implementation, and an in-process driver is
//! provided for tests that wire multiple agents together without a real
//! network.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain_types::ZoneName;
use crate::fabric::envelope::Envelope;
use crate::fabric::topology::ZoneInfo;

/// Failure delivering an envelope to a single neighbour.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport's underlying client rejected the publish.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// No route to the named neighbour is registered with this transport.
    #[error("no connection registered for zone {0}")]
    UnknownZone(ZoneName),
}

/// Connection descriptor derived from a neighbour's transport credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    /// Username for the remote broker connection.
    pub username: String,
    /// Password for the remote broker connection.
    pub password: String,
    /// Remote broker host.
    pub host: String,
    /// Remote broker port.
    pub port: u16,
    /// Remote broker virtual host.
    pub virtual_host: String,
}

impl ConnectionDescriptor {
    /// Projects the five transport-relevant fields out of a neighbour's
    /// [`ZoneInfo`].
    ///
    /// # Errors
    /// Returns an error if the neighbour has no transport credentials
    /// (i.e. is the local zone).
    pub fn from_zone_info(zone: &ZoneInfo) -> Result<Self, TransportError> {
        let db_info = zone
            .db_info
            .as_ref()
            .ok_or_else(|| TransportError::UnknownZone(zone.name.clone()))?;
        Ok(Self {
            username: db_info.username.clone(),
            password: db_info.password.clone(),
            host: db_info.host.clone(),
            port: db_info.port,
            virtual_host: db_info.virtual_host.clone(),
        })
    }
}

/// Fire-and-forget delivery of an already-formed envelope to one neighbour.
///
/// Implementations return once the transport has accepted the envelope for
/// delivery, not once the remote agent has processed it.
#[async_trait]
pub trait ZoneTransport: Send + Sync {
    /// Sends `envelope` to a single neighbour.
    async fn send(&self, to: &ZoneInfo, envelope: &Envelope) -> Result<(), TransportError>;

    /// Sends `envelope` using the transport's fanout primitive where one
    /// exists. Defaults to [`ZoneTransport::send`] for transports with no
    /// distinct fanout mode.
    async fn fanout_send(&self, to: &ZoneInfo, envelope: &Envelope) -> Result<(), TransportError> {
        self.send(to, envelope).await
    }
}

/// A minimal RPC publishing client, abstracted so the transport does not
/// depend on any particular broker library.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Publishes `payload` on `topic` against the connection described by
    /// `descriptor`.
    async fn publish(
        &self,
        descriptor: &ConnectionDescriptor,
        topic: &str,
        payload: &Envelope,
    ) -> Result<(), TransportError>;
}

/// Transport driver that publishes envelopes through an injected
/// [`RpcClient`] on a well-known topic, deriving connection parameters from
/// each neighbour's persisted credentials.
pub struct RpcZoneTransport<C: RpcClient> {
    client: C,
    topic: String,
}

impl<C: RpcClient> RpcZoneTransport<C> {
    /// Builds a transport publishing on `topic` via `client`.
    pub fn new(client: C, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl<C: RpcClient> ZoneTransport for RpcZoneTransport<C> {
    async fn send(&self, to: &ZoneInfo, envelope: &Envelope) -> Result<(), TransportError> {
        let descriptor = ConnectionDescriptor::from_zone_info(to)?;
        self.client.publish(&descriptor, &self.topic, envelope).await
    }
}

/// Encodes a virtual host for use as a URL path segment, following the
/// RabbitMQ management API convention of encoding the default vhost `/` as
/// the literal segment `%2F`.
fn encode_virtual_host(virtual_host: &str) -> String {
    if virtual_host.is_empty() || virtual_host == "/" {
        "%2F".to_string()
    } else {
        virtual_host.trim_matches('/').to_string()
    }
}

/// [`RpcClient`] backed by `reqwest`: posts each envelope as JSON to a
/// neighbour's inbound fabric endpoint at
/// `http://{host}:{port}/zones/fabric/{virtual_host}/{topic}`, the receiving
/// side of which is `rest_api::receive_envelope`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestRpcClient {
    client: reqwest::Client,
}

impl ReqwestRpcClient {
    /// Builds a client using `reqwest`'s default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RpcClient for ReqwestRpcClient {
    async fn publish(
        &self,
        descriptor: &ConnectionDescriptor,
        topic: &str,
        payload: &Envelope,
    ) -> Result<(), TransportError> {
        let vhost = encode_virtual_host(&descriptor.virtual_host);
        let url = format!("http://{}:{}/zones/fabric/{vhost}/{topic}", descriptor.host, descriptor.port);

        let mut request = self.client.post(&url).json(payload);
        if !descriptor.username.is_empty() {
            request = request.basic_auth(&descriptor.username, Some(&descriptor.password));
        }

        let response = request.send().await.map_err(|e| TransportError::PublishFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::PublishFailed(format!("neighbour responded with {}", response.status())));
        }

        Ok(())
    }
}

/// In-process transport for tests: routes envelopes directly into the
/// bounded inbox of whichever agent the destination name is registered to,
/// with no serialization or real network hop.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inboxes: Arc<DashMap<ZoneName, mpsc::Sender<Envelope>>>,
}

impl InMemoryTransport {
    /// Creates an empty transport with no registered inboxes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the inbox a zone's messages should be delivered to.
    pub fn register(&self, zone: ZoneName, sender: mpsc::Sender<Envelope>) {
        self.inboxes.insert(zone, sender);
    }
}

#[async_trait]
impl ZoneTransport for InMemoryTransport {
    async fn send(&self, to: &ZoneInfo, envelope: &Envelope) -> Result<(), TransportError> {
        let sender = self
            .inboxes
            .get(&to.name)
            .ok_or_else(|| TransportError::UnknownZone(to.name.clone()))?
            .clone();
        sender
            .send(envelope.clone())
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }
}

/// Delivers `envelope` to every neighbour in `targets`, logging and
/// continuing past individual failures rather than aborting the whole
/// fan-out. Used by the broadcaster (C5), which must not let one
/// unreachable neighbour block delivery to the rest.
pub async fn deliver_to_all(
    transport: &dyn ZoneTransport,
    targets: &[ZoneInfo],
    envelope: &Envelope,
    fanout: bool,
) {
    let sends = targets.iter().map(|target| async move {
        let result = if fanout {
            transport.fanout_send(target, envelope).await
        } else {
            transport.send(target, envelope).await
        };
        (target.name.clone(), result)
    });

    let results: Vec<(ZoneName, Result<(), TransportError>)> =
        futures::future::join_all(sends).await;

    let _errors: HashMap<ZoneName, TransportError> = results
        .into_iter()
        .filter_map(|(name, result)| match result {
            Ok(()) => None,
            Err(e) => {
                warn!(zone = %name, error = %e, "transport delivery failed");
                Some((name, e))
            }
        })
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::envelope::{routing_envelope, Message};
    use crate::domain_types::Direction;
    use std::time::SystemTime;

    fn zone_info(name: &str) -> ZoneInfo {
        ZoneInfo {
            name: ZoneName::try_new(name.to_string()).unwrap(),
            is_me: false,
            is_parent: false,
            last_seen: SystemTime::UNIX_EPOCH,
            capabilities: HashMap::new(),
            db_info: None,
        }
    }

    #[tokio::test]
    async fn in_memory_transport_delivers_to_registered_inbox() {
        let transport = InMemoryTransport::new();
        let (tx, mut rx) = mpsc::channel(4);
        transport.register(ZoneName::try_new("a.b".to_string()).unwrap(), tx);

        let envelope = routing_envelope(
            ZoneName::try_new("a.b".to_string()).unwrap(),
            Direction::Down,
            Message::new("ping", &serde_json::json!({})).unwrap(),
            None,
            false,
            None,
        );
        transport.send(&zone_info("a.b"), &envelope).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, envelope);
    }

    #[tokio::test]
    async fn in_memory_transport_errors_on_unknown_zone() {
        let transport = InMemoryTransport::new();
        let envelope = routing_envelope(
            ZoneName::try_new("a.b".to_string()).unwrap(),
            Direction::Down,
            Message::new("ping", &serde_json::json!({})).unwrap(),
            None,
            false,
            None,
        );
        let result = transport.send(&zone_info("a.b"), &envelope).await;
        assert!(result.is_err());
    }

    #[test]
    fn encode_virtual_host_maps_default_vhost_to_percent_2f() {
        assert_eq!(encode_virtual_host("/"), "%2F");
        assert_eq!(encode_virtual_host(""), "%2F");
    }

    #[test]
    fn encode_virtual_host_strips_slashes_from_named_vhosts() {
        assert_eq!(encode_virtual_host("/staging/"), "staging");
    }

    #[derive(Default)]
    struct Received(std::sync::Mutex<Vec<Envelope>>);

    async fn receive(
        axum::extract::State(received): axum::extract::State<Arc<Received>>,
        axum::extract::Path((vhost, topic)): axum::extract::Path<(String, String)>,
        axum::Json(envelope): axum::Json<Envelope>,
    ) -> axum::http::StatusCode {
        assert_eq!(vhost, "%2F");
        assert_eq!(topic, "zones");
        received.0.lock().unwrap().push(envelope);
        axum::http::StatusCode::ACCEPTED
    }

    #[tokio::test]
    async fn reqwest_rpc_client_delivers_envelope_to_the_fabric_endpoint() {
        use axum::routing::post;

        let received = Arc::new(Received::default());
        let app = axum::Router::new().route("/zones/fabric/{vhost}/{topic}", post(receive)).with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let descriptor = ConnectionDescriptor {
            username: String::new(),
            password: String::new(),
            host: addr.ip().to_string(),
            port: addr.port(),
            virtual_host: "/".to_string(),
        };
        let envelope = routing_envelope(
            ZoneName::try_new("a.b".to_string()).unwrap(),
            Direction::Down,
            Message::new("ping", &serde_json::json!({})).unwrap(),
            None,
            false,
            None,
        );

        let client = ReqwestRpcClient::new();
        client.publish(&descriptor, "zones", &envelope).await.unwrap();

        assert_eq!(received.0.lock().unwrap().as_slice(), [envelope]);
    }

    #[tokio::test]
    async fn deliver_to_all_continues_past_individual_failures() {
        let transport = InMemoryTransport::new();
        let (tx, mut rx) = mpsc::channel(4);
        transport.register(ZoneName::try_new("known".to_string()).unwrap(), tx);

        let envelope = routing_envelope(
            ZoneName::try_new("known".to_string()).unwrap(),
            Direction::Down,
            Message::new("ping", &serde_json::json!({})).unwrap(),
            None,
            false,
            None,
        );

        deliver_to_all(
            &transport,
            &[zone_info("known"), zone_info("unknown")],
            &envelope,
            false,
        )
        .await;

        assert!(rx.recv().await.is_some());
    }
}
