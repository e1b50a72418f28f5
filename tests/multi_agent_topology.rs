//! Multi-agent integration tests: small trees wired together over
//! [`InMemoryTransport`], exercising routed calls, broadcasts, service-API
//! dispatch and instance absorption the way a real deployment's agents
//! would see them, without any real network hop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use zonefabric::domain_types::{Direction, MaxBroadcastHopCount, ZoneName};
use zonefabric::fabric::topology::{TopologyError, ZoneDbInfo, ZoneRow, ZoneRowSource};
use zonefabric::fabric::{
    AgentError, Envelope, InMemoryComputeApi, InMemoryInstances, InMemoryNetworkApi, InMemoryVolumeApi,
    InstanceLoader, LocalMethod, MethodInfo, RoundRobinScheduler, ScheduleRunInstanceArgs, TopologyCache, ZoneAgent,
    ZoneManagerConfig,
};

fn zone(name: &str) -> ZoneName {
    ZoneName::try_new(name.to_string()).unwrap()
}

fn blank_db_info() -> ZoneDbInfo {
    ZoneDbInfo {
        weight_scale: 1.0,
        weight_offset: 0.0,
        username: String::new(),
        password: String::new(),
        host: String::new(),
        port: 0,
        virtual_host: String::new(),
    }
}

struct FixedRows(Vec<ZoneRow>);

#[async_trait]
impl ZoneRowSource for FixedRows {
    async fn list_zone_rows(&self) -> Result<Vec<ZoneRow>, TopologyError> {
        Ok(self.0.clone())
    }
}

fn row(name: &str, is_parent: bool) -> ZoneRow {
    ZoneRow {
        name: zone(name),
        is_parent,
        db_info: blank_db_info(),
    }
}

struct FailingMethod;

#[async_trait]
impl LocalMethod for FailingMethod {
    async fn call(&self, _args: serde_json::Value) -> Result<serde_json::Value, AgentError> {
        Err(AgentError::UnknownMethod("exception in grandchild".to_string()))
    }
}

#[tokio::test]
async fn zone_call_reaches_grandchild_and_returns_its_result() {
    let transport = Arc::new(zonefabric::fabric::InMemoryTransport::new());

    let me_topology = Arc::new(TopologyCache::new(zone("me"), Duration::from_secs(3600)));
    let zone2_topology = Arc::new(TopologyCache::new(zone("zone2"), Duration::from_secs(3600)));
    let grandchild_topology = Arc::new(TopologyCache::new(zone("grandchild"), Duration::from_secs(3600)));

    me_topology
        .refresh(&FixedRows(vec![row("zone2", false)]), std::time::SystemTime::now())
        .await
        .unwrap();
    zone2_topology
        .refresh(
            &FixedRows(vec![row("me", true), row("grandchild", false)]),
            std::time::SystemTime::now(),
        )
        .await
        .unwrap();
    grandchild_topology
        .refresh(&FixedRows(vec![row("zone2", true)]), std::time::SystemTime::now())
        .await
        .unwrap();

    let me_agent = Arc::new(
        ZoneAgent::builder(ZoneManagerConfig::testing(zone("me")), me_topology, transport.clone()).build(),
    );
    let zone2_agent = Arc::new(
        ZoneAgent::builder(ZoneManagerConfig::testing(zone("zone2")), zone2_topology, transport.clone()).build(),
    );
    let grandchild_agent = Arc::new(
        ZoneAgent::builder(
            ZoneManagerConfig::testing(zone("grandchild")),
            grandchild_topology,
            transport.clone(),
        )
        .build(),
    );
    grandchild_agent.register_method(
        "test_method",
        Arc::new(ReturningMethod(json!("test_method_expected_result"))),
    );

    for (name, agent) in [("me", me_agent.clone()), ("zone2", zone2_agent.clone()), ("grandchild", grandchild_agent.clone())] {
        let (tx, mut rx) = mpsc::channel::<Envelope>(32);
        transport.register(zone(name), tx);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                agent.handle_envelope(envelope).await;
            }
        });
    }

    let message =
        zonefabric::fabric::Message::new("test_method", &json!({"kwarg1": 10, "kwarg2": 20})).unwrap();
    let result = me_agent
        .zone_call(zone("me.zone2.grandchild"), Direction::Down, message)
        .await
        .unwrap();

    assert_eq!(result, json!("test_method_expected_result"));
}

struct ReturningMethod(serde_json::Value);

#[async_trait]
impl LocalMethod for ReturningMethod {
    async fn call(&self, _args: serde_json::Value) -> Result<serde_json::Value, AgentError> {
        Ok(self.0.clone())
    }
}

/// Shared scaffolding for the remaining scenarios: a `me` / `zone2` /
/// `grandchild` tree with both non-root agents reachable over one
/// transport, returned as agents plus the transport so callers can thread
/// destinations through it.
struct Tree {
    transport: Arc<zonefabric::fabric::InMemoryTransport>,
    me: Arc<ZoneAgent>,
    zone2: Arc<ZoneAgent>,
    grandchild: Arc<ZoneAgent>,
}

async fn build_tree(max_hops: MaxBroadcastHopCount) -> Tree {
    let transport = Arc::new(zonefabric::fabric::InMemoryTransport::new());

    let me_topology = Arc::new(TopologyCache::new(zone("me"), Duration::from_secs(3600)));
    let zone2_topology = Arc::new(TopologyCache::new(zone("zone2"), Duration::from_secs(3600)));
    let grandchild_topology = Arc::new(TopologyCache::new(zone("grandchild"), Duration::from_secs(3600)));

    me_topology
        .refresh(&FixedRows(vec![row("zone2", false)]), std::time::SystemTime::now())
        .await
        .unwrap();
    zone2_topology
        .refresh(
            &FixedRows(vec![row("me", true), row("grandchild", false)]),
            std::time::SystemTime::now(),
        )
        .await
        .unwrap();
    grandchild_topology
        .refresh(&FixedRows(vec![row("zone2", true)]), std::time::SystemTime::now())
        .await
        .unwrap();

    let me_config = ZoneManagerConfig::builder("me")
        .zone_max_broadcast_hop_count(max_hops)
        .build()
        .unwrap();
    let zone2_config = ZoneManagerConfig::builder("zone2")
        .zone_max_broadcast_hop_count(max_hops)
        .build()
        .unwrap();
    let grandchild_config = ZoneManagerConfig::builder("grandchild")
        .zone_max_broadcast_hop_count(max_hops)
        .build()
        .unwrap();

    let me = Arc::new(ZoneAgent::builder(me_config, me_topology, transport.clone()).build());
    let zone2 = Arc::new(ZoneAgent::builder(zone2_config, zone2_topology, transport.clone()).build());
    let grandchild = Arc::new(ZoneAgent::builder(grandchild_config, grandchild_topology, transport.clone()).build());

    for (name, agent) in [("me", me.clone()), ("zone2", zone2.clone()), ("grandchild", grandchild.clone())] {
        let (tx, mut rx) = mpsc::channel::<Envelope>(32);
        transport.register(zone(name), tx);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                agent.handle_envelope(envelope).await;
            }
        });
    }

    Tree { transport, me, zone2, grandchild }
}

#[tokio::test]
async fn remote_failure_surfaces_as_remote_error_with_original_message() {
    let tree = build_tree(MaxBroadcastHopCount::try_new(10).unwrap()).await;
    tree.grandchild.register_method("test_method", Arc::new(FailingMethod));

    let message = zonefabric::fabric::Message::new("test_method", &json!({})).unwrap();
    let result = tree
        .me
        .zone_call(zone("me.zone2.grandchild"), Direction::Down, message)
        .await;

    match result {
        Err(AgentError::Remote { message, .. }) => {
            assert!(message.contains("exception in grandchild"));
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
    let _ = tree.transport;
}

#[tokio::test]
async fn broadcast_down_reaches_every_level_exactly_once() {
    let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    struct CountingMethod(Arc<std::sync::atomic::AtomicUsize>);
    #[async_trait]
    impl LocalMethod for CountingMethod {
        async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, AgentError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(args)
        }
    }

    let tree = build_tree(MaxBroadcastHopCount::try_new(10).unwrap()).await;
    for agent in [&tree.me, &tree.zone2, &tree.grandchild] {
        agent.register_method("test_method", Arc::new(CountingMethod(counter.clone())));
    }

    let message = zonefabric::fabric::Message::new("test_method", &json!({"kwarg1": 10, "kwarg2": 20})).unwrap();
    tree.me.broadcast_down(message).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test]
async fn broadcast_down_stops_at_the_configured_hop_limit() {
    let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    struct CountingMethod(Arc<std::sync::atomic::AtomicUsize>);
    #[async_trait]
    impl LocalMethod for CountingMethod {
        async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, AgentError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(args)
        }
    }

    // hop count starts at 0 and increments once per forward; a limit of 1
    // lets `me` (hop 0) and `zone2` (the forwarded hop, now at 1) execute,
    // but the message entering `grandchild` would be hop 2 and is dropped.
    let tree = build_tree(MaxBroadcastHopCount::try_new(1).unwrap()).await;
    for agent in [&tree.me, &tree.zone2, &tree.grandchild] {
        agent.register_method("test_method", Arc::new(CountingMethod(counter.clone())));
    }

    let message = zonefabric::fabric::Message::new("test_method", &json!({})).unwrap();
    tree.me.broadcast_down(message).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn instance_update_broadcast_up_is_absorbed_only_at_the_root() {
    let tree = build_tree(MaxBroadcastHopCount::try_new(10).unwrap()).await;

    let instances = Arc::new(InMemoryInstances::new());
    // rebuild the root with an attached instance store, since `build_tree`
    // does not wire one by default
    let root_topology = Arc::new(TopologyCache::new(zone("me"), Duration::from_secs(3600)));
    root_topology
        .refresh(&FixedRows(vec![row("zone2", false)]), std::time::SystemTime::now())
        .await
        .unwrap();
    let root_with_store = Arc::new(
        ZoneAgent::builder(ZoneManagerConfig::testing(zone("me")), root_topology, tree.transport.clone())
            .with_instance_store(instances.clone())
            .build(),
    );
    let (tx, mut rx) = mpsc::channel::<Envelope>(32);
    tree.transport.register(zone("me"), tx);
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            root_with_store.handle_envelope(envelope).await;
        }
    });

    let mut fields = serde_json::Map::new();
    fields.insert("task_state".to_string(), json!("spawning"));
    let instance = zonefabric::fabric::InstanceRecord {
        uuid: zonefabric::domain_types::InstanceUuid::try_new("u-1".to_string()).unwrap(),
        fields,
        cache: None,
    };

    tree.grandchild.instance_update(&instance).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let loaded = instances
        .load_instance(&zonefabric::domain_types::InstanceUuid::try_new("u-1".to_string()).unwrap())
        .await
        .expect("instance should have been absorbed at the root");
    assert_eq!(loaded.fields["zone_name"], json!("me.zone2.grandchild"));
}

#[tokio::test]
async fn service_api_dispatch_reboots_an_instance_on_a_child_zone() {
    let transport = Arc::new(zonefabric::fabric::InMemoryTransport::new());

    let me_topology = Arc::new(TopologyCache::new(zone("me"), Duration::from_secs(3600)));
    let zone2_topology = Arc::new(TopologyCache::new(zone("zone2"), Duration::from_secs(3600)));
    me_topology
        .refresh(&FixedRows(vec![row("zone2", false)]), std::time::SystemTime::now())
        .await
        .unwrap();
    zone2_topology
        .refresh(&FixedRows(vec![row("me", true)]), std::time::SystemTime::now())
        .await
        .unwrap();

    let me_agent = Arc::new(ZoneAgent::builder(ZoneManagerConfig::testing(zone("me")), me_topology, transport.clone()).build());

    let instances = Arc::new(InMemoryInstances::new());
    let mut fields = serde_json::Map::new();
    fields.insert("uuid".to_string(), json!("i-1"));
    instances.insert(zonefabric::fabric::InstanceRecord {
        uuid: zonefabric::domain_types::InstanceUuid::try_new("i-1".to_string()).unwrap(),
        fields,
        cache: None,
    });
    let zone2_agent = Arc::new(
        ZoneAgent::builder(ZoneManagerConfig::testing(zone("zone2")), zone2_topology, transport.clone())
            .with_compute(Arc::new(InMemoryComputeApi))
            .with_network(Arc::new(InMemoryNetworkApi::new()))
            .with_volume(Arc::new(InMemoryVolumeApi::new()))
            .with_instance_loader(instances.clone())
            .build(),
    );

    for (name, agent) in [("me", me_agent.clone()), ("zone2", zone2_agent.clone())] {
        let (tx, mut rx) = mpsc::channel::<Envelope>(32);
        transport.register(zone(name), tx);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                agent.handle_envelope(envelope).await;
            }
        });
    }

    let result = me_agent
        .call_service_api_method(
            zone("me.zone2"),
            Direction::Down,
            zonefabric::domain_types::ServiceName::Compute,
            MethodInfo {
                method: "reboot".to_string(),
                method_args: vec![json!("i-1")],
                method_kwargs: serde_json::Map::new(),
            },
        )
        .await
        .unwrap();

    assert_eq!(result["task_state"], json!("rebooting"));
}

#[tokio::test]
async fn schedule_run_instance_forwards_to_a_child_and_creates_there() {
    let transport = Arc::new(zonefabric::fabric::InMemoryTransport::new());

    let root_topology = Arc::new(TopologyCache::new(zone("me"), Duration::from_secs(3600)));
    let child_topology = Arc::new(TopologyCache::new(zone("child"), Duration::from_secs(3600)));
    root_topology
        .refresh(&FixedRows(vec![row("child", false)]), std::time::SystemTime::now())
        .await
        .unwrap();
    child_topology
        .refresh(&FixedRows(vec![row("me", true)]), std::time::SystemTime::now())
        .await
        .unwrap();

    let root_agent = Arc::new(
        ZoneAgent::builder(ZoneManagerConfig::testing(zone("me")), root_topology, transport.clone())
            .with_scheduler(Arc::new(RoundRobinScheduler::new()))
            .build(),
    );
    let child_agent = Arc::new(
        ZoneAgent::builder(ZoneManagerConfig::testing(zone("child")), child_topology, transport.clone())
            .with_scheduler(Arc::new(RoundRobinScheduler::new()))
            .build(),
    );

    for (name, agent) in [("me", root_agent.clone()), ("child", child_agent.clone())] {
        let (tx, mut rx) = mpsc::channel::<Envelope>(32);
        transport.register(zone(name), tx);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                agent.handle_envelope(envelope).await;
            }
        });
    }

    let args = ScheduleRunInstanceArgs {
        request_spec: json!({"flavor": "tiny"}),
        filter_properties: json!({}),
    };
    let result = root_agent.schedule_run_instance(args).await.unwrap();
    assert_eq!(result, json!({"scheduled_in": "child"}));
}

#[tokio::test]
async fn call_to_an_unreachable_zone_is_a_routing_error() {
    let transport = Arc::new(zonefabric::fabric::InMemoryTransport::new());
    let topology = Arc::new(TopologyCache::new(zone("me"), Duration::from_secs(3600)));
    let agent = Arc::new(ZoneAgent::builder(ZoneManagerConfig::testing(zone("me")), topology, transport).build());

    let message = zonefabric::fabric::Message::new("test_method", &json!({})).unwrap();
    let result = agent.zone_call(zone("nowhere"), Direction::Down, message).await;
    assert!(matches!(result, Err(AgentError::Routing(_))));
}
