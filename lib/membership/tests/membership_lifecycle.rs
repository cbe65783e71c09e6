// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end membership lifecycle against the in-memory coordination backend.

use std::sync::Arc;
use std::time::Duration;

use ares_membership::config::{ClusterConfig, SchemaSyncConfig};
use ares_membership::coordination::{MemoryCoordinator, NodeAcl};
use ares_membership::instance::{instances_path, StaticHostResolver};
use ares_membership::schema::{Column, MemorySchemaSource, MemorySchemaStore, Table};
use ares_membership::{ErrorKind, Instance, MembershipConfig, MembershipError, MembershipManager};

const SYNC_INTERVAL: Duration = Duration::from_secs(5);

fn config(cluster: &str, instance: &str, port: u16) -> MembershipConfig {
    MembershipConfig {
        port,
        cluster: ClusterConfig {
            cluster_name: cluster.to_string(),
            instance_name: instance.to_string(),
        },
        schema_sync: SchemaSyncConfig {
            interval_secs: SYNC_INTERVAL.as_secs(),
        },
        ..Default::default()
    }
}

fn manager(
    config: MembershipConfig,
    host: &str,
    coordinator: &MemoryCoordinator,
    source: &MemorySchemaSource,
    store: &MemorySchemaStore,
) -> MembershipManager {
    MembershipManager::builder()
        .config(config)
        .connector(Arc::new(coordinator.clone()))
        .schema_source(Arc::new(source.clone()))
        .schema_store(Arc::new(store.clone()))
        .host_resolver(Arc::new(StaticHostResolver::new(host)))
        .build()
        .unwrap()
}

fn table(name: &str) -> Table {
    Table::new(
        name,
        vec![Column::new("id", "UUID"), Column::new("city_id", "Uint16")],
        vec![0],
    )
}

#[tokio::test]
async fn test_presence_node_end_to_end() {
    let coordinator = MemoryCoordinator::new();
    let source = MemorySchemaSource::new();
    let store = MemorySchemaStore::new();
    let mut manager = manager(config("c1", "n1", 8080), "h1", &coordinator, &source, &store);

    manager.connect().await.unwrap();

    let payload = coordinator
        .get("/ares_controller/c1/instances/n1")
        .expect("presence node exists");
    assert_eq!(payload, br#"{"Name":"n1","Host":"h1","Port":8080}"#.to_vec());
    assert_eq!(
        Instance::from_bytes(&payload).unwrap(),
        Instance::new("n1", "h1", 8080)
    );
    assert_eq!(
        coordinator.node_acl("/ares_controller/c1/instances/n1"),
        Some(NodeAcl::Open)
    );
    assert_eq!(coordinator.last_endpoints(), vec!["http://localhost:2379"]);

    manager.disconnect().await;
    assert!(coordinator.children(&instances_path("c1")).is_empty());
}

#[tokio::test]
async fn test_empty_instance_name_end_to_end() {
    let coordinator = MemoryCoordinator::new();
    let source = MemorySchemaSource::new();
    let store = MemorySchemaStore::new();
    let mut manager = manager(config("c1", "", 8080), "h1", &coordinator, &source, &store);

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, MembershipError::InvalidInstanceName));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(coordinator.children(&instances_path("c1")).is_empty());
    assert_eq!(coordinator.connect_attempts(), 0);
}

#[tokio::test]
async fn test_schema_applied_before_connect_returns() {
    let coordinator = MemoryCoordinator::new();
    let source = MemorySchemaSource::new();
    let store = MemorySchemaStore::new();
    source.set_tables("c1", vec![table("trips"), table("drivers")]);
    let mut manager = manager(config("c1", "n1", 8080), "h1", &coordinator, &source, &store);

    manager.connect().await.unwrap();
    assert_eq!(store.table_names(), vec!["drivers", "trips"]);
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_failure_does_not_start_loop() {
    let coordinator = MemoryCoordinator::new();
    let source = MemorySchemaSource::new();
    let store = MemorySchemaStore::new();
    source.set_unavailable(true);
    let mut manager = manager(config("c1", "n1", 8080), "h1", &coordinator, &source, &store);

    let err = manager.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaSync);
    assert!(!manager.is_connected());

    let fetches = source.hash_fetches();
    tokio::time::sleep(SYNC_INTERVAL * 4).await;
    assert_eq!(source.hash_fetches(), fetches);

    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_background_sync_survives_failures() {
    let coordinator = MemoryCoordinator::new();
    let source = MemorySchemaSource::new();
    let store = MemorySchemaStore::new();
    source.set_tables("c1", vec![table("trips")]);
    let mut manager = manager(config("c1", "n1", 8080), "h1", &coordinator, &source, &store);
    manager.connect().await.unwrap();
    assert_eq!(source.hash_fetches(), 1);

    source.set_unavailable(true);
    tokio::time::sleep(SYNC_INTERVAL * 2 + Duration::from_millis(100)).await;
    assert_eq!(source.hash_fetches(), 3);

    source.set_unavailable(false);
    source.set_tables("c1", vec![table("trips"), table("drivers")]);
    tokio::time::sleep(SYNC_INTERVAL).await;
    assert_eq!(store.table_names(), vec!["drivers", "trips"]);

    manager.disconnect().await;
    let fetches = source.hash_fetches();
    tokio::time::sleep(SYNC_INTERVAL * 3).await;
    assert_eq!(source.hash_fetches(), fetches);
}

#[tokio::test(start_paused = true)]
async fn test_zero_sync_interval_is_rejected_before_joining() {
    let coordinator = MemoryCoordinator::new();
    let source = MemorySchemaSource::new();
    let store = MemorySchemaStore::new();
    let mut config = config("c1", "n1", 8080);
    config.schema_sync.interval_secs = 0;
    let mut manager = manager(config, "h1", &coordinator, &source, &store);

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, MembershipError::InvalidConfig(_)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!manager.is_connected());
    assert_eq!(coordinator.connect_attempts(), 0);
    assert!(coordinator.children(&instances_path("c1")).is_empty());
}

#[tokio::test]
async fn test_duplicate_instance_name_is_rejected() {
    let coordinator = MemoryCoordinator::new();
    let source = MemorySchemaSource::new();
    let first_store = MemorySchemaStore::new();
    let second_store = MemorySchemaStore::new();

    let mut first = manager(config("c1", "n1", 8080), "h1", &coordinator, &source, &first_store);
    let mut second = manager(config("c1", "n1", 8081), "h2", &coordinator, &source, &second_store);

    first.connect().await.unwrap();
    let err = second.connect().await.unwrap_err();
    assert!(
        matches!(&err, MembershipError::NodeExists { path } if path == "/ares_controller/c1/instances/n1")
    );
    assert!(!err.is_retryable());

    // the original owner's record is untouched
    let payload = coordinator.get("/ares_controller/c1/instances/n1").unwrap();
    assert_eq!(Instance::from_bytes(&payload).unwrap().host, "h1");

    second.disconnect().await;
    first.disconnect().await;
    assert_eq!(coordinator.live_sessions(), 0);
}

#[tokio::test]
async fn test_instances_of_a_cluster_are_enumerable() {
    let coordinator = MemoryCoordinator::new();
    let source = MemorySchemaSource::new();
    let store = MemorySchemaStore::new();

    let mut n1 = manager(config("c1", "n1", 8080), "h1", &coordinator, &source, &store);
    let mut n2 = manager(config("c1", "n2", 8080), "h2", &coordinator, &source, &store);
    let mut other = manager(config("c2", "n1", 8080), "h3", &coordinator, &source, &store);
    n1.connect().await.unwrap();
    n2.connect().await.unwrap();
    other.connect().await.unwrap();

    let mut live = coordinator.children(&instances_path("c1"));
    live.sort();
    assert_eq!(live, vec!["n1", "n2"]);

    n1.disconnect().await;
    assert_eq!(coordinator.children(&instances_path("c1")), vec!["n2"]);

    n2.disconnect().await;
    other.disconnect().await;
}

#[tokio::test]
async fn test_unreachable_coordination_service() {
    let coordinator = MemoryCoordinator::new();
    coordinator.refuse_connections(true);
    let source = MemorySchemaSource::new();
    let store = MemorySchemaStore::new();
    let mut manager = manager(config("c1", "n1", 8080), "h1", &coordinator, &source, &store);

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, MembershipError::Connect(_)));
    assert_eq!(err.kind(), ErrorKind::Coordination);
    assert_eq!(source.hash_fetches(), 0);

    manager.disconnect().await;
}
