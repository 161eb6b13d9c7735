//! Resource lifecycle against an in-memory cluster

use kuadrant_e2e::cluster::ClusterCall;
use kuadrant_e2e::gateway::FactoryOptions;
use kuadrant_e2e::lifecycle::LifecycleOptions;
use kuadrant_e2e::{
    Gvr, HarnessError, Lifecycle, MemoryCluster, Namer, TestResource, Topology, Verdict,
};
use std::sync::Arc;

fn options() -> LifecycleOptions {
    LifecycleOptions {
        backend_image: "quay.io/jsmadis/httpbin:latest".to_string(),
        factory: FactoryOptions {
            wildcard_domain: "*.apps.example.com".to_string(),
            envoy_image: "docker.io/envoyproxy/envoy:v1.27-latest".to_string(),
            ..Default::default()
        },
        system_project: "kuadrant-system".to_string(),
        skip_cleanup: false,
    }
}

fn lifecycle(cluster: &MemoryCluster, kuadrant: Verdict) -> Lifecycle {
    Lifecycle::new(
        Arc::new(cluster.clone()),
        Namer::new("alice", "tests::routes::test_chain"),
        kuadrant,
        options(),
    )
}

fn deletions_of(cluster: &MemoryCluster, kind: &str) -> usize {
    cluster
        .deletions()
        .iter()
        .filter(|(deleted, _)| deleted == kind)
        .count()
}

#[tokio::test]
async fn test_route_failure_still_cleans_up_chain() {
    let cluster = MemoryCluster::new("primary", "kuadrant");
    cluster.fail_apply("HTTPRoute", "admission webhook denied the request");
    let mut ctx = lifecycle(&cluster, Verdict::Proceed);

    let err = ctx.setup().await.err().unwrap();
    assert!(matches!(err, HarnessError::CommitFailure { ref kind, .. } if kind == "HTTPRoute"));
    assert_eq!(ctx.pending().len(), 3);

    let report = ctx.close().await;
    assert!(report.is_clean());
    assert_eq!(report.completed, 3);

    assert_eq!(deletions_of(&cluster, "Gateway"), 1);
    assert_eq!(deletions_of(&cluster, "Deployment"), 1);
    assert_eq!(deletions_of(&cluster, "Service"), 1);
    assert_eq!(deletions_of(&cluster, "Route"), 1);
    assert_eq!(deletions_of(&cluster, "HTTPRoute"), 0);
    assert_eq!(cluster.object_count(), 0);
}

#[tokio::test]
async fn test_cleanup_runs_newest_first() {
    let cluster = MemoryCluster::new("primary", "kuadrant");
    let mut ctx = lifecycle(&cluster, Verdict::Proceed);

    let stack = ctx.setup().await.unwrap();
    let route_name = stack.route.name().to_string();
    let backend_name = stack.backend.name().to_string();
    ctx.close().await;

    let deletions = cluster.deletions();
    assert_eq!(deletions.first(), Some(&("HTTPRoute".to_string(), route_name)));
    assert_eq!(
        deletions.last(),
        Some(&("Deployment".to_string(), backend_name))
    );
}

#[tokio::test]
async fn test_delete_twice_then_close() {
    let cluster = MemoryCluster::new("primary", "kuadrant");
    let mut ctx = lifecycle(&cluster, Verdict::Proceed);

    let gateway = ctx.create_gateway().await.unwrap();
    gateway.delete().await.unwrap();
    gateway.delete().await.unwrap();

    // The scope's finalizer finds it gone and still succeeds
    let report = ctx.close().await;
    assert!(report.is_clean());
    assert!(!cluster.contains(&Gvr::gateway(), gateway.name()));
}

#[tokio::test]
async fn test_recommit_does_not_register_twice() {
    let cluster = MemoryCluster::new("primary", "kuadrant");
    let mut ctx = lifecycle(&cluster, Verdict::Proceed);

    let mut stack = ctx.setup().await.unwrap();
    let pending = ctx.pending().len();

    stack.route.add_hostname("extra.apps.example.com");
    ctx.commit(stack.route.as_mut()).await.unwrap();
    assert_eq!(ctx.pending().len(), pending);

    let stored = cluster
        .object(&Gvr::http_route(), stack.route.name())
        .unwrap();
    assert_eq!(stored["spec"]["hostnames"].as_array().unwrap().len(), 2);
    ctx.close().await;
}

#[tokio::test]
async fn test_standalone_chain_on_envoy() {
    let cluster = MemoryCluster::new("primary", "kuadrant");
    let mut ctx = lifecycle(&cluster, Verdict::Skip("Gateway API is turned off".into()));
    assert_eq!(ctx.topology(), Topology::Standalone);

    let stack = ctx.setup().await.unwrap();
    let config = cluster
        .object(&Gvr::config_map(), stack.gateway.name())
        .unwrap();
    let bootstrap = config["data"]["envoy.yaml"].as_str().unwrap();
    assert!(bootstrap.contains(stack.hostname().unwrap()));
    assert!(bootstrap.contains("external_auth"));

    let report = ctx.close().await;
    assert!(report.is_clean());
    assert_eq!(cluster.object_count(), 0);
}

#[tokio::test]
async fn test_skip_cleanup_leaves_resources() {
    let cluster = MemoryCluster::new("primary", "kuadrant");
    let mut options = options();
    options.skip_cleanup = true;
    let mut ctx = Lifecycle::new(
        Arc::new(cluster.clone()),
        Namer::new("alice", "test_keep"),
        Verdict::Proceed,
        options,
    );

    ctx.create_backend().await.unwrap();
    let report = ctx.close().await;

    assert_eq!(report.skipped, 1);
    assert_eq!(cluster.object_count(), 2);
    assert!(!cluster
        .calls()
        .iter()
        .any(|call| matches!(call, ClusterCall::Delete { .. })));
}
