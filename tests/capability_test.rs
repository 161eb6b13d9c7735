//! Capability detection and run/skip/fail decisions against in-memory clusters

use kuadrant_e2e::capability::KUADRANT_CONFIGURED;
use kuadrant_e2e::probe::GATEWAY_API_OFF;
use kuadrant_e2e::{
    decide, Capability, CapabilityRegistry, ClusterHandle, Gvr, MemoryCluster, ProbeTargets,
    Prober, Requirement, RunMode, Verdict,
};
use serde_json::json;
use std::sync::Arc;

fn spoke(name: &str, with_kuadrant: bool) -> Arc<dyn ClusterHandle> {
    let cluster = MemoryCluster::new(name, "kuadrant");
    if with_kuadrant {
        cluster.view("kuadrant-system").insert(
            &Gvr::kuadrant(),
            json!({"metadata": {"name": "kuadrant-sample"}}),
        );
    }
    Arc::new(cluster)
}

fn disconnected(name: &str) -> Arc<dyn ClusterHandle> {
    let cluster = MemoryCluster::new(name, "kuadrant");
    cluster.set_connected(false);
    Arc::new(cluster)
}

fn registry(targets: ProbeTargets) -> CapabilityRegistry {
    CapabilityRegistry::new(Prober::new(targets))
}

#[tokio::test]
async fn test_gateway_api_off() {
    let registry = registry(
        ProbeTargets::new("kuadrant-system")
            .gateway_api(false)
            .spoke("east", spoke("east", true)),
    );

    assert_eq!(
        registry.has_kuadrant().await,
        (false, GATEWAY_API_OFF.to_string())
    );
}

#[tokio::test]
async fn test_disconnected_spoke() {
    let registry = registry(ProbeTargets::new("kuadrant-system").spoke("east", disconnected("east")));

    assert_eq!(
        registry.has_kuadrant().await,
        (false, "Spoke east is not connected".to_string())
    );
}

#[tokio::test]
async fn test_spoke_without_kuadrant_resource() {
    let registry = registry(
        ProbeTargets::new("kuadrant-system")
            .spoke("east", spoke("east", true))
            .spoke("west", spoke("west", false)),
    );

    assert_eq!(
        registry.has_kuadrant().await,
        (
            false,
            "Spoke west does not have Kuadrant resource in project kuadrant-system".to_string()
        )
    );
}

#[tokio::test]
async fn test_reason_priority() {
    // Gateway API switch beats a disconnected spoke, which beats a missing resource
    let all = ProbeTargets::new("kuadrant-system")
        .gateway_api(false)
        .spoke("a-down", disconnected("a-down"))
        .spoke("b-empty", spoke("b-empty", false));
    assert_eq!(registry(all).has_kuadrant().await.1, GATEWAY_API_OFF);

    let connectivity_and_missing = ProbeTargets::new("kuadrant-system")
        .spoke("a-empty", spoke("a-empty", false))
        .spoke("b-down", disconnected("b-down"));
    assert_eq!(
        registry(connectivity_and_missing).has_kuadrant().await.1,
        "Spoke b-down is not connected"
    );
}

#[tokio::test]
async fn test_strict_mode_upgrades_skip() {
    let registry = registry(ProbeTargets::new("kuadrant-system").gateway_api(false));
    let report = registry.report().await;

    assert_eq!(
        decide(report, Requirement::Kuadrant, RunMode::strict()),
        Verdict::Fail(GATEWAY_API_OFF.to_string())
    );
    assert_eq!(
        decide(report, Requirement::Kuadrant, RunMode::default()),
        Verdict::Skip(GATEWAY_API_OFF.to_string())
    );
}

#[tokio::test]
async fn test_partition_and_mutual_exclusion() {
    let with_kuadrant = registry(ProbeTargets::new("kuadrant-system").spoke("east", spoke("east", true)));
    let without = registry(ProbeTargets::new("kuadrant-system").gateway_api(false));

    for registry in [&with_kuadrant, &without] {
        let report = registry.report().await;
        for capability in Capability::ALL {
            assert_ne!(
                report.available().contains(&capability),
                report.missing().contains_key(&capability),
                "{capability:?} must be in exactly one collection"
            );
        }
    }

    assert!(with_kuadrant.has_kuadrant().await.0);
    assert_eq!(
        with_kuadrant.is_standalone().await,
        (false, KUADRANT_CONFIGURED.to_string())
    );

    assert!(!without.has_kuadrant().await.0);
    assert_eq!(without.is_standalone().await, (true, String::new()));
}

#[tokio::test]
async fn test_concurrent_first_access_probes_once() {
    let east = MemoryCluster::new("east", "kuadrant");
    east.view("kuadrant-system").insert(
        &Gvr::kuadrant(),
        json!({"metadata": {"name": "kuadrant-sample"}}),
    );
    let registry = registry(ProbeTargets::new("kuadrant-system").spoke("east", Arc::new(east.clone())));

    let (a, b, c) = tokio::join!(
        registry.has_kuadrant(),
        registry.is_standalone(),
        registry.has_mgc()
    );
    assert!(a.0);
    assert!(!b.0);
    assert!(!c.0);

    let lists = east
        .calls()
        .iter()
        .filter(|call| matches!(call, kuadrant_e2e::cluster::ClusterCall::List { .. }))
        .count();
    assert_eq!(lists, 1);
}
