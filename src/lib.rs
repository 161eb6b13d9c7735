//! kuadrant-e2e - capability-aware end-to-end harness for Kuadrant
//!
//! Detects at run time which gateway/authorization/rate-limiting topology a
//! cluster runs (the integrated Kuadrant control plane, standalone Authorino
//! and Limitador, or a multi-cluster hub with spokes), decides per test
//! whether to run, skip or fail, and provisions test resources of the matching
//! family with guaranteed cleanup.
//!
//! # Example
//!
//! ```ignore
//! use kuadrant_e2e::TestResource;
//!
//! #[kuadrant_e2e::test(kuadrant_only)]
//! async fn test_route_serves_backend(ctx: Lifecycle) {
//!     let stack = ctx.setup().await.unwrap();
//!     let client = stack.hostname.client().unwrap();
//!     let response = client.get("/get").await.unwrap();
//!     assert_eq!(response.status(), 200);
//! }
//! ```
//!
//! Resources created through the [`Lifecycle`] are deleted in reverse order
//! when the test ends, including when it panics or the run is interrupted.
//!
//! # Configuration
//!
//! [`Harness::shared`] reads `KUADRANT_E2E_*` environment variables, see
//! [`Settings::from_lookup`]. Logging honours `RUST_LOG`.

pub mod capability;
pub mod cluster;
pub mod config;
pub mod decision;
pub mod environment;
pub mod error;
pub mod gateway;
pub mod harness;
pub mod kuadrant;
pub mod lifecycle;
pub mod naming;
pub mod probe;
pub mod registry;
pub mod resource;
pub mod shutdown;
pub mod telemetry;

// Re-export commonly used types
pub use capability::{Capability, CapabilityReport};
pub use cluster::{ClusterError, ClusterHandle, Gvr, KubeCluster, MemoryCluster};
pub use config::{ClusterTarget, ConfigError, Settings};
pub use decision::{decide, Requirement, RunMode, Verdict};
pub use environment::Environment;
pub use error::HarnessError;
pub use gateway::{select_gateway_factory, Gateway, GatewayFactory, GatewayRoute, Topology};
pub use harness::Harness;
pub use kuadrant::KuadrantCr;
pub use lifecycle::{Lifecycle, Stack};
pub use naming::Namer;
pub use probe::{ProbeTargets, Prober};
pub use registry::CapabilityRegistry;
pub use resource::{Backend, CleanupReport, ExposedHostname, Scope, TestResource};

// Re-export the test macro
pub use kuadrant_e2e_macros::test;

#[doc(hidden)]
pub mod __private {
    pub use futures::FutureExt;
}
