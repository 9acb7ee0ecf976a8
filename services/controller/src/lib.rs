//! Farm controller library
//!
//! Drives the nodes of a small server farm through deploy and undeploy of
//! a service facade, and coordinates them for failover scenarios. Every
//! step is confirmed by observing the nodes, never assumed from the
//! success of a request.
//!
//! ## Architecture
//!
//! ```text
//! ClusterOrchestrator
//! ├── ClusterView                 (role -> NodeController)
//! │   └── NodeController(role)    (lifecycle, in-flight lock, state watch)
//! │       ├── ArtifactDeployer    (deploy / undeploy requests)
//! │       └── StatusProbe         (GET {url}/state)
//! ├── ClientRegistry              (per-node client cache, weak handles)
//! │   └── ClientFactory
//! └── ManagementApi               (container specs per server template)
//! ```
//!
//! All waiting goes through `farm_poll::ReadinessPoller`.
//!
//! ## Modules
//!
//! - `node`: per-node lifecycle state machine
//! - `registry`: client cache and handle invalidation
//! - `orchestrator`: multi-node lifecycle, synchronization and reset
//! - `deployer`, `probe`, `management`, `client`: collaborators and their HTTP implementations
//! - `mock`: in-memory farm implementing every collaborator

pub mod client;
pub mod config;
pub mod deployer;
pub mod error;
pub mod management;
pub mod node;
pub mod orchestrator;
pub mod probe;
pub mod registry;
pub mod topology;
pub mod view;

// Exposed for integration tests
pub mod mock;

// Re-export commonly used types
pub use client::{ClientFactory, HttpClientFactory, ServiceClient};
pub use config::HarnessConfig;
pub use error::{HarnessError, Operation};
pub use mock::MockFarm;
pub use node::{NodeController, NodeSnapshot, NodeState};
pub use orchestrator::{ClusterOrchestrator, OrchestratorSettings, ResetReport, SyncReport};
pub use registry::{ClientHandle, ClientRegistry};
pub use topology::{ArtifactRef, NodeSpec};
pub use view::ClusterView;
