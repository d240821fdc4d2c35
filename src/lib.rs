//! Pod Control Plane
//!
//! Reconciles pods (hosts that compose machines on demand, such as virsh
//! hypervisors or RSD racks) and their BMCs with a relational store.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    REST API  ·  /metrics  ·  /healthz              │
//! ├───────────────────────────────────────────────────────────────────┤
//! │                         Pod Orchestrator                           │
//! │   create / refresh    compose / decompose    delete workflow       │
//! ├──────────────────────────────┬────────────────────────────────────┤
//! │     Reconcile engine         │          Rack RPC                   │
//! │  (matcher, admission, sync)  │  (client registry, pod drivers)     │
//! ├──────────────────────────────┴────────────────────────────────────┤
//! │        Transactional store (BMCs, machines, devices, racks)        │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: orchestrator, delete workflow, REST API and backends
//! - [`reconcile`]: pod sync engine and over-commit admission
//! - [`store`]: transactional tables
//! - [`model`]: persisted entities
//! - [`power`]: power driver schemas and parameter scoping
//! - [`rpc`]: rack controller connections and pod driver calls
//! - [`domain`]: ports and discovery types
//! - [`error`]: error types and handling

pub mod controlplane;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod model;
pub mod power;
pub mod reconcile;
pub mod rpc;
pub mod store;

// Re-export commonly used types
pub use controlplane::{
    ApiServer, ApiServerConfig, BackendConfig, BackendFactory, ComposeOptions, ComposeRequest,
    ControlPlaneMetrics, FleetEvent, OrchestratorConfig, OrchestratorStatus, PodOrchestrator,
    PodRequest, PodSummary, PodUpdate,
};

pub use domain::ports::{
    ClientResolver, CommissioningScheduler, DiscoveredMachine, DiscoveredPod, DiscoveredPodHints,
    PowerParameters, RackClient, RemoteError,
};

pub use error::{Error, ErrorCategory, Result};

pub use model::{Bmc, BmcId, CreationType, Machine, NodeId, NodeStatus, RackController};

pub use reconcile::{PodReconciler, SyncReport};

pub use store::{Store, Tables};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
