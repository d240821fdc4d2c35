//! Pod Control Plane
//!
//! The orchestrator and everything it coordinates: compose validation, the
//! pod delete workflow, BMC routability, commissioning, fleet events and
//! metrics, plus the REST API and the simulated rack backend.

pub mod api;
pub mod backends;
pub mod commissioning;
pub mod compose;
pub mod delete;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod routability;

pub use api::*;
pub use backends::*;
pub use commissioning::StoreCommissioning;
pub use compose::{parse_storage, ComposeRequest, ValidatedCompose};
pub use delete::{DeletePhase, DeletePodWorkflow, DeletedPod};
pub use events::FleetEvent;
pub use metrics::ControlPlaneMetrics;
pub use orchestrator::*;
