//! Reconciliation
//!
//! Capacity admission, entity matching and the pod sync engine.

pub mod admission;
pub mod engine;
pub mod matcher;

pub use admission::{check_over_commit, pod_usage, Headroom, OverCommitViolation, PodUsage};
pub use engine::{CreateOptions, PodReconciler, RemovedMachine, SyncReport};
pub use matcher::BlockDeviceKey;
