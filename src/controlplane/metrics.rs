//! Control Plane Metrics
//!
//! Prometheus counters owned by one orchestrator. Each instance carries its
//! own registry so several orchestrators (and tests) never collide.

use crate::error::{Error, Result};
use crate::reconcile::SyncReport;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Outcome label values
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";

/// Metrics of the pod control plane
#[derive(Clone)]
pub struct ControlPlaneMetrics {
    registry: Registry,
    pub pod_syncs: IntCounterVec,
    pub machines_created: IntCounter,
    pub machines_removed: IntCounter,
    pub compose_attempts: IntCounterVec,
    pub decompose_calls: IntCounterVec,
    pub pods_deleted: IntCounter,
}

fn register<C>(registry: &Registry, collector: C) -> Result<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| Error::Internal(format!("failed to register metric: {}", e)))?;
    Ok(collector)
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|e| Error::Internal(format!("invalid metric {}: {}", name, e)))
}

fn counter(name: &str, help: &str) -> Result<IntCounter> {
    IntCounter::new(name, help)
        .map_err(|e| Error::Internal(format!("invalid metric {}: {}", name, e)))
}

impl ControlPlaneMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            pod_syncs: register(
                &registry,
                counter_vec(
                    "pod_control_plane_pod_syncs_total",
                    "Pod discovery syncs by outcome",
                    &["outcome"],
                )?,
            )?,
            machines_created: register(
                &registry,
                counter(
                    "pod_control_plane_machines_created_total",
                    "Machines enlisted by discovery or compose",
                )?,
            )?,
            machines_removed: register(
                &registry,
                counter(
                    "pod_control_plane_machines_removed_total",
                    "Machines deleted by sync or delete workflows",
                )?,
            )?,
            compose_attempts: register(
                &registry,
                counter_vec(
                    "pod_control_plane_compose_attempts_total",
                    "Compose attempts by outcome",
                    &["outcome"],
                )?,
            )?,
            decompose_calls: register(
                &registry,
                counter_vec(
                    "pod_control_plane_decompose_calls_total",
                    "Decompose calls issued to pod drivers by outcome",
                    &["outcome"],
                )?,
            )?,
            pods_deleted: register(
                &registry,
                counter(
                    "pod_control_plane_pods_deleted_total",
                    "Pods removed by the delete workflow",
                )?,
            )?,
            registry,
        })
    }

    /// Record a committed sync
    pub fn record_sync(&self, report: &SyncReport) {
        self.pod_syncs.with_label_values(&[OUTCOME_SUCCESS]).inc();
        self.machines_created.inc_by(report.created.len() as u64);
        self.machines_removed.inc_by(report.removed.len() as u64);
    }

    pub fn record_sync_failure(&self) {
        self.pod_syncs.with_label_values(&[OUTCOME_FAILURE]).inc();
    }

    pub fn record_compose(&self, success: bool) {
        let outcome = if success { OUTCOME_SUCCESS } else { OUTCOME_FAILURE };
        self.compose_attempts.with_label_values(&[outcome]).inc();
        if success {
            self.machines_created.inc();
        }
    }

    pub fn record_decompose(&self, success: bool) {
        let outcome = if success { OUTCOME_SUCCESS } else { OUTCOME_FAILURE };
        self.decompose_calls.with_label_values(&[outcome]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every metric
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    #[test]
    fn test_record_and_encode() {
        let metrics = ControlPlaneMetrics::new().unwrap();
        let report = SyncReport {
            created: vec![NodeId(1), NodeId(2)],
            ..SyncReport::default()
        };
        metrics.record_sync(&report);
        metrics.record_compose(true);
        metrics.record_decompose(false);

        assert_eq!(metrics.machines_created.get(), 3);
        assert_eq!(
            metrics.decompose_calls.with_label_values(&[OUTCOME_FAILURE]).get(),
            1
        );
        let text = metrics.encode().unwrap();
        assert!(text.contains("pod_control_plane_pod_syncs_total{outcome=\"success\"} 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let first = ControlPlaneMetrics::new().unwrap();
        let second = ControlPlaneMetrics::new().unwrap();
        first.pods_deleted.inc();
        assert_eq!(second.pods_deleted.get(), 0);
    }
}
