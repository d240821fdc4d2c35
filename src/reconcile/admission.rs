//! Capacity Admission Controller
//!
//! Compares what a pod's machines already use against what the pod can
//! offer under its over-commit ratios. The check is pure and advisory: it
//! reads the tables and never mutates them.

use crate::error::Result;
use crate::model::{BmcId, PodView};
use crate::store::Tables;
use serde::{Deserialize, Serialize};

// =============================================================================
// Violation
// =============================================================================

/// Remaining headroom of one resource when a request does not fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Headroom {
    /// Over-commit ratio in effect
    pub ratio: f64,
    /// Physical capacity minus current usage; may be negative
    pub available: i64,
}

/// Request that exceeds the over-committed capacity of a pod
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverCommitViolation {
    pub cores: Option<Headroom>,
    pub memory: Option<Headroom>,
}

impl std::fmt::Display for OverCommitViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(cores) = &self.cores {
            write!(
                f,
                "CPU over commit ratio is {:?} and there are {} available resources. ",
                cores.ratio, cores.available
            )?;
        }
        if let Some(memory) = &self.memory {
            write!(
                f,
                "Memory over commit ratio is {:?} and there are {} available resources.",
                memory.ratio, memory.available
            )?;
        }
        Ok(())
    }
}

// =============================================================================
// Usage Queries
// =============================================================================

/// Cores assigned to machines of `pod`
pub fn used_cores(tables: &Tables, pod: BmcId) -> u64 {
    tables
        .machines_of(pod)
        .map(|machine| u64::from(machine.cpu_count))
        .sum()
}

/// Memory (MiB) assigned to machines of `pod`
pub fn used_memory(tables: &Tables, pod: BmcId) -> u64 {
    tables.machines_of(pod).map(|machine| machine.memory).sum()
}

/// Bytes of physical storage assigned to machines of `pod`
pub fn used_local_storage(tables: &Tables, pod: BmcId) -> u64 {
    tables
        .machines_of(pod)
        .flat_map(|machine| tables.block_devices_of(machine.id))
        .filter(|device| device.is_physical())
        .map(|device| device.size)
        .sum()
}

/// Number of physical disks assigned to machines of `pod`
pub fn used_local_disks(tables: &Tables, pod: BmcId) -> u64 {
    tables
        .machines_of(pod)
        .flat_map(|machine| tables.block_devices_of(machine.id))
        .filter(|device| device.is_physical())
        .count() as u64
}

/// Bytes of iSCSI storage assigned to machines of `pod`
pub fn used_iscsi_storage(tables: &Tables, pod: BmcId) -> u64 {
    tables
        .machines_of(pod)
        .flat_map(|machine| tables.block_devices_of(machine.id))
        .filter(|device| device.is_iscsi())
        .map(|device| device.size)
        .sum()
}

/// Capacity summary of a pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodUsage {
    pub cores: u64,
    pub memory: u64,
    pub local_storage: u64,
    pub local_disks: u64,
    pub iscsi_storage: u64,
}

pub fn pod_usage(tables: &Tables, pod: BmcId) -> PodUsage {
    PodUsage {
        cores: used_cores(tables, pod),
        memory: used_memory(tables, pod),
        local_storage: used_local_storage(tables, pod),
        local_disks: used_local_disks(tables, pod),
        iscsi_storage: used_iscsi_storage(tables, pod),
    }
}

// =============================================================================
// Admission Check
// =============================================================================

/// Check that another `cores` and `memory` fit within the over-committed
/// capacity of `pod`.
pub fn check_over_commit(
    tables: &Tables,
    pod: &PodView<'_>,
    cores: u32,
    memory: u64,
) -> std::result::Result<(), OverCommitViolation> {
    let used_cores = used_cores(tables, pod.id);
    let used_memory = used_memory(tables, pod.id);

    let admissible_cores = f64::from(pod.cores) * pod.cpu_over_commit_ratio;
    let admissible_memory = pod.memory as f64 * pod.memory_over_commit_ratio;

    let mut violation = OverCommitViolation {
        cores: None,
        memory: None,
    };
    if admissible_cores - ((used_cores + u64::from(cores)) as f64) < 0.0 {
        violation.cores = Some(Headroom {
            ratio: pod.cpu_over_commit_ratio,
            available: i64::from(pod.cores) - used_cores as i64,
        });
    }
    if admissible_memory - ((used_memory + memory) as f64) < 0.0 {
        violation.memory = Some(Headroom {
            ratio: pod.memory_over_commit_ratio,
            available: pod.memory as i64 - used_memory as i64,
        });
    }

    if violation.cores.is_none() && violation.memory.is_none() {
        Ok(())
    } else {
        Err(violation)
    }
}

/// [`check_over_commit`] for a pod looked up by id, as a crate error
pub fn admit(tables: &Tables, pod: BmcId, cores: u32, memory: u64) -> Result<()> {
    let view = tables.pod(pod)?;
    check_over_commit(tables, &view, cores, memory).map_err(crate::error::Error::OverCommit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PowerParameters;
    use crate::error::Error;
    use crate::model::{Bmc, Machine};
    use assert_matches::assert_matches;

    fn pod_with_usage(cores: u32, memory: u64, used: &[(u32, u64)]) -> (Tables, BmcId) {
        let mut tables = Tables::default();
        let id = tables.new_bmc_id();
        let mut pod = Bmc::new_pod(
            id,
            "pod",
            "virsh",
            PowerParameters::new(),
            None,
            tables.default_pool_id(),
            tables.default_zone_id(),
        );
        pod.cores = cores;
        pod.memory = memory;
        tables.upsert_bmc(pod).unwrap();
        for (idx, (cpu, mem)) in used.iter().enumerate() {
            let node = tables.new_node_id();
            let mut machine = Machine::new(node, format!("node-{}", idx), "amd64/generic");
            machine.bmc_id = Some(id);
            machine.cpu_count = *cpu;
            machine.memory = *mem;
            tables.insert_machine(machine).unwrap();
        }
        (tables, id)
    }

    #[test]
    fn test_request_over_headroom_is_rejected() {
        let (tables, pod) = pod_with_usage(4, 8192, &[(2, 1024)]);

        let err = admit(&tables, pod, 3, 1024).unwrap_err();
        assert_matches!(
            err,
            Error::OverCommit(OverCommitViolation {
                cores: Some(Headroom { available: 2, .. }),
                memory: None,
            })
        );
        assert_eq!(
            err.to_string(),
            "CPU over commit ratio is 1.0 and there are 2 available resources. "
        );

        admit(&tables, pod, 2, 1024).unwrap();
    }

    #[test]
    fn test_both_violations_are_reported() {
        let (tables, pod) = pod_with_usage(10, 4096, &[]);
        let err = admit(&tables, pod, 12, 8192).unwrap_err();
        assert_eq!(
            err.to_string(),
            "CPU over commit ratio is 1.0 and there are 10 available resources. \
             Memory over commit ratio is 1.0 and there are 4096 available resources."
        );
    }

    #[test]
    fn test_over_commit_ratio_raises_ceiling() {
        let (mut tables, pod) = pod_with_usage(4, 1024, &[(4, 1024)]);
        tables
            .pod_mut(pod)
            .unwrap()
            .set_over_commit_ratios(2.0, 2.0)
            .unwrap();
        admit(&tables, pod, 4, 1024).unwrap();

        let err = admit(&tables, pod, 5, 0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "CPU over commit ratio is 2.0 and there are 0 available resources. "
        );
    }

    #[test]
    fn test_usage_queries() {
        let (tables, pod) = pod_with_usage(16, 16384, &[(2, 2048), (4, 1024)]);
        let usage = pod_usage(&tables, pod);
        assert_eq!(usage.cores, 6);
        assert_eq!(usage.memory, 3072);
        assert_eq!(usage.local_disks, 0);
    }
}
