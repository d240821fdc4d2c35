//! Machines
//!
//! A machine is a compute node enlisted in the fleet, either discovered
//! behind a pod or composed on request.

use super::{BmcId, InterfaceId, NodeId, PoolId, ZoneId};
use crate::domain::ports::{PowerParameters, PowerState};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

// =============================================================================
// Hostname Validation
// =============================================================================

fn hostname_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(?i)[a-z][a-z0-9-]+$").ok())
        .as_ref()
}

/// Whether `hostname` is acceptable as a machine hostname
pub fn is_valid_hostname(hostname: &str) -> bool {
    hostname_pattern().map_or(false, |pattern| pattern.is_match(hostname))
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle status of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    New,
    Commissioning,
    FailedCommissioning,
    Ready,
    Allocated,
    Deploying,
    Deployed,
    FailedDeployment,
    Releasing,
    FailedReleasing,
    EnteringRescueMode,
    RescueMode,
    ExitingRescueMode,
    FailedRescue,
    Broken,
}

impl NodeStatus {
    /// Whether the lifecycle allows moving from `self` to `target`
    pub fn can_transition_to(&self, target: NodeStatus) -> bool {
        use NodeStatus::*;
        if target == Broken {
            return true;
        }
        matches!(
            (self, target),
            (New, Commissioning)
                | (New, Ready)
                | (Commissioning, Ready)
                | (Commissioning, FailedCommissioning)
                | (FailedCommissioning, Commissioning)
                | (Ready, Commissioning)
                | (Ready, Allocated)
                | (Allocated, Deploying)
                | (Allocated, Ready)
                | (Deploying, Deployed)
                | (Deploying, FailedDeployment)
                | (FailedDeployment, Releasing)
                | (Deployed, Releasing)
                | (Deployed, EnteringRescueMode)
                | (Releasing, Ready)
                | (Releasing, FailedReleasing)
                | (FailedReleasing, Releasing)
                | (EnteringRescueMode, RescueMode)
                | (EnteringRescueMode, FailedRescue)
                | (RescueMode, ExitingRescueMode)
                | (ExitingRescueMode, Deployed)
                | (ExitingRescueMode, FailedRescue)
                | (FailedRescue, EnteringRescueMode)
                | (Broken, Ready)
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeStatus::New => "New",
            NodeStatus::Commissioning => "Commissioning",
            NodeStatus::FailedCommissioning => "Failed commissioning",
            NodeStatus::Ready => "Ready",
            NodeStatus::Allocated => "Allocated",
            NodeStatus::Deploying => "Deploying",
            NodeStatus::Deployed => "Deployed",
            NodeStatus::FailedDeployment => "Failed deployment",
            NodeStatus::Releasing => "Releasing",
            NodeStatus::FailedReleasing => "Failed releasing",
            NodeStatus::EnteringRescueMode => "Entering rescue mode",
            NodeStatus::RescueMode => "Rescue mode",
            NodeStatus::ExitingRescueMode => "Exiting rescue mode",
            NodeStatus::FailedRescue => "Failed rescue",
            NodeStatus::Broken => "Broken",
        };
        write!(f, "{}", name)
    }
}

/// How a machine came to exist behind its pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationType {
    /// Existed in the pod before the pod was added
    PreExisting,
    /// Composed automatically to satisfy an allocation
    Dynamic,
    /// Composed explicitly by a user
    Manual,
}

impl CreationType {
    /// Whether sync may overwrite hardware details of such a machine
    pub fn hardware_is_synced(&self) -> bool {
        matches!(self, CreationType::Dynamic)
    }
}

// =============================================================================
// Machine
// =============================================================================

/// Persisted machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: NodeId,
    pub hostname: String,
    pub architecture: String,
    pub status: NodeStatus,
    pub cpu_count: u32,
    /// MHz
    pub cpu_speed: u32,
    /// MiB
    pub memory: u64,
    pub creation_type: CreationType,
    /// Owning pod or BMC
    pub bmc_id: Option<BmcId>,
    pub pool_id: Option<PoolId>,
    pub zone_id: Option<ZoneId>,
    pub tags: BTreeSet<String>,
    pub power_state: PowerState,
    /// Node-scoped power parameters
    pub instance_power_parameters: PowerParameters,
    pub boot_interface_id: Option<InterfaceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Machine {
    /// New machine record with empty hardware details
    pub fn new(id: NodeId, hostname: impl Into<String>, architecture: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            hostname: hostname.into(),
            architecture: architecture.into(),
            status: NodeStatus::New,
            cpu_count: 0,
            cpu_speed: 0,
            memory: 0,
            creation_type: CreationType::PreExisting,
            bmc_id: None,
            pool_id: None,
            zone_id: None,
            tags: BTreeSet::new(),
            power_state: PowerState::Unknown,
            instance_power_parameters: PowerParameters::new(),
            boot_interface_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the machine through its lifecycle
    pub fn transition(&mut self, target: NodeStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(Error::field(
                "status",
                format!(
                    "Unable to move {} from {} to {}.",
                    self.hostname, self.status, target
                ),
            ));
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_pattern() {
        assert!(is_valid_hostname("node-01"));
        assert!(is_valid_hostname("Compute"));
        assert!(!is_valid_hostname("1node"));
        assert!(!is_valid_hostname("a"));
        assert!(!is_valid_hostname("node_01"));
        assert!(!is_valid_hostname("node.maas"));
        assert!(!is_valid_hostname(""));
    }

    #[test]
    fn test_status_transitions() {
        let mut machine = Machine::new(NodeId(1), "node", "amd64/generic");
        machine.transition(NodeStatus::Commissioning).unwrap();
        machine.transition(NodeStatus::Ready).unwrap();
        assert!(machine.transition(NodeStatus::Deployed).is_err());
        assert_eq!(machine.status, NodeStatus::Ready);
        machine.transition(NodeStatus::Broken).unwrap();
    }

    #[test]
    fn test_creation_type_sync_policy() {
        assert!(CreationType::Dynamic.hardware_is_synced());
        assert!(!CreationType::Manual.hardware_is_synced());
        assert!(!CreationType::PreExisting.hardware_is_synced());
    }
}
