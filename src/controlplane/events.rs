//! Fleet Events
//!
//! Events emitted by the orchestrator for external consumers to react to
//! pod and machine lifecycle changes.

use crate::model::{BmcId, NodeId};
use serde::{Deserialize, Serialize};

/// Events emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FleetEvent {
    /// A pod was discovered and registered
    PodCreated { pod_id: BmcId, name: String },

    /// A pod was synced with a discovery snapshot
    PodSynced {
        pod_id: BmcId,
        created: usize,
        updated: usize,
        removed: usize,
    },

    /// A pod and its machines were deleted
    PodDeleted { pod_id: BmcId, name: String },

    /// Discovery found a machine that was not known yet
    MachineDiscovered {
        pod_id: BmcId,
        node_id: NodeId,
        hostname: String,
    },

    /// A machine was composed on a pod
    MachineComposed {
        pod_id: BmcId,
        node_id: NodeId,
        hostname: String,
    },

    /// A machine was removed, either by sync or by deletion
    MachineRemoved {
        pod_id: Option<BmcId>,
        node_id: NodeId,
        hostname: String,
    },

    /// A machine changed owning pod
    MachineMoved { pod_id: BmcId, node_id: NodeId },
}

impl FleetEvent {
    /// Get the pod ID associated with this event
    pub fn pod_id(&self) -> Option<BmcId> {
        match self {
            FleetEvent::PodCreated { pod_id, .. }
            | FleetEvent::PodSynced { pod_id, .. }
            | FleetEvent::PodDeleted { pod_id, .. }
            | FleetEvent::MachineDiscovered { pod_id, .. }
            | FleetEvent::MachineComposed { pod_id, .. }
            | FleetEvent::MachineMoved { pod_id, .. } => Some(*pod_id),
            FleetEvent::MachineRemoved { pod_id, .. } => *pod_id,
        }
    }

    /// Get the machine ID if this is a machine event
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            FleetEvent::MachineDiscovered { node_id, .. }
            | FleetEvent::MachineComposed { node_id, .. }
            | FleetEvent::MachineRemoved { node_id, .. }
            | FleetEvent::MachineMoved { node_id, .. } => Some(*node_id),
            _ => None,
        }
    }

    /// Check if this is a pod-level event
    pub fn is_pod_event(&self) -> bool {
        matches!(
            self,
            FleetEvent::PodCreated { .. }
                | FleetEvent::PodSynced { .. }
                | FleetEvent::PodDeleted { .. }
        )
    }
}
