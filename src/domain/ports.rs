//! Domain Ports - Core trait definitions for the pod control plane
//!
//! These traits define the boundaries between the reconciliation core and
//! the rack agents that actually talk to pod drivers. Adapters implement
//! these traits to provide concrete functionality.

use crate::error::Result;
use crate::model::Machine;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Driver-specific power parameters (`power_address`, `power_id`, ...)
pub type PowerParameters = BTreeMap<String, String>;

// =============================================================================
// Pod Capabilities
// =============================================================================

/// Capabilities a pod driver may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Machines can be composed on request
    Composable,
    /// Local storage is carved out per machine
    DynamicLocalStorage,
    /// Local disks are fixed physical devices
    FixedLocalStorage,
    /// Machines can receive iSCSI-backed disks
    IscsiStorage,
    /// Resources may be allocated beyond physical capacity
    OverCommit,
    /// The pod exposes named storage pools
    StoragePools,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Composable => write!(f, "composable"),
            Capability::DynamicLocalStorage => write!(f, "dynamic_local_storage"),
            Capability::FixedLocalStorage => write!(f, "fixed_local_storage"),
            Capability::IscsiStorage => write!(f, "iscsi_storage"),
            Capability::OverCommit => write!(f, "over_commit"),
            Capability::StoragePools => write!(f, "storage_pools"),
        }
    }
}

/// Power state reported by a driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    #[default]
    Unknown,
    Error,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Unknown => write!(f, "unknown"),
            PowerState::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Discovery Types
// =============================================================================

/// Type of a discovered block device.
///
/// Unrecognised values are kept verbatim so reconciliation can reject them
/// with the offending name instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlockDeviceType {
    #[default]
    Physical,
    Iscsi,
    Other(String),
}

impl From<String> for BlockDeviceType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "physical" => BlockDeviceType::Physical,
            "iscsi" => BlockDeviceType::Iscsi,
            _ => BlockDeviceType::Other(value),
        }
    }
}

impl From<BlockDeviceType> for String {
    fn from(value: BlockDeviceType) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for BlockDeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockDeviceType::Physical => write!(f, "physical"),
            BlockDeviceType::Iscsi => write!(f, "iscsi"),
            BlockDeviceType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Spare capacity of a pod as last reported by its driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPodHints {
    pub cores: u32,
    /// MHz
    pub cpu_speed: u32,
    /// MiB
    pub memory: u64,
    /// Bytes
    pub local_storage: u64,
    /// -1 when the driver does not report it
    #[serde(default = "unknown_count")]
    pub local_disks: i64,
    /// -1 when the driver does not report it
    #[serde(default = "unknown_count")]
    pub iscsi_storage: i64,
}

impl Default for DiscoveredPodHints {
    fn default() -> Self {
        Self {
            cores: 0,
            cpu_speed: 0,
            memory: 0,
            local_storage: 0,
            local_disks: -1,
            iscsi_storage: -1,
        }
    }
}

fn unknown_count() -> i64 {
    -1
}

fn default_block_size() -> u32 {
    512
}

/// Block device reported by a pod driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredBlockDevice {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    /// Bytes
    pub size: u64,
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub id_path: Option<String>,
    #[serde(rename = "type", default)]
    pub device_type: BlockDeviceType,
    #[serde(default)]
    pub iscsi_target: Option<String>,
}

impl DiscoveredBlockDevice {
    /// A physical device identified by its id path
    pub fn physical(id_path: impl Into<String>, size: u64) -> Self {
        Self {
            model: None,
            serial: None,
            size,
            block_size: default_block_size(),
            tags: Vec::new(),
            id_path: Some(id_path.into()),
            device_type: BlockDeviceType::Physical,
            iscsi_target: None,
        }
    }

    /// A physical device identified by model and serial
    pub fn with_model(model: impl Into<String>, serial: impl Into<String>, size: u64) -> Self {
        Self {
            model: Some(model.into()),
            serial: Some(serial.into()),
            ..Self::physical("", size)
        }
        .without_id_path()
    }

    /// An iSCSI-backed device
    pub fn iscsi(target: impl Into<String>, size: u64) -> Self {
        Self {
            device_type: BlockDeviceType::Iscsi,
            iscsi_target: Some(target.into()),
            ..Self::physical("", size)
        }
        .without_id_path()
    }

    fn without_id_path(mut self) -> Self {
        self.id_path = None;
        self
    }
}

/// Network interface reported by a pod driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredInterface {
    pub mac_address: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the machine PXE boots from this interface
    #[serde(default)]
    pub boot: bool,
}

/// Machine reported by a pod driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredMachine {
    #[serde(default)]
    pub hostname: Option<String>,
    pub architecture: String,
    pub cores: u32,
    /// MHz
    #[serde(default)]
    pub cpu_speed: u32,
    /// MiB
    pub memory: u64,
    #[serde(default)]
    pub power_state: PowerState,
    /// Node-scoped power parameters (e.g. `power_id`)
    #[serde(default)]
    pub power_parameters: PowerParameters,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub block_devices: Vec<DiscoveredBlockDevice>,
    #[serde(default)]
    pub interfaces: Vec<DiscoveredInterface>,
}

/// Full snapshot returned by a pod driver's discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPod {
    pub architectures: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    pub cores: u32,
    /// MHz
    #[serde(default)]
    pub cpu_speed: u32,
    /// MiB
    pub memory: u64,
    /// Bytes
    #[serde(default)]
    pub local_storage: u64,
    #[serde(default = "unknown_count")]
    pub local_disks: i64,
    #[serde(default = "unknown_count")]
    pub iscsi_storage: i64,
    #[serde(default)]
    pub hints: DiscoveredPodHints,
    #[serde(default)]
    pub machines: Vec<DiscoveredMachine>,
    #[serde(default)]
    pub tags: Vec<String>,
}

// =============================================================================
// Compose Request Types
// =============================================================================

/// Disk requested for a composed machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedBlockDevice {
    /// Bytes
    pub size: u64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Interface requested for a composed machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedInterface {}

/// Machine specification sent to a pod driver's compose call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedMachine {
    pub hostname: String,
    pub architecture: String,
    pub cores: u32,
    /// MiB
    pub memory: u64,
    /// Upper bound in MHz, if any
    pub cpu_speed: Option<u32>,
    pub block_devices: Vec<RequestedBlockDevice>,
    pub interfaces: Vec<RequestedInterface>,
}

// =============================================================================
// Rack Client Port
// =============================================================================

/// Failure reported by the remote end of a pod RPC
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The driver attempted the action and failed
    #[error("{0}")]
    ActionFailed(String),
    /// The pod does not have the resources to satisfy the request
    #[error("{0}")]
    InvalidResources(String),
    /// The rack controller connection dropped mid-call
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Result of a remote pod RPC
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Port for one rack controller that can run pod driver operations
#[async_trait]
pub trait RackClient: Send + Sync {
    /// System ID of the rack controller behind this client
    fn ident(&self) -> &str;

    /// Run the pod driver's discovery
    async fn discover_pod(
        &self,
        power_type: &str,
        context: &PowerParameters,
    ) -> RemoteResult<DiscoveredPod>;

    /// Ask the pod driver to compose a machine
    async fn compose_machine(
        &self,
        power_type: &str,
        context: &PowerParameters,
        request: &RequestedMachine,
        pod_id: u64,
        pod_name: &str,
    ) -> RemoteResult<(DiscoveredMachine, DiscoveredPodHints)>;

    /// Ask the pod driver to tear down a machine
    async fn decompose_machine(
        &self,
        power_type: &str,
        context: &PowerParameters,
        pod_id: u64,
        pod_name: &str,
    ) -> RemoteResult<DiscoveredPodHints>;
}

// =============================================================================
// Client Resolver Port
// =============================================================================

/// Port for resolving live rack clients
#[async_trait]
pub trait ClientResolver: Send + Sync {
    /// System IDs of every rack controller with a live connection
    fn connected_identifiers(&self) -> Vec<String>;

    /// Every live client
    fn all_clients(&self) -> Vec<Arc<dyn RackClient>>;

    /// First live client among `identifiers`, in order
    async fn get_client(&self, identifiers: &[String]) -> Option<Arc<dyn RackClient>>;
}

// =============================================================================
// Commissioning Port
// =============================================================================

/// Port for kicking off commissioning of newly enlisted machines
#[async_trait]
pub trait CommissioningScheduler: Send + Sync {
    /// Start commissioning `machine` on behalf of `user`
    async fn start_commissioning(&self, machine: &Machine, user: &str) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type RackClientRef = Arc<dyn RackClient>;
pub type ClientResolverRef = Arc<dyn ClientResolver>;
pub type CommissioningSchedulerRef = Arc<dyn CommissioningScheduler>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_display() {
        assert_eq!(format!("{}", Capability::OverCommit), "over_commit");
        assert_eq!(format!("{}", Capability::Composable), "composable");
    }

    #[test]
    fn test_block_device_type_keeps_unknown_names() {
        let device: DiscoveredBlockDevice = serde_json::from_str(
            r#"{"size": 1073741824, "type": "nvme-of", "id_path": "/dev/nvme0n1"}"#,
        )
        .unwrap();
        assert_eq!(
            device.device_type,
            BlockDeviceType::Other("nvme-of".to_string())
        );
        assert_eq!(device.block_size, 512);

        let device: DiscoveredBlockDevice =
            serde_json::from_str(r#"{"size": 1073741824, "type": "iscsi"}"#).unwrap();
        assert_eq!(device.device_type, BlockDeviceType::Iscsi);
    }

    #[test]
    fn test_discovered_pod_defaults() {
        let pod: DiscoveredPod = serde_json::from_str(
            r#"{"architectures": ["amd64/generic"], "cores": 8, "memory": 8192}"#,
        )
        .unwrap();
        assert_eq!(pod.local_disks, -1);
        assert_eq!(pod.iscsi_storage, -1);
        assert!(pod.machines.is_empty());
        assert_eq!(pod.hints, DiscoveredPodHints::default());
    }
}
