//! Simulated Pod Backend
//!
//! Rack client that hosts in-memory virsh-like pods. Used by the standalone
//! binary (loaded from a YAML inventory) and by tests, with hooks to inject
//! remote failures.

use crate::domain::ports::{
    Capability, DiscoveredBlockDevice, DiscoveredInterface, DiscoveredMachine, DiscoveredPod,
    DiscoveredPodHints, PowerParameters, PowerState, RackClient, RemoteError, RemoteResult,
    RequestedMachine,
};
use crate::error::Result;
use crate::model::RackController;
use async_trait::async_trait;
use indexmap::IndexMap;
use ipnetwork::IpNetwork;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const GB: u64 = 1000 * 1000 * 1000;

// =============================================================================
// Simulated Machine
// =============================================================================

/// Virtual machine hosted by a simulated pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedMachine {
    pub name: String,
    pub architecture: String,
    pub cores: u32,
    /// MiB
    pub memory: u64,
    /// Disk sizes in bytes
    pub disks: Vec<u64>,
    pub macs: Vec<String>,
    pub power_state: PowerState,
}

impl SimulatedMachine {
    fn discovered(&self, cpu_speed: u32) -> DiscoveredMachine {
        DiscoveredMachine {
            hostname: Some(self.name.clone()),
            architecture: self.architecture.clone(),
            cores: self.cores,
            cpu_speed,
            memory: self.memory,
            power_state: self.power_state,
            power_parameters: PowerParameters::from([("power_id".to_string(), self.name.clone())]),
            tags: Vec::new(),
            block_devices: self
                .disks
                .iter()
                .enumerate()
                .map(|(idx, size)| {
                    DiscoveredBlockDevice::physical(format!("/dev/vd{}", disk_letter(idx)), *size)
                })
                .collect(),
            interfaces: self
                .macs
                .iter()
                .enumerate()
                .map(|(idx, mac)| DiscoveredInterface {
                    mac_address: mac.clone(),
                    tags: Vec::new(),
                    boot: idx == 0,
                })
                .collect(),
        }
    }
}

fn disk_letter(idx: usize) -> char {
    (b'a' + (idx % 26) as u8) as char
}

// =============================================================================
// Simulated Pod
// =============================================================================

#[derive(Debug)]
struct PodState {
    architectures: Vec<String>,
    cores: u32,
    cpu_speed: u32,
    memory: u64,
    local_storage: u64,
    machines: IndexMap<String, SimulatedMachine>,
    failing_decompose: HashSet<String>,
    failing_compose: Option<String>,
    known_macs: HashSet<String>,
}

impl PodState {
    fn used_storage(&self) -> u64 {
        self.machines.values().flat_map(|m| m.disks.iter()).sum()
    }

    fn hints(&self) -> DiscoveredPodHints {
        let used_cores: u32 = self.machines.values().map(|m| m.cores).sum();
        let used_memory: u64 = self.machines.values().map(|m| m.memory).sum();
        DiscoveredPodHints {
            cores: self.cores.saturating_sub(used_cores),
            cpu_speed: self.cpu_speed,
            memory: self.memory.saturating_sub(used_memory),
            local_storage: self.local_storage.saturating_sub(self.used_storage()),
            local_disks: -1,
            iscsi_storage: -1,
        }
    }

    fn generate_mac(&mut self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let mac = format!(
                "52:54:00:{:02x}:{:02x}:{:02x}",
                rng.gen::<u8>(),
                rng.gen::<u8>(),
                rng.gen::<u8>()
            );
            if self.known_macs.insert(mac.clone()) {
                return mac;
            }
        }
    }
}

/// In-memory virsh-like pod
#[derive(Debug)]
pub struct SimulatedPod {
    power_type: String,
    power_address: String,
    state: Mutex<PodState>,
    compose_calls: AtomicUsize,
    decompose_calls: AtomicUsize,
}

impl SimulatedPod {
    /// A `virsh` pod at `power_address` with `cores` cores and `memory` MiB
    pub fn new(power_address: &str, cores: u32, memory: u64) -> Arc<Self> {
        Self::from_spec(&SimulatedPodSpec {
            power_type: default_power_type(),
            power_address: power_address.to_string(),
            reachable_from: Vec::new(),
            architectures: default_architectures(),
            cores,
            cpu_speed: default_cpu_speed(),
            memory,
            local_storage: default_local_storage(),
            machines: Vec::new(),
        })
    }

    pub fn from_spec(spec: &SimulatedPodSpec) -> Arc<Self> {
        let pod = Arc::new(Self {
            power_type: spec.power_type.clone(),
            power_address: spec.power_address.clone(),
            state: Mutex::new(PodState {
                architectures: spec.architectures.clone(),
                cores: spec.cores,
                cpu_speed: spec.cpu_speed,
                memory: spec.memory,
                local_storage: spec.local_storage,
                machines: IndexMap::new(),
                failing_decompose: HashSet::new(),
                failing_compose: None,
                known_macs: HashSet::new(),
            }),
            compose_calls: AtomicUsize::new(0),
            decompose_calls: AtomicUsize::new(0),
        });
        for machine in &spec.machines {
            pod.add_machine(&machine.name, machine.cores, machine.memory, machine.disks.clone());
        }
        pod
    }

    pub fn power_type(&self) -> &str {
        &self.power_type
    }

    pub fn power_address(&self) -> &str {
        &self.power_address
    }

    /// Create a VM outside of any compose call; returns its MAC address
    pub fn add_machine(&self, name: &str, cores: u32, memory: u64, disks: Vec<u64>) -> String {
        let mut state = self.state.lock();
        let mac = state.generate_mac();
        let architecture = state
            .architectures
            .first()
            .cloned()
            .unwrap_or_else(|| "amd64/generic".to_string());
        state.machines.insert(
            name.to_string(),
            SimulatedMachine {
                name: name.to_string(),
                architecture,
                cores,
                memory,
                disks,
                macs: vec![mac.clone()],
                power_state: PowerState::On,
            },
        );
        mac
    }

    /// Destroy a VM behind the control plane's back
    pub fn remove_machine(&self, name: &str) -> bool {
        self.state.lock().machines.shift_remove(name).is_some()
    }

    pub fn machine(&self, name: &str) -> Option<SimulatedMachine> {
        self.state.lock().machines.get(name).cloned()
    }

    pub fn machine_names(&self) -> Vec<String> {
        self.state.lock().machines.keys().cloned().collect()
    }

    /// Make every decompose of `name` fail
    pub fn fail_decompose(&self, name: &str) {
        self.state.lock().failing_decompose.insert(name.to_string());
    }

    /// Make the next compose fail with `message`
    pub fn fail_next_compose(&self, message: &str) {
        self.state.lock().failing_compose = Some(message.to_string());
    }

    pub fn compose_calls(&self) -> usize {
        self.compose_calls.load(Ordering::SeqCst)
    }

    pub fn decompose_calls(&self) -> usize {
        self.decompose_calls.load(Ordering::SeqCst)
    }

    fn discover(&self) -> DiscoveredPod {
        let state = self.state.lock();
        DiscoveredPod {
            architectures: state.architectures.clone(),
            capabilities: vec![
                Capability::Composable,
                Capability::DynamicLocalStorage,
                Capability::OverCommit,
            ],
            cores: state.cores,
            cpu_speed: state.cpu_speed,
            memory: state.memory,
            local_storage: state.local_storage,
            local_disks: -1,
            iscsi_storage: -1,
            hints: state.hints(),
            machines: state
                .machines
                .values()
                .map(|machine| machine.discovered(state.cpu_speed))
                .collect(),
            tags: vec!["virtual".to_string()],
        }
    }

    fn compose(
        &self,
        request: &RequestedMachine,
    ) -> RemoteResult<(DiscoveredMachine, DiscoveredPodHints)> {
        self.compose_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(message) = state.failing_compose.take() {
            return Err(RemoteError::ActionFailed(message));
        }
        if state.machines.contains_key(&request.hostname) {
            return Err(RemoteError::ActionFailed(format!(
                "Domain {} already exists",
                request.hostname
            )));
        }
        let requested_storage: u64 = request.block_devices.iter().map(|d| d.size).sum();
        let free_storage = state.local_storage.saturating_sub(state.used_storage());
        if requested_storage > free_storage {
            return Err(RemoteError::InvalidResources(format!(
                "not enough space in storage pool: requested {} bytes, {} available",
                requested_storage, free_storage
            )));
        }

        let macs = (0..request.interfaces.len().max(1))
            .map(|_| state.generate_mac())
            .collect();
        let machine = SimulatedMachine {
            name: request.hostname.clone(),
            architecture: request.architecture.clone(),
            cores: request.cores,
            memory: request.memory,
            disks: request.block_devices.iter().map(|d| d.size).collect(),
            macs,
            power_state: PowerState::Off,
        };
        let mut discovered = machine.discovered(state.cpu_speed);
        for (device, requested) in discovered
            .block_devices
            .iter_mut()
            .zip(request.block_devices.iter())
        {
            device.tags = requested.tags.clone();
        }
        state.machines.insert(machine.name.clone(), machine);
        Ok((discovered, state.hints()))
    }

    fn decompose(&self, power_id: &str) -> RemoteResult<DiscoveredPodHints> {
        self.decompose_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.failing_decompose.contains(power_id) {
            return Err(RemoteError::ActionFailed(format!(
                "Failed to undefine domain {}",
                power_id
            )));
        }
        if state.machines.shift_remove(power_id).is_none() {
            return Err(RemoteError::ActionFailed(format!(
                "Domain {} does not exist",
                power_id
            )));
        }
        Ok(state.hints())
    }
}

// =============================================================================
// Simulated Rack Controller
// =============================================================================

/// Rack controller client reaching a set of simulated pods
pub struct SimulatedRack {
    ident: String,
    pods: RwLock<Vec<Arc<SimulatedPod>>>,
    connected: AtomicBool,
}

impl SimulatedRack {
    pub fn new(ident: &str) -> Arc<Self> {
        Arc::new(Self {
            ident: ident.to_string(),
            pods: RwLock::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    /// Give this rack a route to `pod`
    pub fn attach(&self, pod: Arc<SimulatedPod>) {
        debug!("{}: reaching pod at {}", self.ident, pod.power_address());
        self.pods.write().push(pod);
    }

    /// Simulate the connection dropping mid-call
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn find_pod(
        &self,
        power_type: &str,
        context: &PowerParameters,
    ) -> RemoteResult<Arc<SimulatedPod>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RemoteError::ConnectionLost(self.ident.clone()));
        }
        let address = context.get("power_address").map(String::as_str).unwrap_or_default();
        self.pods
            .read()
            .iter()
            .find(|pod| pod.power_type == power_type && pod.power_address == address)
            .cloned()
            .ok_or_else(|| {
                RemoteError::ActionFailed(format!("Failed to login to {} console.", power_type))
            })
    }
}

#[async_trait]
impl RackClient for SimulatedRack {
    fn ident(&self) -> &str {
        &self.ident
    }

    async fn discover_pod(
        &self,
        power_type: &str,
        context: &PowerParameters,
    ) -> RemoteResult<DiscoveredPod> {
        Ok(self.find_pod(power_type, context)?.discover())
    }

    async fn compose_machine(
        &self,
        power_type: &str,
        context: &PowerParameters,
        request: &RequestedMachine,
        pod_id: u64,
        pod_name: &str,
    ) -> RemoteResult<(DiscoveredMachine, DiscoveredPodHints)> {
        debug!(
            "{}: composing {} on pod {} ({})",
            self.ident, request.hostname, pod_name, pod_id
        );
        self.find_pod(power_type, context)?.compose(request)
    }

    async fn decompose_machine(
        &self,
        power_type: &str,
        context: &PowerParameters,
        pod_id: u64,
        pod_name: &str,
    ) -> RemoteResult<DiscoveredPodHints> {
        let power_id = context.get("power_id").cloned().unwrap_or_default();
        debug!(
            "{}: decomposing {} on pod {} ({})",
            self.ident, power_id, pod_name, pod_id
        );
        self.find_pod(power_type, context)?.decompose(&power_id)
    }
}

// =============================================================================
// Inventory
// =============================================================================

fn default_power_type() -> String {
    "virsh".to_string()
}

fn default_architectures() -> Vec<String> {
    vec!["amd64/generic".to_string()]
}

fn default_cpu_speed() -> u32 {
    2000
}

fn default_local_storage() -> u64 {
    1000 * GB
}

fn default_machine_cores() -> u32 {
    1
}

fn default_machine_memory() -> u64 {
    1024
}

fn default_disks() -> Vec<u64> {
    vec![8 * GB]
}

/// Rack controller entry of an inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedRackSpec {
    pub system_id: String,
    pub hostname: String,
    #[serde(default)]
    pub subnets: Vec<IpNetwork>,
}

/// VM entry of an inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedMachineSpec {
    pub name: String,
    #[serde(default = "default_machine_cores")]
    pub cores: u32,
    #[serde(default = "default_machine_memory")]
    pub memory: u64,
    #[serde(default = "default_disks")]
    pub disks: Vec<u64>,
}

/// Pod entry of an inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedPodSpec {
    #[serde(default = "default_power_type")]
    pub power_type: String,
    pub power_address: String,
    /// System IDs of the racks with a route to the pod
    #[serde(default)]
    pub reachable_from: Vec<String>,
    #[serde(default = "default_architectures")]
    pub architectures: Vec<String>,
    pub cores: u32,
    #[serde(default = "default_cpu_speed")]
    pub cpu_speed: u32,
    pub memory: u64,
    #[serde(default = "default_local_storage")]
    pub local_storage: u64,
    #[serde(default)]
    pub machines: Vec<SimulatedMachineSpec>,
}

/// Racks and pods for standalone operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatedInventory {
    #[serde(default)]
    pub racks: Vec<SimulatedRackSpec>,
    #[serde(default)]
    pub pods: Vec<SimulatedPodSpec>,
}

/// Live objects built from an inventory
pub struct SimulatedFleet {
    pub racks: Vec<RackController>,
    pub clients: Vec<Arc<SimulatedRack>>,
    pub pods: Vec<Arc<SimulatedPod>>,
}

impl SimulatedInventory {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Instantiate the racks and pods, wiring each pod to the racks that
    /// reach it
    pub fn build(&self) -> SimulatedFleet {
        let clients: BTreeMap<String, Arc<SimulatedRack>> = self
            .racks
            .iter()
            .map(|rack| (rack.system_id.clone(), SimulatedRack::new(&rack.system_id)))
            .collect();

        let mut pods = Vec::with_capacity(self.pods.len());
        for spec in &self.pods {
            let pod = SimulatedPod::from_spec(spec);
            for rack in &spec.reachable_from {
                if let Some(client) = clients.get(rack) {
                    client.attach(Arc::clone(&pod));
                }
            }
            pods.push(pod);
        }

        info!(
            "Simulated inventory: {} racks, {} pods",
            clients.len(),
            pods.len()
        );
        SimulatedFleet {
            racks: self
                .racks
                .iter()
                .map(|rack| RackController {
                    system_id: rack.system_id.clone(),
                    hostname: rack.hostname.clone(),
                    subnets: rack.subnets.clone(),
                })
                .collect(),
            clients: clients.into_values().collect(),
            pods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{RequestedBlockDevice, RequestedInterface};
    use std::io::Write;

    const ADDRESS: &str = "qemu+ssh://10.0.0.5/system";

    fn context(power_id: Option<&str>) -> PowerParameters {
        let mut context =
            PowerParameters::from([("power_address".to_string(), ADDRESS.to_string())]);
        if let Some(id) = power_id {
            context.insert("power_id".to_string(), id.to_string());
        }
        context
    }

    fn request(hostname: &str, disk: u64) -> RequestedMachine {
        RequestedMachine {
            hostname: hostname.to_string(),
            architecture: "amd64/generic".into(),
            cores: 2,
            memory: 2048,
            cpu_speed: None,
            block_devices: vec![RequestedBlockDevice {
                size: disk,
                tags: vec!["ssd".into()],
            }],
            interfaces: vec![RequestedInterface::default()],
        }
    }

    #[tokio::test]
    async fn test_discover_reports_machines() {
        let rack = SimulatedRack::new("rack-a");
        let pod = SimulatedPod::new(ADDRESS, 8, 16384);
        pod.add_machine("vm-one", 2, 2048, vec![10 * GB, 20 * GB]);
        rack.attach(pod);

        let discovered = rack.discover_pod("virsh", &context(None)).await.unwrap();
        assert_eq!(discovered.hints.cores, 6);
        assert_eq!(discovered.tags, vec!["virtual"]);
        let machine = &discovered.machines[0];
        assert_eq!(machine.power_parameters["power_id"], "vm-one");
        assert_eq!(machine.block_devices[1].id_path.as_deref(), Some("/dev/vdb"));
        assert!(machine.interfaces[0].boot);
    }

    #[tokio::test]
    async fn test_compose_and_decompose() {
        let rack = SimulatedRack::new("rack-a");
        let pod = SimulatedPod::new(ADDRESS, 8, 16384);
        rack.attach(Arc::clone(&pod));

        let (machine, hints) = rack
            .compose_machine("virsh", &context(None), &request("vm-new", 8 * GB), 1, "pod")
            .await
            .unwrap();
        assert_eq!(machine.hostname.as_deref(), Some("vm-new"));
        assert_eq!(machine.block_devices[0].tags, vec!["ssd"]);
        assert_eq!(hints.cores, 6);

        let err = rack
            .compose_machine("virsh", &context(None), &request("vm-big", 2000 * GB), 1, "pod")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResources(_)));

        rack.decompose_machine("virsh", &context(Some("vm-new")), 1, "pod")
            .await
            .unwrap();
        assert!(pod.machine_names().is_empty());
        assert_eq!(pod.compose_calls(), 2);
        assert_eq!(pod.decompose_calls(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_rack() {
        let rack = SimulatedRack::new("rack-a");
        rack.attach(SimulatedPod::new(ADDRESS, 8, 16384));
        rack.set_connected(false);
        let err = rack.discover_pod("virsh", &context(None)).await.unwrap_err();
        assert!(matches!(err, RemoteError::ConnectionLost(_)));
    }

    #[test]
    fn test_inventory_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
racks:
  - system_id: rack-a
    hostname: rack-a
    subnets: ["10.0.0.0/24"]
pods:
  - power_address: {}
    reachable_from: [rack-a]
    cores: 16
    memory: 32768
    machines:
      - name: vm-one
        cores: 2
"#,
            ADDRESS
        )
        .unwrap();

        let fleet = SimulatedInventory::load(file.path()).unwrap().build();
        assert_eq!(fleet.racks.len(), 1);
        assert_eq!(fleet.clients.len(), 1);
        assert_eq!(fleet.pods[0].machine_names(), vec!["vm-one"]);
        assert_eq!(fleet.pods[0].machine("vm-one").unwrap().disks, vec![8 * GB]);
    }
}
