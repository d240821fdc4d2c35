//! Reconciliation Engine
//!
//! Brings the persisted view of a pod in line with a discovery snapshot.
//! A [`PodReconciler`] works on the tables of one transaction: either the
//! whole sync commits or nothing does. The only failure swallowed along the
//! way is a physical block device that could not be created on a new
//! machine that will be commissioned, since commissioning rediscovers it.

use super::matcher::{
    find_existing_machine, interface_map, mac_machine_map, persisted_key, BlockDeviceMaps,
};
use crate::domain::ports::{
    BlockDeviceType, DiscoveredBlockDevice, DiscoveredInterface, DiscoveredMachine, DiscoveredPod,
};
use crate::error::{Error, Result};
use crate::model::names::unique_petname;
use crate::model::storage::{block_name_from_idx, normalize_iscsi_target};
use crate::model::{
    is_valid_hostname, BlockDevice, BlockDeviceId, BlockDeviceKind, BmcId, CreationType,
    Interface, InterfaceId, MacAddress, Machine, NodeId, NodeStatus, PoolId, ZoneId,
};
use crate::store::Tables;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

// =============================================================================
// Options and Report
// =============================================================================

/// How a machine is enlisted by [`PodReconciler::create_machine`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreateOptions {
    /// Mark the machine Ready instead of commissioning it
    pub skip_commissioning: bool,
    pub creation_type: CreationType,
    /// Overrides the pod's pool
    pub pool: Option<PoolId>,
    /// Overrides the pod's zone
    pub zone: Option<ZoneId>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            skip_commissioning: false,
            creation_type: CreationType::PreExisting,
            pool: None,
            zone: None,
        }
    }
}

/// Machine removed by a sync because it vanished from discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedMachine {
    pub id: NodeId,
    pub hostname: String,
}

/// Outcome of one sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: Vec<NodeId>,
    pub updated: Vec<NodeId>,
    /// Machines that were taken over from another BMC or from no BMC
    pub moved: Vec<NodeId>,
    pub removed: Vec<RemovedMachine>,
    /// New machines waiting to be commissioned once the sync commits
    pub commission: Vec<NodeId>,
}

impl SyncReport {
    /// Whether the sync changed no machine
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.moved.is_empty()
            && self.removed.is_empty()
    }
}

/// Comparable state of a machine and everything attached to it
#[derive(Debug, PartialEq)]
struct MachineState {
    machine: Machine,
    block_devices: Vec<BlockDevice>,
    interfaces: Vec<Interface>,
}

impl MachineState {
    fn capture(tables: &Tables, node: NodeId) -> Result<Self> {
        let mut machine = tables.machine(node)?.clone();
        machine.updated_at = machine.created_at;
        Ok(Self {
            machine,
            block_devices: tables.block_devices_of(node).cloned().collect(),
            interfaces: tables.interfaces_of(node).cloned().collect(),
        })
    }
}

// =============================================================================
// Pod Reconciler
// =============================================================================

/// Sync and enlistment logic for one pod
pub struct PodReconciler<'t> {
    tables: &'t mut Tables,
    pod: BmcId,
    pod_name: String,
}

impl<'t> PodReconciler<'t> {
    /// Reconciler for `pod`; fails when `pod` is not a pod
    pub fn new(tables: &'t mut Tables, pod: BmcId) -> Result<Self> {
        let pod_name = tables.pod(pod)?.name.clone();
        Ok(Self {
            tables,
            pod,
            pod_name,
        })
    }

    /// Sync the pod record, its hints and its machines with `discovered`
    pub fn sync(&mut self, discovered: &DiscoveredPod) -> Result<SyncReport> {
        {
            let mut pod = self.tables.pod_mut(self.pod)?;
            pod.merge_discovered(discovered);
            pod.set_hints(discovered.hints);
        }

        let mut report = SyncReport::default();
        self.sync_machines(&discovered.machines, &mut report)?;
        info!("{}: finished syncing discovered information", self.pod_name);
        Ok(report)
    }

    /// Create, update and remove machines so the pod matches `machines`
    pub fn sync_machines(
        &mut self,
        machines: &[DiscoveredMachine],
        report: &mut SyncReport,
    ) -> Result<()> {
        let mac_map = mac_machine_map(self.tables, machines)?;
        let mut leftovers: BTreeMap<NodeId, String> = self
            .tables
            .machines_of(self.pod)
            .map(|machine| (machine.id, machine.hostname.clone()))
            .collect();

        for discovered in machines {
            match find_existing_machine(discovered, &mac_map) {
                None => {
                    let node = self.create_machine(discovered, &CreateOptions::default())?;
                    info!(
                        "{}: discovered new machine: {}",
                        self.pod_name,
                        self.tables.machine(node)?.hostname
                    );
                    report.created.push(node);
                    report.commission.push(node);
                }
                Some(node) => {
                    let before = MachineState::capture(self.tables, node)?;
                    if self.sync_machine(discovered, node)? {
                        report.moved.push(node);
                    }
                    if MachineState::capture(self.tables, node)? != before {
                        self.tables.machine_mut(node)?.updated_at = Utc::now();
                        report.updated.push(node);
                    }
                    leftovers.remove(&node);
                }
            }
        }

        for (node, hostname) in leftovers {
            self.tables.delete_machine(node)?;
            warn!(
                "{}: machine {} no longer exists and was deleted.",
                self.pod_name, hostname
            );
            report.removed.push(RemovedMachine { id: node, hostname });
        }
        Ok(())
    }

    // =========================================================================
    // Machine Creation
    // =========================================================================

    /// Enlist `discovered` as a new machine of this pod.
    ///
    /// Commissioning is not started here: callers start it for the returned
    /// machine once the transaction has committed, unless skipped.
    pub fn create_machine(
        &mut self,
        discovered: &DiscoveredMachine,
        options: &CreateOptions,
    ) -> Result<NodeId> {
        // Same key rules as sync.
        BlockDeviceMaps::build(&discovered.block_devices)?;

        let (pod_pool, pod_zone, pod_tags) = {
            let pod = self.tables.pod(self.pod)?;
            (pod.pool()?, pod.zone()?, pod.tags.clone())
        };

        let tables = &*self.tables;
        let hostname = discovered
            .hostname
            .as_deref()
            .filter(|hostname| !tables.hostname_taken(hostname) && is_valid_hostname(hostname))
            .map(str::to_string)
            .unwrap_or_else(|| unique_petname(|candidate| tables.hostname_taken(candidate)));

        let node = self.tables.new_node_id();
        let mut machine = Machine::new(node, hostname, discovered.architecture.clone());
        machine.status = if options.skip_commissioning {
            NodeStatus::Ready
        } else {
            NodeStatus::New
        };
        machine.cpu_count = discovered.cores;
        machine.cpu_speed = discovered.cpu_speed;
        machine.memory = discovered.memory;
        machine.power_state = discovered.power_state;
        machine.creation_type = options.creation_type;
        machine.bmc_id = Some(self.pod);
        machine.pool_id = Some(options.pool.unwrap_or(pod_pool));
        machine.zone_id = Some(options.zone.unwrap_or(pod_zone));
        machine.instance_power_parameters = discovered.power_parameters.clone();
        machine.tags = discovered
            .tags
            .iter()
            .chain(pod_tags.iter())
            .cloned()
            .collect();
        let hostname = machine.hostname.clone();
        self.tables.insert_machine(machine)?;

        for (idx, device) in discovered.block_devices.iter().enumerate() {
            let name = block_name_from_idx(idx);
            match &device.device_type {
                BlockDeviceType::Physical => {
                    if let Err(e) = self.create_physical_block_device(node, device, Some(name)) {
                        if options.skip_commissioning {
                            return Err(e);
                        }
                        warn!(
                            "{}: unable to create block device {} on {}, commissioning will discover it: {}",
                            self.pod_name,
                            block_name_from_idx(idx),
                            hostname,
                            e
                        );
                    }
                }
                BlockDeviceType::Iscsi => {
                    self.create_iscsi_block_device(node, device, Some(name))?;
                }
                BlockDeviceType::Other(device_type) => {
                    return Err(Error::UnknownBlockDeviceType {
                        device_type: device_type.clone(),
                    });
                }
            }
        }

        for (idx, interface) in discovered.interfaces.iter().enumerate() {
            let mac = MacAddress::parse(&interface.mac_address)?;
            let id = self.create_interface(node, mac, interface, Some(format!("eth{}", idx)))?;
            if interface.boot {
                self.tables.machine_mut(node)?.boot_interface_id = Some(id);
            }
        }

        debug!(
            "{}: created machine {} ({:?})",
            self.pod_name, hostname, options.creation_type
        );
        Ok(node)
    }

    fn create_physical_block_device(
        &mut self,
        node: NodeId,
        discovered: &DiscoveredBlockDevice,
        name: Option<String>,
    ) -> Result<BlockDeviceId> {
        let name = name.unwrap_or_else(|| self.tables.next_block_device_name(node));
        self.tables.insert_block_device(
            node,
            name,
            BlockDeviceKind::Physical {
                model: discovered.model.clone().unwrap_or_default(),
                serial: discovered.serial.clone().unwrap_or_default(),
                id_path: discovered.id_path.clone(),
            },
            discovered.size,
            discovered.block_size,
            discovered.tags.clone(),
        )
    }

    /// iSCSI targets are unique fleet-wide, so a device already known on
    /// another machine is moved to `node`.
    fn create_iscsi_block_device(
        &mut self,
        node: NodeId,
        discovered: &DiscoveredBlockDevice,
        name: Option<String>,
    ) -> Result<BlockDeviceId> {
        let name = name.unwrap_or_else(|| self.tables.next_block_device_name(node));
        let target = normalize_iscsi_target(discovered.iscsi_target.as_deref().unwrap_or_default());

        let Some(existing) = self.tables.iscsi_device(&target).cloned() else {
            return self.tables.insert_block_device(
                node,
                name,
                BlockDeviceKind::Iscsi { target },
                discovered.size,
                discovered.block_size,
                discovered.tags.clone(),
            );
        };

        warn!(
            "{}: ISCSI block device with target {} was discovered on machine {} and was moved from {}.",
            self.pod_name,
            target,
            self.tables.machine(node)?.hostname,
            self.tables.machine(existing.node_id)?.hostname
        );
        let device = self.tables.block_device_mut(existing.id)?;
        device.name = name;
        device.node_id = node;
        device.size = discovered.size;
        device.block_size = discovered.block_size;
        device.tags = discovered.tags.clone();
        Ok(existing.id)
    }

    /// MAC addresses are unique fleet-wide, so an interface already known on
    /// another machine is moved to `node`.
    fn create_interface(
        &mut self,
        node: NodeId,
        mac: MacAddress,
        discovered: &DiscoveredInterface,
        name: Option<String>,
    ) -> Result<InterfaceId> {
        let name = name.unwrap_or_else(|| self.tables.next_interface_name(node));

        let Some(existing) = self.tables.interface_by_mac(&mac).cloned() else {
            return self
                .tables
                .insert_interface(node, name, mac, discovered.tags.clone());
        };

        warn!(
            "{}: interface with MAC address {} was discovered on machine {} and was moved from {}.",
            self.pod_name,
            mac,
            self.tables.machine(node)?.hostname,
            self.tables.machine(existing.node_id)?.hostname
        );
        let previous = self.tables.machine_mut(existing.node_id)?;
        if previous.boot_interface_id == Some(existing.id) {
            previous.boot_interface_id = None;
        }
        let interface = self.tables.interface_mut(existing.id)?;
        interface.name = name;
        interface.node_id = node;
        interface.tags = discovered.tags.clone();
        Ok(existing.id)
    }

    // =========================================================================
    // Machine Sync
    // =========================================================================

    /// Sync an existing machine; returns whether it moved under this pod
    fn sync_machine(&mut self, discovered: &DiscoveredMachine, node: NodeId) -> Result<bool> {
        let (hostname, previous_bmc, creation_type) = {
            let machine = self.tables.machine(node)?;
            (machine.hostname.clone(), machine.bmc_id, machine.creation_type)
        };

        let moved = previous_bmc != Some(self.pod);
        if moved {
            let previous_pod = previous_bmc
                .and_then(|bmc| self.tables.bmc(bmc).ok())
                .filter(|bmc| bmc.is_pod())
                .map(|bmc| bmc.name.clone());
            match previous_pod {
                None => warn!(
                    "{}: {} has been moved under the pod, previously it was not part of any pod.",
                    self.pod_name, hostname
                ),
                Some(previous) => warn!(
                    "{}: {} has been moved under the pod, previously it was part of pod {}.",
                    self.pod_name, hostname, previous
                ),
            }
        }

        {
            let machine = self.tables.machine_mut(node)?;
            machine.bmc_id = Some(self.pod);
            machine.power_state = discovered.power_state;
            machine.instance_power_parameters = discovered.power_parameters.clone();
        }

        // Hardware of pre-existing and manually composed machines is owned
        // by commissioning.
        if !creation_type.hardware_is_synced() {
            return Ok(moved);
        }

        {
            let machine = self.tables.machine_mut(node)?;
            machine.architecture = discovered.architecture.clone();
            machine.cpu_count = discovered.cores;
            machine.cpu_speed = discovered.cpu_speed;
            machine.memory = discovered.memory;
            machine.tags = discovered.tags.iter().cloned().collect();
        }

        self.sync_block_devices(node, &discovered.block_devices)?;
        self.sync_interfaces(node, &discovered.interfaces)?;
        Ok(moved)
    }

    fn sync_block_devices(
        &mut self,
        node: NodeId,
        devices: &[DiscoveredBlockDevice],
    ) -> Result<()> {
        let mut maps = BlockDeviceMaps::build(devices)?;
        let existing: Vec<BlockDevice> = self.tables.block_devices_of(node).cloned().collect();

        for device in existing {
            match maps.take(&persisted_key(&device)) {
                Some(discovered) => {
                    let device = self.tables.block_device_mut(device.id)?;
                    device.size = discovered.size;
                    device.block_size = discovered.block_size;
                    device.tags = discovered.tags.clone();
                }
                None => {
                    self.tables.delete_block_device(device.id)?;
                }
            }
        }

        for discovered in maps.into_remaining() {
            match &discovered.device_type {
                BlockDeviceType::Physical => {
                    self.create_physical_block_device(node, discovered, None)?;
                }
                BlockDeviceType::Iscsi => {
                    self.create_iscsi_block_device(node, discovered, None)?;
                }
                BlockDeviceType::Other(device_type) => {
                    return Err(Error::UnknownBlockDeviceType {
                        device_type: device_type.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn sync_interfaces(&mut self, node: NodeId, interfaces: &[DiscoveredInterface]) -> Result<()> {
        let mut by_mac = interface_map(interfaces)?;
        let existing: Vec<Interface> = self.tables.interfaces_of(node).cloned().collect();

        for interface in existing {
            match by_mac.shift_remove(&interface.mac_address) {
                Some(discovered) => {
                    self.tables.interface_mut(interface.id)?.tags = discovered.tags.clone();
                    if discovered.boot {
                        self.tables.machine_mut(node)?.boot_interface_id = Some(interface.id);
                    }
                }
                None => {
                    self.tables.delete_interface(interface.id)?;
                }
            }
        }

        for (mac, discovered) in by_mac {
            let id = self.create_interface(node, mac, discovered, None)?;
            if discovered.boot {
                self.tables.machine_mut(node)?.boot_interface_id = Some(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{DiscoveredPodHints, PowerParameters, PowerState};
    use crate::model::Bmc;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn seed_pod(tables: &mut Tables, name: &str) -> BmcId {
        let id = tables.new_bmc_id();
        let mut pod = Bmc::new_pod(
            id,
            name,
            "virsh",
            PowerParameters::from([(
                "power_address".to_string(),
                format!("qemu+ssh://{}/system", name),
            )]),
            None,
            tables.default_pool_id(),
            tables.default_zone_id(),
        );
        pod.tags = vec!["pod-tag".into()];
        tables.upsert_bmc(pod).unwrap();
        id
    }

    fn nic(mac: &str, boot: bool) -> DiscoveredInterface {
        DiscoveredInterface {
            mac_address: mac.to_string(),
            tags: vec![],
            boot,
        }
    }

    fn machine(hostname: &str, mac: &str) -> DiscoveredMachine {
        DiscoveredMachine {
            hostname: Some(hostname.to_string()),
            architecture: "amd64/generic".into(),
            cores: 2,
            cpu_speed: 2000,
            memory: 2048,
            power_state: PowerState::On,
            power_parameters: PowerParameters::from([("power_id".into(), hostname.to_string())]),
            tags: vec!["virtual".into()],
            block_devices: vec![DiscoveredBlockDevice::physical("/dev/vda", 10 * GIB)],
            interfaces: vec![nic(mac, true)],
        }
    }

    fn snapshot(machines: Vec<DiscoveredMachine>) -> DiscoveredPod {
        DiscoveredPod {
            architectures: vec!["amd64/generic".into()],
            capabilities: vec![],
            cores: 16,
            cpu_speed: 2000,
            memory: 32768,
            local_storage: 500 * GIB,
            local_disks: -1,
            iscsi_storage: -1,
            hints: DiscoveredPodHints {
                cores: 12,
                cpu_speed: 2000,
                memory: 28672,
                local_storage: 400 * GIB,
                local_disks: -1,
                iscsi_storage: -1,
            },
            machines,
            tags: vec!["virtual".into()],
        }
    }

    fn sync(tables: &mut Tables, pod: BmcId, discovered: &DiscoveredPod) -> SyncReport {
        PodReconciler::new(tables, pod).unwrap().sync(discovered).unwrap()
    }

    fn machine_by_hostname<'a>(tables: &'a Tables, hostname: &str) -> &'a Machine {
        tables
            .machines()
            .find(|machine| machine.hostname == hostname)
            .unwrap()
    }

    #[test]
    fn test_new_machine_is_enlisted() {
        let mut tables = Tables::default();
        let pod = seed_pod(&mut tables, "pod-a");
        let discovered = snapshot(vec![machine("vm-one", "52:54:00:00:00:01")]);
        let report = sync(&mut tables, pod, &discovered);

        assert_eq!(report.created.len(), 1);
        assert_eq!(report.commission, report.created);
        let vm = machine_by_hostname(&tables, "vm-one");
        assert_eq!(vm.status, NodeStatus::New);
        assert_eq!(vm.creation_type, CreationType::PreExisting);
        assert_eq!(vm.bmc_id, Some(pod));
        assert!(vm.tags.contains("virtual") && vm.tags.contains("pod-tag"));
        assert!(vm.boot_interface_id.is_some());

        let devices: Vec<_> = tables.block_devices_of(vm.id).collect();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "sda");
        assert_eq!(tables.pod(pod).unwrap().hints.cores, 12);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let mut tables = Tables::default();
        let pod = seed_pod(&mut tables, "pod-a");
        let discovered = snapshot(vec![
            machine("vm-one", "52:54:00:00:00:01"),
            machine("vm-two", "52:54:00:00:00:02"),
        ]);
        sync(&mut tables, pod, &discovered);
        let machines: Vec<_> = tables.machines().cloned().collect();
        let devices: Vec<_> = tables.block_devices().cloned().collect();
        let interfaces: Vec<_> = tables.interfaces().cloned().collect();

        let report = sync(&mut tables, pod, &discovered);
        assert!(report.is_noop());
        assert_eq!(tables.machines().cloned().collect::<Vec<_>>(), machines);
        assert_eq!(tables.block_devices().cloned().collect::<Vec<_>>(), devices);
        assert_eq!(tables.interfaces().cloned().collect::<Vec<_>>(), interfaces);
    }

    #[test]
    fn test_vanished_machine_is_removed() {
        let mut tables = Tables::default();
        let pod = seed_pod(&mut tables, "pod-a");
        sync(
            &mut tables,
            pod,
            &snapshot(vec![
                machine("vm-one", "52:54:00:00:00:01"),
                machine("vm-two", "52:54:00:00:00:02"),
            ]),
        );

        let discovered = snapshot(vec![machine("vm-one", "52:54:00:00:00:01")]);
        let report = sync(&mut tables, pod, &discovered);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].hostname, "vm-two");
        assert!(!tables.hostname_taken("vm-two"));
        assert_eq!(tables.interfaces().count(), 1);
    }

    #[test]
    fn test_pre_existing_machine_only_syncs_power() {
        let mut tables = Tables::default();
        let pod = seed_pod(&mut tables, "pod-a");
        sync(&mut tables, pod, &snapshot(vec![machine("vm-one", "52:54:00:00:00:01")]));

        let mut changed = machine("vm-one", "52:54:00:00:00:01");
        changed.architecture = "arm64/generic".into();
        changed.cores = 8;
        changed.memory = 8192;
        changed.power_state = PowerState::Off;
        changed
            .power_parameters
            .insert("power_id".into(), "vm-one-renamed".into());
        changed.tags = vec!["other".into()];
        changed.block_devices = vec![DiscoveredBlockDevice::physical("/dev/vdz", 20 * GIB)];
        let power_parameters = changed.power_parameters.clone();
        sync(&mut tables, pod, &snapshot(vec![changed]));

        let vm = machine_by_hostname(&tables, "vm-one");
        assert_eq!(vm.creation_type, CreationType::PreExisting);
        assert_eq!(vm.power_state, PowerState::Off);
        assert_eq!(vm.instance_power_parameters, power_parameters);
        assert_eq!(vm.architecture, "amd64/generic");
        assert_eq!(vm.cpu_count, 2);
        assert_eq!(vm.memory, 2048);
        assert!(vm.tags.contains("virtual"));
        let devices: Vec<_> = tables.block_devices_of(vm.id).collect();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].size, 10 * GIB);
    }

    #[test]
    fn test_dynamic_machine_converges() {
        let mut tables = Tables::default();
        let pod = seed_pod(&mut tables, "pod-a");
        sync(&mut tables, pod, &snapshot(vec![machine("vm-one", "52:54:00:00:00:01")]));
        let node = machine_by_hostname(&tables, "vm-one").id;
        tables.machine_mut(node).unwrap().creation_type = CreationType::Dynamic;
        tables.machine_mut(node).unwrap().hostname = "renamed".into();

        let mut changed = machine("vm-one", "52:54:00:00:00:01");
        changed.cores = 4;
        changed.tags = vec!["gpu".into()];
        changed.block_devices = vec![
            DiscoveredBlockDevice::physical("/dev/vda", 12 * GIB),
            DiscoveredBlockDevice::iscsi("10.0.0.9::::iqn.2017-01.vol", 5 * GIB),
        ];
        changed.interfaces = vec![
            nic("52:54:00:00:00:01", false),
            nic("52:54:00:00:00:09", true),
        ];
        let report = sync(&mut tables, pod, &snapshot(vec![changed]));
        assert_eq!(report.updated, vec![node]);

        let vm = tables.machine(node).unwrap();
        assert_eq!(vm.hostname, "renamed");
        assert_eq!(vm.cpu_count, 4);
        assert_eq!(vm.tags.iter().cloned().collect::<Vec<_>>(), vec!["gpu".to_string()]);

        let devices: Vec<_> = tables.block_devices_of(node).collect();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].size, 12 * GIB);
        assert_eq!(devices[1].name, "sdb");
        assert!(devices[1].is_iscsi());

        let boot = tables.interface(vm.boot_interface_id.unwrap()).unwrap();
        assert_eq!(boot.mac_address.to_string(), "52:54:00:00:00:09");
        assert_eq!(boot.name, "eth1");
    }

    #[test]
    fn test_machine_moves_between_pods() {
        let mut tables = Tables::default();
        let first = seed_pod(&mut tables, "pod-a");
        let second = seed_pod(&mut tables, "pod-b");
        sync(&mut tables, first, &snapshot(vec![machine("vm-one", "52:54:00:00:00:01")]));

        let discovered = snapshot(vec![machine("vm-one", "52:54:00:00:00:01")]);
        let report = sync(&mut tables, second, &discovered);
        assert_eq!(report.moved.len(), 1);
        assert!(report.created.is_empty());
        assert_eq!(machine_by_hostname(&tables, "vm-one").bmc_id, Some(second));
    }

    #[test]
    fn test_invalid_or_duplicate_hostname_is_regenerated() {
        let mut tables = Tables::default();
        let pod = seed_pod(&mut tables, "pod-a");
        sync(
            &mut tables,
            pod,
            &snapshot(vec![
                machine("vm-one", "52:54:00:00:00:01"),
                machine("vm-one", "52:54:00:00:00:02"),
                machine("9bad_name", "52:54:00:00:00:03"),
            ]),
        );
        assert_eq!(tables.machines().count(), 3);
        for vm in tables.machines() {
            assert!(is_valid_hostname(&vm.hostname));
        }
        assert_eq!(
            tables.machines().filter(|vm| vm.hostname == "vm-one").count(),
            1
        );
    }

    #[test]
    fn test_physical_device_failure_tolerated_only_when_commissioning() {
        let mut tables = Tables::default();
        let pod = seed_pod(&mut tables, "pod-a");
        let mut discovered = machine("vm-one", "52:54:00:00:00:01");
        discovered.block_devices = vec![DiscoveredBlockDevice::physical("/dev/vda", 1024)];

        let mut reconciler = PodReconciler::new(&mut tables, pod).unwrap();
        let node = reconciler
            .create_machine(&discovered, &CreateOptions::default())
            .unwrap();
        assert_eq!(tables.block_devices_of(node).count(), 0);

        let mut reconciler = PodReconciler::new(&mut tables, pod).unwrap();
        discovered.hostname = Some("vm-two".into());
        discovered.interfaces = vec![nic("52:54:00:00:00:02", true)];
        let options = CreateOptions {
            skip_commissioning: true,
            ..CreateOptions::default()
        };
        assert!(reconciler.create_machine(&discovered, &options).is_err());
    }

    #[test]
    fn test_duplicate_device_key_rejected_on_create() {
        let mut tables = Tables::default();
        let pod = seed_pod(&mut tables, "pod-a");
        let mut discovered = machine("vm-one", "52:54:00:00:00:01");
        discovered.block_devices = vec![
            DiscoveredBlockDevice::physical("/dev/vda", 10 * GIB),
            DiscoveredBlockDevice::physical("/dev/vda", 20 * GIB),
        ];

        let err = PodReconciler::new(&mut tables, pod)
            .unwrap()
            .create_machine(&discovered, &CreateOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateMatchKey { .. }));
        assert_eq!(tables.machines().count(), 0);
        assert_eq!(tables.block_devices().count(), 0);
    }

    #[test]
    fn test_unknown_device_type_aborts_sync() {
        let mut tables = Tables::default();
        let pod = seed_pod(&mut tables, "pod-a");
        let mut discovered = machine("vm-one", "52:54:00:00:00:01");
        discovered.block_devices[0].device_type = BlockDeviceType::Other("tape".into());

        let err = PodReconciler::new(&mut tables, pod)
            .unwrap()
            .sync(&snapshot(vec![discovered]))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownBlockDeviceType { .. }));
    }

    #[test]
    fn test_iscsi_device_moves_to_new_machine() {
        let mut tables = Tables::default();
        let pod = seed_pod(&mut tables, "pod-a");
        let mut first = machine("vm-one", "52:54:00:00:00:01");
        first.block_devices = vec![DiscoveredBlockDevice::iscsi("host::::iqn.vol", 5 * GIB)];
        sync(&mut tables, pod, &snapshot(vec![first.clone()]));

        let mut second = machine("vm-two", "52:54:00:00:00:02");
        second.block_devices = first.block_devices.clone();
        sync(&mut tables, pod, &snapshot(vec![second]));

        let vm = machine_by_hostname(&tables, "vm-two");
        let devices: Vec<_> = tables.block_devices_of(vm.id).collect();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_iscsi());
        assert_eq!(tables.block_devices().count(), 1);
    }
}
