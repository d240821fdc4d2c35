//! Relational tables of the in-memory store
//!
//! `Tables` is plain data: every method is synchronous and works on the
//! tables of one transaction. Uniqueness constraints that a relational
//! schema would enforce are checked on insert.

use crate::domain::ports::PowerParameters;
use crate::error::{Error, Result};
use crate::model::pool::{DEFAULT_POOL_NAME, DEFAULT_ZONE_NAME};
use crate::model::storage::{
    block_name_from_idx, MIN_BLOCK_DEVICE_BLOCK_SIZE, MIN_BLOCK_DEVICE_SIZE,
};
use crate::model::{
    BlockDevice, BlockDeviceKind, Bmc, BmcId, Interface, InterfaceId, MacAddress, Machine,
    NodeId, PodView, PodViewMut, PoolId, RackController, ResourcePool, RoutableRackRelationship,
    Zone, ZoneId,
};
use crate::model::BlockDeviceId;
use chrono::Utc;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Every table of the store
#[derive(Debug, Clone)]
pub struct Tables {
    next_id: u64,
    default_pool: PoolId,
    default_zone: ZoneId,
    pools: BTreeMap<PoolId, ResourcePool>,
    zones: BTreeMap<ZoneId, Zone>,
    bmcs: BTreeMap<BmcId, Bmc>,
    machines: BTreeMap<NodeId, Machine>,
    block_devices: BTreeMap<BlockDeviceId, BlockDevice>,
    interfaces: BTreeMap<InterfaceId, Interface>,
    racks: BTreeMap<String, RackController>,
    routability: Vec<RoutableRackRelationship>,
}

impl Default for Tables {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_NAME, DEFAULT_ZONE_NAME)
    }
}

impl Tables {
    /// Empty tables holding only the default pool and zone
    pub fn new(default_pool_name: &str, default_zone_name: &str) -> Self {
        let default_pool = PoolId(1);
        let default_zone = ZoneId(2);
        let mut pools = BTreeMap::new();
        pools.insert(
            default_pool,
            ResourcePool {
                id: default_pool,
                name: default_pool_name.to_string(),
                description: "Default pool".to_string(),
            },
        );
        let mut zones = BTreeMap::new();
        zones.insert(
            default_zone,
            Zone {
                id: default_zone,
                name: default_zone_name.to_string(),
                description: String::new(),
            },
        );
        Self {
            next_id: 3,
            default_pool,
            default_zone,
            pools,
            zones,
            bmcs: BTreeMap::new(),
            machines: BTreeMap::new(),
            block_devices: BTreeMap::new(),
            interfaces: BTreeMap::new(),
            racks: BTreeMap::new(),
            routability: Vec::new(),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // =========================================================================
    // Pools and Zones
    // =========================================================================

    pub fn default_pool_id(&self) -> PoolId {
        self.default_pool
    }

    pub fn default_zone_id(&self) -> ZoneId {
        self.default_zone
    }

    pub fn pool(&self, id: PoolId) -> Result<&ResourcePool> {
        self.pools
            .get(&id)
            .ok_or_else(|| Error::not_found("ResourcePool", id))
    }

    pub fn pool_by_name(&self, name: &str) -> Option<&ResourcePool> {
        self.pools.values().find(|pool| pool.name == name)
    }

    pub fn pools(&self) -> impl Iterator<Item = &ResourcePool> {
        self.pools.values()
    }

    pub fn insert_pool(&mut self, name: &str, description: &str) -> Result<PoolId> {
        if self.pool_by_name(name).is_some() {
            return Err(Error::field(
                "name",
                format!("Resource pool with name \"{}\" already exists", name),
            ));
        }
        let id = PoolId(self.allocate_id());
        self.pools.insert(
            id,
            ResourcePool {
                id,
                name: name.to_string(),
                description: description.to_string(),
            },
        );
        Ok(id)
    }

    pub(crate) fn remove_pool(&mut self, id: PoolId) -> Result<ResourcePool> {
        self.pools
            .remove(&id)
            .ok_or_else(|| Error::not_found("ResourcePool", id))
    }

    pub fn zone(&self, id: ZoneId) -> Result<&Zone> {
        self.zones.get(&id).ok_or_else(|| Error::not_found("Zone", id))
    }

    pub fn zone_by_name(&self, name: &str) -> Option<&Zone> {
        self.zones.values().find(|zone| zone.name == name)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn insert_zone(&mut self, name: &str, description: &str) -> Result<ZoneId> {
        if self.zone_by_name(name).is_some() {
            return Err(Error::field(
                "name",
                format!("Zone with name \"{}\" already exists", name),
            ));
        }
        let id = ZoneId(self.allocate_id());
        self.zones.insert(
            id,
            Zone {
                id,
                name: name.to_string(),
                description: description.to_string(),
            },
        );
        Ok(id)
    }

    pub(crate) fn remove_zone(&mut self, id: ZoneId) -> Result<Zone> {
        self.zones.remove(&id).ok_or_else(|| Error::not_found("Zone", id))
    }

    // =========================================================================
    // BMCs and Pods
    // =========================================================================

    pub fn new_bmc_id(&mut self) -> BmcId {
        BmcId(self.allocate_id())
    }

    pub fn bmc(&self, id: BmcId) -> Result<&Bmc> {
        self.bmcs.get(&id).ok_or_else(|| Error::not_found("BMC", id))
    }

    pub fn bmc_mut(&mut self, id: BmcId) -> Result<&mut Bmc> {
        self.bmcs.get_mut(&id).ok_or_else(|| Error::not_found("BMC", id))
    }

    pub fn bmcs(&self) -> impl Iterator<Item = &Bmc> {
        self.bmcs.values()
    }

    pub fn pod(&self, id: BmcId) -> Result<PodView<'_>> {
        self.bmcs
            .get(&id)
            .and_then(Bmc::as_pod)
            .ok_or_else(|| Error::not_found("Pod", id))
    }

    pub fn pod_mut(&mut self, id: BmcId) -> Result<PodViewMut<'_>> {
        self.bmcs
            .get_mut(&id)
            .and_then(Bmc::as_pod_mut)
            .ok_or_else(|| Error::not_found("Pod", id))
    }

    /// Every pod, in primary key order
    pub fn pods(&self) -> impl Iterator<Item = PodView<'_>> {
        self.bmcs.values().filter_map(Bmc::as_pod)
    }

    pub fn pod_name_taken(&self, name: &str, except: Option<BmcId>) -> bool {
        self.pods()
            .any(|pod| pod.name == name && Some(pod.id) != except)
    }

    /// BMC row with exactly this power type, parameter set and address
    pub fn find_bmc(
        &self,
        power_type: &str,
        parameters: &PowerParameters,
        ip_address: Option<IpAddr>,
    ) -> Option<&Bmc> {
        self.bmcs.values().find(|bmc| {
            bmc.power_type == power_type
                && &bmc.power_parameters == parameters
                && bmc.ip_address == ip_address
        })
    }

    /// Insert or replace a BMC row, enforcing the (type, parameters, address)
    /// and pod name uniqueness constraints.
    pub fn upsert_bmc(&mut self, mut bmc: Bmc) -> Result<BmcId> {
        if let Some(existing) =
            self.find_bmc(&bmc.power_type, &bmc.power_parameters, bmc.ip_address)
        {
            if existing.id != bmc.id {
                return Err(Error::PodExists);
            }
        }
        if bmc.is_pod() && self.pod_name_taken(&bmc.name, Some(bmc.id)) {
            return Err(Error::field(
                "name",
                format!("Pod with name \"{}\" already exists", bmc.name),
            ));
        }
        bmc.updated_at = Utc::now();
        let id = bmc.id;
        self.bmcs.insert(id, bmc);
        Ok(id)
    }

    /// Delete a plain BMC. Pods must go through the delete workflow.
    pub fn delete_bmc(&mut self, id: BmcId) -> Result<Bmc> {
        let bmc = self.bmc(id)?;
        if bmc.is_pod() {
            return Err(Error::PodDeleteRequiresWorkflow {
                pod: bmc.display_name(),
            });
        }
        self.remove_bmc_row(id)
    }

    /// Remove a pod row, bypassing the direct-delete guard
    pub(crate) fn remove_pod_unchecked(&mut self, id: BmcId) -> Result<Bmc> {
        self.pod(id)?;
        self.remove_bmc_row(id)
    }

    fn remove_bmc_row(&mut self, id: BmcId) -> Result<Bmc> {
        let bmc = self
            .bmcs
            .remove(&id)
            .ok_or_else(|| Error::not_found("BMC", id))?;
        self.routability.retain(|row| row.bmc_id != id);
        for machine in self.machines.values_mut() {
            if machine.bmc_id == Some(id) {
                machine.bmc_id = None;
            }
        }
        Ok(bmc)
    }

    // =========================================================================
    // Machines
    // =========================================================================

    pub fn new_node_id(&mut self) -> NodeId {
        NodeId(self.allocate_id())
    }

    pub fn machine(&self, id: NodeId) -> Result<&Machine> {
        self.machines
            .get(&id)
            .ok_or_else(|| Error::not_found("Machine", id))
    }

    pub fn machine_mut(&mut self, id: NodeId) -> Result<&mut Machine> {
        self.machines
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Machine", id))
    }

    pub fn machines(&self) -> impl Iterator<Item = &Machine> {
        self.machines.values()
    }

    /// Machines owned by `bmc`, in primary key order
    pub fn machines_of(&self, bmc: BmcId) -> impl Iterator<Item = &Machine> {
        self.machines
            .values()
            .filter(move |machine| machine.bmc_id == Some(bmc))
    }

    pub fn hostname_taken(&self, hostname: &str) -> bool {
        self.machines
            .values()
            .any(|machine| machine.hostname == hostname)
    }

    pub fn insert_machine(&mut self, machine: Machine) -> Result<NodeId> {
        if self.hostname_taken(&machine.hostname) {
            return Err(Error::field(
                "hostname",
                format!("Node with hostname \"{}\" already exists", machine.hostname),
            ));
        }
        let id = machine.id;
        self.machines.insert(id, machine);
        Ok(id)
    }

    /// Delete a machine together with its block devices and interfaces
    pub fn delete_machine(&mut self, id: NodeId) -> Result<Machine> {
        let machine = self
            .machines
            .remove(&id)
            .ok_or_else(|| Error::not_found("Machine", id))?;
        self.block_devices.retain(|_, device| device.node_id != id);
        self.interfaces.retain(|_, interface| interface.node_id != id);
        Ok(machine)
    }

    // =========================================================================
    // Block Devices
    // =========================================================================

    pub fn block_device(&self, id: BlockDeviceId) -> Result<&BlockDevice> {
        self.block_devices
            .get(&id)
            .ok_or_else(|| Error::not_found("BlockDevice", id))
    }

    pub fn block_device_mut(&mut self, id: BlockDeviceId) -> Result<&mut BlockDevice> {
        self.block_devices
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("BlockDevice", id))
    }

    pub fn block_devices(&self) -> impl Iterator<Item = &BlockDevice> {
        self.block_devices.values()
    }

    /// Block devices of `node`, in primary key order
    pub fn block_devices_of(&self, node: NodeId) -> impl Iterator<Item = &BlockDevice> {
        self.block_devices
            .values()
            .filter(move |device| device.node_id == node)
    }

    /// iSCSI device with `target` anywhere in the fleet
    pub fn iscsi_device(&self, target: &str) -> Option<&BlockDevice> {
        self.block_devices.values().find(|device| {
            matches!(&device.kind, BlockDeviceKind::Iscsi { target: t } if t == target)
        })
    }

    /// First `sdX` name not yet used on `node`
    pub fn next_block_device_name(&self, node: NodeId) -> String {
        let used: Vec<&str> = self
            .block_devices_of(node)
            .map(|device| device.name.as_str())
            .collect();
        (0..)
            .map(block_name_from_idx)
            .find(|name| !used.contains(&name.as_str()))
            .unwrap_or_default()
    }

    pub fn insert_block_device(
        &mut self,
        node: NodeId,
        name: String,
        kind: BlockDeviceKind,
        size: u64,
        block_size: u32,
        tags: Vec<String>,
    ) -> Result<BlockDeviceId> {
        self.machine(node)?;
        if size < MIN_BLOCK_DEVICE_SIZE {
            return Err(Error::field(
                "size",
                format!(
                    "Ensure this value is greater than or equal to {}.",
                    MIN_BLOCK_DEVICE_SIZE
                ),
            ));
        }
        if block_size < MIN_BLOCK_DEVICE_BLOCK_SIZE {
            return Err(Error::field(
                "block_size",
                format!(
                    "Ensure this value is greater than or equal to {}.",
                    MIN_BLOCK_DEVICE_BLOCK_SIZE
                ),
            ));
        }
        if self.block_devices_of(node).any(|device| device.name == name) {
            return Err(Error::field(
                "name",
                format!("Block device with name \"{}\" already exists on node {}", name, node),
            ));
        }
        if let BlockDeviceKind::Iscsi { target } = &kind {
            if self.iscsi_device(target).is_some() {
                return Err(Error::field(
                    "target",
                    format!("iSCSI block device with target \"{}\" already exists", target),
                ));
            }
        }
        let id = BlockDeviceId(self.allocate_id());
        self.block_devices.insert(
            id,
            BlockDevice {
                id,
                node_id: node,
                name,
                kind,
                size,
                block_size,
                tags,
            },
        );
        Ok(id)
    }

    pub fn delete_block_device(&mut self, id: BlockDeviceId) -> Result<BlockDevice> {
        self.block_devices
            .remove(&id)
            .ok_or_else(|| Error::not_found("BlockDevice", id))
    }

    // =========================================================================
    // Interfaces
    // =========================================================================

    pub fn interface(&self, id: InterfaceId) -> Result<&Interface> {
        self.interfaces
            .get(&id)
            .ok_or_else(|| Error::not_found("Interface", id))
    }

    pub fn interface_mut(&mut self, id: InterfaceId) -> Result<&mut Interface> {
        self.interfaces
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Interface", id))
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    /// Interfaces of `node`, in primary key order
    pub fn interfaces_of(&self, node: NodeId) -> impl Iterator<Item = &Interface> {
        self.interfaces
            .values()
            .filter(move |interface| interface.node_id == node)
    }

    pub fn interface_by_mac(&self, mac: &MacAddress) -> Option<&Interface> {
        self.interfaces
            .values()
            .find(|interface| &interface.mac_address == mac)
    }

    /// First `ethN` name not yet used on `node`
    pub fn next_interface_name(&self, node: NodeId) -> String {
        let used: Vec<&str> = self
            .interfaces_of(node)
            .map(|interface| interface.name.as_str())
            .collect();
        (0..)
            .map(|idx| format!("eth{}", idx))
            .find(|name| !used.contains(&name.as_str()))
            .unwrap_or_default()
    }

    pub fn insert_interface(
        &mut self,
        node: NodeId,
        name: String,
        mac_address: MacAddress,
        tags: Vec<String>,
    ) -> Result<InterfaceId> {
        self.machine(node)?;
        if self.interface_by_mac(&mac_address).is_some() {
            return Err(Error::field(
                "mac_address",
                format!("This MAC address is already in use: {}", mac_address),
            ));
        }
        let id = InterfaceId(self.allocate_id());
        self.interfaces.insert(
            id,
            Interface {
                id,
                node_id: node,
                name,
                mac_address,
                tags,
            },
        );
        Ok(id)
    }

    /// Delete an interface, clearing it as boot interface of its machine
    pub fn delete_interface(&mut self, id: InterfaceId) -> Result<Interface> {
        let interface = self
            .interfaces
            .remove(&id)
            .ok_or_else(|| Error::not_found("Interface", id))?;
        if let Some(machine) = self.machines.get_mut(&interface.node_id) {
            if machine.boot_interface_id == Some(id) {
                machine.boot_interface_id = None;
            }
        }
        Ok(interface)
    }

    // =========================================================================
    // Rack Controllers and Routability
    // =========================================================================

    pub fn upsert_rack(&mut self, rack: RackController) {
        self.racks.insert(rack.system_id.clone(), rack);
    }

    pub fn rack(&self, system_id: &str) -> Result<&RackController> {
        self.racks
            .get(system_id)
            .ok_or_else(|| Error::not_found("RackController", system_id))
    }

    /// Rack controllers, ordered by system ID
    pub fn racks(&self) -> impl Iterator<Item = &RackController> {
        self.racks.values()
    }

    pub fn routability_of(&self, bmc: BmcId) -> impl Iterator<Item = &RoutableRackRelationship> {
        self.routability.iter().filter(move |row| row.bmc_id == bmc)
    }

    /// Drop every relationship of `bmc` and record the given ones
    pub fn replace_routability(
        &mut self,
        bmc: BmcId,
        routable: &[String],
        non_routable: &[String],
    ) {
        self.routability.retain(|row| row.bmc_id != bmc);
        let now = Utc::now();
        let rows = routable
            .iter()
            .map(|rack| (rack, true))
            .chain(non_routable.iter().map(|rack| (rack, false)));
        for (rack, is_routable) in rows {
            if self
                .routability
                .iter()
                .any(|row| row.bmc_id == bmc && &row.rack_id == rack)
            {
                continue;
            }
            self.routability.push(RoutableRackRelationship {
                bmc_id: bmc,
                rack_id: rack.clone(),
                routable: is_routable,
                updated: now,
            });
        }
    }
}
