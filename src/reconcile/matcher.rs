//! Entity Matcher
//!
//! Pairs discovered block devices, interfaces and machines with persisted
//! records. Block devices have three disjoint key spaces:
//!
//! - `model/serial` for physical devices reporting both values
//! - the id path for any other physical device
//! - the normalized target for iSCSI devices
//!
//! Interfaces key on their lowercase MAC address, and a discovered machine
//! matches the first persisted machine owning one of its MACs.

use crate::domain::ports::{
    BlockDeviceType, DiscoveredBlockDevice, DiscoveredInterface, DiscoveredMachine,
};
use crate::error::{Error, Result};
use crate::model::storage::normalize_iscsi_target;
use crate::model::{BlockDevice, BlockDeviceKind, MacAddress, NodeId};
use crate::store::Tables;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

// =============================================================================
// Block Device Keys
// =============================================================================

/// Match key of a block device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockDeviceKey {
    ModelSerial(String),
    IdPath(String),
    IscsiTarget(String),
}

impl std::fmt::Display for BlockDeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockDeviceKey::ModelSerial(key) => write!(f, "{}", key),
            BlockDeviceKey::IdPath(path) => write!(f, "{}", path),
            BlockDeviceKey::IscsiTarget(target) => write!(f, "{}", target),
        }
    }
}

fn physical_key(model: &str, serial: &str, id_path: Option<&str>) -> BlockDeviceKey {
    if !model.is_empty() && !serial.is_empty() {
        BlockDeviceKey::ModelSerial(format!("{}/{}", model, serial))
    } else {
        BlockDeviceKey::IdPath(id_path.unwrap_or_default().to_string())
    }
}

/// Key of a discovered device; fails on an unknown device type
pub fn discovered_key(device: &DiscoveredBlockDevice) -> Result<BlockDeviceKey> {
    match &device.device_type {
        BlockDeviceType::Physical => Ok(physical_key(
            device.model.as_deref().unwrap_or_default(),
            device.serial.as_deref().unwrap_or_default(),
            device.id_path.as_deref(),
        )),
        BlockDeviceType::Iscsi => Ok(BlockDeviceKey::IscsiTarget(normalize_iscsi_target(
            device.iscsi_target.as_deref().unwrap_or_default(),
        ))),
        BlockDeviceType::Other(name) => Err(Error::UnknownBlockDeviceType {
            device_type: name.clone(),
        }),
    }
}

/// Key of a persisted device
pub fn persisted_key(device: &BlockDevice) -> BlockDeviceKey {
    match &device.kind {
        BlockDeviceKind::Physical {
            model,
            serial,
            id_path,
        } => physical_key(model, serial, id_path.as_deref()),
        BlockDeviceKind::Iscsi { target } => {
            BlockDeviceKey::IscsiTarget(normalize_iscsi_target(target))
        }
    }
}

/// Discovered devices of one machine, split by key space.
///
/// Each map keeps snapshot order so leftover devices are created in a
/// stable order: model/serial first, then id path, then iSCSI.
#[derive(Debug, Default)]
pub struct BlockDeviceMaps<'a> {
    model: IndexMap<String, &'a DiscoveredBlockDevice>,
    path: IndexMap<String, &'a DiscoveredBlockDevice>,
    iscsi: IndexMap<String, &'a DiscoveredBlockDevice>,
}

impl<'a> BlockDeviceMaps<'a> {
    /// Index `devices`, rejecting unknown types and repeated keys
    pub fn build(devices: &'a [DiscoveredBlockDevice]) -> Result<Self> {
        let mut maps = Self::default();
        for device in devices {
            let key = discovered_key(device)?;
            let (map, raw) = maps.slot(&key);
            if map.insert(raw.to_string(), device).is_some() {
                return Err(Error::DuplicateMatchKey {
                    entity: "block devices".to_string(),
                    key: key.to_string(),
                });
            }
        }
        Ok(maps)
    }

    fn slot<'k>(
        &mut self,
        key: &'k BlockDeviceKey,
    ) -> (&mut IndexMap<String, &'a DiscoveredBlockDevice>, &'k str) {
        match key {
            BlockDeviceKey::ModelSerial(raw) => (&mut self.model, raw),
            BlockDeviceKey::IdPath(raw) => (&mut self.path, raw),
            BlockDeviceKey::IscsiTarget(raw) => (&mut self.iscsi, raw),
        }
    }

    /// Remove and return the discovered device matching `key`
    pub fn take(&mut self, key: &BlockDeviceKey) -> Option<&'a DiscoveredBlockDevice> {
        let (map, raw) = self.slot(key);
        map.shift_remove(raw)
    }

    pub fn len(&self) -> usize {
        self.model.len() + self.path.len() + self.iscsi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unmatched devices in creation order
    pub fn into_remaining(self) -> impl Iterator<Item = &'a DiscoveredBlockDevice> {
        self.model
            .into_values()
            .chain(self.path.into_values())
            .chain(self.iscsi.into_values())
    }
}

// =============================================================================
// Interfaces
// =============================================================================

/// Discovered interfaces of one machine keyed by MAC, in snapshot order
pub fn interface_map(
    interfaces: &[DiscoveredInterface],
) -> Result<IndexMap<MacAddress, &DiscoveredInterface>> {
    let mut map = IndexMap::with_capacity(interfaces.len());
    for interface in interfaces {
        let mac = MacAddress::parse(&interface.mac_address)?;
        if map.contains_key(&mac) {
            return Err(Error::DuplicateMatchKey {
                entity: "interfaces".to_string(),
                key: mac.to_string(),
            });
        }
        map.insert(mac, interface);
    }
    Ok(map)
}

// =============================================================================
// Machines
// =============================================================================

/// Persisted machines owning any MAC reported in `machines`
pub fn mac_machine_map(
    tables: &Tables,
    machines: &[DiscoveredMachine],
) -> Result<HashMap<MacAddress, NodeId>> {
    let mut snapshot_macs = HashSet::new();
    for machine in machines {
        for interface in &machine.interfaces {
            snapshot_macs.insert(MacAddress::parse(&interface.mac_address)?);
        }
    }
    Ok(tables
        .interfaces()
        .filter(|interface| snapshot_macs.contains(&interface.mac_address))
        .map(|interface| (interface.mac_address.clone(), interface.node_id))
        .collect())
}

/// First persisted machine owning one of the discovered machine's MACs
pub fn find_existing_machine(
    discovered: &DiscoveredMachine,
    mac_map: &HashMap<MacAddress, NodeId>,
) -> Option<NodeId> {
    discovered
        .interfaces
        .iter()
        .filter_map(|interface| MacAddress::parse(&interface.mac_address).ok())
        .find_map(|mac| mac_map.get(&mac).copied())
}
