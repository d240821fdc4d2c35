//! BMC and Pod records
//!
//! A single tagged record covers both plain BMCs (the power controller of one
//! machine) and pods (a controller hosting many composable machines). Callers
//! never mutate pod-only fields through the plain record: they go through the
//! typed [`PodView`] / [`PodViewMut`] views returned by [`Bmc::as_pod`] and
//! [`Bmc::as_pod_mut`].

use super::{BmcId, PoolId, ZoneId};
use crate::domain::ports::{Capability, DiscoveredPod, DiscoveredPodHints, PowerParameters};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::ops::Deref;

/// Discriminant of a BMC row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BmcType {
    Bmc,
    Pod,
}

// =============================================================================
// Pod Hints
// =============================================================================

/// Last reported spare capacity of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodHints {
    pub cores: u32,
    pub cpu_speed: u32,
    pub memory: u64,
    pub local_storage: u64,
    pub local_disks: i64,
    pub iscsi_storage: i64,
}

impl Default for PodHints {
    fn default() -> Self {
        DiscoveredPodHints::default().into()
    }
}

impl From<DiscoveredPodHints> for PodHints {
    fn from(hints: DiscoveredPodHints) -> Self {
        Self {
            cores: hints.cores,
            cpu_speed: hints.cpu_speed,
            memory: hints.memory,
            local_storage: hints.local_storage,
            local_disks: hints.local_disks,
            iscsi_storage: hints.iscsi_storage,
        }
    }
}

// =============================================================================
// BMC Record
// =============================================================================

/// Persisted BMC row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bmc {
    pub id: BmcId,
    pub bmc_type: BmcType,
    /// Display name; empty for plain BMCs
    pub name: String,
    pub power_type: String,
    /// BMC-scoped power parameters
    pub power_parameters: PowerParameters,
    pub ip_address: Option<IpAddr>,

    // Pod-only fields. Kept at their defaults on plain BMCs.
    pub architectures: Vec<String>,
    pub capabilities: Vec<Capability>,
    pub cores: u32,
    pub cpu_speed: u32,
    pub memory: u64,
    pub local_storage: u64,
    pub local_disks: i64,
    pub iscsi_storage: i64,
    pub pool_id: Option<PoolId>,
    pub zone_id: Option<ZoneId>,
    pub tags: Vec<String>,
    pub cpu_over_commit_ratio: f64,
    pub memory_over_commit_ratio: f64,
    pub hints: PodHints,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bmc {
    /// Create a plain BMC record
    pub fn new_bmc(
        id: BmcId,
        power_type: impl Into<String>,
        power_parameters: PowerParameters,
        ip_address: Option<IpAddr>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            bmc_type: BmcType::Bmc,
            name: String::new(),
            power_type: power_type.into(),
            power_parameters,
            ip_address,
            architectures: Vec::new(),
            capabilities: Vec::new(),
            cores: 0,
            cpu_speed: 0,
            memory: 0,
            local_storage: 0,
            local_disks: -1,
            iscsi_storage: -1,
            pool_id: None,
            zone_id: None,
            tags: Vec::new(),
            cpu_over_commit_ratio: 1.0,
            memory_over_commit_ratio: 1.0,
            hints: PodHints::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a pod record placed in `pool` and `zone`
    pub fn new_pod(
        id: BmcId,
        name: impl Into<String>,
        power_type: impl Into<String>,
        power_parameters: PowerParameters,
        ip_address: Option<IpAddr>,
        pool: PoolId,
        zone: ZoneId,
    ) -> Self {
        let mut bmc = Self::new_bmc(id, power_type, power_parameters, ip_address);
        bmc.name = name.into();
        bmc.convert_to_pod(pool, zone);
        bmc
    }

    /// Whether this row is a pod
    pub fn is_pod(&self) -> bool {
        self.bmc_type == BmcType::Pod
    }

    /// Name used in log lines
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("bmc-{}", self.id)
        } else {
            self.name.clone()
        }
    }

    /// Every row can be treated as a BMC
    pub fn as_bmc(&self) -> &Self {
        self
    }

    /// Typed pod view, `None` for plain BMCs
    pub fn as_pod(&self) -> Option<PodView<'_>> {
        self.is_pod().then_some(PodView { bmc: self })
    }

    /// Mutable pod view, `None` for plain BMCs
    pub fn as_pod_mut(&mut self) -> Option<PodViewMut<'_>> {
        if self.is_pod() {
            Some(PodViewMut { bmc: self })
        } else {
            None
        }
    }

    /// Take over a plain BMC row as a pod. Pool and zone are only assigned
    /// when not already set.
    pub fn convert_to_pod(&mut self, pool: PoolId, zone: ZoneId) {
        self.bmc_type = BmcType::Pod;
        self.pool_id.get_or_insert(pool);
        self.zone_id.get_or_insert(zone);
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Pod Views
// =============================================================================

/// Read-only pod view over a [`Bmc`] row
#[derive(Debug, Clone, Copy)]
pub struct PodView<'a> {
    bmc: &'a Bmc,
}

impl<'a> Deref for PodView<'a> {
    type Target = Bmc;

    fn deref(&self) -> &Self::Target {
        self.bmc
    }
}

impl<'a> PodView<'a> {
    /// Whether the pod advertises `capability`
    pub fn supports(&self, capability: Capability) -> bool {
        self.bmc.capabilities.contains(&capability)
    }

    /// Pool of the pod. Pods are always placed in a pool.
    pub fn pool(&self) -> Result<PoolId> {
        self.bmc
            .pool_id
            .ok_or_else(|| Error::Internal(format!("pod {} has no resource pool", self.bmc.id)))
    }

    /// Zone of the pod
    pub fn zone(&self) -> Result<ZoneId> {
        self.bmc
            .zone_id
            .ok_or_else(|| Error::Internal(format!("pod {} has no zone", self.bmc.id)))
    }

    /// The underlying row
    pub fn record(&self) -> &'a Bmc {
        self.bmc
    }
}

/// Mutable pod view over a [`Bmc`] row
#[derive(Debug)]
pub struct PodViewMut<'a> {
    bmc: &'a mut Bmc,
}

impl<'a> Deref for PodViewMut<'a> {
    type Target = Bmc;

    fn deref(&self) -> &Self::Target {
        self.bmc
    }
}

impl<'a> PodViewMut<'a> {
    /// Overwrite the discovered totals and union in the discovered tags
    pub fn merge_discovered(&mut self, discovered: &DiscoveredPod) {
        let bmc = &mut *self.bmc;
        bmc.architectures = discovered.architectures.clone();
        bmc.capabilities = discovered.capabilities.clone();
        bmc.cores = discovered.cores;
        bmc.cpu_speed = discovered.cpu_speed;
        bmc.memory = discovered.memory;
        bmc.local_storage = discovered.local_storage;
        bmc.local_disks = discovered.local_disks;
        bmc.iscsi_storage = discovered.iscsi_storage;
        for tag in &discovered.tags {
            if !bmc.tags.contains(tag) {
                bmc.tags.push(tag.clone());
            }
        }
        bmc.updated_at = Utc::now();
    }

    /// Replace the spare capacity hints
    pub fn set_hints(&mut self, hints: DiscoveredPodHints) {
        self.bmc.hints = hints.into();
        self.bmc.updated_at = Utc::now();
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.bmc.name = name.into();
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.bmc.tags = tags;
    }

    pub fn set_pool(&mut self, pool: PoolId) {
        self.bmc.pool_id = Some(pool);
    }

    pub fn set_zone(&mut self, zone: ZoneId) {
        self.bmc.zone_id = Some(zone);
    }

    /// Set the over-commit ratios; both must be non-negative
    pub fn set_over_commit_ratios(&mut self, cpu: f64, memory: f64) -> Result<()> {
        if !(cpu >= 0.0) {
            return Err(Error::field(
                "cpu_over_commit_ratio",
                "Ensure this value is greater than or equal to 0.",
            ));
        }
        if !(memory >= 0.0) {
            return Err(Error::field(
                "memory_over_commit_ratio",
                "Ensure this value is greater than or equal to 0.",
            ));
        }
        self.bmc.cpu_over_commit_ratio = cpu;
        self.bmc.memory_over_commit_ratio = memory;
        Ok(())
    }

    /// Replace the BMC-scoped power parameters and address
    pub fn set_power(&mut self, parameters: PowerParameters, ip_address: Option<IpAddr>) {
        self.bmc.power_parameters = parameters;
        self.bmc.ip_address = ip_address;
    }
}
