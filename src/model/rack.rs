//! Rack controllers and their reachability to BMCs

use super::BmcId;
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Rack controller able to run power and pod drivers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RackController {
    pub system_id: String,
    pub hostname: String,
    /// Subnets the rack has an interface on
    #[serde(default)]
    pub subnets: Vec<IpNetwork>,
}

impl RackController {
    /// Whether the rack shares a layer-2 subnet with `ip`
    pub fn on_same_subnet(&self, ip: IpAddr) -> bool {
        self.subnets.iter().any(|subnet| subnet.contains(ip))
    }
}

/// Whether a rack controller could reach a BMC at the last check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutableRackRelationship {
    pub bmc_id: BmcId,
    pub rack_id: String,
    pub routable: bool,
    pub updated: DateTime<Utc>,
}
