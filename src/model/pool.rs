//! Resource pools and zones

use super::{PoolId, ZoneId};
use serde::{Deserialize, Serialize};

/// Name of the pool every pod and machine falls back to
pub const DEFAULT_POOL_NAME: &str = "default";

/// Name of the zone every pod and machine falls back to
pub const DEFAULT_ZONE_NAME: &str = "default";

/// Group of machines allocatable together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub id: PoolId,
    pub name: String,
    pub description: String,
}

/// Physical failure domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub description: String,
}
