//! Data Model
//!
//! Persisted entities of the control plane: BMCs and pods, machines, their
//! block devices and interfaces, resource pools, zones and rack controllers.

pub mod bmc;
pub mod interface;
pub mod names;
pub mod node;
pub mod pool;
pub mod rack;
pub mod storage;

pub use bmc::{Bmc, BmcType, PodHints, PodView, PodViewMut};
pub use interface::{Interface, MacAddress};
pub use node::{is_valid_hostname, CreationType, Machine, NodeStatus};
pub use pool::{ResourcePool, Zone};
pub use rack::{RackController, RoutableRackRelationship};
pub use storage::{BlockDevice, BlockDeviceKind};

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Primary key of a BMC row (plain BMC or pod)
    BmcId
);
define_id!(
    /// Primary key of a machine
    NodeId
);
define_id!(
    /// Primary key of a block device
    BlockDeviceId
);
define_id!(
    /// Primary key of a network interface
    InterfaceId
);
define_id!(
    /// Primary key of a resource pool
    PoolId
);
define_id!(
    /// Primary key of a zone
    ZoneId
);
