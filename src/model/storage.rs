//! Block devices attached to machines

use super::{BlockDeviceId, NodeId};
use serde::{Deserialize, Serialize};

/// Smallest block device accepted (4 MiB)
pub const MIN_BLOCK_DEVICE_SIZE: u64 = 4 * 1024 * 1024;

/// Smallest block size accepted
pub const MIN_BLOCK_DEVICE_BLOCK_SIZE: u32 = 512;

/// Identity of a block device; determines which match keys apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockDeviceKind {
    Physical {
        model: String,
        serial: String,
        id_path: Option<String>,
    },
    Iscsi {
        /// Always stored with the `iscsi:` prefix
        target: String,
    },
}

/// Persisted block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub id: BlockDeviceId,
    pub node_id: NodeId,
    pub name: String,
    pub kind: BlockDeviceKind,
    /// Bytes
    pub size: u64,
    pub block_size: u32,
    pub tags: Vec<String>,
}

impl BlockDevice {
    pub fn is_physical(&self) -> bool {
        matches!(self.kind, BlockDeviceKind::Physical { .. })
    }

    pub fn is_iscsi(&self) -> bool {
        matches!(self.kind, BlockDeviceKind::Iscsi { .. })
    }
}

/// Prefix `target` with `iscsi:` unless already present
pub fn normalize_iscsi_target(target: &str) -> String {
    if target.starts_with("iscsi:") {
        target.to_string()
    } else {
        format!("iscsi:{}", target)
    }
}

/// Kernel-style device name for a zero-based index: `sda`, ..., `sdz`, `sdaa`
pub fn block_name_from_idx(idx: usize) -> String {
    let mut letters = Vec::new();
    let mut n = idx + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'a' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.reverse();
    format!("sd{}", letters.into_iter().collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_name_from_idx() {
        assert_eq!(block_name_from_idx(0), "sda");
        assert_eq!(block_name_from_idx(25), "sdz");
        assert_eq!(block_name_from_idx(26), "sdaa");
        assert_eq!(block_name_from_idx(27), "sdab");
        assert_eq!(block_name_from_idx(701), "sdzz");
        assert_eq!(block_name_from_idx(702), "sdaaa");
    }

    #[test]
    fn test_normalize_iscsi_target() {
        assert_eq!(
            normalize_iscsi_target("10.0.0.5::::iqn.2004-05.com.ubuntu:target"),
            "iscsi:10.0.0.5::::iqn.2004-05.com.ubuntu:target"
        );
        assert_eq!(normalize_iscsi_target("iscsi:host::::iqn"), "iscsi:host::::iqn");
    }
}
