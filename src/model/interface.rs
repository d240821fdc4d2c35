//! Physical network interfaces attached to machines

use super::{InterfaceId, NodeId};
use crate::error::{Error, Result};
use macaddr::MacAddr6;
use serde::{Deserialize, Serialize};

/// MAC address. Displays lowercase and colon separated, which is the form
/// used as a match key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(MacAddr6);

impl MacAddress {
    /// Parse `value`, accepting `:` or `-` separators in any case
    pub fn parse(value: &str) -> Result<Self> {
        value.trim().parse::<MacAddr6>().map(Self).map_err(|_| {
            Error::field(
                "mac_address",
                format!("'{}' is not a valid MAC address.", value),
            )
        })
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0.into_array()
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string().to_ascii_lowercase())
    }
}

impl TryFrom<String> for MacAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.to_string()
    }
}

/// Persisted physical interface. MAC addresses are unique fleet-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub id: InterfaceId,
    pub node_id: NodeId,
    pub name: String,
    pub mac_address: MacAddress,
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_normalization() {
        let mac = MacAddress::parse("52-54-00-AB-cd-01").unwrap();
        assert_eq!(mac.to_string(), "52:54:00:ab:cd:01");
        assert_eq!(mac, MacAddress::parse("52:54:00:ab:CD:01").unwrap());
        assert_eq!(mac.octets(), [0x52, 0x54, 0x00, 0xab, 0xcd, 0x01]);
    }

    #[test]
    fn test_invalid_mac() {
        assert!(MacAddress::parse("52:54:00:ab:cd").is_err());
        assert!(MacAddress::parse("52:54:00:ab:cd:zz").is_err());
        assert!(MacAddress::parse("").is_err());
    }

    #[test]
    fn test_mac_serde_uses_lowercase_form() {
        let mac: MacAddress = serde_json::from_str("\"52:54:00:AB:CD:EF\"").unwrap();
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"52:54:00:ab:cd:ef\"");
        assert!(serde_json::from_str::<MacAddress>("\"not-a-mac\"").is_err());
    }
}
