//! Power Driver Registry
//!
//! Parameter schemas of the power and pod drivers known to the control
//! plane. The registry is injected wherever power parameters are split or
//! validated so tests can substitute their own drivers.

pub mod drivers;

use crate::domain::ports::PowerParameters;
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// Setting Schema
// =============================================================================

/// Which record a power parameter is stored on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingScope {
    /// Shared by every machine behind the BMC
    Bmc,
    /// Specific to one machine
    Node,
}

/// Input type of a setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Password,
    MacAddress,
    Choice { choices: Vec<String> },
}

/// One parameter of a driver's schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingField {
    pub name: String,
    pub label: String,
    pub required: bool,
    pub scope: SettingScope,
    pub field_type: FieldType,
    pub default: Option<String>,
}

impl SettingField {
    /// Optional BMC-scoped string setting
    pub fn new(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            required: false,
            scope: SettingScope::Bmc,
            field_type: FieldType::String,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn scope(mut self, scope: SettingScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn field_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }
}

/// Where to find a driver's address among its parameters
#[derive(Debug, Clone)]
pub struct IpExtractor {
    pub field_name: String,
    /// Must define an `address` capture group
    pub pattern: Regex,
}

impl IpExtractor {
    pub fn new(field_name: &str, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::Configuration(format!("invalid IP extractor pattern: {}", e)))?;
        Ok(Self {
            field_name: field_name.to_string(),
            pattern,
        })
    }

    /// Address portion of `value`, with IPv6 brackets removed
    pub fn extract<'v>(&self, value: &'v str) -> Option<&'v str> {
        let address = self.pattern.captures(value)?.name("address")?.as_str();
        Some(
            address
                .strip_prefix('[')
                .and_then(|inner| inner.strip_suffix(']'))
                .unwrap_or(address),
        )
    }
}

/// Patterns for common parameter shapes
pub mod patterns {
    /// The whole value is the address
    pub const IDENTITY: &str = r"^(?P<address>.+?)$";
    /// Host part of a URL such as `qemu+ssh://user@10.0.0.2/system`
    pub const URL: &str =
        r"^(?:[a-zA-Z][a-zA-Z0-9+.-]*://)?(?:[^@/]*@)?(?P<address>\[[0-9a-fA-F:.]+\]|[^:/?#\[\]]+)";
}

// =============================================================================
// Driver Trait
// =============================================================================

/// Parameter schema of a power or pod driver
pub trait PowerDriver: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether the driver manages pods rather than single machines
    fn is_pod_driver(&self) -> bool;

    fn settings(&self) -> &[SettingField];

    fn ip_extractor(&self) -> Option<&IpExtractor>;

    fn get_setting(&self, name: &str) -> Option<&SettingField> {
        self.settings().iter().find(|field| field.name == name)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Drivers by power type
#[derive(Clone, Default)]
pub struct PowerDriverRegistry {
    drivers: BTreeMap<String, Arc<dyn PowerDriver>>,
}

pub type PowerDriverRegistryRef = Arc<PowerDriverRegistry>;

impl std::fmt::Debug for PowerDriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerDriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PowerDriverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `virsh`, `rsd`, `ipmi` and `manual` drivers
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new();
        for driver in drivers::builtin()? {
            registry.register(Arc::new(driver));
        }
        Ok(registry)
    }

    pub fn register(&mut self, driver: Arc<dyn PowerDriver>) {
        self.drivers.insert(driver.name().to_string(), driver);
    }

    pub fn get(&self, power_type: &str) -> Option<&Arc<dyn PowerDriver>> {
        self.drivers.get(power_type)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    /// Split `parameters` into BMC-wide and node-specific sets.
    ///
    /// Without a known driver or schema every parameter is node-specific.
    pub fn scope_power_parameters(
        &self,
        power_type: &str,
        parameters: &PowerParameters,
    ) -> (PowerParameters, PowerParameters) {
        let Some(driver) = self.get(power_type).filter(|d| !d.settings().is_empty()) else {
            return (PowerParameters::new(), parameters.clone());
        };
        parameters
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .partition(|(name, _)| {
                driver
                    .get_setting(name)
                    .map_or(false, |field| field.scope == SettingScope::Bmc)
            })
    }

    /// Address of the BMC described by `parameters`, if the driver declares
    /// where to find it and it is an IP address
    pub fn extract_ip_address(
        &self,
        power_type: &str,
        parameters: &PowerParameters,
    ) -> Option<IpAddr> {
        if parameters.is_empty() {
            return None;
        }
        let Some(driver) = self.get(power_type) else {
            warn!("No power driver for power type {}", power_type);
            return None;
        };
        let Some(extractor) = driver.ip_extractor() else {
            debug!(
                "No IP extractor configured for power type {}. IP will not be extracted.",
                power_type
            );
            return None;
        };
        let value = parameters
            .get(&extractor.field_name)
            .filter(|value| !value.is_empty())?;
        let address = extractor.extract(value)?;
        match address.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                debug!("Extracted address {} is not an IP address", address);
                None
            }
        }
    }

    /// Check `power_type` is known and every required setting of `scope`
    /// is present
    pub fn validate(
        &self,
        power_type: &str,
        parameters: &PowerParameters,
        scope: SettingScope,
    ) -> Result<()> {
        let driver = self.get(power_type).ok_or_else(|| {
            Error::field(
                "type",
                format!(
                    "Select a valid choice. {} is not one of the available choices.",
                    power_type
                ),
            )
        })?;
        for field in driver.settings().iter().filter(|field| field.scope == scope) {
            let present = parameters
                .get(&field.name)
                .map_or(false, |value| !value.is_empty());
            if field.required && !present {
                return Err(Error::field(&field.name, "This field is required."));
            }
            if let (FieldType::Choice { choices }, Some(value)) =
                (&field.field_type, parameters.get(&field.name))
            {
                if !choices.contains(value) {
                    return Err(Error::field(
                        &field.name,
                        format!(
                            "Select a valid choice. {} is not one of the available choices.",
                            value
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
