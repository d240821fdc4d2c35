//! Built-in driver schemas

use super::{patterns, FieldType, IpExtractor, PowerDriver, SettingField, SettingScope};
use crate::error::Result;

/// Driver described entirely by data
#[derive(Debug, Clone)]
pub struct SchemaDriver {
    pub name: String,
    pub description: String,
    pub pod: bool,
    pub settings: Vec<SettingField>,
    pub ip_extractor: Option<IpExtractor>,
}

impl PowerDriver for SchemaDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_pod_driver(&self) -> bool {
        self.pod
    }

    fn settings(&self) -> &[SettingField] {
        &self.settings
    }

    fn ip_extractor(&self) -> Option<&IpExtractor> {
        self.ip_extractor.as_ref()
    }
}

pub fn virsh() -> Result<SchemaDriver> {
    Ok(SchemaDriver {
        name: "virsh".into(),
        description: "Virsh (virtual systems)".into(),
        pod: true,
        settings: vec![
            SettingField::new("power_address", "Virsh address").required(),
            SettingField::new("power_pass", "Virsh password (optional)")
                .field_type(FieldType::Password),
            SettingField::new("power_id", "Virsh VM ID")
                .scope(SettingScope::Node)
                .required(),
            SettingField::new("default_storage_pool", "Default storage pool (optional)"),
        ],
        ip_extractor: Some(IpExtractor::new("power_address", patterns::URL)?),
    })
}

pub fn rsd() -> Result<SchemaDriver> {
    Ok(SchemaDriver {
        name: "rsd".into(),
        description: "Rack Scale Design".into(),
        pod: true,
        settings: vec![
            SettingField::new("power_address", "Pod address").required(),
            SettingField::new("power_user", "Pod user").required(),
            SettingField::new("power_pass", "Pod password")
                .field_type(FieldType::Password)
                .required(),
            SettingField::new("node_id", "Node ID")
                .scope(SettingScope::Node)
                .required(),
        ],
        ip_extractor: Some(IpExtractor::new("power_address", patterns::URL)?),
    })
}

pub fn ipmi() -> Result<SchemaDriver> {
    Ok(SchemaDriver {
        name: "ipmi".into(),
        description: "IPMI".into(),
        pod: false,
        settings: vec![
            SettingField::new("power_driver", "Power driver")
                .field_type(FieldType::Choice {
                    choices: vec!["LAN".into(), "LAN_2_0".into()],
                })
                .default_value("LAN_2_0")
                .required(),
            SettingField::new("power_address", "IP address").required(),
            SettingField::new("power_user", "Power user"),
            SettingField::new("power_pass", "Power password").field_type(FieldType::Password),
            SettingField::new("mac_address", "Power MAC")
                .scope(SettingScope::Node)
                .field_type(FieldType::MacAddress),
        ],
        ip_extractor: Some(IpExtractor::new("power_address", patterns::IDENTITY)?),
    })
}

pub fn manual() -> SchemaDriver {
    SchemaDriver {
        name: "manual".into(),
        description: "Manual".into(),
        pod: false,
        settings: Vec::new(),
        ip_extractor: None,
    }
}

/// Every built-in driver
pub fn builtin() -> Result<Vec<SchemaDriver>> {
    Ok(vec![virsh()?, rsd()?, ipmi()?, manual()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_drivers() {
        let drivers = builtin().unwrap();
        let names: Vec<_> = drivers.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["virsh", "rsd", "ipmi", "manual"]);

        let virsh = &drivers[0];
        assert!(virsh.is_pod_driver());
        assert_eq!(
            virsh.get_setting("power_id").unwrap().scope,
            SettingScope::Node
        );
        assert!(!drivers[2].is_pod_driver());
    }
}
