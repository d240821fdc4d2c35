//! Rack Backends
//!
//! Sources of rack controller connections:
//! - Simulated: in-memory racks and pods loaded from a YAML inventory

pub mod simulated;

pub use simulated::*;

use crate::error::{Error, Result};
use crate::model::RackController;
use crate::rpc::ClientRegistry;
use std::path::PathBuf;
use std::sync::Arc;

/// Connected rack clients plus the rack records to store
pub struct ConnectedBackend {
    pub registry: Arc<ClientRegistry>,
    pub racks: Vec<RackController>,
    pub pods: Vec<Arc<SimulatedPod>>,
}

/// Combined backend configuration
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Inventory for the simulated backend; empty when unset
    pub inventory: Option<PathBuf>,
}

/// Factory for rack backends
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend by name and connect its racks
    pub fn create(name: &str, config: &BackendConfig) -> Result<ConnectedBackend> {
        match name.to_lowercase().as_str() {
            "simulated" | "sim" => {
                let inventory = match &config.inventory {
                    Some(path) => SimulatedInventory::load(path)?,
                    None => SimulatedInventory::default(),
                };
                let fleet = inventory.build();
                let registry = ClientRegistry::new();
                for client in fleet.clients {
                    registry.register(client);
                }
                Ok(ConnectedBackend {
                    registry,
                    racks: fleet.racks,
                    pods: fleet.pods,
                })
            }
            _ => Err(Error::Configuration(format!(
                "Unknown rack backend: {}",
                name
            ))),
        }
    }
}
