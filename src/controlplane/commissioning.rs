//! Commissioning Adapter
//!
//! Moves newly enlisted machines into the Commissioning state. Running the
//! commissioning scripts themselves belongs to a separate service.

use crate::domain::ports::CommissioningScheduler;
use crate::error::Result;
use crate::model::{Machine, NodeStatus};
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Marks machines as commissioning in the store
pub struct StoreCommissioning {
    store: Arc<Store>,
}

impl StoreCommissioning {
    pub fn new(store: Arc<Store>) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

#[async_trait]
impl CommissioningScheduler for StoreCommissioning {
    async fn start_commissioning(&self, machine: &Machine, user: &str) -> Result<()> {
        let node = machine.id;
        self.store
            .defer(move |tables| {
                tables
                    .machine_mut(node)?
                    .transition(NodeStatus::Commissioning)
            })
            .await?;
        info!("{}: commissioning started by {}", machine.hostname, user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_commissioning() {
        let store = Store::new();
        let machine = store
            .transaction(|tables| {
                let node = tables.new_node_id();
                tables.insert_machine(Machine::new(node, "vm-one", "amd64/generic"))?;
                Ok(tables.machine(node)?.clone())
            })
            .unwrap();

        let scheduler = StoreCommissioning::new(Arc::clone(&store));
        scheduler.start_commissioning(&machine, "admin").await.unwrap();
        let status = store.read(|tables| tables.machine(machine.id).map(|m| m.status));
        assert_eq!(status.unwrap(), NodeStatus::Commissioning);

        // Commissioning is not a valid transition from Commissioning
        assert!(scheduler
            .start_commissioning(&machine, "admin")
            .await
            .is_err());
    }
}
