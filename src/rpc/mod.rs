//! Rack Controller RPC
//!
//! Tracks the rack controllers with a live connection and wraps the pod
//! driver calls made through them.

pub mod pods;

pub use pods::{compose_machine, decompose_machine, discover_pod, DiscoveryOutcome};

use crate::domain::ports::{ClientResolver, RackClientRef};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Live rack controller connections keyed by system ID
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, RackClientRef>,
}

impl ClientRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a live connection, replacing any previous one for the rack
    pub fn register(&self, client: RackClientRef) {
        let ident = client.ident().to_string();
        info!("Rack controller {} connected", ident);
        self.clients.insert(ident, client);
    }

    /// Drop the connection of `ident`; returns whether it was connected
    pub fn unregister(&self, ident: &str) -> bool {
        let removed = self.clients.remove(ident).is_some();
        if removed {
            info!("Rack controller {} disconnected", ident);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl ClientResolver for ClientRegistry {
    fn connected_identifiers(&self) -> Vec<String> {
        let mut idents: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        idents.sort();
        idents
    }

    fn all_clients(&self) -> Vec<RackClientRef> {
        self.connected_identifiers()
            .into_iter()
            .filter_map(|ident| self.clients.get(&ident).map(|e| e.value().clone()))
            .collect()
    }

    async fn get_client(&self, identifiers: &[String]) -> Option<RackClientRef> {
        let client = identifiers
            .iter()
            .find_map(|ident| self.clients.get(ident).map(|e| e.value().clone()));
        if client.is_none() {
            debug!("None of {:?} has a live connection", identifiers);
        }
        client
    }
}
