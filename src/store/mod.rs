//! Transactional Store
//!
//! In-memory relational store backing the control plane. A transaction runs
//! against a private copy of the tables and is committed by swapping the
//! copy in only when the closure succeeds, so a failed sync leaves no trace.
//!
//! Async callers reach the store through [`Store::defer`], which runs the
//! transaction on the blocking worker pool.

mod tables;

pub use tables::Tables;

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared handle to the tables
#[derive(Debug)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    /// Create a store with the default pool and zone names
    pub fn new() -> Arc<Self> {
        Self::with_tables(Tables::default())
    }

    /// Create a store seeded with `tables`
    pub fn with_tables(tables: Tables) -> Arc<Self> {
        Arc::new(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Run a read-only query against a consistent snapshot
    pub fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        f(&self.tables.read())
    }

    /// Run `f` atomically. Changes are discarded when `f` fails.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut committed = self.tables.write();
        let mut working = committed.clone();
        let output = f(&mut working)?;
        *committed = working;
        Ok(output)
    }

    /// Run a transaction on the blocking worker pool
    pub async fn defer<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.transaction(f))
            .await
            .map_err(|e| Error::Internal(format!("database worker failed: {}", e)))?
    }

    /// Run a read-only query on the blocking worker pool
    pub async fn defer_read<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.read(f))
            .await
            .map_err(|e| Error::Internal(format!("database worker failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Machine;

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = Store::new();
        let result: Result<()> = store.transaction(|tables| {
            let id = tables.new_node_id();
            tables.insert_machine(Machine::new(id, "node-a", "amd64/generic"))?;
            Err(Error::Internal("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.read(|tables| tables.machines().count()), 0);
    }

    #[test]
    fn test_transaction_commits_on_success() {
        let store = Store::new();
        store
            .transaction(|tables| {
                let id = tables.new_node_id();
                tables.insert_machine(Machine::new(id, "node-a", "amd64/generic"))
            })
            .unwrap();
        assert!(store.read(|tables| tables.hostname_taken("node-a")));
    }

    #[tokio::test]
    async fn test_defer_runs_on_worker() {
        let store = Store::new();
        let id = store
            .defer(|tables| {
                let id = tables.new_node_id();
                tables.insert_machine(Machine::new(id, "node-b", "amd64/generic"))
            })
            .await
            .unwrap();
        let hostname = store
            .defer_read(move |tables| Ok(tables.machine(id)?.hostname.clone()))
            .await
            .unwrap();
        assert_eq!(hostname, "node-b");
    }
}
