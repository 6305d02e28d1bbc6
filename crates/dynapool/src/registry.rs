//! Process-wide pool registry
//!
//! Maps pool names to live adapters. Reconfiguration and monitoring find
//! pools here; the lock only guards the map, never the adapters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::adapter::PoolAdapter;

/// Registry of live pool adapters keyed by name
#[derive(Default)]
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<dyn PoolAdapter>>>,
}

impl PoolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under `name`
    ///
    /// Fails with [`RegistryError::DuplicateName`] if the name is taken; the
    /// existing entry is left in place.
    pub fn register(
        &self,
        name: impl Into<String>,
        adapter: Arc<dyn PoolAdapter>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut pools = self.pools.write();
        if pools.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        info!(pool = %name, "Registered pool");
        pools.insert(name, adapter);
        Ok(())
    }

    /// Register an adapter under its own name
    pub fn register_adapter(&self, adapter: Arc<dyn PoolAdapter>) -> Result<(), RegistryError> {
        let name = adapter.name().to_string();
        self.register(name, adapter)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn PoolAdapter>> {
        self.pools.read().get(name).cloned()
    }

    /// Like [`lookup`](Self::lookup) but failing with [`RegistryError::NotFound`]
    pub fn get(&self, name: &str) -> Result<Arc<dyn PoolAdapter>, RegistryError> {
        self.lookup(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Point-in-time snapshot of every registered adapter.
    ///
    /// Later registrations or removals do not affect the returned iterator.
    pub fn list_all(&self) -> impl Iterator<Item = Arc<dyn PoolAdapter>> {
        let snapshot: Vec<_> = self.pools.read().values().cloned().collect();
        snapshot.into_iter()
    }

    /// Remove an entry; removing an absent name is a no-op
    pub fn deregister(&self, name: &str) -> Option<Arc<dyn PoolAdapter>> {
        let removed = self.pools.write().remove(name);
        if removed.is_some() {
            info!(pool = %name, "Deregistered pool");
        } else {
            debug!(pool = %name, "Deregister of unknown pool ignored");
        }
        removed
    }

    /// Remove and return every entry
    pub fn drain(&self) -> Vec<Arc<dyn PoolAdapter>> {
        self.pools.write().drain().map(|(_, adapter)| adapter).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.pools.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }
}

impl fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.names())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A pool with this name is already registered
    #[error("pool already registered: {0}")]
    DuplicateName(String),

    /// No pool with this name is registered
    #[error("pool not found: {0}")]
    NotFound(String),
}
