//! Built-in drivers.
//!
//! Both drivers implement the inventory and the network contract over a
//! JSON store document: `Memory` keeps it in process (`memory://<name>`),
//! `File` keeps it on disk (`file://<path>`).

use std::sync::Arc;

use crate::registry::{DriverRegistry, RegistryError};

mod file;
mod memory;
mod stored;

pub use file::JsonFileStore;
pub use memory::{MemoryHub, MemoryStore};
pub use stored::{DocumentStore, StoreDocument, StoredInventory, StoredNetwork};

/// Name of the in-process driver.
pub const MEMORY_DRIVER: &str = "Memory";

/// Name of the JSON file driver.
pub const FILE_DRIVER: &str = "File";

/// Registers the `Memory` and `File` drivers for both backend kinds.
///
/// Memory instances resolved through the same registry share one
/// [`MemoryHub`], so inventory written by one instance is visible to the
/// next instance resolved against the same endpoint.
///
/// # Errors
///
/// Returns [`RegistryError::DuplicateDriver`] when `registry` already holds
/// one of the built-in names.
pub fn register_builtin(registry: &DriverRegistry) -> Result<(), RegistryError> {
    let hub = Arc::new(MemoryHub::new());
    let inventory_hub = Arc::clone(&hub);
    registry.register_inventory(MEMORY_DRIVER, move |descriptor| {
        Ok(inventory_hub.inventory(descriptor))
    })?;
    registry.register_network(MEMORY_DRIVER, move |descriptor| Ok(hub.network(descriptor)))?;
    registry.register_inventory(FILE_DRIVER, |descriptor| {
        let store = JsonFileStore::from_endpoint(&descriptor.endpoint)?;
        Ok(Arc::new(StoredInventory::new(
            descriptor.clone(),
            Arc::new(store),
        )))
    })?;
    registry.register_network(FILE_DRIVER, |descriptor| {
        let store = JsonFileStore::from_endpoint(&descriptor.endpoint)?;
        Ok(Arc::new(StoredNetwork::new(descriptor.clone(), Arc::new(store))))
    })
}

#[cfg(test)]
mod tests;
