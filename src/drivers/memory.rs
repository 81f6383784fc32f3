//! In-process stores for the `Memory` driver.
//!
//! A [`MemoryHub`] owns one document per endpoint and backend kind, so two
//! instances resolved against `memory://lab` observe the same data for as
//! long as the hub lives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::stored::{DocumentStore, StoreDocument, StoredInventory, StoredNetwork};
use crate::backend::{BackendError, InventoryService, NetworkService};
use crate::model::{BackendDescriptor, BackendKind};

/// Document held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<StoreDocument>>,
}

impl MemoryStore {
    /// Forgets the document, as if the store had never been created.
    pub fn clear(&self) {
        *self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self) -> Result<Option<StoreDocument>, BackendError> {
        Ok(self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, document: &StoreDocument, _durable: bool) -> Result<(), BackendError> {
        *self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(document.clone());
        Ok(())
    }
}

/// Shared set of memory stores keyed by backend kind and endpoint.
#[derive(Debug, Default)]
pub struct MemoryHub {
    stores: Mutex<HashMap<(BackendKind, String), Arc<MemoryStore>>>,
}

impl MemoryHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store for `descriptor`, creating it on first use.
    #[must_use]
    pub fn store(&self, descriptor: &BackendDescriptor) -> Arc<MemoryStore> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            stores
                .entry((descriptor.kind, descriptor.endpoint.to_string()))
                .or_default(),
        )
    }

    /// Builds an inventory driver over the store for `descriptor`.
    #[must_use]
    pub fn inventory(&self, descriptor: &BackendDescriptor) -> Arc<dyn InventoryService> {
        Arc::new(StoredInventory::new(
            descriptor.clone(),
            self.store(descriptor),
        ))
    }

    /// Builds a network driver over the store for `descriptor`.
    #[must_use]
    pub fn network(&self, descriptor: &BackendDescriptor) -> Arc<dyn NetworkService> {
        Arc::new(StoredNetwork::new(descriptor.clone(), self.store(descriptor)))
    }
}
