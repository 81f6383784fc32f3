//! Live backend instances bound to one endpoint.
//!
//! An instance wraps a driver with the behaviour every backend shares: a
//! deadline on each driver call, single-writer discipline per host or cloud
//! identifier, and refusal of work after shutdown. Instances are cheap to
//! clone and safe to share between tasks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::warn;

use crate::backend::BackendError;
use crate::model::{BackendDescriptor, BackendKind, CloudId, HostId};

mod inventory;
mod network;

pub use inventory::InventoryInstance;
pub use network::NetworkInstance;

/// Default deadline applied to each driver call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables applied when an instance is resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InstanceOptions {
    /// Deadline for each driver call.
    pub operation_timeout: Duration,
    /// Whether `remove_cloud` detaches member hosts instead of refusing.
    pub force_on_remove: bool,
}

impl InstanceOptions {
    /// Overrides the per-call deadline.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Overrides the forced-removal policy.
    #[must_use]
    pub const fn with_force_on_remove(mut self, force: bool) -> Self {
        self.force_on_remove = force;
        self
    }
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            force_on_remove: false,
        }
    }
}

/// A resolved backend of either kind.
#[derive(Clone, Debug)]
pub enum BackendInstance {
    /// Inventory backend.
    Inventory(InventoryInstance),
    /// Network backend.
    Network(NetworkInstance),
}

impl BackendInstance {
    /// Identity of the underlying driver.
    #[must_use]
    pub fn descriptor(&self) -> &BackendDescriptor {
        match self {
            Self::Inventory(instance) => instance.descriptor(),
            Self::Network(instance) => instance.descriptor(),
        }
    }

    /// Backend family.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.descriptor().kind
    }

    /// Returns the inventory instance, if that is what this is.
    #[must_use]
    pub fn into_inventory(self) -> Option<InventoryInstance> {
        match self {
            Self::Inventory(instance) => Some(instance),
            Self::Network(_) => None,
        }
    }

    /// Returns the network instance, if that is what this is.
    #[must_use]
    pub fn into_network(self) -> Option<NetworkInstance> {
        match self {
            Self::Network(instance) => Some(instance),
            Self::Inventory(_) => None,
        }
    }

    /// Shuts the instance down.
    pub fn close(&self) {
        match self {
            Self::Inventory(instance) => instance.close(),
            Self::Network(instance) => instance.close(),
        }
    }
}

/// Behaviour shared by inventory and network instances.
#[derive(Debug)]
pub(crate) struct InstanceCore {
    descriptor: BackendDescriptor,
    options: InstanceOptions,
    locks: KeyedLocks,
}

impl InstanceCore {
    pub(crate) fn new(descriptor: BackendDescriptor, options: InstanceOptions) -> Self {
        Self {
            descriptor,
            options,
            locks: KeyedLocks::default(),
        }
    }

    pub(crate) const fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub(crate) const fn options(&self) -> &InstanceOptions {
        &self.options
    }

    /// Serialises work on one identifier.
    pub(crate) async fn lock(&self, key: String) -> OwnedMutexGuard<()> {
        self.locks.lock(key).await
    }

    /// Serialises work on several identifiers, acquiring in a fixed order.
    pub(crate) async fn lock_all(&self, keys: Vec<String>) -> Vec<OwnedMutexGuard<()>> {
        self.locks.lock_all(keys).await
    }

    /// Runs a driver call under the configured deadline.
    pub(crate) async fn call<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        with_deadline(operation, self.options.operation_timeout, future).await
    }
}

/// Awaits `future`, failing with [`BackendError::Timeout`] once `after`
/// elapses.
pub(crate) async fn with_deadline<T>(
    operation: &'static str,
    after: Duration,
    future: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    match timeout(after, future).await {
        Ok(result) => result,
        Err(_elapsed) => {
            warn!(operation, ?after, "backend call timed out");
            Err(BackendError::Timeout { operation, after })
        }
    }
}

pub(crate) fn host_key(id: &HostId) -> String {
    format!("host:{id}")
}

pub(crate) fn cloud_key(id: &CloudId) -> String {
    format!("cloud:{id}")
}

/// One async mutex per identifier, created on demand.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) async fn lock(&self, key: String) -> OwnedMutexGuard<()> {
        let lock = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on can go.
            entries.retain(|existing, lock| existing == &key || Arc::strong_count(lock) > 1);
            Arc::clone(entries.entry(key).or_default())
        };
        lock.lock_owned().await
    }

    /// Acquires several keys in sorted order so overlapping callers cannot
    /// deadlock.
    pub(crate) async fn lock_all(&self, keys: Vec<String>) -> Vec<OwnedMutexGuard<()>> {
        let mut ordered = keys;
        ordered.sort();
        ordered.dedup();
        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.lock(key).await);
        }
        guards
    }
}
