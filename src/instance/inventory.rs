//! Inventory backend instance: driver access plus the cached local model.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{InstanceCore, InstanceOptions, cloud_key, host_key};
use crate::backend::{BackendError, InventoryService};
use crate::model::{
    BackendDescriptor, Cloud, CloudId, CloudPatch, Host, HostId, HostPatch, Mutation,
    OperationContext, SyncState,
};
use crate::sync::{SyncCoordinator, SyncPhase};

/// A live inventory backend with its local model and sync state.
///
/// Direct operations (`update_host`, `remove_host`, ...) go to the backend
/// first and are folded into the local model once confirmed. Staged
/// mutations ([`InventoryInstance::stage`]) touch only the local model and
/// reach the backend on the next [`InventoryInstance::sync_state`]. Load,
/// sync, and write round trips exclude each other and any direct operation.
#[derive(Clone)]
pub struct InventoryInstance {
    inner: Arc<Inner>,
}

struct Inner {
    core: InstanceCore,
    driver: Arc<dyn InventoryService>,
    coordinator: Mutex<SyncCoordinator>,
    gate: RwLock<()>,
}

impl InventoryInstance {
    /// Wraps a constructed driver.
    #[must_use]
    pub fn new(driver: Arc<dyn InventoryService>, options: InstanceOptions) -> Self {
        let descriptor = driver.descriptor().clone();
        let coordinator = SyncCoordinator::new(descriptor.to_string());
        Self {
            inner: Arc::new(Inner {
                core: InstanceCore::new(descriptor, options),
                driver,
                coordinator: Mutex::new(coordinator),
                gate: RwLock::new(()),
            }),
        }
    }

    /// Identity of the underlying driver.
    #[must_use]
    pub fn descriptor(&self) -> &BackendDescriptor {
        self.inner.core.descriptor()
    }

    /// Options the instance was resolved with.
    #[must_use]
    pub fn options(&self) -> InstanceOptions {
        *self.inner.core.options()
    }

    /// Current synchronisation phase.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.coordinator().phase()
    }

    /// Bookkeeping from the last load, sync, or write, if any.
    #[must_use]
    pub fn current_state(&self) -> Option<SyncState> {
        self.coordinator().state().cloned()
    }

    /// Hosts in the local model. Empty before the first load.
    #[must_use]
    pub fn cached_hosts(&self) -> Vec<Host> {
        self.coordinator()
            .cache()
            .map(|cache| cache.hosts().cloned().collect())
            .unwrap_or_default()
    }

    /// Clouds in the local model. Empty before the first load.
    #[must_use]
    pub fn cached_clouds(&self) -> Vec<Cloud> {
        self.coordinator()
            .cache()
            .map(|cache| cache.clouds().cloned().collect())
            .unwrap_or_default()
    }

    /// Mutations staged locally and not yet confirmed by the backend.
    #[must_use]
    pub fn pending(&self) -> Vec<Mutation> {
        self.coordinator().pending().to_vec()
    }

    /// Lists hosts from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the backend call fails or the instance
    /// is closed.
    pub async fn list_hosts(&self) -> Result<Vec<Host>, BackendError> {
        self.ensure_open()?;
        self.inner
            .core
            .call("list_hosts", self.inner.driver.list_hosts())
            .await
    }

    /// Lists clouds from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the backend call fails or the instance
    /// is closed.
    pub async fn list_clouds(&self) -> Result<Vec<Cloud>, BackendError> {
        self.ensure_open()?;
        self.inner
            .core
            .call("list_clouds", self.inner.driver.list_clouds())
            .await
    }

    /// Fetches one host from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] when the backend does not know the
    /// host, or whatever [`InventoryInstance::list_hosts`] returns.
    pub async fn host(&self, id: &HostId) -> Result<Host, BackendError> {
        self.list_hosts()
            .await?
            .into_iter()
            .find(|host| &host.id == id)
            .ok_or_else(|| BackendError::host_not_found(id))
    }

    /// Fetches one cloud from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] when the backend does not know the
    /// cloud, or whatever [`InventoryInstance::list_clouds`] returns.
    pub async fn cloud(&self, id: &CloudId) -> Result<Cloud, BackendError> {
        self.list_clouds()
            .await?
            .into_iter()
            .find(|cloud| &cloud.id == id)
            .ok_or_else(|| BackendError::cloud_not_found(id))
    }

    /// Applies `patch` to a host on the backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] with the driver's kind (`NotFound`,
    /// `Conflict`, transport kinds) or `InstanceClosed`.
    pub async fn update_host(&self, id: &HostId, patch: &HostPatch) -> Result<Host, BackendError> {
        self.ensure_open()?;
        let _gate = self.inner.gate.read().await;
        let _guard = self.inner.core.lock(host_key(id)).await;
        let host = self
            .inner
            .core
            .call("update_host", self.inner.driver.update_host(id, patch))
            .await
            .map_err(|err| err.with_context(format!("update host {id}")))?;
        debug!(host = %id, revision = host.revision, "host updated");
        let confirmed = host.clone();
        self.coordinator().record(move |cache| cache.put_host(confirmed));
        Ok(host)
    }

    /// Applies `patch` to a cloud on the backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] with the driver's kind or `InstanceClosed`.
    pub async fn update_cloud(
        &self,
        id: &CloudId,
        patch: &CloudPatch,
    ) -> Result<Cloud, BackendError> {
        self.ensure_open()?;
        let _gate = self.inner.gate.read().await;
        let _guard = self.inner.core.lock(cloud_key(id)).await;
        let cloud = self
            .inner
            .core
            .call("update_cloud", self.inner.driver.update_cloud(id, patch))
            .await
            .map_err(|err| err.with_context(format!("update cloud {id}")))?;
        debug!(cloud = %id, revision = cloud.revision, "cloud updated");
        let confirmed = cloud.clone();
        self.coordinator().record(move |cache| cache.put_cloud(confirmed));
        Ok(cloud)
    }

    /// Removes a host from the backend. Absent hosts are not an error, so
    /// the call is safe to retry after a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] on transport failure or `InstanceClosed`.
    pub async fn remove_host(&self, id: &HostId) -> Result<(), BackendError> {
        self.ensure_open()?;
        let _gate = self.inner.gate.read().await;
        let _guard = self.inner.core.lock(host_key(id)).await;
        self.inner
            .core
            .call("remove_host", self.inner.driver.remove_host(id))
            .await
            .map_err(|err| err.with_context(format!("remove host {id}")))?;
        debug!(host = %id, "host removed");
        self.coordinator().record(|cache| cache.forget_host(id));
        Ok(())
    }

    /// Removes a cloud from the backend, detaching members first when the
    /// instance was resolved with `force_on_remove`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] for populated clouds without
    /// force, otherwise the driver's kind or `InstanceClosed`.
    pub async fn remove_cloud(&self, id: &CloudId) -> Result<(), BackendError> {
        self.ensure_open()?;
        let force = self.inner.core.options().force_on_remove;
        let _gate = self.inner.gate.read().await;
        let _guard = self.inner.core.lock(cloud_key(id)).await;
        self.inner
            .core
            .call("remove_cloud", self.inner.driver.remove_cloud(id, force))
            .await
            .map_err(|err| err.with_context(format!("remove cloud {id}")))?;
        debug!(cloud = %id, force, "cloud removed");
        self.coordinator().record(|cache| cache.forget_cloud(id));
        Ok(())
    }

    /// Applies a mutation to the local model only; the next
    /// [`InventoryInstance::sync_state`] pushes it.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the mutation does not fit the local
    /// model, nothing is loaded, or the instance is closed.
    pub fn stage(&self, mutation: Mutation) -> Result<(), BackendError> {
        debug!(mutation = %mutation.describe(), "staging local change");
        self.coordinator().stage(mutation)
    }

    /// Pulls the backend's state into the local model.
    ///
    /// With `initialize`, a missing backend store is created empty first.
    /// Without `force`, unsynchronised local changes make the call fail
    /// instead of being overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Conflict`] for a dirty model without
    /// `force`, [`BackendError::NotFound`] for a missing store without
    /// `initialize`, otherwise the driver's kind or `InstanceClosed`.
    pub async fn load_data(
        &self,
        ctx: &OperationContext,
        force: bool,
        initialize: bool,
    ) -> Result<SyncState, BackendError> {
        let _gate = self.inner.gate.write().await;
        self.coordinator().check_discard(force)?;
        let snapshot = self
            .inner
            .core
            .call("load_data", self.inner.driver.load_data(ctx, initialize))
            .await
            .map_err(|err| err.with_context("load inventory"))?;
        let state = {
            let mut coordinator = self.coordinator();
            coordinator.check_discard(force)?;
            coordinator.loaded(snapshot, SystemTime::now())?
        };
        info!(
            backend = %self.descriptor(),
            operation = %ctx,
            version = %state.version,
            force,
            "inventory loaded"
        );
        Ok(state)
    }

    /// Creates the backend-side store and loads it.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::AlreadyInitialized`] when the store exists
    /// and `force` is not set, [`BackendError::Conflict`] for a dirty
    /// model without `force`, otherwise the driver's kind or
    /// `InstanceClosed`.
    pub async fn init_data(
        &self,
        ctx: &OperationContext,
        force: bool,
    ) -> Result<SyncState, BackendError> {
        let _gate = self.inner.gate.write().await;
        self.coordinator().check_discard(force)?;
        let version = self
            .inner
            .core
            .call("init_data", self.inner.driver.init_data(ctx, force))
            .await
            .map_err(|err| err.with_context("initialise inventory store"))?;
        if force {
            warn!(backend = %self.descriptor(), operation = %ctx, "inventory store reinitialised");
        }
        let snapshot = self
            .inner
            .core
            .call("load_data", self.inner.driver.load_data(ctx, false))
            .await
            .map_err(|err| err.with_context("load freshly initialised inventory"))?;
        let state = {
            let mut coordinator = self.coordinator();
            coordinator.check_discard(force)?;
            coordinator.loaded(snapshot, SystemTime::now())?
        };
        info!(
            backend = %self.descriptor(),
            operation = %ctx,
            %version,
            "inventory store initialised"
        );
        Ok(state)
    }

    /// Pushes staged mutations and pulls changes made by other actors.
    ///
    /// On failure, including cancellation, the local model and its staged
    /// mutations are left untouched and the caller should retry. A retry
    /// re-sends the same batch under the same id, so a batch the backend
    /// committed before the deadline elapsed is confirmed, not applied twice.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] with the driver's kind, `Conflict` when
    /// nothing is loaded, or `InstanceClosed`.
    pub async fn sync_state(&self, ctx: &OperationContext) -> Result<SyncState, BackendError> {
        let _gate = self.inner.gate.write().await;
        let ticket = self.coordinator().begin_sync()?;
        let snapshot = self
            .inner
            .core
            .call(
                "sync_state",
                self.inner.driver.sync_state(
                    ctx,
                    ticket.base(),
                    ticket.batch(),
                    ticket.pending(),
                ),
            )
            .await
            .map_err(|err| {
                warn!(
                    backend = %self.descriptor(),
                    operation = %ctx,
                    batch = %ticket.batch(),
                    pending = ticket.pending().len(),
                    error = %err,
                    "sync failed; local changes kept"
                );
                err.with_context("synchronise inventory")
            })?;
        let state = self
            .coordinator()
            .complete_sync(&ticket, snapshot, SystemTime::now())?;
        info!(
            backend = %self.descriptor(),
            operation = %ctx,
            pushed = ticket.pending().len(),
            version = %state.version,
            "inventory synchronised"
        );
        Ok(state)
    }

    /// Pushes the whole local model to the backend, replacing its state.
    ///
    /// With `do_exit` the per-call deadline is not applied: the call returns
    /// only once the backend has acknowledged the write, and the instance is
    /// closed afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] with the driver's kind, `Conflict` when
    /// nothing is loaded, or `InstanceClosed`.
    pub async fn write_data(
        &self,
        ctx: &OperationContext,
        do_exit: bool,
    ) -> Result<(), BackendError> {
        let _gate = self.inner.gate.write().await;
        let ticket = self.coordinator().begin_write()?;
        let push = self
            .inner
            .driver
            .write_data(ctx, ticket.snapshot(), do_exit);
        let outcome = if do_exit {
            push.await
        } else {
            self.inner.core.call("write_data", push).await
        };
        let version = outcome.map_err(|err| err.with_context("write inventory"))?;
        let mut coordinator = self.coordinator();
        let state = coordinator.complete_write(&ticket, version)?;
        info!(
            backend = %self.descriptor(),
            operation = %ctx,
            version = %state.version,
            do_exit,
            "inventory written"
        );
        if do_exit {
            coordinator.close();
        }
        Ok(())
    }

    /// Shuts the instance down. Later calls fail with `InstanceClosed`.
    pub fn close(&self) {
        self.coordinator().close();
        info!(backend = %self.descriptor(), "inventory instance closed");
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        self.coordinator().ensure_open()
    }

    fn coordinator(&self) -> MutexGuard<'_, SyncCoordinator> {
        self.inner
            .coordinator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for InventoryInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InventoryInstance")
            .field("descriptor", self.descriptor())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
