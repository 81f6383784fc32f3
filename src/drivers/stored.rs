//! Drivers whose authoritative state is a single [`StoreDocument`].
//!
//! The memory and file drivers differ only in where the document lives, so
//! both plug a [`DocumentStore`] into the drivers defined here. Every write
//! happens read-modify-write under one lock per driver; a failed mutation
//! never reaches the store because it is applied to a freshly read copy.
//! Store access runs on the blocking pool so a stalled medium cannot keep
//! the caller's deadline from firing.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{
    BackendError, BackendFuture, HardwareService, HostMoveResult, InventoryService, NetworkService,
};
use crate::model::{
    Attributes, BackendDescriptor, BatchId, Cloud, CloudAssignment, CloudId, CloudPatch, Host,
    HostId, HostPatch, InventorySnapshot, Mutation, OperationContext, VersionToken,
};

/// Persisted form of a backend store.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct StoreDocument {
    /// Monotonic write counter; the store's version token derives from it.
    pub generation: u64,
    /// Last sync batch committed to this store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_batch: Option<BatchId>,
    /// Hosts and clouds (or network segments).
    pub inventory: InventorySnapshot,
}

impl StoreDocument {
    fn empty(generation: u64) -> Self {
        Self {
            generation,
            last_batch: None,
            inventory: InventorySnapshot::empty(VersionToken::from_generation(generation)),
        }
    }

    fn advance(&mut self) {
        self.generation += 1;
        self.inventory.version = VersionToken::from_generation(self.generation);
    }
}

/// Where a [`StoreDocument`] lives.
pub trait DocumentStore: Send + Sync {
    /// Reads the document; `None` when the store does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unavailable`] when the medium cannot be read
    /// and [`BackendError::Protocol`] when its content is malformed.
    fn load(&self) -> Result<Option<StoreDocument>, BackendError>;

    /// Replaces the document. With `durable`, returns only after the medium
    /// has flushed the write.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unavailable`] when the medium cannot be
    /// written.
    fn save(&self, document: &StoreDocument, durable: bool) -> Result<(), BackendError>;
}

struct Store {
    descriptor: BackendDescriptor,
    documents: Arc<dyn DocumentStore>,
    lock: Mutex<()>,
}

impl Store {
    fn shared(descriptor: BackendDescriptor, documents: Arc<dyn DocumentStore>) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            documents,
            lock: Mutex::new(()),
        })
    }

    /// Runs `op` against the store on the blocking pool.
    async fn run<T>(
        self: &Arc<Self>,
        op: impl FnOnce(&Self) -> Result<T, BackendError> + Send + 'static,
    ) -> Result<T, BackendError>
    where
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|err| BackendError::Unavailable {
                endpoint: self.descriptor.endpoint.to_string(),
                message: format!("store task failed: {err}"),
            })?
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_existing(&self) -> Result<StoreDocument, BackendError> {
        self.documents
            .load()?
            .ok_or_else(|| BackendError::store_not_found(self.descriptor.endpoint.as_str()))
    }

    fn read_or_empty(&self) -> Result<StoreDocument, BackendError> {
        Ok(self.documents.load()?.unwrap_or_default())
    }

    fn commit(&self, document: &mut StoreDocument, durable: bool) -> Result<(), BackendError> {
        document.advance();
        self.documents.save(document, durable)?;
        debug!(
            backend = %self.descriptor,
            version = %document.inventory.version,
            "store committed"
        );
        Ok(())
    }

    /// Applies `mutation` to the stored document and commits it.
    fn mutate(
        &self,
        mutation: &Mutation,
        require_existing: bool,
    ) -> Result<InventorySnapshot, BackendError> {
        let _guard = self.guard();
        let mut document = if require_existing {
            self.read_existing()?
        } else {
            self.read_or_empty()?
        };
        document.inventory.apply(mutation)?;
        self.commit(&mut document, false)?;
        Ok(document.inventory)
    }

    /// Removing a host that is already gone succeeds without a write.
    fn remove_host(&self, id: &HostId) -> Result<(), BackendError> {
        let _guard = self.guard();
        let Some(mut document) = self.documents.load()? else {
            return Ok(());
        };
        if document.inventory.host(id).is_none() {
            return Ok(());
        }
        document.inventory.forget_host(id);
        self.commit(&mut document, false)
    }

    fn update_host(
        &self,
        id: &HostId,
        patch: HostPatch,
        require_existing: bool,
    ) -> Result<Host, BackendError> {
        let snapshot = self.mutate(
            &Mutation::UpdateHost {
                host: id.clone(),
                patch,
            },
            require_existing,
        )?;
        snapshot
            .host(id)
            .cloned()
            .ok_or_else(|| BackendError::host_not_found(id))
    }

    fn update_cloud(
        &self,
        id: &CloudId,
        patch: CloudPatch,
        require_existing: bool,
    ) -> Result<Cloud, BackendError> {
        let snapshot = self.mutate(
            &Mutation::UpdateCloud {
                cloud: id.clone(),
                patch,
            },
            require_existing,
        )?;
        snapshot
            .cloud(id)
            .cloned()
            .ok_or_else(|| BackendError::cloud_not_found(id))
    }

    fn remove_cloud(
        &self,
        id: CloudId,
        force: bool,
        require_existing: bool,
    ) -> Result<(), BackendError> {
        self.mutate(&Mutation::RemoveCloud { cloud: id, force }, require_existing)
            .map(drop)
    }

    fn hosts(&self, require_existing: bool) -> Result<Vec<Host>, BackendError> {
        let document = if require_existing {
            self.read_existing()?
        } else {
            self.read_or_empty()?
        };
        Ok(document.inventory.hosts().cloned().collect())
    }

    fn clouds(&self, require_existing: bool) -> Result<Vec<Cloud>, BackendError> {
        let document = if require_existing {
            self.read_existing()?
        } else {
            self.read_or_empty()?
        };
        Ok(document.inventory.clouds().cloned().collect())
    }

    /// Applies `pending` as one all-or-nothing batch, unless `batch` is the
    /// batch this store committed last.
    fn apply_batch(
        &self,
        batch: &BatchId,
        pending: &[Mutation],
    ) -> Result<(InventorySnapshot, bool), BackendError> {
        let _guard = self.guard();
        let mut document = self.read_existing()?;
        if pending.is_empty() || document.last_batch.as_ref() == Some(batch) {
            return Ok((document.inventory, false));
        }
        let total = pending.len();
        for (index, mutation) in pending.iter().enumerate() {
            document.inventory.apply(mutation).map_err(|err| {
                err.with_context(format!(
                    "pending change {} of {total} ({})",
                    index + 1,
                    mutation.describe()
                ))
            })?;
        }
        document.last_batch = Some(batch.clone());
        self.commit(&mut document, false)?;
        Ok((document.inventory, true))
    }
}

/// Inventory driver over a [`DocumentStore`].
pub struct StoredInventory {
    store: Arc<Store>,
}

impl StoredInventory {
    /// Creates a driver for `descriptor` backed by `documents`.
    #[must_use]
    pub fn new(descriptor: BackendDescriptor, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            store: Store::shared(descriptor, documents),
        }
    }
}

impl fmt::Debug for StoredInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredInventory")
            .field("descriptor", &self.store.descriptor)
            .finish_non_exhaustive()
    }
}

impl HardwareService for StoredInventory {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.store.descriptor
    }

    fn list_hosts(&self) -> BackendFuture<'_, Vec<Host>> {
        Box::pin(self.store.run(|store| store.hosts(true)))
    }

    fn list_clouds(&self) -> BackendFuture<'_, Vec<Cloud>> {
        Box::pin(self.store.run(|store| store.clouds(true)))
    }

    fn update_host<'a>(
        &'a self,
        id: &'a HostId,
        patch: &'a HostPatch,
    ) -> BackendFuture<'a, Host> {
        let (host, changes) = (id.clone(), patch.clone());
        Box::pin(self.store.run(move |store| store.update_host(&host, changes, true)))
    }

    fn update_cloud<'a>(
        &'a self,
        id: &'a CloudId,
        patch: &'a CloudPatch,
    ) -> BackendFuture<'a, Cloud> {
        let (cloud, changes) = (id.clone(), patch.clone());
        Box::pin(self.store.run(move |store| store.update_cloud(&cloud, changes, true)))
    }

    fn remove_host<'a>(&'a self, id: &'a HostId) -> BackendFuture<'a, ()> {
        let host = id.clone();
        Box::pin(self.store.run(move |store| store.remove_host(&host)))
    }

    fn remove_cloud<'a>(&'a self, id: &'a CloudId, force: bool) -> BackendFuture<'a, ()> {
        let cloud = id.clone();
        Box::pin(self.store.run(move |store| store.remove_cloud(cloud, force, true)))
    }
}

impl InventoryService for StoredInventory {
    fn init_data<'a>(
        &'a self,
        ctx: &'a OperationContext,
        force: bool,
    ) -> BackendFuture<'a, VersionToken> {
        Box::pin(async move {
            let version = self
                .store
                .run(move |store| {
                    let _guard = store.guard();
                    let previous = store.documents.load()?;
                    if previous.is_some() && !force {
                        return Err(BackendError::AlreadyInitialized {
                            endpoint: store.descriptor.endpoint.to_string(),
                        });
                    }
                    // Generations keep counting across reinitialisation so
                    // version tokens are never reissued.
                    let mut document =
                        StoreDocument::empty(previous.map_or(0, |existing| existing.generation));
                    store.commit(&mut document, false)?;
                    Ok(document.inventory.version)
                })
                .await?;
            debug!(operation = %ctx, force, "inventory store created");
            Ok(version)
        })
    }

    fn load_data<'a>(
        &'a self,
        ctx: &'a OperationContext,
        initialize: bool,
    ) -> BackendFuture<'a, InventorySnapshot> {
        Box::pin(async move {
            let (snapshot, created) = self
                .store
                .run(move |store| {
                    let _guard = store.guard();
                    match store.documents.load()? {
                        Some(document) => Ok((document.inventory, false)),
                        None if initialize => {
                            let mut document = StoreDocument::empty(0);
                            store.commit(&mut document, false)?;
                            Ok((document.inventory, true))
                        }
                        None => Err(BackendError::store_not_found(
                            store.descriptor.endpoint.as_str(),
                        )),
                    }
                })
                .await?;
            if created {
                debug!(operation = %ctx, "inventory store bootstrapped on load");
            }
            Ok(snapshot)
        })
    }

    fn sync_state<'a>(
        &'a self,
        ctx: &'a OperationContext,
        base: &'a VersionToken,
        batch: &'a BatchId,
        pending: &'a [Mutation],
    ) -> BackendFuture<'a, InventorySnapshot> {
        Box::pin(async move {
            let (owned_batch, owned_pending) = (batch.clone(), pending.to_vec());
            let (snapshot, applied) = self
                .store
                .run(move |store| store.apply_batch(&owned_batch, &owned_pending))
                .await?;
            if &snapshot.version != base {
                debug!(
                    operation = %ctx,
                    %base,
                    current = %snapshot.version,
                    %batch,
                    applied,
                    "store advanced since last load"
                );
            }
            Ok(snapshot)
        })
    }

    fn write_data<'a>(
        &'a self,
        ctx: &'a OperationContext,
        snapshot: &'a InventorySnapshot,
        do_exit: bool,
    ) -> BackendFuture<'a, VersionToken> {
        Box::pin(async move {
            let inventory = snapshot.clone();
            let version = self
                .store
                .run(move |store| {
                    let _guard = store.guard();
                    let previous = store.documents.load()?.unwrap_or_default();
                    let mut document = StoreDocument {
                        generation: previous.generation,
                        last_batch: previous.last_batch,
                        inventory,
                    };
                    store.commit(&mut document, do_exit)?;
                    Ok(document.inventory.version)
                })
                .await?;
            debug!(operation = %ctx, do_exit, "inventory store replaced");
            Ok(version)
        })
    }
}

/// Network driver over a [`DocumentStore`]. Segments are stored as clouds
/// and are created on first use; hosts are registered when first moved.
pub struct StoredNetwork {
    store: Arc<Store>,
}

impl StoredNetwork {
    /// Creates a driver for `descriptor` backed by `documents`.
    #[must_use]
    pub fn new(descriptor: BackendDescriptor, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            store: Store::shared(descriptor, documents),
        }
    }

    fn place(
        snapshot: &mut InventorySnapshot,
        host: &HostId,
        destination: &CloudId,
    ) -> Result<(), BackendError> {
        if snapshot.host(host).is_none() {
            snapshot.apply(&Mutation::AddHost {
                host: host.clone(),
                attributes: Attributes::new(),
                cloud: CloudAssignment::Unassigned,
            })?;
        }
        snapshot.apply(&Mutation::UpdateHost {
            host: host.clone(),
            patch: HostPatch::new().assign(CloudAssignment::Cloud(destination.clone())),
        })
    }

    fn place_all(
        store: &Store,
        hosts: &[HostId],
        destination: &CloudId,
    ) -> Result<Vec<HostMoveResult>, BackendError> {
        let _guard = store.guard();
        let mut document = store.read_or_empty()?;
        if document.inventory.cloud(destination).is_none() {
            document.inventory.apply(&Mutation::AddCloud {
                cloud: destination.clone(),
                description: String::new(),
            })?;
        }
        let results = hosts
            .iter()
            .map(
                |host| match Self::place(&mut document.inventory, host, destination) {
                    Ok(()) => HostMoveResult::moved(host.clone()),
                    Err(err) => HostMoveResult::failed(host.clone(), err.to_string()),
                },
            )
            .collect();
        store.commit(&mut document, false)?;
        Ok(results)
    }
}

impl fmt::Debug for StoredNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredNetwork")
            .field("descriptor", &self.store.descriptor)
            .finish_non_exhaustive()
    }
}

impl HardwareService for StoredNetwork {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.store.descriptor
    }

    fn list_hosts(&self) -> BackendFuture<'_, Vec<Host>> {
        Box::pin(self.store.run(|store| store.hosts(false)))
    }

    fn list_clouds(&self) -> BackendFuture<'_, Vec<Cloud>> {
        Box::pin(self.store.run(|store| store.clouds(false)))
    }

    fn update_host<'a>(
        &'a self,
        id: &'a HostId,
        patch: &'a HostPatch,
    ) -> BackendFuture<'a, Host> {
        let (host, changes) = (id.clone(), patch.clone());
        Box::pin(self.store.run(move |store| store.update_host(&host, changes, false)))
    }

    fn update_cloud<'a>(
        &'a self,
        id: &'a CloudId,
        patch: &'a CloudPatch,
    ) -> BackendFuture<'a, Cloud> {
        let (cloud, changes) = (id.clone(), patch.clone());
        Box::pin(self.store.run(move |store| store.update_cloud(&cloud, changes, false)))
    }

    fn remove_host<'a>(&'a self, id: &'a HostId) -> BackendFuture<'a, ()> {
        let host = id.clone();
        Box::pin(self.store.run(move |store| store.remove_host(&host)))
    }

    fn remove_cloud<'a>(&'a self, id: &'a CloudId, force: bool) -> BackendFuture<'a, ()> {
        let cloud = id.clone();
        Box::pin(self.store.run(move |store| store.remove_cloud(cloud, force, false)))
    }
}

impl NetworkService for StoredNetwork {
    fn move_hosts<'a>(
        &'a self,
        ctx: &'a OperationContext,
        hosts: &'a [HostId],
        destination: &'a CloudId,
    ) -> BackendFuture<'a, Vec<HostMoveResult>> {
        Box::pin(async move {
            let (requested, target) = (hosts.to_vec(), destination.clone());
            let results = self
                .store
                .run(move |store| Self::place_all(store, &requested, &target))
                .await?;
            debug!(
                operation = %ctx,
                %destination,
                hosts = hosts.len(),
                "segment membership updated"
            );
            Ok(results)
        })
    }
}
