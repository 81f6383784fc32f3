//! Driver contract for inventory and network backends.
//!
//! Every driver implements [`HardwareService`] plus one of the kind-specific
//! extensions, [`InventoryService`] or [`NetworkService`]. The traits are
//! object safe so the registry can hand out `Arc<dyn ...>` values chosen at
//! deployment time; operations return boxed futures so drivers are free to
//! block on I/O.

use std::future::Future;
use std::pin::Pin;

use crate::model::{
    BackendDescriptor, BatchId, Cloud, CloudId, CloudPatch, Host, HostId, HostPatch,
    InventorySnapshot, Mutation, OperationContext, VersionToken,
};

mod error;

pub use error::{BackendError, ErrorKind, Resource};

/// Future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Operations shared by every backend kind.
pub trait HardwareService: Send + Sync {
    /// Identity the driver was constructed for.
    fn descriptor(&self) -> &BackendDescriptor;

    /// Returns the backend's current host inventory.
    fn list_hosts(&self) -> BackendFuture<'_, Vec<Host>>;

    /// Returns the backend's clouds, or network segments for a network
    /// backend. Drivers without groupings fail with
    /// [`ErrorKind::NotSupportedByBackend`].
    fn list_clouds(&self) -> BackendFuture<'_, Vec<Cloud>>;

    /// Applies attribute or assignment changes to a host and returns the
    /// confirmed record.
    fn update_host<'a>(
        &'a self,
        id: &'a HostId,
        patch: &'a HostPatch,
    ) -> BackendFuture<'a, Host>;

    /// Applies metadata changes to a cloud and returns the confirmed record.
    fn update_cloud<'a>(
        &'a self,
        id: &'a CloudId,
        patch: &'a CloudPatch,
    ) -> BackendFuture<'a, Cloud>;

    /// Removes a host. Removing an absent host succeeds.
    fn remove_host<'a>(&'a self, id: &'a HostId) -> BackendFuture<'a, ()>;

    /// Removes a cloud. Populated clouds fail with [`ErrorKind::Conflict`]
    /// unless `force` is set, in which case members are detached first.
    fn remove_cloud<'a>(&'a self, id: &'a CloudId, force: bool) -> BackendFuture<'a, ()>;
}

/// Store-level operations of an inventory backend.
pub trait InventoryService: HardwareService {
    /// Creates the backend-side store. Fails with
    /// [`ErrorKind::AlreadyInitialized`] when it exists, unless `force`
    /// wipes it.
    fn init_data<'a>(
        &'a self,
        ctx: &'a OperationContext,
        force: bool,
    ) -> BackendFuture<'a, VersionToken>;

    /// Reads the whole store. A missing store fails with
    /// [`ErrorKind::NotFound`] unless `initialize` creates it empty.
    fn load_data<'a>(
        &'a self,
        ctx: &'a OperationContext,
        initialize: bool,
    ) -> BackendFuture<'a, InventorySnapshot>;

    /// Applies `pending` in order, all or nothing, and returns the resulting
    /// store including changes made by other actors since `base`.
    ///
    /// `batch` is reused when the caller retries after a timeout. A driver
    /// that has already committed `batch` must return its current store
    /// without applying `pending` again.
    fn sync_state<'a>(
        &'a self,
        ctx: &'a OperationContext,
        base: &'a VersionToken,
        batch: &'a BatchId,
        pending: &'a [Mutation],
    ) -> BackendFuture<'a, InventorySnapshot>;

    /// Replaces the store with `snapshot`. With `do_exit` the driver must not
    /// return before the backend has acknowledged the write.
    fn write_data<'a>(
        &'a self,
        ctx: &'a OperationContext,
        snapshot: &'a InventorySnapshot,
        do_exit: bool,
    ) -> BackendFuture<'a, VersionToken>;
}

/// Per-host result of a network move.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostMoveStatus {
    /// The network now places the host in the destination.
    Moved,
    /// The network refused or failed to move the host.
    Failed {
        /// Reason reported by the backend.
        reason: String,
    },
}

/// Outcome of moving one host, as reported by a network backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostMoveResult {
    /// Host the result refers to.
    pub host: HostId,
    /// What happened to it.
    pub status: HostMoveStatus,
}

impl HostMoveResult {
    /// Builds a success entry.
    #[must_use]
    pub const fn moved(host: HostId) -> Self {
        Self {
            host,
            status: HostMoveStatus::Moved,
        }
    }

    /// Builds a failure entry.
    #[must_use]
    pub fn failed(host: HostId, reason: impl Into<String>) -> Self {
        Self {
            host,
            status: HostMoveStatus::Failed {
                reason: reason.into(),
            },
        }
    }

    /// Returns `true` when the host was moved.
    #[must_use]
    pub const fn is_moved(&self) -> bool {
        matches!(self.status, HostMoveStatus::Moved)
    }
}

/// Topology operations of a network backend.
pub trait NetworkService: HardwareService {
    /// Reconfigures the network so every host in `hosts` sits in
    /// `destination`. Partial success is expected: the result carries one
    /// entry per requested host.
    fn move_hosts<'a>(
        &'a self,
        ctx: &'a OperationContext,
        hosts: &'a [HostId],
        destination: &'a CloudId,
    ) -> BackendFuture<'a, Vec<HostMoveResult>>;
}
