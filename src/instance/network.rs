//! Network backend instance.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::{InstanceCore, InstanceOptions, cloud_key, host_key};
use crate::backend::{BackendError, HostMoveResult, HostMoveStatus, NetworkService};
use crate::model::{
    BackendDescriptor, Cloud, CloudId, CloudPatch, Host, HostId, HostPatch, OperationContext,
};

/// A live network backend.
#[derive(Clone)]
pub struct NetworkInstance {
    inner: Arc<Inner>,
}

struct Inner {
    core: InstanceCore,
    driver: Arc<dyn NetworkService>,
    closed: AtomicBool,
}

impl NetworkInstance {
    /// Wraps a constructed driver.
    #[must_use]
    pub fn new(driver: Arc<dyn NetworkService>, options: InstanceOptions) -> Self {
        let descriptor = driver.descriptor().clone();
        Self {
            inner: Arc::new(Inner {
                core: InstanceCore::new(descriptor, options),
                driver,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Identity of the underlying driver.
    #[must_use]
    pub fn descriptor(&self) -> &BackendDescriptor {
        self.inner.core.descriptor()
    }

    /// Returns `true` once [`NetworkInstance::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Lists hosts visible to the network backend.
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

    /// Lists network segments, where the backend groups hosts that way.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotSupported`] when the backend has no
    /// groupings, otherwise the driver's kind or `InstanceClosed`.
    pub async fn list_clouds(&self) -> Result<Vec<Cloud>, BackendError> {
        self.ensure_open()?;
        self.inner
            .core
            .call("list_clouds", self.inner.driver.list_clouds())
            .await
    }

    /// Applies `patch` to a host's network record.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] with the driver's kind or `InstanceClosed`.
    pub async fn update_host(&self, id: &HostId, patch: &HostPatch) -> Result<Host, BackendError> {
        self.ensure_open()?;
        let _guard = self.inner.core.lock(host_key(id)).await;
        self.inner
            .core
            .call("update_host", self.inner.driver.update_host(id, patch))
            .await
            .map_err(|err| err.with_context(format!("update network host {id}")))
    }

    /// Applies `patch` to a network segment.
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
        let _guard = self.inner.core.lock(cloud_key(id)).await;
        self.inner
            .core
            .call("update_cloud", self.inner.driver.update_cloud(id, patch))
            .await
            .map_err(|err| err.with_context(format!("update network segment {id}")))
    }

    /// Forgets a host. Absent hosts are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] on transport failure or `InstanceClosed`.
    pub async fn remove_host(&self, id: &HostId) -> Result<(), BackendError> {
        self.ensure_open()?;
        let _guard = self.inner.core.lock(host_key(id)).await;
        self.inner
            .core
            .call("remove_host", self.inner.driver.remove_host(id))
            .await
            .map_err(|err| err.with_context(format!("remove network host {id}")))
    }

    /// Removes a segment, honouring the instance's `force_on_remove`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] with the driver's kind or `InstanceClosed`.
    pub async fn remove_cloud(&self, id: &CloudId) -> Result<(), BackendError> {
        self.ensure_open()?;
        let force = self.inner.core.options().force_on_remove;
        let _guard = self.inner.core.lock(cloud_key(id)).await;
        self.inner
            .core
            .call("remove_cloud", self.inner.driver.remove_cloud(id, force))
            .await
            .map_err(|err| err.with_context(format!("remove network segment {id}")))
    }

    /// Moves every host in `hosts` into `destination`.
    ///
    /// The result holds exactly one entry per distinct requested host, in
    /// request order. Hosts the driver did not report on are marked failed.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] only when the batch as a whole could not be
    /// attempted (transport failure, timeout, closed instance).
    pub async fn move_hosts(
        &self,
        ctx: &OperationContext,
        hosts: &[HostId],
        destination: &CloudId,
    ) -> Result<Vec<HostMoveResult>, BackendError> {
        self.ensure_open()?;
        let mut requested: Vec<HostId> = Vec::with_capacity(hosts.len());
        for host in hosts {
            if !requested.contains(host) {
                requested.push(host.clone());
            }
        }
        let _guards = self
            .inner
            .core
            .lock_all(requested.iter().map(host_key).collect())
            .await;
        let mut reported = self
            .inner
            .core
            .call(
                "move_hosts",
                self.inner.driver.move_hosts(ctx, &requested, destination),
            )
            .await
            .map_err(|err| err.with_context(format!("move hosts to {destination}")))?;

        let results = requested
            .into_iter()
            .map(|host| {
                reported
                    .iter()
                    .position(|result| result.host == host)
                    .map_or_else(
                        || HostMoveResult::failed(host.clone(), "backend reported no outcome"),
                        |index| reported.swap_remove(index),
                    )
            })
            .collect::<Vec<_>>();

        for result in &results {
            match &result.status {
                HostMoveStatus::Moved => {
                    debug!(
                        host = %result.host,
                        %destination,
                        operation = %ctx,
                        "network move confirmed"
                    );
                }
                HostMoveStatus::Failed { reason } => {
                    warn!(
                        host = %result.host,
                        %destination,
                        operation = %ctx,
                        %reason,
                        "network move failed"
                    );
                }
            }
        }
        Ok(results)
    }

    /// Shuts the instance down. Later calls fail with `InstanceClosed`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        info!(backend = %self.descriptor(), "network instance closed");
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.is_closed() {
            return Err(BackendError::Closed {
                name: self.descriptor().to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for NetworkInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkInstance")
            .field("descriptor", self.descriptor())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
