//! Coordinates host moves across the network and inventory backends.
//!
//! A move is applied to the network first. The inventory only learns about
//! the new cloud once the network backend confirms the host was placed, so
//! inventory may lag the network but never claims an unconfirmed move.

use std::collections::BTreeSet;
use std::slice;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, ErrorKind, HostMoveStatus, Resource};
use crate::instance::{InventoryInstance, KeyedLocks, NetworkInstance, host_key};
use crate::model::{CloudAssignment, CloudId, HostId, HostPatch, MoveRequest, OperationContext};

/// Successful result of a move.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MoveOutcome {
    /// The network and the inventory now place the host in the destination.
    Moved {
        /// Host that moved.
        host: HostId,
        /// Assignment before the move.
        from: CloudAssignment,
        /// Cloud the host now belongs to.
        to: CloudId,
    },
    /// The host was already in the destination; nothing was called.
    AlreadyInDestination {
        /// Host that was asked to move.
        host: HostId,
        /// Its current cloud.
        cloud: CloudId,
    },
}

impl MoveOutcome {
    /// Host the outcome refers to.
    #[must_use]
    pub const fn host(&self) -> &HostId {
        match self {
            Self::Moved { host, .. } | Self::AlreadyInDestination { host, .. } => host,
        }
    }
}

/// Reasons a move did not complete.
#[derive(Clone, Debug, Error)]
pub enum MoveError {
    /// The host failed validation against the inventory.
    #[error("cannot move {host}: {source}")]
    Validation {
        /// Host that was asked to move.
        host: HostId,
        /// Inventory error explaining the rejection.
        #[source]
        source: BackendError,
    },
    /// The destination cloud is not known to the inventory.
    #[error("cannot move hosts to {destination}: {source}")]
    Destination {
        /// Requested destination.
        destination: CloudId,
        /// Inventory error explaining the rejection.
        #[source]
        source: BackendError,
    },
    /// The network backend reported a per-host failure. Inventory is
    /// untouched.
    #[error("network backend did not move {host} to {destination}: {reason}")]
    Network {
        /// Host that failed to move.
        host: HostId,
        /// Requested destination.
        destination: CloudId,
        /// Reason reported by the network backend.
        reason: String,
    },
    /// The network backend call failed as a whole. Inventory is untouched.
    #[error("network backend call failed while moving {host}: {source}")]
    NetworkBackend {
        /// Host that was asked to move.
        host: HostId,
        /// Backend failure.
        #[source]
        source: BackendError,
    },
    /// The network confirmed the move but the inventory update failed. The
    /// two backends disagree until the move is retried.
    #[error("network moved {host} to {destination} but the inventory update failed: {source}")]
    Inventory {
        /// Host that moved on the network.
        host: HostId,
        /// Destination confirmed by the network.
        destination: CloudId,
        /// Inventory failure.
        #[source]
        source: BackendError,
    },
}

impl MoveError {
    /// Taxonomy kind of the underlying backend failure; `None` for a
    /// per-host refusal reported by the network backend.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        self.backend_error().map(BackendError::kind)
    }

    /// Underlying backend error, when one caused the failure.
    #[must_use]
    pub const fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::Validation { source, .. }
            | Self::Destination { source, .. }
            | Self::NetworkBackend { source, .. }
            | Self::Inventory { source, .. } => Some(source),
            Self::Network { .. } => None,
        }
    }

    /// Host the error refers to; `None` when the whole request was
    /// rejected.
    #[must_use]
    pub const fn host(&self) -> Option<&HostId> {
        match self {
            Self::Validation { host, .. }
            | Self::Network { host, .. }
            | Self::NetworkBackend { host, .. }
            | Self::Inventory { host, .. } => Some(host),
            Self::Destination { .. } => None,
        }
    }
}

/// Outcome of one host within a batch move.
#[derive(Clone, Debug)]
pub struct HostMove {
    /// Host the entry refers to.
    pub host: HostId,
    /// What happened to it.
    pub result: Result<MoveOutcome, MoveError>,
}

/// Sequences moves across a network and an inventory backend.
#[derive(Debug)]
pub struct MoveOrchestrator {
    inventory: InventoryInstance,
    network: NetworkInstance,
    locks: KeyedLocks,
}

impl MoveOrchestrator {
    /// Creates an orchestrator over resolved instances.
    #[must_use]
    pub fn new(inventory: InventoryInstance, network: NetworkInstance) -> Self {
        Self {
            inventory,
            network,
            locks: KeyedLocks::default(),
        }
    }

    /// Inventory instance updated after confirmed moves.
    #[must_use]
    pub const fn inventory(&self) -> &InventoryInstance {
        &self.inventory
    }

    /// Network instance asked to perform moves.
    #[must_use]
    pub const fn network(&self) -> &NetworkInstance {
        &self.network
    }

    /// Moves `host` into `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError`] naming the step that failed. A network failure
    /// leaves the inventory untouched.
    pub async fn move_host(
        &self,
        ctx: &OperationContext,
        host: &HostId,
        destination: &CloudId,
    ) -> Result<MoveOutcome, MoveError> {
        let _guard = self.locks.lock(host_key(host)).await;
        let source = self.validate(host, destination).await?;
        if source.is(destination) {
            return Ok(already_there(host, destination));
        }
        self.perform(&MoveRequest {
            host: host.clone(),
            source,
            destination: destination.clone(),
            requested_by: ctx.clone(),
        })
        .await
    }

    /// Executes a prepared request. The host must still be assigned to the
    /// request's source, otherwise the request is stale and fails
    /// validation with `Conflict`.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError`] naming the step that failed.
    pub async fn execute(&self, request: &MoveRequest) -> Result<MoveOutcome, MoveError> {
        let _guard = self.locks.lock(host_key(&request.host)).await;
        let current = self.validate(&request.host, &request.destination).await?;
        if current.is(&request.destination) {
            return Ok(already_there(&request.host, &request.destination));
        }
        if current != request.source {
            return Err(MoveError::Validation {
                host: request.host.clone(),
                source: BackendError::conflict(
                    Resource::Host(request.host.clone()),
                    format!(
                        "move planned from {} but inventory now shows {current}",
                        request.source
                    ),
                ),
            });
        }
        self.perform(request).await
    }

    /// Moves several hosts into `destination` with one network call.
    ///
    /// Returns one entry per distinct host, in request order. Only hosts the
    /// network confirmed are updated in the inventory.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::Destination`] when the destination cloud does
    /// not exist; per-host failures are reported in the returned entries.
    pub async fn move_hosts(
        &self,
        ctx: &OperationContext,
        hosts: &[HostId],
        destination: &CloudId,
    ) -> Result<Vec<HostMove>, MoveError> {
        let mut seen = BTreeSet::new();
        let requested = hosts
            .iter()
            .filter(|host| seen.insert(*host))
            .cloned()
            .collect::<Vec<_>>();
        let _guards = self
            .locks
            .lock_all(requested.iter().map(host_key).collect())
            .await;

        self.check_destination(destination).await?;

        let mut entries = Vec::with_capacity(requested.len());
        let mut candidates = Vec::new();
        for host in &requested {
            match self.inventory.host(host).await {
                Ok(record) if record.cloud.is(destination) => entries.push(HostMove {
                    host: host.clone(),
                    result: Ok(already_there(host, destination)),
                }),
                Ok(record) => {
                    candidates.push((host.clone(), record.cloud));
                    entries.push(HostMove {
                        host: host.clone(),
                        result: Err(MoveError::Network {
                            host: host.clone(),
                            destination: destination.clone(),
                            reason: String::from("backend reported no outcome"),
                        }),
                    });
                }
                Err(source) => entries.push(HostMove {
                    host: host.clone(),
                    result: Err(MoveError::Validation {
                        host: host.clone(),
                        source,
                    }),
                }),
            }
        }
        if candidates.is_empty() {
            return Ok(entries);
        }

        let ids = candidates
            .iter()
            .map(|(host, _)| host.clone())
            .collect::<Vec<_>>();
        let reports = match self.network.move_hosts(ctx, &ids, destination).await {
            Ok(reports) => reports,
            Err(source) => {
                warn!(%destination, error = %source, "network backend rejected batch move");
                for entry in entries.iter_mut().filter(|entry| ids.contains(&entry.host)) {
                    entry.result = Err(MoveError::NetworkBackend {
                        host: entry.host.clone(),
                        source: source.clone(),
                    });
                }
                return Ok(entries);
            }
        };

        for (host, source) in candidates {
            let status = reports
                .iter()
                .find(|report| report.host == host)
                .map(|report| report.status.clone());
            let result = match status {
                Some(HostMoveStatus::Moved) => self.record(ctx, &host, source, destination).await,
                Some(HostMoveStatus::Failed { reason }) => Err(MoveError::Network {
                    host: host.clone(),
                    destination: destination.clone(),
                    reason,
                }),
                None => continue,
            };
            if let Some(entry) = entries.iter_mut().find(|entry| entry.host == host) {
                entry.result = result;
            }
        }
        Ok(entries)
    }

    async fn validate(
        &self,
        host: &HostId,
        destination: &CloudId,
    ) -> Result<CloudAssignment, MoveError> {
        let record = self
            .inventory
            .host(host)
            .await
            .map_err(|source| MoveError::Validation {
                host: host.clone(),
                source,
            })?;
        self.check_destination(destination).await?;
        Ok(record.cloud)
    }

    async fn check_destination(&self, destination: &CloudId) -> Result<(), MoveError> {
        self.inventory
            .cloud(destination)
            .await
            .map(drop)
            .map_err(|source| MoveError::Destination {
                destination: destination.clone(),
                source,
            })
    }

    async fn perform(&self, request: &MoveRequest) -> Result<MoveOutcome, MoveError> {
        let MoveRequest {
            host,
            source,
            destination,
            requested_by,
        } = request;
        debug!(
            %host,
            from = %source,
            to = %destination,
            operation = %requested_by,
            "moving host"
        );
        let reports = self
            .network
            .move_hosts(requested_by, slice::from_ref(host), destination)
            .await
            .map_err(|err| MoveError::NetworkBackend {
                host: host.clone(),
                source: err,
            })?;
        let status = reports
            .into_iter()
            .find(|report| &report.host == host)
            .map_or_else(
                || HostMoveStatus::Failed {
                    reason: String::from("backend reported no outcome"),
                },
                |report| report.status,
            );
        if let HostMoveStatus::Failed { reason } = status {
            warn!(
                %host,
                %destination,
                %reason,
                "network move failed; inventory left unchanged"
            );
            return Err(MoveError::Network {
                host: host.clone(),
                destination: destination.clone(),
                reason,
            });
        }
        self.record(requested_by, host, source.clone(), destination)
            .await
    }

    /// Writes a network-confirmed move into the inventory.
    async fn record(
        &self,
        ctx: &OperationContext,
        host: &HostId,
        source: CloudAssignment,
        destination: &CloudId,
    ) -> Result<MoveOutcome, MoveError> {
        let patch = HostPatch::new().assign(CloudAssignment::Cloud(destination.clone()));
        match self.inventory.update_host(host, &patch).await {
            Ok(_) => {
                info!(
                    %host,
                    from = %source,
                    to = %destination,
                    operation = %ctx,
                    "host moved"
                );
                Ok(MoveOutcome::Moved {
                    host: host.clone(),
                    from: source,
                    to: destination.clone(),
                })
            }
            Err(err) => {
                error!(
                    %host,
                    %destination,
                    operation = %ctx,
                    error = %err,
                    "network moved host but inventory update failed; backends disagree"
                );
                Err(MoveError::Inventory {
                    host: host.clone(),
                    destination: destination.clone(),
                    source: err,
                })
            }
        }
    }
}

fn already_there(host: &HostId, destination: &CloudId) -> MoveOutcome {
    debug!(%host, cloud = %destination, "host already in destination");
    MoveOutcome::AlreadyInDestination {
        host: host.clone(),
        cloud: destination.clone(),
    }
}
