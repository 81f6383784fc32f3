//! Error taxonomy shared by every driver and by the layers above them.
//!
//! Drivers may only surface the kinds enumerated in [`ErrorKind`]. Layers
//! above the drivers add context with [`BackendError::with_context`] and never
//! change the kind, so callers can always branch on [`BackendError::kind`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::model::{CloudId, HostId};

/// Classification of every failure a backend operation can report.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// No driver is registered under the requested name.
    UnknownDriver,
    /// A driver name was registered twice.
    DuplicateDriver,
    /// The backend endpoint could not be reached.
    BackendUnavailable,
    /// The backend did not answer before the deadline; the outcome is unknown.
    BackendTimeout,
    /// The backend answered with something the driver could not interpret.
    BackendProtocolError,
    /// The addressed host, cloud, or store does not exist.
    NotFound,
    /// Concurrent modification or a violated precondition.
    Conflict,
    /// The backend store already exists.
    AlreadyInitialized,
    /// The backend does not implement the requested operation.
    NotSupportedByBackend,
    /// The instance was shut down before the call.
    InstanceClosed,
}

impl ErrorKind {
    /// Returns `true` for transport-level kinds a caller may retry with
    /// backoff.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::BackendUnavailable | Self::BackendTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::UnknownDriver => "unknown driver",
            Self::DuplicateDriver => "duplicate driver",
            Self::BackendUnavailable => "backend unavailable",
            Self::BackendTimeout => "backend timeout",
            Self::BackendProtocolError => "backend protocol error",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::AlreadyInitialized => "already initialized",
            Self::NotSupportedByBackend => "not supported by backend",
            Self::InstanceClosed => "instance closed",
        };
        f.write_str(label)
    }
}

/// Resource addressed by a semantic error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resource {
    /// A host record.
    Host(HostId),
    /// A cloud record.
    Cloud(CloudId),
    /// The backend-side store itself.
    Store(String),
    /// A backend instance.
    Instance(String),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(id) => write!(f, "host {id}"),
            Self::Cloud(id) => write!(f, "cloud {id}"),
            Self::Store(endpoint) => write!(f, "store {endpoint}"),
            Self::Instance(name) => write!(f, "instance {name}"),
        }
    }
}

/// Errors raised by drivers and backend instances.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when the endpoint refuses or drops the connection.
    #[error("backend {endpoint} unavailable: {message}")]
    Unavailable {
        /// Endpoint that could not be reached.
        endpoint: String,
        /// Transport error reported by the driver.
        message: String,
    },
    /// Raised when an operation exceeds its deadline.
    #[error("{operation} did not complete within {}ms", .after.as_millis())]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Deadline that elapsed.
        after: Duration,
    },
    /// Raised when a backend response cannot be interpreted.
    #[error("malformed backend response: {message}")]
    Protocol {
        /// Description of the malformed payload.
        message: String,
    },
    /// Raised when the addressed resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Missing resource.
        resource: Resource,
    },
    /// Raised on version mismatches and violated preconditions.
    #[error("conflict on {resource}: {reason}")]
    Conflict {
        /// Resource that could not be modified.
        resource: Resource,
        /// Why the modification was refused.
        reason: String,
    },
    /// Raised when initialising a store that already exists.
    #[error("store {endpoint} is already initialized; rerun with force to reinitialize")]
    AlreadyInitialized {
        /// Endpoint of the existing store.
        endpoint: String,
    },
    /// Raised when the driver does not implement an operation.
    #[error("{operation} is not supported by backend {backend}")]
    NotSupported {
        /// Operation that was requested.
        operation: &'static str,
        /// Name of the driver.
        backend: String,
    },
    /// Raised when an instance is used after shutdown.
    #[error("backend instance {name} is closed")]
    Closed {
        /// Name of the closed instance.
        name: String,
    },
    /// Adds caller context while preserving the underlying kind.
    #[error("{context}: {source}")]
    Context {
        /// What the caller was doing.
        context: String,
        /// Underlying failure.
        #[source]
        source: Box<Self>,
    },
}

impl BackendError {
    /// Returns the taxonomy kind, looking through any context layers.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Context { source, .. } => source.kind(),
            Self::Unavailable { .. } => ErrorKind::BackendUnavailable,
            Self::Timeout { .. } => ErrorKind::BackendTimeout,
            Self::Protocol { .. } => ErrorKind::BackendProtocolError,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::AlreadyInitialized { .. } => ErrorKind::AlreadyInitialized,
            Self::NotSupported { .. } => ErrorKind::NotSupportedByBackend,
            Self::Closed { .. } => ErrorKind::InstanceClosed,
        }
    }

    /// Returns the innermost error beneath any context layers.
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Wraps the error with a description of the failing step.
    #[must_use]
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns `true` when the caller may retry after backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    /// Builds a [`BackendError::NotFound`] for a host.
    #[must_use]
    pub fn host_not_found(id: &HostId) -> Self {
        Self::NotFound {
            resource: Resource::Host(id.clone()),
        }
    }

    /// Builds a [`BackendError::NotFound`] for a cloud.
    #[must_use]
    pub fn cloud_not_found(id: &CloudId) -> Self {
        Self::NotFound {
            resource: Resource::Cloud(id.clone()),
        }
    }

    /// Builds a [`BackendError::NotFound`] for a missing backend store.
    #[must_use]
    pub fn store_not_found(endpoint: impl Into<String>) -> Self {
        Self::NotFound {
            resource: Resource::Store(endpoint.into()),
        }
    }

    /// Builds a [`BackendError::Conflict`].
    #[must_use]
    pub fn conflict(resource: Resource, reason: impl Into<String>) -> Self {
        Self::Conflict {
            resource,
            reason: reason.into(),
        }
    }
}
