//! Inventory data model shared by drivers, instances, and the orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

mod snapshot;

pub use snapshot::{InventorySnapshot, Mutation};

/// Hardware facts attached to a host, keyed by attribute name.
pub type Attributes = BTreeMap<String, Value>;

/// Family of backend a driver serves.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Authoritative host and cloud inventory.
    Inventory,
    /// Physical network placement.
    Network,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inventory => f.write_str("inventory"),
            Self::Network => f.write_str("network"),
        }
    }
}

/// Errors raised while parsing an endpoint.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EndpointError {
    /// Raised when the endpoint is blank.
    #[error("endpoint must not be empty")]
    Empty,
    /// Raised when the endpoint lacks a `scheme://` prefix.
    #[error("endpoint {0} must take the form scheme://target")]
    MissingScheme(String),
}

/// Connection target of a backend, in `scheme://target` form.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Endpoint(String);

impl Endpoint {
    /// Parses an endpoint, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] when the value is blank or has no scheme.
    pub fn parse(value: impl Into<String>) -> Result<Self, EndpointError> {
        let trimmed = value.into().trim().to_owned();
        if trimmed.is_empty() {
            return Err(EndpointError::Empty);
        }
        match trimmed.split_once("://") {
            Some((scheme, _)) if !scheme.is_empty() => Ok(Self(trimmed)),
            _ => Err(EndpointError::MissingScheme(trimmed)),
        }
    }

    /// Returns the scheme (for example `memory`).
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.0.split_once("://").map_or("", |(scheme, _)| scheme)
    }

    /// Returns everything after `scheme://`.
    #[must_use]
    pub fn target(&self) -> &str {
        self.0.split_once("://").map_or("", |(_, target)| target)
    }

    /// Returns the endpoint as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a resolved backend. Immutable once resolved.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct BackendDescriptor {
    /// Driver name used for registry lookup.
    pub name: String,
    /// Backend family.
    pub kind: BackendKind,
    /// Connection target.
    pub endpoint: Endpoint,
}

impl BackendDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: BackendKind, endpoint: Endpoint) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint,
        }
    }
}

impl fmt::Display for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} at {}", self.name, self.kind, self.endpoint)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier, trimming surrounding whitespace.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into().trim().to_owned())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Unique host identifier.
    HostId
);
string_id!(
    /// Unique cloud identifier.
    CloudId
);

/// Cloud a host currently belongs to.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudAssignment {
    /// The host is in the free pool.
    #[default]
    Unassigned,
    /// The host is reserved into a cloud.
    Cloud(CloudId),
}

impl CloudAssignment {
    /// Returns the cloud identifier when assigned.
    #[must_use]
    pub const fn cloud(&self) -> Option<&CloudId> {
        match self {
            Self::Unassigned => None,
            Self::Cloud(id) => Some(id),
        }
    }

    /// Returns `true` when the assignment names `cloud`.
    #[must_use]
    pub fn is(&self, cloud: &CloudId) -> bool {
        self.cloud() == Some(cloud)
    }
}

impl From<CloudId> for CloudAssignment {
    fn from(value: CloudId) -> Self {
        Self::Cloud(value)
    }
}

impl fmt::Display for CloudAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unassigned => f.write_str("unassigned"),
            Self::Cloud(id) => write!(f, "{id}"),
        }
    }
}

/// A physical or virtual machine tracked by the inventory.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Host {
    /// Host identity.
    pub id: HostId,
    /// Hardware facts.
    #[serde(default)]
    pub attributes: Attributes,
    /// Current cloud.
    #[serde(default)]
    pub cloud: CloudAssignment,
    /// Per-record revision, bumped on every backend-side change.
    #[serde(default)]
    pub revision: u64,
}

impl Host {
    /// Creates an unassigned host with no attributes.
    #[must_use]
    pub fn new(id: impl Into<HostId>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
            cloud: CloudAssignment::Unassigned,
            revision: 0,
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the cloud assignment.
    #[must_use]
    pub fn assigned_to(mut self, cloud: impl Into<CloudId>) -> Self {
        self.cloud = CloudAssignment::Cloud(cloud.into());
        self
    }
}

/// A named group of hosts reserved together.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Cloud {
    /// Cloud identity.
    pub id: CloudId,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Member hosts, derived from host assignments.
    #[serde(default)]
    pub hosts: BTreeSet<HostId>,
    /// Per-record revision, bumped on every backend-side change.
    #[serde(default)]
    pub revision: u64,
}

impl Cloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new(id: impl Into<CloudId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            hosts: BTreeSet::new(),
            revision: 0,
        }
    }
}

/// Changes to apply to a host record.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostPatch {
    /// Attributes to insert or overwrite.
    pub set: Attributes,
    /// Attribute keys to drop.
    pub unset: BTreeSet<String>,
    /// New cloud assignment, when changing it.
    pub cloud: Option<CloudAssignment>,
    /// Revision the caller last observed; mismatches fail with a conflict.
    pub expected_revision: Option<u64>,
}

impl HostPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(key.into(), value.into());
        self
    }

    /// Removes an attribute.
    #[must_use]
    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.unset.insert(key.into());
        self
    }

    /// Reassigns the host.
    #[must_use]
    pub fn assign(mut self, cloud: CloudAssignment) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Guards the patch with the revision the caller last observed.
    #[must_use]
    pub const fn expect_revision(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }
}

/// Changes to apply to a cloud record.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CloudPatch {
    /// New description, when changing it.
    pub description: Option<String>,
    /// Revision the caller last observed; mismatches fail with a conflict.
    pub expected_revision: Option<u64>,
}

impl CloudPatch {
    /// Creates a patch that replaces the description.
    #[must_use]
    pub fn describe(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            expected_revision: None,
        }
    }
}

/// Opaque version token issued by a backend for its whole store.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Wraps a token returned by a backend.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Token for a store generation counter.
    #[must_use]
    pub fn from_generation(generation: u64) -> Self {
        Self(format!("g{generation}"))
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one batch of staged mutations pushed by `sync_state`.
///
/// Stays fixed while the same batch is retried, so a driver that already
/// committed it can answer the retry without applying it twice.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Generates an identifier no other batch shares.
    #[must_use]
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Synchronisation bookkeeping for one backend instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncState {
    /// When backend state was last pulled into the local model.
    pub last_loaded_at: SystemTime,
    /// Whether the local model holds changes the backend has not confirmed.
    pub dirty: bool,
    /// Backend version the local model was built from.
    pub version: VersionToken,
}

/// Attribution for an operation issued by the scheduler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationContext {
    /// Who asked for the operation (for example a scheduler command).
    pub actor: String,
    /// Correlation identifier, unique per operation.
    pub operation_id: Uuid,
}

impl OperationContext {
    /// Creates a context with a fresh operation identifier.
    #[must_use]
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            operation_id: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.actor, self.operation_id)
    }
}

/// A single host reassignment, consumed by the move orchestrator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MoveRequest {
    /// Host to move.
    pub host: HostId,
    /// Assignment observed when the move was requested.
    pub source: CloudAssignment,
    /// Cloud the host should end up in.
    pub destination: CloudId,
    /// Scheduler operation that asked for the move.
    pub requested_by: OperationContext,
}

#[cfg(test)]
mod tests;
