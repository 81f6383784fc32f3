//! Pluggable hardware inventory and network backends for a cluster
//! reservation scheduler.
//!
//! Drivers are selected by name at start-up through the
//! [`DriverRegistry`], wrapped into live instances that enforce deadlines
//! and per-identifier ordering, and kept consistent with their backend by a
//! load/sync/write state machine. Host moves are sequenced across the
//! network and inventory backends by the [`MoveOrchestrator`].

pub mod backend;
pub mod config;
pub mod drivers;
pub mod instance;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod sync;
pub mod test_support;

pub use backend::{
    BackendError, BackendFuture, ErrorKind, HardwareService, HostMoveResult, HostMoveStatus,
    InventoryService, NetworkService, Resource,
};
pub use config::{ConfigError, HardwareConfig, HardwareServices};
pub use drivers::{FILE_DRIVER, MEMORY_DRIVER};
pub use instance::{
    BackendInstance, DEFAULT_OPERATION_TIMEOUT, InstanceOptions, InventoryInstance,
    NetworkInstance,
};
pub use model::{
    BackendDescriptor, BackendKind, BatchId, Cloud, CloudAssignment, CloudId, CloudPatch,
    Endpoint, Host, HostId, HostPatch, InventorySnapshot, MoveRequest, Mutation,
    OperationContext, SyncState, VersionToken,
};
pub use orchestrator::{HostMove, MoveError, MoveOrchestrator, MoveOutcome};
pub use registry::{DriverRegistry, RegistryError};
pub use sync::{SyncCoordinator, SyncPhase};
