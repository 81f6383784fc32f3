//! Process-wide mapping from driver names to driver factories.
//!
//! Registration happens while the process starts; afterwards the registry is
//! read-mostly and `resolve` may be called from any task. Names are
//! namespaced per [`BackendKind`] and compared case-sensitively. Resolution
//! never substitutes a default driver.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, ErrorKind, InventoryService, NetworkService};
use crate::drivers;
use crate::instance::{BackendInstance, InstanceOptions, InventoryInstance, NetworkInstance};
use crate::model::{BackendDescriptor, BackendKind, Endpoint, EndpointError};

/// Builds an inventory driver bound to a descriptor.
pub type InventoryFactory = Arc<
    dyn Fn(&BackendDescriptor) -> Result<Arc<dyn InventoryService>, BackendError> + Send + Sync,
>;

/// Builds a network driver bound to a descriptor.
pub type NetworkFactory = Arc<
    dyn Fn(&BackendDescriptor) -> Result<Arc<dyn NetworkService>, BackendError> + Send + Sync,
>;

#[derive(Clone)]
enum DriverFactory {
    Inventory(InventoryFactory),
    Network(NetworkFactory),
}

/// Errors raised while registering or resolving drivers.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No factory is registered under the requested name.
    #[error("unknown {kind} driver `{name}` (registered: {})", known_list(.known))]
    UnknownDriver {
        /// Kind that was requested.
        kind: BackendKind,
        /// Requested driver name.
        name: String,
        /// Names registered for that kind.
        known: Vec<String>,
    },
    /// A factory is already registered under the name.
    #[error("{kind} driver `{name}` is already registered")]
    DuplicateDriver {
        /// Kind of the existing registration.
        kind: BackendKind,
        /// Conflicting driver name.
        name: String,
    },
    /// Driver names must contain a non-whitespace character.
    #[error("driver name must not be empty")]
    InvalidName,
    /// The endpoint string could not be parsed.
    #[error(transparent)]
    InvalidEndpoint(#[from] EndpointError),
    /// The factory refused to build a driver for the endpoint.
    #[error("driver `{name}` could not be constructed: {source}")]
    Factory {
        /// Driver name.
        name: String,
        /// Failure reported by the factory.
        #[source]
        source: BackendError,
    },
}

impl RegistryError {
    /// Maps the error onto the backend error taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownDriver { .. } | Self::InvalidName | Self::InvalidEndpoint(_) => {
                ErrorKind::UnknownDriver
            }
            Self::DuplicateDriver { .. } => ErrorKind::DuplicateDriver,
            Self::Factory { source, .. } => source.kind(),
        }
    }
}

fn known_list(known: &[String]) -> String {
    if known.is_empty() {
        String::from("none")
    } else {
        known.join(", ")
    }
}

/// Name-to-factory mapping for inventory and network drivers.
#[derive(Default)]
pub struct DriverRegistry {
    factories: RwLock<BTreeMap<(BackendKind, String), DriverFactory>>,
}

static GLOBAL: LazyLock<DriverRegistry> = LazyLock::new(DriverRegistry::builtin);

impl DriverRegistry {
    /// Creates a registry with no drivers.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in drivers.
    #[must_use]
    pub fn builtin() -> Self {
        let registry = Self::empty();
        if let Err(err) = drivers::register_builtin(&registry) {
            // An empty registry has nothing to collide with.
            warn!(error = %err, "built-in driver registration failed");
        }
        registry
    }

    /// Returns the process-wide registry, populated with the built-in
    /// drivers on first use.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Registers an inventory driver factory.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateDriver`] when the name is taken and
    /// [`RegistryError::InvalidName`] when it is blank.
    pub fn register_inventory<F>(&self, name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&BackendDescriptor) -> Result<Arc<dyn InventoryService>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(
            BackendKind::Inventory,
            name,
            DriverFactory::Inventory(Arc::new(factory)),
        )
    }

    /// Registers a network driver factory.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateDriver`] when the name is taken and
    /// [`RegistryError::InvalidName`] when it is blank.
    pub fn register_network<F>(&self, name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&BackendDescriptor) -> Result<Arc<dyn NetworkService>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(
            BackendKind::Network,
            name,
            DriverFactory::Network(Arc::new(factory)),
        )
    }

    fn insert(
        &self,
        kind: BackendKind,
        name: &str,
        factory: DriverFactory,
    ) -> Result<(), RegistryError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(RegistryError::InvalidName);
        }
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let key = (kind, trimmed.to_owned());
        if factories.contains_key(&key) {
            return Err(RegistryError::DuplicateDriver {
                kind,
                name: key.1,
            });
        }
        debug!(%kind, name = trimmed, "driver registered");
        factories.insert(key, factory);
        Ok(())
    }

    /// Lists registered driver names for `kind` in sorted order.
    #[must_use]
    pub fn names(&self, kind: BackendKind) -> Vec<String> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(registered, _)| *registered == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn factory(&self, kind: BackendKind, name: &str) -> Result<DriverFactory, RegistryError> {
        let factories = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        factories
            .get(&(kind, name.trim().to_owned()))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownDriver {
                kind,
                name: name.to_owned(),
                known: factories
                    .keys()
                    .filter(|(registered, _)| *registered == kind)
                    .map(|(_, known)| known.clone())
                    .collect(),
            })
    }

    /// Resolves `descriptor` into a live instance.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownDriver`] when no factory matches the
    /// descriptor's name and kind, or [`RegistryError::Factory`] when the
    /// factory rejects the endpoint.
    pub fn resolve(
        &self,
        descriptor: &BackendDescriptor,
        options: InstanceOptions,
    ) -> Result<BackendInstance, RegistryError> {
        let factory = self.factory(descriptor.kind, &descriptor.name)?;
        let wrap = |source: BackendError| RegistryError::Factory {
            name: descriptor.name.clone(),
            source,
        };
        let instance = match factory {
            DriverFactory::Inventory(build) => BackendInstance::Inventory(InventoryInstance::new(
                build(descriptor).map_err(wrap)?,
                options,
            )),
            DriverFactory::Network(build) => BackendInstance::Network(NetworkInstance::new(
                build(descriptor).map_err(wrap)?,
                options,
            )),
        };
        info!(backend = %descriptor, "backend resolved");
        Ok(instance)
    }

    /// Resolves an inventory driver with default options.
    ///
    /// # Errors
    ///
    /// See [`DriverRegistry::resolve_inventory_with`].
    pub fn resolve_inventory(
        &self,
        name: &str,
        endpoint: &str,
    ) -> Result<InventoryInstance, RegistryError> {
        self.resolve_inventory_with(name, endpoint, InstanceOptions::default())
    }

    /// Resolves an inventory driver.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidEndpoint`] for a malformed endpoint
    /// and the errors of [`DriverRegistry::resolve`] otherwise.
    pub fn resolve_inventory_with(
        &self,
        name: &str,
        endpoint: &str,
        options: InstanceOptions,
    ) -> Result<InventoryInstance, RegistryError> {
        let descriptor = describe(name, BackendKind::Inventory, endpoint)?;
        match self.resolve(&descriptor, options)? {
            BackendInstance::Inventory(instance) => Ok(instance),
            BackendInstance::Network(_) => Err(unknown(BackendKind::Inventory, name)),
        }
    }

    /// Resolves a network driver with default options.
    ///
    /// # Errors
    ///
    /// See [`DriverRegistry::resolve_network_with`].
    pub fn resolve_network(
        &self,
        name: &str,
        endpoint: &str,
    ) -> Result<NetworkInstance, RegistryError> {
        self.resolve_network_with(name, endpoint, InstanceOptions::default())
    }

    /// Resolves a network driver.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidEndpoint`] for a malformed endpoint
    /// and the errors of [`DriverRegistry::resolve`] otherwise.
    pub fn resolve_network_with(
        &self,
        name: &str,
        endpoint: &str,
        options: InstanceOptions,
    ) -> Result<NetworkInstance, RegistryError> {
        let descriptor = describe(name, BackendKind::Network, endpoint)?;
        match self.resolve(&descriptor, options)? {
            BackendInstance::Network(instance) => Ok(instance),
            BackendInstance::Inventory(_) => Err(unknown(BackendKind::Network, name)),
        }
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("inventory", &self.names(BackendKind::Inventory))
            .field("network", &self.names(BackendKind::Network))
            .finish()
    }
}

fn describe(
    name: &str,
    kind: BackendKind,
    endpoint: &str,
) -> Result<BackendDescriptor, RegistryError> {
    Ok(BackendDescriptor::new(
        name.trim(),
        kind,
        Endpoint::parse(endpoint)?,
    ))
}

fn unknown(kind: BackendKind, name: &str) -> RegistryError {
    RegistryError::UnknownDriver {
        kind,
        name: name.to_owned(),
        known: Vec::new(),
    }
}
