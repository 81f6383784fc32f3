//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::instance::{InstanceOptions, InventoryInstance, NetworkInstance};
use crate::model::BackendKind;
use crate::orchestrator::MoveOrchestrator;
use crate::registry::{DriverRegistry, RegistryError};

const CONFIG_FILE_NAME: &str = "hwsvc.toml";

/// Backend selection derived from defaults, configuration files, and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HWSVC",
    discovery(
        app_name = "hwsvc",
        env_var = "HWSVC_CONFIG_PATH",
        config_file_name = "hwsvc.toml",
        dotfile_name = ".hwsvc.toml",
        project_file_name = "hwsvc.toml"
    )
)]
pub struct HardwareConfig {
    /// Registered name of the inventory driver (for example `File`).
    #[ortho_config(default = String::new())]
    pub inventory_backend_name: String,
    /// Endpoint handed to the inventory driver.
    #[ortho_config(default = String::new())]
    pub inventory_endpoint: String,
    /// Registered name of the network driver.
    #[ortho_config(default = String::new())]
    pub network_backend_name: String,
    /// Endpoint handed to the network driver.
    #[ortho_config(default = String::new())]
    pub network_endpoint: String,
    /// Whether removing a populated cloud detaches its hosts instead of
    /// failing.
    #[ortho_config(default = false)]
    pub force_on_remove: bool,
    /// Deadline for each backend call, in seconds.
    #[ortho_config(default = 30)]
    pub operation_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

/// Live backends resolved from configuration.
#[derive(Clone, Debug)]
pub struct HardwareServices {
    /// Inventory backend.
    pub inventory: InventoryInstance,
    /// Network backend.
    pub network: NetworkInstance,
}

impl HardwareServices {
    /// Builds a move orchestrator over both backends.
    #[must_use]
    pub fn orchestrator(&self) -> MoveOrchestrator {
        MoveOrchestrator::new(self.inventory.clone(), self.network.clone())
    }

    /// Shuts both backends down.
    pub fn close(&self) {
        self.inventory.close();
        self.network.close();
    }
}

impl HardwareConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("hwsvc")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply each missing value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidTimeout`] when the deadline is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.inventory_backend_name,
            &FieldMetadata::new(
                "inventory driver name",
                "HWSVC_INVENTORY_BACKEND_NAME",
                "inventory_backend_name",
            ),
        )?;
        Self::require_field(
            &self.inventory_endpoint,
            &FieldMetadata::new(
                "inventory endpoint",
                "HWSVC_INVENTORY_ENDPOINT",
                "inventory_endpoint",
            ),
        )?;
        Self::require_field(
            &self.network_backend_name,
            &FieldMetadata::new(
                "network driver name",
                "HWSVC_NETWORK_BACKEND_NAME",
                "network_backend_name",
            ),
        )?;
        Self::require_field(
            &self.network_endpoint,
            &FieldMetadata::new("network endpoint", "HWSVC_NETWORK_ENDPOINT", "network_endpoint"),
        )?;
        if self.operation_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    /// Instance tunables derived from configuration.
    #[must_use]
    pub const fn instance_options(&self) -> InstanceOptions {
        InstanceOptions {
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            force_on_remove: self.force_on_remove,
        }
    }

    /// Validates the configuration and resolves both backends.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or either driver cannot
    /// be resolved.
    pub fn connect(&self, registry: &DriverRegistry) -> Result<HardwareServices, ConfigError> {
        self.validate()?;
        let options = self.instance_options();
        let inventory = registry
            .resolve_inventory_with(&self.inventory_backend_name, &self.inventory_endpoint, options)
            .map_err(|source| ConfigError::Resolve {
                kind: BackendKind::Inventory,
                source,
            })?;
        let network = registry
            .resolve_network_with(&self.network_backend_name, &self.network_endpoint, options)
            .map_err(|source| ConfigError::Resolve {
                kind: BackendKind::Network,
                source,
            })?;
        Ok(HardwareServices { inventory, network })
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// The per-call deadline must be positive.
    #[error("operation_timeout_secs must be greater than zero")]
    InvalidTimeout,
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// A configured driver could not be resolved.
    #[error("cannot resolve {kind} backend: {source}")]
    Resolve {
        /// Backend that failed.
        kind: BackendKind,
        /// Registry failure.
        #[source]
        source: RegistryError,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
