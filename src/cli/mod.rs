//! Command-line interface definitions for the `hwsvc` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `hwsvc` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hwsvc",
    about = "Inspect and drive the hardware inventory and network backends",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// List the registered inventory and network drivers.
    #[command(name = "drivers")]
    Drivers,
    #[command(flatten)]
    Store(StoreCommand),
}

/// Subcommands that need configured backends.
#[derive(Debug, Subcommand)]
pub(crate) enum StoreCommand {
    /// Create the inventory store.
    #[command(name = "init")]
    Init(InitCommand),
    /// List hosts known to the inventory.
    #[command(name = "hosts")]
    Hosts,
    /// List clouds known to the inventory.
    #[command(name = "clouds")]
    Clouds,
    /// Load the inventory and synchronise it with the backend.
    #[command(name = "sync")]
    Sync,
    /// Register a cloud in the inventory.
    #[command(name = "add-cloud")]
    AddCloud(AddCloudCommand),
    /// Register a host in the inventory.
    #[command(name = "add-host")]
    AddHost(AddHostCommand),
    /// Move a host into a cloud across the network and the inventory.
    #[command(name = "move")]
    Move(MoveCommand),
    /// Remove a host from the inventory.
    #[command(name = "remove-host")]
    RemoveHost(RemoveHostCommand),
    /// Remove a cloud from the inventory.
    #[command(name = "remove-cloud")]
    RemoveCloud(RemoveCloudCommand),
}

/// Arguments for the `hwsvc init` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct InitCommand {
    /// Recreate the store even if one already exists.
    #[arg(long)]
    pub(crate) force: bool,
}

/// Arguments for the `hwsvc add-cloud` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct AddCloudCommand {
    /// Cloud identifier.
    pub(crate) cloud: String,
    /// Free-form description of the allocation.
    #[arg(long, default_value = "")]
    pub(crate) description: String,
}

/// Arguments for the `hwsvc add-host` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct AddHostCommand {
    /// Host identifier.
    pub(crate) host: String,
    /// Cloud the host starts in; omitted hosts join the free pool.
    #[arg(long, value_name = "CLOUD")]
    pub(crate) cloud: Option<String>,
}

/// Arguments for the `hwsvc move` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct MoveCommand {
    /// Host to move.
    pub(crate) host: String,
    /// Destination cloud.
    pub(crate) cloud: String,
}

/// Arguments for the `hwsvc remove-host` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RemoveHostCommand {
    /// Host to remove.
    pub(crate) host: String,
}

/// Arguments for the `hwsvc remove-cloud` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RemoveCloudCommand {
    /// Cloud to remove.
    pub(crate) cloud: String,
    /// Detach member hosts instead of refusing a populated cloud.
    #[arg(long)]
    pub(crate) force: bool,
}
