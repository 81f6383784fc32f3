//! Binary entry point for the `hwsvc` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use hwsvc::model::Attributes;
use hwsvc::{
    BackendError, BackendKind, CloudAssignment, CloudId, ConfigError, DriverRegistry,
    HardwareConfig, HardwareServices, HostId, MoveError, MoveOutcome, Mutation, OperationContext,
};

mod cli;

use cli::{Cli, StoreCommand};

const LOG_ENV_VAR: &str = "HWSVC_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("move failed: {0}")]
    Move(#[from] MoveError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let mut stdout = io::stdout();
    let exit_code = match dispatch(cli, DriverRegistry::global(), &mut stdout).await {
        Ok(()) => 0,
        Err(err) => {
            write_error(io::stderr(), &err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(
    cli: Cli,
    registry: &DriverRegistry,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let Cli::Store(command) = cli else {
        return write_drivers(registry, out);
    };

    let mut config = HardwareConfig::load_without_cli_args()?;
    if let StoreCommand::RemoveCloud(args) = &command {
        config.force_on_remove |= args.force;
    }
    let services = config.connect(registry)?;
    let ctx = OperationContext::new(format!("hwsvc {}", command_name(&command)));
    let outcome = execute(command, &services, &ctx, out).await;
    services.close();
    outcome
}

const fn command_name(command: &StoreCommand) -> &'static str {
    match command {
        StoreCommand::Init(_) => "init",
        StoreCommand::Hosts => "hosts",
        StoreCommand::Clouds => "clouds",
        StoreCommand::Sync => "sync",
        StoreCommand::AddCloud(_) => "add-cloud",
        StoreCommand::AddHost(_) => "add-host",
        StoreCommand::Move(_) => "move",
        StoreCommand::RemoveHost(_) => "remove-host",
        StoreCommand::RemoveCloud(_) => "remove-cloud",
    }
}

async fn execute(
    command: StoreCommand,
    services: &HardwareServices,
    ctx: &OperationContext,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let inventory = &services.inventory;
    match command {
        StoreCommand::Init(args) => {
            let state = inventory.init_data(ctx, args.force).await?;
            writeln!(out, "initialised inventory store at version {}", state.version)?;
            Ok(())
        }
        StoreCommand::Hosts => {
            for host in inventory.list_hosts().await? {
                writeln!(out, "{}\t{}", host.id, host.cloud)?;
            }
            Ok(())
        }
        StoreCommand::Clouds => {
            for cloud in inventory.list_clouds().await? {
                writeln!(
                    out,
                    "{}\t{} hosts\t{}",
                    cloud.id,
                    cloud.hosts.len(),
                    cloud.description
                )?;
            }
            Ok(())
        }
        StoreCommand::Sync => {
            inventory.load_data(ctx, false, false).await?;
            let state = inventory.sync_state(ctx).await?;
            writeln!(
                out,
                "inventory at version {}: {} hosts, {} clouds",
                state.version,
                inventory.cached_hosts().len(),
                inventory.cached_clouds().len()
            )?;
            Ok(())
        }
        StoreCommand::AddCloud(args) => {
            let cloud = CloudId::new(args.cloud);
            push_change(
                services,
                ctx,
                Mutation::AddCloud {
                    cloud: cloud.clone(),
                    description: args.description,
                },
            )
            .await?;
            writeln!(out, "added cloud {cloud}")?;
            Ok(())
        }
        StoreCommand::AddHost(args) => {
            let host = HostId::new(args.host);
            let cloud = args.cloud.map_or(CloudAssignment::Unassigned, |id| {
                CloudAssignment::Cloud(CloudId::new(id))
            });
            push_change(
                services,
                ctx,
                Mutation::AddHost {
                    host: host.clone(),
                    attributes: Attributes::new(),
                    cloud: cloud.clone(),
                },
            )
            .await?;
            writeln!(out, "added host {host} ({cloud})")?;
            Ok(())
        }
        StoreCommand::Move(args) => {
            let outcome = services
                .orchestrator()
                .move_host(ctx, &HostId::new(args.host), &CloudId::new(args.cloud))
                .await?;
            match outcome {
                MoveOutcome::Moved { host, from, to } => {
                    writeln!(out, "moved {host} from {from} to {to}")?;
                }
                MoveOutcome::AlreadyInDestination { host, cloud } => {
                    writeln!(out, "{host} is already in {cloud}")?;
                }
            }
            Ok(())
        }
        StoreCommand::RemoveHost(args) => {
            let host = HostId::new(args.host);
            inventory.remove_host(&host).await?;
            writeln!(out, "removed host {host}")?;
            Ok(())
        }
        StoreCommand::RemoveCloud(args) => {
            let cloud = CloudId::new(args.cloud);
            inventory.remove_cloud(&cloud).await?;
            writeln!(out, "removed cloud {cloud}")?;
            Ok(())
        }
    }
}

/// Loads the inventory, stages `mutation` and pushes it in one sync.
async fn push_change(
    services: &HardwareServices,
    ctx: &OperationContext,
    mutation: Mutation,
) -> Result<(), CliError> {
    let inventory = &services.inventory;
    inventory.load_data(ctx, false, false).await?;
    inventory.stage(mutation)?;
    inventory.sync_state(ctx).await?;
    Ok(())
}

fn write_drivers(registry: &DriverRegistry, out: &mut impl Write) -> Result<(), CliError> {
    for kind in [BackendKind::Inventory, BackendKind::Network] {
        writeln!(out, "{kind}: {}", registry.names(kind).join(", "))?;
    }
    Ok(())
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
