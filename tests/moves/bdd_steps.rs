//! BDD step definitions for host moves.

use hwsvc::{BackendError, CloudId, ErrorKind, HostId, MoveError, MoveOutcome, OperationContext};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::MoveContext;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("an inventory with host \"{host}\" in cloud \"{cloud}\"")]
fn inventory_with_host(move_context: MoveContext, host: String, cloud: String) -> MoveContext {
    move_context.seed_host(&host, &cloud);
    move_context
}

#[given("the network refuses host \"{host}\"")]
fn network_refuses(move_context: MoveContext, host: String) -> MoveContext {
    move_context.network.refuse(&host, "switch rejected the port change");
    move_context
}

#[given("the network backend is unavailable")]
fn network_unavailable(move_context: MoveContext) -> MoveContext {
    move_context.network.fail(
        "move_hosts",
        BackendError::Unavailable {
            endpoint: String::from("mock://network"),
            message: String::from("connection refused"),
        },
    );
    move_context
}

#[when("I move host \"{host}\" to cloud \"{cloud}\"")]
fn move_host(
    move_context: MoveContext,
    host: String,
    cloud: String,
) -> Result<MoveContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = move_context.orchestrator();
    let ctx = OperationContext::new("move-behaviour");
    let result = runtime.block_on(async move {
        orchestrator
            .move_host(&ctx, &HostId::new(host), &CloudId::new(cloud))
            .await
    });

    Ok(MoveContext {
        outcome: Some(result),
        ..move_context
    })
}

fn outcome(move_context: &MoveContext) -> Result<&Result<MoveOutcome, MoveError>, StepError> {
    move_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

fn failure(move_context: &MoveContext) -> Result<&MoveError, StepError> {
    match outcome(move_context)? {
        Err(err) => Ok(err),
        Ok(moved) => Err(StepError::Assertion(format!(
            "expected failure, got {moved:?}"
        ))),
    }
}

#[then("the move succeeds")]
fn move_succeeds(move_context: &MoveContext) -> Result<(), StepError> {
    match outcome(move_context)? {
        Ok(MoveOutcome::Moved { .. }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a confirmed move, got {other:?}"
        ))),
    }
}

#[then("the host is reported as already in place")]
fn already_in_place(move_context: &MoveContext) -> Result<(), StepError> {
    match outcome(move_context)? {
        Ok(MoveOutcome::AlreadyInDestination { .. }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a no-op, got {other:?}"
        ))),
    }
}

#[then("the move fails at the network")]
fn fails_at_network(move_context: &MoveContext) -> Result<(), StepError> {
    match failure(move_context)? {
        MoveError::Network { .. } => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a network refusal, got {other:?}"
        ))),
    }
}

#[then("the move error kind is \"{kind}\"")]
fn error_kind(move_context: &MoveContext, kind: String) -> Result<(), StepError> {
    let expected = parse_kind(&kind)?;
    let err = failure(move_context)?;
    if err.kind() == Some(expected) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?}, got {:?} ({err})",
            err.kind()
        )))
    }
}

#[then("the inventory places host \"{host}\" in cloud \"{cloud}\"")]
fn inventory_places(
    move_context: &MoveContext,
    host: String,
    cloud: String,
) -> Result<(), StepError> {
    let stored = move_context
        .inventory
        .stored_host(&host)
        .ok_or_else(|| StepError::Assertion(format!("{host} is not stored")))?;
    if stored.cloud.is(&CloudId::new(cloud.as_str())) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {host} in {cloud}, found {}",
            stored.cloud
        )))
    }
}

#[then("the network was not contacted")]
fn network_untouched(move_context: &MoveContext) -> Result<(), StepError> {
    match move_context.network.calls("move_hosts") {
        0 => Ok(()),
        calls => Err(StepError::Assertion(format!(
            "expected no network moves, saw {calls}"
        ))),
    }
}

fn parse_kind(kind: &str) -> Result<ErrorKind, StepError> {
    match kind {
        "NotFound" => Ok(ErrorKind::NotFound),
        "Conflict" => Ok(ErrorKind::Conflict),
        "BackendUnavailable" => Ok(ErrorKind::BackendUnavailable),
        "BackendTimeout" => Ok(ErrorKind::BackendTimeout),
        other => Err(StepError::Assertion(format!("unknown error kind {other}"))),
    }
}
