//! BDD step definitions for the sync lifecycle.

use hwsvc::{BackendError, CloudId, ErrorKind, Mutation, OperationContext, SyncPhase};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::SyncContext;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn runtime() -> Result<Runtime, StepError> {
    Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))
}

fn ctx() -> OperationContext {
    OperationContext::new("sync-behaviour")
}

#[given("a loaded inventory instance")]
fn loaded_instance(sync_context: SyncContext) -> Result<SyncContext, StepError> {
    runtime()?.block_on(sync_context.instance.load_data(&ctx(), false, false))?;
    Ok(sync_context)
}

#[given("an unloaded inventory instance")]
fn unloaded_instance(sync_context: SyncContext) -> SyncContext {
    sync_context
}

#[given("the backend rejects the next sync")]
fn backend_rejects_sync(sync_context: SyncContext) -> SyncContext {
    sync_context.driver.fail_once(
        "sync_state",
        BackendError::Unavailable {
            endpoint: String::from("mock://sync"),
            message: String::from("connection reset"),
        },
    );
    sync_context
}

#[when("I stage cloud \"{cloud}\"")]
fn stage_cloud(sync_context: SyncContext, cloud: String) -> Result<SyncContext, StepError> {
    sync_context.instance.stage(Mutation::AddCloud {
        cloud: CloudId::new(cloud),
        description: String::new(),
    })?;
    Ok(sync_context)
}

#[when("I synchronise the inventory")]
fn synchronise(sync_context: SyncContext) -> Result<SyncContext, StepError> {
    let result = runtime()?
        .block_on(sync_context.instance.sync_state(&ctx()))
        .map(drop);
    Ok(SyncContext {
        outcome: Some(result),
        ..sync_context
    })
}

#[then("the instance phase is \"{phase}\"")]
fn phase_is(sync_context: &SyncContext, phase: String) -> Result<(), StepError> {
    let actual = sync_context.instance.phase();
    let expected = match phase.as_str() {
        "Uninitialized" => SyncPhase::Uninitialized,
        "Clean" => SyncPhase::Clean,
        "Dirty" => SyncPhase::Dirty,
        "Closed" => SyncPhase::Closed,
        other => return Err(StepError::Assertion(format!("unknown phase {other}"))),
    };
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?}, got {actual:?}"
        )))
    }
}

#[then("the sync error kind is \"{kind}\"")]
fn sync_error_kind(sync_context: &SyncContext, kind: String) -> Result<(), StepError> {
    let Some(Err(err)) = &sync_context.outcome else {
        return Err(StepError::Assertion(String::from(
            "expected a failed sync",
        )));
    };
    let expected = match kind.as_str() {
        "BackendUnavailable" => ErrorKind::BackendUnavailable,
        "Conflict" => ErrorKind::Conflict,
        other => return Err(StepError::Assertion(format!("unknown error kind {other}"))),
    };
    if err.kind() == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?}, got {:?} ({err})",
            err.kind()
        )))
    }
}

#[then("{count} change is still pending")]
fn changes_pending(sync_context: &SyncContext, count: usize) -> Result<(), StepError> {
    let pending = sync_context.instance.pending().len();
    if pending == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} pending changes, found {pending}"
        )))
    }
}

#[then("the backend lists cloud \"{cloud}\"")]
fn backend_lists_cloud(sync_context: &SyncContext, cloud: String) -> Result<(), StepError> {
    let clouds = runtime()?.block_on(sync_context.instance.list_clouds())?;
    if clouds.iter().any(|candidate| candidate.id.as_str() == cloud) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{cloud} was not pushed")))
    }
}
