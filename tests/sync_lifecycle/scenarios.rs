//! BDD scenarios for the sync lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{SyncContext, sync_context};

#[scenario(
    path = "tests/features/sync.feature",
    name = "Staged changes are pushed by a sync"
)]
fn scenario_push(sync_context: SyncContext) {
    drop(sync_context);
}

#[scenario(
    path = "tests/features/sync.feature",
    name = "Failed sync keeps local changes"
)]
fn scenario_failed_sync(sync_context: SyncContext) {
    drop(sync_context);
}

#[scenario(
    path = "tests/features/sync.feature",
    name = "Syncing before loading is refused"
)]
fn scenario_unloaded(sync_context: SyncContext) {
    drop(sync_context);
}
