//! Shared fixtures for sync lifecycle scenarios.

use std::sync::Arc;

use hwsvc::test_support::ScriptedInventory;
use hwsvc::{BackendError, InstanceOptions, InventoryInstance};
use rstest::fixture;

#[derive(Clone, Debug)]
pub struct SyncContext {
    pub driver: Arc<ScriptedInventory>,
    pub instance: InventoryInstance,
    pub outcome: Option<Result<(), BackendError>>,
}

#[fixture]
pub fn sync_context() -> SyncContext {
    let driver = ScriptedInventory::new("mock://sync");
    driver.seed(&["cloud01"], &[("h1", Some("cloud01"))]);
    SyncContext {
        instance: InventoryInstance::new(driver.clone(), InstanceOptions::default()),
        driver,
        outcome: None,
    }
}
