//! Shared fixtures for move BDD scenarios.

use std::sync::Arc;

use hwsvc::test_support::{ScriptedInventory, ScriptedNetwork};
use hwsvc::{
    InstanceOptions, InventoryInstance, MoveError, MoveOrchestrator, MoveOutcome,
    NetworkInstance,
};
use rstest::fixture;

use crate::test_constants::{DESTINATION_CLOUD, SOURCE_CLOUD};

#[derive(Clone, Debug)]
pub struct MoveContext {
    pub inventory: Arc<ScriptedInventory>,
    pub network: Arc<ScriptedNetwork>,
    pub outcome: Option<Result<MoveOutcome, MoveError>>,
}

impl MoveContext {
    pub fn orchestrator(&self) -> MoveOrchestrator {
        MoveOrchestrator::new(
            InventoryInstance::new(self.inventory.clone(), InstanceOptions::default()),
            NetworkInstance::new(self.network.clone(), InstanceOptions::default()),
        )
    }

    /// Seeds the standard clouds with `host` assigned to `cloud`.
    pub fn seed_host(&self, host: &str, cloud: &str) {
        self.inventory
            .seed(&[SOURCE_CLOUD, DESTINATION_CLOUD], &[(host, Some(cloud))]);
    }
}

#[fixture]
pub fn move_context() -> MoveContext {
    MoveContext {
        inventory: ScriptedInventory::new("mock://inventory"),
        network: ScriptedNetwork::new("mock://network"),
        outcome: None,
    }
}
