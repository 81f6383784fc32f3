//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::backend::{
    BackendError, BackendFuture, HardwareService, HostMoveResult, HostMoveStatus,
    InventoryService, NetworkService,
};
use crate::drivers::{DocumentStore, MemoryStore, StoreDocument, StoredInventory, StoredNetwork};
use crate::model::{
    Attributes, BackendDescriptor, BackendKind, BatchId, Cloud, CloudAssignment, CloudId,
    CloudPatch, Endpoint, Host, HostId, HostPatch, InventorySnapshot, Mutation,
    OperationContext, VersionToken,
};

/// Driver name reported by the scripted doubles.
pub const SCRIPTED_DRIVER: &str = "Scripted";

/// Failures, delays, and call counts keyed by operation name.
#[derive(Debug, Default)]
struct Script {
    failures: BTreeMap<&'static str, (BackendError, bool)>,
    delays: BTreeMap<&'static str, Duration>,
    stalls: BTreeMap<&'static str, Duration>,
    calls: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Default)]
struct Scripted {
    script: StdMutex<Script>,
}

impl Scripted {
    fn with<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        f(&mut self.script.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn fail(&self, operation: &'static str, error: BackendError, once: bool) {
        self.with(|script| {
            script.failures.insert(operation, (error, once));
        });
    }

    fn delay(&self, operation: &'static str, after: Duration) {
        self.with(|script| {
            script.delays.insert(operation, after);
        });
    }

    fn stall(&self, operation: &'static str, after: Duration) {
        self.with(|script| {
            script.stalls.insert(operation, after);
        });
    }

    fn clear(&self) {
        self.with(|script| {
            script.failures.clear();
            script.delays.clear();
            script.stalls.clear();
        });
    }

    fn calls(&self, operation: &str) -> usize {
        self.with(|script| script.calls.get(operation).copied().unwrap_or_default())
    }

    /// Records the call, waits out any scripted delay, then reports any
    /// scripted failure.
    async fn enter(&self, operation: &'static str) -> Result<(), BackendError> {
        let (delay, failure) = self.with(|script| {
            *script.calls.entry(operation).or_default() += 1;
            let failure = match script.failures.get(operation) {
                Some((_, true)) => script.failures.remove(operation).map(|(err, _)| err),
                Some((err, false)) => Some(err.clone()),
                None => None,
            };
            (script.delays.get(operation).copied(), failure)
        });
        if let Some(after) = delay {
            tokio::time::sleep(after).await;
        }
        failure.map_or(Ok(()), Err)
    }

    /// Waits out any scripted stall once the backend has answered.
    async fn leave(&self, operation: &'static str) {
        let stall = self.with(|script| script.stalls.get(operation).copied());
        if let Some(after) = stall {
            tokio::time::sleep(after).await;
        }
    }
}

fn scripted_descriptor(kind: BackendKind, endpoint: &str) -> BackendDescriptor {
    let parsed = Endpoint::parse(endpoint)
        .unwrap_or_else(|err| panic!("scripted endpoint {endpoint:?} must parse: {err}"));
    BackendDescriptor::new(SCRIPTED_DRIVER, kind, parsed)
}

/// Inventory driver over an in-memory store with scripted failures.
///
/// Operations are named after the trait methods (`"update_host"`,
/// `"sync_state"`, ...).
#[derive(Debug)]
pub struct ScriptedInventory {
    store: Arc<MemoryStore>,
    inner: StoredInventory,
    scripted: Scripted,
}

impl ScriptedInventory {
    /// Creates a double with no store; call `init_data` or
    /// [`ScriptedInventory::seed`] first.
    ///
    /// # Panics
    ///
    /// Panics when `endpoint` has no scheme.
    #[must_use]
    pub fn new(endpoint: &str) -> Arc<Self> {
        let store = Arc::new(MemoryStore::default());
        let descriptor = scripted_descriptor(BackendKind::Inventory, endpoint);
        Arc::new(Self {
            inner: StoredInventory::new(descriptor, Arc::clone(&store) as Arc<dyn DocumentStore>),
            store,
            scripted: Scripted::default(),
        })
    }

    /// Replaces the store with `clouds` and `hosts`; each host names its
    /// cloud or `None` for unassigned.
    ///
    /// # Panics
    ///
    /// Panics when a host names a cloud missing from `clouds`.
    pub fn seed(&self, clouds: &[&str], hosts: &[(&str, Option<&str>)]) {
        let mut snapshot = InventorySnapshot::empty(VersionToken::from_generation(1));
        for cloud in clouds {
            apply_or_panic(&mut snapshot, &Mutation::AddCloud {
                cloud: CloudId::new(*cloud),
                description: format!("{cloud} allocation"),
            });
        }
        for (host, cloud) in hosts {
            apply_or_panic(&mut snapshot, &Mutation::AddHost {
                host: HostId::new(*host),
                attributes: Attributes::new(),
                cloud: cloud.map_or(CloudAssignment::Unassigned, |id| {
                    CloudAssignment::Cloud(CloudId::new(id))
                }),
            });
        }
        let document = StoreDocument {
            generation: 1,
            last_batch: None,
            inventory: snapshot,
        };
        self.store
            .save(&document, true)
            .unwrap_or_else(|err| panic!("seed memory store: {err}"));
    }

    /// Deletes the store, as an operator wiping the backend would.
    pub fn wipe(&self) {
        self.store.clear();
    }

    /// Applies a change directly to the store, as another actor would.
    ///
    /// # Panics
    ///
    /// Panics when the store is missing or the mutation is invalid.
    pub fn apply_external(&self, mutation: &Mutation) {
        let mut document = self
            .store
            .load()
            .unwrap_or_else(|err| panic!("load memory store: {err}"))
            .unwrap_or_else(|| panic!("store must exist before external changes"));
        apply_or_panic(&mut document.inventory, mutation);
        document.generation += 1;
        document.inventory.version = VersionToken::from_generation(document.generation);
        self.store
            .save(&document, false)
            .unwrap_or_else(|err| panic!("save memory store: {err}"));
    }

    /// Authoritative host record, bypassing scripted faults.
    #[must_use]
    pub fn stored_host(&self, id: &str) -> Option<Host> {
        self.stored().and_then(|inventory| inventory.host(&HostId::new(id)).cloned())
    }

    /// Authoritative cloud record, bypassing scripted faults.
    #[must_use]
    pub fn stored_cloud(&self, id: &str) -> Option<Cloud> {
        self.stored().and_then(|inventory| inventory.cloud(&CloudId::new(id)).cloned())
    }

    /// Authoritative store version, bypassing scripted faults.
    #[must_use]
    pub fn stored_version(&self) -> Option<VersionToken> {
        self.stored().map(|inventory| inventory.version)
    }

    fn stored(&self) -> Option<InventorySnapshot> {
        self.store
            .load()
            .ok()
            .flatten()
            .map(|document| document.inventory)
    }

    /// Fails every later call of `operation` with `error`.
    pub fn fail(&self, operation: &'static str, error: BackendError) {
        self.scripted.fail(operation, error, false);
    }

    /// Fails the next call of `operation` with `error`.
    pub fn fail_once(&self, operation: &'static str, error: BackendError) {
        self.scripted.fail(operation, error, true);
    }

    /// Delays every later call of `operation`.
    pub fn delay(&self, operation: &'static str, after: Duration) {
        self.scripted.delay(operation, after);
    }

    /// Holds back the answer of every later `sync_state` or `write_data`
    /// call for `after`, once the store has already committed it.
    pub fn stall_after_commit(&self, operation: &'static str, after: Duration) {
        self.scripted.stall(operation, after);
    }

    /// Removes every scripted failure, delay, and stall.
    pub fn clear_faults(&self) {
        self.scripted.clear();
    }

    /// Number of calls made to `operation`, including failed ones.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.scripted.calls(operation)
    }
}

fn apply_or_panic(snapshot: &mut InventorySnapshot, mutation: &Mutation) {
    snapshot
        .apply(mutation)
        .unwrap_or_else(|err| panic!("{} should apply: {err}", mutation.describe()));
}

impl HardwareService for ScriptedInventory {
    fn descriptor(&self) -> &BackendDescriptor {
        self.inner.descriptor()
    }

    fn list_hosts(&self) -> BackendFuture<'_, Vec<Host>> {
        Box::pin(async move {
            self.scripted.enter("list_hosts").await?;
            self.inner.list_hosts().await
        })
    }

    fn list_clouds(&self) -> BackendFuture<'_, Vec<Cloud>> {
        Box::pin(async move {
            self.scripted.enter("list_clouds").await?;
            self.inner.list_clouds().await
        })
    }

    fn update_host<'a>(
        &'a self,
        id: &'a HostId,
        patch: &'a HostPatch,
    ) -> BackendFuture<'a, Host> {
        Box::pin(async move {
            self.scripted.enter("update_host").await?;
            self.inner.update_host(id, patch).await
        })
    }

    fn update_cloud<'a>(
        &'a self,
        id: &'a CloudId,
        patch: &'a CloudPatch,
    ) -> BackendFuture<'a, Cloud> {
        Box::pin(async move {
            self.scripted.enter("update_cloud").await?;
            self.inner.update_cloud(id, patch).await
        })
    }

    fn remove_host<'a>(&'a self, id: &'a HostId) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.scripted.enter("remove_host").await?;
            self.inner.remove_host(id).await
        })
    }

    fn remove_cloud<'a>(&'a self, id: &'a CloudId, force: bool) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.scripted.enter("remove_cloud").await?;
            self.inner.remove_cloud(id, force).await
        })
    }
}

impl InventoryService for ScriptedInventory {
    fn init_data<'a>(
        &'a self,
        ctx: &'a OperationContext,
        force: bool,
    ) -> BackendFuture<'a, VersionToken> {
        Box::pin(async move {
            self.scripted.enter("init_data").await?;
            self.inner.init_data(ctx, force).await
        })
    }

    fn load_data<'a>(
        &'a self,
        ctx: &'a OperationContext,
        initialize: bool,
    ) -> BackendFuture<'a, InventorySnapshot> {
        Box::pin(async move {
            self.scripted.enter("load_data").await?;
            self.inner.load_data(ctx, initialize).await
        })
    }

    fn sync_state<'a>(
        &'a self,
        ctx: &'a OperationContext,
        base: &'a VersionToken,
        batch: &'a BatchId,
        pending: &'a [Mutation],
    ) -> BackendFuture<'a, InventorySnapshot> {
        Box::pin(async move {
            self.scripted.enter("sync_state").await?;
            let outcome = self.inner.sync_state(ctx, base, batch, pending).await;
            self.scripted.leave("sync_state").await;
            outcome
        })
    }

    fn write_data<'a>(
        &'a self,
        ctx: &'a OperationContext,
        snapshot: &'a InventorySnapshot,
        do_exit: bool,
    ) -> BackendFuture<'a, VersionToken> {
        Box::pin(async move {
            self.scripted.enter("write_data").await?;
            let outcome = self.inner.write_data(ctx, snapshot, do_exit).await;
            self.scripted.leave("write_data").await;
            outcome
        })
    }
}

/// Network driver over an in-memory store that can refuse individual hosts.
#[derive(Debug)]
pub struct ScriptedNetwork {
    inner: StoredNetwork,
    scripted: Scripted,
    refused: StdMutex<BTreeMap<HostId, String>>,
    segments_supported: StdMutex<bool>,
}

impl ScriptedNetwork {
    /// Creates a double that moves every host it is asked to.
    ///
    /// # Panics
    ///
    /// Panics when `endpoint` has no scheme.
    #[must_use]
    pub fn new(endpoint: &str) -> Arc<Self> {
        let descriptor = scripted_descriptor(BackendKind::Network, endpoint);
        Arc::new(Self {
            inner: StoredNetwork::new(descriptor, Arc::new(MemoryStore::default())),
            scripted: Scripted::default(),
            refused: StdMutex::new(BTreeMap::new()),
            segments_supported: StdMutex::new(true),
        })
    }

    /// Reports `reason` as the per-host failure whenever `host` is moved.
    pub fn refuse(&self, host: &str, reason: &str) {
        self.refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(HostId::new(host), reason.to_owned());
    }

    /// Makes `list_clouds` fail with `NotSupportedByBackend`.
    pub fn without_segments(&self) {
        *self
            .segments_supported
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Fails every later call of `operation` with `error`.
    pub fn fail(&self, operation: &'static str, error: BackendError) {
        self.scripted.fail(operation, error, false);
    }

    /// Delays every later call of `operation`.
    pub fn delay(&self, operation: &'static str, after: Duration) {
        self.scripted.delay(operation, after);
    }

    /// Number of calls made to `operation`, including failed ones.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.scripted.calls(operation)
    }

    fn refusals(&self) -> BTreeMap<HostId, String> {
        self.refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HardwareService for ScriptedNetwork {
    fn descriptor(&self) -> &BackendDescriptor {
        self.inner.descriptor()
    }

    fn list_hosts(&self) -> BackendFuture<'_, Vec<Host>> {
        Box::pin(async move {
            self.scripted.enter("list_hosts").await?;
            self.inner.list_hosts().await
        })
    }

    fn list_clouds(&self) -> BackendFuture<'_, Vec<Cloud>> {
        Box::pin(async move {
            self.scripted.enter("list_clouds").await?;
            let supported = *self
                .segments_supported
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !supported {
                return Err(BackendError::NotSupported {
                    operation: "list_clouds",
                    backend: self.descriptor().to_string(),
                });
            }
            self.inner.list_clouds().await
        })
    }

    fn update_host<'a>(
        &'a self,
        id: &'a HostId,
        patch: &'a HostPatch,
    ) -> BackendFuture<'a, Host> {
        Box::pin(async move {
            self.scripted.enter("update_host").await?;
            self.inner.update_host(id, patch).await
        })
    }

    fn update_cloud<'a>(
        &'a self,
        id: &'a CloudId,
        patch: &'a CloudPatch,
    ) -> BackendFuture<'a, Cloud> {
        Box::pin(async move {
            self.scripted.enter("update_cloud").await?;
            self.inner.update_cloud(id, patch).await
        })
    }

    fn remove_host<'a>(&'a self, id: &'a HostId) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.scripted.enter("remove_host").await?;
            self.inner.remove_host(id).await
        })
    }

    fn remove_cloud<'a>(&'a self, id: &'a CloudId, force: bool) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.scripted.enter("remove_cloud").await?;
            self.inner.remove_cloud(id, force).await
        })
    }
}

impl NetworkService for ScriptedNetwork {
    fn move_hosts<'a>(
        &'a self,
        ctx: &'a OperationContext,
        hosts: &'a [HostId],
        destination: &'a CloudId,
    ) -> BackendFuture<'a, Vec<HostMoveResult>> {
        Box::pin(async move {
            self.scripted.enter("move_hosts").await?;
            let refused = self.refusals();
            let accepted = hosts
                .iter()
                .filter(|host| !refused.contains_key(*host))
                .cloned()
                .collect::<Vec<_>>();
            let mut moved = if accepted.is_empty() {
                Vec::new()
            } else {
                self.inner.move_hosts(ctx, &accepted, destination).await?
            };
            Ok(hosts
                .iter()
                .map(|host| match refused.get(host) {
                    Some(reason) => HostMoveResult::failed(host.clone(), reason.clone()),
                    None => moved
                        .iter()
                        .position(|result| &result.host == host)
                        .map_or_else(
                            || HostMoveResult {
                                host: host.clone(),
                                status: HostMoveStatus::Failed {
                                    reason: String::from("not reported"),
                                },
                            },
                            |index| moved.swap_remove(index),
                        ),
                })
                .collect())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push((key.to_string(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes environment variables while holding the global mutex.
    pub async fn unset_vars(keys: &[&str]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push((key.to_string(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Removes further variables under the mutex already held; they are
    /// restored on drop with the rest.
    pub fn unset(&mut self, keys: &[&str]) {
        for key in keys {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe { env::remove_var(key) };
            self.previous.push((key.to_string(), old));
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
