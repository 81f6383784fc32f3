//! Unit tests for the built-in drivers.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::rstest;
use tempfile::TempDir;

use super::*;
use crate::backend::{BackendError, ErrorKind, HardwareService, InventoryService, NetworkService};
use crate::instance::{InstanceOptions, InventoryInstance};
use crate::model::{
    Attributes, BackendDescriptor, BackendKind, BatchId, CloudAssignment, CloudId, Endpoint,
    HostId, HostPatch, InventorySnapshot, Mutation, OperationContext, VersionToken,
};

fn descriptor(kind: BackendKind, endpoint: &str) -> BackendDescriptor {
    BackendDescriptor::new(
        MEMORY_DRIVER,
        kind,
        Endpoint::parse(endpoint).expect("endpoint should parse"),
    )
}

fn ctx() -> OperationContext {
    OperationContext::new("driver-tests")
}

fn add_host(id: &str, cloud: CloudAssignment) -> Mutation {
    Mutation::AddHost {
        host: HostId::new(id),
        attributes: Attributes::new(),
        cloud,
    }
}

fn add_cloud(id: &str) -> Mutation {
    Mutation::AddCloud {
        cloud: CloudId::new(id),
        description: format!("{id} allocation"),
    }
}

#[tokio::test]
async fn init_refuses_existing_store_unless_forced() {
    let hub = MemoryHub::new();
    let ctx = ctx();
    let driver = hub.inventory(&descriptor(BackendKind::Inventory, "mock://1"));

    let first = driver.init_data(&ctx, false).await.expect("first init");
    let err = driver
        .init_data(&ctx, false)
        .await
        .expect_err("second init must fail");
    assert_eq!(err.kind(), ErrorKind::AlreadyInitialized);

    let forced = driver.init_data(&ctx, true).await.expect("forced init");
    assert_ne!(first, forced, "reinitialisation must issue a fresh token");
}

#[tokio::test]
async fn load_bootstraps_only_when_asked() {
    let hub = MemoryHub::new();
    let ctx = ctx();
    let driver = hub.inventory(&descriptor(BackendKind::Inventory, "memory://fresh"));

    let err = driver
        .load_data(&ctx, false)
        .await
        .expect_err("missing store must not load");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let snapshot = driver.load_data(&ctx, true).await.expect("bootstrap load");
    assert!(snapshot.is_empty());
    driver
        .load_data(&ctx, false)
        .await
        .expect("store exists after bootstrap");
}

#[tokio::test]
async fn sync_applies_batches_atomically() {
    let hub = MemoryHub::new();
    let ctx = ctx();
    let driver = hub.inventory(&descriptor(BackendKind::Inventory, "memory://atomic"));
    let base = driver.init_data(&ctx, false).await.expect("init");

    let changes = vec![
        add_cloud("cloud01"),
        Mutation::UpdateHost {
            host: HostId::new("ghost"),
            patch: HostPatch::new().set("rack", "r1"),
        },
    ];
    let err = driver
        .sync_state(&ctx, &base, &BatchId::fresh(), &changes)
        .await
        .expect_err("batch with a missing host must fail");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("pending change 2 of 2"));

    let snapshot = driver.load_data(&ctx, false).await.expect("reload");
    assert!(snapshot.is_empty(), "failed batch must not leave partial state");
    assert_eq!(snapshot.version, base);
}

#[tokio::test]
async fn sync_returns_merged_state() {
    let hub = MemoryHub::new();
    let ctx = ctx();
    let driver = hub.inventory(&descriptor(BackendKind::Inventory, "memory://merge"));
    let base = driver.init_data(&ctx, false).await.expect("init");
    let changes = vec![
        add_cloud("cloud01"),
        add_host("h1", CloudAssignment::Cloud(CloudId::new("cloud01"))),
    ];

    let snapshot = driver
        .sync_state(&ctx, &base, &BatchId::fresh(), &changes)
        .await
        .expect("sync");

    assert_ne!(snapshot.version, base);
    let cloud = snapshot
        .cloud(&CloudId::new("cloud01"))
        .expect("cloud should exist");
    assert!(cloud.hosts.contains(&HostId::new("h1")));
}

#[tokio::test]
async fn committed_batch_is_not_applied_twice() {
    let hub = MemoryHub::new();
    let ctx = ctx();
    let driver = hub.inventory(&descriptor(BackendKind::Inventory, "memory://replay"));
    let base = driver.init_data(&ctx, false).await.expect("init");
    let batch = BatchId::fresh();
    let changes = vec![add_cloud("cloud01")];

    let committed = driver
        .sync_state(&ctx, &base, &batch, &changes)
        .await
        .expect("first attempt");
    let replayed = driver
        .sync_state(&ctx, &base, &batch, &changes)
        .await
        .expect("retry of a committed batch succeeds");

    assert_eq!(replayed, committed);
    let err = driver
        .sync_state(&ctx, &base, &BatchId::fresh(), &changes)
        .await
        .expect_err("a new batch with the same change conflicts");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn write_replaces_store_with_snapshot() {
    let hub = MemoryHub::new();
    let ctx = ctx();
    let driver = hub.inventory(&descriptor(BackendKind::Inventory, "memory://write"));
    let base = driver.init_data(&ctx, false).await.expect("init");
    driver
        .sync_state(&ctx, &base, &BatchId::fresh(), &[add_cloud("cloud01")])
        .await
        .expect("seed cloud01");
    let mut snapshot = InventorySnapshot::empty(VersionToken::new("local"));
    snapshot.apply(&add_cloud("cloud02")).expect("local cloud02");

    let version = driver
        .write_data(&ctx, &snapshot, true)
        .await
        .expect("write");

    let stored = driver.load_data(&ctx, false).await.expect("reload");
    assert_eq!(stored.version, version);
    assert!(stored.cloud(&CloudId::new("cloud01")).is_none());
    assert!(stored.cloud(&CloudId::new("cloud02")).is_some());
}

/// Store whose reads hang, like a wedged network filesystem.
struct StalledStore(Duration);

impl DocumentStore for StalledStore {
    fn load(&self) -> Result<Option<StoreDocument>, BackendError> {
        std::thread::sleep(self.0);
        Ok(Some(StoreDocument::default()))
    }

    fn save(&self, _document: &StoreDocument, _durable: bool) -> Result<(), BackendError> {
        Ok(())
    }
}

#[tokio::test]
async fn stalled_store_still_hits_the_instance_deadline() {
    let driver = StoredInventory::new(
        descriptor(BackendKind::Inventory, "memory://stalled"),
        Arc::new(StalledStore(Duration::from_millis(500))),
    );
    let instance = InventoryInstance::new(
        Arc::new(driver),
        InstanceOptions::default().with_operation_timeout(Duration::from_millis(50)),
    );

    let err = instance
        .list_hosts()
        .await
        .expect_err("deadline must fire while the store stalls");

    assert_eq!(err.kind(), ErrorKind::BackendTimeout);
}

#[tokio::test]
async fn remove_host_is_idempotent() {
    let hub = MemoryHub::new();
    let ctx = ctx();
    let driver = hub.inventory(&descriptor(BackendKind::Inventory, "memory://remove"));
    let base = driver.init_data(&ctx, false).await.expect("init");
    driver
        .sync_state(
            &ctx,
            &base,
            &BatchId::fresh(),
            &[add_host("h1", CloudAssignment::Unassigned)],
        )
        .await
        .expect("seed host");

    driver
        .remove_host(&HostId::new("h1"))
        .await
        .expect("first removal");
    driver
        .remove_host(&HostId::new("h1"))
        .await
        .expect("second removal");
    assert!(driver.list_hosts().await.expect("list").is_empty());
}

#[tokio::test]
async fn hub_shares_state_per_endpoint() {
    let hub = MemoryHub::new();
    let ctx = ctx();
    let lab = descriptor(BackendKind::Inventory, "memory://lab");
    hub.inventory(&lab)
        .init_data(&ctx, false)
        .await
        .expect("init lab");

    hub.inventory(&lab)
        .load_data(&ctx, false)
        .await
        .expect("second driver sees the same store");
    let err = hub
        .inventory(&descriptor(BackendKind::Inventory, "memory://other"))
        .load_data(&ctx, false)
        .await
        .expect_err("other endpoint has its own store");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn network_moves_register_hosts_and_segments() {
    let hub = MemoryHub::new();
    let ctx = ctx();
    let driver = hub.network(&descriptor(BackendKind::Network, "memory://fabric"));
    let hosts = vec![HostId::new("h1"), HostId::new("h2")];
    let destination = CloudId::new("cloud02");

    let results = driver
        .move_hosts(&ctx, &hosts, &destination)
        .await
        .expect("move");

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| result.is_moved()));
    let segments = driver.list_clouds().await.expect("segments");
    let segment = segments
        .iter()
        .find(|cloud| cloud.id == destination)
        .expect("segment should be created");
    assert_eq!(segment.hosts.len(), 2);
}

fn temp_store(tmp: &TempDir, name: &str) -> JsonFileStore {
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("state").join(name))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    JsonFileStore::new(path)
}

#[test]
fn file_store_reports_missing_document() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let store = temp_store(&tmp, "inventory.json");
    let loaded = store.load().expect("missing file is not an error");
    assert!(loaded.is_none());
}

#[test]
fn file_store_replaces_document_without_leftovers() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let store = temp_store(&tmp, "inventory.json");
    let document = StoreDocument {
        generation: 4,
        ..StoreDocument::default()
    };

    store.save(&document, true).expect("save");

    let loaded = store.load().expect("load").expect("document present");
    assert_eq!(loaded.generation, 4);
    let staging = tmp.path().join("state").join(".inventory.json.tmp");
    assert!(!staging.exists(), "staging file must be renamed away");
}

#[test]
fn file_store_rejects_malformed_json() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let store = temp_store(&tmp, "inventory.json");
    std::fs::create_dir_all(tmp.path().join("state")).expect("create dir");
    std::fs::write(store.path(), "{ not json").expect("write garbage");

    let err = store.load().expect_err("garbage must not parse");
    assert_eq!(err.kind(), ErrorKind::BackendProtocolError);
}

#[rstest]
#[case("file://")]
#[case("file://..")]
fn file_endpoint_must_name_a_file(#[case] endpoint: &str) {
    let parsed = Endpoint::parse(endpoint).expect("endpoint should parse");
    let err = JsonFileStore::from_endpoint(&parsed).expect_err("no file name");
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
}

#[tokio::test]
async fn file_inventory_survives_new_driver() {
    let ctx = ctx();
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let store = Arc::new(temp_store(&tmp, "inventory.json"));
    let lab = descriptor(BackendKind::Inventory, "file://inventory.json");
    let first = StoredInventory::new(lab.clone(), Arc::clone(&store) as Arc<dyn DocumentStore>);
    let base = first.init_data(&ctx, false).await.expect("init");
    first
        .sync_state(&ctx, &base, &BatchId::fresh(), &[add_cloud("cloud01")])
        .await
        .expect("sync");

    let second = StoredInventory::new(lab, store);
    let clouds = second.list_clouds().await.expect("list clouds");
    assert_eq!(clouds.len(), 1);
}
