//! Unit tests for the inventory model.

use super::*;
use crate::backend::{BackendError, ErrorKind};
use rstest::{fixture, rstest};

#[fixture]
fn snapshot() -> InventorySnapshot {
    let mut snapshot = InventorySnapshot::empty(VersionToken::from_generation(1));
    for mutation in [
        Mutation::AddCloud {
            cloud: CloudId::from("cloud01"),
            description: String::from("spare pool"),
        },
        Mutation::AddCloud {
            cloud: CloudId::from("cloud02"),
            description: String::from("perf lab"),
        },
        Mutation::AddHost {
            host: HostId::from("h1"),
            attributes: Attributes::new(),
            cloud: CloudAssignment::Cloud(CloudId::from("cloud01")),
        },
        Mutation::AddHost {
            host: HostId::from("h2"),
            attributes: Attributes::new(),
            cloud: CloudAssignment::Unassigned,
        },
    ] {
        snapshot
            .apply(&mutation)
            .unwrap_or_else(|err| panic!("seed {}: {err}", mutation.describe()));
    }
    snapshot
}

fn members(snapshot: &InventorySnapshot, cloud: &str) -> Vec<String> {
    snapshot
        .cloud(&CloudId::from(cloud))
        .map(|cloud| cloud.hosts.iter().map(ToString::to_string).collect())
        .unwrap_or_default()
}

#[rstest]
#[case("mock://1", "mock", "1")]
#[case("  file:///var/lib/hwsvc/inventory.json ", "file", "/var/lib/hwsvc/inventory.json")]
fn endpoint_splits_scheme_and_target(
    #[case] raw: &str,
    #[case] scheme: &str,
    #[case] target: &str,
) {
    let endpoint = Endpoint::parse(raw).expect("endpoint should parse");
    assert_eq!(endpoint.scheme(), scheme);
    assert_eq!(endpoint.target(), target);
}

#[rstest]
#[case("   ", EndpointError::Empty)]
#[case("localhost:8080", EndpointError::MissingScheme(String::from("localhost:8080")))]
#[case("://nowhere", EndpointError::MissingScheme(String::from("://nowhere")))]
fn endpoint_rejects_malformed_values(#[case] raw: &str, #[case] expected: EndpointError) {
    assert_eq!(Endpoint::parse(raw), Err(expected));
}

#[rstest]
fn update_host_merges_attributes_and_moves_membership(mut snapshot: InventorySnapshot) {
    snapshot
        .apply(&Mutation::UpdateHost {
            host: HostId::from("h1"),
            patch: HostPatch::new()
                .set("cpus", 64)
                .assign(CloudAssignment::Cloud(CloudId::from("cloud02"))),
        })
        .expect("update should apply");
    snapshot
        .apply(&Mutation::UpdateHost {
            host: HostId::from("h1"),
            patch: HostPatch::new().set("ram_gb", 512),
        })
        .expect("second update should apply");

    let host = snapshot.host(&HostId::from("h1")).expect("host exists");
    assert_eq!(host.attributes.get("cpus"), Some(&Value::from(64)));
    assert_eq!(host.attributes.get("ram_gb"), Some(&Value::from(512)));
    assert_eq!(host.revision, 3);
    assert!(members(&snapshot, "cloud01").is_empty());
    assert_eq!(members(&snapshot, "cloud02"), vec![String::from("h1")]);
}

#[rstest]
fn update_host_rejects_stale_revision(mut snapshot: InventorySnapshot) {
    let err = snapshot
        .apply(&Mutation::UpdateHost {
            host: HostId::from("h1"),
            patch: HostPatch::new().set("cpus", 8).expect_revision(7),
        })
        .expect_err("stale revision should conflict");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(snapshot.host(&HostId::from("h1")).expect("host").attributes.is_empty());
}

#[rstest]
fn assigning_to_unknown_cloud_is_not_found(mut snapshot: InventorySnapshot) {
    let err = snapshot
        .apply(&Mutation::UpdateHost {
            host: HostId::from("h2"),
            patch: HostPatch::new().assign(CloudAssignment::Cloud(CloudId::from("nope"))),
        })
        .expect_err("unknown cloud should fail");
    assert_eq!(err, BackendError::cloud_not_found(&CloudId::from("nope")));
}

#[rstest]
fn remove_host_is_idempotent(mut snapshot: InventorySnapshot) {
    let remove = Mutation::RemoveHost {
        host: HostId::from("h1"),
    };
    snapshot.apply(&remove).expect("first removal");
    snapshot.apply(&remove).expect("second removal");
    assert!(snapshot.host(&HostId::from("h1")).is_none());
    assert!(members(&snapshot, "cloud01").is_empty());
}

#[rstest]
fn remove_populated_cloud_requires_force(mut snapshot: InventorySnapshot) {
    let err = snapshot
        .apply(&Mutation::RemoveCloud {
            cloud: CloudId::from("cloud01"),
            force: false,
        })
        .expect_err("populated cloud should conflict");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    snapshot
        .apply(&Mutation::RemoveCloud {
            cloud: CloudId::from("cloud01"),
            force: true,
        })
        .expect("forced removal");
    assert!(snapshot.cloud(&CloudId::from("cloud01")).is_none());
    let host = snapshot.host(&HostId::from("h1")).expect("host survives");
    assert_eq!(host.cloud, CloudAssignment::Unassigned);
}

#[rstest]
fn duplicate_creation_conflicts(mut snapshot: InventorySnapshot) {
    let err = snapshot
        .apply(&Mutation::AddCloud {
            cloud: CloudId::from("cloud01"),
            description: String::new(),
        })
        .expect_err("duplicate cloud");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[rstest]
fn snapshot_round_trips_through_json(snapshot: InventorySnapshot) {
    let rendered = serde_json::to_string(&snapshot).expect("serialise");
    let parsed: InventorySnapshot = serde_json::from_str(&rendered).expect("parse");
    assert_eq!(parsed, snapshot);
}
