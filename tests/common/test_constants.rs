//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Environment variables that select the inventory and network drivers.
pub const BACKEND_ENV_VARS: [&str; 4] = [
    "HWSVC_INVENTORY_BACKEND_NAME",
    "HWSVC_INVENTORY_ENDPOINT",
    "HWSVC_NETWORK_BACKEND_NAME",
    "HWSVC_NETWORK_ENDPOINT",
];

/// Cloud every seeded host starts in.
pub const SOURCE_CLOUD: &str = "cloud01";

/// Cloud seeded hosts are moved into.
pub const DESTINATION_CLOUD: &str = "cloud02";
