//! Integration tests for configuration validation and backend resolution.

#[path = "common/test_constants.rs"]
mod test_constants;

use std::time::Duration;

use hwsvc::test_support::EnvGuard;
use hwsvc::{ConfigError, DriverRegistry, ErrorKind, HardwareConfig, RegistryError};
use rstest::*;
use tempfile::TempDir;

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};

use test_constants::BACKEND_ENV_VARS;

#[fixture]
fn valid_config() -> HardwareConfig {
    HardwareConfig {
        inventory_backend_name: String::from("Memory"),
        inventory_endpoint: String::from("memory://config-tests"),
        network_backend_name: String::from("Memory"),
        network_endpoint: String::from("memory://config-tests"),
        force_on_remove: false,
        operation_timeout_secs: 30,
    }
}

#[rstest]
fn config_validation_accepts_complete_settings(valid_config: HardwareConfig) {
    valid_config
        .validate()
        .unwrap_or_else(|err| panic!("complete config should validate: {err}"));
}

/// Verifies that validation produces actionable errors mentioning both the
/// environment variable and configuration file for each required field.
#[rstest]
#[case::inventory_name(
    |cfg: &mut HardwareConfig| cfg.inventory_backend_name.clear(),
    "HWSVC_INVENTORY_BACKEND_NAME",
    "inventory_backend_name"
)]
#[case::inventory_endpoint(
    |cfg: &mut HardwareConfig| cfg.inventory_endpoint = String::from("   "),
    "HWSVC_INVENTORY_ENDPOINT",
    "inventory_endpoint"
)]
#[case::network_name(
    |cfg: &mut HardwareConfig| cfg.network_backend_name.clear(),
    "HWSVC_NETWORK_BACKEND_NAME",
    "network_backend_name"
)]
#[case::network_endpoint(
    |cfg: &mut HardwareConfig| cfg.network_endpoint.clear(),
    "HWSVC_NETWORK_ENDPOINT",
    "network_endpoint"
)]
fn config_validation_produces_actionable_errors(
    valid_config: HardwareConfig,
    #[case] mutate: fn(&mut HardwareConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("hwsvc.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn config_rejects_zero_timeout(valid_config: HardwareConfig) {
    let cfg = HardwareConfig {
        operation_timeout_secs: 0,
        ..valid_config
    };

    let err = cfg.validate().expect_err("zero timeout must be rejected");
    assert!(matches!(err, ConfigError::InvalidTimeout));
}

#[rstest]
fn instance_options_follow_configuration(valid_config: HardwareConfig) {
    let cfg = HardwareConfig {
        force_on_remove: true,
        operation_timeout_secs: 5,
        ..valid_config
    };

    let options = cfg.instance_options();

    assert_eq!(options.operation_timeout, Duration::from_secs(5));
    assert!(options.force_on_remove);
}

#[rstest]
fn connect_resolves_both_backends(valid_config: HardwareConfig) {
    let registry = DriverRegistry::builtin();

    let services = valid_config
        .connect(&registry)
        .unwrap_or_else(|err| panic!("memory backends should resolve: {err}"));

    assert_eq!(services.inventory.descriptor().name, "Memory");
    assert_eq!(services.network.descriptor().name, "Memory");
    services.close();
    assert!(services.network.is_closed());
}

#[rstest]
fn connect_reports_unknown_driver(valid_config: HardwareConfig) {
    let registry = DriverRegistry::builtin();
    let cfg = HardwareConfig {
        network_backend_name: String::from("Netbox"),
        ..valid_config
    };

    let err = cfg
        .connect(&registry)
        .expect_err("unregistered driver must fail");

    let ConfigError::Resolve { source, .. } = &err else {
        panic!("expected Resolve error, got {err:?}");
    };
    assert!(matches!(source, RegistryError::UnknownDriver { .. }));
    assert_eq!(source.kind(), ErrorKind::UnknownDriver);
    assert!(err.to_string().contains("Netbox"), "unexpected error: {err}");
}

#[tokio::test]
async fn config_loads_from_discovered_file() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let tmp_root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Dir::open_ambient_dir(&tmp_root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp dir: {err}"))
        .write(
            "hwsvc.toml",
            concat!(
                "inventory_backend_name = \"File\"\n",
                "inventory_endpoint = \"file://inventory.json\"\n",
                "network_backend_name = \"Memory\"\n",
                "network_endpoint = \"memory://lab\"\n",
                "operation_timeout_secs = 7\n",
            ),
        )
        .unwrap_or_else(|err| panic!("write config file: {err}"));
    let config_path = tmp_root.join("hwsvc.toml");

    let mut guard = EnvGuard::set_vars(&[("HWSVC_CONFIG_PATH", config_path.as_str())]).await;
    guard.unset(&BACKEND_ENV_VARS);

    let cfg = HardwareConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config file should load: {err}"));

    assert_eq!(cfg.inventory_backend_name, "File");
    assert_eq!(cfg.inventory_endpoint, "file://inventory.json");
    assert_eq!(cfg.network_backend_name, "Memory");
    assert_eq!(cfg.operation_timeout_secs, 7);
    assert!(!cfg.force_on_remove);
    drop(guard);
}
