//! Unit tests for node configuration validation and conversion.

use std::time::Duration;

use rstest::*;
use winlaunch::{AddressPreference, Credentials, NodeConfig, TransportScheme, config::ConfigError};

#[fixture]
fn valid_config() -> NodeConfig {
    NodeConfig {
        display_name: String::from("win-ci-01"),
        use_private_address: false,
        admin_user: String::from("Administrator"),
        admin_password_ref: Some(String::from("vault:ci/windows-admin")),
        use_https: false,
        working_dir: String::from(r"C:\Windows\Temp\"),
        init_script: Some(String::from("choco install git -y")),
        launch_options: Some(String::from("-Xmx2g")),
        agent_launcher: String::from("java"),
        agent_file_name: String::from("agent.jar"),
        launch_timeout_secs: 600,
        boot_delay_secs: 60,
        backoff_secs: 10,
        already_booted_threshold_secs: 180,
        stop_on_terminate: false,
    }
}

#[rstest]
fn config_validation_accepts_defaults(valid_config: NodeConfig) {
    valid_config
        .validate()
        .unwrap_or_else(|err| panic!("valid config should pass: {err}"));
}

#[rstest]
#[case::display_name(|cfg: &mut NodeConfig| cfg.display_name.clear(), "WINLAUNCH_DISPLAY_NAME", "display_name")]
#[case::admin_user(|cfg: &mut NodeConfig| cfg.admin_user = String::from("  "), "WINLAUNCH_ADMIN_USER", "admin_user")]
#[case::working_dir(|cfg: &mut NodeConfig| cfg.working_dir.clear(), "WINLAUNCH_WORKING_DIR", "working_dir")]
#[case::agent_launcher(|cfg: &mut NodeConfig| cfg.agent_launcher.clear(), "WINLAUNCH_AGENT_LAUNCHER", "agent_launcher")]
#[case::agent_file_name(|cfg: &mut NodeConfig| cfg.agent_file_name.clear(), "WINLAUNCH_AGENT_FILE_NAME", "agent_file_name")]
#[case::launch_timeout(|cfg: &mut NodeConfig| cfg.launch_timeout_secs = 0, "WINLAUNCH_LAUNCH_TIMEOUT_SECS", "launch_timeout_secs")]
#[case::backoff(|cfg: &mut NodeConfig| cfg.backoff_secs = 0, "WINLAUNCH_BACKOFF_SECS", "backoff_secs")]
fn config_validation_produces_actionable_errors(
    mut valid_config: NodeConfig,
    #[case] mutate: fn(&mut NodeConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut valid_config);

    let error = valid_config.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("winlaunch.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn config_converts_to_node(valid_config: NodeConfig) {
    let node = valid_config
        .to_node()
        .unwrap_or_else(|err| panic!("valid config yields node: {err}"));

    assert_eq!(node.display_name, "win-ci-01");
    assert_eq!(node.address_preference, AddressPreference::Public);
    assert_eq!(node.transport, TransportScheme::Http);
    assert_eq!(node.credentials.user, "Administrator");
    assert_eq!(
        node.credentials.secret_ref.as_deref(),
        Some("vault:ci/windows-admin")
    );
    assert_eq!(node.effective_init_script(), Some("choco install git -y"));
    assert_eq!(node.launch_options.as_deref(), Some("-Xmx2g"));
    assert_eq!(node.launch_timeout, Duration::from_secs(600));
    assert_eq!(node.boot_delay, Duration::from_secs(60));
    assert_eq!(node.backoff, Duration::from_secs(10));
    assert_eq!(node.already_booted_threshold, Duration::from_secs(180));
    assert!(!node.stop_on_terminate);
}

#[rstest]
fn config_maps_transport_and_address_flags(valid_config: NodeConfig) {
    let cfg = NodeConfig {
        use_private_address: true,
        use_https: true,
        stop_on_terminate: true,
        ..valid_config
    };

    let node = cfg
        .to_node()
        .unwrap_or_else(|err| panic!("valid config yields node: {err}"));

    assert_eq!(node.address_preference, AddressPreference::Private);
    assert!(node.transport.is_encrypted());
    assert!(node.stop_on_terminate);
}

#[rstest]
fn config_normalises_working_dir(valid_config: NodeConfig) {
    let cfg = NodeConfig {
        working_dir: String::from(r"D:\agents"),
        ..valid_config
    };

    let node = cfg
        .to_node()
        .unwrap_or_else(|err| panic!("valid config yields node: {err}"));

    assert_eq!(node.working_dir, r"D:\agents\");
    assert_eq!(node.remote_path("agent.jar"), r"D:\agents\agent.jar");
}

#[rstest]
fn blank_init_script_is_treated_as_absent(valid_config: NodeConfig) {
    let cfg = NodeConfig {
        init_script: Some(String::from("   \r\n")),
        ..valid_config
    };

    let node = cfg
        .to_node()
        .unwrap_or_else(|err| panic!("valid config yields node: {err}"));

    assert_eq!(node.effective_init_script(), None);
}

#[rstest]
fn missing_password_ref_leaves_credentials_without_secret(valid_config: NodeConfig) {
    let cfg = NodeConfig {
        admin_password_ref: None,
        ..valid_config
    };

    let node = cfg
        .to_node()
        .unwrap_or_else(|err| panic!("valid config yields node: {err}"));

    assert_eq!(node.credentials, Credentials::new("Administrator"));
}
