use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::settings::Settings;
use super::{load_config, load_config_from};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert!(settings.auth.secrets.is_empty());
    assert_eq!(settings.auth.query_param, "token");
    assert_eq!(settings.handshake.ack_delay_ms, 100);
    assert_eq!(settings.handshake.timeout_ms, 5_000);
    assert_eq!(settings.heartbeat.interval_secs, 30);
    assert_eq!(settings.broker.url, "redis://127.0.0.1:6379");
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("does-not-exist");

    let cfg = load_config_from(path.to_str().unwrap()).expect("load_config failed");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.logging.level, "info");
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let file = tmp.path().join("gateway.toml");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [auth]
        secrets = ["current", "previous"]
        cookie_name = "session"

        [broker]
        url = "memory://"
        ready_timeout_ms = 250
    "#;
    fs::write(&file, toml).expect("write config file");

    let cfg = load_config_from(file.to_str().unwrap()).expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.auth.secrets, vec!["current", "previous"]);
    assert_eq!(cfg.auth.cookie_name, "session");
    assert_eq!(cfg.auth.query_param, "token");
    assert_eq!(cfg.broker.url, "memory://");
    assert_eq!(cfg.broker.ready_timeout_ms, 250);
    assert_eq!(cfg.broker.reconnect_interval_ms, 2_000);
}

#[test]
#[serial]
fn environment_overrides_defaults() {
    temp_env::with_vars(
        [
            ("GATEWAY__SERVER__PORT", Some("9100")),
            ("GATEWAY__AUTH__SECRETS", Some("alpha, beta")),
            ("GATEWAY__HEARTBEAT__INTERVAL_SECS", Some("5")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.server.port, 9100);
            assert_eq!(cfg.auth.secrets, vec!["alpha", "beta"]);
            assert_eq!(cfg.heartbeat.interval_secs, 5);
        },
    );
}

#[test]
#[serial]
fn zero_heartbeat_interval_is_rejected() {
    temp_env::with_var("GATEWAY__HEARTBEAT__INTERVAL_SECS", Some("0"), || {
        let err = load_config().expect_err("zero heartbeat accepted");
        assert!(err.to_string().contains("heartbeat.interval_secs"));
    });
}

#[test]
#[serial]
fn zero_broker_intervals_are_rejected() {
    temp_env::with_var("GATEWAY__BROKER__RECONNECT_INTERVAL_MS", Some("0"), || {
        let err = load_config().expect_err("zero reconnect interval accepted");
        assert!(err.to_string().contains("broker.reconnect_interval_ms"));
    });
    temp_env::with_var("GATEWAY__BROKER__READY_TIMEOUT_MS", Some("0"), || {
        let err = load_config().expect_err("zero ready timeout accepted");
        assert!(err.to_string().contains("broker.ready_timeout_ms"));
    });
}

#[test]
#[serial]
fn handshake_ack_must_precede_timeout() {
    temp_env::with_var("GATEWAY__HANDSHAKE__TIMEOUT_MS", Some("0"), || {
        let err = load_config().expect_err("zero handshake timeout accepted");
        assert!(err.to_string().contains("handshake.timeout_ms"));
    });
    temp_env::with_vars(
        [
            ("GATEWAY__HANDSHAKE__ACK_DELAY_MS", Some("500")),
            ("GATEWAY__HANDSHAKE__TIMEOUT_MS", Some("500")),
        ],
        || {
            let err = load_config().expect_err("ack at the deadline accepted");
            assert!(err.to_string().contains("handshake.ack_delay_ms"));
        },
    );
}

#[test]
fn default_settings_are_valid() {
    assert_eq!(Settings::default().validate(), Ok(()));
}
