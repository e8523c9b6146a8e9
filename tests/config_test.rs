use std::time::Duration;

use ticketq::ErrorKind;
use ticketq::config::{Config, StoreConfig};

const VARS: [&str; 6] = [
    "TICKETQ_DATABASE",
    "TICKETQ_LEASE_MINUTES",
    "TICKETQ_SWEEP_SECONDS",
    "TICKETQ_BUSY_TIMEOUT_MS",
    "OTEL_ENDPOINT",
    "LOG_LEVEL",
];

fn clear() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

// Environment is process-global, so every case lives in one test.
#[test]
fn config_from_env() {
    clear();

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.to_str(), Some("ticketq.db"));
    assert_eq!(config.lease, chrono::Duration::minutes(60));
    assert_eq!(config.sweep_interval, Duration::from_secs(30));
    assert_eq!(config.busy_timeout, Duration::from_millis(5000));
    assert!(config.otel_endpoint.is_none());
    assert_eq!(config.log_level, "info");

    unsafe {
        std::env::set_var("TICKETQ_DATABASE", "/tmp/q/work.db");
        std::env::set_var("TICKETQ_LEASE_MINUTES", "15");
        std::env::set_var("TICKETQ_SWEEP_SECONDS", "5");
        std::env::set_var("TICKETQ_BUSY_TIMEOUT_MS", "250");
        std::env::set_var("OTEL_ENDPOINT", "http://localhost:4317");
        std::env::set_var("LOG_LEVEL", "debug");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.lease, chrono::Duration::minutes(15));
    assert_eq!(config.sweep_interval, Duration::from_secs(5));
    assert_eq!(config.otel_endpoint.as_deref(), Some("http://localhost:4317"));
    assert_eq!(config.log_level, "debug");

    let store = config.store();
    assert_eq!(store.path.to_str(), Some("/tmp/q/work.db"));
    assert_eq!(store.busy_timeout, Duration::from_millis(250));
    assert_eq!(store.default_lease, chrono::Duration::minutes(15));
    assert_eq!(store.max_connections, StoreConfig::default().max_connections);

    unsafe { std::env::set_var("TICKETQ_LEASE_MINUTES", "soon") };
    let err = Config::from_env().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    unsafe { std::env::set_var("TICKETQ_LEASE_MINUTES", "0") };
    assert_eq!(Config::from_env().unwrap_err().kind(), ErrorKind::Config);

    unsafe { std::env::set_var("TICKETQ_LEASE_MINUTES", "18446744073709551615") };
    assert_eq!(Config::from_env().unwrap_err().kind(), ErrorKind::Config);

    unsafe { std::env::set_var("TICKETQ_LEASE_MINUTES", "15") };
    unsafe { std::env::set_var("TICKETQ_SWEEP_SECONDS", "-1") };
    assert_eq!(Config::from_env().unwrap_err().kind(), ErrorKind::Config);

    clear();
}
