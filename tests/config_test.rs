//! Environment and file loading for `Config`.

use std::io::Write as _;

use prio_dispatch::Error;
use prio_dispatch::config::Config;
use prio_dispatch::model::FieldPolicy;
use prio_dispatch::storage::SegmentKey;

const VARS: [&str; 7] = [
    "DISPATCH_HEAP_CAPACITY",
    "DISPATCH_REGISTRY_CAPACITY",
    "DISPATCH_HEAP_KEY",
    "DISPATCH_REGISTRY_KEY",
    "DISPATCH_FIELD_POLICY",
    "OTEL_ENDPOINT",
    "LOG_LEVEL",
];

fn clear_env() {
    for var in VARS {
        // SAFETY: no other test in this binary reads these variables.
        unsafe { std::env::remove_var(var) };
    }
}

/// Env var tests share process state, so they run in one function.
#[test]
fn config_from_env() {
    clear_env();
    let cfg = Config::from_env().unwrap();
    assert_eq!(cfg, Config::default());

    unsafe {
        std::env::set_var("DISPATCH_HEAP_CAPACITY", "8");
        std::env::set_var("DISPATCH_REGISTRY_CAPACITY", " 4 ");
        std::env::set_var("DISPATCH_HEAP_KEY", "100");
        std::env::set_var("DISPATCH_REGISTRY_KEY", "101");
        std::env::set_var("DISPATCH_FIELD_POLICY", "reject");
        std::env::set_var("OTEL_ENDPOINT", "http://localhost:4317");
        std::env::set_var("LOG_LEVEL", "debug");
    }
    let cfg = Config::from_env().unwrap();
    assert_eq!(cfg.heap_capacity, 8);
    assert_eq!(cfg.registry_capacity, 4);
    assert_eq!(cfg.heap_key, SegmentKey(100));
    assert_eq!(cfg.registry_key, SegmentKey(101));
    assert_eq!(cfg.field_policy, FieldPolicy::Reject);
    assert_eq!(cfg.otel_endpoint.as_deref(), Some("http://localhost:4317"));
    assert_eq!(cfg.log_level, "debug");

    // Empty endpoint means no export.
    unsafe { std::env::set_var("OTEL_ENDPOINT", "") };
    assert!(Config::from_env().unwrap().otel_endpoint.is_none());

    unsafe { std::env::set_var("DISPATCH_HEAP_CAPACITY", "lots") };
    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    unsafe {
        std::env::set_var("DISPATCH_HEAP_CAPACITY", "8");
        std::env::set_var("DISPATCH_FIELD_POLICY", "shout");
    }
    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    unsafe {
        std::env::set_var("DISPATCH_FIELD_POLICY", "truncate");
        std::env::set_var("DISPATCH_REGISTRY_KEY", "100");
    }
    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    clear_env();
}

#[test]
fn config_from_toml_file() {
    let path = std::env::temp_dir().join(format!("dispatch-config-{}.toml", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "heap_capacity = 3\nregistry_capacity = 2\nlog_level = \"warn\"").unwrap();
    drop(file);

    let cfg = Config::from_toml_file(&path).unwrap();
    assert_eq!(cfg.heap_capacity, 3);
    assert_eq!(cfg.registry_capacity, 2);
    assert_eq!(cfg.log_level, "warn");
    assert_eq!(cfg.heap_key, SegmentKey(12345));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn missing_config_file_is_config_error() {
    let err = Config::from_toml_file(std::path::Path::new("/nonexistent/dispatch.toml")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
