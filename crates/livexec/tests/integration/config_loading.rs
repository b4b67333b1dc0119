use std::path::Path;

use livexec::{Config, EXAMPLE_CONFIG};

use super::FIXTURES_PATH;

#[test]
fn test_load_shell_config() {
    let path = format!("{FIXTURES_PATH}/configs/sh.toml");
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.max_concurrent, 2);
    assert_eq!(config.max_queued, Some(8));
    assert_eq!(config.interpreter.program, "sh");
    assert_eq!(config.guard.kill_after, 0.5);
    assert_eq!(config.guard.timeout_exit_code, 124);
}

#[test]
fn test_load_minimal_config() {
    let path = format!("{FIXTURES_PATH}/configs/minimal.toml");
    let config = Config::from_file(&path).expect("Failed to load config");

    assert_eq!(config.interpreter.program, "python3");
    assert_eq!(config.max_concurrent, 4);
    assert_eq!(config.max_queued, None);
    assert_eq!(config.time_limit, 30.0);
    assert!(config.guard.enabled);
    assert_eq!(config.channel.sentinel, "exit");
}

#[test]
fn test_load_invalid_zero_capacity() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_zero_capacity.toml");
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_load_invalid_blank_sentinel() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_blank_sentinel.toml");
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_load_invalid_extension() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_extension.toml");
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_load_missing_interpreter() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_missing_interpreter.toml");
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_load_nonexistent_file() {
    assert!(Config::from_file("/nonexistent/livexec.toml").is_err());
}

#[test]
fn test_load_with_explicit_file() {
    let path = format!("{FIXTURES_PATH}/configs/sh.toml");
    let config = Config::load(Some(Path::new(&path))).expect("Failed to load config");
    assert_eq!(config.interpreter.extension.to_string(), "sh");
}

#[test]
fn test_example_config_parses() {
    let config = Config::parse_toml(EXAMPLE_CONFIG).expect("example config should parse");
    assert_eq!(config.interpreter.program, "potigol");
    assert_eq!(config.listen, "0.0.0.0:8000");
}
