use std::io::Write;

use stonenet::{AppError, AppResult, ServerSettings, SocketOption};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file
}

#[test]
fn test_load_settings_from_file() -> AppResult<()> {
    let file = write_config(
        r#"
identity = "edge-1"
address = "127.0.0.1:7000"
max_connections = 64
num_simultaneous_write_operations = 16
buffer_size = 4096
retries = 2
retry_interval_ms = 500
max_unit_of_order = 4

[socket]
backlog = 128
no_delay = false
linger_secs = 0
ttl = 30

[[socket.options]]
level = 1
name = 9
value = 1
"#,
    );

    let settings = ServerSettings::load(file.path())?;
    assert_eq!(settings.identity, "edge-1");
    assert_eq!(settings.address, "127.0.0.1:7000");
    assert_eq!(settings.max_connections, 64);
    assert_eq!(settings.num_simultaneous_write_operations, 16);
    assert_eq!(settings.buffer_size, 4096);
    assert_eq!(settings.retries, 2);
    assert_eq!(settings.retry_interval_ms, 500);
    assert_eq!(settings.max_unit_of_order, 4);
    assert_eq!(settings.socket.backlog, 128);
    assert!(!settings.socket.no_delay);
    assert_eq!(settings.socket.linger_secs, Some(0));
    assert_eq!(settings.socket.ttl, Some(30));
    assert_eq!(
        settings.socket.options,
        vec![SocketOption {
            level: 1,
            name: 9,
            value: 1
        }]
    );
    Ok(())
}

#[test]
fn test_missing_keys_fall_back_to_defaults() -> AppResult<()> {
    let file = write_config("max_connections = 8\n");
    let settings = ServerSettings::load(file.path())?;
    let defaults = ServerSettings::default();

    assert_eq!(settings.max_connections, 8);
    assert_eq!(settings.buffer_size, defaults.buffer_size);
    assert_eq!(settings.socket.backlog, defaults.socket.backlog);
    Ok(())
}

#[test]
fn test_invalid_settings_are_rejected() {
    let file = write_config("buffer_size = 0\n");
    let err = ServerSettings::load(file.path()).unwrap_err();
    assert!(matches!(err, AppError::InvalidValue(_)));
}

#[test]
fn test_missing_file_is_a_config_error() {
    let err = ServerSettings::load("/nonexistent/stonenet.toml").unwrap_err();
    assert!(matches!(err, AppError::ConfigFileError(_)));
}

#[test]
fn test_environment_overrides_file() -> AppResult<()> {
    let file = write_config("stop_timeout_ms = 100\n");
    std::env::set_var("STONENET_STOP_TIMEOUT_MS", "2500");
    let settings = ServerSettings::load(file.path());
    std::env::remove_var("STONENET_STOP_TIMEOUT_MS");

    assert_eq!(settings?.stop_timeout_ms, 2500);
    Ok(())
}
