use courier_logger::{LogConfig, Logger};

#[test]
fn default_config_installs_console_only() {
    let logger = Logger::from_config("courier-console", &LogConfig::default())
        .expect("logger should initialize");

    assert_eq!(logger.name(), "courier-console");
    assert!(!logger.writes_files(), "console-only logger should not own a file writer");
}
