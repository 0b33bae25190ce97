use courier_logger::{LevelFilter, LogRotation, Logger};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn rolling_file_receives_events() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempdir()?;
    let log_dir = tmp_dir.path().join("nested").join("logs");

    let logger = Logger::builder("courier-files")
        .console(false)
        .level(LevelFilter::INFO)
        .directory(&log_dir)
        .rotation(LogRotation::Never)
        .init()?;
    assert!(logger.writes_files());

    tracing::info!(event = "Alive", "hello from the file layer");
    tracing::debug!("filtered out by level");

    std::thread::sleep(Duration::from_millis(30));
    drop(logger);

    let log_file = fs::read_dir(&log_dir)?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| path.extension().and_then(|ext| ext.to_str()) == Some("log"))
        .expect("log file should be created");

    let contents = fs::read_to_string(log_file)?;
    assert!(contents.contains("hello from the file layer"));
    assert!(contents.contains("event=\"Alive\""));
    assert!(!contents.contains("filtered out by level"));
    assert!(!contents.contains('\u{1b}'), "file output must not contain ANSI escapes");
    Ok(())
}
