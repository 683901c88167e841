//! Integration tests for logging setup
//!
//! A global subscriber can be installed once per process, so everything that
//! calls `init_logging` lives in a single test.

use wardflow::config::LoggingConfig;
use wardflow::domain::{Stage, VisitId, WardflowError};
use wardflow::logging::init_logging;
use wardflow::{log_conflict_retry, log_error_with_context, log_transition};

#[test]
fn test_logging_config_default() {
    let config = LoggingConfig::default();
    assert!(!config.local_enabled);
    assert_eq!(config.local_path, "logs");
    assert_eq!(config.local_rotation, "daily");
}

#[test]
fn test_file_logging_lifecycle() {
    let temp_dir = tempfile::tempdir().unwrap();
    let log_dir = temp_dir.path().join("nested").join("logs");
    let config = LoggingConfig {
        local_enabled: true,
        local_path: log_dir.to_string_lossy().into_owned(),
        local_rotation: "never".to_string(),
        ..LoggingConfig::default()
    };

    assert!(matches!(
        init_logging("loud", &config),
        Err(WardflowError::Configuration(_))
    ));

    let guard = init_logging("debug", &config).unwrap();
    assert!(log_dir.is_dir());

    let visit_id = VisitId::generate();
    log_transition!(visit_id, Stage::Nurse, Stage::Doctor, "proceed");
    log_conflict_retry!(1, 3, "visit modified concurrently");
    let error = WardflowError::Validation("bad request".to_string());
    log_error_with_context!(&error, "Admission failed");

    // A second global subscriber is refused, not a panic
    assert!(init_logging("info", &LoggingConfig::default()).is_err());

    drop(guard);
    assert!(log_dir.join("wardflow.log").exists());
}
