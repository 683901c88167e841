//! Logging and observability
//!
//! Structured logging with:
//! - Human-readable console output
//! - Optional JSON file logging with rotation
//! - Level taken from configuration, overridable through `RUST_LOG`
//!
//! # Example
//!
//! ```no_run
//! use wardflow::logging::init_logging;
//! use wardflow::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Wardflow started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log a committed stage transition
///
/// # Example
///
/// ```no_run
/// use wardflow::log_transition;
/// use wardflow::domain::{Stage, VisitId};
///
/// let visit_id = VisitId::generate();
/// log_transition!(&visit_id, Stage::Nurse, Stage::Doctor, "send_to_doctor");
/// ```
#[macro_export]
macro_rules! log_transition {
    ($visit_id:expr, $from:expr, $to:expr, $outcome:expr) => {
        tracing::info!(
            visit_id = %$visit_id,
            from = %$from,
            to = %$to,
            outcome = %$outcome,
            "Visit routed"
        );
    };
}

/// Log a write that lost an optimistic version check and is being re-planned
///
/// # Example
///
/// ```no_run
/// use wardflow::log_conflict_retry;
///
/// log_conflict_retry!(1, 3, "visit v-1 was modified concurrently");
/// ```
#[macro_export]
macro_rules! log_conflict_retry {
    ($attempt:expr, $max_attempts:expr, $reason:expr) => {
        tracing::warn!(
            attempt = $attempt,
            max_attempts = $max_attempts,
            reason = %$reason,
            "Write conflict, re-planning"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use wardflow::log_error_with_context;
/// use wardflow::domain::WardflowError;
///
/// let error = WardflowError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}
