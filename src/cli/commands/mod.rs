//! CLI command implementations
//!
//! This module contains all CLI command implementations and the exit code
//! mapping they share.

pub mod init;
pub mod migrate;
pub mod queue;
pub mod validate;
pub mod visit;

use crate::adapters::database::create_backend;
use crate::config::{load_config, WardflowConfig};
use crate::core::coordinator::VisitCoordinator;
use crate::domain::{StoreError, WardflowError};

/// Command succeeded
pub const EXIT_OK: i32 = 0;
/// The routing engine refused the action (stale state, closed visit, stock, ...)
pub const EXIT_CONFLICT: i32 = 1;
/// Configuration could not be loaded or is invalid
pub const EXIT_CONFIG: i32 = 2;
/// Backend or collaborator unreachable
pub const EXIT_CONNECTION: i32 = 4;
/// Anything else
pub const EXIT_FATAL: i32 = 5;

/// Maps a domain error to the process exit code
pub fn exit_code_for(err: &WardflowError) -> i32 {
    match err {
        WardflowError::Configuration(_) => EXIT_CONFIG,
        WardflowError::Routing(_) | WardflowError::Validation(_) => EXIT_CONFLICT,
        WardflowError::Store(store) => match store {
            StoreError::DuplicateAdmission(_)
            | StoreError::NotFound { .. }
            | StoreError::InsufficientStock { .. }
            | StoreError::Conflict { .. } => EXIT_CONFLICT,
            StoreError::ConnectionFailed(_) => EXIT_CONNECTION,
            StoreError::QueryFailed(_)
            | StoreError::TransactionFailed(_)
            | StoreError::InvalidData(_) => EXIT_FATAL,
        },
        WardflowError::DependencyUnavailable { .. } => EXIT_CONNECTION,
        WardflowError::Serialization(_) | WardflowError::Io(_) | WardflowError::Other(_) => {
            EXIT_FATAL
        }
    }
}

/// Prints a failed action and returns its exit code
pub fn report_failure(action: &str, err: &WardflowError) -> i32 {
    tracing::warn!(action, error = %err, "Command failed");
    println!("❌ {action} failed");
    println!("   Error: {err}");
    exit_code_for(err)
}

/// Loads the configuration and connects a coordinator to its backend
///
/// On failure the problem is printed and the exit code is returned as `Err`.
pub async fn connect(config_path: &str) -> Result<(WardflowConfig, VisitCoordinator), i32> {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("❌ Failed to load configuration file");
            println!("   Error: {e}");
            return Err(EXIT_CONFIG);
        }
    };

    let backend = match create_backend(&config).await {
        Ok(backend) => backend,
        Err(e) => return Err(report_failure("Connecting to the backend", &e)),
    };
    if let Err(e) = backend.test_connection().await {
        println!("❌ Failed to connect to {}", backend.backend_name());
        println!("   Error: {e}");
        return Err(EXIT_CONNECTION);
    }

    tracing::debug!(backend = backend.backend_name(), "Backend connected");
    let coordinator = VisitCoordinator::new(backend, config.routing.clone());
    Ok((config, coordinator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RoutingError, Stage};

    #[test]
    fn test_conflicts_exit_one() {
        let stale: WardflowError = RoutingError::StaleTransition {
            visit_id: "v-1".to_string(),
            expected: Stage::Nurse,
            actual: Stage::Doctor,
        }
        .into();
        assert_eq!(exit_code_for(&stale), EXIT_CONFLICT);

        let stock: WardflowError = StoreError::InsufficientStock {
            medication_id: "med-1".to_string(),
            requested: 10,
            available: 5,
        }
        .into();
        assert_eq!(exit_code_for(&stock), EXIT_CONFLICT);
    }

    #[test]
    fn test_connection_errors_exit_four() {
        let err: WardflowError = StoreError::ConnectionFailed("refused".to_string()).into();
        assert_eq!(exit_code_for(&err), EXIT_CONNECTION);
        assert_eq!(
            exit_code_for(&WardflowError::dependency("billing", "timeout")),
            EXIT_CONNECTION
        );
    }

    #[test]
    fn test_configuration_exit_two() {
        let err = WardflowError::Configuration("missing".to_string());
        assert_eq!(exit_code_for(&err), EXIT_CONFIG);
        assert_eq!(exit_code_for(&WardflowError::Io("disk".to_string())), EXIT_FATAL);
    }

    #[tokio::test]
    async fn test_connect_missing_config() {
        let result = connect("/nonexistent/wardflow.toml").await;
        assert!(matches!(result, Err(EXIT_CONFIG)));
    }
}
