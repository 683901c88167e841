//! Backend factory
//!
//! Examines `database_target` and builds the matching backend.

use crate::adapters::database::traits::ClinicBackend;
use crate::adapters::memory::MemoryBackend;
use crate::adapters::postgresql::{PostgreSQLAdapter, PostgreSQLClient};
use crate::config::schema::{DatabaseTarget, WardflowConfig};
use crate::domain::{Result, WardflowError};
use std::sync::Arc;

/// Create the storage backend named by the configuration
///
/// # Errors
///
/// Returns `WardflowError::Configuration` if the PostgreSQL section is
/// missing, or the connection error if the pool cannot be built.
pub async fn create_backend(config: &WardflowConfig) -> Result<Arc<dyn ClinicBackend>> {
    match config.database_target {
        DatabaseTarget::Memory => {
            tracing::info!("Using in-memory backend");
            Ok(Arc::new(MemoryBackend::new()))
        }
        DatabaseTarget::PostgreSQL => {
            let pg_config = config.postgresql.as_ref().ok_or_else(|| {
                WardflowError::Configuration(
                    "postgresql configuration is required when database_target = 'postgresql'"
                        .to_string(),
                )
            })?;

            tracing::info!("Creating PostgreSQL client");
            let client = PostgreSQLClient::new(pg_config.clone())?;
            Ok(Arc::new(PostgreSQLAdapter::new(client)))
        }
    }
}
