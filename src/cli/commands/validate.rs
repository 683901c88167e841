//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the Wardflow configuration file.

use super::{EXIT_CONFIG, EXIT_OK};
use crate::config::load_config;
use crate::config::schema::DatabaseTarget;
use crate::config::secret::redact_connection_string;
use clap::Args;
use secrecy::ExposeSecret;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    ///
    /// Loading already validates; a loaded configuration is a valid one.
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration validation failed");
                println!("   Error: {e}");
                println!();
                return Ok(EXIT_CONFIG);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Environment: {}", config.environment);
        println!("  Log Level: {}", config.application.log_level);
        println!("  Database Target: {}", config.database_target);

        if let (DatabaseTarget::PostgreSQL, Some(pg_config)) =
            (config.database_target, config.postgresql.as_ref())
        {
            println!(
                "  PostgreSQL Connection: {}",
                redact_connection_string(pg_config.connection_string.expose_secret().as_ref())
            );
            println!("  Max Connections: {}", pg_config.max_connections);
            println!("  SSL Mode: {}", pg_config.ssl_mode);
        }

        println!(
            "  Prescription Scope: {}",
            config.routing.prescription_scope
        );
        println!(
            "  Max Conflict Retries: {}",
            config.routing.max_conflict_retries
        );
        println!("  Queue Poll Interval: {}s", config.queue.poll_interval_seconds);
        if config.logging.local_enabled {
            println!(
                "  File Logging: {} ({})",
                config.logging.local_path, config.logging.local_rotation
            );
        }
        println!();
        Ok(EXIT_OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_validate_missing_file() {
        let code = ValidateArgs {}
            .execute("/nonexistent/wardflow.toml")
            .await
            .unwrap();
        assert_eq!(code, EXIT_CONFIG);
    }

    #[tokio::test]
    async fn test_validate_memory_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database_target = \"memory\"").unwrap();

        let code = ValidateArgs {}
            .execute(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(code, EXIT_OK);
    }
}
