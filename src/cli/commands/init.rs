//! Init command implementation
//!
//! This module implements the `init` command for generating a starter
//! configuration file.

use super::{EXIT_CONFIG, EXIT_FATAL, EXIT_OK};
use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path where to create the configuration file
    #[arg(short, long, default_value = "wardflow.toml")]
    pub output: String,

    /// Include every option with explanatory comments
    #[arg(long)]
    pub with_examples: bool,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output, "Initializing configuration file");

        println!("📝 Initializing Wardflow configuration");
        println!();

        if Path::new(&self.output).exists() && !self.force {
            println!("❌ Configuration file already exists: {}", self.output);
            println!("   Use --force to overwrite");
            return Ok(EXIT_CONFIG);
        }

        let config_content = if self.with_examples {
            Self::generate_config_with_examples()
        } else {
            Self::generate_minimal_config()
        };

        match fs::write(&self.output, config_content) {
            Ok(()) => {
                println!("✅ Configuration file created: {}", self.output);
                println!();
                println!("Next steps:");
                println!("  1. Edit {} with your settings", self.output);
                println!("  2. Set WARDFLOW_DATABASE_URL in .env for PostgreSQL");
                println!("  3. Apply the schema: wardflow migrate");
                println!("  4. Validate configuration: wardflow validate-config");
                println!("  5. Watch the board: wardflow queue --watch");
                println!();
                Ok(EXIT_OK)
            }
            Err(e) => {
                println!("❌ Failed to write configuration file");
                println!("   Error: {e}");
                Ok(EXIT_FATAL)
            }
        }
    }

    /// Generate minimal configuration
    fn generate_minimal_config() -> String {
        r#"# Wardflow Configuration File

environment = "development"
database_target = "memory"  # memory | postgresql

[application]
log_level = "info"

# [postgresql]
# connection_string = "${WARDFLOW_DATABASE_URL}"
# ssl_mode = "prefer"

[routing]
prescription_scope = "patient"
max_conflict_retries = 3

[queue]
poll_interval_seconds = 30

[logging]
local_enabled = false
local_path = "logs"
local_rotation = "daily"
"#
        .to_string()
    }

    /// Generate configuration with examples and comments
    fn generate_config_with_examples() -> String {
        r#"# Wardflow Configuration File
#
# Values of the form ${VAR} are replaced from the environment (and .env).
# Any key can also be overridden with WARDFLOW_<SECTION>_<KEY>, for example
# WARDFLOW_QUEUE_POLL_INTERVAL_SECONDS=10.

# ============================================================================
# Deployment
# ============================================================================
# development | staging | production
# Production refuses the in-memory backend.
environment = "development"

# Storage backend: memory | postgresql
database_target = "postgresql"

# ============================================================================
# Application Settings
# ============================================================================
[application]
# Log level (trace, debug, info, warn, error)
log_level = "info"

# ============================================================================
# PostgreSQL
# ============================================================================
[postgresql]
# postgresql://[user[:password]@][host][:port][/dbname]
connection_string = "${WARDFLOW_DATABASE_URL}"

# Maximum connections in pool (1-100)
max_connections = 10

# Timeout for acquiring a connection
connection_timeout_seconds = 30

# Timeout for a single SQL statement
statement_timeout_seconds = 60

# disable | prefer | require
ssl_mode = "prefer"

# ============================================================================
# Routing
# ============================================================================
[routing]
# Which outstanding prescriptions keep a visit at pharmacy:
# - patient: any outstanding prescription of the patient
# - visit: only prescriptions written during this visit
prescription_scope = "patient"

# How often a write that lost a concurrent update is re-planned (0-20)
max_conflict_retries = 3

# ============================================================================
# Queues
# ============================================================================
[queue]
# How often dashboards refresh the department queues
poll_interval_seconds = 30

# ============================================================================
# Logging
# ============================================================================
[logging]
# Write JSON logs to rotating files next to the console output
local_enabled = true

# Directory for log files
local_path = "/var/log/wardflow"

# daily | hourly | never
local_rotation = "daily"

# Maximum log file size in MB
local_max_size_mb = 100
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_init_args_defaults() {
        let args = InitArgs {
            output: "wardflow.toml".to_string(),
            with_examples: false,
            force: false,
        };

        assert_eq!(args.output, "wardflow.toml");
        assert!(!args.with_examples);
        assert!(!args.force);
    }

    #[test]
    fn test_minimal_config_is_loadable() {
        let config = parse_config(&InitArgs::generate_minimal_config(), |_| None).unwrap();
        assert_eq!(config.queue.poll_interval_seconds, 30);
    }

    #[test]
    fn test_config_with_examples_is_loadable() {
        let config = parse_config(&InitArgs::generate_config_with_examples(), |key| {
            (key == "WARDFLOW_DATABASE_URL")
                .then(|| "postgresql://wardflow@localhost:5432/wardflow".to_string())
        })
        .unwrap();
        assert!(config.postgresql.is_some());
        assert_eq!(config.routing.max_conflict_retries, 3);
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("wardflow.toml");
        fs::write(&output, "existing").unwrap();

        let args = InitArgs {
            output: output.to_string_lossy().to_string(),
            with_examples: false,
            force: false,
        };
        assert_eq!(args.execute().await.unwrap(), EXIT_CONFIG);
        assert_eq!(fs::read_to_string(&output).unwrap(), "existing");
    }
}
