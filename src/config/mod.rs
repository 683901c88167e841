//! Configuration management for Wardflow.
//!
//! This module provides TOML-based configuration loading, parsing, and validation.
//!
//! # Overview
//!
//! Wardflow uses TOML configuration files with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `WARDFLOW_<SECTION>_<KEY>` overrides
//! - Default values for every optional setting
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wardflow::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("wardflow.toml")?;
//!
//! println!("Backend: {}", config.database_target);
//! println!("Poll interval: {}s", config.queue.poll_interval_seconds);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level
//! - [`DatabaseTarget`] - Storage backend (memory, postgresql)
//! - [`PostgreSQLConfig`] - PostgreSQL connection pool
//! - [`RoutingConfig`] - Prescription scope and conflict retries
//! - [`QueueConfig`] - Dashboard polling interval
//! - [`LoggingConfig`] - JSON file logging
//!
//! # Example Configuration
//!
//! ```toml
//! environment = "production"
//! database_target = "postgresql"
//!
//! [application]
//! log_level = "info"
//!
//! [postgresql]
//! connection_string = "${WARDFLOW_DATABASE_URL}"
//! max_connections = 10
//! ssl_mode = "require"
//!
//! [routing]
//! prescription_scope = "patient"
//! max_conflict_retries = 3
//!
//! [queue]
//! poll_interval_seconds = 30
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, DatabaseTarget, Environment, LoggingConfig, PostgreSQLConfig,
    PrescriptionScope, QueueConfig, RoutingConfig, WardflowConfig,
};
pub use secret::{secret_string, SecretString, SecretValue};
