//! Migrate command implementation
//!
//! Applies the PostgreSQL schema. Every statement is idempotent, so running it
//! against an initialized database is a no-op.

use super::{report_failure, EXIT_CONFIG, EXIT_OK};
use crate::adapters::postgresql::PostgreSQLClient;
use crate::config::load_config;
use crate::config::schema::DatabaseTarget;
use clap::Args;

/// Arguments for the migrate command
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Print the schema instead of applying it
    #[arg(long)]
    pub print: bool,
}

impl MigrateArgs {
    /// Execute the migrate command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        if self.print {
            println!("{}", crate::adapters::postgresql::client::INITIAL_SCHEMA);
            return Ok(EXIT_OK);
        }

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let pg_config = match (config.database_target, config.postgresql) {
            (DatabaseTarget::PostgreSQL, Some(pg_config)) => pg_config,
            (target, _) => {
                println!("❌ Nothing to migrate: database_target is '{target}'");
                println!("   Set database_target = \"postgresql\" to apply the schema");
                return Ok(EXIT_CONFIG);
            }
        };

        let client = match PostgreSQLClient::new(pg_config) {
            Ok(client) => client,
            Err(e) => return Ok(report_failure("Creating the PostgreSQL client", &e)),
        };

        tracing::info!(database = %client.connection_string_safe(), "Applying schema");
        println!("🗄️  Applying schema to {}", client.connection_string_safe());

        match client.ensure_schema().await {
            Ok(()) => {
                println!("✅ Schema is up to date");
                Ok(EXIT_OK)
            }
            Err(e) => Ok(report_failure("Migration", &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_migrate_requires_postgresql() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database_target = \"memory\"").unwrap();

        let code = MigrateArgs { print: false }
            .execute(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(code, EXIT_CONFIG);
    }

    #[tokio::test]
    async fn test_migrate_print_needs_no_config() {
        let code = MigrateArgs { print: true }
            .execute("/nonexistent/wardflow.toml")
            .await
            .unwrap();
        assert_eq!(code, EXIT_OK);
    }
}
