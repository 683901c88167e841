//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{PostgreSQLConfig, WardflowConfig};
use super::secret::secret_string;
use crate::domain::errors::WardflowError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into WardflowConfig
/// 4. Applies environment variable overrides (WARDFLOW_* prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns an error if:
/// - File cannot be read
/// - TOML parsing fails
/// - A referenced environment variable is not set
/// - Configuration validation fails
///
/// # Examples
///
/// ```no_run
/// use wardflow::config::loader::load_config;
///
/// let config = load_config("wardflow.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<WardflowConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(WardflowError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        WardflowError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents, |key| std::env::var(key).ok())
}

/// Parses configuration text, resolving variables through `lookup`
///
/// `load_config` passes the process environment; tests pass a map.
pub fn parse_config<F>(contents: &str, lookup: F) -> Result<WardflowConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let contents = substitute_env_vars(contents, &lookup)?;

    let mut config: WardflowConfig = toml::from_str(&contents)
        .map_err(|e| WardflowError::Configuration(format!("Failed to parse TOML: {}", e)))?;

    apply_env_overrides(&mut config, &lookup)?;

    config.validate().map_err(|e| {
        WardflowError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are left alone. Every missing variable is reported at once.
fn substitute_env_vars<F>(input: &str, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| WardflowError::Configuration(format!("Invalid placeholder pattern: {e}")))?;
    let mut result = String::new();
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match lookup(var_name) {
                Some(value) => {
                    let placeholder = format!("${{{}}}", var_name);
                    processed_line = processed_line.replace(&placeholder, &value);
                }
                None => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(WardflowError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn parse_override<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| WardflowError::Configuration(format!("Invalid value for {key}: {e}")))
}

/// Applies environment variable overrides using the WARDFLOW_* prefix
///
/// Variables follow the pattern `WARDFLOW_<SECTION>_<KEY>`, for example
/// `WARDFLOW_QUEUE_POLL_INTERVAL_SECONDS`. A malformed value is an error
/// rather than being silently ignored.
fn apply_env_overrides<F>(config: &mut WardflowConfig, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    const LOG_LEVEL: &str = "WARDFLOW_APPLICATION_LOG_LEVEL";
    const ENVIRONMENT: &str = "WARDFLOW_ENVIRONMENT";
    const DATABASE_TARGET: &str = "WARDFLOW_DATABASE_TARGET";
    const PG_CONNECTION_STRING: &str = "WARDFLOW_POSTGRESQL_CONNECTION_STRING";
    const PG_MAX_CONNECTIONS: &str = "WARDFLOW_POSTGRESQL_MAX_CONNECTIONS";
    const PG_SSL_MODE: &str = "WARDFLOW_POSTGRESQL_SSL_MODE";
    const PRESCRIPTION_SCOPE: &str = "WARDFLOW_ROUTING_PRESCRIPTION_SCOPE";
    const MAX_CONFLICT_RETRIES: &str = "WARDFLOW_ROUTING_MAX_CONFLICT_RETRIES";
    const POLL_INTERVAL: &str = "WARDFLOW_QUEUE_POLL_INTERVAL_SECONDS";
    const LOCAL_ENABLED: &str = "WARDFLOW_LOGGING_LOCAL_ENABLED";
    const LOCAL_PATH: &str = "WARDFLOW_LOGGING_LOCAL_PATH";

    if let Some(val) = lookup(LOG_LEVEL) {
        config.application.log_level = val.trim().to_lowercase();
    }
    if let Some(val) = lookup(ENVIRONMENT) {
        config.environment = parse_override(ENVIRONMENT, &val)?;
    }
    if let Some(val) = lookup(DATABASE_TARGET) {
        config.database_target = parse_override(DATABASE_TARGET, &val)?;
    }

    // A connection string alone is enough to create the postgresql section
    if let Some(val) = lookup(PG_CONNECTION_STRING) {
        match config.postgresql {
            Some(ref mut pg) => pg.connection_string = secret_string(val),
            None => {
                config.postgresql =
                    Some(PostgreSQLConfig::with_connection_string(secret_string(val)))
            }
        }
    }
    if let Some(ref mut pg) = config.postgresql {
        if let Some(val) = lookup(PG_MAX_CONNECTIONS) {
            pg.max_connections = parse_override(PG_MAX_CONNECTIONS, &val)?;
        }
        if let Some(val) = lookup(PG_SSL_MODE) {
            pg.ssl_mode = val.trim().to_lowercase();
        }
    }

    if let Some(val) = lookup(PRESCRIPTION_SCOPE) {
        config.routing.prescription_scope = parse_override(PRESCRIPTION_SCOPE, &val)?;
    }
    if let Some(val) = lookup(MAX_CONFLICT_RETRIES) {
        config.routing.max_conflict_retries = parse_override(MAX_CONFLICT_RETRIES, &val)?;
    }
    if let Some(val) = lookup(POLL_INTERVAL) {
        config.queue.poll_interval_seconds = parse_override(POLL_INTERVAL, &val)?;
    }

    if let Some(val) = lookup(LOCAL_ENABLED) {
        config.logging.local_enabled = parse_override(LOCAL_ENABLED, &val)?;
    }
    if let Some(val) = lookup(LOCAL_PATH) {
        config.logging.local_path = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{DatabaseTarget, PrescriptionScope};
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_substitute_env_vars() {
        let lookup = env(&[("TEST_VAR", "test_value")]);
        let result = substitute_env_vars("password = \"${TEST_VAR}\"", &lookup).unwrap();
        assert_eq!(result, "password = \"test_value\"\n");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        let lookup = env(&[]);
        let err = substitute_env_vars("a = \"${MISSING_A}\"\nb = \"${MISSING_B}\"", &lookup)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("MISSING_A"));
        assert!(message.contains("MISSING_B"));
    }

    #[test]
    fn test_substitute_skips_comments() {
        let lookup = env(&[]);
        let result = substitute_env_vars("# password = \"${NOT_SET}\"", &lookup).unwrap();
        assert!(result.contains("${NOT_SET}"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent-wardflow.toml");
        assert!(matches!(result, Err(WardflowError::Configuration(_))));
    }

    #[test]
    fn test_load_config_valid() {
        let toml_content = r#"
environment = "staging"
database_target = "memory"

[application]
log_level = "debug"

[routing]
prescription_scope = "visit"
max_conflict_retries = 5

[queue]
poll_interval_seconds = 10
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.routing.prescription_scope, PrescriptionScope::Visit);
        assert_eq!(config.routing.max_conflict_retries, 5);
        assert_eq!(config.queue.poll_interval_seconds, 10);
    }

    #[test]
    fn test_postgresql_connection_from_placeholder() {
        let toml_content = r#"
database_target = "postgresql"

[postgresql]
connection_string = "${WARDFLOW_TEST_DSN}"
ssl_mode = "disable"
"#;
        let lookup = env(&[("WARDFLOW_TEST_DSN", "postgresql://ward@localhost/wardflow")]);
        let config = parse_config(toml_content, lookup).unwrap();
        let pg = config.postgresql.unwrap();
        assert_eq!(
            pg.connection_string.expose_secret(),
            "postgresql://ward@localhost/wardflow"
        );
        assert_eq!(pg.max_connections, 10);
    }

    #[test]
    fn test_env_overrides_applied() {
        let lookup = env(&[
            ("WARDFLOW_DATABASE_TARGET", "postgresql"),
            (
                "WARDFLOW_POSTGRESQL_CONNECTION_STRING",
                "postgres://override@db/wardflow",
            ),
            ("WARDFLOW_POSTGRESQL_MAX_CONNECTIONS", "4"),
            ("WARDFLOW_QUEUE_POLL_INTERVAL_SECONDS", "5"),
            ("WARDFLOW_ROUTING_PRESCRIPTION_SCOPE", "visit"),
        ]);
        let config = parse_config("", lookup).unwrap();
        assert_eq!(config.database_target, DatabaseTarget::PostgreSQL);
        assert_eq!(config.queue.poll_interval_seconds, 5);
        assert_eq!(config.routing.prescription_scope, PrescriptionScope::Visit);
        let pg = config.postgresql.unwrap();
        assert_eq!(pg.max_connections, 4);
        assert_eq!(
            pg.connection_string.expose_secret(),
            "postgres://override@db/wardflow"
        );
    }

    #[test]
    fn test_malformed_override_rejected() {
        let lookup = env(&[("WARDFLOW_QUEUE_POLL_INTERVAL_SECONDS", "often")]);
        let err = parse_config("", lookup).unwrap_err();
        assert!(err
            .to_string()
            .contains("WARDFLOW_QUEUE_POLL_INTERVAL_SECONDS"));
    }

    #[test]
    fn test_production_memory_rejected_on_load() {
        let lookup = env(&[]);
        let result = parse_config("environment = \"production\"", lookup);
        assert!(matches!(result, Err(WardflowError::Configuration(_))));
    }
}
