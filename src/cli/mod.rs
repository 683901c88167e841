//! CLI interface and argument parsing
//!
//! This module provides the operator command-line interface for Wardflow using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Wardflow - patient visit routing engine
#[derive(Parser, Debug)]
#[command(name = "wardflow")]
#[command(version, about, long_about = None)]
#[command(author = "Wardflow Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "wardflow.toml", env = "WARDFLOW_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "WARDFLOW_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new configuration file
    Init(commands::init::InitArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Apply the PostgreSQL schema
    Migrate(commands::migrate::MigrateArgs),

    /// Show a department queue or the whole board
    Queue(commands::queue::QueueArgs),

    /// Admit a patient or check them in again
    Admit(commands::visit::AdmitArgs),

    /// Complete a stage and route the visit onwards
    Advance(commands::visit::AdvanceArgs),

    /// Dispense one prescription
    Dispense(commands::visit::DispenseArgs),

    /// Cancel an active visit
    Cancel(commands::visit::CancelArgs),
}
