// Wardflow - Patient visit routing engine
// Copyright (c) 2025 Wardflow Contributors
// Licensed under the MIT License

//! # Wardflow - patient visit routing
//!
//! Wardflow moves outpatient visits through the departments of a clinic:
//! reception, nurse, doctor, lab, pharmacy and billing. Each visit type takes
//! its own path, and every department works from a queue derived from the
//! stored visits.
//!
//! ## Overview
//!
//! This library provides:
//! - **Admission** of scheduled and walk-in patients, idempotent per
//!   appointment or walk-in day
//! - **Routing** through a pure transition engine that plans the next stage and
//!   the side effects of a department's outcome
//! - **Atomic commits** of visit changes together with stock, billing,
//!   prescription and appointment writes
//! - **Queues** per department, ordered by arrival, optionally refreshed on a
//!   poll interval
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Admission, transition rules, invariants, coordinator and queues
//! - [`adapters`] - Storage backends (in-memory, PostgreSQL) and collaborator services
//! - [`domain`] - Visit model, collaborator records and error types
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wardflow::adapters::database::create_backend;
//! use wardflow::config::load_config;
//! use wardflow::core::{AdmissionRequest, Outcome, VisitCoordinator};
//! use wardflow::domain::{PatientId, Stage, VisitType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("wardflow.toml")?;
//!     let backend = create_backend(&config).await?;
//!     let coordinator = VisitCoordinator::new(backend, config.routing.clone());
//!
//!     let patient = PatientId::new("pat-001")?;
//!     let admission = coordinator
//!         .admit_or_check_in(AdmissionRequest::new(patient, VisitType::Consultation))
//!         .await?;
//!
//!     let routed = coordinator
//!         .advance(&admission.visit.id, Stage::Reception, Outcome::CheckIn, None)
//!         .await?;
//!     println!("Visit now at {}", routed.visit.current_stage);
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Visits carry a version. Every write is a compare-and-swap on that version,
//! committed in the same transaction as the stock, billing and prescription
//! writes of the action. A coordinator that loses the race re-reads and
//! re-plans; see [`core::coordinator`].
//!
//! ## Error Handling
//!
//! All fallible operations return [`domain::Result`], carrying a
//! [`domain::WardflowError`]:
//!
//! ```rust,no_run
//! use wardflow::domain::WardflowError;
//!
//! fn example() -> Result<(), WardflowError> {
//!     let config = wardflow::config::load_config("wardflow.toml")?;
//!     println!("{}", config.database_target);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
