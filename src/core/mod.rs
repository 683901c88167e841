//! Core business logic for Wardflow.
//!
//! This module contains the routing engine: pure decisions first, then the
//! coordinator that turns them into atomic writes, and the read-side queues.
//!
//! # Modules
//!
//! - [`transition`] - Pure stage transition rules and side effects
//! - [`invariants`] - Structural checks every stored visit must pass
//! - [`admission`] - Building new visits and idempotent re-check-in
//! - [`coordinator`] - The write path: plan, check, commit, retry
//! - [`queue`] - Department queues and the dashboard watcher
//!
//! # Routing Workflow
//!
//! 1. **Read**: Fetch the visit and the collaborator facts the rules need
//! 2. **Plan**: [`transition::plan`] picks the next stage and side effects
//! 3. **Check**: [`invariants::check_successor`] validates the planned visit
//! 4. **Commit**: Visit update, billing, stock and invoice in one batch
//! 5. **Retry**: A lost version check re-reads and re-plans
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wardflow::adapters::memory::MemoryBackend;
//! use wardflow::config::RoutingConfig;
//! use wardflow::core::admission::AdmissionRequest;
//! use wardflow::core::coordinator::VisitCoordinator;
//! use wardflow::core::transition::Outcome;
//! use wardflow::domain::{PatientId, Stage, VisitType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = VisitCoordinator::new(Arc::new(MemoryBackend::new()), RoutingConfig::default());
//!
//! let admission = coordinator
//!     .admit_or_check_in(AdmissionRequest::new(PatientId::new("pat-1")?, VisitType::Consultation))
//!     .await?;
//!
//! let routed = coordinator
//!     .advance(&admission.visit.id, Stage::Reception, Outcome::CheckIn, None)
//!     .await?;
//! println!("Visit is now at {}", routed.visit.current_stage);
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod coordinator;
pub mod invariants;
pub mod queue;
pub mod transition;

pub use admission::{Admission, AdmissionRequest};
pub use coordinator::{DispenseOutcome, RoutedVisit, Settlement, VisitCoordinator};
pub use queue::{QueueProjection, QueueSnapshot, QueueWatcher};
pub use transition::{Outcome, SideEffect, Transition, TransitionContext};
