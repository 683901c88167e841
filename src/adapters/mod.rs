//! Storage backends and collaborator interfaces.
//!
//! - [`database`] - Visit store trait, atomic write batches, backend factory
//! - [`services`] - Interfaces of the services that own patients, appointments,
//!   prescriptions, inventory, billing and lab tests
//! - [`memory`] - In-process backend for development and tests
//! - [`postgresql`] - PostgreSQL backend
//!
//! Each backend implements the visit store and every collaborator interface,
//! which makes it a [`database::ClinicBackend`]. The coordinator only ever holds
//! an `Arc<dyn ClinicBackend>`.
//!
//! ```rust
//! use std::sync::Arc;
//! use wardflow::adapters::database::ClinicBackend;
//! use wardflow::adapters::memory::MemoryBackend;
//!
//! let backend: Arc<dyn ClinicBackend> = Arc::new(MemoryBackend::new());
//! assert_eq!(backend.backend_name(), "memory");
//! ```

pub mod database;
pub mod memory;
pub mod postgresql;
pub mod services;
