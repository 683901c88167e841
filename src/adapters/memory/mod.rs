//! In-memory storage backend
//!
//! Serves the visit store and every collaborator interface from process
//! memory. Selected with `database_target = "memory"`; refused in production.

pub mod store;

pub use store::MemoryBackend;
