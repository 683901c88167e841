//! Storage abstraction layer
//!
//! The visit store trait, the atomic write batch every backend commits, and
//! the factory that picks a backend from configuration.

pub mod factory;
pub mod traits;

pub use factory::create_backend;
pub use traits::{
    ClinicBackend, CommitReceipt, InvoiceDraft, StockAdjustment, VisitQuery, VisitStore,
    VisitWrite, WriteBatch,
};
