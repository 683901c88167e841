//! Domain models and types for Wardflow.
//!
//! This module contains the visit model, the records owned by collaborating
//! services, strongly-typed identifiers and the error hierarchy.
//!
//! # Overview
//!
//! - **Identifiers** ([`VisitId`], [`PatientId`], [`AppointmentId`], ...)
//! - **Visit model** ([`Visit`], [`Stage`], [`StageStatus`], [`VisitType`])
//! - **Collaborator records** ([`Prescription`], [`Medication`], [`BillingLine`], [`LabTest`])
//! - **Error types** ([`WardflowError`], [`RoutingError`], [`StoreError`])
//! - **Result type alias** ([`Result`])
//!
//! # Legacy status tolerance
//!
//! Stage status fields that were never written carry [`StageStatus::Unset`].
//! Queue filters treat it exactly like `Pending`:
//!
//! ```rust
//! use wardflow::domain::StageStatus;
//!
//! assert!(StageStatus::Unset.is_queue_eligible());
//! assert_eq!(StageStatus::from_db(None).unwrap(), StageStatus::Unset);
//! ```

pub mod errors;
pub mod ids;
pub mod records;
pub mod result;
pub mod visit;

// Re-export commonly used types for convenience
pub use errors::{RoutingError, StoreError, WardflowError};
pub use ids::{
    AppointmentId, BillingLineId, InvoiceId, LabTestId, MedicationId, PatientId, PrescriptionId,
    VisitId,
};
pub use records::{
    Appointment, AppointmentStatus, BillingLine, BillingSource, Invoice, LabTest, LabTestStatus,
    Medication, Patient, Prescription, PrescriptionStatus,
};
pub use result::Result;
pub use visit::{
    AdmissionKey, OverallStatus, ServiceRequest, Stage, StageStatus, StageStatuses,
    StageTimestamps, Visit, VisitBuilder, VisitType,
};
