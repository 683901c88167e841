//! Storage abstraction traits
//!
//! This module defines the traits that storage backends must implement to hold
//! the visit system of record, and the [`WriteBatch`] unit of work every
//! coordinated write goes through.

use crate::adapters::services::{
    AppointmentService, BillingLedger, LabService, MedicationInventory, PatientDirectory,
    PrescriptionService,
};
use crate::domain::ids::{
    AppointmentId, BillingLineId, InvoiceId, MedicationId, PatientId, PrescriptionId, VisitId,
};
use crate::domain::records::{AppointmentStatus, BillingLine, Invoice, PrescriptionStatus};
use crate::domain::visit::{AdmissionKey, Stage, StageStatus, Visit};
use crate::domain::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Conditional change to a medication's stock level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAdjustment {
    pub medication_id: MedicationId,
    /// Negative when dispensing; the result may never drop below zero
    pub delta: i64,
}

/// Invoice to create from existing billing lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceDraft {
    pub id: InvoiceId,
    pub patient_id: PatientId,
    pub visit_id: Option<VisitId>,
    /// Lines that must still be uninvoiced when the batch commits
    pub line_ids: Vec<BillingLineId>,
}

/// Visit row written by a batch
#[derive(Debug, Clone, PartialEq)]
pub enum VisitWrite {
    /// New visit; rejected with `DuplicateAdmission` if its admission key is
    /// held by another active visit
    Insert(Visit),
    /// Replacement guarded by the version the caller read
    Update { visit: Visit, expected_version: i64 },
}

impl VisitWrite {
    pub fn visit(&self) -> &Visit {
        match self {
            VisitWrite::Insert(visit) => visit,
            VisitWrite::Update { visit, .. } => visit,
        }
    }
}

/// Atomic unit of work
///
/// Backends validate every part before applying any of it: a batch is either
/// fully committed or leaves no trace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub stock_adjustments: Vec<StockAdjustment>,
    pub billing_lines: Vec<BillingLine>,
    pub prescription_updates: Vec<(PrescriptionId, PrescriptionStatus)>,
    pub appointment_updates: Vec<(AppointmentId, AppointmentStatus)>,
    pub invoice: Option<InvoiceDraft>,
    pub visit: Option<VisitWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visit(visit: VisitWrite) -> Self {
        Self {
            visit: Some(visit),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stock_adjustments.is_empty()
            && self.billing_lines.is_empty()
            && self.prescription_updates.is_empty()
            && self.appointment_updates.is_empty()
            && self.invoice.is_none()
            && self.visit.is_none()
    }
}

/// What a committed batch produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    /// The visit as stored, with its bumped version
    pub visit: Option<Visit>,
    pub invoice: Option<Invoice>,
    /// Stock level after each adjustment, in batch order
    pub stock_levels: Vec<(MedicationId, i64)>,
}

/// Visit lookup criteria; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitQuery {
    pub patient_id: Option<PatientId>,
    pub appointment_id: Option<AppointmentId>,
    pub stage: Option<Stage>,
    pub stage_status: Option<StageStatus>,
    pub active_only: bool,
}

impl VisitQuery {
    /// Active visits currently at `stage`
    pub fn active_at(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            active_only: true,
            ..Self::default()
        }
    }

    /// Active visits of one patient
    pub fn active_for_patient(patient_id: PatientId) -> Self {
        Self {
            patient_id: Some(patient_id),
            active_only: true,
            ..Self::default()
        }
    }

    /// Whether a visit satisfies every set criterion
    ///
    /// `stage_status` compares against the status of `stage` when set,
    /// otherwise against the status of the visit's current stage.
    pub fn matches(&self, visit: &Visit) -> bool {
        if self.active_only && !visit.is_active() {
            return false;
        }
        if let Some(patient_id) = &self.patient_id {
            if &visit.patient_id != patient_id {
                return false;
            }
        }
        if let Some(appointment_id) = &self.appointment_id {
            if visit.appointment_id.as_ref() != Some(appointment_id) {
                return false;
            }
        }
        if let Some(stage) = self.stage {
            if visit.current_stage != stage {
                return false;
            }
        }
        if let Some(status) = self.stage_status {
            let stage = self.stage.unwrap_or(visit.current_stage);
            if visit.stage_status(stage) != status {
                return false;
            }
        }
        true
    }
}

/// Visit store trait
///
/// The single authoritative collection of visit records. All writes go through
/// [`VisitStore::commit`].
#[async_trait]
pub trait VisitStore: Send + Sync {
    /// Test the backend connection
    async fn test_connection(&self) -> Result<()>;

    /// Fetch one visit by id
    async fn get_visit(&self, id: &VisitId) -> Result<Option<Visit>>;

    /// Fetch the active visit holding an admission key
    async fn find_active_by_key(&self, key: &AdmissionKey) -> Result<Option<Visit>>;

    /// Fetch visits matching a query, oldest first
    async fn find_visits(&self, query: &VisitQuery) -> Result<Vec<Visit>>;

    /// Apply a batch atomically
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateAdmission` when an inserted visit's key is taken
    /// - `RoutingError::ConcurrentModification` when an update's expected
    ///   version is stale
    /// - `StoreError::InsufficientStock` when an adjustment would go negative
    /// - `StoreError::NotFound` when a referenced record does not exist
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt>;

    /// Name of the backend, for logs and CLI output
    fn backend_name(&self) -> &'static str;
}

/// Everything the coordinator needs from one backend
///
/// Implemented automatically for any type that is a visit store and serves
/// every collaborator interface.
pub trait ClinicBackend:
    VisitStore
    + PatientDirectory
    + AppointmentService
    + PrescriptionService
    + MedicationInventory
    + BillingLedger
    + LabService
{
    /// View of this backend as a plain visit store
    fn visit_store(self: Arc<Self>) -> Arc<dyn VisitStore>;
}

impl<T> ClinicBackend for T
where
    T: VisitStore
        + PatientDirectory
        + AppointmentService
        + PrescriptionService
        + MedicationInventory
        + BillingLedger
        + LabService
        + 'static,
{
    fn visit_store(self: Arc<Self>) -> Arc<dyn VisitStore> {
        self
    }
}
