//! Collaborator service interfaces
//!
//! Patients, appointments, prescriptions, inventory, billing and lab tests are
//! owned by other services. The routing engine only talks to them through these
//! traits. Each storage backend serves all of them next to the visit store so a
//! [`WriteBatch`](crate::adapters::database::WriteBatch) can span them.

use crate::domain::ids::{
    AppointmentId, BillingLineId, LabTestId, MedicationId, PatientId, PrescriptionId, VisitId,
};
use crate::domain::records::{
    Appointment, AppointmentStatus, BillingLine, Invoice, LabTest, Medication, Patient,
    Prescription, PrescriptionStatus,
};
use crate::domain::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn get_patient(&self, id: &PatientId) -> Result<Option<Patient>>;

    /// Case-insensitive match on name or id
    async fn search_patients(&self, query: &str) -> Result<Vec<Patient>>;
}

#[async_trait]
pub trait AppointmentService: Send + Sync {
    async fn get_appointment(&self, id: &AppointmentId) -> Result<Option<Appointment>>;

    async fn update_appointment_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<()>;
}

#[async_trait]
pub trait PrescriptionService: Send + Sync {
    async fn get_prescription(&self, id: &PrescriptionId) -> Result<Option<Prescription>>;

    /// Prescriptions of a patient, optionally filtered by status, oldest first
    async fn list_prescriptions(
        &self,
        patient_id: &PatientId,
        status_filter: Option<PrescriptionStatus>,
    ) -> Result<Vec<Prescription>>;

    /// Dispensed and cancelled prescriptions never change status again
    async fn update_prescription_status(
        &self,
        id: &PrescriptionId,
        status: PrescriptionStatus,
    ) -> Result<()>;
}

#[async_trait]
pub trait MedicationInventory: Send + Sync {
    async fn get_medication(&self, id: &MedicationId) -> Result<Option<Medication>>;

    /// Atomically adds `delta` to the stock level and returns the new level
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InsufficientStock` if the result would be negative;
    /// the stock is left untouched.
    async fn adjust_stock(&self, id: &MedicationId, delta: i64) -> Result<i64>;
}

#[async_trait]
pub trait BillingLedger: Send + Sync {
    /// Adds a manual line to the patient's running account
    async fn add_service_line(
        &self,
        patient_id: &PatientId,
        visit_id: Option<&VisitId>,
        description: &str,
        quantity: i64,
        unit_price_cents: i64,
    ) -> Result<BillingLine>;

    /// Lines on the patient's account, oldest first
    async fn lines_for_patient(
        &self,
        patient_id: &PatientId,
        uninvoiced_only: bool,
    ) -> Result<Vec<BillingLine>>;

    /// Rolls the given uninvoiced lines into a new invoice
    async fn create_invoice(
        &self,
        patient_id: &PatientId,
        lines: &[BillingLineId],
    ) -> Result<Invoice>;
}

#[async_trait]
pub trait LabService: Send + Sync {
    /// Lab tests of a patient; restricted to one visit when `visit_id` is set
    async fn list_lab_tests(
        &self,
        patient_id: &PatientId,
        visit_id: Option<&VisitId>,
    ) -> Result<Vec<LabTest>>;

    async fn get_lab_test(&self, id: &LabTestId) -> Result<Option<LabTest>>;
}
