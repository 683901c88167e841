//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::Utc;
use fake::faker::name::en::Name;
use fake::Fake;
use std::sync::Arc;
use wardflow::adapters::memory::MemoryBackend;
use wardflow::config::RoutingConfig;
use wardflow::core::invariants::check_visit;
use wardflow::core::{AdmissionRequest, Outcome, VisitCoordinator};
use wardflow::domain::{
    Appointment, AppointmentId, AppointmentStatus, LabTest, LabTestId, LabTestStatus, Medication,
    MedicationId, Patient, PatientId, Prescription, PrescriptionId, PrescriptionStatus, Stage,
    Visit, VisitId, VisitType,
};

/// A memory backend and a coordinator writing to it
pub struct Clinic {
    pub backend: Arc<MemoryBackend>,
    pub coordinator: Arc<VisitCoordinator>,
}

pub fn clinic() -> Clinic {
    clinic_with(RoutingConfig::default())
}

pub fn clinic_with(routing: RoutingConfig) -> Clinic {
    let backend = Arc::new(MemoryBackend::new());
    let coordinator = Arc::new(VisitCoordinator::new(backend.clone(), routing));
    Clinic {
        backend,
        coordinator,
    }
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

impl Clinic {
    pub async fn add_patient(&self) -> PatientId {
        let id = PatientId::new(unique("pat")).unwrap();
        self.backend
            .insert_patient(Patient {
                id: id.clone(),
                full_name: Name().fake(),
                date_of_birth: None,
            })
            .await;
        id
    }

    pub async fn add_appointment(&self, patient_id: &PatientId) -> AppointmentId {
        let id = AppointmentId::new(unique("appt")).unwrap();
        self.backend
            .insert_appointment(Appointment {
                id: id.clone(),
                patient_id: patient_id.clone(),
                scheduled_for: Utc::now(),
                status: AppointmentStatus::Scheduled,
            })
            .await;
        id
    }

    pub async fn add_medication(&self, stock_quantity: i64, unit_price_cents: i64) -> MedicationId {
        let id = MedicationId::new(unique("med")).unwrap();
        self.backend
            .insert_medication(Medication {
                id: id.clone(),
                name: "Paracetamol 500mg".to_string(),
                stock_quantity,
                unit_price_cents,
            })
            .await;
        id
    }

    pub async fn add_prescription(
        &self,
        patient_id: &PatientId,
        visit_id: Option<&VisitId>,
        medication_id: &MedicationId,
        quantity: i64,
    ) -> PrescriptionId {
        let id = PrescriptionId::new(unique("rx")).unwrap();
        self.backend
            .insert_prescription(Prescription {
                id: id.clone(),
                patient_id: patient_id.clone(),
                visit_id: visit_id.cloned(),
                medication_id: medication_id.clone(),
                quantity,
                status: PrescriptionStatus::Active,
                created_at: Utc::now(),
            })
            .await;
        id
    }

    pub async fn add_lab_test(
        &self,
        patient_id: &PatientId,
        visit_id: &VisitId,
        price_cents: i64,
    ) -> LabTestId {
        let id = LabTestId::new(unique("lab")).unwrap();
        self.backend
            .insert_lab_test(LabTest {
                id: id.clone(),
                patient_id: patient_id.clone(),
                visit_id: Some(visit_id.clone()),
                test_name: "Full blood count".to_string(),
                status: LabTestStatus::Ordered,
                price_cents,
                completed_at: None,
            })
            .await;
        id
    }

    /// Admits a new walk-in and checks it in at reception
    pub async fn checked_in(&self, visit_type: VisitType) -> Visit {
        let patient_id = self.add_patient().await;
        self.checked_in_with(AdmissionRequest::new(patient_id, visit_type))
            .await
    }

    pub async fn checked_in_with(&self, request: AdmissionRequest) -> Visit {
        let admission = self.coordinator.admit_or_check_in(request).await.unwrap();
        assert!(admission.created);
        assert_consistent(&admission.visit);
        self.step(&admission.visit, Stage::Reception, Outcome::CheckIn)
            .await
    }

    /// Completes `stage` with `outcome` and checks the stored successor
    pub async fn step(&self, visit: &Visit, stage: Stage, outcome: Outcome) -> Visit {
        let routed = self
            .coordinator
            .advance(&visit.id, stage, outcome, None)
            .await
            .unwrap();
        assert_eq!(routed.visit.version, visit.version + 1);
        assert_consistent(&routed.visit);
        routed.visit
    }

    pub async fn stock(&self, medication_id: &MedicationId) -> i64 {
        use wardflow::adapters::services::MedicationInventory;
        self.backend
            .get_medication(medication_id)
            .await
            .unwrap()
            .unwrap()
            .stock_quantity
    }

    pub async fn prescription_status(&self, id: &PrescriptionId) -> PrescriptionStatus {
        use wardflow::adapters::services::PrescriptionService;
        self.backend
            .get_prescription(id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

pub fn assert_consistent(visit: &Visit) {
    if let Err(e) = check_visit(visit) {
        panic!("visit {} is inconsistent: {e}", visit.id);
    }
}
