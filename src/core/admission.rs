//! Visit admission
//!
//! Builds the visit records reception and the nurse desk create, and the
//! in-place update for a patient who checks in again. The coordinator decides
//! between the two by looking up the admission key.

use crate::domain::ids::{AppointmentId, PatientId};
use crate::domain::visit::{
    AdmissionKey, ServiceRequest, Stage, StageStatus, Visit, VisitType,
};
use crate::domain::{Result, WardflowError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Note written when an already active visit is checked in again
pub const RECHECK_NOTE: &str = "Checked in again";

/// A request to admit a patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub patient_id: PatientId,
    pub appointment_id: Option<AppointmentId>,
    pub visit_type: VisitType,
    pub service: Option<ServiceRequest>,
    /// Walk-ins only: always create a fresh visit without an admission key
    #[serde(default)]
    pub new_encounter: bool,
    /// Defaults to the day of admission
    pub visit_date: Option<NaiveDate>,
    pub note: Option<String>,
}

impl AdmissionRequest {
    pub fn new(patient_id: PatientId, visit_type: VisitType) -> Self {
        Self {
            patient_id,
            appointment_id: None,
            visit_type,
            service: None,
            new_encounter: false,
            visit_date: None,
            note: None,
        }
    }

    pub fn with_appointment(mut self, appointment_id: AppointmentId) -> Self {
        self.appointment_id = Some(appointment_id);
        self
    }

    pub fn with_service(mut self, service: ServiceRequest) -> Self {
        self.service = Some(service);
        self
    }

    pub fn as_new_encounter(mut self) -> Self {
        self.new_encounter = true;
        self
    }

    pub fn on(mut self, visit_date: NaiveDate) -> Self {
        self.visit_date = Some(visit_date);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Rejects combinations that cannot be admitted
    ///
    /// # Errors
    ///
    /// Returns `WardflowError::Validation` for a new-encounter request tied to
    /// an appointment, or a service request on a non quick-service visit.
    pub fn validate(&self) -> Result<()> {
        if self.new_encounter && self.appointment_id.is_some() {
            return Err(WardflowError::Validation(
                "new_encounter is only allowed for walk-ins".to_string(),
            ));
        }
        if self.service.is_some() && self.visit_type != VisitType::QuickService {
            return Err(WardflowError::Validation(format!(
                "a service request needs a quick_service visit, got {}",
                self.visit_type
            )));
        }
        Ok(())
    }

    pub fn effective_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.visit_date.unwrap_or_else(|| now.date_naive())
    }

    /// Key the request is deduplicated on; `None` for new encounters
    pub fn admission_key(&self, now: DateTime<Utc>) -> Option<AdmissionKey> {
        (!self.new_encounter).then(|| {
            AdmissionKey::derive(
                &self.patient_id,
                self.appointment_id.as_ref(),
                self.effective_date(now),
            )
        })
    }

    /// Fresh visit at reception, pending
    pub fn build_visit(&self, now: DateTime<Utc>) -> Visit {
        let mut builder = Visit::builder(self.patient_id.clone(), self.visit_type)
            .appointment(self.appointment_id.clone())
            .visit_date(self.effective_date(now))
            .service(self.service.clone())
            .new_encounter(self.new_encounter)
            .created_at(now);
        if let Some(note) = &self.note {
            builder = builder.note(Stage::Reception, note);
        }
        builder.build()
    }
}

/// Result of an admission: the visit and whether it was newly created
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Admission {
    pub visit: Visit,
    pub created: bool,
}

/// Lab-only walk-in registered by the nurse desk, placed straight at Lab
pub fn build_lab_walk_in(
    patient_id: PatientId,
    visit_date: NaiveDate,
    now: DateTime<Utc>,
    note: Option<&str>,
) -> Visit {
    let mut visit = Visit::builder(patient_id, VisitType::LabOnly)
        .visit_date(visit_date)
        .created_at(now)
        .status(Stage::Reception, StageStatus::NotRequired)
        .status(Stage::Nurse, StageStatus::Completed)
        .status(Stage::Doctor, StageStatus::NotRequired)
        .at_stage(Stage::Lab, StageStatus::Pending)
        .note(Stage::Nurse, note.unwrap_or(""))
        .build();
    visit.completed_at.set(Stage::Nurse, now);
    visit
}

/// Idempotent re-check-in: statuses stay as they are, only a note is added
pub fn re_check_in(existing: &Visit, stage: Stage, note: Option<&str>, now: DateTime<Utc>) -> Visit {
    let mut visit = existing.clone();
    visit.append_note(stage, note.unwrap_or(RECHECK_NOTE));
    visit.updated_at = now;
    visit
}
