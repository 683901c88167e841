//! PostgreSQL row models
//!
//! Flat row shapes for the `visits` table plus row readers for the
//! collaborator tables. Status columns are plain text; a NULL stage status
//! reads back as [`StageStatus::Unset`].

use crate::domain::ids::{
    AppointmentId, BillingLineId, InvoiceId, LabTestId, MedicationId, PatientId, PrescriptionId,
    VisitId,
};
use crate::domain::records::{
    Appointment, BillingLine, BillingSource, Invoice, LabTest, Medication, Patient, Prescription,
};
use crate::domain::visit::{
    AdmissionKey, ServiceRequest, Stage, StageStatus, StageStatuses, StageTimestamps, Visit,
};
use crate::domain::{Result, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::str::FromStr;
use tokio_postgres::types::FromSql;
use tokio_postgres::Row;

/// Column list shared by every visit SELECT and INSERT
pub const VISIT_COLUMNS: &str = "id, patient_id, appointment_id, visit_date, visit_type, \
    overall_status, current_stage, \
    reception_status, nurse_status, doctor_status, lab_status, pharmacy_status, billing_status, \
    reception_completed_at, nurse_completed_at, doctor_completed_at, lab_completed_at, \
    pharmacy_completed_at, billing_completed_at, \
    stage_entered_at, service, admission_key, notes, created_at, updated_at, \
    discharged_at, cancelled_at, version";

/// Visit row for PostgreSQL storage
///
/// This structure maps one-to-one to the `visits` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PostgreSQLVisit {
    pub id: String,
    pub patient_id: String,
    pub appointment_id: Option<String>,
    pub visit_date: NaiveDate,
    pub visit_type: String,
    pub overall_status: String,
    pub current_stage: String,

    /// Stage statuses in [`Stage::DEPARTMENTS`] order
    pub statuses: [Option<String>; 6],

    /// Completion timestamps in [`Stage::DEPARTMENTS`] order
    pub completed_at: [Option<DateTime<Utc>>; 6],

    pub stage_entered_at: Option<DateTime<Utc>>,
    pub service: Option<Value>,
    pub admission_key: Option<String>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub discharged_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl PostgreSQLVisit {
    /// Convert from a domain visit
    pub fn from_domain(visit: &Visit) -> Result<Self> {
        let service = visit
            .service
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        Ok(Self {
            id: visit.id.to_string(),
            patient_id: visit.patient_id.to_string(),
            appointment_id: visit.appointment_id.as_ref().map(ToString::to_string),
            visit_date: visit.visit_date,
            visit_type: visit.visit_type.as_str().to_string(),
            overall_status: visit.overall_status.as_str().to_string(),
            current_stage: visit.current_stage.as_str().to_string(),
            statuses: Stage::DEPARTMENTS
                .map(|stage| visit.stage_status(stage).as_db().map(str::to_string)),
            completed_at: Stage::DEPARTMENTS.map(|stage| visit.completed_at.get(stage)),
            stage_entered_at: visit.stage_entered_at,
            service,
            admission_key: visit.admission_key.as_ref().map(ToString::to_string),
            notes: visit.notes.clone(),
            created_at: visit.created_at,
            updated_at: visit.updated_at,
            discharged_at: visit.discharged_at,
            cancelled_at: visit.cancelled_at,
            version: visit.version,
        })
    }

    /// Read a row selected with [`VISIT_COLUMNS`]
    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: column(row, "id")?,
            patient_id: column(row, "patient_id")?,
            appointment_id: column(row, "appointment_id")?,
            visit_date: column(row, "visit_date")?,
            visit_type: column(row, "visit_type")?,
            overall_status: column(row, "overall_status")?,
            current_stage: column(row, "current_stage")?,
            statuses: [
                column(row, "reception_status")?,
                column(row, "nurse_status")?,
                column(row, "doctor_status")?,
                column(row, "lab_status")?,
                column(row, "pharmacy_status")?,
                column(row, "billing_status")?,
            ],
            completed_at: [
                column(row, "reception_completed_at")?,
                column(row, "nurse_completed_at")?,
                column(row, "doctor_completed_at")?,
                column(row, "lab_completed_at")?,
                column(row, "pharmacy_completed_at")?,
                column(row, "billing_completed_at")?,
            ],
            stage_entered_at: column(row, "stage_entered_at")?,
            service: column(row, "service")?,
            admission_key: column(row, "admission_key")?,
            notes: column(row, "notes")?,
            created_at: column(row, "created_at")?,
            updated_at: column(row, "updated_at")?,
            discharged_at: column(row, "discharged_at")?,
            cancelled_at: column(row, "cancelled_at")?,
            version: column(row, "version")?,
        })
    }

    /// Convert to the domain visit
    pub fn to_domain(self) -> Result<Visit> {
        let mut statuses = StageStatuses::default();
        let mut completed_at = StageTimestamps::default();
        for ((stage, status), at) in Stage::DEPARTMENTS
            .into_iter()
            .zip(self.statuses)
            .zip(self.completed_at)
        {
            statuses.set(stage, StageStatus::from_db(status.as_deref()).map_err(invalid)?);
            if let Some(at) = at {
                completed_at.set(stage, at);
            }
        }

        let service = self
            .service
            .map(serde_json::from_value::<ServiceRequest>)
            .transpose()?;

        Ok(Visit {
            id: VisitId::new(self.id).map_err(invalid)?,
            patient_id: PatientId::new(self.patient_id).map_err(invalid)?,
            appointment_id: self
                .appointment_id
                .map(AppointmentId::new)
                .transpose()
                .map_err(invalid)?,
            visit_date: self.visit_date,
            visit_type: parse(&self.visit_type)?,
            overall_status: parse(&self.overall_status)?,
            current_stage: parse(&self.current_stage)?,
            statuses,
            completed_at,
            stage_entered_at: self.stage_entered_at,
            service,
            admission_key: self.admission_key.map(AdmissionKey::from_stored),
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
            discharged_at: self.discharged_at,
            cancelled_at: self.cancelled_at,
            version: self.version,
        })
    }
}

pub fn patient_from_row(row: &Row) -> Result<Patient> {
    Ok(Patient {
        id: id_column(row, "id")?,
        full_name: column(row, "full_name")?,
        date_of_birth: column(row, "date_of_birth")?,
    })
}

pub fn appointment_from_row(row: &Row) -> Result<Appointment> {
    Ok(Appointment {
        id: id_column(row, "id")?,
        patient_id: id_column(row, "patient_id")?,
        scheduled_for: column(row, "scheduled_for")?,
        status: parse(&column::<String>(row, "status")?)?,
    })
}

pub fn prescription_from_row(row: &Row) -> Result<Prescription> {
    Ok(Prescription {
        id: id_column(row, "id")?,
        patient_id: id_column(row, "patient_id")?,
        visit_id: optional_id_column(row, "visit_id")?,
        medication_id: id_column::<MedicationId>(row, "medication_id")?,
        quantity: column(row, "quantity")?,
        status: parse(&column::<String>(row, "status")?)?,
        created_at: column(row, "created_at")?,
    })
}

pub fn medication_from_row(row: &Row) -> Result<Medication> {
    Ok(Medication {
        id: id_column(row, "id")?,
        name: column(row, "name")?,
        stock_quantity: column(row, "stock_quantity")?,
        unit_price_cents: column(row, "unit_price_cents")?,
    })
}

pub fn lab_test_from_row(row: &Row) -> Result<LabTest> {
    Ok(LabTest {
        id: id_column::<LabTestId>(row, "id")?,
        patient_id: id_column(row, "patient_id")?,
        visit_id: optional_id_column(row, "visit_id")?,
        test_name: column(row, "test_name")?,
        status: parse(&column::<String>(row, "status")?)?,
        price_cents: column(row, "price_cents")?,
        completed_at: column(row, "completed_at")?,
    })
}

pub fn billing_line_from_row(row: &Row) -> Result<BillingLine> {
    let kind: String = column(row, "source_kind")?;
    let reference: Option<String> = column(row, "source_ref")?;
    Ok(BillingLine {
        id: id_column::<BillingLineId>(row, "id")?,
        patient_id: id_column(row, "patient_id")?,
        visit_id: optional_id_column(row, "visit_id")?,
        description: column(row, "description")?,
        quantity: column(row, "quantity")?,
        unit_price_cents: column(row, "unit_price_cents")?,
        source: BillingSource::from_parts(&kind, reference).map_err(invalid)?,
        invoice_id: optional_id_column::<InvoiceId>(row, "invoice_id")?,
        created_at: column(row, "created_at")?,
    })
}

/// Invoice header row; line ids are read separately
pub fn invoice_from_row(row: &Row, line_ids: Vec<BillingLineId>) -> Result<Invoice> {
    Ok(Invoice {
        id: id_column(row, "id")?,
        patient_id: id_column(row, "patient_id")?,
        visit_id: optional_id_column(row, "visit_id")?,
        total_cents: column(row, "total_cents")?,
        line_ids,
        created_at: column(row, "created_at")?,
    })
}

fn invalid(message: String) -> StoreError {
    StoreError::InvalidData(message)
}

fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T> {
    row.try_get(name)
        .map_err(|e| invalid(format!("column '{name}': {e}")).into())
}

fn parse<T: FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse().map_err(|e| invalid(e).into())
}

fn id_column<T: FromStr<Err = String>>(row: &Row, name: &str) -> Result<T> {
    parse(&column::<String>(row, name)?)
}

fn optional_id_column<T: FromStr<Err = String>>(row: &Row, name: &str) -> Result<Option<T>> {
    column::<Option<String>>(row, name)?
        .map(|raw| parse(&raw))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::visit::VisitType;
    use chrono::TimeZone;

    fn sample_visit() -> Visit {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        let mut visit = Visit::builder(PatientId::new("pat-1").unwrap(), VisitType::QuickService)
            .appointment(Some(AppointmentId::new("appt-1").unwrap()))
            .service(Some(ServiceRequest {
                service_category: "injection".to_string(),
                description: "Tetanus booster".to_string(),
                requires_form: true,
                unit_price_cents: 2500,
            }))
            .created_at(at)
            .status(Stage::Reception, StageStatus::Completed)
            .at_stage(Stage::Nurse, StageStatus::InProgress)
            .build();
        visit.completed_at.set(Stage::Reception, at);
        visit.version = 4;
        visit
    }

    #[test]
    fn test_visit_row_conversion() {
        let visit = sample_visit();
        let row = PostgreSQLVisit::from_domain(&visit).unwrap();

        assert_eq!(row.visit_type, "quick_service");
        assert_eq!(row.current_stage, "nurse");
        assert_eq!(row.statuses[0].as_deref(), Some("completed"));
        assert_eq!(row.statuses[1].as_deref(), Some("in_progress"));
        assert_eq!(row.statuses[2], None);
        assert_eq!(row.admission_key.as_deref(), Some("appointment:appt-1"));
        assert_eq!(row.service.as_ref().unwrap()["requires_form"], true);

        assert_eq!(row.to_domain().unwrap(), visit);
    }

    #[test]
    fn test_null_status_reads_as_unset() {
        let mut row = PostgreSQLVisit::from_domain(&sample_visit()).unwrap();
        row.statuses[1] = None;
        let visit = row.to_domain().unwrap();
        assert_eq!(visit.stage_status(Stage::Nurse), StageStatus::Unset);
        assert!(visit.current_status().is_queue_eligible());
    }

    #[test]
    fn test_unknown_stage_is_invalid_data() {
        let mut row = PostgreSQLVisit::from_domain(&sample_visit()).unwrap();
        row.current_stage = "radiology".to_string();
        assert!(matches!(
            row.to_domain(),
            Err(crate::domain::WardflowError::Store(StoreError::InvalidData(_)))
        ));
    }
}
