//! Records owned by collaborating services
//!
//! Patients, appointments, prescriptions, inventory, billing and lab tests live
//! behind their own services. Wardflow only needs their typed shapes to route
//! visits and to build atomic write batches.

use super::ids::{
    AppointmentId, BillingLineId, InvoiceId, LabTestId, MedicationId, PatientId, PrescriptionId,
    VisitId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Generates `as_str`, `Display` and `FromStr` for a snake_case status enum
macro_rules! status_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("Unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

/// Patient directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub full_name: String,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
}

status_enum!(AppointmentStatus {
    Scheduled => "scheduled",
    CheckedIn => "checked_in",
    Completed => "completed",
    Cancelled => "cancelled",
    NoShow => "no_show",
});

/// Scheduled appointment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub patient_id: PatientId,
    pub scheduled_for: DateTime<Utc>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Active,
    Pending,
    Dispensed,
    Cancelled,
}

status_enum!(PrescriptionStatus {
    Active => "active",
    Pending => "pending",
    Dispensed => "dispensed",
    Cancelled => "cancelled",
});

impl PrescriptionStatus {
    /// Still waiting at the pharmacy counter
    pub fn is_outstanding(&self) -> bool {
        matches!(self, PrescriptionStatus::Active | PrescriptionStatus::Pending)
    }
}

/// Prescription issued by a doctor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: PrescriptionId,
    pub patient_id: PatientId,
    /// Visit the prescription was written in, when known
    pub visit_id: Option<VisitId>,
    pub medication_id: MedicationId,
    pub quantity: i64,
    pub status: PrescriptionStatus,
    pub created_at: DateTime<Utc>,
}

/// Inventory item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    pub id: MedicationId,
    pub name: String,
    pub stock_quantity: i64,
    pub unit_price_cents: i64,
}

/// What a billing line was raised for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum BillingSource {
    Medication(PrescriptionId),
    LabTest(LabTestId),
    Service(String),
    Manual,
}

impl BillingSource {
    /// Stored form: `kind` plus optional reference
    pub fn to_parts(&self) -> (&'static str, Option<String>) {
        match self {
            BillingSource::Medication(id) => ("medication", Some(id.to_string())),
            BillingSource::LabTest(id) => ("lab_test", Some(id.to_string())),
            BillingSource::Service(category) => ("service", Some(category.clone())),
            BillingSource::Manual => ("manual", None),
        }
    }

    pub fn from_parts(kind: &str, reference: Option<String>) -> Result<Self, String> {
        let require = |reference: Option<String>| {
            reference.ok_or_else(|| format!("Billing source '{kind}' requires a reference"))
        };
        match kind {
            "medication" => Ok(BillingSource::Medication(PrescriptionId::new(require(
                reference,
            )?)?)),
            "lab_test" => Ok(BillingSource::LabTest(LabTestId::new(require(reference)?)?)),
            "service" => Ok(BillingSource::Service(require(reference)?)),
            "manual" => Ok(BillingSource::Manual),
            other => Err(format!("Unknown billing source '{other}'")),
        }
    }
}

/// Billable line item on a patient's running account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingLine {
    pub id: BillingLineId,
    pub patient_id: PatientId,
    pub visit_id: Option<VisitId>,
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub source: BillingSource,
    /// Set once the line is rolled into an invoice
    pub invoice_id: Option<InvoiceId>,
    pub created_at: DateTime<Utc>,
}

impl BillingLine {
    pub fn new(
        patient_id: PatientId,
        visit_id: Option<VisitId>,
        description: impl Into<String>,
        quantity: i64,
        unit_price_cents: i64,
        source: BillingSource,
    ) -> Self {
        Self {
            id: BillingLineId::generate(),
            patient_id,
            visit_id,
            description: description.into(),
            quantity,
            unit_price_cents,
            source,
            invoice_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn total_cents(&self) -> i64 {
        self.quantity * self.unit_price_cents
    }
}

/// Invoice rolled up from billing lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub patient_id: PatientId,
    pub visit_id: Option<VisitId>,
    pub total_cents: i64,
    pub line_ids: Vec<BillingLineId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabTestStatus {
    Ordered,
    InProgress,
    Completed,
    Cancelled,
}

status_enum!(LabTestStatus {
    Ordered => "ordered",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl LabTestStatus {
    /// Result is in, or the test will never produce one
    pub fn is_resolved(&self) -> bool {
        matches!(self, LabTestStatus::Completed | LabTestStatus::Cancelled)
    }
}

/// Lab test ordered for a patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabTest {
    pub id: LabTestId,
    pub patient_id: PatientId,
    pub visit_id: Option<VisitId>,
    pub test_name: String,
    pub status: LabTestStatus,
    pub price_cents: i64,
    pub completed_at: Option<DateTime<Utc>>,
}
