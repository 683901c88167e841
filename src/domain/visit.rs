//! Visit domain model
//!
//! A [`Visit`] is one clinical encounter tracked end-to-end across departments.
//! Stages, per-stage statuses and visit types are closed enumerations; a stage
//! status that was never written is the explicit [`StageStatus::Unset`] variant,
//! which queue filters treat exactly like [`StageStatus::Pending`].

use super::ids::{AppointmentId, PatientId, VisitId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Department queue a visit can occupy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reception,
    Nurse,
    Doctor,
    Lab,
    Pharmacy,
    Billing,
    /// Terminal stage, no department owns it
    Completed,
}

impl Stage {
    /// Every stage that has a department queue and a status field
    pub const DEPARTMENTS: [Stage; 6] = [
        Stage::Reception,
        Stage::Nurse,
        Stage::Doctor,
        Stage::Lab,
        Stage::Pharmacy,
        Stage::Billing,
    ];

    /// Returns the stage name as stored and displayed
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reception => "reception",
            Stage::Nurse => "nurse",
            Stage::Doctor => "doctor",
            Stage::Lab => "lab",
            Stage::Pharmacy => "pharmacy",
            Stage::Billing => "billing",
            Stage::Completed => "completed",
        }
    }

    /// Whether this is the terminal stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reception" => Ok(Stage::Reception),
            "nurse" => Ok(Stage::Nurse),
            "doctor" => Ok(Stage::Doctor),
            "lab" => Ok(Stage::Lab),
            "pharmacy" => Ok(Stage::Pharmacy),
            "billing" => Ok(Stage::Billing),
            "completed" => Ok(Stage::Completed),
            other => Err(format!("Unknown stage '{other}'")),
        }
    }
}

/// Per-stage lifecycle value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    PendingReview,
    InProgress,
    Completed,
    NotRequired,
    Cancelled,
    /// Never written. Legacy rows carry NULL here; treated as `Pending`.
    #[default]
    Unset,
}

impl StageStatus {
    /// Returns the status name as stored (`None` for [`StageStatus::Unset`])
    pub fn as_db(&self) -> Option<&'static str> {
        match self {
            StageStatus::Unset => None,
            other => Some(other.as_str()),
        }
    }

    /// Maps a nullable stored value back to a status
    pub fn from_db(value: Option<&str>) -> Result<Self, String> {
        match value {
            None => Ok(StageStatus::Unset),
            Some(raw) if raw.trim().is_empty() => Ok(StageStatus::Unset),
            Some(raw) => raw.parse(),
        }
    }

    /// Returns the status name as displayed
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::PendingReview => "pending_review",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::NotRequired => "not_required",
            StageStatus::Cancelled => "cancelled",
            StageStatus::Unset => "unset",
        }
    }

    /// Statuses a department queue picks up
    pub fn is_queue_eligible(&self) -> bool {
        matches!(
            self,
            StageStatus::Pending | StageStatus::PendingReview | StageStatus::Unset
        )
    }

    /// Statuses allowed for the stage a visit currently occupies
    pub fn is_in_flight(&self) -> bool {
        self.is_queue_eligible() || matches!(self, StageStatus::InProgress)
    }

    /// Stage finished or skipped
    pub fn is_done(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::NotRequired)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "pending" => Ok(StageStatus::Pending),
            "pending_review" => Ok(StageStatus::PendingReview),
            "in_progress" => Ok(StageStatus::InProgress),
            "completed" => Ok(StageStatus::Completed),
            "not_required" => Ok(StageStatus::NotRequired),
            "cancelled" => Ok(StageStatus::Cancelled),
            "unset" => Ok(StageStatus::Unset),
            other => Err(format!("Unknown stage status '{other}'")),
        }
    }
}

/// Path template a visit follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitType {
    /// Full path through nurse and doctor
    Consultation,
    /// Nurse orders lab tests, doctor is skipped
    LabOnly,
    /// Nurse performs a bounded service and discharges
    QuickService,
    /// Straight to pharmacy
    #[serde(alias = "pharmacy_only")]
    DirectPharmacy,
}

impl VisitType {
    /// Ordered stages of this visit type's main path
    ///
    /// A Consultation may detour through Lab between Nurse and Doctor, and a
    /// LabOnly visit returns to Nurse for review between Lab and Billing.
    pub fn path(&self) -> &'static [Stage] {
        match self {
            VisitType::Consultation => &[
                Stage::Reception,
                Stage::Nurse,
                Stage::Doctor,
                Stage::Pharmacy,
                Stage::Billing,
            ],
            VisitType::LabOnly => &[Stage::Reception, Stage::Nurse, Stage::Lab, Stage::Billing],
            VisitType::QuickService => &[Stage::Reception, Stage::Nurse],
            VisitType::DirectPharmacy => &[Stage::Reception, Stage::Pharmacy, Stage::Billing],
        }
    }

    /// Returns the visit type name as stored
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitType::Consultation => "consultation",
            VisitType::LabOnly => "lab_only",
            VisitType::QuickService => "quick_service",
            VisitType::DirectPharmacy => "direct_pharmacy",
        }
    }
}

impl fmt::Display for VisitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "consultation" => Ok(VisitType::Consultation),
            "lab_only" => Ok(VisitType::LabOnly),
            "quick_service" => Ok(VisitType::QuickService),
            "direct_pharmacy" | "pharmacy_only" => Ok(VisitType::DirectPharmacy),
            other => Err(format!("Unknown visit type '{other}'")),
        }
    }
}

/// Overall visit lifecycle; terminal once not `Active`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Active,
    Completed,
    Cancelled,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Active => "active",
            OverallStatus::Completed => "completed",
            OverallStatus::Cancelled => "cancelled",
        }
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_become(&self, next: OverallStatus) -> bool {
        match self {
            OverallStatus::Active => true,
            terminal => *terminal == next,
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(OverallStatus::Active),
            "completed" => Ok(OverallStatus::Completed),
            "cancelled" => Ok(OverallStatus::Cancelled),
            other => Err(format!("Unknown overall status '{other}'")),
        }
    }
}

/// Bounded nurse service attached to a QuickService visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Service category, e.g. "dressing" or "injection"
    pub service_category: String,

    /// Line item description for billing
    pub description: String,

    /// Whether the nurse must submit a structured form before discharge
    #[serde(default)]
    pub requires_form: bool,

    /// Price in minor currency units
    pub unit_price_cents: i64,
}

/// One status field per department stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageStatuses {
    #[serde(default)]
    pub reception: StageStatus,
    #[serde(default)]
    pub nurse: StageStatus,
    #[serde(default)]
    pub doctor: StageStatus,
    #[serde(default)]
    pub lab: StageStatus,
    #[serde(default)]
    pub pharmacy: StageStatus,
    #[serde(default)]
    pub billing: StageStatus,
}

impl StageStatuses {
    /// Status of a stage; the terminal stage always reads as `Completed`
    pub fn get(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Reception => self.reception,
            Stage::Nurse => self.nurse,
            Stage::Doctor => self.doctor,
            Stage::Lab => self.lab,
            Stage::Pharmacy => self.pharmacy,
            Stage::Billing => self.billing,
            Stage::Completed => StageStatus::Completed,
        }
    }

    /// Sets a stage status; ignored for the terminal stage
    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        match stage {
            Stage::Reception => self.reception = status,
            Stage::Nurse => self.nurse = status,
            Stage::Doctor => self.doctor = status,
            Stage::Lab => self.lab = status,
            Stage::Pharmacy => self.pharmacy = status,
            Stage::Billing => self.billing = status,
            Stage::Completed => {}
        }
    }
}

/// Completion timestamp per department stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageTimestamps {
    pub reception: Option<DateTime<Utc>>,
    pub nurse: Option<DateTime<Utc>>,
    pub doctor: Option<DateTime<Utc>>,
    pub lab: Option<DateTime<Utc>>,
    pub pharmacy: Option<DateTime<Utc>>,
    pub billing: Option<DateTime<Utc>>,
}

impl StageTimestamps {
    pub fn get(&self, stage: Stage) -> Option<DateTime<Utc>> {
        match stage {
            Stage::Reception => self.reception,
            Stage::Nurse => self.nurse,
            Stage::Doctor => self.doctor,
            Stage::Lab => self.lab,
            Stage::Pharmacy => self.pharmacy,
            Stage::Billing => self.billing,
            Stage::Completed => None,
        }
    }

    pub fn set(&mut self, stage: Stage, at: DateTime<Utc>) {
        match stage {
            Stage::Reception => self.reception = Some(at),
            Stage::Nurse => self.nurse = Some(at),
            Stage::Doctor => self.doctor = Some(at),
            Stage::Lab => self.lab = Some(at),
            Stage::Pharmacy => self.pharmacy = Some(at),
            Stage::Billing => self.billing = Some(at),
            Stage::Completed => {}
        }
    }
}

/// Uniqueness key among active visits
///
/// Format: `appointment:{appointment_id}` or `walk-in:{patient_id}:{date}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdmissionKey(String);

impl AdmissionKey {
    pub fn for_appointment(appointment_id: &AppointmentId) -> Self {
        Self(format!("appointment:{}", appointment_id.as_str()))
    }

    /// `visit_date` is the clinic's calendar day, not the UTC date
    pub fn for_walk_in(patient_id: &PatientId, visit_date: NaiveDate) -> Self {
        Self(format!(
            "walk-in:{}:{}",
            patient_id.as_str(),
            visit_date.format("%Y-%m-%d")
        ))
    }

    /// Key for a patient's visit, appointment-bound when an appointment is known
    pub fn derive(
        patient_id: &PatientId,
        appointment_id: Option<&AppointmentId>,
        visit_date: NaiveDate,
    ) -> Self {
        match appointment_id {
            Some(appointment_id) => Self::for_appointment(appointment_id),
            None => Self::for_walk_in(patient_id, visit_date),
        }
    }

    /// Rebuilds a key read back from storage
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One clinical encounter of a patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub patient_id: PatientId,
    /// Absent for walk-ins
    pub appointment_id: Option<AppointmentId>,
    pub visit_date: NaiveDate,
    pub visit_type: VisitType,
    pub overall_status: OverallStatus,
    pub current_stage: Stage,
    pub statuses: StageStatuses,
    pub completed_at: StageTimestamps,
    /// When the visit entered `current_stage`; queue ordering key
    pub stage_entered_at: Option<DateTime<Utc>>,
    pub service: Option<ServiceRequest>,
    /// `None` for visits explicitly admitted as a new encounter
    pub admission_key: Option<AdmissionKey>,
    /// Append-only annotations, one line each
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub discharged_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped by the store on every write
    pub version: i64,
}

impl Visit {
    /// Creates a new builder for constructing a Visit
    pub fn builder(patient_id: PatientId, visit_type: VisitType) -> VisitBuilder {
        VisitBuilder::new(patient_id, visit_type)
    }

    pub fn is_active(&self) -> bool {
        self.overall_status == OverallStatus::Active
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        self.statuses.get(stage)
    }

    /// Status of the stage the visit currently occupies
    pub fn current_status(&self) -> StageStatus {
        self.statuses.get(self.current_stage)
    }

    /// Timestamp the queues order by
    pub fn queue_anchor(&self) -> DateTime<Utc> {
        self.stage_entered_at.unwrap_or(self.created_at)
    }

    /// Appends one annotation line tagged with the writing stage
    pub fn append_note(&mut self, stage: Stage, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(&format!("[{stage}] {text}"));
    }
}

/// Builder for [`Visit`]
///
/// New visits start at Reception with `reception_status = Pending`. Tests and
/// the walk-in registration path override stage and statuses.
///
/// # Examples
///
/// ```
/// use wardflow::domain::ids::PatientId;
/// use wardflow::domain::visit::{Stage, StageStatus, Visit, VisitType};
///
/// let visit = Visit::builder(PatientId::new("pat-1").unwrap(), VisitType::Consultation)
///     .build();
/// assert_eq!(visit.current_stage, Stage::Reception);
/// assert_eq!(visit.stage_status(Stage::Reception), StageStatus::Pending);
/// ```
#[derive(Debug)]
pub struct VisitBuilder {
    id: Option<VisitId>,
    patient_id: PatientId,
    appointment_id: Option<AppointmentId>,
    visit_date: Option<NaiveDate>,
    visit_type: VisitType,
    current_stage: Stage,
    statuses: StageStatuses,
    service: Option<ServiceRequest>,
    new_encounter: bool,
    created_at: Option<DateTime<Utc>>,
    notes: String,
}

impl VisitBuilder {
    pub fn new(patient_id: PatientId, visit_type: VisitType) -> Self {
        let statuses = StageStatuses {
            reception: StageStatus::Pending,
            ..StageStatuses::default()
        };
        Self {
            id: None,
            patient_id,
            appointment_id: None,
            visit_date: None,
            visit_type,
            current_stage: Stage::Reception,
            statuses,
            service: None,
            new_encounter: false,
            created_at: None,
            notes: String::new(),
        }
    }

    pub fn id(mut self, id: VisitId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn appointment(mut self, appointment_id: Option<AppointmentId>) -> Self {
        self.appointment_id = appointment_id;
        self
    }

    pub fn visit_date(mut self, visit_date: NaiveDate) -> Self {
        self.visit_date = Some(visit_date);
        self
    }

    pub fn service(mut self, service: Option<ServiceRequest>) -> Self {
        self.service = service;
        self
    }

    /// Skip the admission key; the visit never collides with another
    pub fn new_encounter(mut self, new_encounter: bool) -> Self {
        self.new_encounter = new_encounter;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Places the visit at `stage` with the given status
    pub fn at_stage(mut self, stage: Stage, status: StageStatus) -> Self {
        self.current_stage = stage;
        self.statuses.set(stage, status);
        self
    }

    pub fn status(mut self, stage: Stage, status: StageStatus) -> Self {
        self.statuses.set(stage, status);
        self
    }

    pub fn note(mut self, stage: Stage, text: &str) -> Self {
        let text = text.trim();
        if !text.is_empty() {
            if !self.notes.is_empty() {
                self.notes.push('\n');
            }
            self.notes.push_str(&format!("[{stage}] {text}"));
        }
        self
    }

    pub fn build(self) -> Visit {
        let now = self.created_at.unwrap_or_else(Utc::now);
        let visit_date = self.visit_date.unwrap_or_else(|| now.date_naive());
        let admission_key = (!self.new_encounter).then(|| {
            AdmissionKey::derive(&self.patient_id, self.appointment_id.as_ref(), visit_date)
        });

        Visit {
            id: self.id.unwrap_or_else(VisitId::generate),
            patient_id: self.patient_id,
            appointment_id: self.appointment_id,
            visit_date,
            visit_type: self.visit_type,
            overall_status: OverallStatus::Active,
            current_stage: self.current_stage,
            statuses: self.statuses,
            completed_at: StageTimestamps::default(),
            stage_entered_at: Some(now),
            service: self.service,
            admission_key,
            notes: self.notes,
            created_at: now,
            updated_at: now,
            discharged_at: None,
            cancelled_at: None,
            version: 0,
        }
    }
}
