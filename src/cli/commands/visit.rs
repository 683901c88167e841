//! Visit commands: admit, advance, dispense, cancel
//!
//! Thin wrappers over [`VisitCoordinator`](crate::core::coordinator::VisitCoordinator).
//! Each prints a short summary, or JSON with `--json`, and maps refusals to
//! exit code 1.

use super::{connect, report_failure, EXIT_OK};
use crate::core::admission::AdmissionRequest;
use crate::core::transition::Outcome;
use crate::domain::{
    AppointmentId, PatientId, PrescriptionId, ServiceRequest, Stage, Visit, VisitId, VisitType,
};
use chrono::NaiveDate;
use clap::Args;
use serde::Serialize;

/// Arguments for the admit command
#[derive(Args, Debug)]
pub struct AdmitArgs {
    /// Patient to admit
    #[arg(long)]
    pub patient: PatientId,

    /// Scheduled appointment; omit for a walk-in
    #[arg(long)]
    pub appointment: Option<AppointmentId>,

    /// consultation, lab-only, quick-service or direct-pharmacy
    #[arg(long, default_value = "consultation")]
    pub visit_type: VisitType,

    /// Always open a new visit (walk-ins only)
    #[arg(long, conflicts_with = "appointment")]
    pub new_encounter: bool,

    /// Visit date, defaults to today
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Register a lab-only walk-in straight at the lab (nurse desk)
    #[arg(long, conflicts_with_all = ["appointment", "new_encounter", "service_category"])]
    pub lab_walk_in: bool,

    /// Quick service category, e.g. dressing or injection
    #[arg(long)]
    pub service_category: Option<String>,

    /// Billing description of the quick service
    #[arg(long, requires = "service_category")]
    pub service_description: Option<String>,

    /// Price of the quick service in cents
    #[arg(long, requires = "service_category")]
    pub service_price_cents: Option<i64>,

    /// The nurse must submit a service form before discharge
    #[arg(long, requires = "service_category")]
    pub requires_form: bool,

    /// Note for the receiving department
    #[arg(long)]
    pub note: Option<String>,

    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

impl AdmitArgs {
    /// Builds the admission request from the flags
    pub fn to_request(&self) -> AdmissionRequest {
        let mut request = AdmissionRequest::new(self.patient.clone(), self.visit_type);
        if let Some(appointment) = &self.appointment {
            request = request.with_appointment(appointment.clone());
        }
        if let Some(category) = &self.service_category {
            request = request.with_service(ServiceRequest {
                service_category: category.clone(),
                description: self
                    .service_description
                    .clone()
                    .unwrap_or_else(|| category.clone()),
                requires_form: self.requires_form,
                unit_price_cents: self.service_price_cents.unwrap_or(0),
            });
        }
        if self.new_encounter {
            request = request.as_new_encounter();
        }
        if let Some(date) = self.date {
            request = request.on(date);
        }
        if let Some(note) = &self.note {
            request = request.with_note(note.clone());
        }
        request
    }

    /// Execute the admit command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let (_, coordinator) = match connect(config_path).await {
            Ok(connected) => connected,
            Err(code) => return Ok(code),
        };

        let result = if self.lab_walk_in {
            coordinator
                .register_lab_walk_in(&self.patient, self.date, self.note.as_deref())
                .await
        } else {
            coordinator.admit_or_check_in(self.to_request()).await
        };

        match result {
            Ok(admission) => {
                if self.json {
                    print_json(&admission)?;
                } else {
                    let verb = if admission.created { "Admitted" } else { "Checked in again" };
                    println!("✅ {verb}");
                    print_visit(&admission.visit);
                }
                Ok(EXIT_OK)
            }
            Err(e) => Ok(report_failure("Admission", &e)),
        }
    }
}

/// Arguments for the advance command
#[derive(Args, Debug)]
pub struct AdvanceArgs {
    /// Visit to route
    pub visit_id: VisitId,

    /// Stage the department is completing
    #[arg(long)]
    pub stage: Stage,

    /// proceed, send-to-doctor, send-to-lab, send-to-billing, discharge,
    /// form-submitted, results-ready, consulted, prescribed, settled
    #[arg(long)]
    pub outcome: Outcome,

    /// Note appended to the visit
    #[arg(long)]
    pub note: Option<String>,

    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

impl AdvanceArgs {
    /// Execute the advance command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let (_, coordinator) = match connect(config_path).await {
            Ok(connected) => connected,
            Err(code) => return Ok(code),
        };

        match coordinator
            .advance(&self.visit_id, self.stage, self.outcome, self.note.as_deref())
            .await
        {
            Ok(routed) => {
                if self.json {
                    print_json(&routed.visit)?;
                } else {
                    println!(
                        "✅ {} completed ({}), now at {}",
                        routed.transition.from, self.outcome, routed.visit.current_stage
                    );
                    print_visit(&routed.visit);
                    if let Some(invoice) = &routed.invoice {
                        println!(
                            "  Invoice: {} ({} line(s), {} cents)",
                            invoice.id,
                            invoice.line_ids.len(),
                            invoice.total_cents
                        );
                    }
                }
                Ok(EXIT_OK)
            }
            Err(e) => Ok(report_failure("Transition", &e)),
        }
    }
}

/// Arguments for the dispense command
#[derive(Args, Debug)]
pub struct DispenseArgs {
    /// Prescription to hand over
    pub prescription_id: PrescriptionId,

    /// Note appended to the visit
    #[arg(long)]
    pub note: Option<String>,

    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

impl DispenseArgs {
    /// Execute the dispense command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let (_, coordinator) = match connect(config_path).await {
            Ok(connected) => connected,
            Err(code) => return Ok(code),
        };

        match coordinator
            .dispense(&self.prescription_id, self.note.as_deref())
            .await
        {
            Ok(outcome) => {
                if self.json {
                    print_json(&outcome)?;
                } else {
                    println!("✅ Dispensed {}", outcome.prescription_id);
                    println!(
                        "  Billed: {} x {} cents",
                        outcome.billing_line.quantity, outcome.billing_line.unit_price_cents
                    );
                    if let Some(remaining) = outcome.stock_remaining {
                        println!("  Stock remaining: {remaining}");
                    }
                    match &outcome.visit {
                        Some(visit) => print_visit(visit),
                        None => println!("  No visit waiting at pharmacy; routing skipped"),
                    }
                }
                Ok(EXIT_OK)
            }
            Err(e) => Ok(report_failure("Dispense", &e)),
        }
    }
}

/// Arguments for the cancel command
#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Visit to cancel
    pub visit_id: VisitId,

    /// Reason recorded in the visit notes
    #[arg(long)]
    pub reason: Option<String>,

    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

impl CancelArgs {
    /// Execute the cancel command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let (_, coordinator) = match connect(config_path).await {
            Ok(connected) => connected,
            Err(code) => return Ok(code),
        };

        match coordinator
            .cancel(&self.visit_id, self.reason.as_deref())
            .await
        {
            Ok(visit) => {
                if self.json {
                    print_json(&visit)?;
                } else {
                    println!("✅ Visit cancelled");
                    print_visit(&visit);
                }
                Ok(EXIT_OK)
            }
            Err(e) => Ok(report_failure("Cancellation", &e)),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_visit(visit: &Visit) {
    println!("  Visit: {}", visit.id);
    println!("  Patient: {}", visit.patient_id);
    println!("  Type: {}", visit.visit_type);
    println!(
        "  Stage: {} ({})",
        visit.current_stage,
        visit.current_status()
    );
    println!("  Status: {}", visit.overall_status);
}
