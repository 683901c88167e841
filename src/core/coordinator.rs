//! Visit coordinator - the write path of the routing engine
//!
//! Every staff action goes through here: admission, stage completion,
//! dispensing, settlement and cancellation. Each action reads the current
//! state, plans with the pure transition engine, checks the invariants of the
//! planned successor and commits everything the action touches as one
//! [`WriteBatch`]. When the commit loses an optimistic check the action is
//! re-read and re-planned from scratch, up to `routing.max_conflict_retries`
//! times.

use crate::adapters::database::{
    ClinicBackend, CommitReceipt, InvoiceDraft, StockAdjustment, VisitQuery, VisitWrite,
    WriteBatch,
};
use crate::config::{PrescriptionScope, RoutingConfig};
use crate::core::admission::{build_lab_walk_in, re_check_in, Admission, AdmissionRequest};
use crate::core::invariants::check_successor;
use crate::core::queue::QueueProjection;
use crate::core::transition::{
    plan, plan_cancellation, Outcome, SideEffect, Transition, TransitionContext,
};
use crate::domain::errors::{StoreError, WardflowError};
use crate::domain::ids::{AppointmentId, InvoiceId, PatientId, PrescriptionId, VisitId};
use crate::domain::records::{
    AppointmentStatus, BillingLine, BillingSource, Invoice, LabTestStatus, Patient, Prescription,
    PrescriptionStatus,
};
use crate::domain::visit::{AdmissionKey, Stage, Visit};
use crate::domain::{Result, RoutingError};
use crate::{log_conflict_retry, log_transition};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

/// A committed stage transition
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedVisit {
    /// The visit as stored, version bumped
    pub visit: Visit,
    pub transition: Transition,
    /// Invoice raised by the same commit, when settling billing
    pub invoice: Option<Invoice>,
}

/// Result of settling a visit's bill
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub visit: Visit,
    /// `None` when the patient had nothing left to invoice
    pub invoice: Option<Invoice>,
}

/// Result of dispensing one prescription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispenseOutcome {
    pub prescription_id: PrescriptionId,
    pub billing_line: BillingLine,
    pub stock_remaining: Option<i64>,
    /// The routed visit, when the patient was waiting at pharmacy
    pub visit: Option<Visit>,
    /// Whether this was the last outstanding prescription and the visit left pharmacy
    pub moved_to_billing: bool,
}

/// Admission inputs resolved once, before any retry
struct Intake<'a> {
    key: Option<AdmissionKey>,
    fresh: Visit,
    appointment_id: Option<&'a AppointmentId>,
    note_stage: Stage,
    note: Option<&'a str>,
}

/// Coordinates writes against one clinic backend
pub struct VisitCoordinator {
    backend: Arc<dyn ClinicBackend>,
    routing: RoutingConfig,
}

impl VisitCoordinator {
    pub fn new(backend: Arc<dyn ClinicBackend>, routing: RoutingConfig) -> Self {
        Self { backend, routing }
    }

    pub fn backend(&self) -> &Arc<dyn ClinicBackend> {
        &self.backend
    }

    /// Read-side projection over the same backend
    pub fn queues(&self) -> QueueProjection {
        QueueProjection::new(Arc::clone(&self.backend).visit_store())
    }

    pub async fn get_visit(&self, id: &VisitId) -> Result<Visit> {
        self.backend
            .get_visit(id)
            .await?
            .ok_or_else(|| StoreError::not_found("visit", id.as_str()).into())
    }

    /// Admits a patient, or checks in again on the visit already active for
    /// the same appointment (or the same walk-in day)
    ///
    /// # Errors
    ///
    /// - `WardflowError::Validation` for inconsistent requests or an appointment
    ///   that is cancelled, a no-show, or booked for another patient
    /// - `StoreError::NotFound` for an unknown patient or appointment
    pub async fn admit_or_check_in(&self, request: AdmissionRequest) -> Result<Admission> {
        request.validate()?;
        self.require_patient(&request.patient_id).await?;
        if let Some(appointment_id) = &request.appointment_id {
            self.check_appointment(appointment_id, &request.patient_id)
                .await?;
        }

        let now = Utc::now();
        let intake = Intake {
            key: request.admission_key(now),
            fresh: request.build_visit(now),
            appointment_id: request.appointment_id.as_ref(),
            note_stage: Stage::Reception,
            note: request.note.as_deref(),
        };

        self.with_conflict_retry("admit", || self.try_admit(&intake))
            .await
    }

    /// Nurse desk registration of a lab-only walk-in, placed straight at Lab
    ///
    /// `visit_date` is the clinic's calendar day and keys the walk-in
    /// deduplication; the UTC date is used when it is omitted.
    pub async fn register_lab_walk_in(
        &self,
        patient_id: &PatientId,
        visit_date: Option<NaiveDate>,
        note: Option<&str>,
    ) -> Result<Admission> {
        self.require_patient(patient_id).await?;

        let now = Utc::now();
        let visit_date = visit_date.unwrap_or_else(|| now.date_naive());
        let intake = Intake {
            key: Some(AdmissionKey::for_walk_in(patient_id, visit_date)),
            fresh: build_lab_walk_in(patient_id.clone(), visit_date, now, note),
            appointment_id: None,
            note_stage: Stage::Nurse,
            note,
        };

        self.with_conflict_retry("register_lab_walk_in", || self.try_admit(&intake))
            .await
    }

    /// Completes `completing` with `outcome` and routes the visit onwards
    ///
    /// # Errors
    ///
    /// - `RoutingError::StaleTransition` / `InvalidStageState` when the visit
    ///   moved on since the caller read it
    /// - `RoutingError::InvalidStageState` when releasing pharmacy while
    ///   prescriptions in the configured scope are still outstanding
    /// - `RoutingError::OutstandingLabTests` when completing Lab early
    /// - `RoutingError::ConcurrentModification` after the retries ran out
    pub async fn advance(
        &self,
        visit_id: &VisitId,
        completing: Stage,
        outcome: Outcome,
        note: Option<&str>,
    ) -> Result<RoutedVisit> {
        if outcome == Outcome::Dispensed {
            return Err(WardflowError::Validation(
                "pharmacy completes through dispense, not advance".to_string(),
            ));
        }

        self.with_conflict_retry("advance", || {
            self.try_advance(visit_id, completing, outcome, note)
        })
        .await
    }

    /// Settles the bill: raises the invoice and discharges in one commit
    pub async fn settle_billing(&self, visit_id: &VisitId, note: Option<&str>) -> Result<Settlement> {
        let routed = self
            .advance(visit_id, Stage::Billing, Outcome::Settled, note)
            .await?;
        Ok(Settlement {
            visit: routed.visit,
            invoice: routed.invoice,
        })
    }

    /// Dispenses one prescription
    ///
    /// Decrements stock, bills the medication, marks the prescription dispensed
    /// and, when the patient is waiting at pharmacy, routes the visit: to
    /// billing after the last outstanding prescription in the configured
    /// scope, otherwise it stays at pharmacy. All in one commit.
    ///
    /// # Errors
    ///
    /// - `StoreError::InsufficientStock` leaves stock, prescription, billing and
    ///   visit untouched
    /// - `WardflowError::Validation` if the prescription is not outstanding
    pub async fn dispense(
        &self,
        prescription_id: &PrescriptionId,
        note: Option<&str>,
    ) -> Result<DispenseOutcome> {
        self.with_conflict_retry("dispense", || self.try_dispense(prescription_id, note))
            .await
    }

    /// Cancels an active visit from whatever stage it is at
    pub async fn cancel(&self, visit_id: &VisitId, reason: Option<&str>) -> Result<Visit> {
        self.with_conflict_retry("cancel", || self.try_cancel(visit_id, reason))
            .await
    }

    async fn with_conflict_retry<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_retries = self.routing.max_conflict_retries;
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_write_conflict() && retries < max_retries => {
                    retries += 1;
                    log_conflict_retry!(retries, max_retries, err);
                    tracing::debug!(operation, "Re-reading state before retry");
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }

    async fn try_admit(&self, intake: &Intake<'_>) -> Result<Admission> {
        if let Some(key) = &intake.key {
            if let Some(existing) = self.backend.find_active_by_key(key).await? {
                return self.check_in_again(existing, intake).await;
            }
        }

        let mut batch = WriteBatch::with_visit(VisitWrite::Insert(intake.fresh.clone()));
        if let Some(appointment_id) = intake.appointment_id {
            batch
                .appointment_updates
                .push((appointment_id.clone(), AppointmentStatus::CheckedIn));
        }

        match self.backend.commit(batch).await {
            Ok(receipt) => {
                let visit = stored_visit(receipt)?;
                tracing::info!(
                    visit_id = %visit.id,
                    patient_id = %visit.patient_id,
                    visit_type = %visit.visit_type,
                    stage = %visit.current_stage,
                    "Visit admitted"
                );
                Ok(Admission {
                    visit,
                    created: true,
                })
            }
            Err(WardflowError::Store(StoreError::DuplicateAdmission(raw))) => {
                tracing::debug!(admission_key = %raw, "Lost admission race, checking in the existing visit");
                let key = AdmissionKey::from_stored(raw);
                match self.backend.find_active_by_key(&key).await? {
                    Some(existing) => self.check_in_again(existing, intake).await,
                    // The winner closed in between; start over
                    None => Err(StoreError::conflict("visit", key.to_string(), "admission key released").into()),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn check_in_again(&self, existing: Visit, intake: &Intake<'_>) -> Result<Admission> {
        let updated = re_check_in(&existing, intake.note_stage, intake.note, Utc::now());
        let mut batch = WriteBatch::with_visit(VisitWrite::Update {
            visit: updated,
            expected_version: existing.version,
        });
        if let Some(appointment_id) = intake.appointment_id {
            batch
                .appointment_updates
                .push((appointment_id.clone(), AppointmentStatus::CheckedIn));
        }

        let visit = stored_visit(self.backend.commit(batch).await?)?;
        tracing::info!(
            visit_id = %visit.id,
            patient_id = %visit.patient_id,
            stage = %visit.current_stage,
            "Existing visit checked in again"
        );
        Ok(Admission {
            visit,
            created: false,
        })
    }

    async fn try_advance(
        &self,
        visit_id: &VisitId,
        completing: Stage,
        outcome: Outcome,
        note: Option<&str>,
    ) -> Result<RoutedVisit> {
        let visit = self.get_visit(visit_id).await?;
        let ctx = if completing == Stage::Pharmacy && visit.current_stage == Stage::Pharmacy {
            TransitionContext {
                pending_prescriptions: self
                    .pending_prescriptions(&visit.patient_id, &visit, None)
                    .await?,
            }
        } else {
            TransitionContext::default()
        };
        let transition = plan(&visit, completing, outcome, &ctx)?;

        if transition.from == Stage::Lab && transition.completes_source {
            self.ensure_lab_resulted(&visit).await?;
        }

        let now = Utc::now();
        let next = successor(&visit, &transition, note, now)?;

        let mut batch = WriteBatch::new();
        self.stage_side_effects(&visit, &transition, &mut batch)
            .await?;
        batch.visit = Some(VisitWrite::Update {
            visit: next,
            expected_version: transition.expected_version,
        });

        let receipt = self.backend.commit(batch).await?;
        let invoice = receipt.invoice.clone();
        let stored = stored_visit(receipt)?;
        log_transition!(stored.id, transition.from, stored.current_stage, outcome);
        if let Some(invoice) = &invoice {
            tracing::info!(
                visit_id = %stored.id,
                invoice_id = %invoice.id,
                total_cents = invoice.total_cents,
                "Invoice created"
            );
        }

        Ok(RoutedVisit {
            visit: stored,
            transition,
            invoice,
        })
    }

    async fn try_dispense(
        &self,
        prescription_id: &PrescriptionId,
        note: Option<&str>,
    ) -> Result<DispenseOutcome> {
        let prescription = self
            .backend
            .get_prescription(prescription_id)
            .await
            .map_err(collaborator("prescriptions"))?
            .ok_or_else(|| StoreError::not_found("prescription", prescription_id.as_str()))?;
        if !prescription.status.is_outstanding() {
            return Err(WardflowError::Validation(format!(
                "prescription {} is {}, nothing to dispense",
                prescription.id, prescription.status
            )));
        }
        if prescription.quantity <= 0 {
            return Err(WardflowError::Validation(format!(
                "prescription {} has no quantity to dispense",
                prescription.id
            )));
        }

        let medication = self
            .backend
            .get_medication(&prescription.medication_id)
            .await
            .map_err(collaborator("inventory"))?
            .ok_or_else(|| {
                StoreError::not_found("medication", prescription.medication_id.as_str())
            })?;

        let now = Utc::now();
        let waiting = self.visit_at_pharmacy(&prescription).await?;

        let mut batch = WriteBatch::new();
        let mut routed = None;
        if let Some(visit) = waiting {
            let pending = self
                .pending_prescriptions(&prescription.patient_id, &visit, Some(&prescription.id))
                .await?;
            let ctx = TransitionContext {
                pending_prescriptions: pending,
            };
            let transition = plan(&visit, Stage::Pharmacy, Outcome::Dispensed, &ctx)?;
            let next = successor(&visit, &transition, note, now)?;
            batch.visit = Some(VisitWrite::Update {
                visit: next,
                expected_version: transition.expected_version,
            });
            routed = Some(transition);
        }

        let line_visit = routed
            .as_ref()
            .map(|transition| transition.visit_id.clone())
            .or_else(|| prescription.visit_id.clone());
        let line = BillingLine::new(
            prescription.patient_id.clone(),
            line_visit,
            format!("{} x{}", medication.name, prescription.quantity),
            prescription.quantity,
            medication.unit_price_cents,
            BillingSource::Medication(prescription.id.clone()),
        );

        batch.stock_adjustments.push(StockAdjustment {
            medication_id: medication.id.clone(),
            delta: -prescription.quantity,
        });
        batch.billing_lines.push(line.clone());
        batch
            .prescription_updates
            .push((prescription.id.clone(), PrescriptionStatus::Dispensed));

        let receipt = self.backend.commit(batch).await?;
        let stock_remaining = receipt
            .stock_levels
            .iter()
            .find(|(id, _)| id == &medication.id)
            .map(|(_, level)| *level);

        tracing::info!(
            prescription_id = %prescription.id,
            medication_id = %medication.id,
            quantity = prescription.quantity,
            stock_remaining = ?stock_remaining,
            "Prescription dispensed"
        );

        let moved_to_billing = routed
            .as_ref()
            .map(|transition| transition.next_stage == Stage::Billing)
            .unwrap_or(false);
        let visit = receipt.visit;
        if let (Some(visit), Some(transition)) = (&visit, &routed) {
            log_transition!(visit.id, transition.from, visit.current_stage, Outcome::Dispensed);
        }

        Ok(DispenseOutcome {
            prescription_id: prescription.id,
            billing_line: line,
            stock_remaining,
            visit,
            moved_to_billing,
        })
    }

    async fn try_cancel(&self, visit_id: &VisitId, reason: Option<&str>) -> Result<Visit> {
        let visit = self.get_visit(visit_id).await?;
        let transition = plan_cancellation(&visit)?;
        let now = Utc::now();
        let mut next = transition.apply(&visit, now);
        next.append_note(visit.current_stage, reason.unwrap_or("Visit cancelled"));
        check_successor(&visit, &next)?;

        let batch = WriteBatch::with_visit(VisitWrite::Update {
            visit: next,
            expected_version: transition.expected_version,
        });
        let stored = stored_visit(self.backend.commit(batch).await?)?;
        tracing::info!(
            visit_id = %stored.id,
            stage = %stored.current_stage,
            "Visit cancelled"
        );
        Ok(stored)
    }

    /// Turns the planned side effects into writes of `batch`
    ///
    /// Queue entry and exit need no writes: the projection derives them from
    /// the stored visit. Dispensed items are billed by [`Self::dispense`].
    async fn stage_side_effects(
        &self,
        visit: &Visit,
        transition: &Transition,
        batch: &mut WriteBatch,
    ) -> Result<()> {
        for effect in &transition.side_effects {
            match effect {
                SideEffect::BillLabTests => self.bill_lab_tests(visit, batch).await?,
                SideEffect::BillQuickService => bill_quick_service(visit, batch),
                SideEffect::CreateInvoice => self.draft_invoice(visit, batch).await?,
                SideEffect::Discharge => {
                    if let Some(appointment_id) = &visit.appointment_id {
                        batch
                            .appointment_updates
                            .push((appointment_id.clone(), AppointmentStatus::Completed));
                    }
                }
                SideEffect::AwaitServiceForm => {
                    tracing::debug!(visit_id = %visit.id, "Waiting for service form");
                }
                SideEffect::BillDispensedItems
                | SideEffect::MarkNotRequired(_)
                | SideEffect::RemoveFromQueue(_)
                | SideEffect::EnqueueAt(_) => {}
            }
        }
        Ok(())
    }

    async fn bill_lab_tests(&self, visit: &Visit, batch: &mut WriteBatch) -> Result<()> {
        let tests = self
            .backend
            .list_lab_tests(&visit.patient_id, Some(&visit.id))
            .await
            .map_err(collaborator("lab"))?;
        let existing = self
            .backend
            .lines_for_patient(&visit.patient_id, false)
            .await
            .map_err(collaborator("billing"))?;
        let billed: HashSet<&BillingSource> = existing.iter().map(|line| &line.source).collect();

        for test in tests
            .iter()
            .filter(|test| test.status == LabTestStatus::Completed)
        {
            let source = BillingSource::LabTest(test.id.clone());
            if billed.contains(&source) {
                continue;
            }
            batch.billing_lines.push(BillingLine::new(
                visit.patient_id.clone(),
                Some(visit.id.clone()),
                format!("Lab test: {}", test.test_name),
                1,
                test.price_cents,
                source,
            ));
        }
        Ok(())
    }

    async fn draft_invoice(&self, visit: &Visit, batch: &mut WriteBatch) -> Result<()> {
        let open = self
            .backend
            .lines_for_patient(&visit.patient_id, true)
            .await
            .map_err(collaborator("billing"))?;
        let line_ids: Vec<_> = open
            .iter()
            .chain(batch.billing_lines.iter())
            .filter(|line| line.patient_id == visit.patient_id && line.invoice_id.is_none())
            .map(|line| line.id.clone())
            .collect();

        if line_ids.is_empty() {
            tracing::debug!(visit_id = %visit.id, "Nothing to invoice");
            return Ok(());
        }

        batch.invoice = Some(InvoiceDraft {
            id: InvoiceId::generate(),
            patient_id: visit.patient_id.clone(),
            visit_id: Some(visit.id.clone()),
            line_ids,
        });
        Ok(())
    }

    async fn ensure_lab_resulted(&self, visit: &Visit) -> Result<()> {
        let tests = self
            .backend
            .list_lab_tests(&visit.patient_id, Some(&visit.id))
            .await
            .map_err(collaborator("lab"))?;
        let pending = tests.iter().filter(|test| !test.status.is_resolved()).count();
        if pending > 0 {
            return Err(RoutingError::OutstandingLabTests {
                visit_id: visit.id.to_string(),
                pending,
            }
            .into());
        }
        Ok(())
    }

    /// Active visit waiting at pharmacy that dispensing `prescription` routes
    ///
    /// The visit the prescription names wins. With patient scope any of the
    /// patient's prescriptions counts towards the waiting visit, so an older
    /// prescription from another visit still routes it.
    async fn visit_at_pharmacy(&self, prescription: &Prescription) -> Result<Option<Visit>> {
        if let Some(visit_id) = &prescription.visit_id {
            let linked = self
                .backend
                .get_visit(visit_id)
                .await?
                .filter(|visit| visit.is_active() && visit.current_stage == Stage::Pharmacy);
            if linked.is_some() || self.routing.prescription_scope == PrescriptionScope::Visit {
                return Ok(linked);
            }
        }

        let query = VisitQuery {
            stage: Some(Stage::Pharmacy),
            ..VisitQuery::active_for_patient(prescription.patient_id.clone())
        };
        Ok(self.backend.find_visits(&query).await?.into_iter().next())
    }

    /// Outstanding prescriptions in the configured scope, other than `excluding`
    async fn pending_prescriptions(
        &self,
        patient_id: &PatientId,
        visit: &Visit,
        excluding: Option<&PrescriptionId>,
    ) -> Result<usize> {
        let all = self
            .backend
            .list_prescriptions(patient_id, None)
            .await
            .map_err(collaborator("prescriptions"))?;
        let scope = self.routing.prescription_scope;
        Ok(all
            .iter()
            .filter(|p| Some(&p.id) != excluding && p.status.is_outstanding())
            .filter(|p| match scope {
                PrescriptionScope::Patient => true,
                PrescriptionScope::Visit => p.visit_id.as_ref() == Some(&visit.id),
            })
            .count())
    }

    async fn require_patient(&self, id: &PatientId) -> Result<Patient> {
        self.backend
            .get_patient(id)
            .await
            .map_err(collaborator("patients"))?
            .ok_or_else(|| StoreError::not_found("patient", id.as_str()).into())
    }

    async fn check_appointment(&self, id: &AppointmentId, patient_id: &PatientId) -> Result<()> {
        let appointment = self
            .backend
            .get_appointment(id)
            .await
            .map_err(collaborator("appointments"))?
            .ok_or_else(|| StoreError::not_found("appointment", id.as_str()))?;

        if &appointment.patient_id != patient_id {
            return Err(WardflowError::Validation(format!(
                "appointment {id} belongs to another patient"
            )));
        }
        if matches!(
            appointment.status,
            AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        ) {
            return Err(WardflowError::Validation(format!(
                "appointment {id} is {}",
                appointment.status
            )));
        }
        Ok(())
    }
}

/// Applies a planned transition and validates the result
fn successor(
    visit: &Visit,
    transition: &Transition,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Visit> {
    let mut next = transition.apply(visit, now);
    if let Some(note) = note {
        next.append_note(transition.from, note);
    }
    check_successor(visit, &next)?;
    Ok(next)
}

fn bill_quick_service(visit: &Visit, batch: &mut WriteBatch) {
    match &visit.service {
        Some(service) => batch.billing_lines.push(BillingLine::new(
            visit.patient_id.clone(),
            Some(visit.id.clone()),
            service.description.clone(),
            1,
            service.unit_price_cents,
            BillingSource::Service(service.service_category.clone()),
        )),
        None => tracing::warn!(visit_id = %visit.id, "Quick service visit without a service request, nothing billed"),
    }
}

fn stored_visit(receipt: CommitReceipt) -> Result<Visit> {
    receipt
        .visit
        .ok_or_else(|| StoreError::InvalidData("commit returned no visit".to_string()).into())
}

/// Reports backend failures of a collaborator read as that service being unavailable
fn collaborator(service: &'static str) -> impl Fn(WardflowError) -> WardflowError {
    move |err| match err {
        WardflowError::Store(
            StoreError::ConnectionFailed(message)
            | StoreError::QueryFailed(message)
            | StoreError::TransactionFailed(message),
        ) => WardflowError::dependency(service, message),
        other => other,
    }
}
