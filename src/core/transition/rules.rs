//! Branching rules per stage and visit type

use super::{Outcome, SideEffect, Transition, TransitionContext};
use crate::domain::errors::RoutingError;
use crate::domain::visit::{OverallStatus, Stage, StageStatus, Visit, VisitType};

/// Plans the transition for `completing` finishing with `outcome`
///
/// # Errors
///
/// - [`RoutingError::VisitClosed`] if the visit is no longer active
/// - [`RoutingError::StaleTransition`] if `completing` is not the recorded stage
/// - [`RoutingError::InvalidStageState`] if the stage is already finished, or
///   pharmacy is released while prescriptions are still outstanding
/// - [`RoutingError::InvalidOutcome`] if the outcome does not apply here
pub fn plan(
    visit: &Visit,
    completing: Stage,
    outcome: Outcome,
    ctx: &TransitionContext,
) -> Result<Transition, RoutingError> {
    ensure_actionable(visit, completing)?;

    let status = visit.stage_status(completing);
    let draft = match completing {
        Stage::Reception => reception(visit, outcome),
        Stage::Nurse if status == StageStatus::PendingReview => nurse_review(outcome),
        Stage::Nurse => nurse(visit, outcome),
        Stage::Lab => lab(visit, outcome),
        Stage::Doctor => doctor(outcome),
        Stage::Pharmacy => pharmacy(visit, outcome, ctx)?,
        Stage::Billing => billing(outcome),
        Stage::Completed => None,
    };

    let draft = draft.ok_or_else(|| RoutingError::InvalidOutcome {
        stage: completing,
        visit_type: visit.visit_type,
        outcome: outcome.to_string(),
    })?;

    Ok(draft.into_transition(visit, completing, Some(outcome)))
}

/// Plans a cancellation from whatever stage the visit occupies
///
/// # Errors
///
/// Returns [`RoutingError::VisitClosed`] if the visit already completed or was
/// cancelled.
pub fn plan_cancellation(visit: &Visit) -> Result<Transition, RoutingError> {
    if !visit.is_active() {
        return Err(closed(visit));
    }

    Ok(Transition {
        visit_id: visit.id.clone(),
        from: visit.current_stage,
        outcome: None,
        completes_source: false,
        next_stage: visit.current_stage,
        next_status: StageStatus::Cancelled,
        overall_status: OverallStatus::Cancelled,
        side_effects: vec![SideEffect::RemoveFromQueue(visit.current_stage)],
        expected_version: visit.version,
    })
}

fn ensure_actionable(visit: &Visit, completing: Stage) -> Result<(), RoutingError> {
    if !visit.is_active() {
        return Err(closed(visit));
    }

    if completing != visit.current_stage {
        return Err(RoutingError::StaleTransition {
            visit_id: visit.id.to_string(),
            expected: completing,
            actual: visit.current_stage,
        });
    }

    let status = visit.stage_status(completing);
    if !status.is_in_flight() {
        return Err(RoutingError::InvalidStageState {
            visit_id: visit.id.to_string(),
            stage: completing,
            status,
        });
    }

    Ok(())
}

fn closed(visit: &Visit) -> RoutingError {
    RoutingError::VisitClosed {
        visit_id: visit.id.to_string(),
        status: visit.overall_status,
    }
}

/// Rule output before the visit-specific bookkeeping is attached
struct Draft {
    completes_source: bool,
    next_stage: Stage,
    next_status: StageStatus,
    overall_status: OverallStatus,
    effects: Vec<SideEffect>,
}

impl Draft {
    fn advance(next_stage: Stage, next_status: StageStatus) -> Self {
        Self {
            completes_source: true,
            next_stage,
            next_status,
            overall_status: OverallStatus::Active,
            effects: Vec::new(),
        }
    }

    fn stay(stage: Stage, status: StageStatus) -> Self {
        Self {
            completes_source: false,
            ..Self::advance(stage, status)
        }
    }

    fn complete() -> Self {
        Self {
            overall_status: OverallStatus::Completed,
            effects: vec![SideEffect::Discharge],
            ..Self::advance(Stage::Completed, StageStatus::Completed)
        }
    }

    fn skip(mut self, stages: &[Stage]) -> Self {
        self.effects
            .extend(stages.iter().map(|stage| SideEffect::MarkNotRequired(*stage)));
        self
    }

    fn with(mut self, effect: SideEffect) -> Self {
        self.effects.push(effect);
        self
    }

    fn into_transition(self, visit: &Visit, from: Stage, outcome: Option<Outcome>) -> Transition {
        let mut side_effects = self.effects;
        if self.next_stage != from {
            side_effects.push(SideEffect::RemoveFromQueue(from));
            if !self.next_stage.is_terminal() {
                side_effects.push(SideEffect::EnqueueAt(self.next_stage));
            }
        }

        Transition {
            visit_id: visit.id.clone(),
            from,
            outcome,
            completes_source: self.completes_source,
            next_stage: self.next_stage,
            next_status: self.next_status,
            overall_status: self.overall_status,
            side_effects,
            expected_version: visit.version,
        }
    }
}

fn reception(visit: &Visit, outcome: Outcome) -> Option<Draft> {
    match (visit.visit_type, outcome) {
        (VisitType::DirectPharmacy, Outcome::CheckIn | Outcome::Proceed) => Some(
            Draft::advance(Stage::Pharmacy, StageStatus::Pending).skip(&[
                Stage::Nurse,
                Stage::Doctor,
                Stage::Lab,
            ]),
        ),
        (_, Outcome::CheckIn | Outcome::Proceed) => {
            Some(Draft::advance(Stage::Nurse, StageStatus::Pending))
        }
        _ => None,
    }
}

fn nurse(visit: &Visit, outcome: Outcome) -> Option<Draft> {
    match (visit.visit_type, outcome) {
        (VisitType::Consultation, Outcome::Proceed | Outcome::SendToDoctor) => {
            Some(Draft::advance(Stage::Doctor, StageStatus::Pending).skip(&[Stage::Lab]))
        }
        (VisitType::Consultation, Outcome::SendToLab) => {
            Some(Draft::advance(Stage::Lab, StageStatus::Pending))
        }
        (VisitType::LabOnly, Outcome::Proceed | Outcome::SendToLab) => {
            Some(Draft::advance(Stage::Lab, StageStatus::Pending).skip(&[Stage::Doctor]))
        }
        (VisitType::QuickService, Outcome::Proceed | Outcome::Discharge) => {
            let requires_form = visit
                .service
                .as_ref()
                .map(|service| service.requires_form)
                .unwrap_or(false);
            if requires_form {
                Some(
                    Draft::stay(Stage::Nurse, StageStatus::Pending)
                        .with(SideEffect::AwaitServiceForm),
                )
            } else {
                Some(quick_service_discharge())
            }
        }
        (VisitType::QuickService, Outcome::FormSubmitted) => Some(quick_service_discharge()),
        _ => None,
    }
}

fn quick_service_discharge() -> Draft {
    Draft::complete()
        .skip(&[Stage::Doctor, Stage::Lab, Stage::Pharmacy, Stage::Billing])
        .with(SideEffect::BillQuickService)
}

/// Nurse reviewing lab results of a visit that skipped the doctor
fn nurse_review(outcome: Outcome) -> Option<Draft> {
    match outcome {
        Outcome::SendToBilling | Outcome::Proceed => Some(
            Draft::advance(Stage::Billing, StageStatus::Pending)
                .skip(&[Stage::Pharmacy])
                .with(SideEffect::BillLabTests),
        ),
        _ => None,
    }
}

fn lab(visit: &Visit, outcome: Outcome) -> Option<Draft> {
    match outcome {
        Outcome::ResultsReady | Outcome::Proceed => {
            if visit.stage_status(Stage::Doctor) == StageStatus::NotRequired {
                Some(Draft::advance(Stage::Nurse, StageStatus::PendingReview))
            } else {
                Some(Draft::advance(Stage::Doctor, StageStatus::Pending))
            }
        }
        _ => None,
    }
}

fn doctor(outcome: Outcome) -> Option<Draft> {
    match outcome {
        Outcome::Consulted {
            prescription_issued: true,
        } => Some(Draft::advance(Stage::Pharmacy, StageStatus::Pending)),
        Outcome::Consulted {
            prescription_issued: false,
        }
        | Outcome::SendToBilling => Some(
            Draft::advance(Stage::Billing, StageStatus::Pending).skip(&[Stage::Pharmacy]),
        ),
        _ => None,
    }
}

fn pharmacy(
    visit: &Visit,
    outcome: Outcome,
    ctx: &TransitionContext,
) -> Result<Option<Draft>, RoutingError> {
    let draft = match outcome {
        Outcome::Dispensed if ctx.pending_prescriptions == 0 => Some(
            Draft::advance(Stage::Billing, StageStatus::Pending)
                .with(SideEffect::BillDispensedItems),
        ),
        Outcome::Dispensed => Some(
            Draft::stay(Stage::Pharmacy, StageStatus::Pending)
                .with(SideEffect::BillDispensedItems),
        ),
        // Nothing left to hand over: prescriptions dispensed early, cancelled,
        // or never written up
        Outcome::Proceed | Outcome::SendToBilling if ctx.pending_prescriptions == 0 => {
            Some(Draft::advance(Stage::Billing, StageStatus::Pending))
        }
        Outcome::Proceed | Outcome::SendToBilling => {
            return Err(RoutingError::InvalidStageState {
                visit_id: visit.id.to_string(),
                stage: Stage::Pharmacy,
                status: visit.stage_status(Stage::Pharmacy),
            })
        }
        _ => None,
    };
    Ok(draft)
}

fn billing(outcome: Outcome) -> Option<Draft> {
    match outcome {
        Outcome::Settled | Outcome::Proceed => {
            Some(Draft::complete().with(SideEffect::CreateInvoice))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::PatientId;
    use crate::domain::visit::ServiceRequest;
    use chrono::Utc;
    use test_case::test_case;

    fn visit_at(visit_type: VisitType, stage: Stage, status: StageStatus) -> Visit {
        Visit::builder(PatientId::new("pat-1").unwrap(), visit_type)
            .status(Stage::Reception, StageStatus::Completed)
            .at_stage(stage, status)
            .build()
    }

    fn no_ctx() -> TransitionContext {
        TransitionContext::default()
    }

    #[test_case(VisitType::Consultation, Stage::Nurse ; "consultation to nurse")]
    #[test_case(VisitType::LabOnly, Stage::Nurse ; "lab only to nurse")]
    #[test_case(VisitType::QuickService, Stage::Nurse ; "quick service to nurse")]
    #[test_case(VisitType::DirectPharmacy, Stage::Pharmacy ; "direct pharmacy to pharmacy")]
    fn test_reception_check_in(visit_type: VisitType, expected: Stage) {
        let visit = Visit::builder(PatientId::new("pat-1").unwrap(), visit_type).build();
        let transition = plan(&visit, Stage::Reception, Outcome::CheckIn, &no_ctx()).unwrap();

        assert_eq!(transition.next_stage, expected);
        assert_eq!(transition.next_status, StageStatus::Pending);
        assert!(transition.completes_source);
    }

    #[test]
    fn test_direct_pharmacy_skips_clinical_stages() {
        let visit = Visit::builder(PatientId::new("pat-1").unwrap(), VisitType::DirectPharmacy)
            .build();
        let transition = plan(&visit, Stage::Reception, Outcome::CheckIn, &no_ctx()).unwrap();
        let skipped: Vec<Stage> = transition.not_required().collect();
        assert_eq!(skipped, vec![Stage::Nurse, Stage::Doctor, Stage::Lab]);
    }

    #[test_case(VisitType::Consultation, Outcome::Proceed, Stage::Doctor ; "consultation default")]
    #[test_case(VisitType::Consultation, Outcome::SendToDoctor, Stage::Doctor ; "consultation to doctor")]
    #[test_case(VisitType::Consultation, Outcome::SendToLab, Stage::Lab ; "consultation lab detour")]
    #[test_case(VisitType::LabOnly, Outcome::Proceed, Stage::Lab ; "lab only")]
    fn test_nurse_routing(visit_type: VisitType, outcome: Outcome, expected: Stage) {
        let visit = visit_at(visit_type, Stage::Nurse, StageStatus::Pending);
        let transition = plan(&visit, Stage::Nurse, outcome, &no_ctx()).unwrap();
        assert_eq!(transition.next_stage, expected);
        assert_eq!(transition.next_status, StageStatus::Pending);
    }

    #[test]
    fn test_lab_only_marks_doctor_not_required_at_nurse() {
        let visit = visit_at(VisitType::LabOnly, Stage::Nurse, StageStatus::Pending);
        let transition = plan(&visit, Stage::Nurse, Outcome::Proceed, &no_ctx()).unwrap();
        let next = transition.apply(&visit, Utc::now());
        assert_eq!(next.stage_status(Stage::Doctor), StageStatus::NotRequired);
        assert_eq!(next.stage_status(Stage::Lab), StageStatus::Pending);
    }

    #[test]
    fn test_consultation_lab_detour_keeps_doctor_pending() {
        let visit = visit_at(VisitType::Consultation, Stage::Nurse, StageStatus::Pending);
        let transition = plan(&visit, Stage::Nurse, Outcome::SendToLab, &no_ctx()).unwrap();
        assert_eq!(transition.not_required().count(), 0);

        let at_lab = transition.apply(&visit, Utc::now());
        let back = plan(&at_lab, Stage::Lab, Outcome::ResultsReady, &no_ctx()).unwrap();
        assert_eq!(back.next_stage, Stage::Doctor);
        assert_eq!(back.next_status, StageStatus::Pending);
    }

    #[test]
    fn test_lab_without_doctor_returns_to_nurse_for_review() {
        let visit = Visit::builder(PatientId::new("pat-1").unwrap(), VisitType::LabOnly)
            .status(Stage::Reception, StageStatus::Completed)
            .status(Stage::Nurse, StageStatus::Completed)
            .status(Stage::Doctor, StageStatus::NotRequired)
            .at_stage(Stage::Lab, StageStatus::Pending)
            .build();

        let transition = plan(&visit, Stage::Lab, Outcome::ResultsReady, &no_ctx()).unwrap();
        assert_eq!(transition.next_stage, Stage::Nurse);
        assert_eq!(transition.next_status, StageStatus::PendingReview);

        let next = transition.apply(&visit, Utc::now());
        assert_eq!(next.stage_status(Stage::Lab), StageStatus::Completed);
        assert_eq!(next.stage_status(Stage::Nurse), StageStatus::PendingReview);
    }

    #[test]
    fn test_nurse_review_sends_to_billing() {
        let visit = visit_at(VisitType::LabOnly, Stage::Nurse, StageStatus::PendingReview);
        let transition = plan(&visit, Stage::Nurse, Outcome::SendToBilling, &no_ctx()).unwrap();

        assert_eq!(transition.next_stage, Stage::Billing);
        assert!(transition.has_effect(&SideEffect::BillLabTests));
        assert!(transition.has_effect(&SideEffect::MarkNotRequired(Stage::Pharmacy)));
    }

    #[test]
    fn test_nurse_review_rejects_lab_outcome() {
        let visit = visit_at(VisitType::LabOnly, Stage::Nurse, StageStatus::PendingReview);
        let err = plan(&visit, Stage::Nurse, Outcome::SendToLab, &no_ctx()).unwrap_err();
        assert!(matches!(err, RoutingError::InvalidOutcome { .. }));
    }

    #[test]
    fn test_quick_service_without_form_completes() {
        let visit = visit_at(VisitType::QuickService, Stage::Nurse, StageStatus::Pending);
        let transition = plan(&visit, Stage::Nurse, Outcome::Proceed, &no_ctx()).unwrap();

        assert_eq!(transition.next_stage, Stage::Completed);
        assert_eq!(transition.overall_status, OverallStatus::Completed);
        assert!(transition.has_effect(&SideEffect::BillQuickService));
        assert!(transition.has_effect(&SideEffect::Discharge));
        assert!(!transition.has_effect(&SideEffect::EnqueueAt(Stage::Completed)));

        let next = transition.apply(&visit, Utc::now());
        assert!(next.discharged_at.is_some());
        for stage in [Stage::Doctor, Stage::Lab, Stage::Pharmacy, Stage::Billing] {
            assert_eq!(next.stage_status(stage), StageStatus::NotRequired);
        }
    }

    #[test]
    fn test_quick_service_with_form_waits_at_nurse() {
        let visit = Visit::builder(PatientId::new("pat-1").unwrap(), VisitType::QuickService)
            .service(Some(ServiceRequest {
                service_category: "dressing".to_string(),
                description: "Wound dressing".to_string(),
                requires_form: true,
                unit_price_cents: 1500,
            }))
            .status(Stage::Reception, StageStatus::Completed)
            .at_stage(Stage::Nurse, StageStatus::Pending)
            .build();

        let waiting = plan(&visit, Stage::Nurse, Outcome::Proceed, &no_ctx()).unwrap();
        assert_eq!(waiting.next_stage, Stage::Nurse);
        assert_eq!(waiting.next_status, StageStatus::Pending);
        assert!(!waiting.completes_source);
        assert_eq!(
            waiting.side_effects,
            vec![SideEffect::AwaitServiceForm]
        );

        let submitted = plan(&visit, Stage::Nurse, Outcome::FormSubmitted, &no_ctx()).unwrap();
        assert_eq!(submitted.next_stage, Stage::Completed);
    }

    #[test_case(true, Stage::Pharmacy ; "with prescription")]
    #[test_case(false, Stage::Billing ; "without prescription")]
    fn test_doctor_routing(prescription_issued: bool, expected: Stage) {
        let visit = visit_at(VisitType::Consultation, Stage::Doctor, StageStatus::Pending);
        let outcome = Outcome::Consulted {
            prescription_issued,
        };
        let transition = plan(&visit, Stage::Doctor, outcome, &no_ctx()).unwrap();
        assert_eq!(transition.next_stage, expected);
        assert_eq!(
            transition.has_effect(&SideEffect::MarkNotRequired(Stage::Pharmacy)),
            !prescription_issued
        );
    }

    #[test_case(0, Stage::Billing, true ; "last prescription")]
    #[test_case(2, Stage::Pharmacy, false ; "more pending")]
    fn test_pharmacy_dispense(pending: usize, expected: Stage, completes: bool) {
        let visit = visit_at(VisitType::Consultation, Stage::Pharmacy, StageStatus::Pending);
        let ctx = TransitionContext {
            pending_prescriptions: pending,
        };
        let transition = plan(&visit, Stage::Pharmacy, Outcome::Dispensed, &ctx).unwrap();
        assert_eq!(transition.next_stage, expected);
        assert_eq!(transition.completes_source, completes);
        assert!(transition.has_effect(&SideEffect::BillDispensedItems));
    }

    #[test_case(Outcome::Proceed ; "proceed")]
    #[test_case(Outcome::SendToBilling ; "send to billing")]
    fn test_pharmacy_released_without_prescriptions(outcome: Outcome) {
        let visit = visit_at(VisitType::Consultation, Stage::Pharmacy, StageStatus::Pending);
        let transition = plan(&visit, Stage::Pharmacy, outcome, &no_ctx()).unwrap();
        assert_eq!(transition.next_stage, Stage::Billing);
        assert!(transition.completes_source);
        assert!(!transition.has_effect(&SideEffect::BillDispensedItems));
    }

    #[test]
    fn test_pharmacy_held_while_prescriptions_outstanding() {
        let visit = visit_at(VisitType::DirectPharmacy, Stage::Pharmacy, StageStatus::Pending);
        let ctx = TransitionContext {
            pending_prescriptions: 1,
        };
        let err = plan(&visit, Stage::Pharmacy, Outcome::Proceed, &ctx).unwrap_err();
        assert_eq!(
            err,
            RoutingError::InvalidStageState {
                visit_id: visit.id.to_string(),
                stage: Stage::Pharmacy,
                status: StageStatus::Pending,
            }
        );
    }

    #[test]
    fn test_billing_settles_visit() {
        let visit = visit_at(VisitType::Consultation, Stage::Billing, StageStatus::Pending);
        let transition = plan(&visit, Stage::Billing, Outcome::Settled, &no_ctx()).unwrap();
        assert_eq!(transition.overall_status, OverallStatus::Completed);
        assert!(transition.has_effect(&SideEffect::CreateInvoice));
        assert!(transition.has_effect(&SideEffect::RemoveFromQueue(Stage::Billing)));
    }

    #[test]
    fn test_stale_stage_is_rejected() {
        let visit = visit_at(VisitType::Consultation, Stage::Doctor, StageStatus::Pending);
        let err = plan(&visit, Stage::Nurse, Outcome::Proceed, &no_ctx()).unwrap_err();
        assert_eq!(
            err,
            RoutingError::StaleTransition {
                visit_id: visit.id.to_string(),
                expected: Stage::Nurse,
                actual: Stage::Doctor,
            }
        );
        assert!(err.is_conflict());
    }

    #[test_case(StageStatus::Completed ; "completed")]
    #[test_case(StageStatus::NotRequired ; "not required")]
    #[test_case(StageStatus::Cancelled ; "cancelled")]
    fn test_finished_stage_is_rejected(status: StageStatus) {
        let visit = visit_at(VisitType::Consultation, Stage::Nurse, status);
        let err = plan(&visit, Stage::Nurse, Outcome::Proceed, &no_ctx()).unwrap_err();
        assert!(matches!(err, RoutingError::InvalidStageState { .. }));
    }

    #[test]
    fn test_unset_status_is_actionable() {
        let visit = visit_at(VisitType::Consultation, Stage::Nurse, StageStatus::Unset);
        assert!(plan(&visit, Stage::Nurse, Outcome::Proceed, &no_ctx()).is_ok());
    }

    #[test]
    fn test_outcome_for_wrong_visit_type() {
        let visit = visit_at(VisitType::DirectPharmacy, Stage::Nurse, StageStatus::Pending);
        let err = plan(&visit, Stage::Nurse, Outcome::Proceed, &no_ctx()).unwrap_err();
        assert!(matches!(err, RoutingError::InvalidOutcome { .. }));
    }

    #[test]
    fn test_cancellation_is_terminal() {
        let visit = visit_at(VisitType::Consultation, Stage::Doctor, StageStatus::Pending);
        let cancel = plan_cancellation(&visit).unwrap();
        let cancelled = cancel.apply(&visit, Utc::now());

        assert_eq!(cancelled.overall_status, OverallStatus::Cancelled);
        assert_eq!(cancelled.current_stage, Stage::Doctor);
        assert_eq!(cancelled.stage_status(Stage::Doctor), StageStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        assert!(matches!(
            plan_cancellation(&cancelled),
            Err(RoutingError::VisitClosed { .. })
        ));
        assert!(matches!(
            plan(&cancelled, Stage::Doctor, Outcome::Proceed, &no_ctx()),
            Err(RoutingError::VisitClosed { .. })
        ));
    }
}
