//! Visit invariant checks
//!
//! Every planned successor is validated before it is written:
//!
//! - an active visit has exactly one stage in flight and never sits at `Completed`
//! - stages the visit already passed on its route are `Completed` or `NotRequired`
//! - `overall_status` only ever leaves `Active`, and never changes afterwards

use crate::domain::errors::RoutingError;
use crate::domain::visit::{OverallStatus, Stage, StageStatus, Visit, VisitType};

/// Route order used to decide which stages a visit has passed
///
/// Includes the detours: Lab before Doctor for a consultation. The LabOnly
/// nurse review between Lab and Billing is handled in [`passed_stages`].
fn route(visit_type: VisitType) -> &'static [Stage] {
    match visit_type {
        VisitType::Consultation => &[
            Stage::Reception,
            Stage::Nurse,
            Stage::Lab,
            Stage::Doctor,
            Stage::Pharmacy,
            Stage::Billing,
        ],
        other => other.path(),
    }
}

/// Stages strictly before the visit's position on its route
pub fn passed_stages(visit: &Visit) -> Result<Vec<Stage>, RoutingError> {
    let route = route(visit.visit_type);

    if visit.current_stage.is_terminal() {
        return Ok(route.to_vec());
    }

    if visit.visit_type == VisitType::LabOnly
        && visit.current_stage == Stage::Nurse
        && visit.current_status() == StageStatus::PendingReview
    {
        return Ok(vec![Stage::Reception, Stage::Lab]);
    }

    let position = route
        .iter()
        .position(|stage| *stage == visit.current_stage)
        .ok_or_else(|| RoutingError::InvariantViolation {
            visit_id: visit.id.to_string(),
            message: format!(
                "stage {} is not on the {} route",
                visit.current_stage, visit.visit_type
            ),
        })?;

    Ok(route[..position].to_vec())
}

/// Validates a single visit snapshot
///
/// # Errors
///
/// Returns [`RoutingError::InvariantViolation`] naming the first broken rule.
pub fn check_visit(visit: &Visit) -> Result<(), RoutingError> {
    let violation = |message: String| RoutingError::InvariantViolation {
        visit_id: visit.id.to_string(),
        message,
    };

    match (visit.overall_status, visit.current_stage.is_terminal()) {
        (OverallStatus::Active, true) => {
            return Err(violation("active visit sits at completed".to_string()));
        }
        (OverallStatus::Completed, false) => {
            return Err(violation(format!(
                "completed visit still at {}",
                visit.current_stage
            )));
        }
        _ => {}
    }

    if visit.is_active() && !visit.current_status().is_in_flight() {
        return Err(violation(format!(
            "current stage {} is {} on an active visit",
            visit.current_stage,
            visit.current_status()
        )));
    }

    for stage in passed_stages(visit)? {
        let status = visit.stage_status(stage);
        if !status.is_done() {
            return Err(violation(format!(
                "passed stage {stage} is {status}, expected completed or not_required"
            )));
        }
    }

    Ok(())
}

/// Validates a successor against the visit it replaces
///
/// # Errors
///
/// Returns [`RoutingError::InvariantViolation`] if the overall status moves
/// backwards or the successor itself is inconsistent.
pub fn check_successor(before: &Visit, after: &Visit) -> Result<(), RoutingError> {
    if !before.overall_status.can_become(after.overall_status) {
        return Err(RoutingError::InvariantViolation {
            visit_id: after.id.to_string(),
            message: format!(
                "overall status cannot go from {} to {}",
                before.overall_status, after.overall_status
            ),
        });
    }

    check_visit(after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transition::{plan, plan_cancellation, Outcome, TransitionContext};
    use crate::domain::ids::PatientId;
    use chrono::Utc;

    fn patient() -> PatientId {
        PatientId::new("pat-1").unwrap()
    }

    #[test]
    fn test_fresh_visit_is_consistent() {
        let visit = Visit::builder(patient(), VisitType::Consultation).build();
        assert!(check_visit(&visit).is_ok());
    }

    #[test]
    fn test_active_visit_without_stage_in_flight() {
        let visit = Visit::builder(patient(), VisitType::Consultation)
            .status(Stage::Reception, StageStatus::Completed)
            .at_stage(Stage::Nurse, StageStatus::Completed)
            .build();
        assert!(matches!(
            check_visit(&visit),
            Err(RoutingError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_passed_stage_left_pending() {
        let visit = Visit::builder(patient(), VisitType::Consultation)
            .at_stage(Stage::Doctor, StageStatus::Pending)
            .build();
        let err = check_visit(&visit).unwrap_err();
        assert!(err.to_string().contains("passed stage reception"));
    }

    #[test]
    fn test_stage_off_route() {
        let visit = Visit::builder(patient(), VisitType::DirectPharmacy)
            .status(Stage::Reception, StageStatus::Completed)
            .at_stage(Stage::Doctor, StageStatus::Pending)
            .build();
        let err = check_visit(&visit).unwrap_err();
        assert!(err.to_string().contains("not on the direct_pharmacy route"));
    }

    #[test]
    fn test_lab_review_requires_lab_done() {
        let visit = Visit::builder(patient(), VisitType::LabOnly)
            .status(Stage::Reception, StageStatus::Completed)
            .status(Stage::Lab, StageStatus::Pending)
            .at_stage(Stage::Nurse, StageStatus::PendingReview)
            .build();
        assert!(check_visit(&visit).is_err());
    }

    #[test]
    fn test_full_consultation_flow_holds_invariants() {
        let ctx = TransitionContext::default();
        let steps = [
            (Stage::Reception, Outcome::CheckIn),
            (Stage::Nurse, Outcome::SendToLab),
            (Stage::Lab, Outcome::ResultsReady),
            (
                Stage::Doctor,
                Outcome::Consulted {
                    prescription_issued: true,
                },
            ),
            (Stage::Pharmacy, Outcome::Dispensed),
            (Stage::Billing, Outcome::Settled),
        ];

        let mut visit = Visit::builder(patient(), VisitType::Consultation).build();
        for (stage, outcome) in steps {
            let transition = plan(&visit, stage, outcome, &ctx).unwrap();
            let next = transition.apply(&visit, Utc::now());
            check_successor(&visit, &next).unwrap();
            visit = next;
        }

        assert_eq!(visit.overall_status, OverallStatus::Completed);
        assert_eq!(visit.current_stage, Stage::Completed);
    }

    #[test]
    fn test_cancelled_visit_cannot_reopen() {
        let visit = Visit::builder(patient(), VisitType::Consultation).build();
        let cancelled = plan_cancellation(&visit).unwrap().apply(&visit, Utc::now());
        check_successor(&visit, &cancelled).unwrap();

        let mut reopened = cancelled.clone();
        reopened.overall_status = OverallStatus::Active;
        reopened.statuses.set(Stage::Reception, StageStatus::Pending);
        assert!(check_successor(&cancelled, &reopened).is_err());
    }
}
