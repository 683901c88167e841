//! Stage transition engine
//!
//! Pure decision logic. [`plan`] maps a visit, the stage being completed and the
//! department's outcome to a [`Transition`]; [`Transition::apply`] produces the
//! successor visit. Side effects are returned, never performed: the coordinator
//! turns them into writes of one atomic batch.

mod rules;

pub use rules::{plan, plan_cancellation};

use crate::domain::ids::VisitId;
use crate::domain::visit::{OverallStatus, Stage, StageStatus, Visit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the acting department decided when it finished with a visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Reception checked the patient in
    CheckIn,
    /// Default route for the stage
    Proceed,
    SendToDoctor,
    SendToLab,
    SendToBilling,
    /// Quick service finished without further steps
    Discharge,
    /// Nurse submitted the structured service form
    FormSubmitted,
    /// Lab results are in
    ResultsReady,
    /// Doctor finished the consultation
    Consulted { prescription_issued: bool },
    /// Pharmacy handed over a prescription
    Dispensed,
    /// Patient account settled
    Settled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::CheckIn => "check_in",
            Outcome::Proceed => "proceed",
            Outcome::SendToDoctor => "send_to_doctor",
            Outcome::SendToLab => "send_to_lab",
            Outcome::SendToBilling => "send_to_billing",
            Outcome::Discharge => "discharge",
            Outcome::FormSubmitted => "form_submitted",
            Outcome::ResultsReady => "results_ready",
            Outcome::Consulted {
                prescription_issued: true,
            } => "prescribed",
            Outcome::Consulted {
                prescription_issued: false,
            } => "consulted",
            Outcome::Dispensed => "dispensed",
            Outcome::Settled => "settled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "check_in" | "checkin" => Ok(Outcome::CheckIn),
            "proceed" => Ok(Outcome::Proceed),
            "send_to_doctor" | "doctor" => Ok(Outcome::SendToDoctor),
            "send_to_lab" | "lab" => Ok(Outcome::SendToLab),
            "send_to_billing" | "billing" => Ok(Outcome::SendToBilling),
            "discharge" => Ok(Outcome::Discharge),
            "form_submitted" => Ok(Outcome::FormSubmitted),
            "results_ready" => Ok(Outcome::ResultsReady),
            "consulted" => Ok(Outcome::Consulted {
                prescription_issued: false,
            }),
            "prescribed" => Ok(Outcome::Consulted {
                prescription_issued: true,
            }),
            "dispensed" => Ok(Outcome::Dispensed),
            "settled" => Ok(Outcome::Settled),
            other => Err(format!("Unknown outcome '{other}'")),
        }
    }
}

/// Facts from collaborating services the rules need
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionContext {
    /// Outstanding prescriptions in the configured scope, excluding the one
    /// being dispensed
    pub pending_prescriptions: usize,
}

/// Work a transition asks the coordinator to carry out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", content = "stage", rename_all = "snake_case")]
pub enum SideEffect {
    MarkNotRequired(Stage),
    BillDispensedItems,
    BillLabTests,
    BillQuickService,
    CreateInvoice,
    RemoveFromQueue(Stage),
    EnqueueAt(Stage),
    AwaitServiceForm,
    Discharge,
}

/// Planned state change of one visit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub visit_id: VisitId,
    /// Stage the department acted on
    pub from: Stage,
    /// Outcome that produced this plan; `None` for cancellations
    pub outcome: Option<Outcome>,
    /// Whether `from` ends `Completed`
    pub completes_source: bool,
    pub next_stage: Stage,
    pub next_status: StageStatus,
    pub overall_status: OverallStatus,
    pub side_effects: Vec<SideEffect>,
    /// Version of the visit the plan was made against
    pub expected_version: i64,
}

impl Transition {
    /// Whether the visit leaves its current stage
    pub fn changes_stage(&self) -> bool {
        self.next_stage != self.from
    }

    /// Stages this transition marks `NotRequired`
    pub fn not_required(&self) -> impl Iterator<Item = Stage> + '_ {
        self.side_effects.iter().filter_map(|effect| match effect {
            SideEffect::MarkNotRequired(stage) => Some(*stage),
            _ => None,
        })
    }

    pub fn has_effect(&self, effect: &SideEffect) -> bool {
        self.side_effects.contains(effect)
    }

    /// Produces the successor visit. The version is left for the store to bump.
    pub fn apply(&self, visit: &Visit, now: DateTime<Utc>) -> Visit {
        let mut next = visit.clone();

        if self.completes_source {
            next.statuses.set(self.from, StageStatus::Completed);
            next.completed_at.set(self.from, now);
        }

        for stage in self.not_required() {
            if next.statuses.get(stage) != StageStatus::Completed {
                next.statuses.set(stage, StageStatus::NotRequired);
            }
        }

        next.statuses.set(self.next_stage, self.next_status);
        if self.changes_stage() {
            next.stage_entered_at = Some(now);
        }
        next.current_stage = self.next_stage;
        next.overall_status = self.overall_status;

        match self.overall_status {
            OverallStatus::Completed => next.discharged_at = Some(now),
            OverallStatus::Cancelled => next.cancelled_at = Some(now),
            OverallStatus::Active => {}
        }

        next.updated_at = now;
        next
    }
}
