//! Department queue projection
//!
//! Queues are never stored. Each one is derived on demand from the visit store:
//! active visits whose current stage is the department and whose status for
//! that stage is waiting (`Pending`, `PendingReview`, or unset).
//!
//! Ordering is by the time the visit entered the stage, then visit date, then
//! id so the order is total.

mod watcher;

pub use watcher::QueueWatcher;

use crate::adapters::database::{VisitQuery, VisitStore};
use crate::domain::visit::{Stage, StageStatus, Visit, VisitType};
use crate::domain::Result;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Whether `visit` belongs in the work queue of `stage`
pub fn in_queue(visit: &Visit, stage: Stage) -> bool {
    visit.is_active()
        && visit.current_stage == stage
        && visit.stage_status(stage).is_queue_eligible()
}

/// Filters and orders visits into the queue of `stage`
pub fn queue_for<I>(stage: Stage, visits: I) -> Vec<Visit>
where
    I: IntoIterator<Item = Visit>,
{
    let mut queue: Vec<Visit> = visits
        .into_iter()
        .filter(|visit| in_queue(visit, stage))
        .collect();
    sort_queue(&mut queue);
    queue
}

/// Lab-only visits back at the nurse desk with results in
pub fn lab_results_ready<I>(visits: I) -> Vec<Visit>
where
    I: IntoIterator<Item = Visit>,
{
    let mut ready: Vec<Visit> = visits
        .into_iter()
        .filter(|visit| {
            visit.is_active()
                && visit.visit_type == VisitType::LabOnly
                && visit.current_stage == Stage::Nurse
                && visit.stage_status(Stage::Lab) == StageStatus::Completed
        })
        .collect();
    sort_queue(&mut ready);
    ready
}

fn sort_queue(queue: &mut [Visit]) {
    queue.sort_by(|a, b| {
        a.queue_anchor()
            .cmp(&b.queue_anchor())
            .then_with(|| a.visit_date.cmp(&b.visit_date))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Every department queue at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub taken_at: DateTime<Utc>,
    pub queues: BTreeMap<Stage, Vec<Visit>>,
    pub lab_results_ready: Vec<Visit>,
}

impl QueueSnapshot {
    pub fn queue(&self, stage: Stage) -> &[Visit] {
        self.queues.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of visits waiting across all departments
    pub fn total_waiting(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }
}

/// Queue reads against a visit store
#[derive(Clone)]
pub struct QueueProjection {
    store: Arc<dyn VisitStore>,
}

impl QueueProjection {
    pub fn new(store: Arc<dyn VisitStore>) -> Self {
        Self { store }
    }

    /// Current queue of one department
    pub async fn queue_for(&self, stage: Stage) -> Result<Vec<Visit>> {
        let visits = self.store.find_visits(&VisitQuery::active_at(stage)).await?;
        Ok(queue_for(stage, visits))
    }

    pub async fn lab_results_ready(&self) -> Result<Vec<Visit>> {
        let visits = self
            .store
            .find_visits(&VisitQuery::active_at(Stage::Nurse))
            .await?;
        Ok(lab_results_ready(visits))
    }

    /// All department queues, read concurrently
    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        let reads = Stage::DEPARTMENTS.iter().map(|stage| async move {
            let queue = self.queue_for(*stage).await?;
            Ok::<_, crate::domain::WardflowError>((*stage, queue))
        });
        let (queues, lab_results_ready) =
            futures::try_join!(try_join_all(reads), self.lab_results_ready())?;

        Ok(QueueSnapshot {
            taken_at: Utc::now(),
            queues: queues.into_iter().collect(),
            lab_results_ready,
        })
    }
}
