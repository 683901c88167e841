//! Department queue projection and the queue watcher

mod common;

use chrono::{Duration, Utc};
use common::clinic;
use std::time::Duration as StdDuration;
use test_case::test_case;
use tokio::sync::watch;
use wardflow::core::{Outcome, QueueWatcher};
use wardflow::domain::{PatientId, Stage, StageStatus, Visit, VisitType};

fn legacy_visit(patient: &str, stage: Stage, status: StageStatus, minutes_ago: i64) -> Visit {
    let mut visit = Visit::builder(PatientId::new(patient).unwrap(), VisitType::Consultation)
        .created_at(Utc::now() - Duration::minutes(minutes_ago))
        .status(Stage::Reception, StageStatus::Completed)
        .at_stage(stage, status)
        .build();
    // Rows written before stage entry was tracked
    visit.stage_entered_at = None;
    visit
}

#[tokio::test]
async fn test_unset_status_counts_as_waiting() {
    let clinic = clinic();
    let unset = legacy_visit("pat-1", Stage::Nurse, StageStatus::Unset, 30);
    let pending = legacy_visit("pat-2", Stage::Nurse, StageStatus::Pending, 20);
    let in_progress = legacy_visit("pat-3", Stage::Nurse, StageStatus::InProgress, 10);
    for visit in [&unset, &pending, &in_progress] {
        clinic.backend.insert_visit_unchecked(visit.clone()).await;
    }

    let queue = clinic
        .coordinator
        .queues()
        .queue_for(Stage::Nurse)
        .await
        .unwrap();
    let ids: Vec<_> = queue.iter().map(|visit| visit.id.clone()).collect();
    assert_eq!(ids, vec![unset.id, pending.id]);
}

#[tokio::test]
async fn test_queue_is_first_in_first_served() {
    let clinic = clinic();
    let first = clinic.checked_in(VisitType::Consultation).await;
    let second = clinic.checked_in(VisitType::LabOnly).await;
    let third = clinic.checked_in(VisitType::QuickService).await;

    let queues = clinic.coordinator.queues();
    let nurse: Vec<_> = queues
        .queue_for(Stage::Nurse)
        .await
        .unwrap()
        .into_iter()
        .map(|visit| visit.id)
        .collect();
    assert_eq!(nurse, vec![first.id.clone(), second.id.clone(), third.id.clone()]);

    // Moving on re-anchors the visit in the next queue
    clinic.step(&first, Stage::Nurse, Outcome::Proceed).await;
    let snapshot = queues.snapshot().await.unwrap();
    assert_eq!(snapshot.queue(Stage::Nurse).len(), 2);
    assert_eq!(snapshot.queue(Stage::Doctor)[0].id, first.id);
}

#[test_case(Stage::Reception ; "reception")]
#[test_case(Stage::Nurse ; "nurse")]
#[test_case(Stage::Doctor ; "doctor")]
#[test_case(Stage::Lab ; "lab")]
#[test_case(Stage::Pharmacy ; "pharmacy")]
#[test_case(Stage::Billing ; "billing")]
#[tokio::test]
async fn test_visit_sits_in_exactly_one_queue(stage: Stage) {
    let clinic = clinic();
    clinic
        .backend
        .insert_visit_unchecked(legacy_visit("pat-1", stage, StageStatus::Pending, 5))
        .await;

    let snapshot = clinic.coordinator.queues().snapshot().await.unwrap();
    assert_eq!(snapshot.total_waiting(), 1);
    assert_eq!(snapshot.queue(stage).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_stops_on_shutdown() {
    let clinic = clinic();
    clinic.checked_in(VisitType::Consultation).await;

    let watcher = QueueWatcher::new(clinic.coordinator.queues(), StdDuration::from_millis(20));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (mut snapshots, handle) = watcher.spawn(shutdown_rx);

    snapshots.changed().await.unwrap();
    let snapshot = snapshots.borrow_and_update().clone().unwrap();
    assert_eq!(snapshot.queue(Stage::Nurse).len(), 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("watcher did not stop")
        .unwrap();
}
