//! Queue command implementation
//!
//! Prints one department queue, or the whole board. With `--watch` the board
//! is reprinted on every refresh of the queue watcher until Ctrl+C.

use super::{connect, report_failure, EXIT_OK};
use crate::core::queue::{QueueSnapshot, QueueWatcher};
use crate::domain::{Stage, Visit};
use chrono::{DateTime, Utc};
use clap::Args;
use std::fmt::Write as _;
use tokio::sync::watch;

/// Arguments for the queue command
#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Department to show (reception, nurse, doctor, lab, pharmacy, billing); all when omitted
    pub stage: Option<Stage>,

    /// Keep refreshing on the configured poll interval
    #[arg(short, long)]
    pub watch: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl QueueArgs {
    /// Execute the queue command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        let (config, coordinator) = match connect(config_path).await {
            Ok(connected) => connected,
            Err(code) => return Ok(code),
        };
        let projection = coordinator.queues();

        if !self.watch {
            let snapshot = match projection.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(e) => return Ok(report_failure("Reading queues", &e)),
            };
            self.print(&snapshot)?;
            return Ok(EXIT_OK);
        }

        tracing::info!(
            interval_seconds = config.queue.poll_interval_seconds,
            "Watching queues"
        );
        let mut shutdown = shutdown_signal.clone();
        let (mut snapshots, handle) =
            QueueWatcher::from_config(projection, &config.queue).spawn(shutdown_signal);

        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let latest = snapshots.borrow_and_update().clone();
                    if let Some(snapshot) = latest {
                        self.print(&snapshot)?;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        handle.await?;
        Ok(EXIT_OK)
    }

    fn print(&self, snapshot: &QueueSnapshot) -> anyhow::Result<()> {
        if self.json {
            let output = match self.stage {
                Some(stage) => serde_json::to_string_pretty(snapshot.queue(stage))?,
                None => serde_json::to_string_pretty(snapshot)?,
            };
            println!("{output}");
        } else {
            print!("{}", render_board(snapshot, self.stage));
        }
        Ok(())
    }
}

/// Text rendering of the board, or of one department
pub fn render_board(snapshot: &QueueSnapshot, only: Option<Stage>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "📋 Queues at {}",
        snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let stages: Vec<Stage> = match only {
        Some(stage) => vec![stage],
        None => Stage::DEPARTMENTS.to_vec(),
    };
    for stage in stages {
        out.push_str(&render_queue(stage, snapshot.queue(stage), snapshot.taken_at));
    }

    if only.map_or(true, |stage| stage == Stage::Nurse) && !snapshot.lab_results_ready.is_empty()
    {
        let _ = writeln!(out, "\nLab results ready for review:");
        for visit in &snapshot.lab_results_ready {
            let _ = writeln!(out, "  {} {}", visit.id, visit.patient_id);
        }
    }
    out
}

fn render_queue(stage: Stage, visits: &[Visit], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{} ({} waiting)", stage.as_str().to_uppercase(), visits.len());
    for (position, visit) in visits.iter().enumerate() {
        let waited = (now - visit.queue_anchor()).num_minutes().max(0);
        let _ = writeln!(
            out,
            "  {:>3}. {}  {:<12} {:<16} {:<15} {} min",
            position + 1,
            visit.id.as_str(),
            visit.patient_id.as_str(),
            visit.visit_type.as_str(),
            visit.current_status().as_str(),
            waited
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PatientId, StageStatus, VisitType};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn snapshot() -> QueueSnapshot {
        let taken_at = Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0).unwrap();
        let nurse_visit = Visit::builder(PatientId::new("pat-1").unwrap(), VisitType::Consultation)
            .created_at(taken_at - Duration::minutes(25))
            .status(Stage::Reception, StageStatus::Completed)
            .at_stage(Stage::Nurse, StageStatus::Unset)
            .build();
        let mut queues = BTreeMap::new();
        queues.insert(Stage::Nurse, vec![nurse_visit]);
        QueueSnapshot {
            taken_at,
            queues,
            lab_results_ready: Vec::new(),
        }
    }

    #[test]
    fn test_render_whole_board() {
        let board = render_board(&snapshot(), None);
        assert!(board.contains("RECEPTION (0 waiting)"));
        assert!(board.contains("NURSE (1 waiting)"));
        assert!(board.contains("BILLING (0 waiting)"));
        assert!(board.contains("pat-1"));
        assert!(board.contains("25 min"));
    }

    #[test]
    fn test_render_single_department() {
        let board = render_board(&snapshot(), Some(Stage::Pharmacy));
        assert!(board.contains("PHARMACY (0 waiting)"));
        assert!(!board.contains("NURSE"));
    }
}
