//! Per-iteration trial records and run status tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ms_types::{CostRecord, OptimizationResults};

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// Lifecycle state for an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Aggregate status of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub id: RunId,
    pub state: RunState,
    pub iterations_completed: u64,
    /// Lowest usable cost seen so far.
    pub best_trial: Option<Trial>,
    pub results: Option<OptimizationResults>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunStatus {
    pub fn new(id: RunId) -> Self {
        Self {
            id,
            state: RunState::Pending,
            iterations_completed: 0,
            best_trial: None,
            results: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, results: OptimizationResults) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
        self.results = Some(results);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Count a finished iteration and keep it if it beats the current best.
    /// Bad or non-finite costs are counted but never become the best.
    pub fn record(&mut self, trial: Trial) {
        self.iterations_completed = self.iterations_completed.max(trial.iteration);
        if !trial.cost.is_usable() {
            return;
        }
        let improves = match &self.best_trial {
            None => true,
            Some(best) => trial.cost.cost < best.cost.cost,
        };
        if improves {
            self.best_trial = Some(trial);
        }
    }
}

/// One evaluated point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// 1-based iteration within the run.
    pub iteration: u64,
    pub params: Vec<f64>,
    pub cost: CostRecord,
    pub requested_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(iteration: u64, cost: f64, bad: bool) -> Trial {
        Trial {
            iteration,
            params: vec![iteration as f64],
            cost: CostRecord::new(cost, bad),
            requested_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn run_status_lifecycle() {
        let mut status = RunStatus::new(Uuid::new_v4());
        assert_eq!(status.state, RunState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert_eq!(status.state, RunState::Running);
        assert!(status.started_at.is_some());
        assert!(!status.state.is_finished());

        status.mark_completed(OptimizationResults {
            best_params: vec![0.0],
            best_cost: -1.0,
            best_uncer: None,
            best_index: 0,
        });
        assert_eq!(status.state, RunState::Completed);
        assert!(status.finished_at.is_some());
        assert!(status.state.is_finished());
    }

    #[test]
    fn best_trial_tracks_minimum_cost() {
        let mut status = RunStatus::new(Uuid::new_v4());

        status.record(trial(1, -0.5, false));
        status.record(trial(2, -0.9, false));
        // Worse result should not replace
        status.record(trial(3, -0.1, false));

        assert_eq!(status.iterations_completed, 3);
        assert_eq!(status.best_trial.as_ref().unwrap().iteration, 2);
    }

    #[test]
    fn bad_and_nan_costs_never_become_best() {
        let mut status = RunStatus::new(Uuid::new_v4());
        status.record(trial(1, -5.0, true));
        status.record(trial(2, f64::NAN, false));
        assert!(status.best_trial.is_none());
        assert_eq!(status.iterations_completed, 2);

        status.record(trial(3, 0.4, false));
        assert_eq!(status.best_trial.as_ref().unwrap().iteration, 3);
    }

    #[test]
    fn run_failure() {
        let mut status = RunStatus::new(Uuid::new_v4());
        status.mark_running();
        status.mark_failed("experiment host unreachable".into());
        assert_eq!(status.state, RunState::Failed);
        assert_eq!(status.error.as_deref(), Some("experiment host unreachable"));
    }
}
