//! The "evaluate parameters" adapter handed to the optimizer controller.

use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use ms_types::{
    config_error, validation_error, BridgeError, CostRecord, IterationRequest, LoopConfig,
    Measurement, MsResult,
};

use crate::channel::ResultChannel;
use crate::controller::CostInterface;
use crate::retry::RetryingRequest;
use crate::transport::ExperimentRequest;
use crate::trial::{RunId, RunStatus, Trial};

/// Where the bridge is within the current iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgePhase {
    #[default]
    Init,
    /// Waiting for the experiment host to acknowledge the shot request.
    Requesting,
    /// Blocked on the result channel.
    AwaitingResult,
    Done,
}

/// The point currently being evaluated, as seen from outside the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSnapshot {
    pub phase: BridgePhase,
    pub iteration: u64,
    pub params: Vec<f64>,
    /// First proposed parameter, set in mock mode so a simulated analysis can
    /// compute a cost for it.
    pub mock_x: Option<f64>,
}

/// The current [`EvaluationSnapshot`] of a run. Every update wakes the
/// threads waiting in [`wait_for`](Self::wait_for).
#[derive(Debug, Default)]
pub struct EvaluationBoard {
    snapshot: Mutex<EvaluationSnapshot>,
    changed: Condvar,
}

impl EvaluationBoard {
    pub fn snapshot(&self) -> EvaluationSnapshot {
        self.snapshot.lock().clone()
    }

    pub fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut EvaluationSnapshot),
    {
        let mut snapshot = self.snapshot.lock();
        apply(&mut snapshot);
        self.changed.notify_all();
    }

    /// Block until `done` holds for the snapshot or `timeout` elapses.
    /// Returns whether `done` held.
    pub fn wait_for<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut(&EvaluationSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut snapshot = self.snapshot.lock();
        while !done(&snapshot) {
            if self.changed.wait_until(&mut snapshot, deadline).timed_out() {
                return done(&snapshot);
            }
        }
        true
    }
}

/// Evaluation state shared between the run thread and trigger callers.
pub type SharedEvaluation = Arc<EvaluationBoard>;

/// Turns each cost request of the controller into one experiment shot.
///
/// Per call: bump the iteration counter, publish the proposed point, ask the
/// experiment host for a shot (live) or expose `mock_x` (mock), then block on
/// the [`ResultChannel`] until a trigger delivers the measurement.
pub struct OptimizerBridge {
    run_id: RunId,
    config: Arc<LoopConfig>,
    config_json: serde_json::Value,
    channel: ResultChannel,
    requester: Option<RetryingRequest>,
    evaluation: SharedEvaluation,
    status: Arc<Mutex<RunStatus>>,
    iteration: u64,
}

impl OptimizerBridge {
    /// `requester` is required in live mode and ignored in mock mode.
    pub fn new(
        run_id: RunId,
        config: Arc<LoopConfig>,
        channel: ResultChannel,
        requester: Option<RetryingRequest>,
        evaluation: SharedEvaluation,
        status: Arc<Mutex<RunStatus>>,
    ) -> MsResult<Self> {
        let requester = if config.mock { None } else { requester };
        if !config.mock && requester.is_none() {
            return Err(config_error!(
                "live mode needs an experiment transport (set mock=true to simulate)"
            ));
        }
        let config_json = serde_json::to_value(config.as_ref())?;

        Ok(Self {
            run_id,
            config,
            config_json,
            channel,
            requester,
            evaluation,
            status,
            iteration: 0,
        })
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn config(&self) -> &Arc<LoopConfig> {
        &self.config
    }

    /// Number of evaluations started so far; 0 before the first call.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    fn publish(&self, params: &[f64], phase: BridgePhase) {
        let mock = self.config.mock;
        self.evaluation.update(|eval| {
            eval.phase = phase;
            eval.iteration = self.iteration;
            eval.params = params.to_vec();
            if mock {
                eval.mock_x = params.first().copied();
            }
        });
    }

    fn set_phase(&self, phase: BridgePhase) {
        self.evaluation.update(|eval| eval.phase = phase);
    }
}

impl CostInterface for OptimizerBridge {
    fn evaluate_parameters(&mut self, params: &[f64]) -> MsResult<CostRecord> {
        if params.is_empty() {
            return Err(validation_error!("controller proposed an empty parameter vector"));
        }
        self.iteration += 1;
        let next = IterationRequest {
            iteration: self.iteration,
            params: params.to_vec(),
        };
        let iteration = next.iteration;
        let requested_at = Utc::now();

        match &self.requester {
            Some(requester) => {
                self.publish(&next.params, BridgePhase::Requesting);
                info!(run_id = %self.run_id, iteration, params = ?next.params, "requesting next shot from experiment host");

                let request = ExperimentRequest::for_iteration(self.run_id, &next, &self.config_json);
                let _ack = requester.call(&request)?;
                self.set_phase(BridgePhase::AwaitingResult);
            }
            None => {
                self.publish(&next.params, BridgePhase::AwaitingResult);
                debug!(run_id = %self.run_id, iteration, params = ?next.params, "mock point published");
            }
        }

        debug!(run_id = %self.run_id, iteration, "waiting for cost from analysis");
        let measurement = self
            .channel
            .pop()
            .ok_or(BridgeError::ChannelClosed { iteration })?;

        let cost = match measurement {
            Measurement::Value(value) => CostRecord::new(value, self.config.bad),
            Measurement::Absent => {
                warn!(run_id = %self.run_id, iteration, "absent measurement, reporting bad cost");
                CostRecord::new(f64::NAN, true)
            }
        };
        info!(run_id = %self.run_id, iteration, cost = cost.cost, bad = cost.bad, "cost received");

        self.status.lock().record(Trial {
            iteration,
            params: next.params,
            cost,
            requested_at,
            completed_at: Utc::now(),
        });

        Ok(cost)
    }
}

impl Drop for OptimizerBridge {
    fn drop(&mut self) {
        self.set_phase(BridgePhase::Done);
    }
}
