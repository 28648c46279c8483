//! Single-run supervision: route triggers into the active run or start one.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use ms_types::{AbsentPolicy, LoopConfig, Measurement, MsResult, OptimizationResults};

use crate::bridge::{BridgePhase, EvaluationSnapshot, OptimizerBridge, SharedEvaluation};
use crate::channel::ResultChannel;
use crate::controller::ControllerFactory;
use crate::retry::RetryingRequest;
use crate::transport::{ExperimentTransport, TcpJsonTransport};
use crate::trial::{RunId, RunStatus};

type ConfigSource = Box<dyn Fn() -> MsResult<LoopConfig> + Send + Sync>;

/// What a single trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerOutcome {
    /// No run was alive; a new one was spawned. The trigger's measurement,
    /// if any, was not consumed.
    Started { run_id: RunId },
    /// The measurement was pushed into the active run.
    Delivered { run_id: RunId },
    /// An absent measurement was discarded under [`AbsentPolicy::Drop`].
    Dropped { run_id: RunId },
}

struct RunHandle {
    id: RunId,
    config: Arc<LoopConfig>,
    channel: ResultChannel,
    evaluation: SharedEvaluation,
    status: Arc<Mutex<RunStatus>>,
    thread: Option<JoinHandle<()>>,
}

impl RunHandle {
    fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Join a finished thread so nothing is left detached.
    fn reap(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(run_id = %self.id, "optimisation thread terminated abnormally");
                let mut status = self.status.lock();
                if !status.state.is_finished() {
                    status.mark_failed("optimisation thread terminated abnormally".into());
                }
            }
        }
    }
}

/// What a trigger needs from the active run once the state lock is released.
struct LiveRun {
    id: RunId,
    config: Arc<LoopConfig>,
    channel: ResultChannel,
    evaluation: SharedEvaluation,
}

#[derive(Default)]
struct SupervisorState {
    /// Most recent run, alive or finished.
    current: Option<RunHandle>,
    runs_started: u64,
}

/// Keeps at most one optimization run alive and feeds it measurements.
///
/// Every external trigger goes through [`on_external_trigger`]: while a run
/// thread is alive the measurement is pushed into its [`ResultChannel`],
/// otherwise a new run is started from a fresh configuration snapshot. The
/// liveness check and the spawn happen under one lock; the analysis closure of
/// [`on_external_trigger_with`] runs after that lock is released, so it may
/// call back into the supervisor.
///
/// [`on_external_trigger`]: RunSupervisor::on_external_trigger
/// [`on_external_trigger_with`]: RunSupervisor::on_external_trigger_with
pub struct RunSupervisor {
    config_source: ConfigSource,
    factory: ControllerFactory,
    transport: Option<Arc<dyn ExperimentTransport>>,
    state: Mutex<SupervisorState>,
    /// Serializes triggers so measurements reach the run in call order.
    delivery: Mutex<()>,
}

impl RunSupervisor {
    /// Every run starts from a clone of `config`.
    pub fn new(config: LoopConfig, factory: ControllerFactory) -> Self {
        Self {
            config_source: Box::new(move || Ok(config.clone())),
            factory,
            transport: None,
            state: Mutex::new(SupervisorState::default()),
            delivery: Mutex::new(()),
        }
    }

    /// Read the snapshot anew for every run, e.g. from the configuration file.
    pub fn with_config_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> MsResult<LoopConfig> + Send + Sync + 'static,
    {
        self.config_source = Box::new(source);
        self
    }

    /// Transport used in live mode. Without one, live runs connect over
    /// [`TcpJsonTransport`] to the configured experiment host.
    pub fn with_transport(mut self, transport: Arc<dyn ExperimentTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn on_external_trigger(&self, measurement: Measurement) -> MsResult<TriggerOutcome> {
        self.on_external_trigger_with(|_, _| measurement)
    }

    /// Like [`on_external_trigger`](Self::on_external_trigger), but the
    /// measurement is only computed when a run is alive to receive it. The
    /// closure sees the run's configuration and the point being evaluated.
    pub fn on_external_trigger_with<F>(&self, analyse: F) -> MsResult<TriggerOutcome>
    where
        F: FnOnce(&LoopConfig, &EvaluationSnapshot) -> Measurement,
    {
        let _delivery = self.delivery.lock();

        let live = {
            let mut state = self.state.lock();
            let alive = state
                .current
                .as_ref()
                .filter(|r| r.is_alive())
                .map(|run| LiveRun {
                    id: run.id,
                    config: run.config.clone(),
                    channel: run.channel.clone(),
                    evaluation: run.evaluation.clone(),
                });
            match alive {
                Some(live) => live,
                None => {
                    let run = self.start_run()?;
                    let run_id = run.id;
                    if let Some(mut previous) = state.current.replace(run) {
                        previous.reap();
                    }
                    state.runs_started += 1;
                    return Ok(TriggerOutcome::Started { run_id });
                }
            }
        };

        let snapshot = live.evaluation.snapshot();
        let measurement = analyse(&live.config, &snapshot);

        if measurement.is_absent() && live.config.absent_policy == AbsentPolicy::Drop {
            debug!(run_id = %live.id, iteration = snapshot.iteration, "absent measurement dropped");
            return Ok(TriggerOutcome::Dropped { run_id: live.id });
        }
        live.channel.push(measurement);
        Ok(TriggerOutcome::Delivered { run_id: live.id })
    }

    fn start_run(&self) -> MsResult<RunHandle> {
        let config = (self.config_source)()?;
        config.validate()?;
        let config = Arc::new(config);

        let id = Uuid::new_v4();
        let channel = ResultChannel::new();
        let evaluation = SharedEvaluation::default();
        let status = Arc::new(Mutex::new(RunStatus::new(id)));

        let requester = if config.mock {
            None
        } else {
            let transport: Arc<dyn ExperimentTransport> = match &self.transport {
                Some(t) => t.clone(),
                None => Arc::new(TcpJsonTransport::from_config(&config.experiment)),
            };
            Some(RetryingRequest::from_config(transport, &config.experiment))
        };

        let bridge = OptimizerBridge::new(
            id,
            config.clone(),
            channel.clone(),
            requester,
            evaluation.clone(),
            status.clone(),
        )?;

        status.lock().mark_running();
        let factory = self.factory.clone();
        let thread_status = status.clone();
        let thread = thread::Builder::new()
            .name(format!("ms-run-{}", &id.simple().to_string()[..8]))
            .spawn(move || run_to_completion(bridge, factory, thread_status))?;

        info!(run_id = %id, mock = config.mock, "(re)starting optimisation run");

        Ok(RunHandle {
            id,
            config,
            channel,
            evaluation,
            status,
            thread: Some(thread),
        })
    }

    /// True while a run thread is alive.
    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(RunHandle::is_alive)
    }

    /// Number of runs spawned by this supervisor.
    pub fn runs_started(&self) -> u64 {
        self.state.lock().runs_started
    }

    /// Status of the most recent run.
    pub fn status(&self) -> Option<RunStatus> {
        let state = self.state.lock();
        let status = state.current.as_ref()?.status.lock().clone();
        Some(status)
    }

    /// Final results of the most recent run, once it has completed.
    pub fn last_results(&self) -> Option<OptimizationResults> {
        self.status()?.results
    }

    /// The point the most recent run is evaluating.
    pub fn evaluation(&self) -> Option<EvaluationSnapshot> {
        let state = self.state.lock();
        let snapshot = state.current.as_ref()?.evaluation.snapshot();
        Some(snapshot)
    }

    pub fn current_params(&self) -> Option<Vec<f64>> {
        self.evaluation().map(|e| e.params)
    }

    pub fn mock_x(&self) -> Option<f64> {
        self.evaluation()?.mock_x
    }

    fn current_evaluation(&self) -> Option<SharedEvaluation> {
        let state = self.state.lock();
        state.current.as_ref().map(|run| run.evaluation.clone())
    }

    /// Wait until the most recent run blocks on iteration `iteration` or
    /// later. Returns false on timeout or once the run has ended.
    pub fn wait_until_awaiting(&self, iteration: u64, timeout: Duration) -> bool {
        let Some(evaluation) = self.current_evaluation() else {
            return false;
        };
        let mut reached = false;
        evaluation.wait_for(timeout, |eval| {
            reached = eval.phase == BridgePhase::AwaitingResult && eval.iteration >= iteration;
            reached || eval.phase == BridgePhase::Done
        });
        reached
    }

    /// Wait until no run thread is alive.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let Some(evaluation) = self.current_evaluation() else {
            return true;
        };
        if !evaluation.wait_for(timeout, |eval| eval.phase == BridgePhase::Done) {
            return false;
        }

        // The bridge is dropped as the run thread returns; join it so the
        // next trigger sees no live run.
        let mut state = self.state.lock();
        if let Some(run) = state.current.as_mut() {
            if Arc::ptr_eq(&run.evaluation, &evaluation) {
                run.reap();
            }
        }
        true
    }
}

impl Drop for RunSupervisor {
    fn drop(&mut self) {
        if let Some(run) = self.state.get_mut().current.as_mut() {
            if run.is_alive() {
                // The thread only ends through its controller; leave it detached.
                debug!(run_id = %run.id, "supervisor dropped with an active run");
            } else {
                run.reap();
            }
        }
    }
}

fn run_to_completion(
    mut bridge: OptimizerBridge,
    factory: ControllerFactory,
    status: Arc<Mutex<RunStatus>>,
) {
    let run_id = bridge.run_id();
    let config = bridge.config().clone();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut controller = factory(config.as_ref())?;
        info!(run_id = %run_id, controller = controller.name(), "optimisation started");
        controller.optimize(&mut bridge)
    }));

    match outcome {
        Ok(Ok(results)) => {
            info!(
                run_id = %run_id,
                best_cost = results.best_cost,
                best_index = results.best_index,
                best_params = ?results.best_params,
                "optimisation ended"
            );
            status.lock().mark_completed(results);
        }
        Ok(Err(e)) => {
            error!(
                run_id = %run_id,
                unrecoverable = e.is_unrecoverable(),
                error = %e,
                "optimisation run failed"
            );
            status.lock().mark_failed(e.to_string());
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(run_id = %run_id, %message, "optimisation controller panicked");
            status.lock().mark_failed(format!("controller panicked: {message}"));
        }
    }
}
