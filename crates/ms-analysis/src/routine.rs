//! One invocation per experiment shot.

use std::sync::Arc;
use tracing::{debug, info};

use ms_optimizer::{RunSupervisor, TriggerOutcome};
use ms_types::{Measurement, MsResult};

use crate::analysis::{AnalysisContext, CostAnalysis, ShotTable};

/// Runs the cost analysis for the latest shot and hands the result to the
/// supervisor.
///
/// The analysis is only evaluated while a run is alive; the invocation that
/// (re)starts a run computes nothing.
pub struct AnalysisRoutine<A: CostAnalysis> {
    supervisor: Arc<RunSupervisor>,
    analysis: A,
}

impl<A: CostAnalysis> AnalysisRoutine<A> {
    pub fn new(supervisor: Arc<RunSupervisor>, analysis: A) -> Self {
        Self {
            supervisor,
            analysis,
        }
    }

    pub fn supervisor(&self) -> &Arc<RunSupervisor> {
        &self.supervisor
    }

    pub fn invoke(&mut self, shots: &ShotTable) -> MsResult<TriggerOutcome> {
        let analysis = &mut self.analysis;
        let outcome = self.supervisor.on_external_trigger_with(|config, evaluation| {
            let ctx = AnalysisContext {
                config,
                mock_x: evaluation.mock_x,
                shots,
            };
            Measurement::from(analysis.analyse(&ctx))
        })?;

        match outcome {
            TriggerOutcome::Started { run_id } => {
                info!(%run_id, shots = shots.len(), "(re)starting optimisation process");
            }
            TriggerOutcome::Delivered { run_id } => {
                debug!(%run_id, "cost delivered to optimisation");
            }
            TriggerOutcome::Dropped { run_id } => {
                debug!(%run_id, "no usable cost for this shot");
            }
        }
        Ok(outcome)
    }
}
