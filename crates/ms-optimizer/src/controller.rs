//! Controller boundary: the search loop that consumes the bridge.

use std::sync::Arc;
use tracing::{debug, info};

use ms_types::{
    config_error, BridgeError, ControllerConfig, ControllerType, CostRecord, LoopConfig, MsResult,
    OptimizationResults,
};

use crate::search::{ExploreExploitSearch, RandomSearch, SearchSpace, SearchStrategy};

/// "Evaluate parameters → cost", the only thing a controller may ask for.
pub trait CostInterface {
    fn evaluate_parameters(&mut self, params: &[f64]) -> MsResult<CostRecord>;
}

/// A black-box optimizer that drives a [`CostInterface`] until its own
/// stopping rule fires.
pub trait OptimizerController: Send {
    fn optimize(&mut self, interface: &mut dyn CostInterface) -> MsResult<OptimizationResults>;

    fn name(&self) -> &str;
}

/// Builds a fresh controller for every run from that run's snapshot.
pub type ControllerFactory =
    Arc<dyn Fn(&LoopConfig) -> MsResult<Box<dyn OptimizerController>> + Send + Sync>;

/// Factory for the built-in [`SearchController`].
pub fn default_factory() -> ControllerFactory {
    Arc::new(|config: &LoopConfig| -> MsResult<Box<dyn OptimizerController>> {
        let controller = SearchController::new(&config.controller)?;
        Ok(Box::new(controller) as Box<dyn OptimizerController>)
    })
}

/// Minimizes cost with the [`SearchStrategy`] named by `controller_type`.
///
/// Evaluates `first_params` first when given. Stops after `max_num_runs`
/// evaluations, after `max_num_runs_without_better_params` evaluations in a
/// row without improvement, or as soon as the best cost reaches
/// `target_cost`. Bad or non-finite costs are counted but never learned from.
pub struct SearchController {
    config: ControllerConfig,
    search: Box<dyn SearchStrategy>,
}

impl SearchController {
    pub fn new(config: &ControllerConfig) -> MsResult<Self> {
        let space = SearchSpace::from_boundaries(&config.min_boundary, &config.max_boundary)?;
        if let Some(first) = &config.first_params {
            if !space.contains(first) {
                return Err(config_error!(
                    "first_params {first:?} is not a point of the search space"
                ));
            }
        }

        let search: Box<dyn SearchStrategy> = match config.controller_type {
            ControllerType::ExploreExploit => Box::new(ExploreExploitSearch::new(
                space,
                config.exploration_weight,
                config.seed,
            )),
            ControllerType::Random => Box::new(RandomSearch::new(space, config.seed)),
        };
        Ok(Self {
            config: config.clone(),
            search,
        })
    }

    fn next_point(&mut self, index: usize) -> Vec<f64> {
        match (&self.config.first_params, index) {
            (Some(first), 0) => first.clone(),
            _ => self.search.suggest(1).pop().unwrap_or_default(),
        }
    }
}

impl OptimizerController for SearchController {
    fn optimize(&mut self, interface: &mut dyn CostInterface) -> MsResult<OptimizationResults> {
        let mut best: Option<(usize, Vec<f64>, CostRecord)> = None;
        let mut without_better = 0usize;
        let mut evaluated = 0usize;

        for index in 0..self.config.max_num_runs {
            let params = self.next_point(index);
            let record = interface.evaluate_parameters(&params)?;
            evaluated += 1;

            let improved = record.is_usable()
                && best
                    .as_ref()
                    .map_or(true, |(_, _, b)| record.cost < b.cost);
            if record.is_usable() {
                self.search.report(&params, record.cost);
            }

            if improved {
                debug!(index, cost = record.cost, "new best parameters");
                best = Some((index, params, record));
                without_better = 0;
            } else {
                without_better += 1;
            }

            if let (Some(target), Some((_, _, b))) = (self.config.target_cost, &best) {
                if b.cost <= target {
                    info!(index, cost = b.cost, target, "target cost reached");
                    break;
                }
            }
            if without_better >= self.config.max_num_runs_without_better_params {
                info!(index, without_better, "no better parameters found, stopping");
                break;
            }
        }

        let (best_index, best_params, record) =
            best.ok_or(BridgeError::NoValidCost { iterations: evaluated })?;
        Ok(OptimizationResults {
            best_params,
            best_cost: record.cost,
            best_uncer: record.uncer,
            best_index,
        })
    }

    fn name(&self) -> &str {
        self.search.name()
    }
}
