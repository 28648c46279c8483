//! # ms-optimizer
//!
//! Runs a black-box optimizer against an experiment that delivers one cost
//! per externally triggered analysis invocation.
//!
//! A [`RunSupervisor`] owns at most one background run. The run drives an
//! [`OptimizerController`] whose every cost request goes through an
//! [`OptimizerBridge`]: the bridge asks the experiment host for a shot (or
//! records the point for a mock analysis), then blocks on a [`ResultChannel`]
//! until the next trigger delivers the measurement.

mod bridge;
mod channel;
mod controller;
mod retry;
mod search;
mod supervisor;
mod transport;
mod trial;

pub use bridge::{
    BridgePhase, EvaluationBoard, EvaluationSnapshot, OptimizerBridge, SharedEvaluation,
};
pub use channel::ResultChannel;
pub use controller::{
    default_factory, ControllerFactory, CostInterface, OptimizerController, SearchController,
};
pub use retry::RetryingRequest;
pub use search::{ExploreExploitSearch, ParameterBound, RandomSearch, SearchSpace, SearchStrategy};
pub use supervisor::{RunSupervisor, TriggerOutcome};
pub use transport::{ExperimentRequest, ExperimentTransport, TcpJsonTransport};
pub use trial::{RunId, RunState, RunStatus, Trial};
