//! Analysis side of MultiShot.
//!
//! Each experiment shot runs the [`AnalysisRoutine`] once. The routine turns
//! the latest shot data into a cost with a [`CostAnalysis`] and hands it to the
//! [`RunSupervisor`](ms_optimizer::RunSupervisor), which either feeds the
//! active optimization run or starts a new one.

pub mod analysis;
pub mod routine;

pub use analysis::{
    lorentzian, AnalysisContext, CostAnalysis, LatestValueAnalysis, ShotRow, ShotTable,
};
pub use routine::AnalysisRoutine;
