//! Values exchanged between the analysis step, the bridge and the controller.

use serde::{Deserialize, Serialize};

/// One cost observation delivered by an analysis invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Measurement {
    Value(f64),
    /// No usable data point, e.g. a missing column or an ignored NaN.
    Absent,
}

impl Measurement {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl From<f64> for Measurement {
    fn from(value: f64) -> Self {
        Self::Value(value)
    }
}

impl From<Option<f64>> for Measurement {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Absent, Self::Value)
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Absent => write!(f, "<absent>"),
        }
    }
}

/// A point the controller wants evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRequest {
    /// 1-based, monotonic within a run.
    pub iteration: u64,
    pub params: Vec<f64>,
}

/// Cost handed back to the controller for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub cost: f64,
    pub bad: bool,
    pub uncer: Option<f64>,
}

impl CostRecord {
    pub fn new(cost: f64, bad: bool) -> Self {
        Self {
            cost,
            bad,
            uncer: None,
        }
    }

    /// Whether a controller may learn from this record.
    pub fn is_usable(&self) -> bool {
        !self.bad && self.cost.is_finite()
    }
}

/// Final outcome of a completed optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResults {
    pub best_params: Vec<f64>,
    pub best_cost: f64,
    pub best_uncer: Option<f64>,
    /// 0-based index of the iteration that produced the best cost.
    pub best_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measurement_from_option() {
        assert_eq!(Measurement::from(Some(0.37)), Measurement::Value(0.37));
        assert_eq!(Measurement::from(None), Measurement::Absent);
        assert!(Measurement::Absent.is_absent());
        assert_eq!(Measurement::Value(1.5).value(), Some(1.5));
    }

    #[test]
    fn measurement_display() {
        assert_eq!(Measurement::Value(0.5).to_string(), "0.5");
        assert_eq!(Measurement::Absent.to_string(), "<absent>");
    }

    #[test]
    fn cost_record_usability() {
        assert!(CostRecord::new(-0.8, false).is_usable());
        assert!(!CostRecord::new(-0.8, true).is_usable());
        assert!(!CostRecord::new(f64::NAN, false).is_usable());
    }

    #[test]
    fn results_serialize_with_snake_case_fields() {
        let results = OptimizationResults {
            best_params: vec![0.1, 0.2],
            best_cost: -0.99,
            best_uncer: None,
            best_index: 4,
        };
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["best_index"], 4);
        assert_eq!(json["best_uncer"], serde_json::Value::Null);
    }
}
