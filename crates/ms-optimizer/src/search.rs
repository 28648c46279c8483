//! Search space definitions and parameter proposal strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use ms_types::{config_error, MsResult};

/// One continuous dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBound {
    pub name: String,
    pub low: f64,
    pub high: f64,
}

/// The full search space: an ordered list of bounded dimensions.
///
/// Points are plain `Vec<f64>` in the same order as `parameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterBound>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterBound {
            name: name.into(),
            low,
            high,
        });
        self
    }

    /// Build from the controller's `min_boundary` / `max_boundary` lists.
    pub fn from_boundaries(min: &[f64], max: &[f64]) -> MsResult<Self> {
        if min.is_empty() || min.len() != max.len() {
            return Err(config_error!(
                "boundary lengths differ or are empty (min: {}, max: {})",
                min.len(),
                max.len()
            ));
        }
        let mut space = Self::new();
        for (i, (lo, hi)) in min.iter().zip(max).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(config_error!("boundary {i} is empty: [{lo}, {hi}]"));
            }
            space = space.add_float(format!("x{i}"), *lo, *hi);
        }
        Ok(space)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.len()
            && self
                .parameters
                .iter()
                .zip(point)
                .all(|(p, v)| *v >= p.low && *v <= p.high)
    }

    fn sample(&self, rng: &mut StdRng) -> Vec<f64> {
        self.parameters
            .iter()
            .map(|p| rng.random_range(p.low..=p.high))
            .collect()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all proposal strategies.
pub trait SearchStrategy: Send {
    /// Generate the next batch of points to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<Vec<f64>>;

    /// Report an evaluated cost so adaptive strategies can learn.
    fn report(&mut self, _params: &[f64], _cost: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Random search ----

/// Uniform random sampling inside the bounds.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: make_rng(seed),
        }
    }

    pub fn sample_one(&mut self) -> Vec<f64> {
        self.space.sample(&mut self.rng)
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<Vec<f64>> {
        (0..count).map(|_| self.sample_one()).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Explore / exploit ----

/// With probability `exploration_weight` samples uniformly, otherwise perturbs
/// the lowest-cost point reported so far by up to 10% of each range.
#[derive(Debug, Clone)]
pub struct ExploreExploitSearch {
    space: SearchSpace,
    explorer: RandomSearch,
    observations: Vec<(Vec<f64>, f64)>,
    exploration_weight: f64,
    rng: StdRng,
}

impl ExploreExploitSearch {
    pub fn new(space: SearchSpace, exploration_weight: f64, seed: Option<u64>) -> Self {
        Self {
            explorer: RandomSearch::new(space.clone(), seed),
            space,
            observations: Vec::new(),
            exploration_weight,
            rng: make_rng(seed.map(|s| s.wrapping_add(1))),
        }
    }

    pub fn observations(&self) -> usize {
        self.observations.len()
    }

    fn explore(&mut self) -> Vec<f64> {
        self.explorer.sample_one()
    }

    fn exploit(&mut self) -> Vec<f64> {
        let best = self
            .observations
            .iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(params, _)| params.clone());

        let Some(base) = best else {
            return self.explore();
        };

        self.space
            .parameters
            .iter()
            .zip(base)
            .map(|(p, v)| {
                let noise = self.rng.random_range(-0.1..0.1) * (p.high - p.low);
                (v + noise).clamp(p.low, p.high)
            })
            .collect()
    }
}

impl SearchStrategy for ExploreExploitSearch {
    fn suggest(&mut self, count: usize) -> Vec<Vec<f64>> {
        (0..count)
            .map(|_| {
                if self.observations.is_empty()
                    || self.rng.random::<f64>() < self.exploration_weight
                {
                    self.explore()
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &[f64], cost: f64) {
        self.observations.push((params.to_vec(), cost));
    }

    fn name(&self) -> &str {
        "explore_exploit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_float("detuning", -3.0, 3.0)
            .add_float("power", 0.5, 1.0)
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = sample_space();
        let mut rs = RandomSearch::new(space.clone(), Some(7));
        let suggestions = rs.suggest(50);
        assert_eq!(suggestions.len(), 50);
        for point in &suggestions {
            assert!(space.contains(point), "out of bounds: {point:?}");
        }
    }

    #[test]
    fn seeded_searches_are_reproducible() {
        let mut a = RandomSearch::new(sample_space(), Some(42));
        let mut b = RandomSearch::new(sample_space(), Some(42));
        assert_eq!(a.suggest(5), b.suggest(5));
    }

    #[test]
    fn explore_exploit_starts_with_exploration() {
        let mut search = ExploreExploitSearch::new(sample_space(), 0.3, Some(1));
        let suggestions = search.suggest(10);
        assert_eq!(suggestions.len(), 10);
        assert_eq!(search.observations(), 0);
    }

    #[test]
    fn exploit_stays_near_lowest_cost() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        // exploration_weight=0: always exploit once something is reported
        let mut search = ExploreExploitSearch::new(space, 0.0, Some(3));
        search.report(&[0.9], 4.0);
        search.report(&[0.5], -1.0);

        for point in search.suggest(20) {
            assert!((point[0] - 0.5).abs() <= 0.1 + 1e-12, "{point:?}");
        }
    }

    #[test]
    fn from_boundaries_rejects_bad_shapes() {
        assert!(SearchSpace::from_boundaries(&[0.0], &[1.0, 2.0]).is_err());
        assert!(SearchSpace::from_boundaries(&[], &[]).is_err());
        assert!(SearchSpace::from_boundaries(&[1.0], &[0.0]).is_err());
        assert!(SearchSpace::from_boundaries(&[f64::NAN], &[1.0]).is_err());
        assert!(SearchSpace::from_boundaries(&[0.0], &[f64::INFINITY]).is_err());

        let space = SearchSpace::from_boundaries(&[-1.0, 0.0], &[1.0, 5.0]).unwrap();
        assert_eq!(space.len(), 2);
        assert_eq!(space.parameters[1].name, "x1");
    }
}
