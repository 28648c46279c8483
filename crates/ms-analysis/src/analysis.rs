//! Cost functions computed from shot data.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use ms_types::LoopConfig;

/// Noise amplitude of the simulated Lorentzian.
pub const DEFAULT_NOISE: f64 = 0.05;

/// Value used when there is neither shot data nor a mock point.
pub const FALLBACK_VALUE: f64 = 1.2;

/// `1 / (1 + x²)` plus Gaussian noise of standard deviation `s`.
pub fn lorentzian<R: Rng>(x: f64, s: f64, rng: &mut R) -> f64 {
    1.0 / (1.0 + x * x) + s * standard_normal(rng)
}

// Box-Muller
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Analysis results of one shot, keyed by column path joined with `/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShotRow {
    pub filepath: String,
    pub values: BTreeMap<String, f64>,
}

impl ShotRow {
    pub fn new(filepath: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value<S: AsRef<str>>(mut self, key_path: &[S], value: f64) -> Self {
        self.values.insert(column_key(key_path), value);
        self
    }
}

fn column_key<S: AsRef<str>>(key_path: &[S]) -> String {
    key_path
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join("/")
}

/// Shots analysed so far, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShotTable {
    rows: Vec<ShotRow>,
}

impl ShotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: ShotRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `key_path` in the most recent shot, with that shot's file.
    ///
    /// `None` if no shot ever had the column. If the column exists but the
    /// latest shot lacks it, the value is NaN.
    pub fn latest<S: AsRef<str>>(&self, key_path: &[S]) -> Option<(f64, &str)> {
        let key = column_key(key_path);
        if !self.rows.iter().any(|r| r.values.contains_key(&key)) {
            return None;
        }
        let last = self.rows.last()?;
        let value = last.values.get(&key).copied().unwrap_or(f64::NAN);
        Some((value, last.filepath.as_str()))
    }
}

/// Inputs available to a cost analysis during one trigger.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub config: &'a LoopConfig,
    /// First parameter of the point under evaluation, mock mode only.
    pub mock_x: Option<f64>,
    pub shots: &'a ShotTable,
}

/// Computes the cost of the latest shot. `None` means "no usable result".
pub trait CostAnalysis: Send {
    fn analyse(&mut self, ctx: &AnalysisContext<'_>) -> Option<f64>;
}

/// Cost = minus the latest value of `opt_param`, so the optimizer maximizes
/// the analysed quantity.
///
/// Without shot data it simulates one: a noisy Lorentzian at `mock_x` in mock
/// mode, or [`FALLBACK_VALUE`] when there is no point to simulate.
#[derive(Debug, Clone)]
pub struct LatestValueAnalysis {
    noise: f64,
    rng: StdRng,
}

impl LatestValueAnalysis {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            noise: DEFAULT_NOISE,
            rng,
        }
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }
}

impl CostAnalysis for LatestValueAnalysis {
    fn analyse(&mut self, ctx: &AnalysisContext<'_>) -> Option<f64> {
        let mock_x = ctx.mock_x.filter(|_| ctx.config.mock);
        let (value, source) = match ctx.shots.latest(ctx.config.opt_param.as_slice()) {
            Some((value, filepath)) => {
                let name = std::path::Path::new(filepath)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| filepath.to_string());
                (value, name)
            }
            None => match mock_x {
                None => (FALLBACK_VALUE, "<fake_shot>".to_string()),
                Some(x) => (lorentzian(x, self.noise, &mut self.rng), "<fake_data>".to_string()),
            },
        };

        if ctx.config.ignore_nans && value.is_nan() {
            debug!(%source, "NaN result ignored");
            return None;
        }
        info!(%source, value, "returning cost analysis");
        Some(-value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(config: &'a LoopConfig, shots: &'a ShotTable, mock_x: Option<f64>) -> AnalysisContext<'a> {
        AnalysisContext {
            config,
            mock_x,
            shots,
        }
    }

    #[test]
    fn lorentzian_without_noise_is_exact() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(lorentzian(0.0, 0.0, &mut rng), 1.0);
        assert_eq!(lorentzian(1.0, 0.0, &mut rng), 0.5);
    }

    #[test]
    fn latest_reads_last_row() {
        let mut shots = ShotTable::new();
        shots.push(ShotRow::new("/data/shot_0001.h5").with_value(&["Test", "y"], 0.2));
        shots.push(ShotRow::new("/data/shot_0002.h5").with_value(&["Test", "y"], 0.6));

        let (value, file) = shots.latest(&["Test", "y"]).unwrap();
        assert_eq!(value, 0.6);
        assert_eq!(file, "/data/shot_0002.h5");
        assert!(shots.latest(&["Other", "z"]).is_none());
    }

    #[test]
    fn missing_value_in_latest_row_is_nan() {
        let mut shots = ShotTable::new();
        shots.push(ShotRow::new("a.h5").with_value(&["Test", "y"], 0.2));
        shots.push(ShotRow::new("b.h5"));

        let (value, _) = shots.latest(&["Test", "y"]).unwrap();
        assert!(value.is_nan());
    }

    #[test]
    fn cost_is_negated_shot_value() {
        let config = LoopConfig::default();
        let mut shots = ShotTable::new();
        shots.push(ShotRow::new("shot.h5").with_value(config.opt_param.as_slice(), 0.8));

        let mut analysis = LatestValueAnalysis::new(Some(1));
        assert_eq!(analysis.analyse(&ctx(&config, &shots, Some(2.0))), Some(-0.8));
    }

    #[test]
    fn mock_without_data_simulates_lorentzian() {
        let config = LoopConfig::default();
        let shots = ShotTable::new();
        let mut analysis = LatestValueAnalysis::new(Some(1)).with_noise(0.0);

        assert_eq!(analysis.analyse(&ctx(&config, &shots, Some(0.0))), Some(-1.0));
    }

    #[test]
    fn no_data_and_no_point_uses_fallback() {
        let config = LoopConfig::default().with_mock(false);
        let shots = ShotTable::new();
        let mut analysis = LatestValueAnalysis::new(Some(1));

        // mock_x is ignored outside mock mode
        assert_eq!(
            analysis.analyse(&ctx(&config, &shots, Some(0.0))),
            Some(-FALLBACK_VALUE)
        );
    }

    #[test]
    fn nan_respects_ignore_nans() {
        let mut config = LoopConfig::default();
        let mut shots = ShotTable::new();
        shots.push(ShotRow::new("shot.h5").with_value(config.opt_param.as_slice(), f64::NAN));
        let mut analysis = LatestValueAnalysis::new(Some(1));

        let kept = analysis.analyse(&ctx(&config, &shots, None));
        assert!(kept.unwrap().is_nan());

        config.ignore_nans = true;
        assert_eq!(analysis.analyse(&ctx(&config, &shots, None)), None);
    }
}
