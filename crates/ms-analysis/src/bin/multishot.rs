use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ms_analysis::{AnalysisRoutine, LatestValueAnalysis, ShotTable};
use ms_optimizer::{default_factory, RunState, RunSupervisor};
use ms_types::{LoopConfig, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};

const SHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives one optimisation run by invoking the analysis routine once per
/// simulated shot, then prints the results as JSON.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let max_shots: u64 = match std::env::var("MULTISHOT_MAX_SHOTS") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("MULTISHOT_MAX_SHOTS must be an integer, got {raw:?}"))?,
        Err(_) => 1_000,
    };

    let config = LoopConfig::load_or_create(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    info!(path = %path.display(), mock = config.mock, max_shots, "multishot driver starting");
    if !config.mock {
        warn!("live mode: shots are requested from the experiment host, analysis data stays simulated");
    }

    let source_path = path.clone();
    let mut routine = AnalysisRoutine::new(
        Arc::new(
            RunSupervisor::new(config, default_factory())
                .with_config_source(move || LoopConfig::load_or_create(&source_path)),
        ),
        LatestValueAnalysis::new(None),
    );
    let supervisor = routine.supervisor().clone();
    let shots = ShotTable::new();

    routine.invoke(&shots)?;
    for shot in 1..=max_shots {
        if !supervisor.wait_until_awaiting(shot, SHOT_TIMEOUT) {
            break;
        }
        routine.invoke(&shots)?;
    }
    if !supervisor.wait_until_idle(SHOT_TIMEOUT) {
        bail!("optimisation still running after {max_shots} shots");
    }

    let status = supervisor
        .status()
        .context("no optimisation run was started")?;
    match (status.state, status.results) {
        (RunState::Completed, Some(results)) => {
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        (state, _) => bail!(
            "optimisation run {} ended {:?}: {}",
            status.id,
            state,
            status.error.unwrap_or_default()
        ),
    }
}
