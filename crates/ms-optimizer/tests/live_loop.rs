//! End-to-end runs through the supervisor: a TCP experiment host that only
//! acknowledges, and analysis triggers that deliver the costs.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ms_optimizer::{default_factory, RunState, RunSupervisor, TriggerOutcome};
use ms_types::{ControllerConfig, ExperimentHostConfig, LoopConfig, Measurement};

const WAIT: Duration = Duration::from_secs(5);

/// Accepts connections forever, replies `"ack"` to each request line and
/// keeps the decoded requests.
fn spawn_ack_host() -> (u16, Arc<Mutex<Vec<serde_json::Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let host_seen = seen.clone();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut line = String::new();
            BufReader::new(stream.try_clone().unwrap())
                .read_line(&mut line)
                .unwrap();
            host_seen
                .lock()
                .unwrap()
                .push(serde_json::from_str(line.trim_end()).unwrap());
            stream.write_all(b"\"ack\"\n").unwrap();
        }
    });
    (port, seen)
}

fn controller(max_num_runs: usize) -> ControllerConfig {
    ControllerConfig {
        max_num_runs,
        max_num_runs_without_better_params: max_num_runs,
        seed: Some(3),
        ..ControllerConfig::default()
    }
}

#[test]
fn live_run_requests_one_shot_per_iteration() {
    let (port, seen) = spawn_ack_host();
    let config = LoopConfig::default()
        .with_mock(false)
        .with_experiment(ExperimentHostConfig {
            host: "127.0.0.1".into(),
            port,
            timeout_ms: 1_000,
            retries: 2,
        })
        .with_controller(controller(3));
    let supervisor = RunSupervisor::new(config, default_factory());

    let outcome = supervisor.on_external_trigger(Measurement::Absent).unwrap();
    assert!(matches!(outcome, TriggerOutcome::Started { .. }));

    for (shot, cost) in [(1, -0.2), (2, -0.6), (3, -0.4)] {
        assert!(supervisor.wait_until_awaiting(shot, WAIT));
        let outcome = supervisor.on_external_trigger(Measurement::Value(cost)).unwrap();
        assert!(matches!(outcome, TriggerOutcome::Delivered { .. }));
    }
    assert!(supervisor.wait_until_idle(WAIT));

    let status = supervisor.status().unwrap();
    assert_eq!(status.state, RunState::Completed);
    let results = status.results.unwrap();
    assert_eq!(results.best_index, 1);
    assert_eq!(results.best_cost, -0.6);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    for (i, request) in seen.iter().enumerate() {
        assert_eq!(request["iter_count"], (i + 1) as u64);
        assert_eq!(request["run_id"], status.id.to_string());
        assert_eq!(request["config"]["mock"], false);
    }
    assert_eq!(seen[1]["mloop_params"][0], results.best_params[0]);
}

#[test]
fn unreachable_host_fails_the_run() {
    // Bind then drop to get a port nobody listens on.
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = LoopConfig::default()
        .with_mock(false)
        .with_experiment(ExperimentHostConfig {
            host: "127.0.0.1".into(),
            port,
            timeout_ms: 200,
            retries: 1,
        })
        .with_controller(controller(3));
    let supervisor = RunSupervisor::new(config, default_factory());

    supervisor.on_external_trigger(Measurement::Absent).unwrap();
    assert!(supervisor.wait_until_idle(WAIT));

    let status = supervisor.status().unwrap();
    assert_eq!(status.state, RunState::Failed);
    assert_eq!(status.iterations_completed, 0);
    assert!(status.error.is_some());
}

#[test]
fn mock_run_restarts_after_completion() {
    let config = LoopConfig::default().with_controller(controller(2));
    let supervisor = RunSupervisor::new(config, default_factory());

    for round in 1..=2u64 {
        let outcome = supervisor.on_external_trigger(Measurement::Absent).unwrap();
        assert!(matches!(outcome, TriggerOutcome::Started { .. }));
        for shot in 1..=2u64 {
            assert!(supervisor.wait_until_awaiting(shot, WAIT));
            let x = supervisor.mock_x().unwrap();
            supervisor.on_external_trigger(Measurement::Value(x * x)).unwrap();
        }
        assert!(supervisor.wait_until_idle(WAIT));
        assert_eq!(supervisor.runs_started(), round);
        assert_eq!(supervisor.status().unwrap().state, RunState::Completed);
    }
}
