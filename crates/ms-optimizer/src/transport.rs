//! Experiment-host request descriptors and the transports that carry them.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ms_types::{ExperimentHostConfig, IterationRequest, TransportError};

use crate::trial::RunId;

/// Asks the experiment host to run the next shot.
///
/// The host only acknowledges; the cost for this shot arrives later through
/// the analysis trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRequest {
    pub run_id: RunId,
    /// 1-based iteration this shot belongs to.
    pub iter_count: u64,
    /// Parameters the shot should be run with.
    pub mloop_params: Vec<f64>,
    /// Full configuration snapshot of the run, as JSON.
    pub config: serde_json::Value,
}

impl ExperimentRequest {
    pub fn for_iteration(
        run_id: RunId,
        next: &IterationRequest,
        config: &serde_json::Value,
    ) -> Self {
        Self {
            run_id,
            iter_count: next.iteration,
            mloop_params: next.params.clone(),
            config: config.clone(),
        }
    }
}

/// One request/response exchange with the experiment host.
pub trait ExperimentTransport: Send + Sync {
    fn request(
        &self,
        request: &ExperimentRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, TransportError>;
}

/// Line-delimited JSON over TCP: one request line out, one reply line back.
#[derive(Debug, Clone)]
pub struct TcpJsonTransport {
    host: String,
    port: u16,
}

impl TcpJsonTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn from_config(config: &ExperimentHostConfig) -> Self {
        Self::new(config.host.clone(), config.port)
    }

    fn connect(&self, timeout: Duration) -> Result<TcpStream, TransportError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Connection {
                message: format!("cannot resolve {}:{}: {e}", self.host, self.port),
            })?
            .next()
            .ok_or_else(|| TransportError::Connection {
                message: format!("no address for {}:{}", self.host, self.port),
            })?;

        let stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|e| classify(e, timeout))?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| classify(e, timeout))?;
        Ok(stream)
    }
}

impl ExperimentTransport for TcpJsonTransport {
    fn request(
        &self,
        request: &ExperimentRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, TransportError> {
        let mut stream = self.connect(timeout)?;

        let mut payload = serde_json::to_vec(request).map_err(|e| TransportError::Protocol {
            message: format!("cannot encode request: {e}"),
        })?;
        payload.push(b'\n');
        stream
            .write_all(&payload)
            .and_then(|_| stream.flush())
            .map_err(|e| classify(e, timeout))?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| classify(e, timeout))?;
        if read == 0 {
            return Err(TransportError::Protocol {
                message: "experiment host closed the connection without replying".into(),
            });
        }

        serde_json::from_str(line.trim_end()).map_err(|e| TransportError::Protocol {
            message: format!("invalid reply: {e}"),
        })
    }
}

fn classify(err: std::io::Error, timeout: Duration) -> TransportError {
    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        },
        _ => TransportError::Connection {
            message: err.to_string(),
        },
    }
}
