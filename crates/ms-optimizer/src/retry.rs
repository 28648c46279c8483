//! Bounded retry-on-timeout around an [`ExperimentTransport`].

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use ms_types::{BridgeError, ExperimentHostConfig};

use crate::transport::{ExperimentRequest, ExperimentTransport};

/// Performs one experiment-host call, retrying immediately on timeouts.
///
/// `max_retries` counts retries after the first attempt, so a host that never
/// answers sees `max_retries + 1` attempts. Running out of attempts is
/// reported as [`BridgeError::Unrecoverable`]; any non-timeout failure is
/// returned straight away as [`BridgeError::Request`].
#[derive(Clone)]
pub struct RetryingRequest {
    transport: Arc<dyn ExperimentTransport>,
    timeout: Duration,
    max_retries: u32,
}

impl RetryingRequest {
    pub fn new(transport: Arc<dyn ExperimentTransport>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            transport,
            timeout,
            max_retries,
        }
    }

    pub fn from_config(transport: Arc<dyn ExperimentTransport>, config: &ExperimentHostConfig) -> Self {
        Self::new(transport, config.timeout(), config.retries)
    }

    pub fn call(&self, request: &ExperimentRequest) -> Result<serde_json::Value, BridgeError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.transport.request(request, self.timeout) {
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() => {
                    if attempts > self.max_retries {
                        error!(
                            iteration = request.iter_count,
                            attempts,
                            "experiment host did not answer, giving up"
                        );
                        return Err(BridgeError::Unrecoverable {
                            attempts,
                            source: e,
                        });
                    }
                    warn!(
                        iteration = request.iter_count,
                        attempt = attempts,
                        max_retries = self.max_retries,
                        "experiment request timed out, retrying"
                    );
                }
                Err(e) => return Err(BridgeError::Request(e)),
            }
        }
    }
}

impl std::fmt::Debug for RetryingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingRequest")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_types::TransportError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    /// Times out for the first `failures` calls, then acknowledges.
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    impl ExperimentTransport for FlakyTransport {
        fn request(
            &self,
            _request: &ExperimentRequest,
            timeout: Duration,
        ) -> Result<serde_json::Value, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            } else {
                Ok(serde_json::json!({ "ok": true }))
            }
        }
    }

    struct RefusingTransport {
        calls: AtomicU32,
    }

    impl ExperimentTransport for RefusingTransport {
        fn request(
            &self,
            _request: &ExperimentRequest,
            _timeout: Duration,
        ) -> Result<serde_json::Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Connection {
                message: "connection refused".into(),
            })
        }
    }

    fn request() -> ExperimentRequest {
        ExperimentRequest {
            run_id: Uuid::new_v4(),
            iter_count: 7,
            mloop_params: vec![1.0],
            config: serde_json::Value::Null,
        }
    }

    #[test]
    fn always_timing_out_makes_exactly_retries_plus_one_attempts() {
        let transport = FlakyTransport::new(u32::MAX);
        let retrying = RetryingRequest::new(transport.clone(), Duration::from_millis(1), 3);

        let err = retrying.call(&request()).unwrap_err();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
        match err {
            BridgeError::Unrecoverable { attempts, source } => {
                assert_eq!(attempts, 4);
                assert!(source.is_timeout());
            }
            other => panic!("expected unrecoverable error, got {other:?}"),
        }
    }

    #[test]
    fn succeeds_after_transient_timeouts() {
        let transport = FlakyTransport::new(2);
        let retrying = RetryingRequest::new(transport.clone(), Duration::from_millis(1), 20);

        let response = retrying.call(&request()).unwrap();

        assert_eq!(response["ok"], true);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let transport = FlakyTransport::new(u32::MAX);
        let retrying = RetryingRequest::new(transport.clone(), Duration::from_millis(1), 0);

        assert!(matches!(
            retrying.call(&request()),
            Err(BridgeError::Unrecoverable { attempts: 1, .. })
        ));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_timeout_failure_is_not_retried() {
        let transport = Arc::new(RefusingTransport {
            calls: AtomicU32::new(0),
        });
        let retrying = RetryingRequest::new(transport.clone(), Duration::from_millis(1), 20);

        let err = retrying.call(&request()).unwrap_err();

        assert!(matches!(err, BridgeError::Request(TransportError::Connection { .. })));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
