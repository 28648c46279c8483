//! Handoff queue from analysis triggers to the optimizer thread.

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use ms_types::Measurement;

/// Unbounded FIFO of measurements.
///
/// `push` never blocks. `pop` blocks until a measurement is available. Clones
/// share the same queue, so a trigger context and the bridge can each hold one.
#[derive(Debug, Clone)]
pub struct ResultChannel {
    tx: Sender<Measurement>,
    rx: Receiver<Measurement>,
}

impl ResultChannel {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, measurement: Measurement) {
        debug!(%measurement, queued = self.rx.len(), "measurement pushed");
        // Both ends live in `self`, so the queue cannot be disconnected here.
        let _ = self.tx.send(measurement);
    }

    /// Block until the next measurement. `None` only if every sender is gone.
    pub fn pop(&self) -> Option<Measurement> {
        let measurement = self.rx.recv().ok()?;
        debug!(%measurement, "measurement popped");
        Some(measurement)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for ResultChannel {
    fn default() -> Self {
        Self::new()
    }
}
