//! Queue — decouples the Grabber (producer) from the SQL Writer (single
//! consumer) via a bounded channel that preserves FIFO ordering and
//! single-producer/single-consumer semantics while adding natural
//! backpressure instead of unbounded growth.

use crate::grabber::Variable;
use tokio::sync::mpsc;

/// Channel capacity, chosen generously (documented as an Open Question
/// resolution in DESIGN.md) so a slow writer cycle doesn't stall the
/// grabber under normal load.
pub const QUEUE_CAPACITY: usize = 4096;

/// Producer half, held by the Grabber.
#[derive(Clone)]
pub struct QueueSender(mpsc::Sender<Variable>);

/// Consumer half, held by the SQL Writer. There is exactly one.
pub struct QueueReceiver(mpsc::Receiver<Variable>);

/// Builds a bounded single-producer/single-consumer channel.
pub fn channel() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (QueueSender(tx), QueueReceiver(rx))
}

impl QueueSender {
    /// Enqueues a sample, waiting for room if the queue is full. This keeps
    /// the grabber from outrunning the writer indefinitely.
    pub async fn enqueue(&self, sample: Variable) -> Result<(), Variable> {
        self.0.send(sample).await.map_err(|e| e.0)
    }
}

impl QueueReceiver {
    /// Blocks until the next sample is available, or returns `None` once
    /// every sender has been dropped (daemon shutdown).
    pub async fn dequeue(&mut self) -> Option<Variable> {
        self.0.recv().await
    }
}
