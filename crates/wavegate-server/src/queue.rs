//! Bounded payload queues between a connection and its handler.
//!
//! Each connection owns two queues: the inbound queue is filled by the
//! ingestion loop and drained by the handler, the outbound queue is filled
//! by the handler and drained by the emission loop. Both are bounded, so a
//! slow consumer suspends its producer.
//!
//! Closing a queue wakes every pending operation on it. Pending and later
//! sends fail with [`WsError::QueueClosed`]; receives return `None` once no
//! buffered payload is left.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use wavegate_proto::{WsError, WsResult};

/// Handler-side view of the inbound queue.
pub type Inbound = PayloadReceiver;

/// Handler-side view of the outbound queue.
pub type Outbound = PayloadSender;

/// Create a queue holding at most `capacity` payloads.
pub fn payload_queue(capacity: usize) -> (PayloadSender, PayloadReceiver, QueueCloser) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        PayloadSender {
            tx,
            closed: closed_rx.clone(),
        },
        PayloadReceiver {
            rx,
            closed: closed_rx,
        },
        QueueCloser { closed: closed_tx },
    )
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // A dropped closer ends the queue as well.
    let _ = closed.wait_for(|c| *c).await;
}

/// Producer end of a payload queue.
#[derive(Debug, Clone)]
pub struct PayloadSender {
    tx: mpsc::Sender<Bytes>,
    closed: watch::Receiver<bool>,
}

impl PayloadSender {
    /// Push a payload, waiting while the queue is full.
    pub async fn send(&self, payload: impl Into<Bytes>) -> WsResult<()> {
        let mut closed = self.closed.clone();
        if *closed.borrow_and_update() {
            return Err(WsError::QueueClosed);
        }

        tokio::select! {
            biased;
            () = wait_closed(&mut closed) => Err(WsError::QueueClosed),
            sent = self.tx.send(payload.into()) => sent.map_err(|_| WsError::QueueClosed),
        }
    }

    /// Check if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }
}

/// What the emission side observed on the outbound queue.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Next {
    /// A payload to transmit.
    Payload(Bytes),
    /// Every producer is gone and the queue is empty.
    Drained,
    /// The queue was closed.
    Closed,
}

/// Consumer end of a payload queue.
#[derive(Debug)]
pub struct PayloadReceiver {
    rx: mpsc::Receiver<Bytes>,
    closed: watch::Receiver<bool>,
}

impl PayloadReceiver {
    /// Pop the next payload, waiting while the queue is empty.
    ///
    /// Payloads buffered before the queue was closed are still returned.
    /// Returns `None` once the queue is closed and empty, or every producer
    /// has gone away.
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::select! {
            biased;
            payload = self.rx.recv() => payload,
            () = wait_closed(&mut self.closed) => None,
        }
    }

    /// Check if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Pop for transmission: a closed queue yields nothing further, even if
    /// payloads are still buffered.
    pub(crate) async fn next(&mut self) -> Next {
        tokio::select! {
            biased;
            () = wait_closed(&mut self.closed) => Next::Closed,
            payload = self.rx.recv() => payload.map_or(Next::Drained, Next::Payload),
        }
    }
}

/// Closes a payload queue.
#[derive(Debug)]
pub struct QueueCloser {
    closed: watch::Sender<bool>,
}

impl QueueCloser {
    /// Close the queue, waking every pending operation. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Check if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}
