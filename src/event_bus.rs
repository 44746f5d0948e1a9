//! Bounded, ordered delivery of progress events to a session's connection.
//!
//! Any number of runs hold an [EventSender]. Exactly one task owns the [EventReceiver] and the
//! outbound connection, and writes events to it one at a time in the order they were enqueued.
//! A full buffer blocks producers rather than dropping events.

use crate::error::PitwallError;
use crate::events::Event;
use crate::metrics::{EVENTS_DELIVERED, EVENTS_DROPPED};

use std::fmt::Display;

use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Create an event bus holding at most `capacity` pending events.
///
/// Once `cancel` fires, producers stop enqueueing and see [PitwallError::SessionClosed].
pub fn channel(capacity: usize, cancel: CancellationToken) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx, cancel }, EventReceiver { rx })
}

/// Producer side of the bus. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl EventSender {
    /// Enqueue an event, waiting for buffer space if necessary.
    ///
    /// Fails if the session is closing or the forwarder has gone away, so that a producer never
    /// waits on a buffer that will not drain.
    pub async fn send(&self, event: Event) -> Result<(), PitwallError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PitwallError::SessionClosed),
            result = self.tx.send(event) => result.map_err(|_| PitwallError::SessionClosed),
        }
    }

    /// Enqueue an event from a blocking thread.
    ///
    /// Blocks until there is buffer space, giving up as soon as the session closes. Must not be
    /// called from within an async context.
    pub fn blocking_send(&self, event: Event) -> Result<(), PitwallError> {
        futures::executor::block_on(self.send(event))
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Consumer side of the bus.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

/// Outcome of forwarding a session's events.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct ForwardStats {
    /// Events written to the sink
    pub delivered: usize,
    /// Events discarded because the sink failed
    pub dropped: usize,
}

impl EventReceiver {
    /// Serialise each event and write it to `sink` until every sender is gone.
    ///
    /// If a write fails the bus is closed, so blocked and future producers fail instead of
    /// waiting, and whatever is still buffered is discarded. The sink is closed on return.
    pub async fn forward<S>(mut self, mut sink: S) -> ForwardStats
    where
        S: Sink<String> + Unpin,
        S::Error: Display,
    {
        let mut stats = ForwardStats::default();
        while let Some(event) = self.rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!("failed to serialise event: {}", err);
                    stats.dropped += 1;
                    continue;
                }
            };
            if let Err(err) = sink.send(text).await {
                tracing::warn!("failed to write event, closing bus: {}", err);
                stats.dropped += 1;
                break;
            }
            stats.delivered += 1;
            EVENTS_DELIVERED.inc();
        }

        self.rx.close();
        while self.rx.try_recv().is_ok() {
            stats.dropped += 1;
        }
        EVENTS_DROPPED.inc_by(stats.dropped as u64);
        if let Err(err) = sink.close().await {
            tracing::debug!("failed to close sink: {}", err);
        }
        tracing::debug!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            "event forwarder finished"
        );
        stats
    }
}
