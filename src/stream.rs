//! Event multiplexing for incremental loop execution
//!
//! A loop running in its own task pushes text deltas and capability
//! lifecycle markers through one bounded channel; the consumer reads them
//! as a `Stream` in emission order. Dropping the stream closes the channel,
//! which the producer observes as cancellation on its next send.

use crate::catalog::is_internal;
use crate::error::AnalystError;
use crate::models::StreamEvent;
use crate::Result;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

pub type EventStream = ReceiverStream<StreamEvent>;

/// Producer half of an event stream.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (EventSink { tx }, ReceiverStream::new(rx))
    }

    /// Waits for channel capacity. Fails with `Cancelled` once the consumer
    /// has gone away.
    pub async fn emit(&self, event: StreamEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| AnalystError::Cancelled("event stream dropped by consumer".to_string()))
    }

    pub async fn text(&self, content: impl Into<String>) -> Result<()> {
        let content = content.into();
        if content.is_empty() {
            return Ok(());
        }
        self.emit(StreamEvent::TextDelta { content }).await
    }

    pub async fn capability_started(&self, name: &str) -> Result<()> {
        if is_internal(name) {
            return Ok(());
        }
        self.emit(StreamEvent::CapabilityStarted {
            name: name.to_string(),
        })
        .await
    }

    pub async fn capability_finished(&self, name: &str) -> Result<()> {
        if is_internal(name) {
            return Ok(());
        }
        self.emit(StreamEvent::CapabilityFinished {
            name: name.to_string(),
        })
        .await
    }

    /// Terminal event. Delivery is best effort; a gone consumer is ignored.
    pub async fn finish(self, outcome: std::result::Result<(), &AnalystError>) {
        let event = match outcome {
            Ok(()) => StreamEvent::Completed,
            Err(e) => StreamEvent::Failed {
                kind: e.kind().to_string(),
                reason: e.to_string(),
            },
        };
        let _ = self.tx.send(event).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer has dropped the stream.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
