//! Per-connection signaling channel
//!
//! The WebSocket itself lives in the transport layer; everything inside the
//! room only ever sees this handle. It serializes concurrent writers through
//! an unbounded queue so offers can be sent while the room lock is held
//! without waiting on the network.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use vmeet_core::error::{Error, Result};

use crate::message::{Envelope, Notification};

/// Outbound frame handed to the socket writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutFrame {
    Text(String),
    Close,
}

/// Cloneable send half of a signaling connection.
#[derive(Debug, Clone)]
pub struct SignalChannel {
    tx: mpsc::UnboundedSender<OutFrame>,
}

impl SignalChannel {
    /// Create a channel pair. The receiver is drained by the socket writer
    /// task; a dropped receiver makes every later send fail.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue any serializable message as a text frame.
    pub fn send_json<T: Serialize>(&self, message: &T) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.tx
            .send(OutFrame::Text(text))
            .map_err(|_| Error::Unavailable("signaling channel closed".to_string()))
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.send_json(envelope)
    }

    pub fn notify(&self, notification: &Notification) -> Result<()> {
        self.send_json(notification)
    }

    /// Ask the writer task to close the socket. Idempotent.
    pub fn close(&self) {
        if self.tx.send(OutFrame::Close).is_err() {
            debug!("signaling channel already closed");
        }
    }

    /// Whether the socket writer is still draining the queue.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_envelope_queues_text_frame() {
        let (channel, mut rx) = SignalChannel::new();
        channel
            .send_envelope(&Envelope::offer(r#"{"type":"offer"}"#))
            .expect("send");

        match rx.recv().await {
            Some(OutFrame::Text(text)) => {
                let value: serde_json::Value = serde_json::from_str(&text).expect("json");
                assert_eq!(value["event"], "offer");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_queues_close_frame() {
        let (channel, mut rx) = SignalChannel::new();
        channel.close();
        assert_eq!(rx.recv().await, Some(OutFrame::Close));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_fails() {
        let (channel, rx) = SignalChannel::new();
        drop(rx);
        assert!(!channel.is_open());
        let err = channel
            .notify(&Notification::new("message", json!("hi")))
            .expect_err("closed");
        assert_eq!(err.code(), 14);
    }
}
