//! Executor event stream.
//!
//! Each graph invocation gets a bounded event channel. Nodes emit per-token
//! LLM deltas and tool lifecycle events through [`EventSender`]; the
//! transport consumes the other end, filters stream deltas to its
//! output-node whitelist, and serializes to the wire.
//!
//! Back-pressure: the channel is bounded (transport uses 64). When a send
//! cannot complete within the grace period the invocation is dropped with a
//! back-pressure error instead of buffering without limit.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::OrchestratorError;

/// Default bound of the executor → transport queue.
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// How long one event send may wait on a full queue before the invocation
/// is dropped.
pub const SEND_GRACE: Duration = Duration::from_secs(5);

/// One fine-grained executor event.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecEvent {
    /// One partial token produced by an LLM call inside `node`.
    ChatModelStream { node: String, delta: String },
    ToolStart { name: String },
    ToolEnd { name: String },
    NodeStart { node: String },
    NodeEnd { node: String },
}

/// Bounded sender handed to nodes via the run context.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<ExecEvent>,
}

impl EventSender {
    /// Creates a bounded event channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ExecEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Sends one event, waiting at most [`SEND_GRACE`] on a full queue.
    ///
    /// A closed receiver (client gone) and a persistently full queue both
    /// fail the invocation; partial output already delivered stays with the
    /// client.
    pub async fn emit(&self, event: ExecEvent) -> Result<(), OrchestratorError> {
        self.tx
            .send_timeout(event, SEND_GRACE)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => {
                    OrchestratorError::BackPressure("event queue full".into())
                }
                mpsc::error::SendTimeoutError::Closed(_) => {
                    OrchestratorError::BackPressure("event receiver closed".into())
                }
            })
    }

    /// Per-token delta from an LLM call inside `node`.
    pub async fn chat_delta(
        &self,
        node: &str,
        delta: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        self.emit(ExecEvent::ChatModelStream {
            node: node.to_string(),
            delta: delta.into(),
        })
        .await
    }

    pub async fn tool_start(&self, name: &str) -> Result<(), OrchestratorError> {
        self.emit(ExecEvent::ToolStart {
            name: name.to_string(),
        })
        .await
    }

    pub async fn tool_end(&self, name: &str) -> Result<(), OrchestratorError> {
        self.emit(ExecEvent::ToolEnd {
            name: name.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: emitted events arrive in order on the receiver.
    #[tokio::test]
    async fn events_arrive_in_order() {
        let (tx, mut rx) = EventSender::channel(8);
        tx.chat_delta("chatbot", "he").await.unwrap();
        tx.tool_start("get_current_time").await.unwrap();
        tx.tool_end("get_current_time").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ExecEvent::ChatModelStream {
                node: "chatbot".into(),
                delta: "he".into()
            }
        );
        assert!(matches!(rx.recv().await.unwrap(), ExecEvent::ToolStart { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ExecEvent::ToolEnd { .. }));
    }

    /// **Scenario**: a closed receiver fails the send with a back-pressure
    /// error instead of hanging.
    #[tokio::test]
    async fn closed_receiver_fails_send() {
        let (tx, rx) = EventSender::channel(1);
        drop(rx);
        let err = tx.chat_delta("chatbot", "x").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::BackPressure(_)));
    }
}
