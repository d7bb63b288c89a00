use crate::error::{AvrError, Result};
use crate::value::Value;
use tokio::sync::broadcast;

/// Notification published by a target
///
/// Subscribers receive a replay of the current variable state on
/// subscription, then live notifications.
#[derive(Debug, Clone)]
pub enum VarEvent {
    /// The transport established a connection
    Connected,
    /// The transport lost its connection
    Disconnected,
    /// A variable's value differs from its previous one
    Changed { id: String, value: Value },
    /// A variable transitioned from unset to set
    Set { id: String, value: Value },
    /// A variable's cached value was cleared
    Unset { id: String },
    /// A variable was written, whether or not the value differs
    Processed { id: String, value: Value },
    /// A value update for a variable went out on the wire
    Sent { id: String },
    /// A raw inbound line, before dispatch
    Line { raw: String },
}

/// Receiver for target events
pub struct EventReceiver {
    rx: broadcast::Receiver<VarEvent>,
    /// Replay of the state at subscription time, drained first
    replay: std::collections::VecDeque<VarEvent>,
}

impl EventReceiver {
    pub(crate) fn new(replay: Vec<VarEvent>, rx: broadcast::Receiver<VarEvent>) -> Self {
        Self {
            rx,
            replay: replay.into(),
        }
    }

    /// Receive the next event
    pub async fn recv(&mut self) -> Result<VarEvent> {
        if let Some(event) = self.replay.pop_front() {
            return Ok(event);
        }
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => AvrError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                tracing::warn!("event receiver lagged by {} events", n);
                AvrError::ConnectionClosed
            }
        })
    }

    /// Receive an event without blocking, `None` if nothing is queued
    pub fn try_recv(&mut self) -> Result<Option<VarEvent>> {
        if let Some(event) = self.replay.pop_front() {
            return Ok(Some(event));
        }
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(AvrError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                tracing::warn!("event receiver lagged by {} events", n);
                Err(AvrError::ConnectionClosed)
            }
        }
    }
}
