//! Per-connection outbound queue.
//!
//! Fan-out never waits on a socket: frames are pushed with `try_send` into a
//! bounded queue drained by the connection's writer task. A connection whose
//! queue fills up is told to close; the rest of the room keeps flowing.

use std::sync::Arc;

use log::warn;
use tokio::sync::{mpsc, Notify};
use warp::ws::Message;

use crate::messages::{ConnectionId, ServerMessage};

/// Frames buffered per connection before it is considered too slow.
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue was full; the connection has been asked to close.
    Overflowed,
    /// The writer side is already gone.
    Closed,
}

#[derive(Clone, Debug)]
pub struct Outbound {
    connection_id: ConnectionId,
    tx: mpsc::Sender<Message>,
    overflow: Arc<Notify>,
}

impl Outbound {
    pub fn channel(connection_id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let outbound = Outbound {
            connection_id,
            tx,
            overflow: Arc::new(Notify::new()),
        };
        (outbound, rx)
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Resolves once this connection has overflowed its queue.
    pub fn overflow_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.overflow)
    }

    pub fn send(&self, message: &ServerMessage) -> Delivery {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                warn!("Failed to serialize frame for {}: {}", self.connection_id, e);
                Delivery::Closed
            }
        }
    }

    /// Queues an already-serialized frame, so fan-out serializes once per event.
    pub fn send_text(&self, text: String) -> Delivery {
        match self.tx.try_send(Message::text(text)) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue full for {}, disconnecting slow consumer",
                    self.connection_id
                );
                self.overflow.notify_one();
                Delivery::Overflowed
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}
