use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use warp::ws::{Message, WebSocket};

use crate::error::{RelayError, Result};
use crate::messages::{ChatMessage, ClientMessage, ConnectionId, ServerMessage, UserId};
use crate::outbound::{Outbound, OUTBOUND_CAPACITY};
use crate::registry::ConnectionRegistry;
use crate::room::{RoomStore, Scope};

/// How often empty rooms are swept.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Owns every piece of shared relay state. Create one per process (or per
/// test) and share it behind an `Arc`.
pub struct Server {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) channels: RoomStore,
    pub(crate) calls: RoomStore,
    outbound_capacity: usize,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self::with_outbound_capacity(OUTBOUND_CAPACITY)
    }

    pub fn with_outbound_capacity(outbound_capacity: usize) -> Self {
        Server {
            registry: ConnectionRegistry::new(),
            channels: RoomStore::new(),
            calls: RoomStore::new(),
            outbound_capacity,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub(crate) fn store(&self, scope: Scope) -> &RoomStore {
        match scope {
            Scope::Channel => &self.channels,
            Scope::Call => &self.calls,
        }
    }

    /// Chat channel store.
    pub fn channels(&self) -> &RoomStore {
        &self.channels
    }

    /// Call signaling store.
    pub fn calls(&self) -> &RoomStore {
        &self.calls
    }

    /// Periodically drops rooms with no members and no history. The task
    /// ends on its own once the server is dropped.
    pub fn spawn_room_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let server: Weak<Server> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(server) = server.upgrade() else {
                    break;
                };
                let swept = server.channels.sweep_empty().await + server.calls.sweep_empty().await;
                if swept > 0 {
                    debug!("Swept {swept} empty rooms");
                }
            }
        })
    }

    /// Registers a new connection and returns its id, outbound handle and
    /// the receiving end of its outbound queue.
    pub async fn connect(
        &self,
        user_id: Option<UserId>,
    ) -> (ConnectionId, Outbound, mpsc::Receiver<Message>) {
        let connection_id = ConnectionRegistry::next_connection_id();
        let (outbound, rx) = Outbound::channel(connection_id.clone(), self.outbound_capacity);
        self.registry
            .register(connection_id.clone(), user_id.clone(), outbound.clone())
            .await;
        outbound.send(&ServerMessage::Connected {
            connection_id: connection_id.clone(),
            user_id,
        });
        (connection_id, outbound, rx)
    }

    /// Adds the connection to a room in `scope` and records it on the
    /// connection. Both sides change under the room lock.
    pub(crate) async fn add_membership(
        &self,
        connection_id: &str,
        scope: Scope,
        room_id: &str,
    ) -> Result<(crate::room::RoomGuard, UserId, Outbound, bool)> {
        let (peer_id, outbound) = self
            .registry
            .handle(connection_id)
            .await
            .ok_or_else(|| RelayError::InvalidRequest("connection is not registered".into()))?;
        let mut room = self.store(scope).lock_or_create(room_id).await?;
        let added = room.add_member(outbound.clone());
        if !self.registry.add_room(connection_id, scope, room_id).await {
            // closed while we waited for the room
            if added {
                room.remove_member(connection_id);
            }
            return Err(RelayError::InvalidRequest("connection is not registered".into()));
        }
        Ok((room, peer_id, outbound, added))
    }

    /// Joins a chat channel and queues its history to the connection.
    ///
    /// The history frame is queued before the room lock is released, so it
    /// always precedes any `new_message` published afterwards.
    pub async fn join_room(&self, connection_id: &str, room_id: &str) -> Result<Vec<ChatMessage>> {
        let (room, _, outbound, added) = self
            .add_membership(connection_id, Scope::Channel, room_id)
            .await?;
        let messages = room.history();
        outbound.send(&ServerMessage::History {
            room_id: room_id.to_string(),
            messages: messages.clone(),
        });
        if added {
            debug!("{connection_id} joined {room_id}");
        }
        Ok(messages)
    }

    /// Leaves a room; a no-op if the connection is not a member.
    pub async fn leave_room(&self, connection_id: &str, scope: Scope, room_id: &str) -> Result<()> {
        RoomStore::validate_room_id(room_id)?;
        if let Some(mut room) = self.store(scope).lock_existing(room_id).await {
            if room.remove_member(connection_id) {
                debug!("{connection_id} left {room_id}");
            }
            self.registry.remove_room(connection_id, scope, room_id).await;
        }
        Ok(())
    }

    /// Removes the connection from every room it joined, then forgets it.
    /// Nothing is broadcast to the remaining members.
    pub async fn disconnect(&self, connection_id: &str) {
        for (scope, room_id) in self.registry.rooms_of(connection_id).await {
            if let Some(mut room) = self.store(scope).lock_existing(&room_id).await {
                room.remove_member(connection_id);
                self.registry.remove_room(connection_id, scope, &room_id).await;
            }
        }
        if self.registry.unregister(connection_id).await.is_some() {
            info!("Connection {connection_id} closed");
        }
    }

    /// Parses one text frame and dispatches it. Failures are reported to
    /// this connection only.
    pub async fn handle_text(&self, connection_id: &str, text: &str) {
        let result = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_client_message(connection_id, message).await,
            Err(e) => {
                warn!("Malformed frame from {connection_id}: {e}");
                Err(e.into())
            }
        };

        if let Err(e) = result {
            if e.is_client_visible() {
                self.send_to_connection(
                    connection_id,
                    &ServerMessage::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    },
                )
                .await;
            } else {
                debug!("Dropped request from {connection_id}: {e}");
            }
        }
    }

    pub async fn handle_client_message(&self, connection_id: &str, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::JoinChannel { room_id } => {
                self.join_room(connection_id, &room_id).await?;
            }
            ClientMessage::LeaveChannel { room_id } => {
                self.leave_room(connection_id, Scope::Channel, &room_id).await?;
            }
            ClientMessage::SendMessage { room_id, message } => {
                self.publish(connection_id, &room_id, message).await?;
            }
            ClientMessage::React {
                room_id,
                message_id,
                emoji,
            } => {
                self.react(connection_id, &room_id, &message_id, &emoji).await?;
            }
            ClientMessage::DeleteMessage { room_id, message_id } => {
                self.delete_message(&room_id, &message_id).await?;
            }
            ClientMessage::CallJoin { room_id } => {
                self.join_signaling(connection_id, &room_id).await?;
            }
            ClientMessage::CallLeave { room_id } => {
                self.leave_room(connection_id, Scope::Call, &room_id).await?;
            }
            ClientMessage::CallSignal {
                target_user_id,
                room_id,
                signal,
            } => {
                self.relay(connection_id, &target_user_id, &room_id, signal).await?;
            }
        }
        Ok(())
    }

    async fn send_to_connection(&self, connection_id: &str, message: &ServerMessage) {
        if let Some((_, outbound)) = self.registry.handle(connection_id).await {
            outbound.send(message);
        }
    }

    /// Drives one websocket until it closes, errors, or falls too far behind.
    pub async fn handle_connection(self: Arc<Self>, ws: WebSocket, user_id: Option<UserId>) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (connection_id, outbound, mut rx) = self.connect(user_id).await;
        let overflow = outbound.overflow_signal();
        drop(outbound);
        info!("New connection {connection_id}");

        let writer_id = connection_id.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    error!("Failed to send WebSocket message to {writer_id}: {e}");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let mut overflowed = false;
        loop {
            tokio::select! {
                frame = ws_rx.next() => match frame {
                    Some(Ok(msg)) => {
                        if msg.is_close() {
                            break;
                        }
                        if let Ok(text) = msg.to_str() {
                            self.handle_text(&connection_id, text).await;
                        }
                    }
                    Some(Err(e)) => {
                        let e = RelayError::from(e);
                        warn!("WebSocket error on {connection_id}: {e}");
                        break;
                    }
                    None => break,
                },
                () = overflow.notified() => {
                    overflowed = true;
                    break;
                }
            }
        }

        self.disconnect(&connection_id).await;
        if overflowed {
            // the peer stopped reading; don't wait for it to drain
            writer.abort();
        }
    }
}
