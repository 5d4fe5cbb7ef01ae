//! Appending to room history and fanning events out to room members.
//!
//! Every operation here holds the room lock from the history mutation until
//! the last member's frame is queued, which is what gives each room a single
//! total order of events.

use log::debug;

use crate::error::{RelayError, Result};
use crate::messages::{ChatMessage, ServerMessage};
use crate::outbound::Delivery;
use crate::room::{Room, RoomStore};
use crate::server::Server;

/// Queues `message` for every member of `room`, serializing it once.
/// Returns how many members it was queued for.
pub fn fan_out(room: &Room, message: &ServerMessage) -> usize {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            debug!("Failed to serialize broadcast for {}: {}", room.id, e);
            return 0;
        }
    };
    room.members()
        .filter(|member| member.send_text(text.clone()) == Delivery::Queued)
        .count()
}

impl Server {
    /// Appends a message to the channel history and delivers it to every
    /// member, the sender's own connection included. Clients are expected
    /// to deduplicate by message id.
    ///
    /// Only members may publish, so rooms come into being through joins alone.
    pub async fn publish(&self, connection_id: &str, room_id: &str, mut message: ChatMessage) -> Result<()> {
        if message.id.trim().is_empty() {
            return Err(RelayError::InvalidRequest("message id is required".into()));
        }
        match self.registry.user_id(connection_id).await {
            Some(user_id) => message.user_id = user_id,
            None if message.user_id.trim().is_empty() => {
                return Err(RelayError::InvalidRequest("message userId is required".into()));
            }
            None => {}
        }

        RoomStore::validate_room_id(room_id)?;
        let not_joined = || RelayError::InvalidRequest(format!("join {room_id} before publishing to it"));
        let mut room = self.channels.lock_existing(room_id).await.ok_or_else(not_joined)?;
        if !room.is_member(connection_id) {
            return Err(not_joined());
        }
        if room.contains_message(&message.id) {
            return Err(RelayError::InvalidRequest(format!(
                "message {} already exists in {room_id}",
                message.id
            )));
        }
        room.append(message.clone());
        let delivered = fan_out(
            &room,
            &ServerMessage::NewMessage {
                room_id: room_id.to_string(),
                message,
            },
        );
        debug!(
            "Published to {room_id}: {delivered} recipients, {} in history",
            room.history_len()
        );
        Ok(())
    }

    /// Toggles the caller's `emoji` reaction on a message still in history.
    pub async fn react(&self, connection_id: &str, room_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        if emoji.is_empty() {
            return Err(RelayError::InvalidRequest("emoji is required".into()));
        }
        let (reactor, _) = self
            .registry
            .handle(connection_id)
            .await
            .ok_or_else(|| RelayError::InvalidRequest("connection is not registered".into()))?;

        RoomStore::validate_room_id(room_id)?;
        let mut room = self
            .channels
            .lock_existing(room_id)
            .await
            .ok_or_else(|| RelayError::UnknownMessage(message_id.to_string()))?;
        let message = room
            .message_mut(message_id)
            .ok_or_else(|| RelayError::UnknownMessage(message_id.to_string()))?;
        message.toggle_reaction(emoji, &reactor);
        let updated = message.clone();
        fan_out(
            &room,
            &ServerMessage::MessageUpdated {
                room_id: room_id.to_string(),
                message: updated,
            },
        );
        Ok(())
    }

    /// Removes a message from the history window and tells the room.
    pub async fn delete_message(&self, room_id: &str, message_id: &str) -> Result<()> {
        RoomStore::validate_room_id(room_id)?;
        let mut room = self
            .channels
            .lock_existing(room_id)
            .await
            .ok_or_else(|| RelayError::UnknownMessage(message_id.to_string()))?;
        room.remove_message(message_id)
            .ok_or_else(|| RelayError::UnknownMessage(message_id.to_string()))?;
        fan_out(
            &room,
            &ServerMessage::MessageDeleted {
                room_id: room_id.to_string(),
                message_id: message_id.to_string(),
            },
        );
        Ok(())
    }
}
