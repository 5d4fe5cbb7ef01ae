//! Call signaling: presence in call rooms and peer-to-peer relay of
//! offer/answer/candidate payloads. Payloads are never inspected.

use log::debug;
use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::messages::ServerMessage;
use crate::outbound::Delivery;
use crate::room::{RoomStore, Scope};
use crate::server::Server;

impl Server {
    /// Joins a call room and tells the peers already in it who arrived.
    /// The newcomer hears nothing back; existing peers initiate the offer.
    ///
    /// Membership is not restored across reconnects, so clients rejoin on
    /// every new connection.
    pub async fn join_signaling(&self, connection_id: &str, room_id: &str) -> Result<usize> {
        let (room, peer_id, _, added) = self
            .add_membership(connection_id, Scope::Call, room_id)
            .await?;
        if !added {
            return Ok(0);
        }

        let text = serde_json::to_string(&ServerMessage::PeerJoined {
            room_id: room_id.to_string(),
            peer_user_id: peer_id.clone(),
        })?;
        let notified = room
            .members()
            .filter(|member| member.connection_id() != connection_id)
            .filter(|member| member.send_text(text.clone()) == Delivery::Queued)
            .count();
        debug!("{peer_id} joined call {room_id}, notified {notified} peers");
        Ok(notified)
    }

    /// Forwards `signal` to every connection of `target_user_id`, tagged with
    /// the sender's identity. Returns the number of connections reached.
    ///
    /// An absent target is `UnknownTarget`, which callers treat as a silent
    /// drop: delivery is best-effort and failures surface to clients as call
    /// timeouts.
    pub async fn relay(
        &self,
        connection_id: &str,
        target_user_id: &str,
        room_id: &str,
        signal: Value,
    ) -> Result<usize> {
        RoomStore::validate_room_id(room_id)?;
        if target_user_id.is_empty() {
            return Err(RelayError::InvalidRequest("targetUserId is required".into()));
        }
        let Some((from_user_id, _)) = self.registry.handle(connection_id).await else {
            return Err(RelayError::InvalidRequest("connection is not registered".into()));
        };

        let targets = self.registry.connections_of_user(target_user_id).await;
        if targets.is_empty() {
            return Err(RelayError::UnknownTarget(target_user_id.to_string()));
        }

        let text = serde_json::to_string(&ServerMessage::Signal {
            from_user_id: from_user_id.clone(),
            room_id: room_id.to_string(),
            signal,
        })?;
        let reached = targets
            .iter()
            .filter(|target| target.send_text(text.clone()) == Delivery::Queued)
            .count();
        debug!("Relayed signal {from_user_id} -> {target_user_id} in {room_id} ({reached} connections)");
        Ok(reached)
    }
}
