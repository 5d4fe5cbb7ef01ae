use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ConnectionId = String;
pub type RoomId = String;
pub type UserId = String;
pub type MessageId = String;

/// A chat message as it travels on the wire and sits in room history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(default)]
    pub user_id: UserId,
    pub content: String,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    /// emoji -> users who reacted with it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
}

impl ChatMessage {
    /// Adds `user` to the `emoji` reaction set, or removes it if already present.
    /// Returns whether the user is reacting after the toggle.
    pub fn toggle_reaction(&mut self, emoji: &str, user: &str) -> bool {
        let users = self.reactions.entry(emoji.to_string()).or_default();
        let reacting = if users.remove(user) {
            false
        } else {
            users.insert(user.to_string());
            true
        };
        if users.is_empty() {
            self.reactions.remove(emoji);
        }
        reacting
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "join_channel")]
    JoinChannel { room_id: RoomId },
    #[serde(rename = "leave_channel")]
    LeaveChannel { room_id: RoomId },
    #[serde(rename = "send_message")]
    SendMessage {
        room_id: RoomId,
        message: ChatMessage,
    },
    #[serde(rename = "react")]
    React {
        room_id: RoomId,
        message_id: MessageId,
        emoji: String,
    },
    #[serde(rename = "delete_message")]
    DeleteMessage {
        room_id: RoomId,
        message_id: MessageId,
    },
    #[serde(rename = "call:join")]
    CallJoin { room_id: RoomId },
    #[serde(rename = "call:leave")]
    CallLeave { room_id: RoomId },
    #[serde(rename = "call:signal")]
    CallSignal {
        target_user_id: UserId,
        room_id: RoomId,
        signal: Value,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected {
        connection_id: ConnectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    #[serde(rename = "history")]
    History {
        room_id: RoomId,
        messages: Vec<ChatMessage>,
    },
    #[serde(rename = "new_message")]
    NewMessage {
        room_id: RoomId,
        message: ChatMessage,
    },
    #[serde(rename = "message_updated")]
    MessageUpdated {
        room_id: RoomId,
        message: ChatMessage,
    },
    #[serde(rename = "message_deleted")]
    MessageDeleted {
        room_id: RoomId,
        message_id: MessageId,
    },
    #[serde(rename = "call:peer-joined")]
    PeerJoined {
        room_id: RoomId,
        peer_user_id: UserId,
    },
    #[serde(rename = "call:signal")]
    Signal {
        from_user_id: UserId,
        room_id: RoomId,
        signal: Value,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_send_message_with_optional_fields_missing() {
        let raw = json!({
            "type": "send_message",
            "roomId": "general",
            "message": { "id": "m1", "userId": "alice", "content": "hello", "timestamp": 1700000000000_i64 }
        });
        let parsed: ClientMessage = serde_json::from_value(raw).unwrap();
        match parsed {
            ClientMessage::SendMessage { room_id, message } => {
                assert_eq!(room_id, "general");
                assert_eq!(message.reply_to_id, None);
                assert!(message.reactions.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn call_events_use_colon_names() {
        let raw = r#"{"type":"call:signal","targetUserId":"bob","roomId":"call_1","signal":{"sdp":"x"}}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed, ClientMessage::CallSignal { ref target_user_id, .. } if target_user_id == "bob"));

        let out = serde_json::to_value(ServerMessage::PeerJoined {
            room_id: "call_1".into(),
            peer_user_id: "bob".into(),
        })
        .unwrap();
        assert_eq!(out, json!({"type": "call:peer-joined", "roomId": "call_1", "peerUserId": "bob"}));
    }

    #[test]
    fn missing_room_id_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"join_channel"}"#).is_err());
    }

    #[test]
    fn toggling_a_reaction_twice_clears_it() {
        let mut msg = ChatMessage {
            id: "m1".into(),
            user_id: "alice".into(),
            content: "hi".into(),
            timestamp: 0,
            reply_to_id: None,
            reactions: BTreeMap::new(),
        };
        assert!(msg.toggle_reaction("👍", "bob"));
        assert!(msg.toggle_reaction("👍", "carol"));
        assert_eq!(msg.reactions["👍"].len(), 2);
        assert!(!msg.toggle_reaction("👍", "bob"));
        assert!(!msg.toggle_reaction("👍", "carol"));
        assert!(msg.reactions.is_empty());

        let wire = serde_json::to_value(&msg).unwrap();
        assert!(wire.get("reactions").is_none());
    }
}
