use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use log::trace;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{RelayError, Result};
use crate::messages::{ChatMessage, ConnectionId, RoomId};
use crate::outbound::Outbound;

/// Which kind of room a membership refers to. Chat channels and call
/// signaling rooms live in separate stores, so the same id can name both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Channel,
    Call,
}

/// Messages retained per room; older ones are evicted first.
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    history: VecDeque<ChatMessage>,
    members: HashMap<ConnectionId, Outbound>,
    /// Set by the sweeper when the room leaves the store. A guard on a
    /// retired room is stale and must be looked up again.
    retired: bool,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Room {
            id,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            members: HashMap::new(),
            retired: false,
        }
    }

    /// Returns `true` if the connection was not already a member.
    pub fn add_member(&mut self, outbound: Outbound) -> bool {
        self.members
            .insert(outbound.connection_id().to_string(), outbound)
            .is_none()
    }

    pub fn remove_member(&mut self, connection_id: &str) -> bool {
        self.members.remove(connection_id).is_some()
    }

    pub fn is_member(&self, connection_id: &str) -> bool {
        self.members.contains_key(connection_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Outbound> {
        self.members.values()
    }

    pub fn member_ids(&self) -> HashSet<ConnectionId> {
        self.members.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.history.is_empty()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn contains_message(&self, message_id: &str) -> bool {
        self.history.iter().any(|m| m.id == message_id)
    }

    /// Appends to history, returning the evicted entry once the bound is exceeded.
    pub fn append(&mut self, message: ChatMessage) -> Option<ChatMessage> {
        self.history.push_back(message);
        if self.history.len() > HISTORY_LIMIT {
            let evicted = self.history.pop_front();
            if let Some(m) = &evicted {
                trace!("Room {} evicted message {}", self.id, m.id);
            }
            evicted
        } else {
            None
        }
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut ChatMessage> {
        self.history.iter_mut().find(|m| m.id == message_id)
    }

    pub fn remove_message(&mut self, message_id: &str) -> Option<ChatMessage> {
        let index = self.history.iter().position(|m| m.id == message_id)?;
        self.history.remove(index)
    }
}

pub type RoomGuard = OwnedMutexGuard<Room>;

/// Rooms keyed by id, each behind its own lock so membership changes and
/// fan-out for one room are serialized without blocking other rooms.
#[derive(Default)]
pub struct RoomStore {
    rooms: RwLock<HashMap<RoomId, Arc<Mutex<Room>>>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate_room_id(room_id: &str) -> Result<()> {
        if room_id.trim().is_empty() {
            return Err(RelayError::InvalidRoomId);
        }
        Ok(())
    }

    async fn lookup(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Locks the room, creating it first if needed.
    ///
    /// The map guard is released before waiting on the room, so a busy room
    /// never holds up lookups of other rooms. A room swept in between is
    /// seen as retired and looked up again.
    pub async fn lock_or_create(&self, room_id: &str) -> Result<RoomGuard> {
        Self::validate_room_id(room_id)?;
        loop {
            let room = match self.lookup(room_id).await {
                Some(room) => room,
                None => {
                    let mut rooms = self.rooms.write().await;
                    Arc::clone(
                        rooms
                            .entry(room_id.to_string())
                            .or_insert_with(|| Arc::new(Mutex::new(Room::new(room_id.to_string())))),
                    )
                }
            };
            let guard = room.lock_owned().await;
            if !guard.retired {
                return Ok(guard);
            }
        }
    }

    pub async fn lock_existing(&self, room_id: &str) -> Option<RoomGuard> {
        loop {
            let guard = self.lookup(room_id).await?.lock_owned().await;
            if !guard.retired {
                return Some(guard);
            }
        }
    }

    /// Current members; an unknown room has none.
    pub async fn members_of(&self, room_id: &str) -> HashSet<ConnectionId> {
        match self.lock_existing(room_id).await {
            Some(room) => room.member_ids(),
            None => HashSet::new(),
        }
    }

    /// Current history, oldest first; an unknown room has none.
    pub async fn history_of(&self, room_id: &str) -> Vec<ChatMessage> {
        match self.lock_existing(room_id).await {
            Some(room) => room.history(),
            None => Vec::new(),
        }
    }

    /// Drops rooms with no members and no history. Rooms that are busy are
    /// skipped and picked up on a later pass.
    pub async fn sweep_empty(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|_, room| match room.try_lock() {
            Ok(mut room) if room.is_empty() => {
                room.retired = true;
                false
            }
            _ => true,
        });
        before - rooms.len()
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
