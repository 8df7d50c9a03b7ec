use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::playback::{PlaybackState, PlaybackStatus};

/// One watch-party session. Exists in the registry only while it has at
/// least one member; an emptied room is garbage collected immediately.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub members: HashSet<String>,
    pub admins: HashSet<String>,
    pub playback: PlaybackState,
}

/// Serializable view of a room, sent to clients on join and on every
/// membership or media change. Member lists are sorted so snapshots are
/// stable across broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: String,
    pub members: Vec<String>,
    pub admins: Vec<String>,
    pub status: PlaybackStatus,
    pub media_ref: Option<String>,
    pub position: f64,
    pub duration: Option<f64>,
}

impl Room {
    fn new(id: String, first_admin: String) -> Self {
        let mut admins = HashSet::new();
        admins.insert(first_admin);
        Self {
            id,
            members: HashSet::new(),
            admins,
            playback: PlaybackState::new(),
        }
    }

    pub fn is_admin(&self, connection_id: &str) -> bool {
        self.admins.contains(connection_id)
    }

    /// Grants admin rights to `target_id`. Silently refused unless the
    /// requester is an admin and the target is a current member; a target
    /// that is already an admin is a no-op. Returns whether the admin set
    /// changed.
    pub fn promote(&mut self, requester_id: &str, target_id: &str) -> bool {
        if !self.is_admin(requester_id) {
            tracing::debug!(
                room_id = %self.id,
                requester_id = %requester_id,
                "Promotion request from non-admin dropped"
            );
            return false;
        }
        if !self.members.contains(target_id) || self.admins.contains(target_id) {
            return false;
        }
        self.admins.insert(target_id.to_string());
        tracing::info!(
            room_id = %self.id,
            target_id = %target_id,
            "Member promoted to admin"
        );
        true
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let mut members: Vec<String> = self.members.iter().cloned().collect();
        let mut admins: Vec<String> = self.admins.iter().cloned().collect();
        members.sort();
        admins.sort();
        RoomSnapshot {
            id: self.id.clone(),
            members,
            admins,
            status: self.playback.status,
            media_ref: self.playback.media_ref.clone(),
            position: self.playback.position,
            duration: self.playback.duration,
        }
    }
}

/// Owned, injectable mapping from room id to room state. All access goes
/// through the engine's event loop, so no interior locking is needed.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    /// Returns the room for `room_id`, creating it if absent. The first
    /// joiner of a fresh room becomes its initial admin.
    pub fn get_or_create(&mut self, room_id: &str, first_joiner: &str) -> &mut Room {
        if !self.rooms.contains_key(room_id) {
            tracing::info!(room_id = %room_id, first_joiner = %first_joiner, "Room created");
            self.rooms.insert(
                room_id.to_string(),
                Room::new(room_id.to_string(), first_joiner.to_string()),
            );
        }
        self.rooms
            .get_mut(room_id)
            .expect("room inserted immediately above")
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    pub fn remove(&mut self, room_id: &str) -> Option<Room> {
        let room = self.rooms.remove(room_id);
        if room.is_some() {
            tracing::info!(room_id = %room_id, "Room removed");
        }
        room
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Room> {
        self.rooms.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_joiner_is_admin() {
        let mut registry = RoomRegistry::new();
        let room = registry.get_or_create("abc", "conn-a");
        assert!(room.is_admin("conn-a"));
        assert!(room.members.is_empty());
        assert_eq!(room.playback.status, PlaybackStatus::Idle);
    }

    #[test]
    fn test_get_or_create_returns_existing_room() {
        let mut registry = RoomRegistry::new();
        registry.get_or_create("abc", "conn-a").members.insert("conn-a".to_string());

        let room = registry.get_or_create("abc", "conn-b");
        assert!(room.is_admin("conn-a"));
        assert!(!room.is_admin("conn-b"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_deletes_entry() {
        let mut registry = RoomRegistry::new();
        registry.get_or_create("abc", "conn-a");
        assert!(registry.contains("abc"));
        assert!(registry.remove("abc").is_some());
        assert!(!registry.contains("abc"));
        assert!(registry.remove("abc").is_none());
    }

    #[test]
    fn test_promote_by_admin() {
        let mut registry = RoomRegistry::new();
        let room = registry.get_or_create("abc", "conn-a");
        room.members.insert("conn-a".to_string());
        room.members.insert("conn-b".to_string());

        assert!(room.promote("conn-a", "conn-b"));
        assert!(room.is_admin("conn-b"));
    }

    #[test]
    fn test_promote_by_non_admin_is_dropped() {
        let mut registry = RoomRegistry::new();
        let room = registry.get_or_create("abc", "conn-a");
        room.members.insert("conn-a".to_string());
        room.members.insert("conn-b".to_string());
        room.members.insert("conn-c".to_string());

        assert!(!room.promote("conn-b", "conn-c"));
        assert!(!room.is_admin("conn-c"));
        assert_eq!(room.admins.len(), 1);
    }

    #[test]
    fn test_promote_existing_admin_is_noop() {
        let mut registry = RoomRegistry::new();
        let room = registry.get_or_create("abc", "conn-a");
        room.members.insert("conn-a".to_string());
        assert!(!room.promote("conn-a", "conn-a"));
    }

    #[test]
    fn test_promote_non_member_is_dropped() {
        let mut registry = RoomRegistry::new();
        let room = registry.get_or_create("abc", "conn-a");
        room.members.insert("conn-a".to_string());
        assert!(!room.promote("conn-a", "conn-ghost"));
        assert!(!room.is_admin("conn-ghost"));
    }

    #[test]
    fn test_snapshot_sorts_member_lists() {
        let mut registry = RoomRegistry::new();
        let room = registry.get_or_create("abc", "conn-b");
        room.members.insert("conn-b".to_string());
        room.members.insert("conn-a".to_string());
        room.members.insert("conn-c".to_string());

        let snapshot = room.snapshot();
        assert_eq!(snapshot.members, vec!["conn-a", "conn-b", "conn-c"]);
        assert_eq!(snapshot.admins, vec!["conn-b"]);
        assert_eq!(snapshot.position, 0.0);
    }
}
