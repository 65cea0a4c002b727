//! In-memory directory for standalone mode and tests

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{PollEntry, PollReview, RoomDirectory, RoomInfo};
use crate::error::{Error, Result};
use crate::models::{RoomId, UserId};

/// Directory backed by process memory. Rooms are seeded up front; the
/// mutating calls record what the engine reported so tests can assert on it.
#[derive(Default)]
pub struct MemoryDirectory {
    rooms: DashMap<RoomId, RoomInfo>,
    closed: Mutex<Vec<RoomId>>,
    logs: Mutex<Vec<(RoomId, UserId, String)>>,
    results: Mutex<Vec<(RoomId, Vec<UserId>, Vec<UserId>)>>,
    files: DashMap<String, (RoomId, UserId)>,
    banned: DashMap<(RoomId, UserId), ()>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_room(&self, info: RoomInfo) {
        self.rooms.insert(info.room_id.clone(), info);
    }

    pub fn ban(&self, room_id: RoomId, user_id: UserId) {
        self.banned.insert((room_id, user_id), ());
    }

    #[must_use]
    pub fn closed_rooms(&self) -> Vec<RoomId> {
        self.closed.lock().clone()
    }

    #[must_use]
    pub fn room_logs(&self) -> Vec<(RoomId, UserId, String)> {
        self.logs.lock().clone()
    }

    #[must_use]
    pub fn results(&self) -> Vec<(RoomId, Vec<UserId>, Vec<UserId>)> {
        self.results.lock().clone()
    }

    #[must_use]
    pub fn registered_files(&self) -> Vec<String> {
        self.files.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl RoomDirectory for MemoryDirectory {
    async fn fetch_room(&self, room_id: &RoomId) -> Result<RoomInfo> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("room {room_id} not found")))
    }

    async fn close_room(&self, room_id: &RoomId) -> Result<()> {
        self.closed.lock().push(room_id.clone());
        Ok(())
    }

    async fn add_room_log(&self, room_id: &RoomId, user_id: &UserId, event: &str) -> Result<()> {
        self.logs
            .lock()
            .push((room_id.clone(), user_id.clone(), event.to_string()));
        Ok(())
    }

    async fn add_room_result(
        &self,
        room_id: &RoomId,
        approvers: &[UserId],
        deniers: &[UserId],
    ) -> Result<()> {
        self.results
            .lock()
            .push((room_id.clone(), approvers.to_vec(), deniers.to_vec()));
        Ok(())
    }

    async fn can_join(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        if self.banned.contains_key(&(room_id.clone(), user_id.clone())) {
            return Ok(false);
        }
        Ok(self.rooms.contains_key(room_id))
    }

    async fn register_file(&self, name: &str, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        self.files
            .insert(name.to_string(), (room_id.clone(), user_id.clone()));
        Ok(())
    }

    async fn remove_file(&self, name: &str) -> Result<()> {
        self.files.remove(name);
        Ok(())
    }
}

/// Poll review sink that accepts everything.
#[derive(Default)]
pub struct NullPollReview {
    submissions: Mutex<Vec<(RoomId, Vec<PollEntry>)>>,
}

impl NullPollReview {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn submissions(&self) -> usize {
        self.submissions.lock().len()
    }
}

#[async_trait]
impl PollReview for NullPollReview {
    async fn submit(&self, room_id: &RoomId, entries: &[PollEntry]) -> Result<()> {
        self.submissions
            .lock()
            .push((room_id.clone(), entries.to_vec()));
        Ok(())
    }
}
