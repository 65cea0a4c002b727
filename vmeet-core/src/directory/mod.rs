//! Room/File directory service boundary
//!
//! The directory holds the durable room and file metadata; live room state
//! in this process is reconstructed from it on demand. Failures surface as
//! typed errors to the caller; nothing here is retried.

mod http;
mod memory;

pub use http::{HttpPollReview, HttpRoomDirectory};
pub use memory::{MemoryDirectory, NullPollReview};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{RoomId, UserId};

/// Durable room metadata as the directory knows it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub owner_id: UserId,
    /// Expected participant count; the live room fills at this size
    pub expected_users: u32,
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Fetch room metadata for lazy room construction.
    async fn fetch_room(&self, room_id: &RoomId) -> Result<RoomInfo>;

    /// Notify the directory that the room is closed.
    async fn close_room(&self, room_id: &RoomId) -> Result<()>;

    /// Append a joined/left entry to the room log.
    async fn add_room_log(&self, room_id: &RoomId, user_id: &UserId, event: &str) -> Result<()>;

    /// Submit the final poll partition.
    async fn add_room_result(
        &self,
        room_id: &RoomId,
        approvers: &[UserId],
        deniers: &[UserId],
    ) -> Result<()>;

    /// Whether the user may join the room (ownership, ban list, capacity).
    async fn can_join(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool>;

    /// Register an uploaded recording in the file directory.
    async fn register_file(&self, name: &str, room_id: &RoomId, user_id: &UserId) -> Result<()>;

    /// Remove a file record.
    async fn remove_file(&self, name: &str) -> Result<()>;
}

/// One row of the review payload sent on room close
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollEntry {
    pub status: String,
    #[serde(rename = "meet_user_id")]
    pub user_id: UserId,
}

/// External review endpoint that receives the poll partition.
/// Submission is best-effort: failures are logged by the caller, never
/// retried.
#[async_trait]
pub trait PollReview: Send + Sync {
    async fn submit(&self, room_id: &RoomId, entries: &[PollEntry]) -> Result<()>;
}
