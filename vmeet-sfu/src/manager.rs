//! Room lifecycle management
//!
//! The room table is the single arbiter of teardown: whichever caller
//! removes the entry (expiry sweep, last-peer disconnect, owner close)
//! performs the destructive teardown, everyone else observes absence and
//! no-ops.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vmeet_core::directory::{PollReview, RoomDirectory};
use vmeet_core::error::{Error, Result};
use vmeet_core::models::RoomId;

use crate::room::Room;
use crate::signal::dispatch_keyframes;

pub struct RoomManager {
    rooms: DashMap<RoomId, Arc<Room>>,
    directory: Arc<dyn RoomDirectory>,
    poll_review: Arc<dyn PollReview>,
}

impl RoomManager {
    pub fn new(directory: Arc<dyn RoomDirectory>, poll_review: Arc<dyn PollReview>) -> Self {
        Self {
            rooms: DashMap::new(),
            directory,
            poll_review,
        }
    }

    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| Arc::clone(&r))
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|r| r.key().clone()).collect()
    }

    /// Return the live room, building it from directory metadata on first
    /// join. Two racing joins converge on one instance.
    pub async fn get_or_create(&self, room_id: &RoomId) -> Result<Arc<Room>> {
        if let Some(room) = self.get(room_id) {
            return Ok(room);
        }
        let info = self.directory.fetch_room(room_id).await?;
        let room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(Room::new(info)));
        Ok(Arc::clone(&room))
    }

    /// Called when a peer transport reaches the connected state; drives the
    /// room's fill detection.
    pub async fn peer_connected(&self, room: &Room) {
        let live = room.peers.lock().await.connections.len();
        room.mark_filled_if_ready(live);
    }

    /// Called after a session deregisters its peer. Tears the room down if
    /// it is now empty; skipped silently when the expiry sweep already
    /// removed it.
    pub async fn handle_peer_departure(&self, room: &Arc<Room>) {
        let empty = room.peers.lock().await.connections.is_empty();
        if empty {
            self.teardown(&room.id).await;
        }
    }

    /// Owner-only expiry override, `data` is a unix-seconds string.
    pub fn override_expiry(&self, room: &Room, unix_seconds: &str) -> Result<()> {
        let seconds: i64 = unix_seconds
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad expiry timestamp: {unix_seconds}")))?;
        let at = DateTime::<Utc>::from_timestamp(seconds, 0)
            .ok_or_else(|| Error::InvalidInput(format!("expiry out of range: {seconds}")))?;
        room.set_expiry(at);
        info!(room_id = %room.id, expiry = %at, "room expiry overridden");
        Ok(())
    }

    /// Destructive teardown. Exactly one caller wins the removal; the order
    /// is poll submission, directory close, then connection closure.
    /// Returns false if the room was already gone.
    pub async fn teardown(&self, room_id: &RoomId) -> bool {
        let Some((_, room)) = self.rooms.remove(room_id) else {
            debug!(%room_id, "teardown skipped, room already removed");
            return false;
        };

        self.submit_poll(&room).await;

        if let Err(err) = self.directory.close_room(room_id).await {
            warn!(%room_id, error = %err, "directory close notification failed");
        }

        room.broadcast_notify("close", json!("meeting closed")).await;

        let peers: Vec<_> = {
            let mut set = room.peers.lock().await;
            set.track_locals.clear();
            std::mem::take(&mut set.connections)
        };
        for peer in peers {
            peer.close().await;
        }

        info!(%room_id, "room torn down");
        true
    }

    /// Best-effort poll submission to the directory and the external review
    /// endpoint. Failures are logged, never retried.
    async fn submit_poll(&self, room: &Room) {
        let (approvers, deniers) = room.tally();
        if let Err(err) = self
            .directory
            .add_room_result(&room.id, &approvers, &deniers)
            .await
        {
            warn!(room_id = %room.id, error = %err, "poll result submission failed");
        }
        if let Err(err) = self.poll_review.submit(&room.id, &room.poll_entries()).await {
            warn!(room_id = %room.id, error = %err, "poll review submission failed");
        }
    }

    /// Tear down every room whose expiry timestamp has passed.
    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        let expired: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        for room_id in expired {
            info!(%room_id, "room expired");
            self.teardown(&room_id).await;
        }
    }

    /// Background expiry sweep, one pass per `interval`.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.sweep_expired().await;
            }
        })
    }

    /// Background keyframe dispatch across all rooms, one pass per
    /// `interval`.
    pub fn spawn_keyframe_dispatcher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let rooms: Vec<Arc<Room>> =
                    manager.rooms.iter().map(|e| Arc::clone(e.value())).collect();
                for room in rooms {
                    dispatch_keyframes(&room).await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmeet_core::directory::{MemoryDirectory, NullPollReview, RoomInfo};
    use vmeet_core::models::UserId;

    fn manager_with(
        rooms: &[(&str, &str, u32)],
    ) -> (Arc<RoomManager>, Arc<MemoryDirectory>, Arc<NullPollReview>) {
        let directory = Arc::new(MemoryDirectory::new());
        for (room, owner, expected) in rooms {
            directory.seed_room(RoomInfo {
                room_id: RoomId::from(*room),
                owner_id: UserId::from(*owner),
                expected_users: *expected,
            });
        }
        let review = Arc::new(NullPollReview::new());
        let manager = Arc::new(RoomManager::new(
            Arc::clone(&directory) as Arc<dyn RoomDirectory>,
            Arc::clone(&review) as Arc<dyn PollReview>,
        ));
        (manager, directory, review)
    }

    #[tokio::test]
    async fn test_get_or_create_is_lazy_and_cached() {
        let (manager, _, _) = manager_with(&[("r1", "owner", 2)]);
        assert!(manager.get(&RoomId::from("r1")).is_none());

        let first = manager.get_or_create(&RoomId::from("r1")).await.expect("room");
        let second = manager.get_or_create(&RoomId::from("r1")).await.expect("room");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.room_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_room_surfaces_directory_error() {
        let (manager, _, _) = manager_with(&[]);
        let err = match manager.get_or_create(&RoomId::from("nope")).await {
            Ok(_) => panic!("expected a missing-room error"),
            Err(err) => err,
        };
        assert_eq!(err.code(), 5);
    }

    #[tokio::test]
    async fn test_teardown_exactly_once() {
        let (manager, directory, review) = manager_with(&[("r1", "owner", 2)]);
        let room = manager.get_or_create(&RoomId::from("r1")).await.expect("room");
        room.init_ballot(&UserId::from("u1"));
        room.cast_approval(&UserId::from("u1"));
        room.init_ballot(&UserId::from("u2"));

        assert!(manager.teardown(&RoomId::from("r1")).await);
        // Second caller observes absence.
        assert!(!manager.teardown(&RoomId::from("r1")).await);

        assert_eq!(directory.closed_rooms(), vec![RoomId::from("r1")]);
        assert_eq!(review.submissions(), 1);
        let results = directory.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, vec![UserId::from("u1")]);
        assert_eq!(results[0].2, vec![UserId::from("u2")]);
    }

    #[tokio::test]
    async fn test_sweep_tears_down_only_expired_rooms() {
        let (manager, directory, _) = manager_with(&[("r1", "owner", 2), ("r2", "owner", 2)]);
        let r1 = manager.get_or_create(&RoomId::from("r1")).await.expect("room");
        let _r2 = manager.get_or_create(&RoomId::from("r2")).await.expect("room");

        r1.set_expiry(Utc::now() - chrono::Duration::seconds(1));
        manager.sweep_expired().await;

        assert!(manager.get(&RoomId::from("r1")).is_none());
        assert!(manager.get(&RoomId::from("r2")).is_some());
        assert_eq!(directory.closed_rooms(), vec![RoomId::from("r1")]);
    }

    #[tokio::test]
    async fn test_departure_from_empty_room_triggers_teardown() {
        let (manager, _, _) = manager_with(&[("r1", "owner", 2)]);
        let room = manager.get_or_create(&RoomId::from("r1")).await.expect("room");

        manager.handle_peer_departure(&room).await;
        assert!(manager.get(&RoomId::from("r1")).is_none());

        // Already removed; a racing departure is a no-op.
        manager.handle_peer_departure(&room).await;
    }

    #[tokio::test]
    async fn test_override_expiry_parses_unix_seconds() {
        let (manager, _, _) = manager_with(&[("r1", "owner", 2)]);
        let room = manager.get_or_create(&RoomId::from("r1")).await.expect("room");

        let at = Utc::now().timestamp() + 120;
        manager
            .override_expiry(&room, &at.to_string())
            .expect("override");
        assert_eq!(room.expiry().timestamp(), at);

        assert!(manager.override_expiry(&room, "not-a-number").is_err());
    }
}
