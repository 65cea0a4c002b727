//! Live room state
//!
//! Exactly one `Room` instance exists per room id per process; peers hold a
//! non-owning reference. Everything that touches the peer list or the track
//! registry serializes on the peer set's lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use vmeet_core::directory::{PollEntry, RoomInfo};
use vmeet_core::models::{RoomId, UserId};

use crate::message::{Notification, Roster};
use crate::peer::Peer;
use crate::types::{ConnectionId, TrackId};

/// Grace period before a room that never fills is swept away.
const INITIAL_EXPIRY_MINUTES: i64 = 10;

/// Per-participant seconds granted once the room fills.
const FILL_SECONDS_PER_USER: i64 = 15;
const FILL_BASE_SECONDS: i64 = 30;

/// Peer list plus the track registry, guarded by one lock.
#[derive(Default)]
pub struct PeerSet {
    pub connections: Vec<Arc<Peer>>,
    pub track_locals: HashMap<TrackId, Arc<TrackLocalStaticRTP>>,
}

impl PeerSet {
    pub fn remove_connection(&mut self, connection_id: &ConnectionId) -> Option<Arc<Peer>> {
        let index = self
            .connections
            .iter()
            .position(|p| &p.connection_id == connection_id)?;
        Some(self.connections.remove(index))
    }

    #[must_use]
    pub fn roster(&self) -> Roster {
        Roster {
            users: self.connections.iter().map(|p| p.roster_entry()).collect(),
        }
    }
}

pub struct Room {
    pub id: RoomId,
    pub owner_id: UserId,
    pub expected_users: u32,
    pub created_at: DateTime<Utc>,
    filled: AtomicBool,
    expiry: SyncRwLock<DateTime<Utc>>,
    pub peers: Mutex<PeerSet>,
    ballots: SyncMutex<HashMap<UserId, bool>>,
}

impl Room {
    #[must_use]
    pub fn new(info: RoomInfo) -> Self {
        let now = Utc::now();
        Self {
            id: info.room_id,
            owner_id: info.owner_id,
            expected_users: info.expected_users,
            created_at: now,
            filled: AtomicBool::new(false),
            expiry: SyncRwLock::new(now + Duration::minutes(INITIAL_EXPIRY_MINUTES)),
            peers: Mutex::new(PeerSet::default()),
            ballots: SyncMutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn expiry(&self) -> DateTime<Utc> {
        *self.expiry.read()
    }

    pub fn set_expiry(&self, at: DateTime<Utc>) {
        *self.expiry.write() = at;
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= *self.expiry.read()
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.filled.load(Ordering::SeqCst)
    }

    /// Fill detection: once the live peer count reaches the expected count,
    /// replace the initial grace period with one scaled to party size.
    /// Returns true on the transition.
    pub fn mark_filled_if_ready(&self, live_peers: usize) -> bool {
        if self.is_filled() || live_peers < self.expected_users as usize {
            return false;
        }
        if self.filled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let grace =
            Duration::seconds(i64::from(self.expected_users) * FILL_SECONDS_PER_USER + FILL_BASE_SECONDS);
        self.set_expiry(Utc::now() + grace);
        debug!(room_id = %self.id, seconds = grace.num_seconds(), "room filled, expiry rescheduled");
        true
    }

    /// Seed a fresh ballot as "oppose"; a later `approve_meeting` flips it.
    pub fn init_ballot(&self, user_id: &UserId) {
        self.ballots.lock().entry(user_id.clone()).or_insert(false);
    }

    pub fn cast_approval(&self, user_id: &UserId) {
        self.ballots.lock().insert(user_id.clone(), true);
    }

    /// Partition the ballot box. Users without an entry count as deniers.
    #[must_use]
    pub fn tally(&self) -> (Vec<UserId>, Vec<UserId>) {
        let ballots = self.ballots.lock();
        let mut approvers = Vec::new();
        let mut deniers = Vec::new();
        for (user, approved) in ballots.iter() {
            if *approved {
                approvers.push(user.clone());
            } else {
                deniers.push(user.clone());
            }
        }
        (approvers, deniers)
    }

    #[must_use]
    pub fn poll_entries(&self) -> Vec<PollEntry> {
        let (approvers, deniers) = self.tally();
        approvers
            .into_iter()
            .map(|u| PollEntry {
                status: "approved".to_string(),
                user_id: u,
            })
            .chain(deniers.into_iter().map(|u| PollEntry {
                status: "denied".to_string(),
                user_id: u,
            }))
            .collect()
    }

    /// Send a notification to every connected peer. Channel failures are
    /// ignored; a dead channel's peer is purged by the next renegotiation.
    pub async fn broadcast_notify(&self, state: &str, data: serde_json::Value) {
        let notification = Notification::new(state, data);
        let peers = self.peers.lock().await;
        for peer in &peers.connections {
            let _ = peer.channel.notify(&notification);
        }
    }

    /// Broadcast the current roster as a `user_data` notification.
    pub async fn broadcast_roster(&self) {
        let peers = self.peers.lock().await;
        let roster = peers.roster();
        let notification = Notification::new("user_data", json!(roster));
        for peer in &peers.connections {
            let _ = peer.channel.notify(&notification);
        }
    }
}
