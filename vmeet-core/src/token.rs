//! One-time join tokens
//!
//! A token authenticates exactly one WebSocket session: it is removed from
//! the table on first read, whatever the validity outcome. Expired tokens
//! are garbage-collected lazily on every issue and by a periodic sweep.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::models::{RoomId, UserId};

/// Token alphabet: lowercase letters plus digits without `0`
const TOKEN_ALPHABET: [char; 35] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
    's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

const TOKEN_LEN: usize = 30;

#[derive(Debug, Clone)]
pub struct JoinToken {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

/// Process-wide join-token table
pub struct TokenStore {
    tokens: DashMap<String, JoinToken>,
    ttl: Duration,
}

impl TokenStore {
    #[must_use]
    pub fn new(ttl_hours: u64) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl: Duration::hours(ttl_hours as i64),
        }
    }

    /// Issue a fresh token for the given room/user pair.
    /// Expired entries are swept before inserting.
    pub fn issue(&self, room_id: RoomId, user_id: UserId) -> String {
        self.sweep();

        let token = nanoid::nanoid!(TOKEN_LEN, &TOKEN_ALPHABET);
        self.tokens.insert(
            token.clone(),
            JoinToken {
                room_id,
                user_id,
                expires_at: Utc::now() + self.ttl,
            },
        );
        token
    }

    /// Consume a token. The entry is removed on first read regardless of
    /// validity, so the same literal token can never authenticate twice.
    pub fn consume(&self, token: &str) -> Result<JoinToken> {
        let (_, entry) = self
            .tokens
            .remove(token)
            .ok_or_else(|| Error::NotFound("invalid token".to_string()))?;

        if entry.expires_at < Utc::now() {
            return Err(Error::PermissionDenied("token expired".to_string()));
        }
        Ok(entry)
    }

    /// Drop every expired entry.
    pub fn sweep(&self) {
        let now = Utc::now();
        self.tokens.retain(|_, entry| entry.expires_at >= now);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
