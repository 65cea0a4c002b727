//! In-memory media store for standalone mode and tests

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use super::MediaStore;
use crate::error::{Error, Result};
use crate::models::{RoomId, UserId};

#[derive(Default)]
pub struct MemoryMediaStore {
    objects: DashMap<String, (RoomId, UserId)>,
    removed_local: Mutex<Vec<String>>,
    fail_names: DashSet<String>,
}

impl MemoryMediaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `store` fail for this name (simulates an unreachable blob store).
    pub fn fail_for(&self, name: &str) {
        self.fail_names.insert(name.to_string());
    }

    #[must_use]
    pub fn stored(&self) -> Vec<String> {
        self.objects.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn removed_local(&self) -> Vec<String> {
        self.removed_local.lock().clone()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn store(&self, name: &str, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        if self.fail_names.contains(name) {
            return Err(Error::Unavailable(format!("blob store rejected {name}")));
        }
        self.objects
            .insert(name.to_string(), (room_id.clone(), user_id.clone()));
        self.removed_local.lock().push(name.to_string());
        Ok(())
    }

    async fn remove_local(&self, name: &str) -> Result<()> {
        self.removed_local.lock().push(name.to_string());
        Ok(())
    }

    async fn remove_object(&self, name: &str) -> Result<()> {
        self.objects.remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_exists() {
        let store = MemoryMediaStore::new();
        store
            .store("a.ivf", &RoomId::from("r1"), &UserId::from("u1"))
            .await
            .expect("store");
        assert!(store.exists("a.ivf").await.expect("exists"));

        store.remove_object("a.ivf").await.expect("remove");
        assert!(!store.exists("a.ivf").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryMediaStore::new();
        store.fail_for("a.ivf");
        assert!(store
            .store("a.ivf", &RoomId::from("r1"), &UserId::from("u1"))
            .await
            .is_err());
    }
}
