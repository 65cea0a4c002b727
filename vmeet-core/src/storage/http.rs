//! HTTP blob store client

use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;

use super::MediaStore;
use crate::config::StorageConfig;
use crate::directory::RoomDirectory;
use crate::error::{Error, Result};
use crate::models::{RoomId, UserId};

pub struct HttpMediaStore {
    base_url: String,
    bucket: String,
    local_dir: PathBuf,
    client: Client,
    directory: Arc<dyn RoomDirectory>,
}

impl HttpMediaStore {
    #[must_use]
    pub fn new(config: &StorageConfig, directory: Arc<dyn RoomDirectory>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            local_dir: PathBuf::from(&config.local_dir),
            client: Client::new(),
            directory,
        }
    }

    fn object_url(&self, name: &str) -> String {
        format!("{}/{}/{name}", self.base_url, self.bucket)
    }

    fn local_path(&self, name: &str) -> PathBuf {
        self.local_dir.join(name)
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn store(&self, name: &str, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        let bytes = tokio::fs::read(self.local_path(name)).await?;

        let response = self
            .client
            .put(self.object_url(name))
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "blob store returned {} for {name}",
                response.status()
            )));
        }

        self.directory.register_file(name, room_id, user_id).await?;

        // The blob and its directory record exist; the temp copy can go.
        tokio::fs::remove_file(self.local_path(name)).await?;
        Ok(())
    }

    async fn remove_local(&self, name: &str) -> Result<()> {
        tokio::fs::remove_file(self.local_path(name)).await?;
        Ok(())
    }

    async fn remove_object(&self, name: &str) -> Result<()> {
        let response = self.client.delete(self.object_url(name)).send().await?;
        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "blob store returned {} for {name}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let response = self.client.head(self.object_url(name)).send().await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_store_uploads_registers_and_cleans_up() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/recordbucket/seg.ivf"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("seg.ivf"), b"DKIF").expect("write temp");

        let directory = Arc::new(MemoryDirectory::new());
        let store = HttpMediaStore::new(
            &StorageConfig {
                base_url: server.uri(),
                bucket: "recordbucket".to_string(),
                local_dir: dir.path().to_string_lossy().into_owned(),
            },
            directory.clone(),
        );

        store
            .store("seg.ivf", &RoomId::from("r1"), &UserId::from("u1"))
            .await
            .expect("store");

        assert_eq!(directory.registered_files(), vec!["seg.ivf".to_string()]);
        assert!(!dir.path().join("seg.ivf").exists());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_local_file() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/recordbucket/seg.ivf"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("seg.ivf"), b"DKIF").expect("write temp");

        let directory = Arc::new(MemoryDirectory::new());
        let store = HttpMediaStore::new(
            &StorageConfig {
                base_url: server.uri(),
                bucket: "recordbucket".to_string(),
                local_dir: dir.path().to_string_lossy().into_owned(),
            },
            directory.clone(),
        );

        let err = store
            .store("seg.ivf", &RoomId::from("r1"), &UserId::from("u1"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, Error::Unavailable(_)));
        assert!(directory.registered_files().is_empty());
        assert!(dir.path().join("seg.ivf").exists());
    }

    #[tokio::test]
    async fn test_exists() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/recordbucket/seg.ivf"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = HttpMediaStore::new(
            &StorageConfig {
                base_url: server.uri(),
                bucket: "recordbucket".to_string(),
                local_dir: ".".to_string(),
            },
            Arc::new(MemoryDirectory::new()),
        );

        assert!(store.exists("seg.ivf").await.expect("head"));
        assert!(!store.exists("other.ivf").await.expect("head"));
    }
}
