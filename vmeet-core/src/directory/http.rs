//! HTTP JSON client for the room/file directory service

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{PollEntry, PollReview, RoomDirectory, RoomInfo};
use crate::config::{DirectoryConfig, PollReviewConfig};
use crate::error::{Error, Result};
use crate::models::{RoomId, UserId};

/// Standard directory response envelope
#[derive(Debug, Deserialize)]
struct DirectoryResp<T> {
    success: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

pub struct HttpRoomDirectory {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpRoomDirectory {
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref token) = self.token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(token)
                    .map_err(|e| Error::Internal(format!("invalid directory token: {e}")))?,
            );
        }
        Ok(headers)
    }

    async fn post_unit(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.build_headers()?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Unavailable(format!(
                "directory {path} returned {status}"
            )));
        }
        let resp: DirectoryResp<serde_json::Value> = response.json().await?;
        if !resp.success {
            return Err(Error::Internal(format!(
                "directory {path} rejected request: {}",
                resp.message
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RoomDirectory for HttpRoomDirectory {
    async fn fetch_room(&self, room_id: &RoomId) -> Result<RoomInfo> {
        let url = format!("{}/api/rooms/{room_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .headers(self.build_headers()?)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("room {room_id} not found")));
        }
        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "directory returned {}",
                response.status()
            )));
        }

        let resp: DirectoryResp<RoomInfo> = response.json().await?;
        resp.data
            .ok_or_else(|| Error::NotFound(format!("room {room_id} not found")))
    }

    async fn close_room(&self, room_id: &RoomId) -> Result<()> {
        self.post_unit(&format!("/api/rooms/{room_id}/close"), json!({})).await
    }

    async fn add_room_log(&self, room_id: &RoomId, user_id: &UserId, event: &str) -> Result<()> {
        self.post_unit(
            &format!("/api/rooms/{room_id}/logs"),
            json!({ "user_id": user_id, "user_event": event }),
        )
        .await
    }

    async fn add_room_result(
        &self,
        room_id: &RoomId,
        approvers: &[UserId],
        deniers: &[UserId],
    ) -> Result<()> {
        self.post_unit(
            &format!("/api/rooms/{room_id}/result"),
            json!({ "approvers": approvers, "deniers": deniers }),
        )
        .await
    }

    async fn can_join(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        let url = format!("{}/api/rooms/{room_id}/members/{user_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .headers(self.build_headers()?)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "directory returned {}",
                response.status()
            )));
        }
        let resp: DirectoryResp<bool> = response.json().await?;
        Ok(resp.data.unwrap_or(false))
    }

    async fn register_file(&self, name: &str, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        self.post_unit(
            "/api/files",
            json!({ "file_name": name, "room_id": room_id, "user_id": user_id }),
        )
        .await
    }

    async fn remove_file(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/files/{name}", self.base_url);
        let response = self
            .client
            .delete(&url)
            .headers(self.build_headers()?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "directory returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Review endpoint client: POST the whole poll partition, token-authorized.
pub struct HttpPollReview {
    url: String,
    token: Option<String>,
    client: Client,
}

impl HttpPollReview {
    pub fn new(config: &PollReviewConfig) -> Option<Self> {
        let url = config.url.clone()?;
        Some(Self {
            url,
            token: config.token.clone(),
            client: Client::new(),
        })
    }
}

#[async_trait]
impl PollReview for HttpPollReview {
    async fn submit(&self, room_id: &RoomId, entries: &[PollEntry]) -> Result<()> {
        let url = self.url.replace("{room_id}", room_id.as_str());
        let mut request = self.client.post(&url).json(entries);
        if let Some(ref token) = self.token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "review endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
