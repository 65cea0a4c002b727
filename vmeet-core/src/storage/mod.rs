//! Object storage boundary
//!
//! Finished recordings are uploaded into a fixed bucket; the file directory
//! gets a record for each uploaded blob, and the local temporary file is
//! deleted once the record exists.

mod http;
mod memory;

pub use http::HttpMediaStore;
pub use memory::MemoryMediaStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{RoomId, UserId};

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Upload a finished recording: blob put, then file-directory record,
    /// then local temp delete.
    async fn store(&self, name: &str, room_id: &RoomId, user_id: &UserId) -> Result<()>;

    /// Delete a local temporary file.
    async fn remove_local(&self, name: &str) -> Result<()>;

    /// Delete an uploaded blob.
    async fn remove_object(&self, name: &str) -> Result<()>;

    /// Whether a blob with this name exists in the bucket.
    async fn exists(&self, name: &str) -> Result<bool>;
}
