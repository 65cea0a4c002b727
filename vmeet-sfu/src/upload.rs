//! Recording upload scheduler
//!
//! Finished recordings are queued here and drained on a fixed tick. Uploads
//! are best-effort: a failure notifies the owning signaling channel, cleans
//! up local files and drops the artifact. Nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vmeet_core::error::Result;
use vmeet_core::models::{RoomId, UserId};
use vmeet_core::storage::MediaStore;

use crate::channel::SignalChannel;
use crate::message::Notification;

/// A finished recording awaiting upload. Ownership of the named files
/// transfers here when the session hands the artifact off.
pub enum RecordingArtifact {
    /// One confirmed or force-finalized segment pair.
    Segment {
        video: String,
        audio: String,
        room_id: RoomId,
        user_id: UserId,
        channel: SignalChannel,
    },
    /// A whole-meeting container file.
    Meeting {
        file: String,
        room_id: RoomId,
        user_id: UserId,
        channel: SignalChannel,
    },
}

impl RecordingArtifact {
    fn file_names(&self) -> Vec<&str> {
        match self {
            Self::Segment { video, audio, .. } => vec![video, audio],
            Self::Meeting { file, .. } => vec![file],
        }
    }
}

pub struct RecordingScheduler {
    store: Arc<dyn MediaStore>,
    pending: Mutex<Vec<RecordingArtifact>>,
}

impl RecordingScheduler {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue(&self, artifact: RecordingArtifact) {
        self.pending.lock().push(artifact);
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Upload everything currently queued. New artifacts enqueued during the
    /// drain wait for the next tick.
    pub async fn drain(&self) {
        let batch = std::mem::take(&mut *self.pending.lock());
        for artifact in batch {
            if let Err(err) = self.upload(&artifact).await {
                warn!(error = %err, "recording upload failed, dropping artifact");
                let notification =
                    Notification::error("upload", json!(format!("recording upload failed: {err}")));
                let channel = match &artifact {
                    RecordingArtifact::Segment { channel, .. }
                    | RecordingArtifact::Meeting { channel, .. } => channel,
                };
                let _ = channel.notify(&notification);
                for name in artifact.file_names() {
                    if let Err(err) = self.store.remove_local(name).await {
                        warn!(name, error = %err, "failed to remove local recording file");
                    }
                }
            }
        }
    }

    /// Video first, then audio; the store deletes each local file once the
    /// directory record exists.
    async fn upload(&self, artifact: &RecordingArtifact) -> Result<()> {
        match artifact {
            RecordingArtifact::Segment {
                video,
                audio,
                room_id,
                user_id,
                ..
            } => {
                self.store.store(video, room_id, user_id).await?;
                self.store.store(audio, room_id, user_id).await?;
                info!(%room_id, %user_id, video, audio, "recording segment uploaded");
                Ok(())
            }
            RecordingArtifact::Meeting {
                file,
                room_id,
                user_id,
                ..
            } => {
                self.store.store(file, room_id, user_id).await?;
                info!(%room_id, %user_id, file, "meeting recording uploaded");
                Ok(())
            }
        }
    }

    /// Background drain loop, one tick per `interval`.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                scheduler.drain().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OutFrame;
    use vmeet_core::storage::MemoryMediaStore;

    fn segment(store: &Arc<MemoryMediaStore>) -> (Arc<RecordingScheduler>, SignalChannel) {
        let scheduler = Arc::new(RecordingScheduler::new(
            Arc::clone(store) as Arc<dyn MediaStore>
        ));
        let (channel, rx) = SignalChannel::new();
        // Keep the receiver alive for the test's duration.
        std::mem::forget(rx);
        (scheduler, channel)
    }

    #[tokio::test]
    async fn test_drain_uploads_video_then_audio() {
        let store = Arc::new(MemoryMediaStore::new());
        let (scheduler, channel) = segment(&store);

        scheduler.enqueue(RecordingArtifact::Segment {
            video: "a.ivf".to_string(),
            audio: "a.ogg".to_string(),
            room_id: RoomId::from("r1"),
            user_id: UserId::from("u1"),
            channel,
        });
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.drain().await;

        assert_eq!(scheduler.pending_count(), 0);
        let mut stored = store.stored();
        stored.sort();
        assert_eq!(stored, vec!["a.ivf".to_string(), "a.ogg".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_upload_notifies_and_drops() {
        let store = Arc::new(MemoryMediaStore::new());
        store.fail_for("a.ivf");
        let scheduler = Arc::new(RecordingScheduler::new(
            Arc::clone(&store) as Arc<dyn MediaStore>
        ));
        let (channel, mut rx) = SignalChannel::new();

        scheduler.enqueue(RecordingArtifact::Segment {
            video: "a.ivf".to_string(),
            audio: "a.ogg".to_string(),
            room_id: RoomId::from("r1"),
            user_id: UserId::from("u1"),
            channel,
        });
        scheduler.drain().await;

        // Dropped, not retried.
        assert_eq!(scheduler.pending_count(), 0);
        assert!(store.stored().is_empty());

        let frame = rx.try_recv().expect("error notification");
        match frame {
            OutFrame::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).expect("json");
                assert_eq!(value["event"], "error");
                assert_eq!(value["state"], "upload");
            }
            OutFrame::Close => panic!("expected text frame"),
        }

        // Local spool files were cleaned up.
        let removed = store.removed_local();
        assert!(removed.contains(&"a.ivf".to_string()));
        assert!(removed.contains(&"a.ogg".to_string()));
    }

    #[tokio::test]
    async fn test_meeting_artifact_uploads_single_file() {
        let store = Arc::new(MemoryMediaStore::new());
        let (scheduler, channel) = segment(&store);

        scheduler.enqueue(RecordingArtifact::Meeting {
            file: "m.mkv".to_string(),
            room_id: RoomId::from("r1"),
            user_id: UserId::from("owner"),
            channel,
        });
        scheduler.drain().await;

        assert_eq!(store.stored(), vec!["m.mkv".to_string()]);
    }
}
