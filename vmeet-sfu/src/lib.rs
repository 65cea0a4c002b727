//! SFU session engine
//!
//! In-memory room/peer registry, track-relay renegotiation, the recording
//! pipeline with timed segment rotation, and the room lifecycle/expiry
//! scheduler. The durable side of a room lives in the directory service;
//! everything here is volatile and reconstructed on demand.

pub mod channel;
pub mod manager;
pub mod message;
pub mod peer;
pub mod recording;
pub mod room;
pub mod signal;
pub mod track;
pub mod transport;
pub mod types;
pub mod upload;

pub use channel::{OutFrame, SignalChannel};
pub use manager::RoomManager;
pub use message::{ClientEvent, Envelope, Notification};
pub use peer::Peer;
pub use recording::{FileRecordingMedia, MeetRecorder, Recorder, RecordingState};
pub use room::{PeerSet, Room};
pub use transport::TransportFactory;
pub use types::{ConnectionId, MediaKind, TrackId};
pub use upload::{RecordingArtifact, RecordingScheduler};

pub(crate) fn rtc_err(err: webrtc::Error) -> vmeet_core::Error {
    vmeet_core::Error::Internal(format!("webrtc: {err}"))
}
