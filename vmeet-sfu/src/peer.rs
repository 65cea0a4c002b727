//! Peer connection state
//!
//! One `Peer` per successful join; removed when its transport reaches a
//! terminal state or its signaling session exits.

use std::sync::Arc;

use serde_json::json;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use vmeet_core::error::{Error, Result};
use vmeet_core::models::UserId;

use crate::channel::SignalChannel;
use crate::message::{Notification, RosterUser, UserDataMessage};
use crate::recording::{Recorder, RecordingMedia};
use crate::rtc_err;
use crate::types::ConnectionId;

pub struct Peer {
    pub user_id: UserId,
    pub display_name: String,
    pub connection_id: ConnectionId,
    pub transport: Arc<RTCPeerConnection>,
    pub channel: SignalChannel,
    pub recorder: Arc<Recorder>,
}

impl Peer {
    pub fn new(
        user_id: UserId,
        display_name: impl Into<String>,
        transport: Arc<RTCPeerConnection>,
        channel: SignalChannel,
        media: Arc<dyn RecordingMedia>,
    ) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            connection_id: ConnectionId::generate(),
            transport,
            channel,
            recorder: Arc::new(Recorder::new(media)),
        }
    }

    #[must_use]
    pub fn roster_entry(&self) -> RosterUser {
        let (video, audio) = self.recorder.file_names();
        RosterUser {
            display_name: self.display_name.clone(),
            user_id: self.user_id.clone(),
            connection_id: self.connection_id.clone(),
            recorded_file: self.recorder.state().as_str().to_string(),
            video_filename: video,
            audio_filename: audio,
        }
    }

    /// The peer's identity payload used in join/leave/mute notifications.
    #[must_use]
    pub fn identity(&self) -> UserDataMessage {
        UserDataMessage {
            display_name: self.display_name.clone(),
            connection_id: self.connection_id.clone(),
            user_id: self.user_id.clone(),
        }
    }

    /// Send the peer its own connection identity as a `self_data`
    /// notification.
    pub fn send_self_data(&self) -> Result<()> {
        self.channel
            .notify(&Notification::new("self_data", json!(self.identity())))
    }

    /// Apply the client's SDP answer; `data` is the JSON-encoded description.
    pub async fn set_remote_answer(&self, sdp_json: &str) -> Result<()> {
        let answer: RTCSessionDescription = serde_json::from_str(sdp_json)
            .map_err(|e| Error::InvalidInput(format!("bad session description: {e}")))?;
        self.transport
            .set_remote_description(answer)
            .await
            .map_err(rtc_err)
    }

    /// Add a remote ICE candidate; `data` is the JSON-encoded candidate.
    pub async fn add_ice_candidate(&self, candidate_json: &str) -> Result<()> {
        let candidate: RTCIceCandidateInit = serde_json::from_str(candidate_json)
            .map_err(|e| Error::InvalidInput(format!("bad ice candidate: {e}")))?;
        self.transport
            .add_ice_candidate(candidate)
            .await
            .map_err(rtc_err)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.transport.connection_state() == RTCPeerConnectionState::Closed
    }

    /// Close transport and signaling channel. Errors on an already-closed
    /// transport are ignored.
    pub async fn close(&self) {
        let _ = self.transport.close().await;
        self.channel.close();
    }
}
