//! Per-connection signaling session
//!
//! State machine per connection: a 10s handshake window consuming a
//! single-use join token, transport setup, then the control loop until the
//! socket closes or an unrecoverable decode/transport error. While a
//! whole-meeting recording is active, undecodable payloads are treated as
//! raw recording bytes; outside that mode they terminate the session.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use vmeet_sfu::channel::{OutFrame, SignalChannel};
use vmeet_sfu::message::{ClientEvent, Envelope, Notification};
use vmeet_sfu::peer::Peer;
use vmeet_sfu::recording::{MeetRecorder, RecordingState};
use vmeet_sfu::room::Room;
use vmeet_sfu::signal::signal_peer_connections;
use vmeet_sfu::track::spawn_track_relay;
use vmeet_sfu::upload::RecordingArtifact;

use crate::http::AppState;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve one signaling connection to completion.
pub async fn run(state: AppState, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let (channel, out_rx) = SignalChannel::new();
    let writer = tokio::spawn(write_frames(sink, out_rx));

    session_loop(state, stream, channel.clone()).await;

    channel.close();
    let _ = writer.await;
}

/// Drain the signaling channel into the socket. The queue decouples senders
/// (renegotiation under the room lock, schedulers) from socket latency.
async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut rx: UnboundedReceiver<OutFrame>) {
    while let Some(frame) = rx.recv().await {
        match frame {
            OutFrame::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            OutFrame::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// First message must arrive within the handshake window and decode to a
/// join event.
async fn read_join(stream: &mut SplitStream<WebSocket>) -> Option<(String, String)> {
    let message = tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.next())
        .await
        .ok()??
        .ok()?;
    let Message::Text(text) = message else {
        return None;
    };
    let envelope: Envelope = serde_json::from_str(&text).ok()?;
    match ClientEvent::from(envelope) {
        ClientEvent::Join {
            token,
            display_name,
        } => Some((token, display_name)),
        _ => None,
    }
}

fn reject(channel: &SignalChannel, reason: &str) {
    let _ = channel.notify(&Notification::error("verification", json!(reason)));
    channel.close();
}

async fn session_loop(state: AppState, mut stream: SplitStream<WebSocket>, channel: SignalChannel) {
    let Some((token, display_name)) = read_join(&mut stream).await else {
        reject(&channel, "expected a join message");
        return;
    };

    // Single use: the token is gone even if this session fails later.
    let join = match state.tokens.consume(&token) {
        Ok(join) => join,
        Err(err) => {
            reject(&channel, &err.to_string());
            return;
        }
    };

    let room = match state.manager.get_or_create(&join.room_id).await {
        Ok(room) => room,
        Err(err) => {
            warn!(room_id = %join.room_id, error = %err, "room unavailable");
            let _ = channel.notify(&Notification::error("connection", json!(err.to_string())));
            channel.close();
            return;
        }
    };

    let transport = match state.transport.create_transport().await {
        Ok(transport) => transport,
        Err(err) => {
            warn!(error = %err, "transport setup failed");
            let _ = channel.notify(&Notification::error("connection", json!(err.to_string())));
            channel.close();
            return;
        }
    };

    let peer = Arc::new(Peer::new(
        join.user_id.clone(),
        &display_name,
        transport,
        channel.clone(),
        Arc::clone(&state.media),
    ));
    attach_transport_callbacks(&state, &room, &peer);

    room.peers.lock().await.connections.push(Arc::clone(&peer));
    room.init_ballot(&peer.user_id);
    if let Err(err) = state
        .directory
        .add_room_log(&room.id, &peer.user_id, "joined")
        .await
    {
        warn!(room_id = %room.id, error = %err, "failed to log join");
    }
    let _ = peer.send_self_data();
    info!(room_id = %room.id, user_id = %peer.user_id, connection_id = %peer.connection_id, "peer joined");

    signal_peer_connections(Arc::clone(&room)).await;

    let session = Session {
        meet: MeetRecorder::new(state.config.storage.local_dir.clone()),
        state,
        room,
        peer,
    };

    while let Some(message) = stream.next().await {
        let Ok(message) = message else { break };
        match message {
            Message::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => {
                    if session
                        .handle_event(ClientEvent::from(envelope))
                        .await
                        .is_break()
                    {
                        break;
                    }
                }
                // Control JSON and raw recording chunks share the channel
                // while a meeting recording is active; otherwise a decode
                // failure is fatal to this session.
                Err(_) => {
                    if !session.meet.write_chunk(text.as_bytes()) {
                        break;
                    }
                }
            },
            Message::Binary(bytes) => {
                if !session.meet.write_chunk(&bytes) {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.cleanup().await;
}

/// Wire transport events back into the session. Peer and room are captured
/// weakly: the transport must not keep either alive past teardown.
fn attach_transport_callbacks(state: &AppState, room: &Arc<Room>, peer: &Arc<Peer>) {
    let channel = peer.channel.clone();
    peer.transport
        .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let channel = channel.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        if let Ok(text) = serde_json::to_string(&init) {
                            let _ = channel.send_envelope(&Envelope::candidate(text));
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to serialize local candidate"),
                }
            })
        }));

    let track_room = Arc::downgrade(room);
    let recorder = Arc::clone(&peer.recorder);
    peer.transport.on_track(Box::new(move |track, _, _| {
        if let Some(room) = track_room.upgrade() {
            spawn_track_relay(room, track, Arc::clone(&recorder));
        }
        Box::pin(async {})
    }));

    let manager = Arc::clone(&state.manager);
    let weak_room = Arc::downgrade(room);
    let weak_peer = Arc::downgrade(peer);
    peer.transport
        .on_peer_connection_state_change(Box::new(move |conn_state| {
            let manager = Arc::clone(&manager);
            let weak_room = weak_room.clone();
            let weak_peer = weak_peer.clone();
            Box::pin(async move {
                let (Some(room), Some(peer)) = (weak_room.upgrade(), weak_peer.upgrade()) else {
                    return;
                };
                match conn_state {
                    RTCPeerConnectionState::Connected => {
                        manager.peer_connected(&room).await;
                        room.broadcast_notify("connected", json!(peer.identity())).await;
                        room.broadcast_roster().await;
                    }
                    RTCPeerConnectionState::Failed => {
                        let _ = peer.transport.close().await;
                    }
                    RTCPeerConnectionState::Closed => {
                        signal_peer_connections(room).await;
                    }
                    _ => {}
                }
            })
        }));
}

struct Session {
    state: AppState,
    room: Arc<Room>,
    peer: Arc<Peer>,
    meet: MeetRecorder,
}

impl Session {
    fn is_owner(&self) -> bool {
        self.peer.user_id == self.room.owner_id
    }

    fn deny(&self, op: &str, reason: &str) {
        let _ = self
            .peer
            .channel
            .notify(&Notification::error(op, json!(reason)));
    }

    async fn handle_event(&self, event: ClientEvent) -> ControlFlow<()> {
        match event {
            ClientEvent::Candidate(data) => {
                if let Err(err) = self.peer.add_ice_candidate(&data).await {
                    warn!(error = %err, "ice candidate rejected, terminating session");
                    return ControlFlow::Break(());
                }
            }
            ClientEvent::Answer(data) => {
                if let Err(err) = self.peer.set_remote_answer(&data).await {
                    warn!(error = %err, "answer rejected, terminating session");
                    return ControlFlow::Break(());
                }
            }
            ClientEvent::Close => return self.handle_close().await,
            ClientEvent::PublicChat(text) => {
                self.room
                    .broadcast_notify("message", json!(format!("{}: {text}", self.peer.display_name)))
                    .await;
            }
            ClientEvent::StartRecord(data) => self.handle_start_record(&data).await,
            ClientEvent::StopRecord => self.handle_stop_record().await,
            ClientEvent::ConfirmFile => self.handle_confirm_file().await,
            ClientEvent::GetUsers => {
                let roster = self.room.peers.lock().await.roster();
                let _ = self
                    .peer
                    .channel
                    .notify(&Notification::new("user_data", json!(roster)));
            }
            ClientEvent::Connection => {
                let _ = self.peer.send_self_data();
            }
            ClientEvent::SelfMute => {
                self.room
                    .broadcast_notify("mute", json!(self.peer.identity()))
                    .await;
            }
            ClientEvent::SelfUnmute => {
                self.room
                    .broadcast_notify("unmute", json!(self.peer.identity()))
                    .await;
            }
            ClientEvent::RaiseHand => {
                self.room
                    .broadcast_notify("raise_hand_request", json!(self.peer.identity()))
                    .await;
            }
            ClientEvent::Expire(data) => self.handle_expire(&data),
            ClientEvent::InitMeetRecord => {
                if !self.is_owner() {
                    self.deny("meet_record", "only the owner may record the meeting");
                } else if let Err(err) = self.meet.start() {
                    self.deny("meet_record", &err.to_string());
                }
            }
            ClientEvent::StopMeetRecord => self.handle_stop_meet_record().await,
            ClientEvent::ApproveMeeting => self.room.cast_approval(&self.peer.user_id),
            ClientEvent::Join { .. } => debug!("duplicate join event ignored"),
            ClientEvent::Unknown(tag) => debug!(event = %tag, "unknown control event ignored"),
        }
        ControlFlow::Continue(())
    }

    /// Owner-only. Every other participant must have a finished recording
    /// before the meeting may be closed.
    async fn handle_close(&self) -> ControlFlow<()> {
        if !self.is_owner() {
            self.deny("close", "only the owner may close the meeting");
            return ControlFlow::Continue(());
        }
        {
            let peers = self.room.peers.lock().await;
            for other in &peers.connections {
                if other.user_id == self.room.owner_id {
                    continue;
                }
                let recording = other.recorder.state();
                if recording != RecordingState::Recorded && recording != RecordingState::Confirmed {
                    self.deny("close", "all participants must finish recording first");
                    return ControlFlow::Continue(());
                }
            }
        }
        self.state.manager.teardown(&self.room.id).await;
        ControlFlow::Break(())
    }

    async fn handle_start_record(&self, data: &str) {
        let seconds = match data.trim().parse::<u64>() {
            Ok(seconds) => seconds,
            Err(_) => {
                self.deny("record", "bad recording duration");
                return;
            }
        };
        let window = if seconds == 0 {
            self.state.config.recording.default_segment_seconds
        } else {
            seconds
        };
        match self.peer.recorder.start(Duration::from_secs(window)) {
            Ok((video, audio)) => {
                info!(
                    connection_id = %self.peer.connection_id,
                    window, video, audio, "recording segment started"
                );
                self.room.broadcast_roster().await;
            }
            Err(err) => self.deny("record", &err.to_string()),
        }
    }

    async fn handle_stop_record(&self) {
        match self.peer.recorder.stop() {
            Ok(_) => {
                let _ = self
                    .peer
                    .channel
                    .notify(&Notification::new("recorded", json!(self.peer.roster_entry())));
                self.room.broadcast_roster().await;
            }
            Err(err) => self.deny("record", &err.to_string()),
        }
    }

    async fn handle_confirm_file(&self) {
        match self.peer.recorder.confirm() {
            Ok((video, audio)) => {
                self.state.scheduler.enqueue(RecordingArtifact::Segment {
                    video,
                    audio,
                    room_id: self.room.id.clone(),
                    user_id: self.peer.user_id.clone(),
                    channel: self.peer.channel.clone(),
                });
                self.room.broadcast_roster().await;
            }
            Err(err) => self.deny("record", &err.to_string()),
        }
    }

    fn handle_expire(&self, data: &str) {
        if !self.is_owner() {
            self.deny("expire_verification", "only the owner may change expiry");
            return;
        }
        match self.state.manager.override_expiry(&self.room, data) {
            Ok(()) => {
                let _ = self.peer.channel.notify(&Notification::new(
                    "expire_verification",
                    json!(self.peer.identity()),
                ));
            }
            Err(err) => self.deny("expire_verification", &err.to_string()),
        }
    }

    async fn handle_stop_meet_record(&self) {
        if !self.is_owner() {
            self.deny("meet_record", "only the owner may record the meeting");
            return;
        }
        match self.meet.stop() {
            Some(file) => {
                self.state.scheduler.enqueue(RecordingArtifact::Meeting {
                    file: file.clone(),
                    room_id: self.room.id.clone(),
                    user_id: self.peer.user_id.clone(),
                    channel: self.peer.channel.clone(),
                });
                self.room.broadcast_notify("meet_record", json!(file)).await;
            }
            None => self.deny("meet_record", "no meeting recording active"),
        }
    }

    /// Loop-exit cleanup: flush recordings into artifacts, deregister the
    /// peer (renegotiate, teardown if the room emptied), log the departure.
    async fn cleanup(self) {
        if let Some(file) = self.meet.stop() {
            self.state.scheduler.enqueue(RecordingArtifact::Meeting {
                file: file.clone(),
                room_id: self.room.id.clone(),
                user_id: self.peer.user_id.clone(),
                channel: self.peer.channel.clone(),
            });
            self.room.broadcast_notify("meet_record", json!(file)).await;
        }
        if let Some((video, audio)) = self.peer.recorder.finalize() {
            self.state.scheduler.enqueue(RecordingArtifact::Segment {
                video,
                audio,
                room_id: self.room.id.clone(),
                user_id: self.peer.user_id.clone(),
                channel: self.peer.channel.clone(),
            });
        }

        self.peer.close().await;
        let removed = self
            .room
            .peers
            .lock()
            .await
            .remove_connection(&self.peer.connection_id);
        if removed.is_some() {
            signal_peer_connections(Arc::clone(&self.room)).await;
        }

        self.state.manager.handle_peer_departure(&self.room).await;
        if self.state.manager.get(&self.room.id).is_some() {
            self.room
                .broadcast_notify("disconnected", json!(self.peer.identity()))
                .await;
            self.room.broadcast_roster().await;
        }

        if let Err(err) = self
            .state
            .directory
            .add_room_log(&self.room.id, &self.peer.user_id, "left")
            .await
        {
            warn!(room_id = %self.room.id, error = %err, "failed to log departure");
        }
        info!(room_id = %self.room.id, user_id = %self.peer.user_id, "peer left");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_state;
    use vmeet_core::directory::RoomInfo;
    use vmeet_core::models::{RoomId, UserId};

    async fn join_session(
        state: &AppState,
        room_id: &str,
        user: &str,
    ) -> (Session, UnboundedReceiver<OutFrame>) {
        let room = state
            .manager
            .get_or_create(&RoomId::from(room_id))
            .await
            .expect("room");
        let transport = state.transport.create_transport().await.expect("transport");
        let (channel, rx) = SignalChannel::new();
        let peer = Arc::new(Peer::new(
            UserId::from(user),
            user,
            transport,
            channel,
            Arc::clone(&state.media),
        ));
        room.peers.lock().await.connections.push(Arc::clone(&peer));
        room.init_ballot(&peer.user_id);
        let session = Session {
            meet: MeetRecorder::new(std::env::temp_dir().join("vmeet-test-meet")),
            state: state.clone(),
            room,
            peer,
        };
        (session, rx)
    }

    fn seeded_state() -> (AppState, Arc<vmeet_core::directory::MemoryDirectory>) {
        let (state, directory) = test_state();
        directory.seed_room(RoomInfo {
            room_id: RoomId::from("r1"),
            owner_id: UserId::from("owner"),
            expected_users: 2,
        });
        (state, directory)
    }

    fn last_notification(rx: &mut UnboundedReceiver<OutFrame>) -> Option<serde_json::Value> {
        let mut last = None;
        while let Ok(OutFrame::Text(text)) = rx.try_recv() {
            last = serde_json::from_str(&text).ok();
        }
        last
    }

    #[tokio::test]
    async fn test_close_denied_for_non_owner() {
        let (state, _) = seeded_state();
        let (session, mut rx) = join_session(&state, "r1", "guest").await;

        assert_eq!(session.handle_event(ClientEvent::Close).await, ControlFlow::Continue(()));
        let reply = last_notification(&mut rx).expect("reply");
        assert_eq!(reply["event"], "error");
        assert_eq!(reply["state"], "close");
        assert!(state.manager.get(&RoomId::from("r1")).is_some());
    }

    #[tokio::test]
    async fn test_close_requires_all_guests_recorded() {
        let (state, _) = seeded_state();
        let (guest, _guest_rx) = join_session(&state, "r1", "guest").await;
        let (owner, mut owner_rx) = join_session(&state, "r1", "owner").await;

        // Guest never recorded: close refused.
        assert_eq!(owner.handle_event(ClientEvent::Close).await, ControlFlow::Continue(()));
        let reply = last_notification(&mut owner_rx).expect("reply");
        assert_eq!(reply["event"], "error");

        // Guest records a segment; close now tears the room down.
        guest.peer.recorder.start(Duration::from_secs(60)).expect("start");
        guest.peer.recorder.stop().expect("stop");
        assert_eq!(owner.handle_event(ClientEvent::Close).await, ControlFlow::Break(()));
        assert!(state.manager.get(&RoomId::from("r1")).is_none());
    }

    #[tokio::test]
    async fn test_approve_meeting_flips_ballot() {
        let (state, directory) = seeded_state();
        let (session, _rx) = join_session(&state, "r1", "guest").await;

        assert_eq!(
            session.handle_event(ClientEvent::ApproveMeeting).await,
            ControlFlow::Continue(())
        );
        state.manager.teardown(&RoomId::from("r1")).await;

        let results = directory.results();
        assert_eq!(results[0].1, vec![UserId::from("guest")]);
    }

    #[tokio::test]
    async fn test_get_users_replies_privately() {
        let (state, _) = seeded_state();
        let (session, mut rx) = join_session(&state, "r1", "guest").await;

        assert_eq!(
            session.handle_event(ClientEvent::GetUsers).await,
            ControlFlow::Continue(())
        );
        let reply = last_notification(&mut rx).expect("reply");
        assert_eq!(reply["state"], "user_data");
        assert_eq!(reply["message"]["users"][0]["user_id"], "guest");
        assert_eq!(reply["message"]["users"][0]["recorded_file"], "not_recorded");
    }

    #[tokio::test]
    async fn test_unknown_event_is_ignored() {
        let (state, _) = seeded_state();
        let (session, _rx) = join_session(&state, "r1", "guest").await;
        assert_eq!(
            session
                .handle_event(ClientEvent::Unknown("dance".to_string()))
                .await,
            ControlFlow::Continue(())
        );
    }

    #[tokio::test]
    async fn test_expire_owner_gate() {
        let (state, _) = seeded_state();
        let (guest, mut guest_rx) = join_session(&state, "r1", "guest").await;
        let _ = guest.handle_event(ClientEvent::Expire("12345".into())).await;
        let reply = last_notification(&mut guest_rx).expect("reply");
        assert_eq!(reply["event"], "error");

        let (owner, mut owner_rx) = join_session(&state, "r1", "owner").await;
        let at = chrono::Utc::now().timestamp() + 300;
        let _ = owner.handle_event(ClientEvent::Expire(at.to_string())).await;
        let reply = last_notification(&mut owner_rx).expect("reply");
        assert_eq!(reply["event"], "notification");
        assert_eq!(reply["state"], "expire_verification");
        assert_eq!(owner.room.expiry().timestamp(), at);
    }

    #[tokio::test]
    async fn test_meet_record_owner_only_and_chunks() {
        let (state, _) = seeded_state();
        let (guest, mut guest_rx) = join_session(&state, "r1", "guest").await;
        let _ = guest.handle_event(ClientEvent::InitMeetRecord).await;
        let reply = last_notification(&mut guest_rx).expect("reply");
        assert_eq!(reply["event"], "error");

        let (owner, _owner_rx) = join_session(&state, "r1", "owner").await;
        let _ = owner.handle_event(ClientEvent::InitMeetRecord).await;
        assert!(owner.meet.is_active());
        assert!(owner.meet.write_chunk(b"raw-bytes"));

        let _ = owner.handle_event(ClientEvent::StopMeetRecord).await;
        assert!(!owner.meet.is_active());
        assert_eq!(state.scheduler.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_stopped_segment_uploads_on_disconnect() {
        let (state, _) = seeded_state();
        let (session, _rx) = join_session(&state, "r1", "guest").await;

        let _ = session.handle_event(ClientEvent::StartRecord("60".into())).await;
        let _ = session.handle_event(ClientEvent::StopRecord).await;
        assert_eq!(session.peer.recorder.state(), RecordingState::Recorded);

        // A disconnect before confirm_file must still queue the closed pair.
        session.cleanup().await;
        assert_eq!(state.scheduler.pending_count(), 1);
    }
}
