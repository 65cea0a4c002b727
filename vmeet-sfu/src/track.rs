//! Track registry and media relay
//!
//! Each incoming remote track gets a locally re-publishable twin registered
//! in the room; the relay loop copies RTP from the remote to the twin, and
//! optionally into the peer's recorder while a segment window is open.

use std::sync::Arc;

use tracing::debug;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

use crate::recording::Recorder;
use crate::room::Room;
use crate::signal::signal_peer_connections;
use crate::types::{MediaKind, TrackId};

/// Build the local twin of a remote track, same codec, id and stream id.
#[must_use]
pub fn local_twin(remote: &TrackRemote) -> Arc<TrackLocalStaticRTP> {
    Arc::new(TrackLocalStaticRTP::new(
        remote.codec().capability,
        remote.id(),
        remote.stream_id(),
    ))
}

/// Put a local track into the room's registry and renegotiate.
pub async fn register_track(room: &Arc<Room>, id: TrackId, local: Arc<TrackLocalStaticRTP>) {
    room.peers.lock().await.track_locals.insert(id, local);
    signal_peer_connections(Arc::clone(room)).await;
}

/// Drop a track from the registry and renegotiate.
pub async fn unregister_track(room: &Arc<Room>, id: &TrackId) {
    room.peers.lock().await.track_locals.remove(id);
    signal_peer_connections(Arc::clone(room)).await;
}

/// Relay one remote track for its whole lifetime. Registers the local twin,
/// copies packets until the remote side ends, then unregisters. The
/// recorder tee is a no-op outside a recording window.
pub fn spawn_track_relay(room: Arc<Room>, remote: Arc<TrackRemote>, recorder: Arc<Recorder>) {
    tokio::spawn(async move {
        let id = TrackId::from(remote.id());
        let kind = MediaKind::from_mime(&remote.codec().capability.mime_type);
        let local = local_twin(&remote);
        debug!(track_id = %id, %kind, "incoming track, starting relay");

        register_track(&room, id.clone(), Arc::clone(&local)).await;

        loop {
            let packet = match remote.read_rtp().await {
                Ok((packet, _)) => packet,
                Err(_) => break,
            };
            recorder.write(kind, &packet);
            if local.write_rtp(&packet).await.is_err() {
                break;
            }
        }

        debug!(track_id = %id, "relay ended, unregistering track");
        unregister_track(&room, &id).await;
    });
}
