//! Renegotiation engine
//!
//! Invoked whenever the track registry or the peer set changes. A pass is
//! not safe to run concurrently per peer (an offer may be in flight), so the
//! whole reconciliation is retried under the peer set lock until it reaches
//! a fixed point or the attempt cap, after which the remaining work is shed
//! to a delayed retry task.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use crate::message::Envelope;
use crate::room::{PeerSet, Room};
use crate::types::TrackId;

const MAX_SYNC_ATTEMPTS: usize = 25;
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Drive every peer's sender set and offer/answer cycle to match the track
/// registry. Holds the peer set lock for the whole pass; offer delivery is a
/// queue push, so the hold time is bounded by reconciliation work, not by
/// network round trips.
pub fn signal_peer_connections(room: Arc<Room>) -> BoxFuture<'static, ()> {
    async move {
        let exhausted = {
            let mut peers = room.peers.lock().await;
            let mut attempt = 0;
            loop {
                if attempt == MAX_SYNC_ATTEMPTS {
                    break true;
                }
                attempt += 1;
                if !attempt_sync(&mut peers).await {
                    break false;
                }
            }
        };

        if exhausted {
            debug!(room_id = %room.id, "renegotiation attempt cap reached, deferring retry");
            let retry_room = Arc::clone(&room);
            tokio::spawn(async move {
                tokio::time::sleep(RETRY_DELAY).await;
                signal_peer_connections(retry_room).await;
            });
        }

        dispatch_keyframes(&room).await;
    }
    .boxed()
}

/// One reconciliation pass. Returns true if anything changed or failed, in
/// which case the caller must run another pass.
async fn attempt_sync(peers: &mut PeerSet) -> bool {
    let mut retry = false;
    let mut i = 0;

    while i < peers.connections.len() {
        let peer = Arc::clone(&peers.connections[i]);
        if peer.is_closed() {
            peers.connections.remove(i);
            retry = true;
            continue;
        }
        i += 1;

        // Track ids this peer already sends, plus its own incoming tracks
        // so a peer is never offered its own media back.
        let mut existing: HashSet<TrackId> = HashSet::new();

        for sender in peer.transport.get_senders().await {
            let Some(track) = sender.track().await else {
                continue;
            };
            let id = TrackId::from(track.id());
            if peers.track_locals.contains_key(&id) {
                existing.insert(id);
            } else {
                if let Err(err) = peer.transport.remove_track(&sender).await {
                    warn!(track_id = %id, error = %err, "failed to remove stale sender");
                }
                retry = true;
            }
        }

        for receiver in peer.transport.get_receivers().await {
            for track in receiver.tracks().await {
                existing.insert(TrackId::from(track.id()));
            }
        }

        let missing: Vec<Arc<TrackLocalStaticRTP>> = peers
            .track_locals
            .iter()
            .filter(|(id, _)| !existing.contains(id))
            .map(|(_, track)| Arc::clone(track))
            .collect();
        for track in missing {
            if let Err(err) = peer
                .transport
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
            {
                warn!(error = %err, "failed to add track to peer");
            }
            retry = true;
        }

        let offer = match peer.transport.create_offer(None).await {
            Ok(offer) => offer,
            Err(err) => {
                warn!(connection_id = %peer.connection_id, error = %err, "create_offer failed");
                retry = true;
                continue;
            }
        };

        if let Err(err) = peer.transport.set_local_description(offer.clone()).await {
            // A prior offer still outstanding on a transport that never got
            // past its initial state will fail this way forever; abandon the
            // peer instead of retrying. It is purged as closed next pass.
            if peer.transport.signaling_state() == RTCSignalingState::HaveLocalOffer
                && peer.transport.connection_state() == RTCPeerConnectionState::New
            {
                debug!(connection_id = %peer.connection_id, "abandoning peer stuck mid-offer");
                peer.close().await;
                continue;
            }
            warn!(connection_id = %peer.connection_id, error = %err, "set_local_description failed");
            retry = true;
            continue;
        }

        let offer_json = match serde_json::to_string(&offer) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "offer serialization failed");
                retry = true;
                continue;
            }
        };
        if peer.channel.send_envelope(&Envelope::offer(offer_json)).is_err() {
            retry = true;
        }
    }

    retry
}

/// Ask every incoming track's source for a keyframe, bounding visual error
/// propagation after packet loss.
pub async fn dispatch_keyframes(room: &Room) {
    let peers = room.peers.lock().await;
    for peer in &peers.connections {
        for receiver in peer.transport.get_receivers().await {
            for track in receiver.tracks().await {
                let _ = peer
                    .transport
                    .write_rtcp(&[Box::new(PictureLossIndication {
                        sender_ssrc: 0,
                        media_ssrc: track.ssrc(),
                    })])
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{OutFrame, SignalChannel};
    use crate::peer::Peer;
    use crate::recording::FileRecordingMedia;
    use crate::transport::TransportFactory;
    use tokio::sync::mpsc::UnboundedReceiver;
    use vmeet_core::config::{RecordingConfig, WebRtcConfig};
    use vmeet_core::directory::RoomInfo;
    use vmeet_core::models::{RoomId, UserId};
    use webrtc::api::media_engine::MIME_TYPE_VP8;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    async fn add_peer(
        room: &Room,
        factory: &TransportFactory,
        media: &Arc<FileRecordingMedia>,
        user: &str,
    ) -> (Arc<Peer>, UnboundedReceiver<OutFrame>) {
        let transport = factory.create_transport().await.expect("transport");
        let (channel, rx) = SignalChannel::new();
        let peer = Arc::new(Peer::new(
            UserId::from(user),
            user,
            transport,
            channel,
            Arc::clone(media) as Arc<dyn crate::recording::RecordingMedia>,
        ));
        room.peers.lock().await.connections.push(Arc::clone(&peer));
        (peer, rx)
    }

    fn test_room() -> Arc<Room> {
        Arc::new(Room::new(RoomInfo {
            room_id: RoomId::from("r1"),
            owner_id: UserId::from("owner"),
            expected_users: 2,
        }))
    }

    fn new_local_track(id: &str) -> Arc<TrackLocalStaticRTP> {
        Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            format!("stream-{id}"),
        ))
    }

    async fn sender_track_ids(peer: &Peer) -> Vec<String> {
        let mut ids = Vec::new();
        for sender in peer.transport.get_senders().await {
            if let Some(track) = sender.track().await {
                ids.push(track.id().to_owned());
            }
        }
        ids
    }

    fn drain_events(rx: &mut UnboundedReceiver<OutFrame>) -> Vec<String> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let OutFrame::Text(text) = frame {
                let value: serde_json::Value = serde_json::from_str(&text).expect("json");
                events.push(value["event"].as_str().unwrap_or_default().to_owned());
            }
        }
        events
    }

    #[tokio::test]
    async fn test_registry_tracks_converge_to_sender_sets() {
        let factory = TransportFactory::new(&WebRtcConfig::default()).expect("factory");
        let spool = tempfile::tempdir().expect("tempdir");
        let media = Arc::new(FileRecordingMedia::new(
            spool.path(),
            &RecordingConfig::default(),
        ));
        let room = test_room();

        let (peer_a, mut rx_a) = add_peer(&room, &factory, &media, "alice").await;
        let (peer_b, mut rx_b) = add_peer(&room, &factory, &media, "bob").await;

        room.peers
            .lock()
            .await
            .track_locals
            .insert(TrackId::from("track-x"), new_local_track("track-x"));

        signal_peer_connections(Arc::clone(&room)).await;

        assert_eq!(sender_track_ids(&peer_a).await, vec!["track-x".to_owned()]);
        assert_eq!(sender_track_ids(&peer_b).await, vec!["track-x".to_owned()]);

        assert!(drain_events(&mut rx_a).contains(&"offer".to_owned()));
        assert!(drain_events(&mut rx_b).contains(&"offer".to_owned()));
    }

    #[tokio::test]
    async fn test_removed_track_is_dropped_from_senders() {
        let factory = TransportFactory::new(&WebRtcConfig::default()).expect("factory");
        let spool = tempfile::tempdir().expect("tempdir");
        let media = Arc::new(FileRecordingMedia::new(
            spool.path(),
            &RecordingConfig::default(),
        ));
        let room = test_room();
        let (peer_a, _rx_a) = add_peer(&room, &factory, &media, "alice").await;

        let track_id = TrackId::from("track-x");
        room.peers
            .lock()
            .await
            .track_locals
            .insert(track_id.clone(), new_local_track("track-x"));
        signal_peer_connections(Arc::clone(&room)).await;
        assert_eq!(sender_track_ids(&peer_a).await, vec!["track-x".to_owned()]);

        room.peers.lock().await.track_locals.remove(&track_id);
        signal_peer_connections(Arc::clone(&room)).await;
        assert!(sender_track_ids(&peer_a).await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_transport_is_purged() {
        let factory = TransportFactory::new(&WebRtcConfig::default()).expect("factory");
        let spool = tempfile::tempdir().expect("tempdir");
        let media = Arc::new(FileRecordingMedia::new(
            spool.path(),
            &RecordingConfig::default(),
        ));
        let room = test_room();
        let (_peer_a, _rx_a) = add_peer(&room, &factory, &media, "alice").await;
        let (peer_b, _rx_b) = add_peer(&room, &factory, &media, "bob").await;

        peer_b.transport.close().await.expect("close");
        signal_peer_connections(Arc::clone(&room)).await;

        let peers = room.peers.lock().await;
        assert_eq!(peers.connections.len(), 1);
        assert_eq!(peers.connections[0].user_id, UserId::from("alice"));
    }
}
