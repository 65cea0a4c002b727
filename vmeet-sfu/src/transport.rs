//! Media transport construction
//!
//! One `TransportFactory` is built at startup and shared by every signaling
//! session; it owns the codec/interceptor registration so each join only
//! pays for peer connection setup.

use std::sync::Arc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use vmeet_core::config::WebRtcConfig;
use vmeet_core::error::Result;

use crate::rtc_err;

pub struct TransportFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl TransportFactory {
    pub fn new(config: &WebRtcConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(rtc_err)?;

        let registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(rtc_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = vec![RTCIceServer {
            urls: config.stun_servers.clone(),
            ..Default::default()
        }];

        Ok(Self { api, ice_servers })
    }

    /// Build a peer connection with two half-open receive transceivers, one
    /// per media kind. The send side is populated later by renegotiation.
    pub async fn create_transport(&self) -> Result<Arc<RTCPeerConnection>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let transport = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(rtc_err)?,
        );

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            transport
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(rtc_err)?;
        }

        Ok(transport)
    }
}
