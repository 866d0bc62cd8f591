//! One-shot SDP offer/answer signaling
//!
//! Builds a peer connection per subscriber: a media engine registering only
//! H.264 with the RTCP feedback the pipeline reacts to, one outbound video
//! track, an RTCP reader translating PLI/FIR into keyframe requests, and a
//! DataChannel handler feeding pointer events into the touch injector. No
//! trickle: the answer is returned once ICE gathering completes.

use std::sync::Arc;

use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use super::packetizer::{H264_CLOCK_RATE, H264_PAYLOAD_TYPE};
use super::registry::SubscriberRegistry;
use super::subscriber::Subscriber;
use crate::device::DeviceSession;
use crate::error::{AppError, Result};
use crate::input::PointerEvent;
use crate::state::AppState;

/// H.264 negotiation profile: constrained baseline 3.1, packetization mode 1.
pub const H264_FMTP_LINE: &str =
    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

const TRACK_ID: &str = "video";
const STREAM_ID: &str = "droidlink";

fn h264_codec_parameters() -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: H264_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line: H264_FMTP_LINE.to_owned(),
            rtcp_feedback: vec![
                RTCPFeedback {
                    typ: "nack".to_owned(),
                    parameter: String::new(),
                },
                RTCPFeedback {
                    typ: "nack".to_owned(),
                    parameter: "pli".to_owned(),
                },
                RTCPFeedback {
                    typ: "ccm".to_owned(),
                    parameter: "fir".to_owned(),
                },
            ],
        },
        payload_type: H264_PAYLOAD_TYPE,
        ..Default::default()
    }
}

/// Handle a browser's SDP offer for `device_serial`.
///
/// On success the subscriber is registered, a keyframe request is on its way
/// to the agent, and the returned answer carries the gathered candidates.
pub async fn open_subscriber(
    state: &Arc<AppState>,
    device_serial: &str,
    offer: RTCSessionDescription,
) -> Result<RTCSessionDescription> {
    let device = state
        .devices
        .get(device_serial)
        .await
        .ok_or_else(|| AppError::DeviceNotFound(device_serial.to_string()))?;

    let mut media_engine = MediaEngine::default();
    media_engine
        .register_codec(h264_codec_parameters(), RTPCodecType::Video)
        .map_err(|e| AppError::WebRtc(format!("register codec: {e}")))?;

    let mut interceptors = Registry::new();
    interceptors = register_default_interceptors(interceptors, &mut media_engine)
        .map_err(|e| AppError::WebRtc(format!("register interceptors: {e}")))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptors)
        .build();

    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .map_err(|e| AppError::WebRtc(format!("create peer connection: {e}")))?,
    );

    let track = Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: H264_CLOCK_RATE,
            ..Default::default()
        },
        TRACK_ID.to_owned(),
        STREAM_ID.to_owned(),
    ));
    let sender = pc
        .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(|e| AppError::WebRtc(format!("add track: {e}")))?;

    let subscriber = Arc::new(Subscriber::new(device_serial, pc.clone(), track));
    info!(
        subscriber = %subscriber.id,
        device = %device_serial,
        "subscriber created"
    );

    spawn_rtcp_reader(sender, device.clone(), subscriber.id.clone());
    wire_data_channels(&pc, state.clone(), device.clone());
    wire_state_changes(&pc, state.subscribers.clone(), subscriber.id.clone());

    state.subscribers.add(subscriber.clone()).await;

    let answer = match negotiate(&pc, offer).await {
        Ok(answer) => answer,
        Err(e) => {
            state.subscribers.remove(&subscriber.id).await;
            subscriber.close().await;
            return Err(e);
        }
    };

    // New subscriber: hold delivery until the agent produces a clean entry
    // point, and nudge it to do so right now.
    device.mark_keyframe_needed().await;
    device.request_keyframe().await;

    Ok(answer)
}

/// SDP exchange, waiting for ICE gathering to finish (no trickle).
async fn negotiate(
    pc: &Arc<RTCPeerConnection>,
    offer: RTCSessionDescription,
) -> Result<RTCSessionDescription> {
    pc.set_remote_description(offer)
        .await
        .map_err(|e| AppError::SignalingInvalid(format!("set remote description: {e}")))?;

    let answer = pc
        .create_answer(None)
        .await
        .map_err(|e| AppError::WebRtc(format!("create answer: {e}")))?;

    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(answer)
        .await
        .map_err(|e| AppError::WebRtc(format!("set local description: {e}")))?;
    let _ = gather_complete.recv().await;

    pc.local_description()
        .await
        .ok_or_else(|| AppError::WebRtc("no local description after gathering".to_string()))
}

/// Translate RTCP feedback from this subscriber into device keyframe state.
fn spawn_rtcp_reader(sender: Arc<RTCRtpSender>, device: Arc<DeviceSession>, subscriber_id: String) {
    tokio::spawn(async move {
        loop {
            let (packets, _) = match sender.read_rtcp().await {
                Ok(result) => result,
                Err(_) => break,
            };
            for packet in packets {
                let any = packet.as_any();
                if any.downcast_ref::<PictureLossIndication>().is_some() {
                    debug!(subscriber = %subscriber_id, "PLI received");
                    device.on_keyframe_feedback("PLI").await;
                } else if any.downcast_ref::<FullIntraRequest>().is_some() {
                    debug!(subscriber = %subscriber_id, "FIR received");
                    device.on_keyframe_feedback("FIR").await;
                }
                // Receiver reports and anything else are not ours to act on.
            }
        }
        debug!(subscriber = %subscriber_id, "rtcp reader stopped");
    });
}

/// Feed pointer events from any DataChannel the peer opens into the device.
fn wire_data_channels(pc: &Arc<RTCPeerConnection>, state: Arc<AppState>, device: Arc<DeviceSession>) {
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let state = state.clone();
        let device = device.clone();
        Box::pin(async move {
            info!(label = %dc.label(), device = %device.serial, "data channel opened");
            let label = dc.label().to_string();
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                let state = state.clone();
                let device = device.clone();
                let label = label.clone();
                Box::pin(async move {
                    let event: PointerEvent = match serde_json::from_slice(&msg.data) {
                        Ok(event) => event,
                        Err(e) => {
                            debug!(%label, "unparseable pointer event: {e}");
                            return;
                        }
                    };
                    if let Err(e) = state.touch.handle(&device, event).await {
                        warn!(device = %device.serial, "pointer injection failed: {e}");
                    }
                })
            }));
        })
    }));
}

/// Deregister the subscriber once its connection reaches a terminal state.
fn wire_state_changes(
    pc: &Arc<RTCPeerConnection>,
    registry: Arc<SubscriberRegistry>,
    subscriber_id: String,
) {
    pc.on_peer_connection_state_change(Box::new(move |connection_state: RTCPeerConnectionState| {
        let registry = registry.clone();
        let subscriber_id = subscriber_id.clone();
        Box::pin(async move {
            info!(subscriber = %subscriber_id, state = %connection_state, "peer connection state");
            if matches!(
                connection_state,
                RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed
                    | RTCPeerConnectionState::Disconnected
            ) {
                if let Some(subscriber) = registry.remove(&subscriber_id).await {
                    tokio::spawn(async move { subscriber.close().await });
                }
            }
        })
    }));
}
