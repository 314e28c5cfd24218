//! Consumer contract and shared consumer types.

use crate::rtp_packet::RtpPacket;
use crate::rtp_parameters::{MediaKind, MimeType, RtpParameters};
use crate::rtp_stream::RtpStreamDump;
use crate::rtp_stream_recv::RtpStreamRecv;
use crate::rtp_stream_send::KeyFrameRequestKind;
use crate::macros::uuid_based_wrapper_type;
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::SourceDescriptionChunk;
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Weak;
use thiserror::Error;

uuid_based_wrapper_type!(
    /// Consumer identifier.
    ConsumerId
);

/// Stream quality as published in `score` notifications: the send-side stream score paired with
/// the score of the producer stream being consumed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScore {
    /// Score of the producer RTP stream being consumed, 0 when unknown.
    pub producer: u8,
    /// Score of the send-side RTP stream of the consumer.
    pub consumer: u8,
}

/// Consumer creation settings, assembled by the control plane.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConsumerOptions {
    /// The id of the producer to consume.
    pub producer_id: super::producer::ProducerId,
    /// Media kind.
    pub kind: MediaKind,
    /// RTP parameters describing what this consumer sends to its endpoint.
    pub rtp_parameters: RtpParameters,
    /// The single mapped encoding the producer writes into the router.
    pub consumable_rtp_encodings: Vec<crate::rtp_parameters::RtpEncodingParameters>,
    /// Whether the consumer starts paused.
    pub paused: bool,
    /// Custom application data.
    pub app_data: crate::data_structures::AppData,
}

impl ConsumerOptions {
    #[must_use]
    pub fn new(
        producer_id: super::producer::ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        consumable_rtp_encodings: Vec<crate::rtp_parameters::RtpEncodingParameters>,
    ) -> Self {
        Self {
            producer_id,
            kind,
            rtp_parameters,
            consumable_rtp_encodings,
            paused: false,
            app_data: crate::data_structures::AppData::default(),
        }
    }
}

/// Error preventing consumer creation.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The mapped encoding set must describe exactly one stream.
    #[error("invalid consumableRtpEncodings with size != 1 (size = {0})")]
    InvalidConsumableEncodings(usize),
    /// RTP parameters must describe exactly one outgoing encoding.
    #[error("invalid encodings with size != 1 (size = {0})")]
    InvalidEncodings(usize),
    /// No media codec matches the encoding.
    #[error("no media codec for the given encoding")]
    MissingCodec,
    /// An encoding is missing its SSRC.
    #[error("encoding is missing its ssrc")]
    MissingSsrc,
    /// The consumed producer does not exist in the router.
    #[error("producer {0} not found")]
    ProducerNotFound(super::producer::ProducerId),
}

/// Informational snapshot for `consumer.dump`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConsumerDump {
    pub id: ConsumerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
    pub producer_paused: bool,
    pub rtp_stream: RtpStreamDump,
}

/// RTC statistics of a consumer stream, send or receive side.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConsumerStat {
    pub timestamp: u64,
    pub ssrc: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtx_ssrc: Option<u32>,
    pub kind: MediaKind,
    pub mime_type: MimeType,
    pub packets_lost: u32,
    pub fraction_lost: u8,
    pub packets_discarded: usize,
    pub packets_retransmitted: u64,
    pub packets_repaired: usize,
    pub nack_count: usize,
    pub nack_packet_count: usize,
    pub pli_count: usize,
    pub fir_count: usize,
    pub score: u8,
    pub packet_count: u64,
    pub byte_count: u64,
    pub bitrate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_trip_time: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<u32>,
}

/// Sink handle the owning transport passes at construction. Outbound RTP (including
/// retransmissions) and score notifications go through it.
pub trait ConsumerListener {
    /// A packet (already rewritten) must go out on the consumer's transport.
    fn on_consumer_send_rtp_packet(&self, consumer_id: ConsumerId, packet: &RtpPacket);

    /// The consumer's quality score changed.
    fn on_consumer_score(&self, consumer_id: ConsumerId, score: ConsumerScore);
}

/// Contract between the router/transport and any consumer variant.
///
/// Methods that may raise an upstream key frame need return the mapped SSRC to request on; the
/// router routes it to the producer synchronously.
pub trait Consumer {
    fn id(&self) -> ConsumerId;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> &RtpParameters;

    /// Whether the consumer itself is paused.
    fn is_paused(&self) -> bool;

    /// Whether the consumed producer is paused.
    fn is_producer_paused(&self) -> bool;

    /// Paused neither by itself nor by its producer.
    fn is_active(&self) -> bool {
        !self.is_paused() && !self.is_producer_paused()
    }

    fn pause(&mut self);

    /// Resume the consumer. Returns the mapped SSRC to request a key frame on, if one is needed.
    fn resume(&mut self) -> Option<u32>;

    fn producer_paused(&mut self);

    fn producer_resumed(&mut self) -> Option<u32>;

    /// The transport carrying this consumer got connected.
    fn transport_connected(&mut self) -> Option<u32>;

    /// The producer replaced its RTP stream. The old handle is dropped wholesale; buffers are
    /// kept.
    fn producer_new_rtp_stream(&mut self, rtp_stream: Weak<RefCell<RtpStreamRecv>>, mapped_ssrc: u32);

    /// The producer stream's quality score changed.
    fn producer_rtp_stream_score(&mut self, score: u8);

    /// Forward a producer packet: rewrite, account, emit through the listener, restore.
    fn send_rtp_packet(&mut self, packet: &mut RtpPacket, now_ms: u64);

    /// Sender Report plus SDES chunk when the RTCP interval elapsed and there is data to report.
    fn get_rtcp(&mut self, now_ms: u64) -> Option<(SenderReport, SourceDescriptionChunk)>;

    fn receive_nack(&mut self, nack: &TransportLayerNack, now_ms: u64);

    fn receive_key_frame_request(&mut self, kind: KeyFrameRequestKind) -> Option<u32>;

    fn receive_rtcp_receiver_report(&mut self, report: &ReceptionReport, now_ms: u64);

    fn request_key_frame(&mut self) -> Option<u32>;

    /// Current `{producer, consumer}` score pair.
    fn score(&self) -> ConsumerScore;

    /// Loss attributable to the downstream leg, in percent.
    fn loss_percentage(&self) -> f32;

    /// Raise `worst` to this consumer's remote fraction lost if it is worse.
    fn need_worst_remote_fraction_lost(&self, worst: &mut u8);

    fn get_transmission_rate(&mut self, now_ms: u64) -> u32;

    fn dump(&self) -> ConsumerDump;

    /// Stats array: send side first, then the consumed producer stream when known.
    fn get_stats(&mut self, now_ms: u64) -> Vec<ConsumerStat>;
}
