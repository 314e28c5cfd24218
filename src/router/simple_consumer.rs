//! Consumer over a single RTP stream, no spatial/temporal layer selection.


use crate::codecs::{self, EncodeResult, EncodingContext};
use crate::data_structures::AppData;
use crate::rtp_packet::RtpPacket;
use crate::rtp_parameters::{
    MediaKind, MimeType, RtcpFeedback, RtpEncodingParameters, RtpParameters,
};
use crate::rtp_stream::{
    RtpStreamParams, RTCP_MAX_AUDIO_INTERVAL_MS, RTCP_MAX_VIDEO_INTERVAL_MS,
};
use crate::rtp_stream_recv::RtpStreamRecv;
use crate::rtp_stream_send::{KeyFrameRequestKind, RtpStreamSend};
use crate::seq_manager::SeqManager;
use log::{debug, warn};
use nohash_hasher::IntSet;
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::SourceDescriptionChunk;
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::consumer::{
    Consumer, ConsumerDump, ConsumerError, ConsumerId, ConsumerListener, ConsumerOptions,
    ConsumerScore, ConsumerStat,
};

/// Per-subscriber forwarding engine: ingests the producer's packet stream and emits a rewritten
/// stream that stays monotone across resyncs, pauses and producer restarts, and that begins on a
/// key frame whenever the codec has one to offer.
pub struct SimpleConsumer {
    id: ConsumerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    consumable_rtp_encodings: Vec<RtpEncodingParameters>,
    supported_codec_payload_types: IntSet<u8>,
    paused: bool,
    producer_paused: bool,
    sync_required: bool,
    key_frame_supported: bool,
    mime_type: MimeType,
    output_ssrc: u32,
    encoding_context: Option<Box<dyn EncodingContext>>,
    producer_rtp_stream: Option<Weak<RefCell<RtpStreamRecv>>>,
    rtp_stream: RtpStreamSend,
    rtp_seq_manager: SeqManager<u16>,
    rtp_timestamp_manager: SeqManager<u32>,
    max_rtcp_interval: u64,
    last_rtcp_sent_time: u64,
    listener: Rc<dyn ConsumerListener>,
    app_data: AppData,
}

impl SimpleConsumer {
    /// Validate options and build the consumer with its send stream.
    pub fn new(
        options: ConsumerOptions,
        producer_paused: bool,
        listener: Rc<dyn ConsumerListener>,
    ) -> Result<Self, ConsumerError> {
        let ConsumerOptions {
            kind,
            rtp_parameters,
            consumable_rtp_encodings,
            paused,
            app_data,
            ..
        } = options;

        if consumable_rtp_encodings.len() != 1 {
            return Err(ConsumerError::InvalidConsumableEncodings(
                consumable_rtp_encodings.len(),
            ));
        }
        consumable_rtp_encodings[0]
            .ssrc
            .ok_or(ConsumerError::MissingSsrc)?;

        if rtp_parameters.encodings.len() != 1 {
            return Err(ConsumerError::InvalidEncodings(
                rtp_parameters.encodings.len(),
            ));
        }

        let encoding = &rtp_parameters.encodings[0];
        let output_ssrc = encoding.ssrc.ok_or(ConsumerError::MissingSsrc)?;
        let media_codec = rtp_parameters
            .codec_for_encoding(encoding)
            .ok_or(ConsumerError::MissingCodec)?;
        let mime_type = media_codec.mime_type();

        let use_in_band_fec = media_codec.parameters().get_number("useinbandfec") == Some(1);
        if use_in_band_fec {
            debug!("in band FEC enabled");
        }

        let mut use_nack = false;
        let mut use_pli = false;
        let mut use_fir = false;
        for feedback in media_codec.rtcp_feedback() {
            match feedback {
                RtcpFeedback::Nack if !use_nack => {
                    debug!("NACK supported");
                    use_nack = true;
                }
                RtcpFeedback::NackPli if !use_pli => {
                    debug!("PLI supported");
                    use_pli = true;
                }
                RtcpFeedback::CcmFir if !use_fir => {
                    debug!("FIR supported");
                    use_fir = true;
                }
                _ => {}
            }
        }

        let params = RtpStreamParams {
            ssrc: output_ssrc,
            payload_type: media_codec.payload_type(),
            mime_type,
            clock_rate: media_codec.clock_rate().get(),
            cname: rtp_parameters.rtcp.cname.clone().unwrap_or_default(),
            use_nack,
            use_pli,
            use_fir,
            use_in_band_fec,
            rtx_ssrc: None,
            rtx_payload_type: None,
        };

        let mut rtp_stream = RtpStreamSend::new(params);

        if let (Some(rtx_codec), Some(rtx)) =
            (rtp_parameters.rtx_codec_for_encoding(encoding), encoding.rtx)
        {
            rtp_stream.set_rtx(rtx_codec.payload_type(), rtx.ssrc);
        }

        if paused || producer_paused {
            rtp_stream.pause();
        }

        let supported_codec_payload_types = rtp_parameters
            .codecs
            .iter()
            .filter(|codec| !codec.is_rtx())
            .map(|codec| codec.payload_type())
            .collect();

        Ok(Self {
            id: ConsumerId::new(),
            kind,
            supported_codec_payload_types,
            paused,
            producer_paused,
            sync_required: true,
            key_frame_supported: mime_type.can_be_key_frame(),
            mime_type,
            output_ssrc,
            encoding_context: codecs::encoding_context_for(mime_type),
            producer_rtp_stream: None,
            rtp_stream,
            rtp_parameters,
            consumable_rtp_encodings,
            rtp_seq_manager: SeqManager::new(),
            rtp_timestamp_manager: SeqManager::new(),
            max_rtcp_interval: match kind {
                MediaKind::Audio => RTCP_MAX_AUDIO_INTERVAL_MS,
                MediaKind::Video => RTCP_MAX_VIDEO_INTERVAL_MS,
            },
            last_rtcp_sent_time: 0,
            listener,
            app_data,
        })
    }

    /// App custom data.
    #[must_use]
    pub fn app_data(&self) -> &AppData {
        &self.app_data
    }

    fn producer_stream(&self) -> Option<Rc<RefCell<RtpStreamRecv>>> {
        self.producer_rtp_stream.as_ref().and_then(Weak::upgrade)
    }

    fn emit_score(&self) {
        self.listener.on_consumer_score(self.id, self.score());
    }
}

impl Consumer for SimpleConsumer {
    fn id(&self) -> ConsumerId {
        self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> &RtpParameters {
        &self.rtp_parameters
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn is_producer_paused(&self) -> bool {
        self.producer_paused
    }

    fn pause(&mut self) {
        if self.paused {
            return;
        }

        self.paused = true;

        if !self.producer_paused {
            self.rtp_stream.pause();
        }
    }

    fn resume(&mut self) -> Option<u32> {
        if !self.paused {
            return None;
        }

        self.paused = false;

        if self.producer_paused {
            return None;
        }

        self.rtp_stream.resume();

        // Sync and wait for a key frame (if supported), otherwise the receiver would NACK a lot
        // of unknown packets.
        self.sync_required = true;

        self.request_key_frame()
    }

    fn producer_paused(&mut self) {
        if self.producer_paused {
            return;
        }

        self.producer_paused = true;

        if !self.paused {
            self.rtp_stream.pause();
        }
    }

    fn producer_resumed(&mut self) -> Option<u32> {
        if !self.producer_paused {
            return None;
        }

        self.producer_paused = false;

        if !self.paused {
            self.rtp_stream.resume();
            self.sync_required = true;
        }

        // The producer already requested a key frame upstream on its own resume.
        None
    }

    fn transport_connected(&mut self) -> Option<u32> {
        self.request_key_frame()
    }

    fn producer_new_rtp_stream(
        &mut self,
        rtp_stream: Weak<RefCell<RtpStreamRecv>>,
        _mapped_ssrc: u32,
    ) {
        self.producer_rtp_stream = Some(rtp_stream);
        self.sync_required = true;

        self.emit_score();
    }

    fn producer_rtp_stream_score(&mut self, _score: u8) {
        self.emit_score();
    }

    fn send_rtp_packet(&mut self, packet: &mut RtpPacket, now_ms: u64) {
        if !self.is_active() {
            return;
        }

        // This may happen if this consumer supports just some codecs of those in the
        // corresponding producer.
        if !self
            .supported_codec_payload_types
            .contains(&packet.payload_type())
        {
            debug!(
                "payload type not supported [payloadType:{}]",
                packet.payload_type()
            );

            return;
        }

        if self.sync_required
            && self.key_frame_supported
            && !codecs::is_key_frame(self.mime_type, &packet.payload)
        {
            self.rtp_stream.stream.packets_discarded += 1;

            return;
        }

        // Whether this is the first packet after re-sync.
        let is_sync_packet = self.sync_required;

        if is_sync_packet {
            if codecs::is_key_frame(self.mime_type, &packet.payload) {
                debug!("sync key frame received");
            }

            self.rtp_seq_manager.sync(packet.sequence_number());
            self.rtp_timestamp_manager.sync(packet.timestamp());

            // Jump the output timestamp forward by the wall-clock time since the last sent
            // packet, so paused time does not read as frozen media at the original cadence.
            if self.rtp_stream.max_packet_ms() != 0 {
                let diff_ms = now_ms.saturating_sub(self.rtp_stream.max_packet_ms());
                let diff_ts = diff_ms * u64::from(self.rtp_stream.clock_rate()) / 1000;

                self.rtp_timestamp_manager.offset(diff_ts as u32);
            }

            if let Some(encoding_context) = self.encoding_context.as_deref_mut() {
                encoding_context.sync_required();
            }

            self.sync_required = false;
        }

        // Rewrite the payload if needed, dropping the packet when the codec says so.
        if let Some(encoding_context) = self.encoding_context.as_deref_mut() {
            if encoding_context.encode(&mut packet.payload) == EncodeResult::Drop {
                self.rtp_seq_manager.drop(packet.sequence_number());
                self.rtp_timestamp_manager.drop(packet.timestamp());

                // If the packet that anchored the resync never went out, the stream is not
                // actually synced: wait for the next anchor instead.
                if is_sync_packet {
                    self.sync_required = true;
                }

                return;
            }
        }

        let seq = self.rtp_seq_manager.input(packet.sequence_number());
        let timestamp = self.rtp_timestamp_manager.input(packet.timestamp());

        // Save original packet fields.
        let orig_ssrc = packet.ssrc();
        let orig_seq = packet.sequence_number();
        let orig_timestamp = packet.timestamp();

        // Rewrite packet.
        packet.set_ssrc(self.output_ssrc);
        packet.set_sequence_number(seq);
        packet.set_timestamp(timestamp);

        if is_sync_packet {
            debug!(
                "sending sync packet [ssrc:{}, seq:{}, ts:{}] from original [seq:{}, ts:{}]",
                packet.ssrc(),
                packet.sequence_number(),
                packet.timestamp(),
                orig_seq,
                orig_timestamp
            );
        }

        if self.rtp_stream.receive_packet(packet, now_ms) {
            self.listener.on_consumer_send_rtp_packet(self.id, packet);
        } else {
            warn!(
                "failed to send packet [ssrc:{}, seq:{}, ts:{}] from original [seq:{}, ts:{}]",
                packet.ssrc(),
                packet.sequence_number(),
                packet.timestamp(),
                orig_seq,
                orig_timestamp
            );
        }

        // Restore packet fields.
        packet.set_ssrc(orig_ssrc);
        packet.set_sequence_number(orig_seq);
        packet.set_timestamp(orig_timestamp);

        // Restore the original payload if needed.
        if let Some(encoding_context) = self.encoding_context.as_deref_mut() {
            encoding_context.restore(&mut packet.payload);
        }
    }

    fn get_rtcp(&mut self, now_ms: u64) -> Option<(SenderReport, SourceDescriptionChunk)> {
        // Early-emit factor on the nominal interval.
        if ((now_ms - self.last_rtcp_sent_time) as f32 * 1.15) < self.max_rtcp_interval as f32 {
            return None;
        }

        let report = self.rtp_stream.get_rtcp_sender_report(now_ms)?;
        let sdes_chunk = self.rtp_stream.get_rtcp_sdes_chunk();

        self.last_rtcp_sent_time = now_ms;

        Some((report, sdes_chunk))
    }

    fn receive_nack(&mut self, nack: &TransportLayerNack, now_ms: u64) {
        if !self.is_active() {
            return;
        }

        for packet in self.rtp_stream.receive_nack(nack, now_ms) {
            self.listener.on_consumer_send_rtp_packet(self.id, &packet);
        }
    }

    fn receive_key_frame_request(&mut self, kind: KeyFrameRequestKind) -> Option<u32> {
        if !self.is_active() {
            return None;
        }

        self.rtp_stream.receive_key_frame_request(kind);

        self.request_key_frame()
    }

    fn receive_rtcp_receiver_report(&mut self, report: &ReceptionReport, now_ms: u64) {
        if self.rtp_stream.receive_rtcp_receiver_report(report, now_ms) {
            self.emit_score();
        }
    }

    fn request_key_frame(&mut self) -> Option<u32> {
        if !self.is_active() || self.kind != MediaKind::Video {
            return None;
        }

        self.producer_stream()?;

        self.consumable_rtp_encodings[0].ssrc
    }

    fn score(&self) -> ConsumerScore {
        let producer = self
            .producer_stream()
            .map_or(0, |rtp_stream| rtp_stream.borrow().score());

        ConsumerScore {
            producer,
            consumer: self.rtp_stream.score(),
        }
    }

    fn loss_percentage(&self) -> f32 {
        let producer_rtp_stream = match (self.is_active(), self.producer_stream()) {
            (true, Some(producer_rtp_stream)) => producer_rtp_stream,
            _ => return 0.0,
        };

        let producer_loss = producer_rtp_stream.borrow().loss_percentage();
        let consumer_loss = self.rtp_stream.loss_percentage();

        // Only the delta attributable to the downstream leg.
        if producer_loss >= consumer_loss {
            0.0
        } else {
            consumer_loss - producer_loss
        }
    }

    fn need_worst_remote_fraction_lost(&self, worst: &mut u8) {
        if !self.is_active() {
            return;
        }

        let fraction_lost = self.rtp_stream.fraction_lost();

        if fraction_lost > *worst {
            *worst = fraction_lost;
        }
    }

    fn get_transmission_rate(&mut self, now_ms: u64) -> u32 {
        if !self.is_active() {
            return 0;
        }

        self.rtp_stream.get_rate(now_ms)
    }

    fn dump(&self) -> ConsumerDump {
        ConsumerDump {
            id: self.id,
            kind: self.kind,
            rtp_parameters: self.rtp_parameters.clone(),
            paused: self.paused,
            producer_paused: self.producer_paused,
            rtp_stream: self.rtp_stream.dump(),
        }
    }

    fn get_stats(&mut self, now_ms: u64) -> Vec<ConsumerStat> {
        let stream = &self.rtp_stream.stream;
        let mut stats = vec![ConsumerStat {
            timestamp: now_ms,
            ssrc: self.output_ssrc,
            rtx_ssrc: stream.params().rtx_ssrc,
            kind: self.kind,
            mime_type: self.mime_type,
            packets_lost: stream.packets_lost,
            fraction_lost: stream.fraction_lost,
            packets_discarded: stream.packets_discarded,
            packets_retransmitted: stream.retransmission_counter.packet_count(),
            packets_repaired: stream.packets_repaired,
            nack_count: stream.nack_count,
            nack_packet_count: stream.nack_rtp_packet_count,
            pli_count: stream.pli_count,
            fir_count: stream.fir_count,
            score: stream.score(),
            packet_count: stream.transmission_counter.packet_count(),
            byte_count: stream.transmission_counter.byte_count(),
            bitrate: 0,
            round_trip_time: self.rtp_stream.rtt_ms(),
            jitter: None,
        }];
        stats[0].bitrate = self.rtp_stream.get_rate(now_ms);

        if let Some(producer_rtp_stream) = self.producer_stream() {
            let mut producer_rtp_stream = producer_rtp_stream.borrow_mut();
            let stream = &producer_rtp_stream.stream;

            let mut stat = ConsumerStat {
                timestamp: now_ms,
                ssrc: stream.ssrc(),
                rtx_ssrc: stream.params().rtx_ssrc,
                kind: self.kind,
                mime_type: stream.params().mime_type,
                packets_lost: stream.packets_lost,
                fraction_lost: stream.fraction_lost,
                packets_discarded: stream.packets_discarded,
                packets_retransmitted: stream.retransmission_counter.packet_count(),
                packets_repaired: stream.packets_repaired,
                nack_count: stream.nack_count,
                nack_packet_count: stream.nack_rtp_packet_count,
                pli_count: stream.pli_count,
                fir_count: stream.fir_count,
                score: stream.score(),
                packet_count: producer_rtp_stream.packet_count(),
                byte_count: producer_rtp_stream.byte_count(),
                bitrate: 0,
                round_trip_time: None,
                jitter: Some(producer_rtp_stream.jitter()),
            };
            stat.bitrate = producer_rtp_stream.get_rate(now_ms);
            stats.push(stat);
        }

        stats
    }
}
