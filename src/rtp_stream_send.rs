//! Send-side RTP stream: retransmission buffer, RTX remapping, RTCP Sender Report generation and
//! remote-loss score tracking.


use crate::rtp_packet::RtpPacket;
use crate::rtp_stream::{compact_ntp, ms_to_ntp, RtpStream, RtpStreamDump, RtpStreamParams};
use crate::seq_manager::SequenceNumber;
use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, warn};
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::{SdesType, SourceDescriptionChunk, SourceDescriptionItem};
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use std::collections::VecDeque;

/// Retransmission buffer capacity when NACK is negotiated.
const RETRANSMISSION_BUFFER_SIZE: usize = 1500;
/// Buffered packets older than this are gone for retransmission purposes.
const RETRANSMISSION_MAX_AGE_MS: u64 = 1000;
/// A given sequence number is resent at most once per this interval.
const MIN_RESEND_INTERVAL_MS: u64 = 20;

/// Kind of downstream key frame request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum KeyFrameRequestKind {
    /// Picture Loss Indication.
    Pli,
    /// Full Intra Request.
    Fir,
}

#[derive(Debug)]
struct StorageItem {
    packet: RtpPacket,
    received_at_ms: u64,
    resent_at_ms: Option<u64>,
}

/// Send-side stream owned by a consumer.
///
/// Buffered packets mirror what was actually forwarded (post rewrite), so retransmissions carry
/// exactly the bytes the receiver missed.
#[derive(Debug)]
pub struct RtpStreamSend {
    pub(crate) stream: RtpStream,
    buffer: VecDeque<StorageItem>,
    buffer_capacity: usize,
    rtx_seq: u16,
    payload_octets: u32,
    sent_since_last_sr: bool,
}

impl RtpStreamSend {
    #[must_use]
    pub fn new(params: RtpStreamParams) -> Self {
        let buffer_capacity = if params.use_nack {
            RETRANSMISSION_BUFFER_SIZE
        } else {
            0
        };

        Self {
            stream: RtpStream::new(params),
            buffer: VecDeque::new(),
            buffer_capacity,
            rtx_seq: fastrand::u16(..),
            payload_octets: 0,
            sent_since_last_sr: false,
        }
    }

    /// Stream parameters.
    #[must_use]
    pub fn params(&self) -> &RtpStreamParams {
        self.stream.params()
    }

    /// Current quality score, 0..=10.
    #[must_use]
    pub fn score(&self) -> u8 {
        self.stream.score()
    }

    /// Remote fraction lost as last reported (Q0.8).
    #[must_use]
    pub fn fraction_lost(&self) -> u8 {
        self.stream.fraction_lost
    }

    /// Remote loss as a percentage.
    #[must_use]
    pub fn loss_percentage(&self) -> f32 {
        self.stream.loss_percentage()
    }

    /// Wall-clock time of the newest packet sent.
    #[must_use]
    pub fn max_packet_ms(&self) -> u64 {
        self.stream.max_packet_ms()
    }

    /// Codec clock rate in Hertz.
    #[must_use]
    pub fn clock_rate(&self) -> u32 {
        self.stream.clock_rate()
    }

    /// Configure the associated RTX stream. Idempotent.
    pub fn set_rtx(&mut self, payload_type: u8, ssrc: u32) {
        self.stream.set_rtx(payload_type, ssrc);
    }

    /// Gate retransmissions and Sender Report generation. Buffered packets are dropped since the
    /// stream re-anchors on resume and nobody will ask for them again.
    pub fn pause(&mut self) {
        self.stream.paused = true;
        self.buffer.clear();
    }

    pub fn resume(&mut self) {
        self.stream.paused = false;
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.stream.is_paused()
    }

    /// Transmission plus retransmission rate in bits per second.
    pub fn get_rate(&mut self, now_ms: u64) -> u32 {
        self.stream.get_rate(now_ms)
    }

    /// Account for an outgoing packet. Returns `false` for packets that must not be sent: empty
    /// payloads or invalid sequence progression.
    pub fn receive_packet(&mut self, packet: &RtpPacket, now_ms: u64) -> bool {
        if packet.payload.is_empty() {
            return false;
        }

        if !self.stream.update_seq(packet.sequence_number()) {
            warn!(
                "invalid packet sequence progression [ssrc:{}, seq:{}]",
                packet.ssrc(),
                packet.sequence_number()
            );

            return false;
        }

        if self.stream.max_packet_ms == 0
            || packet.timestamp().is_higher_than(self.stream.max_packet_ts)
        {
            self.stream.max_packet_ts = packet.timestamp();
            self.stream.max_packet_ms = now_ms;
        }

        self.stream
            .transmission_counter
            .update(packet.size(), now_ms);
        self.payload_octets = self
            .payload_octets
            .wrapping_add(packet.payload.len() as u32);
        self.sent_since_last_sr = true;

        if self.buffer_capacity > 0 {
            self.store_packet(packet, now_ms);
        }

        true
    }

    /// Handle a Generic NACK, returning the packets to retransmit. RTX-wrapped when RTX is
    /// configured, plain copies otherwise. Malformed or unknown items are skipped individually.
    pub fn receive_nack(&mut self, nack: &TransportLayerNack, now_ms: u64) -> Vec<RtpPacket> {
        let mut retransmissions = Vec::new();

        if self.stream.paused {
            return retransmissions;
        }

        self.stream.nack_count += 1;

        for nack_pair in &nack.nacks {
            for seq in nack_pair.packet_list() {
                let item = match self
                    .buffer
                    .iter_mut()
                    .rev()
                    .find(|item| item.packet.sequence_number() == seq)
                {
                    Some(item) => item,
                    None => {
                        debug!("NACKed packet not in the buffer [seq:{seq}]");
                        continue;
                    }
                };

                if let Some(resent_at_ms) = item.resent_at_ms {
                    if now_ms < resent_at_ms + MIN_RESEND_INTERVAL_MS {
                        continue;
                    }
                }

                item.resent_at_ms = Some(now_ms);

                let packet = match (self.stream.params.rtx_ssrc, self.stream.params.rtx_payload_type)
                {
                    (Some(rtx_ssrc), Some(rtx_payload_type)) => {
                        let rtx_seq = self.rtx_seq;
                        self.rtx_seq = self.rtx_seq.wrapping_add(1);

                        rtx_wrap(&item.packet, rtx_ssrc, rtx_payload_type, rtx_seq)
                    }
                    _ => item.packet.clone(),
                };

                self.stream.nack_rtp_packet_count += 1;
                self.stream
                    .retransmission_counter
                    .update(packet.size(), now_ms);

                retransmissions.push(packet);
            }
        }

        retransmissions
    }

    /// Count a downstream PLI or FIR. Propagating the request upstream is the caller's job.
    pub fn receive_key_frame_request(&mut self, kind: KeyFrameRequestKind) {
        match kind {
            KeyFrameRequestKind::Pli => self.stream.pli_count += 1,
            KeyFrameRequestKind::Fir => self.stream.fir_count += 1,
        }
    }

    /// Ingest a reception report block for this stream. Returns whether the quality score
    /// changed.
    pub fn receive_rtcp_receiver_report(&mut self, report: &ReceptionReport, now_ms: u64) -> bool {
        self.stream.fraction_lost = report.fraction_lost;
        self.stream.packets_lost = report.total_lost;

        if report.last_sender_report != 0 {
            let now_compact = compact_ntp(ms_to_ntp(now_ms));
            let rtt_units = now_compact
                .wrapping_sub(report.last_sender_report)
                .wrapping_sub(report.delay);

            // A wrapped (negative) difference means bogus LSR/DLSR, not a day-long RTT.
            if rtt_units < 1 << 31 {
                self.stream.rtt_ms = Some(rtt_units as f32 * 1000.0 / 65536.0);
            }
        }

        self.stream.monitor.update(report.fraction_lost).is_some()
    }

    /// Round-trip time learned from receiver reports, in milliseconds.
    #[must_use]
    pub fn rtt_ms(&self) -> Option<f32> {
        self.stream.rtt_ms
    }

    /// Build a Sender Report, if anything was sent since the last one and the RTP/NTP mapping is
    /// defined.
    pub fn get_rtcp_sender_report(&mut self, now_ms: u64) -> Option<SenderReport> {
        if self.stream.paused || !self.sent_since_last_sr || self.stream.max_packet_ms == 0 {
            return None;
        }

        let elapsed_ms = now_ms.saturating_sub(self.stream.max_packet_ms);
        let rtp_time = self
            .stream
            .max_packet_ts
            .wrapping_add((elapsed_ms * u64::from(self.stream.clock_rate()) / 1000) as u32);

        self.sent_since_last_sr = false;

        Some(SenderReport {
            ssrc: self.stream.ssrc(),
            ntp_time: ms_to_ntp(now_ms),
            rtp_time,
            packet_count: self.stream.transmission_counter.packet_count() as u32,
            octet_count: self.payload_octets,
            ..SenderReport::default()
        })
    }

    /// SDES chunk carrying this stream's CNAME.
    #[must_use]
    pub fn get_rtcp_sdes_chunk(&self) -> SourceDescriptionChunk {
        SourceDescriptionChunk {
            source: self.stream.ssrc(),
            items: vec![SourceDescriptionItem {
                sdes_type: SdesType::SdesCname,
                text: Bytes::from(self.stream.params.cname.clone()),
            }],
        }
    }

    pub(crate) fn dump(&self) -> RtpStreamDump {
        self.stream.dump()
    }

    fn store_packet(&mut self, packet: &RtpPacket, now_ms: u64) {
        let seq = packet.sequence_number();

        // Packets arrive in output order almost always, so scan from the back.
        let mut insert_at = self.buffer.len();
        for (index, item) in self.buffer.iter().enumerate().rev() {
            let stored_seq = item.packet.sequence_number();

            if stored_seq == seq {
                // Duplicate, keep the first copy.
                return;
            }
            if seq.is_higher_than(stored_seq) {
                break;
            }
            insert_at = index;
        }

        self.buffer.insert(
            insert_at,
            StorageItem {
                packet: packet.clone(),
                received_at_ms: now_ms,
                resent_at_ms: None,
            },
        );

        while self.buffer.len() > self.buffer_capacity {
            self.buffer.pop_front();
        }
        while let Some(item) = self.buffer.front() {
            if item.received_at_ms + RETRANSMISSION_MAX_AGE_MS < now_ms {
                self.buffer.pop_front();
            } else {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered_packets(&self) -> usize {
        self.buffer.len()
    }
}

/// Wrap a buffered packet into an RTX packet (RFC 4588): RTX SSRC and payload type, a sequence
/// number from the independent RTX counter, and the original sequence number prefixed to the
/// payload.
fn rtx_wrap(packet: &RtpPacket, rtx_ssrc: u32, rtx_payload_type: u8, rtx_seq: u16) -> RtpPacket {
    let mut header = packet.header.clone();
    header.ssrc = rtx_ssrc;
    header.payload_type = rtx_payload_type;
    header.sequence_number = rtx_seq;

    let mut payload = BytesMut::with_capacity(packet.payload.len() + 2);
    payload.put_u16(packet.sequence_number());
    payload.extend_from_slice(&packet.payload);

    RtpPacket::new(header, payload)
}
