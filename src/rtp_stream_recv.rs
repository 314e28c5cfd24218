//! Receive-side RTP stream owned by a producer: reception accounting, jitter, Receiver Report
//! generation and Sender Report ingestion.

use crate::rtp_packet::RtpPacket;
use crate::rtp_stream::{compact_ntp, ms_to_ntp, RtpStream, RtpStreamDump, RtpStreamParams};
use crate::seq_manager::SequenceNumber;
use log::warn;
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;

/// Receive stream fed by a remote publisher. Consumers hold weak handles onto it to read its
/// score and loss.
#[derive(Debug)]
pub struct RtpStreamRecv {
    pub(crate) stream: RtpStream,
    received: u32,
    jitter: f64,
    transit: Option<i64>,
    expected_prior: u32,
    received_prior: u32,
    last_sr_ntp_compact: u32,
    last_sr_received_ms: u64,
}

impl RtpStreamRecv {
    #[must_use]
    pub fn new(params: RtpStreamParams) -> Self {
        Self {
            stream: RtpStream::new(params),
            received: 0,
            jitter: 0.0,
            transit: None,
            expected_prior: 0,
            received_prior: 0,
            last_sr_ntp_compact: 0,
            last_sr_received_ms: 0,
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

    /// Loss on the upstream leg as a percentage.
    #[must_use]
    pub fn loss_percentage(&self) -> f32 {
        self.stream.loss_percentage()
    }

    /// Interarrival jitter in RTP timestamp units.
    #[must_use]
    pub fn jitter(&self) -> u32 {
        self.jitter as u32
    }

    /// Account for an incoming packet. Returns `false` (and counts a discard) for invalid
    /// sequence progression.
    pub fn receive_packet(&mut self, packet: &RtpPacket, now_ms: u64) -> bool {
        if !self.stream.update_seq(packet.sequence_number()) {
            warn!(
                "discarding packet with invalid sequence progression [ssrc:{}, seq:{}]",
                packet.ssrc(),
                packet.sequence_number()
            );
            self.stream.packets_discarded += 1;

            return false;
        }

        self.received = self.received.wrapping_add(1);

        if self.stream.max_packet_ms == 0
            || packet.timestamp().is_higher_than(self.stream.max_packet_ts)
        {
            self.stream.max_packet_ts = packet.timestamp();
            self.stream.max_packet_ms = now_ms;
        }

        self.stream
            .transmission_counter
            .update(packet.size(), now_ms);

        // RFC 3550 interarrival jitter estimate.
        let arrival =
            (now_ms as i64) * i64::from(self.stream.clock_rate()) / 1000 - i64::from(packet.timestamp());
        if let Some(transit) = self.transit {
            let d = (arrival - transit).abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.transit = Some(arrival);

        true
    }

    /// Remember the latest Sender Report so Receiver Reports can echo LSR/DLSR.
    pub fn receive_rtcp_sender_report(&mut self, report: &SenderReport, now_ms: u64) {
        self.last_sr_ntp_compact = compact_ntp(report.ntp_time);
        self.last_sr_received_ms = now_ms;
    }

    /// Build a reception report block for the upstream leg and refresh this stream's loss and
    /// score from the current report interval.
    pub fn get_rtcp_receiver_report(&mut self, now_ms: u64) -> ReceptionReport {
        let expected = self.stream.expected_packets();

        let total_lost = expected.saturating_sub(self.received).min(0x00FF_FFFF);

        let expected_interval = expected.wrapping_sub(self.expected_prior);
        let received_interval = self.received.wrapping_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.received;

        let fraction_lost = if expected_interval == 0 || received_interval >= expected_interval {
            0
        } else {
            let lost_interval = expected_interval - received_interval;
            ((lost_interval << 8) / expected_interval).min(255) as u8
        };

        self.stream.fraction_lost = fraction_lost;
        self.stream.packets_lost = total_lost;
        self.stream.monitor.update(fraction_lost);

        let delay = if self.last_sr_received_ms != 0 {
            ((now_ms.saturating_sub(self.last_sr_received_ms)) * 65536 / 1000) as u32
        } else {
            0
        };

        ReceptionReport {
            ssrc: self.stream.ssrc(),
            fraction_lost,
            total_lost,
            last_sequence_number: self.stream.cycles | u32::from(self.stream.max_seq),
            jitter: self.jitter(),
            last_sender_report: self.last_sr_ntp_compact,
            delay,
        }
    }

    /// Total packets received.
    #[must_use]
    pub fn packet_count(&self) -> u64 {
        self.stream.transmission_counter.packet_count()
    }

    /// Total bytes received.
    #[must_use]
    pub fn byte_count(&self) -> u64 {
        self.stream.transmission_counter.byte_count()
    }

    /// Reception rate in bits per second.
    pub fn get_rate(&mut self, now_ms: u64) -> u32 {
        self.stream.get_rate(now_ms)
    }

    pub(crate) fn dump(&self) -> RtpStreamDump {
        self.stream.dump()
    }
}
