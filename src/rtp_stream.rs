//! State shared by send and receive RTP streams: RFC 3550 sequence accounting, rate windows and
//! the quality score monitor.

#[cfg(test)]
mod tests;

use crate::rtp_parameters::MimeType;
use serde::{Deserialize, Serialize};

/// RTCP report generation ceiling for audio streams.
pub(crate) const RTCP_MAX_AUDIO_INTERVAL_MS: u64 = 5000;
/// RTCP report generation ceiling for video streams.
pub(crate) const RTCP_MAX_VIDEO_INTERVAL_MS: u64 = 1000;

// RFC 3550 appendix A.1 constants.
const MAX_DROPOUT: u16 = 3000;
const MAX_MISORDER: u16 = 100;
const RTP_SEQ_MOD: u32 = 1 << 16;

/// Static description of an RTP stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpStreamParams {
    /// Stream SSRC.
    pub ssrc: u32,
    /// Media payload type.
    pub payload_type: u8,
    /// Media codec MIME type.
    pub mime_type: MimeType,
    /// Codec clock rate in Hertz.
    pub clock_rate: u32,
    /// CNAME carried in SDES chunks.
    pub cname: String,
    /// Whether NACK retransmission is negotiated.
    pub use_nack: bool,
    /// Whether PLI feedback is negotiated.
    pub use_pli: bool,
    /// Whether FIR feedback is negotiated.
    pub use_fir: bool,
    /// Whether the codec runs its own in-band FEC (Opus `useinbandfec`).
    pub use_in_band_fec: bool,
    /// Associated RTX SSRC, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtx_ssrc: Option<u32>,
    /// Associated RTX payload type, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtx_payload_type: Option<u8>,
}

/// Informational view of a stream for `dump` output.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpStreamDump {
    pub params: RtpStreamParams,
    pub score: u8,
    pub packets_lost: u32,
    pub fraction_lost: u8,
    pub packets_discarded: usize,
    pub packets_repaired: usize,
    pub nack_count: usize,
    pub pli_count: usize,
    pub fir_count: usize,
}

/// Sliding-window byte rate, bucketed per millisecond over one second.
#[derive(Debug)]
pub(crate) struct RateCalculator {
    buckets: Vec<u64>,
    newest_index: usize,
    newest_time_ms: u64,
    window_bytes: u64,
    bytes: u64,
    packets: u64,
    started: bool,
}

const RATE_WINDOW_MS: usize = 1000;

impl Default for RateCalculator {
    fn default() -> Self {
        Self {
            buckets: vec![0; RATE_WINDOW_MS],
            newest_index: 0,
            newest_time_ms: 0,
            window_bytes: 0,
            bytes: 0,
            packets: 0,
            started: false,
        }
    }
}

impl RateCalculator {
    pub(crate) fn update(&mut self, size: usize, now_ms: u64) {
        self.advance_to(now_ms);

        self.buckets[self.newest_index] += size as u64;
        self.window_bytes += size as u64;
        self.bytes += size as u64;
        self.packets += 1;
    }

    /// Rate in bits per second over the window ending at `now_ms`.
    pub(crate) fn get_rate(&mut self, now_ms: u64) -> u32 {
        self.advance_to(now_ms);

        (self.window_bytes * 8 * 1000 / RATE_WINDOW_MS as u64) as u32
    }

    pub(crate) fn packet_count(&self) -> u64 {
        self.packets
    }

    pub(crate) fn byte_count(&self) -> u64 {
        self.bytes
    }

    fn advance_to(&mut self, now_ms: u64) {
        if !self.started {
            self.started = true;
            self.newest_time_ms = now_ms;
            return;
        }

        if now_ms <= self.newest_time_ms {
            // Late update lands in the newest bucket.
            return;
        }

        let elapsed = (now_ms - self.newest_time_ms).min(RATE_WINDOW_MS as u64);
        for _ in 0..elapsed {
            self.newest_index = (self.newest_index + 1) % RATE_WINDOW_MS;
            self.window_bytes -= self.buckets[self.newest_index];
            self.buckets[self.newest_index] = 0;
        }
        self.newest_time_ms = now_ms;
    }
}

/// Produces a 0..=10 quality score from remote loss observations.
///
/// The first observation is taken as-is; later ones are exponentially smoothed with weight 0.75
/// on history. A score event fires only when the integer part moves.
#[derive(Debug)]
pub(crate) struct RtpMonitor {
    score: u8,
    smoothed: f64,
    has_history: bool,
}

impl Default for RtpMonitor {
    fn default() -> Self {
        Self {
            score: 10,
            smoothed: 10.0,
            has_history: false,
        }
    }
}

impl RtpMonitor {
    /// Feed a remote fraction-lost observation (Q0.8). Returns the new score when its integer
    /// part changed.
    pub(crate) fn update(&mut self, fraction_lost: u8) -> Option<u8> {
        let instant = (10.0 * (1.0 - f64::from(fraction_lost) / 255.0)).clamp(0.0, 10.0);

        self.smoothed = if self.has_history {
            0.75 * self.smoothed + 0.25 * instant
        } else {
            self.has_history = true;
            instant
        };

        let score = self.smoothed.trunc() as u8;
        if score != self.score {
            self.score = score;
            Some(score)
        } else {
            None
        }
    }

    pub(crate) fn score(&self) -> u8 {
        self.score
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Counters and sequence accounting common to send and receive streams.
#[derive(Debug)]
pub struct RtpStream {
    pub(crate) params: RtpStreamParams,
    pub(crate) packets_lost: u32,
    pub(crate) fraction_lost: u8,
    pub(crate) packets_discarded: usize,
    pub(crate) packets_repaired: usize,
    pub(crate) nack_count: usize,
    pub(crate) nack_rtp_packet_count: usize,
    pub(crate) pli_count: usize,
    pub(crate) fir_count: usize,
    pub(crate) transmission_counter: RateCalculator,
    pub(crate) retransmission_counter: RateCalculator,
    pub(crate) monitor: RtpMonitor,
    pub(crate) paused: bool,
    pub(crate) rtt_ms: Option<f32>,
    // RFC 3550 appendix A.1.
    started: bool,
    pub(crate) max_seq: u16,
    pub(crate) cycles: u32,
    pub(crate) base_seq: u32,
    bad_seq: Option<u32>,
    pub(crate) max_packet_ts: u32,
    pub(crate) max_packet_ms: u64,
}

impl RtpStream {
    pub(crate) fn new(params: RtpStreamParams) -> Self {
        Self {
            params,
            packets_lost: 0,
            fraction_lost: 0,
            packets_discarded: 0,
            packets_repaired: 0,
            nack_count: 0,
            nack_rtp_packet_count: 0,
            pli_count: 0,
            fir_count: 0,
            transmission_counter: RateCalculator::default(),
            retransmission_counter: RateCalculator::default(),
            monitor: RtpMonitor::default(),
            paused: false,
            rtt_ms: None,
            started: false,
            max_seq: 0,
            cycles: 0,
            base_seq: 0,
            bad_seq: None,
            max_packet_ts: 0,
            max_packet_ms: 0,
        }
    }

    /// Stream parameters.
    #[must_use]
    pub fn params(&self) -> &RtpStreamParams {
        &self.params
    }

    /// Stream SSRC.
    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.params.ssrc
    }

    /// Codec clock rate in Hertz.
    #[must_use]
    pub fn clock_rate(&self) -> u32 {
        self.params.clock_rate
    }

    /// Whether an RTX stream is configured.
    #[must_use]
    pub fn has_rtx(&self) -> bool {
        self.params.rtx_ssrc.is_some()
    }

    /// Configure the associated RTX stream. Idempotent.
    pub fn set_rtx(&mut self, payload_type: u8, ssrc: u32) {
        self.params.rtx_payload_type = Some(payload_type);
        self.params.rtx_ssrc = Some(ssrc);
    }

    /// Current quality score, 0..=10.
    #[must_use]
    pub fn score(&self) -> u8 {
        self.monitor.score()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Wall-clock time of the newest packet seen.
    #[must_use]
    pub fn max_packet_ms(&self) -> u64 {
        self.max_packet_ms
    }

    /// RTP timestamp of the newest packet seen.
    #[must_use]
    pub fn max_packet_ts(&self) -> u32 {
        self.max_packet_ts
    }

    /// Transmission plus retransmission rate in bits per second.
    pub fn get_rate(&mut self, now_ms: u64) -> u32 {
        self.transmission_counter.get_rate(now_ms) + self.retransmission_counter.get_rate(now_ms)
    }

    /// Loss reported by the remote, as a percentage.
    #[must_use]
    pub fn loss_percentage(&self) -> f32 {
        f32::from(self.fraction_lost) * 100.0 / 256.0
    }

    /// Packets expected so far given the highest extended sequence number.
    #[must_use]
    pub fn expected_packets(&self) -> u32 {
        (self.cycles + u32::from(self.max_seq)).wrapping_sub(self.base_seq) + 1
    }

    pub(crate) fn dump(&self) -> RtpStreamDump {
        RtpStreamDump {
            params: self.params.clone(),
            score: self.score(),
            packets_lost: self.packets_lost,
            fraction_lost: self.fraction_lost,
            packets_discarded: self.packets_discarded,
            packets_repaired: self.packets_repaired,
            nack_count: self.nack_count,
            pli_count: self.pli_count,
            fir_count: self.fir_count,
        }
    }

    /// Validate the packet's sequence number progression, RFC 3550 appendix A.1 style.
    pub(crate) fn update_seq(&mut self, seq: u16) -> bool {
        if !self.started {
            self.started = true;
            self.init_seq(seq);
            self.max_seq = seq.wrapping_sub(1);
        }

        let udelta = seq.wrapping_sub(self.max_seq);

        if udelta < MAX_DROPOUT {
            // In order, with permissible gap.
            if seq < self.max_seq {
                self.cycles += RTP_SEQ_MOD;
            }
            self.max_seq = seq;
        } else if u32::from(udelta) <= RTP_SEQ_MOD - u32::from(MAX_MISORDER) {
            // The sequence number made a very large jump.
            if Some(u32::from(seq)) == self.bad_seq {
                // Two sequential packets: assume the other side restarted without telling us.
                self.init_seq(seq);
            } else {
                self.bad_seq = Some(u32::from(seq.wrapping_add(1)));

                return false;
            }
        } else {
            // Duplicate or reordered packet.
        }

        true
    }

    fn init_seq(&mut self, seq: u16) {
        self.base_seq = u32::from(seq);
        self.max_seq = seq;
        self.bad_seq = None;
        self.cycles = 0;
    }
}

/// 64-bit NTP timestamp (32.32 fixed point) for the given unix time in milliseconds.
pub(crate) fn ms_to_ntp(ms: u64) -> u64 {
    const UNIX_TO_NTP_OFFSET_SECS: u64 = 2_208_988_800;

    let seconds = ms / 1000 + UNIX_TO_NTP_OFFSET_SECS;
    let fraction = ((ms % 1000) << 32) / 1000;

    (seconds << 32) | fraction
}

/// Middle 32 bits of an NTP timestamp, as used by LSR/DLSR fields.
pub(crate) fn compact_ntp(ntp: u64) -> u32 {
    ((ntp >> 16) & 0xFFFF_FFFF) as u32
}
