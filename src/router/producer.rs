//! Producer ingest side: packet mangling onto the mapped (consumable) identifiers, receive
//! stream lifecycle and upstream key frame requests.

use crate::codecs;
use crate::data_structures::AppData;
use crate::rtp_packet::RtpPacket;
use crate::rtp_parameters::{MediaKind, RtcpFeedback, RtpParameters};
use crate::rtp_stream::{
    RtpStreamDump, RtpStreamParams, RTCP_MAX_AUDIO_INTERVAL_MS, RTCP_MAX_VIDEO_INTERVAL_MS,
};
use crate::rtp_stream_recv::RtpStreamRecv;
use crate::macros::uuid_based_wrapper_type;
use log::{debug, warn};
use rtcp::payload_feedbacks::full_intra_request::{FirEntry, FullIntraRequest};
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

uuid_based_wrapper_type!(
    /// Producer identifier.
    ProducerId
);

/// Payload type translation entry.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpMappingCodec {
    pub payload_type: u8,
    pub mapped_payload_type: u8,
}

/// SSRC translation entry.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpMappingEncoding {
    pub ssrc: Option<u32>,
    pub rid: Option<String>,
    pub mapped_ssrc: u32,
}

/// Translation table from the identifiers the publisher uses onto the ones consumers observe.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct RtpMapping {
    pub codecs: Vec<RtpMappingCodec>,
    pub encodings: Vec<RtpMappingEncoding>,
}

/// Producer creation settings, assembled by the control plane.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProducerOptions {
    /// Media kind.
    pub kind: MediaKind,
    /// RTP parameters defining what the publisher endpoint sends.
    pub rtp_parameters: RtpParameters,
    /// Identifier translation applied before fan-out.
    pub rtp_mapping: RtpMapping,
    /// Whether the producer starts paused.
    pub paused: bool,
    /// Custom application data.
    pub app_data: AppData,
}

impl ProducerOptions {
    #[must_use]
    pub fn new(kind: MediaKind, rtp_parameters: RtpParameters, rtp_mapping: RtpMapping) -> Self {
        Self {
            kind,
            rtp_parameters,
            rtp_mapping,
            paused: false,
            app_data: AppData::default(),
        }
    }
}

/// Error preventing producer creation.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The mapping carries no codec entries.
    #[error("rtp_mapping has no codecs")]
    EmptyCodecMapping,
    /// The mapping carries no encoding entries.
    #[error("rtp_mapping has no encodings")]
    EmptyEncodingMapping,
}

/// What happened to an ingested packet.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProducerReceiveResult {
    /// Packet was mangled and must be fanned out to consumers.
    Forward {
        /// A fresh receive stream was just created for it; consumers must be re-pointed first.
        new_stream: bool,
    },
    /// Accounted, but the producer is paused: no fan-out.
    Paused,
    /// Packet did not match the producer or failed validation.
    Discarded,
}

/// Sink for RTCP feedback the producer sends upstream to its publisher.
pub trait ProducerListener {
    fn on_producer_send_rtcp(
        &self,
        producer_id: ProducerId,
        packet: Box<dyn rtcp::packet::Packet + Send + Sync>,
    );
}

/// A source of one RTP stream fed by a remote publisher.
pub struct Producer {
    id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    rtp_mapping: RtpMapping,
    paused: bool,
    rtp_stream: Option<Rc<RefCell<RtpStreamRecv>>>,
    /// SSRC the publisher currently uses for the stream.
    current_ssrc: Option<u32>,
    pending_key_frame_request: bool,
    fir_seq: u8,
    max_rtcp_interval: u64,
    last_rtcp_sent_time: u64,
    listener: Rc<dyn ProducerListener>,
    app_data: AppData,
}

impl Producer {
    pub fn new(
        options: ProducerOptions,
        listener: Rc<dyn ProducerListener>,
    ) -> Result<Self, ProducerError> {
        let ProducerOptions {
            kind,
            rtp_parameters,
            rtp_mapping,
            paused,
            app_data,
            ..
        } = options;

        if rtp_mapping.codecs.is_empty() {
            return Err(ProducerError::EmptyCodecMapping);
        }
        if rtp_mapping.encodings.is_empty() {
            return Err(ProducerError::EmptyEncodingMapping);
        }

        Ok(Self {
            id: ProducerId::new(),
            kind,
            rtp_parameters,
            rtp_mapping,
            paused,
            rtp_stream: None,
            current_ssrc: None,
            pending_key_frame_request: false,
            fir_seq: 0,
            max_rtcp_interval: match kind {
                MediaKind::Audio => RTCP_MAX_AUDIO_INTERVAL_MS,
                MediaKind::Video => RTCP_MAX_VIDEO_INTERVAL_MS,
            },
            last_rtcp_sent_time: 0,
            listener,
            app_data,
        })
    }

    #[must_use]
    pub fn id(&self) -> ProducerId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// App custom data.
    #[must_use]
    pub fn app_data(&self) -> &AppData {
        &self.app_data
    }

    /// The mapped SSRC consumers subscribe to.
    #[must_use]
    pub fn mapped_ssrc(&self) -> u32 {
        self.rtp_mapping.encodings[0].mapped_ssrc
    }

    /// Current receive stream, if a packet has been seen.
    #[must_use]
    pub fn rtp_stream(&self) -> Option<Rc<RefCell<RtpStreamRecv>>> {
        self.rtp_stream.clone()
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume the producer. A video producer immediately asks its publisher for a key frame so
    /// consumers can re-anchor.
    pub fn resume(&mut self) {
        self.paused = false;

        if self.kind == MediaKind::Video {
            self.pending_key_frame_request = false;
            self.request_key_frame();
        }
    }

    /// Ingest a packet from the publisher: account it on the receive stream, then mangle it onto
    /// the mapped payload type and SSRC for fan-out. The packet stays mangled; consumers restore
    /// only their own rewrites.
    pub fn receive_rtp_packet(&mut self, packet: &mut RtpPacket, now_ms: u64) -> ProducerReceiveResult {
        let codec_mapping = match self
            .rtp_mapping
            .codecs
            .iter()
            .find(|entry| entry.payload_type == packet.payload_type())
        {
            Some(entry) => entry,
            None => {
                warn!(
                    "no codec mapping for payload type {} [producerId:{}]",
                    packet.payload_type(),
                    self.id
                );

                return ProducerReceiveResult::Discarded;
            }
        };
        let mapped_payload_type = codec_mapping.mapped_payload_type;

        let media_codec = match self
            .rtp_parameters
            .codecs
            .iter()
            .find(|codec| codec.payload_type() == packet.payload_type())
        {
            Some(codec) => codec,
            None => {
                warn!(
                    "no codec in rtp_parameters for payload type {} [producerId:{}]",
                    packet.payload_type(),
                    self.id
                );

                return ProducerReceiveResult::Discarded;
            }
        };
        let mime_type = media_codec.mime_type();

        // A different SSRC means the publisher restarted the stream.
        let new_stream = self.current_ssrc != Some(packet.ssrc());
        if new_stream {
            debug!(
                "new rtp stream [producerId:{}, ssrc:{}]",
                self.id,
                packet.ssrc()
            );

            let stream = RtpStreamRecv::new(self.stream_params(packet.ssrc(), media_codec));
            self.rtp_stream = Some(Rc::new(RefCell::new(stream)));
            self.current_ssrc = Some(packet.ssrc());
        }

        let Some(rtp_stream) = self.rtp_stream.clone() else {
            return ProducerReceiveResult::Discarded;
        };
        if !rtp_stream.borrow_mut().receive_packet(packet, now_ms) {
            return ProducerReceiveResult::Discarded;
        }

        if self.pending_key_frame_request && codecs::is_key_frame(mime_type, &packet.payload) {
            debug!("requested key frame arrived [producerId:{}]", self.id);

            self.pending_key_frame_request = false;
        }

        if self.paused {
            return ProducerReceiveResult::Paused;
        }

        // Mangle onto the consumable identifiers.
        packet.set_payload_type(mapped_payload_type);
        packet.set_ssrc(self.mapped_ssrc());

        ProducerReceiveResult::Forward { new_stream }
    }

    /// Ask the publisher for a key frame via PLI or FIR. Concurrent requests collapse into one
    /// until a key frame arrives.
    pub fn request_key_frame(&mut self) {
        if self.kind != MediaKind::Video || self.paused {
            return;
        }

        let ssrc = match self.current_ssrc {
            Some(ssrc) => ssrc,
            None => return,
        };

        if self.pending_key_frame_request {
            return;
        }
        self.pending_key_frame_request = true;

        let (use_pli, use_fir) = match &self.rtp_stream {
            Some(rtp_stream) => {
                let rtp_stream = rtp_stream.borrow();
                let params = rtp_stream.params();
                (params.use_pli, params.use_fir)
            }
            None => return,
        };

        if use_pli {
            debug!("sending PLI [ssrc:{ssrc}]");

            self.listener.on_producer_send_rtcp(
                self.id,
                Box::new(PictureLossIndication {
                    sender_ssrc: 0,
                    media_ssrc: ssrc,
                }),
            );
        } else if use_fir {
            debug!("sending FIR [ssrc:{ssrc}]");

            let sequence_number = self.fir_seq;
            self.fir_seq = self.fir_seq.wrapping_add(1);

            self.listener.on_producer_send_rtcp(
                self.id,
                Box::new(FullIntraRequest {
                    sender_ssrc: 0,
                    media_ssrc: ssrc,
                    fir: vec![FirEntry {
                        ssrc,
                        sequence_number,
                    }],
                }),
            );
        }
    }

    /// Feed a Sender Report from the publisher into the matching receive stream.
    pub fn receive_rtcp_sender_report(&mut self, report: &SenderReport, now_ms: u64) {
        match &self.rtp_stream {
            Some(rtp_stream) if self.current_ssrc == Some(report.ssrc) => {
                rtp_stream
                    .borrow_mut()
                    .receive_rtcp_sender_report(report, now_ms);
            }
            _ => {
                debug!(
                    "sender report for unknown ssrc {} [producerId:{}]",
                    report.ssrc, self.id
                );
            }
        }
    }

    /// Build the Receiver Report for the upstream leg once per RTCP interval. Returns the report
    /// plus the stream score if it changed while refreshing interval loss.
    pub fn get_rtcp_receiver_report(&mut self, now_ms: u64) -> Option<(ReceptionReport, Option<u8>)> {
        // Same early-emit factor the consumers apply.
        if ((now_ms - self.last_rtcp_sent_time) as f32 * 1.15) < self.max_rtcp_interval as f32 {
            return None;
        }

        let rtp_stream = self.rtp_stream.as_ref()?;
        let mut rtp_stream = rtp_stream.borrow_mut();

        let score_before = rtp_stream.score();
        let report = rtp_stream.get_rtcp_receiver_report(now_ms);
        let score_after = rtp_stream.score();

        let score_changed = (score_after != score_before).then_some(score_after);

        self.last_rtcp_sent_time = now_ms;

        Some((report, score_changed))
    }

    /// Streams view for `producer.dump`.
    #[must_use]
    pub fn dump_rtp_streams(&self) -> Vec<RtpStreamDump> {
        self.rtp_stream
            .iter()
            .map(|rtp_stream| rtp_stream.borrow().dump())
            .collect()
    }

    fn stream_params(
        &self,
        ssrc: u32,
        media_codec: &crate::rtp_parameters::RtpCodecParameters,
    ) -> RtpStreamParams {
        let mut use_nack = false;
        let mut use_pli = false;
        let mut use_fir = false;
        for feedback in media_codec.rtcp_feedback() {
            match feedback {
                RtcpFeedback::Nack => use_nack = true,
                RtcpFeedback::NackPli => use_pli = true,
                RtcpFeedback::CcmFir => use_fir = true,
                _ => {}
            }
        }

        RtpStreamParams {
            ssrc,
            payload_type: media_codec.payload_type(),
            mime_type: media_codec.mime_type(),
            clock_rate: media_codec.clock_rate().get(),
            cname: self.rtp_parameters.rtcp.cname.clone().unwrap_or_default(),
            use_nack,
            use_pli,
            use_fir,
            use_in_band_fec: media_codec.parameters().get_number("useinbandfec") == Some(1),
            rtx_ssrc: None,
            rtx_payload_type: None,
        }
    }
}
