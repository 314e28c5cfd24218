//! Minimal forwarding pipeline: one Opus publisher fanned out to two subscribers, with an RTCP
//! tick at the end. Run with `cargo run --example forward`.

use bytes::BytesMut;
use rtp::header::Header;
use sfu_worker::consumer::{ConsumerId, ConsumerListener, ConsumerOptions, ConsumerScore};
use sfu_worker::messages::{ConsumerRequest, ConsumerResponse};
use sfu_worker::producer::{
    ProducerId, ProducerListener, ProducerOptions, RtpMapping, RtpMappingCodec, RtpMappingEncoding,
};
use sfu_worker::router::Router;
use sfu_worker::rtp_packet::RtpPacket;
use sfu_worker::rtp_parameters::{
    MediaKind, MimeTypeAudio, RtcpParameters, RtpCodecParameters, RtpCodecParametersParameters,
    RtpEncodingParameters, RtpParameters,
};
use std::num::{NonZeroU32, NonZeroU8};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

const INPUT_SSRC: u32 = 0x1111_1111;
const MAPPED_SSRC: u32 = 0x2222_2222;

struct PrintingTransport {
    name: &'static str,
}

impl ConsumerListener for PrintingTransport {
    fn on_consumer_send_rtp_packet(&self, _consumer_id: ConsumerId, packet: &RtpPacket) {
        println!(
            "[{}] -> ssrc:{:#x} seq:{} ts:{}",
            self.name,
            packet.ssrc(),
            packet.sequence_number(),
            packet.timestamp()
        );
    }

    fn on_consumer_score(&self, consumer_id: ConsumerId, score: ConsumerScore) {
        println!("[{}] score on {consumer_id}: {score:?}", self.name);
    }
}

struct PublisherFeedback;

impl ProducerListener for PublisherFeedback {
    fn on_producer_send_rtcp(
        &self,
        producer_id: ProducerId,
        packet: Box<dyn rtcp::packet::Packet + Send + Sync>,
    ) {
        println!("[upstream] feedback for {producer_id}: {packet}");
    }
}

fn opus_parameters(payload_type: u8, ssrc: u32, cname: &str) -> RtpParameters {
    RtpParameters {
        codecs: vec![RtpCodecParameters::Audio {
            mime_type: MimeTypeAudio::Opus,
            payload_type,
            clock_rate: NonZeroU32::new(48000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::from([("useinbandfec", 1u32.into())]),
            rtcp_feedback: vec![],
        }],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(ssrc),
            ..RtpEncodingParameters::default()
        }],
        rtcp: RtcpParameters {
            cname: Some(cname.to_string()),
            ..RtcpParameters::default()
        },
        ..RtpParameters::default()
    }
}

fn main() {
    env_logger::init();

    let mut router = Router::new();

    let producer_id = router
        .produce(
            ProducerOptions::new(
                MediaKind::Audio,
                opus_parameters(111, INPUT_SSRC, "publisher"),
                RtpMapping {
                    codecs: vec![RtpMappingCodec {
                        payload_type: 111,
                        mapped_payload_type: 100,
                    }],
                    encodings: vec![RtpMappingEncoding {
                        ssrc: Some(INPUT_SSRC),
                        rid: None,
                        mapped_ssrc: MAPPED_SSRC,
                    }],
                },
            ),
            Rc::new(PublisherFeedback),
        )
        .expect("failed to create producer");

    let consumable_encodings = vec![RtpEncodingParameters {
        ssrc: Some(MAPPED_SSRC),
        ..RtpEncodingParameters::default()
    }];

    let mut consumer_ids = Vec::new();
    for (index, name) in ["alice", "bob"].into_iter().enumerate() {
        let consumer_id = router
            .consume(
                ConsumerOptions::new(
                    producer_id,
                    MediaKind::Audio,
                    opus_parameters(100, 0xAAAA_0000 + index as u32, name),
                    consumable_encodings.clone(),
                ),
                Rc::new(PrintingTransport {
                    name: if index == 0 { "alice" } else { "bob" },
                }),
            )
            .expect("failed to create consumer");
        router.transport_connected(consumer_id);
        consumer_ids.push(consumer_id);
    }

    let start_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0);

    for index in 0..50u32 {
        let mut packet = RtpPacket::new(
            Header {
                version: 2,
                payload_type: 111,
                sequence_number: 7000 + index as u16,
                timestamp: 480_000 + 960 * index,
                ssrc: INPUT_SSRC,
                ..Header::default()
            },
            BytesMut::from(&[0x0B; 60][..]),
        );

        router.receive_rtp_packet(producer_id, &mut packet, start_ms + u64::from(index) * 20);
    }

    if let Some(compound) = router.get_rtcp(start_ms + 6000) {
        println!("RTCP tick produced {} packet(s)", compound.0.len());
    }

    for consumer_id in consumer_ids {
        if let Ok(ConsumerResponse::Stats(stats)) =
            router.handle_consumer_request(consumer_id, ConsumerRequest::GetStats, start_ms + 6000)
        {
            println!(
                "consumer {consumer_id}: sent {} packets, {} bytes",
                stats[0].packet_count, stats[0].byte_count
            );
        }
    }
}
