mod consumer {
    use bytes::BytesMut;
    use rtcp::reception_report::ReceptionReport;
    use rtcp::transport_feedbacks::transport_layer_nack::{NackPair, TransportLayerNack};
    use rtp::header::Header;
    use sfu_worker::consumer::{ConsumerId, ConsumerListener, ConsumerOptions, ConsumerScore};
    use sfu_worker::producer::{
        ProducerId, ProducerListener, ProducerOptions, RtpMapping, RtpMappingCodec,
        RtpMappingEncoding,
    };
    use sfu_worker::router::Router;
    use sfu_worker::rtp_packet::RtpPacket;
    use sfu_worker::rtp_parameters::{
        MediaKind, MimeTypeAudio, MimeTypeVideo, RtcpFeedback, RtcpParameters, RtpCodecParameters,
        RtpCodecParametersParameters, RtpEncodingParameters, RtpEncodingParametersRtx,
        RtpParameters,
    };
    use std::cell::RefCell;
    use std::env;
    use std::num::{NonZeroU32, NonZeroU8};
    use std::rc::Rc;

    fn init() {
        let mut builder = env_logger::builder();
        if env::var(env_logger::DEFAULT_FILTER_ENV).is_err() {
            builder.filter_level(log::LevelFilter::Off);
        }
        let _ = builder.is_test(true).try_init();
    }

    #[derive(Default)]
    struct TestConsumerListener {
        sent_packets: RefCell<Vec<RtpPacket>>,
        scores: RefCell<Vec<ConsumerScore>>,
    }

    impl ConsumerListener for TestConsumerListener {
        fn on_consumer_send_rtp_packet(&self, _consumer_id: ConsumerId, packet: &RtpPacket) {
            self.sent_packets.borrow_mut().push(packet.clone());
        }

        fn on_consumer_score(&self, _consumer_id: ConsumerId, score: ConsumerScore) {
            self.scores.borrow_mut().push(score);
        }
    }

    #[derive(Default)]
    struct TestProducerListener {
        rtcp_packets: RefCell<Vec<Box<dyn rtcp::packet::Packet + Send + Sync>>>,
    }

    impl ProducerListener for TestProducerListener {
        fn on_producer_send_rtcp(
            &self,
            _producer_id: ProducerId,
            packet: Box<dyn rtcp::packet::Packet + Send + Sync>,
        ) {
            self.rtcp_packets.borrow_mut().push(packet);
        }
    }

    const AUDIO_INPUT_SSRC: u32 = 0x1111;
    const AUDIO_MAPPED_SSRC: u32 = 0x2222;
    const AUDIO_OUTPUT_SSRC: u32 = 0xAAAA;
    const VIDEO_INPUT_SSRC: u32 = 0x3333;
    const VIDEO_MAPPED_SSRC: u32 = 0x4444;
    const VIDEO_OUTPUT_SSRC: u32 = 0xCCCC;
    const VIDEO_RTX_SSRC: u32 = 0xDDDD;

    fn audio_producer_options() -> ProducerOptions {
        ProducerOptions::new(
            MediaKind::Audio,
            RtpParameters {
                codecs: vec![RtpCodecParameters::Audio {
                    mime_type: MimeTypeAudio::Opus,
                    payload_type: 111,
                    clock_rate: NonZeroU32::new(48000).unwrap(),
                    channels: NonZeroU8::new(2).unwrap(),
                    parameters: RtpCodecParametersParameters::from([(
                        "useinbandfec",
                        1u32.into(),
                    )]),
                    rtcp_feedback: vec![],
                }],
                encodings: vec![RtpEncodingParameters {
                    ssrc: Some(AUDIO_INPUT_SSRC),
                    ..RtpEncodingParameters::default()
                }],
                rtcp: RtcpParameters {
                    cname: Some("publisher-audio".to_string()),
                    ..RtcpParameters::default()
                },
                ..RtpParameters::default()
            },
            RtpMapping {
                codecs: vec![RtpMappingCodec {
                    payload_type: 111,
                    mapped_payload_type: 100,
                }],
                encodings: vec![RtpMappingEncoding {
                    ssrc: Some(AUDIO_INPUT_SSRC),
                    rid: None,
                    mapped_ssrc: AUDIO_MAPPED_SSRC,
                }],
            },
        )
    }

    fn audio_consumer_options(producer_id: ProducerId) -> ConsumerOptions {
        ConsumerOptions::new(
            producer_id,
            MediaKind::Audio,
            RtpParameters {
                codecs: vec![RtpCodecParameters::Audio {
                    mime_type: MimeTypeAudio::Opus,
                    payload_type: 100,
                    clock_rate: NonZeroU32::new(48000).unwrap(),
                    channels: NonZeroU8::new(2).unwrap(),
                    parameters: RtpCodecParametersParameters::from([(
                        "useinbandfec",
                        1u32.into(),
                    )]),
                    rtcp_feedback: vec![],
                }],
                encodings: vec![RtpEncodingParameters {
                    ssrc: Some(AUDIO_OUTPUT_SSRC),
                    ..RtpEncodingParameters::default()
                }],
                rtcp: RtcpParameters {
                    cname: Some("subscriber-audio".to_string()),
                    ..RtcpParameters::default()
                },
                ..RtpParameters::default()
            },
            vec![RtpEncodingParameters {
                ssrc: Some(AUDIO_MAPPED_SSRC),
                ..RtpEncodingParameters::default()
            }],
        )
    }

    fn video_producer_options() -> ProducerOptions {
        ProducerOptions::new(
            MediaKind::Video,
            RtpParameters {
                codecs: vec![RtpCodecParameters::Video {
                    mime_type: MimeTypeVideo::H264,
                    payload_type: 112,
                    clock_rate: NonZeroU32::new(90000).unwrap(),
                    parameters: RtpCodecParametersParameters::default(),
                    rtcp_feedback: vec![
                        RtcpFeedback::Nack,
                        RtcpFeedback::NackPli,
                        RtcpFeedback::CcmFir,
                    ],
                }],
                encodings: vec![RtpEncodingParameters {
                    ssrc: Some(VIDEO_INPUT_SSRC),
                    ..RtpEncodingParameters::default()
                }],
                rtcp: RtcpParameters {
                    cname: Some("publisher-video".to_string()),
                    ..RtcpParameters::default()
                },
                ..RtpParameters::default()
            },
            RtpMapping {
                codecs: vec![RtpMappingCodec {
                    payload_type: 112,
                    mapped_payload_type: 102,
                }],
                encodings: vec![RtpMappingEncoding {
                    ssrc: Some(VIDEO_INPUT_SSRC),
                    rid: None,
                    mapped_ssrc: VIDEO_MAPPED_SSRC,
                }],
            },
        )
    }

    fn video_consumer_options(producer_id: ProducerId) -> ConsumerOptions {
        ConsumerOptions::new(
            producer_id,
            MediaKind::Video,
            RtpParameters {
                codecs: vec![
                    RtpCodecParameters::Video {
                        mime_type: MimeTypeVideo::H264,
                        payload_type: 102,
                        clock_rate: NonZeroU32::new(90000).unwrap(),
                        parameters: RtpCodecParametersParameters::default(),
                        rtcp_feedback: vec![
                            RtcpFeedback::Nack,
                            RtcpFeedback::NackPli,
                            RtcpFeedback::CcmFir,
                        ],
                    },
                    RtpCodecParameters::Video {
                        mime_type: MimeTypeVideo::Rtx,
                        payload_type: 113,
                        clock_rate: NonZeroU32::new(90000).unwrap(),
                        parameters: RtpCodecParametersParameters::from([("apt", 102u32.into())]),
                        rtcp_feedback: vec![],
                    },
                ],
                encodings: vec![RtpEncodingParameters {
                    ssrc: Some(VIDEO_OUTPUT_SSRC),
                    rtx: Some(RtpEncodingParametersRtx {
                        ssrc: VIDEO_RTX_SSRC,
                    }),
                    ..RtpEncodingParameters::default()
                }],
                rtcp: RtcpParameters {
                    cname: Some("subscriber-video".to_string()),
                    ..RtcpParameters::default()
                },
                ..RtpParameters::default()
            },
            vec![RtpEncodingParameters {
                ssrc: Some(VIDEO_MAPPED_SSRC),
                ..RtpEncodingParameters::default()
            }],
        )
    }

    fn audio_packet(seq: u16, timestamp: u32) -> RtpPacket {
        RtpPacket::new(
            Header {
                version: 2,
                payload_type: 111,
                sequence_number: seq,
                timestamp,
                ssrc: AUDIO_INPUT_SSRC,
                ..Header::default()
            },
            BytesMut::from(&[0x0B, 0x0E, 0x0E, 0x0F][..]),
        )
    }

    fn video_packet(seq: u16, timestamp: u32, key_frame: bool) -> RtpPacket {
        // Single NAL unit payload: IDR slice or non-IDR slice.
        let nal = if key_frame { 0x65 } else { 0x61 };

        RtpPacket::new(
            Header {
                version: 2,
                payload_type: 112,
                sequence_number: seq,
                timestamp,
                ssrc: VIDEO_INPUT_SSRC,
                ..Header::default()
            },
            BytesMut::from(&[nal, 0x88, 0x84, 0x21][..]),
        )
    }

    struct VideoSetup {
        router: Router,
        producer_id: ProducerId,
        consumer_id: ConsumerId,
        consumer_listener: Rc<TestConsumerListener>,
        producer_listener: Rc<TestProducerListener>,
    }

    fn video_setup() -> VideoSetup {
        init();

        let mut router = Router::new();
        let producer_listener = Rc::new(TestProducerListener::default());
        let consumer_listener = Rc::new(TestConsumerListener::default());

        let producer_id = router
            .produce(
                video_producer_options(),
                Rc::clone(&producer_listener) as Rc<dyn ProducerListener>,
            )
            .expect("Failed to produce video");
        let consumer_id = router
            .consume(
                video_consumer_options(producer_id),
                Rc::clone(&consumer_listener) as Rc<dyn ConsumerListener>,
            )
            .expect("Failed to consume video");

        VideoSetup {
            router,
            producer_id,
            consumer_id,
            consumer_listener,
            producer_listener,
        }
    }

    #[test]
    fn audio_happy_path() {
        init();

        let mut router = Router::new();
        let producer_listener = Rc::new(TestProducerListener::default());
        let consumer_listener = Rc::new(TestConsumerListener::default());

        let producer_id = router
            .produce(
                audio_producer_options(),
                Rc::clone(&producer_listener) as Rc<dyn ProducerListener>,
            )
            .expect("Failed to produce audio");
        router
            .consume(
                audio_consumer_options(producer_id),
                Rc::clone(&consumer_listener) as Rc<dyn ConsumerListener>,
            )
            .expect("Failed to consume audio");

        let inputs = [(1000u16, 48000u32), (1001, 48960), (1002, 49920)];
        for (seq, timestamp) in inputs {
            let mut packet = audio_packet(seq, timestamp);
            router.receive_rtp_packet(producer_id, &mut packet, 10_000);

            // The producer-level mangling stays; the consumer restored its own rewrites.
            assert_eq!(packet.ssrc(), AUDIO_MAPPED_SSRC);
            assert_eq!(packet.payload_type(), 100);
            assert_eq!(packet.sequence_number(), seq);
            assert_eq!(packet.timestamp(), timestamp);
        }

        let sent = consumer_listener.sent_packets.borrow();
        assert_eq!(sent.len(), 3);

        for packet in sent.iter() {
            assert_eq!(packet.ssrc(), AUDIO_OUTPUT_SSRC);
            assert_eq!(packet.payload_type(), 100);
        }
        for window in sent.windows(2) {
            assert_eq!(
                window[1].sequence_number(),
                window[0].sequence_number().wrapping_add(1)
            );
            assert_eq!(window[1].timestamp(), window[0].timestamp().wrapping_add(960));
        }
    }

    #[test]
    fn video_syncs_on_key_frame() {
        let VideoSetup {
            mut router,
            producer_id,
            consumer_id,
            consumer_listener,
            ..
        } = video_setup();

        let mut now_ms = 20_000;
        for (seq, key_frame) in [(500u16, false), (501, false), (502, true), (503, false)] {
            let mut packet = video_packet(seq, 90_000 + 3000 * u32::from(seq - 500), key_frame);
            router.receive_rtp_packet(producer_id, &mut packet, now_ms);
            now_ms += 33;
        }

        let sent = consumer_listener.sent_packets.borrow();
        // The two leading P-frames are discarded; output begins at the IDR.
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1].sequence_number(),
            sent[0].sequence_number().wrapping_add(1)
        );

        let dump = match router
            .handle_consumer_request(
                consumer_id,
                sfu_worker::messages::ConsumerRequest::Dump,
                now_ms,
            )
            .unwrap()
        {
            sfu_worker::messages::ConsumerResponse::Dump(dump) => dump,
            response => panic!("unexpected response {response:?}"),
        };
        assert_eq!(dump.rtp_stream.packets_discarded, 2);
    }

    #[test]
    fn pause_resume_offsets_timestamps() {
        let VideoSetup {
            mut router,
            producer_id,
            consumer_id,
            consumer_listener,
            ..
        } = video_setup();

        let mut now_ms = 30_000;
        for index in 0..5u32 {
            let key_frame = index == 0;
            let mut packet =
                video_packet(100 + index as u16, 90_000 * index, key_frame);
            router.receive_rtp_packet(producer_id, &mut packet, now_ms);
            if index < 4 {
                now_ms += 33;
            }
        }

        let (last_seq, last_timestamp) = {
            let sent = consumer_listener.sent_packets.borrow();
            assert_eq!(sent.len(), 5);
            let last = sent.last().unwrap();
            (last.sequence_number(), last.timestamp())
        };

        router.pause_consumer(consumer_id);

        // While paused nothing goes out.
        let mut paused_packet = video_packet(105, 90_000 * 5, false);
        router.receive_rtp_packet(producer_id, &mut paused_packet, now_ms + 100);
        assert_eq!(consumer_listener.sent_packets.borrow().len(), 5);

        // Two seconds later the consumer gets resumed and a key frame arrives.
        router.resume_consumer(consumer_id);
        let resume_now_ms = now_ms + 2000;

        let mut key_frame_packet = video_packet(160, 9_000_000, true);
        router.receive_rtp_packet(producer_id, &mut key_frame_packet, resume_now_ms);
        let mut delta_packet = video_packet(161, 9_090_000, false);
        router.receive_rtp_packet(producer_id, &mut delta_packet, resume_now_ms + 33);

        let sent = consumer_listener.sent_packets.borrow();
        assert_eq!(sent.len(), 7);

        let resumed = &sent[5];
        // The pause gap collapses into wall-clock elapsed time: 2 s at 90 kHz.
        let timestamp_jump = resumed.timestamp().wrapping_sub(last_timestamp);
        assert!(
            (179_999..=180_001).contains(&timestamp_jump),
            "timestamp jump = {timestamp_jump}"
        );
        assert_eq!(resumed.sequence_number(), last_seq.wrapping_add(1));
        assert_eq!(
            sent[6].timestamp(),
            resumed.timestamp().wrapping_add(90_000)
        );
    }

    #[test]
    fn nack_round_trip_uses_rtx() {
        let VideoSetup {
            mut router,
            producer_id,
            consumer_id,
            consumer_listener,
            ..
        } = video_setup();

        let mut now_ms = 40_000;
        for index in 0..10u32 {
            let mut packet = video_packet(700 + index as u16, 3000 * index, index == 0);
            router.receive_rtp_packet(producer_id, &mut packet, now_ms);
            now_ms += 33;
        }

        let forwarded_seq = {
            let sent = consumer_listener.sent_packets.borrow();
            assert_eq!(sent.len(), 10);
            sent[4].sequence_number()
        };

        let nack = TransportLayerNack {
            sender_ssrc: 0,
            media_ssrc: VIDEO_OUTPUT_SSRC,
            nacks: vec![NackPair {
                packet_id: forwarded_seq,
                lost_packets: 0,
            }],
        };

        router.receive_consumer_nack(consumer_id, &nack, now_ms);

        {
            let sent = consumer_listener.sent_packets.borrow();
            assert_eq!(sent.len(), 11);

            let retransmission = &sent[10];
            assert_eq!(retransmission.ssrc(), VIDEO_RTX_SSRC);
            assert_eq!(retransmission.payload_type(), 113);
            // Original sequence number travels in the first two payload bytes.
            assert_eq!(
                &retransmission.payload[..2],
                &forwarded_seq.to_be_bytes()
            );
        }

        // Same NACK within the 20 ms hold-off is suppressed.
        router.receive_consumer_nack(consumer_id, &nack, now_ms + 10);
        assert_eq!(consumer_listener.sent_packets.borrow().len(), 11);
    }

    #[test]
    fn producer_stream_replacement_resyncs() {
        let VideoSetup {
            mut router,
            producer_id,
            consumer_listener,
            ..
        } = video_setup();

        let mut now_ms = 50_000;
        for index in 0..3u32 {
            let mut packet = video_packet(10 + index as u16, 3000 * index, index == 0);
            router.receive_rtp_packet(producer_id, &mut packet, now_ms);
            now_ms += 33;
        }

        let last_seq = {
            let sent = consumer_listener.sent_packets.borrow();
            assert_eq!(sent.len(), 3);
            sent[2].sequence_number()
        };

        // The publisher restarts with a different SSRC. A delta frame on the new stream must not
        // be forwarded; the next key frame re-anchors the output right after the previous seq.
        let mut delta = video_packet(9000, 700_000, false);
        delta.set_ssrc(0x7777);
        router.receive_rtp_packet(producer_id, &mut delta, now_ms);
        assert_eq!(consumer_listener.sent_packets.borrow().len(), 3);

        let mut key_frame = video_packet(9001, 703_000, true);
        key_frame.set_ssrc(0x7777);
        router.receive_rtp_packet(producer_id, &mut key_frame, now_ms + 33);

        let sent = consumer_listener.sent_packets.borrow();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[3].sequence_number(), last_seq.wrapping_add(1));

        // Stream replacement also re-announced the score.
        assert!(!consumer_listener.scores.borrow().is_empty());
    }

    #[test]
    fn receiver_report_drops_score() {
        let VideoSetup {
            mut router,
            producer_id,
            consumer_id,
            consumer_listener,
            ..
        } = video_setup();

        let mut now_ms = 60_000;
        for index in 0..20u32 {
            let mut packet = video_packet(300 + index as u16, 3000 * index, index == 0);
            router.receive_rtp_packet(producer_id, &mut packet, now_ms);
            now_ms += 33;
        }

        consumer_listener.scores.borrow_mut().clear();

        // 25% remote loss.
        let report = ReceptionReport {
            ssrc: VIDEO_OUTPUT_SSRC,
            fraction_lost: 64,
            total_lost: 5,
            last_sequence_number: 320,
            jitter: 0,
            last_sender_report: 0,
            delay: 0,
        };
        router.receive_consumer_rtcp_receiver_report(consumer_id, &report, now_ms);

        let scores = consumer_listener.scores.borrow();
        assert_eq!(scores.len(), 1);
        // Down from the initial 10 by at least 2.
        assert!(scores[0].consumer <= 8, "score = {}", scores[0].consumer);
    }

    #[test]
    fn key_frame_requests_are_routed_and_deduped() {
        let VideoSetup {
            mut router,
            producer_id,
            consumer_id,
            producer_listener,
            ..
        } = video_setup();

        // Anchor the producer stream first.
        let mut packet = video_packet(1, 0, true);
        router.receive_rtp_packet(producer_id, &mut packet, 70_000);

        router.receive_consumer_key_frame_request(
            consumer_id,
            sfu_worker::rtp_stream_send::KeyFrameRequestKind::Pli,
        );
        // A second request while one is in flight collapses.
        router.receive_consumer_key_frame_request(
            consumer_id,
            sfu_worker::rtp_stream_send::KeyFrameRequestKind::Pli,
        );
        assert_eq!(producer_listener.rtcp_packets.borrow().len(), 1);

        // A key frame passing through clears the pending request; the next one goes upstream.
        let mut key_frame = video_packet(2, 3000, true);
        router.receive_rtp_packet(producer_id, &mut key_frame, 70_100);
        router.receive_consumer_key_frame_request(
            consumer_id,
            sfu_worker::rtp_stream_send::KeyFrameRequestKind::Fir,
        );
        assert_eq!(producer_listener.rtcp_packets.borrow().len(), 2);

        // Counters made it into the stats.
        let stats = match router
            .handle_consumer_request(
                consumer_id,
                sfu_worker::messages::ConsumerRequest::GetStats,
                71_000,
            )
            .unwrap()
        {
            sfu_worker::messages::ConsumerResponse::Stats(stats) => stats,
            response => panic!("unexpected response {response:?}"),
        };
        assert_eq!(stats[0].pli_count, 2);
        assert_eq!(stats[0].fir_count, 1);
    }

    #[test]
    fn paused_consumer_emits_nothing() {
        let VideoSetup {
            mut router,
            producer_id,
            consumer_id,
            consumer_listener,
            ..
        } = video_setup();

        router.pause_consumer(consumer_id);

        for index in 0..5u32 {
            let mut packet = video_packet(index as u16, 3000 * index, index == 0);
            router.receive_rtp_packet(producer_id, &mut packet, 80_000 + u64::from(index) * 33);
        }

        assert!(consumer_listener.sent_packets.borrow().is_empty());
    }

    #[test]
    fn paused_producer_emits_nothing() {
        let VideoSetup {
            mut router,
            producer_id,
            consumer_id,
            consumer_listener,
            ..
        } = video_setup();

        // Anchor a stream so pause/resume has something to replace.
        let mut packet = video_packet(1, 0, true);
        router.receive_rtp_packet(producer_id, &mut packet, 90_000);
        assert_eq!(consumer_listener.sent_packets.borrow().len(), 1);

        router.pause_producer(producer_id);
        let mut packet = video_packet(2, 3000, true);
        router.receive_rtp_packet(producer_id, &mut packet, 90_100);
        assert_eq!(consumer_listener.sent_packets.borrow().len(), 1);

        assert!(router.consumer(consumer_id).unwrap().is_producer_paused());

        router.resume_producer(producer_id);
        let mut packet = video_packet(3, 6000, true);
        router.receive_rtp_packet(producer_id, &mut packet, 90_200);
        assert_eq!(consumer_listener.sent_packets.borrow().len(), 2);
    }
}
