//! Fan-out binding between producers and consumers.

pub mod consumer;
pub mod producer;
pub mod simple_consumer;

use crate::messages::{ConsumerRequest, ConsumerResponse, RequestError};
use crate::rtp_packet::RtpPacket;
use crate::rtp_stream_send::KeyFrameRequestKind;
use crate::macros::uuid_based_wrapper_type;
use consumer::{Consumer, ConsumerError, ConsumerId, ConsumerListener, ConsumerOptions};
use hash_hasher::HashedMap;
use log::{debug, warn};
use producer::{Producer, ProducerError, ProducerId, ProducerListener, ProducerOptions};
use rtcp::compound_packet::CompoundPacket;
use rtcp::packet::Packet;
use rtcp::receiver_report::ReceiverReport;
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::SourceDescription;
use rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use simple_consumer::SimpleConsumer;
use std::rc::Rc;

uuid_based_wrapper_type!(
    /// Router identifier.
    RouterId
);

/// Maps each producer onto the set of consumers subscribed to it and routes data, feedback and
/// key frame requests between them. Everything runs synchronously on the worker loop.
pub struct Router {
    id: RouterId,
    producers: HashedMap<ProducerId, Producer>,
    consumers: HashedMap<ConsumerId, Box<dyn Consumer>>,
    producer_consumers: HashedMap<ProducerId, Vec<ConsumerId>>,
    consumer_producer: HashedMap<ConsumerId, ProducerId>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: RouterId::new(),
            producers: HashedMap::default(),
            consumers: HashedMap::default(),
            producer_consumers: HashedMap::default(),
            consumer_producer: HashedMap::default(),
        }
    }

    /// Router id.
    #[must_use]
    pub fn id(&self) -> RouterId {
        self.id
    }

    /// Register a producer.
    pub fn produce(
        &mut self,
        options: ProducerOptions,
        listener: Rc<dyn ProducerListener>,
    ) -> Result<ProducerId, ProducerError> {
        let producer = Producer::new(options, listener)?;
        let producer_id = producer.id();

        debug!("produce() [producerId:{producer_id}]");

        self.producers.insert(producer_id, producer);
        self.producer_consumers.insert(producer_id, Vec::new());

        Ok(producer_id)
    }

    /// Create a consumer subscribed to the given producer.
    pub fn consume(
        &mut self,
        options: ConsumerOptions,
        listener: Rc<dyn ConsumerListener>,
    ) -> Result<ConsumerId, ConsumerError> {
        let producer_id = options.producer_id;
        let producer = self
            .producers
            .get(&producer_id)
            .ok_or(ConsumerError::ProducerNotFound(producer_id))?;

        let producer_paused = producer.is_paused();
        let mapped_ssrc = producer.mapped_ssrc();
        let producer_rtp_stream = producer.rtp_stream();

        let mut consumer = SimpleConsumer::new(options, producer_paused, listener)?;

        if let Some(rtp_stream) = producer_rtp_stream {
            consumer.producer_new_rtp_stream(Rc::downgrade(&rtp_stream), mapped_ssrc);
        }

        let consumer_id = consumer.id();

        debug!("consume() [consumerId:{consumer_id}, producerId:{producer_id}]");

        self.consumers.insert(consumer_id, Box::new(consumer));
        self.producer_consumers
            .entry(producer_id)
            .or_default()
            .push(consumer_id);
        self.consumer_producer.insert(consumer_id, producer_id);

        Ok(consumer_id)
    }

    /// Close a producer and, cascading, all its consumers.
    pub fn close_producer(&mut self, producer_id: ProducerId) -> bool {
        if self.producers.remove(&producer_id).is_none() {
            return false;
        }

        if let Some(consumer_ids) = self.producer_consumers.remove(&producer_id) {
            for consumer_id in consumer_ids {
                self.consumers.remove(&consumer_id);
                self.consumer_producer.remove(&consumer_id);
            }
        }

        true
    }

    /// Close a consumer, detaching it from the fan-out map and releasing its send stream.
    pub fn close_consumer(&mut self, consumer_id: ConsumerId) -> bool {
        if self.consumers.remove(&consumer_id).is_none() {
            return false;
        }

        if let Some(producer_id) = self.consumer_producer.remove(&consumer_id) {
            if let Some(consumer_ids) = self.producer_consumers.get_mut(&producer_id) {
                consumer_ids.retain(|id| *id != consumer_id);
            }
        }

        true
    }

    /// Borrow a consumer.
    #[must_use]
    pub fn consumer(&self, consumer_id: ConsumerId) -> Option<&dyn Consumer> {
        self.consumers
            .get(&consumer_id)
            .map(|consumer| consumer.as_ref())
    }

    /// Borrow a producer.
    #[must_use]
    pub fn producer(&self, producer_id: ProducerId) -> Option<&Producer> {
        self.producers.get(&producer_id)
    }

    /// The transport carrying the given consumer got connected.
    pub fn transport_connected(&mut self, consumer_id: ConsumerId) {
        let Some(consumer) = self.consumers.get_mut(&consumer_id) else {
            return;
        };

        let key_frame_request = consumer.transport_connected();
        self.route_key_frame_request(consumer_id, key_frame_request);
    }

    /// Ingest an RTP packet arriving from the given producer's transport and fan it out.
    ///
    /// The packet is handed to consumers mangled onto the mapped identifiers; each consumer
    /// restores its own rewrites before the next one sees it.
    pub fn receive_rtp_packet(
        &mut self,
        producer_id: ProducerId,
        packet: &mut RtpPacket,
        now_ms: u64,
    ) {
        let Some(producer) = self.producers.get_mut(&producer_id) else {
            warn!("no producer {producer_id} for incoming packet");
            return;
        };

        let (new_stream, mapped_ssrc, rtp_stream) =
            match producer.receive_rtp_packet(packet, now_ms) {
                producer::ProducerReceiveResult::Forward { new_stream } => {
                    (new_stream, producer.mapped_ssrc(), producer.rtp_stream())
                }
                producer::ProducerReceiveResult::Paused
                | producer::ProducerReceiveResult::Discarded => return,
            };

        if new_stream {
            if let Some(rtp_stream) = &rtp_stream {
                if let Some(consumer_ids) = self.producer_consumers.get(&producer_id) {
                    for consumer_id in consumer_ids {
                        if let Some(consumer) = self.consumers.get_mut(consumer_id) {
                            consumer
                                .producer_new_rtp_stream(Rc::downgrade(rtp_stream), mapped_ssrc);
                        }
                    }
                }
            }
        }

        if let Some(consumer_ids) = self.producer_consumers.get(&producer_id) {
            for consumer_id in consumer_ids {
                if let Some(consumer) = self.consumers.get_mut(consumer_id) {
                    consumer.send_rtp_packet(packet, now_ms);
                }
            }
        }
    }

    /// Pause a producer and propagate to its consumers.
    pub fn pause_producer(&mut self, producer_id: ProducerId) {
        match self.producers.get_mut(&producer_id) {
            Some(producer) if !producer.is_paused() => producer.pause(),
            _ => return,
        }

        if let Some(consumer_ids) = self.producer_consumers.get(&producer_id) {
            for consumer_id in consumer_ids {
                if let Some(consumer) = self.consumers.get_mut(consumer_id) {
                    consumer.producer_paused();
                }
            }
        }
    }

    /// Resume a producer and propagate to its consumers. The producer requests a key frame
    /// upstream on its own, so consumers do not.
    pub fn resume_producer(&mut self, producer_id: ProducerId) {
        match self.producers.get_mut(&producer_id) {
            Some(producer) if producer.is_paused() => producer.resume(),
            _ => return,
        }

        if let Some(consumer_ids) = self.producer_consumers.get(&producer_id) {
            for consumer_id in consumer_ids {
                if let Some(consumer) = self.consumers.get_mut(consumer_id) {
                    consumer.producer_resumed();
                }
            }
        }
    }

    /// Pause a consumer.
    pub fn pause_consumer(&mut self, consumer_id: ConsumerId) {
        if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
            consumer.pause();
        }
    }

    /// Resume a consumer, requesting a key frame upstream when needed.
    pub fn resume_consumer(&mut self, consumer_id: ConsumerId) {
        let Some(consumer) = self.consumers.get_mut(&consumer_id) else {
            return;
        };

        let key_frame_request = consumer.resume();
        self.route_key_frame_request(consumer_id, key_frame_request);
    }

    /// Route a Generic NACK from the consumer's transport. Retransmissions go out through the
    /// consumer's listener.
    pub fn receive_consumer_nack(
        &mut self,
        consumer_id: ConsumerId,
        nack: &TransportLayerNack,
        now_ms: u64,
    ) {
        if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
            consumer.receive_nack(nack, now_ms);
        }
    }

    /// Route a PLI or FIR from the consumer's transport, forwarding the key frame need upstream.
    pub fn receive_consumer_key_frame_request(
        &mut self,
        consumer_id: ConsumerId,
        kind: KeyFrameRequestKind,
    ) {
        let Some(consumer) = self.consumers.get_mut(&consumer_id) else {
            return;
        };

        let key_frame_request = consumer.receive_key_frame_request(kind);
        self.route_key_frame_request(consumer_id, key_frame_request);
    }

    /// Route a reception report block for the consumer's send stream.
    pub fn receive_consumer_rtcp_receiver_report(
        &mut self,
        consumer_id: ConsumerId,
        report: &ReceptionReport,
        now_ms: u64,
    ) {
        if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
            consumer.receive_rtcp_receiver_report(report, now_ms);
        }
    }

    /// Route a Sender Report from the producer's publisher.
    pub fn receive_producer_rtcp_sender_report(
        &mut self,
        producer_id: ProducerId,
        report: &SenderReport,
        now_ms: u64,
    ) {
        if let Some(producer) = self.producers.get_mut(&producer_id) {
            producer.receive_rtcp_sender_report(report, now_ms);
        }
    }

    /// Handle a control-plane request addressed to a consumer.
    pub fn handle_consumer_request(
        &mut self,
        consumer_id: ConsumerId,
        request: ConsumerRequest,
        now_ms: u64,
    ) -> Result<ConsumerResponse, RequestError> {
        if request == ConsumerRequest::Close {
            return if self.close_consumer(consumer_id) {
                Ok(ConsumerResponse::Accepted)
            } else {
                Err(RequestError::ConsumerNotFound(consumer_id))
            };
        }

        let consumer = self
            .consumers
            .get_mut(&consumer_id)
            .ok_or(RequestError::ConsumerNotFound(consumer_id))?;

        match request {
            ConsumerRequest::RequestKeyFrame => {
                let key_frame_request = consumer.request_key_frame();
                self.route_key_frame_request(consumer_id, key_frame_request);

                Ok(ConsumerResponse::Accepted)
            }
            ConsumerRequest::Pause => {
                consumer.pause();

                Ok(ConsumerResponse::Accepted)
            }
            ConsumerRequest::Resume => {
                let key_frame_request = consumer.resume();
                self.route_key_frame_request(consumer_id, key_frame_request);

                Ok(ConsumerResponse::Accepted)
            }
            ConsumerRequest::Dump => Ok(ConsumerResponse::Dump(consumer.dump())),
            ConsumerRequest::GetStats => {
                Ok(ConsumerResponse::Stats(consumer.get_stats(now_ms)))
            }
            ConsumerRequest::Close => unreachable!("handled above"),
        }
    }

    /// Worst remote fraction lost across the consumers of a producer, used when relaying REMB
    /// upstream.
    #[must_use]
    pub fn worst_remote_fraction_lost(&self, producer_id: ProducerId) -> u8 {
        let mut worst = 0;

        if let Some(consumer_ids) = self.producer_consumers.get(&producer_id) {
            for consumer_id in consumer_ids {
                if let Some(consumer) = self.consumers.get(consumer_id) {
                    consumer.need_worst_remote_fraction_lost(&mut worst);
                }
            }
        }

        worst
    }

    /// Periodic RTCP tick: Sender Reports and SDES for consumers due to report, Receiver Reports
    /// for producer streams, and deferred producer-score notifications.
    pub fn get_rtcp(&mut self, now_ms: u64) -> Option<CompoundPacket> {
        let mut packets: Vec<Box<dyn Packet + Send + Sync>> = Vec::new();
        let mut sdes_chunks = Vec::new();

        for consumer in self.consumers.values_mut() {
            if let Some((report, sdes_chunk)) = consumer.get_rtcp(now_ms) {
                packets.push(Box::new(report));
                sdes_chunks.push(sdes_chunk);
            }
        }

        let mut reception_reports = Vec::new();
        let mut score_updates = Vec::new();
        for (producer_id, producer) in self.producers.iter_mut() {
            if let Some((report, score_changed)) = producer.get_rtcp_receiver_report(now_ms) {
                reception_reports.push(report);

                if let Some(score) = score_changed {
                    score_updates.push((*producer_id, score));
                }
            }
        }

        for (producer_id, score) in score_updates {
            if let Some(consumer_ids) = self.producer_consumers.get(&producer_id) {
                for consumer_id in consumer_ids {
                    if let Some(consumer) = self.consumers.get_mut(consumer_id) {
                        consumer.producer_rtp_stream_score(score);
                    }
                }
            }
        }

        if !reception_reports.is_empty() {
            packets.push(Box::new(ReceiverReport {
                ssrc: 0,
                reports: reception_reports,
                ..ReceiverReport::default()
            }));
        }

        if !sdes_chunks.is_empty() {
            packets.push(Box::new(SourceDescription {
                chunks: sdes_chunks,
            }));
        }

        if packets.is_empty() {
            None
        } else {
            Some(CompoundPacket(packets))
        }
    }

    fn route_key_frame_request(&mut self, consumer_id: ConsumerId, mapped_ssrc: Option<u32>) {
        if mapped_ssrc.is_none() {
            return;
        }

        let Some(producer_id) = self.consumer_producer.get(&consumer_id) else {
            return;
        };

        if let Some(producer) = self.producers.get_mut(producer_id) {
            producer.request_key_frame();
        }
    }
}
