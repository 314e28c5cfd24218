//! Control-plane surface routed into the worker.
//!
//! The channel framing itself lives outside this crate; it deserializes request payloads into
//! these enums (a payload whose `method` is unknown fails to parse and is answered by the channel
//! layer, never reaching the router) and serializes the responses and notifications back.

use crate::router::consumer::{ConsumerDump, ConsumerId, ConsumerScore, ConsumerStat};
use crate::router::producer::ProducerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Requests addressed to a consumer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(tag = "method")]
pub enum ConsumerRequest {
    #[serde(rename = "consumer.requestKeyFrame")]
    RequestKeyFrame,
    #[serde(rename = "consumer.pause")]
    Pause,
    #[serde(rename = "consumer.resume")]
    Resume,
    #[serde(rename = "consumer.dump")]
    Dump,
    #[serde(rename = "consumer.getStats")]
    GetStats,
    #[serde(rename = "consumer.close")]
    Close,
}

/// Successful response payload for a consumer request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConsumerResponse {
    /// Plain acknowledgement.
    Accepted,
    /// `consumer.dump` payload.
    Dump(ConsumerDump),
    /// `consumer.getStats` payload.
    Stats(Vec<ConsumerStat>),
}

/// Notification published on a consumer id.
#[derive(Debug, Copy, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ConsumerNotification {
    /// Stream quality changed.
    Score(ConsumerScore),
}

/// Request routing failure.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("consumer {0} not found")]
    ConsumerNotFound(ConsumerId),
    #[error("producer {0} not found")]
    ProducerNotFound(ProducerId),
}
