//! Codec-specific payload handling: key frame detection and per-consumer payload rewrite
//! contexts.

pub(crate) mod h264;
pub(crate) mod vp8;
pub(crate) mod vp9;

use crate::rtp_parameters::{MimeType, MimeTypeVideo};
use bytes::BytesMut;

/// Outcome of a payload rewrite attempt.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EncodeResult {
    /// Payload (possibly rewritten in place) must be forwarded.
    Kept,
    /// Payload must not be forwarded; sequence and timestamp rewriters have to compensate.
    Drop,
}

/// Per-consumer, per-codec payload rewrite state.
///
/// `encode` may rewrite payload bytes in place and `restore` must undo it exactly, so the caller
/// can hand the same buffer to other consumers afterwards.
pub trait EncodingContext {
    /// Reset codec-internal baselines so the next `encode` treats the incoming packet as a fresh
    /// start.
    fn sync_required(&mut self);

    /// Rewrite the payload for this consumer.
    fn encode(&mut self, payload: &mut BytesMut) -> EncodeResult;

    /// Undo the last `encode` on the same payload.
    fn restore(&mut self, payload: &mut BytesMut);
}

/// Encoding context for the given MIME type, if the codec needs one.
///
/// Only VP8 carries payload fields (PictureID, TL0PICIDX) whose continuity must be preserved
/// across resyncs. Codecs without per-packet rewrite state forward payloads untouched.
#[must_use]
pub fn encoding_context_for(mime_type: MimeType) -> Option<Box<dyn EncodingContext>> {
    match mime_type {
        MimeType::Video(MimeTypeVideo::Vp8) => Some(Box::new(vp8::Vp8EncodingContext::default())),
        _ => None,
    }
}

/// Codec-specific key frame detection.
#[must_use]
pub fn is_key_frame(mime_type: MimeType, payload: &[u8]) -> bool {
    match mime_type {
        MimeType::Video(MimeTypeVideo::Vp8) => vp8::is_key_frame(payload),
        MimeType::Video(MimeTypeVideo::Vp9) => vp9::is_key_frame(payload),
        MimeType::Video(MimeTypeVideo::H264) => h264::is_key_frame(payload),
        _ => false,
    }
}
