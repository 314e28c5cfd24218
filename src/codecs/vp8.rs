//! VP8 payload descriptor handling (RFC 7741).

use super::{EncodeResult, EncodingContext};
use bytes::BytesMut;

const PICTURE_ID_MASK: u16 = 0x7FFF;

/// Parsed offsets of the optional descriptor fields we care about.
#[derive(Debug, Copy, Clone)]
struct Descriptor {
    start_of_partition: bool,
    partition_index: u8,
    /// Offset of the PictureID field, with its width in bytes (1 or 2).
    picture_id: Option<(usize, usize)>,
    tl0_pic_idx: Option<usize>,
    /// Offset of the first VP8 frame header byte.
    payload_offset: usize,
}

fn parse_descriptor(payload: &[u8]) -> Option<Descriptor> {
    if payload.is_empty() {
        return None;
    }

    let b0 = payload[0];
    let extended = b0 & 0x80 != 0;
    let start_of_partition = b0 & 0x10 != 0;
    let partition_index = b0 & 0x07;

    let mut offset = 1;
    let mut picture_id = None;
    let mut tl0_pic_idx = None;

    if extended {
        let ext = *payload.get(offset)?;
        offset += 1;

        let has_picture_id = ext & 0x80 != 0;
        let has_tl0_pic_idx = ext & 0x40 != 0;
        let has_tid = ext & 0x20 != 0;
        let has_key_idx = ext & 0x10 != 0;

        if has_picture_id {
            let first = *payload.get(offset)?;
            let width = if first & 0x80 != 0 { 2 } else { 1 };
            if payload.len() < offset + width {
                return None;
            }
            picture_id = Some((offset, width));
            offset += width;
        }

        if has_tl0_pic_idx {
            if payload.len() <= offset {
                return None;
            }
            tl0_pic_idx = Some(offset);
            offset += 1;
        }

        if has_tid || has_key_idx {
            if payload.len() <= offset {
                return None;
            }
            offset += 1;
        }
    }

    if payload.len() <= offset {
        return None;
    }

    Some(Descriptor {
        start_of_partition,
        partition_index,
        picture_id,
        tl0_pic_idx,
        payload_offset: offset,
    })
}

fn read_picture_id(payload: &[u8], (offset, width): (usize, usize)) -> u16 {
    if width == 2 {
        (u16::from(payload[offset] & 0x7F) << 8) | u16::from(payload[offset + 1])
    } else {
        u16::from(payload[offset] & 0x7F)
    }
}

fn write_picture_id(payload: &mut [u8], (offset, width): (usize, usize), picture_id: u16) {
    if width == 2 {
        payload[offset] = 0x80 | ((picture_id >> 8) as u8 & 0x7F);
        payload[offset + 1] = picture_id as u8;
    } else {
        payload[offset] = picture_id as u8 & 0x7F;
    }
}

/// Whether the payload starts a VP8 key frame: first packet of the first partition with the
/// inverse-key-frame bit of the frame header unset.
#[must_use]
pub fn is_key_frame(payload: &[u8]) -> bool {
    match parse_descriptor(payload) {
        Some(descriptor) => {
            descriptor.start_of_partition
                && descriptor.partition_index == 0
                && payload[descriptor.payload_offset] & 0x01 == 0
        }
        None => false,
    }
}

/// Rewrites PictureID and TL0PICIDX so they stay continuous across resyncs, no matter where the
/// producer stream restarted.
#[derive(Debug, Default)]
pub struct Vp8EncodingContext {
    picture_id: FieldRewriter<u16>,
    tl0_pic_idx: FieldRewriter<u8>,
    saved: Option<SavedFields>,
}

#[derive(Debug, Copy, Clone)]
struct SavedFields {
    picture_id: Option<((usize, usize), u16)>,
    tl0_pic_idx: Option<(usize, u8)>,
}

/// Maps an input counter onto a continuous output counter within a masked domain.
#[derive(Debug, Default)]
struct FieldRewriter<T> {
    base_input: T,
    base_output: T,
    max_output: T,
    synced: bool,
}

macro_rules! masked_field_rewriter {
    ($ty:ty, $mask:expr) => {
        impl FieldRewriter<$ty> {
            fn sync(&mut self) {
                self.synced = false;
            }

            fn input(&mut self, input: $ty) -> $ty {
                if !self.synced {
                    self.base_input = input;
                    self.base_output = self.max_output.wrapping_add(1) & $mask;
                    self.synced = true;
                }

                let delta = input.wrapping_sub(self.base_input) & $mask;
                let output = self.base_output.wrapping_add(delta) & $mask;

                // Forward distance within half of the masked range means a new maximum.
                let distance = output.wrapping_sub(self.max_output) & $mask;
                if distance != 0 && distance < ($mask >> 1) + 1 {
                    self.max_output = output;
                }

                output
            }
        }
    };
}

masked_field_rewriter!(u16, PICTURE_ID_MASK);
masked_field_rewriter!(u8, u8::MAX);

impl EncodingContext for Vp8EncodingContext {
    fn sync_required(&mut self) {
        self.picture_id.sync();
        self.tl0_pic_idx.sync();
    }

    fn encode(&mut self, payload: &mut BytesMut) -> EncodeResult {
        let descriptor = match parse_descriptor(payload) {
            Some(descriptor) => descriptor,
            None => return EncodeResult::Drop,
        };

        let mut saved = SavedFields {
            picture_id: None,
            tl0_pic_idx: None,
        };

        if let Some(field) = descriptor.picture_id {
            let original = read_picture_id(payload, field);
            let rewritten = self.picture_id.input(original);
            write_picture_id(payload, field, rewritten);
            saved.picture_id = Some((field, original));
        }

        if let Some(offset) = descriptor.tl0_pic_idx {
            let original = payload[offset];
            payload[offset] = self.tl0_pic_idx.input(original);
            saved.tl0_pic_idx = Some((offset, original));
        }

        self.saved = Some(saved);

        EncodeResult::Kept
    }

    fn restore(&mut self, payload: &mut BytesMut) {
        if let Some(saved) = self.saved.take() {
            if let Some((field, original)) = saved.picture_id {
                write_picture_id(payload, field, original);
            }
            if let Some((offset, original)) = saved.tl0_pic_idx {
                payload[offset] = original;
            }
        }
    }
}
