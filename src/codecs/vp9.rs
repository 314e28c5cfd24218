//! VP9 payload descriptor inspection (draft-ietf-payload-vp9).

/// Whether the payload starts a VP9 key frame: beginning of frame, not inter-picture predicted,
/// and spatial layer 0 when layer indices are present.
#[must_use]
pub fn is_key_frame(payload: &[u8]) -> bool {
    if payload.is_empty() {
        return false;
    }

    let b0 = payload[0];
    let has_picture_id = b0 & 0x80 != 0;
    let inter_picture_predicted = b0 & 0x40 != 0;
    let has_layer_indices = b0 & 0x20 != 0;
    let flexible_mode = b0 & 0x10 != 0;
    let start_of_frame = b0 & 0x08 != 0;

    if inter_picture_predicted || !start_of_frame {
        return false;
    }

    let mut offset = 1;

    if has_picture_id {
        match payload.get(offset) {
            Some(first) => {
                offset += if first & 0x80 != 0 { 2 } else { 1 };
            }
            None => return false,
        }
    }

    if has_layer_indices {
        let layer_byte = match payload.get(offset) {
            Some(layer_byte) => *layer_byte,
            None => return false,
        };
        let spatial_layer_id = (layer_byte >> 1) & 0x07;

        if spatial_layer_id != 0 {
            return false;
        }

        offset += 1;
        if !flexible_mode {
            // TL0PICIDX byte.
            offset += 1;
        }
    }

    payload.len() > offset
}
