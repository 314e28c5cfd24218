//! H.264 NAL unit inspection (RFC 6184).

const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;

/// Whether the payload carries (the start of) an IDR NAL unit, either directly, inside a STAP-A
/// aggregation packet or as the first fragment of an FU-A.
#[must_use]
pub fn is_key_frame(payload: &[u8]) -> bool {
    if payload.is_empty() {
        return false;
    }

    match payload[0] & 0x1F {
        NAL_TYPE_IDR => true,
        NAL_TYPE_STAP_A => {
            let mut offset = 1;
            while payload.len() >= offset + 2 {
                let nalu_size = usize::from(u16::from_be_bytes([
                    payload[offset],
                    payload[offset + 1],
                ]));
                offset += 2;

                if nalu_size == 0 || payload.len() < offset + nalu_size {
                    break;
                }
                if payload[offset] & 0x1F == NAL_TYPE_IDR {
                    return true;
                }

                offset += nalu_size;
            }
            false
        }
        NAL_TYPE_FU_A => match payload.get(1) {
            Some(fu_header) => fu_header & 0x80 != 0 && fu_header & 0x1F == NAL_TYPE_IDR,
            None => false,
        },
        _ => false,
    }
}
