//! Chunked transfer encoding, framed in place inside the send slot.
//!
//! Content is read into the slot at [`CHUNK_HEAD_ROOM`], leaving room in front for the
//! hexadecimal size line. [`ChunkedEncoder::frame`] then writes the size line right
//! before the payload and the trailing CRLF right after it, so a chunk goes out without
//! copying the payload.

use std::ops::Range;

/// Bytes reserved in front of the payload: 16 hex digits and CRLF.
pub const CHUNK_HEAD_ROOM: usize = 18;

/// The zero-size chunk that ends a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

const CRLF: &[u8] = b"\r\n";
const HEX: &[u8; 16] = b"0123456789abcdef";

#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkedEncoder;

impl ChunkedEncoder {
    /// The payload window of a slot of `slot_size` bytes.
    pub fn payload_window(slot_size: usize) -> Range<usize> {
        let end = slot_size.saturating_sub(CRLF.len()).max(CHUNK_HEAD_ROOM);
        CHUNK_HEAD_ROOM..end
    }

    /// Frames `len` payload bytes stored at `slot[CHUNK_HEAD_ROOM..]` as one chunk.
    ///
    /// Returns the range of the slot holding the framed chunk.
    ///
    /// # Panics
    ///
    /// Panics if the payload and its trailing CRLF do not fit into `slot`.
    pub fn frame(&self, slot: &mut [u8], len: usize) -> Range<usize> {
        let mut digits = [0u8; 16];
        let mut first = digits.len();
        let mut rest = len;
        loop {
            first -= 1;
            digits[first] = HEX[rest & 0xf];
            rest >>= 4;
            if rest == 0 {
                break;
            }
        }
        let digits = &digits[first..];

        let start = CHUNK_HEAD_ROOM - CRLF.len() - digits.len();
        slot[start..start + digits.len()].copy_from_slice(digits);
        slot[CHUNK_HEAD_ROOM - CRLF.len()..CHUNK_HEAD_ROOM].copy_from_slice(CRLF);
        let end = CHUNK_HEAD_ROOM + len;
        slot[end..end + CRLF.len()].copy_from_slice(CRLF);
        start..end + CRLF.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_payload_in_place() {
        let mut slot = [0u8; 64];
        slot[CHUNK_HEAD_ROOM..CHUNK_HEAD_ROOM + 5].copy_from_slice(b"hello");

        let range = ChunkedEncoder.frame(&mut slot, 5);
        assert_eq!(&slot[range], b"5\r\nhello\r\n");
    }

    #[test]
    fn size_line_is_lowercase_hex() {
        let mut slot = vec![b'x'; CHUNK_HEAD_ROOM + 300 + 2];
        let range = ChunkedEncoder.frame(&mut slot, 300);
        assert!(slot[range].starts_with(b"12c\r\nxxx"));
    }

    #[test]
    fn payload_window_leaves_room_for_framing() {
        assert_eq!(ChunkedEncoder::payload_window(1024), 18..1022);
        assert!(ChunkedEncoder::payload_window(16).is_empty());
    }
}
