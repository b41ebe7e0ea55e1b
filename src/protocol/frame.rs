//! Length-prefixed wire framing
//!
//! Frame format:
//! ```text
//! +----------------+------------------+
//! | length         | payload          |
//! | (5 ASCII digits| (variable)       |
//! |  zero-padded)  |                  |
//! +----------------+------------------+
//! ```
//!
//! The header is the payload length as a zero-padded decimal string, so the
//! largest payload a frame can carry is 99999 bytes. Oversized payloads are
//! rejected at encode time, before anything reaches the socket.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ChatError, Result};

/// Length header size: 5 ASCII decimal digits
pub const LEN_HEADER_SIZE: usize = 5;

/// Maximum frame payload size (bounded by the 5-digit header)
pub const MAX_PAYLOAD_SIZE: usize = 99_999;

/// Encode a payload into a complete frame
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ChatError::framing(format!(
            "payload too large: {} bytes (max: {})",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut buf = BytesMut::with_capacity(LEN_HEADER_SIZE + payload.len());
    buf.put_slice(format!("{:05}", payload.len()).as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Streaming frame decoder
///
/// Bytes read from the socket are fed in as they arrive; `decode_next`
/// yields complete payloads once enough data has accumulated. A non-numeric
/// length header means the stream can no longer be trusted and the only
/// valid response is closing the connection.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new frame codec
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Create a new frame codec with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Feed data into the codec
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame payload
    ///
    /// Returns `Ok(Some(payload))` if a complete frame is buffered,
    /// `Ok(None)` if more data is needed.
    pub fn decode_next(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < LEN_HEADER_SIZE {
            return Ok(None);
        }

        let header = &self.buffer[..LEN_HEADER_SIZE];
        if !header.iter().all(u8::is_ascii_digit) {
            return Err(ChatError::framing(format!(
                "non-numeric length header: {:?}",
                String::from_utf8_lossy(header)
            )));
        }

        // Header is guaranteed ASCII digits, so both conversions hold.
        let payload_len: usize = std::str::from_utf8(header)
            .expect("ascii digits are valid utf-8")
            .parse()
            .expect("five digits fit in usize");

        if self.buffer.len() < LEN_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        self.buffer.advance(LEN_HEADER_SIZE);
        Ok(Some(self.buffer.split_to(payload_len).freeze()))
    }

    /// Get the current buffer length
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header() {
        let frame = encode(b"hello").unwrap();
        assert_eq!(&frame[..LEN_HEADER_SIZE], b"00005");
        assert_eq!(&frame[LEN_HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_roundtrip() {
        let payload = "{\"action\":\"time\"}".as_bytes();
        let frame = encode(payload).unwrap();

        let mut codec = FrameCodec::new();
        codec.feed(&frame);

        let decoded = codec.decode_next().unwrap().unwrap();
        assert_eq!(&decoded[..], payload);
        assert!(codec.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_roundtrip_utf8() {
        let payload = "café ☕ 你好".as_bytes();
        let frame = encode(payload).unwrap();

        let mut codec = FrameCodec::new();
        codec.feed(&frame);

        let decoded = codec.decode_next().unwrap().unwrap();
        assert_eq!(std::str::from_utf8(&decoded).unwrap(), "café ☕ 你好");
    }

    #[test]
    fn test_streaming_partial_feed() {
        let frame1 = encode(b"first message").unwrap();
        let frame2 = encode(b"second").unwrap();

        let mut data = BytesMut::new();
        data.extend_from_slice(&frame1);
        data.extend_from_slice(&frame2);

        let mut codec = FrameCodec::new();

        // Feed less than a header
        codec.feed(&data[..3]);
        assert!(codec.decode_next().unwrap().is_none());

        // Feed up to the middle of the first payload
        codec.feed(&data[3..10]);
        assert!(codec.decode_next().unwrap().is_none());

        // Feed the rest; both frames come out in order
        codec.feed(&data[10..]);
        assert_eq!(&codec.decode_next().unwrap().unwrap()[..], b"first message");
        assert_eq!(&codec.decode_next().unwrap().unwrap()[..], b"second");
        assert!(codec.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode(b"").unwrap();
        assert_eq!(&frame[..], b"00000");

        let mut codec = FrameCodec::new();
        codec.feed(&frame);
        let decoded = codec.decode_next().unwrap().unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_max_payload() {
        let payload = vec![b'x'; MAX_PAYLOAD_SIZE];
        let frame = encode(&payload).unwrap();
        assert_eq!(&frame[..LEN_HEADER_SIZE], b"99999");

        let mut codec = FrameCodec::new();
        codec.feed(&frame);
        assert_eq!(codec.decode_next().unwrap().unwrap().len(), MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![b'x'; MAX_PAYLOAD_SIZE + 1];
        let result = encode(&payload);
        assert!(matches!(result, Err(ChatError::Framing(_))));
    }

    #[test]
    fn test_non_numeric_header() {
        let mut codec = FrameCodec::new();
        codec.feed(b"abcde{\"action\":\"list\"}");

        let result = codec.decode_next();
        assert!(matches!(result, Err(ChatError::Framing(_))));
    }

    #[test]
    fn test_partial_header_not_an_error() {
        let mut codec = FrameCodec::new();
        codec.feed(b"000");
        assert!(codec.decode_next().unwrap().is_none());

        codec.feed(b"05hello");
        assert_eq!(&codec.decode_next().unwrap().unwrap()[..], b"hello");
    }
}
