//! Wire framing: every message is a 4-byte big-endian length followed by
//! the payload bytes.

use tokio_util::codec::LengthDelimitedCodec;

/// Largest accepted message (16 MiB).
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Builds the codec used by both sides of every connection.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    #[test]
    fn test_frame_layout() {
        let mut codec = frame_codec();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"abc"), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = frame_codec();
        let mut buf = BytesMut::new();
        buf.put_u32(5);
        buf.put_slice(b"he");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_slice(b"llo");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"hello");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = frame_codec();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LENGTH + 1) as u32);
        assert!(codec.decode(&mut buf).is_err());
    }
}
