//! Incoming frame parser.
//!
//! Reads exactly one client frame at a time from a buffered transport and
//! reports it as a valid frame, a clean end of stream, or a decode failure.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::FrameError;
use crate::frame::{
    apply_mask, decode_header, extra_header_len, Opcode, RawHeader, MAX_HEADER_LEN, MAX_INLINE_LEN,
};

/// Default upper bound on a single frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A complete, unmasked frame received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: RawHeader,
    payload: Bytes,
}

impl Frame {
    /// Get the opcode, or `None` for reserved opcodes.
    pub fn opcode(&self) -> Option<Opcode> {
        self.header.opcode()
    }

    /// Get the raw 4-bit opcode.
    pub fn raw_opcode(&self) -> u8 {
        self.header.opcode
    }

    /// Check whether the FIN bit was set.
    pub fn is_final(&self) -> bool {
        self.header.fin
    }

    /// Get the payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Take the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Outcome of reading one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A well-formed frame.
    Frame(Frame),
    /// The stream ended cleanly on a frame boundary.
    Eof,
    /// The bytes on the wire do not form an acceptable frame.
    Invalid(FrameError),
}

impl Decoded {
    /// Check if a well-formed frame was read.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Frame(_))
    }

    /// Check if the stream ended cleanly.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

/// Parser for client-to-server frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameParser {
    max_frame_size: usize,
    accept_unmasked: bool,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameParser {
    /// Create a parser with the given payload limit.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            accept_unmasked: false,
        }
    }

    /// Set whether unmasked client frames are accepted.
    pub fn accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked = accept;
        self
    }

    /// Get the payload limit.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Read one frame.
    ///
    /// I/O errors other than a premature end of stream are returned as `Err`.
    pub async fn read_frame<R>(&self, reader: &mut R) -> io::Result<Decoded>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; MAX_HEADER_LEN];

        if reader.read(&mut head[..1]).await? == 0 {
            return Ok(Decoded::Eof);
        }
        if let Some(outcome) = truncated(reader.read_exact(&mut head[1..2]).await)? {
            return Ok(outcome);
        }
        let total = 2 + extra_header_len(head[1]);
        if let Some(outcome) = truncated(reader.read_exact(&mut head[2..total]).await)? {
            return Ok(outcome);
        }

        let header = match decode_header(&head[..total]) {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(Decoded::Invalid(FrameError::Truncated)),
            Err(e) => return Ok(Decoded::Invalid(e)),
        };
        if let Err(e) = self.check(&header) {
            return Ok(Decoded::Invalid(e));
        }

        // check() bounded the length by max_frame_size
        let len = header.payload_len as usize;
        let mut payload = BytesMut::zeroed(len);
        if let Some(outcome) = truncated(reader.read_exact(&mut payload).await)? {
            return Ok(outcome);
        }
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        Ok(Decoded::Frame(Frame {
            header,
            payload: payload.freeze(),
        }))
    }

    fn check(&self, header: &RawHeader) -> Result<(), FrameError> {
        if header.mask.is_none() && !self.accept_unmasked {
            return Err(FrameError::Unmasked);
        }
        let too_large = usize::try_from(header.payload_len)
            .map(|len| len > self.max_frame_size)
            .unwrap_or(true);
        if too_large {
            return Err(FrameError::TooLarge {
                len: header.payload_len,
                max: self.max_frame_size,
            });
        }
        if let Some(opcode) = header.opcode() {
            if opcode.is_control()
                && (!header.fin || header.payload_len > MAX_INLINE_LEN as u64)
            {
                return Err(FrameError::MalformedControl);
            }
        }
        Ok(())
    }
}

/// Map a premature end of stream to an invalid frame.
fn truncated(result: io::Result<usize>) -> io::Result<Option<Decoded>> {
    match result {
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Ok(Some(Decoded::Invalid(FrameError::Truncated)))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    fn client_frame(first: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![first];
        match payload.len() {
            0..=125 => out.push(0x80 | payload.len() as u8),
            126..=65535 => {
                out.push(0x80 | 126);
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            }
            _ => {
                out.push(0x80 | 127);
                out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
            }
        }
        out.extend_from_slice(&MASK);
        let mut masked = payload.to_vec();
        apply_mask(&mut masked, MASK);
        out.extend_from_slice(&masked);
        out
    }

    async fn parse(bytes: &[u8]) -> Decoded {
        let mut reader = bytes;
        FrameParser::default().read_frame(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_masked_text_frame() {
        let decoded = parse(&client_frame(0x81, b"Hello")).await;
        let Decoded::Frame(frame) = decoded else {
            panic!("expected frame");
        };
        assert_eq!(frame.opcode(), Some(Opcode::Text));
        assert!(frame.is_final());
        assert_eq!(frame.payload().as_ref(), b"Hello");
    }

    #[tokio::test]
    async fn test_extended_length_payload() {
        let payload = vec![7u8; 300];
        let decoded = parse(&client_frame(0x82, &payload)).await;
        assert!(decoded.is_valid());
        let Decoded::Frame(frame) = decoded else { unreachable!() };
        assert_eq!(frame.into_payload().len(), 300);
    }

    #[tokio::test]
    async fn test_empty_stream_is_eof() {
        let decoded = parse(&[]).await;
        assert!(decoded.is_eof());
        assert!(!decoded.is_valid());
    }

    #[tokio::test]
    async fn test_truncated_header_is_invalid() {
        assert_eq!(parse(&[0x81]).await, Decoded::Invalid(FrameError::Truncated));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_invalid() {
        let bytes = client_frame(0x82, b"abcdef");
        assert_eq!(
            parse(&bytes[..bytes.len() - 2]).await,
            Decoded::Invalid(FrameError::Truncated)
        );
    }

    #[tokio::test]
    async fn test_unmasked_rejected_by_default() {
        assert_eq!(
            parse(&[0x82, 0x01, 0xff]).await,
            Decoded::Invalid(FrameError::Unmasked)
        );
    }

    #[tokio::test]
    async fn test_unmasked_accepted_when_enabled() {
        let parser = FrameParser::default().accept_unmasked(true);
        let mut reader: &[u8] = &[0x82, 0x01, 0xff];
        let decoded = parser.read_frame(&mut reader).await.unwrap();
        assert!(decoded.is_valid());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let parser = FrameParser::new(4);
        let bytes = client_frame(0x82, b"too long");
        let mut reader = &bytes[..];
        let decoded = parser.read_frame(&mut reader).await.unwrap();
        assert_eq!(decoded, Decoded::Invalid(FrameError::TooLarge { len: 8, max: 4 }));
    }

    #[tokio::test]
    async fn test_fragmented_control_rejected() {
        // ping without FIN
        let bytes = client_frame(0x09, b"");
        assert_eq!(parse(&bytes).await, Decoded::Invalid(FrameError::MalformedControl));
    }

    #[tokio::test]
    async fn test_reserved_opcode_is_valid_but_unknown() {
        let decoded = parse(&client_frame(0x83, b"x")).await;
        let Decoded::Frame(frame) = decoded else {
            panic!("expected frame");
        };
        assert_eq!(frame.opcode(), None);
        assert_eq!(frame.raw_opcode(), 3);
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let bytes = client_frame(0x81, b"split me");
        let mut reader = tokio_test::io::Builder::new()
            .read(&bytes[..1])
            .read(&bytes[1..4])
            .read(&bytes[4..])
            .build();
        let decoded = FrameParser::default().read_frame(&mut reader).await.unwrap();
        let Decoded::Frame(frame) = decoded else {
            panic!("expected frame");
        };
        assert_eq!(frame.payload().as_ref(), b"split me");
    }

    #[tokio::test]
    async fn test_consecutive_frames() {
        let mut bytes = client_frame(0x81, b"one");
        bytes.extend(client_frame(0x88, b""));
        let mut reader = &bytes[..];
        let parser = FrameParser::default();

        let first = parser.read_frame(&mut reader).await.unwrap();
        assert!(matches!(first, Decoded::Frame(ref f) if f.opcode() == Some(Opcode::Text)));
        let second = parser.read_frame(&mut reader).await.unwrap();
        assert!(matches!(second, Decoded::Frame(ref f) if f.opcode() == Some(Opcode::Close)));
        assert!(parser.read_frame(&mut reader).await.unwrap().is_eof());
    }
}
