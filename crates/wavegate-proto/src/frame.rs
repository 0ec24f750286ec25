//! Frame opcodes and header encoding.
//!
//! Outbound frames are always final (FIN set) and never masked, so their
//! header depends only on the opcode and the payload length:
//!
//! ```text
//!  byte 0        byte 1        bytes 2..
//! +-+-+-+-+----+-+-----------+---------------------------+
//! |F|0|0|0| op |0| len7      | extended length (0/2/8 B) |
//! +-+-+-+-+----+-+-----------+---------------------------+
//! ```
//!
//! `len7` holds the length itself up to 125, `126` announces a 16-bit
//! big-endian length and `127` a 64-bit big-endian length.

use std::fmt;

use crate::error::FrameError;

/// Largest possible header: 2 fixed bytes, 8 length bytes, 4 mask bytes.
pub const MAX_HEADER_LEN: usize = 14;

/// Largest payload length that fits in the 7-bit length field.
pub const MAX_INLINE_LEN: usize = 125;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN_MASK: u8 = 0x7F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// A WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message (0x0).
    Continuation = 0x0,
    /// UTF-8 text data (0x1).
    Text = 0x1,
    /// Binary data (0x2).
    Binary = 0x2,
    /// Connection close (0x8).
    Close = 0x8,
    /// Ping (0x9).
    Ping = 0x9,
    /// Pong (0xA).
    Pong = 0xA,
}

impl Opcode {
    /// Convert from the 4-bit wire value. Reserved values yield `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Get the 4-bit wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a control opcode (close, ping or pong).
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Check if this opcode carries application data.
    pub fn is_data(self) -> bool {
        matches!(self, Self::Continuation | Self::Text | Self::Binary)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "CONTINUATION",
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
            Self::Close => "CLOSE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        };
        f.write_str(name)
    }
}

/// The encoded header of an outbound frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    bytes: [u8; 10],
    len: usize,
}

impl FrameHeader {
    /// Encode the header for a final, unmasked frame.
    pub fn encode(opcode: Opcode, payload_len: usize) -> Self {
        let mut bytes = [0u8; 10];
        bytes[0] = FIN_BIT | opcode.as_u8();

        let len = if payload_len <= MAX_INLINE_LEN {
            bytes[1] = payload_len as u8;
            2
        } else if let Ok(short) = u16::try_from(payload_len) {
            bytes[1] = LEN_16;
            bytes[2..4].copy_from_slice(&short.to_be_bytes());
            4
        } else {
            bytes[1] = LEN_64;
            bytes[2..10].copy_from_slice(&(payload_len as u64).to_be_bytes());
            10
        };

        Self { bytes, len }
    }

    /// Get the header bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Get the header length in bytes (2, 4 or 10).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: a header has at least two bytes.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl AsRef<[u8]> for FrameHeader {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHeader")
            .field("bytes", &self.as_bytes())
            .finish()
    }
}

/// A decoded frame header, as seen on the wire in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    /// FIN bit.
    pub fin: bool,
    /// Raw 4-bit opcode (reserved values included).
    pub opcode: u8,
    /// Masking key, if the mask bit was set.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: u64,
    /// Total header length including extended length and mask key.
    pub header_len: usize,
}

impl RawHeader {
    /// Get the opcode, if it is not a reserved value.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }
}

/// Number of header bytes that follow the two fixed bytes.
pub fn extra_header_len(second_byte: u8) -> usize {
    let length_bytes = match second_byte & LEN_MASK {
        LEN_16 => 2,
        LEN_64 => 8,
        _ => 0,
    };
    let mask_bytes = if second_byte & MASK_BIT != 0 { 4 } else { 0 };
    length_bytes + mask_bytes
}

/// Decode a frame header from the start of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet hold the whole header.
pub fn decode_header(buf: &[u8]) -> Result<Option<RawHeader>, FrameError> {
    let [b0, b1, rest @ ..] = buf else {
        return Ok(None);
    };
    if rest.len() < extra_header_len(*b1) {
        return Ok(None);
    }

    let (payload_len, rest) = match b1 & LEN_MASK {
        LEN_16 => (u64::from(u16::from_be_bytes([rest[0], rest[1]])), &rest[2..]),
        LEN_64 => {
            let mut be = [0u8; 8];
            be.copy_from_slice(&rest[..8]);
            let len = u64::from_be_bytes(be);
            if len >> 63 != 0 {
                return Err(FrameError::InvalidLength);
            }
            (len, &rest[8..])
        }
        short => (u64::from(short), rest),
    };

    let mask = if b1 & MASK_BIT != 0 {
        Some([rest[0], rest[1], rest[2], rest[3]])
    } else {
        None
    };

    Ok(Some(RawHeader {
        fin: b0 & FIN_BIT != 0,
        opcode: b0 & OPCODE_MASK,
        mask,
        payload_len,
        header_len: 2 + extra_header_len(*b1),
    }))
}

/// Apply (or remove) a client masking key in place.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}
