//! Harp binary protocol framing.
//!
//! ```text
//! [type, length, address, port, payload_type, (seconds:4, ticks:2), payload.., checksum]
//! ```
//!
//! `length` counts every byte after itself; the checksum is the byte sum of
//! everything before it. Timestamps are seconds plus 32 µs ticks.

use heapless::Vec;

/// Widest register payload in bytes.
pub const MAX_PAYLOAD: usize = 16;
/// Longest frame this device accepts or emits.
pub const MAX_FRAME: usize = 5 + TIMESTAMP_LEN + MAX_PAYLOAD + 1;

pub const ERROR_FLAG: u8 = 0x08;
pub const TIMESTAMP_FLAG: u8 = 0x10;
pub const DEFAULT_PORT: u8 = 0xff;

const TIMESTAMP_LEN: usize = 6;
const TICK_US: u64 = 32;

pub type Payload = Vec<u8, MAX_PAYLOAD>;
pub type Frame = Vec<u8, MAX_FRAME>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    Read = 1,
    Write = 2,
    Event = 3,
}

impl MessageType {
    fn from_code(code: u8) -> Option<Self> {
        match code & !ERROR_FLAG {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            3 => Some(Self::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PayloadType {
    U8 = 0x01,
    U16 = 0x02,
    U32 = 0x04,
    U64 = 0x08,
    S8 = 0x81,
    S16 = 0x82,
    S32 = 0x84,
    S64 = 0x88,
    Float = 0x44,
}

impl PayloadType {
    pub fn from_code(code: u8) -> Option<Self> {
        let ty = match code & !TIMESTAMP_FLAG {
            0x01 => Self::U8,
            0x02 => Self::U16,
            0x04 => Self::U32,
            0x08 => Self::U64,
            0x81 => Self::S8,
            0x82 => Self::S16,
            0x84 => Self::S32,
            0x88 => Self::S64,
            0x44 => Self::Float,
            _ => return None,
        };
        Some(ty)
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        (self as u8 & 0x0f) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    Checksum,
    Length(u8),
    MessageType(u8),
    PayloadTooLarge(usize),
}

/// A host request, copied out of the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: MessageType,
    pub address: u8,
    pub port: u8,
    /// Raw payload type code, timestamp flag stripped
    pub payload_type: u8,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// Not enough bytes buffered yet.
    Incomplete,
    /// Drop this many bytes and try again.
    Skip(usize, FrameError),
    /// A complete request spanning this many bytes.
    Frame(Request, usize),
}

/// Parses one request from the start of `buf`.
pub fn parse(buf: &[u8]) -> Parsed {
    if buf.len() < 2 {
        return Parsed::Incomplete;
    }

    let kind = match MessageType::from_code(buf[0]) {
        Some(kind @ (MessageType::Read | MessageType::Write)) if buf[0] & ERROR_FLAG == 0 => kind,
        _ => return Parsed::Skip(1, FrameError::MessageType(buf[0])),
    };

    let length = buf[1];
    let total = length as usize + 2;
    if length < 4 || total > MAX_FRAME {
        return Parsed::Skip(1, FrameError::Length(length));
    }
    if buf.len() < total {
        return Parsed::Incomplete;
    }

    let frame = &buf[..total];
    let checksum = checksum(&frame[..total - 1]);
    if checksum != frame[total - 1] {
        return Parsed::Skip(1, FrameError::Checksum);
    }

    let payload_type = frame[4];
    let header = if payload_type & TIMESTAMP_FLAG != 0 {
        5 + TIMESTAMP_LEN
    } else {
        5
    };
    if header > total - 1 {
        return Parsed::Skip(total, FrameError::Length(length));
    }

    let body = &frame[header..total - 1];
    let Ok(payload) = Payload::from_slice(body) else {
        return Parsed::Skip(total, FrameError::PayloadTooLarge(body.len()));
    };

    Parsed::Frame(
        Request {
            kind,
            address: frame[2],
            port: frame[3],
            payload_type: payload_type & !TIMESTAMP_FLAG,
            payload,
        },
        total,
    )
}

/// A device reply or event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: MessageType,
    pub error: bool,
    pub address: u8,
    pub payload_type: u8,
    pub timestamp: u64,
    pub payload: Payload,
}

impl Reply {
    pub fn new(kind: MessageType, address: u8, payload_type: PayloadType, payload: Payload, timestamp: u64) -> Self {
        Self {
            kind,
            error: false,
            address,
            payload_type: payload_type.code(),
            timestamp,
            payload,
        }
    }

    /// Error reply echoing the request's address and payload type.
    pub fn error(kind: MessageType, address: u8, payload_type: u8, payload: Payload, timestamp: u64) -> Self {
        Self {
            kind,
            error: true,
            address,
            payload_type,
            timestamp,
            payload,
        }
    }

    pub fn encode(&self) -> Frame {
        let mut frame = Frame::new();
        let mut kind = self.kind as u8;
        if self.error {
            kind |= ERROR_FLAG;
        }
        let length = 4 + TIMESTAMP_LEN + self.payload.len();
        let seconds = (self.timestamp / 1_000_000) as u32;
        let ticks = ((self.timestamp % 1_000_000) / TICK_US) as u16;

        // MAX_FRAME fits the largest payload, pushes cannot fail.
        let _ = frame.extend_from_slice(&[
            kind,
            length as u8,
            self.address,
            DEFAULT_PORT,
            self.payload_type | TIMESTAMP_FLAG,
        ]);
        let _ = frame.extend_from_slice(&seconds.to_le_bytes());
        let _ = frame.extend_from_slice(&ticks.to_le_bytes());
        let _ = frame.extend_from_slice(&self.payload);
        let _ = frame.push(checksum(&frame));
        frame
    }
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &[u8]) -> std::vec::Vec<u8> {
        let mut out = bytes.to_vec();
        out.push(checksum(bytes));
        out
    }

    #[test]
    fn parses_write_request() {
        let raw = frame(&[2, 5, 33, 0xff, 0x01, 0x0f]);
        match parse(&raw) {
            Parsed::Frame(req, used) => {
                assert_eq!(used, raw.len());
                assert_eq!(req.kind, MessageType::Write);
                assert_eq!(req.address, 33);
                assert_eq!(req.payload_type, 0x01);
                assert_eq!(req.payload.as_slice(), &[0x0f]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn timestamped_request_skips_timestamp() {
        let raw = frame(&[2, 11, 38, 0xff, 0x11, 1, 2, 3, 4, 5, 6, 0x03]);
        let Parsed::Frame(req, _) = parse(&raw) else {
            panic!("frame expected");
        };
        assert_eq!(req.payload_type, 0x01);
        assert_eq!(req.payload.as_slice(), &[0x03]);
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let raw = frame(&[1, 4, 32, 0xff, 0x01]);
        assert_eq!(parse(&raw[..3]), Parsed::Incomplete);
        assert!(matches!(parse(&raw), Parsed::Frame(_, 6)));
    }

    #[test]
    fn corrupt_frames_are_skipped() {
        let mut raw = frame(&[2, 5, 33, 0xff, 0x01, 0x0f]);
        *raw.last_mut().unwrap() ^= 0xff;
        assert_eq!(parse(&raw), Parsed::Skip(1, FrameError::Checksum));
        assert_eq!(parse(&[0x42, 4]), Parsed::Skip(1, FrameError::MessageType(0x42)));
        assert_eq!(parse(&[1, 2, 0, 0]), Parsed::Skip(1, FrameError::Length(2)));
    }

    #[test]
    fn reply_carries_timestamp_and_checksum() {
        let payload = Payload::from_slice(&[0xaa]).unwrap();
        let reply = Reply::new(MessageType::Event, 33, PayloadType::U8, payload, 2_000_064);
        let bytes = reply.encode();

        assert_eq!(
            &bytes[..bytes.len() - 1],
            &[3, 11, 33, 0xff, 0x11, 2, 0, 0, 0, 2, 0, 0xaa]
        );
        assert_eq!(bytes[bytes.len() - 1], checksum(&bytes[..bytes.len() - 1]));
    }

    #[test]
    fn error_replies_set_the_flag() {
        let reply = Reply::error(MessageType::Write, 32, 0x01, Payload::new(), 0);
        assert_eq!(reply.encode()[0], 2 | ERROR_FLAG);
    }
}
