// Copyright 2021 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Yamux wire frames.
//!
//! Every frame is a 12-byte header followed by a body for DATA frames only:
//! `version(1) | type(1) | flags(2 BE) | stream_id(4 BE) | length(4 BE)`.

use asynchronous_codec::{Decoder, Encoder};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameDecodeError;

pub const PROTO_VERSION: u8 = 0;
pub const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    WindowUpdate,
    Ping,
    GoAway,
}

impl FrameType {
    fn from_u8(value: u8) -> Option<FrameType> {
        match value {
            0 => Some(FrameType::Data),
            1 => Some(FrameType::WindowUpdate),
            2 => Some(FrameType::Ping),
            3 => Some(FrameType::GoAway),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            FrameType::Data => 0,
            FrameType::WindowUpdate => 1,
            FrameType::Ping => 2,
            FrameType::GoAway => 3,
        }
    }
}

/// Bitfield over SYN/ACK/FIN/RST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(pub u16);

pub const SYN: Flags = Flags(1);
pub const ACK: Flags = Flags(2);
pub const FIN: Flags = Flags(4);
pub const RST: Flags = Flags(8);

impl Flags {
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

/// Error codes carried by GO_AWAY frames in the length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoAwayCode {
    Normal,
    ProtocolError,
    InternalError,
}

impl GoAwayCode {
    pub fn from_u32(value: u32) -> Option<GoAwayCode> {
        match value {
            0 => Some(GoAwayCode::Normal),
            1 => Some(GoAwayCode::ProtocolError),
            2 => Some(GoAwayCode::InternalError),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            GoAwayCode::Normal => 0,
            GoAwayCode::ProtocolError => 1,
            GoAwayCode::InternalError => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub ty: FrameType,
    pub flags: Flags,
    pub stream_id: u32,
    /// Payload size for DATA, window delta for WINDOW_UPDATE, opaque id for
    /// PING, error code for GO_AWAY.
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub body: Bytes,
}

impl Frame {
    pub fn data(stream_id: u32, flags: Flags, body: Bytes) -> Frame {
        Frame {
            header: Header {
                ty: FrameType::Data,
                flags,
                stream_id,
                length: body.len() as u32,
            },
            body,
        }
    }

    pub fn window_update(stream_id: u32, flags: Flags, delta: u32) -> Frame {
        Frame {
            header: Header { ty: FrameType::WindowUpdate, flags, stream_id, length: delta },
            body: Bytes::new(),
        }
    }

    pub fn ping(flags: Flags, id: u32) -> Frame {
        Frame {
            header: Header { ty: FrameType::Ping, flags, stream_id: 0, length: id },
            body: Bytes::new(),
        }
    }

    pub fn go_away(code: GoAwayCode) -> Frame {
        Frame {
            header: Header {
                ty: FrameType::GoAway,
                flags: Flags::default(),
                stream_id: 0,
                length: code.as_u32(),
            },
            body: Bytes::new(),
        }
    }

    pub fn is_go_away(&self) -> bool {
        self.header.ty == FrameType::GoAway
    }
}

/// Frame codec over an ordered byte pipe.
#[derive(Debug)]
pub struct FrameCodec {
    /// Upper bound on a DATA body; anything larger is a protocol violation.
    max_body_len: usize,
}

impl FrameCodec {
    pub fn new(max_body_len: usize) -> FrameCodec {
        FrameCodec { max_body_len }
    }
}

impl Encoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_LEN + frame.body.len());
        dst.put_u8(PROTO_VERSION);
        dst.put_u8(frame.header.ty.as_u8());
        dst.put_u16(frame.header.flags.0);
        dst.put_u32(frame.header.stream_id);
        dst.put_u32(frame.header.length);
        dst.extend_from_slice(&frame.body);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameDecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let version = src[0];
        if version != PROTO_VERSION {
            return Err(FrameDecodeError::InvalidVersion(version));
        }
        let ty = FrameType::from_u8(src[1]).ok_or(FrameDecodeError::InvalidType(src[1]))?;
        let flags = Flags(u16::from_be_bytes([src[2], src[3]]));
        let stream_id = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        let length = u32::from_be_bytes([src[8], src[9], src[10], src[11]]);

        let body_len = if ty == FrameType::Data { length as usize } else { 0 };
        if body_len > self.max_body_len {
            return Err(FrameDecodeError::OversizedBody(length));
        }
        if ty == FrameType::GoAway && stream_id != 0 {
            return Err(FrameDecodeError::NonZeroGoAwayStream(stream_id));
        }
        if src.len() < HEADER_LEN + body_len {
            src.reserve(HEADER_LEN + body_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(body_len).freeze();
        Ok(Some(Frame { header: Header { ty, flags, stream_id, length }, body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let mut codec = FrameCodec::new(64 * 1024);
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_roundtrips() {
        roundtrip(Frame::data(1, SYN, Bytes::from_static(b"hello")));
        roundtrip(Frame::data(7, FIN.union(ACK), Bytes::new()));
        roundtrip(Frame::window_update(2, ACK, 65536));
        roundtrip(Frame::ping(SYN, 42));
        roundtrip(Frame::ping(ACK, 42));
        roundtrip(Frame::go_away(GoAwayCode::Normal));
        roundtrip(Frame::go_away(GoAwayCode::ProtocolError));
    }

    #[test]
    fn partial_input_yields_none() {
        let mut codec = FrameCodec::new(64 * 1024);
        let mut full = BytesMut::new();
        codec.encode(Frame::data(1, Flags::default(), Bytes::from_static(b"abc")), &mut full).unwrap();
        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert_eq!(codec.decode(&mut partial).unwrap(), None);
        }
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut codec = FrameCodec::new(64 * 1024);
        let mut buf = BytesMut::new();
        codec.encode(Frame::ping(SYN, 1), &mut buf).unwrap();
        buf[0] = 3;
        assert!(matches!(codec.decode(&mut buf), Err(FrameDecodeError::InvalidVersion(3))));
    }

    #[test]
    fn bad_type_is_rejected() {
        let mut codec = FrameCodec::new(64 * 1024);
        let mut buf = BytesMut::new();
        codec.encode(Frame::ping(SYN, 1), &mut buf).unwrap();
        buf[1] = 9;
        assert!(matches!(codec.decode(&mut buf), Err(FrameDecodeError::InvalidType(9))));
    }

    #[test]
    fn oversized_body_is_rejected() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::data(1, Flags::default(), Bytes::from(vec![0u8; 17])), &mut buf)
            .unwrap();
        assert!(matches!(codec.decode(&mut buf), Err(FrameDecodeError::OversizedBody(17))));
    }

    #[test]
    fn go_away_with_stream_id_is_rejected() {
        let mut codec = FrameCodec::new(64 * 1024);
        let mut buf = BytesMut::new();
        let mut frame = Frame::go_away(GoAwayCode::Normal);
        frame.header.stream_id = 5;
        codec.encode(frame, &mut buf).unwrap();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameDecodeError::NonZeroGoAwayStream(5))
        ));
    }

    #[test]
    fn flags_are_bit_tested() {
        let flags = SYN.union(FIN);
        assert!(flags.contains(SYN));
        assert!(flags.contains(FIN));
        assert!(!flags.contains(ACK));
        assert!(!flags.contains(RST));
    }
}
