// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The logical framed message and its wire encoding.
//!
//! An envelope is the one record the framework reads; its `content` is an
//! opaque payload owned by the service layer. On the wire an envelope is a
//! fixed 24-byte header followed by the content bytes:
//!
//! ```text
//! offset 0   kind               u8   (1 = REQUEST, 2 = RESPONSE)
//! offset 1   flags              u8   (bit 0: response_identify present)
//! offset 2   reserved           6 bytes, zero
//! offset 8   identify           u64 big-endian
//! offset 16  response_identify  u64 big-endian (zero when absent)
//! offset 24  content            >= 1 byte
//! ```
//!
//! A REQUEST without `response_identify` and an envelope of either kind
//! without content are malformed; decoding them kills the connection.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U64,
    Unaligned,
};

pub const ENVELOPE_HEADER_LEN: usize = 24;

const FLAG_HAS_RESPONSE_IDENTIFY: u8 = 0b0000_0001;

/// Raised when envelope bytes do not form a routable message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope of {0} bytes is shorter than the {ENVELOPE_HEADER_LEN}-byte header")]
    TooShort(usize),
    #[error("invalid envelope kind: 0x{0:02x}")]
    InvalidKind(u8),
    #[error("request envelope without response_identify")]
    MissingResponseIdentify,
    #[error("envelope without content")]
    EmptyContent,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Request = 1,
    Response = 2,
}

impl EnvelopeKind {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Fixed wire header preceding the content bytes.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct EnvelopeHeader {
    pub kind: u8,                          // 0
    pub flags: u8,                         // 1
    reserved: [u8; 6],                     // 2..8
    pub identify: U64<BigEndian>,          // 8..16
    pub response_identify: U64<BigEndian>, // 16..24
}

/// One framed message: a request carrying the response id the callee must
/// echo, or a response carrying that echoed id as its `identify`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub identify: u64,
    pub response_identify: Option<u64>,
    pub content: Bytes,
}

impl Envelope {
    pub fn request(identify: u64, response_identify: u64, content: Bytes) -> Self {
        Self {
            kind: EnvelopeKind::Request,
            identify,
            response_identify: Some(response_identify),
            content,
        }
    }

    pub fn response(identify: u64, content: Bytes) -> Self {
        Self {
            kind: EnvelopeKind::Response,
            identify,
            response_identify: None,
            content,
        }
    }

    /// Parse and validate one serialized envelope.
    ///
    /// `buf` must hold the full envelope (the frame decoder hands over
    /// exactly the declared length); the content is sliced out without a
    /// copy.
    pub fn parse(buf: Bytes) -> Result<Self, EnvelopeError> {
        let (header, _) = EnvelopeHeader::ref_from_prefix(&buf[..])
            .map_err(|_| EnvelopeError::TooShort(buf.len()))?;

        let kind = EnvelopeKind::from_u8(header.kind)
            .ok_or(EnvelopeError::InvalidKind(header.kind))?;
        let has_response_identify =
            header.flags & FLAG_HAS_RESPONSE_IDENTIFY != 0;
        if kind == EnvelopeKind::Request && !has_response_identify {
            return Err(EnvelopeError::MissingResponseIdentify);
        }
        if buf.len() == ENVELOPE_HEADER_LEN {
            return Err(EnvelopeError::EmptyContent);
        }

        let identify = header.identify.get();
        let response_identify =
            has_response_identify.then(|| header.response_identify.get());

        Ok(Self {
            kind,
            identify,
            response_identify,
            content: buf.slice(ENVELOPE_HEADER_LEN..),
        })
    }

    /// Serialize into (header, content). The content `Bytes` is shared, not
    /// copied; callers queue both chunks as-is.
    pub fn to_wire_parts(&self) -> (Bytes, Bytes) {
        let header = EnvelopeHeader {
            kind: self.kind as u8,
            flags: if self.response_identify.is_some() {
                FLAG_HAS_RESPONSE_IDENTIFY
            } else {
                0
            },
            reserved: [0u8; 6],
            identify: U64::new(self.identify),
            response_identify: U64::new(self.response_identify.unwrap_or(0)),
        };

        let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_LEN);
        buf.extend_from_slice(header.as_bytes());
        (buf.freeze(), self.content.clone())
    }

    /// Byte length of the serialized envelope (the frame's declared length).
    #[inline]
    pub fn wire_len(&self) -> usize {
        ENVELOPE_HEADER_LEN + self.content.len()
    }
}
