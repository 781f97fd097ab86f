// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Byte-at-a-time frame decoder.
//!
//! A frame is `<ASCII decimal length> ':' <length envelope bytes>` with no
//! trailing delimiter. The decoder is fed one byte per call and reports
//! progress as a three-valued step: more input needed, one envelope done,
//! or the stream is corrupt. Any `Fail` is fatal to the connection; the
//! read loop closes on it.

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::codec::envelope::Envelope;

/// Per-byte decode progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    /// The frame is incomplete; feed the next byte.
    More,
    /// A full envelope was decoded and validated; take it with
    /// [`FrameDecoder::take_envelope`].
    Done,
    /// The byte stream is not a valid frame sequence.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Start,
    Length,
    Content,
    End,
}

/// Decoder state machine over `{Start, Length, Content, End}`.
///
/// `End` re-enters `Start` on the next byte, so one decoder instance
/// consumes a whole connection's inbound stream.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    length_store: String,
    length: usize,
    content: BytesMut,
    max_frame_length: usize,
    decoded: Option<Envelope>,
}

impl FrameDecoder {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            state: DecodeState::Start,
            length_store: String::new(),
            length: 0,
            content: BytesMut::new(),
            max_frame_length,
            decoded: None,
        }
    }

    /// Consume one byte of the inbound stream.
    pub fn consume(&mut self, input: u8) -> DecodeStep {
        match self.state {
            DecodeState::Start | DecodeState::End => {
                if !input.is_ascii_digit() {
                    warn!("frame header starts with non-digit 0x{input:02x}");
                    return DecodeStep::Fail;
                }
                self.length_store.clear();
                self.length_store.push(input as char);
                self.state = DecodeState::Length;
                DecodeStep::More
            },
            DecodeState::Length => {
                if input == b':' {
                    let length = match self.length_store.parse::<usize>() {
                        Ok(l) if l <= self.max_frame_length => l,
                        Ok(l) => {
                            warn!(
                                "declared frame length {l} exceeds limit {}",
                                self.max_frame_length
                            );
                            return DecodeStep::Fail;
                        },
                        Err(e) => {
                            warn!("unparseable frame length {:?}: {e}", self.length_store);
                            return DecodeStep::Fail;
                        },
                    };
                    self.length = length;
                    self.content = BytesMut::with_capacity(length);
                    self.state = DecodeState::Content;
                    DecodeStep::More
                } else if input.is_ascii_digit() {
                    self.length_store.push(input as char);
                    DecodeStep::More
                } else {
                    warn!("frame length contains non-digit 0x{input:02x}");
                    DecodeStep::Fail
                }
            },
            DecodeState::Content => {
                if self.content.len() == self.length {
                    // Only reachable for a declared length of zero; there is
                    // no room for this byte in the frame.
                    warn!("frame content overflows declared length {}", self.length);
                    return DecodeStep::Fail;
                }
                self.content.put_u8(input);
                if self.content.len() < self.length {
                    return DecodeStep::More;
                }
                let raw = std::mem::take(&mut self.content).freeze();
                match Envelope::parse(raw) {
                    Ok(envelope) => {
                        self.decoded = Some(envelope);
                        self.state = DecodeState::End;
                        DecodeStep::Done
                    },
                    Err(e) => {
                        warn!("malformed envelope: {e}");
                        DecodeStep::Fail
                    },
                }
            },
        }
    }

    /// Hand over the envelope completed by the last `Done` step.
    pub fn take_envelope(&mut self) -> Option<Envelope> {
        self.decoded.take()
    }
}
