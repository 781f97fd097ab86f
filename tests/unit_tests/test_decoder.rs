// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use line_rpc::codec::{
    decoder::{DecodeStep, FrameDecoder},
    encoder::encode_frame,
    envelope::Envelope,
};

const MAX_FRAME: usize = 1024;

fn frame_bytes(envelope: &Envelope) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in encode_frame(envelope) {
        out.extend_from_slice(&chunk);
    }
    out
}

/// Feed bytes until the decoder leaves `More`; `None` means it consumed
/// everything without completing or failing.
fn drive(decoder: &mut FrameDecoder, bytes: &[u8]) -> Option<DecodeStep> {
    for &b in bytes {
        match decoder.consume(b) {
            DecodeStep::More => {},
            step => return Some(step),
        }
    }
    None
}

#[test]
fn test_round_trip() {
    let envelope = Envelope::request(7, 99, Bytes::from_static(b"hello payload"));
    let mut decoder = FrameDecoder::new(MAX_FRAME);

    assert_eq!(drive(&mut decoder, &frame_bytes(&envelope)), Some(DecodeStep::Done));
    let decoded = decoder.take_envelope().expect("no envelope after Done");
    assert_eq!(decoded, envelope);
    assert_eq!(decoded.content, Bytes::from_static(b"hello payload"));
}

#[test]
fn test_back_to_back_frames_reuse_the_decoder() {
    let first = Envelope::request(1, 10, Bytes::from_static(b"one"));
    let second = Envelope::response(10, Bytes::from_static(b"two"));

    let mut stream = frame_bytes(&first);
    stream.extend_from_slice(&frame_bytes(&second));

    let mut decoder = FrameDecoder::new(MAX_FRAME);
    let mut decoded = Vec::new();
    for b in stream {
        match decoder.consume(b) {
            DecodeStep::More => {},
            DecodeStep::Done => {
                decoded.push(decoder.take_envelope().expect("no envelope"))
            },
            DecodeStep::Fail => panic!("unexpected decode failure"),
        }
    }
    assert_eq!(decoded, vec![first, second]);
}

#[test]
fn test_non_digit_at_start_fails() {
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    assert_eq!(decoder.consume(b'a'), DecodeStep::Fail);
}

#[test]
fn test_colon_without_length_fails() {
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    assert_eq!(decoder.consume(b':'), DecodeStep::Fail);
}

#[test]
fn test_non_digit_inside_length_fails() {
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    assert_eq!(drive(&mut decoder, b"12x:"), Some(DecodeStep::Fail));
}

#[test]
fn test_short_content_never_completes() {
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    assert_eq!(drive(&mut decoder, b"3:ab"), None);
}

#[test]
fn test_truncated_envelope_fails() {
    // Three content bytes cannot hold the envelope header; the decoder
    // must fail no later than the declared end of the frame.
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    assert_eq!(drive(&mut decoder, b"3:abcd"), Some(DecodeStep::Fail));
}

#[test]
fn test_request_without_response_identify_fails() {
    let envelope = Envelope::request(7, 99, Bytes::from_static(b"x"));
    let mut raw = frame_bytes(&envelope);
    // Clear the flags byte: offset 1 of the envelope, after the "25:"
    // frame header.
    raw[3 + 1] = 0;

    let mut decoder = FrameDecoder::new(MAX_FRAME);
    assert_eq!(drive(&mut decoder, &raw), Some(DecodeStep::Fail));
}

#[test]
fn test_empty_content_fails() {
    let envelope = Envelope::response(9, Bytes::new());
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    assert_eq!(drive(&mut decoder, &frame_bytes(&envelope)), Some(DecodeStep::Fail));
}

#[test]
fn test_zero_length_frame_fails_on_next_byte() {
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    assert_eq!(drive(&mut decoder, b"0:x"), Some(DecodeStep::Fail));
}

#[test]
fn test_oversized_declared_length_fails_at_colon() {
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    assert_eq!(drive(&mut decoder, b"2048:"), Some(DecodeStep::Fail));
}

#[test]
fn test_overflowing_length_fails() {
    let mut decoder = FrameDecoder::new(MAX_FRAME);
    assert_eq!(
        drive(&mut decoder, b"99999999999999999999999:"),
        Some(DecodeStep::Fail)
    );
}
