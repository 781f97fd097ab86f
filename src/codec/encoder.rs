// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;

use crate::codec::envelope::Envelope;

/// Serialize one envelope into its on-wire frame.
///
/// Returns three chunks: the ASCII `length:` header, the envelope header
/// and the content. They are queued separately so the content bytes are
/// never copied into a combined buffer.
pub fn encode_frame(envelope: &Envelope) -> [Bytes; 3] {
    let (header, content) = envelope.to_wire_parts();
    let declared = header.len() + content.len();
    [
        Bytes::from(format!("{declared}:").into_bytes()),
        header,
        content,
    ]
}
