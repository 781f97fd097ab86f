// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crc::{CRC_64_XZ, Crc};

const HASH8: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Stable 64-bit fingerprint of a fully-qualified method or type name.
///
/// Both peers hash the same strings, so the algorithm is pinned: CRC-64/XZ,
/// independent of platform and process. Request routing uses
/// `hash8(method_full_name)`; response correlation seeds from
/// `hash8(response_type_name)` and resolves collisions by linear probing.
pub fn hash8(name: &str) -> u64 {
    HASH8.checksum(name.as_bytes())
}
