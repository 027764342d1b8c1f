// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte layouts of the checksum metadata that vendors embed inside flashed
//! payloads.
//!
//! Each family uses its own endianness; nothing here is normalized.

use packed_struct::prelude::*;
use std::ops::Range;

/// Four bytes that sit just before the last two bytes of the highest block
/// when it carries an additive-sum directory.
pub const SUM_TABLE_TAIL_MARKER: [u8; 4] = [0x20; 4];

/// Marks the start of the additive-sum directory.
pub const SUM_TABLE_HEAD_MARKER: [u8; 4] = [0x10; 4];

/// The tail marker occupies `len - 6 .. len - 2`
pub const SUM_TABLE_TAIL_FROM_END: usize = 6;

/// The backward scan for the head marker starts at `len - 16`
pub const SUM_TABLE_SCAN_FROM_END: usize = 16;

/// Head marker plus the little-endian entry count
pub const SUM_TABLE_HEADER_LEN: usize = 6;

/// The directory checksum covers the header, all entries and four more
/// bytes, i.e. `count * 10 + 10` bytes.
pub const SUM_TABLE_CHECKSUM_PAD: usize = 4;

/// One entry of the additive-sum directory (10 bytes, little-endian).
#[derive(PackedStruct, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[packed_struct(size_bytes = "10", endian = "lsb", bit_numbering = "msb0")]
pub struct SumTableEntry {
    /// Absolute address of the first summed byte
    pub address: u32,
    /// Number of summed bytes
    pub length: u32,
    /// 16-bit wrapping sum of the range
    pub checksum: u16,
}

pub const SUM_TABLE_ENTRY_LEN: usize = 10;

/// Offset of the checksum field within a [`SumTableEntry`]
pub const SUM_TABLE_ENTRY_CHECKSUM: Range<usize> = 8..10;

/// CRC16 stored low byte first, covering `EMBEDDED_CRC_COVERAGE_START..`
/// of the first block.
pub const EMBEDDED_CRC_OFFSET: Range<usize> = 0xa4..0xa6;
pub const EMBEDDED_CRC_COVERAGE_START: usize = 0x100;

/// Big-endian register value of the ranged CRC
pub const RANGED_CRC_OFFSET: Range<usize> = 0x0c..0x0e;

/// Big-endian number of [`RangeEntry`] records
pub const RANGE_COUNT_OFFSET: Range<usize> = 0x0e..0x10;

pub const RANGE_TABLE_START: usize = 0x10;

/// One address range of the ranged CRC table (8 bytes, big-endian).
#[derive(PackedStruct, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[packed_struct(size_bytes = "8", endian = "msb", bit_numbering = "msb0")]
pub struct RangeEntry {
    pub start: u32,
    /// Inclusive
    pub end: u32,
}

pub const RANGE_ENTRY_LEN: usize = 8;
