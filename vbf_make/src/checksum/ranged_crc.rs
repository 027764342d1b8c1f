// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Table-driven CRC over a list of address ranges.
//!
//! The first block starts with
//!
//! ```text
//! 0x0c: crc: u16 | 0x0e: count: u16 | 0x10: count * { start: u32, end: u32 }
//! ```
//!
//! all big-endian, `end` inclusive. One register runs over every range in
//! table order; it is never reset between ranges.

use super::{settle, Algorithm, RepairReport, Target};
use crate::{
    block::{block_containing_range, Block},
    Error,
};
use byteorder::{BigEndian, ByteOrder};
use log::info;
use packed_struct::prelude::*;
use vbf_layout::{
    RangeEntry, RANGED_CRC_OFFSET, RANGE_COUNT_OFFSET, RANGE_ENTRY_LEN, RANGE_TABLE_START,
};

pub const RANGED_CRC_INIT: u16 = 0x701;

/// 256 big-endian 16-bit entries, indexed by `2 * ((register ^ byte) & 0xff)`
#[rustfmt::skip]
static RANGED_CRC_TABLE: [u8; 512] = [
    0x00, 0x00, 0xc0, 0xc1, 0xc1, 0x81, 0x01, 0x40, 0xc3, 0x01, 0x03, 0xc0, 0x02, 0x80, 0xc2, 0x41,
    0xc6, 0x01, 0x06, 0xc0, 0x07, 0x80, 0xc7, 0x41, 0x05, 0x00, 0xc5, 0xc1, 0xc4, 0x81, 0x04, 0x40,
    0xcc, 0x01, 0x0c, 0xc0, 0x0d, 0x80, 0xcd, 0x41, 0x0f, 0x00, 0xcf, 0xc1, 0xce, 0x81, 0x0e, 0x40,
    0x0a, 0x00, 0xca, 0xc1, 0xcb, 0x81, 0x0b, 0x40, 0xc9, 0x01, 0x09, 0xc0, 0x08, 0x80, 0xc8, 0x41,
    0xd8, 0x01, 0x18, 0xc0, 0x19, 0x80, 0xd9, 0x41, 0x1b, 0x00, 0xdb, 0xc1, 0xda, 0x81, 0x1a, 0x40,
    0x1e, 0x00, 0xde, 0xc1, 0xdf, 0x81, 0x1f, 0x40, 0xdd, 0x01, 0x1d, 0xc0, 0x1c, 0x80, 0xdc, 0x41,
    0x14, 0x00, 0xd4, 0xc1, 0xd5, 0x81, 0x15, 0x40, 0xd7, 0x01, 0x17, 0xc0, 0x16, 0x80, 0xd6, 0x41,
    0xd2, 0x01, 0x12, 0xc0, 0x13, 0x80, 0xd3, 0x41, 0x11, 0x00, 0xd1, 0xc1, 0xd0, 0x81, 0x10, 0x40,
    0xf0, 0x01, 0x30, 0xc0, 0x31, 0x80, 0xf1, 0x41, 0x33, 0x00, 0xf3, 0xc1, 0xf2, 0x81, 0x32, 0x40,
    0x36, 0x00, 0xf6, 0xc1, 0xf7, 0x81, 0x37, 0x40, 0xf5, 0x01, 0x35, 0xc0, 0x34, 0x80, 0xf4, 0x41,
    0x3c, 0x00, 0xfc, 0xc1, 0xfd, 0x81, 0x3d, 0x40, 0xff, 0x01, 0x3f, 0xc0, 0x3e, 0x80, 0xfe, 0x41,
    0xfa, 0x01, 0x3a, 0xc0, 0x3b, 0x80, 0xfb, 0x41, 0x39, 0x00, 0xf9, 0xc1, 0xf8, 0x81, 0x38, 0x40,
    0x28, 0x00, 0xe8, 0xc1, 0xe9, 0x81, 0x29, 0x40, 0xeb, 0x01, 0x2b, 0xc0, 0x2a, 0x80, 0xea, 0x41,
    0xee, 0x01, 0x2e, 0xc0, 0x2f, 0x80, 0xef, 0x41, 0x2d, 0x00, 0xed, 0xc1, 0xec, 0x81, 0x2c, 0x40,
    0xe4, 0x01, 0x24, 0xc0, 0x25, 0x80, 0xe5, 0x41, 0x27, 0x00, 0xe7, 0xc1, 0xe6, 0x81, 0x26, 0x40,
    0x22, 0x00, 0xe2, 0xc1, 0xe3, 0x81, 0x23, 0x40, 0xe1, 0x01, 0x21, 0xc0, 0x20, 0x80, 0xe0, 0x41,
    0xa0, 0x01, 0x60, 0xc0, 0x61, 0x80, 0xa1, 0x41, 0x63, 0x00, 0xa3, 0xc1, 0xa2, 0x81, 0x62, 0x40,
    0x66, 0x00, 0xa6, 0xc1, 0xa7, 0x81, 0x67, 0x40, 0xa5, 0x01, 0x65, 0xc0, 0x64, 0x80, 0xa4, 0x41,
    0x6c, 0x00, 0xac, 0xc1, 0xad, 0x81, 0x6d, 0x40, 0xaf, 0x01, 0x6f, 0xc0, 0x6e, 0x80, 0xae, 0x41,
    0xaa, 0x01, 0x6a, 0xc0, 0x6b, 0x80, 0xab, 0x41, 0x69, 0x00, 0xa9, 0xc1, 0xa8, 0x81, 0x68, 0x40,
    0x78, 0x00, 0xb8, 0xc1, 0xb9, 0x81, 0x79, 0x40, 0xbb, 0x01, 0x7b, 0xc0, 0x7a, 0x80, 0xba, 0x41,
    0xbe, 0x01, 0x7e, 0xc0, 0x7f, 0x80, 0xbf, 0x41, 0x7d, 0x00, 0xbd, 0xc1, 0xbc, 0x81, 0x7c, 0x40,
    0xb4, 0x01, 0x74, 0xc0, 0x75, 0x80, 0xb5, 0x41, 0x77, 0x00, 0xb7, 0xc1, 0xb6, 0x81, 0x76, 0x40,
    0x72, 0x00, 0xb2, 0xc1, 0xb3, 0x81, 0x73, 0x40, 0xb1, 0x01, 0x71, 0xc0, 0x70, 0x80, 0xb0, 0x41,
    0x50, 0x00, 0x90, 0xc1, 0x91, 0x81, 0x51, 0x40, 0x93, 0x01, 0x53, 0xc0, 0x52, 0x80, 0x92, 0x41,
    0x96, 0x01, 0x56, 0xc0, 0x57, 0x80, 0x97, 0x41, 0x55, 0x00, 0x95, 0xc1, 0x94, 0x81, 0x54, 0x40,
    0x9c, 0x01, 0x5c, 0xc0, 0x5d, 0x80, 0x9d, 0x41, 0x5f, 0x00, 0x9f, 0xc1, 0x9e, 0x81, 0x5e, 0x40,
    0x5a, 0x00, 0x9a, 0xc1, 0x9b, 0x81, 0x5b, 0x40, 0x99, 0x01, 0x59, 0xc0, 0x58, 0x80, 0x98, 0x41,
    0x88, 0x01, 0x48, 0xc0, 0x49, 0x80, 0x89, 0x41, 0x4b, 0x00, 0x8b, 0xc1, 0x8a, 0x81, 0x4a, 0x40,
    0x4e, 0x00, 0x8e, 0xc1, 0x8f, 0x81, 0x4f, 0x40, 0x8d, 0x01, 0x4d, 0xc0, 0x4c, 0x80, 0x8c, 0x41,
    0x44, 0x00, 0x84, 0xc1, 0x85, 0x81, 0x45, 0x40, 0x87, 0x01, 0x47, 0xc0, 0x46, 0x80, 0x86, 0x41,
    0x82, 0x01, 0x42, 0xc0, 0x43, 0x80, 0x83, 0x41, 0x41, 0x00, 0x81, 0xc1, 0x80, 0x81, 0x40, 0x40,
];

/// Feeds `bytes` through the register.
pub fn ranged_crc_update(mut register: u16, bytes: &[u8]) -> u16 {
    for &x in bytes {
        let idx = (((register ^ u16::from(x)) << 1) & 0x1ff) as usize;
        let t = u16::from_be_bytes([RANGED_CRC_TABLE[idx], RANGED_CRC_TABLE[idx + 1]]);
        register = (register >> 8) ^ t;
    }
    register
}

fn read_ranges(first: &Block) -> Result<Vec<RangeEntry>, Error> {
    let data = first.data();
    if data.len() < RANGE_TABLE_START {
        return Err(Error::BlockTooShort {
            address: first.address(),
            len: data.len(),
            needed: RANGE_TABLE_START,
        });
    }
    let count = BigEndian::read_u16(&data[RANGE_COUNT_OFFSET]) as usize;
    if count == 0 {
        return Err(Error::SectionNotFound("range table is empty"));
    }
    let table = data
        .get(RANGE_TABLE_START..RANGE_TABLE_START + count * RANGE_ENTRY_LEN)
        .ok_or(Error::TableTruncated {
            address: first.address(),
            count,
        })?;
    Ok(table
        .chunks_exact(RANGE_ENTRY_LEN)
        .map(RangeEntry::unpack_from_slice)
        .collect::<Result<Vec<_>, _>>()?)
}

/// Any range without a block holding all of it aborts the whole pass,
/// before anything is written.
pub fn fix(blocks: &mut [Block]) -> Result<RepairReport, Error> {
    let first = blocks.first().ok_or(Error::SectionNotFound("no blocks"))?;
    let ranges = read_ranges(first)?;

    let mut crc = RANGED_CRC_INIT;
    for r in &ranges {
        let b = block_containing_range(blocks, r.start, r.end)
            .map(|i| &blocks[i])
            .ok_or(Error::RangeNotFound {
                start: r.start,
                end: r.end,
            })?;
        info!(
            "Calculating checksum for {:#010x} - {:#010x} in block {:#010x}",
            r.start,
            r.end,
            b.address()
        );
        crc = ranged_crc_update(crc, &b.data()[b.offset_of(r.start)..=b.offset_of(r.end)]);
    }

    let mut report = RepairReport::new(Algorithm::RangedCrc);
    report.checks.push(settle::<BigEndian>(
        blocks[0].data_mut(),
        RANGED_CRC_OFFSET,
        crc,
        Target::Image,
    ));
    Ok(report)
}
