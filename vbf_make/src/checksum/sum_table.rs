// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Additive-sum directory located by marker scan.
//!
//! The highest block ends in `20 20 20 20 xx xx`. Somewhere before that sits
//! a directory:
//!
//! ```text
//! 10 10 10 10 | count: u16 | count * { address: u32, length: u32, sum: u16 } | 4 bytes | sum: u16
//! ```
//!
//! all little-endian. Each entry sums `length` bytes at `address`; the final
//! sum covers the directory itself.

use super::{settle, Algorithm, RepairReport, Target};
use crate::{
    block::{block_containing, last_block_by_address, Block},
    crc::additive_sum16,
    Error,
};
use byteorder::{ByteOrder, LittleEndian};
use log::{info, trace, warn};
use packed_struct::prelude::*;
use vbf_layout::{
    SumTableEntry, SUM_TABLE_CHECKSUM_PAD, SUM_TABLE_ENTRY_CHECKSUM, SUM_TABLE_ENTRY_LEN,
    SUM_TABLE_HEADER_LEN, SUM_TABLE_HEAD_MARKER, SUM_TABLE_SCAN_FROM_END, SUM_TABLE_TAIL_FROM_END,
    SUM_TABLE_TAIL_MARKER,
};

/// Offset of the head marker, scanning backwards from `len - 16`. Offset 0
/// is never considered.
fn find_directory(data: &[u8]) -> Result<usize, Error> {
    let len = data.len();
    if len < SUM_TABLE_SCAN_FROM_END {
        return Err(Error::SectionNotFound("last block is too short"));
    }
    let tail = len - SUM_TABLE_TAIL_FROM_END;
    if data[tail..tail + SUM_TABLE_TAIL_MARKER.len()] != SUM_TABLE_TAIL_MARKER {
        return Err(Error::SectionNotFound("no tail marker in the last block"));
    }

    let mut pos = len - SUM_TABLE_SCAN_FROM_END;
    while pos != 0 && data[pos..pos + SUM_TABLE_HEAD_MARKER.len()] != SUM_TABLE_HEAD_MARKER {
        pos -= 1;
    }
    if pos == 0 {
        return Err(Error::SectionNotFound("no head marker in the last block"));
    }
    Ok(pos)
}

/// Sum of `length` bytes at `address`, if a single block holds all of them.
fn sum_at(blocks: &[Block], address: u32, length: u32) -> Option<(u32, u16)> {
    let b = &blocks[block_containing(blocks, address)?];
    let start = b.offset_of(address);
    let end = start.checked_add(length as usize)?;
    let bytes = b.data().get(start..end)?;
    Some((b.address(), additive_sum16(bytes)))
}

pub fn fix(blocks: &mut [Block]) -> Result<RepairReport, Error> {
    let last = last_block_by_address(blocks).ok_or(Error::SectionNotFound("no blocks"))?;
    let last_address = blocks[last].address();

    let hpos = find_directory(blocks[last].data())?;
    let count = LittleEndian::read_u16(
        &blocks[last].data()[hpos + SUM_TABLE_HEAD_MARKER.len()..hpos + SUM_TABLE_HEADER_LEN],
    ) as usize;

    let entries_end = hpos + SUM_TABLE_HEADER_LEN + count * SUM_TABLE_ENTRY_LEN;
    if entries_end > blocks[last].data().len() {
        return Err(Error::TableTruncated {
            address: last_address,
            count,
        });
    }

    info!("Found {count} entries checksum section in segment {last_address:#010x} offset {hpos:#010x}");

    let mut report = RepairReport::new(Algorithm::SumTable);
    for i in 0..count {
        let pos = hpos + SUM_TABLE_HEADER_LEN + i * SUM_TABLE_ENTRY_LEN;
        let entry =
            SumTableEntry::unpack_from_slice(&blocks[last].data()[pos..pos + SUM_TABLE_ENTRY_LEN])?;
        trace!("entry {i} at {pos:#x}: {entry:x?}");

        let Some((owner, sum)) = sum_at(blocks, entry.address, entry.length) else {
            warn!("{:#010x}: Not found!", entry.address);
            report.missing.push(entry.address);
            continue;
        };
        info!(
            "{:#010x}: Found at {owner:#010x}+{:x}",
            entry.address,
            entry.address - owner
        );

        let at = pos + SUM_TABLE_ENTRY_CHECKSUM.start..pos + SUM_TABLE_ENTRY_CHECKSUM.end;
        report.checks.push(settle::<LittleEndian>(
            blocks[last].data_mut(),
            at,
            sum,
            Target::Entry {
                address: entry.address,
                length: entry.length,
            },
        ));
    }

    // Entry sums patched above stay even if the directory checksum is cut off
    let span = hpos..entries_end + SUM_TABLE_CHECKSUM_PAD;
    let stored_at = span.end..span.end + 2;
    let data = blocks[last].data_mut();
    if stored_at.end > data.len() {
        return Err(Error::TableTruncated {
            address: last_address,
            count,
        });
    }
    let sum = additive_sum16(&data[span]);
    info!("Header checksum");
    report
        .checks
        .push(settle::<LittleEndian>(data, stored_at, sum, Target::Directory));

    Ok(report)
}
