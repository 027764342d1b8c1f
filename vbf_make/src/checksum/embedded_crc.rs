// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CRC-16/CCITT-FALSE over everything past 0x100 in the first block, stored
//! low byte first at 0xa4. A block that ends before 0x100 covers nothing and
//! stores the initial register.

use super::{settle, Algorithm, RepairReport, Target};
use crate::{block::Block, crc::crc16_ccitt_false, Error};
use byteorder::LittleEndian;
use log::info;
use vbf_layout::{EMBEDDED_CRC_COVERAGE_START, EMBEDDED_CRC_OFFSET};

pub fn fix(blocks: &mut [Block]) -> Result<RepairReport, Error> {
    let first = blocks
        .first_mut()
        .ok_or(Error::SectionNotFound("no blocks"))?;
    if first.data().len() < EMBEDDED_CRC_OFFSET.end {
        return Err(Error::BlockTooShort {
            address: first.address(),
            len: first.data().len(),
            needed: EMBEDDED_CRC_OFFSET.end,
        });
    }

    let covered = first
        .data()
        .get(EMBEDDED_CRC_COVERAGE_START..)
        .unwrap_or(&[]);
    let crc = crc16_ccitt_false(covered);
    info!(
        "CRC over {:#010x}.. stored at +{:#x}",
        first.address() as usize + EMBEDDED_CRC_COVERAGE_START,
        EMBEDDED_CRC_OFFSET.start
    );

    let mut report = RepairReport::new(Algorithm::EmbeddedCrc16);
    report.checks.push(settle::<LittleEndian>(
        first.data_mut(),
        EMBEDDED_CRC_OFFSET,
        crc,
        Target::Image,
    ));
    Ok(report)
}
