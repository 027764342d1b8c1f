// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{
    checksum::{self, RepairPolicy, RepairReport},
    crc::crc16_ccitt_false,
    header::VbfHeader,
    Error,
};
use byteorder::{BigEndian, WriteBytesExt};
use log::{info, warn};
use std::io::Write;

/// Address, length and CRC trailer surrounding every block payload
pub const BLOCK_FRAMING_LEN: usize = 4 + 4 + 2;

/// A payload destined for a fixed address on the ECU.
///
/// The payload can be patched in place but never resized, so `len()` always
/// describes `data()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    address: u32,
    data: Vec<u8>,
}

impl Block {
    pub fn new(address: u32, data: Vec<u8>) -> Result<Block, Error> {
        if u32::try_from(data.len()).is_err() {
            return Err(Error::BlockTooLarge {
                address,
                len: data.len(),
            });
        }
        Ok(Block { address, data })
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn len(&self) -> u32 {
        // Checked in `new`
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// One past the last address; may be `1 << 32`
    fn end(&self) -> u64 {
        u64::from(self.address) + self.data.len() as u64
    }

    pub fn contains(&self, address: u32) -> bool {
        self.address <= address && u64::from(address) < self.end()
    }

    /// True if every address of `start..=end` lies in this block
    pub fn contains_range(&self, start: u32, end: u32) -> bool {
        start <= end && self.address <= start && u64::from(end) < self.end()
    }

    /// Offset of `address` within the payload. Only meaningful when
    /// `contains(address)` holds.
    pub fn offset_of(&self, address: u32) -> usize {
        (address - self.address) as usize
    }

    /// Trailer CRC over the current payload
    pub fn crc(&self) -> u16 {
        crc16_ccitt_false(&self.data)
    }
}

/// Index of the block holding `address`. When blocks overlap the last one in
/// list order wins.
pub fn block_containing(blocks: &[Block], address: u32) -> Option<usize> {
    blocks.iter().rposition(|b| b.contains(address))
}

/// Index of the block holding all of `start..=end`, last match winning.
pub fn block_containing_range(blocks: &[Block], start: u32, end: u32) -> Option<usize> {
    blocks.iter().rposition(|b| b.contains_range(start, end))
}

/// Index of the block with the highest base address. Ties keep the block
/// seen first.
pub fn last_block_by_address(blocks: &[Block]) -> Option<usize> {
    let mut last: Option<usize> = None;
    for (i, b) in blocks.iter().enumerate() {
        match last {
            Some(j) if b.address <= blocks[j].address => (),
            _ => last = Some(i),
        }
    }
    last
}

/// A VBF file in memory: header text followed by blocks in insertion order.
#[derive(Clone, Debug)]
pub struct Container {
    header: VbfHeader,
    blocks: Vec<Block>,
}

impl Container {
    pub fn new(header: VbfHeader) -> Container {
        Container {
            header,
            blocks: vec![],
        }
    }

    pub fn with_blocks(header: VbfHeader, blocks: Vec<Block>) -> Container {
        Container { header, blocks }
    }

    pub fn header(&self) -> &VbfHeader {
        &self.header
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }

    pub fn add_block(&mut self, address: u32, data: Vec<u8>) -> Result<&Block, Error> {
        let block = Block::new(address, data)?;
        self.blocks.push(block);
        Ok(&self.blocks[self.blocks.len() - 1])
    }

    pub fn block_containing(&self, address: u32) -> Option<&Block> {
        block_containing(&self.blocks, address).map(|i| &self.blocks[i])
    }

    pub fn last_block_by_address(&self) -> Option<&Block> {
        last_block_by_address(&self.blocks).map(|i| &self.blocks[i])
    }

    /// Repairs the checksums embedded in the payloads for the part family
    /// named by `sw_part_number`.
    ///
    /// Returns `Ok(None)` when a structural failure was tolerated under
    /// [`RepairPolicy::Write`]; patches applied before the failure stay.
    pub fn repair(
        &mut self,
        sw_part_number: &str,
        policy: RepairPolicy,
    ) -> Result<Option<RepairReport>, Error> {
        match checksum::fix_checksums(sw_part_number, &mut self.blocks) {
            Ok(report) => Ok(Some(report)),
            Err(e) => match policy {
                RepairPolicy::Abort => Err(e),
                RepairPolicy::Write => {
                    warn!("{e}; the container will be written without further repairs");
                    Ok(None)
                }
            },
        }
    }

    pub fn serialized_len(&self) -> usize {
        self.header.render().len()
            + self
                .blocks
                .iter()
                .map(|b| BLOCK_FRAMING_LEN + b.data.len())
                .sum::<usize>()
    }

    /// Writes the header, then `address, length, payload, crc` per block,
    /// all big-endian.
    pub fn write_to<W: Write>(&self, mut out: W) -> Result<(), Error> {
        out.write_all(self.header.render().as_bytes())?;
        for b in &self.blocks {
            let crc = b.crc();
            info!(
                "{:#x} bytes block (CRC {crc:#06x}) at {:#010x}",
                b.len(),
                b.address
            );
            out.write_u32::<BigEndian>(b.address)?;
            out.write_u32::<BigEndian>(b.len())?;
            out.write_all(&b.data)?;
            out.write_u16::<BigEndian>(crc)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(self.serialized_len());
        self.write_to(&mut out)?;
        Ok(out)
    }
}
