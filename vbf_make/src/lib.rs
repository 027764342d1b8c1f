// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod block;
pub mod checksum;
pub mod config;
pub mod crc;
pub mod header;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("can't find checksum section: {0}")]
    SectionNotFound(&'static str),

    #[error("can't find matching block for checksum range {start:#010x} - {end:#010x}")]
    RangeNotFound { start: u32, end: u32 },

    #[error("block at {address:#010x} is {len:#x} bytes; need at least {needed:#x}")]
    BlockTooShort {
        address: u32,
        len: usize,
        needed: usize,
    },

    #[error("checksum table with {count} entries runs past the end of block {address:#010x}")]
    TableTruncated { address: u32, count: usize },

    #[error("block at {address:#010x} is too large: {len:#x} bytes does not fit a `u32`")]
    BlockTooLarge { address: u32, len: usize },

    #[error("no block {index} to erase; blocks are numbered 1 to {count}")]
    NoSuchBlock { index: usize, count: usize },

    #[error("struct packing error: {0}")]
    PackingError(#[from] packed_struct::PackingError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
