// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{
    block::{Block, Container},
    checksum::RepairPolicy,
    header::{resolve_call, EraseRange, FrameFormat, Network, SwPartType, VbfHeader},
    Error,
};
use serde::Deserialize;
use std::path::PathBuf;

/// Struct defining the TOML format for `--cfg`, which bundles up flags that
/// would otherwise need to appear on the command line.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct VbfConfig {
    /// Also selects the checksum algorithm when `fix-checksum` is set
    #[serde(default)]
    pub sw_part_number: String,

    #[serde(default)]
    pub sw_part_type: SwPartType,

    #[serde(default)]
    pub network: Network,

    pub ecu_address: u32,

    #[serde(default)]
    pub frame_format: FrameFormat,

    /// Defaults to the first block for an SBL
    #[serde(default)]
    pub call: Option<u32>,

    /// 1-based indices into `block`; each erases that block's extent
    #[serde(default)]
    pub erase_blocks: Vec<usize>,

    #[serde(default)]
    pub erase_memory: Vec<EraseRange>,

    #[serde(default)]
    pub fix_checksum: bool,

    #[serde(default)]
    pub on_repair_failure: RepairPolicy,

    #[serde(rename = "block")]
    pub blocks: Vec<BlockSource>,
}

/// A file whose contents get programmed at `address`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockSource {
    pub address: u32,
    pub path: PathBuf,
}

impl VbfConfig {
    /// Erase ranges in output order: whole blocks first, then raw ranges.
    fn erase_ranges(&self, blocks: &[Block]) -> Result<Vec<EraseRange>, Error> {
        let mut ranges = vec![];
        for &n in &self.erase_blocks {
            let b = n
                .checked_sub(1)
                .and_then(|i| blocks.get(i))
                .ok_or(Error::NoSuchBlock {
                    index: n,
                    count: blocks.len(),
                })?;
            ranges.push(EraseRange {
                address: b.address(),
                length: b.len(),
            });
        }
        ranges.extend_from_slice(&self.erase_memory);
        Ok(ranges)
    }

    /// Builds the header around `blocks`, which must be the loaded contents
    /// of `self.blocks` in order.
    pub fn container(&self, blocks: Vec<Block>) -> Result<Container, Error> {
        let header = VbfHeader {
            sw_part_number: self.sw_part_number.clone(),
            sw_part_type: self.sw_part_type,
            network: self.network,
            ecu_address: self.ecu_address,
            frame_format: self.frame_format,
            call: resolve_call(
                self.sw_part_type,
                self.call,
                blocks.first().map(Block::address),
            ),
            erase: self.erase_ranges(&blocks)?,
        };
        Ok(Container::with_blocks(header, blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VbfConfig {
        VbfConfig {
            sw_part_number: "G1F7-14C366-AB".to_string(),
            sw_part_type: SwPartType::Sbl,
            network: Network::CanHs,
            ecu_address: 0x760,
            frame_format: FrameFormat::CanStandard,
            call: None,
            erase_blocks: vec![2],
            erase_memory: vec![EraseRange {
                address: 0x10000,
                length: 0x800,
            }],
            fix_checksum: false,
            on_repair_failure: RepairPolicy::Write,
            blocks: vec![],
        }
    }

    fn blocks() -> Vec<Block> {
        vec![
            Block::new(0x4000_0000, vec![0; 0x10]).unwrap(),
            Block::new(0x8000, vec![0; 0x20]).unwrap(),
        ]
    }

    #[test]
    fn header_from_config() {
        let c = config().container(blocks()).unwrap();
        let h = c.header();
        assert_eq!(h.call, Some(0x4000_0000));
        assert_eq!(
            h.erase,
            vec![
                EraseRange {
                    address: 0x8000,
                    length: 0x20
                },
                EraseRange {
                    address: 0x10000,
                    length: 0x800
                },
            ]
        );
        assert_eq!(c.blocks(), &blocks()[..]);
    }

    #[test]
    fn erase_index_is_one_based() {
        let mut cfg = config();
        cfg.erase_blocks = vec![0];
        assert!(matches!(
            cfg.container(blocks()),
            Err(Error::NoSuchBlock { index: 0, count: 2 })
        ));
        cfg.erase_blocks = vec![3];
        assert!(matches!(
            cfg.container(blocks()),
            Err(Error::NoSuchBlock { index: 3, .. })
        ));
    }
}
