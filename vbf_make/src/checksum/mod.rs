// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Repair of checksums that vendors embed inside the flashed payload.
//!
//! These are unrelated to the CRC trailer of each VBF block. Every part
//! family lays its checksum metadata out differently, so each has its own
//! module; [`Algorithm`] picks one from a software part number.

use crate::{block::Block, Error};
use byteorder::ByteOrder;
use env_logger::{fmt::Color, Env};
use log::{debug as okay, info, warn};
use serde::Deserialize;
use std::io::Write as _;
use std::ops::Range;

pub mod embedded_crc;
pub mod ranged_crc;
pub mod sum_table;

/// Part families with a known checksum layout, keyed by the first two
/// `-`-separated fields of the software part number.
pub const FAMILIES: &[(&str, Algorithm)] = &[
    ("G1F7-14C366", Algorithm::SumTable),
    ("HP57-14C366", Algorithm::SumTable),
    ("G1F7-14C367", Algorithm::EmbeddedCrc16),
    ("F1FT-14C104", Algorithm::RangedCrc),
];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Algorithm {
    /// Additive sums listed in a directory found by marker scan in the
    /// highest block
    SumTable,
    /// CRC-16/CCITT-FALSE at a fixed offset of the first block
    EmbeddedCrc16,
    /// Table-driven CRC over address ranges listed in the first block
    RangedCrc,
    /// No layout is known for the family; nothing gets patched
    Unknown,
}

/// Truncates a software part number to its family, e.g.
/// `G1F7-14C366-AB` becomes `G1F7-14C366`.
pub fn family_key(sw_part_number: &str) -> &str {
    match sw_part_number.match_indices('-').nth(1) {
        Some((i, _)) => &sw_part_number[..i],
        None => sw_part_number,
    }
}

impl Algorithm {
    /// Exact, case-sensitive lookup of the family of `sw_part_number`
    pub fn for_part_number(sw_part_number: &str) -> Algorithm {
        let key = family_key(sw_part_number);
        FAMILIES
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, a)| *a)
            .unwrap_or(Algorithm::Unknown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::SumTable => "additive sum table",
            Algorithm::EmbeddedCrc16 => "embedded CRC-16/CCITT-FALSE",
            Algorithm::RangedCrc => "ranged table CRC",
            Algorithm::Unknown => "unknown",
        }
    }

    /// Runs the repair pass with exclusive access to the blocks.
    pub fn run(self, blocks: &mut [Block]) -> Result<RepairReport, Error> {
        match self {
            Algorithm::SumTable => sum_table::fix(blocks),
            Algorithm::EmbeddedCrc16 => embedded_crc::fix(blocks),
            Algorithm::RangedCrc => ranged_crc::fix(blocks),
            Algorithm::Unknown => {
                let known = FAMILIES
                    .iter()
                    .map(|(k, _)| *k)
                    .collect::<Vec<_>>()
                    .join(" ");
                warn!("Can't find suitable checksum algorithm. Available --sw options: {known}");
                Ok(RepairReport::new(Algorithm::Unknown))
            }
        }
    }
}

/// Selects the algorithm for `sw_part_number` and repairs `blocks` in place.
///
/// An unknown family is not an error: it leaves every byte alone.
pub fn fix_checksums(sw_part_number: &str, blocks: &mut [Block]) -> Result<RepairReport, Error> {
    let algorithm = Algorithm::for_part_number(sw_part_number);
    info!(
        "Calculating checksum for {} ({})",
        family_key(sw_part_number),
        algorithm.name()
    );
    algorithm.run(blocks)
}

/// What to do with the container when a repair pass fails structurally
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum RepairPolicy {
    /// Log the failure and write the container anyway
    #[default]
    Write,
    /// Fail without writing anything
    Abort,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Correct,
    Fixed,
}

/// The value a check covered
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// One entry of an additive sum directory
    Entry { address: u32, length: u32 },
    /// The additive sum directory's own checksum
    Directory,
    /// A single checksum for the whole image
    Image,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Check {
    pub target: Target,
    pub stored: u16,
    pub computed: u16,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepairReport {
    pub algorithm: Algorithm,
    pub checks: Vec<Check>,
    /// Directory entries whose address no block holds
    pub missing: Vec<u32>,
}

impl RepairReport {
    pub fn new(algorithm: Algorithm) -> RepairReport {
        RepairReport {
            algorithm,
            checks: vec![],
            missing: vec![],
        }
    }

    pub fn fixed(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.outcome == Outcome::Fixed)
            .count()
    }
}

/// Compares `computed` against the 16-bit value stored at `at` in byte order
/// `B`, overwriting it on mismatch.
pub(crate) fn settle<B: ByteOrder>(
    data: &mut [u8],
    at: Range<usize>,
    computed: u16,
    target: Target,
) -> Check {
    let stored = B::read_u16(&data[at.clone()]);
    let outcome = if stored == computed {
        okay!("{target:x?}: checksum {computed:#06x}. Correct!");
        Outcome::Correct
    } else {
        B::write_u16(&mut data[at], computed);
        info!("{target:x?}: checksum {computed:#06x} (was {stored:#06x}). Fixed!");
        Outcome::Fixed
    };
    Check {
        target,
        stored,
        computed,
        outcome,
    }
}

/// Lowest level shown when `RUST_LOG` is unset. Correct checksums are logged
/// at `debug`, table entries at `trace`.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "trace"
    } else {
        "debug"
    }
}

/// Tag printed in front of each repair message
fn tag(level: log::Level) -> (&'static str, Color) {
    match level {
        log::Level::Error => ("ERROR", Color::Red),
        log::Level::Warn => ("WARN", Color::Yellow),
        log::Level::Info => ("", Color::Cyan),
        log::Level::Debug => ("OK", Color::Green),
        log::Level::Trace => ("..", Color::Blue),
    }
}

fn repair_logger(verbose: bool, env: Env<'_>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_env(env.default_filter_or(default_filter(verbose)));
    builder.format(|buf, record| {
        let (tag, color) = tag(record.level());
        let mut style = buf.style();
        style.set_color(color).set_bold(true);
        let text = record.args().to_string().replace('\n', "\n        ");
        writeln!(buf, "{:>5}   {text}", style.value(tag))
    });
    builder
}

/// Installs the logger for a `make` run. `RUST_LOG`, when set, replaces the
/// default level.
pub fn init_repair_logger(verbose: bool) {
    repair_logger(verbose, Env::default()).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Container;
    use crate::header::{FrameFormat, Network, SwPartType, VbfHeader};
    use byteorder::{BigEndian, LittleEndian};
    use log::LevelFilter;

    #[test]
    fn rust_log_replaces_default_level() {
        std::env::set_var("VBF_MAKE_TEST_LOG", "warn");
        let env = || Env::new().filter("VBF_MAKE_TEST_LOG");
        assert_eq!(repair_logger(false, env()).build().filter(), LevelFilter::Warn);
        assert_eq!(repair_logger(true, env()).build().filter(), LevelFilter::Warn);

        let unset = || Env::new().filter("VBF_MAKE_UNSET_LOG");
        assert_eq!(repair_logger(false, unset()).build().filter(), LevelFilter::Debug);
        assert_eq!(repair_logger(true, unset()).build().filter(), LevelFilter::Trace);
    }

    #[test]
    fn correct_checksums_are_tagged_ok() {
        assert_eq!(tag(log::Level::Debug).0, "OK");
        assert_eq!(tag(log::Level::Info).0, "");
        assert_eq!(tag(log::Level::Warn).0, "WARN");
    }

    #[test]
    fn family_key_keeps_two_fields() {
        assert_eq!(family_key("G1F7-14C366-AB"), "G1F7-14C366");
        assert_eq!(family_key("G1F7-14C366-AB-CD"), "G1F7-14C366");
        assert_eq!(family_key("G1F7-14C366"), "G1F7-14C366");
        assert_eq!(family_key("G1F7"), "G1F7");
        assert_eq!(family_key(""), "");
    }

    #[test]
    fn lookup_is_exact_and_case_sensitive() {
        assert_eq!(Algorithm::for_part_number("HP57-14C366-XY"), Algorithm::SumTable);
        assert_eq!(Algorithm::for_part_number("G1F7-14C367-AA"), Algorithm::EmbeddedCrc16);
        assert_eq!(Algorithm::for_part_number("F1FT-14C104"), Algorithm::RangedCrc);
        assert_eq!(Algorithm::for_part_number("g1f7-14c367-aa"), Algorithm::Unknown);
        assert_eq!(Algorithm::for_part_number("G1F7"), Algorithm::Unknown);
        assert_eq!(Algorithm::for_part_number(""), Algorithm::Unknown);
    }

    #[test]
    fn unknown_family_changes_nothing() {
        let mut blocks = vec![
            Block::new(0, vec![0xaa; 0x200]).unwrap(),
            Block::new(0x8000, vec![0x20; 0x40]).unwrap(),
        ];
        let before = blocks.clone();
        let report = fix_checksums("XXXX-12345-AB", &mut blocks).unwrap();
        assert_eq!(report.algorithm, Algorithm::Unknown);
        assert!(report.checks.is_empty());
        assert_eq!(blocks, before);
    }

    #[test]
    fn settle_honours_byte_order() {
        let mut data = [0u8; 4];
        let check = settle::<LittleEndian>(&mut data, 0..2, 0x1234, Target::Image);
        assert_eq!(check.outcome, Outcome::Fixed);
        assert_eq!(check.stored, 0);
        assert_eq!(data, [0x34, 0x12, 0, 0]);

        let check = settle::<BigEndian>(&mut data, 2..4, 0x1234, Target::Image);
        assert_eq!(data, [0x34, 0x12, 0x12, 0x34]);
        assert_eq!(check.outcome, Outcome::Fixed);

        let check = settle::<BigEndian>(&mut data, 2..4, 0x1234, Target::Image);
        assert_eq!(check.outcome, Outcome::Correct);
        assert_eq!(data, [0x34, 0x12, 0x12, 0x34]);
    }

    fn container(sw: &str) -> Container {
        Container::new(VbfHeader {
            sw_part_number: sw.to_string(),
            sw_part_type: SwPartType::Exe,
            network: Network::CanHs,
            ecu_address: 0x760,
            frame_format: FrameFormat::CanStandard,
            call: None,
            erase: vec![],
        })
    }

    #[test]
    fn policy_decides_whether_failures_propagate() {
        // No tail marker, so the sum table can't be found
        let mut c = container("G1F7-14C366-AA");
        c.add_block(0x1000, vec![0; 0x40]).unwrap();

        assert!(matches!(
            c.repair("G1F7-14C366-AA", RepairPolicy::Abort),
            Err(Error::SectionNotFound(_))
        ));
        assert_eq!(c.repair("G1F7-14C366-AA", RepairPolicy::Write).unwrap(), None);
        assert!(c.to_vec().is_ok());
    }

    #[test]
    fn container_repair_reports_fixes() {
        let mut c = container("G1F7-14C367-AA");
        c.add_block(0, vec![0; 0x200]).unwrap();
        let report = c
            .repair("G1F7-14C367-AA", RepairPolicy::Abort)
            .unwrap()
            .unwrap();
        assert_eq!(report.algorithm, Algorithm::EmbeddedCrc16);
        assert_eq!(report.fixed(), 1);
    }
}
