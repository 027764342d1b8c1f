// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use log::info;
use std::io::BufWriter;
use std::path::PathBuf;
use vbf_make::{
    block::Block,
    checksum::{self, RepairPolicy, FAMILIES},
    config::{BlockSource, VbfConfig},
    header::{EraseRange, FrameFormat, Network, SwPartType},
};

/// `addr:path`, with the address in hex (`0x` optional)
fn parse_block(s: &str) -> Result<BlockSource, String> {
    let (address, path) = s
        .split_once(':')
        .ok_or_else(|| format!("expected addr:path, got '{s}'"))?;
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    let address = u32::from_str_radix(digits, 16)
        .map_err(|e| format!("invalid block address '{address}': {e}"))?;
    if path.is_empty() {
        return Err(format!("missing path in '{s}'"));
    }
    Ok(BlockSource {
        address,
        path: PathBuf::from(path),
    })
}

/// `addr:size`
fn parse_erase_range(s: &str) -> Result<EraseRange, String> {
    let (address, length) = s
        .split_once(':')
        .ok_or_else(|| format!("expected addr:size, got '{s}'"))?;
    Ok(EraseRange {
        address: parse_int::parse::<u32>(address).map_err(|e| format!("'{address}': {e}"))?,
        length: parse_int::parse::<u32>(length).map_err(|e| format!("'{length}': {e}"))?,
    })
}

#[derive(Debug, Parser)]
struct MakeArgs {
    /// Output VBF file
    #[clap(short = 'o', long = "out")]
    out: PathBuf,

    /// ECU address (like 0x760)
    #[clap(long, required_unless_present = "cfg", value_parser = parse_int::parse::<u32>)]
    ecu: Option<u32>,

    #[clap(long, default_value = "CAN_HS")]
    can: Network,

    #[clap(long = "type", default_value = "EXE")]
    part_type: SwPartType,

    /// Software part number; also selects the checksum algorithm
    #[clap(long, default_value = "")]
    sw: String,

    /// Address to call, the SBL block itself by default
    #[clap(long, value_parser = parse_int::parse::<u32>)]
    call: Option<u32>,

    #[clap(long, default_value = "CAN_STANDARD")]
    frame_format: FrameFormat,

    /// Comma separated list of blocks (counting from 1) to erase before
    /// writing
    #[clap(long, value_delimiter = ',')]
    erase_blocks: Vec<usize>,

    /// Comma separated list of memory ranges to erase, as addr:size
    #[clap(long, value_delimiter = ',', value_parser = parse_erase_range)]
    erase_memory: Vec<EraseRange>,

    /// Try to repair known checksums inside the blocks, selected by --sw
    #[clap(long)]
    fix_checksum: bool,

    /// Whether to still write the file when a checksum section can't be
    /// found
    #[clap(long, default_value = "write")]
    on_repair_failure: RepairPolicy,

    /// Blocks described as addr:path
    #[clap(
        value_name = "ADDR:PATH",
        required_unless_present = "cfg",
        value_parser = parse_block
    )]
    blocks: Vec<BlockSource>,

    /// TOML file replacing every option above except --out
    #[clap(long, conflicts_with_all = [
        "ecu", "can", "part_type", "sw", "call", "frame_format", "erase_blocks",
        "erase_memory", "fix_checksum", "on_repair_failure", "blocks",
    ])]
    cfg: Option<PathBuf>,

    /// Log every table entry
    #[clap(short, long)]
    verbose: bool,
}

impl MakeArgs {
    fn try_into_config(self) -> Result<VbfConfig> {
        if let Some(path) = self.cfg {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("could not read {}", path.display()))?;
            let cfg: VbfConfig = toml::from_str(&contents)
                .with_context(|| format!("could not parse {}", path.display()))?;
            if cfg.blocks.is_empty() {
                bail!("{} lists no blocks", path.display());
            }
            Ok(cfg)
        } else {
            if self.blocks.is_empty() {
                bail!("must provide at least one addr:path block, or --cfg");
            }
            Ok(VbfConfig {
                sw_part_number: self.sw,
                sw_part_type: self.part_type,
                network: self.can,
                ecu_address: self
                    .ecu
                    .ok_or_else(|| anyhow!("must provide --ecu, or --cfg"))?,
                frame_format: self.frame_format,
                call: self.call,
                erase_blocks: self.erase_blocks,
                erase_memory: self.erase_memory,
                fix_checksum: self.fix_checksum,
                on_repair_failure: self.on_repair_failure,
                blocks: self.blocks,
            })
        }
    }
}

#[derive(Debug, Parser)]
enum Command {
    /// Create a VBF file containing one or more blocks
    Make {
        #[clap(flatten)]
        args: MakeArgs,
    },
    /// List the part families whose embedded checksums can be repaired
    Families,
}

#[derive(Debug, Parser)]
#[clap(name = "vbfmake")]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,
}

fn load_blocks(sources: &[BlockSource]) -> Result<Vec<Block>> {
    sources
        .iter()
        .map(|s| {
            let data = std::fs::read(&s.path)
                .with_context(|| format!("can't open {}", s.path.display()))?;
            info!(
                "Adding {:#x} bytes block from {} at {:#010x}",
                data.len(),
                s.path.display(),
                s.address
            );
            Ok(Block::new(s.address, data)?)
        })
        .collect()
}

fn family_lines() -> Vec<String> {
    FAMILIES
        .iter()
        .map(|(key, algorithm)| format!("{}  {}", key.bold(), algorithm.name()))
        .collect()
}

fn make(args: MakeArgs) -> Result<()> {
    let out = args.out.clone();
    let cfg = args.try_into_config()?;
    info!(
        "Generating {} VBF file for {:#x}",
        cfg.sw_part_type.as_str(),
        cfg.ecu_address
    );

    let blocks = load_blocks(&cfg.blocks)?;
    let mut container = cfg.container(blocks)?;

    if cfg.fix_checksum {
        if let Some(report) = container.repair(&cfg.sw_part_number, cfg.on_repair_failure)? {
            info!(
                "{} of {} checksums fixed",
                report.fixed(),
                report.checks.len()
            );
        }
    }

    info!("Writing {}", out.display());
    let file = std::fs::File::create(&out)
        .with_context(|| format!("could not create {}", out.display()))?;
    container.write_to(BufWriter::new(file))?;
    info!("Done");
    Ok(())
}

fn main() -> Result<()> {
    let cmd = Opts::parse();

    match cmd.cmd {
        Command::Make { args } => {
            // The repair pass has a custom logger
            checksum::init_repair_logger(args.verbose);
            make(args)?;
        }
        Command::Families => {
            for line in family_lines() {
                println!("{line}");
            }
        }
    }

    Ok(())
}
