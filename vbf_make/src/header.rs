// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::warn;
use serde::Deserialize;
use std::fmt;

/// Written literally; the container checksum is never computed here.
pub const FILE_CHECKSUM_PLACEHOLDER: &str = "0xdeadbeef";

pub const VBF_VERSION: &str = "2.3";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum), value(rename_all = "UPPER"))]
#[serde(rename_all = "UPPERCASE")]
pub enum SwPartType {
    /// Secondary bootloader, executed from RAM by the ECU
    Sbl,
    #[default]
    Exe,
    Sig,
    Data,
    Carcfg,
    Custom,
    Test,
}

impl SwPartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwPartType::Sbl => "SBL",
            SwPartType::Exe => "EXE",
            SwPartType::Sig => "SIG",
            SwPartType::Data => "DATA",
            SwPartType::Carcfg => "CARCFG",
            SwPartType::Custom => "CUSTOM",
            SwPartType::Test => "TEST",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(
    feature = "clap",
    derive(clap::ValueEnum),
    value(rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Network {
    #[default]
    CanHs,
    CanMs,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::CanHs => "CAN_HS",
            Network::CanMs => "CAN_MS",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(
    feature = "clap",
    derive(clap::ValueEnum),
    value(rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameFormat {
    #[default]
    CanStandard,
    CanExtended,
}

impl FrameFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameFormat::CanStandard => "CAN_STANDARD",
            FrameFormat::CanExtended => "CAN_EXTENDED",
        }
    }
}

/// A region the ECU erases before the blocks are programmed
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EraseRange {
    pub address: u32,
    pub length: u32,
}

/// Everything that goes into the textual `header { ... }` section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VbfHeader {
    pub sw_part_number: String,
    pub sw_part_type: SwPartType,
    pub network: Network,
    pub ecu_address: u32,
    pub frame_format: FrameFormat,
    pub call: Option<u32>,
    pub erase: Vec<EraseRange>,
}

/// Picks the address the ECU jumps to after download.
///
/// An SBL calls its own first block unless told otherwise.
pub fn resolve_call(
    part_type: SwPartType,
    explicit: Option<u32>,
    first_block: Option<u32>,
) -> Option<u32> {
    match (part_type, explicit) {
        (SwPartType::Sbl, Some(call)) => Some(call),
        (SwPartType::Sbl, None) => first_block,
        (_, Some(call)) => {
            warn!(
                "call address {call:#010x} given for a {} container; \
                 only SBLs are normally called",
                part_type.as_str()
            );
            Some(call)
        }
        (_, None) => None,
    }
}

impl VbfHeader {
    /// Text substituted between `frame_format` and `file_checksum`. Only the
    /// first line is indented; a `call` line keeps its newline even when it
    /// is the whole body.
    fn body(&self) -> String {
        let mut body = String::new();
        if let Some(call) = self.call {
            body += &format!("call = {call:#010x};\n");
        }
        if !self.erase.is_empty() {
            let ranges = self
                .erase
                .iter()
                .map(|r| format!("{{ {:#010x}, {:#010x} }}", r.address, r.length))
                .collect::<Vec<_>>()
                .join(",");
            body += &format!("erase = {{ {ranges} }};");
        }
        body
    }

    /// The ASCII text that precedes the first block
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VbfHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "vbf_version = {VBF_VERSION};")?;
        writeln!(f)?;
        writeln!(f, "header {{")?;
        writeln!(f, "    sw_part_number = \"{}\";", self.sw_part_number)?;
        writeln!(f, "    sw_part_type = {};", self.sw_part_type.as_str())?;
        writeln!(f, "    data_format_identifier = 0x00;")?;
        writeln!(f, "    network = {};", self.network.as_str())?;
        writeln!(f, "    ecu_address = {:#x};", self.ecu_address)?;
        writeln!(f, "    frame_format = {};", self.frame_format.as_str())?;
        writeln!(f)?;
        writeln!(f, "    {}", self.body())?;
        writeln!(f)?;
        writeln!(f, "    file_checksum = {FILE_CHECKSUM_PLACEHOLDER};")?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> VbfHeader {
        VbfHeader {
            sw_part_number: "G1F7-14C366-AB".to_string(),
            sw_part_type: SwPartType::Exe,
            network: Network::CanHs,
            ecu_address: 0x760,
            frame_format: FrameFormat::CanStandard,
            call: None,
            erase: vec![],
        }
    }

    #[test]
    fn renders_minimal_header() {
        let expected = "vbf_version = 2.3;\n\
                        \n\
                        header {\n    \
                        sw_part_number = \"G1F7-14C366-AB\";\n    \
                        sw_part_type = EXE;\n    \
                        data_format_identifier = 0x00;\n    \
                        network = CAN_HS;\n    \
                        ecu_address = 0x760;\n    \
                        frame_format = CAN_STANDARD;\n\
                        \n    \
                        \n\
                        \n    \
                        file_checksum = 0xdeadbeef;\n\
                        }";
        assert_eq!(header().render(), expected);
        assert!(header().render().is_ascii());
    }

    #[test]
    fn renders_call_and_erase() {
        let mut h = header();
        h.sw_part_type = SwPartType::Sbl;
        h.call = Some(0x4000_0000);
        h.erase = vec![
            EraseRange {
                address: 0x8000,
                length: 0x100,
            },
            EraseRange {
                address: 0x1_0000,
                length: 0x2_0000,
            },
        ];
        let text = h.render();
        assert!(text.contains("    sw_part_type = SBL;\n"));
        assert!(text.ends_with(
            "    frame_format = CAN_STANDARD;\n\
             \n    \
             call = 0x40000000;\n\
             erase = { { 0x00008000, 0x00000100 },{ 0x00010000, 0x00020000 } };\n\
             \n    \
             file_checksum = 0xdeadbeef;\n\
             }"
        ));
    }

    #[test]
    fn call_only_body_keeps_its_newline() {
        let mut h = header();
        h.call = Some(0x8000);
        assert!(h.render().ends_with(
            "    frame_format = CAN_STANDARD;\n\
             \n    \
             call = 0x00008000;\n\
             \n\
             \n    \
             file_checksum = 0xdeadbeef;\n\
             }"
        ));
    }

    #[test]
    fn sbl_calls_first_block_by_default() {
        assert_eq!(resolve_call(SwPartType::Sbl, None, Some(0x1000)), Some(0x1000));
        assert_eq!(
            resolve_call(SwPartType::Sbl, Some(0x2000), Some(0x1000)),
            Some(0x2000)
        );
        assert_eq!(resolve_call(SwPartType::Exe, None, Some(0x1000)), None);
        assert_eq!(
            resolve_call(SwPartType::Exe, Some(0x2000), Some(0x1000)),
            Some(0x2000)
        );
    }
}
