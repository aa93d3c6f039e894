//! Processor architectures that Peasauce knows about.
//!
//! Instruction decoding for each processor is provided by an external
//! implementation of the `Architecture` trait. This module only owns the
//! names and numeric identities of the processors, plus the contract those
//! implementations must honour.

mod traits;


pub use traits::{Architecture, MatchAddress, MatchFlags, SymbolKind};

use crate::memory::Endianness;
use serde::Serialize;
use std::{fmt, str};

/// Enumeration of all processors a loaded program may target.
#[derive(Copy, Clone, Serialize, Debug, PartialEq, Eq, Hash)]
pub enum ArchName {
    /// Any member of the Motorola 680x0 family.
    M680x0,
    M68000,
    M68010,
    M68020,
    M68030,
    M68040,
    M68060,
    Mips,
    P65c816,
    Z80,
}

impl ArchName {
    /// Iterate all valid processor names.
    pub fn iter() -> impl IntoIterator<Item = ArchName> {
        use ArchName::*;

        vec![
            M680x0, M68000, M68010, M68020, M68030, M68040, M68060, Mips, P65c816, Z80,
        ]
    }

    /// The stable numeric identity of this processor.
    pub fn id(self) -> u32 {
        match self {
            ArchName::M680x0 => 100,
            ArchName::M68000 => 101,
            ArchName::M68010 => 102,
            ArchName::M68020 => 103,
            ArchName::M68030 => 104,
            ArchName::M68040 => 105,
            ArchName::M68060 => 106,
            ArchName::Mips => 200,
            ArchName::P65c816 => 300,
            ArchName::Z80 => 400,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::iter().into_iter().find(|a| a.id() == id)
    }

    /// Yield a name for this processor.
    pub fn friendly_name(self) -> &'static str {
        match self {
            ArchName::M680x0 => "M680x0",
            ArchName::M68000 => "M68000",
            ArchName::M68010 => "M68010",
            ArchName::M68020 => "M68020",
            ArchName::M68030 => "M68030",
            ArchName::M68040 => "M68040",
            ArchName::M68060 => "M68060",
            ArchName::Mips => "MIPS",
            ArchName::P65c816 => "65c816",
            ArchName::Z80 => "Z80",
        }
    }

    /// The family member that shares this processor's instruction decoder.
    pub fn family(self) -> ArchName {
        match self {
            ArchName::M680x0
            | ArchName::M68000
            | ArchName::M68010
            | ArchName::M68020
            | ArchName::M68030
            | ArchName::M68040
            | ArchName::M68060 => ArchName::M680x0,
            other => other,
        }
    }

    /// The byte order this processor uses for memory words.
    pub fn endianness(self) -> Endianness {
        match self.family() {
            ArchName::M680x0 | ArchName::Mips => Endianness::BigEndian,
            _ => Endianness::LittleEndian,
        }
    }
}

impl fmt::Display for ArchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.friendly_name())
    }
}

impl str::FromStr for ArchName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "m680x0" => Ok(ArchName::M680x0),
            "m68k" => Ok(ArchName::M680x0),
            "m68000" => Ok(ArchName::M68000),
            "68000" => Ok(ArchName::M68000),
            "m68010" => Ok(ArchName::M68010),
            "m68020" => Ok(ArchName::M68020),
            "m68030" => Ok(ArchName::M68030),
            "m68040" => Ok(ArchName::M68040),
            "m68060" => Ok(ArchName::M68060),
            "mips" => Ok(ArchName::Mips),
            "65c816" => Ok(ArchName::P65c816),
            "w65c816" => Ok(ArchName::P65c816),
            "p65c816" => Ok(ArchName::P65c816),
            "z80" => Ok(ArchName::Z80),
            _ => Err(()),
        }
    }
}

derive_deserialize_from_str!(ArchName, "valid processor name");
