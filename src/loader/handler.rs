//! The fixed table of container format handlers

use crate::arch::ArchName;
use crate::loader::{FileInfo, InternalData, LoadOptions, MatchResult, Result, Source};
use crate::memory::{DataType, Endianness};
use crate::platform::{amiga, atarist, binary, human68k, snes, zxspectrum, PlatformName};
use serde::Serialize;
use std::io::{Read, Seek};
use std::{fmt, str};

/// Enumeration of every container format loader that ships with Peasauce.
///
/// Handlers are consulted in the order `Handler::registered` lists them.
#[derive(Copy, Clone, Serialize, Debug, PartialEq, Eq, Hash)]
pub enum Handler {
    AmigaHunk,
    AtariSt,
    Human68k,
    Binary,
    SnesSmc,
    ZxSpectrumZ80,
}

impl Handler {
    /// All handlers, in registration order.
    pub fn registered() -> [Handler; 6] {
        [
            Handler::AmigaHunk,
            Handler::AtariSt,
            Handler::Human68k,
            Handler::Binary,
            Handler::SnesSmc,
            Handler::ZxSpectrumZ80,
        ]
    }

    /// Name used to record which handler loaded a file.
    pub fn system_name(self) -> &'static str {
        match self {
            Handler::AmigaHunk => "amigahunk",
            Handler::AtariSt => "atarist",
            Handler::Human68k => "human68k",
            Handler::Binary => "binary",
            Handler::SnesSmc => "snes",
            Handler::ZxSpectrumZ80 => "zxspectrum",
        }
    }

    pub fn friendly_name(self) -> &'static str {
        match self {
            Handler::AmigaHunk => "Amiga hunk executable",
            Handler::AtariSt => "Atari ST GEMDOS executable",
            Handler::Human68k => "Human68k X executable",
            Handler::Binary => "raw binary image",
            Handler::SnesSmc => "SNES SMC ROM image",
            Handler::ZxSpectrumZ80 => "ZX Spectrum Z80 snapshot",
        }
    }

    /// The processor files of this format target, if the format fixes one.
    pub fn processor(self) -> Option<ArchName> {
        match self {
            Handler::AmigaHunk | Handler::AtariSt | Handler::Human68k => Some(ArchName::M680x0),
            Handler::Binary => None,
            Handler::SnesSmc => Some(ArchName::P65c816),
            Handler::ZxSpectrumZ80 => Some(ArchName::Z80),
        }
    }

    pub fn platform(self) -> Option<PlatformName> {
        match self {
            Handler::AmigaHunk => Some(PlatformName::Amiga),
            Handler::AtariSt => Some(PlatformName::AtariSt),
            Handler::Human68k => Some(PlatformName::X68000),
            Handler::Binary => None,
            Handler::SnesSmc => Some(PlatformName::Snes),
            Handler::ZxSpectrumZ80 => Some(PlatformName::ZxSpectrum),
        }
    }

    /// Byte order of the format's own structures.
    pub fn endianness(self) -> Endianness {
        match self {
            Handler::AmigaHunk | Handler::AtariSt | Handler::Human68k | Handler::Binary => {
                Endianness::BigEndian
            }
            Handler::SnesSmc | Handler::ZxSpectrumZ80 => Endianness::LittleEndian,
        }
    }

    /// Ask this handler what it thinks the file is.
    ///
    /// Every candidate is returned, including ones with no confidence; the
    /// caller decides which to trust.
    pub fn identify<F>(self, file: &mut F, source: &Source<'_>) -> Result<Vec<MatchResult>>
    where
        F: Read + Seek,
    {
        match self {
            Handler::AmigaHunk => amiga::identify(file, source),
            Handler::AtariSt => atarist::identify(file, source),
            Handler::Human68k => human68k::identify(file, source),
            Handler::Binary => Ok(Vec::new()),
            Handler::SnesSmc => snes::identify(file, source),
            Handler::ZxSpectrumZ80 => zxspectrum::identify(file, source),
        }
    }

    /// Load the file, or reject it without side effects if it is not in this
    /// handler's format.
    pub fn load<F>(self, file: &mut F, source: &Source<'_>, options: &LoadOptions) -> Result<FileInfo>
    where
        F: Read + Seek,
    {
        match self {
            Handler::AmigaHunk => amiga::load(file, source, options),
            Handler::AtariSt => atarist::load(file, source, options),
            Handler::Human68k => human68k::load(file, source, options),
            Handler::Binary => binary::load(file, source, options),
            Handler::SnesSmc => snes::load(file, source, options),
            Handler::ZxSpectrumZ80 => zxspectrum::load(file, source, options),
        }
    }

    /// Whether listings of this format open each segment with a header.
    pub fn has_segment_headers(self) -> bool {
        self == Handler::AmigaHunk
    }

    /// Text of the header opening a segment, if the format has them.
    pub fn segment_header(
        self,
        internal: &InternalData,
        segment_id: usize,
        address: u32,
    ) -> Option<String> {
        match (self, internal) {
            (Handler::AmigaHunk, InternalData::AmigaHunk(data)) => {
                amiga::segment_header(data, segment_id, address)
            }
            _ => None,
        }
    }

    /// Assembler directive for a unit of numeric data.
    ///
    /// `with_file_data` is false for bytes that lie beyond the end of a
    /// segment's file data.
    pub fn data_directive(
        self,
        data_type: DataType,
        is_bss_segment: bool,
        with_file_data: bool,
    ) -> Option<String> {
        let suffix = match data_type {
            DataType::Data08 => "B",
            DataType::Data16 => "W",
            DataType::Data32 => "L",
            _ => return None,
        };

        let directive = match self {
            Handler::AmigaHunk if with_file_data => "DC",
            Handler::AmigaHunk if is_bss_segment => "DS",
            Handler::AmigaHunk => "DX",
            _ if is_bss_segment => "DS",
            _ => "DC",
        };

        Some(format!("{}.{}", directive, suffix))
    }
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.friendly_name())
    }
}

impl str::FromStr for Handler {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();

        Handler::registered()
            .iter()
            .copied()
            .find(|h| h.system_name() == s || format!("{:?}", h).to_ascii_lowercase() == s)
            .ok_or(())
    }
}

derive_deserialize_from_str!(Handler, "valid loader name");
