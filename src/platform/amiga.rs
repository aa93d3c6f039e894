//! Amiga hunk executables.
//!
//! A hunk file opens with a `HUNK_HEADER` listing the memory size and
//! allocation flags of every hunk, followed by the hunks themselves. Each
//! hunk is a `CODE`, `DATA` or `BSS` hunk followed by relocation, symbol and
//! debug sub-hunks up to `HUNK_END`.

use crate::loader::{
    Confidence, ContainerReader, Error, FileFormat, FileInfo, Handler, InternalData,
    LoadOptions, MatchResult, Relocation, Result, Source, Symbol,
};
use crate::memory::{Endianness, SegmentType};
use crate::platform::PlatformName;
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek};

pub const HUNK_UNIT: u32 = 0x3E7;
pub const HUNK_NAME: u32 = 0x3E8;
pub const HUNK_CODE: u32 = 0x3E9;
pub const HUNK_DATA: u32 = 0x3EA;
pub const HUNK_BSS: u32 = 0x3EB;
pub const HUNK_RELOC32: u32 = 0x3EC;
pub const HUNK_SYMBOL: u32 = 0x3F0;
pub const HUNK_DEBUG: u32 = 0x3F1;
pub const HUNK_END: u32 = 0x3F2;
pub const HUNK_HEADER: u32 = 0x3F3;
pub const HUNK_DREL32: u32 = 0x3F7;
pub const HUNK_RELOC32SHORT: u32 = 0x3FC;
pub const HUNK_ABSRELOC16: u32 = 0x3FD;

pub const MEMF_ADVISORY: u32 = 1 << 29;
pub const MEMF_CHIP: u32 = 1 << 30;
pub const MEMF_FAST: u32 = 1 << 31;
pub const MEMF_MASK: u32 = MEMF_ADVISORY | MEMF_CHIP | MEMF_FAST;

/// Name of a hunk's memory requirement, as written in a `SECTION` directive.
pub fn memory_flags_name(flags: u32) -> Option<&'static str> {
    match flags & MEMF_MASK {
        0 => Some("ANY"),
        MEMF_ADVISORY => Some("ADVISORY"),
        MEMF_CHIP => Some("CHIP"),
        MEMF_FAST => Some("FAST"),
        _ => None,
    }
}

/// The three kinds of hunk that occupy memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HunkKind {
    Code,
    Data,
    Bss,
}

impl HunkKind {
    fn from_id(id: u32) -> Option<Self> {
        match id {
            HUNK_CODE => Some(HunkKind::Code),
            HUNK_DATA => Some(HunkKind::Data),
            HUNK_BSS => Some(HunkKind::Bss),
            _ => None,
        }
    }

    pub fn segment_type(self) -> SegmentType {
        match self {
            HunkKind::Code => SegmentType::Code,
            HunkKind::Data => SegmentType::Data,
            HunkKind::Bss => SegmentType::Bss,
        }
    }
}

/// What a project needs to remember about one hunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkInfo {
    pub kind: HunkKind,

    /// Allocation flags from the header's size table.
    pub memory_flags: u32,

    pub name: Option<String>,
}

/// Facts about a hunk file retained after loading.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkData {
    pub resident_libraries: Vec<String>,
    pub first_slot: u32,
    pub last_slot: u32,
    pub hunks: Vec<HunkInfo>,
}

/// One hunk as parsed out of the file.
struct ParsedHunk {
    kind: HunkKind,
    file_offset: Option<u64>,
    data_length: u32,
    relocations: Vec<Relocation>,
    symbols: Vec<Symbol>,
    name: Option<String>,
}

/// Read a string stored as a longword count followed by that many longwords
/// of NUL padded text.
fn read_string<F: Read + Seek>(reader: &mut ContainerReader<'_, F>) -> Result<String> {
    let longs = reader.u32()?;
    if longs == 0 {
        return Ok(String::new());
    }

    let bytes = reader.bytes((longs as usize).saturating_mul(4))?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());

    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Read relocations with 16-bit counts and offsets, realigning to a longword
/// boundary afterwards.
fn read_short_relocations<F: Read + Seek>(
    reader: &mut ContainerReader<'_, F>,
    relocations: &mut Vec<Relocation>,
) -> Result<()> {
    let mut count = reader.u16()?;
    while count > 0 {
        let target = reader.u16()? as usize;
        let mut offsets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            offsets.push(reader.u16()? as u32);
        }

        relocations.push(Relocation::new(target, offsets));
        count = reader.u16()?;
    }

    if reader.position()? & 2 != 0 {
        reader.skip(2)?;
    }

    Ok(())
}

fn read_hunk<F: Read + Seek>(reader: &mut ContainerReader<'_, F>) -> Result<ParsedHunk> {
    let hunk_id = reader.u32()? & 0x3FFF_FFFF;
    let data_length = reader.u32()?.wrapping_mul(4);

    let kind = HunkKind::from_id(hunk_id)
        .ok_or_else(|| reader.corrupt(format!("unexpected hunk type {:#X}", hunk_id)))?;
    let file_offset = match kind {
        HunkKind::Code | HunkKind::Data => {
            let offset = reader.position()?;
            reader.skip(data_length as u64)?;
            Some(offset)
        }
        HunkKind::Bss => None,
    };

    let mut relocations = Vec::new();
    let mut symbols = Vec::new();
    let mut name = None;

    loop {
        match reader.u32()? {
            HUNK_END => break,
            HUNK_RELOC32 => {
                let mut count = reader.u32()?;
                while count > 0 {
                    let target = reader.u32()? as usize;
                    let mut offsets = Vec::new();
                    for _ in 0..count {
                        offsets.push(reader.u32()?);
                    }

                    relocations.push(Relocation::new(target, offsets));
                    count = reader.u32()?;
                }
            }
            HUNK_DREL32 | HUNK_RELOC32SHORT | HUNK_ABSRELOC16 => {
                read_short_relocations(reader, &mut relocations)?
            }
            HUNK_SYMBOL => loop {
                let symbol_name = read_string(reader)?;
                if symbol_name.is_empty() {
                    break;
                }

                let value = reader.u32()?;
                symbols.push(Symbol::new(value, symbol_name));
            },
            HUNK_DEBUG => {
                let longs = reader.u32()?;
                reader.skip(longs as u64 * 4)?;
            }
            HUNK_NAME => name = Some(read_string(reader)?),
            other => {
                return Err(reader.corrupt(format!("unexpected sub-hunk type {:#X}", other)));
            }
        }
    }

    Ok(ParsedHunk {
        kind,
        file_offset,
        data_length: if kind == HunkKind::Bss { 0 } else { data_length },
        relocations,
        symbols,
        name,
    })
}

/// Parse a whole hunk executable without touching any `FileInfo`.
fn read_hunk_file<F: Read + Seek>(
    file: &mut F,
    source: &Source<'_>,
) -> Result<(HunkData, Vec<(u32, ParsedHunk)>)> {
    let mut reader = ContainerReader::new(
        file,
        source.offset(),
        source.length(),
        Endianness::BigEndian,
        "Amiga hunk",
    )?;

    if reader.length() < 4 {
        return Err(reader.reject("file too short"));
    }

    match reader.u32()? {
        HUNK_HEADER => {}
        HUNK_UNIT => return Err(reader.reject("hunk libraries cannot be loaded")),
        _ => return Err(reader.reject("no HUNK_HEADER")),
    }

    let mut data = HunkData::default();

    loop {
        let library = read_string(&mut reader)?;
        if library.is_empty() {
            break;
        }

        data.resident_libraries.push(library);
    }

    let table_size = reader.u32()?;
    data.first_slot = reader.u32()?;
    data.last_slot = reader.u32()?;

    let mut sizes = Vec::new();
    for _ in 0..table_size {
        let slot = reader.u32()?;
        let flags = slot & 0xE000_0000;

        // Both CHIP and FAST set means an explicit attribute longword follows.
        if slot & (MEMF_CHIP | MEMF_FAST) == (MEMF_CHIP | MEMF_FAST) {
            let attributes = reader.u32()?;
            debug!("hunk memory attributes {:#X}", attributes);
        }

        sizes.push((flags, (slot & 0x3FFF_FFFF).wrapping_mul(4)));
    }

    let mut hunks = Vec::new();
    while !reader.at_end()? {
        hunks.push(read_hunk(&mut reader)?);
    }

    if hunks.len() != sizes.len() {
        return Err(reader.corrupt(format!(
            "header lists {} hunks but {} are present",
            sizes.len(),
            hunks.len()
        )));
    }

    data.hunks = hunks
        .iter()
        .zip(sizes.iter())
        .map(|(hunk, &(memory_flags, _))| HunkInfo {
            kind: hunk.kind,
            memory_flags,
            name: hunk.name.clone(),
        })
        .collect();

    let parsed = sizes
        .into_iter()
        .map(|(_, size)| size)
        .zip(hunks.into_iter())
        .collect();

    Ok((data, parsed))
}

/// Determine if the file starts with a `HUNK_UNIT`, marking an object
/// library.
fn is_hunk_library<F: Read + Seek>(file: &mut F, source: &Source<'_>) -> Result<bool> {
    let mut reader = ContainerReader::new(
        file,
        source.offset(),
        source.length(),
        Endianness::BigEndian,
        "Amiga hunk",
    )?;

    if reader.length() < 4 {
        return Ok(false);
    }

    Ok(reader.u32()? == HUNK_UNIT)
}

pub fn identify<F: Read + Seek>(file: &mut F, source: &Source<'_>) -> Result<Vec<MatchResult>> {
    let mut result = MatchResult::new(Handler::AmigaHunk);

    match read_hunk_file(file, source) {
        Ok(_) => {
            result.platform = Some(PlatformName::Amiga);
            result.file_format = Some(FileFormat::AmigaHunkExecutable);
            result.confidence = Confidence::Certain;
        }
        Err(Error::LoadRejected(_)) | Err(Error::CorruptContainer(_)) => {
            if !is_hunk_library(file, source)? {
                return Ok(Vec::new());
            }

            result.platform = Some(PlatformName::Amiga);
            result.file_format = Some(FileFormat::AmigaHunkLibrary);
            result.confidence = Confidence::Probable;
        }
        Err(e) => return Err(e),
    }

    Ok(vec![result])
}

pub fn load<F: Read + Seek>(
    file: &mut F,
    source: &Source<'_>,
    options: &LoadOptions,
) -> Result<FileInfo> {
    let (data, hunks) = read_hunk_file(file, source)?;
    let mut file_info = FileInfo::new(Handler::AmigaHunk, source, options);

    file_info.set_file_format(FileFormat::AmigaHunkExecutable);

    for (size, hunk) in hunks {
        file_info.add_segment(
            hunk.kind.segment_type(),
            hunk.file_offset,
            hunk.data_length,
            size,
            hunk.relocations,
            hunk.symbols,
        )?;
    }

    file_info.set_internal_data(InternalData::AmigaHunk(data));

    Ok(file_info)
}

/// The `SECTION` directive opening a hunk's listing.
pub fn segment_header(data: &HunkData, segment_id: usize, address: u32) -> Option<String> {
    let hunk = data.hunks.get(segment_id)?;
    let kind = match hunk.kind {
        HunkKind::Code => "CODE",
        HunkKind::Data => "DATA",
        HunkKind::Bss => "BSS",
    };

    let mut header = format!("SECTION name{:06X}, {}", address, kind);
    if hunk.memory_flags != 0 {
        if let Some(memory) = memory_flags_name(hunk.memory_flags) {
            header.push_str(", ");
            header.push_str(memory);
        }
    }

    Some(header)
}
