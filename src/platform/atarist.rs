//! Atari ST GEMDOS executables (`.prg`).
//!
//! The text and data sections are loaded contiguously and relocated as one,
//! so they are presented as a single merged code segment.

use crate::loader::{
    Confidence, ContainerReader, Error, FileFormat, FileInfo, Handler, InternalData,
    LoadOptions, MatchResult, Relocation, Result, Source, Symbol,
};
use crate::memory::{Endianness, SegmentType};
use crate::platform::PlatformName;
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek};

pub const MAGIC_WORD: u16 = 0x601A;
pub const HEADER_SIZE: u64 = 0x1C;
pub const SYMBOL_ENTRY_SIZE: u32 = 8 + 2 + 4;

pub const SYMBOL_DATA_BASED: u16 = 0x0400;
pub const SYMBOL_TEXT_BASED: u16 = 0x0200;
pub const SYMBOL_BSS_BASED: u16 = 0x0100;
pub const SYMBOL_SEGMENT_MASK: u16 = SYMBOL_DATA_BASED | SYMBOL_TEXT_BASED | SYMBOL_BSS_BASED;

/// The PRG header, retained in projects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrgHeader {
    pub text_size: u32,
    pub data_size: u32,
    pub bss_size: u32,
    pub symbol_table_size: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u16,
}

impl PrgHeader {
    /// Size of the merged text and data image.
    pub fn image_size(&self) -> u32 {
        self.text_size.wrapping_add(self.data_size)
    }
}

struct PrgFile {
    header: PrgHeader,
    symbols: Vec<Symbol>,
    fixups: Vec<u32>,
}

fn read_header<F: Read + Seek>(reader: &mut ContainerReader<'_, F>) -> Result<PrgHeader> {
    if reader.length() < HEADER_SIZE {
        return Err(reader.reject("file too short"));
    }

    if reader.u16()? != MAGIC_WORD {
        return Err(reader.reject("bad magic"));
    }

    Ok(PrgHeader {
        text_size: reader.u32()?,
        data_size: reader.u32()?,
        bss_size: reader.u32()?,
        symbol_table_size: reader.u32()?,
        reserved1: reader.u32()?,
        reserved2: reader.u32()?,
        reserved3: reader.u16()?,
    })
}

/// Read the symbol table, keeping the symbols that belong to a section.
fn read_symbols<F: Read + Seek>(
    reader: &mut ContainerReader<'_, F>,
    header: &PrgHeader,
) -> Result<Vec<Symbol>> {
    if header.symbol_table_size % SYMBOL_ENTRY_SIZE != 0 {
        return Err(reader.corrupt(format!(
            "symbol table size {} is not a whole number of entries",
            header.symbol_table_size
        )));
    }

    reader.seek(HEADER_SIZE + header.image_size() as u64)?;

    let mut symbols = Vec::new();
    for _ in 0..header.symbol_table_size / SYMBOL_ENTRY_SIZE {
        let name = reader.bytes(8)?;
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let kind = reader.u16()?;
        let value = reader.u32()?;

        if kind & SYMBOL_SEGMENT_MASK != 0 {
            let mut symbol = Symbol::new(value, String::from_utf8_lossy(&name[..end]));
            symbol.is_code = true;
            symbols.push(symbol);
        }
    }

    Ok(symbols)
}

/// Read the fixup stream: an initial longword offset followed by byte
/// deltas, where 0 ends the stream and 1 advances 254 bytes.
fn read_fixups<F: Read + Seek>(
    reader: &mut ContainerReader<'_, F>,
    header: &PrgHeader,
) -> Result<Vec<u32>> {
    let start = HEADER_SIZE + header.image_size() as u64 + header.symbol_table_size as u64;
    let limit = header.image_size();

    // Stripped executables may end right after the image.
    if start == reader.length() {
        return Ok(Vec::new());
    }

    reader.seek(start)?;

    let mut offset = reader.u32()?;
    if offset == 0 {
        return Ok(Vec::new());
    }

    let mut fixups = Vec::new();
    loop {
        if offset >= limit {
            return Err(reader.corrupt(format!(
                "fixup offset {:#X} lies outside the image",
                offset
            )));
        }

        fixups.push(offset);

        loop {
            match reader.u8()? {
                0 => return Ok(fixups),
                1 => offset = offset.wrapping_add(254),
                delta => {
                    offset = offset.wrapping_add(delta as u32);
                    break;
                }
            }
        }
    }
}

fn read_prg_file<F: Read + Seek>(file: &mut F, source: &Source<'_>) -> Result<PrgFile> {
    let mut reader = ContainerReader::new(
        file,
        source.offset(),
        source.length(),
        Endianness::BigEndian,
        "Atari ST PRG",
    )?;

    let header = read_header(&mut reader)?;
    let symbols = read_symbols(&mut reader, &header)?;
    let fixups = read_fixups(&mut reader, &header)?;

    Ok(PrgFile {
        header,
        symbols,
        fixups,
    })
}

pub fn identify<F: Read + Seek>(file: &mut F, source: &Source<'_>) -> Result<Vec<MatchResult>> {
    let mut result = MatchResult::new(Handler::AtariSt);

    if source.has_file_name_suffix("prg") {
        result.confidence = Confidence::Possible;
    }

    match read_prg_file(file, source) {
        Ok(_) => {
            result.platform = Some(PlatformName::AtariSt);
            result.file_format = Some(FileFormat::AtariStGemdosExecutable);
            result.confidence = Confidence::Certain;
        }
        Err(Error::LoadRejected(_)) | Err(Error::CorruptContainer(_)) => {}
        Err(e) => return Err(e),
    }

    Ok(vec![result])
}

pub fn load<F: Read + Seek>(
    file: &mut F,
    source: &Source<'_>,
    options: &LoadOptions,
) -> Result<FileInfo> {
    let prg = read_prg_file(file, source)?;
    let mut file_info = FileInfo::new(Handler::AtariSt, source, options);
    let image_size = prg.header.image_size();

    file_info.set_file_format(FileFormat::AtariStGemdosExecutable);

    let relocations = if prg.fixups.is_empty() {
        Vec::new()
    } else {
        vec![Relocation::new(0, prg.fixups)]
    };

    file_info.add_segment(
        SegmentType::Code,
        Some(HEADER_SIZE),
        image_size,
        image_size,
        relocations,
        prg.symbols,
    )?;

    if prg.header.bss_size > 0 {
        file_info.add_segment(
            SegmentType::Bss,
            None,
            0,
            prg.header.bss_size,
            Vec::new(),
            Vec::new(),
        )?;
    }

    file_info.set_internal_data(InternalData::AtariSt(prg.header));

    Ok(file_info)
}
