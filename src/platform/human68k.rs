//! Human68k X executables (`.x`) for the Sharp X68000.

use crate::loader::{
    Confidence, ContainerReader, Error, FileFormat, FileInfo, Handler, InternalData,
    LoadOptions, MatchResult, Relocation, Result, Source, Symbol,
};
use crate::memory::{Endianness, SegmentType};
use crate::platform::PlatformName;
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek};

/// `HU`
pub const MAGIC_WORD: u16 = 0x4855;
pub const HEADER_SIZE: u64 = 0x40;

/// The X header, retained in projects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XHeader {
    pub reserved1: u8,
    pub load_mode: u8,
    pub base_address: u32,
    pub entry_offset: u32,
    pub text_size: u32,
    pub data_size: u32,
    pub bss_size: u32,
    pub relocation_table_size: u32,
    pub symbol_table_size: u32,
    pub debug_line_size: u32,
    pub debug_symbol_size: u32,
    pub debug_string_size: u32,
    pub reserved: [u32; 4],
    pub bindlist_offset: u32,
}

impl XHeader {
    pub fn image_size(&self) -> u32 {
        self.text_size.wrapping_add(self.data_size)
    }
}

struct XFile {
    header: XHeader,
    relocations: Vec<u32>,
    symbols: Vec<Symbol>,
}

fn read_header<F: Read + Seek>(reader: &mut ContainerReader<'_, F>) -> Result<XHeader> {
    if reader.length() < HEADER_SIZE {
        return Err(reader.reject("file too short"));
    }

    if reader.u16()? != MAGIC_WORD {
        return Err(reader.reject("bad magic"));
    }

    Ok(XHeader {
        reserved1: reader.u8()?,
        load_mode: reader.u8()?,
        base_address: reader.u32()?,
        entry_offset: reader.u32()?,
        text_size: reader.u32()?,
        data_size: reader.u32()?,
        bss_size: reader.u32()?,
        relocation_table_size: reader.u32()?,
        symbol_table_size: reader.u32()?,
        debug_line_size: reader.u32()?,
        debug_symbol_size: reader.u32()?,
        debug_string_size: reader.u32()?,
        reserved: [reader.u32()?, reader.u32()?, reader.u32()?, reader.u32()?],
        bindlist_offset: reader.u32()?,
    })
}

/// Read the relocation stream of 16-bit deltas. A delta of 1 escapes to a
/// 32-bit delta in the following longword.
fn read_relocations<F: Read + Seek>(
    reader: &mut ContainerReader<'_, F>,
    header: &XHeader,
) -> Result<Vec<u32>> {
    let table_size = header.relocation_table_size as u64;
    let limit = header.image_size();
    let mut offsets = Vec::new();

    if table_size == 0 {
        return Ok(offsets);
    }

    reader.seek(HEADER_SIZE + header.image_size() as u64)?;

    let mut offset = 0u32;
    let mut bytes_read = 0u64;
    while bytes_read < table_size {
        let delta = match reader.u16()? {
            1 => {
                bytes_read += 6;
                reader.u32()?
            }
            delta => {
                bytes_read += 2;
                delta as u32
            }
        };

        offset = offset.wrapping_add(delta);
        if offset >= limit {
            return Err(reader.corrupt(format!(
                "relocation offset {:#X} lies outside the image",
                offset
            )));
        }

        offsets.push(offset);
    }

    Ok(offsets)
}

/// Read the symbol table: a type word, a value longword, then a NUL
/// terminated name padded to an even length.
fn read_symbols<F: Read + Seek>(
    reader: &mut ContainerReader<'_, F>,
    header: &XHeader,
) -> Result<Vec<Symbol>> {
    let table_size = header.symbol_table_size as u64;
    let mut symbols = Vec::new();

    if table_size == 0 {
        return Ok(symbols);
    }

    reader.seek(HEADER_SIZE + header.image_size() as u64 + header.relocation_table_size as u64)?;

    let mut bytes_read = 0u64;
    while bytes_read < table_size {
        let _kind = reader.u16()?;
        let value = reader.u32()?;
        bytes_read += 6;

        let mut name = Vec::new();
        loop {
            let c = reader.u8()?;
            bytes_read += 1;
            if c == 0 {
                break;
            }

            name.push(c);
        }

        if bytes_read & 1 != 0 {
            reader.skip(1)?;
            bytes_read += 1;
        }

        let mut symbol = Symbol::new(value, String::from_utf8_lossy(&name));
        symbol.is_code = true;
        symbols.push(symbol);
    }

    Ok(symbols)
}

fn read_x_file<F: Read + Seek>(file: &mut F, source: &Source<'_>) -> Result<XFile> {
    let mut reader = ContainerReader::new(
        file,
        source.offset(),
        source.length(),
        Endianness::BigEndian,
        "Human68k X",
    )?;

    let header = read_header(&mut reader)?;
    let relocations = read_relocations(&mut reader, &header)?;
    let symbols = read_symbols(&mut reader, &header)?;

    Ok(XFile {
        header,
        relocations,
        symbols,
    })
}

pub fn identify<F: Read + Seek>(file: &mut F, source: &Source<'_>) -> Result<Vec<MatchResult>> {
    let mut result = MatchResult::new(Handler::Human68k);

    if source.has_file_name_suffix("x") {
        result.confidence = Confidence::Possible;
    }

    match read_x_file(file, source) {
        Ok(_) => {
            result.platform = Some(PlatformName::X68000);
            result.file_format = Some(FileFormat::X68000XExecutable);
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
    let x = read_x_file(file, source)?;
    let mut file_info = FileInfo::new(Handler::Human68k, source, options);
    let image_size = x.header.image_size();

    file_info.set_file_format(FileFormat::X68000XExecutable);

    let relocations = if x.relocations.is_empty() {
        Vec::new()
    } else {
        vec![Relocation::new(0, x.relocations)]
    };

    file_info.add_segment(
        SegmentType::Code,
        Some(HEADER_SIZE),
        image_size,
        image_size,
        relocations,
        x.symbols,
    )?;

    if x.header.bss_size > 0 {
        file_info.add_segment(
            SegmentType::Bss,
            None,
            0,
            x.header.bss_size,
            Vec::new(),
            Vec::new(),
        )?;
    }

    file_info.set_entry_point(0, x.header.entry_offset);
    file_info.set_internal_data(InternalData::Human68k(x.header));

    Ok(file_info)
}
