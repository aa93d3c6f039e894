//! ZX Spectrum `.z80` memory snapshots.
//!
//! Version 1 snapshots are a 30-byte register header followed by the 48K RAM
//! image. Versions 2 and 3 extend the header and store memory as a series of
//! 16K pages. Either may be run-length compressed with `ED ED nn bb`
//! sequences. The decompressed 48K of RAM is presented as one code segment
//! starting at `0x4000`.

use crate::loader::{
    Confidence, ContainerReader, Error, FileFormat, FileInfo, Handler, InternalData,
    LoadOptions, MatchResult, Result, Source,
};
use crate::memory::{Endianness, SegmentType};
use crate::platform::PlatformName;
use log::warn;
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek};

pub const V1_HEADER_SIZE: u64 = 30;
pub const V2_EXTRA_HEADER_SIZE: u16 = 23;
pub const V3_EXTRA_HEADER_SIZES: [u16; 2] = [54, 55];

pub const RAM_ADDRESS: u32 = 0x4000;
pub const PAGE_SIZE: usize = 0x4000;
pub const RAM_SIZE: usize = 3 * PAGE_SIZE;

const OFFSET_V1_PROGRAM_COUNTER: usize = 6;
const OFFSET_EXTRA_HEADER_LENGTH: u64 = 30;
const UNCOMPRESSED_PAGE: u16 = 0xFFFF;

/// The page numbers mapped at `0x4000`, `0x8000` and `0xC000`.
const PAGES_48K: [u8; 3] = [8, 4, 5];
const PAGES_128K: [u8; 3] = [8, 5, 3];

/// The saved machine state, retained in projects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub version: u8,
    pub hardware_mode: u8,
    pub is_128k: bool,
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,
    pub interrupt_mode: u8,
    pub border: u8,
    pub compressed: bool,
}

impl SnapshotHeader {
    pub fn file_format(&self) -> FileFormat {
        match self.version {
            1 => FileFormat::ZxSpectrumZ80V1,
            2 => FileFormat::ZxSpectrumZ80V2,
            _ => FileFormat::ZxSpectrumZ80V3,
        }
    }
}

/// Work out the snapshot version from the fixed header bytes.
///
/// Returns `None` when the bytes do not look like any version.
fn detect_version<F: Read + Seek>(reader: &mut ContainerReader<'_, F>) -> Result<Option<u8>> {
    if reader.length() < V1_HEADER_SIZE {
        return Ok(None);
    }

    let header = reader.bytes(V1_HEADER_SIZE as usize)?;
    if Endianness::LittleEndian.read_u16(&header, OFFSET_V1_PROGRAM_COUNTER)? != 0 {
        return Ok(Some(1));
    }

    if reader.length() < OFFSET_EXTRA_HEADER_LENGTH + 2 {
        return Ok(None);
    }

    reader.seek(OFFSET_EXTRA_HEADER_LENGTH)?;
    match reader.u16()? {
        V2_EXTRA_HEADER_SIZE => Ok(Some(2)),
        n if V3_EXTRA_HEADER_SIZES.contains(&n) => Ok(Some(3)),
        _ => Ok(None),
    }
}

/// Expand `ED ED nn bb` runs in `data` onto `out`.
///
/// With `end_marker` set, decoding stops at the `00 ED ED 00` sequence.
pub fn decompress(data: &[u8], end_marker: bool, out: &mut Vec<u8>) {
    let mut i = 0;

    while i < data.len() {
        if end_marker && data[i..].starts_with(&[0x00, 0xED, 0xED, 0x00]) {
            break;
        }

        if data[i..].starts_with(&[0xED, 0xED]) && i + 3 < data.len() {
            let count = data[i + 2] as usize;
            let value = data[i + 3];

            out.extend(std::iter::repeat(value).take(count));
            i += 4;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
}

fn read_v1_header(bytes: &[u8]) -> Result<SnapshotHeader> {
    let le = Endianness::LittleEndian;
    let mut flags = le.read_u8(bytes, 12)?;
    if flags == 0xFF {
        flags = 1;
    }

    let r = (le.read_u8(bytes, 11)? & 0x7F) | ((flags & 1) << 7);

    Ok(SnapshotHeader {
        version: 1,
        hardware_mode: 0,
        is_128k: false,
        af: (le.read_u8(bytes, 0)? as u16) << 8 | le.read_u8(bytes, 1)? as u16,
        bc: le.read_u16(bytes, 2)?,
        hl: le.read_u16(bytes, 4)?,
        pc: le.read_u16(bytes, 6)?,
        sp: le.read_u16(bytes, 8)?,
        i: le.read_u8(bytes, 10)?,
        r,
        border: (flags >> 1) & 7,
        compressed: flags & 0x20 != 0,
        de: le.read_u16(bytes, 13)?,
        iy: le.read_u16(bytes, 23)?,
        ix: le.read_u16(bytes, 25)?,
        interrupt_mode: le.read_u8(bytes, 29)? & 3,
    })
}

fn is_128k(version: u8, hardware_mode: u8) -> bool {
    match version {
        2 => hardware_mode == 3 || hardware_mode == 4,
        _ => (4..=13).contains(&hardware_mode),
    }
}

fn read_snapshot<F: Read + Seek>(
    file: &mut F,
    source: &Source<'_>,
) -> Result<(SnapshotHeader, Vec<u8>)> {
    let mut reader = ContainerReader::new(
        file,
        source.offset(),
        source.length(),
        Endianness::LittleEndian,
        "ZX Spectrum Z80",
    )?;

    let version = match detect_version(&mut reader)? {
        Some(1) if !source.has_file_name_suffix("z80") => {
            return Err(reader.reject("version 1 snapshots need a .z80 name"))
        }
        Some(version) => version,
        None => return Err(reader.reject("no recognisable header")),
    };

    reader.seek(0)?;
    let fixed = reader.bytes(V1_HEADER_SIZE as usize)?;
    let mut header = read_v1_header(&fixed)?;
    let mut ram = Vec::with_capacity(RAM_SIZE);

    if version == 1 {
        let remaining = (reader.length() - V1_HEADER_SIZE) as usize;
        let data = reader.bytes(remaining)?;

        if header.compressed {
            decompress(&data, true, &mut ram);
        } else {
            ram = data;
        }

        if ram.len() != RAM_SIZE {
            return Err(reader.corrupt(format!(
                "memory image is {} bytes rather than {}",
                ram.len(),
                RAM_SIZE
            )));
        }

        return Ok((header, ram));
    }

    let extra_length = reader.u16()?;
    let extra = reader.bytes(extra_length as usize)?;
    let le = Endianness::LittleEndian;

    header.version = version;
    header.pc = le.read_u16(&extra, 0)?;
    header.hardware_mode = le.read_u8(&extra, 2)?;
    header.is_128k = is_128k(version, header.hardware_mode);
    header.compressed = true;

    let pages = if header.is_128k { PAGES_128K } else { PAGES_48K };
    ram.resize(RAM_SIZE, 0);

    while !reader.at_end()? {
        let length = reader.u16()?;
        let page = reader.u8()?;
        let data = if length == UNCOMPRESSED_PAGE {
            reader.bytes(PAGE_SIZE)?
        } else {
            let compressed = reader.bytes(length as usize)?;
            let mut data = Vec::with_capacity(PAGE_SIZE);
            decompress(&compressed, false, &mut data);
            data
        };

        if data.len() != PAGE_SIZE {
            return Err(reader.corrupt(format!(
                "page {} decompresses to {} bytes",
                page,
                data.len()
            )));
        }

        if let Some(slot) = pages.iter().position(|&p| p == page) {
            ram[slot * PAGE_SIZE..(slot + 1) * PAGE_SIZE].copy_from_slice(&data);
        }
    }

    Ok((header, ram))
}

pub fn identify<F: Read + Seek>(file: &mut F, source: &Source<'_>) -> Result<Vec<MatchResult>> {
    let mut result = MatchResult::new(Handler::ZxSpectrumZ80);
    let has_suffix = source.has_file_name_suffix("z80");

    let version = {
        let mut reader = ContainerReader::new(
            file,
            source.offset(),
            source.length(),
            Endianness::LittleEndian,
            "ZX Spectrum Z80",
        )?;

        match detect_version(&mut reader) {
            Ok(version) => version,
            Err(Error::CorruptContainer(_)) => None,
            Err(e) => return Err(e),
        }
    };

    match version {
        Some(1) => {
            result.file_format = Some(FileFormat::ZxSpectrumZ80V1);
            if has_suffix {
                result.confidence = Confidence::Possible;
            }
        }
        Some(2) => {
            result.file_format = Some(FileFormat::ZxSpectrumZ80V2);
            result.confidence = Confidence::Probable;
        }
        Some(_) => {
            result.file_format = Some(FileFormat::ZxSpectrumZ80V3);
            result.confidence = Confidence::Probable;
        }
        None => return Ok(Vec::new()),
    }

    result.platform = Some(PlatformName::ZxSpectrum);

    Ok(vec![result])
}

pub fn load<F: Read + Seek>(
    file: &mut F,
    source: &Source<'_>,
    options: &LoadOptions,
) -> Result<FileInfo> {
    let (header, ram) = read_snapshot(file, source)?;
    let mut file_info = FileInfo::new(Handler::ZxSpectrumZ80, source, options);

    file_info.set_file_format(header.file_format());
    file_info.set_load_address(RAM_ADDRESS);
    file_info.add_decoded_segment(SegmentType::Code, ram, RAM_SIZE as u32, Vec::new())?;

    match (header.pc as u32).checked_sub(RAM_ADDRESS) {
        Some(offset) => file_info.set_entry_point(0, offset),
        None => warn!(
            "Snapshot program counter {:#06X} lies in ROM, starting at {:#06X}",
            header.pc, RAM_ADDRESS
        ),
    }

    file_info.set_internal_data(InternalData::ZxSpectrumZ80(header));

    Ok(file_info)
}
