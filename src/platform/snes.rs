//! Super Nintendo ROM images in SMC (copier) format.
//!
//! An SMC file is a 512-byte copier header followed by the raw ROM image.
//! The cartridge's own header lives at the end of the first 32K bank for
//! LoROM images and at the end of the first 64K bank for HiROM images.

use crate::loader::{
    Confidence, ContainerReader, Error, FileFormat, FileInfo, Handler, InternalData,
    LoadOptions, MatchResult, Result, Source,
};
use crate::memory::{Endianness, SegmentType};
use crate::platform::PlatformName;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::io::{Read, Seek};

pub const COPIER_HEADER_SIZE: u64 = 0x200;
pub const COPIER_SIGNATURE: [u8; 3] = [0xAA, 0xBB, 0x04];

pub const LOROM_HEADER_OFFSET: u32 = 0x7FC0;
pub const HIROM_HEADER_OFFSET: u32 = 0xFFC0;
pub const LOROM_LOAD_ADDRESS: u32 = 0x8000;
pub const HIROM_LOAD_ADDRESS: u32 = 0xC0_0000;

const ROM_HEADER_SIZE: usize = 0x40;
const TITLE_SIZE: usize = 21;
const RESET_VECTOR_OFFSET: usize = 0x3C;

/// Which of the two common memory maps the ROM uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RomLayout {
    LoRom,
    HiRom,
}

impl RomLayout {
    fn header_offset(self) -> u32 {
        match self {
            RomLayout::LoRom => LOROM_HEADER_OFFSET,
            RomLayout::HiRom => HIROM_HEADER_OFFSET,
        }
    }

    pub fn load_address(self) -> u32 {
        match self {
            RomLayout::LoRom => LOROM_LOAD_ADDRESS,
            RomLayout::HiRom => HIROM_LOAD_ADDRESS,
        }
    }

    /// Offset into the image of a bank 0 address.
    fn image_offset(self, address: u16) -> Option<u32> {
        match self {
            RomLayout::LoRom => (address as u32).checked_sub(LOROM_LOAD_ADDRESS),
            RomLayout::HiRom => Some(address as u32),
        }
    }
}

/// The cartridge header, retained in projects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomHeader {
    pub layout: RomLayout,
    pub title: String,
    pub map_mode: u8,
    pub cartridge_type: u8,
    pub rom_size: u8,
    pub ram_size: u8,
    pub country: u8,
    pub licensee: u8,
    pub version: u8,
    pub checksum_complement: u16,
    pub checksum: u16,

    /// Emulation mode reset vector.
    pub reset_vector: u16,
}

impl RomHeader {
    fn parse(layout: RomLayout, bytes: &[u8]) -> Result<Self> {
        let le = Endianness::LittleEndian;
        let title = bytes
            .get(..TITLE_SIZE)
            .map(|t| String::from_utf8_lossy(t).trim_end().to_string())
            .unwrap_or_default();

        Ok(RomHeader {
            layout,
            title,
            map_mode: le.read_u8(bytes, 0x15)?,
            cartridge_type: le.read_u8(bytes, 0x16)?,
            rom_size: le.read_u8(bytes, 0x17)?,
            ram_size: le.read_u8(bytes, 0x18)?,
            country: le.read_u8(bytes, 0x19)?,
            licensee: le.read_u8(bytes, 0x1A)?,
            version: le.read_u8(bytes, 0x1B)?,
            checksum_complement: le.read_u16(bytes, 0x1C)?,
            checksum: le.read_u16(bytes, 0x1E)?,
            reset_vector: le.read_u16(bytes, RESET_VECTOR_OFFSET)?,
        })
    }

    /// Determine if the header is self-consistent for its layout.
    pub fn is_valid(&self) -> bool {
        let hirom_bit = self.map_mode & 1 == 1;

        self.checksum.wrapping_add(self.checksum_complement) == 0xFFFF
            && hirom_bit == (self.layout == RomLayout::HiRom)
    }
}

struct SmcFile {
    header: RomHeader,
    image_size: u32,
}

fn read_smc_file<F: Read + Seek>(file: &mut F, source: &Source<'_>) -> Result<SmcFile> {
    let mut reader = ContainerReader::new(
        file,
        source.offset(),
        source.length(),
        Endianness::LittleEndian,
        "SNES SMC",
    )?;

    if reader.length() < COPIER_HEADER_SIZE + LOROM_HEADER_OFFSET as u64 + ROM_HEADER_SIZE as u64
    {
        return Err(reader.reject("file too short"));
    }

    let copier = reader.bytes(COPIER_HEADER_SIZE as usize)?;
    if copier[8..11] != COPIER_SIGNATURE {
        return Err(reader.reject("no copier header"));
    }

    let image_size = u32::try_from(reader.length() - COPIER_HEADER_SIZE)
        .map_err(|_| reader.corrupt("image too large"))?;

    for &layout in [RomLayout::LoRom, RomLayout::HiRom].iter() {
        let offset = layout.header_offset();
        if offset as u64 + ROM_HEADER_SIZE as u64 > image_size as u64 {
            continue;
        }

        reader.seek(COPIER_HEADER_SIZE + offset as u64)?;
        let header = RomHeader::parse(layout, &reader.bytes(ROM_HEADER_SIZE)?)?;

        if header.is_valid() {
            return Ok(SmcFile { header, image_size });
        }
    }

    Err(reader.corrupt("no valid cartridge header"))
}

pub fn identify<F: Read + Seek>(file: &mut F, source: &Source<'_>) -> Result<Vec<MatchResult>> {
    let mut result = MatchResult::new(Handler::SnesSmc);

    if source.has_file_name_suffix("smc") {
        result.confidence = Confidence::Possible;
    }

    match read_smc_file(file, source) {
        Ok(_) => {
            result.platform = Some(PlatformName::Snes);
            result.file_format = Some(FileFormat::SnesSmc);
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
    let smc = read_smc_file(file, source)?;
    let layout = smc.header.layout;
    let entry_offset = layout
        .image_offset(smc.header.reset_vector)
        .filter(|&offset| offset < smc.image_size)
        .ok_or_else(|| {
            Error::CorruptContainer(format!(
                "SNES SMC: reset vector {:#06X} lies outside the image",
                smc.header.reset_vector
            ))
        })?;

    let mut file_info = FileInfo::new(Handler::SnesSmc, source, options);

    file_info.set_file_format(FileFormat::SnesSmc);
    file_info.set_load_address(layout.load_address());
    file_info.add_segment(
        SegmentType::Code,
        Some(COPIER_HEADER_SIZE),
        smc.image_size,
        smc.image_size,
        Vec::new(),
        Vec::new(),
    )?;
    file_info.set_entry_point(0, entry_offset);
    file_info.set_internal_data(InternalData::SnesSmc(smc.header));

    Ok(file_info)
}
