//! Per-file loading results

use crate::arch::ArchName;
use crate::loader::{relocate_segment_data, Error, FileFormat, Handler, Result};
use crate::loader::{RelocatableAddresses, RelocatedAddresses};
use crate::memory::{cache_segment_data, next_segment_address, Endianness, Segment, SegmentType};
use crate::platform::{amiga, atarist, human68k, snes, zxspectrum};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::io::{Read, Seek};

/// Caller supplied options which control how a file is loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Load the file as a raw image rather than identifying its format.
    pub is_binary_file: bool,

    /// The processor a raw image targets.
    pub processor: Option<ArchName>,

    /// Address the first byte of a raw image is loaded at.
    pub load_address: u32,

    /// Offset of the entry point from the load address.
    pub entry_offset: u32,
}

impl LoadOptions {
    /// Options for loading a raw binary image.
    pub fn binary(processor: ArchName, load_address: u32, entry_offset: u32) -> Self {
        LoadOptions {
            is_binary_file: true,
            processor: Some(processor),
            load_address,
            entry_offset,
        }
    }
}

/// Where a file to be loaded lives.
#[derive(Clone, Debug)]
pub struct Source<'a> {
    file_name: &'a str,

    /// Offset of the file within the stream it is read from.
    offset: u64,

    length: u64,
}

impl<'a> Source<'a> {
    pub fn new(file_name: &'a str, offset: u64, length: u64) -> Self {
        Source {
            file_name,
            offset,
            length,
        }
    }

    pub fn file_name(&self) -> &str {
        self.file_name
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Determine if the file name ends with `.suffix`, ignoring case.
    pub fn has_file_name_suffix(&self, suffix: &str) -> bool {
        let expected = format!(".{}", suffix.to_ascii_lowercase());

        self.file_name.to_ascii_lowercase().ends_with(&expected)
    }
}

/// A set of locations within one segment whose longword values are offsets
/// into another segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub target_segment: usize,
    pub offsets: Vec<u32>,
}

impl Relocation {
    pub fn new(target_segment: usize, offsets: Vec<u32>) -> Self {
        Relocation {
            target_segment,
            offsets,
        }
    }
}

/// A symbol the file itself names, relative to its segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub offset: u32,
    pub name: String,
    pub is_code: bool,
}

impl Symbol {
    pub fn new(offset: u32, name: impl Into<String>) -> Self {
        Symbol {
            offset,
            name: name.into(),
            is_code: false,
        }
    }
}

/// Where execution starts, relative to a segment.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub segment_id: usize,
    pub offset: u32,
}

/// Format specific facts a loader retains about a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InternalData {
    None,
    AmigaHunk(amiga::HunkData),
    AtariSt(atarist::PrgHeader),
    Human68k(human68k::XHeader),
    SnesSmc(snes::RomHeader),
    ZxSpectrumZ80(zxspectrum::SnapshotHeader),
}

impl Default for InternalData {
    fn default() -> Self {
        InternalData::None
    }
}

/// Everything a loader learned about one file.
///
/// A `FileInfo` is built by exactly one loader and is only handed out once
/// that loader has accepted the file.
#[derive(Clone, Debug)]
pub struct FileInfo {
    handler: Handler,
    file_format: Option<FileFormat>,
    processor: Option<ArchName>,
    file_name: String,
    base_offset: u64,
    load_address: u32,
    segments: Vec<Segment>,
    relocations: Vec<Vec<Relocation>>,
    symbols: Vec<Vec<Symbol>>,
    entry_point: EntryPoint,
    internal: InternalData,
}

impl FileInfo {
    pub fn new(handler: Handler, source: &Source<'_>, options: &LoadOptions) -> Self {
        let load_address = if options.is_binary_file {
            options.load_address
        } else {
            0
        };

        FileInfo {
            handler,
            file_format: None,
            processor: handler.processor(),
            file_name: source.file_name().to_string(),
            base_offset: source.offset(),
            load_address,
            segments: Vec::new(),
            relocations: Vec::new(),
            symbols: Vec::new(),
            entry_point: EntryPoint::default(),
            internal: InternalData::None,
        }
    }

    pub fn handler(&self) -> Handler {
        self.handler
    }

    pub fn file_format(&self) -> Option<FileFormat> {
        self.file_format
    }

    pub fn set_file_format(&mut self, file_format: FileFormat) {
        self.file_format = Some(file_format);
    }

    pub fn processor(&self) -> Option<ArchName> {
        self.processor
    }

    pub fn set_processor(&mut self, processor: ArchName) {
        self.processor = Some(processor);
    }

    /// Byte order of the loaded file's values.
    pub fn endianness(&self) -> Endianness {
        self.processor
            .map(|p| p.endianness())
            .unwrap_or_else(|| self.handler.endianness())
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn load_address(&self) -> u32 {
        self.load_address
    }

    /// Override where the first segment is placed.
    ///
    /// Only meaningful before any segment has been added.
    pub fn set_load_address(&mut self, load_address: u32) {
        self.load_address = load_address;
    }

    /// Append a segment directly after the previous one.
    ///
    /// Returns the new segment's index. A segment smaller than its file data,
    /// or one running past the end of the address space, is corrupt.
    pub fn add_segment(
        &mut self,
        kind: SegmentType,
        file_offset: Option<u64>,
        data_length: u32,
        length: u32,
        relocations: Vec<Relocation>,
        symbols: Vec<Symbol>,
    ) -> Result<usize> {
        let address = self.place_segment(data_length, length)?;

        self.segments
            .push(Segment::new(kind, file_offset, data_length, length, address));
        self.relocations.push(relocations);
        self.symbols.push(symbols);

        Ok(self.segments.len() - 1)
    }

    /// Append a segment whose bytes the loader decoded itself.
    pub fn add_decoded_segment(
        &mut self,
        kind: SegmentType,
        data: Vec<u8>,
        length: u32,
        symbols: Vec<Symbol>,
    ) -> Result<usize> {
        let data_length = u32::try_from(data.len()).map_err(|_| {
            Error::CorruptContainer(format!("segment data of {} bytes is too large", data.len()))
        })?;
        let address = self.place_segment(data_length, length)?;

        self.segments
            .push(Segment::decoded(kind, data, length, address));
        self.relocations.push(Vec::new());
        self.symbols.push(symbols);

        Ok(self.segments.len() - 1)
    }

    fn place_segment(&self, data_length: u32, length: u32) -> Result<u32> {
        if length < data_length {
            return Err(Error::CorruptContainer(format!(
                "segment {} holds {} bytes of data but is only {} bytes long",
                self.segments.len(),
                data_length,
                length
            )));
        }

        let address = next_segment_address(&self.segments, self.load_address);
        if address.checked_add(length).is_none() {
            return Err(Error::CorruptContainer(format!(
                "segment {} of {} bytes at ${:08X} runs past the end of the address space",
                self.segments.len(),
                length,
                address
            )));
        }

        Ok(address)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, segment_id: usize) -> Option<&Segment> {
        self.segments.get(segment_id)
    }

    pub fn relocations(&self, segment_id: usize) -> &[Relocation] {
        self.relocations
            .get(segment_id)
            .map(|r| r.as_slice())
            .unwrap_or(&[])
    }

    pub fn symbols(&self, segment_id: usize) -> &[Symbol] {
        self.symbols
            .get(segment_id)
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    pub fn entry_point(&self) -> EntryPoint {
        self.entry_point
    }

    pub fn set_entry_point(&mut self, segment_id: usize, offset: u32) {
        self.entry_point = EntryPoint { segment_id, offset };
    }

    /// The absolute address execution starts at.
    pub fn entry_address(&self) -> Option<u32> {
        self.segments
            .get(self.entry_point.segment_id)
            .map(|s| s.address().wrapping_add(self.entry_point.offset))
    }

    pub fn internal_data(&self) -> &InternalData {
        &self.internal
    }

    pub fn set_internal_data(&mut self, internal: InternalData) {
        self.internal = internal;
    }

    /// Read one segment's bytes from the file this was loaded from.
    pub fn cache_segment_data<F>(&mut self, file: &mut F, segment_id: usize) -> Result<()>
    where
        F: Read + Seek,
    {
        cache_segment_data(file, self.base_offset, &mut self.segments, segment_id)
            .map_err(Error::from)
    }

    /// Read every segment's bytes from the file this was loaded from.
    pub fn cache_all_segment_data<F>(&mut self, file: &mut F) -> Result<()>
    where
        F: Read + Seek,
    {
        for segment_id in 0..self.segments.len() {
            self.cache_segment_data(file, segment_id)?;
        }

        Ok(())
    }

    /// Apply this file's relocation tables to the cached segment data.
    ///
    /// The tables are consumed, so calling this a second time does nothing.
    pub fn relocate(
        &mut self,
        relocated: &mut RelocatedAddresses,
        relocatable: &mut RelocatableAddresses,
    ) -> Result<()> {
        let relocations = std::mem::take(&mut self.relocations);
        let endianness = self.endianness();

        relocate_segment_data(
            &mut self.segments,
            endianness,
            &relocations,
            relocated,
            relocatable,
        )
    }

    /// Whether the relocation tables are still waiting to be applied.
    pub fn has_pending_relocations(&self) -> bool {
        self.relocations.iter().any(|r| !r.is_empty())
    }

    /// Give up ownership of the loaded segments.
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }
}
