//! The root of a loaded program's database

use crate::arch::ArchName;
use crate::database::{
    AsciiRun, BlockEvent, BlockFlags, BlockList, CodeLine, Error, LineData, ProgramState,
    Progress, Result, SegmentBlock, SplitError, UncertainReference,
};
use crate::loader::{
    self, EntryPoint, FileFormat, FileInfo, Handler, InternalData, LoadOptions,
    RelocatableAddresses, RelocatedAddresses,
};
use crate::memory::{DataType, Endianness, Segment};
use log::{debug, error, info, warn};
use md5::{Digest, Md5};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek, SeekFrom};
use std::sync::mpsc::Sender;
use std::{mem, result};

/// Widest an ASCII line may be rendered, in characters.
pub const ASCII_LINE_WIDTH: usize = 40;

const SEGMENT_HEADER_LINE_COUNT: usize = 2;

/// A run of contiguous segments, inclusive of both ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u32,
    pub end: u32,
    pub segment_ids: BTreeSet<usize>,
}

/// How an address relates to the program's segments.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum KnownAddress {
    Inside,

    /// One past the end of a range, following the given segment.
    PostSegment(usize),

    Unknown,
}

/// Read-only view of the parts of a program needed to judge addresses,
/// shareable between threads.
struct AddressSpace<'a> {
    segments: &'a [Segment],
    ranges: &'a [AddressRange],
    endianness: Endianness,
    handler: Handler,
}

impl<'a> AddressSpace<'a> {
    fn classify(&self, address: u32) -> KnownAddress {
        if self
            .ranges
            .iter()
            .any(|r| address >= r.start && address <= r.end)
        {
            return KnownAddress::Inside;
        }

        self.ranges
            .iter()
            .find(|r| r.end.checked_add(1) == Some(address))
            .and_then(|r| r.segment_ids.iter().max())
            .map(|&segment_id| KnownAddress::PostSegment(segment_id))
            .unwrap_or(KnownAddress::Unknown)
    }

    /// Find every 16-bit aligned longword in a data block whose value is a
    /// known address.
    ///
    /// Returns the references and any post-segment addresses that were
    /// matched, which the caller must record.
    fn locate_data_references(
        &self,
        block: &SegmentBlock,
    ) -> (Vec<UncertainReference>, Vec<(usize, u32)>) {
        let mut references = Vec::new();
        let mut post_segment = Vec::new();
        let segment = match self.segments.get(block.segment_id) {
            Some(segment) => segment,
            None => return (references, post_segment),
        };
        let data = segment.data().unwrap_or(&[]);
        let directive = self
            .handler
            .data_directive(DataType::Data32, segment.is_bss(), true)
            .unwrap_or_default();

        let mut offset = 0;
        while offset + 4 <= block.length {
            let data_offset = (block.segment_offset + offset) as usize;
            let value = match self.endianness.read_u32(data, data_offset) {
                Ok(value) => value,
                Err(_) => break,
            };

            let known = match self.classify(value) {
                KnownAddress::Inside => true,
                KnownAddress::PostSegment(segment_id) => {
                    post_segment.push((segment_id, value));
                    true
                }
                KnownAddress::Unknown => false,
            };

            if known {
                references.push(UncertainReference {
                    source: block.address + offset,
                    target: value,
                    text: format!("{} ${:08X}", directive, value),
                });
            }

            offset += 2;
        }

        (references, post_segment)
    }
}

fn byte_representation(byte: u8) -> String {
    if byte < 16 {
        format!("{}", byte)
    } else {
        format!("${:X}", byte)
    }
}

/// Divide `length` bytes of `data` starting at `start` into display lines.
///
/// Printable characters are gathered into quoted strings and other bytes are
/// listed as numbers. A line ends when it would grow wider than
/// `ASCII_LINE_WIDTH`, or after a NUL that terminates a string. Bytes past
/// the end of `data` read as zero.
pub(super) fn ascii_runs(data: &[u8], start: usize, length: u32) -> Vec<AsciiRun> {
    let mut runs = Vec::new();
    let mut run_start = 0;
    let mut line_width = 0;
    let mut in_string = false;
    let mut previous = None;

    for i in 0..length {
        let byte = data.get(start + i as usize).copied().unwrap_or(0);
        let printable = (32..127).contains(&byte);
        let piece_width = |continues: bool| {
            if printable && continues {
                1
            } else if printable {
                3
            } else {
                byte_representation(byte).len()
            }
        };

        let continues = printable && in_string;
        let mut width = piece_width(continues);
        if !continues && i > run_start {
            width += 1;
        }

        if i > run_start && line_width + width > ASCII_LINE_WIDTH {
            runs.push(AsciiRun {
                offset: run_start,
                length: i - run_start,
            });
            run_start = i;
            width = piece_width(false);
        }

        line_width = if i == run_start {
            width
        } else {
            line_width + width
        };
        in_string = printable;

        let ends_string = byte == 0 && previous.map_or(false, |p| p != 0);
        previous = Some(byte);

        if ends_string {
            runs.push(AsciiRun {
                offset: run_start,
                length: i + 1 - run_start,
            });
            run_start = i + 1;
            line_width = 0;
            in_string = false;
        }
    }

    if run_start < length {
        runs.push(AsciiRun {
            offset: run_start,
            length: length - run_start,
        });
    }

    runs
}

/// Everything line counting needs to know besides the block itself.
struct LineContext<'a> {
    segments: &'a [Segment],
    has_segment_headers: bool,
    post_segment_addresses: &'a BTreeMap<usize, BTreeSet<u32>>,
}

impl<'a> LineContext<'a> {
    fn header_line_count(&self, block: &SegmentBlock) -> usize {
        if block.segment_offset == 0 && self.has_segment_headers {
            SEGMENT_HEADER_LINE_COUNT
        } else {
            0
        }
    }

    fn body_line_count(&self, block: &SegmentBlock) -> usize {
        match (&block.line_data, block.data_type()) {
            (LineData::Code(lines), _) => lines.len(),
            (LineData::Ascii(runs), _) => runs.len(),
            (_, Some(data_type)) if data_type.is_numeric() => {
                block.data_type_sizes().iter().map(|s| s.lines).sum()
            }
            _ => 0,
        }
    }

    fn ends_segment(&self, block: &SegmentBlock) -> bool {
        self.segments
            .get(block.segment_id)
            .map_or(false, |s| block.segment_offset + block.length == s.length())
    }

    fn post_segment_addresses(&self, block: &SegmentBlock) -> Vec<u32> {
        if !self.ends_segment(block) {
            return Vec::new();
        }

        self.post_segment_addresses
            .get(&block.segment_id)
            .map(|a| a.iter().copied().collect())
            .unwrap_or_default()
    }

    fn line_count(&self, block: &SegmentBlock) -> usize {
        let mut count = self.header_line_count(block) + self.body_line_count(block);

        if self.ends_segment(block) {
            count += self.post_segment_addresses(block).len();

            if block.segment_id + 1 < self.segments.len() {
                count += 1;
            }
        }

        count
    }
}

/// Compute the size and MD5 digest of an entire file.
pub fn file_checksum<F: Read + Seek>(file: &mut F) -> Result<(u64, [u8; 16])> {
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;

    let mut hasher = Md5::new();
    let mut buffer = [0; 8192];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }

        hasher.update(&buffer[..read]);
    }

    let mut checksum = [0; 16];
    checksum.copy_from_slice(&hasher.finalize());

    Ok((size, checksum))
}

/// A loaded program, its address space divided into blocks.
#[derive(Serialize, Deserialize, Debug)]
pub struct ProgramData {
    #[serde(skip)]
    pub(super) state: ProgramState,

    pub(super) processor: Option<ArchName>,
    pub(super) handler: Handler,
    pub(super) file_format: Option<FileFormat>,
    pub(super) endianness: Endianness,
    pub(super) load_options: LoadOptions,

    pub(super) file_name: String,
    pub(super) file_size: u64,
    pub(super) file_checksum: [u8; 16],

    /// Whether the input file travels with saved projects.
    #[serde(default)]
    pub(super) input_file_cached: bool,

    pub(super) segments: Vec<Segment>,
    pub(super) entry_point: EntryPoint,
    pub(super) internal_data: InternalData,
    pub(super) blocks: BlockList,

    pub(super) symbols: BTreeMap<u32, String>,
    pub(super) branch_addresses: BTreeMap<u32, BTreeSet<u32>>,
    pub(super) reference_addresses: BTreeMap<u32, BTreeSet<u32>>,
    pub(super) relocated_addresses: RelocatedAddresses,
    pub(super) relocatable_addresses: RelocatableAddresses,
    pub(super) post_segment_addresses: BTreeMap<usize, BTreeSet<u32>>,

    #[serde(skip)]
    pub(super) address_ranges: Vec<AddressRange>,

    #[serde(skip)]
    pub(super) events: Option<Sender<BlockEvent>>,

    /// Start addresses of blocks created or retyped by the current operation.
    #[serde(skip)]
    pub(super) touched: Vec<u32>,
}

impl ProgramData {
    fn from_file_info(
        file_info: FileInfo,
        options: &LoadOptions,
        file_size: u64,
        file_checksum: [u8; 16],
    ) -> (Self, Vec<(usize, Vec<loader::Symbol>)>) {
        let symbols = (0..file_info.segments().len())
            .map(|segment_id| (segment_id, file_info.symbols(segment_id).to_vec()))
            .collect();

        let program = ProgramData {
            state: ProgramState::Loading,
            processor: file_info.processor(),
            handler: file_info.handler(),
            file_format: file_info.file_format(),
            endianness: file_info.endianness(),
            load_options: options.clone(),
            file_name: file_info.file_name().to_string(),
            file_size,
            file_checksum,
            input_file_cached: false,
            entry_point: file_info.entry_point(),
            internal_data: file_info.internal_data().clone(),
            segments: file_info.into_segments(),
            blocks: BlockList::new(),
            symbols: BTreeMap::new(),
            branch_addresses: BTreeMap::new(),
            reference_addresses: BTreeMap::new(),
            relocated_addresses: RelocatedAddresses::new(),
            relocatable_addresses: RelocatableAddresses::new(),
            post_segment_addresses: BTreeMap::new(),
            address_ranges: Vec::new(),
            events: None,
            touched: Vec::new(),
        };

        (program, symbols)
    }

    /// Load a program from a file.
    ///
    /// The file is handed to the loader framework, every segment is read and
    /// relocated, and one block is created for each segment's file data plus
    /// one for any memory beyond it. No code analysis is done.
    pub fn load<F>(
        file: &mut F,
        file_name: &str,
        options: &LoadOptions,
        progress: &mut dyn Progress,
    ) -> Result<Self>
    where
        F: Read + Seek,
    {
        Self::load_with_events(file, file_name, options, progress, None)
    }

    /// Load a program, publishing every block created to `events`.
    pub fn load_with_events<F>(
        file: &mut F,
        file_name: &str,
        options: &LoadOptions,
        progress: &mut dyn Progress,
        events: Option<Sender<BlockEvent>>,
    ) -> Result<Self>
    where
        F: Read + Seek,
    {
        if progress.should_abort() {
            return Err(Error::Aborted);
        }

        let mut file_info = loader::load(file, file_name, options, 0, None)?;
        let (file_size, checksum) = file_checksum(file)?;
        let segment_count = file_info.segments().len();

        progress.set_step_count(segment_count + 2);

        for segment_id in 0..segment_count {
            if progress.should_abort() {
                return Err(Error::Aborted);
            }

            file_info.cache_segment_data(file, segment_id)?;
            progress.step_completed();
        }

        let mut relocated = RelocatedAddresses::new();
        let mut relocatable = RelocatableAddresses::new();
        file_info.relocate(&mut relocated, &mut relocatable)?;
        progress.step_completed();

        let (mut program, symbols) =
            ProgramData::from_file_info(file_info, options, file_size, checksum);

        program.events = events;
        program.relocated_addresses = relocated;
        program.relocatable_addresses = relocatable;
        program.make_address_ranges();
        program.create_segment_blocks();

        for (segment_id, segment_symbols) in symbols {
            let address = program.segments[segment_id].address();

            for symbol in segment_symbols {
                program.set_symbol_for_address(address.wrapping_add(symbol.offset), &symbol.name);
            }
        }

        if program.load_options.is_binary_file {
            program.cache_uncertain_data_references();
        }

        program.touched.clear();
        program.refresh_line_numbers();
        progress.step_completed();

        if progress.should_abort() {
            return Err(Error::Aborted);
        }

        program.state = ProgramState::Loaded;
        info!(
            "Loaded {} as {}: {} segments, {} blocks",
            program.file_name,
            program.handler,
            program.segments.len(),
            program.blocks.len()
        );

        Ok(program)
    }

    /// Bring a deserialized program back to life against its input file.
    ///
    /// The file's owning loader is run again so that decoded segments and
    /// relocations can be rebuilt. The segment layout must match what was
    /// saved.
    pub(crate) fn restore<F>(&mut self, file: &mut F, progress: &mut dyn Progress) -> Result<()>
    where
        F: Read + Seek,
    {
        self.state = ProgramState::Loading;

        let mut file_info = loader::reload(file, self.handler, &self.file_name, &self.load_options)?;
        let segment_count = file_info.segments().len();

        if segment_count != self.segments.len() {
            return Err(Error::ValidationFailed(format!(
                "file has {} segments, project has {}",
                segment_count,
                self.segments.len()
            )));
        }

        for (fresh, saved) in file_info.segments().iter().zip(self.segments.iter()) {
            if fresh.address() != saved.address()
                || fresh.length() != saved.length()
                || fresh.kind() != saved.kind()
            {
                return Err(Error::ValidationFailed(format!(
                    "segment at {:08X} no longer matches the file",
                    saved.address()
                )));
            }
        }

        progress.set_step_count(segment_count + 1);

        for segment_id in 0..segment_count {
            if progress.should_abort() {
                return Err(Error::Aborted);
            }

            file_info.cache_segment_data(file, segment_id)?;
            progress.step_completed();
        }

        let mut relocated = RelocatedAddresses::new();
        let mut relocatable = RelocatableAddresses::new();
        file_info.relocate(&mut relocated, &mut relocatable)?;

        if relocated != self.relocated_addresses || relocatable != self.relocatable_addresses {
            warn!(
                "Relocations of {} differ from those saved in the project, using the file's",
                self.file_name
            );
            self.relocated_addresses = relocated;
            self.relocatable_addresses = relocatable;
        }

        self.segments = file_info.into_segments();
        self.blocks.rebuild_indexes();
        self.make_address_ranges();

        for index in 0..self.blocks.len() {
            if self.blocks.get(index).and_then(|b| b.data_type()) == Some(DataType::Ascii) {
                self.process_block_as_ascii(index);
            }
        }

        self.refresh_line_numbers();
        progress.step_completed();

        if progress.should_abort() {
            return Err(Error::Aborted);
        }

        self.state = ProgramState::Loaded;

        Ok(())
    }

    pub fn state(&self) -> ProgramState {
        self.state
    }

    pub fn processor(&self) -> Option<ArchName> {
        self.processor
    }

    pub fn handler(&self) -> Handler {
        self.handler
    }

    pub fn file_format(&self) -> Option<FileFormat> {
        self.file_format
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn is_binary_file(&self) -> bool {
        self.load_options.is_binary_file
    }

    pub fn load_options(&self) -> &LoadOptions {
        &self.load_options
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn file_checksum(&self) -> &[u8; 16] {
        &self.file_checksum
    }

    pub fn input_file_cached(&self) -> bool {
        self.input_file_cached
    }

    pub(crate) fn set_input_file_cached(&mut self, cached: bool) {
        self.input_file_cached = cached;
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn entry_point(&self) -> EntryPoint {
        self.entry_point
    }

    pub fn entry_address(&self) -> Option<u32> {
        self.segments
            .get(self.entry_point.segment_id)
            .map(|s| s.address().wrapping_add(self.entry_point.offset))
    }

    pub fn internal_data(&self) -> &InternalData {
        &self.internal_data
    }

    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    pub fn symbols(&self) -> &BTreeMap<u32, String> {
        &self.symbols
    }

    pub fn symbol_for_address(&self, address: u32) -> Option<&str> {
        self.symbols.get(&address).map(|s| s.as_str())
    }

    pub fn branch_addresses(&self) -> &BTreeMap<u32, BTreeSet<u32>> {
        &self.branch_addresses
    }

    pub fn reference_addresses(&self) -> &BTreeMap<u32, BTreeSet<u32>> {
        &self.reference_addresses
    }

    pub fn relocated_addresses(&self) -> &RelocatedAddresses {
        &self.relocated_addresses
    }

    pub fn relocatable_addresses(&self) -> &RelocatableAddresses {
        &self.relocatable_addresses
    }

    pub fn post_segment_addresses(&self) -> &BTreeMap<usize, BTreeSet<u32>> {
        &self.post_segment_addresses
    }

    pub fn address_ranges(&self) -> &[AddressRange] {
        &self.address_ranges
    }

    /// Every address known to branch to, refer to or relocate against
    /// `address`.
    pub fn referring_addresses(&self, address: u32) -> BTreeSet<u32> {
        let mut referrers = BTreeSet::new();

        for map in [
            &self.branch_addresses,
            &self.reference_addresses,
            &self.relocated_addresses,
        ]
        .iter()
        {
            if let Some(sources) = map.get(&address) {
                referrers.extend(sources.iter().copied());
            }
        }

        referrers
    }

    /// Subscribe to block creation and data type changes.
    pub fn set_event_sink(&mut self, events: Option<Sender<BlockEvent>>) {
        self.events = events;
    }

    pub(super) fn emit(&mut self, event: BlockEvent) {
        self.touched.push(event.address());

        if let Some(sink) = &self.events {
            if sink.send(event).is_err() {
                debug!("Block event subscriber went away");
                self.events = None;
            }
        }
    }

    pub(super) fn segment_data(&self, segment_id: usize) -> &[u8] {
        self.segments
            .get(segment_id)
            .and_then(|s| s.data())
            .unwrap_or(&[])
    }

    fn address_space(&self) -> AddressSpace<'_> {
        AddressSpace {
            segments: &self.segments,
            ranges: &self.address_ranges,
            endianness: self.endianness,
            handler: self.handler,
        }
    }

    /// Merge the segments into runs of contiguous addresses.
    fn make_address_ranges(&mut self) {
        let mut ranges: Vec<AddressRange> = Vec::new();

        for (segment_id, segment) in self.segments.iter().enumerate() {
            if segment.length() == 0 {
                continue;
            }

            let start = segment.address();
            let end = start.wrapping_add(segment.length() - 1);

            let adjoining = ranges.iter_mut().find(|r| {
                r.end.checked_add(1) == Some(start) || end.checked_add(1) == Some(r.start)
            });

            match adjoining {
                Some(range) => {
                    range.start = range.start.min(start);
                    range.end = range.end.max(end);
                    range.segment_ids.insert(segment_id);
                }
                None => {
                    let mut segment_ids = BTreeSet::new();
                    segment_ids.insert(segment_id);

                    ranges.push(AddressRange {
                        start,
                        end,
                        segment_ids,
                    });
                }
            }
        }

        self.address_ranges = ranges;
    }

    fn create_segment_blocks(&mut self) {
        for segment_id in 0..self.segments.len() {
            let (address, data_length, length, is_bss) = {
                let segment = &self.segments[segment_id];

                (
                    segment.address(),
                    segment.data_length(),
                    segment.length(),
                    segment.is_bss(),
                )
            };

            if data_length > 0 {
                let mut flags = BlockFlags::for_data_type(DataType::Data32);
                flags.set_alloc(is_bss);

                let index = self
                    .blocks
                    .push(segment_id, 0, address, data_length, flags);
                self.emit_created(index);
            }

            if length > data_length {
                let mut flags = BlockFlags::for_data_type(DataType::Data32);
                flags.set_alloc(true);

                let index = self.blocks.push(
                    segment_id,
                    data_length,
                    address.wrapping_add(data_length),
                    length - data_length,
                    flags,
                );
                self.emit_created(index);
            }
        }
    }

    fn emit_created(&mut self, index: usize) {
        if let Some(event) = self.blocks.get(index).map(|b| b.created_event()) {
            self.emit(event);
        }
    }

    /// Determine if an address lies within the program.
    ///
    /// An address one past the end of a run of segments is also accepted,
    /// and remembered so it can be displayed after that segment.
    pub fn check_known_address(&mut self, address: u32) -> bool {
        match self.address_space().classify(address) {
            KnownAddress::Inside => true,
            KnownAddress::PostSegment(segment_id) => {
                self.record_post_segment_address(segment_id, address);
                true
            }
            KnownAddress::Unknown => false,
        }
    }

    fn record_post_segment_address(&mut self, segment_id: usize, address: u32) {
        if !self
            .post_segment_addresses
            .entry(segment_id)
            .or_default()
            .insert(address)
        {
            return;
        }

        let segment_end = self
            .segments
            .get(segment_id)
            .map(|s| s.end_address().wrapping_sub(1));

        if let Some(index) = segment_end.and_then(|end| self.blocks.lookup_by_address(end)) {
            self.blocks.mark_dirty(index);
        }
    }

    /// Name an address.
    ///
    /// Fails if the address is unknown or the name is already used
    /// elsewhere.
    pub fn set_symbol_for_address(&mut self, address: u32, name: &str) -> bool {
        if !self.check_known_address(address) {
            return false;
        }

        if self.symbols.values().any(|existing| existing == name) {
            return false;
        }

        debug!("Symbol {} at {:08X}", name, address);
        self.symbols.insert(address, name.to_string());

        true
    }

    /// Recalculate the line numbers of every block that has changed.
    pub(super) fn refresh_line_numbers(&mut self) {
        let context = LineContext {
            segments: &self.segments,
            has_segment_headers: self.handler.has_segment_headers(),
            post_segment_addresses: &self.post_segment_addresses,
        };

        self.blocks
            .recalculate_line_numbers(|block| context.line_count(block));
    }

    fn line_context(&self) -> LineContext<'_> {
        LineContext {
            segments: &self.segments,
            has_segment_headers: self.handler.has_segment_headers(),
            post_segment_addresses: &self.post_segment_addresses,
        }
    }

    /// Number of lines the block at `index` is displayed as.
    pub fn block_line_count(&self, index: usize) -> Option<usize> {
        let block = self.blocks.get(index)?;

        Some(
            block
                .line_count()
                .unwrap_or_else(|| self.line_context().line_count(block)),
        )
    }

    /// Number of lines the whole program is displayed as.
    pub fn line_count(&self) -> usize {
        self.blocks.total_line_count()
    }

    pub fn lookup_block_by_address(&self, address: u32) -> Option<(usize, &SegmentBlock)> {
        let index = self.blocks.lookup_by_address(address)?;

        self.blocks.get(index).map(|b| (index, b))
    }

    pub fn lookup_block_by_line_number(&self, line_number: usize) -> Option<(usize, &SegmentBlock)> {
        let index = self.blocks.lookup_by_line_number(line_number)?;

        self.blocks.get(index).map(|b| (index, b))
    }

    /// The line an address is displayed on.
    ///
    /// Addresses inside an instruction resolve to that instruction's line.
    pub fn line_number_for_address(&self, address: u32) -> Option<usize> {
        let (index, block) = self.lookup_block_by_address(address)?;
        let context = self.line_context();
        let mut line = self.blocks.line_number(index)? + context.header_line_count(block);

        if !block.contains(address) {
            let position = context
                .post_segment_addresses(block)
                .iter()
                .position(|&a| a == address)?;

            return Some(line + context.body_line_count(block) + position);
        }

        let offset = address - block.address;

        match &block.line_data {
            LineData::Code(lines) => {
                for code_line in lines.iter() {
                    if let CodeLine::Instruction {
                        offset: start,
                        length,
                    } = code_line
                    {
                        if offset >= *start && offset - start < *length {
                            return Some(line);
                        }
                    }

                    line += 1;
                }

                None
            }
            LineData::Ascii(runs) => runs
                .iter()
                .position(|r| offset >= r.offset && offset - r.offset < r.length)
                .map(|i| line + i),
            LineData::None => {
                let mut block_offset = 0;

                for size in block.data_type_sizes() {
                    let span = size.unit_size * size.count;

                    if offset < block_offset + span {
                        let unit = if block.flags.is_alloc() {
                            0
                        } else {
                            ((offset - block_offset) / size.unit_size) as usize
                        };

                        return Some(line + unit);
                    }

                    block_offset += span;
                    line += size.lines;
                }

                None
            }
        }
    }

    /// The address displayed on a line, if the line shows one.
    pub fn address_for_line_number(&self, line_number: usize) -> Option<u32> {
        let (index, block) = self.lookup_block_by_line_number(line_number)?;
        let context = self.line_context();
        let body_line0 = self.blocks.line_number(index)? + context.header_line_count(block);
        let mut relative = line_number.checked_sub(body_line0)?;

        let found = match &block.line_data {
            LineData::Code(lines) => lines.get(relative).map(|l| l.offset()),
            LineData::Ascii(runs) => runs.get(relative).map(|r| r.offset),
            LineData::None => {
                let mut block_offset = 0;
                let mut found = None;

                for size in block.data_type_sizes() {
                    if relative < size.lines {
                        let unit = if block.flags.is_alloc() {
                            0
                        } else {
                            relative as u32 * size.unit_size
                        };

                        found = Some(block_offset + unit);
                        break;
                    }

                    relative -= size.lines;
                    block_offset += size.unit_size * size.count;
                }

                found
            }
        };

        if let Some(offset) = found {
            return Some(block.address + offset);
        }

        let relative = line_number - body_line0;
        let post = relative.checked_sub(context.body_line_count(block))?;

        context.post_segment_addresses(block).get(post).copied()
    }

    /// Split the block containing `address` so that a block starts there.
    ///
    /// Returns the index of the new block.
    pub fn split_block(&mut self, address: u32) -> result::Result<usize, SplitError> {
        let result = self.split_block_at(address, false);
        self.refresh_line_numbers();

        result
    }

    /// Split the block containing `address`.
    ///
    /// With `own_midinstruction`, an address inside an instruction is
    /// instead recorded as a label relative to that instruction; the split
    /// still fails.
    pub(super) fn split_block_at(
        &mut self,
        address: u32,
        own_midinstruction: bool,
    ) -> result::Result<usize, SplitError> {
        let index = self
            .blocks
            .lookup_by_address(address)
            .ok_or(SplitError::OutOfBounds)?;
        let (segment_id, block_address, block_length, data_type) = {
            let block = self.blocks.get(index).ok_or(SplitError::OutOfBounds)?;

            (
                block.segment_id,
                block.address,
                block.length,
                block.data_type(),
            )
        };

        if block_address == address {
            return Err(SplitError::Existing);
        }

        let in_segment = self
            .segments
            .get(segment_id)
            .map_or(false, |s| s.contains(address));
        if !in_segment || address >= block_address.wrapping_add(block_length) {
            debug!("Tried to split at out of bounds address {:08X}", address);
            return Err(SplitError::OutOfBounds);
        }

        let split_offset = address - block_address;
        let block = self
            .blocks
            .get_mut(index)
            .ok_or(SplitError::OutOfBounds)?;

        let tail_lines = match block.split_code_lines(split_offset) {
            Some(lines) => lines,
            None => {
                if own_midinstruction {
                    if let Some(i) = block.instruction_at(split_offset) {
                        if let LineData::Code(lines) = &mut block.line_data {
                            lines.insert(i + 1, CodeLine::RelativeEqu {
                                offset: split_offset,
                            });
                        }
                    }

                    self.blocks.mark_dirty(index);
                } else {
                    debug!("Not splitting mid-instruction at {:08X}", address);
                }

                return Err(SplitError::MidInstruction);
            }
        };

        if data_type == Some(DataType::Code) && address & 1 != 0 {
            debug!("Splitting code block at odd address {:08X}", address);
        }

        let reference_split = block
            .references
            .iter()
            .position(|r| r.source >= address)
            .unwrap_or_else(|| block.references.len());
        let tail_references = block.references.split_off(reference_split);

        block.length = split_offset;
        block.flags = block.flags.split();
        self.blocks.renumber(index);

        let mut tail = self
            .blocks
            .copy_block(index)
            .ok_or(SplitError::OutOfBounds)?;
        tail.segment_offset += split_offset;
        tail.address = address;
        tail.length = block_length - split_offset;
        tail.references = tail_references;
        tail.line_data = match data_type {
            Some(DataType::Code) => LineData::Code(tail_lines),
            _ => LineData::None,
        };

        let tail_index = self.blocks.insert(index + 1, tail);
        self.blocks.mark_dirty(index);

        if data_type == Some(DataType::Ascii) {
            self.process_block_as_ascii(index);
            self.process_block_as_ascii(tail_index);
        }

        self.emit_created(tail_index);

        Ok(tail_index)
    }

    /// Divide an ASCII block's bytes into display lines.
    pub(super) fn process_block_as_ascii(&mut self, index: usize) {
        let (segment_id, segment_offset, length) = match self.blocks.get(index) {
            Some(b) => (b.segment_id, b.segment_offset, b.length),
            None => return,
        };
        let runs = ascii_runs(
            self.segment_data(segment_id),
            segment_offset as usize,
            length,
        );

        if let Some(block) = self.blocks.get_mut(index) {
            block.line_data = LineData::Ascii(runs);
        }

        self.blocks.mark_dirty(index);
    }

    /// Give the block at `index` a new data type.
    ///
    /// Code blocks take the decoded `lines`; other types rebuild their own
    /// line data and are marked as not yet processed.
    pub(super) fn set_block_data(
        &mut self,
        index: usize,
        data_type: DataType,
        lines: Vec<CodeLine>,
        old_length: u32,
    ) {
        let (address, old) = match self.blocks.get_mut(index) {
            Some(block) => {
                let old = block.data_type();

                block.flags.set_data_type(data_type);
                block.line_data = match data_type {
                    DataType::Code => LineData::Code(lines),
                    _ => {
                        block.flags.set_processed(false);
                        LineData::None
                    }
                };

                (block.address, old)
            }
            None => return,
        };

        if data_type == DataType::Ascii {
            self.process_block_as_ascii(index);
        }

        self.blocks.mark_dirty(index);
        self.emit(BlockEvent::DataTypeChanged {
            address,
            old,
            new: data_type,
            old_length,
        });
    }

    /// Scan every non-code block for values that look like addresses.
    pub(super) fn cache_uncertain_data_references(&mut self) {
        let space = self.address_space();
        let blocks = &self.blocks;

        let scans: Vec<(usize, Vec<UncertainReference>, Vec<(usize, u32)>)> = (0..blocks.len())
            .into_par_iter()
            .filter_map(|index| {
                let block = blocks.get(index)?;
                if block.data_type() == Some(DataType::Code) {
                    return None;
                }

                let (references, post_segment) = space.locate_data_references(block);
                Some((index, references, post_segment))
            })
            .collect();

        for (index, references, post_segment) in scans {
            if let Some(block) = self.blocks.get_mut(index) {
                block.references = references;
            }

            for (segment_id, address) in post_segment {
                self.record_post_segment_address(segment_id, address);
            }
        }
    }

    /// Rescan one non-code block for values that look like addresses.
    pub(super) fn refresh_data_references(&mut self, index: usize) {
        let (references, post_segment) = match self.blocks.get(index) {
            Some(block) => self.address_space().locate_data_references(block),
            None => return,
        };

        if let Some(block) = self.blocks.get_mut(index) {
            block.references = references;
        }

        for (segment_id, address) in post_segment {
            self.record_post_segment_address(segment_id, address);
        }
    }

    /// Addresses of blocks touched since the last call, without repeats.
    pub(super) fn take_touched(&mut self) -> Vec<u32> {
        let mut touched = mem::take(&mut self.touched);
        touched.sort_unstable();
        touched.dedup();

        touched
    }

    /// Log a problem found while reclassifying blocks.
    pub(super) fn report_split_error(&self, context: &str, address: u32, err: SplitError) {
        error!("{}: at {:08X} unexpected splitting error: {}", context, address, err);
    }
}
