//! Segment blocks and the list that owns them

use crate::database::{BlockEvent, BlockFlags, DESCENDING_DATA_TYPE_SIZES};
use crate::memory::DataType;
use serde::{Deserialize, Serialize};

/// One line of a code block.
///
/// Offsets are relative to the start of the block. Instructions are stored
/// by position only; they are decoded again whenever they need rendering.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeLine {
    Instruction { offset: u32, length: u32 },

    /// A label that points into the middle of the preceding instruction.
    RelativeEqu { offset: u32 },
}

impl CodeLine {
    pub fn offset(&self) -> u32 {
        match self {
            CodeLine::Instruction { offset, .. } => *offset,
            CodeLine::RelativeEqu { offset } => *offset,
        }
    }

    fn rebase(self, by: u32) -> Self {
        match self {
            CodeLine::Instruction { offset, length } => CodeLine::Instruction {
                offset: offset - by,
                length,
            },
            CodeLine::RelativeEqu { offset } => CodeLine::RelativeEqu {
                offset: offset - by,
            },
        }
    }
}

/// One line of an ASCII block: a run of bytes relative to the block start.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsciiRun {
    pub offset: u32,
    pub length: u32,
}

/// Per-line metadata of a block, which depends on its data type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineData {
    None,
    Code(Vec<CodeLine>),
    Ascii(Vec<AsciiRun>),
}

impl Default for LineData {
    fn default() -> Self {
        LineData::None
    }
}

/// A value inside a block that looks like an address, but which analysis
/// has not confirmed is one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncertainReference {
    /// Address of the instruction or data holding the value.
    pub source: u32,

    pub target: u32,

    /// The line the value was found on.
    pub text: String,
}

/// One run of equally sized units in the layout of a numeric data block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DataTypeSize {
    pub data_type: DataType,
    pub unit_size: u32,
    pub count: u32,
    pub lines: usize,
}

/// A contiguous, typed region of one segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentBlock {
    pub(super) sequence_id: u64,
    pub(super) segment_id: usize,
    pub(super) segment_offset: u32,
    pub(super) address: u32,
    pub(super) length: u32,
    pub(super) flags: BlockFlags,
    pub(super) line_data: LineData,

    #[serde(skip)]
    pub(super) line_count: Option<usize>,

    #[serde(default)]
    pub(super) references: Vec<UncertainReference>,
}

impl SegmentBlock {
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn segment_id(&self) -> usize {
        self.segment_id
    }

    pub fn segment_offset(&self) -> u32 {
        self.segment_offset
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn end_address(&self) -> u32 {
        self.address.wrapping_add(self.length)
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.address && address - self.address < self.length
    }

    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.flags.data_type()
    }

    pub fn line_data(&self) -> &LineData {
        &self.line_data
    }

    /// Cached line count, if it has been computed since the block last
    /// changed.
    pub fn line_count(&self) -> Option<usize> {
        self.line_count
    }

    pub fn references(&self) -> &[UncertainReference] {
        &self.references
    }

    /// Lay the block out as the widest units its data type allows, falling
    /// back to narrower ones for any remainder.
    ///
    /// Blocks without file data show each run of units as a single line.
    pub fn data_type_sizes(&self) -> Vec<DataTypeSize> {
        let sizes = match self
            .data_type()
            .and_then(|t| DESCENDING_DATA_TYPE_SIZES.get(&t))
        {
            Some(sizes) => sizes,
            None => return Vec::new(),
        };

        let mut unconsumed = self.length;
        let mut layout = Vec::new();

        for &(data_type, unit_size) in sizes.iter() {
            let count = unconsumed / unit_size;
            if count == 0 {
                continue;
            }

            let lines = if self.flags.is_alloc() {
                1
            } else {
                count as usize
            };

            layout.push(DataTypeSize {
                data_type,
                unit_size,
                count,
                lines,
            });
            unconsumed -= count * unit_size;
        }

        layout
    }

    pub(super) fn created_event(&self) -> BlockEvent {
        BlockEvent::Created {
            address: self.address,
            length: self.length,
            data_type: self.data_type(),
        }
    }

    /// Divide this block's code lines at `split_offset`.
    ///
    /// Returns the lines which belong to the tail, rebased to it, or
    /// `None` if the offset falls inside an instruction. In that case the
    /// block is left untouched.
    pub(super) fn split_code_lines(&mut self, split_offset: u32) -> Option<Vec<CodeLine>> {
        let lines = match &mut self.line_data {
            LineData::Code(lines) => lines,
            _ => return Some(Vec::new()),
        };

        let mut consumed = 0;
        let mut split_index = lines.len();

        for (i, line) in lines.iter().enumerate() {
            if let CodeLine::Instruction { length, .. } = line {
                if consumed == split_offset {
                    split_index = i;
                    break;
                }

                consumed += length;
                if split_offset < consumed {
                    return None;
                }
            }
        }

        Some(
            lines
                .split_off(split_index)
                .into_iter()
                .map(|l| l.rebase(split_offset))
                .collect(),
        )
    }

    /// Find the instruction containing `offset`, for blocks of code.
    pub(super) fn instruction_at(&self, offset: u32) -> Option<usize> {
        match &self.line_data {
            LineData::Code(lines) => lines.iter().position(|l| match l {
                CodeLine::Instruction {
                    offset: start,
                    length,
                } => offset >= *start && offset - start < *length,
                _ => false,
            }),
            _ => None,
        }
    }
}

/// Owner of every block in a program, ordered by address.
///
/// Blocks are addressed by their index in the list. The address and line
/// number indexes are derived data, rebuilt from the first dirty index
/// onwards whenever a block changes size or position.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockList {
    blocks: Vec<SegmentBlock>,

    /// The sequence id the next allocated block receives.
    next_sequence_id: u64,

    #[serde(skip)]
    addresses: Vec<u32>,

    #[serde(skip)]
    line0s: Vec<usize>,

    #[serde(skip)]
    dirty: Option<usize>,
}

impl BlockList {
    pub fn new() -> Self {
        BlockList::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SegmentBlock> {
        self.blocks.get(index)
    }

    pub(super) fn get_mut(&mut self, index: usize) -> Option<&mut SegmentBlock> {
        self.blocks.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentBlock> {
        self.blocks.iter()
    }

    pub(super) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SegmentBlock> {
        self.blocks.iter_mut()
    }

    /// Allocate a new block at the end of the list.
    pub(super) fn push(
        &mut self,
        segment_id: usize,
        segment_offset: u32,
        address: u32,
        length: u32,
        flags: BlockFlags,
    ) -> usize {
        let block = SegmentBlock {
            sequence_id: self.allocate_sequence_id(),
            segment_id,
            segment_offset,
            address,
            length,
            flags,
            line_data: LineData::None,
            line_count: None,
            references: Vec::new(),
        };

        self.insert(self.blocks.len(), block)
    }

    /// Copy the block at `index` into a new block with its own sequence id.
    ///
    /// The copy is not part of the list until it is inserted.
    pub(super) fn copy_block(&mut self, index: usize) -> Option<SegmentBlock> {
        let sequence_id = self.allocate_sequence_id();
        let mut block = self.blocks.get(index)?.clone();

        block.sequence_id = sequence_id;
        block.line_count = None;

        Some(block)
    }

    /// Give the block at `index` a fresh sequence id.
    pub(super) fn renumber(&mut self, index: usize) {
        let sequence_id = self.allocate_sequence_id();

        if let Some(block) = self.blocks.get_mut(index) {
            block.sequence_id = sequence_id;
        }
    }

    pub(super) fn insert(&mut self, index: usize, block: SegmentBlock) -> usize {
        self.addresses.insert(index, block.address);
        self.line0s.insert(index, 0);
        self.blocks.insert(index, block);
        self.mark_dirty(index);

        index
    }

    fn allocate_sequence_id(&mut self) -> u64 {
        let id = self.next_sequence_id;
        self.next_sequence_id += 1;

        id
    }

    /// Forget the cached line count of a block and everything after it.
    pub(super) fn mark_dirty(&mut self, index: usize) {
        if let Some(block) = self.blocks.get_mut(index) {
            block.line_count = None;
        }

        self.dirty = Some(self.dirty.map_or(index, |d| d.min(index)));
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// Index of the block containing `address`.
    ///
    /// Addresses past the end of the last block resolve to the last block;
    /// addresses before the first block resolve to nothing.
    pub fn lookup_by_address(&self, address: u32) -> Option<usize> {
        self.addresses
            .partition_point(|&a| a <= address)
            .checked_sub(1)
    }

    /// Index of the block displayed on `line_number`.
    ///
    /// Only valid once line numbers have been recalculated.
    pub fn lookup_by_line_number(&self, line_number: usize) -> Option<usize> {
        self.line0s
            .partition_point(|&l| l <= line_number)
            .checked_sub(1)
    }

    /// The first line of the block at `index`.
    pub fn line_number(&self, index: usize) -> Option<usize> {
        self.line0s.get(index).copied()
    }

    /// Recompute line numbers from the first dirty block onwards.
    ///
    /// `line_count` is asked for the size of any block whose cached count has
    /// been forgotten.
    pub(super) fn recalculate_line_numbers<F>(&mut self, mut line_count: F)
    where
        F: FnMut(&SegmentBlock) -> usize,
    {
        let dirty = match self.dirty.take() {
            Some(dirty) => dirty,
            None => return,
        };

        let mut line0 = match dirty.checked_sub(1) {
            Some(prev) => self.line0s[prev] + self.blocks[prev].line_count.unwrap_or(0),
            None => 0,
        };

        for i in dirty..self.blocks.len() {
            let count = match self.blocks[i].line_count {
                Some(count) => count,
                None => {
                    let count = line_count(&self.blocks[i]);
                    self.blocks[i].line_count = Some(count);
                    count
                }
            };

            self.line0s[i] = line0;
            line0 += count;
        }
    }

    /// Total number of lines across every block.
    pub fn total_line_count(&self) -> usize {
        match self.blocks.last() {
            Some(last) => self.line0s[self.blocks.len() - 1] + last.line_count.unwrap_or(0),
            None => 0,
        }
    }

    /// Rebuild every derived index, as required after deserializing.
    pub(super) fn rebuild_indexes(&mut self) {
        self.addresses = self.blocks.iter().map(|b| b.address).collect();
        self.line0s = vec![0; self.blocks.len()];

        for block in self.blocks.iter_mut() {
            block.line_count = None;
        }

        self.dirty = Some(0);
    }
}
