//! Code analysis: following execution through a program and classifying
//! the blocks it reaches.

use crate::arch::{Architecture, MatchAddress, MatchFlags, SymbolKind};
use crate::database::{
    CodeLine, Error, LineData, NoProgress, ProgramData, ProgramState, Progress, Result,
    SplitError, UncertainReference,
};
use crate::memory::DataType;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Collapse the matches of one instruction so each address appears once.
fn reduce_matches(matches: Vec<MatchAddress>) -> Vec<MatchAddress> {
    let mut reduced = BTreeMap::new();

    for m in matches {
        reduced.insert(m.address, m);
    }

    reduced.into_iter().map(|(_, m)| m).collect()
}

/// A trailing piece to cut off a block that could not be decoded in full.
struct TrailingSplit {
    address: u32,
    processed: bool,

    /// Try to decode the piece as code afterwards.
    disassemble: bool,
}

impl ProgramData {
    /// Discover the program's code by following execution from its entry
    /// point and every relocated address.
    ///
    /// Blocks reached are decoded into code, references are recorded, and
    /// every referenced address is given a label.
    pub fn analyse<A>(&mut self, arch: &A, progress: &mut dyn Progress) -> Result<()>
    where
        A: Architecture,
    {
        if self.state != ProgramState::Loaded {
            return Err(Error::InvalidState(self.state));
        }

        if let Some(processor) = self.processor {
            if processor.family() != arch.processor().family() {
                warn!(
                    "Analysing {} program with a {} decoder",
                    processor,
                    arch.processor()
                );
            }
        }

        let entry_address = self.entry_address().ok_or_else(|| {
            Error::ValidationFailed(format!(
                "entry point lies in missing segment {}",
                self.entry_point.segment_id
            ))
        })?;

        let existing_symbols: Vec<u32> = self.symbols.keys().copied().collect();
        let mut pending: BTreeSet<u32> = self.relocated_addresses.keys().copied().collect();
        pending.insert(entry_address);

        self.touched.clear();
        self.process_address_as_code(arch, entry_address, &mut pending, progress)?;

        for address in existing_symbols {
            match self.split_block_at(address, false) {
                Ok(_) | Err(SplitError::Existing) | Err(SplitError::MidInstruction) => {}
                Err(err) => self.report_split_error("Analysis", address, err),
            }
        }

        self.cache_uncertain_references(arch);
        self.touched.clear();
        self.refresh_line_numbers();

        let code_blocks = self
            .blocks
            .iter()
            .filter(|b| b.data_type() == Some(DataType::Code))
            .count();
        info!(
            "Analysed {}: {} of {} blocks are code, {} symbols",
            self.file_name,
            code_blocks,
            self.blocks.len(),
            self.symbols.len()
        );

        Ok(())
    }

    /// Change the data type of the program at `address`.
    ///
    /// The containing block is split so that the change starts exactly at
    /// `address`. Changing to code decodes as much as possible from there,
    /// which may in turn reclassify other blocks; a failure to decode
    /// anything leaves the block as it was.
    pub fn set_data_type_at_address<A>(
        &mut self,
        arch: &A,
        address: u32,
        data_type: DataType,
    ) -> Result<()>
    where
        A: Architecture,
    {
        if self.state != ProgramState::Loaded {
            return Err(Error::InvalidState(self.state));
        }

        let index = self
            .blocks
            .lookup_by_address(address)
            .ok_or(SplitError::OutOfBounds)?;
        let (current, old_length) = match self.blocks.get(index) {
            Some(block) => (block.data_type(), block.length),
            None => return Err(SplitError::OutOfBounds.into()),
        };

        if current == Some(data_type) {
            return Ok(());
        }

        self.touched.clear();

        let index = match self.split_block_at(address, false) {
            Ok(index) => index,
            Err(SplitError::Existing) => index,
            Err(err) => {
                self.refresh_line_numbers();
                return Err(err.into());
            }
        };

        if data_type == DataType::Code {
            if let Some(block) = self.blocks.get_mut(index) {
                block.flags.set_processed(false);
            }

            let mut pending = BTreeSet::new();
            self.process_address_as_code(arch, address, &mut pending, &mut NoProgress)?;
        } else {
            self.set_block_data(index, data_type, Vec::new(), old_length);
        }

        for touched in self.take_touched() {
            let index = match self.blocks.lookup_by_address(touched) {
                Some(index) => index,
                None => continue,
            };

            match self.blocks.get(index).map(|b| (b.address, b.data_type())) {
                Some((start, Some(DataType::Code))) if start == touched => {
                    let references = self.locate_code_references(arch, index);

                    if let Some(block) = self.blocks.get_mut(index) {
                        block.references = references;
                    }
                }
                Some((start, _)) if start == touched => self.refresh_data_references(index),
                _ => {}
            }
        }

        self.touched.clear();
        self.refresh_line_numbers();
        debug!("Changed data type at {:08X} to {}", address, data_type);

        Ok(())
    }

    /// Decode the program as code from `address` onwards, following every
    /// branch found along the way.
    ///
    /// Addresses that deserve a label are collected in `pending` and
    /// labelled once decoding is finished.
    pub(super) fn process_address_as_code<A>(
        &mut self,
        arch: &A,
        address: u32,
        pending: &mut BTreeSet<u32>,
        progress: &mut dyn Progress,
    ) -> Result<()>
    where
        A: Architecture,
    {
        let mut queue = BTreeSet::new();
        queue.insert(address);

        while let Some(address) = queue.pop_first() {
            if progress.should_abort() {
                return Err(Error::Aborted);
            }

            let index = match self.blocks.lookup_by_address(address) {
                Some(index) => index,
                None => {
                    debug!("No block holds code address {:08X}", address);
                    continue;
                }
            };
            let (containing_type, old_length) = match self.blocks.get(index) {
                Some(block) => (block.data_type(), block.length),
                None => continue,
            };

            let index = match self.split_block_at(address, false) {
                Ok(index) => index,
                Err(SplitError::Existing) => index,
                Err(err) => {
                    debug!("Not decoding code at {:08X}: {}", address, err);
                    continue;
                }
            };

            let (segment_id, segment_offset, length, processed) = match self.blocks.get(index) {
                Some(block) => (
                    block.segment_id,
                    block.segment_offset,
                    block.length,
                    block.flags.is_processed(),
                ),
                None => continue,
            };

            if containing_type == Some(DataType::Code) || processed {
                continue;
            }

            let mut lines = Vec::new();
            let mut instructions: Vec<(u32, u32, A::Match)> = Vec::new();
            let mut consumed = 0;
            let mut skip = 0;
            let mut terminated = false;

            {
                let data = self.segment_data(segment_id);

                while consumed < length {
                    let data_offset = (segment_offset + consumed) as usize;
                    let instr_address = address + consumed;

                    let (instr, size) =
                        match arch.disassemble_one_line(data, data_offset, instr_address) {
                            Some((instr, size)) => (instr, size as u32),
                            None => {
                                if data_offset >= data.len() {
                                    error!(
                                        "Unable to disassemble out of bounds data at {:08X} (started at {:08X})",
                                        instr_address, address
                                    );
                                    break;
                                }

                                skip = arch.disassemble_as_data(data, data_offset) as u32;
                                if skip == 0 {
                                    error!(
                                        "Unable to disassemble data at {:08X} (started at {:08X})",
                                        instr_address, address
                                    );
                                }
                                break;
                            }
                        };

                    if size == 0 || consumed + size > length {
                        error!(
                            "Instruction at {:08X} overruns its block (started at {:08X})",
                            instr_address, address
                        );
                        break;
                    }

                    lines.push(CodeLine::Instruction {
                        offset: consumed,
                        length: size,
                    });

                    for label_offset in 1..size {
                        if self.symbols.contains_key(&(instr_address + label_offset)) {
                            lines.push(CodeLine::RelativeEqu {
                                offset: consumed + label_offset,
                            });
                        }
                    }

                    consumed += size;
                    terminated =
                        arch.is_final_instruction(&instr, instructions.last().map(|(_, _, i)| i));
                    instructions.push((instr_address, size, instr));

                    if terminated {
                        break;
                    }
                }
            }

            if consumed < length {
                let block_end = address + length;
                let end = address + consumed;
                let mut splits = Vec::new();

                if terminated {
                    splits.push(TrailingSplit {
                        address: end,
                        processed: false,
                        disassemble: false,
                    });
                } else if skip > 0 {
                    splits.push(TrailingSplit {
                        address: end,
                        processed: true,
                        disassemble: false,
                    });
                    splits.push(TrailingSplit {
                        address: end.wrapping_add(skip),
                        processed: false,
                        disassemble: true,
                    });
                } else if consumed > 0 {
                    splits.push(TrailingSplit {
                        address: end,
                        processed: true,
                        disassemble: false,
                    });
                }

                let mut failed = false;

                for split in splits {
                    if split.address >= block_end {
                        if split.disassemble {
                            queue.insert(split.address);
                        }
                        continue;
                    }

                    let split_index = match self.split_block_at(split.address, false) {
                        Ok(split_index) => split_index,
                        Err(SplitError::Existing) => index,
                        Err(err) => {
                            self.report_split_error("Code processing", split.address, err);
                            failed = true;
                            break;
                        }
                    };
                    let split_length = self.blocks.get(split_index).map_or(0, |b| b.length);

                    self.set_block_data(split_index, DataType::Data32, Vec::new(), split_length);
                    if split.processed {
                        if let Some(block) = self.blocks.get_mut(split_index) {
                            block.flags.set_processed(true);
                        }
                    }

                    if split.disassemble {
                        queue.insert(split.address);
                    }
                }

                if failed {
                    if let Some(block) = self.blocks.get_mut(index) {
                        block.flags.set_processed(true);
                    }
                    continue;
                }
            }

            if let Some(block) = self.blocks.get_mut(index) {
                block.flags.set_processed(true);
            }

            if lines.is_empty() {
                continue;
            }

            self.set_block_data(index, DataType::Code, lines, old_length);

            let is_binary_file = self.load_options.is_binary_file;

            for (instr_address, size, instr) in instructions.iter() {
                let instr_end = instr_address + size;

                for m in reduce_matches(arch.match_addresses(instr)) {
                    if m.flags.contains(MatchFlags::CODE) {
                        queue.insert(m.address);
                        self.insert_branch_address(m.address, *instr_address, pending);
                    } else if m
                        .flags
                        .intersects(MatchFlags::ABSOLUTE_ADDRESS | MatchFlags::CONSTANT_VALUE)
                    {
                        if self.relocated_addresses.contains_key(&m.address) {
                            let relocated_within = self
                                .relocatable_addresses
                                .range(*instr_address..instr_end)
                                .next()
                                .is_some();

                            if relocated_within {
                                self.insert_reference_address(m.address, *instr_address, pending);
                            }
                        } else if is_binary_file
                            && self.check_known_address(m.address)
                            && arch.is_operand_pointer_sized(instr, m.operand)
                        {
                            self.insert_reference_address(m.address, *instr_address, pending);
                        }
                    } else if !m.flags.contains(MatchFlags::UNCERTAIN) {
                        if m.flags.contains(MatchFlags::CERTAIN)
                            || is_binary_file
                            || self.relocated_addresses.contains_key(&m.address)
                        {
                            self.insert_reference_address(m.address, *instr_address, pending);
                        } else {
                            debug!(
                                "Skipping reference from {:08X} to {:08X}",
                                instr_address, m.address
                            );
                        }
                    }
                }
            }

            if consumed == length && !terminated && skip == 0 {
                debug!(
                    "Code block at {:08X} runs into {:08X} without ending",
                    address,
                    address.wrapping_add(length)
                );
            }
        }

        for address in pending.iter() {
            self.process_pending_symbol_address(arch, *address);
        }

        Ok(())
    }

    fn insert_branch_address(&mut self, address: u32, source: u32, pending: &mut BTreeSet<u32>) -> bool {
        if !self.check_known_address(address) {
            return false;
        }

        self.branch_addresses
            .entry(address)
            .or_default()
            .insert(source);
        pending.insert(address);

        true
    }

    fn insert_reference_address(
        &mut self,
        address: u32,
        source: u32,
        pending: &mut BTreeSet<u32>,
    ) -> bool {
        if !self.check_known_address(address) {
            return false;
        }

        self.reference_addresses
            .entry(address)
            .or_default()
            .insert(source);
        pending.insert(address);

        true
    }

    /// The label given to an address nobody has named.
    ///
    /// Relocated addresses are marked with an `r` suffix.
    fn auto_label<A: Architecture>(&self, arch: &A, address: u32, kind: SymbolKind) -> String {
        let mut label = arch.default_symbol_name(address, kind);

        if self.relocated_addresses.contains_key(&address) {
            label.push('r');
        }

        label
    }

    /// Give a referenced address a label, splitting so that a block starts
    /// there when possible.
    fn process_pending_symbol_address<A: Architecture>(&mut self, arch: &A, address: u32) -> bool {
        if self.symbols.contains_key(&address) {
            return false;
        }

        let index = match self.split_block_at(address, true) {
            Ok(index) => Some(index),
            Err(SplitError::Existing) => self.blocks.lookup_by_address(address),
            Err(SplitError::OutOfBounds) => {
                let label = arch.default_symbol_name(address, SymbolKind::OutOfBounds);
                return self.set_symbol_for_address(address, &label);
            }
            Err(SplitError::MidInstruction) => {
                let label = arch.default_symbol_name(address, SymbolKind::MidInstruction);
                return self.set_symbol_for_address(address, &label);
            }
        };

        let data_type = index
            .and_then(|i| self.blocks.get(i))
            .and_then(|b| b.data_type())
            .unwrap_or(DataType::Data32);
        let label = self.auto_label(arch, address, SymbolKind::Block(data_type));

        self.set_symbol_for_address(address, &label)
    }

    /// Recompute the uncertain references of every block.
    ///
    /// Code blocks are checked through the decoder. Data blocks are only
    /// scanned for binary files, which have no relocations to go by.
    pub(super) fn cache_uncertain_references<A: Architecture>(&mut self, arch: &A) {
        for index in 0..self.blocks.len() {
            if self.blocks.get(index).and_then(|b| b.data_type()) != Some(DataType::Code) {
                continue;
            }

            let references = self.locate_code_references(arch, index);
            if let Some(block) = self.blocks.get_mut(index) {
                block.references = references;
            }
        }

        if self.load_options.is_binary_file {
            self.cache_uncertain_data_references();
        }
    }

    /// Operand values of a code block's instructions that may be addresses.
    fn locate_code_references<A: Architecture>(&self, arch: &A, index: usize) -> Vec<UncertainReference> {
        let mut references = Vec::new();
        let block = match self.blocks.get(index) {
            Some(block) => block,
            None => return references,
        };
        let lines = match &block.line_data {
            LineData::Code(lines) => lines,
            _ => return references,
        };

        let data = self.segment_data(block.segment_id);
        let is_binary_file = self.load_options.is_binary_file;
        let lookup_symbol = |address: u32| self.symbols.get(&address).cloned();

        for line in lines.iter() {
            let offset = match line {
                CodeLine::Instruction { offset, .. } => *offset,
                CodeLine::RelativeEqu { .. } => continue,
            };
            let address = block.address + offset;
            let data_offset = (block.segment_offset + offset) as usize;

            let instr = match arch.disassemble_one_line(data, data_offset, address) {
                Some((instr, _)) => instr,
                None => {
                    warn!("Code at {:08X} no longer decodes", address);
                    continue;
                }
            };

            for m in reduce_matches(arch.match_addresses(&instr)) {
                let candidate = if is_binary_file {
                    m.flags
                        .intersects(MatchFlags::ABSOLUTE_ADDRESS | MatchFlags::CONSTANT_VALUE)
                } else if !self.relocated_addresses.contains_key(&m.address) {
                    m.flags.contains(MatchFlags::ABSOLUTE_ADDRESS)
                } else {
                    false
                };

                if candidate {
                    references.push(UncertainReference {
                        source: address,
                        target: m.address,
                        text: arch.line_string(&instr, &lookup_symbol),
                    });
                }
            }
        }

        references
    }
}
