//! Architecture trait

use crate::arch::ArchName;
use crate::memory::DataType;
use bitflags::bitflags;

bitflags! {
    /// Describes what kind of value an instruction operand produced.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct MatchFlags: u32 {
        /// The value is a location execution may continue at.
        const CODE = 1 << 0;
        /// The value is an absolute address.
        const ABSOLUTE_ADDRESS = 1 << 1;
        /// The value is an immediate constant which may or may not be an
        /// address.
        const CONSTANT_VALUE = 1 << 2;
        const UNCERTAIN = 1 << 3;
        const CERTAIN = 1 << 4;
    }
}

/// A value extracted from a decoded instruction that may be an address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MatchAddress {
    pub address: u32,

    /// Index of the operand the value came from.
    pub operand: usize,

    pub flags: MatchFlags,
}

impl MatchAddress {
    pub fn new(address: u32, operand: usize, flags: MatchFlags) -> Self {
        MatchAddress {
            address,
            operand,
            flags,
        }
    }
}

/// Why a symbol is being generated, for architectures which name their
/// default labels differently depending on what they label.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// A label on a block of the given type.
    Block(DataType),

    /// An address that lies outside every segment.
    OutOfBounds,

    /// An address that falls between the bytes of an instruction.
    MidInstruction,
}

/// Trait which represents all of the decoding methods a processor must
/// provide in order to classify code.
///
/// Implementations work on raw segment bytes; they never see blocks or any
/// other part of the program model.
pub trait Architecture {
    /// One decoded instruction.
    type Match: Clone;

    /// Which processor this decoder handles.
    fn processor(&self) -> ArchName;

    /// Decode the instruction at `offset` within `data`, which will execute
    /// at `address`.
    ///
    /// Returns the decoded instruction and the number of bytes it occupies,
    /// or `None` if no valid instruction lies there.
    fn disassemble_one_line(
        &self,
        data: &[u8],
        offset: usize,
        address: u32,
    ) -> Option<(Self::Match, usize)>;

    /// For bytes `disassemble_one_line` rejected, report how many of them are
    /// a recognisable but undecodable instruction that should be left as
    /// data. Zero means the bytes are not understood at all.
    fn disassemble_as_data(&self, data: &[u8], offset: usize) -> usize;

    /// Determine if execution cannot continue past this instruction.
    ///
    /// `preceding` is the instruction before it in the same block, for
    /// processors with delay slots.
    fn is_final_instruction(&self, instr: &Self::Match, preceding: Option<&Self::Match>) -> bool;

    /// Every operand value of the instruction which might be an address.
    fn match_addresses(&self, instr: &Self::Match) -> Vec<MatchAddress>;

    /// Number of operands the instruction has.
    fn operand_count(&self, instr: &Self::Match) -> usize;

    /// Render the instruction mnemonic.
    fn instruction_string(&self, instr: &Self::Match) -> String;

    /// Render one operand, substituting symbol names where `lookup_symbol`
    /// knows one for an address.
    fn operand_string(
        &self,
        instr: &Self::Match,
        operand: usize,
        lookup_symbol: &dyn Fn(u32) -> Option<String>,
    ) -> String;

    /// Whether the operand holds a full pointer-width value.
    fn is_operand_pointer_sized(&self, instr: &Self::Match, operand: usize) -> bool;

    /// Generate a label for an address that has no symbol yet.
    fn default_symbol_name(&self, address: u32, kind: SymbolKind) -> String;

    /// Render a value of a numeric data block.
    fn data_value_string(&self, value: u32, data_type: DataType) -> String {
        match data_type {
            DataType::Data08 => format!("${:02X}", value),
            DataType::Data16 => format!("${:04X}", value),
            _ => format!("${:08X}", value),
        }
    }

    /// Render a whole instruction line: mnemonic and comma separated operands.
    fn line_string(&self, instr: &Self::Match, lookup_symbol: &dyn Fn(u32) -> Option<String>) -> String {
        let mut line = self.instruction_string(instr);

        for operand in 0..self.operand_count(instr) {
            line.push_str(if operand == 0 { " " } else { ", " });
            line.push_str(&self.operand_string(instr, operand, lookup_symbol));
        }

        line
    }
}
