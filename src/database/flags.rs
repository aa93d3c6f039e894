//! Bit packed block flags
//!
//! The low bits of a block's flags hold its data type tag, using as few bits
//! as the largest tag needs. Two single bits above those mark blocks with no
//! file data behind them and blocks that have already been decoded. The
//! layout is computed once from the set of data types.

use crate::memory::{DataType, DATA_TYPE_SIZES};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Positions of every field within block flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlagLayout {
    pub data_type_bits: u32,
    pub data_type_mask: u32,

    /// Set on blocks with no backing file data.
    pub alloc: u32,

    /// Set on blocks analysis has already decoded.
    pub processed: u32,

    /// The flags that survive a block being split.
    pub split_mask: u32,
}

impl FlagLayout {
    fn new(max_tag: u8) -> Self {
        let data_type_bits = 8 - max_tag.leading_zeros();
        let data_type_mask = (1 << data_type_bits) - 1;
        let alloc = 1 << data_type_bits;
        let processed = 1 << (data_type_bits + 1);

        FlagLayout {
            data_type_bits,
            data_type_mask,
            alloc,
            processed,
            split_mask: alloc | data_type_mask | processed,
        }
    }
}

lazy_static! {
    pub static ref FLAG_LAYOUT: FlagLayout = FlagLayout::new(DataType::max_tag());

    /// For each numeric data type, the sizes that may be used to lay out a
    /// block of that type, widest first.
    pub static ref DESCENDING_DATA_TYPE_SIZES: HashMap<DataType, Vec<(DataType, u32)>> = {
        let mut sizes = HashMap::new();

        for (i, (data_type, _)) in DATA_TYPE_SIZES.iter().enumerate() {
            sizes.insert(*data_type, DATA_TYPE_SIZES[i..].to_vec());
        }

        sizes
    };
}

/// The flags of one block.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockFlags(u32);

impl BlockFlags {
    pub fn from_bits(bits: u32) -> Self {
        BlockFlags(bits)
    }

    /// Flags carrying nothing but a data type.
    pub fn for_data_type(data_type: DataType) -> Self {
        let mut flags = BlockFlags::default();
        flags.set_data_type(data_type);

        flags
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// The data type tagged in the flags, if the tag is a known one.
    pub fn data_type(self) -> Option<DataType> {
        DataType::from_tag(self.0 & FLAG_LAYOUT.data_type_mask)
    }

    /// Replace the data type, leaving every other bit alone.
    pub fn set_data_type(&mut self, data_type: DataType) {
        let mask = FLAG_LAYOUT.data_type_mask;

        self.0 = (self.0 & !mask) | (data_type.tag() as u32 & mask);
    }

    pub fn is_alloc(self) -> bool {
        self.0 & FLAG_LAYOUT.alloc != 0
    }

    pub fn set_alloc(&mut self, alloc: bool) {
        self.set_bit(FLAG_LAYOUT.alloc, alloc);
    }

    pub fn is_processed(self) -> bool {
        self.0 & FLAG_LAYOUT.processed != 0
    }

    pub fn set_processed(&mut self, processed: bool) {
        self.set_bit(FLAG_LAYOUT.processed, processed);
    }

    /// The flags each half of a split block inherits.
    pub fn split(self) -> Self {
        BlockFlags(self.0 & FLAG_LAYOUT.split_mask)
    }

    fn set_bit(&mut self, bit: u32, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}
