//! Types to represent endianness, and the sized-value codec built on top of
//! them.

use crate::memory::{DataType, Error, Result};
use serde::{Deserialize, Serialize};
use std::convert::TryInto;

/// Indicates the byte (or memory unit) order when reading words from memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    /// Words are stored in memory least significant bit first.
    ///
    /// This is "backwards" compared to how English writes numbers.
    LittleEndian,

    /// Words are stored in memory most significant bit first.
    ///
    /// This is the same order as how English writes numbers.
    BigEndian,
}

/// Borrow `N` bytes of `buffer` starting at `offset`.
fn window<const N: usize>(buffer: &[u8], offset: usize) -> Result<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| buffer.get(offset..end))
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::OutOfRange {
            offset,
            wanted: N,
            available: buffer.len(),
        })
}

/// Mutably borrow `N` bytes of `buffer` starting at `offset`.
fn window_mut<const N: usize>(buffer: &mut [u8], offset: usize) -> Result<&mut [u8]> {
    let available = buffer.len();

    match offset.checked_add(N) {
        Some(end) if end <= available => Ok(&mut buffer[offset..end]),
        _ => Err(Error::OutOfRange {
            offset,
            wanted: N,
            available,
        }),
    }
}

impl Endianness {
    pub fn read_u8(self, buffer: &[u8], offset: usize) -> Result<u8> {
        Ok(window::<1>(buffer, offset)?[0])
    }

    pub fn read_i8(self, buffer: &[u8], offset: usize) -> Result<i8> {
        Ok(self.read_u8(buffer, offset)? as i8)
    }

    pub fn read_u16(self, buffer: &[u8], offset: usize) -> Result<u16> {
        let bytes = window::<2>(buffer, offset)?;

        Ok(match self {
            Endianness::LittleEndian => u16::from_le_bytes(bytes),
            Endianness::BigEndian => u16::from_be_bytes(bytes),
        })
    }

    pub fn read_i16(self, buffer: &[u8], offset: usize) -> Result<i16> {
        Ok(self.read_u16(buffer, offset)? as i16)
    }

    pub fn read_u32(self, buffer: &[u8], offset: usize) -> Result<u32> {
        let bytes = window::<4>(buffer, offset)?;

        Ok(match self {
            Endianness::LittleEndian => u32::from_le_bytes(bytes),
            Endianness::BigEndian => u32::from_be_bytes(bytes),
        })
    }

    pub fn read_i32(self, buffer: &[u8], offset: usize) -> Result<i32> {
        Ok(self.read_u32(buffer, offset)? as i32)
    }

    pub fn write_u8(self, buffer: &mut [u8], offset: usize, value: u8) -> Result<()> {
        window_mut::<1>(buffer, offset)?[0] = value;

        Ok(())
    }

    pub fn write_i8(self, buffer: &mut [u8], offset: usize, value: i8) -> Result<()> {
        self.write_u8(buffer, offset, value as u8)
    }

    pub fn write_u16(self, buffer: &mut [u8], offset: usize, value: u16) -> Result<()> {
        let bytes = match self {
            Endianness::LittleEndian => value.to_le_bytes(),
            Endianness::BigEndian => value.to_be_bytes(),
        };

        window_mut::<2>(buffer, offset)?.copy_from_slice(&bytes);

        Ok(())
    }

    pub fn write_i16(self, buffer: &mut [u8], offset: usize, value: i16) -> Result<()> {
        self.write_u16(buffer, offset, value as u16)
    }

    pub fn write_u32(self, buffer: &mut [u8], offset: usize, value: u32) -> Result<()> {
        let bytes = match self {
            Endianness::LittleEndian => value.to_le_bytes(),
            Endianness::BigEndian => value.to_be_bytes(),
        };

        window_mut::<4>(buffer, offset)?.copy_from_slice(&bytes);

        Ok(())
    }

    pub fn write_i32(self, buffer: &mut [u8], offset: usize, value: i32) -> Result<()> {
        self.write_u32(buffer, offset, value as u32)
    }

    /// Decode an unsigned value whose width is given by a numeric data type.
    ///
    /// Only the `Data08`, `Data16` and `Data32` types have a width; any other
    /// type yields `UnsupportedSize`.
    pub fn sized_value(self, data_type: DataType, buffer: &[u8], offset: usize) -> Result<u32> {
        match data_type {
            DataType::Data08 => Ok(self.read_u8(buffer, offset)? as u32),
            DataType::Data16 => Ok(self.read_u16(buffer, offset)? as u32),
            DataType::Data32 => self.read_u32(buffer, offset),
            other => Err(Error::UnsupportedSize(other.tag())),
        }
    }

    /// Encode an unsigned value into the width given by a numeric data type.
    ///
    /// The value is truncated to the width of the type.
    pub fn write_sized_value(
        self,
        data_type: DataType,
        buffer: &mut [u8],
        offset: usize,
        value: u32,
    ) -> Result<()> {
        match data_type {
            DataType::Data08 => self.write_u8(buffer, offset, value as u8),
            DataType::Data16 => self.write_u16(buffer, offset, value as u16),
            DataType::Data32 => self.write_u32(buffer, offset, value),
            other => Err(Error::UnsupportedSize(other.tag())),
        }
    }
}
