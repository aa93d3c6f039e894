//! Bounded, endian-aware reading of container files.

use crate::loader::{Error, Result};
use crate::memory::Endianness;
use std::io;
use std::io::{Read, Seek, SeekFrom};

/// Reads values out of one file embedded at `base` within a larger stream.
///
/// Running off the end of the file is reported as a corrupt container of
/// the named format, since every caller already knows the file claims to be
/// in that format.
pub struct ContainerReader<'a, F> {
    file: &'a mut F,
    base: u64,
    length: u64,
    endianness: Endianness,
    format: &'static str,
}

impl<'a, F> ContainerReader<'a, F>
where
    F: Read + Seek,
{
    pub fn new(
        file: &'a mut F,
        base: u64,
        length: u64,
        endianness: Endianness,
        format: &'static str,
    ) -> Result<Self> {
        file.seek(SeekFrom::Start(base))?;

        Ok(ContainerReader {
            file,
            base,
            length,
            endianness,
            format,
        })
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Build the error for a structural violation of this format.
    pub fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::CorruptContainer(format!("{}: {}", self.format, reason.into()))
    }

    /// Build the error for a file that is not in this format at all.
    pub fn reject(&self, reason: impl Into<String>) -> Error {
        Error::LoadRejected(format!("not a {} file: {}", self.format, reason.into()))
    }

    /// Current position relative to the start of the file.
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()? - self.base)
    }

    pub fn at_end(&mut self) -> Result<bool> {
        Ok(self.position()? >= self.length)
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.length {
            return Err(self.corrupt(format!(
                "offset {:#X} lies beyond the end of the file",
                position
            )));
        }

        self.file.seek(SeekFrom::Start(self.base + position))?;

        Ok(())
    }

    pub fn skip(&mut self, count: u64) -> Result<()> {
        let position = self.position()?;

        self.seek(position.saturating_add(count))
    }

    pub fn bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let position = self.position()?;

        if position.saturating_add(count as u64) > self.length {
            return Err(self.corrupt(format!(
                "{} byte read at offset {:#X} runs past the end of the file",
                count, position
            )));
        }

        let mut buf = vec![0; count];
        self.file.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => self.corrupt("unexpected end of file"),
            _ => Error::Io(e),
        })?;

        Ok(buf)
    }

    pub fn u8(&mut self) -> Result<u8> {
        let buf = self.bytes(1)?;

        Ok(self.endianness.read_u8(&buf, 0)?)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let buf = self.bytes(2)?;

        Ok(self.endianness.read_u16(&buf, 0)?)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let buf = self.bytes(4)?;

        Ok(self.endianness.read_u32(&buf, 0)?)
    }
}
