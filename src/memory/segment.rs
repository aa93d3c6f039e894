//! Segments: contiguous regions of a loaded program's address space.

use crate::memory::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek, SeekFrom};
use std::{fmt, str};

/// What kind of memory a segment represents.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentType {
    Code,
    Data,
    /// Zero-initialized memory with no backing bytes in the file.
    Bss,
}

impl SegmentType {
    pub fn friendly_name(self) -> &'static str {
        match self {
            SegmentType::Code => "CODE",
            SegmentType::Data => "DATA",
            SegmentType::Bss => "BSS",
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.friendly_name())
    }
}

impl str::FromStr for SegmentType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "code" => Ok(SegmentType::Code),
            "data" => Ok(SegmentType::Data),
            "bss" => Ok(SegmentType::Bss),
            _ => Err(()),
        }
    }
}

/// One contiguous region of a loaded file's address space.
///
/// Segments are built once by a loader and never resized. The only thing that
/// changes afterwards is the cached copy of the segment's file bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    kind: SegmentType,

    /// Offset of the segment's bytes within the file, or `None` when the
    /// segment is not backed by file data.
    file_offset: Option<u64>,

    /// Number of bytes present in the file.
    data_length: u32,

    /// Number of bytes the segment occupies in memory.
    length: u32,

    address: u32,

    #[serde(skip)]
    cached_data: Option<Vec<u8>>,
}

impl Segment {
    pub fn new(
        kind: SegmentType,
        file_offset: Option<u64>,
        data_length: u32,
        length: u32,
        address: u32,
    ) -> Self {
        Segment {
            kind,
            file_offset,
            data_length,
            length,
            address,
            cached_data: None,
        }
    }

    /// Construct a segment whose bytes were decoded by the loader rather
    /// than copied verbatim from the file.
    pub fn decoded(kind: SegmentType, data: Vec<u8>, length: u32, address: u32) -> Self {
        let data_length = data.len() as u32;

        Segment {
            kind,
            file_offset: None,
            data_length,
            length,
            address,
            cached_data: Some(data),
        }
    }

    pub fn kind(&self) -> SegmentType {
        self.kind
    }

    pub fn is_bss(&self) -> bool {
        self.kind == SegmentType::Bss
    }

    pub fn file_offset(&self) -> Option<u64> {
        self.file_offset
    }

    pub fn data_length(&self) -> u32 {
        self.data_length
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    /// The first address past the end of this segment.
    pub fn end_address(&self) -> u32 {
        self.address.wrapping_add(self.length)
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.address && (address - self.address) < self.length
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.cached_data.as_deref()
    }

    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        self.cached_data.as_deref_mut()
    }

    pub fn is_cached(&self) -> bool {
        self.cached_data.is_some()
    }
}

/// Compute where the next segment in a list starts.
///
/// The first segment starts at the load address; every other segment starts
/// directly after its predecessor.
pub fn next_segment_address(segments: &[Segment], load_address: u32) -> u32 {
    segments
        .last()
        .map(|prev| prev.end_address())
        .unwrap_or(load_address)
}

/// Read a segment's file bytes into its cache.
///
/// `base_offset` is where the loaded file starts within `file`, for files
/// embedded in a larger container. Segments without file data are cached as
/// empty buffers, and segments the loader decoded itself are left alone. A
/// short read is an error and leaves the segment uncached.
pub fn cache_segment_data<F>(
    file: &mut F,
    base_offset: u64,
    segments: &mut [Segment],
    segment_id: usize,
) -> Result<()>
where
    F: Read + Seek,
{
    let segment = segments
        .get_mut(segment_id)
        .ok_or(Error::NoSuchSegment(segment_id))?;

    let file_offset = match segment.file_offset {
        Some(file_offset) => file_offset,
        None => {
            if segment.cached_data.is_some() {
                return Ok(());
            } else if segment.data_length > 0 {
                return Err(Error::TruncatedRead {
                    segment_id,
                    expected: segment.data_length as usize,
                    actual: 0,
                });
            }

            segment.cached_data = Some(Vec::new());
            return Ok(());
        }
    };

    let expected = segment.data_length as usize;
    let mut data = Vec::with_capacity(expected);

    file.seek(SeekFrom::Start(base_offset + file_offset))?;
    file.by_ref().take(expected as u64).read_to_end(&mut data)?;

    if data.len() < expected {
        return Err(Error::TruncatedRead {
            segment_id,
            expected,
            actual: data.len(),
        });
    }

    segment.cached_data = Some(data);

    Ok(())
}
