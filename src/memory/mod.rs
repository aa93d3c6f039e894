//! Types which model the bytes of a loaded program: value decoding, data
//! type tags and segments.

mod datatype;
mod endianness;
mod error;
mod segment;

pub use datatype::{DataType, DATA_TYPE_SIZES};
pub use endianness::Endianness;
pub use error::{Error, Result};
pub use segment::{cache_segment_data, next_segment_address, Segment, SegmentType};
