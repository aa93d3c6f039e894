//! Error type for value decoding and segment caching

use std::{io, result};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A sized value was requested for a data type that has no width.
    #[error("data type {0} has no fixed value size")]
    UnsupportedSize(u8),

    /// A value straddles or lies beyond the end of its buffer.
    #[error("{wanted} byte value at offset {offset} lies outside a {available} byte buffer")]
    OutOfRange {
        offset: usize,
        wanted: usize,
        available: usize,
    },

    /// Fewer bytes were available than a segment claims to hold.
    #[error("segment {segment_id} expected {expected} bytes of file data, only {actual} available")]
    TruncatedRead {
        segment_id: usize,
        expected: usize,
        actual: usize,
    },

    /// A segment index that does not exist.
    #[error("segment {0} does not exist")]
    NoSuchSegment(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = result::Result<T, Error>;
