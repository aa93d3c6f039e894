//! Error type for format identification and loading

use crate::memory;
use std::{io, result};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No registered loader accepted the file.
    #[error("file is not in any recognised format")]
    UnrecognizedFormat,

    /// A loader declined a file that is not in its format.
    #[error("{0}")]
    LoadRejected(String),

    /// A file is in a loader's format but violates its structure.
    #[error("corrupt file: {0}")]
    CorruptContainer(String),

    /// Raw binary files must be told what processor they target.
    #[error("a processor must be given to load a binary file")]
    UnknownProcessor,

    /// Relocation was attempted before a segment's data was read.
    #[error("segment {0} has not been cached")]
    SegmentNotCached(usize),

    #[error(transparent)]
    Memory(memory::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The caller asked for the operation to stop.
    #[error("operation aborted")]
    Aborted,
}

impl From<memory::Error> for Error {
    fn from(err: memory::Error) -> Self {
        match err {
            memory::Error::UnsupportedSize(_) | memory::Error::OutOfRange { .. } => {
                Error::CorruptContainer(err.to_string())
            }
            memory::Error::Io(e) => Error::Io(e),
            e => Error::Memory(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(e) => e,
            Error::UnrecognizedFormat | Error::LoadRejected(_) | Error::CorruptContainer(_) => {
                io::Error::new(io::ErrorKind::InvalidData, format!("{}", err))
            }
            _ => io::Error::new(io::ErrorKind::Other, format!("{}", err)),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
