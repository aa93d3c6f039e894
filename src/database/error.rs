//! Error type for the program database

use crate::database::ProgramState;
use crate::{loader, memory};
use std::{io, result};
use thiserror::Error;

/// Reasons a block could not be split at an address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum SplitError {
    /// A block already starts at the address.
    #[error("a block already starts at that address")]
    Existing,

    /// The address is not within the segment of the block it falls in.
    #[error("address lies outside of every segment")]
    OutOfBounds,

    /// The address is inside a decoded instruction.
    #[error("address lies within an instruction")]
    MidInstruction,
}

#[derive(Debug, Error)]
pub enum Error {
    /// The database is not in a state that allows the operation.
    #[error("program database is {0}")]
    InvalidState(ProgramState),

    /// A file offered in place of the original input does not match it.
    #[error("input file does not match the project: {0}")]
    ValidationFailed(String),

    #[error("cannot split block: {0}")]
    Split(#[from] SplitError),

    #[error(transparent)]
    Loader(loader::Error),

    #[error(transparent)]
    Memory(#[from] memory::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller asked for the operation to stop.
    #[error("operation aborted")]
    Aborted,
}

impl From<loader::Error> for Error {
    fn from(err: loader::Error) -> Self {
        match err {
            loader::Error::Aborted => Error::Aborted,
            loader::Error::Io(e) => Error::Io(e),
            e => Error::Loader(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(e) => e,
            Error::Loader(e) => e.into(),
            Error::ValidationFailed(_) | Error::Json(_) => {
                io::Error::new(io::ErrorKind::InvalidData, format!("{}", err))
            }
            _ => io::Error::new(io::ErrorKind::Other, format!("{}", err)),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
