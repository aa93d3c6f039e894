//! Program database - The address space of a loaded program, divided into
//! typed blocks which are progressively reclassified as analysis runs.

mod analysis;
mod block;
mod error;
mod flags;
mod program;
mod progress;


pub use block::{
    AsciiRun, BlockList, CodeLine, DataTypeSize, LineData, SegmentBlock, UncertainReference,
};
pub use error::{Error, Result, SplitError};
pub use flags::{BlockFlags, FlagLayout, DESCENDING_DATA_TYPE_SIZES, FLAG_LAYOUT};
pub use program::{file_checksum, AddressRange, ProgramData, ASCII_LINE_WIDTH};
pub use progress::{BlockEvent, NoProgress, Progress};

use serde::Serialize;
use std::{fmt, str};

/// The two states a program database can be in.
///
/// Nothing may be persisted until a database is `Loaded`.
#[derive(Copy, Clone, Serialize, Debug, PartialEq, Eq)]
pub enum ProgramState {
    Loading,
    Loaded,
}

impl Default for ProgramState {
    fn default() -> Self {
        ProgramState::Loading
    }
}

impl fmt::Display for ProgramState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramState::Loading => write!(f, "loading"),
            ProgramState::Loaded => write!(f, "loaded"),
        }
    }
}

impl str::FromStr for ProgramState {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "loading" => Ok(ProgramState::Loading),
            "loaded" => Ok(ProgramState::Loaded),
            _ => Err(()),
        }
    }
}

derive_deserialize_from_str!(ProgramState, "valid program state");
