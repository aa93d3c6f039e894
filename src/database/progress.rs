//! Progress reporting and change notification for long running operations

use crate::memory::DataType;

/// Receives progress from a long running operation and may ask it to stop.
///
/// Operations check `should_abort` at each checkpoint; an abort unwinds with
/// `Error::Aborted`.
pub trait Progress {
    /// How many steps the operation expects to take.
    fn set_step_count(&mut self, _steps: usize) {}

    fn step_completed(&mut self) {}

    fn should_abort(&self) -> bool {
        false
    }
}

/// Progress sink for callers that don't care.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// A change to the block list, published to an optional subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockEvent {
    Created {
        address: u32,
        length: u32,
        data_type: Option<DataType>,
    },
    DataTypeChanged {
        address: u32,
        old: Option<DataType>,
        new: DataType,

        /// Length of the block before the change split it.
        old_length: u32,
    },
}

impl BlockEvent {
    pub fn address(&self) -> u32 {
        match self {
            BlockEvent::Created { address, .. } => *address,
            BlockEvent::DataTypeChanged { address, .. } => *address,
        }
    }
}
