//! Raw binary images.
//!
//! A raw image has no structure to recognise, so it is only ever loaded when
//! the caller explicitly asks for it and names the processor.

use crate::loader::{Error, FileFormat, FileInfo, Handler, LoadOptions, Result, Source};
use crate::memory::SegmentType;
use std::convert::TryFrom;
use std::io::{Read, Seek};

pub fn load<F: Read + Seek>(
    _file: &mut F,
    source: &Source<'_>,
    options: &LoadOptions,
) -> Result<FileInfo> {
    if !options.is_binary_file {
        return Err(Error::LoadRejected(
            "raw binaries must be loaded explicitly".to_string(),
        ));
    }

    let processor = options.processor.ok_or(Error::UnknownProcessor)?;
    let length = u32::try_from(source.length()).map_err(|_| {
        Error::CorruptContainer(format!(
            "raw binary of {} bytes does not fit the address space",
            source.length()
        ))
    })?;

    let mut file_info = FileInfo::new(Handler::Binary, source, options);

    file_info.set_file_format(FileFormat::Binary);
    file_info.set_processor(processor);
    file_info.add_segment(SegmentType::Code, Some(0), length, length, Vec::new(), Vec::new())?;
    file_info.set_entry_point(0, options.entry_offset);

    Ok(file_info)
}
