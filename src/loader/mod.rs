//! Container format identification and loading.
//!
//! Every supported format is handled by one variant of `Handler`. Loading a
//! file means asking each handler in turn until one accepts it, producing a
//! `FileInfo` that describes the file's segments, relocations and symbols.

mod error;
mod fileinfo;
mod handler;
mod reader;
mod reloc;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use fileinfo::{EntryPoint, FileInfo, InternalData, LoadOptions, Relocation, Source, Symbol};
pub use handler::Handler;
pub use reader::ContainerReader;
pub use reloc::{relocate_segment_data, RelocatableAddresses, RelocatedAddresses};

use crate::arch::ArchName;
use crate::memory::Endianness;
use crate::platform::PlatformName;
use log::{debug, info};
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom};
use std::{fmt, str};

/// Enumeration of every file format a handler can recognise.
#[derive(Copy, Clone, Serialize, Debug, PartialEq, Eq, Hash)]
pub enum FileFormat {
    AmigaHunkExecutable,
    AmigaHunkLibrary,
    AtariStGemdosExecutable,
    SnesSmc,
    X68000XExecutable,
    ZxSpectrumZ80V1,
    ZxSpectrumZ80V2,
    ZxSpectrumZ80V3,
    Binary,
}

impl FileFormat {
    pub fn iter() -> impl IntoIterator<Item = FileFormat> {
        use FileFormat::*;

        vec![
            AmigaHunkExecutable,
            AmigaHunkLibrary,
            AtariStGemdosExecutable,
            SnesSmc,
            X68000XExecutable,
            ZxSpectrumZ80V1,
            ZxSpectrumZ80V2,
            ZxSpectrumZ80V3,
            Binary,
        ]
    }

    /// The stable numeric identity of this format.
    pub fn id(self) -> u32 {
        match self {
            FileFormat::AmigaHunkExecutable => 1001,
            FileFormat::AmigaHunkLibrary => 1002,
            FileFormat::AtariStGemdosExecutable => 2001,
            FileFormat::SnesSmc => 6001,
            FileFormat::X68000XExecutable => 7001,
            FileFormat::ZxSpectrumZ80V1 => 8001,
            FileFormat::ZxSpectrumZ80V2 => 8002,
            FileFormat::ZxSpectrumZ80V3 => 8003,
            FileFormat::Binary => 9001,
        }
    }

    pub fn friendly_name(self) -> &'static str {
        match self {
            FileFormat::AmigaHunkExecutable => "Amiga hunk executable",
            FileFormat::AmigaHunkLibrary => "Amiga hunk library",
            FileFormat::AtariStGemdosExecutable => "Atari ST GEMDOS executable",
            FileFormat::SnesSmc => "SNES SMC ROM",
            FileFormat::X68000XExecutable => "X68000 X executable",
            FileFormat::ZxSpectrumZ80V1 => "ZX Spectrum Z80 snapshot (v1)",
            FileFormat::ZxSpectrumZ80V2 => "ZX Spectrum Z80 snapshot (v2)",
            FileFormat::ZxSpectrumZ80V3 => "ZX Spectrum Z80 snapshot (v3)",
            FileFormat::Binary => "raw binary",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.friendly_name())
    }
}

impl str::FromStr for FileFormat {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();

        FileFormat::iter()
            .into_iter()
            .find(|f| format!("{:?}", f).to_ascii_lowercase() == s)
            .ok_or(())
    }
}

derive_deserialize_from_str!(FileFormat, "valid file format name");

/// How sure a handler is that a file is in its format.
#[derive(Copy, Clone, Serialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    None,
    Possible,
    Probable,
    Certain,
}

/// One handler's guess at what a file is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchResult {
    pub handler: Handler,
    pub platform: Option<PlatformName>,
    pub file_format: Option<FileFormat>,
    pub processor: Option<ArchName>,
    pub endianness: Endianness,
    pub confidence: Confidence,
}

impl MatchResult {
    /// An empty guess on behalf of a handler, carrying its fixed processor
    /// and byte order.
    pub fn new(handler: Handler) -> Self {
        MatchResult {
            handler,
            platform: None,
            file_format: None,
            processor: handler.processor(),
            endianness: handler.endianness(),
            confidence: Confidence::None,
        }
    }

    /// Whether this guess may be selected at all.
    pub fn is_selectable(&self) -> bool {
        self.file_format.is_some() && self.confidence > Confidence::None
    }
}

/// Determine how long the file is when the caller doesn't say.
fn source_length<F>(file: &mut F, offset: u64, length: Option<u64>) -> Result<u64>
where
    F: Seek,
{
    match length {
        Some(length) => Ok(length),
        None => Ok(file.seek(SeekFrom::End(0))?.saturating_sub(offset)),
    }
}

/// Work out what format a file is in.
///
/// Every handler is consulted and all of their candidates are pooled. The
/// most confident selectable candidate wins, ties going to the handler
/// registered first. Identification fails when there is no such candidate
/// or the winner doesn't know its platform.
pub fn identify<F>(
    file: &mut F,
    file_name: &str,
    offset: u64,
    length: Option<u64>,
) -> Option<MatchResult>
where
    F: Read + Seek,
{
    let length = source_length(file, offset, length).ok()?;
    let source = Source::new(file_name, offset, length);
    let mut candidates = Vec::new();

    for handler in Handler::registered().iter() {
        match handler.identify(file, &source) {
            Ok(matches) => candidates.extend(matches),
            Err(e) => debug!("{} could not identify {}: {}", handler, file_name, e),
        }
    }

    let winner = select_match(candidates)?;
    info!(
        "Identified {} as {} ({:?} confidence)",
        file_name,
        winner.file_format.map_or("?", |f| f.friendly_name()),
        winner.confidence
    );

    Some(winner)
}

/// Pick the winning guess out of a pool of candidates in registration order.
pub fn select_match<I>(candidates: I) -> Option<MatchResult>
where
    I: IntoIterator<Item = MatchResult>,
{
    let mut best: Option<MatchResult> = None;

    for candidate in candidates.into_iter().filter(|c| c.is_selectable()) {
        let better = best
            .as_ref()
            .map_or(true, |b| candidate.confidence > b.confidence);

        if better {
            best = Some(candidate);
        }
    }

    best.filter(|winner| winner.platform.is_some())
}

/// Load a file with the first handler that accepts it.
///
/// Raw binary images skip straight to the binary handler. Handlers that
/// reject the file leave nothing behind. If no handler accepts the file, the
/// first structural error reported by a handler that recognised the format
/// is returned, otherwise `UnrecognizedFormat`.
pub fn load<F>(
    file: &mut F,
    file_name: &str,
    options: &LoadOptions,
    offset: u64,
    length: Option<u64>,
) -> Result<FileInfo>
where
    F: Read + Seek,
{
    let length = source_length(file, offset, length)?;
    let source = Source::new(file_name, offset, length);
    let mut corruption = None;
    let handlers = if options.is_binary_file {
        vec![Handler::Binary]
    } else {
        Handler::registered().to_vec()
    };

    for handler in handlers.iter() {
        file.seek(SeekFrom::Start(offset))?;

        match handler.load(file, &source, options) {
            Ok(file_info) => {
                info!(
                    "Loaded {} as {} with {} segments",
                    file_name,
                    handler,
                    file_info.segments().len()
                );
                return Ok(file_info);
            }
            Err(Error::LoadRejected(reason)) => debug!("{}: {}", handler, reason),
            Err(e @ Error::CorruptContainer(_)) => {
                debug!("{}: {}", handler, e);
                corruption.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(corruption.unwrap_or(Error::UnrecognizedFormat))
}

/// Reload a file with the handler that loaded it previously.
pub fn reload<F>(
    file: &mut F,
    handler: Handler,
    file_name: &str,
    options: &LoadOptions,
) -> Result<FileInfo>
where
    F: Read + Seek,
{
    let length = source_length(file, 0, None)?;
    let source = Source::new(file_name, 0, length);

    file.seek(SeekFrom::Start(0))?;
    handler.load(file, &source, options)
}
