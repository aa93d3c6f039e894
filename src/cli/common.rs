//! Common utilities for the command line

use crate::arch::ArchName;
use crate::loader::LoadOptions;
use clap::ArgMatches;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const USAGE_FORMS: &str = "\
    peasauce <executable>\n\
    peasauce <project.psproj> [<input file>]\n\
    peasauce <binary> <processor> <load address> <entry address>";

/// Extension identifying project files.
pub const PROJECT_EXTENSION: &str = "psproj";

pub fn usage_error(message: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{}\n\nUsage:\n    {}", message, USAGE_FORMS),
    )
}

/// Parse a hexadecimal address written with a `$` or `0x` prefix.
pub fn parse_address(text: &str) -> Option<u32> {
    let digits = if let Some(digits) = text.strip_prefix('$') {
        digits
    } else if let Some(digits) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        digits
    } else {
        return None;
    };

    u32::from_str_radix(digits, 16).ok()
}

fn is_project_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(PROJECT_EXTENSION))
}

/// The ways a program can be named on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadForm {
    /// A file whose format is identified automatically.
    Executable { input: PathBuf },

    /// A saved project, optionally with the input file it was made from.
    Project {
        project: PathBuf,
        input: Option<PathBuf>,
    },

    /// A raw binary image.
    Binary { input: PathBuf, options: LoadOptions },
}

impl LoadForm {
    pub fn from_arg_matches(matches: &ArgMatches<'_>) -> io::Result<Self> {
        let mut args: Vec<&str> = Vec::new();

        if let Some(input) = matches.value_of("input") {
            args.push(input);
        }

        if let Some(rest) = matches.values_of("args") {
            args.extend(rest);
        }

        LoadForm::from_args(&args)
    }

    pub fn from_args(args: &[&str]) -> io::Result<Self> {
        match args {
            [input] if is_project_path(Path::new(input)) => Ok(LoadForm::Project {
                project: PathBuf::from(input),
                input: None,
            }),
            [input] => Ok(LoadForm::Executable {
                input: PathBuf::from(input),
            }),
            [project, input] if is_project_path(Path::new(project)) => Ok(LoadForm::Project {
                project: PathBuf::from(project),
                input: Some(PathBuf::from(input)),
            }),
            [input, processor, load_address, entry_address] => {
                let processor = ArchName::from_str(processor)
                    .map_err(|_| usage_error(&format!("Unknown processor {}", processor)))?;
                let load_address = parse_address(load_address).ok_or_else(|| {
                    usage_error(&format!("Invalid load address {}", load_address))
                })?;
                let entry_address = parse_address(entry_address).ok_or_else(|| {
                    usage_error(&format!("Invalid entry address {}", entry_address))
                })?;
                let entry_offset = entry_address.checked_sub(load_address).ok_or_else(|| {
                    usage_error("The entry address must not lie below the load address")
                })?;

                Ok(LoadForm::Binary {
                    input: PathBuf::from(input),
                    options: LoadOptions::binary(processor, load_address, entry_offset),
                })
            }
            _ => Err(usage_error("Unexpected arguments")),
        }
    }
}
