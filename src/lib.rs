//! Loader framework and program database for a retargetable disassembler.

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate serde_plain;

#[macro_use]
extern crate clap;

pub mod arch;
pub mod cli;
pub mod database;
pub mod loader;
pub mod memory;
pub mod platform;
pub mod project;
