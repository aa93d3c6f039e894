//! CLI commands

mod common;
mod main;

#[cfg(test)]
mod tests;

pub use common::{parse_address, LoadForm};
pub use main::main;
