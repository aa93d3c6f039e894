//! Project files: a saved program database, plus either a copy of the input
//! file or where to find it.

mod repr;

#[cfg(test)]
mod tests;

pub use repr::{
    load_project, save_project, validate_input, ProjectFile, SaveOptions, PROJECT_FORMAT_VERSION,
};
