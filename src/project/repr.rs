//! Project file representation

use crate::database::{
    file_checksum, Error, ProgramData, ProgramState, Progress, Result,
};
use log::{debug, info};
use relative_path::{RelativePath, RelativePathBuf};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

/// Version written to every new project file.
pub const PROJECT_FORMAT_VERSION: u32 = 1;

/// Choices made when saving a project.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Store the input file's bytes inside the project.
    pub embed_source: bool,

    /// Where the input file lives, relative to the project file.
    pub input_path: Option<RelativePathBuf>,
}

/// In-memory representation of a saved project.
///
/// A project holds the whole program database, plus either a copy of the
/// input file or a note of where to find it. Segment bytes are never
/// stored; they are read from the input file again when the project is
/// loaded.
#[derive(Serialize, Deserialize, Debug)]
pub struct ProjectFile {
    version: u32,

    #[serde(default)]
    input_path: Option<RelativePathBuf>,

    #[serde(default)]
    source: Option<Vec<u8>>,

    program: ProgramData,
}

impl ProjectFile {
    pub fn read<R: Read>(reader: R) -> Result<Self> {
        let project: Self = serde_json::from_reader(reader)?;

        if project.version != PROJECT_FORMAT_VERSION {
            return Err(Error::ValidationFailed(format!(
                "unsupported project version {}",
                project.version
            )));
        }

        Ok(project)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Where the input file was when the project was saved.
    pub fn input_path(&self) -> Option<&RelativePath> {
        self.input_path.as_deref()
    }

    pub fn has_embedded_source(&self) -> bool {
        self.source.is_some()
    }

    /// The program as it was saved, not yet usable.
    pub fn program(&self) -> &ProgramData {
        &self.program
    }

    /// Restore the saved program.
    ///
    /// Embedded source bytes are used when present. Otherwise `substitute`
    /// must be the original input file: it is checked by size and then by
    /// checksum before anything is read from it.
    pub fn into_program<F>(
        self,
        substitute: Option<&mut F>,
        progress: &mut dyn Progress,
    ) -> Result<ProgramData>
    where
        F: Read + Seek,
    {
        let mut program = self.program;

        match (self.source, substitute) {
            (Some(source), _) => {
                let mut file = Cursor::new(source);

                validate_input(&program, &mut file)?;
                program.restore(&mut file, progress)?;
                program.set_input_file_cached(true);
            }
            (None, Some(file)) => {
                validate_input(&program, file)?;
                program.restore(file, progress)?;
                program.set_input_file_cached(false);
            }
            (None, None) => {
                return Err(Error::ValidationFailed(format!(
                    "no input file given for {}",
                    program.file_name()
                )))
            }
        }

        info!(
            "Restored project for {} with {} blocks",
            program.file_name(),
            program.blocks().len()
        );

        Ok(program)
    }
}

/// Check that `file` is the input file `program` was loaded from.
pub fn validate_input<F: Read + Seek>(program: &ProgramData, file: &mut F) -> Result<()> {
    let size = file.seek(SeekFrom::End(0))?;

    if size != program.file_size() {
        return Err(Error::ValidationFailed(format!(
            "input file is {} bytes, expected {}",
            size,
            program.file_size()
        )));
    }

    let (_, checksum) = file_checksum(file)?;
    if &checksum != program.file_checksum() {
        return Err(Error::ValidationFailed(
            "input file checksum does not match".to_string(),
        ));
    }

    debug!("Input file for {} validated", program.file_name());

    Ok(())
}

/// Write a loaded program out as a project.
///
/// `input` is the program's input file; it is only read when the source is
/// being embedded, and must still match the program.
pub fn save_project<W, F>(
    writer: W,
    program: &mut ProgramData,
    input: &mut F,
    options: &SaveOptions,
) -> Result<()>
where
    W: Write,
    F: Read + Seek,
{
    if program.state() != ProgramState::Loaded {
        return Err(Error::InvalidState(program.state()));
    }

    let source = if options.embed_source {
        validate_input(program, input)?;

        let mut source = Vec::new();
        input.seek(SeekFrom::Start(0))?;
        input.read_to_end(&mut source)?;

        Some(source)
    } else {
        None
    };

    program.set_input_file_cached(options.embed_source);

    let project = ProjectFileRef {
        version: PROJECT_FORMAT_VERSION,
        input_path: options.input_path.as_ref(),
        source: source.as_deref(),
        program,
    };

    serde_json::to_writer_pretty(writer, &project)?;
    info!("Saved project for {}", program.file_name());

    Ok(())
}

/// Read a project and restore its program in one go.
pub fn load_project<R, F>(
    reader: R,
    substitute: Option<&mut F>,
    progress: &mut dyn Progress,
) -> Result<ProgramData>
where
    R: Read,
    F: Read + Seek,
{
    ProjectFile::read(reader)?.into_program(substitute, progress)
}

/// Borrowed form of `ProjectFile`, for writing.
#[derive(Serialize)]
struct ProjectFileRef<'a> {
    version: u32,
    input_path: Option<&'a RelativePathBuf>,
    source: Option<&'a [u8]>,
    program: &'a ProgramData,
}
