//! CLI entry point

use crate::cli::common::{usage_error, USAGE_FORMS};
use crate::cli::LoadForm;
use crate::database::{NoProgress, ProgramData};
use crate::loader::LoadOptions;
use crate::project::{save_project, ProjectFile, SaveOptions};
use clap::Arg;
use log::info;
use relative_path::RelativePathBuf;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Name the input file relative to the project, if they share a directory.
fn relative_input_path(project: &Path, input: &Path) -> Option<RelativePathBuf> {
    let project_dir = fs::canonicalize(project.parent()?.join(".")).ok()?;
    let input = fs::canonicalize(input).ok()?;

    if input.parent()? == project_dir {
        Some(RelativePathBuf::from(input.file_name()?.to_str()?))
    } else {
        None
    }
}

/// Load the program the command line names.
///
/// Returns the program and the path of its input file, when there is one.
fn load_program(form: &LoadForm) -> io::Result<(ProgramData, Option<PathBuf>)> {
    match form {
        LoadForm::Executable { input } => {
            let mut file = File::open(input)?;
            let program = ProgramData::load(
                &mut file,
                &file_name_of(input),
                &LoadOptions::default(),
                &mut NoProgress,
            )?;

            Ok((program, Some(input.clone())))
        }
        LoadForm::Binary { input, options } => {
            let mut file = File::open(input)?;
            let program = ProgramData::load(&mut file, &file_name_of(input), options, &mut NoProgress)?;

            Ok((program, Some(input.clone())))
        }
        LoadForm::Project { project, input } => {
            let project_file = ProjectFile::read(BufReader::new(File::open(project)?))?;
            let input = input.clone().or_else(|| {
                let dir = project.parent().unwrap_or_else(|| Path::new(""));

                project_file.input_path().map(|p| p.to_path(dir))
            });

            if project_file.has_embedded_source() {
                let program = project_file.into_program::<File>(None, &mut NoProgress)?;

                return Ok((program, input.filter(|p| p.exists())));
            }

            let input = input.ok_or_else(|| {
                usage_error("The project does not embed its input file, please name it")
            })?;
            let mut file = File::open(&input)?;
            let program = project_file.into_program(Some(&mut file), &mut NoProgress)?;

            Ok((program, Some(input)))
        }
    }
}

fn print_summary(program: &ProgramData) {
    println!("File: {}", program.file_name());
    println!(
        "Format: {}",
        program
            .file_format()
            .map_or("unknown", |f| f.friendly_name())
    );
    println!(
        "Platform: {}",
        program
            .handler()
            .platform()
            .map_or("unknown", |p| p.friendly_name())
    );
    println!(
        "Processor: {}",
        program
            .processor()
            .map_or_else(|| "unknown".to_string(), |p| p.to_string())
    );

    println!("Segments:");
    for (segment_id, segment) in program.segments().iter().enumerate() {
        println!(
            "  {}: {} ${:08X}-${:08X}, {} bytes ({} from file)",
            segment_id,
            segment.kind(),
            segment.address(),
            segment.end_address(),
            segment.length(),
            segment.data_length()
        );
    }

    match program.entry_address() {
        Some(entry) => println!("Entry point: ${:08X}", entry),
        None => println!("Entry point: none"),
    }

    println!(
        "Blocks: {} ({} lines)",
        program.blocks().len(),
        program.line_count()
    );
}

pub fn main() -> io::Result<()> {
    let app = app_from_crate!()
        .after_help(USAGE_FORMS)
        .arg(
            Arg::with_name("input")
                .value_name("FILE")
                .index(1)
                .required(true)
                .help("The executable, project or binary image to load"),
        )
        .arg(
            Arg::with_name("args")
                .value_name("ARGS")
                .index(2)
                .multiple(true)
                .help("The input file of a project, or the processor, load address and entry address of a binary image"),
        )
        .arg(
            Arg::with_name("save")
                .long("save")
                .value_name("project.psproj")
                .takes_value(true)
                .help("Save a project after loading"),
        )
        .arg(
            Arg::with_name("embed")
                .long("embed")
                .requires("save")
                .help("Embed the input file in the saved project"),
        );

    let matches = app.get_matches();
    let form = LoadForm::from_arg_matches(&matches)?;
    let (mut program, input) = load_program(&form)?;

    print_summary(&program);

    if let Some(save_path) = matches.value_of("save") {
        let save_path = Path::new(save_path);
        let input = input.ok_or_else(|| {
            usage_error("The input file is needed to save this project, please name it")
        })?;
        let options = SaveOptions {
            embed_source: matches.is_present("embed"),
            input_path: relative_input_path(save_path, &input),
        };

        let mut input_file = File::open(&input)?;
        let writer = BufWriter::new(File::create(save_path)?);

        save_project(writer, &mut program, &mut input_file, &options)?;
        info!("Wrote project {}", save_path.display());
    }

    Ok(())
}
