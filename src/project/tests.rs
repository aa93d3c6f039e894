use crate::arch::tests::TestArchitecture;
use crate::arch::ArchName;
use crate::database::{Error, NoProgress, ProgramData, ProgramState};
use crate::loader::LoadOptions;
use crate::memory::{DataType, Endianness};
use crate::platform::tests::amiga_executable;
use crate::project::{load_project, save_project, ProjectFile, SaveOptions};
use relative_path::RelativePathBuf;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use test_log::test;

fn program_bytes() -> Vec<u8> {
    let mut bytes = vec![0x02, 0x00, 0x00, 0x10, 0x08, 0x04, 0x00, 0x00, 0x00, 0x04];
    bytes.extend_from_slice(b"TEXT\0");
    bytes.resize(32, 0);

    bytes
}

fn loaded_program(bytes: &[u8]) -> ProgramData {
    let options = LoadOptions::binary(ArchName::M68000, 0x1000, 0);
    let mut program = ProgramData::load(
        &mut Cursor::new(bytes.to_vec()),
        "prog.bin",
        &options,
        &mut NoProgress,
    )
    .unwrap();

    program.analyse(&TestArchitecture, &mut NoProgress).unwrap();
    program
        .set_data_type_at_address(&TestArchitecture, 0x100A, DataType::Ascii)
        .unwrap();

    program
}

fn save_to_tempfile(program: &mut ProgramData, bytes: &[u8], options: &SaveOptions) -> std::fs::File {
    let mut project = tempfile::tempfile().unwrap();

    save_project(&mut project, program, &mut Cursor::new(bytes.to_vec()), options).unwrap();
    project.seek(SeekFrom::Start(0)).unwrap();

    project
}

#[test]
fn embedded_project_round_trip() {
    let bytes = program_bytes();
    let mut program = loaded_program(&bytes);
    let options = SaveOptions {
        embed_source: true,
        input_path: None,
    };
    let project = save_to_tempfile(&mut program, &bytes, &options);

    let restored =
        load_project::<_, Cursor<Vec<u8>>>(project, None, &mut NoProgress).unwrap();

    assert_eq!(restored.state(), ProgramState::Loaded);
    assert!(restored.input_file_cached());
    assert_eq!(restored.symbols(), program.symbols());
    assert_eq!(restored.line_count(), program.line_count());
    assert_eq!(
        restored.blocks().iter().collect::<Vec<_>>(),
        program.blocks().iter().collect::<Vec<_>>()
    );
    assert_eq!(restored.segments()[0].data(), Some(&bytes[..]));
    assert_eq!(
        restored.line_number_for_address(0x100C),
        program.line_number_for_address(0x100C)
    );
}

#[test]
fn substitute_file_restores_project() {
    let bytes = program_bytes();
    let mut program = loaded_program(&bytes);
    let options = SaveOptions {
        embed_source: false,
        input_path: Some(RelativePathBuf::from("prog.bin")),
    };
    let project = ProjectFile::read(save_to_tempfile(&mut program, &bytes, &options)).unwrap();

    assert!(!project.has_embedded_source());
    assert_eq!(project.input_path().map(|p| p.as_str()), Some("prog.bin"));

    let restored = project
        .into_program(Some(&mut Cursor::new(bytes.clone())), &mut NoProgress)
        .unwrap();

    assert_eq!(restored.state(), ProgramState::Loaded);
    assert!(!restored.input_file_cached());
    assert_eq!(restored.symbol_for_address(0x1008), Some("lbC001008"));
}

#[test]
fn wrong_substitute_is_rejected() {
    let bytes = program_bytes();
    let mut program = loaded_program(&bytes);
    let mut saved = Vec::new();
    save_project(
        &mut saved,
        &mut program,
        &mut Cursor::new(bytes.clone()),
        &SaveOptions::default(),
    )
    .unwrap();

    let mut short = Cursor::new(bytes[..16].to_vec());
    let result = load_project(&saved[..], Some(&mut short), &mut NoProgress);
    assert!(matches!(result, Err(Error::ValidationFailed(_))));

    let mut altered = bytes.clone();
    altered[31] = 0xFF;
    let result = load_project(&saved[..], Some(&mut Cursor::new(altered)), &mut NoProgress);
    assert!(matches!(result, Err(Error::ValidationFailed(_))));

    let result = load_project::<_, Cursor<Vec<u8>>>(&saved[..], None, &mut NoProgress);
    assert!(matches!(result, Err(Error::ValidationFailed(_))));
}

#[test]
fn only_loaded_programs_are_saved() {
    let bytes = program_bytes();
    let mut program = loaded_program(&bytes);
    let json = serde_json::to_string(&program).unwrap();
    let mut loading: ProgramData = serde_json::from_str(&json).unwrap();
    let mut sink = Vec::new();

    let result = save_project(
        &mut sink,
        &mut loading,
        &mut Cursor::new(bytes.clone()),
        &SaveOptions::default(),
    );
    assert!(matches!(result, Err(Error::InvalidState(ProgramState::Loading))));
    assert!(sink.is_empty());

    let embed = SaveOptions {
        embed_source: true,
        input_path: None,
    };
    let result = save_project(&mut sink, &mut program, &mut Cursor::new(vec![0; 32]), &embed);
    assert!(matches!(result, Err(Error::ValidationFailed(_))));
}

#[test]
fn unknown_versions_are_rejected() {
    let bytes = program_bytes();
    let mut program = loaded_program(&bytes);
    let mut saved = Vec::new();
    save_project(
        &mut saved,
        &mut program,
        &mut Cursor::new(bytes.clone()),
        &SaveOptions::default(),
    )
    .unwrap();

    let mut json: serde_json::Value = serde_json::from_slice(&saved).unwrap();
    json["version"] = serde_json::Value::from(99);

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(json.to_string().as_bytes()).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    assert!(matches!(
        ProjectFile::read(file),
        Err(Error::ValidationFailed(_))
    ));
}

#[test]
fn relocations_reapplied_on_restore() {
    let bytes = amiga_executable();
    let mut program = ProgramData::load(
        &mut Cursor::new(bytes.clone()),
        "prog",
        &LoadOptions::default(),
        &mut NoProgress,
    )
    .unwrap();
    let options = SaveOptions {
        embed_source: true,
        input_path: None,
    };
    let mut project = save_to_tempfile(&mut program, &bytes, &options);

    let mut text = String::new();
    project.read_to_string(&mut text).unwrap();
    project.seek(SeekFrom::Start(0)).unwrap();
    assert!(text.contains("\"relocated_addresses\""));

    let restored =
        load_project::<_, Cursor<Vec<u8>>>(project, None, &mut NoProgress).unwrap();
    let data = restored.segments()[0].data().unwrap();

    assert_eq!(Endianness::BigEndian.read_u32(data, 0).unwrap(), 12);
    assert_eq!(restored.relocated_addresses(), program.relocated_addresses());
    assert_eq!(restored.symbol_for_address(4), Some("start"));
    assert_eq!(restored.line_count(), 8);
}
