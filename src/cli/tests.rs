use crate::arch::ArchName;
use crate::cli::{parse_address, LoadForm};
use crate::loader::LoadOptions;
use std::io;
use std::path::PathBuf;

#[test]
fn addresses_need_a_hex_prefix() {
    assert_eq!(parse_address("$1000"), Some(0x1000));
    assert_eq!(parse_address("0x00C0FFEE"), Some(0xC0FFEE));
    assert_eq!(parse_address("0XFF"), Some(0xFF));
    assert_eq!(parse_address("1000"), None);
    assert_eq!(parse_address("$"), None);
    assert_eq!(parse_address("0x1_0000_0000"), None);
}

#[test]
fn load_forms() {
    assert_eq!(
        LoadForm::from_args(&["game.prg"]).unwrap(),
        LoadForm::Executable {
            input: PathBuf::from("game.prg")
        }
    );
    assert_eq!(
        LoadForm::from_args(&["game.PSPROJ"]).unwrap(),
        LoadForm::Project {
            project: PathBuf::from("game.PSPROJ"),
            input: None
        }
    );
    assert_eq!(
        LoadForm::from_args(&["game.psproj", "game.prg"]).unwrap(),
        LoadForm::Project {
            project: PathBuf::from("game.psproj"),
            input: Some(PathBuf::from("game.prg"))
        }
    );
    assert_eq!(
        LoadForm::from_args(&["rom.bin", "m68000", "$1000", "0x1010"]).unwrap(),
        LoadForm::Binary {
            input: PathBuf::from("rom.bin"),
            options: LoadOptions::binary(ArchName::M68000, 0x1000, 0x10)
        }
    );
}

#[test]
fn bad_load_forms_are_usage_errors() {
    let cases: Vec<&[&str]> = vec![
        &["game.prg", "other.prg"],
        &["rom.bin", "6502", "$1000", "$1000"],
        &["rom.bin", "z80", "1000", "$1000"],
        &["rom.bin", "z80", "$1000", "$0FFF"],
        &["a", "b", "c"],
    ];

    for args in cases {
        let err = LoadForm::from_args(args).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(err.to_string().contains("Usage:"));
    }
}
