//! Loader framework tests

use crate::arch::ArchName;
use crate::loader::{
    identify, load, relocate_segment_data, select_match, Confidence, Error, FileFormat, FileInfo,
    Handler, LoadOptions, MatchResult, RelocatableAddresses, RelocatedAddresses, Relocation,
    Source,
};
use crate::memory::{Endianness, Segment, SegmentType};
use crate::platform::tests::{
    amiga_executable, atari_prg, human68k_x, snes_lorom, z80_v1, z80_v2,
};
use crate::platform::PlatformName;
use std::io::Cursor;
use std::str::FromStr;
use test_log::test;

#[test]
fn identifies_amiga_executable_with_certainty() {
    let mut file = Cursor::new(amiga_executable());
    let result = identify(&mut file, "prog", 0, None).unwrap();

    assert_eq!(result.handler, Handler::AmigaHunk);
    assert_eq!(result.platform, Some(PlatformName::Amiga));
    assert_eq!(result.file_format, Some(FileFormat::AmigaHunkExecutable));
    assert_eq!(result.processor, Some(ArchName::M680x0));
    assert_eq!(result.endianness, Endianness::BigEndian);
    assert_eq!(result.confidence, Confidence::Certain);
}

#[test]
fn identifies_each_format() {
    let cases: Vec<(Vec<u8>, &str, FileFormat)> = vec![
        (atari_prg(4), "game.prg", FileFormat::AtariStGemdosExecutable),
        (human68k_x(), "game.x", FileFormat::X68000XExecutable),
        (snes_lorom(0x1234), "game.smc", FileFormat::SnesSmc),
        (z80_v2(), "game.z80", FileFormat::ZxSpectrumZ80V2),
    ];

    for (bytes, name, format) in cases {
        let mut file = Cursor::new(bytes);
        let result = identify(&mut file, name, 0, None).unwrap();

        assert_eq!(result.file_format, Some(format));
        assert_eq!(result.platform, result.handler.platform());
    }
}

#[test]
fn unrecognised_bytes_identify_as_nothing() {
    let mut file = Cursor::new(vec![0x55; 256]);

    assert_eq!(identify(&mut file, "noise.dat", 0, None), None);
}

#[test]
fn identification_honours_embedded_offset() {
    let mut bytes = vec![0xFF; 16];
    bytes.extend(amiga_executable());
    let length = bytes.len() as u64 - 16;
    let mut file = Cursor::new(bytes);

    let result = identify(&mut file, "prog", 16, Some(length)).unwrap();
    assert_eq!(result.file_format, Some(FileFormat::AmigaHunkExecutable));
}

fn candidate(
    handler: Handler,
    file_format: Option<FileFormat>,
    platform: Option<PlatformName>,
    confidence: Confidence,
) -> MatchResult {
    MatchResult {
        file_format,
        platform,
        confidence,
        ..MatchResult::new(handler)
    }
}

#[test]
fn most_confident_candidate_wins() {
    let pool = vec![
        candidate(
            Handler::AtariSt,
            Some(FileFormat::AtariStGemdosExecutable),
            Some(PlatformName::AtariSt),
            Confidence::Possible,
        ),
        candidate(
            Handler::SnesSmc,
            Some(FileFormat::SnesSmc),
            Some(PlatformName::Snes),
            Confidence::Certain,
        ),
        candidate(
            Handler::ZxSpectrumZ80,
            Some(FileFormat::ZxSpectrumZ80V2),
            Some(PlatformName::ZxSpectrum),
            Confidence::Probable,
        ),
    ];

    assert_eq!(select_match(pool).map(|m| m.handler), Some(Handler::SnesSmc));
}

#[test]
fn equal_confidence_goes_to_first_registered() {
    let pool = vec![
        candidate(
            Handler::Human68k,
            Some(FileFormat::X68000XExecutable),
            Some(PlatformName::X68000),
            Confidence::Possible,
        ),
        candidate(
            Handler::SnesSmc,
            Some(FileFormat::SnesSmc),
            Some(PlatformName::Snes),
            Confidence::Possible,
        ),
    ];

    assert_eq!(select_match(pool).map(|m| m.handler), Some(Handler::Human68k));
}

#[test]
fn unselectable_candidates_never_win() {
    let pool = vec![
        candidate(Handler::AtariSt, None, None, Confidence::Certain),
        candidate(
            Handler::ZxSpectrumZ80,
            Some(FileFormat::ZxSpectrumZ80V1),
            Some(PlatformName::ZxSpectrum),
            Confidence::None,
        ),
        candidate(
            Handler::Human68k,
            Some(FileFormat::X68000XExecutable),
            Some(PlatformName::X68000),
            Confidence::Possible,
        ),
    ];

    assert_eq!(select_match(pool).map(|m| m.handler), Some(Handler::Human68k));
    assert_eq!(
        select_match(vec![candidate(Handler::AtariSt, None, None, Confidence::Possible)]),
        None
    );
    assert_eq!(select_match(Vec::new()), None);
}

#[test]
fn winner_without_platform_fails() {
    let pool = vec![
        candidate(
            Handler::AmigaHunk,
            Some(FileFormat::AmigaHunkExecutable),
            None,
            Confidence::Certain,
        ),
        candidate(
            Handler::SnesSmc,
            Some(FileFormat::SnesSmc),
            Some(PlatformName::Snes),
            Confidence::Possible,
        ),
    ];

    assert_eq!(select_match(pool), None);
}

#[test]
fn parsed_file_beats_suffix_guess() {
    let mut file = Cursor::new(amiga_executable());
    let result = identify(&mut file, "prog.prg", 0, None).unwrap();

    assert_eq!(result.handler, Handler::AmigaHunk);
    assert_eq!(result.confidence, Confidence::Certain);
}

#[test]
fn z80_v1_guess_needs_suffix() {
    let mut file = Cursor::new(z80_v1());
    assert_eq!(identify(&mut file, "snapshot.bin", 0, None), None);

    let mut file = Cursor::new(z80_v1());
    let result = identify(&mut file, "snapshot.z80", 0, None).unwrap();
    assert_eq!(result.file_format, Some(FileFormat::ZxSpectrumZ80V1));
    assert_eq!(result.confidence, Confidence::Possible);
}

#[test]
fn confidence_is_ordered() {
    assert!(Confidence::None < Confidence::Possible);
    assert!(Confidence::Possible < Confidence::Probable);
    assert!(Confidence::Probable < Confidence::Certain);
}

#[test]
fn file_formats_parse_and_number() {
    assert_eq!(
        FileFormat::from_str("amigahunkexecutable"),
        Ok(FileFormat::AmigaHunkExecutable)
    );
    assert_eq!(FileFormat::ZxSpectrumZ80V3.id(), 8003);
    assert_eq!(Handler::from_str("snes"), Ok(Handler::SnesSmc));
    assert_eq!(Handler::from_str("ZxSpectrumZ80"), Ok(Handler::ZxSpectrumZ80));
}

#[test]
fn raw_binary_scenario() {
    let mut file = Cursor::new(vec![0x4E; 1024]);
    let options = LoadOptions::binary(ArchName::M68000, 0x1000, 0x10);
    let file_info = load(&mut file, "rom.bin", &options, 0, None).unwrap();
    let segments = file_info.segments();

    assert_eq!(file_info.handler(), Handler::Binary);
    assert_eq!(file_info.processor(), Some(ArchName::M68000));
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].kind(), SegmentType::Code);
    assert_eq!(segments[0].address(), 0x1000);
    assert_eq!(segments[0].length(), 1024);
    assert!(file_info.relocations(0).is_empty());
    assert!(!file_info.has_pending_relocations());
    assert_eq!(file_info.entry_address(), Some(0x1010));
}

#[test]
fn raw_binary_needs_processor() {
    let mut file = Cursor::new(vec![0; 16]);
    let options = LoadOptions {
        is_binary_file: true,
        ..LoadOptions::default()
    };

    match load(&mut file, "rom.bin", &options, 0, None) {
        Err(Error::UnknownProcessor) => {}
        other => panic!("expected missing processor, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn unrecognised_bytes_do_not_load() {
    let mut file = Cursor::new(vec![0x55; 256]);

    match load(&mut file, "noise.dat", &LoadOptions::default(), 0, None) {
        Err(Error::UnrecognizedFormat) => {}
        other => panic!("expected no loader, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn corrupt_container_reported_when_nothing_loads() {
    let mut file = Cursor::new(atari_prg(8));

    match load(&mut file, "game.prg", &LoadOptions::default(), 0, None) {
        Err(Error::CorruptContainer(_)) => {}
        other => panic!("expected corruption, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn raw_binary_must_fit_address_space() {
    let mut file = Cursor::new(vec![0; 32]);
    let options = LoadOptions::binary(ArchName::M68000, 0xFFFF_FFF0, 0);

    match load(&mut file, "rom.bin", &options, 0, None) {
        Err(Error::CorruptContainer(_)) => {}
        other => panic!("expected corruption, got {:?}", other.map(|_| ())),
    }

    let mut file = Cursor::new(vec![0; 16]);
    let options = LoadOptions::binary(ArchName::M68000, 0xFFFF_FFE0, 0);
    let file_info = load(&mut file, "rom.bin", &options, 0, None).unwrap();

    assert_eq!(file_info.segments()[0].end_address(), 0xFFFF_FFF0);
}

#[test]
fn segments_must_hold_their_data() {
    let options = LoadOptions::default();
    let source = Source::new("prog", 0, 64);
    let mut file_info = FileInfo::new(Handler::AmigaHunk, &source, &options);

    assert_eq!(
        file_info
            .add_segment(SegmentType::Code, Some(0), 16, 16, Vec::new(), Vec::new())
            .unwrap(),
        0
    );
    assert!(matches!(
        file_info.add_segment(SegmentType::Data, Some(16), 32, 8, Vec::new(), Vec::new()),
        Err(Error::CorruptContainer(_))
    ));
    assert!(matches!(
        file_info.add_decoded_segment(SegmentType::Data, vec![0; 8], 4, Vec::new()),
        Err(Error::CorruptContainer(_))
    ));
    assert!(matches!(
        file_info.add_segment(SegmentType::Bss, None, 0, u32::MAX, Vec::new(), Vec::new()),
        Err(Error::CorruptContainer(_))
    ));
    assert_eq!(file_info.segments().len(), 1);
}

#[test]
fn load_finds_the_right_handler() {
    let mut file = Cursor::new(human68k_x());
    let file_info = load(&mut file, "game.x", &LoadOptions::default(), 0, None).unwrap();

    assert_eq!(file_info.handler(), Handler::Human68k);
    assert_eq!(file_info.file_format(), Some(FileFormat::X68000XExecutable));
    assert_eq!(file_info.load_address(), 0);
}

#[test]
fn relocation_rewrites_values() {
    let mut segments = vec![
        Segment::decoded(
            SegmentType::Code,
            vec![0, 0, 0, 4, 0x4E, 0x75, 0, 0, 0, 0x10],
            10,
            0x2000,
        ),
        Segment::decoded(SegmentType::Data, vec![0; 32], 32, 0x200A),
    ];
    let relocations = vec![vec![Relocation::new(1, vec![0, 6])], Vec::new()];
    let mut relocated = RelocatedAddresses::new();
    let mut relocatable = RelocatableAddresses::new();

    relocate_segment_data(
        &mut segments,
        Endianness::BigEndian,
        &relocations,
        &mut relocated,
        &mut relocatable,
    )
    .unwrap();

    let data = segments[0].data().unwrap();
    assert_eq!(Endianness::BigEndian.read_u32(data, 0).unwrap(), 0x200E);
    assert_eq!(Endianness::BigEndian.read_u32(data, 6).unwrap(), 0x201A);
    assert!(relocated[&0x200E].contains(&0x2000));
    assert!(relocated[&0x201A].contains(&0x2006));
    assert_eq!(relocatable.iter().copied().collect::<Vec<_>>(), vec![0x2000, 0x2006]);
}

#[test]
fn relocation_out_of_range_is_corrupt() {
    let mut segments = vec![Segment::decoded(SegmentType::Code, vec![0; 4], 4, 0)];
    let relocations = vec![vec![Relocation::new(0, vec![2])]];

    match relocate_segment_data(
        &mut segments,
        Endianness::BigEndian,
        &relocations,
        &mut RelocatedAddresses::new(),
        &mut RelocatableAddresses::new(),
    ) {
        Err(Error::CorruptContainer(_)) => {}
        other => panic!("expected corruption, got {:?}", other),
    }
}

#[test]
fn file_relocation_runs_once() {
    let mut file = Cursor::new(amiga_executable());
    let mut file_info = load(&mut file, "prog", &LoadOptions::default(), 0, None).unwrap();
    let mut relocated = RelocatedAddresses::new();
    let mut relocatable = RelocatableAddresses::new();

    file_info.cache_all_segment_data(&mut file).unwrap();
    assert!(file_info.has_pending_relocations());

    file_info.relocate(&mut relocated, &mut relocatable).unwrap();
    file_info.relocate(&mut relocated, &mut relocatable).unwrap();

    let data = file_info.segments()[0].data().unwrap();
    assert_eq!(Endianness::BigEndian.read_u32(data, 0).unwrap(), 12);
    assert!(relocated[&12].contains(&0));
    assert!(!file_info.has_pending_relocations());
}
