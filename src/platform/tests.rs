//! Container format tests, plus in-memory fixture builders shared with the
//! loader and database tests.

use crate::loader::{Confidence, Error, FileFormat, Handler, InternalData, LoadOptions, Source};
use crate::memory::{Endianness, SegmentType};
use crate::platform::{amiga, atarist, human68k, snes, zxspectrum, PlatformName};
use std::io::Cursor;
use std::str::FromStr;

/// Appends values to a growing fixture in one byte order.
pub struct Writer {
    pub bytes: Vec<u8>,
    endianness: Endianness,
}

impl Writer {
    pub fn new(endianness: Endianness) -> Self {
        Writer {
            bytes: Vec::new(),
            endianness,
        }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        let mut buf = [0; 2];
        self.endianness.write_u16(&mut buf, 0, value).unwrap();
        self.bytes.extend_from_slice(&buf);
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        let mut buf = [0; 4];
        self.endianness.write_u32(&mut buf, 0, value).unwrap();
        self.bytes.extend_from_slice(&buf);
        self
    }

    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(data);
        self
    }
}

/// A two hunk Amiga executable.
///
/// Hunk 0 is 8 bytes of code whose first longword is relocated against hunk
/// 1, holding offset 4, and which names `start` at offset 4. Hunk 1 is 16
/// bytes of chip memory BSS.
pub fn amiga_executable() -> Vec<u8> {
    let mut w = Writer::new(Endianness::BigEndian);

    w.u32(amiga::HUNK_HEADER).u32(0).u32(2).u32(0).u32(1);
    w.u32(2).u32(4 | amiga::MEMF_CHIP);

    w.u32(amiga::HUNK_CODE).u32(2);
    w.raw(&[0x00, 0x00, 0x00, 0x04, 0x4E, 0x75, 0x4E, 0x75]);
    w.u32(amiga::HUNK_RELOC32).u32(1).u32(1).u32(0).u32(0);
    w.u32(amiga::HUNK_SYMBOL).u32(2).raw(b"start\0\0\0").u32(4).u32(0);
    w.u32(amiga::HUNK_END);

    w.u32(amiga::HUNK_BSS).u32(4);
    w.u32(amiga::HUNK_END);

    w.bytes
}

/// An Atari ST PRG with 8 bytes of text, 4 of data and 16 of BSS.
///
/// Fixups sit at offsets 4 and 8; the symbol `main` labels offset 0.
pub fn atari_prg(second_fixup_delta: u8) -> Vec<u8> {
    let mut w = Writer::new(Endianness::BigEndian);

    w.u16(atarist::MAGIC_WORD)
        .u32(8)
        .u32(4)
        .u32(16)
        .u32(14)
        .u32(0)
        .u32(0)
        .u16(0);
    w.raw(&[0x4E, 0x71, 0x4E, 0x71, 0x00, 0x00, 0x00, 0x06]);
    w.raw(&[0x00, 0x00, 0x00, 0x00]);
    w.raw(b"main\0\0\0\0").u16(atarist::SYMBOL_TEXT_BASED).u32(0);
    w.u32(4).u8(second_fixup_delta).u8(0);

    w.bytes
}

/// A Human68k X executable with an escaped 32-bit relocation delta.
pub fn human68k_x() -> Vec<u8> {
    let mut w = Writer::new(Endianness::BigEndian);

    w.u16(human68k::MAGIC_WORD).u8(0).u8(0);
    w.u32(0).u32(2).u32(8).u32(4).u32(0x10).u32(8).u32(12);
    for _ in 0..8 {
        w.u32(0);
    }

    w.raw(&[0x00, 0x00, 0x00, 0x02, 0x4E, 0x75, 0x00, 0x00]);
    w.raw(&[0x00, 0x00, 0x00, 0x00]);
    w.u16(0).u16(1).u32(8);
    w.u16(0x0201).u32(2).raw(b"start\0");

    w.bytes
}

/// A 32K LoROM image behind a copier header, resetting to `0x8100`.
pub fn snes_lorom(checksum: u16) -> Vec<u8> {
    let mut file = vec![0; snes::COPIER_HEADER_SIZE as usize + 0x8000];
    file[8..11].copy_from_slice(&snes::COPIER_SIGNATURE);

    let mut w = Writer::new(Endianness::LittleEndian);
    w.raw(b"PEASAUCE TEST        ");
    w.u8(0x20).u8(0).u8(8).u8(0).u8(1).u8(0x33).u8(0);
    w.u16(0x1234 ^ 0xFFFF).u16(checksum);

    let header = snes::COPIER_HEADER_SIZE as usize + snes::LOROM_HEADER_OFFSET as usize;
    file[header..header + w.bytes.len()].copy_from_slice(&w.bytes);
    file[header + 0x3C] = 0x00;
    file[header + 0x3D] = 0x81;

    file
}

/// Run-length compress data in the `.z80` style.
pub fn z80_compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let value = data[i];
        let run = data[i..]
            .iter()
            .take(255)
            .take_while(|&&b| b == value)
            .count();

        if run >= 5 || (value == 0xED && run >= 2) {
            out.extend_from_slice(&[0xED, 0xED, run as u8, value]);
            i += run;
        } else {
            out.push(value);
            i += 1;
        }
    }

    out
}

/// The 48K RAM image used by the snapshot fixtures.
pub fn z80_ram() -> Vec<u8> {
    let mut ram = vec![0; zxspectrum::RAM_SIZE];
    ram[0] = 0x11;
    ram[0x4000] = 0xC9;
    ram[0x8000] = 0x33;
    ram
}

/// A compressed version 1 snapshot with the PC at `0x8000`.
pub fn z80_v1() -> Vec<u8> {
    let mut w = Writer::new(Endianness::LittleEndian);

    w.u8(0x12).u8(0x34).u16(0x1111).u16(0x2222).u16(0x8000).u16(0xFF00);
    w.u8(0x3F).u8(0x85).u8(0x20 | 0x02 | 0x01);
    w.raw(&[0; 17]);
    w.raw(&z80_compress(&z80_ram()));
    w.raw(&[0x00, 0xED, 0xED, 0x00]);

    w.bytes
}

/// A version 2 snapshot of a 48K machine with the PC at `0x5000`.
///
/// Page 4 is compressed, the others are stored raw.
pub fn z80_v2() -> Vec<u8> {
    let mut w = Writer::new(Endianness::LittleEndian);
    let ram = z80_ram();

    w.raw(&[0; 30]);
    w.u16(zxspectrum::V2_EXTRA_HEADER_SIZE).u16(0x5000).u8(0);
    w.raw(&[0; 20]);

    w.u16(0xFFFF).u8(8).raw(&ram[..0x4000]);
    let compressed = z80_compress(&ram[0x4000..0x8000]);
    w.u16(compressed.len() as u16).u8(4).raw(&compressed);
    w.u16(0xFFFF).u8(5).raw(&ram[0x8000..]);

    w.bytes
}

fn identify_one(
    handler: Handler,
    bytes: &[u8],
    file_name: &str,
) -> Vec<crate::loader::MatchResult> {
    let mut file = Cursor::new(bytes.to_vec());
    let source = Source::new(file_name, 0, bytes.len() as u64);

    handler.identify(&mut file, &source).unwrap()
}

fn load_one(
    handler: Handler,
    bytes: &[u8],
    file_name: &str,
) -> crate::loader::Result<crate::loader::FileInfo> {
    let mut file = Cursor::new(bytes.to_vec());
    let source = Source::new(file_name, 0, bytes.len() as u64);

    handler.load(&mut file, &source, &LoadOptions::default())
}

#[test]
fn platform_names_parse() {
    assert_eq!(PlatformName::from_str("Amiga"), Ok(PlatformName::Amiga));
    assert_eq!(PlatformName::from_str("x68k"), Ok(PlatformName::X68000));
    assert_eq!(PlatformName::from_str("gameboy"), Err(()));

    for platform in PlatformName::iter() {
        assert_eq!(PlatformName::from_id(platform.id()), Some(platform));
    }
}

#[test]
fn amiga_hunks_become_segments() {
    let file_info = load_one(Handler::AmigaHunk, &amiga_executable(), "prog").unwrap();
    let segments = file_info.segments();

    assert_eq!(file_info.file_format(), Some(FileFormat::AmigaHunkExecutable));
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].kind(), SegmentType::Code);
    assert_eq!(segments[0].file_offset(), Some(36));
    assert_eq!(segments[0].length(), 8);
    assert_eq!(segments[1].kind(), SegmentType::Bss);
    assert_eq!(segments[1].address(), 8);
    assert_eq!(segments[1].length(), 16);
    assert_eq!(segments[1].data_length(), 0);

    assert_eq!(file_info.relocations(0).len(), 1);
    assert_eq!(file_info.relocations(0)[0].target_segment, 1);
    assert_eq!(file_info.relocations(0)[0].offsets, vec![0]);
    assert_eq!(file_info.symbols(0)[0].name, "start");
    assert_eq!(file_info.symbols(0)[0].offset, 4);
}

#[test]
fn amiga_segment_headers() {
    let file_info = load_one(Handler::AmigaHunk, &amiga_executable(), "prog").unwrap();
    let internal = file_info.internal_data();

    assert_eq!(
        Handler::AmigaHunk.segment_header(internal, 0, 0),
        Some("SECTION name000000, CODE".to_string())
    );
    assert_eq!(
        Handler::AmigaHunk.segment_header(internal, 1, 8),
        Some("SECTION name000008, BSS, CHIP".to_string())
    );
    assert_eq!(Handler::AmigaHunk.segment_header(internal, 2, 0), None);
}

#[test]
fn amiga_hunk_count_must_match_header() {
    let mut w = Writer::new(Endianness::BigEndian);
    w.raw(&amiga_executable());
    w.u32(amiga::HUNK_BSS).u32(1).u32(amiga::HUNK_END);
    let bytes = w.bytes;

    match load_one(Handler::AmigaHunk, &bytes, "prog") {
        Err(Error::CorruptContainer(_)) => {}
        other => panic!("expected corruption, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn amiga_library_identified_not_loaded() {
    let mut w = Writer::new(Endianness::BigEndian);
    w.u32(amiga::HUNK_UNIT).u32(1).raw(b"unit");

    let matches = identify_one(Handler::AmigaHunk, &w.bytes, "lib.o");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].file_format, Some(FileFormat::AmigaHunkLibrary));

    match load_one(Handler::AmigaHunk, &w.bytes, "lib.o") {
        Err(Error::LoadRejected(_)) => {}
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn amiga_rejects_foreign_files() {
    let bytes = atari_prg(4);

    assert!(identify_one(Handler::AmigaHunk, &bytes, "x.prg").is_empty());
    match load_one(Handler::AmigaHunk, &bytes, "x.prg") {
        Err(Error::LoadRejected(_)) => {}
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn atari_prg_merges_text_and_data() {
    let file_info = load_one(Handler::AtariSt, &atari_prg(4), "game.prg").unwrap();
    let segments = file_info.segments();

    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].file_offset(), Some(atarist::HEADER_SIZE));
    assert_eq!(segments[0].length(), 12);
    assert_eq!(segments[1].kind(), SegmentType::Bss);
    assert_eq!(segments[1].address(), 12);
    assert_eq!(file_info.relocations(0)[0].offsets, vec![4, 8]);
    assert_eq!(file_info.symbols(0)[0].name, "main");
    assert!(file_info.symbols(0)[0].is_code);
}

#[test]
fn atari_fixups_must_lie_in_image() {
    match load_one(Handler::AtariSt, &atari_prg(8), "game.prg") {
        Err(Error::CorruptContainer(_)) => {}
        other => panic!("expected corruption, got {:?}", other.map(|_| ())),
    }

    let matches = identify_one(Handler::AtariSt, &atari_prg(8), "game.prg");
    assert_eq!(matches[0].confidence, Confidence::Possible);
    assert!(!matches[0].is_selectable());
}

#[test]
fn human68k_escaped_relocation_counts_six_bytes() {
    let file_info = load_one(Handler::Human68k, &human68k_x(), "game.x").unwrap();

    assert_eq!(file_info.relocations(0)[0].offsets, vec![0, 8]);
    assert_eq!(file_info.symbols(0).len(), 1);
    assert_eq!(file_info.symbols(0)[0].name, "start");
    assert_eq!(file_info.symbols(0)[0].offset, 2);
    assert_eq!(file_info.entry_point().offset, 2);
    assert_eq!(file_info.segments()[1].length(), 0x10);

    match file_info.internal_data() {
        InternalData::Human68k(header) => assert_eq!(header.relocation_table_size, 8),
        other => panic!("unexpected internal data {:?}", other),
    }
}

#[test]
fn snes_lorom_loads_at_bank_zero() {
    let file_info = load_one(Handler::SnesSmc, &snes_lorom(0x1234), "game.smc").unwrap();
    let segment = &file_info.segments()[0];

    assert_eq!(segment.address(), snes::LOROM_LOAD_ADDRESS);
    assert_eq!(segment.file_offset(), Some(snes::COPIER_HEADER_SIZE));
    assert_eq!(segment.length(), 0x8000);
    assert_eq!(file_info.entry_address(), Some(0x8100));

    match file_info.internal_data() {
        InternalData::SnesSmc(header) => {
            assert_eq!(header.title, "PEASAUCE TEST");
            assert_eq!(header.layout, snes::RomLayout::LoRom);
        }
        other => panic!("unexpected internal data {:?}", other),
    }
}

#[test]
fn snes_checksum_mismatch_is_corrupt() {
    let bytes = snes_lorom(0x1235);

    match load_one(Handler::SnesSmc, &bytes, "game.smc") {
        Err(Error::CorruptContainer(_)) => {}
        other => panic!("expected corruption, got {:?}", other.map(|_| ())),
    }

    let matches = identify_one(Handler::SnesSmc, &bytes, "game.smc");
    assert!(!matches[0].is_selectable());
}

#[test]
fn z80_decompression() {
    let mut out = Vec::new();
    zxspectrum::decompress(&[1, 0xED, 0xED, 3, 9, 2, 0x00, 0xED, 0xED, 0x00, 7], true, &mut out);
    assert_eq!(out, vec![1, 9, 9, 9, 2]);

    let ram = z80_ram();
    let mut out = Vec::new();
    zxspectrum::decompress(&z80_compress(&ram), false, &mut out);
    assert_eq!(out, ram);
}

#[test]
fn z80_v1_snapshot() {
    let file_info = load_one(Handler::ZxSpectrumZ80, &z80_v1(), "game.z80").unwrap();
    let segment = &file_info.segments()[0];

    assert_eq!(file_info.file_format(), Some(FileFormat::ZxSpectrumZ80V1));
    assert_eq!(segment.address(), zxspectrum::RAM_ADDRESS);
    assert_eq!(segment.file_offset(), None);
    assert_eq!(segment.data(), Some(&z80_ram()[..]));
    assert_eq!(file_info.entry_address(), Some(0x8000));

    match file_info.internal_data() {
        InternalData::ZxSpectrumZ80(header) => {
            assert_eq!(header.af, 0x1234);
            assert_eq!(header.r, 0x85);
            assert_eq!(header.border, 1);
            assert!(header.compressed);
        }
        other => panic!("unexpected internal data {:?}", other),
    }
}

#[test]
fn z80_v1_needs_suffix() {
    let matches = identify_one(Handler::ZxSpectrumZ80, &z80_v1(), "game.bin");
    assert_eq!(matches[0].confidence, Confidence::None);
    assert!(!matches[0].is_selectable());

    match load_one(Handler::ZxSpectrumZ80, &z80_v1(), "game.bin") {
        Err(Error::LoadRejected(_)) => {}
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn z80_v2_snapshot_pages() {
    let bytes = z80_v2();
    let matches = identify_one(Handler::ZxSpectrumZ80, &bytes, "game.bin");

    assert_eq!(matches[0].file_format, Some(FileFormat::ZxSpectrumZ80V2));
    assert_eq!(matches[0].confidence, Confidence::Probable);
    assert_eq!(matches[0].platform, Some(PlatformName::ZxSpectrum));

    let file_info = load_one(Handler::ZxSpectrumZ80, &bytes, "game.bin").unwrap();
    assert_eq!(file_info.segments()[0].data(), Some(&z80_ram()[..]));
    assert_eq!(file_info.entry_address(), Some(0x5000));
}
