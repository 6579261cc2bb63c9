// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Parses thin and fat Mach-O images by walking their load commands.

use super::detect::{FAT_MAGIC, MAX_FAT_ARCHES, MH_MAGIC, MH_MAGIC_64};
use super::source::{ByteSource, Endian, Fields, Reader};
use super::{
    Architecture, BinaryKind, Hardening, Image, Import, ParseError, Section, SectionFlags,
    SectionKind, SignatureBlob, SignatureKind, VersionField,
};

type Result<T> = std::result::Result<T, ParseError>;

const FAT_HEADER_SIZE: u64 = 8;
const FAT_ARCH_SIZE: u64 = 20;

const MH_OBJECT: u32 = 0x1;
const MH_EXECUTE: u32 = 0x2;
const MH_DYLIB: u32 = 0x6;
const MH_BUNDLE: u32 = 0x8;

const MH_ALLOW_STACK_EXECUTION: u32 = 0x0002_0000;
const MH_PIE: u32 = 0x0020_0000;

const LC_SEGMENT: u32 = 0x1;
const LC_SYMTAB: u32 = 0x2;
const LC_LOAD_DYLIB: u32 = 0xc;
const LC_SEGMENT_64: u32 = 0x19;
const LC_CODE_SIGNATURE: u32 = 0x1d;
const LC_SOURCE_VERSION: u32 = 0x2a;
const LC_LOAD_WEAK_DYLIB: u32 = 0x8000_0018;
const LC_REEXPORT_DYLIB: u32 = 0x8000_001f;
const LC_MAIN: u32 = 0x8000_0028;

const VM_PROT_READ: u32 = 0x1;
const VM_PROT_WRITE: u32 = 0x2;
const VM_PROT_EXECUTE: u32 = 0x4;

const SECTION_TYPE_MASK: u32 = 0xff;
const S_ZEROFILL: u32 = 0x1;
const S_GB_ZEROFILL: u32 = 0xc;
const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;
const S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
const S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;

const STACK_PROTECTOR_SYMBOLS: [&[u8]; 2] = [b"___stack_chk_fail\0", b"___stack_chk_guard\0"];

/// Sizes that differ between 32- and 64-bit images.
struct Layout {
    is_64: bool,
    header_size: u64,
    segment_command: u32,
    segment_header_size: usize,
    section_size: usize,
}

const LAYOUT_32: Layout = Layout {
    is_64: false,
    header_size: 28,
    segment_command: LC_SEGMENT,
    segment_header_size: 56,
    section_size: 68,
};

const LAYOUT_64: Layout = Layout {
    is_64: true,
    header_size: 32,
    segment_command: LC_SEGMENT_64,
    segment_header_size: 72,
    section_size: 80,
};

pub(crate) fn parse(source: &dyn ByteSource) -> Result<Image> {
    let reader = Reader::new(source);
    let head = reader.header(0, 8, "Mach-O magic")?;
    let be_magic = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    let base = if be_magic == FAT_MAGIC {
        first_slice(&reader, &head)?
    } else {
        0
    };
    parse_thin(&reader, base)
}

/// Locate the first architecture slice of a fat image.
fn first_slice(reader: &Reader<'_>, head: &[u8]) -> Result<u64> {
    let count = Fields::new(head, Endian::Big, "fat header").u32(4)?;
    if count == 0 || count > MAX_FAT_ARCHES {
        return Err(ParseError::MalformedHeader(format!(
            "fat header declares {count} architectures"
        )));
    }
    let arch = reader.header(FAT_HEADER_SIZE, FAT_ARCH_SIZE, "fat architecture")?;
    let f = Fields::new(&arch, Endian::Big, "fat architecture");
    let offset = u64::from(f.u32(8)?);
    let size = u64::from(f.u32(12)?);
    if offset < FAT_HEADER_SIZE + FAT_ARCH_SIZE || !reader.contains(offset, size) {
        return Err(ParseError::MalformedHeader(format!(
            "fat slice {offset:#x}+{size:#x} outside file of {} bytes",
            reader.len()
        )));
    }
    Ok(offset)
}

fn parse_thin(reader: &Reader<'_>, base: u64) -> Result<Image> {
    let magic_bytes = reader.header(base, 4, "Mach-O magic")?;
    let raw = [magic_bytes[0], magic_bytes[1], magic_bytes[2], magic_bytes[3]];
    let (layout, endian) = match (u32::from_le_bytes(raw), u32::from_be_bytes(raw)) {
        (MH_MAGIC, _) => (&LAYOUT_32, Endian::Little),
        (MH_MAGIC_64, _) => (&LAYOUT_64, Endian::Little),
        (_, MH_MAGIC) => (&LAYOUT_32, Endian::Big),
        (_, MH_MAGIC_64) => (&LAYOUT_64, Endian::Big),
        (le, _) => {
            return Err(ParseError::UnsupportedVariant(format!("Mach-O magic {le:#x}")));
        }
    };

    let header = reader.header(base, layout.header_size, "Mach-O header")?;
    let h = Fields::new(&header, endian, "Mach-O header");
    let cputype = h.u32(4)?;
    let filetype = h.u32(12)?;
    let ncmds = h.u32(16)?;
    let sizeofcmds = h.u32(20)?;
    let flags = h.u32(24)?;

    let commands = reader.bytes(
        base + layout.header_size,
        u64::from(sizeofcmds),
        "load commands",
    )?;
    let all = Fields::new(&commands, endian, "load command");

    let mut image = Image {
        architecture: Some(architecture(cputype)),
        bitness: if layout.is_64 { 64 } else { 32 },
        kind: Some(match filetype {
            MH_OBJECT => BinaryKind::Object,
            MH_EXECUTE => BinaryKind::Executable,
            MH_DYLIB | MH_BUNDLE => BinaryKind::SharedLibrary,
            _ => BinaryKind::Other,
        }),
        ..Image::default()
    };
    let mut stack_protector = false;

    let mut at = 0usize;
    for index in 0..ncmds {
        let cmd = all.u32(at)?;
        let cmdsize = all.u32(at + 4)? as usize;
        let end = at
            .checked_add(cmdsize)
            .filter(|end| cmdsize >= 8 && *end <= commands.len())
            .ok_or_else(|| {
                ParseError::MalformedHeader(format!(
                    "load command {index} of {cmdsize} bytes overruns the command area"
                ))
            })?;
        let body = &commands[at..end];
        let c = Fields::new(body, endian, "load command");
        match cmd {
            _ if cmd == layout.segment_command => {
                read_segment(&c, body, layout, endian, base, &mut image.sections)?;
            }
            LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB => {
                image.imports.push(read_dylib(&c, body)?);
            }
            LC_MAIN => image.entry_point = Some(c.u64(8)?),
            LC_SOURCE_VERSION => {
                if let Some(value) = source_version(c.u64(8)?) {
                    image.version_fields.push(VersionField {
                        source: "macho-source-version",
                        value,
                    });
                }
            }
            LC_SYMTAB => {
                let stroff = u64::from(c.u32(16)?);
                let strsize = u64::from(c.u32(20)?);
                let strtab = reader.bytes(base + stroff, strsize, "symbol string table")?;
                stack_protector |= STACK_PROTECTOR_SYMBOLS
                    .iter()
                    .any(|symbol| strtab.windows(symbol.len()).any(|w| w == *symbol));
            }
            LC_CODE_SIGNATURE => {
                let offset = base + u64::from(c.u32(8)?);
                let size = u64::from(c.u32(12)?);
                image.signatures.push(SignatureBlob {
                    kind: SignatureKind::CodeSignature,
                    bytes: reader.bytes(offset, size, "code signature")?,
                    range: offset..offset + size,
                });
            }
            _ => {}
        }
        at = end;
    }

    image.hardening = Hardening {
        pie: flags & MH_PIE != 0 || image.kind == Some(BinaryKind::SharedLibrary),
        nx_stack: flags & MH_ALLOW_STACK_EXECUTION == 0,
        stack_protector,
        relro: false,
    };
    Ok(image)
}

fn architecture(cputype: u32) -> Architecture {
    match cputype {
        7 => Architecture::X86,
        0x0100_0007 => Architecture::X86_64,
        12 => Architecture::Arm,
        0x0100_000c => Architecture::Aarch64,
        18 => Architecture::PowerPc,
        0x0100_0012 => Architecture::PowerPc64,
        other => Architecture::Unknown(other),
    }
}

fn read_segment(
    c: &Fields<'_>,
    body: &[u8],
    layout: &Layout,
    endian: Endian,
    base: u64,
    sections: &mut Vec<Section>,
) -> Result<()> {
    let is_64 = layout.is_64;
    let (vmaddr, vmsize, fileoff, filesize, initprot, nsects) = if is_64 {
        (c.u64(24)?, c.u64(32)?, c.u64(40)?, c.u64(48)?, c.u32(60)?, c.u32(64)?)
    } else {
        (
            u64::from(c.u32(24)?),
            u64::from(c.u32(28)?),
            u64::from(c.u32(32)?),
            u64::from(c.u32(36)?),
            c.u32(44)?,
            c.u32(48)?,
        )
    };
    let protection = SectionFlags {
        read: initprot & VM_PROT_READ != 0,
        write: initprot & VM_PROT_WRITE != 0,
        execute: initprot & VM_PROT_EXECUTE != 0,
    };
    sections.push(Section {
        name: c.fixed_str(8, 16)?,
        kind: SectionKind::Segment,
        virtual_address: vmaddr,
        virtual_size: vmsize,
        file_offset: base.saturating_add(fileoff),
        file_size: filesize,
        flags: protection,
        loadable: true,
    });

    let declared = (nsects as usize).saturating_mul(layout.section_size);
    let available = body.len().saturating_sub(layout.segment_header_size);
    if declared > available {
        return Err(ParseError::MalformedHeader(format!(
            "segment declares {nsects} sections but its command holds {available} bytes"
        )));
    }
    for i in 0..nsects as usize {
        let start = layout.segment_header_size + i * layout.section_size;
        let s = Fields::new(&body[start..start + layout.section_size], endian, "section");
        let (addr, size, offset, flags) = if is_64 {
            (s.u64(32)?, s.u64(40)?, s.u32(48)?, s.u32(64)?)
        } else {
            (
                u64::from(s.u32(32)?),
                u64::from(s.u32(36)?),
                s.u32(40)?,
                s.u32(56)?,
            )
        };
        let zerofill = matches!(
            flags & SECTION_TYPE_MASK,
            S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
        );
        let instructions = flags & (S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS) != 0;
        sections.push(Section {
            name: s.fixed_str(0, 16)?,
            kind: SectionKind::Section,
            virtual_address: addr,
            virtual_size: size,
            file_offset: if zerofill { 0 } else { base.saturating_add(u64::from(offset)) },
            file_size: if zerofill { 0 } else { size },
            flags: SectionFlags {
                execute: protection.execute && instructions,
                ..protection
            },
            loadable: true,
        });
    }
    Ok(())
}

fn read_dylib(c: &Fields<'_>, body: &[u8]) -> Result<Import> {
    let name_offset = c.u32(8)? as usize;
    let current = c.u32(16)?;
    let compatibility = c.u32(20)?;
    let name = body
        .get(name_offset..)
        .filter(|_| name_offset >= 24)
        .map(|raw| {
            let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
            String::from_utf8_lossy(&raw[..end]).into_owned()
        })
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            ParseError::MalformedHeader(format!("dylib name offset {name_offset} outside command"))
        })?;
    let mut import = Import::unpinned(name);
    if current != 0 {
        import.version_requirements.push(dylib_version(current));
    }
    if compatibility != 0 {
        import.version_hint = Some(dylib_version(compatibility));
    }
    Ok(import)
}

/// Decode a packed `xxxx.yy.zz` dylib version.
fn dylib_version(packed: u32) -> String {
    format!("{}.{}.{}", packed >> 16, (packed >> 8) & 0xff, packed & 0xff)
}

/// Decode a packed `A.B.C.D.E` source version (24.10.10.10.10 bits).
///
/// Trailing zero components beyond the third are dropped; all-zero is `None`.
fn source_version(packed: u64) -> Option<String> {
    if packed == 0 {
        return None;
    }
    let parts = [
        packed >> 40,
        (packed >> 30) & 0x3ff,
        (packed >> 20) & 0x3ff,
        (packed >> 10) & 0x3ff,
        packed & 0x3ff,
    ];
    let keep = parts[3..]
        .iter()
        .rposition(|p| *p != 0)
        .map_or(3, |i| i + 4);
    Some(
        parts[..keep]
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("."),
    )
}
