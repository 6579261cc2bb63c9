// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Parses ELF headers, program and section tables, the dynamic section and
//! `verneed` requirements. Only header and table ranges are read.

use std::collections::BTreeMap;

use super::source::{string_at, ByteSource, Endian, Fields, Reader};
use super::{
    Architecture, BinaryKind, Hardening, Image, Import, ParseError, Section, SectionFlags,
    SectionKind,
};

type Result<T> = std::result::Result<T, ParseError>;

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

const ET_REL: u16 = 1;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;
const PT_NOTE: u32 = 4;
const PT_PHDR: u32 = 6;
const PT_TLS: u32 = 7;
const PT_GNU_EH_FRAME: u32 = 0x6474_e550;
const PT_GNU_STACK: u32 = 0x6474_e551;
const PT_GNU_RELRO: u32 = 0x6474_e552;
const PT_GNU_PROPERTY: u32 = 0x6474_e553;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

const SHT_NULL: u32 = 0;
const SHT_STRTAB: u32 = 3;
const SHT_DYNAMIC: u32 = 6;
const SHT_NOBITS: u32 = 8;
const SHT_GNU_VERNEED: u32 = 0x6fff_fffe;
const SHF_WRITE: u64 = 1;
const SHF_ALLOC: u64 = 2;
const SHF_EXECINSTR: u64 = 4;

const DT_NULL: u64 = 0;
const DT_NEEDED: u64 = 1;
const DT_STRTAB: u64 = 5;
const DT_STRSZ: u64 = 10;
const DT_FLAGS_1: u64 = 0x6fff_fffb;
const DF_1_PIE: u64 = 0x0800_0000;

/// Upper bound on `verneed` records walked, against cyclic `vn_next` chains.
const MAX_VERNEED_ENTRIES: usize = 4096;

const STACK_PROTECTOR_SYMBOLS: [&[u8]; 2] = [b"__stack_chk_fail\0", b"__stack_chk_guard\0"];

/// Field offsets that differ between ELFCLASS32 and ELFCLASS64.
struct Layout {
    is_64: bool,
    header_size: u64,
    e_phoff: usize,
    e_shoff: usize,
    e_phentsize: usize,
    phdr_size: usize,
    shdr_size: usize,
    dyn_size: usize,
}

const LAYOUT_32: Layout = Layout {
    is_64: false,
    header_size: 52,
    e_phoff: 28,
    e_shoff: 32,
    e_phentsize: 42,
    phdr_size: 32,
    shdr_size: 40,
    dyn_size: 8,
};

const LAYOUT_64: Layout = Layout {
    is_64: true,
    header_size: 64,
    e_phoff: 32,
    e_shoff: 40,
    e_phentsize: 54,
    phdr_size: 56,
    shdr_size: 64,
    dyn_size: 16,
};

struct ProgramHeader {
    p_type: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
}

struct SectionHeader {
    name: String,
    sh_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
}

pub(crate) fn parse(source: &dyn ByteSource) -> Result<Image> {
    let reader = Reader::new(source);
    let ident = reader.header(0, 16, "ELF identification")?;
    let layout = match ident[EI_CLASS] {
        ELFCLASS32 => &LAYOUT_32,
        ELFCLASS64 => &LAYOUT_64,
        other => {
            return Err(ParseError::UnsupportedVariant(format!("ELF class {other}")));
        }
    };
    let endian = match ident[EI_DATA] {
        ELFDATA2LSB => Endian::Little,
        ELFDATA2MSB => Endian::Big,
        other => {
            return Err(ParseError::UnsupportedVariant(format!("ELF data encoding {other}")));
        }
    };

    let header = reader.header(0, layout.header_size, "ELF header")?;
    let h = Fields::new(&header, endian, "ELF header");
    let e_type = h.u16(16)?;
    let e_machine = h.u16(18)?;
    let e_entry = h.word(24, layout.is_64)?;
    let e_phoff = h.word(layout.e_phoff, layout.is_64)?;
    let e_shoff = h.word(layout.e_shoff, layout.is_64)?;
    let e_phentsize = h.u16(layout.e_phentsize)?;
    let e_phnum = h.u16(layout.e_phentsize + 2)?;
    let e_shentsize = h.u16(layout.e_phentsize + 4)?;
    let e_shnum = h.u16(layout.e_phentsize + 6)?;
    let e_shstrndx = h.u16(layout.e_phentsize + 8)?;

    let program_headers =
        read_program_headers(&reader, layout, endian, e_phoff, e_phentsize, e_phnum)?;
    let section_headers = read_section_headers(
        &reader,
        layout,
        endian,
        e_shoff,
        e_shentsize,
        e_shnum,
        e_shstrndx,
    )?;

    let dynamic = read_dynamic(&reader, layout, endian, &program_headers, &section_headers)?;
    let requirements = read_verneed(&reader, endian, &section_headers)?;
    let stack_protector = has_stack_protector(&reader, &section_headers, &dynamic.strtab)?;

    let has_interp = program_headers.iter().any(|p| p.p_type == PT_INTERP);
    let kind = match e_type {
        ET_REL => BinaryKind::Object,
        ET_EXEC => BinaryKind::Executable,
        ET_DYN if has_interp || dynamic.flags_1 & DF_1_PIE != 0 => BinaryKind::Executable,
        ET_DYN => BinaryKind::SharedLibrary,
        _ => BinaryKind::Other,
    };
    let gnu_stack = program_headers.iter().find(|p| p.p_type == PT_GNU_STACK);
    let hardening = Hardening {
        pie: e_type == ET_DYN,
        nx_stack: gnu_stack.is_some_and(|p| p.flags & PF_X == 0),
        stack_protector,
        relro: program_headers.iter().any(|p| p.p_type == PT_GNU_RELRO),
    };

    let imports = dynamic
        .needed
        .into_iter()
        .map(|name| match requirements.get(&name) {
            Some(versions) => Import {
                version_hint: highest_version(versions),
                version_requirements: versions.clone(),
                name,
            },
            None => Import::unpinned(name),
        })
        .collect();

    let mut sections: Vec<Section> = program_headers
        .iter()
        .map(|p| Section {
            name: segment_name(p.p_type),
            kind: SectionKind::Segment,
            virtual_address: p.vaddr,
            virtual_size: p.memsz,
            file_offset: p.offset,
            file_size: p.filesz,
            flags: SectionFlags {
                read: p.flags & PF_R != 0,
                write: p.flags & PF_W != 0,
                execute: p.flags & PF_X != 0,
            },
            loadable: p.p_type == PT_LOAD,
        })
        .collect();
    sections.extend(
        section_headers
            .iter()
            .filter(|s| s.sh_type != SHT_NULL)
            .map(|s| Section {
                name: s.name.clone(),
                kind: SectionKind::Section,
                virtual_address: s.addr,
                virtual_size: s.size,
                file_offset: s.offset,
                file_size: if s.sh_type == SHT_NOBITS { 0 } else { s.size },
                flags: SectionFlags {
                    read: s.flags & SHF_ALLOC != 0,
                    write: s.flags & SHF_WRITE != 0,
                    execute: s.flags & SHF_EXECINSTR != 0,
                },
                loadable: s.flags & SHF_ALLOC != 0,
            }),
    );

    Ok(Image {
        architecture: Some(machine(e_machine)),
        bitness: if layout.is_64 { 64 } else { 32 },
        kind: Some(kind),
        entry_point: (e_entry != 0).then_some(e_entry),
        sections,
        imports,
        hardening,
        ..Image::default()
    })
}

fn machine(e_machine: u16) -> Architecture {
    match e_machine {
        3 => Architecture::X86,
        20 => Architecture::PowerPc,
        21 => Architecture::PowerPc64,
        40 => Architecture::Arm,
        62 => Architecture::X86_64,
        183 => Architecture::Aarch64,
        243 => Architecture::RiscV,
        other => Architecture::Unknown(u32::from(other)),
    }
}

fn segment_name(p_type: u32) -> String {
    match p_type {
        PT_LOAD => "LOAD".to_string(),
        PT_DYNAMIC => "DYNAMIC".to_string(),
        PT_INTERP => "INTERP".to_string(),
        PT_NOTE => "NOTE".to_string(),
        PT_PHDR => "PHDR".to_string(),
        PT_TLS => "TLS".to_string(),
        PT_GNU_EH_FRAME => "GNU_EH_FRAME".to_string(),
        PT_GNU_STACK => "GNU_STACK".to_string(),
        PT_GNU_RELRO => "GNU_RELRO".to_string(),
        PT_GNU_PROPERTY => "GNU_PROPERTY".to_string(),
        other => format!("{other:#x}"),
    }
}

/// Read a table of `count` fixed-size entries, validating the whole range first.
fn read_table(
    reader: &Reader<'_>,
    offset: u64,
    entsize: u16,
    min_entsize: usize,
    count: u16,
    what: &str,
) -> Result<Vec<u8>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if usize::from(entsize) < min_entsize {
        return Err(ParseError::MalformedHeader(format!(
            "{what}: entry size {entsize} smaller than {min_entsize}"
        )));
    }
    reader.bytes(offset, u64::from(entsize) * u64::from(count), what)
}

fn read_program_headers(
    reader: &Reader<'_>,
    layout: &Layout,
    endian: Endian,
    offset: u64,
    entsize: u16,
    count: u16,
) -> Result<Vec<ProgramHeader>> {
    let table = read_table(reader, offset, entsize, layout.phdr_size, count, "program headers")?;
    table
        .chunks_exact(usize::from(entsize.max(1)))
        .map(|entry| {
            let f = Fields::new(entry, endian, "program header");
            if layout.is_64 {
                Ok(ProgramHeader {
                    p_type: f.u32(0)?,
                    flags: f.u32(4)?,
                    offset: f.u64(8)?,
                    vaddr: f.u64(16)?,
                    filesz: f.u64(32)?,
                    memsz: f.u64(40)?,
                })
            } else {
                Ok(ProgramHeader {
                    p_type: f.u32(0)?,
                    offset: u64::from(f.u32(4)?),
                    vaddr: u64::from(f.u32(8)?),
                    filesz: u64::from(f.u32(16)?),
                    memsz: u64::from(f.u32(20)?),
                    flags: f.u32(24)?,
                })
            }
        })
        .collect()
}

fn read_section_headers(
    reader: &Reader<'_>,
    layout: &Layout,
    endian: Endian,
    offset: u64,
    entsize: u16,
    count: u16,
    shstrndx: u16,
) -> Result<Vec<SectionHeader>> {
    let table = read_table(reader, offset, entsize, layout.shdr_size, count, "section headers")?;
    let mut headers: Vec<(u32, SectionHeader)> = table
        .chunks_exact(usize::from(entsize.max(1)))
        .map(|entry| {
            let f = Fields::new(entry, endian, "section header");
            let w = |off32: usize, off64: usize| {
                if layout.is_64 {
                    f.u64(off64)
                } else {
                    f.u32(off32).map(u64::from)
                }
            };
            let name_offset = f.u32(0)?;
            Ok((
                name_offset,
                SectionHeader {
                    name: String::new(),
                    sh_type: f.u32(4)?,
                    flags: w(8, 8)?,
                    addr: w(12, 16)?,
                    offset: w(16, 24)?,
                    size: w(20, 32)?,
                    link: f.u32(if layout.is_64 { 40 } else { 24 })?,
                    info: f.u32(if layout.is_64 { 44 } else { 28 })?,
                },
            ))
        })
        .collect::<Result<_>>()?;

    if let Some((_, strtab)) = headers.get(usize::from(shstrndx)) {
        if strtab.sh_type != SHT_NOBITS {
            let names = reader.bytes(strtab.offset, strtab.size, "section name table")?;
            for (name_offset, header) in &mut headers {
                header.name = usize::try_from(*name_offset)
                    .ok()
                    .and_then(|off| string_at(&names, off))
                    .unwrap_or_default();
            }
        }
    }
    Ok(headers.into_iter().map(|(_, h)| h).collect())
}

#[derive(Default)]
struct Dynamic {
    needed: Vec<String>,
    flags_1: u64,
    strtab: Vec<u8>,
}

/// Walk the dynamic table: from `SHT_DYNAMIC` when section headers exist,
/// else from `PT_DYNAMIC` with `DT_STRTAB` mapped through the load segments.
fn read_dynamic(
    reader: &Reader<'_>,
    layout: &Layout,
    endian: Endian,
    program_headers: &[ProgramHeader],
    section_headers: &[SectionHeader],
) -> Result<Dynamic> {
    let from_sections = section_headers
        .iter()
        .find(|s| s.sh_type == SHT_DYNAMIC)
        .map(|s| (s.offset, s.size, section_headers.get(s.link as usize)));
    let (offset, size, linked_strtab) = match from_sections {
        Some(found) => found,
        None => match program_headers.iter().find(|p| p.p_type == PT_DYNAMIC) {
            Some(p) => (p.offset, p.filesz, None),
            None => return Ok(Dynamic::default()),
        },
    };

    let table = reader.bytes(offset, size, "dynamic section")?;
    let mut entries = Vec::new();
    for entry in table.chunks_exact(layout.dyn_size) {
        let f = Fields::new(entry, endian, "dynamic entry");
        let tag = f.word(0, layout.is_64)?;
        let value = f.word(layout.dyn_size / 2, layout.is_64)?;
        if tag == DT_NULL {
            break;
        }
        entries.push((tag, value));
    }
    let value_of = |wanted: u64| entries.iter().find(|(t, _)| *t == wanted).map(|(_, v)| *v);

    let strtab = match linked_strtab {
        Some(s) => reader.bytes(s.offset, s.size, "dynamic string table")?,
        None => match (value_of(DT_STRTAB), value_of(DT_STRSZ)) {
            (Some(vaddr), Some(size)) => {
                let offset = vaddr_to_offset(program_headers, vaddr).ok_or_else(|| {
                    ParseError::MalformedHeader(format!(
                        "DT_STRTAB address {vaddr:#x} outside load segments or past the file"
                    ))
                })?;
                reader.bytes(offset, size, "dynamic string table")?
            }
            _ => Vec::new(),
        },
    };

    let needed = entries
        .iter()
        .filter(|(tag, _)| *tag == DT_NEEDED)
        .map(|(_, value)| {
            usize::try_from(*value)
                .ok()
                .and_then(|off| string_at(&strtab, off))
                .ok_or_else(|| {
                    ParseError::MalformedHeader(format!(
                        "DT_NEEDED name offset {value:#x} outside string table"
                    ))
                })
        })
        .collect::<Result<_>>()?;

    Ok(Dynamic {
        needed,
        flags_1: value_of(DT_FLAGS_1).unwrap_or(0),
        strtab,
    })
}

fn vaddr_to_offset(program_headers: &[ProgramHeader], vaddr: u64) -> Option<u64> {
    program_headers
        .iter()
        .filter(|p| p.p_type == PT_LOAD)
        .find(|p| vaddr >= p.vaddr && vaddr - p.vaddr < p.filesz)
        .and_then(|p| p.offset.checked_add(vaddr - p.vaddr))
}

/// Collect `verneed` requirements per library file name.
fn read_verneed(
    reader: &Reader<'_>,
    endian: Endian,
    section_headers: &[SectionHeader],
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut requirements = BTreeMap::new();
    let Some(section) = section_headers.iter().find(|s| s.sh_type == SHT_GNU_VERNEED) else {
        return Ok(requirements);
    };
    let table = reader.bytes(section.offset, section.size, "version requirements")?;
    let strtab = match section_headers.get(section.link as usize) {
        Some(s) => reader.bytes(s.offset, s.size, "version string table")?,
        None => {
            return Err(ParseError::MalformedHeader(
                "verneed section links to a missing string table".to_string(),
            ))
        }
    };
    let f = Fields::new(&table, endian, "verneed entry");
    let name = |offset: u32| {
        usize::try_from(offset)
            .ok()
            .and_then(|off| string_at(&strtab, off))
            .ok_or_else(|| {
                ParseError::MalformedHeader(format!("verneed name {offset:#x} outside string table"))
            })
    };

    let mut entry = 0usize;
    let count = (section.info as usize).min(MAX_VERNEED_ENTRIES);
    for _ in 0..count {
        let aux_count = f.u16(entry + 2)?;
        let file = name(f.u32(entry + 4)?)?;
        let mut aux = entry + f.u32(entry + 8)? as usize;
        let versions: &mut Vec<String> = requirements.entry(file).or_default();
        for _ in 0..aux_count.min(MAX_VERNEED_ENTRIES as u16) {
            versions.push(name(f.u32(aux + 8)?)?);
            match f.u32(aux + 12)? {
                0 => break,
                next => aux += next as usize,
            }
        }
        match f.u32(entry + 12)? {
            0 => break,
            next => entry += next as usize,
        }
        if entry >= f.len() {
            return Err(ParseError::MalformedHeader(
                "verneed chain points past its section".to_string(),
            ));
        }
    }
    Ok(requirements)
}

/// Highest symbol version, compared numerically on the trailing version part
/// (`GLIBC_2.34` > `GLIBC_2.4`).
fn highest_version(versions: &[String]) -> Option<String> {
    versions
        .iter()
        .max_by_key(|v| {
            v.rsplit('_')
                .next()
                .unwrap_or_default()
                .split('.')
                .map(|part| part.parse::<u64>().unwrap_or(0))
                .collect::<Vec<_>>()
        })
        .cloned()
}

fn has_stack_protector(
    reader: &Reader<'_>,
    section_headers: &[SectionHeader],
    dynamic_strtab: &[u8],
) -> Result<bool> {
    if contains_symbol(dynamic_strtab) {
        return Ok(true);
    }
    for section in section_headers
        .iter()
        .filter(|s| s.sh_type == SHT_STRTAB && s.name != ".shstrtab")
    {
        if contains_symbol(&reader.bytes(section.offset, section.size, "string table")?) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn contains_symbol(table: &[u8]) -> bool {
    STACK_PROTECTOR_SYMBOLS.iter().any(|symbol| {
        table
            .windows(symbol.len())
            .enumerate()
            .any(|(i, w)| w == *symbol && (i == 0 || table[i - 1] == 0))
    })
}
