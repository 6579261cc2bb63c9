// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Parses PE32/PE32+ images: COFF and optional headers, the section table,
//! the import directory, the load config and the certificate table.

use serde::Serialize;
use std::io;

use super::metadata::decode_certificates;
use super::source::{string_at, ByteSource, Endian, Fields, Reader};
use super::{
    Architecture, BinaryKind, Hardening, Image, Import, ParseError, Section, SectionFlags,
    SectionKind, SignatureBlob, SignatureKind, VersionField,
};

type Result<T> = std::result::Result<T, ParseError>;

const LFANEW_OFFSET: u64 = 0x3c;
const COFF_HEADER_SIZE: u64 = 20;
const SECTION_HEADER_SIZE: u64 = 40;
const IMPORT_DESCRIPTOR_SIZE: usize = 20;
const MAX_DLL_NAME: u64 = 256;
const MAX_SECTIONS: u16 = 96;

const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;

const IMAGE_FILE_EXECUTABLE_IMAGE: u16 = 0x0002;
const IMAGE_FILE_DLL: u16 = 0x2000;

const DLLCHARACTERISTICS_DYNAMIC_BASE: u16 = 0x0040;
const DLLCHARACTERISTICS_NX_COMPAT: u16 = 0x0100;

const IMAGE_SCN_CNT_UNINITIALIZED_DATA: u32 = 0x0000_0080;
const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;
const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000;

const DIRECTORY_IMPORT: usize = 1;
const DIRECTORY_SECURITY: usize = 4;
const DIRECTORY_LOAD_CONFIG: usize = 10;

const WIN_CERT_TYPE_X509: u16 = 0x0001;
const WIN_CERT_TYPE_PKCS_SIGNED_DATA: u16 = 0x0002;
const WIN_CERT_HEADER_SIZE: usize = 8;

/// Offset of `CheckSum` inside the optional header (same for PE32 and PE32+).
const CHECKSUM_OFFSET: u64 = 64;

/// The optional-header `CheckSum` and where it lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeChecksum {
    pub declared: u32,
    /// The checksum field itself is excluded from the computation.
    pub field_offset: u64,
}

#[derive(Clone, Copy)]
struct DataDirectory {
    address: u32,
    size: u32,
}

/// Field offsets that differ between PE32 and PE32+.
struct Layout {
    is_64: bool,
    rva_count: usize,
    directories: usize,
    security_cookie: usize,
}

const LAYOUT_PE32: Layout = Layout {
    is_64: false,
    rva_count: 92,
    directories: 96,
    security_cookie: 60,
};

const LAYOUT_PE32_PLUS: Layout = Layout {
    is_64: true,
    rva_count: 108,
    directories: 112,
    security_cookie: 88,
};

pub(crate) fn parse(source: &dyn ByteSource) -> Result<Image> {
    let reader = Reader::new(source);
    let dos = reader.header(0, LFANEW_OFFSET + 4, "DOS header")?;
    let lfanew = u64::from(Fields::new(&dos, Endian::Little, "DOS header").u32(0x3c)?);

    let coff = reader.header(lfanew + 4, COFF_HEADER_SIZE, "COFF header")?;
    let c = Fields::new(&coff, Endian::Little, "COFF header");
    let machine = c.u16(0)?;
    let section_count = c.u16(2)?;
    let optional_size = c.u16(16)?;
    let characteristics = c.u16(18)?;
    if section_count > MAX_SECTIONS {
        return Err(ParseError::MalformedHeader(format!(
            "{section_count} sections exceed the PE limit of {MAX_SECTIONS}"
        )));
    }

    let optional_offset = lfanew + 4 + COFF_HEADER_SIZE;
    let optional = reader.header(optional_offset, u64::from(optional_size), "optional header")?;
    let o = Fields::new(&optional, Endian::Little, "optional header");
    let layout = match o.u16(0)? {
        PE32_MAGIC => &LAYOUT_PE32,
        PE32_PLUS_MAGIC => &LAYOUT_PE32_PLUS,
        other => {
            return Err(ParseError::UnsupportedVariant(format!(
                "optional header magic {other:#x}"
            )))
        }
    };
    let entry = o.u32(16)?;
    let image_version = (o.u16(44)?, o.u16(46)?);
    let checksum = o.u32(CHECKSUM_OFFSET as usize)?;
    let dll_characteristics = o.u16(70)?;
    let directories = read_directories(&o, layout)?;

    let table_offset = optional_offset + u64::from(optional_size);
    let table = reader.bytes(
        table_offset,
        u64::from(section_count) * SECTION_HEADER_SIZE,
        "section table",
    )?;
    let sections = table
        .chunks_exact(SECTION_HEADER_SIZE as usize)
        .map(read_section)
        .collect::<Result<Vec<_>>>()?;

    let imports = match directories.get(DIRECTORY_IMPORT) {
        Some(dir) if dir.address != 0 => read_imports(&reader, &sections, *dir)?,
        _ => Vec::new(),
    };
    let stack_protector = match directories.get(DIRECTORY_LOAD_CONFIG) {
        Some(dir) if dir.address != 0 => has_security_cookie(&reader, &sections, *dir, layout)?,
        _ => false,
    };
    let mut image = Image {
        architecture: Some(architecture(machine)),
        bitness: if layout.is_64 { 64 } else { 32 },
        kind: Some(if characteristics & IMAGE_FILE_DLL != 0 {
            BinaryKind::SharedLibrary
        } else if characteristics & IMAGE_FILE_EXECUTABLE_IMAGE != 0 {
            BinaryKind::Executable
        } else {
            BinaryKind::Object
        }),
        entry_point: (entry != 0).then_some(u64::from(entry)),
        hardening: Hardening {
            pie: dll_characteristics & DLLCHARACTERISTICS_DYNAMIC_BASE != 0,
            nx_stack: dll_characteristics & DLLCHARACTERISTICS_NX_COMPAT != 0,
            stack_protector,
            relro: false,
        },
        imports,
        sections,
        pe_checksum: (checksum != 0).then_some(PeChecksum {
            declared: checksum,
            field_offset: optional_offset + CHECKSUM_OFFSET,
        }),
        ..Image::default()
    };
    if image_version != (0, 0) {
        image.version_fields.push(VersionField {
            source: "pe-image-version",
            value: format!("{}.{}", image_version.0, image_version.1),
        });
    }
    if let Some(dir) = directories.get(DIRECTORY_SECURITY).filter(|d| d.address != 0) {
        read_certificate_table(&reader, *dir, &mut image)?;
    }
    Ok(image)
}

fn architecture(machine: u16) -> Architecture {
    match machine {
        0x014c => Architecture::X86,
        0x8664 => Architecture::X86_64,
        0x01c0 | 0x01c4 => Architecture::Arm,
        0xaa64 => Architecture::Aarch64,
        0x5064 => Architecture::RiscV,
        0x01f0 => Architecture::PowerPc,
        other => Architecture::Unknown(u32::from(other)),
    }
}

fn read_directories(o: &Fields<'_>, layout: &Layout) -> Result<Vec<DataDirectory>> {
    if o.len() < layout.rva_count + 4 {
        return Ok(Vec::new());
    }
    let declared = o.u32(layout.rva_count)? as usize;
    let fit = o.len().saturating_sub(layout.directories) / 8;
    (0..declared.min(fit).min(16))
        .map(|i| {
            let at = layout.directories + i * 8;
            Ok(DataDirectory {
                address: o.u32(at)?,
                size: o.u32(at + 4)?,
            })
        })
        .collect()
}

fn read_section(entry: &[u8]) -> Result<Section> {
    let f = Fields::new(entry, Endian::Little, "section header");
    let characteristics = f.u32(36)?;
    let raw_size = f.u32(16)?;
    Ok(Section {
        name: f.fixed_str(0, 8)?,
        kind: SectionKind::Section,
        virtual_address: u64::from(f.u32(12)?),
        virtual_size: u64::from(f.u32(8)?),
        file_offset: u64::from(f.u32(20)?),
        file_size: if characteristics & IMAGE_SCN_CNT_UNINITIALIZED_DATA != 0 {
            0
        } else {
            u64::from(raw_size)
        },
        flags: SectionFlags {
            read: characteristics & IMAGE_SCN_MEM_READ != 0,
            write: characteristics & IMAGE_SCN_MEM_WRITE != 0,
            execute: characteristics & IMAGE_SCN_MEM_EXECUTE != 0,
        },
        loadable: true,
    })
}

/// Map a relative virtual address to a file offset through the section table.
fn rva_to_offset(sections: &[Section], rva: u32) -> Result<u64> {
    let rva = u64::from(rva);
    sections
        .iter()
        .find(|s| rva >= s.virtual_address && rva - s.virtual_address < s.file_size)
        .map(|s| s.file_offset + (rva - s.virtual_address))
        .ok_or_else(|| ParseError::MalformedHeader(format!("RVA {rva:#x} not backed by any section")))
}

fn read_imports(reader: &Reader<'_>, sections: &[Section], dir: DataDirectory) -> Result<Vec<Import>> {
    let offset = rva_to_offset(sections, dir.address)?;
    let table = reader.bytes(offset, u64::from(dir.size), "import directory")?;
    let mut imports = Vec::new();
    for descriptor in table.chunks_exact(IMPORT_DESCRIPTOR_SIZE) {
        if descriptor.iter().all(|b| *b == 0) {
            break;
        }
        let name_rva = Fields::new(descriptor, Endian::Little, "import descriptor").u32(12)?;
        let name_offset = rva_to_offset(sections, name_rva)?;
        let available = reader.len().saturating_sub(name_offset).min(MAX_DLL_NAME);
        let raw = reader.bytes(name_offset, available, "import name")?;
        let name = string_at(&raw, 0).unwrap_or_default();
        if name.is_empty() {
            return Err(ParseError::MalformedHeader(format!(
                "empty import name at {name_offset:#x}"
            )));
        }
        imports.push(Import::unpinned(name));
    }
    Ok(imports)
}

/// Whether the load config declares a `/GS` security cookie.
fn has_security_cookie(
    reader: &Reader<'_>,
    sections: &[Section],
    dir: DataDirectory,
    layout: &Layout,
) -> Result<bool> {
    let offset = rva_to_offset(sections, dir.address)?;
    let config = reader.bytes(offset, u64::from(dir.size), "load config")?;
    let f = Fields::new(&config, Endian::Little, "load config");
    if config.len() < layout.security_cookie + if layout.is_64 { 8 } else { 4 } {
        return Ok(false);
    }
    Ok(f.word(layout.security_cookie, layout.is_64)? != 0)
}

/// Walk `WIN_CERTIFICATE` entries. The directory address is a file offset.
fn read_certificate_table(reader: &Reader<'_>, dir: DataDirectory, image: &mut Image) -> Result<()> {
    let start = u64::from(dir.address);
    let table = reader.bytes(start, u64::from(dir.size), "certificate table")?;
    let mut at = 0usize;
    while at + WIN_CERT_HEADER_SIZE <= table.len() {
        let f = Fields::new(&table, Endian::Little, "certificate entry");
        let length = f.u32(at)? as usize;
        let cert_type = f.u16(at + 6)?;
        let end = at
            .checked_add(length)
            .filter(|end| length >= WIN_CERT_HEADER_SIZE && *end <= table.len())
            .ok_or_else(|| {
                ParseError::MalformedHeader(format!(
                    "certificate entry of {length} bytes at {at:#x} overruns its table"
                ))
            })?;
        let payload = &table[at + WIN_CERT_HEADER_SIZE..end];
        match cert_type {
            WIN_CERT_TYPE_X509 => image.certificates.extend(decode_certificates(payload)),
            WIN_CERT_TYPE_PKCS_SIGNED_DATA => image.signatures.push(SignatureBlob {
                kind: SignatureKind::Authenticode,
                bytes: payload.to_vec(),
                range: start + at as u64..start + end as u64,
            }),
            _ => {}
        }
        // Entries are quadword aligned.
        at = (end + 7) & !7;
    }
    Ok(())
}

/// Compute the standard PE image checksum, skipping the checksum field.
///
/// # Errors
/// Returns the I/O error raised by the source.
pub fn pe_checksum(source: &dyn ByteSource, field_offset: u64) -> io::Result<u32> {
    const CHUNK: u64 = 64 * 1024;
    let len = source.len();
    let mut sum: u64 = 0;
    let mut buf = vec![0u8; CHUNK as usize];
    let mut offset = 0u64;
    while offset < len {
        let size = (len - offset).min(CHUNK);
        // size <= CHUNK, so the conversion cannot truncate.
        let slice = &mut buf[..size as usize];
        source.read_exact_at(offset, slice)?;
        for (i, pair) in slice.chunks(2).enumerate() {
            let position = offset + 2 * i as u64;
            if (field_offset..field_offset + 4).contains(&position) {
                continue;
            }
            let word = u64::from(pair[0]) | pair.get(1).map_or(0, |b| u64::from(*b) << 8);
            sum += word;
            sum = (sum & 0xffff) + (sum >> 16);
        }
        offset += size;
    }
    sum = (sum & 0xffff) + (sum >> 16);
    // The checksum is defined modulo 2^32.
    Ok((sum + len) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rva_to_offset() {
        let section = Section {
            name: ".text".to_string(),
            kind: SectionKind::Section,
            virtual_address: 0x1000,
            virtual_size: 0x200,
            file_offset: 0x400,
            file_size: 0x200,
            flags: SectionFlags::default(),
            loadable: true,
        };
        assert_eq!(rva_to_offset(&[section.clone()], 0x1010).unwrap(), 0x410);
        assert!(rva_to_offset(&[section], 0x1200).is_err());
    }

    #[test]
    fn test_checksum_skips_field() {
        let mut a = vec![0u8; 128];
        a[10] = 7;
        let mut b = a.clone();
        b[64..68].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        assert_eq!(pe_checksum(&a, 64).unwrap(), pe_checksum(&b, 64).unwrap());
        assert_eq!(pe_checksum(&a, 64).unwrap(), 7 + 128);
    }

    #[test]
    fn test_checksum_folds_carries() {
        let data = vec![0xffu8; 6];
        // 3 * 0xffff folded twice, plus the length.
        assert_eq!(pe_checksum(&data, 100).unwrap(), 0xffff + 6);
    }

    #[test]
    fn test_unsupported_optional_magic() {
        let mut data = vec![0u8; 0x200];
        data[..2].copy_from_slice(b"MZ");
        data[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes());
        data[0x40..0x44].copy_from_slice(b"PE\0\0");
        data[0x54..0x56].copy_from_slice(&0xf0u16.to_le_bytes());
        data[0x58..0x5a].copy_from_slice(&0x999u16.to_le_bytes());
        assert!(matches!(parse(&data), Err(ParseError::UnsupportedVariant(_))));
    }
}
