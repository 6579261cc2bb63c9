// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Classifies a byte source as ELF, PE or Mach-O by its leading signature.

use serde::Serialize;
use std::fmt;

use super::source::ByteSource;
use super::DetectError;

/// Shortest prefix that can carry any of the supported signatures.
pub const MIN_SIGNATURE_LEN: u64 = 4;

/// Leading window inspected for classification.
const HEAD_LEN: u64 = 64;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const PE_SIGNATURE: [u8; 4] = [b'P', b'E', 0, 0];
const DOS_LFANEW_OFFSET: usize = 0x3c;

pub(crate) const MH_MAGIC: u32 = 0xfeed_face;
pub(crate) const MH_MAGIC_64: u32 = 0xfeed_facf;
pub(crate) const FAT_MAGIC: u32 = 0xcafe_babe;
/// Java class files share the fat magic; their "architecture count" is the
/// class file version, which is always far above this bound.
pub(crate) const MAX_FAT_ARCHES: u32 = 20;

/// Closed set of container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Elf,
    Pe,
    #[serde(rename = "macho")]
    MachO,
    Unknown,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elf => write!(f, "ELF"),
            Self::Pe => write!(f, "PE"),
            Self::MachO => write!(f, "Mach-O"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classify the source by signature.
///
/// Reads at most the first 64 bytes, plus the 4-byte PE signature when a DOS
/// stub points at one. Unrecognised content is `Format::Unknown`, not an error.
///
/// # Errors
/// Returns `DetectError::Truncated` when fewer than four bytes are available.
pub fn detect(source: &dyn ByteSource) -> Result<Format, DetectError> {
    let available = source.len();
    if available < MIN_SIGNATURE_LEN {
        return Err(DetectError::Truncated {
            needed: MIN_SIGNATURE_LEN,
            available,
        });
    }

    let head_len = available.min(HEAD_LEN) as usize;
    let mut head = vec![0u8; head_len];
    source
        .read_exact_at(0, &mut head)
        .map_err(|e| DetectError::Io(e.to_string()))?;

    if head[..4] == ELF_MAGIC {
        return Ok(Format::Elf);
    }
    if is_macho(&head) {
        return Ok(Format::MachO);
    }
    if head.starts_with(b"MZ") && has_pe_signature(source, &head)? {
        return Ok(Format::Pe);
    }
    Ok(Format::Unknown)
}

fn is_macho(head: &[u8]) -> bool {
    let le = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    let be = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    if [MH_MAGIC, MH_MAGIC_64].contains(&le) || [MH_MAGIC, MH_MAGIC_64].contains(&be) {
        return true;
    }
    if be == FAT_MAGIC {
        return head
            .get(4..8)
            .map(|n| u32::from_be_bytes([n[0], n[1], n[2], n[3]]))
            .is_some_and(|count| (1..=MAX_FAT_ARCHES).contains(&count));
    }
    false
}

fn has_pe_signature(source: &dyn ByteSource, head: &[u8]) -> Result<bool, DetectError> {
    let Some(raw) = head.get(DOS_LFANEW_OFFSET..DOS_LFANEW_OFFSET + 4) else {
        return Ok(false);
    };
    let lfanew = u64::from(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
    if lfanew.checked_add(4).map_or(true, |end| end > source.len()) {
        return Ok(false);
    }
    let mut signature = [0u8; 4];
    source
        .read_exact_at(lfanew, &mut signature)
        .map_err(|e| DetectError::Io(e.to_string()))?;
    Ok(signature == PE_SIGNATURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pe_stub(lfanew: u32) -> Vec<u8> {
        let mut data = vec![0u8; 0x80];
        data[0] = b'M';
        data[1] = b'Z';
        data[0x3c..0x40].copy_from_slice(&lfanew.to_le_bytes());
        data[lfanew as usize..lfanew as usize + 4].copy_from_slice(b"PE\0\0");
        data
    }

    #[test]
    fn test_detect_elf() {
        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(&ELF_MAGIC);
        assert_eq!(detect(&data).unwrap(), Format::Elf);
    }

    #[test]
    fn test_detect_pe() {
        assert_eq!(detect(&pe_stub(0x40)).unwrap(), Format::Pe);
    }

    #[test]
    fn test_dos_stub_without_pe_header_is_unknown() {
        let mut data = pe_stub(0x40);
        data[0x40] = b'X';
        assert_eq!(detect(&data).unwrap(), Format::Unknown);
    }

    #[test]
    fn test_pe_offset_past_end_is_unknown() {
        let mut data = pe_stub(0x40);
        data[0x3c..0x40].copy_from_slice(&0xffff_fff0u32.to_le_bytes());
        assert_eq!(detect(&data).unwrap(), Format::Unknown);
    }

    #[test]
    fn test_detect_macho_both_byte_orders() {
        let le = MH_MAGIC_64.to_le_bytes().to_vec();
        let be = MH_MAGIC.to_be_bytes().to_vec();
        assert_eq!(detect(&le).unwrap(), Format::MachO);
        assert_eq!(detect(&be).unwrap(), Format::MachO);
    }

    #[test]
    fn test_fat_magic_with_java_version_is_unknown() {
        let mut fat = FAT_MAGIC.to_be_bytes().to_vec();
        fat.extend_from_slice(&2u32.to_be_bytes());
        assert_eq!(detect(&fat).unwrap(), Format::MachO);

        let mut class_file = FAT_MAGIC.to_be_bytes().to_vec();
        class_file.extend_from_slice(&0x0000_0034u32.to_be_bytes());
        assert_eq!(detect(&class_file).unwrap(), Format::Unknown);
    }

    #[test]
    fn test_short_input_is_truncated() {
        let data = vec![0x7f, b'E'];
        assert_eq!(
            detect(&data).unwrap_err(),
            DetectError::Truncated {
                needed: 4,
                available: 2
            }
        );
        assert!(matches!(
            detect(&Vec::<u8>::new()),
            Err(DetectError::Truncated { available: 0, .. })
        ));
    }

    #[test]
    fn test_text_is_unknown() {
        let data = b"This is not a binary file at all".to_vec();
        assert_eq!(detect(&data).unwrap(), Format::Unknown);
    }

    #[test]
    fn test_detect_is_deterministic() {
        let data = pe_stub(0x40);
        let first = detect(&data).unwrap();
        for _ in 0..10 {
            assert_eq!(detect(&data).unwrap(), first);
        }
    }
}
