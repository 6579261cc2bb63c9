// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! In-memory fixture writers: ELF64, PE32+ and Mach-O 64 images, Ed25519
//! certificates and detached signatures.

#![allow(dead_code)]

use compliance_linter::policy::TrustedKey;
use compliance_linter::Policy;
use ring::signature::{Ed25519KeyPair, KeyPair};
use sha2::{Digest, Sha256};
use std::ops::Range;
use std::path::PathBuf;
use tempfile::TempDir;

const ROOT_SEED: [u8; 32] = [1; 32];
const LEAF_SEED: [u8; 32] = [2; 32];
const SIGNING_SEED: [u8; 32] = [3; 32];

const NOT_BEFORE: &str = "200101000000Z";
const NOT_AFTER: &str = "491231235959Z";

const SIGNATURE_LEN: usize = 64;
const CHECKSUM_PLACEHOLDER: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Write `bytes` as `name` inside a fresh temporary directory.
pub fn write_temp(name: &str, bytes: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    (dir, path)
}

/// Policy trusting the fixture root certificate and signing key.
pub fn trusted_policy() -> Policy {
    Policy::default()
        .with_trusted_cert(root_certificate())
        .with_trusted_key(TrustedKey::Ed25519(signing_public_key()))
}

pub fn signing_public_key() -> Vec<u8> {
    key(&SIGNING_SEED).public_key().as_ref().to_vec()
}

fn key(seed: &[u8; 32]) -> Ed25519KeyPair {
    Ed25519KeyPair::from_seed_unchecked(seed).unwrap()
}

/// SHA-256 of every byte outside `excluded`.
pub fn sha256_excluding(bytes: &[u8], excluded: &[Range<usize>]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for (i, byte) in bytes.iter().enumerate() {
        if !excluded.iter().any(|r| r.contains(&i)) {
            hasher.update([*byte]);
        }
    }
    hasher.finalize().to_vec()
}

// DER

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.extend_from_slice(&[0x81, len as u8]);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

fn sequence(parts: &[Vec<u8>]) -> Vec<u8> {
    der(0x30, &parts.concat())
}

fn ed25519_algorithm() -> Vec<u8> {
    sequence(&[der(0x06, &[0x2b, 0x65, 0x70])])
}

fn bit_string(bytes: &[u8]) -> Vec<u8> {
    let mut content = vec![0];
    content.extend_from_slice(bytes);
    der(0x03, &content)
}

fn name(common_name: &str) -> Vec<u8> {
    let attribute = sequence(&[der(0x06, &[0x55, 0x04, 0x03]), der(0x0c, common_name.as_bytes())]);
    sequence(&[der(0x31, &attribute)])
}

/// An X.509 v3 certificate for `subject_key`, signed by `issuer_key`.
pub fn certificate(
    serial: u8,
    issuer: &str,
    issuer_key: &Ed25519KeyPair,
    subject: &str,
    subject_key: &[u8],
    not_after: &str,
) -> Vec<u8> {
    let tbs = sequence(&[
        der(0xa0, &der(0x02, &[2])),
        der(0x02, &[serial & 0x7f]),
        ed25519_algorithm(),
        name(issuer),
        sequence(&[der(0x17, NOT_BEFORE.as_bytes()), der(0x17, not_after.as_bytes())]),
        name(subject),
        sequence(&[ed25519_algorithm(), bit_string(subject_key)]),
    ]);
    let signature = issuer_key.sign(&tbs);
    sequence(&[tbs, ed25519_algorithm(), bit_string(signature.as_ref())])
}

pub fn root_certificate() -> Vec<u8> {
    let root = key(&ROOT_SEED);
    certificate(
        1,
        "Fixture Root CA",
        &root,
        "Fixture Root CA",
        root.public_key().as_ref(),
        NOT_AFTER,
    )
}

pub fn leaf_certificate() -> Vec<u8> {
    certificate(
        2,
        "Fixture Root CA",
        &key(&ROOT_SEED),
        "Fixture Signer",
        key(&LEAF_SEED).public_key().as_ref(),
        NOT_AFTER,
    )
}

/// A certificate chaining to nothing the fixture policy trusts.
pub fn untrusted_certificate() -> Vec<u8> {
    let stranger = key(&[9; 32]);
    certificate(
        3,
        "Stranger CA",
        &stranger,
        "Stranger CA",
        stranger.public_key().as_ref(),
        NOT_AFTER,
    )
}

// ELF

const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
const EM_X86_64: u16 = 62;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;
const PT_GNU_STACK: u32 = 0x6474_e551;
const PT_GNU_RELRO: u32 = 0x6474_e552;

const SHT_PROGBITS: u32 = 1;
const SHT_STRTAB: u32 = 3;
const SHT_DYNAMIC: u32 = 6;
const SHT_GNU_VERNEED: u32 = 0x6fff_fffe;
const SHF_WRITE: u64 = 1;
const SHF_ALLOC: u64 = 2;
const SHF_EXECINSTR: u64 = 4;

const DT_NEEDED: u64 = 1;
const DT_STRTAB: u64 = 5;
const DT_STRSZ: u64 = 10;
const DT_FLAGS_1: u64 = 0x6fff_fffb;
const DF_1_PIE: u64 = 0x0800_0000;

const ELF_HEADER_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const SHDR_SIZE: usize = 64;
const PHDR_COUNT: usize = 6;

struct ElfSection {
    name: &'static str,
    sh_type: u32,
    flags: u64,
    data: Vec<u8>,
    link: u32,
    info: u32,
    offset: usize,
}

impl ElfSection {
    fn new(name: &'static str, sh_type: u32, flags: u64, data: Vec<u8>) -> Self {
        Self {
            name,
            sh_type,
            flags,
            data,
            link: 0,
            info: 0,
            offset: 0,
        }
    }

    fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.data.len()
    }
}

fn push_str(table: &mut Vec<u8>, s: &str) -> u32 {
    let offset = table.len() as u32;
    table.extend_from_slice(s.as_bytes());
    table.push(0);
    offset
}

fn put_u16(out: &mut [u8], at: usize, value: u16) {
    out[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut [u8], at: usize, value: u64) {
    out[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn align(out: &mut Vec<u8>, to: usize) {
    while out.len() % to != 0 {
        out.push(0);
    }
}

/// Builds a little-endian ELF64 x86-64 executable carrying the embedded
/// compliance sections. The default passes every built-in check under
/// [`trusted_policy`].
#[derive(Clone)]
pub struct ElfBuilder {
    hardened: bool,
    metadata: Vec<String>,
    needed: Vec<(String, Vec<String>)>,
    certificates: Option<Vec<Vec<u8>>>,
    signed: bool,
    checksum: bool,
    comment: Option<String>,
}

impl Default for ElfBuilder {
    fn default() -> Self {
        Self {
            hardened: true,
            metadata: vec![
                "name=demo-app".to_string(),
                "version=1.2.3".to_string(),
                "license=MIT".to_string(),
                "algorithms=AES-256-GCM,Ed25519".to_string(),
            ],
            needed: vec![(
                "libc.so.6".to_string(),
                vec!["GLIBC_2.17".to_string(), "GLIBC_2.34".to_string()],
            )],
            certificates: Some(vec![leaf_certificate(), root_certificate()]),
            signed: true,
            checksum: true,
            comment: None,
        }
    }
}

impl ElfBuilder {
    /// Drop PIE, the non-executable stack and the stack protector.
    pub fn without_hardening(mut self) -> Self {
        self.hardened = false;
        self
    }

    pub fn metadata(mut self, lines: &[&str]) -> Self {
        self.metadata = lines.iter().map(|l| (*l).to_string()).collect();
        self
    }

    pub fn add_metadata(mut self, line: &str) -> Self {
        self.metadata.push(line.to_string());
        self
    }

    pub fn needed(mut self, name: &str, versions: &[&str]) -> Self {
        self.needed
            .push((name.to_string(), versions.iter().map(|v| (*v).to_string()).collect()));
        self
    }

    pub fn certificates(mut self, chain: Option<Vec<Vec<u8>>>) -> Self {
        self.certificates = chain;
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.signed = false;
        self
    }

    pub fn without_checksum(mut self) -> Self {
        self.checksum = false;
        self
    }

    pub fn comment(mut self, text: &str) -> Self {
        self.comment = Some(text.to_string());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut dynstr = vec![0u8];
        let needed_offsets: Vec<u32> = self
            .needed
            .iter()
            .map(|(name, _)| push_str(&mut dynstr, name))
            .collect();

        let pinned: Vec<(u32, Vec<u32>)> = self
            .needed
            .iter()
            .zip(&needed_offsets)
            .filter(|((_, versions), _)| !versions.is_empty())
            .map(|((_, versions), file)| {
                let names = versions.iter().map(|v| push_str(&mut dynstr, v)).collect();
                (*file, names)
            })
            .collect();
        if self.hardened {
            push_str(&mut dynstr, "__stack_chk_fail");
        }

        let mut verneed = Vec::new();
        for (i, (file, versions)) in pinned.iter().enumerate() {
            let last = i + 1 == pinned.len();
            let mut entry = [0u8; 16];
            put_u16(&mut entry, 0, 1);
            put_u16(&mut entry, 2, versions.len() as u16);
            put_u32(&mut entry, 4, *file);
            put_u32(&mut entry, 8, 16);
            put_u32(&mut entry, 12, if last { 0 } else { 16 + 16 * versions.len() as u32 });
            verneed.extend_from_slice(&entry);
            for (k, name) in versions.iter().enumerate() {
                let mut aux = [0u8; 16];
                put_u16(&mut aux, 6, (k + 2) as u16);
                put_u32(&mut aux, 8, *name);
                put_u32(&mut aux, 12, if k + 1 == versions.len() { 0 } else { 16 });
                verneed.extend_from_slice(&aux);
            }
        }

        let mut text = vec![0x90u8; 48];
        text.push(0xc3);

        let mut sections = vec![
            ElfSection::new(
                ".interp",
                SHT_PROGBITS,
                SHF_ALLOC,
                b"/lib64/ld-linux-x86-64.so.2\0".to_vec(),
            ),
            ElfSection::new(".text", SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, text),
            ElfSection::new(".dynstr", SHT_STRTAB, SHF_ALLOC, dynstr),
        ];
        let dynstr_index = sections.len() as u32;
        if !verneed.is_empty() {
            let mut section = ElfSection::new(".gnu.version_r", SHT_GNU_VERNEED, SHF_ALLOC, verneed);
            section.link = dynstr_index;
            section.info = pinned.len() as u32;
            sections.push(section);
        }
        // Patched once the string table has an address.
        let entries = needed_offsets.len() + usize::from(self.hardened) + 3;
        let mut dynamic = ElfSection::new(
            ".dynamic",
            SHT_DYNAMIC,
            SHF_ALLOC | SHF_WRITE,
            vec![0u8; entries * 16],
        );
        dynamic.link = dynstr_index;
        sections.push(dynamic);
        let dynamic_index = sections.len() - 1;

        let mut meta = self.metadata.join("\n");
        if self.checksum {
            meta.push_str("\nchecksum=sha256:");
            meta.push_str(CHECKSUM_PLACEHOLDER);
        }
        meta.push('\n');
        sections.push(ElfSection::new(".meta", SHT_PROGBITS, 0, meta.into_bytes()));
        let meta_index = sections.len() - 1;
        if let Some(chain) = &self.certificates {
            sections.push(ElfSection::new(".cert", SHT_PROGBITS, 0, chain.concat()));
        }
        let sig_index = self.signed.then(|| {
            sections.push(ElfSection::new(
                ".sig",
                SHT_PROGBITS,
                0,
                vec![0u8; SIGNATURE_LEN],
            ));
            sections.len() - 1
        });
        if let Some(comment) = &self.comment {
            let mut data = comment.clone().into_bytes();
            data.push(0);
            sections.push(ElfSection::new(".comment", SHT_PROGBITS, 0, data));
        }

        let mut shstrtab = vec![0u8];
        let mut name_offsets: Vec<u32> = sections
            .iter()
            .map(|s| push_str(&mut shstrtab, s.name))
            .collect();
        name_offsets.push(push_str(&mut shstrtab, ".shstrtab"));
        sections.push(ElfSection::new(".shstrtab", SHT_STRTAB, 0, shstrtab));

        let mut out = vec![0u8; ELF_HEADER_SIZE + PHDR_COUNT * PHDR_SIZE];
        for section in &mut sections {
            align(&mut out, 16);
            section.offset = out.len();
            out.extend_from_slice(&section.data);
        }

        let dynstr = &sections[dynstr_index as usize - 1];
        let (dynstr_offset, dynstr_len) = (dynstr.offset, dynstr.data.len());
        let mut dynamic_entries: Vec<(u64, u64)> = needed_offsets
            .iter()
            .map(|off| (DT_NEEDED, u64::from(*off)))
            .collect();
        if self.hardened {
            dynamic_entries.push((DT_FLAGS_1, DF_1_PIE));
        }
        dynamic_entries.push((DT_STRTAB, dynstr_offset as u64));
        dynamic_entries.push((DT_STRSZ, dynstr_len as u64));
        let dynamic_offset = sections[dynamic_index].offset;
        for (i, (tag, value)) in dynamic_entries.iter().enumerate() {
            put_u64(&mut out, dynamic_offset + i * 16, *tag);
            put_u64(&mut out, dynamic_offset + i * 16 + 8, *value);
        }

        align(&mut out, 8);
        let shoff = out.len();
        out.extend_from_slice(&[0u8; SHDR_SIZE]);
        for (section, name) in sections.iter().zip(&name_offsets) {
            let mut header = [0u8; SHDR_SIZE];
            put_u32(&mut header, 0, *name);
            put_u32(&mut header, 4, section.sh_type);
            put_u64(&mut header, 8, section.flags);
            let addr = if section.flags & SHF_ALLOC != 0 { section.offset as u64 } else { 0 };
            put_u64(&mut header, 16, addr);
            put_u64(&mut header, 24, section.offset as u64);
            put_u64(&mut header, 32, section.data.len() as u64);
            put_u32(&mut header, 40, section.link);
            put_u32(&mut header, 44, section.info);
            put_u64(&mut header, 48, 1);
            out.extend_from_slice(&header);
        }

        let section_count = sections.len() + 1;
        out[..4].copy_from_slice(b"\x7fELF");
        out[4] = 2;
        out[5] = 1;
        out[6] = 1;
        put_u16(&mut out, 16, if self.hardened { ET_DYN } else { ET_EXEC });
        put_u16(&mut out, 18, EM_X86_64);
        put_u32(&mut out, 20, 1);
        put_u64(&mut out, 24, sections[1].offset as u64);
        put_u64(&mut out, 32, ELF_HEADER_SIZE as u64);
        put_u64(&mut out, 40, shoff as u64);
        put_u16(&mut out, 52, ELF_HEADER_SIZE as u16);
        put_u16(&mut out, 54, PHDR_SIZE as u16);
        put_u16(&mut out, 56, PHDR_COUNT as u16);
        put_u16(&mut out, 58, SHDR_SIZE as u16);
        put_u16(&mut out, 60, section_count as u16);
        put_u16(&mut out, 62, (section_count - 1) as u16);

        let interp = sections[0].range();
        let text_end = sections[1].range().end;
        let dynamic = sections[dynamic_index].range();
        let stack_flags = if self.hardened { 6 } else { 7 };
        let segments = [
            (PT_LOAD, 5, 0..text_end),
            (PT_LOAD, 6, dynstr_offset..dynamic.end),
            (PT_INTERP, 4, interp),
            (PT_DYNAMIC, 6, dynamic.clone()),
            (PT_GNU_STACK, stack_flags, 0..0),
            (PT_GNU_RELRO, 4, dynamic),
        ];
        for (i, (p_type, flags, range)) in segments.iter().enumerate() {
            let at = ELF_HEADER_SIZE + i * PHDR_SIZE;
            put_u32(&mut out, at, *p_type);
            put_u32(&mut out, at + 4, *flags);
            put_u64(&mut out, at + 8, range.start as u64);
            put_u64(&mut out, at + 16, range.start as u64);
            put_u64(&mut out, at + 24, range.start as u64);
            put_u64(&mut out, at + 32, range.len() as u64);
            put_u64(&mut out, at + 40, range.len() as u64);
            put_u64(&mut out, at + 48, 16);
        }

        let meta_range = sections[meta_index].range();
        let sig_range = sig_index.map(|i| sections[i].range());
        seal(&mut out, meta_range, self.checksum, sig_range);
        out
    }
}

/// Fill the declared checksum, then the detached signature, in that order:
/// the checksum skips both sections, the signature only its own.
fn seal(out: &mut [u8], meta: Range<usize>, checksum: bool, sig: Option<Range<usize>>) {
    if checksum {
        let mut excluded = vec![meta.clone()];
        excluded.extend(sig.clone());
        let digest = hex::encode(sha256_excluding(out, &excluded));
        let text = &out[meta.clone()];
        let at = meta.start
            + text
                .windows(CHECKSUM_PLACEHOLDER.len())
                .position(|w| w == CHECKSUM_PLACEHOLDER.as_bytes())
                .unwrap();
        out[at..at + digest.len()].copy_from_slice(digest.as_bytes());
    }
    if let Some(sig) = sig {
        let message = sha256_excluding(out, &[sig.clone()]);
        let signature = key(&SIGNING_SEED).sign(&message);
        out[sig].copy_from_slice(signature.as_ref());
    }
}

/// Offset of the first occurrence of `needle`.
pub fn find(bytes: &[u8], needle: &[u8]) -> usize {
    bytes
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap()
}

// PE

const PE_OFFSET: usize = 0x80;
const OPTIONAL_OFFSET: usize = PE_OFFSET + 4 + 20;
const OPTIONAL_SIZE: usize = 240;
const PE_CHECKSUM_OFFSET: usize = OPTIONAL_OFFSET + 64;
const SECTION_TABLE_OFFSET: usize = OPTIONAL_OFFSET + OPTIONAL_SIZE;

/// A 224-byte ELF64 without section headers whose only load segment claims a
/// file offset just below `u64::MAX`, with `DT_STRTAB` pointing into it.
pub fn elf_with_wrapping_load_offset() -> Vec<u8> {
    let mut out = vec![0u8; 224];
    out[..4].copy_from_slice(b"\x7fELF");
    out[4] = 2;
    out[5] = 1;
    out[6] = 1;
    put_u16(&mut out, 16, 3);
    put_u16(&mut out, 18, 62);
    put_u64(&mut out, 32, 64);
    put_u16(&mut out, 52, 64);
    put_u16(&mut out, 54, 56);
    put_u16(&mut out, 56, 2);

    put_u32(&mut out, 64, 1);
    put_u64(&mut out, 64 + 8, 0xFFFF_FFFF_FFFF_FF00);
    put_u64(&mut out, 64 + 16, 0x10000);
    put_u64(&mut out, 64 + 32, 0x1000);
    put_u64(&mut out, 64 + 40, 0x1000);

    put_u32(&mut out, 120, 2);
    put_u64(&mut out, 120 + 8, 176);
    put_u64(&mut out, 120 + 32, 48);
    put_u64(&mut out, 120 + 40, 48);

    put_u64(&mut out, 176, 5);
    put_u64(&mut out, 184, 0x10800);
    put_u64(&mut out, 192, 10);
    put_u64(&mut out, 200, 16);
    out
}

/// Standard PE image checksum with the `CheckSum` field skipped.
pub fn pe_image_checksum(bytes: &[u8]) -> u32 {
    let mut sum: u64 = 0;
    for (i, pair) in bytes.chunks(2).enumerate() {
        let at = i * 2;
        if (PE_CHECKSUM_OFFSET..PE_CHECKSUM_OFFSET + 4).contains(&at) {
            continue;
        }
        let word = u64::from(pair[0]) | pair.get(1).map_or(0, |b| u64::from(*b) << 8);
        sum += word;
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum = (sum & 0xffff) + (sum >> 16);
    (sum + bytes.len() as u64) as u32
}

/// A PE32+ x86-64 console executable importing `KERNEL32.dll`, with ASLR, DEP
/// and a `/GS` cookie, image version 1.2, a `.meta` section and a valid
/// optional-header checksum.
pub fn pe_executable() -> Vec<u8> {
    let mut out = vec![0u8; 0xa00];
    out[..2].copy_from_slice(b"MZ");
    put_u32(&mut out, 0x3c, PE_OFFSET as u32);
    out[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

    let coff = PE_OFFSET + 4;
    put_u16(&mut out, coff, 0x8664);
    put_u16(&mut out, coff + 2, 3);
    put_u16(&mut out, coff + 16, OPTIONAL_SIZE as u16);
    put_u16(&mut out, coff + 18, 0x0022);

    let o = OPTIONAL_OFFSET;
    put_u16(&mut out, o, 0x20b);
    put_u32(&mut out, o + 16, 0x1000);
    put_u32(&mut out, o + 20, 0x1000);
    put_u64(&mut out, o + 24, 0x1_4000_0000);
    put_u32(&mut out, o + 32, 0x1000);
    put_u32(&mut out, o + 36, 0x200);
    put_u16(&mut out, o + 40, 6);
    put_u16(&mut out, o + 44, 1);
    put_u16(&mut out, o + 46, 2);
    put_u16(&mut out, o + 48, 6);
    put_u32(&mut out, o + 56, 0x4000);
    put_u32(&mut out, o + 60, 0x400);
    put_u16(&mut out, o + 68, 3);
    put_u16(&mut out, o + 70, 0x8160);
    put_u32(&mut out, o + 108, 16);
    // Import directory, then load config.
    put_u32(&mut out, o + 112 + 8, 0x2000);
    put_u32(&mut out, o + 112 + 8 + 4, 40);
    put_u32(&mut out, o + 112 + 80, 0x2080);
    put_u32(&mut out, o + 112 + 80 + 4, 0x100);

    let sections: [(&[u8], u32, u32, u32); 3] = [
        (b".text", 0x1000, 0x400, 0x6000_0020),
        (b".rdata", 0x2000, 0x600, 0x4000_0040),
        (b".meta", 0x3000, 0x800, 0x4200_0040),
    ];
    for (i, (name, rva, raw, characteristics)) in sections.iter().enumerate() {
        let at = SECTION_TABLE_OFFSET + i * 40;
        out[at..at + name.len()].copy_from_slice(name);
        put_u32(&mut out, at + 8, 0x200);
        put_u32(&mut out, at + 12, *rva);
        put_u32(&mut out, at + 16, 0x200);
        put_u32(&mut out, at + 20, *raw);
        put_u32(&mut out, at + 36, *characteristics);
    }

    out[0x400] = 0xc3;
    put_u32(&mut out, 0x600 + 12, 0x2040);
    out[0x640..0x640 + 13].copy_from_slice(b"KERNEL32.dll\0");
    put_u32(&mut out, 0x680, 0x100);
    put_u64(&mut out, 0x680 + 88, 0x1_4000_3000);
    let meta = b"name=demo-service\nversion=1.2.3\nlicense=Apache-2.0\n";
    out[0x800..0x800 + meta.len()].copy_from_slice(meta);

    let checksum = pe_image_checksum(&out);
    put_u32(&mut out, PE_CHECKSUM_OFFSET, checksum);
    out
}

// Mach-O

const MH_MAGIC_64: u32 = 0xfeed_facf;
const CPU_TYPE_ARM64: u32 = 0x0100_000c;
const MH_EXECUTE: u32 = 2;
const MH_PIE_FLAGS: u32 = 0x0020_0085;
const LC_SEGMENT_64: u32 = 0x19;
const LC_SYMTAB: u32 = 0x2;
const LC_LOAD_DYLIB: u32 = 0xc;
const LC_SOURCE_VERSION: u32 = 0x2a;
const LC_MAIN: u32 = 0x8000_0028;

fn segment_64(
    segname: &str,
    vmaddr: u64,
    fileoff: u64,
    initprot: u32,
    sections: &[(&str, u64, u32, u32)],
) -> Vec<u8> {
    let mut cmd = vec![0u8; 72 + 80 * sections.len()];
    put_u32(&mut cmd, 0, LC_SEGMENT_64);
    let cmdsize = cmd.len() as u32;
    put_u32(&mut cmd, 4, cmdsize);
    cmd[8..8 + segname.len()].copy_from_slice(segname.as_bytes());
    put_u64(&mut cmd, 24, vmaddr);
    put_u64(&mut cmd, 32, 0x1000);
    put_u64(&mut cmd, 40, fileoff);
    put_u64(&mut cmd, 48, 0x1000);
    put_u32(&mut cmd, 56, initprot);
    put_u32(&mut cmd, 60, initprot);
    put_u32(&mut cmd, 64, sections.len() as u32);
    for (i, (sectname, size, offset, flags)) in sections.iter().enumerate() {
        let at = 72 + i * 80;
        cmd[at..at + sectname.len()].copy_from_slice(sectname.as_bytes());
        cmd[at + 16..at + 16 + segname.len()].copy_from_slice(segname.as_bytes());
        put_u64(&mut cmd, at + 32, vmaddr + u64::from(*offset) - fileoff);
        put_u64(&mut cmd, at + 40, *size);
        put_u32(&mut cmd, at + 48, *offset);
        put_u32(&mut cmd, at + 64, *flags);
    }
    cmd
}

/// A PIE arm64 Mach-O executable linking `libSystem`, with a stack protector
/// symbol, source version 1.2.3 and a `__meta` section carrying a checksum.
pub fn macho_executable() -> Vec<u8> {
    let meta = format!(
        "name=demo-tool\nversion=1.2.3\nlicense=BSD-3-Clause\nchecksum=sha256:{CHECKSUM_PLACEHOLDER}\n"
    )
    .into_bytes();
    let meta_len = meta.len();

    let dylib_name = b"/usr/lib/libSystem.B.dylib\0";
    let mut dylib = vec![0u8; (24 + dylib_name.len() + 7) & !7];
    put_u32(&mut dylib, 0, LC_LOAD_DYLIB);
    let cmdsize = dylib.len() as u32;
    put_u32(&mut dylib, 4, cmdsize);
    put_u32(&mut dylib, 8, 24);
    put_u32(&mut dylib, 16, 0x0516_0000);
    put_u32(&mut dylib, 20, 0x0001_0000);
    dylib[24..24 + dylib_name.len()].copy_from_slice(dylib_name);

    let mut main = vec![0u8; 24];
    put_u32(&mut main, 0, LC_MAIN);
    put_u32(&mut main, 4, 24);
    put_u64(&mut main, 8, 0x800);

    let mut version = vec![0u8; 16];
    put_u32(&mut version, 0, LC_SOURCE_VERSION);
    put_u32(&mut version, 4, 16);
    put_u64(&mut version, 8, (1u64 << 40) | (2 << 30) | (3 << 20));

    let strtab = b"\0___stack_chk_fail\0_main\0";
    let mut symtab = vec![0u8; 24];
    put_u32(&mut symtab, 0, LC_SYMTAB);
    put_u32(&mut symtab, 4, 24);
    put_u32(&mut symtab, 16, 0x2000);
    put_u32(&mut symtab, 20, strtab.len() as u32);

    let commands = [
        segment_64(
            "__TEXT",
            0x1_0000_0000,
            0,
            5,
            &[("__text", 0x100, 0x800, 0x8000_0400)],
        ),
        segment_64(
            "__DATA",
            0x1_0000_1000,
            0x1000,
            3,
            &[("__meta", meta_len as u64, 0x1000, 0)],
        ),
        dylib,
        main,
        version,
        symtab,
    ];

    let mut out = vec![0u8; 0x2000 + strtab.len()];
    put_u32(&mut out, 0, MH_MAGIC_64);
    put_u32(&mut out, 4, CPU_TYPE_ARM64);
    put_u32(&mut out, 12, MH_EXECUTE);
    put_u32(&mut out, 16, commands.len() as u32);
    put_u32(&mut out, 20, commands.iter().map(Vec::len).sum::<usize>() as u32);
    put_u32(&mut out, 24, MH_PIE_FLAGS);
    let mut at = 32;
    for cmd in &commands {
        out[at..at + cmd.len()].copy_from_slice(cmd);
        at += cmd.len();
    }
    out[0x800..0x900].fill(0x1f);
    out[0x2000..].copy_from_slice(strtab);

    let meta_range = 0x1000..0x1000 + meta_len;
    out[meta_range.clone()].copy_from_slice(&meta);
    seal(&mut out, meta_range, true, None);
    out
}
