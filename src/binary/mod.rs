// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Opens the audited binary and turns its bytes into a normalized `BinaryDescriptor`.
//!
//! The descriptor is built once per run and shared read-only by the check runner
//! and the SBOM extractor.

mod detect;
mod digest;
mod elf;
mod macho;
mod metadata;
mod pe;
mod source;

use serde::Serialize;
use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub use detect::{detect, Format, MIN_SIGNATURE_LEN};
pub use digest::{digest_excluding, ContentDigest, DigestAlgorithm};
pub use metadata::{
    decode_certificates, license_markers, CertificateInfo, EmbeddedCertificate, EmbeddedMetadata,
};
pub use pe::{pe_checksum, PeChecksum};
pub use source::{ByteSource, FileSource};

use source::Reader;

/// Names of the embedded compliance sections, per format family.
const META_SECTIONS: [&str; 2] = [".meta", "__meta"];
const CERT_SECTIONS: [&str; 2] = [".cert", "__cert"];
const SIG_SECTIONS: [&str; 2] = [".sig", "__sig"];
const COMMENT_SECTIONS: [&str; 1] = [".comment"];

/// Errors that prevent a binary from being opened at all.
///
/// This is the only fatal condition of a compliance run.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Binary not found: {path:?}")]
    BinaryNotFound { path: PathBuf },
    #[error("Permission denied: {path:?}")]
    PermissionDenied { path: PathBuf },
    #[error("Not a regular file: {path:?}")]
    NotAFile { path: PathBuf },
    #[error("Failed to read binary: {path:?}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl InputError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Self::BinaryNotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Unreadable { path, source },
        }
    }
}

/// Errors raised while classifying the leading bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectError {
    #[error("Input truncated: need at least {needed} bytes, have {available}")]
    Truncated { needed: u64, available: u64 },
    #[error("Failed to read signature: {0}")]
    Io(String),
}

/// Errors raised by the format parsers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Malformed header: {0}")]
    MalformedHeader(String),
    #[error("Unexpected end of file: {0}")]
    UnexpectedEof(String),
    #[error("Unsupported variant: {0}")]
    UnsupportedVariant(String),
    #[error("Failed to read {0}")]
    Io(String),
}

impl ParseError {
    pub(crate) fn from_io(err: &io::Error, what: &str) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::UnexpectedEof(what.to_string()),
            _ => Self::Io(format!("{what}: {err}")),
        }
    }
}

/// Why no descriptor is available for a binary. Stored as data, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("Unknown binary format")]
    UnknownFormat,
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// What the binary is meant to be loaded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryKind {
    Executable,
    SharedLibrary,
    Object,
    Other,
}

/// Target instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86,
    X86_64,
    Arm,
    Aarch64,
    RiscV,
    PowerPc,
    PowerPc64,
    Unknown(u32),
}

impl Architecture {
    #[must_use]
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Section,
    Segment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SectionFlags {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

/// One entry of the section or segment table, with ranges as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub name: String,
    pub kind: SectionKind,
    pub virtual_address: u64,
    pub virtual_size: u64,
    /// Absolute offset in the audited file.
    pub file_offset: u64,
    /// Zero for ranges that occupy no file space (`.bss`, zerofill).
    pub file_size: u64,
    pub flags: SectionFlags,
    pub loadable: bool,
}

impl Section {
    /// File range covered by this entry.
    #[must_use]
    pub fn file_range(&self) -> Range<u64> {
        self.file_offset..self.file_offset.saturating_add(self.file_size)
    }
}

/// An imported library and whatever version requirement the format encodes for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Import {
    pub name: String,
    /// Symbol versions required from the library (ELF `verneed`).
    pub version_requirements: Vec<String>,
    /// Single best version hint: the highest ELF requirement or the Mach-O
    /// compatibility version. `None` when the import is unpinned.
    pub version_hint: Option<String>,
}

impl Import {
    pub(crate) fn unpinned(name: String) -> Self {
        Self {
            name,
            version_requirements: Vec::new(),
            version_hint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    /// Raw signature stored in the `.sig`/`__sig` section.
    Detached,
    /// PKCS#7 blob from the PE certificate table.
    Authenticode,
    /// Mach-O `LC_CODE_SIGNATURE` superblob.
    CodeSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureBlob {
    pub kind: SignatureKind,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub range: Range<u64>,
}

/// Platform hardening markers, normalized across formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Hardening {
    /// PIE (ELF, Mach-O) or ASLR via `DYNAMIC_BASE` (PE).
    pub pie: bool,
    pub nx_stack: bool,
    pub stack_protector: bool,
    /// ELF `PT_GNU_RELRO`; informational only.
    pub relro: bool,
}

/// A version string from a format-specific header field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionField {
    pub source: &'static str,
    pub value: String,
}

/// What a format parser produces before the shared compliance sections are read.
#[derive(Debug, Default)]
pub(crate) struct Image {
    pub(crate) architecture: Option<Architecture>,
    pub(crate) bitness: u8,
    pub(crate) kind: Option<BinaryKind>,
    pub(crate) entry_point: Option<u64>,
    pub(crate) sections: Vec<Section>,
    pub(crate) imports: Vec<Import>,
    pub(crate) certificates: Vec<EmbeddedCertificate>,
    pub(crate) signatures: Vec<SignatureBlob>,
    pub(crate) hardening: Hardening,
    pub(crate) version_fields: Vec<VersionField>,
    pub(crate) pe_checksum: Option<PeChecksum>,
}

/// Normalized structural and cryptographic summary of a parsed binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryDescriptor {
    format: Format,
    architecture: Architecture,
    bitness: u8,
    kind: BinaryKind,
    entry_point: Option<u64>,
    sections: Vec<Section>,
    imports: Vec<Import>,
    certificates: Vec<EmbeddedCertificate>,
    signatures: Vec<SignatureBlob>,
    licenses: Vec<String>,
    metadata: EmbeddedMetadata,
    hardening: Hardening,
    version_fields: Vec<VersionField>,
    pe_checksum: Option<PeChecksum>,
    digest: ContentDigest,
    file_size: u64,
}

impl BinaryDescriptor {
    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    #[must_use]
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// 32 or 64.
    #[must_use]
    pub fn bitness(&self) -> u8 {
        self.bitness
    }

    #[must_use]
    pub fn kind(&self) -> BinaryKind {
        self.kind
    }

    #[must_use]
    pub fn entry_point(&self) -> Option<u64> {
        self.entry_point
    }

    /// Sections and segments in table order.
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[must_use]
    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    /// Embedded certificates, leaf first.
    #[must_use]
    pub fn certificates(&self) -> &[EmbeddedCertificate] {
        &self.certificates
    }

    #[must_use]
    pub fn signatures(&self) -> &[SignatureBlob] {
        &self.signatures
    }

    /// Declared license expressions, deduplicated in order of appearance.
    #[must_use]
    pub fn licenses(&self) -> &[String] {
        &self.licenses
    }

    #[must_use]
    pub fn metadata(&self) -> &EmbeddedMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn hardening(&self) -> Hardening {
        self.hardening
    }

    #[must_use]
    pub fn version_fields(&self) -> &[VersionField] {
        &self.version_fields
    }

    #[must_use]
    pub fn pe_checksum(&self) -> Option<PeChecksum> {
        self.pe_checksum
    }

    /// Whole-file digests computed when the binary was opened.
    #[must_use]
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// First named section (not segment) matching any of `names`.
    #[must_use]
    pub fn find_section(&self, names: &[&str]) -> Option<&Section> {
        find_section(&self.sections, names)
    }

    /// File range of the detached signature section, if present.
    #[must_use]
    pub fn detached_signature(&self) -> Option<&SignatureBlob> {
        self.signatures
            .iter()
            .find(|s| s.kind == SignatureKind::Detached)
    }
}

fn find_section<'a>(sections: &'a [Section], names: &[&str]) -> Option<&'a Section> {
    sections
        .iter()
        .filter(|s| s.kind == SectionKind::Section)
        .find(|s| names.contains(&s.name.as_str()))
}

/// Classify and parse a byte source into a descriptor.
///
/// # Errors
/// Returns a `FormatError` if the content is truncated, unrecognised, or malformed.
pub fn parse(source: &dyn ByteSource, digest: ContentDigest) -> Result<BinaryDescriptor, FormatError> {
    let format = detect(source)?;
    parse_format(format, source, digest)
}

fn parse_format(
    format: Format,
    source: &dyn ByteSource,
    digest: ContentDigest,
) -> Result<BinaryDescriptor, FormatError> {
    let image = match format {
        Format::Elf => elf::parse(source)?,
        Format::Pe => pe::parse(source)?,
        Format::MachO => macho::parse(source)?,
        Format::Unknown => return Err(FormatError::UnknownFormat),
    };
    Ok(assemble(format, image, source, digest)?)
}

/// Read the compliance sections shared by all formats and freeze the descriptor.
fn assemble(
    format: Format,
    image: Image,
    source: &dyn ByteSource,
    digest: ContentDigest,
) -> Result<BinaryDescriptor, ParseError> {
    let reader = Reader::new(source);
    let read = |section: &Section, what: &str| reader.bytes(section.file_offset, section.file_size, what);

    let mut licenses = Vec::new();
    let metadata = match find_section(&image.sections, &META_SECTIONS) {
        Some(section) => {
            let bytes = read(section, "metadata section")?;
            licenses.extend(license_markers(&bytes));
            EmbeddedMetadata::parse(&bytes, Some(section.file_range()))
        }
        None => EmbeddedMetadata::default(),
    };
    let mut declared: Vec<String> = metadata.get_all("license").map(str::to_string).collect();
    declared.append(&mut licenses);
    if let Some(section) = find_section(&image.sections, &COMMENT_SECTIONS) {
        declared.extend(license_markers(&read(section, "comment section")?));
    }
    let mut licenses = Vec::new();
    for license in declared {
        if !licenses.contains(&license) {
            licenses.push(license);
        }
    }

    let mut certificates = image.certificates;
    if let Some(section) = find_section(&image.sections, &CERT_SECTIONS) {
        certificates.extend(decode_certificates(&read(section, "certificate section")?));
    }

    let mut signatures = image.signatures;
    if let Some(section) = find_section(&image.sections, &SIG_SECTIONS) {
        signatures.push(SignatureBlob {
            kind: SignatureKind::Detached,
            bytes: read(section, "signature section")?,
            range: section.file_range(),
        });
    }

    Ok(BinaryDescriptor {
        format,
        architecture: image.architecture.unwrap_or(Architecture::Unknown(0)),
        bitness: image.bitness,
        kind: image.kind.unwrap_or(BinaryKind::Other),
        entry_point: image.entry_point,
        sections: image.sections,
        imports: image.imports,
        certificates,
        signatures,
        licenses,
        metadata,
        hardening: image.hardening,
        version_fields: image.version_fields,
        pe_checksum: image.pe_checksum,
        file_size: source.len(),
        digest,
    })
}

/// The audit target: an opened binary with its digest and parse outcome.
pub struct Binary {
    path: PathBuf,
    source: Box<dyn ByteSource>,
    digest: ContentDigest,
    format: Format,
    descriptor: Result<BinaryDescriptor, FormatError>,
}

impl Binary {
    /// Open a binary from disk, hash it and parse it once.
    ///
    /// # Errors
    /// Returns an `InputError` if the path is missing, unreadable, or not a regular file.
    /// Malformed content is not an error; it is recorded in the descriptor slot.
    pub fn open(path: &Path) -> Result<Self, InputError> {
        let meta = fs::metadata(path).map_err(|e| InputError::from_io(path, e))?;
        if !meta.is_file() {
            return Err(InputError::NotAFile {
                path: path.to_path_buf(),
            });
        }
        let source = FileSource::open(path).map_err(|e| InputError::from_io(path, e))?;
        Self::from_source(path.to_path_buf(), Box::new(source))
    }

    /// Build an audit target from bytes already in memory.
    ///
    /// # Errors
    /// Returns an `InputError` only if hashing the source fails.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<Self, InputError> {
        Self::from_source(path.into(), Box::new(bytes))
    }

    fn from_source(path: PathBuf, source: Box<dyn ByteSource>) -> Result<Self, InputError> {
        let digest = ContentDigest::compute(source.as_ref())
            .map_err(|e| InputError::from_io(&path, e))?;
        let (format, descriptor) = match detect(source.as_ref()) {
            Ok(format) => (format, parse_format(format, source.as_ref(), digest.clone())),
            Err(e) => (Format::Unknown, Err(FormatError::from(e))),
        };
        match &descriptor {
            Ok(d) => info!(
                path = %path.display(),
                size = source.len(),
                format = %format,
                sections = d.sections().len(),
                imports = d.imports().len(),
                "Opened binary"
            ),
            Err(e) => info!(
                path = %path.display(),
                size = source.len(),
                format = %format,
                error = %e,
                "Opened binary without a usable descriptor"
            ),
        }
        debug!(sha256 = digest.sha256(), "Content digest computed");
        Ok(Self {
            path,
            source,
            digest,
            format,
            descriptor,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw bytes, for checks that do not depend on the descriptor.
    #[must_use]
    pub fn source(&self) -> &dyn ByteSource {
        self.source.as_ref()
    }

    #[must_use]
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    /// Format reported by the detector (`Unknown` when detection failed).
    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    /// The descriptor, or the reason none could be built.
    ///
    /// # Errors
    /// Returns the stored `FormatError` when detection or parsing failed.
    pub fn descriptor(&self) -> Result<&BinaryDescriptor, &FormatError> {
        self.descriptor.as_ref()
    }

    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.source.len()
    }
}
