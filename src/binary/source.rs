// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Seekable byte sources and bounds-checked readers used by the format parsers.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use super::ParseError;

/// Largest table a parser is willing to load in one read (64 MiB).
pub(crate) const MAX_TABLE_SIZE: u64 = 64 * 1024 * 1024;

/// A random-access source of bytes.
///
/// Parsers only ever read header and table ranges through this trait, so the
/// cost of parsing stays proportional to the header size.
pub trait ByteSource: Send + Sync {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns `UnexpectedEof` if the range extends past the end of the source.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= <[u8]>::len(self))
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.as_slice().read_exact_at(offset, buf)
    }
}

/// A file on disk accessed through seek + read.
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    /// Open a file as a byte source.
    ///
    /// # Errors
    /// Returns the underlying I/O error if the file cannot be opened or its size read.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file handle lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

/// Byte order of a parsed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endian {
    Little,
    Big,
}

/// Bounds-checked access to a byte source.
///
/// Every range is validated against the source length before it is read;
/// out-of-range requests fail with `MalformedHeader`.
pub(crate) struct Reader<'a> {
    source: &'a dyn ByteSource,
    len: u64,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(source: &'a dyn ByteSource) -> Self {
        Self {
            len: source.len(),
            source,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Whether `[offset, offset + size)` lies inside the source.
    pub(crate) fn contains(&self, offset: u64, size: u64) -> bool {
        offset
            .checked_add(size)
            .is_some_and(|end| end <= self.len)
    }

    /// Read `size` bytes at `offset`, failing with `MalformedHeader` when the
    /// range is outside the source or larger than a sane table.
    pub(crate) fn bytes(&self, offset: u64, size: u64, what: &str) -> Result<Vec<u8>, ParseError> {
        if size > MAX_TABLE_SIZE {
            return Err(ParseError::MalformedHeader(format!(
                "{what}: declared size {size} exceeds limit"
            )));
        }
        if !self.contains(offset, size) {
            return Err(ParseError::MalformedHeader(format!(
                "{what}: range {offset:#x}+{size:#x} outside file of {} bytes",
                self.len
            )));
        }
        // size <= MAX_TABLE_SIZE, so the conversion cannot truncate.
        let mut buf = vec![0u8; size as usize];
        self.source
            .read_exact_at(offset, &mut buf)
            .map_err(|e| ParseError::from_io(&e, what))?;
        Ok(buf)
    }

    /// Read the fixed-size leading header of a container. A short file here
    /// is an `UnexpectedEof` rather than a malformed table reference.
    pub(crate) fn header(&self, offset: u64, size: u64, what: &str) -> Result<Vec<u8>, ParseError> {
        if !self.contains(offset, size) {
            return Err(ParseError::UnexpectedEof(format!(
                "{what}: need {size} bytes at {offset:#x}, file has {}",
                self.len
            )));
        }
        self.bytes(offset, size, what)
    }
}

/// Typed field access into a block that was already read from the source.
pub(crate) struct Fields<'a> {
    data: &'a [u8],
    endian: Endian,
    what: &'static str,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(data: &'a [u8], endian: Endian, what: &'static str) -> Self {
        Self { data, endian, what }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], ParseError> {
        offset
            .checked_add(N)
            .and_then(|end| self.data.get(offset..end))
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| {
                ParseError::MalformedHeader(format!(
                    "{}: field at {offset:#x} outside {}-byte block",
                    self.what,
                    self.data.len()
                ))
            })
    }

    pub(crate) fn u16(&self, offset: usize) -> Result<u16, ParseError> {
        let raw = self.array::<2>(offset)?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    pub(crate) fn u32(&self, offset: usize) -> Result<u32, ParseError> {
        let raw = self.array::<4>(offset)?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }

    pub(crate) fn u64(&self, offset: usize) -> Result<u64, ParseError> {
        let raw = self.array::<8>(offset)?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        })
    }

    /// Read a word that is 4 bytes in 32-bit layouts and 8 bytes in 64-bit ones.
    pub(crate) fn word(&self, offset: usize, is_64: bool) -> Result<u64, ParseError> {
        if is_64 {
            self.u64(offset)
        } else {
            self.u32(offset).map(u64::from)
        }
    }

    /// Read a fixed-width, NUL-padded name (section and segment names).
    pub(crate) fn fixed_str(&self, offset: usize, width: usize) -> Result<String, ParseError> {
        let slice = offset
            .checked_add(width)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| {
                ParseError::MalformedHeader(format!("{}: name at {offset:#x} truncated", self.what))
            })?;
        Ok(nul_terminated(slice))
    }
}

/// Decode a NUL-terminated string starting at `offset` in a string table.
///
/// Returns `None` when the offset is outside the table.
pub(crate) fn string_at(table: &[u8], offset: usize) -> Option<String> {
    table.get(offset..).map(nul_terminated)
}

fn nul_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
