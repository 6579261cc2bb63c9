// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Streaming content digests over a byte source.

use serde::Serialize;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::io;
use std::ops::Range;

use super::source::ByteSource;

/// Buffer size for streaming reads (64 KiB).
const BUF_SIZE: u64 = 64 * 1024;

/// Digest algorithms the linter computes and understands in declared checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl DigestAlgorithm {
    /// Canonical name, as used in SBOM digest maps.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Digest length in bytes.
    #[must_use]
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Parse the prefix of a declared checksum (`sha256`, `SHA-256`, ...).
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }
}

/// Whole-file digests, computed once when a binary is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentDigest {
    sha256: String,
    sha512: String,
}

impl ContentDigest {
    /// Hash the whole source in a single streaming pass.
    ///
    /// # Errors
    /// Returns the I/O error raised by the source.
    pub fn compute(source: &dyn ByteSource) -> io::Result<Self> {
        let mut sha256 = Sha256::new();
        let mut sha512 = Sha512::new();
        for_each_chunk(source, &[], |chunk| {
            sha256.update(chunk);
            sha512.update(chunk);
        })?;
        Ok(Self {
            sha256: hex::encode(sha256.finalize()),
            sha512: hex::encode(sha512.finalize()),
        })
    }

    /// Lowercase hex SHA-256 of the content; the binary's identity in reports.
    #[must_use]
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    #[must_use]
    pub fn sha512(&self) -> &str {
        &self.sha512
    }

    #[must_use]
    pub fn get(&self, algorithm: DigestAlgorithm) -> &str {
        match algorithm {
            DigestAlgorithm::Sha256 => &self.sha256,
            DigestAlgorithm::Sha512 => &self.sha512,
        }
    }

    /// Digests keyed by canonical algorithm name.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (DigestAlgorithm::Sha256.name().to_string(), self.sha256.clone()),
            (DigestAlgorithm::Sha512.name().to_string(), self.sha512.clone()),
        ])
    }
}

/// Hash every byte of the source except the given ranges.
///
/// Used for self-declared checksums and detached signatures, whose own bytes
/// cannot be part of what they cover.
///
/// # Errors
/// Returns the I/O error raised by the source.
pub fn digest_excluding(
    source: &dyn ByteSource,
    excluded: &[Range<u64>],
    algorithm: DigestAlgorithm,
) -> io::Result<Vec<u8>> {
    match algorithm {
        DigestAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            for_each_chunk(source, excluded, |chunk| hasher.update(chunk))?;
            Ok(hasher.finalize().to_vec())
        }
        DigestAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            for_each_chunk(source, excluded, |chunk| hasher.update(chunk))?;
            Ok(hasher.finalize().to_vec())
        }
    }
}

/// Stream the source in chunks, skipping excluded ranges.
fn for_each_chunk(
    source: &dyn ByteSource,
    excluded: &[Range<u64>],
    mut consume: impl FnMut(&[u8]),
) -> io::Result<()> {
    let len = source.len();
    let mut skip: Vec<Range<u64>> = excluded
        .iter()
        .map(|r| r.start.min(len)..r.end.min(len))
        .filter(|r| r.start < r.end)
        .collect();
    skip.sort_by_key(|r| r.start);

    let mut buf = vec![0u8; BUF_SIZE as usize];
    let mut offset = 0u64;
    while offset < len {
        if let Some(range) = skip.iter().find(|r| r.contains(&offset)) {
            offset = range.end;
            continue;
        }
        let next_skip = skip
            .iter()
            .map(|r| r.start)
            .filter(|start| *start > offset)
            .min()
            .unwrap_or(len);
        let chunk = (next_skip - offset).min(BUF_SIZE);
        // chunk <= BUF_SIZE, so the conversion cannot truncate.
        let slice = &mut buf[..chunk as usize];
        source.read_exact_at(offset, slice)?;
        consume(slice);
        offset += chunk;
    }
    Ok(())
}
