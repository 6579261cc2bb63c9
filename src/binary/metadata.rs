// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Decodes the embedded compliance sections: `key=value` metadata, DER
//! certificates and `SPDX-License-Identifier` markers.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::ops::Range;

/// Marker used by source files and build tooling to declare licenses inline.
const SPDX_MARKER: &str = "SPDX-License-Identifier:";

/// Key/value metadata declared by the binary about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddedMetadata {
    entries: Vec<(String, String)>,
    #[serde(skip)]
    range: Option<Range<u64>>,
}

impl EmbeddedMetadata {
    /// Parse a metadata block. NUL padding, blank lines, `#` comments and
    /// lines without `=` are ignored.
    #[must_use]
    pub fn parse(bytes: &[u8], range: Option<Range<u64>>) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let entries = text
            .split(['\n', '\0'])
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        Self { entries, range }
    }

    /// First value declared for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value declared for `key`, in declaration order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Entries whose key starts with `prefix`, with the prefix stripped.
    pub fn with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.entries.iter().filter_map(move |(k, v)| {
            k.strip_prefix(prefix).map(|rest| (rest, v.as_str()))
        })
    }

    /// File range of the metadata section, if the binary carries one.
    #[must_use]
    pub fn range(&self) -> Option<&Range<u64>> {
        self.range.as_ref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decoded fields of an embedded X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// A certificate found inside the binary.
///
/// `info` is `None` when the bytes could not be decoded as X.509.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddedCertificate {
    #[serde(skip)]
    pub der: Vec<u8>,
    pub info: Option<CertificateInfo>,
}

/// Split a blob of concatenated DER certificates.
///
/// Decoding stops at the first undecodable certificate; the remaining bytes
/// are kept as a single certificate without `info` so checks can report it.
#[must_use]
pub fn decode_certificates(blob: &[u8]) -> Vec<EmbeddedCertificate> {
    let mut certificates = Vec::new();
    let mut rest = trim_padding(blob);
    while !rest.is_empty() {
        match x509_parser::parse_x509_certificate(rest) {
            Ok((remaining, cert)) => {
                let consumed = rest.len() - remaining.len();
                certificates.push(EmbeddedCertificate {
                    der: rest[..consumed].to_vec(),
                    info: Some(CertificateInfo {
                        subject: cert.subject().to_string(),
                        issuer: cert.issuer().to_string(),
                        serial: cert.raw_serial_as_string(),
                        not_before: asn1_to_utc(cert.validity().not_before),
                        not_after: asn1_to_utc(cert.validity().not_after),
                    }),
                });
                rest = trim_padding(remaining);
            }
            Err(_) => {
                certificates.push(EmbeddedCertificate {
                    der: rest.to_vec(),
                    info: None,
                });
                break;
            }
        }
    }
    certificates
}

/// Convert an ASN.1 time to `DateTime<Utc>`, clamping unrepresentable values.
fn asn1_to_utc(t: x509_parser::time::ASN1Time) -> DateTime<Utc> {
    Utc.timestamp_opt(t.timestamp(), 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Collect license expressions declared via `SPDX-License-Identifier:` markers.
#[must_use]
pub fn license_markers(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    text.split(['\n', '\0'])
        .filter_map(|line| {
            line.find(SPDX_MARKER)
                .map(|pos| line[pos + SPDX_MARKER.len()..].trim())
        })
        .map(|expr| expr.trim_end_matches(['*', '/']).trim().to_string())
        .filter(|expr| !expr.is_empty())
        .collect()
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata_entries() {
        let block = b"# product metadata\nname=demo\nversion=1.2.3\nlicense=MIT\n\nlicense=Apache-2.0\nnot a pair\n\0\0\0";
        let metadata = EmbeddedMetadata::parse(block, Some(10..20));
        assert_eq!(metadata.get("name"), Some("demo"));
        assert_eq!(metadata.get("version"), Some("1.2.3"));
        assert_eq!(
            metadata.get_all("license").collect::<Vec<_>>(),
            vec!["MIT", "Apache-2.0"]
        );
        assert_eq!(metadata.get("missing"), None);
        assert_eq!(metadata.range(), Some(&(10..20)));
    }

    #[test]
    fn test_metadata_values_may_contain_equals() {
        let metadata = EmbeddedMetadata::parse(b"checksum = sha256:ab=cd\n", None);
        assert_eq!(metadata.get("checksum"), Some("sha256:ab=cd"));
    }

    #[test]
    fn test_metadata_prefix_lookup() {
        let metadata =
            EmbeddedMetadata::parse(b"depends.libfoo.so=libbar.so\nname=x\n", None);
        let deps: Vec<_> = metadata.with_prefix("depends.").collect();
        assert_eq!(deps, vec![("libfoo.so", "libbar.so")]);
    }

    #[test]
    fn test_license_markers() {
        let bytes = b"GCC: (GNU) 13.2\0/* SPDX-License-Identifier: MIT OR Apache-2.0 */\0other";
        assert_eq!(license_markers(bytes), vec!["MIT OR Apache-2.0".to_string()]);
        assert!(license_markers(b"SPDX-License-Identifier:   \0").is_empty());
    }

    #[test]
    fn test_decode_garbage_certificate_keeps_bytes() {
        let certificates = decode_certificates(&[0x30, 0x03, 0x02, 0x01]);
        assert_eq!(certificates.len(), 1);
        assert!(certificates[0].info.is_none());
        assert_eq!(certificates[0].der, vec![0x30, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_decode_empty_blob() {
        assert!(decode_certificates(&[0, 0, 0, 0]).is_empty());
    }
}
