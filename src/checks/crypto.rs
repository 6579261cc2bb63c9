// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Cryptographic checks: certificate chains, detached signatures, declared
//! checksums and algorithm identifiers.

use serde_json::json;
use std::collections::BTreeSet;
use std::ops::Range;
use x509_parser::certificate::X509Certificate;
use x509_parser::parse_x509_certificate;

use super::{join, CheckContext, CheckError, ComplianceCheck, Outcome};
use crate::binary::{digest_excluding, pe_checksum, ByteSource, DigestAlgorithm, SignatureKind};

pub struct CertificateValidationCheck;

impl CertificateValidationCheck {
    /// Whether `last` is itself a trust anchor or is signed by one.
    fn anchored(last: &X509Certificate<'_>, last_der: &[u8], anchors: &[Vec<u8>]) -> bool {
        anchors.iter().any(|anchor_der| {
            if anchor_der.as_slice() == last_der {
                return true;
            }
            let Ok((_, anchor)) = parse_x509_certificate(anchor_der) else {
                return false;
            };
            anchor.subject().as_raw() == last.issuer().as_raw()
                && last.verify_signature(Some(anchor.public_key())).is_ok()
        })
    }
}

impl ComplianceCheck for CertificateValidationCheck {
    fn id(&self) -> &'static str {
        "certificate-validation"
    }

    fn description(&self) -> &'static str {
        "Embedded certificates chain to a trusted anchor and are currently valid"
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let descriptor = ctx.descriptor()?;
        let policy = ctx.policy();
        let embedded = descriptor.certificates();

        if embedded.is_empty() {
            return Ok(if policy.certificate_required() {
                Outcome::fail("No embedded certificate, but a certificate is required")
            } else {
                Outcome::pass("No embedded certificate (not required by policy)")
            }
            .with_metadata(json!({ "certificates": 0 })));
        }

        let mut parsed = Vec::with_capacity(embedded.len());
        for (i, cert) in embedded.iter().enumerate() {
            match parse_x509_certificate(&cert.der) {
                Ok((_, x509)) if cert.info.is_some() => parsed.push(x509),
                _ => {
                    return Ok(Outcome::fail(format!("Certificate #{i} is not valid X.509"))
                        .with_metadata(json!({ "certificates": embedded.len() })))
                }
            }
        }

        let mut problems = Vec::new();
        let at = ctx.evaluated_at();
        for info in embedded.iter().filter_map(|c| c.info.as_ref()) {
            if at < info.not_before {
                problems.push(format!("{} is not valid before {}", info.subject, info.not_before));
            } else if at > info.not_after {
                problems.push(format!("{} expired on {}", info.subject, info.not_after));
            }
        }
        for pair in parsed.windows(2) {
            if pair[0].verify_signature(Some(pair[1].public_key())).is_err() {
                problems.push(format!(
                    "{} is not signed by {}",
                    pair[0].subject(),
                    pair[1].subject()
                ));
            }
        }
        if let (Some(last), Some(last_der)) = (parsed.last(), embedded.last()) {
            if policy.trusted_certs().is_empty() {
                problems.push("no trust anchors configured".to_string());
            } else if !Self::anchored(last, &last_der.der, policy.trusted_certs()) {
                problems.push(format!("{} does not chain to a trusted anchor", last.subject()));
            }
        }

        let subjects: Vec<String> = embedded
            .iter()
            .filter_map(|c| c.info.as_ref().map(|i| i.subject.clone()))
            .collect();
        let metadata = json!({
            "certificates": embedded.len(),
            "subjects": subjects,
            "evaluated_at": at.to_rfc3339(),
            "problems": problems,
        });
        if problems.is_empty() {
            Ok(Outcome::pass(format!(
                "Chain of {} certificate(s) verified against a trusted anchor",
                embedded.len()
            ))
            .with_metadata(metadata))
        } else {
            Ok(Outcome::fail(join(&problems)).with_metadata(metadata))
        }
    }
}

pub struct SignatureVerificationCheck;

impl ComplianceCheck for SignatureVerificationCheck {
    fn id(&self) -> &'static str {
        "signature-verification"
    }

    fn description(&self) -> &'static str {
        "Detached signature verifies against a trusted key"
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let descriptor = ctx.descriptor()?;
        let keys = ctx.policy().trusted_keys();

        let Some(signature) = descriptor.detached_signature() else {
            let other: Vec<&str> = descriptor
                .signatures()
                .iter()
                .map(|s| match s.kind {
                    SignatureKind::Authenticode => "Authenticode",
                    SignatureKind::CodeSignature => "code signature",
                    SignatureKind::Detached => "detached",
                })
                .collect();
            let details = if other.is_empty() {
                "No detached signature present".to_string()
            } else {
                format!(
                    "No detached signature present (found {} which is not verified)",
                    join(&other)
                )
            };
            return Ok(Outcome::fail(details).with_metadata(json!({ "signed": false })));
        };
        if keys.is_empty() {
            return Ok(Outcome::fail("Signature present but no trusted keys configured")
                .with_metadata(json!({ "signed": true, "trusted_keys": 0 })));
        }

        let message = digest_excluding(
            ctx.binary().source(),
            &[signature.range.clone()],
            DigestAlgorithm::Sha256,
        )?;
        let metadata = |key: Option<&str>| {
            json!({
                "signed": true,
                "trusted_keys": keys.len(),
                "signature_bytes": signature.bytes.len(),
                "message_sha256": hex::encode(&message),
                "key": key,
            })
        };
        match keys.iter().find(|k| k.verify(&message, &signature.bytes)) {
            Some(key) => Ok(Outcome::pass(format!(
                "Signature verified with {} key {}",
                key.algorithm(),
                key.id()
            ))
            .with_metadata(metadata(Some(&key.id())))),
            None => Ok(Outcome::fail(format!(
                "Signature does not verify against any of {} trusted key(s)",
                keys.len()
            ))
            .with_metadata(metadata(None))),
        }
    }
}

pub struct HashIntegrityCheck;

impl HashIntegrityCheck {
    /// Split `sha256:<hex>` into its algorithm and lowercase digest.
    fn parse_declared(value: &str) -> Result<(DigestAlgorithm, String), String> {
        let (label, digest) = value
            .split_once(':')
            .ok_or_else(|| format!("malformed checksum {value:?}"))?;
        let algorithm = DigestAlgorithm::from_label(label)
            .ok_or_else(|| format!("unsupported checksum algorithm {label:?}"))?;
        let digest = digest.trim().to_ascii_lowercase();
        match hex::decode(&digest) {
            Ok(bytes) if bytes.len() == algorithm.output_len() => Ok((algorithm, digest)),
            _ => Err(format!("checksum is not a {} digest", algorithm.name())),
        }
    }
}

impl ComplianceCheck for HashIntegrityCheck {
    fn id(&self) -> &'static str {
        "hash-integrity"
    }

    fn description(&self) -> &'static str {
        "Recomputed digests match self-declared checksums"
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let descriptor = ctx.descriptor()?;
        let source = ctx.binary().source();

        let mut excluded: Vec<Range<u64>> = descriptor.metadata().range().cloned().into_iter().collect();
        if let Some(signature) = descriptor.detached_signature() {
            excluded.push(signature.range.clone());
        }

        let mut verified = Vec::new();
        let mut mismatches = Vec::new();
        for value in descriptor.metadata().get_all("checksum") {
            let (algorithm, declared) = match Self::parse_declared(value) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    mismatches.push(json!({ "declared": value, "error": reason }));
                    continue;
                }
            };
            let computed = hex::encode(digest_excluding(source, &excluded, algorithm)?);
            let entry = json!({
                "algorithm": algorithm.name(),
                "declared": declared,
                "computed": computed,
            });
            if computed == declared {
                verified.push(entry);
            } else {
                mismatches.push(entry);
            }
        }

        if let Some(pe) = descriptor.pe_checksum() {
            let computed = pe_checksum(source, pe.field_offset)?;
            let entry = json!({
                "algorithm": "pe-checksum",
                "declared": format!("{:#010x}", pe.declared),
                "computed": format!("{computed:#010x}"),
            });
            if computed == pe.declared {
                verified.push(entry);
            } else {
                mismatches.push(entry);
            }
        }

        if verified.is_empty() && mismatches.is_empty() {
            return Ok(Outcome::pass("No self-declared checksum to verify")
                .with_metadata(json!({ "declared": false })));
        }
        let metadata = json!({
            "declared": true,
            "verified": verified,
            "mismatches": mismatches,
        });
        if mismatches.is_empty() {
            Ok(Outcome::pass(format!("{} declared checksum(s) match", verified.len()))
                .with_metadata(metadata))
        } else {
            let names: Vec<String> = mismatches
                .iter()
                .map(|m| {
                    m.get("error")
                        .or_else(|| m.get("algorithm"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("checksum")
                        .to_string()
                })
                .collect();
            Ok(Outcome::fail(format!("Checksum mismatch: {}", join(&names))).with_metadata(metadata))
        }
    }
}

/// Identifiers of broken or deprecated primitives. Matched case-sensitively as
/// whole tokens inside printable strings.
const DEPRECATED_ALGORITHMS: [&str; 11] = [
    "MD2", "MD4", "MD5", "SHA1", "SHA-1", "RC2", "RC4", "DES", "3DES", "DES-CBC", "TripleDES",
];

/// Shortest printable run considered a string.
const MIN_STRING_LEN: usize = 4;
/// Longest entry of `DEPRECATED_ALGORITHMS`; longer tokens are never collected.
const MAX_IDENTIFIER_LEN: usize = 9;

/// Token scanner over printable runs. Hits count only once their run reaches
/// `MIN_STRING_LEN`, however the input is chunked.
#[derive(Default)]
struct StringScanner {
    found: BTreeSet<&'static str>,
    pending: BTreeSet<&'static str>,
    token: String,
    overlong: bool,
    run_len: usize,
}

impl StringScanner {
    fn push(&mut self, byte: u8) {
        if !(byte.is_ascii_graphic() || byte == b' ') {
            self.end_run();
            return;
        }
        self.run_len += 1;
        if !(byte.is_ascii_alphanumeric() || byte == b'-') {
            self.end_token();
        } else if self.token.len() == MAX_IDENTIFIER_LEN {
            self.token.clear();
            self.overlong = true;
        } else if !self.overlong {
            self.token.push(char::from(byte));
        }
    }

    fn end_token(&mut self) {
        if !self.overlong {
            if let Some(hit) = DEPRECATED_ALGORITHMS.iter().find(|d| **d == self.token) {
                self.pending.insert(*hit);
            }
        }
        self.token.clear();
        self.overlong = false;
    }

    fn end_run(&mut self) {
        self.end_token();
        if self.run_len >= MIN_STRING_LEN {
            self.found.append(&mut self.pending);
        }
        self.pending.clear();
        self.run_len = 0;
    }

    fn finish(mut self) -> BTreeSet<&'static str> {
        self.end_run();
        self.found
    }
}

/// Deprecated identifiers among the printable strings of the source.
fn deprecated_identifiers(source: &dyn ByteSource) -> std::io::Result<BTreeSet<&'static str>> {
    const CHUNK: u64 = 64 * 1024;
    let mut scanner = StringScanner::default();
    let len = source.len();
    let mut buf = vec![0u8; CHUNK as usize];
    let mut offset = 0u64;
    while offset < len {
        let size = (len - offset).min(CHUNK);
        let chunk = &mut buf[..size as usize];
        source.read_exact_at(offset, chunk)?;
        for byte in chunk.iter() {
            scanner.push(*byte);
        }
        offset += size;
    }
    Ok(scanner.finish())
}

pub struct EncryptionStandardCheck;

impl ComplianceCheck for EncryptionStandardCheck {
    fn id(&self) -> &'static str {
        "encryption-standard"
    }

    fn description(&self) -> &'static str {
        "Declared and embedded algorithm identifiers are approved"
    }

    fn requires_descriptor(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let policy = ctx.policy();
        let declared: Vec<&str> = ctx
            .binary()
            .descriptor()
            .map(|d| {
                d.metadata()
                    .get_all("algorithms")
                    .flat_map(|line| line.split(','))
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let unapproved: Vec<&str> = declared
            .iter()
            .copied()
            .filter(|a| !policy.is_algorithm_approved(a))
            .collect();
        let deprecated = deprecated_identifiers(ctx.binary().source())?;

        let metadata = json!({
            "declared": declared,
            "unapproved": unapproved,
            "deprecated": deprecated,
        });
        let mut problems = Vec::new();
        if !unapproved.is_empty() {
            problems.push(format!("not approved: {}", join(&unapproved)));
        }
        if !deprecated.is_empty() {
            problems.push(format!("deprecated identifiers found: {}", join(&deprecated)));
        }
        if !problems.is_empty() {
            return Ok(Outcome::fail(problems.join("; ")).with_metadata(metadata));
        }
        let details = if declared.is_empty() {
            "No algorithm identifiers declared; no deprecated identifiers found".to_string()
        } else {
            format!("All declared algorithms approved: {}", join(&declared))
        };
        Ok(Outcome::pass(details).with_metadata(metadata))
    }
}
