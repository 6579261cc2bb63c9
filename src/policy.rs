// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Compliance policy: deny/allow lists and trust material consulted by the checks.
//!
//! List files hold one entry per line; empty lines and lines starting with `#`
//! are ignored.

use anyhow::{bail, Context, Result};
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA256_FIXED, ED25519};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const DEFAULT_LIBRARY_DENYLIST: &[&str] = &[
    "libssl.so.0.9*",
    "libssl.so.1.0*",
    "libcrypto.so.0.9*",
    "libcrypto.so.1.0*",
    "libssl.0.9*.dylib",
    "libcrypto.0.9*.dylib",
    "libeay32.dll",
    "ssleay32.dll",
];

const DEFAULT_APPROVED_ALGORITHMS: &[&str] = &[
    "AES-128",
    "AES-256",
    "AES-128-GCM",
    "AES-256-GCM",
    "ChaCha20-Poly1305",
    "SHA-256",
    "SHA-384",
    "SHA-512",
    "SHA3-256",
    "SHA3-512",
    "HMAC-SHA256",
    "HMAC-SHA384",
    "HMAC-SHA512",
    "Ed25519",
    "X25519",
    "ECDSA-P256",
    "ECDSA-P384",
    "RSA-2048",
    "RSA-3072",
    "RSA-4096",
    "TLS 1.2",
    "TLS 1.3",
];

const DEFAULT_LICENSE_DENYLIST: &[&str] = &[
    "AGPL-1.0",
    "AGPL-3.0",
    "AGPL-3.0-only",
    "AGPL-3.0-or-later",
    "SSPL-1.0",
];

const ED25519_KEY_LEN: usize = 32;
const P256_UNCOMPRESSED_KEY_LEN: usize = 65;

/// Read the non-comment lines of a list file.
fn read_entries(path: &Path, what: &str) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {what} file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(std::string::ToString::to_string)
        .collect())
}

/// A list of names matched exactly, or as a pattern when an entry holds one `*`
/// (`libssl.so.1.0*`, `libssl.0.9*.dylib`).
#[derive(Debug, Clone, Default)]
pub struct NameList {
    exact: HashSet<String>,
    patterns: Vec<(String, String)>,
}

impl NameList {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::default();
        for entry in entries {
            let entry: String = entry.into();
            match entry.split_once('*') {
                Some((prefix, suffix)) => list
                    .patterns
                    .push((prefix.to_string(), suffix.to_string())),
                None => {
                    list.exact.insert(entry);
                }
            }
        }
        list
    }

    /// Load a list from a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_entries(read_entries(path.as_ref(), "list")?))
    }

    /// The entry that matches `name`, if any.
    #[must_use]
    pub fn matching(&self, name: &str) -> Option<String> {
        if self.exact.contains(name) {
            return Some(name.to_string());
        }
        self.patterns
            .iter()
            .find(|(prefix, suffix)| {
                name.len() >= prefix.len() + suffix.len()
                    && name.starts_with(prefix.as_str())
                    && name.ends_with(suffix.as_str())
            })
            .map(|(prefix, suffix)| format!("{prefix}*{suffix}"))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.matching(name).is_some()
    }

    /// Like [`NameList::contains`], ignoring ASCII case (SPDX identifiers).
    #[must_use]
    pub fn contains_ignore_ascii_case(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.exact.iter().any(|entry| entry.eq_ignore_ascii_case(&name))
            || self.patterns.iter().any(|(prefix, suffix)| {
                name.len() >= prefix.len() + suffix.len()
                    && name.starts_with(prefix.to_ascii_lowercase().as_str())
                    && name.ends_with(suffix.to_ascii_lowercase().as_str())
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Normalize an algorithm identifier for comparison: uppercase alphanumerics only.
#[must_use]
pub fn normalize_algorithm(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// A public key trusted to sign audited binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedKey {
    Ed25519(Vec<u8>),
    /// Uncompressed SEC1 point.
    EcdsaP256(Vec<u8>),
}

impl TrustedKey {
    /// Parse a hex-encoded key; the algorithm is inferred from its length.
    ///
    /// # Errors
    /// Returns an error for invalid hex or an unsupported key length.
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim()).context("Trusted key is not valid hex")?;
        match bytes.len() {
            ED25519_KEY_LEN => Ok(Self::Ed25519(bytes)),
            P256_UNCOMPRESSED_KEY_LEN if bytes[0] == 0x04 => Ok(Self::EcdsaP256(bytes)),
            other => bail!("Unsupported trusted key of {other} bytes"),
        }
    }

    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Ed25519(_) => "Ed25519",
            Self::EcdsaP256(_) => "ECDSA-P256",
        }
    }

    /// Verify `signature` over `message`. ECDSA signatures are accepted in
    /// both fixed and ASN.1 encodings.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::Ed25519(key) => UnparsedPublicKey::new(&ED25519, key)
                .verify(message, signature)
                .is_ok(),
            Self::EcdsaP256(key) => {
                UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, key)
                    .verify(message, signature)
                    .is_ok()
                    || UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, key)
                        .verify(message, signature)
                        .is_ok()
            }
        }
    }

    /// Lowercase hex fingerprint prefix, for reports.
    #[must_use]
    pub fn id(&self) -> String {
        let bytes = match self {
            Self::Ed25519(key) | Self::EcdsaP256(key) => key,
        };
        hex::encode(&bytes[..bytes.len().min(8)])
    }
}

/// All tunables consulted by the compliance checks.
#[derive(Debug, Clone)]
pub struct Policy {
    library_denylist: NameList,
    approved_algorithms: HashSet<String>,
    license_denylist: NameList,
    trusted_keys: Vec<TrustedKey>,
    trusted_certs: Vec<Vec<u8>>,
    require_certificate: bool,
    require_pinned_dependencies: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            library_denylist: NameList::from_entries(DEFAULT_LIBRARY_DENYLIST.iter().copied()),
            approved_algorithms: DEFAULT_APPROVED_ALGORITHMS
                .iter()
                .map(|a| normalize_algorithm(a))
                .collect(),
            license_denylist: NameList::from_entries(DEFAULT_LICENSE_DENYLIST.iter().copied()),
            trusted_keys: Vec::new(),
            trusted_certs: Vec::new(),
            require_certificate: true,
            require_pinned_dependencies: true,
        }
    }
}

impl Policy {
    #[must_use]
    pub fn with_library_denylist(mut self, list: NameList) -> Self {
        self.library_denylist = list;
        self
    }

    #[must_use]
    pub fn with_approved_algorithms<I, S>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.approved_algorithms = algorithms
            .into_iter()
            .map(|a| normalize_algorithm(a.as_ref()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_license_denylist(mut self, list: NameList) -> Self {
        self.license_denylist = list;
        self
    }

    #[must_use]
    pub fn with_trusted_key(mut self, key: TrustedKey) -> Self {
        self.trusted_keys.push(key);
        self
    }

    /// Add a DER-encoded trust anchor.
    #[must_use]
    pub fn with_trusted_cert(mut self, der: Vec<u8>) -> Self {
        self.trusted_certs.push(der);
        self
    }

    #[must_use]
    pub fn require_certificate(mut self, required: bool) -> Self {
        self.require_certificate = required;
        self
    }

    #[must_use]
    pub fn require_pinned_dependencies(mut self, required: bool) -> Self {
        self.require_pinned_dependencies = required;
        self
    }

    /// Replace the approved algorithms with the entries of a list file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn load_approved_algorithms(self, path: &Path) -> Result<Self> {
        let entries = read_entries(path, "approved algorithms")?;
        Ok(self.with_approved_algorithms(entries))
    }

    /// Add trusted keys from a file of hex-encoded keys.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is not a supported key.
    pub fn load_trusted_keys(mut self, path: &Path) -> Result<Self> {
        for (index, line) in read_entries(path, "trusted keys")?.iter().enumerate() {
            let key = TrustedKey::from_hex(line).with_context(|| {
                format!("Invalid trusted key #{} in {}", index + 1, path.display())
            })?;
            self.trusted_keys.push(key);
        }
        Ok(self)
    }

    /// Add trust anchors from a PEM bundle.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not PEM, or holds no certificate.
    pub fn load_trusted_certs(mut self, path: &Path) -> Result<Self> {
        let content = fs::read(path)
            .with_context(|| format!("Failed to read trusted certs file: {}", path.display()))?;
        let pems = pem::parse_many(&content)
            .with_context(|| format!("Failed to decode PEM bundle: {}", path.display()))?;
        let before = self.trusted_certs.len();
        for p in pems.iter().filter(|p| p.tag() == "CERTIFICATE") {
            x509_parser::parse_x509_certificate(p.contents()).map_err(|e| {
                anyhow::anyhow!("Invalid certificate in {}: {e}", path.display())
            })?;
            self.trusted_certs.push(p.contents().to_vec());
        }
        if self.trusted_certs.len() == before {
            bail!("No certificate found in PEM bundle: {}", path.display());
        }
        Ok(self)
    }

    #[must_use]
    pub fn library_denylist(&self) -> &NameList {
        &self.library_denylist
    }

    #[must_use]
    pub fn is_algorithm_approved(&self, name: &str) -> bool {
        self.approved_algorithms.contains(&normalize_algorithm(name))
    }

    #[must_use]
    pub fn license_denylist(&self) -> &NameList {
        &self.license_denylist
    }

    #[must_use]
    pub fn trusted_keys(&self) -> &[TrustedKey] {
        &self.trusted_keys
    }

    /// Trust anchors, DER-encoded.
    #[must_use]
    pub fn trusted_certs(&self) -> &[Vec<u8>] {
        &self.trusted_certs
    }

    #[must_use]
    pub fn certificate_required(&self) -> bool {
        self.require_certificate
    }

    #[must_use]
    pub fn pinned_dependencies_required(&self) -> bool {
        self.require_pinned_dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::{
        EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
    };
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_name_list_exact_and_prefix() {
        let list = NameList::from_entries(["libeay32.dll", "libssl.so.1.0*"]);
        assert!(list.contains("libeay32.dll"));
        assert!(!list.contains("libeay32.dll.bak"));
        assert_eq!(list.matching("libssl.so.1.0.2").as_deref(), Some("libssl.so.1.0*"));
        assert!(!list.contains("libssl.so.3"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_name_list_infix_pattern() {
        let list = NameList::from_entries(["libssl.0.9*.dylib"]);
        assert!(list.contains("libssl.0.9.8.dylib"));
        assert!(!list.contains("libssl.0.9.8.so"));
        assert!(!list.contains("libssl.0.9.dylib.old"));
    }

    #[test]
    fn test_name_list_ignoring_case() {
        let list = NameList::from_entries(["AGPL-3.0-only", "SSPL-*"]);
        assert!(!list.contains("agpl-3.0-only"));
        assert!(list.contains_ignore_ascii_case("agpl-3.0-only"));
        assert!(list.contains_ignore_ascii_case("Agpl-3.0-Only"));
        assert!(list.contains_ignore_ascii_case("sspl-1.0"));
        assert!(!list.contains_ignore_ascii_case("MIT"));
    }

    #[test]
    fn test_name_list_from_file_ignores_comments() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# legacy").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  libfoo.so.1  ").unwrap();
        file.flush().unwrap();

        let list = NameList::from_file(file.path()).unwrap();
        assert!(list.contains("libfoo.so.1"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_name_list_missing_file() {
        let result = NameList::from_file("/nonexistent/list.txt");
        assert!(result.err().unwrap().to_string().contains("Failed to read"));
    }

    #[test]
    fn test_default_policy() {
        let policy = Policy::default();
        assert!(policy.library_denylist().contains("libssl.so.1.0.0"));
        assert!(!policy.library_denylist().contains("libssl.so.3"));
        assert!(policy.is_algorithm_approved("aes-256-gcm"));
        assert!(policy.is_algorithm_approved("TLS1.3"));
        assert!(!policy.is_algorithm_approved("RC4"));
        assert!(policy.license_denylist().contains("AGPL-3.0-only"));
        assert!(policy.certificate_required());
        assert!(policy.pinned_dependencies_required());
    }

    #[test]
    fn test_normalize_algorithm() {
        assert_eq!(normalize_algorithm("ChaCha20-Poly1305"), "CHACHA20POLY1305");
        assert_eq!(normalize_algorithm("TLS 1.2"), "TLS12");
    }

    #[test]
    fn test_trusted_key_ed25519_verify() {
        let pair = Ed25519KeyPair::from_seed_unchecked(&[7u8; 32]).unwrap();
        let key = TrustedKey::from_hex(&hex::encode(pair.public_key().as_ref())).unwrap();
        assert_eq!(key.algorithm(), "Ed25519");
        let signature = pair.sign(b"message");
        assert!(key.verify(b"message", signature.as_ref()));
        assert!(!key.verify(b"tampered", signature.as_ref()));
    }

    #[test]
    fn test_trusted_key_p256_verify() {
        let rng = SystemRandom::new();
        let pkcs8 =
            EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();
        let key = TrustedKey::from_hex(&hex::encode(pair.public_key().as_ref())).unwrap();
        assert_eq!(key.algorithm(), "ECDSA-P256");
        let signature = pair.sign(&rng, b"message").unwrap();
        assert!(key.verify(b"message", signature.as_ref()));
    }

    #[test]
    fn test_trusted_key_rejects_bad_input() {
        assert!(TrustedKey::from_hex("zz").is_err());
        assert!(TrustedKey::from_hex(&"ab".repeat(16)).is_err());
    }

    #[test]
    fn test_load_trusted_keys_reports_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", "11".repeat(32)).unwrap();
        writeln!(file, "not-hex").unwrap();
        file.flush().unwrap();
        let err = Policy::default().load_trusted_keys(file.path()).unwrap_err();
        assert!(err.to_string().contains("#2"));
    }

    #[test]
    fn test_load_trusted_certs_rejects_empty_bundle() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "no pem here").unwrap();
        file.flush().unwrap();
        assert!(Policy::default().load_trusted_certs(file.path()).is_err());
    }
}
