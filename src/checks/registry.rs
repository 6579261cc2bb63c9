// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Ordered collection of checks with unique identifiers.
//!
//! A registry is built per run invocation; there is no process-wide instance.

use thiserror::Error;

use super::{
    BinaryMetadataCheck, BinaryStructureCheck, CertificateValidationCheck, ComplianceCheck,
    DependencyAnalysisCheck, EncryptionStandardCheck, FileSignatureCheck, HashIntegrityCheck,
    LicenseComplianceCheck, SecurityFlagsCheck, SignatureVerificationCheck,
    VersionInformationCheck,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate check id: {0}")]
    DuplicateCheckId(String),
}

/// Checks in registration order.
#[derive(Default)]
pub struct CheckRegistry {
    checks: Vec<Box<dyn ComplianceCheck>>,
}

impl CheckRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the eleven built-in checks.
    ///
    /// # Errors
    /// Returns `RegistryError::DuplicateCheckId` if two built-in checks share an id.
    pub fn with_default_checks() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(Box::new(FileSignatureCheck))?;
        registry.register(Box::new(BinaryMetadataCheck))?;
        registry.register(Box::new(DependencyAnalysisCheck))?;
        registry.register(Box::new(BinaryStructureCheck))?;
        registry.register(Box::new(CertificateValidationCheck))?;
        registry.register(Box::new(SignatureVerificationCheck))?;
        registry.register(Box::new(HashIntegrityCheck))?;
        registry.register(Box::new(EncryptionStandardCheck))?;
        registry.register(Box::new(SecurityFlagsCheck))?;
        registry.register(Box::new(VersionInformationCheck))?;
        registry.register(Box::new(LicenseComplianceCheck))?;
        Ok(registry)
    }

    /// Append a check.
    ///
    /// # Errors
    /// Returns `RegistryError::DuplicateCheckId` if a check with the same id is
    /// already registered; the registry is left unchanged.
    pub fn register(&mut self, check: Box<dyn ComplianceCheck>) -> Result<(), RegistryError> {
        if self.checks.iter().any(|c| c.id() == check.id()) {
            return Err(RegistryError::DuplicateCheckId(check.id().to_string()));
        }
        self.checks.push(check);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ComplianceCheck> {
        self.checks.iter().map(|c| &**c)
    }

    /// Identifiers in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.iter().map(|c| c.id()).collect()
    }

    pub(crate) fn checks(&self) -> &[Box<dyn ComplianceCheck>] {
        &self.checks
    }
}
