// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Compliance checks: the `ComplianceCheck` capability, its registry and runner,
//! and the eleven built-in checks.

mod crypto;
mod registry;
mod runner;
mod security;
pub mod spdx;
mod structure;

pub use crypto::{
    CertificateValidationCheck, EncryptionStandardCheck, HashIntegrityCheck,
    SignatureVerificationCheck,
};
pub use registry::{CheckRegistry, RegistryError};
pub use runner::{Cancellation, CheckRunner, DEFAULT_JOBS};
pub use security::{LicenseComplianceCheck, SecurityFlagsCheck, VersionInformationCheck};
pub use structure::{
    BinaryMetadataCheck, BinaryStructureCheck, DependencyAnalysisCheck, FileSignatureCheck,
};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::binary::{Binary, BinaryDescriptor};
use crate::policy::Policy;

/// Details given to every check that needs a parsed binary but has none.
pub const FORMAT_UNAVAILABLE: &str = "unsupported or malformed binary format";

/// Errors a check may raise internally. The runner turns them into failing results.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Failed to read binary: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported or malformed binary format: {0}")]
    FormatUnavailable(String),
    #[error("Internal check error: {0}")]
    Internal(String),
}

/// Closed two-valued outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
}

/// What a check decided, before the runner adds identity and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    status: CheckStatus,
    details: String,
    metadata: Option<Map<String, Value>>,
}

impl Outcome {
    #[must_use]
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Pass,
            details: details.into(),
            metadata: None,
        }
    }

    #[must_use]
    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Fail,
            details: details.into(),
            metadata: None,
        }
    }

    /// Attach structured metadata. Non-object values are ignored.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        if let Value::Object(map) = metadata {
            self.metadata = Some(map);
        }
        self
    }

    #[must_use]
    pub fn status(&self) -> CheckStatus {
        self.status
    }

    #[must_use]
    pub fn details(&self) -> &str {
        &self.details
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_ref()
    }
}

/// Everything a check may look at. Checks never mutate it.
pub struct CheckContext<'a> {
    binary: &'a Binary,
    policy: &'a Policy,
    evaluated_at: DateTime<Utc>,
}

impl<'a> CheckContext<'a> {
    #[must_use]
    pub fn new(binary: &'a Binary, policy: &'a Policy, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            binary,
            policy,
            evaluated_at,
        }
    }

    #[must_use]
    pub fn binary(&self) -> &'a Binary {
        self.binary
    }

    #[must_use]
    pub fn policy(&self) -> &'a Policy {
        self.policy
    }

    /// Reference time for validity windows.
    #[must_use]
    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    /// The parsed descriptor.
    ///
    /// # Errors
    /// Returns `CheckError::FormatUnavailable` if the binary could not be parsed.
    pub fn descriptor(&self) -> Result<&'a BinaryDescriptor, CheckError> {
        self.binary
            .descriptor()
            .map_err(|e| CheckError::FormatUnavailable(e.to_string()))
    }
}

/// A named, pure rule evaluated against an opened binary.
pub trait ComplianceCheck: Send + Sync {
    /// Stable identifier, unique within a registry.
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Whether the check needs a parsed descriptor. Checks that answer `false`
    /// still run when the format is unknown or malformed.
    fn requires_descriptor(&self) -> bool {
        true
    }

    /// Evaluate the rule.
    ///
    /// # Errors
    /// Returns a `CheckError` if the check could not be evaluated at all.
    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError>;
}

/// One row of a compliance report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub check_id: String,
    pub description: String,
    pub status: CheckStatus,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(serialize_with = "serialize_seconds")]
    pub duration: Duration,
}

impl CheckResult {
    #[must_use]
    pub fn new(check: &dyn ComplianceCheck, outcome: Outcome, duration: Duration) -> Self {
        Self {
            check_id: check.id().to_string(),
            description: check.description().to_string(),
            status: outcome.status,
            details: outcome.details,
            metadata: outcome.metadata,
            duration,
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

/// Serialize a duration as fractional seconds.
pub(crate) fn serialize_seconds<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Join items for details text: `a, b, c`.
pub(crate) fn join<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_metadata_requires_object() {
        let outcome = Outcome::pass("ok").with_metadata(json!({"declared": false}));
        assert_eq!(outcome.metadata().unwrap()["declared"], json!(false));
        let ignored = Outcome::fail("bad").with_metadata(json!([1, 2]));
        assert!(ignored.metadata().is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&CheckStatus::Pass).unwrap(), "\"pass\"");
        assert_eq!(serde_json::to_string(&CheckStatus::Fail).unwrap(), "\"fail\"");
    }

    #[test]
    fn test_format_unavailable_message() {
        let err = CheckError::FormatUnavailable("Unknown binary format".to_string());
        assert_eq!(
            err.to_string(),
            "unsupported or malformed binary format: Unknown binary format"
        );
    }
}
