// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Compliance report and its console/validation front ends.

mod console;
mod totals;
mod validate;

pub use console::summarize_report;
pub use validate::validate_report;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::binary::{Binary, Format};
use crate::checks::{serialize_seconds, CheckResult};
use totals::ReportTotals;

/// Outcome of one compliance run. Results are in registration order.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    #[serde(serialize_with = "serialize_rfc3339")]
    timestamp: DateTime<Utc>,
    binary_path: String,
    binary_hash: String,
    binary_format: Format,
    #[serde(flatten)]
    totals: ReportTotals,
    results: Vec<CheckResult>,
    #[serde(serialize_with = "serialize_seconds")]
    duration: Duration,
    partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    sbom_path: Option<String>,
}

impl ComplianceReport {
    #[must_use]
    pub fn new(
        binary: &Binary,
        timestamp: DateTime<Utc>,
        results: Vec<CheckResult>,
        duration: Duration,
        partial: bool,
    ) -> Self {
        Self {
            timestamp,
            binary_path: binary
                .path()
                .canonicalize()
                .unwrap_or_else(|_| binary.path().to_path_buf())
                .to_string_lossy()
                .to_string(),
            binary_hash: binary.digest().sha256().to_string(),
            binary_format: binary.format(),
            totals: ReportTotals::calculate(&results),
            results,
            duration,
            partial,
            sbom_path: None,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn binary_path(&self) -> &str {
        &self.binary_path
    }

    /// Hex SHA-256 of the whole file.
    #[must_use]
    pub fn binary_hash(&self) -> &str {
        &self.binary_hash
    }

    #[must_use]
    pub fn binary_format(&self) -> Format {
        self.binary_format
    }

    #[must_use]
    pub fn total_checks(&self) -> usize {
        self.totals.total_checks
    }

    #[must_use]
    pub fn passed_checks(&self) -> usize {
        self.totals.passed_checks
    }

    #[must_use]
    pub fn failed_checks(&self) -> usize {
        self.totals.failed_checks
    }

    #[must_use]
    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// True when cancellation prevented some checks from running.
    #[must_use]
    pub fn partial(&self) -> bool {
        self.partial
    }

    #[must_use]
    pub fn sbom_path(&self) -> Option<&str> {
        self.sbom_path.as_deref()
    }

    pub fn set_sbom_path(&mut self, path: impl Into<String>) {
        self.sbom_path = Some(path.into());
    }

    /// Overall verdict: no failed check.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.totals.failed_checks == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed())
    }
}

fn serialize_rfc3339<S: Serializer>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Cut `text` to at most `width` characters, marking the cut with `...`.
pub(crate) fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}
