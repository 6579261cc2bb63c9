// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Validates reports and returns errors for failed checks or partial runs.

use super::ComplianceReport;
use anyhow::Result;

/// Validate the report.
///
/// # Errors
/// Returns an error naming every failing check if any check failed, or if the
/// run was cancelled before all checks completed.
pub fn validate_report(report: &ComplianceReport) -> Result<()> {
    if report.failed_checks() > 0 {
        for result in report.failures() {
            eprintln!("FAIL: {}: {}", result.check_id, result.details);
        }
        let failing: Vec<&str> = report.failures().map(|r| r.check_id.as_str()).collect();
        return Err(anyhow::anyhow!(
            "Compliance checks failed: {} of {} ({})",
            report.failed_checks(),
            report.total_checks(),
            failing.join(", ")
        ));
    }
    if report.partial() {
        return Err(anyhow::anyhow!(
            "Compliance run incomplete: only {} checks completed before cancellation",
            report.total_checks()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::Binary;
    use crate::checks::{CheckResult, CheckStatus};
    use chrono::Utc;
    use std::time::Duration;

    fn report(statuses: &[CheckStatus], partial: bool) -> ComplianceReport {
        let binary = Binary::from_bytes("app", vec![0u8; 16]).unwrap();
        let results = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| CheckResult {
                check_id: format!("check-{i}"),
                description: String::new(),
                status: *status,
                details: "reason".to_string(),
                metadata: None,
                duration: Duration::ZERO,
            })
            .collect();
        ComplianceReport::new(&binary, Utc::now(), results, Duration::ZERO, partial)
    }

    #[test]
    fn test_all_passed() {
        assert!(validate_report(&report(&[CheckStatus::Pass, CheckStatus::Pass], false)).is_ok());
    }

    #[test]
    fn test_failure_names_checks() {
        let err = validate_report(&report(&[CheckStatus::Pass, CheckStatus::Fail], false)).unwrap_err();
        assert!(err.to_string().contains("check-1"));
        assert!(err.to_string().contains("1 of 2"));
    }

    #[test]
    fn test_partial_run_is_an_error() {
        assert!(validate_report(&report(&[CheckStatus::Pass], true)).is_err());
    }
}
