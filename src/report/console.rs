// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Formats and prints report summaries to the console.

use comfy_table::{Attribute, Cell, Color, Table};

use super::{truncate, ComplianceReport};
use crate::checks::{CheckResult, CheckStatus};

const DETAILS_WIDTH: usize = 60;

/// Summarize the report to the console.
///
/// Prints the header block, the results table and, when checks failed, one
/// detail block per failure.
pub fn summarize_report(report: &ComplianceReport) {
    println!("{}", header(report));
    println!("{}\n", results_table(report.results()));

    if report.failed_checks() > 0 {
        println!("Failed checks:");
        for result in report.failures() {
            println!("  {} - {}", result.check_id, result.details);
            if let Some(metadata) = &result.metadata {
                for (key, value) in metadata {
                    println!("      {key}: {value}");
                }
            }
        }
    }
}

fn header(report: &ComplianceReport) -> String {
    let mut lines = vec![
        format!("Binary: {}", report.binary_path()),
        format!("SHA-256: {}", report.binary_hash()),
        format!("Format: {}", report.binary_format()),
        format!("Timestamp: {}", report.timestamp().to_rfc3339()),
        format!("Duration: {:.3}s", report.duration().as_secs_f64()),
        format!(
            "Summary: {} checks, {} passed, {} failed{}",
            report.total_checks(),
            report.passed_checks(),
            report.failed_checks(),
            if report.partial() { " (partial run)" } else { "" }
        ),
    ];
    if let Some(path) = report.sbom_path() {
        lines.push(format!("SBOM: {path}"));
    }
    lines.join("\n") + "\n"
}

/// Create a table with the default preset styling.
fn default_table_preset() -> Table {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL_CONDENSED)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
    table
}

fn status_cell(status: CheckStatus) -> Cell {
    match status {
        CheckStatus::Pass => Cell::new("PASS").fg(Color::Green),
        CheckStatus::Fail => Cell::new("FAIL")
            .fg(Color::Red)
            .add_attribute(Attribute::Bold),
    }
}

/// Create a table with one row per check result.
fn results_table(results: &[CheckResult]) -> Table {
    let mut table = default_table_preset();
    table.set_header(vec![
        Cell::new("Check").add_attribute(Attribute::Bold),
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Description").add_attribute(Attribute::Bold),
        Cell::new("Details").add_attribute(Attribute::Bold),
    ]);
    for result in results {
        table.add_row(vec![
            Cell::new(&result.check_id),
            status_cell(result.status),
            Cell::new(&result.description),
            Cell::new(truncate(&result.details, DETAILS_WIDTH)),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_results_table_truncates_details() {
        let long = "x".repeat(200);
        let results = vec![CheckResult {
            check_id: "hash-integrity".to_string(),
            description: "Self-declared checksums match".to_string(),
            status: CheckStatus::Fail,
            details: long.clone(),
            metadata: None,
            duration: Duration::ZERO,
        }];
        let rendered = results_table(&results).to_string();
        assert!(rendered.contains("hash-integrity"));
        assert!(rendered.contains("FAIL"));
        assert!(!rendered.contains(&long));
    }
}
