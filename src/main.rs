// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.
mod args;
mod logging;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

use args::{Args, OutputFormat};
use compliance_linter::policy::NameList;
use compliance_linter::report::{summarize_report, validate_report};
use compliance_linter::sbom::{self, SbomFormat, SbomMetadata};
use compliance_linter::{Binary, Cancellation, CheckRegistry, CheckRunner, ComplianceReport, Policy};

const EXIT_FAILED: u8 = 1;
const EXIT_INVALID_INPUT: u8 = 2;

fn main() -> ExitCode {
    // clap exits with status 2 on usage errors.
    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILED),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_INVALID_INPUT)
        }
    }
}

/// Audit the binary and print the report. Returns whether every check passed.
///
/// # Errors
/// Returns an error for invalid input or configuration: an unreadable binary,
/// a malformed policy file, or a report that cannot be written.
fn run(args: &Args) -> Result<bool> {
    logging::init(&args.log_level, args.log_format, args.verbose)?;
    let policy = load_policy(args)?;
    let binary = Binary::open(&args.binary)
        .with_context(|| format!("Failed to open binary: {}", args.binary.display()))?;
    let registry = CheckRegistry::with_default_checks()?;

    let cancellation = args.timeout.map_or_else(Cancellation::new, |secs| {
        Cancellation::new().with_timeout(Duration::from_secs(secs))
    });
    let runner = CheckRunner::new(&registry, &policy)
        .with_jobs(args.jobs)
        .with_cancellation(cancellation);

    let (mut report, sbom_path) = if args.sbom {
        rayon::join(
            || runner.run(&binary),
            || write_sbom(&binary, args.sbom_format.into(), &args.sbom_output),
        )
    } else {
        (runner.run(&binary), None)
    };
    if let Some(path) = sbom_path {
        report.set_sbom_path(path.display().to_string());
    }

    match args.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report to JSON")?
        ),
        OutputFormat::Text => summarize_report(&report),
    }
    if let Some(dest) = &args.output {
        write_report_to_file(&report, dest)?;
    }
    Ok(validate_report(&report).is_ok())
}

/// Build the policy from the defaults and the list files given on the command line.
///
/// # Errors
/// Returns an error if a list file cannot be read or holds an invalid entry.
fn load_policy(args: &Args) -> Result<Policy> {
    let mut policy = Policy::default()
        .require_certificate(!args.allow_missing_certificate)
        .require_pinned_dependencies(!args.allow_unpinned_dependencies);
    if let Some(path) = &args.library_denylist {
        policy = policy.with_library_denylist(
            NameList::from_file(path).context("Failed to read library denylist")?,
        );
    }
    if let Some(path) = &args.license_denylist {
        policy = policy.with_license_denylist(
            NameList::from_file(path).context("Failed to read license denylist")?,
        );
    }
    if let Some(path) = &args.approved_algorithms {
        policy = policy.load_approved_algorithms(path)?;
    }
    if let Some(path) = &args.trusted_keys {
        policy = policy.load_trusted_keys(path)?;
    }
    if let Some(path) = &args.trusted_certs {
        policy = policy.load_trusted_certs(path)?;
    }
    Ok(policy)
}

/// Generate and write the SBOM. Failures are logged and never affect the
/// compliance run.
fn write_sbom(binary: &Binary, format: SbomFormat, dest: &Path) -> Option<PathBuf> {
    let document = match sbom::generate(binary, format, &SbomMetadata::new(Utc::now())) {
        Ok(document) => document,
        Err(e) => {
            warn!(error = %e, "SBOM generation failed");
            return None;
        }
    };
    if let Err(e) = fs::write(dest, &document.content) {
        warn!(error = %e, path = %dest.display(), "Failed to write SBOM");
        return None;
    }
    info!(
        path = %dest.display(),
        %format,
        components = document.component_count,
        "SBOM written"
    );
    Some(dest.to_path_buf())
}

/// Write the report to a file.
///
/// # Errors
/// Returns an error if the report cannot be serialized to JSON or if the file cannot be created.
fn write_report_to_file(report: &ComplianceReport, dest: &Path) -> Result<()> {
    info!(file = %dest.display(), "Writing report to file");
    let file = File::create(dest)
        .with_context(|| format!("Failed to create JSON output file: {}", dest.display()))?;
    serde_json::to_writer_pretty(file, report)
        .with_context(|| format!("Failed to serialize report to JSON: {}", dest.display()))?;
    Ok(())
}
