// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::logging::LogFormat;
use compliance_linter::sbom::SbomFormat;
use compliance_linter::DEFAULT_JOBS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum SbomFormatArg {
    Cyclonedx,
    Spdx,
}

impl From<SbomFormatArg> for SbomFormat {
    fn from(arg: SbomFormatArg) -> Self {
        match arg {
            SbomFormatArg::Cyclonedx => Self::CycloneDx,
            SbomFormatArg::Spdx => Self::Spdx,
        }
    }
}

#[derive(Parser)]
#[command(name = "compliance_linter")]
#[command(version)]
#[command(about = "Audits ELF, PE and Mach-O binaries against compliance and hardening rules")]
pub(crate) struct Args {
    /// Path to the binary to audit.
    pub binary: PathBuf,

    /// Output format of the report on stdout.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also write the JSON report to this file.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(
        long,
        long_help = "Path to a text file of denylisted library names.\n\
                Each line contains a name, or a pattern with one '*' wildcard.\n\
                Empty lines and lines starting with # are ignored."
    )]
    pub library_denylist: Option<PathBuf>,

    #[arg(
        long,
        long_help = "Path to a text file of approved algorithm identifiers.\n\
                Each line contains one identifier, e.g. AES-256-GCM.\n\
                Empty lines and lines starting with # are ignored."
    )]
    pub approved_algorithms: Option<PathBuf>,

    #[arg(
        long,
        long_help = "Path to a text file of denylisted SPDX license identifiers.\n\
                Empty lines and lines starting with # are ignored."
    )]
    pub license_denylist: Option<PathBuf>,

    #[arg(
        long,
        long_help = "Path to a text file of hex-encoded public keys trusted for\n\
                detached signatures (32 bytes: Ed25519, 65 bytes: ECDSA P-256)."
    )]
    pub trusted_keys: Option<PathBuf>,

    /// PEM bundle of trust anchors for embedded certificate chains.
    #[arg(long)]
    pub trusted_certs: Option<PathBuf>,

    /// Do not fail certificate validation when no certificate is embedded.
    #[arg(long)]
    pub allow_missing_certificate: bool,

    /// Do not require a version requirement on imported libraries.
    #[arg(long)]
    pub allow_unpinned_dependencies: bool,

    /// Size of the worker pool running the checks.
    #[arg(long, default_value_t = DEFAULT_JOBS)]
    pub jobs: usize,

    /// Stop starting new checks after this many seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Generate an SBOM alongside the compliance report.
    #[arg(long)]
    pub sbom: bool,

    #[arg(long, value_enum, default_value_t = SbomFormatArg::Cyclonedx)]
    pub sbom_format: SbomFormatArg,

    #[arg(long, default_value = "sbom.json")]
    pub sbom_output: PathBuf,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Log at debug level.
    #[arg(short, long)]
    pub verbose: bool,
}
