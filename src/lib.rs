// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! A compliance linter for compiled binaries.
//!
//! This crate provides functionality to:
//! - Detect and parse ELF, PE and Mach-O binaries into a common descriptor
//! - Run a registry of compliance checks concurrently against one binary
//! - Collect the results into a serializable compliance report
//! - Derive a software bill of materials in CycloneDX or SPDX form

pub mod binary;
pub mod checks;
pub mod policy;
pub mod report;
pub mod sbom;

// Re-export key types for convenience
pub use binary::{Binary, BinaryDescriptor, Format, InputError};
pub use checks::{
    Cancellation, CheckRegistry, CheckResult, CheckRunner, CheckStatus, ComplianceCheck,
    DEFAULT_JOBS,
};
pub use policy::Policy;
pub use report::ComplianceReport;
pub use sbom::{SbomDocument, SbomFormat};
