// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Hardening, version and license checks.

use semver::Version;
use serde_json::json;

use super::spdx::SpdxExpression;
use super::{join, CheckContext, CheckError, ComplianceCheck, Outcome};
use crate::binary::{Format, VersionField};

pub struct SecurityFlagsCheck;

impl SecurityFlagsCheck {
    /// Names of the three required markers in the platform's own terms.
    fn labels(format: Format) -> [&'static str; 3] {
        match format {
            Format::Pe => ["ASLR (DYNAMIC_BASE)", "DEP (NX_COMPAT)", "stack cookie (/GS)"],
            Format::MachO => ["PIE (MH_PIE)", "non-executable stack", "stack protector"],
            Format::Elf | Format::Unknown => ["PIE", "non-executable stack (GNU_STACK)", "stack protector"],
        }
    }
}

impl ComplianceCheck for SecurityFlagsCheck {
    fn id(&self) -> &'static str {
        "security-flags"
    }

    fn description(&self) -> &'static str {
        "Platform hardening flags are enabled"
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let descriptor = ctx.descriptor()?;
        let hardening = descriptor.hardening();
        let [pie, nx, canary] = Self::labels(descriptor.format());

        let missing: Vec<&str> = [
            (hardening.pie, pie),
            (hardening.nx_stack, nx),
            (hardening.stack_protector, canary),
        ]
        .into_iter()
        .filter(|(present, _)| !present)
        .map(|(_, label)| label)
        .collect();

        let metadata = json!({
            "pie": hardening.pie,
            "nx_stack": hardening.nx_stack,
            "stack_protector": hardening.stack_protector,
            "relro": hardening.relro,
            "missing": missing,
        });
        if missing.is_empty() {
            Ok(Outcome::pass(format!("{pie}, {nx} and {canary} enabled")).with_metadata(metadata))
        } else {
            Ok(Outcome::fail(format!("Missing hardening: {}", join(&missing))).with_metadata(metadata))
        }
    }
}

pub struct VersionInformationCheck;

impl VersionInformationCheck {
    /// Whether a dotted header version agrees with the leading components of `version`.
    fn agrees(field: &VersionField, version: &Version) -> bool {
        let expected = [version.major, version.minor, version.patch];
        let parts: Result<Vec<u64>, _> = field.value.split('.').map(str::parse::<u64>).collect();
        match parts {
            Ok(parts) if !parts.is_empty() => parts
                .iter()
                .enumerate()
                .all(|(i, part)| expected.get(i).map_or(*part == 0, |e| e == part)),
            _ => false,
        }
    }
}

impl ComplianceCheck for VersionInformationCheck {
    fn id(&self) -> &'static str {
        "version-information"
    }

    fn description(&self) -> &'static str {
        "A semantic version is declared and consistent across fields"
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let descriptor = ctx.descriptor()?;
        let declared: Vec<&str> = descriptor.metadata().get_all("version").collect();
        let Some(first) = declared.first() else {
            return Ok(Outcome::fail("No version declared in embedded metadata")
                .with_metadata(json!({ "declared": [] })));
        };

        let version = match Version::parse(first) {
            Ok(version) => version,
            Err(e) => {
                return Ok(Outcome::fail(format!("Version {first:?} is not semantic: {e}"))
                    .with_metadata(json!({ "declared": declared })))
            }
        };

        let mut conflicts = Vec::new();
        for other in &declared[1..] {
            match Version::parse(other) {
                Ok(v) if v == version => {}
                Ok(_) => conflicts.push(format!("metadata version {other}")),
                Err(_) => conflicts.push(format!("metadata version {other:?} (not semantic)")),
            }
        }
        for field in descriptor.version_fields() {
            if !Self::agrees(field, &version) {
                conflicts.push(format!("{} {}", field.source, field.value));
            }
        }

        let metadata = json!({
            "version": version.to_string(),
            "declared": declared,
            "header_fields": descriptor.version_fields(),
            "conflicts": conflicts,
        });
        if conflicts.is_empty() {
            Ok(Outcome::pass(format!("Version {version}")).with_metadata(metadata))
        } else {
            Ok(Outcome::fail(format!(
                "Version {version} conflicts with {}",
                join(&conflicts)
            ))
            .with_metadata(metadata))
        }
    }
}

pub struct LicenseComplianceCheck;

impl ComplianceCheck for LicenseComplianceCheck {
    fn id(&self) -> &'static str {
        "license-compliance"
    }

    fn description(&self) -> &'static str {
        "Declared licenses are valid SPDX expressions and not denylisted"
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let descriptor = ctx.descriptor()?;
        let denylist = ctx.policy().license_denylist();
        let licenses = descriptor.licenses();
        if licenses.is_empty() {
            return Ok(Outcome::fail("No license declared")
                .with_metadata(json!({ "licenses": [] })));
        }

        let denied = |id: &str| denylist.contains_ignore_ascii_case(id);
        let mut invalid = Vec::new();
        let mut denylisted = Vec::new();
        for license in licenses {
            match SpdxExpression::parse(license) {
                Ok(expr) if expr.can_avoid(&denied) => {}
                Ok(expr) => denylisted.extend(
                    expr.licenses()
                        .into_iter()
                        .filter(|id| denied(id.trim_end_matches('+')))
                        .map(str::to_string),
                ),
                Err(e) => invalid.push(format!("{license:?}: {e}")),
            }
        }

        let metadata = json!({
            "licenses": licenses,
            "invalid": invalid,
            "denylisted": denylisted,
        });
        let mut problems = Vec::new();
        if !invalid.is_empty() {
            problems.push(format!("invalid SPDX expression {}", join(&invalid)));
        }
        if !denylisted.is_empty() {
            problems.push(format!("denylisted license {}", join(&denylisted)));
        }
        if problems.is_empty() {
            Ok(Outcome::pass(format!("Licenses: {}", join(licenses))).with_metadata(metadata))
        } else {
            Ok(Outcome::fail(problems.join("; ")).with_metadata(metadata))
        }
    }
}
