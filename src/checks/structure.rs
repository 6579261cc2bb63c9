// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Checks on the container itself: signature, mandatory metadata, declared
//! dependencies and the section/segment layout.

use serde_json::json;
use std::path::Path;

use super::{join, CheckContext, CheckError, ComplianceCheck, Outcome};
use crate::binary::{BinaryKind, Format, Section, SectionKind};

/// Format implied by a well-known file extension.
fn format_for_extension(path: &Path) -> Option<Format> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "exe" | "dll" | "sys" => Some(Format::Pe),
        "so" => Some(Format::Elf),
        "dylib" | "bundle" => Some(Format::MachO),
        _ => None,
    }
}

pub struct FileSignatureCheck;

impl ComplianceCheck for FileSignatureCheck {
    fn id(&self) -> &'static str {
        "file-signature"
    }

    fn description(&self) -> &'static str {
        "File signature is recognised and matches the declared format"
    }

    fn requires_descriptor(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let binary = ctx.binary();
        let detected = binary.format();
        let expected = format_for_extension(binary.path());
        let metadata = json!({
            "detected": detected,
            "expected": expected,
        });

        if detected == Format::Unknown {
            let reason = match binary.descriptor() {
                Err(e) => e.to_string(),
                Ok(_) => "Unknown binary format".to_string(),
            };
            return Ok(Outcome::fail(format!("No supported file signature: {reason}"))
                .with_metadata(metadata));
        }
        if let Some(expected) = expected.filter(|f| *f != detected) {
            return Ok(Outcome::fail(format!(
                "File extension declares {expected} but the signature is {detected}"
            ))
            .with_metadata(metadata));
        }
        if let Err(e) = binary.descriptor() {
            return Ok(
                Outcome::fail(format!("{detected} signature found but header is corrupt: {e}"))
                    .with_metadata(metadata),
            );
        }
        Ok(Outcome::pass(format!("Valid {detected} signature and header")).with_metadata(metadata))
    }
}

pub struct BinaryMetadataCheck;

impl ComplianceCheck for BinaryMetadataCheck {
    fn id(&self) -> &'static str {
        "binary-metadata"
    }

    fn description(&self) -> &'static str {
        "Architecture, entry point and code section are present"
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let descriptor = ctx.descriptor()?;
        let mut missing = Vec::new();

        if !descriptor.architecture().is_known() {
            missing.push("architecture");
        }
        if descriptor.kind() == BinaryKind::Executable
            && matches!(descriptor.entry_point(), None | Some(0))
        {
            missing.push("entry point");
        }
        let has_code = descriptor
            .sections()
            .iter()
            .any(|s| s.kind == SectionKind::Section && s.flags.execute && s.file_size > 0);
        if !has_code {
            missing.push("executable code section");
        }

        let metadata = json!({
            "architecture": descriptor.architecture(),
            "bitness": descriptor.bitness(),
            "kind": descriptor.kind(),
            "entry_point": descriptor.entry_point(),
            "missing": missing,
        });
        if missing.is_empty() {
            Ok(Outcome::pass(format!(
                "{}-bit {:?} {:?} with entry point and code section",
                descriptor.bitness(),
                descriptor.architecture(),
                descriptor.kind()
            ))
            .with_metadata(metadata))
        } else {
            Ok(Outcome::fail(format!("Missing: {}", join(&missing))).with_metadata(metadata))
        }
    }
}

pub struct DependencyAnalysisCheck;

impl ComplianceCheck for DependencyAnalysisCheck {
    fn id(&self) -> &'static str {
        "dependency-analysis"
    }

    fn description(&self) -> &'static str {
        "Imported libraries are allowed and version pinned"
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let descriptor = ctx.descriptor()?;
        let policy = ctx.policy();
        let pins_apply =
            policy.pinned_dependencies_required() && descriptor.format() != Format::Pe;

        let mut denied = Vec::new();
        let mut unpinned = Vec::new();
        for import in descriptor.imports() {
            let basename = import.name.rsplit('/').next().unwrap_or(&import.name);
            if let Some(entry) = policy
                .library_denylist()
                .matching(&import.name)
                .or_else(|| policy.library_denylist().matching(basename))
            {
                denied.push(format!("{} (matches {entry})", import.name));
            }
            if pins_apply && import.version_hint.is_none() {
                unpinned.push(import.name.clone());
            }
        }

        let metadata = json!({
            "imports": descriptor.imports().len(),
            "denylisted": denied,
            "unpinned": unpinned,
            "pins_checked": pins_apply,
        });
        let mut problems = Vec::new();
        if !denied.is_empty() {
            problems.push(format!("denylisted: {}", join(&denied)));
        }
        if !unpinned.is_empty() {
            problems.push(format!("no version requirement: {}", join(&unpinned)));
        }
        if problems.is_empty() {
            Ok(Outcome::pass(format!(
                "{} imported libraries, none denylisted",
                descriptor.imports().len()
            ))
            .with_metadata(metadata))
        } else {
            Ok(Outcome::fail(problems.join("; ")).with_metadata(metadata))
        }
    }
}

/// Overlapping pairs reported per table; the scan stops once this many are found.
const MAX_REPORTED_OVERLAPS: usize = 32;

pub struct BinaryStructureCheck;

impl BinaryStructureCheck {
    /// Pairs of entries whose non-empty file ranges intersect.
    fn overlaps<'a>(entries: impl Iterator<Item = &'a Section>) -> Vec<String> {
        let mut sorted: Vec<&Section> = entries.filter(|s| s.file_size > 0).collect();
        sorted.sort_by_key(|s| (s.file_offset, s.file_size));
        let mut found = Vec::new();
        for (i, a) in sorted.iter().enumerate() {
            for b in &sorted[i + 1..] {
                if b.file_offset >= a.file_range().end {
                    break;
                }
                if found.len() == MAX_REPORTED_OVERLAPS {
                    return found;
                }
                found.push(format!("{} overlaps {}", a.name, b.name));
            }
        }
        found
    }
}

impl ComplianceCheck for BinaryStructureCheck {
    fn id(&self) -> &'static str {
        "binary-structure"
    }

    fn description(&self) -> &'static str {
        "Sections and segments lie within the file and do not overlap"
    }

    fn execute(&self, ctx: &CheckContext<'_>) -> Result<Outcome, CheckError> {
        let descriptor = ctx.descriptor()?;
        let file_size = descriptor.file_size();

        let out_of_bounds: Vec<String> = descriptor
            .sections()
            .iter()
            .filter(|s| s.file_size > 0)
            .filter(|s| {
                s.file_offset
                    .checked_add(s.file_size)
                    .map_or(true, |end| end > file_size)
            })
            .map(|s| {
                format!(
                    "{} [{:#x}+{:#x}] exceeds file size {file_size:#x}",
                    s.name, s.file_offset, s.file_size
                )
            })
            .collect();

        let mut overlapping = Self::overlaps(
            descriptor
                .sections()
                .iter()
                .filter(|s| s.kind == SectionKind::Section),
        );
        overlapping.extend(Self::overlaps(
            descriptor
                .sections()
                .iter()
                .filter(|s| s.kind == SectionKind::Segment && s.loadable),
        ));

        let metadata = json!({
            "entries": descriptor.sections().len(),
            "out_of_bounds": out_of_bounds,
            "overlapping": overlapping,
        });
        if out_of_bounds.is_empty() && overlapping.is_empty() {
            return Ok(Outcome::pass(format!(
                "{} sections and segments within bounds",
                descriptor.sections().len()
            ))
            .with_metadata(metadata));
        }
        let problems: Vec<&String> = out_of_bounds.iter().chain(&overlapping).collect();
        Ok(Outcome::fail(join(problems)).with_metadata(metadata))
    }
}
