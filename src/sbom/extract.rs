// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Maps an opened binary and its imports onto a component graph.

use super::{Component, ComponentGraph, ComponentType, SbomError};
use crate::binary::{Binary, BinaryKind, Import};

const UNKNOWN_VERSION: &str = "unknown";
const DEPENDS_PREFIX: &str = "depends.";

/// Version number carried by an import's version hint: `GLIBC_2.34` gives
/// `2.34`, a plain `1.2.3` is kept as is.
#[must_use]
pub fn version_from_hint(hint: &str) -> String {
    hint.rsplit_once('_')
        .map_or(hint, |(_, version)| version)
        .to_string()
}

fn import_component(import: &Import) -> Component {
    let version = import
        .version_hint
        .as_deref()
        .map_or_else(|| UNKNOWN_VERSION.to_string(), version_from_hint);
    Component::library(import.name.clone(), version)
}

/// Build the component graph of `binary`.
///
/// The root is the binary itself, carrying the digests computed when it was
/// opened and the licenses found while parsing. Every import becomes a library
/// component the root depends on; `depends.<name>` metadata adds edges between
/// libraries.
///
/// # Errors
/// Returns `FormatUnavailable` if the binary has no descriptor, and the graph
/// validation errors of `ComponentGraph::new`.
pub fn extract(binary: &Binary) -> Result<ComponentGraph, SbomError> {
    let descriptor = binary
        .descriptor()
        .map_err(|e| SbomError::FormatUnavailable(e.to_string()))?;
    let metadata = descriptor.metadata();

    let name = metadata
        .get("name")
        .map(str::to_string)
        .or_else(|| {
            binary
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());
    let root = Component {
        component_type: match descriptor.kind() {
            BinaryKind::Executable => ComponentType::Application,
            _ => ComponentType::Library,
        },
        name,
        version: metadata
            .get("version")
            .unwrap_or(UNKNOWN_VERSION)
            .to_string(),
        digests: descriptor.digest().to_map(),
        licenses: descriptor.licenses().to_vec(),
        dependencies: Vec::new(),
    };

    let mut components = vec![root];
    for import in descriptor.imports() {
        match components.iter_mut().skip(1).find(|c| c.name == import.name) {
            Some(existing) if existing.version == UNKNOWN_VERSION => {
                existing.version = import_component(import).version;
            }
            Some(_) => {}
            None => {
                components[0].dependencies.push(import.name.clone());
                components.push(import_component(import));
            }
        }
    }

    for (source, targets) in metadata.with_prefix(DEPENDS_PREFIX) {
        let Some(component) = components.iter_mut().find(|c| c.name == source) else {
            return Err(SbomError::DanglingDependency {
                component: source.to_string(),
                dependency: targets.to_string(),
            });
        };
        for target in targets.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !component.dependencies.iter().any(|d| d == target) {
                component.dependencies.push(target.to_string());
            }
        }
    }

    ComponentGraph::new(components)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_hint() {
        assert_eq!(version_from_hint("GLIBC_2.34"), "2.34");
        assert_eq!(version_from_hint("GLIBC_PRIVATE"), "PRIVATE");
        assert_eq!(version_from_hint("1.2.3"), "1.2.3");
    }

    #[test]
    fn test_import_without_hint_is_unknown() {
        let component = import_component(&Import::unpinned("KERNEL32.dll".to_string()));
        assert_eq!(component.version, "unknown");
        assert_eq!(component.component_type, ComponentType::Library);
        assert!(component.digests.is_empty());
    }

    #[test]
    fn test_extract_requires_descriptor() {
        let binary = Binary::from_bytes("notes.txt", b"just some text".to_vec()).unwrap();
        assert!(matches!(extract(&binary), Err(SbomError::FormatUnavailable(_))));
    }
}
