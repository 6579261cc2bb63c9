// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! SPDX 2.3 JSON.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Component, ComponentGraph, DecodedComponent, SbomError, SbomMetadata};

pub(super) const SPDX_VERSION: &str = "SPDX-2.3";
const DOCUMENT_ID: &str = "SPDXRef-DOCUMENT";
const NOASSERTION: &str = "NOASSERTION";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpdxDocument {
    spdx_version: String,
    #[serde(rename = "SPDXID")]
    spdx_id: String,
    name: String,
    data_license: String,
    document_namespace: String,
    creation_info: SpdxCreationInfo,
    #[serde(default)]
    packages: Vec<SpdxPackage>,
    #[serde(default)]
    relationships: Vec<SpdxRelationship>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpdxCreationInfo {
    created: String,
    creators: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpdxPackage {
    #[serde(rename = "SPDXID")]
    spdx_id: String,
    name: String,
    version_info: String,
    download_location: String,
    files_analyzed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    checksums: Vec<SpdxChecksum>,
    license_concluded: String,
    license_declared: String,
    primary_package_purpose: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpdxChecksum {
    algorithm: String,
    checksum_value: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpdxRelationship {
    spdx_element_id: String,
    relationship_type: String,
    related_spdx_element: String,
}

/// SPDX spells digest algorithms without the dash (`SHA256`).
fn spdx_algorithm(name: &str) -> String {
    name.replace('-', "")
}

fn canonical_algorithm(spdx: &str) -> String {
    match spdx.strip_prefix("SHA") {
        Some(bits) if !bits.starts_with('-') && !bits.is_empty() => format!("SHA-{bits}"),
        _ => spdx.to_string(),
    }
}

/// Element ids and namespaces only allow letters, digits, `.` and `-`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect()
}

/// Deterministic element id: position plus a sanitised name.
fn package_id(index: usize, name: &str) -> String {
    format!("SPDXRef-Package-{index}-{}", sanitize(name))
}

fn declared_license(licenses: &[String]) -> String {
    match licenses {
        [] => NOASSERTION.to_string(),
        [single] => single.clone(),
        many => many
            .iter()
            .map(|l| format!("({l})"))
            .collect::<Vec<_>>()
            .join(" AND "),
    }
}

fn package(index: usize, component: &Component) -> SpdxPackage {
    SpdxPackage {
        spdx_id: package_id(index, &component.name),
        name: component.name.clone(),
        version_info: component.version.clone(),
        download_location: NOASSERTION.to_string(),
        files_analyzed: false,
        checksums: component
            .digests
            .iter()
            .map(|(alg, value)| SpdxChecksum {
                algorithm: spdx_algorithm(alg),
                checksum_value: value.clone(),
            })
            .collect(),
        license_concluded: NOASSERTION.to_string(),
        license_declared: declared_license(&component.licenses),
        primary_package_purpose: component.component_type.as_str().to_ascii_uppercase(),
    }
}

pub(super) fn encode(graph: &ComponentGraph, metadata: &SbomMetadata) -> Result<String, SbomError> {
    let components = graph.components();
    let ids: BTreeMap<&str, String> = components
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.as_str(), package_id(i, &c.name)))
        .collect();
    let root = graph
        .root()
        .ok_or_else(|| SbomError::Encoding("SPDX document needs a root package".to_string()))?;

    let mut relationships = vec![SpdxRelationship {
        spdx_element_id: DOCUMENT_ID.to_string(),
        relationship_type: "DESCRIBES".to_string(),
        related_spdx_element: package_id(0, &root.name),
    }];
    for component in components {
        for dependency in &component.dependencies {
            let (Some(from), Some(to)) = (ids.get(component.name.as_str()), ids.get(dependency.as_str()))
            else {
                return Err(SbomError::Encoding(format!(
                    "no package for dependency {dependency:?}"
                )));
            };
            relationships.push(SpdxRelationship {
                spdx_element_id: from.clone(),
                relationship_type: "DEPENDS_ON".to_string(),
                related_spdx_element: to.clone(),
            });
        }
    }

    let fingerprint = root
        .digests
        .get("SHA-256")
        .map_or("unhashed", |d| &d[..d.len().min(16)]);
    let document = SpdxDocument {
        spdx_version: SPDX_VERSION.to_string(),
        spdx_id: DOCUMENT_ID.to_string(),
        name: format!("{}-{}", root.name, root.version),
        data_license: "CC0-1.0".to_string(),
        document_namespace: format!(
            "https://spdx.org/spdxdocs/{}-{}-{fingerprint}",
            sanitize(&root.name),
            sanitize(&root.version)
        ),
        creation_info: SpdxCreationInfo {
            created: metadata.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            creators: vec![format!("Tool: {}-{}", metadata.tool_name, metadata.tool_version)],
        },
        packages: components
            .iter()
            .enumerate()
            .map(|(i, c)| package(i, c))
            .collect(),
        relationships,
    };
    serde_json::to_string_pretty(&document)
        .map_err(|e| SbomError::Encoding(format!("SPDX serialization failed: {e}")))
}

pub(super) fn decode(content: &str) -> Result<Vec<DecodedComponent>, SbomError> {
    let document: SpdxDocument = serde_json::from_str(content)
        .map_err(|e| SbomError::Decoding(format!("not an SPDX document: {e}")))?;
    if document.spdx_version != SPDX_VERSION {
        return Err(SbomError::Decoding(format!(
            "unsupported spdxVersion {:?}",
            document.spdx_version
        )));
    }
    Ok(document
        .packages
        .into_iter()
        .map(|p| DecodedComponent {
            name: p.name,
            version: p.version_info,
            digests: p
                .checksums
                .into_iter()
                .map(|c| (canonical_algorithm(&c.algorithm), c.checksum_value))
                .collect(),
        })
        .collect())
}
