// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! CycloneDX 1.5 JSON.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use super::{Component, ComponentGraph, ComponentType, DecodedComponent, SbomError, SbomMetadata};

pub(super) const SPEC_VERSION: &str = "1.5";
const BOM_FORMAT: &str = "CycloneDX";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bom {
    bom_format: String,
    spec_version: String,
    version: u32,
    metadata: BomMetadata,
    #[serde(default)]
    components: Vec<BomComponent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<BomDependency>,
}

#[derive(Serialize, Deserialize)]
struct BomMetadata {
    timestamp: String,
    tools: Vec<BomTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    component: Option<BomComponent>,
}

#[derive(Serialize, Deserialize)]
struct BomTool {
    name: String,
    version: String,
}

#[derive(Serialize, Deserialize)]
struct BomComponent {
    #[serde(rename = "type")]
    component_type: ComponentType,
    #[serde(rename = "bom-ref")]
    bom_ref: String,
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    hashes: Vec<BomHash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    licenses: Vec<BomLicense>,
}

#[derive(Serialize, Deserialize)]
struct BomHash {
    alg: String,
    content: String,
}

#[derive(Serialize, Deserialize)]
struct BomLicense {
    expression: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BomDependency {
    #[serde(rename = "ref")]
    reference: String,
    depends_on: Vec<String>,
}

impl From<&Component> for BomComponent {
    fn from(component: &Component) -> Self {
        Self {
            component_type: component.component_type,
            bom_ref: component.name.clone(),
            name: component.name.clone(),
            version: component.version.clone(),
            hashes: component
                .digests
                .iter()
                .map(|(alg, content)| BomHash {
                    alg: alg.clone(),
                    content: content.clone(),
                })
                .collect(),
            licenses: component
                .licenses
                .iter()
                .map(|expression| BomLicense {
                    expression: expression.clone(),
                })
                .collect(),
        }
    }
}

impl From<BomComponent> for DecodedComponent {
    fn from(component: BomComponent) -> Self {
        Self {
            name: component.name,
            version: component.version,
            digests: component
                .hashes
                .into_iter()
                .map(|h| (h.alg, h.content))
                .collect(),
        }
    }
}

pub(super) fn encode(graph: &ComponentGraph, metadata: &SbomMetadata) -> Result<String, SbomError> {
    let mut components = graph.components().iter();
    let root = components.next().map(BomComponent::from);
    let bom = Bom {
        bom_format: BOM_FORMAT.to_string(),
        spec_version: SPEC_VERSION.to_string(),
        version: 1,
        metadata: BomMetadata {
            timestamp: metadata.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            tools: vec![BomTool {
                name: metadata.tool_name.clone(),
                version: metadata.tool_version.clone(),
            }],
            component: root,
        },
        components: components.map(BomComponent::from).collect(),
        dependencies: graph
            .components()
            .iter()
            .map(|c| BomDependency {
                reference: c.name.clone(),
                depends_on: c.dependencies.clone(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&bom)
        .map_err(|e| SbomError::Encoding(format!("CycloneDX serialization failed: {e}")))
}

pub(super) fn decode(content: &str) -> Result<Vec<DecodedComponent>, SbomError> {
    let bom: Bom = serde_json::from_str(content)
        .map_err(|e| SbomError::Decoding(format!("not a CycloneDX document: {e}")))?;
    if bom.bom_format != BOM_FORMAT {
        return Err(SbomError::Decoding(format!(
            "unexpected bomFormat {:?}",
            bom.bom_format
        )));
    }
    Ok(bom
        .metadata
        .component
        .into_iter()
        .chain(bom.components)
        .map(DecodedComponent::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    fn graph() -> ComponentGraph {
        let mut root = Component::library("app", "1.2.3").with_dependencies(["libc.so.6"]);
        root.component_type = ComponentType::Application;
        root.digests.insert("SHA-256".into(), "ab".repeat(32));
        root.licenses.push("MIT OR Apache-2.0".into());
        ComponentGraph::new(vec![root, Component::library("libc.so.6", "2.34")]).unwrap()
    }

    fn metadata() -> SbomMetadata {
        SbomMetadata::new(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap())
    }

    #[test]
    fn test_document_shape() {
        let json: Value = serde_json::from_str(&encode(&graph(), &metadata()).unwrap()).unwrap();
        assert_eq!(json["bomFormat"], "CycloneDX");
        assert_eq!(json["specVersion"], "1.5");
        assert_eq!(json["metadata"]["timestamp"], "2026-01-02T03:04:05Z");
        assert_eq!(json["metadata"]["component"]["type"], "application");
        assert_eq!(json["metadata"]["component"]["hashes"][0]["alg"], "SHA-256");
        assert_eq!(
            json["metadata"]["component"]["licenses"][0]["expression"],
            "MIT OR Apache-2.0"
        );
        assert_eq!(json["components"][0]["name"], "libc.so.6");
        assert!(json["components"][0].get("hashes").is_none());
        assert_eq!(json["dependencies"][0]["dependsOn"][0], "libc.so.6");
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(
            encode(&graph(), &metadata()).unwrap(),
            encode(&graph(), &metadata()).unwrap()
        );
    }

    #[test]
    fn test_decode_rejects_other_documents() {
        assert!(decode("{}").is_err());
        assert!(decode(r#"{"spdxVersion": "SPDX-2.3"}"#).is_err());
    }
}
