// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Software bill of materials: the component graph derived from a binary and
//! its CycloneDX and SPDX renderings.
//!
//! Encoders are pure functions of the graph and the supplied metadata; they
//! never read the clock, so identical inputs give byte-identical documents.

mod cyclonedx;
mod extract;
mod spdx;

pub use extract::{extract, version_from_hint};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::binary::Binary;

/// Errors fatal to SBOM generation. They never affect the compliance run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SbomError {
    #[error("Cyclic dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
    #[error("Component {component:?} depends on unknown component {dependency:?}")]
    DanglingDependency {
        component: String,
        dependency: String,
    },
    #[error("Duplicate component: {0}")]
    DuplicateComponent(String),
    #[error("No component graph for a binary without a descriptor: {0}")]
    FormatUnavailable(String),
    #[error("SBOM encoding failed: {0}")]
    Encoding(String),
    #[error("SBOM decoding failed: {0}")]
    Decoding(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Application,
    Library,
}

impl ComponentType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Library => "library",
        }
    }
}

/// One entry of the inventory. Dependencies are component names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    pub component_type: ComponentType,
    pub name: String,
    pub version: String,
    /// Algorithm name (`SHA-256`) to lowercase hex digest.
    pub digests: BTreeMap<String, String>,
    pub licenses: Vec<String>,
    pub dependencies: Vec<String>,
}

impl Component {
    #[must_use]
    pub fn library(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            component_type: ComponentType::Library,
            name: name.into(),
            version: version.into(),
            digests: BTreeMap::new(),
            licenses: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

/// A validated, acyclic component graph. The first component is the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentGraph {
    components: Vec<Component>,
}

impl ComponentGraph {
    /// Validate `components` (root first) into a graph.
    ///
    /// # Errors
    /// Returns `DuplicateComponent` for repeated names, `DanglingDependency`
    /// for edges to unknown names, and `CyclicDependency` for any cycle,
    /// including any edge back to the root.
    pub fn new(components: Vec<Component>) -> Result<Self, SbomError> {
        let mut index = HashMap::with_capacity(components.len());
        for (i, component) in components.iter().enumerate() {
            if index.insert(component.name.as_str(), i).is_some() {
                return Err(SbomError::DuplicateComponent(component.name.clone()));
            }
        }
        let mut edges = vec![Vec::new(); components.len()];
        for (i, component) in components.iter().enumerate() {
            for dependency in &component.dependencies {
                let Some(&target) = index.get(dependency.as_str()) else {
                    return Err(SbomError::DanglingDependency {
                        component: component.name.clone(),
                        dependency: dependency.clone(),
                    });
                };
                edges[i].push(target);
            }
        }
        if let Some(cycle) = find_cycle(&edges) {
            return Err(SbomError::CyclicDependency {
                path: cycle.into_iter().map(|i| components[i].name.clone()).collect(),
            });
        }
        Ok(Self { components })
    }

    #[must_use]
    pub fn root(&self) -> Option<&Component> {
        self.components.first()
    }

    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// First cycle found by depth-first search, as a node path that starts and
/// ends with the same node. Iterative over `(node, next edge index)` frames.
fn find_cycle(edges: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; edges.len()];
    let mut frames: Vec<(usize, usize)> = Vec::new();
    for start in 0..edges.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        marks[start] = Mark::InProgress;
        frames.push((start, 0));
        while let Some(frame) = frames.last_mut() {
            let (node, edge) = *frame;
            let Some(&next) = edges[node].get(edge) else {
                marks[node] = Mark::Done;
                frames.pop();
                continue;
            };
            frame.1 += 1;
            match marks[next] {
                Mark::InProgress => {
                    let from = frames.iter().position(|(n, _)| *n == next).unwrap_or(0);
                    let mut cycle: Vec<usize> = frames[from..].iter().map(|(n, _)| *n).collect();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    marks[next] = Mark::InProgress;
                    frames.push((next, 0));
                }
                Mark::Done => {}
            }
        }
    }
    None
}

/// Supported document schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SbomFormat {
    CycloneDx,
    Spdx,
}

impl SbomFormat {
    #[must_use]
    pub fn schema_version(self) -> &'static str {
        match self {
            Self::CycloneDx => cyclonedx::SPEC_VERSION,
            Self::Spdx => spdx::SPDX_VERSION,
        }
    }
}

impl fmt::Display for SbomFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycloneDx => write!(f, "cyclonedx"),
            Self::Spdx => write!(f, "spdx"),
        }
    }
}

impl FromStr for SbomFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cyclonedx" => Ok(Self::CycloneDx),
            "spdx" => Ok(Self::Spdx),
            other => Err(format!("unsupported SBOM format {other:?}")),
        }
    }
}

/// Generation metadata supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbomMetadata {
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub tool_version: String,
}

impl SbomMetadata {
    /// Metadata naming this crate as the generating tool.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            tool_name: env!("CARGO_PKG_NAME").to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A rendered SBOM document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbomDocument {
    pub format: SbomFormat,
    pub schema_version: &'static str,
    pub content: String,
    pub component_count: usize,
}

/// What survives a document round trip: identity and digests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DecodedComponent {
    pub name: String,
    pub version: String,
    pub digests: BTreeMap<String, String>,
}

impl From<&Component> for DecodedComponent {
    fn from(component: &Component) -> Self {
        Self {
            name: component.name.clone(),
            version: component.version.clone(),
            digests: component.digests.clone(),
        }
    }
}

/// Render a graph in the requested schema.
///
/// # Errors
/// Returns `SbomError::Encoding` if the graph cannot be represented.
pub fn encode(
    graph: &ComponentGraph,
    metadata: &SbomMetadata,
    format: SbomFormat,
) -> Result<SbomDocument, SbomError> {
    if let Some(c) = graph.components().iter().find(|c| c.name.trim().is_empty()) {
        return Err(SbomError::Encoding(format!(
            "component with empty name (version {:?})",
            c.version
        )));
    }
    let content = match format {
        SbomFormat::CycloneDx => cyclonedx::encode(graph, metadata)?,
        SbomFormat::Spdx => spdx::encode(graph, metadata)?,
    };
    debug!(%format, components = graph.len(), bytes = content.len(), "SBOM encoded");
    Ok(SbomDocument {
        format,
        schema_version: format.schema_version(),
        content,
        component_count: graph.len(),
    })
}

/// Parse a document back into its components.
///
/// # Errors
/// Returns `SbomError::Decoding` if the content is not a document of `format`.
pub fn decode(format: SbomFormat, content: &str) -> Result<Vec<DecodedComponent>, SbomError> {
    match format {
        SbomFormat::CycloneDx => cyclonedx::decode(content),
        SbomFormat::Spdx => spdx::decode(content),
    }
}

/// Extract the component graph of `binary` and render it.
///
/// # Errors
/// Returns an `SbomError` if extraction or encoding fails.
pub fn generate(
    binary: &Binary,
    format: SbomFormat,
    metadata: &SbomMetadata,
) -> Result<SbomDocument, SbomError> {
    let graph = extract(binary)?;
    encode(&graph, metadata, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(dependencies: &[&str]) -> Component {
        Component {
            component_type: ComponentType::Application,
            ..Component::library("app", "1.0.0")
        }
        .with_dependencies(dependencies.iter().copied())
    }

    #[test]
    fn test_valid_graph() {
        let graph = ComponentGraph::new(vec![
            app(&["a", "b"]),
            Component::library("a", "1").with_dependencies(["b"]),
            Component::library("b", "2"),
        ])
        .unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.root().unwrap().name, "app");
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = ComponentGraph::new(vec![
            app(&["a"]),
            Component::library("a", "1").with_dependencies(["b"]),
            Component::library("b", "1").with_dependencies(["a"]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            SbomError::CyclicDependency {
                path: vec!["a".into(), "b".into(), "a".into()]
            }
        );
        assert_eq!(err.to_string(), "Cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_edge_to_root_is_a_cycle() {
        let err = ComponentGraph::new(vec![
            app(&["a"]),
            Component::library("a", "1").with_dependencies(["app"]),
        ])
        .unwrap_err();
        assert!(matches!(err, SbomError::CyclicDependency { .. }));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = ComponentGraph::new(vec![Component::library("a", "1").with_dependencies(["a"])])
            .unwrap_err();
        assert_eq!(
            err,
            SbomError::CyclicDependency {
                path: vec!["a".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_long_chain_is_walked_without_recursion() {
        let depth = 200_000;
        let chain = |closing: Option<&str>| {
            let mut components = vec![app(&["lib0"])];
            for i in 0..depth {
                let next = if i + 1 < depth {
                    Some(format!("lib{}", i + 1))
                } else {
                    closing.map(str::to_string)
                };
                components
                    .push(Component::library(format!("lib{i}"), "1").with_dependencies(next));
            }
            components
        };

        let graph = ComponentGraph::new(chain(None)).expect("Should accept a long acyclic chain");
        assert_eq!(graph.len(), depth + 1);

        match ComponentGraph::new(chain(Some("lib0"))) {
            Err(SbomError::CyclicDependency { path }) => {
                assert_eq!(path.len(), depth + 1);
                assert_eq!(path.first(), path.last());
                assert_eq!(path[0], "lib0");
            }
            other => panic!("Expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_dangling_and_duplicate() {
        assert!(matches!(
            ComponentGraph::new(vec![app(&["missing"])]),
            Err(SbomError::DanglingDependency { .. })
        ));
        assert_eq!(
            ComponentGraph::new(vec![app(&[]), Component::library("app", "2")]),
            Err(SbomError::DuplicateComponent("app".into()))
        );
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CycloneDX".parse::<SbomFormat>(), Ok(SbomFormat::CycloneDx));
        assert_eq!("spdx".parse::<SbomFormat>(), Ok(SbomFormat::Spdx));
        assert!("swid".parse::<SbomFormat>().is_err());
        assert_eq!(SbomFormat::Spdx.schema_version(), "SPDX-2.3");
    }

    #[test]
    fn test_empty_name_fails_encoding() {
        let graph = ComponentGraph::new(vec![Component::library(" ", "1")]).unwrap();
        let metadata = SbomMetadata::new(DateTime::<Utc>::UNIX_EPOCH);
        assert!(matches!(
            encode(&graph, &metadata, SbomFormat::CycloneDx),
            Err(SbomError::Encoding(_))
        ));
    }
}
