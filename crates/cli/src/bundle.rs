//! YAML bundle: the definitions and custom resources one application wants.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use keel_core::{Annotations, DefinitionSpec, Resource};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// Definition specs keyed by definition name (`<plural>.<group>`).
    #[serde(default)]
    pub custom_resource_definitions: BTreeMap<String, DefinitionSpec>,
    /// Custom resource documents keyed by the definition they instantiate.
    #[serde(default)]
    pub custom_resources: BTreeMap<String, Vec<Resource>>,
}

impl Bundle {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let bundle: Bundle = serde_yaml::from_str(text).context("parsing bundle")?;
        for (crd, docs) in &bundle.custom_resources {
            if let Some(doc) = docs.iter().find(|d| d.name().is_empty()) {
                return Err(anyhow!("custom resource of kind {:?} under {crd:?} has no metadata.name", doc.kind));
            }
        }
        Ok(bundle)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text)
    }

    pub fn resource_count(&self) -> usize {
        self.custom_resources.values().map(Vec::len).sum()
    }
}

/// Parse repeated `key=value` flags into an annotation map.
pub fn parse_annotations(pairs: &[String]) -> Result<Annotations> {
    pairs
        .iter()
        .map(|p| {
            p.split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow!("annotation {p:?} is not key=value"))
        })
        .collect()
}
