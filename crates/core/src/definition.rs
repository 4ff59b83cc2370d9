//! Custom resource definitions, in the shape the API server serves them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::{KeelError, Result};
use crate::handle::{GroupVersionResource, ResourceHandle};
use crate::object::{ObjectMeta, Resource};

pub const DEFINITION_GROUP: &str = "apiextensions.k8s.io";
pub const DEFINITION_VERSION: &str = "v1";
pub const DEFINITION_RESOURCE: &str = "customresourcedefinitions";
pub const DEFINITION_KIND: &str = "CustomResourceDefinition";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefinitionScope {
    #[default]
    Namespaced,
    Cluster,
}

impl fmt::Display for DefinitionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespaced => f.write_str("Namespaced"),
            Self::Cluster => f.write_str("Cluster"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionNames {
    pub plural: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singular: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionVersion {
    pub name: String,
    #[serde(default)]
    pub served: bool,
    #[serde(default)]
    pub storage: bool,
    /// schema, subresources, printer columns: passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

impl DefinitionVersion {
    pub fn served(name: impl Into<String>) -> Self {
        Self { name: name.into(), served: true, storage: false, extra: Map::new() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionSpec {
    pub group: String,
    /// Legacy single-version field. Checked before `versions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<DefinitionVersion>,
    #[serde(default)]
    pub scope: DefinitionScope,
    pub names: DefinitionNames,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

impl DefinitionSpec {
    /// Legacy version when set and non-empty.
    pub fn legacy_version(&self) -> Option<&str> {
        self.version.as_deref().filter(|v| !v.is_empty())
    }

    /// Legacy version if present, else the first declared one.
    pub fn default_version(&self) -> Option<&str> {
        self.legacy_version().or_else(|| self.versions.first().map(|v| v.name.as_str()))
    }

    pub fn is_served(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v.served && v.name == version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinition {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: DefinitionSpec,
}

impl CustomResourceDefinition {
    pub fn new(name: impl Into<String>, spec: DefinitionSpec) -> Self {
        Self {
            api_version: format!("{DEFINITION_GROUP}/{DEFINITION_VERSION}"),
            kind: DEFINITION_KIND.to_string(),
            metadata: ObjectMeta::named(name),
            spec,
        }
    }

    /// Cluster-scoped endpoint serving definitions.
    pub fn handle() -> ResourceHandle {
        ResourceHandle::cluster(GroupVersionResource::new(DEFINITION_GROUP, DEFINITION_VERSION, DEFINITION_RESOURCE))
    }

    pub fn name(&self) -> &str { &self.metadata.name }
    pub fn uid(&self) -> Option<&str> { self.metadata.uid.as_deref() }

    pub fn to_resource(&self) -> Result<Resource> {
        let v = serde_json::to_value(self)
            .map_err(|e| KeelError::NotValid(format!("encoding custom resource definition {:?}: {e}", self.name())))?;
        Resource::from_value(v)
    }

    pub fn from_resource(r: Resource) -> Result<Self> {
        let name = r.metadata.name.clone();
        let v = r.to_value()?;
        serde_json::from_value(v)
            .map_err(|e| KeelError::NotValid(format!("decoding custom resource definition {name:?}: {e}")))
    }
}
