//! Typed documents for objects handled by the engine.
//!
//! Dynamic JSON only enters or leaves through [`Resource::from_value`] and
//! [`Resource::to_value`]; everything else works with typed accessors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::{KeelError, Result};

pub type Labels = BTreeMap<String, String>;
pub type Annotations = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
    /// Server-populated fields we do not interpret (creationTimestamp, generation, ...).
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }
}

/// A custom resource instance: apiVersion, kind, metadata and an opaque body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Everything else (spec, status, data, ...).
    #[serde(flatten)]
    pub body: Map<String, Json>,
}

impl Resource {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ObjectMeta::named(name),
            body: Map::new(),
        }
    }

    pub fn from_value(v: Json) -> Result<Self> {
        serde_json::from_value(v).map_err(|e| KeelError::NotValid(format!("decoding resource document: {e}")))
    }

    pub fn to_value(&self) -> Result<Json> {
        serde_json::to_value(self).map_err(|e| KeelError::NotValid(format!("encoding resource document: {e}")))
    }

    pub fn with_body(mut self, key: impl Into<String>, value: Json) -> Self {
        self.body.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str { &self.metadata.name }
    pub fn uid(&self) -> Option<&str> { self.metadata.uid.as_deref() }
    pub fn api_version(&self) -> &str { &self.api_version }
    pub fn labels(&self) -> &Labels { &self.metadata.labels }
    pub fn annotations(&self) -> &Annotations { &self.metadata.annotations }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    pub fn set_resource_version(&mut self, rv: Option<String>) {
        self.metadata.resource_version = rv;
    }

    pub fn set_labels(&mut self, labels: Labels) {
        self.metadata.labels = labels;
    }

    pub fn set_annotations(&mut self, annotations: Annotations) {
        self.metadata.annotations = annotations;
    }

    /// Version addressed by this document: the last `/` segment of apiVersion.
    pub fn version(&self) -> &str {
        api_version_tail(&self.api_version)
    }
}

pub fn api_version_tail(api_version: &str) -> &str {
    api_version.rsplit('/').next().unwrap_or_default()
}
