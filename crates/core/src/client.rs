//! Resource transport consumed by the engine.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::handle::ResourceHandle;
use crate::object::Resource;

/// Delete-time directive for dependents of the deleted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationPolicy {
    Foreground,
    Background,
    Orphan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    pub propagation: Option<PropagationPolicy>,
    /// Fail the delete unless the live object still carries this uid.
    pub precondition_uid: Option<String>,
}

impl DeleteOptions {
    pub fn with_uid_precondition(uid: Option<&str>) -> Self {
        Self { propagation: None, precondition_uid: uid.map(str::to_string) }
    }

    pub fn foreground() -> Self {
        Self { propagation: Some(PropagationPolicy::Foreground), precondition_uid: None }
    }
}

/// Create/get/update/delete/list against a remote resource store.
///
/// Implementations report failures through the [`crate::KeelError`] taxonomy:
/// missing objects or resource types as `NotFound`, create collisions as
/// `AlreadyExists`, stale resourceVersions as `Conflict`.
#[async_trait::async_trait]
pub trait ResourceClient: Send + Sync {
    async fn create(&self, handle: &ResourceHandle, obj: &Resource) -> Result<Resource>;

    async fn get(&self, handle: &ResourceHandle, name: &str) -> Result<Resource>;

    async fn update(&self, handle: &ResourceHandle, obj: &Resource) -> Result<Resource>;

    async fn delete(&self, handle: &ResourceHandle, name: &str, opts: &DeleteOptions) -> Result<()>;

    /// Delete every object matching an equality-based label selector.
    async fn delete_collection(&self, handle: &ResourceHandle, selector: &str, opts: &DeleteOptions) -> Result<()>;

    async fn list(&self, handle: &ResourceHandle, selector: Option<&str>) -> Result<Vec<Resource>>;
}
