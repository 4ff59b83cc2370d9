use keel_core::{CustomResourceDefinition, DefinitionScope, GroupVersionResource, KeelError, ResourceHandle, Result};

/// Resolve the namespaced handle serving `version` of `crd`.
///
/// The definition must be namespace-scoped, and `version` must be either its
/// legacy single version or one of its served versions.
pub fn resource_handle(crd: &CustomResourceDefinition, version: &str, namespace: &str) -> Result<ResourceHandle> {
    if crd.spec.scope != DefinitionScope::Namespaced {
        return Err(KeelError::NotSupported(format!(
            "custom resource definition {:?} scope {:?} is not supported, please use {:?} scope",
            crd.name(),
            crd.spec.scope.to_string(),
            DefinitionScope::Namespaced.to_string(),
        )));
    }
    if version.is_empty() {
        return Err(KeelError::NotValid(format!("empty version for custom resource definition {:?}", crd.name())));
    }
    let supported = crd.spec.legacy_version() == Some(version) || crd.spec.is_served(version);
    if !supported {
        return Err(KeelError::NotValid(format!(
            "custom resource definition {} {} is not a supported and served version",
            crd.name(),
            version
        )));
    }
    Ok(ResourceHandle::namespaced(
        GroupVersionResource::new(crd.spec.group.clone(), version, crd.spec.names.plural.clone()),
        namespace,
    ))
}
