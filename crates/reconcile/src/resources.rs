//! Ensure and tear down custom resources.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_core::labels::{merge_annotations, resource_labels, to_selector};
use keel_core::{
    Annotations, CustomResourceDefinition, DefinitionScope, DeleteOptions, KeelError, Resource, Result, ResultExt,
};
use tracing::{debug, info, Instrument};

use crate::version::resource_handle;
use crate::{CleanupLedger, DefinitionGetter, Reconciler};

impl Reconciler {
    /// Resolve the definitions `specs` depends on, then ensure every resource.
    ///
    /// `specs` is keyed by definition name.
    pub async fn ensure_custom_resources(
        &self,
        app: &str,
        annotations: &Annotations,
        specs: &BTreeMap<String, Vec<Resource>>,
        getter: Arc<dyn DefinitionGetter>,
        ledger: &mut CleanupLedger,
    ) -> Result<()> {
        let resolved = self.resolve_definitions(specs.keys().cloned(), getter).await?;
        self.ensure_resources(app, annotations, specs, &resolved, ledger).await
    }

    /// Ensure each resource against its already resolved definition. The first
    /// failure ends the pass; earlier cleanups stay in `ledger`.
    pub async fn ensure_resources(
        &self,
        app: &str,
        annotations: &Annotations,
        specs: &BTreeMap<String, Vec<Resource>>,
        resolved: &BTreeMap<String, CustomResourceDefinition>,
        ledger: &mut CleanupLedger,
    ) -> Result<()> {
        for (crd_name, batch) in specs {
            let crd = resolved
                .get(crd_name)
                .ok_or_else(|| KeelError::not_found(format!("custom resource definition {crd_name:?}")))?;
            for cr in batch {
                let out = self.ensure_resource(crd, app, annotations, cr.clone(), ledger).await?;
                debug!(name = %out.name(), definition = %crd_name, "ensured custom resource");
            }
        }
        Ok(())
    }

    /// Stamp ownership labels and merged annotations on `cr`, then create or
    /// update it through the handle `crd` serves for the resource's version.
    pub async fn ensure_resource(
        &self,
        crd: &CustomResourceDefinition,
        app: &str,
        annotations: &Annotations,
        mut cr: Resource,
        ledger: &mut CleanupLedger,
    ) -> Result<Resource> {
        let name = cr.name().to_string();
        async {
            let handle = resource_handle(crd, cr.version(), &self.namespace)?;
            cr.set_labels(resource_labels(app));
            let merged = merge_annotations(cr.annotations(), annotations);
            cr.set_annotations(merged);
            self.create_or_update(&handle, cr, ledger).await
        }
        .instrument(self.span.clone())
        .await
        .annotate(|| format!("ensuring custom resource {name:?}"))
    }

    /// Delete every custom resource labelled as owned by `app`, across all
    /// namespaced definitions and each version they serve.
    pub async fn delete_resources(&self, app: &str) -> Result<()> {
        let selector = to_selector(&resource_labels(app));
        async {
            info!(app, %selector, "deleting custom resources");
            let crds = self
                .client
                .list(&CustomResourceDefinition::handle(), None)
                .await
                .annotate(|| "listing custom resource definitions")?;
            for r in crds {
                let crd = CustomResourceDefinition::from_resource(r)?;
                if crd.spec.scope != DefinitionScope::Namespaced {
                    debug!(name = %crd.name(), "skipping cluster scoped definition");
                    continue;
                }
                for version in deletable_versions(&crd) {
                    let handle = resource_handle(&crd, &version, &self.namespace)?;
                    match self.client.delete_collection(&handle, &selector, &DeleteOptions::foreground()).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => {
                            return Err(e.context(format!("deleting custom resources of {:?} {version}", crd.name())))
                        }
                    }
                }
            }
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }
}

/// Legacy version plus every served version, without duplicates.
fn deletable_versions(crd: &CustomResourceDefinition) -> Vec<String> {
    let mut out: Vec<String> = crd.spec.legacy_version().map(str::to_string).into_iter().collect();
    for v in crd.spec.versions.iter().filter(|v| v.served) {
        if !out.contains(&v.name) {
            out.push(v.name.clone());
        }
    }
    out
}
