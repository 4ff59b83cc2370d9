//! Ensure and tear down custom resource definitions.

use std::collections::BTreeMap;

use keel_core::labels::{definition_labels, to_selector};
use keel_core::{Annotations, CustomResourceDefinition, DeleteOptions, DefinitionSpec, KeelError, Result, ResultExt};
use tracing::{debug, info, Instrument};

use crate::{CleanupLedger, Reconciler};

impl Reconciler {
    /// Definition object for `spec`, labelled as owned by `app` in this model.
    pub fn build_definition(
        &self,
        app: &str,
        annotations: &Annotations,
        name: &str,
        spec: DefinitionSpec,
    ) -> CustomResourceDefinition {
        let mut crd = CustomResourceDefinition::new(name, spec);
        crd.metadata.labels = definition_labels(app, &self.namespace);
        crd.metadata.annotations = annotations.clone();
        crd
    }

    /// Ensure every definition in `specs`, stopping at the first failure.
    ///
    /// Cleanups for definitions created before the failure stay in `ledger`.
    pub async fn ensure_definitions(
        &self,
        app: &str,
        annotations: &Annotations,
        specs: &BTreeMap<String, DefinitionSpec>,
        ledger: &mut CleanupLedger,
    ) -> Result<()> {
        async {
            for (name, spec) in specs {
                let crd = self.build_definition(app, annotations, name, spec.clone());
                let out = self.ensure_definition(crd, ledger).await?;
                debug!(name = %out.name(), "ensured custom resource definition");
            }
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Create `crd`, or update the live definition of the same name.
    pub async fn ensure_definition(
        &self,
        crd: CustomResourceDefinition,
        ledger: &mut CleanupLedger,
    ) -> Result<CustomResourceDefinition> {
        let name = crd.name().to_string();
        async {
            let obj = crd.to_resource()?;
            let out = self.create_or_update(&CustomResourceDefinition::handle(), obj, ledger).await?;
            CustomResourceDefinition::from_resource(out)
        }
        .instrument(self.span.clone())
        .await
        .annotate(|| format!("ensuring custom resource definition {name:?}"))
    }

    /// Current definition by name. A missing one is `NotFound`.
    pub async fn get_definition(&self, name: &str) -> Result<CustomResourceDefinition> {
        match self.client.get(&CustomResourceDefinition::handle(), name).await {
            Ok(r) => CustomResourceDefinition::from_resource(r),
            Err(e) if e.is_not_found() => Err(KeelError::not_found(format!("custom resource definition {name:?}"))),
            Err(e) => Err(e),
        }
    }

    /// Delete one definition, only if it still carries `uid`.
    pub async fn delete_definition(&self, name: &str, uid: Option<&str>) -> Result<()> {
        let opts = DeleteOptions::with_uid_precondition(uid);
        match self.client.delete(&CustomResourceDefinition::handle(), name, &opts).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.annotate(|| format!("deleting custom resource definition {name:?}")),
        }
    }

    /// Delete every definition labelled as owned by `app` in this model.
    pub async fn delete_definitions(&self, app: &str) -> Result<()> {
        let selector = to_selector(&definition_labels(app, &self.namespace));
        async {
            info!(app, %selector, "deleting custom resource definitions");
            match self
                .client
                .delete_collection(&CustomResourceDefinition::handle(), &selector, &DeleteOptions::foreground())
                .await
            {
                Err(e) if e.is_not_found() => Ok(()),
                other => other.annotate(|| format!("deleting custom resource definitions for {app:?}")),
            }
        }
        .instrument(self.span.clone())
        .await
    }
}
