//! Keel reconcile: turns desired CRD and custom resource specs into idempotent
//! create-or-update calls against a [`ResourceClient`], resolving the CRDs
//! each resource batch depends on and recording rollback actions on the way.
//!
//! A pass runs in three sequential phases on the caller's task:
//! ensure definitions, resolve dependencies (the only concurrent phase),
//! ensure resources. Cleanups for newly created objects land in the
//! caller's [`CleanupLedger`]; the engine never rolls back by itself.

#![forbid(unsafe_code)]

use std::sync::Arc;

use keel_core::{Clock, Resource, ResourceClient, ResourceHandle, Result, RetryPolicy, TokioClock};
use metrics::counter;
use tracing::{debug, Span};

pub mod definitions;
pub mod dependencies;
pub mod ledger;
pub mod resources;
pub mod version;

pub use dependencies::{ClusterDefinitionGetter, DefinitionGetter, DependencyResolver};
pub use ledger::{CleanupAction, CleanupLedger};
pub use version::resource_handle;

/// Reconciliation engine bound to one model namespace.
pub struct Reconciler {
    client: Arc<dyn ResourceClient>,
    namespace: String,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    span: Span,
}

impl Reconciler {
    /// `span` is the engine's logger: every operation is instrumented with it.
    pub fn new(client: Arc<dyn ResourceClient>, namespace: impl Into<String>, span: Span) -> Self {
        Self { client, namespace: namespace.into(), clock: Arc::new(TokioClock), retry: RetryPolicy::default(), span }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn namespace(&self) -> &str { &self.namespace }

    /// Getter that checks definitions against the live cluster.
    pub fn definition_getter(&self) -> Arc<dyn DefinitionGetter> {
        Arc::new(ClusterDefinitionGetter::new(self.client.clone(), self.namespace.clone()))
    }

    pub fn dependency_resolver(&self) -> DependencyResolver {
        DependencyResolver::new(self.clock.clone(), self.retry)
    }

    /// Create `obj`; if it already exists, re-read it and update in place with
    /// the live resourceVersion. Only a create registers a cleanup.
    pub(crate) async fn create_or_update(
        &self,
        handle: &ResourceHandle,
        mut obj: Resource,
        ledger: &mut CleanupLedger,
    ) -> Result<Resource> {
        debug!(%handle, name = %obj.name(), "creating");
        match self.client.create(handle, &obj).await {
            Ok(out) => {
                ledger.push(CleanupAction::delete(self.client.clone(), handle.clone(), &out));
                counter!("ensure_created_total", 1u64, "resource" => handle.gvr.resource.clone());
                return Ok(out);
            }
            Err(e) if e.is_already_exists() => {}
            Err(e) => {
                counter!("ensure_err_total", 1u64);
                return Err(e.context("creating"));
            }
        }
        // The API server rejects updates without metadata.resourceVersion.
        let live = match self.client.get(handle, obj.name()).await {
            Ok(live) => live,
            Err(e) => {
                counter!("ensure_err_total", 1u64);
                return Err(e.context("fetching live object before update"));
            }
        };
        obj.set_resource_version(live.resource_version().map(str::to_string));
        debug!(%handle, name = %obj.name(), rv = ?obj.resource_version(), "updating");
        let out = match self.client.update(handle, &obj).await {
            Ok(out) => out,
            Err(e) => {
                counter!("ensure_err_total", 1u64);
                return Err(e.context("updating"));
            }
        };
        counter!("ensure_updated_total", 1u64, "resource" => handle.gvr.resource.clone());
        Ok(out)
    }
}
