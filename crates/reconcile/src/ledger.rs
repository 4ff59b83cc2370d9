//! Rollback actions accumulated while ensuring objects.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use keel_core::{DeleteOptions, Resource, ResourceClient, ResourceHandle, Result};
use tracing::{debug, warn};

pub type CleanupFuture = BoxFuture<'static, Result<()>>;

/// Deferred, best-effort delete of one object created during a pass.
pub struct CleanupAction {
    kind: String,
    name: String,
    uid: Option<String>,
    run: Box<dyn FnOnce() -> CleanupFuture + Send>,
}

impl CleanupAction {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        uid: Option<String>,
        run: impl FnOnce() -> CleanupFuture + Send + 'static,
    ) -> Self {
        Self { kind: kind.into(), name: name.into(), uid, run: Box::new(run) }
    }

    /// Delete `created` through `handle`, guarded by its uid so a recreated
    /// object of the same name survives. NotFound counts as done.
    pub fn delete(client: Arc<dyn ResourceClient>, handle: ResourceHandle, created: &Resource) -> Self {
        let name = created.name().to_string();
        let uid = created.uid().map(str::to_string);
        let (n, u) = (name.clone(), uid.clone());
        Self::new(handle.gvr.resource.clone(), name, uid, move || {
            let fut: CleanupFuture = Box::pin(async move {
                let opts = DeleteOptions::with_uid_precondition(u.as_deref());
                match client.delete(&handle, &n, &opts).await {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                }
            });
            fut
        })
    }

    pub fn kind(&self) -> &str { &self.kind }
    pub fn name(&self) -> &str { &self.name }
    pub fn uid(&self) -> Option<&str> { self.uid.as_deref() }

    pub async fn run(self) -> Result<()> {
        (self.run)().await
    }
}

impl fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupAction")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("uid", &self.uid)
            .finish_non_exhaustive()
    }
}

/// Append-only list of cleanups, owned by whoever drives the pass.
///
/// Nothing here runs on its own: on failure the caller decides whether to
/// [`rollback`](Self::rollback); on success it simply drops the ledger.
#[derive(Debug, Default)]
pub struct CleanupLedger {
    actions: Vec<CleanupAction>,
}

impl CleanupLedger {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, action: CleanupAction) {
        self.actions.push(action);
    }

    pub fn append(&mut self, other: &mut CleanupLedger) {
        self.actions.append(&mut other.actions);
    }

    pub fn len(&self) -> usize { self.actions.len() }
    pub fn is_empty(&self) -> bool { self.actions.is_empty() }

    /// `(kind, name)` of each registered action, in registration order.
    pub fn describe(&self) -> Vec<(String, String)> {
        self.actions.iter().map(|a| (a.kind.clone(), a.name.clone())).collect()
    }

    /// Run every action, newest first. Failures are logged and counted, not
    /// propagated, so one stuck delete does not block the rest.
    pub async fn rollback(self) -> usize {
        let mut failed = 0usize;
        for action in self.actions.into_iter().rev() {
            let (kind, name) = (action.kind.clone(), action.name.clone());
            match action.run().await {
                Ok(()) => debug!(%kind, %name, "rolled back"),
                Err(e) => {
                    failed += 1;
                    warn!(%kind, %name, error = %e, "rollback failed");
                }
            }
        }
        metrics::counter!("rollback_failures_total", failed as u64);
        failed
    }
}
