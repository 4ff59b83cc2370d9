//! Concurrent, deadline-bounded lookup of the definitions custom resources need.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use keel_core::{Clock, CustomResourceDefinition, KeelError, ResourceClient, Result, ResultExt, RetryPolicy};
use metrics::{counter, histogram};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::version::resource_handle;
use crate::Reconciler;

/// Source of definitions for dependency resolution.
///
/// Implementations report a definition that is not usable yet as `NotFound`,
/// which makes the resolver retry it.
#[async_trait::async_trait]
pub trait DefinitionGetter: Send + Sync {
    async fn get(&self, name: &str) -> Result<CustomResourceDefinition>;
}

/// Reads definitions from the cluster and only reports one once its resource
/// type can be listed in the target namespace.
pub struct ClusterDefinitionGetter {
    client: Arc<dyn ResourceClient>,
    namespace: String,
}

impl ClusterDefinitionGetter {
    pub fn new(client: Arc<dyn ResourceClient>, namespace: impl Into<String>) -> Self {
        Self { client, namespace: namespace.into() }
    }
}

#[async_trait::async_trait]
impl DefinitionGetter for ClusterDefinitionGetter {
    async fn get(&self, name: &str) -> Result<CustomResourceDefinition> {
        let crd = match self.client.get(&CustomResourceDefinition::handle(), name).await {
            Ok(r) => CustomResourceDefinition::from_resource(r)?,
            Err(e) if e.is_not_found() => {
                return Err(KeelError::not_found(format!("custom resource definition {name:?}"))
                    .context(format!("getting custom resource definition {name:?}")))
            }
            Err(e) => return Err(e.context(format!("getting custom resource definition {name:?}"))),
        };
        let version = crd
            .spec
            .default_version()
            .ok_or_else(|| KeelError::NotValid(format!("custom resource definition {name:?} without version")))?;
        let handle = resource_handle(&crd, version, &self.namespace)
            .annotate(|| format!("getting custom resource definition client {name:?}"))?;
        match self.client.list(&handle, None).await {
            Ok(_) => Ok(crd),
            // Definition stored, but its resource type is not served yet.
            Err(e) if e.is_not_found() => {
                Err(KeelError::not_found(format!("custom resource definition {name:?} resource type")))
            }
            Err(e) => Err(e),
        }
    }
}

/// Fetches many definitions at once, each with its own retry loop, all under
/// one shared deadline.
#[derive(Clone)]
pub struct DependencyResolver {
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl DependencyResolver {
    pub fn new(clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self { clock, policy }
    }

    /// Resolve every distinct name through `getter`.
    ///
    /// All lookups are joined before returning, even after one has failed or
    /// the deadline has fired. Outcomes are inspected in name order and the
    /// first error is returned; every other outcome is dropped.
    pub async fn resolve<I>(
        &self,
        names: I,
        getter: Arc<dyn DefinitionGetter>,
    ) -> Result<BTreeMap<String, CustomResourceDefinition>>
    where
        I: IntoIterator<Item = String>,
    {
        let names: BTreeSet<String> = names.into_iter().collect();
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }
        let started = self.clock.now();
        let stop = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for name in names {
            let (getter, clock, stop, policy) = (getter.clone(), self.clock.clone(), stop.clone(), self.policy);
            tasks.spawn(
                async move {
                    let outcome = lookup(&name, getter.as_ref(), clock.as_ref(), &stop, &policy).await;
                    (name, outcome)
                }
                .in_current_span(),
            );
        }

        let mut deadline = self.clock.sleep(self.policy.timeout);
        let mut outcomes: BTreeMap<String, Result<CustomResourceDefinition>> = BTreeMap::new();
        let mut task_failure: Option<KeelError> = None;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((name, outcome))) => { outcomes.insert(name, outcome); }
                    Some(Err(e)) => {
                        task_failure.get_or_insert_with(|| KeelError::Transport(format!("definition lookup task failed: {e}")));
                    }
                    None => break,
                },
                () = &mut deadline, if !stop.is_cancelled() => {
                    warn!(timeout = ?self.policy.timeout, pending = tasks.len(), "definition lookups hit the deadline; cancelling");
                    stop.cancel();
                }
            }
        }
        histogram!("crd_resolve_latency_ms", (self.clock.now() - started).as_secs_f64() * 1000.0);

        if let Some(err) = task_failure {
            return Err(err.context("getting custom resources"));
        }
        let mut out = BTreeMap::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(crd) => {
                    debug!(name = %name, "custom resource definition is ready");
                    out.insert(name, crd);
                }
                Err(err) => return Err(err.context("getting custom resources")),
            }
        }
        Ok(out)
    }
}

async fn lookup(
    name: &str,
    getter: &dyn DefinitionGetter,
    clock: &dyn Clock,
    stop: &CancellationToken,
    policy: &RetryPolicy,
) -> Result<CustomResourceDefinition> {
    policy
        .call(
            clock,
            stop,
            move || getter.get(name),
            |e| !e.is_not_found(),
            |err, attempt| {
                counter!("crd_lookup_attempts_total", 1u64);
                debug!(name, attempt, error = %err, "fetching custom resource definition");
            },
        )
        .await
}

impl Reconciler {
    /// Resolve the definitions named in `names` with this engine's clock and
    /// retry policy.
    pub async fn resolve_definitions<I>(
        &self,
        names: I,
        getter: Arc<dyn DefinitionGetter>,
    ) -> Result<BTreeMap<String, CustomResourceDefinition>>
    where
        I: IntoIterator<Item = String>,
    {
        self.dependency_resolver().resolve(names, getter).instrument(self.span.clone()).await
    }
}
