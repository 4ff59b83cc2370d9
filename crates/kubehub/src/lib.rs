//! Keel kubehub – `ResourceClient` over a live API server via kube-rs

#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::{Context, Result};
use keel_core::{
    DeleteOptions, GroupVersionResource, KeelError, PropagationPolicy, Resource, ResourceClient, ResourceHandle,
};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams, Preconditions},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject},
    Client, Config,
};
use metrics::counter;
use tracing::debug;

/// Build a client from an explicit kubeconfig, or the default chain
/// (in-cluster, `KUBECONFIG`, `~/.kube/config`).
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            let cfg = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?;
            Client::try_from(cfg).context("creating kube client")
        }
        None => Client::try_default().await.context("creating kube client"),
    }
}

/// Dynamic-object transport. Every handle maps onto an `ApiResource`; the
/// kind is left blank because requests are routed by plural name.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, handle: &ResourceHandle) -> Api<DynamicObject> {
        let ar = api_resource(&handle.gvr);
        match handle.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn api_resource(gvr: &GroupVersionResource) -> ApiResource {
    ApiResource {
        group: gvr.group.clone(),
        version: gvr.version.clone(),
        api_version: gvr.api_version(),
        kind: String::new(),
        plural: gvr.resource.clone(),
    }
}

fn to_dynamic(obj: &Resource) -> keel_core::Result<DynamicObject> {
    serde_json::from_value(obj.to_value()?)
        .map_err(|e| KeelError::NotValid(format!("converting {:?} to a dynamic object: {e}", obj.name())))
}

fn from_dynamic(obj: DynamicObject) -> keel_core::Result<Resource> {
    let v = serde_json::to_value(&obj).map_err(KeelError::transport)?;
    Resource::from_value(v)
}

fn delete_params(opts: &DeleteOptions) -> DeleteParams {
    DeleteParams {
        propagation_policy: opts.propagation.map(|p| match p {
            PropagationPolicy::Foreground => kube::api::PropagationPolicy::Foreground,
            PropagationPolicy::Background => kube::api::PropagationPolicy::Background,
            PropagationPolicy::Orphan => kube::api::PropagationPolicy::Orphan,
        }),
        preconditions: opts
            .precondition_uid
            .as_ref()
            .map(|uid| Preconditions { uid: Some(uid.clone()), resource_version: None }),
        ..Default::default()
    }
}

/// Translate API status codes into the engine's taxonomy.
fn map_err(e: kube::Error, what: &str) -> KeelError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => KeelError::not_found(what),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => KeelError::already_exists(what),
        kube::Error::Api(ae) if ae.code == 409 => KeelError::Conflict(format!("{what}: {}", ae.message)),
        kube::Error::Api(ae) if ae.code == 422 => KeelError::NotValid(format!("{what}: {}", ae.message)),
        other => KeelError::Transport(format!("{what}: {other}")),
    }
}

#[async_trait::async_trait]
impl ResourceClient for KubeResourceClient {
    async fn create(&self, handle: &ResourceHandle, obj: &Resource) -> keel_core::Result<Resource> {
        debug!(%handle, name = %obj.name(), "create");
        counter!("kube_requests_total", 1u64, "verb" => "create");
        let out = self
            .api(handle)
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_err(e, &format!("{} {:?}", handle.gvr.resource, obj.name())))?;
        from_dynamic(out)
    }

    async fn get(&self, handle: &ResourceHandle, name: &str) -> keel_core::Result<Resource> {
        counter!("kube_requests_total", 1u64, "verb" => "get");
        let out = self
            .api(handle)
            .get(name)
            .await
            .map_err(|e| map_err(e, &format!("{} {name:?}", handle.gvr.resource)))?;
        from_dynamic(out)
    }

    async fn update(&self, handle: &ResourceHandle, obj: &Resource) -> keel_core::Result<Resource> {
        debug!(%handle, name = %obj.name(), rv = ?obj.resource_version(), "update");
        counter!("kube_requests_total", 1u64, "verb" => "update");
        let out = self
            .api(handle)
            .replace(obj.name(), &PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_err(e, &format!("{} {:?}", handle.gvr.resource, obj.name())))?;
        from_dynamic(out)
    }

    async fn delete(&self, handle: &ResourceHandle, name: &str, opts: &DeleteOptions) -> keel_core::Result<()> {
        debug!(%handle, name, uid = ?opts.precondition_uid, "delete");
        counter!("kube_requests_total", 1u64, "verb" => "delete");
        self.api(handle)
            .delete(name, &delete_params(opts))
            .await
            .map_err(|e| map_err(e, &format!("{} {name:?}", handle.gvr.resource)))?;
        Ok(())
    }

    async fn delete_collection(&self, handle: &ResourceHandle, selector: &str, opts: &DeleteOptions) -> keel_core::Result<()> {
        debug!(%handle, selector, "delete collection");
        counter!("kube_requests_total", 1u64, "verb" => "deletecollection");
        self.api(handle)
            .delete_collection(&delete_params(opts), &ListParams::default().labels(selector))
            .await
            .map_err(|e| map_err(e, &handle.gvr.resource))?;
        Ok(())
    }

    async fn list(&self, handle: &ResourceHandle, selector: Option<&str>) -> keel_core::Result<Vec<Resource>> {
        counter!("kube_requests_total", 1u64, "verb" => "list");
        let lp = match selector {
            Some(s) => ListParams::default().labels(s),
            None => ListParams::default(),
        };
        let list = self
            .api(handle)
            .list(&lp)
            .await
            .map_err(|e| map_err(e, &handle.gvr.resource))?;
        list.items.into_iter().map(from_dynamic).collect()
    }
}
