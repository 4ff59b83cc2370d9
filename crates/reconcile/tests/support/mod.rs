#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keel_core::labels::{parse_selector, selector_matches};
use keel_core::{
    Clock, CustomResourceDefinition, DefinitionNames, DefinitionScope, DefinitionSpec, DefinitionVersion, DeleteOptions,
    GroupVersionResource, KeelError, Resource, ResourceClient, ResourceHandle, Result,
};
use keel_reconcile::{DefinitionGetter, Reconciler};

pub const NS: &str = "model-ns";

type Key = (String, String, Option<String>, String);

fn key(handle: &ResourceHandle, name: &str) -> Key {
    (handle.gvr.group.clone(), handle.gvr.resource.clone(), handle.namespace.clone(), name.to_string())
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Resource>,
    next_rv: u64,
    held_types: BTreeSet<String>,
    failures: Vec<(String, String, KeelError)>,
    calls: Vec<(String, String)>,
}

/// API-server lookalike: rejects duplicate creates, stale updates and
/// mismatched delete preconditions; serves a custom resource type only once
/// its definition is stored (and not held back).
#[derive(Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl MemoryClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Keep `plural.group` unlisted even after its definition exists.
    pub fn hold_type(&self, plural_group: &str) {
        self.state.lock().unwrap().held_types.insert(plural_group.to_string());
    }

    pub fn establish_type(&self, plural_group: &str) {
        self.state.lock().unwrap().held_types.remove(plural_group);
    }

    /// Fail the next `verb` call on `name` with `err`.
    pub fn fail_next(&self, verb: &str, name: &str, err: KeelError) {
        self.state.lock().unwrap().failures.push((verb.to_string(), name.to_string(), err));
    }

    pub fn calls(&self, verb: &str) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|(v, _)| v == verb).count()
    }

    pub fn objects(&self, handle: &ResourceHandle) -> Vec<Resource> {
        let st = self.state.lock().unwrap();
        st.objects
            .iter()
            .filter(|((g, r, ns, _), _)| *g == handle.gvr.group && *r == handle.gvr.resource && *ns == handle.namespace)
            .map(|(_, o)| o.clone())
            .collect()
    }

    pub fn object(&self, handle: &ResourceHandle, name: &str) -> Option<Resource> {
        self.state.lock().unwrap().objects.get(&key(handle, name)).cloned()
    }

    /// Simulate someone else touching the object: bumps its resourceVersion.
    pub fn touch(&self, handle: &ResourceHandle, name: &str) {
        let mut st = self.state.lock().unwrap();
        st.next_rv += 1;
        let rv = st.next_rv.to_string();
        if let Some(o) = st.objects.get_mut(&key(handle, name)) {
            o.set_resource_version(Some(rv));
        }
    }

    /// Insert directly, bypassing create (pre-existing state).
    pub fn seed(&self, handle: &ResourceHandle, mut obj: Resource) -> Resource {
        let mut st = self.state.lock().unwrap();
        st.next_rv += 1;
        obj.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        obj.set_resource_version(Some(st.next_rv.to_string()));
        st.objects.insert(key(handle, obj.name()), obj.clone());
        obj
    }

    fn begin(&self, st: &mut State, verb: &str, handle: &ResourceHandle, name: &str) -> Result<()> {
        st.calls.push((verb.to_string(), name.to_string()));
        if let Some(i) = st.failures.iter().position(|(v, n, _)| v == verb && n == name) {
            let (_, _, err) = st.failures.remove(i);
            return Err(err);
        }
        if !served(st, handle) {
            return Err(KeelError::not_found(format!("the server could not find the requested resource ({})", handle.gvr)));
        }
        Ok(())
    }
}

fn served(st: &State, handle: &ResourceHandle) -> bool {
    let defs = CustomResourceDefinition::handle();
    if handle.gvr == defs.gvr {
        return true;
    }
    let plural_group = format!("{}.{}", handle.gvr.resource, handle.gvr.group);
    if st.held_types.contains(&plural_group) {
        return false;
    }
    st.objects
        .iter()
        .filter(|((g, r, _, _), _)| *g == defs.gvr.group && *r == defs.gvr.resource)
        .filter_map(|(_, o)| CustomResourceDefinition::from_resource(o.clone()).ok())
        .any(|crd| {
            crd.spec.group == handle.gvr.group
                && crd.spec.names.plural == handle.gvr.resource
                && (crd.spec.legacy_version() == Some(handle.gvr.version.as_str()) || crd.spec.is_served(&handle.gvr.version))
        })
}

#[async_trait::async_trait]
impl ResourceClient for MemoryClient {
    async fn create(&self, handle: &ResourceHandle, obj: &Resource) -> Result<Resource> {
        let mut st = self.state.lock().unwrap();
        self.begin(&mut st, "create", handle, obj.name())?;
        let k = key(handle, obj.name());
        if st.objects.contains_key(&k) {
            return Err(KeelError::already_exists(format!("{} {:?}", handle.gvr.resource, obj.name())));
        }
        st.next_rv += 1;
        let mut stored = obj.clone();
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.set_resource_version(Some(st.next_rv.to_string()));
        st.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn get(&self, handle: &ResourceHandle, name: &str) -> Result<Resource> {
        let mut st = self.state.lock().unwrap();
        self.begin(&mut st, "get", handle, name)?;
        st.objects
            .get(&key(handle, name))
            .cloned()
            .ok_or_else(|| KeelError::not_found(format!("{} {name:?}", handle.gvr.resource)))
    }

    async fn update(&self, handle: &ResourceHandle, obj: &Resource) -> Result<Resource> {
        let mut st = self.state.lock().unwrap();
        self.begin(&mut st, "update", handle, obj.name())?;
        let k = key(handle, obj.name());
        let live = st
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| KeelError::not_found(format!("{} {:?}", handle.gvr.resource, obj.name())))?;
        if obj.resource_version() != live.resource_version() {
            return Err(KeelError::Conflict(format!(
                "the object has been modified; rv {:?} != live {:?}",
                obj.resource_version(),
                live.resource_version()
            )));
        }
        st.next_rv += 1;
        let mut stored = obj.clone();
        stored.metadata.uid = live.metadata.uid.clone();
        stored.set_resource_version(Some(st.next_rv.to_string()));
        st.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, handle: &ResourceHandle, name: &str, opts: &DeleteOptions) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        self.begin(&mut st, "delete", handle, name)?;
        let k = key(handle, name);
        let live = st
            .objects
            .get(&k)
            .ok_or_else(|| KeelError::not_found(format!("{} {name:?}", handle.gvr.resource)))?;
        if let Some(uid) = &opts.precondition_uid {
            if live.uid() != Some(uid.as_str()) {
                return Err(KeelError::Conflict(format!("precondition failed: uid {uid} does not match {:?}", live.uid())));
            }
        }
        st.objects.remove(&k);
        Ok(())
    }

    async fn delete_collection(&self, handle: &ResourceHandle, selector: &str, _opts: &DeleteOptions) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        self.begin(&mut st, "deletecollection", handle, selector)?;
        let sel = parse_selector(selector)?;
        st.objects.retain(|(g, r, ns, _), o| {
            !(*g == handle.gvr.group && *r == handle.gvr.resource && *ns == handle.namespace && selector_matches(&sel, o.labels()))
        });
        Ok(())
    }

    async fn list(&self, handle: &ResourceHandle, selector: Option<&str>) -> Result<Vec<Resource>> {
        let mut st = self.state.lock().unwrap();
        self.begin(&mut st, "list", handle, selector.unwrap_or_default())?;
        let sel = parse_selector(selector.unwrap_or_default())?;
        Ok(st
            .objects
            .iter()
            .filter(|((g, r, ns, _), o)| {
                *g == handle.gvr.group && *r == handle.gvr.resource && *ns == handle.namespace && selector_matches(&sel, o.labels())
            })
            .map(|(_, o)| o.clone())
            .collect())
    }
}

/// One scripted outcome of a [`ScriptedGetter`] call.
#[derive(Debug, Clone)]
pub enum Step {
    Found,
    Missing,
    Fail(KeelError),
    Stall,
}

/// Getter replaying a per-name script; an exhausted script reports NotFound.
#[derive(Default)]
pub struct ScriptedGetter {
    scripts: Mutex<BTreeMap<String, VecDeque<Step>>>,
    calls: Mutex<BTreeMap<String, u32>>,
}

impl ScriptedGetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, name: &str, steps: Vec<Step>) -> Self {
        self.scripts.lock().unwrap().insert(name.to_string(), steps.into());
        self
    }

    pub fn calls(&self, name: &str) -> u32 {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl DefinitionGetter for ScriptedGetter {
    async fn get(&self, name: &str) -> Result<CustomResourceDefinition> {
        *self.calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
        let step = self.scripts.lock().unwrap().get_mut(name).and_then(VecDeque::pop_front).unwrap_or(Step::Missing);
        match step {
            Step::Found => Ok(widget_crd(name, &["v1"])),
            Step::Missing => Err(KeelError::not_found(format!("custom resource definition {name:?}"))),
            Step::Fail(err) => Err(err),
            Step::Stall => std::future::pending().await,
        }
    }
}

/// Tokio-backed clock that remembers every read and every requested sleep.
#[derive(Default)]
pub struct RecordingClock {
    reads: AtomicU32,
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> tokio::time::Instant {
        self.reads.fetch_add(1, Ordering::SeqCst);
        tokio::time::Instant::now()
    }

    async fn sleep(&self, d: Duration) {
        self.sleeps.lock().unwrap().push(d);
        tokio::time::sleep(d).await
    }
}

pub fn widget_spec(served: &[&str]) -> DefinitionSpec {
    DefinitionSpec {
        group: "example.com".into(),
        version: None,
        versions: served.iter().map(|v| DefinitionVersion::served(*v)).collect(),
        scope: DefinitionScope::Namespaced,
        names: DefinitionNames { plural: "widgets".into(), kind: "Widget".into(), ..Default::default() },
        ..Default::default()
    }
}

pub fn widget_crd(name: &str, served: &[&str]) -> CustomResourceDefinition {
    CustomResourceDefinition::new(name, widget_spec(served))
}

pub fn widget(name: &str, api_version: &str) -> Resource {
    Resource::new(api_version, "Widget", name).with_body("spec", serde_json::json!({ "size": 1 }))
}

pub fn widgets_handle(version: &str) -> ResourceHandle {
    ResourceHandle::namespaced(GroupVersionResource::new("example.com", version, "widgets"), NS)
}

pub fn engine(client: &Arc<MemoryClient>) -> Reconciler {
    let client: Arc<dyn ResourceClient> = client.clone();
    Reconciler::new(client, NS, tracing::info_span!("reconcile", namespace = NS))
}

pub fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
