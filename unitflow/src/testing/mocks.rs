//! In-memory fakes of the provisioning collaborators.
//!
//! Every fake records the calls it receives and fails on demand through
//! its [`Faults`] switchboard.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::cancellation::CancelService;
use crate::container::{Container, NetworkInfo, Unit};
use crate::errors::{ProvisionError, Result};
use crate::progress::SharedProgress;
use crate::provision::{
    App, AppManifest, ContainerStore, CreateSpec, HealthcheckRouter, ImageMetadata, ImageService,
    Router, RouterHealthcheck, RuntimeDriver, UnitChecker,
};

/// Failure injection keyed by operation name.
#[derive(Debug, Default)]
pub struct Faults {
    always: Mutex<HashSet<String>>,
    keyed: Mutex<HashSet<(String, String)>>,
    nth: Mutex<HashMap<String, usize>>,
    counts: Mutex<HashMap<String, usize>>,
}

impl Faults {
    /// Fails every call to `op`.
    pub fn fail(&self, op: &str) {
        self.always.lock().insert(op.to_string());
    }

    /// Fails calls to `op` for `key` only.
    pub fn fail_on(&self, op: &str, key: &str) {
        self.keyed.lock().insert((op.to_string(), key.to_string()));
    }

    /// Fails the `n`-th call to `op`, counting from one.
    pub fn fail_nth(&self, op: &str, n: usize) {
        self.nth.lock().insert(op.to_string(), n);
    }

    /// Removes every injected failure.
    pub fn clear(&self) {
        self.always.lock().clear();
        self.keyed.lock().clear();
        self.nth.lock().clear();
    }

    /// Counts the call and reports whether it must fail.
    pub fn check(&self, op: &str, key: &str) -> std::result::Result<(), String> {
        let call = {
            let mut counts = self.counts.lock();
            let count = counts.entry(op.to_string()).or_default();
            *count += 1;
            *count
        };
        let fails = self.always.lock().contains(op)
            || self.keyed.lock().contains(&(op.to_string(), key.to_string()))
            || self.nth.lock().get(op) == Some(&call);
        if fails {
            Err(format!("{op} failed for {key}"))
        } else {
            Ok(())
        }
    }
}

/// Scripted output of a build container's log stream.
#[derive(Debug, Clone, Default)]
pub struct LogScript {
    lines: Vec<String>,
    duration: Duration,
    status: i64,
}

impl LogScript {
    /// Streams `lines` and exits with status zero.
    #[must_use]
    pub fn lines(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    /// Keeps the stream open for `duration` after the lines.
    #[must_use]
    pub fn lasting(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the exit status.
    #[must_use]
    pub fn exit_status(mut self, status: i64) -> Self {
        self.status = status;
        self
    }
}

/// A container runtime keeping containers in memory.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    /// Injected failures; keys are container ids, or names for `create`.
    pub faults: Faults,
    calls: Mutex<Vec<(String, String)>>,
    specs: Mutex<Vec<CreateSpec>>,
    live: Mutex<BTreeSet<String>>,
    ports: AtomicUsize,
    network: Mutex<Option<NetworkInfo>>,
    logs: Mutex<LogScript>,
}

impl FakeRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id the runtime assigns to the container named `name`.
    #[must_use]
    pub fn id_for(name: &str) -> String {
        let (app, suffix) = name.rsplit_once('-').unwrap_or(("", name));
        format!("{suffix}{app}")
    }

    /// Registers a container as existing.
    pub fn register(&self, id: &str) {
        self.live.lock().insert(id.to_string());
    }

    /// Allocates a fresh, valid network attachment.
    pub fn next_network(&self) -> NetworkInfo {
        let n = self.ports.fetch_add(1, Ordering::SeqCst) + 1;
        NetworkInfo {
            ip: format!("10.0.0.{n}"),
            host_port: (32768 + n).to_string(),
        }
    }

    /// Reports `info` for every container from now on.
    pub fn set_network(&self, info: NetworkInfo) {
        *self.network.lock() = Some(info);
    }

    /// Sets the log stream of every container.
    pub fn set_logs(&self, script: LogScript) {
        *self.logs.lock() = script;
    }

    /// Returns whether the container exists.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.live.lock().contains(id)
    }

    /// Returns the ids of every existing container.
    #[must_use]
    pub fn live(&self) -> Vec<String> {
        self.live.lock().iter().cloned().collect()
    }

    /// Returns every call as `(operation, argument)`.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    /// Returns the arguments of every call to `op`.
    #[must_use]
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == op)
            .map(|(_, arg)| arg.clone())
            .collect()
    }

    /// Returns the last creation spec.
    #[must_use]
    pub fn last_spec(&self) -> Option<CreateSpec> {
        self.specs.lock().last().cloned()
    }

    fn record(&self, op: &str, arg: impl Into<String>) {
        self.calls.lock().push((op.to_string(), arg.into()));
    }

    fn check(&self, op: &str, key: &str) -> Result<()> {
        self.faults.check(op, key).map_err(ProvisionError::Runtime)
    }
}

#[async_trait]
impl RuntimeDriver for FakeRuntime {
    async fn create(&self, spec: &CreateSpec) -> Result<String> {
        self.record("create", &spec.name);
        self.check("create", &spec.name)?;
        let id = Self::id_for(&spec.name);
        self.register(&id);
        self.specs.lock().push(spec.clone());
        Ok(id)
    }

    async fn start(&self, id: &str, deploy: bool) -> Result<()> {
        let mode = if deploy { "deploy" } else { "run" };
        self.record("start", format!("{id} {mode}"));
        self.check("start", id)
    }

    async fn stop(&self, id: &str, grace_period_secs: u64) -> Result<()> {
        self.record("stop", format!("{id} {grace_period_secs}"));
        self.check("stop", id)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.record("remove", id);
        self.check("remove", id)?;
        self.live.lock().remove(id);
        Ok(())
    }

    async fn network_info(&self, id: &str) -> Result<NetworkInfo> {
        self.record("network_info", id);
        self.check("network_info", id)?;
        let fixed = self.network.lock().clone();
        Ok(fixed.unwrap_or_else(|| self.next_network()))
    }

    async fn logs(&self, id: &str, sink: SharedProgress) -> Result<i64> {
        self.record("logs", id);
        self.check("logs", id)?;
        let script = self.logs.lock().clone();
        for line in &script.lines {
            sink.write(&format!("{line}\n"));
        }
        if !script.duration.is_zero() {
            tokio::time::sleep(script.duration).await;
        }
        Ok(script.status)
    }

    async fn commit(&self, id: &str, image: &str) -> Result<String> {
        self.record("commit", format!("{id} {image}"));
        self.check("commit", id)?;
        Ok(image.to_string())
    }

    async fn remove_image_ignore_last(&self, image: &str) -> Result<()> {
        self.record("remove_image", image);
        self.check("remove_image", image)
    }
}

/// A container store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Injected failures; keys are container names.
    pub faults: Faults,
    records: Mutex<BTreeMap<String, Container>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record directly.
    pub fn put(&self, container: Container) {
        self.records.lock().insert(container.name.clone(), container);
    }

    /// Returns the record stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Container> {
        self.records.lock().get(name).cloned()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true when no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ContainerStore for MemoryStore {
    async fn insert(&self, container: &Container) -> Result<()> {
        self.faults
            .check("insert", &container.name)
            .map_err(ProvisionError::Store)?;
        let mut records = self.records.lock();
        if records.contains_key(&container.name) {
            return Err(ProvisionError::store(format!(
                "duplicate container {}",
                container.name
            )));
        }
        records.insert(container.name.clone(), container.clone());
        Ok(())
    }

    async fn update(&self, name: &str, container: &Container) -> Result<()> {
        self.faults
            .check("update", name)
            .map_err(ProvisionError::Store)?;
        match self.records.lock().get_mut(name) {
            Some(record) => {
                *record = container.clone();
                Ok(())
            }
            None => Err(ProvisionError::store(format!("container {name} not found"))),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.faults
            .check("delete", name)
            .map_err(ProvisionError::Store)?;
        self.records.lock().remove(name);
        Ok(())
    }
}

/// A router keeping its routes in memory.
#[derive(Debug, Default)]
pub struct FakeRouter {
    /// Injected failures; keys are application names.
    pub faults: Faults,
    routes: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    supports_healthcheck: bool,
    healthchecks: Mutex<Vec<RouterHealthcheck>>,
}

impl FakeRouter {
    /// Creates a router without custom healthcheck support.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router supporting custom healthchecks.
    #[must_use]
    pub fn with_healthcheck() -> Self {
        Self {
            supports_healthcheck: true,
            ..Self::default()
        }
    }

    /// Registers routes directly.
    pub fn seed(&self, addresses: &[String]) {
        self.routes.lock().extend(addresses.iter().cloned());
    }

    /// Returns the registered routes, sorted.
    #[must_use]
    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().iter().cloned().collect()
    }

    /// Returns every call as `(operation, addresses)`.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().clone()
    }

    /// Returns the address batches of every call to `op`.
    #[must_use]
    pub fn calls_to(&self, op: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name == op)
            .map(|(_, batch)| batch.clone())
            .collect()
    }

    /// Returns every healthcheck set, in order.
    #[must_use]
    pub fn healthchecks(&self) -> Vec<RouterHealthcheck> {
        self.healthchecks.lock().clone()
    }
}

#[async_trait]
impl Router for FakeRouter {
    async fn add_routes(&self, app: &str, addresses: &[String]) -> Result<()> {
        self.calls.lock().push(("add".to_string(), addresses.to_vec()));
        self.faults.check("add", app).map_err(ProvisionError::Router)?;
        self.routes.lock().extend(addresses.iter().cloned());
        Ok(())
    }

    async fn remove_routes(&self, app: &str, addresses: &[String]) -> Result<()> {
        self.calls
            .lock()
            .push(("remove".to_string(), addresses.to_vec()));
        self.faults
            .check("remove", app)
            .map_err(ProvisionError::Router)?;
        let mut routes = self.routes.lock();
        for address in addresses {
            routes.remove(address);
        }
        Ok(())
    }

    fn healthcheck(&self) -> Option<&dyn HealthcheckRouter> {
        if self.supports_healthcheck {
            Some(self as &dyn HealthcheckRouter)
        } else {
            None
        }
    }
}

#[async_trait]
impl HealthcheckRouter for FakeRouter {
    async fn set_healthcheck(&self, app: &str, healthcheck: &RouterHealthcheck) -> Result<()> {
        self.faults
            .check("healthcheck", app)
            .map_err(ProvisionError::Router)?;
        self.healthchecks.lock().push(healthcheck.clone());
        Ok(())
    }
}

/// An image service keeping metadata and history in memory.
///
/// Images without explicit metadata declare a single `web` process.
#[derive(Debug)]
pub struct FakeImages {
    /// Injected failures; keys are image names, or app names for
    /// `current` and `list`.
    pub faults: Faults,
    web_process: Mutex<String>,
    custom_data: Mutex<HashMap<String, ImageMetadata>>,
    manifests: Mutex<HashMap<String, AppManifest>>,
    history: Mutex<Vec<String>>,
    cleaned: Mutex<Vec<String>>,
}

impl Default for FakeImages {
    fn default() -> Self {
        Self {
            faults: Faults::default(),
            web_process: Mutex::new("web".to_string()),
            custom_data: Mutex::new(HashMap::new()),
            manifests: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            cleaned: Mutex::new(Vec::new()),
        }
    }
}

impl FakeImages {
    /// Creates a service with no deployed image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the web process of every image.
    pub fn set_web_process(&self, name: &str) {
        *self.web_process.lock() = name.to_string();
    }

    /// Sets the processes declared by `image`.
    pub fn set_custom_data(&self, image: &str, data: ImageMetadata) {
        self.custom_data.lock().insert(image.to_string(), data);
    }

    /// Sets the manifest attached to `image`.
    pub fn set_manifest(&self, image: &str, manifest: AppManifest) {
        self.manifests.lock().insert(image.to_string(), manifest);
    }

    /// Makes `image` the currently deployed image.
    pub fn set_current(&self, image: &str) {
        let mut history = self.history.lock();
        if history.last().map(String::as_str) != Some(image) {
            history.push(image.to_string());
        }
    }

    /// Replaces the image history, oldest first.
    pub fn set_history(&self, images: &[&str]) {
        *self.history.lock() = images.iter().map(ToString::to_string).collect();
    }

    /// Returns the image history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    /// Returns the images cleaned so far.
    #[must_use]
    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().clone()
    }
}

#[async_trait]
impl ImageService for FakeImages {
    async fn web_process_name(&self, image: &str) -> Result<String> {
        self.faults
            .check("web_process", image)
            .map_err(ProvisionError::Image)?;
        if image.is_empty() {
            return Ok(String::new());
        }
        Ok(self.web_process.lock().clone())
    }

    async fn custom_data(&self, image: &str) -> Result<ImageMetadata> {
        self.faults
            .check("custom_data", image)
            .map_err(ProvisionError::Image)?;
        let data = self.custom_data.lock().get(image).cloned();
        Ok(data.unwrap_or_else(|| ImageMetadata {
            processes: BTreeMap::from([("web".to_string(), "python app.py".to_string())]),
        }))
    }

    async fn manifest(&self, image: &str) -> Result<AppManifest> {
        self.faults
            .check("manifest", image)
            .map_err(ProvisionError::Image)?;
        Ok(self
            .manifests
            .lock()
            .get(image)
            .cloned()
            .unwrap_or_default())
    }

    async fn current_image_name(&self, app: &str) -> Result<String> {
        self.faults
            .check("current", app)
            .map_err(ProvisionError::Image)?;
        self.history
            .lock()
            .last()
            .cloned()
            .ok_or(ProvisionError::NoImagesAvailable)
    }

    async fn append_image_name(&self, _app: &str, image: &str) -> Result<()> {
        self.faults
            .check("append", image)
            .map_err(ProvisionError::Image)?;
        self.history.lock().push(image.to_string());
        Ok(())
    }

    async fn list_app_images(&self, app: &str) -> Result<Vec<String>> {
        self.faults
            .check("list", app)
            .map_err(ProvisionError::Image)?;
        Ok(self.history())
    }

    async fn clean_image(&self, _app: &str, image: &str) -> Result<()> {
        self.faults
            .check("clean", image)
            .map_err(ProvisionError::Image)?;
        self.history.lock().retain(|i| i != image);
        self.cleaned.lock().push(image.to_string());
        Ok(())
    }
}

/// An application tracking which units are bound.
#[derive(Debug)]
pub struct FakeApp {
    /// Injected failures; keys are unit names.
    pub faults: Faults,
    name: String,
    platform: String,
    env: HashMap<String, String>,
    bound: Mutex<BTreeSet<String>>,
}

impl FakeApp {
    /// Creates a python application carrying an app token.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            faults: Faults::default(),
            name: name.into(),
            platform: "python".to_string(),
            env: HashMap::from([("TSURU_APP_TOKEN".to_string(), "app-token".to_string())]),
            bound: Mutex::new(BTreeSet::new()),
        }
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Marks a unit as bound.
    pub fn mark_bound(&self, unit: &str) {
        self.bound.lock().insert(unit.to_string());
    }

    /// Returns the names of bound units, sorted.
    #[must_use]
    pub fn bound(&self) -> Vec<String> {
        self.bound.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl App for FakeApp {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &str {
        &self.platform
    }

    fn env(&self, key: &str) -> Option<String> {
        self.env.get(key).cloned()
    }

    async fn bind_unit(&self, unit: &Unit) -> Result<()> {
        self.faults
            .check("bind", &unit.name)
            .map_err(|message| ProvisionError::bind(&unit.name, message))?;
        self.bound.lock().insert(unit.name.clone());
        Ok(())
    }

    async fn unbind_unit(&self, unit: &Unit) -> Result<()> {
        self.faults
            .check("unbind", &unit.name)
            .map_err(|message| ProvisionError::Other(anyhow::anyhow!(message)))?;
        self.bound.lock().remove(&unit.name);
        Ok(())
    }
}

/// A unit checker recording the units it checks.
#[derive(Debug, Default)]
pub struct FakeChecker {
    /// Injected failures; keys are unit names.
    pub faults: Faults,
    healthchecked: Mutex<Vec<String>>,
    hooks: Mutex<Vec<String>>,
}

impl FakeChecker {
    /// Creates a checker that passes every unit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the units health-checked so far.
    #[must_use]
    pub fn healthchecked(&self) -> Vec<String> {
        self.healthchecked.lock().clone()
    }

    /// Returns the units whose restart hooks ran.
    #[must_use]
    pub fn hooks_run(&self) -> Vec<String> {
        self.hooks.lock().clone()
    }
}

#[async_trait]
impl UnitChecker for FakeChecker {
    async fn healthcheck(&self, container: &Container, _sink: SharedProgress) -> Result<()> {
        self.healthchecked.lock().push(container.name.clone());
        self.faults
            .check("healthcheck", &container.name)
            .map_err(|message| ProvisionError::healthcheck(&container.name, message))
    }

    async fn run_restart_after_hooks(
        &self,
        container: &Container,
        _sink: SharedProgress,
    ) -> Result<()> {
        self.hooks.lock().push(container.name.clone());
        self.faults
            .check("hooks", &container.name)
            .map_err(|message| ProvisionError::hook(&container.name, message))
    }
}

/// A cancel service that reports a cancel once its deadline passes.
#[derive(Debug, Default)]
pub struct FakeCancelService {
    /// Injected failures; the key is empty.
    pub faults: Faults,
    deadline: Mutex<Option<tokio::time::Instant>>,
    acks: AtomicUsize,
}

impl FakeCancelService {
    /// Creates a service that never cancels.
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    /// Creates a service that cancels `delay` from now.
    #[must_use]
    pub fn after(delay: Duration) -> Self {
        Self {
            deadline: Mutex::new(Some(tokio::time::Instant::now() + delay)),
            ..Self::default()
        }
    }

    /// Returns the number of polls received.
    #[must_use]
    pub fn acks(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CancelService for FakeCancelService {
    async fn ack_cancel(&self) -> Result<bool> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        self.faults.check("ack", "").map_err(ProvisionError::Internal)?;
        let deadline = *self.deadline.lock();
        Ok(deadline.is_some_and(|d| tokio::time::Instant::now() >= d))
    }
}
