//! Scripted in-memory Terraform for driving the step executor
//!
//! Configuration lines of the form
//! `resource "<type>" "<name>" { key = "value" ... }` declare resources.
//! Applying a configuration stores them in a per-directory state and in a
//! shared "remote" keyed by id, which `import` reads back.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use tfacc_common::{PlanDocument, StateDocument};
use tfacc_e2e::{E2eError, E2eResult, HarnessConfig, Terraform, WorkingDir};
use tfacc_provider::{EnvBindings, PluginListener, PluginServer, ProviderFactory, Transport};

pub const PROVIDER: &str = "registry.terraform.io/hashicorp/example";

#[derive(Debug, Clone, PartialEq)]
pub struct FakeResource {
    pub resource_type: String,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub tainted: bool,
}

impl FakeResource {
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }

    pub fn id(&self) -> String {
        self.attributes.get("id").cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub command: String,
    pub dir: PathBuf,
    pub reattach: Option<String>,
}

#[derive(Debug, Clone)]
struct SavedPlan {
    destroy: bool,
    desired: BTreeMap<String, FakeResource>,
    changes: Vec<(String, Vec<&'static str>)>,
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    states: HashMap<PathBuf, BTreeMap<String, FakeResource>>,
    plans: HashMap<PathBuf, SavedPlan>,
    remote: BTreeMap<String, FakeResource>,
    failures: HashMap<String, String>,
    drift: HashSet<String>,
    refresh_overrides: Vec<(String, String, String)>,
    import_overrides: Vec<(String, String)>,
}

#[derive(Default)]
pub struct FakeTerraform {
    inner: Mutex<Inner>,
}

impl FakeTerraform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every invocation of `command` fails with `stderr`
    pub fn fail(&self, command: &str, stderr: &str) {
        self.inner
            .lock()
            .failures
            .insert(command.to_string(), stderr.to_string());
    }

    /// `address` always plans an in-place update
    pub fn drift(&self, address: &str) {
        self.inner.lock().drift.insert(address.to_string());
    }

    /// Refresh rewrites `key` of `address` to `value`
    pub fn refresh_changes(&self, address: &str, key: &str, value: &str) {
        self.inner.lock().refresh_overrides.push((
            address.to_string(),
            key.to_string(),
            value.to_string(),
        ));
    }

    /// Imports read `key` back as `value`
    pub fn import_changes(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .import_overrides
            .push((key.to_string(), value.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    pub fn remote(&self) -> BTreeMap<String, FakeResource> {
        self.inner.lock().remote.clone()
    }

    fn record(&self, command: &str, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call {
            command: command.to_string(),
            dir: wd.path().to_path_buf(),
            reattach: env.get("TF_REATTACH_PROVIDERS").map(String::from),
        });

        let name = command.split(' ').next().unwrap_or_default();
        match inner.failures.get(name) {
            Some(stderr) => Err(E2eError::Command {
                command: name.to_string(),
                stderr: stderr.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn parse_config(config: &str) -> BTreeMap<String, FakeResource> {
    let resource = Regex::new(r#"^resource "(\w+)" "(\w+)" \{(.*)\}\s*$"#).unwrap();
    let attribute = Regex::new(r#"(\w+) = "([^"]*)""#).unwrap();

    config
        .lines()
        .filter_map(|line| resource.captures(line.trim()))
        .map(|caps| {
            let name = caps[2].to_string();
            let mut attributes: BTreeMap<String, String> = attribute
                .captures_iter(&caps[3])
                .map(|a| (a[1].to_string(), a[2].to_string()))
                .collect();
            attributes
                .entry("id".to_string())
                .or_insert_with(|| format!("{}-id", name));
            let resource = FakeResource {
                resource_type: caps[1].to_string(),
                name,
                attributes,
                tainted: false,
            };
            (resource.address(), resource)
        })
        .collect()
}

fn state_json(resources: &BTreeMap<String, FakeResource>) -> Value {
    if resources.is_empty() {
        return json!({"format_version": "1.0", "terraform_version": "1.7.0"});
    }

    let resources: Vec<Value> = resources
        .values()
        .map(|r| {
            let values: Map<String, Value> = r
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            json!({
                "address": r.address(),
                "mode": "managed",
                "type": r.resource_type,
                "name": r.name,
                "provider_name": PROVIDER,
                "schema_version": 0,
                "values": values,
                "tainted": r.tainted,
            })
        })
        .collect();

    json!({
        "format_version": "1.0",
        "terraform_version": "1.7.0",
        "values": {"root_module": {"resources": resources}}
    })
}

#[async_trait]
impl Terraform for FakeTerraform {
    async fn init(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()> {
        self.record("init", wd, env)
    }

    async fn refresh(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()> {
        self.record("refresh", wd, env)?;
        let mut inner = self.inner.lock();
        let overrides = inner.refresh_overrides.clone();
        let state = inner.states.entry(wd.path().to_path_buf()).or_default();
        for (address, key, value) in overrides {
            if let Some(resource) = state.get_mut(&address) {
                resource.attributes.insert(key, value);
            }
        }
        Ok(())
    }

    async fn plan(&self, wd: &WorkingDir, env: &EnvBindings, destroy: bool) -> E2eResult<()> {
        self.record(if destroy { "plan -destroy" } else { "plan" }, wd, env)?;
        let config = wd.config().await?;

        let mut inner = self.inner.lock();
        let current = inner
            .states
            .get(wd.path())
            .cloned()
            .unwrap_or_default();

        let plan = if destroy {
            SavedPlan {
                destroy,
                desired: BTreeMap::new(),
                changes: current.keys().map(|a| (a.clone(), vec!["delete"])).collect(),
            }
        } else {
            let desired = parse_config(&config);
            let mut changes = Vec::new();
            for (address, resource) in &desired {
                let actions = match current.get(address) {
                    None => vec!["create"],
                    Some(existing) if existing.tainted => vec!["delete", "create"],
                    Some(_) if inner.drift.contains(address) => vec!["update"],
                    Some(existing) if existing.attributes != resource.attributes => vec!["update"],
                    Some(_) => vec!["no-op"],
                };
                changes.push((address.clone(), actions));
            }
            for address in current.keys().filter(|a| !desired.contains_key(*a)) {
                changes.push((address.clone(), vec!["delete"]));
            }
            SavedPlan {
                destroy,
                desired,
                changes,
            }
        };

        inner.plans.insert(wd.path().to_path_buf(), plan);
        Ok(())
    }

    async fn apply(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()> {
        self.record("apply", wd, env)?;
        let config = wd.config().await?;

        let mut inner = self.inner.lock();
        let (destroy, desired) = match inner.plans.remove(wd.path()) {
            Some(plan) => (plan.destroy, plan.desired),
            None => (false, parse_config(&config)),
        };

        let previous = inner
            .states
            .insert(wd.path().to_path_buf(), desired.clone())
            .unwrap_or_default();
        for resource in previous.values() {
            inner.remote.remove(&resource.id());
        }
        if !destroy {
            for resource in desired.values() {
                inner.remote.insert(resource.id(), resource.clone());
            }
        }
        Ok(())
    }

    async fn destroy(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()> {
        self.record("destroy", wd, env)?;
        let mut inner = self.inner.lock();
        let state = inner.states.remove(wd.path()).unwrap_or_default();
        for resource in state.values() {
            inner.remote.remove(&resource.id());
        }
        Ok(())
    }

    async fn import(
        &self,
        wd: &WorkingDir,
        env: &EnvBindings,
        address: &str,
        id: &str,
    ) -> E2eResult<()> {
        self.record(&format!("import {} {}", address, id), wd, env)?;
        let mut inner = self.inner.lock();

        let Some(remote) = inner.remote.get(id).cloned() else {
            return Err(E2eError::Command {
                command: "import".to_string(),
                stderr: format!("Error: Cannot import non-existent remote object {:?}", id),
            });
        };

        let (resource_type, name) = address.split_once('.').unwrap_or((address, ""));
        let mut imported = FakeResource {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            ..remote
        };
        for (key, value) in inner.import_overrides.clone() {
            imported.attributes.insert(key, value);
        }

        inner
            .states
            .entry(wd.path().to_path_buf())
            .or_default()
            .insert(imported.address(), imported);
        Ok(())
    }

    async fn taint(&self, wd: &WorkingDir, env: &EnvBindings, address: &str) -> E2eResult<()> {
        self.record(&format!("taint {}", address), wd, env)?;
        let mut inner = self.inner.lock();
        if let Some(resource) = inner
            .states
            .get_mut(wd.path())
            .and_then(|s| s.get_mut(address))
        {
            resource.tainted = true;
        }
        Ok(())
    }

    async fn state(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<StateDocument> {
        self.record("show", wd, env)?;
        let inner = self.inner.lock();
        let resources = inner.states.get(wd.path()).cloned().unwrap_or_default();
        Ok(serde_json::from_value(state_json(&resources))?)
    }

    async fn saved_plan(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<PlanDocument> {
        self.record("show plan", wd, env)?;
        let inner = self.inner.lock();
        let plan = inner.plans.get(wd.path()).ok_or_else(|| E2eError::Command {
            command: "show".to_string(),
            stderr: "no saved plan".to_string(),
        })?;

        let changes: Vec<Value> = plan
            .changes
            .iter()
            .map(|(address, actions)| json!({"address": address, "change": {"actions": actions}}))
            .collect();
        Ok(serde_json::from_value(
            json!({"format_version": "1.2", "resource_changes": changes}),
        )?)
    }

    async fn saved_plan_text(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<String> {
        self.record("show plan text", wd, env)?;
        let inner = self.inner.lock();
        let mut text = String::new();
        for (address, actions) in inner.plans.get(wd.path()).map(|p| p.changes.clone()).unwrap_or_default() {
            let verb = match actions.as_slice() {
                ["no-op"] => continue,
                ["create"] => "created",
                ["update"] => "updated in-place",
                ["delete"] => "destroyed",
                _ => "replaced",
            };
            text.push_str(&format!("  # {} will be {}\n", address, verb));
        }
        Ok(text)
    }
}

/// Serves nothing until the lifecycle manager cancels it
pub struct IdleServer;

#[async_trait]
impl PluginServer for IdleServer {
    async fn serve(
        &self,
        _listener: PluginListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        shutdown.cancelled().await;
        Ok(())
    }
}

pub fn idle_factory() -> ProviderFactory {
    Arc::new(|| Ok(Arc::new(IdleServer) as Arc<dyn PluginServer>))
}

pub fn harness_config() -> HarnessConfig {
    let mut config = HarnessConfig {
        acceptance: true,
        ..Default::default()
    };
    config.lifecycle.transport = Transport::Tcp;
    config
}
