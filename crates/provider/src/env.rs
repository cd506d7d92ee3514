//! Environment bindings handed to external commands

use std::collections::BTreeMap;
use std::ffi::OsString;
use tracing::debug;

/// Variables to set (`Some`) or remove (`None`) in a command's environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvBindings {
    vars: BTreeMap<String, Option<String>>,
}

impl EnvBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), Some(value.into()));
    }

    /// Make sure the variable is absent even if this process has it set
    pub fn remove(&mut self, name: impl Into<String>) {
        self.vars.insert(name.into(), None);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(|v| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Apply to a child process about to be spawned
    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        for (name, value) in &self.vars {
            match value {
                Some(value) => {
                    cmd.env(name, value);
                }
                None => {
                    cmd.env_remove(name);
                }
            }
        }
    }
}

/// Exports bindings into this process's environment and restores the
/// previous values when dropped.
#[must_use = "bindings are restored as soon as the guard is dropped"]
pub struct ScopedEnv {
    previous: Vec<(String, Option<OsString>)>,
}

impl ScopedEnv {
    pub fn export(bindings: &EnvBindings) -> Self {
        let mut previous = Vec::new();
        for (name, value) in bindings.iter() {
            previous.push((name.to_string(), std::env::var_os(name)));
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }
        debug!("Exported {} binding(s) to process environment", previous.len());
        Self { previous }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (name, value) in self.previous.drain(..).rev() {
            match value {
                Some(value) => std::env::set_var(&name, value),
                None => std::env::remove_var(&name),
            }
        }
    }
}
