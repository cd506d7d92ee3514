//! Harness configuration
//!
//! Loaded from TOML, then overlaid by the `TF_ACC*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tfacc_provider::LifecycleConfig;
use tracing::debug;

use crate::error::{E2eError, E2eResult};

pub const ACCEPTANCE_ENV: &str = "TF_ACC";
pub const TERRAFORM_PATH_ENV: &str = "TF_ACC_TERRAFORM_PATH";
pub const TEMP_DIR_ENV: &str = "TF_ACC_TEMP_DIR";
pub const PERSIST_WORKING_DIR_ENV: &str = "TF_ACC_PERSIST_WORKING_DIR";
pub const PROVIDER_HOST_ENV: &str = "TF_ACC_PROVIDER_HOST";
pub const PROVIDER_NAMESPACE_ENV: &str = "TF_ACC_PROVIDER_NAMESPACE";
pub const DISABLE_REATTACH_ENV: &str = "TF_ACC_DISABLE_REATTACH";
pub const SKIP_POST_APPLY_REFRESH_ENV: &str = "TF_ACC_SKIP_POST_APPLY_REFRESH";

/// Acceptance harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Run acceptance cases; without it only unit-test cases run
    pub acceptance: bool,

    /// Terraform binary
    pub terraform_path: PathBuf,

    /// Parent of per-case working directories (system temp when unset)
    pub temp_dir: Option<PathBuf>,

    /// Keep working directories after the case finishes
    pub persist_working_dir: bool,

    /// Refresh between the two post-apply plans
    pub refresh_after_apply: bool,

    /// Source address prefix for providers under test
    pub provider: ProviderSource,

    /// In-process provider lifecycle
    pub lifecycle: LifecycleConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            acceptance: false,
            terraform_path: PathBuf::from("terraform"),
            temp_dir: None,
            persist_working_dir: false,
            refresh_after_apply: true,
            provider: ProviderSource::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSource {
    pub host: String,
    pub namespace: String,
}

impl Default for ProviderSource {
    fn default() -> Self {
        Self {
            host: "registry.terraform.io".to_string(),
            namespace: "hashicorp".to_string(),
        }
    }
}

impl ProviderSource {
    /// `<host>/<namespace>`, the part of a provider address before its name
    pub fn prefix(&self) -> String {
        format!("{}/{}", self.host, self.namespace)
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HarnessConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| E2eError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Defaults overlaid by the process environment
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Overlay the process environment onto this configuration
    pub fn with_env(self) -> Self {
        self.with_lookup(|name| std::env::var(name).ok())
    }

    /// Overlay variables from `lookup`; empty values count as unset
    pub fn with_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if get(ACCEPTANCE_ENV).is_some() {
            self.acceptance = true;
        }
        if let Some(path) = get(TERRAFORM_PATH_ENV) {
            self.terraform_path = PathBuf::from(path);
        }
        if let Some(dir) = get(TEMP_DIR_ENV) {
            self.temp_dir = Some(PathBuf::from(dir));
        }
        if get(PERSIST_WORKING_DIR_ENV).is_some() {
            self.persist_working_dir = true;
        }
        if let Some(host) = get(PROVIDER_HOST_ENV) {
            self.provider.host = host;
        }
        if let Some(namespace) = get(PROVIDER_NAMESPACE_ENV) {
            self.provider.namespace = namespace;
        }
        if get(DISABLE_REATTACH_ENV).is_some() {
            self.lifecycle.reattach = false;
        }
        if get(SKIP_POST_APPLY_REFRESH_ENV).is_some() {
            self.refresh_after_apply = false;
        }

        debug!("Harness configuration: {:?}", self);
        self
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.terraform_path.as_os_str().is_empty() {
            return Err(E2eError::InvalidConfig(
                "terraform_path must not be empty".to_string(),
            ));
        }
        if self.provider.host.is_empty() || self.provider.namespace.is_empty() {
            return Err(E2eError::InvalidConfig(
                "provider host and namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
