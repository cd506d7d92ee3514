//! Terraform driver
//!
//! The step executor talks to Terraform through the [`Terraform`] trait.
//! [`TerraformCli`] spawns the real binary; tests substitute a scripted fake.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tfacc_common::{PlanDocument, StateDocument};
use tfacc_provider::EnvBindings;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

/// Name of the configuration file written into every working directory
pub const CONFIG_FILE: &str = "terraform_plugin_test.tf";

/// Name of the saved plan file
pub const PLAN_FILE: &str = "tfplan";

/// A Terraform working directory
///
/// Cheap to clone; the directory is removed when the last clone drops,
/// unless it was created persistent.
#[derive(Debug, Clone)]
pub struct WorkingDir {
    inner: Arc<WorkingDirInner>,
}

#[derive(Debug)]
struct WorkingDirInner {
    path: PathBuf,
    _dir: Option<TempDir>,
}

impl WorkingDir {
    /// Create a fresh directory under `root` (system temp when `None`)
    pub fn create(root: Option<&Path>, persist: bool) -> E2eResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("plugintest");

        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();

        let dir = if persist {
            info!("Persisting working directory {}", path.display());
            let _ = dir.keep();
            None
        } else {
            Some(dir)
        };

        Ok(Self {
            inner: Arc::new(WorkingDirInner { path, _dir: dir }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn config_path(&self) -> PathBuf {
        self.inner.path.join(CONFIG_FILE)
    }

    pub fn plan_path(&self) -> PathBuf {
        self.inner.path.join(PLAN_FILE)
    }

    /// Replace the configuration; any saved plan is stale afterwards
    pub async fn set_config(&self, config: &str) -> E2eResult<()> {
        tokio::fs::write(self.config_path(), config).await?;
        self.clear_plan().await
    }

    pub async fn config(&self) -> E2eResult<String> {
        Ok(tokio::fs::read_to_string(self.config_path()).await?)
    }

    pub async fn has_saved_plan(&self) -> bool {
        tokio::fs::metadata(self.plan_path()).await.is_ok()
    }

    pub async fn clear_plan(&self) -> E2eResult<()> {
        match tokio::fs::remove_file(self.plan_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Terraform operations the step executor needs
///
/// Every call receives the bindings of the invocation it belongs to; an
/// implementation must hand them to whatever process it starts.
#[async_trait]
pub trait Terraform: Send + Sync {
    async fn init(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()>;

    async fn refresh(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()>;

    /// Create a saved plan, a destroy plan when `destroy` is set
    async fn plan(&self, wd: &WorkingDir, env: &EnvBindings, destroy: bool) -> E2eResult<()>;

    /// Apply the saved plan, or the configuration when there is none
    async fn apply(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()>;

    async fn destroy(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()>;

    async fn import(
        &self,
        wd: &WorkingDir,
        env: &EnvBindings,
        address: &str,
        id: &str,
    ) -> E2eResult<()>;

    async fn taint(&self, wd: &WorkingDir, env: &EnvBindings, address: &str) -> E2eResult<()>;

    async fn state(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<StateDocument>;

    async fn saved_plan(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<PlanDocument>;

    /// Human-readable rendering of the saved plan
    async fn saved_plan_text(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<String>;
}

/// Drives the `terraform` binary
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: PathBuf,
}

impl TerraformCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    async fn exec(&self, wd: &WorkingDir, env: &EnvBindings, args: &[&str]) -> E2eResult<Vec<u8>> {
        let command = args.first().copied().unwrap_or_default().to_string();
        debug!("Running terraform {} in {}", args.join(" "), wd.path().display());

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(wd.path())
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        env.apply(&mut cmd);

        let output = cmd
            .output()
            .await
            .map_err(|source| E2eError::Spawn { command: command.clone(), source })?;

        if !output.status.success() {
            return Err(E2eError::Command {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Terraform for TerraformCli {
    async fn init(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()> {
        self.exec(wd, env, &["init", "-input=false", "-no-color"]).await?;
        Ok(())
    }

    async fn refresh(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()> {
        self.exec(wd, env, &["refresh", "-input=false", "-no-color"]).await?;
        Ok(())
    }

    async fn plan(&self, wd: &WorkingDir, env: &EnvBindings, destroy: bool) -> E2eResult<()> {
        let out = format!("-out={}", PLAN_FILE);
        let mut args = vec!["plan", "-input=false", "-no-color", "-refresh=false", out.as_str()];
        if destroy {
            args.push("-destroy");
        }
        self.exec(wd, env, &args).await?;
        Ok(())
    }

    async fn apply(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()> {
        let mut args = vec!["apply", "-input=false", "-no-color", "-auto-approve"];
        let saved = wd.has_saved_plan().await;
        if saved {
            args.push(PLAN_FILE);
        } else {
            args.push("-refresh=false");
        }
        self.exec(wd, env, &args).await?;
        if saved {
            wd.clear_plan().await?;
        }
        Ok(())
    }

    async fn destroy(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<()> {
        self.exec(
            wd,
            env,
            &["destroy", "-input=false", "-no-color", "-auto-approve", "-refresh=false"],
        )
        .await?;
        Ok(())
    }

    async fn import(
        &self,
        wd: &WorkingDir,
        env: &EnvBindings,
        address: &str,
        id: &str,
    ) -> E2eResult<()> {
        self.exec(wd, env, &["import", "-input=false", "-no-color", address, id])
            .await?;
        Ok(())
    }

    async fn taint(&self, wd: &WorkingDir, env: &EnvBindings, address: &str) -> E2eResult<()> {
        self.exec(wd, env, &["taint", "-no-color", address]).await?;
        Ok(())
    }

    async fn state(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<StateDocument> {
        let stdout = self.exec(wd, env, &["show", "-json"]).await?;
        Ok(StateDocument::from_json(&stdout)?)
    }

    async fn saved_plan(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<PlanDocument> {
        let stdout = self.exec(wd, env, &["show", "-json", PLAN_FILE]).await?;
        Ok(PlanDocument::from_json(&stdout)?)
    }

    async fn saved_plan_text(&self, wd: &WorkingDir, env: &EnvBindings) -> E2eResult<String> {
        let stdout = self.exec(wd, env, &["show", "-no-color", PLAN_FILE]).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}
