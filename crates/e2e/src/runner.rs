//! Step executor
//!
//! Runs a [`TestCase`] against Terraform. Every Terraform command goes
//! through the provider lifecycle manager, so in-process providers are
//! served for exactly as long as the command runs.
//!
//! A configuration step moves through
//!
//! ```text
//! Configured -> Applied -> PlanVerifiedEmpty -> RefreshVerified -> RePlanVerifiedEmpty
//! ```
//!
//! and whatever was applied is destroyed once the case ends, failed or not.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tfacc_common::{FlatAttributeMap, InstanceRecord, State};
use tfacc_provider::{EnvBindings, InProcessProvider, LifecycleManager};
use tracing::{debug, error, info, warn};

use crate::config::{HarnessConfig, ACCEPTANCE_ENV};
use crate::error::{E2eError, E2eResult};
use crate::case::{ProviderBindings, TestCase, TestStep};
use crate::terraform::{Terraform, TerraformCli, WorkingDir};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based position in the case
    pub number: usize,
    /// `config` or `import`
    pub kind: String,
    pub skipped: bool,
}

/// Result of running a single test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub outcome: CaseOutcome,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

/// Result of running several test cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Acceptance test runner
pub struct TestRunner {
    config: HarnessConfig,
    terraform: Arc<dyn Terraform>,
    lifecycle: LifecycleManager,
}

impl TestRunner {
    /// Runner driving the configured `terraform` binary
    pub fn new(config: HarnessConfig) -> Self {
        let terraform = Arc::new(TerraformCli::new(&config.terraform_path));
        Self::with_terraform(config, terraform)
    }

    /// Runner configured from `TF_ACC*` environment variables
    pub fn from_env() -> Self {
        Self::new(HarnessConfig::from_env())
    }

    pub fn with_terraform(config: HarnessConfig, terraform: Arc<dyn Terraform>) -> Self {
        let lifecycle = LifecycleManager::new(config.lifecycle.clone(), config.provider.prefix());
        Self {
            config,
            terraform,
            lifecycle,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Run cases one after another, collecting failures instead of stopping
    pub async fn run_suite(&self, cases: &[TestCase]) -> TestSuiteResult {
        let start = Instant::now();
        let mut results = Vec::with_capacity(cases.len());
        let (mut passed, mut failed, mut skipped) = (0, 0, 0);

        info!("Running {} test case(s)...", cases.len());

        for case in cases {
            match self.run_case(case).await {
                Ok(result) => {
                    match result.outcome {
                        CaseOutcome::Skipped => skipped += 1,
                        _ => {
                            passed += 1;
                            info!("✓ {} ({} ms)", result.name, result.duration_ms);
                        }
                    }
                    results.push(result);
                }
                Err(e) => {
                    failed += 1;
                    error!("✗ {} - {}", case.name, e);
                    results.push(TestResult {
                        name: case.name.clone(),
                        outcome: CaseOutcome::Failed,
                        duration_ms: 0,
                        steps: vec![],
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        TestSuiteResult {
            total: cases.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            results,
        }
    }

    /// Run one case to completion
    ///
    /// Any error fails the case. Resources applied before the failure are
    /// still destroyed.
    pub async fn run_case(&self, case: &TestCase) -> E2eResult<TestResult> {
        let start = Instant::now();
        case.validate()?;

        if !case.is_unit_test && !self.config.acceptance {
            info!(
                "Skipping {}: acceptance tests skipped unless env '{}' set",
                case.name, ACCEPTANCE_ENV
            );
            return Ok(TestResult {
                name: case.name.clone(),
                outcome: CaseOutcome::Skipped,
                duration_ms: 0,
                steps: case
                    .step_kinds()
                    .enumerate()
                    .map(|(i, kind)| StepResult {
                        number: i + 1,
                        kind: kind.to_string(),
                        skipped: true,
                    })
                    .collect(),
                error: None,
            });
        }

        if let Some(pre_check) = &case.pre_check {
            pre_check();
        }

        let wd = WorkingDir::create(
            self.config.temp_dir.as_deref(),
            self.config.persist_working_dir,
        )?;
        info!("Running {} in {}", case.name, wd.path().display());

        let mut run = CaseRun::new(self, case, wd);
        let outcome = run.run_steps().await;
        let teardown = run.destroy().await;

        let steps = match (outcome, teardown) {
            (Ok(steps), Ok(())) => steps,
            (Ok(_), Err(e)) | (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(teardown)) => {
                error!("{}", teardown);
                return Err(e);
            }
        };

        Ok(TestResult {
            name: case.name.clone(),
            outcome: CaseOutcome::Passed,
            duration_ms: start.elapsed().as_millis() as u64,
            steps,
            error: None,
        })
    }

    /// Run one Terraform operation inside a provider lifecycle
    async fn invoke<T, F, Fut>(
        &self,
        providers: &[InProcessProvider],
        wd: &WorkingDir,
        op: F,
    ) -> E2eResult<T>
    where
        F: FnOnce(Arc<dyn Terraform>, WorkingDir, EnvBindings) -> Fut,
        Fut: Future<Output = E2eResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let terraform = self.terraform.clone();
        let wd = wd.clone();
        self.lifecycle
            .run(providers, move |env| op(terraform, wd, env))
            .await
    }
}

/// Mutable bookkeeping for one case
struct CaseRun<'a> {
    runner: &'a TestRunner,
    case: &'a TestCase,
    wd: WorkingDir,
    /// Bindings of the step being run; the last step's are used for teardown
    bindings: &'a ProviderBindings,
    providers: Vec<InProcessProvider>,
    /// Configuration of the last configuration step, reused by imports
    applied_config: Option<String>,
    id_refresh_done: bool,
}

impl<'a> CaseRun<'a> {
    fn new(runner: &'a TestRunner, case: &'a TestCase, wd: WorkingDir) -> Self {
        Self {
            runner,
            case,
            wd,
            bindings: &case.providers,
            providers: case.providers.in_process(),
            applied_config: None,
            id_refresh_done: false,
        }
    }

    fn merged_config(&self, config: &str) -> String {
        let prefix = self.runner.config.provider.prefix();
        format!("{}{}", self.bindings.provider_config(&prefix), config)
    }

    async fn run_steps(&mut self) -> E2eResult<Vec<StepResult>> {
        let case = self.case;

        if !case.providers.is_empty() {
            let config = self.merged_config("");
            self.wd.set_config(&config).await?;
            self.init(&self.wd).await?;
        }

        let total = case.steps.len();
        let mut results = Vec::with_capacity(total);

        for (i, step) in case.steps.iter().enumerate() {
            let number = i + 1;
            let wrap = |e| E2eError::Step {
                step: number,
                total,
                source: Box::new(e),
            };

            if let Some(pre_config) = &step.pre_config {
                pre_config();
            }

            if let Some(skip) = &step.skip_fn {
                if skip().map_err(|e| wrap(E2eError::SkipFunc(e)))? {
                    info!("Skipping step {}/{} due to SkipFunc", number, total);
                    results.push(StepResult {
                        number,
                        kind: step_kind(step).to_string(),
                        skipped: true,
                    });
                    continue;
                }
            }

            self.bindings = if step.providers.is_empty() {
                &case.providers
            } else {
                &step.providers
            };
            self.providers = self.bindings.in_process();

            debug!("Running step {}/{} ({})", number, total, step_kind(step));
            let result = if step.import_state {
                self.import_step(step).await
            } else {
                self.config_step(step).await
            };
            self.expect(step, result).map_err(wrap)?;

            if !step.import_state {
                self.applied_config = Some(step.config.clone());
            }
            results.push(StepResult {
                number,
                kind: step_kind(step).to_string(),
                skipped: false,
            });
        }

        Ok(results)
    }

    /// Apply the step's error expectation to its result
    fn expect(&self, step: &TestStep, result: E2eResult<()>) -> E2eResult<()> {
        match (&step.expect_error, result) {
            (None, Ok(())) => Ok(()),
            (Some(_), Ok(())) => Err(E2eError::ExpectedError),
            (Some(pattern), Err(e)) => {
                let message = e.to_string();
                if pattern.is_match(&message) {
                    info!("Step failed with expected error: {}", message);
                    Ok(())
                } else {
                    Err(E2eError::ErrorMismatch {
                        pattern: pattern.as_str().to_string(),
                        message,
                    })
                }
            }
            (None, Err(e)) => match &self.case.error_check {
                Some(error_check) => error_check(e),
                None => Err(e),
            },
        }
    }

    async fn config_step(&mut self, step: &TestStep) -> E2eResult<()> {
        if !step.destroy && !step.taint.is_empty() {
            let state = self.state(&self.wd).await?;
            for address in &step.taint {
                if state.resource(address).is_none() {
                    return Err(E2eError::TaintMissing(address.clone()));
                }
                warn!("Explicitly tainting resource {}", address);
                self.taint(address).await?;
            }
        }

        let config = self.merged_config(&step.config);
        self.wd.set_config(&config).await?;
        if !step.providers.is_empty() {
            self.init(&self.wd).await?;
        }

        // Configured
        self.refresh().await.map_err(E2eError::at("pre-apply refresh"))?;

        if !step.plan_only {
            self.plan(step.destroy)
                .await
                .map_err(E2eError::at("pre-apply plan"))?;
            let mut before = self.state(&self.wd).await?;

            self.apply()
                .await
                .map_err(E2eError::at(if step.destroy { "destroy" } else { "apply" }))?;
            let mut after = self.state(&self.wd).await?;

            // Applied
            if let Some(check) = &step.check {
                let target = if step.destroy { &mut before } else { &mut after };
                target.mark_binary_driven();
                check(target).map_err(E2eError::Check)?;
            }
        }

        // PlanVerifiedEmpty
        self.plan(step.destroy)
            .await
            .map_err(E2eError::at("post-apply plan"))?;
        self.verify_empty_plan(step, false).await?;

        // RefreshVerified
        let refresh = self.runner.config.refresh_after_apply
            && !(step.destroy && step.prevent_post_destroy_refresh);
        if refresh {
            self.refresh()
                .await
                .map_err(E2eError::at("post-apply refresh"))?;
        }

        // RePlanVerifiedEmpty
        self.plan(step.destroy)
            .await
            .map_err(E2eError::at("second post-apply plan"))?;
        self.verify_empty_plan(step, true).await?;

        // A step expecting a non-empty plan has declared drift
        if self.case.id_refresh_name.is_some()
            && !self.id_refresh_done
            && !step.expect_non_empty_plan
        {
            self.id_refresh(&config).await?;
        }

        Ok(())
    }

    async fn verify_empty_plan(&self, step: &TestStep, after_refresh: bool) -> E2eResult<()> {
        let plan = self
            .runner
            .invoke(&self.providers, &self.wd, |tf, wd, env| async move {
                tf.saved_plan(&wd, &env).await
            })
            .await
            .map_err(E2eError::at("retrieving post-apply plan"))?;

        if plan.is_empty() {
            return Ok(());
        }
        if step.expect_non_empty_plan {
            info!("Got non-empty plan, as expected");
            return Ok(());
        }

        debug!("Unexpected changes: {:?}", plan.changed_addresses());
        let rendered = self
            .runner
            .invoke(&self.providers, &self.wd, |tf, wd, env| async move {
                tf.saved_plan_text(&wd, &env).await
            })
            .await?;
        Err(E2eError::NonEmptyPlan {
            after_refresh,
            plan: rendered,
        })
    }

    /// Refresh the named resource from its id alone and compare attributes
    async fn id_refresh(&mut self, step_config: &str) -> E2eResult<()> {
        let Some(name) = self.case.id_refresh_name.as_deref() else {
            return Ok(());
        };

        let state = self.state(&self.wd).await?;
        if state.is_empty() {
            return Ok(());
        }
        let Some(expected) = state.resource(name).and_then(InstanceRecord::attributes) else {
            return Ok(());
        };
        self.id_refresh_done = true;
        info!("Running ID-only refresh of {}", name);

        let minimal = self.merged_config("");
        self.wd.set_config(&minimal).await?;
        let refreshed = match self.refresh().await {
            Ok(()) => self.state(&self.wd).await,
            Err(e) => Err(e),
        };
        self.wd.set_config(step_config).await?;
        let refreshed = refreshed?;

        let actual = refreshed
            .resource(name)
            .ok_or_else(|| E2eError::IdRefresh("Resource gone!".to_string()))?
            .attributes()
            .ok_or_else(|| E2eError::IdRefresh("Resource has no primary".to_string()))?;

        let ignore = &self.case.id_refresh_ignore;
        let actual = comparable(actual, ignore, false);
        let expected = comparable(expected, ignore, false);
        match difference(&actual, &expected) {
            Some((actual, expected)) => Err(E2eError::IdRefreshMismatch { actual, expected }),
            None => Ok(()),
        }
    }

    async fn import_step(&self, step: &TestStep) -> E2eResult<()> {
        let resource_name = step
            .resource_name
            .as_deref()
            .ok_or(E2eError::MissingResourceName)?;

        let state = self.state(&self.wd).await?;

        let id = if let Some(id) = &step.import_state_id {
            id.clone()
        } else if let Some(id_func) = &step.import_state_id_func {
            id_func(&state).map_err(E2eError::ImportIdFunc)?
        } else {
            state
                .resource(resource_name)
                .and_then(InstanceRecord::id)
                .ok_or_else(|| E2eError::ResourceNotFound(resource_name.to_string()))?
                .to_string()
        };
        let id = format!("{}{}", step.import_state_id_prefix, id);

        let config = if step.config.is_empty() {
            self.applied_config
                .clone()
                .ok_or(E2eError::ImportWithoutConfig)?
        } else {
            step.config.clone()
        };

        let import_wd = WorkingDir::create(
            self.runner.config.temp_dir.as_deref(),
            self.runner.config.persist_working_dir,
        )?;
        debug!("Importing {} as {} in {}", id, resource_name, import_wd.path().display());

        import_wd.set_config(&self.merged_config(&config)).await?;
        self.init(&import_wd).await?;

        let (address, import_id) = (resource_name.to_string(), id.clone());
        self.runner
            .invoke(&self.providers, &import_wd, move |tf, wd, env| async move {
                tf.import(&wd, &env, &address, &import_id).await
            })
            .await?;

        let imported = self.state(&import_wd).await?;

        if let Some(check) = &step.import_state_check {
            let instances: Vec<InstanceRecord> =
                imported.primary_instances().into_iter().cloned().collect();
            check(&instances).map_err(E2eError::ImportCheck)?;
        }

        if step.import_state_verify {
            verify_import(&imported, &state, &step.import_state_verify_ignore)?;
        }

        Ok(())
    }

    /// Deferred destroy, run whether or not the steps succeeded
    async fn destroy(&self) -> E2eResult<()> {
        let wrap = |e| E2eError::PostTestDestroy(Box::new(e));

        let mut state = self.state(&self.wd).await.map_err(wrap)?;
        if state.is_empty() {
            debug!("Nothing to destroy");
            return Ok(());
        }

        info!("Destroying {} resource(s)", state.root.resources.len());
        self.runner
            .invoke(&self.providers, &self.wd, |tf, wd, env| async move {
                tf.destroy(&wd, &env).await
            })
            .await
            .map_err(wrap)?;

        if let Some(check_destroy) = &self.case.check_destroy {
            state.mark_binary_driven();
            check_destroy(&state).map_err(|e| wrap(E2eError::CheckDestroy(e)))?;
        }

        Ok(())
    }

    async fn init(&self, wd: &WorkingDir) -> E2eResult<()> {
        self.runner
            .invoke(&self.providers, wd, |tf, wd, env| async move {
                tf.init(&wd, &env).await
            })
            .await
    }

    async fn refresh(&self) -> E2eResult<()> {
        self.runner
            .invoke(&self.providers, &self.wd, |tf, wd, env| async move {
                tf.refresh(&wd, &env).await
            })
            .await
    }

    async fn plan(&self, destroy: bool) -> E2eResult<()> {
        self.runner
            .invoke(&self.providers, &self.wd, move |tf, wd, env| async move {
                tf.plan(&wd, &env, destroy).await
            })
            .await
    }

    async fn apply(&self) -> E2eResult<()> {
        self.runner
            .invoke(&self.providers, &self.wd, |tf, wd, env| async move {
                tf.apply(&wd, &env).await
            })
            .await
    }

    async fn taint(&self, address: &str) -> E2eResult<()> {
        let address = address.to_string();
        self.runner
            .invoke(&self.providers, &self.wd, move |tf, wd, env| async move {
                tf.taint(&wd, &env, &address).await
            })
            .await
    }

    async fn state(&self, wd: &WorkingDir) -> E2eResult<State> {
        let document = self
            .runner
            .invoke(&self.providers, wd, |tf, wd, env| async move {
                tf.state(&wd, &env).await
            })
            .await?;
        Ok(State::from_document(&document)?)
    }
}

fn step_kind(step: &TestStep) -> &'static str {
    if step.import_state {
        "import"
    } else {
        "config"
    }
}

/// Attributes worth comparing: no ignored prefixes, no `timeouts`
fn comparable(attrs: &FlatAttributeMap, ignore: &[String], skip_empty: bool) -> FlatAttributeMap {
    attrs.filtered(|key, value| {
        if skip_empty && (key.ends_with(".#") || key.ends_with(".%")) && value == "0" {
            return false;
        }
        if ignore.iter().any(|prefix| key.starts_with(prefix.as_str())) {
            return false;
        }
        key != "timeouts" && !key.starts_with("timeouts.")
    })
}

/// Rendered `(actual, expected)` of the differing keys, if any
fn difference(actual: &FlatAttributeMap, expected: &FlatAttributeMap) -> Option<(String, String)> {
    if actual == expected {
        return None;
    }
    let actual_only = actual.filtered(|k, v| expected.get(k) != Some(v));
    let expected_only = expected.filtered(|k, v| actual.get(k) != Some(v));
    Some((actual_only.to_string(), expected_only.to_string()))
}

/// Every imported instance must match a managed instance of the prior state
fn verify_import(imported: &State, prior: &State, ignore: &[String]) -> E2eResult<()> {
    for record in imported.root.resources.values() {
        let Some(primary) = &record.primary else {
            continue;
        };

        let old = prior
            .root
            .resources
            .iter()
            .filter(|(key, _)| !key.starts_with("data."))
            .map(|(_, old)| old)
            .find(|old| {
                old.id() == Some(primary.id.as_str())
                    && old.resource_type == record.resource_type
                    && old.provider == record.provider
            })
            .and_then(InstanceRecord::attributes)
            .ok_or_else(|| E2eError::ImportVerifyMissing(primary.id.clone()))?;

        let actual = comparable(&primary.attributes, ignore, true);
        let expected = comparable(old, ignore, true);
        if let Some((actual, expected)) = difference(&actual, &expected) {
            return Err(E2eError::ImportVerifyMismatch { actual, expected });
        }
    }
    Ok(())
}
