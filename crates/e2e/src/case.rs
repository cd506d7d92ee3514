//! Test case and step definitions
//!
//! A [`TestCase`] is a sequence of [`TestStep`]s run against one working
//! directory. Cases are built once and read by the runner; nothing in here
//! is mutated while a case executes.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tfacc_common::{InstanceRecord, State};
use tfacc_provider::{InProcessProvider, ProtocolVersion, ProviderFactory};

use crate::error::{E2eError, E2eResult};

/// Assertion over the state produced by a step
pub type CheckFn = Arc<dyn Fn(&State) -> anyhow::Result<()> + Send + Sync>;

/// Assertion over the primary instances produced by an import
pub type ImportStateCheckFn = Arc<dyn Fn(&[InstanceRecord]) -> anyhow::Result<()> + Send + Sync>;

/// Derives the import identifier from the state left by the previous step
pub type ImportIdFn = Arc<dyn Fn(&State) -> anyhow::Result<String> + Send + Sync>;

/// Returns true when the step should be skipped
pub type SkipFn = Arc<dyn Fn() -> anyhow::Result<bool> + Send + Sync>;

pub type HookFn = Arc<dyn Fn() + Send + Sync>;

/// Sees every unexpected step error; returning `Ok` swallows it
pub type ErrorCheckFn = Arc<dyn Fn(E2eError) -> E2eResult<()> + Send + Sync>;

/// A provider Terraform downloads itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalProvider {
    /// e.g. `hashicorp/random`
    pub source: Option<String>,
    /// e.g. `~> 3.0`
    pub version_constraint: Option<String>,
}

/// The four ways a case or step can name its providers
///
/// A provider name may appear under at most one of them.
#[derive(Clone, Default)]
pub struct ProviderBindings {
    /// Served in-process over protocol 5
    pub provider_factories: BTreeMap<String, ProviderFactory>,
    pub proto_v5_provider_factories: BTreeMap<String, ProviderFactory>,
    pub proto_v6_provider_factories: BTreeMap<String, ProviderFactory>,
    pub external_providers: BTreeMap<String, ExternalProvider>,
}

const EXTERNAL: &str = "ExternalProviders";
const FACTORIES: &str = "ProviderFactories";
const PROTO_V5: &str = "ProtoV5ProviderFactories";
const PROTO_V6: &str = "ProtoV6ProviderFactories";

impl ProviderBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(mut self, name: impl Into<String>, factory: ProviderFactory) -> Self {
        self.provider_factories.insert(name.into(), factory);
        self
    }

    pub fn with_proto_v5(mut self, name: impl Into<String>, factory: ProviderFactory) -> Self {
        self.proto_v5_provider_factories.insert(name.into(), factory);
        self
    }

    pub fn with_proto_v6(mut self, name: impl Into<String>, factory: ProviderFactory) -> Self {
        self.proto_v6_provider_factories.insert(name.into(), factory);
        self
    }

    pub fn with_external(mut self, name: impl Into<String>, provider: ExternalProvider) -> Self {
        self.external_providers.insert(name.into(), provider);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.provider_factories.is_empty()
            && self.proto_v5_provider_factories.is_empty()
            && self.proto_v6_provider_factories.is_empty()
            && self.external_providers.is_empty()
    }

    /// First provider name registered under two mechanisms
    pub fn conflict(&self) -> Option<(String, &'static str, &'static str)> {
        let external = (EXTERNAL, self.external_providers.keys().collect::<Vec<_>>());
        let factories = (FACTORIES, self.provider_factories.keys().collect());
        let v5 = (PROTO_V5, self.proto_v5_provider_factories.keys().collect());
        let v6 = (PROTO_V6, self.proto_v6_provider_factories.keys().collect());

        let pairs = [
            (&external, &factories),
            (&external, &v5),
            (&external, &v6),
            (&v5, &v6),
            (&v5, &factories),
            (&v6, &factories),
        ];

        let found = pairs.into_iter().find_map(|((first, names), (second, others))| {
            names
                .iter()
                .find(|name| others.contains(*name))
                .map(|name| (name.to_string(), *first, *second))
        });
        found
    }

    /// Providers the lifecycle manager serves for each command
    pub fn in_process(&self) -> Vec<InProcessProvider> {
        let v5 = self
            .provider_factories
            .iter()
            .chain(&self.proto_v5_provider_factories)
            .map(|(name, f)| InProcessProvider::new(name, ProtocolVersion::V5, f.clone()));
        let v6 = self
            .proto_v6_provider_factories
            .iter()
            .map(|(name, f)| InProcessProvider::new(name, ProtocolVersion::V6, f.clone()));
        v5.chain(v6).collect()
    }

    /// `terraform { required_providers { ... } }` block for these providers
    ///
    /// In-process providers are sourced from `source_prefix`
    /// (`<host>/<namespace>`) so the reattach handshake matches them.
    pub fn provider_config(&self, source_prefix: &str) -> String {
        let mut blocks = BTreeMap::new();

        for provider in self.in_process() {
            blocks.insert(
                provider.name.clone(),
                vec![("source", format!("{}/{}", source_prefix, provider.name))],
            );
        }
        for (name, external) in &self.external_providers {
            let mut attrs = Vec::new();
            if let Some(source) = &external.source {
                attrs.push(("source", source.clone()));
            }
            if let Some(version) = &external.version_constraint {
                attrs.push(("version", version.clone()));
            }
            if !attrs.is_empty() {
                blocks.insert(name.clone(), attrs);
            }
        }

        if blocks.is_empty() {
            return String::new();
        }

        let mut out = String::from("terraform {\n  required_providers {\n");
        for (name, attrs) in blocks {
            let _ = writeln!(out, "    {} = {{", name);
            for (key, value) in attrs {
                let _ = writeln!(out, "      {} = {:?}", key, value);
            }
            out.push_str("    }\n");
        }
        out.push_str("  }\n}\n\n");
        out
    }
}

impl std::fmt::Debug for ProviderBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBindings")
            .field("provider_factories", &self.provider_factories.keys())
            .field("proto_v5_provider_factories", &self.proto_v5_provider_factories.keys())
            .field("proto_v6_provider_factories", &self.proto_v6_provider_factories.keys())
            .field("external_providers", &self.external_providers)
            .finish()
    }
}

/// One step of a test case
///
/// A step either applies `config` or, with `import_state`, imports an
/// existing resource and compares it with what the previous steps produced.
#[derive(Clone, Default)]
pub struct TestStep {
    /// HCL configuration applied by this step
    pub config: String,

    /// Runs against the state after apply (pre-apply state for destroy steps)
    pub check: Option<CheckFn>,

    /// Plan and apply a destroy instead
    pub destroy: bool,

    /// Tolerate a non-empty plan after apply
    pub expect_non_empty_plan: bool,

    /// The step must fail with an error matching this pattern
    pub expect_error: Option<Regex>,

    /// Skip apply; only verify that the plan is empty
    pub plan_only: bool,

    /// Skip the post-apply refresh of a destroy step
    pub prevent_post_destroy_refresh: bool,

    /// Runs before the step's configuration is written
    pub pre_config: Option<HookFn>,

    pub skip_fn: Option<SkipFn>,

    /// Resource addresses to taint before applying
    pub taint: Vec<String>,

    /// Overrides the case's providers for this step
    pub providers: ProviderBindings,

    // Import
    pub import_state: bool,
    pub import_state_id: Option<String>,
    pub import_state_id_func: Option<ImportIdFn>,
    pub import_state_id_prefix: String,
    pub import_state_check: Option<ImportStateCheckFn>,
    pub import_state_verify: bool,
    pub import_state_verify_ignore: Vec<String>,

    /// Resource address, e.g. `example_thing.foo`
    pub resource_name: Option<String>,
}

impl TestStep {
    /// A step applying `config`
    pub fn config(config: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            ..Default::default()
        }
    }

    /// An import step for `resource_name`, identified by its primary id
    pub fn import(resource_name: impl Into<String>) -> Self {
        Self {
            import_state: true,
            resource_name: Some(resource_name.into()),
            ..Default::default()
        }
    }

    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&State) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.check = Some(Arc::new(check));
        self
    }

    pub fn with_expect_error(mut self, pattern: Regex) -> Self {
        self.expect_error = Some(pattern);
        self
    }

    pub fn with_providers(mut self, providers: ProviderBindings) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_import_verify(mut self, ignore: &[&str]) -> Self {
        self.import_state_verify = true;
        self.import_state_verify_ignore = ignore.iter().map(|s| s.to_string()).collect();
        self
    }

    fn kind(&self) -> &'static str {
        if self.import_state {
            "import"
        } else {
            "config"
        }
    }

    fn validate(&self, case_has_providers: bool) -> E2eResult<()> {
        if self.config.is_empty() && !self.import_state {
            return Err(E2eError::MissingConfig);
        }

        if let Some((name, first, second)) = self.providers.conflict() {
            return Err(E2eError::StepProviderConflict { name, first, second });
        }

        if !case_has_providers && self.providers.is_empty() {
            return Err(E2eError::MissingProviders);
        }

        if self.import_state
            && self.import_state_id.is_none()
            && self.import_state_id_func.is_none()
            && self.resource_name.is_none()
        {
            return Err(E2eError::MissingImportId);
        }

        Ok(())
    }
}

impl std::fmt::Debug for TestStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestStep")
            .field("kind", &self.kind())
            .field("destroy", &self.destroy)
            .field("plan_only", &self.plan_only)
            .field("resource_name", &self.resource_name)
            .finish_non_exhaustive()
    }
}

/// A sequence of steps sharing one working directory
#[derive(Clone, Default)]
pub struct TestCase {
    pub name: String,

    /// Run even without acceptance testing enabled
    pub is_unit_test: bool,

    pub pre_check: Option<HookFn>,

    pub providers: ProviderBindings,

    /// Runs against the last state once everything was destroyed
    pub check_destroy: Option<CheckFn>,

    /// Resource to refresh from its id alone after the first apply
    pub id_refresh_name: Option<String>,
    pub id_refresh_ignore: Vec<String>,

    pub error_check: Option<ErrorCheckFn>,

    pub steps: Vec<TestStep>,
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_providers(mut self, providers: ProviderBindings) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_check_destroy<F>(mut self, check: F) -> Self
    where
        F: Fn(&State) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.check_destroy = Some(Arc::new(check));
        self
    }

    /// Reject malformed cases before any command runs
    pub fn validate(&self) -> E2eResult<()> {
        if self.steps.is_empty() {
            return Err(E2eError::NoSteps);
        }

        if let Some((name, first, second)) = self.providers.conflict() {
            return Err(E2eError::CaseProviderConflict { name, first, second });
        }

        let has_providers = !self.providers.is_empty();
        let total = self.steps.len();
        for (i, step) in self.steps.iter().enumerate() {
            step.validate(has_providers)
                .map_err(|e| E2eError::StepValidation {
                    step: i + 1,
                    total,
                    source: Box::new(e),
                })?;
        }

        Ok(())
    }

    pub(crate) fn step_kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().map(TestStep::kind)
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("is_unit_test", &self.is_unit_test)
            .field("providers", &self.providers)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}
