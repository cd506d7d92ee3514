//! Error types for acceptance testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    // Test case validation
    #[error("steps must not be empty")]
    NoSteps,

    #[error("TestCase provider {name:?} set in both {first} and {second}")]
    CaseProviderConflict {
        name: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("TestStep provider {name:?} set in both {first} and {second}")]
    StepProviderConflict {
        name: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("TestStep missing Config or ImportState")]
    MissingConfig,

    #[error("Providers must be specified at the TestCase level or in all TestStep")]
    MissingProviders,

    #[error("TestStep ImportState must be specified with ImportStateId, ImportStateIdFunc, or ResourceName")]
    MissingImportId,

    #[error("step {step}/{total} validation error: {source}")]
    StepValidation {
        step: usize,
        total: usize,
        #[source]
        source: Box<E2eError>,
    },

    // External commands
    #[error("Failed to run terraform {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("terraform {command}: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Error running {stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<E2eError>,
    },

    // Step expectations
    #[error("expected an error but got none")]
    ExpectedError,

    #[error("expected an error with pattern ({pattern}), no match on: {message}")]
    ErrorMismatch { pattern: String, message: String },

    #[error(
        "After applying this test step{}, the plan was not empty.\nstdout:\n\n{plan}",
        if *after_refresh { " and performing a `terraform refresh`" } else { "" }
    )]
    NonEmptyPlan { after_refresh: bool, plan: String },

    #[error("Check failed: {0:#}")]
    Check(anyhow::Error),

    #[error("SkipFunc failed: {0:#}")]
    SkipFunc(anyhow::Error),

    #[error("Error when tainting resources: resource {0:?} not found in state")]
    TaintMissing(String),

    #[error("Step {step}/{total} error: {source}")]
    Step {
        step: usize,
        total: usize,
        #[source]
        source: Box<E2eError>,
    },

    // ID-only refresh
    #[error("ID-only test failed: {0}")]
    IdRefresh(String),

    #[error("ID-only test failed: Attributes not equivalent. Difference is shown below. Top is actual, bottom is expected.\n\n{actual}\n\n{expected}")]
    IdRefreshMismatch { actual: String, expected: String },

    // Import steps
    #[error("ResourceName is required for an import state test")]
    MissingResourceName,

    #[error("Resource specified by ResourceName couldn't be found: {0}")]
    ResourceNotFound(String),

    #[error("Cannot import state with no specified config")]
    ImportWithoutConfig,

    #[error("ImportStateIdFunc failed: {0:#}")]
    ImportIdFunc(anyhow::Error),

    #[error("ImportStateCheck failed: {0:#}")]
    ImportCheck(anyhow::Error),

    #[error("Failed state verification, resource with ID {0} not found")]
    ImportVerifyMissing(String),

    #[error("ImportStateVerify attributes not equivalent. Difference is shown below. Top is actual, bottom is expected.\n\n{actual}\n\n{expected}")]
    ImportVerifyMismatch { actual: String, expected: String },

    // Teardown
    #[error("Error running post-test destroy, there may be dangling resources: {0}")]
    PostTestDestroy(Box<E2eError>),

    #[error("CheckDestroy failed: {0:#}")]
    CheckDestroy(anyhow::Error),

    // Sweepers
    #[error("Sweeper {0:?} is already registered")]
    DuplicateSweeper(String),

    #[error("Sweeper dependency cycle in {domain}: {}", path.join(" -> "))]
    SweepCycle { domain: String, path: Vec<String> },

    #[error("{failed} sweeper(s) failed: {summary}")]
    Sweep { failed: usize, summary: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State error: {0}")]
    Shim(#[from] tfacc_common::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] tfacc_provider::ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl E2eError {
    /// Wrap as a failure of a named stage, e.g. "pre-apply refresh"
    pub fn at(stage: &'static str) -> impl FnOnce(E2eError) -> E2eError {
        move |source| E2eError::Stage {
            stage,
            source: Box::new(source),
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
