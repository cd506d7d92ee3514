//! tfacc Acceptance Test Framework
//!
//! Drives Terraform through multi-step test cases against providers that
//! are served from the test process itself:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TestRunner                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run_case(case: TestCase) -> TestResult                     │
//! │    ├── validate()            literal validation errors      │
//! │    ├── per step                                             │
//! │    │     ├── config: refresh, plan, apply, check,           │
//! │    │     │           plan, refresh, plan (must be empty)    │
//! │    │     └── import: import into a fresh dir, verify        │
//! │    └── deferred destroy + check_destroy                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  every Terraform command                                    │
//! │    LifecycleManager::run(providers, |env| terraform ...)    │
//! │      serves providers in-process for the command only       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  sweep_main(registry, args)    cleanup mode, per domain     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod case;
pub mod check;
pub mod config;
pub mod error;
pub mod logging;
pub mod runner;
pub mod sweep;
pub mod terraform;

pub use case::{CheckFn, ExternalProvider, ProviderBindings, TestCase, TestStep};
pub use config::HarnessConfig;
pub use error::{E2eError, E2eResult};
pub use runner::{CaseOutcome, StepResult, TestResult, TestRunner, TestSuiteResult};
pub use sweep::{sweep_main, SweepArgs, SweepReport, Sweeper, SweeperRegistry};
pub use terraform::{Terraform, TerraformCli, WorkingDir};
