//! Sweepers
//!
//! Cleanup tasks that delete leftover test resources, run per domain
//! (usually a region) instead of the normal test suite. A sweeper may
//! depend on others, which then run before it in the same domain.

use clap::Parser;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{E2eError, E2eResult};

/// A sweeper action, given the domain to clean
pub type SweepFn = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
pub struct Sweeper {
    pub name: String,
    /// Sweepers that must run before this one
    pub dependencies: Vec<String>,
    action: SweepFn,
}

impl Sweeper {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            action: Arc::new(move |domain| action(domain).boxed()),
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub async fn run(&self, domain: &str) -> anyhow::Result<()> {
        (self.action)(domain.to_string()).await
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// All known sweepers, by name
#[derive(Debug, Clone, Default)]
pub struct SweeperRegistry {
    sweepers: BTreeMap<String, Sweeper>,
}

impl SweeperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sweeper: Sweeper) -> E2eResult<()> {
        if self.sweepers.contains_key(&sweeper.name) {
            return Err(E2eError::DuplicateSweeper(sweeper.name));
        }
        debug!("Registered sweeper {}", sweeper.name);
        self.sweepers.insert(sweeper.name.clone(), sweeper);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Sweeper> {
        self.sweepers.get(name)
    }

    pub fn len(&self) -> usize {
        self.sweepers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sweepers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sweepers.keys().map(String::as_str)
    }

    /// Sweepers whose name contains one of the comma-separated, case
    /// insensitive substrings in `filter`; an empty filter selects all
    ///
    /// Only direct selection is filtered. Dependencies of a selected
    /// sweeper still run.
    pub fn filter(&self, filter: &str) -> BTreeMap<String, Sweeper> {
        let patterns: Vec<String> = filter
            .split(',')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        self.sweepers
            .iter()
            .filter(|(name, _)| {
                let name = name.to_lowercase();
                patterns.is_empty() || patterns.iter().any(|p| name.contains(p.as_str()))
            })
            .map(|(name, sweeper)| (name.clone(), sweeper.clone()))
            .collect()
    }
}

/// One sweeper execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Sweepers run in one domain, in execution order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    pub outcomes: Vec<SweepOutcome>,
    /// Set when a dependency cycle stopped this domain
    pub cycle: Option<Vec<String>>,
    /// True when a failure stopped this domain early
    pub aborted: bool,
}

impl DomainRecord {
    pub fn failures(&self) -> impl Iterator<Item = &SweepOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    pub fn ran(&self, name: &str) -> bool {
        self.outcomes.iter().any(|o| o.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub domains: Vec<DomainRecord>,
}

impl SweepReport {
    pub fn domain(&self, domain: &str) -> Option<&DomainRecord> {
        self.domains.iter().find(|d| d.domain == domain)
    }

    /// Ok when every domain finished without a failure or cycle
    pub fn into_result(self) -> E2eResult<Self> {
        if let Some(record) = self.domains.iter().find(|d| d.cycle.is_some()) {
            return Err(E2eError::SweepCycle {
                domain: record.domain.clone(),
                path: record.cycle.clone().unwrap_or_default(),
            });
        }

        let failures: Vec<String> = self
            .domains
            .iter()
            .flat_map(|d| {
                d.failures().map(move |o| {
                    format!(
                        "{} ({}): {}",
                        o.name,
                        d.domain,
                        o.error.as_deref().unwrap_or_default()
                    )
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(self)
        } else {
            Err(E2eError::Sweep {
                failed: failures.len(),
                summary: failures.join("; "),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Run `selected` sweepers in every domain, dependencies first
///
/// Dependencies are looked up in `registry`. Domains run one after another
/// and independently of each other's failures.
pub async fn run_all(
    domains: &[String],
    registry: &SweeperRegistry,
    selected: &BTreeMap<String, Sweeper>,
    allow_failures: bool,
) -> SweepReport {
    let mut report = SweepReport::default();
    for domain in domains {
        report
            .domains
            .push(run_domain(domain, registry, selected, allow_failures).await);
    }
    report
}

/// Run `selected` sweepers in one domain; each runs at most once
pub async fn run_domain(
    domain: &str,
    registry: &SweeperRegistry,
    selected: &BTreeMap<String, Sweeper>,
    allow_failures: bool,
) -> DomainRecord {
    info!("Running sweepers for domain {}", domain);

    let mut record = DomainRecord {
        domain: domain.to_string(),
        ..Default::default()
    };
    let mut visits = HashMap::new();

    for name in selected.keys() {
        let order = match execution_order(name, registry, selected, &mut visits) {
            Ok(order) => order,
            Err(path) => {
                error!("Sweeper dependency cycle in {}: {}", domain, path.join(" -> "));
                record.cycle = Some(path);
                record.aborted = true;
                return record;
            }
        };

        for sweeper in order {
            debug!("Running sweeper {} in {}", sweeper.name, domain);
            let start = Instant::now();
            let result = sweeper.run(domain).await;
            let outcome = SweepOutcome {
                name: sweeper.name.clone(),
                duration_ms: start.elapsed().as_millis() as u64,
                error: result.err().map(|e| format!("{:#}", e)),
            };

            let failed = outcome.error.is_some();
            if let Some(e) = &outcome.error {
                error!("Error running sweeper {} in {}: {}", sweeper.name, domain, e);
            }
            record.outcomes.push(outcome);

            if failed && !allow_failures {
                record.aborted = true;
                return record;
            }
        }
    }

    record
}

/// Post-order of `root` and its unvisited dependencies
///
/// Returns the cycle path when a sweeper is reached while in progress.
fn execution_order(
    root: &str,
    registry: &SweeperRegistry,
    selected: &BTreeMap<String, Sweeper>,
    visits: &mut HashMap<String, Visit>,
) -> Result<Vec<Sweeper>, Vec<String>> {
    let lookup = |name: &str| selected.get(name).or_else(|| registry.get(name));

    if visits.contains_key(root) {
        return Ok(Vec::new());
    }
    let Some(root_sweeper) = lookup(root) else {
        return Ok(Vec::new());
    };

    let mut order = Vec::new();
    let mut stack = vec![(root_sweeper, 0usize)];
    visits.insert(root.to_string(), Visit::InProgress);

    while let Some(&(sweeper, next)) = stack.last() {
        let Some(dependency) = sweeper.dependencies.get(next) else {
            stack.pop();
            visits.insert(sweeper.name.clone(), Visit::Done);
            order.push(sweeper.clone());
            continue;
        };
        if let Some(top) = stack.last_mut() {
            top.1 += 1;
        }

        match visits.get(dependency.as_str()) {
            Some(Visit::Done) => {}
            Some(Visit::InProgress) => {
                let start = stack
                    .iter()
                    .position(|(s, _)| s.name == *dependency)
                    .unwrap_or(0);
                let mut path: Vec<String> =
                    stack[start..].iter().map(|(s, _)| s.name.clone()).collect();
                path.push(dependency.clone());
                return Err(path);
            }
            None => match lookup(dependency.as_str()) {
                Some(dep) => {
                    visits.insert(dependency.clone(), Visit::InProgress);
                    stack.push((dep, 0));
                }
                None => warn!(
                    "Sweeper ({}) has dependency ({}), but that sweeper was not found",
                    sweeper.name, dependency
                ),
            },
        }
    }

    Ok(order)
}

/// Sweep mode selectors
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "sweep", about = "Delete leftover acceptance test resources")]
pub struct SweepArgs {
    /// Comma-separated domains (e.g. regions) to sweep; enables sweep mode
    #[arg(long = "sweep", env = "SWEEP", default_value = "")]
    pub domains: String,

    /// Comma-separated substrings of sweeper names to run
    #[arg(long = "sweep-run", env = "SWEEP_RUN", default_value = "")]
    pub run: String,

    /// Keep sweeping a domain after a sweeper fails
    #[arg(long = "sweep-allow-failures", env = "SWEEP_ALLOW_FAILURES")]
    pub allow_failures: bool,
}

impl SweepArgs {
    pub fn domains(&self) -> Vec<String> {
        self.domains
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from)
            .collect()
    }

    /// True when sweepers should run instead of tests
    pub fn is_active(&self) -> bool {
        !self.domains().is_empty()
    }
}

/// Entry point for sweep mode
pub async fn sweep_main(registry: SweeperRegistry, args: SweepArgs) -> ExitCode {
    crate::logging::init();

    let domains = args.domains();
    if domains.is_empty() {
        error!("No domains to sweep, pass --sweep or set SWEEP");
        return ExitCode::FAILURE;
    }

    let selected = registry.filter(&args.run);
    info!(
        "Sweeping {} domain(s) with {} of {} sweeper(s)",
        domains.len(),
        selected.len(),
        registry.len()
    );

    let report = run_all(&domains, &registry, &selected, args.allow_failures).await;

    for record in &report.domains {
        let failed = record.failures().count();
        info!(
            "Domain {}: {} sweeper(s) ran, {} failed{}",
            record.domain,
            record.outcomes.len(),
            failed,
            if record.aborted { ", aborted" } else { "" }
        );
        for outcome in &record.outcomes {
            match &outcome.error {
                None => info!("  ✓ {} ({} ms)", outcome.name, outcome.duration_ms),
                Some(e) => error!("  ✗ {} - {}", outcome.name, e),
            }
        }
    }

    match report.into_result() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Sweepers failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
