//! Step executor tests against the scripted Terraform fake

mod support;

use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use support::{harness_config, idle_factory, FakeTerraform};
use tfacc_common::{InstanceRecord, State};
use tfacc_e2e::check::{resource_attr, resource_attr_set};
use tfacc_e2e::{
    CaseOutcome, E2eError, HarnessConfig, ProviderBindings, TestCase, TestRunner, TestStep,
};

const THING_A: &str = r#"resource "example_thing" "a" { name = "alpha" }"#;
const THING_A_RENAMED: &str = r#"resource "example_thing" "a" { name = "beta" }"#;

fn providers() -> ProviderBindings {
    ProviderBindings::new().with_proto_v6("example", idle_factory())
}

fn runner(fake: &Arc<FakeTerraform>) -> TestRunner {
    runner_with(fake, harness_config())
}

fn runner_with(fake: &Arc<FakeTerraform>, config: HarnessConfig) -> TestRunner {
    TestRunner::with_terraform(config, fake.clone())
}

fn case(steps: Vec<TestStep>) -> TestCase {
    let mut case = TestCase::new("example").with_providers(providers());
    case.steps = steps;
    case
}

#[tokio::test]
async fn test_applies_checks_and_destroys() {
    let fake = FakeTerraform::new();
    let step = TestStep::config(THING_A).with_check(|state| {
        resource_attr("example_thing.a", "name", "alpha")(state)?;
        resource_attr_set("example_thing.a", "id")(state)
    });

    let result = runner(&fake).run_case(&case(vec![step])).await.unwrap();

    assert_eq!(result.outcome, CaseOutcome::Passed);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(fake.count("apply"), 1);
    assert_eq!(fake.count("plan"), 3);
    assert_eq!(fake.count("refresh"), 2);
    assert_eq!(fake.commands().last().map(String::as_str), Some("destroy"));
    assert!(fake.remote().is_empty());
}

#[tokio::test]
async fn test_every_command_gets_reattach_handshake() {
    let fake = FakeTerraform::new();
    runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A)]))
        .await
        .unwrap();

    let calls = fake.calls();
    assert!(!calls.is_empty());
    for call in calls {
        let handshake = call.reattach.expect("handshake for every command");
        assert!(
            handshake.starts_with("registry.terraform.io/hashicorp/example=6|tcp|127.0.0.1:"),
            "{handshake}"
        );
    }
}

#[tokio::test]
async fn test_reattach_disabled_launches_nothing() {
    let fake = FakeTerraform::new();
    let mut config = harness_config();
    config.lifecycle.reattach = false;

    runner_with(&fake, config)
        .run_case(&case(vec![TestStep::config(THING_A)]))
        .await
        .unwrap();

    assert!(fake.calls().iter().all(|c| c.reattach.is_none()));
}

#[tokio::test]
async fn test_skipped_without_acceptance() {
    let fake = FakeTerraform::new();
    let config = HarnessConfig {
        acceptance: false,
        ..harness_config()
    };

    let result = runner_with(&fake, config)
        .run_case(&case(vec![TestStep::config(THING_A)]))
        .await
        .unwrap();

    assert_eq!(result.outcome, CaseOutcome::Skipped);
    assert!(result.steps.iter().all(|s| s.skipped));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_unit_test_runs_without_acceptance() {
    let fake = FakeTerraform::new();
    let config = HarnessConfig {
        acceptance: false,
        ..harness_config()
    };
    let mut unit = case(vec![TestStep::config(THING_A)]);
    unit.is_unit_test = true;

    let result = runner_with(&fake, config).run_case(&unit).await.unwrap();

    assert_eq!(result.outcome, CaseOutcome::Passed);
    assert_eq!(fake.count("apply"), 1);
}

#[tokio::test]
async fn test_validation_fails_before_any_command() {
    let fake = FakeTerraform::new();
    let err = runner(&fake).run_case(&case(vec![])).await.unwrap_err();

    assert!(matches!(err, E2eError::NoSteps));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_non_empty_plan_fails_with_rendered_plan() {
    let fake = FakeTerraform::new();
    fake.drift("example_thing.a");

    let err = runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A)]))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.starts_with("Step 1/1 error: After applying this test step, the plan was not empty."), "{message}");
    assert!(message.contains("# example_thing.a will be updated in-place"), "{message}");
    // Applied resources are still destroyed
    assert_eq!(fake.commands().last().map(String::as_str), Some("destroy"));
    assert!(fake.remote().is_empty());
}

#[tokio::test]
async fn test_non_empty_plan_after_refresh() {
    let fake = FakeTerraform::new();
    fake.refresh_changes("example_thing.a", "name", "drifted");

    let err = runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A)]))
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        E2eError::Step { source, .. }
            if matches!(**source, E2eError::NonEmptyPlan { after_refresh: true, .. })
    ));
    assert!(err
        .to_string()
        .contains("After applying this test step and performing a `terraform refresh`, the plan was not empty."));
}

#[tokio::test]
async fn test_expected_non_empty_plan_is_tolerated() {
    let fake = FakeTerraform::new();
    fake.drift("example_thing.a");
    let step = TestStep {
        expect_non_empty_plan: true,
        ..TestStep::config(THING_A)
    };

    let result = runner(&fake).run_case(&case(vec![step])).await.unwrap();
    assert_eq!(result.outcome, CaseOutcome::Passed);
}

#[tokio::test]
async fn test_skipping_post_apply_refresh() {
    let fake = FakeTerraform::new();
    fake.refresh_changes("example_thing.a", "name", "drifted");
    let config = HarnessConfig {
        refresh_after_apply: false,
        ..harness_config()
    };

    runner_with(&fake, config)
        .run_case(&case(vec![TestStep::config(THING_A)]))
        .await
        .unwrap();

    // Only the pre-apply refresh ran, before anything existed
    assert_eq!(fake.count("refresh"), 1);
}

#[tokio::test]
async fn test_expected_error_matches() {
    let fake = FakeTerraform::new();
    fake.fail("apply", "Error: quota exceeded for example_thing");
    let step = TestStep::config(THING_A)
        .with_expect_error(Regex::new("quota exceeded").unwrap());

    let result = runner(&fake).run_case(&case(vec![step])).await.unwrap();

    assert_eq!(result.outcome, CaseOutcome::Passed);
    // Nothing was created, so nothing is destroyed
    assert_eq!(fake.count("destroy"), 0);
}

#[tokio::test]
async fn test_expected_error_missing() {
    let fake = FakeTerraform::new();
    let step = TestStep::config(THING_A).with_expect_error(Regex::new("boom").unwrap());

    let err = runner(&fake).run_case(&case(vec![step])).await.unwrap_err();
    assert_eq!(err.to_string(), "Step 1/1 error: expected an error but got none");
    assert_eq!(fake.count("destroy"), 1);
}

#[tokio::test]
async fn test_expected_error_mismatch() {
    let fake = FakeTerraform::new();
    fake.fail("apply", "Error: permission denied");
    let step = TestStep::config(THING_A).with_expect_error(Regex::new("quota").unwrap());

    let err = runner(&fake).run_case(&case(vec![step])).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("expected an error with pattern (quota)"), "{message}");
    assert!(message.contains("permission denied"), "{message}");
}

#[tokio::test]
async fn test_command_errors_keep_stderr() {
    let fake = FakeTerraform::new();
    fake.fail("apply", "Error: permission denied");

    let err = runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A)]))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Step 1/1 error: Error running apply: terraform apply: Error: permission denied"
    );
}

#[tokio::test]
async fn test_error_check_can_swallow_errors() {
    let fake = FakeTerraform::new();
    fake.fail("apply", "Error: flaky");
    let seen = Arc::new(AtomicUsize::new(0));

    let mut tolerant = case(vec![TestStep::config(THING_A)]);
    let counter = seen.clone();
    tolerant.error_check = Some(Arc::new(move |e: E2eError| {
        counter.fetch_add(1, Ordering::SeqCst);
        if e.to_string().contains("flaky") {
            Ok(())
        } else {
            Err(e)
        }
    }));

    let result = runner(&fake).run_case(&tolerant).await.unwrap();
    assert_eq!(result.outcome, CaseOutcome::Passed);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_step_stops_remaining_steps() {
    let fake = FakeTerraform::new();
    let failing = TestStep::config(THING_A).with_check(|_| anyhow::bail!("bad attribute"));
    let never = TestStep::config(THING_A_RENAMED);

    let err = runner(&fake)
        .run_case(&case(vec![failing, never]))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Step 1/2 error: Check failed: bad attribute");
    assert_eq!(fake.count("apply"), 1);
    assert_eq!(fake.count("destroy"), 1);
}

#[tokio::test]
async fn test_update_step() {
    let fake = FakeTerraform::new();
    let steps = vec![
        TestStep::config(THING_A),
        TestStep::config(THING_A_RENAMED)
            .with_check(|state| resource_attr("example_thing.a", "name", "beta")(state)),
    ];

    let result = runner(&fake).run_case(&case(steps)).await.unwrap();
    assert_eq!(result.steps.len(), 2);
    assert_eq!(fake.count("apply"), 2);
}

#[tokio::test]
async fn test_destroy_step_checks_prior_state() {
    let fake = FakeTerraform::new();
    let destroy = TestStep {
        destroy: true,
        ..TestStep::config(THING_A)
            .with_check(|state| resource_attr("example_thing.a", "name", "alpha")(state))
    };

    runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), destroy]))
        .await
        .unwrap();

    assert!(fake.count("plan -destroy") >= 1);
    assert!(fake.remote().is_empty());
    // Nothing left for the deferred destroy
    assert_eq!(fake.count("destroy"), 0);
}

#[tokio::test]
async fn test_plan_only_step() {
    let fake = FakeTerraform::new();
    let unchanged = TestStep {
        plan_only: true,
        ..TestStep::config(THING_A)
    };
    runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), unchanged]))
        .await
        .unwrap();
    assert_eq!(fake.count("apply"), 1);

    let fake = FakeTerraform::new();
    let changed = TestStep {
        plan_only: true,
        ..TestStep::config(THING_A_RENAMED)
    };
    let err = runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), changed]))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Step 2/2 error: After applying this test step"));
}

#[tokio::test]
async fn test_taint_missing_resource() {
    let fake = FakeTerraform::new();
    let step = TestStep {
        taint: vec!["example_thing.zzz".to_string()],
        ..TestStep::config(THING_A)
    };

    let err = runner(&fake).run_case(&case(vec![step])).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Step 1/1 error: Error when tainting resources: resource \"example_thing.zzz\" not found in state"
    );
    assert_eq!(fake.count("apply"), 0);
}

#[tokio::test]
async fn test_taint_replaces_resource() {
    let fake = FakeTerraform::new();
    let retaint = TestStep {
        taint: vec!["example_thing.a".to_string()],
        ..TestStep::config(THING_A)
    };

    runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), retaint]))
        .await
        .unwrap();

    assert_eq!(fake.count("taint example_thing.a"), 1);
    assert_eq!(fake.count("apply"), 2);
}

#[tokio::test]
async fn test_skip_fn_skips_step() {
    let fake = FakeTerraform::new();
    let skipped = TestStep {
        skip_fn: Some(Arc::new(|| -> anyhow::Result<bool> { Ok(true) })),
        ..TestStep::config(THING_A_RENAMED)
    };

    let result = runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), skipped]))
        .await
        .unwrap();

    assert!(!result.steps[0].skipped);
    assert!(result.steps[1].skipped);
    assert_eq!(fake.count("apply"), 1);
}

#[tokio::test]
async fn test_hooks_run() {
    let fake = FakeTerraform::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let (pre_check, pre_config) = (hits.clone(), hits.clone());
    let mut hooked = case(vec![TestStep {
        pre_config: Some(Arc::new(move || {
            pre_config.fetch_add(10, Ordering::SeqCst);
        })),
        ..TestStep::config(THING_A)
    }]);
    hooked.pre_check = Some(Arc::new(move || {
        pre_check.fetch_add(1, Ordering::SeqCst);
    }));

    runner(&fake).run_case(&hooked).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 11);
}

#[tokio::test]
async fn test_check_destroy_sees_last_state() {
    let fake = FakeTerraform::new();
    let checked = Arc::new(AtomicUsize::new(0));

    let counter = checked.clone();
    let case = case(vec![TestStep::config(THING_A)]).with_check_destroy(move |state| {
        assert!(state.binary_driven);
        counter.fetch_add(state.root.resources.len(), Ordering::SeqCst);
        Ok(())
    });

    runner(&fake).run_case(&case).await.unwrap();
    assert_eq!(checked.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_check_destroy_failure() {
    let fake = FakeTerraform::new();
    let case = case(vec![TestStep::config(THING_A)])
        .with_check_destroy(|_| anyhow::bail!("example_thing.a still exists"));

    let err = runner(&fake).run_case(&case).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Error running post-test destroy, there may be dangling resources: CheckDestroy failed: example_thing.a still exists"
    );
}

#[tokio::test]
async fn test_id_refresh_runs_once() {
    let fake = FakeTerraform::new();
    let mut refreshed = case(vec![
        TestStep::config(THING_A),
        TestStep::config(THING_A_RENAMED),
    ]);
    refreshed.id_refresh_name = Some("example_thing.a".to_string());

    runner(&fake).run_case(&refreshed).await.unwrap();

    // pre-apply + post-apply per step, plus one ID-only refresh
    assert_eq!(fake.count("refresh"), 5);
}

#[tokio::test]
async fn test_id_refresh_skipped_when_drift_expected() {
    let fake = FakeTerraform::new();
    fake.drift("example_thing.a");
    fake.refresh_changes("example_thing.a", "name", "drifted");
    let mut refreshed = case(vec![TestStep {
        expect_non_empty_plan: true,
        ..TestStep::config(THING_A)
    }]);
    refreshed.id_refresh_name = Some("example_thing.a".to_string());

    let result = runner(&fake).run_case(&refreshed).await.unwrap();

    assert_eq!(result.outcome, CaseOutcome::Passed);
    // pre-apply and post-apply only
    assert_eq!(fake.count("refresh"), 2);
}

#[tokio::test]
async fn test_step_level_providers_init_per_step() {
    let fake = FakeTerraform::new();
    let mut per_step = TestCase::new("per step");
    per_step.steps = vec![
        TestStep::config(THING_A).with_providers(providers()),
        TestStep::config(THING_A_RENAMED).with_providers(providers()),
    ];

    runner(&fake).run_case(&per_step).await.unwrap();
    assert_eq!(fake.count("init"), 2);
    assert!(fake.calls().iter().all(|c| c.reattach.is_some()));
}

#[tokio::test]
async fn test_import_verify() {
    let fake = FakeTerraform::new();
    let import = TestStep::import("example_thing.a").with_import_verify(&[]);

    runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), import]))
        .await
        .unwrap();

    let calls = fake.calls();
    let import_call = calls
        .iter()
        .find(|c| c.command == "import example_thing.a a-id")
        .expect("import ran");
    let apply_call = calls.iter().find(|c| c.command == "apply").unwrap();
    assert_ne!(import_call.dir, apply_call.dir);
}

#[tokio::test]
async fn test_import_verify_mismatch() {
    let fake = FakeTerraform::new();
    fake.import_changes("name", "imported");
    let import = TestStep::import("example_thing.a").with_import_verify(&[]);

    let err = runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), import]))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.starts_with("Step 2/2 error: ImportStateVerify attributes not equivalent."), "{message}");
    assert!(message.contains("name = \"imported\""), "{message}");
    assert!(message.contains("name = \"alpha\""), "{message}");
}

#[tokio::test]
async fn test_import_verify_ignores_prefixes() {
    let fake = FakeTerraform::new();
    fake.import_changes("name", "imported");
    let import = TestStep::import("example_thing.a").with_import_verify(&["name"]);

    runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), import]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_import_with_explicit_id_and_check() {
    let fake = FakeTerraform::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();

    let import = TestStep {
        import_state_id: Some("id".to_string()),
        import_state_id_prefix: "a-".to_string(),
        import_state_check: Some(Arc::new(move |instances: &[InstanceRecord]| {
            counter.fetch_add(instances.len(), Ordering::SeqCst);
            anyhow::ensure!(instances[0].id() == Some("a-id"), "wrong id");
            Ok(())
        })),
        ..TestStep::import("example_thing.a")
    };

    runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), import]))
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_import_id_func() {
    let fake = FakeTerraform::new();
    let import = TestStep {
        import_state_id_func: Some(Arc::new(|state: &State| {
            let id = state
                .resource("example_thing.a")
                .and_then(|r| r.id())
                .ok_or_else(|| anyhow::anyhow!("no example_thing.a"))?;
            Ok(id.to_string())
        })),
        ..TestStep::import("example_thing.a")
    };

    runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), import]))
        .await
        .unwrap();
    assert_eq!(fake.count("import example_thing.a a-id"), 1);
}

#[tokio::test]
async fn test_import_of_missing_object() {
    let fake = FakeTerraform::new();
    let import = TestStep {
        import_state_id: Some("nope".to_string()),
        ..TestStep::import("example_thing.a")
    }
    .with_expect_error(Regex::new("non-existent remote object").unwrap());

    runner(&fake)
        .run_case(&case(vec![TestStep::config(THING_A), import]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_import_without_config() {
    let fake = FakeTerraform::new();
    let import = TestStep {
        import_state_id: Some("a-id".to_string()),
        ..TestStep::import("example_thing.a")
    };

    let err = runner(&fake).run_case(&case(vec![import])).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Step 1/1 error: Cannot import state with no specified config"
    );
}

#[tokio::test]
async fn test_suite_counts() {
    let fake = FakeTerraform::new();
    let mut unit = case(vec![TestStep::config(THING_A)]);
    unit.is_unit_test = true;
    let broken = case(vec![]);
    let config = HarnessConfig {
        acceptance: false,
        ..harness_config()
    };

    let suite = runner_with(&fake, config)
        .run_suite(&[unit, broken, case(vec![TestStep::config(THING_A)])])
        .await;

    assert_eq!(suite.total, 3);
    assert_eq!(suite.passed, 1);
    assert_eq!(suite.failed, 1);
    assert_eq!(suite.skipped, 1);
    assert!(!suite.success());
    assert_eq!(suite.results[1].error.as_deref(), Some("steps must not be empty"));
}
