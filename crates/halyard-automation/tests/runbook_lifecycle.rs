//! Runbook lifecycle against the in-memory control plane: create, verify,
//! update the content hash, tear down, and the failure modes in between.

use std::sync::Arc;

use halyard_automation::{
    run_context, MemoryControlPlane, Operation, RunbookType, AUTOMATION_ACCOUNT,
    AUTOMATION_RUNBOOK, RESOURCE_GROUP,
};
use halyard_config::{parse_manifest, ManifestBuilder};
use halyard_core::{Manifest, ResourceAddr, ValidationError, Value};
use halyard_provisioner::{
    apply, destroy, expect_destroyed, expect_exists, plan, Cause, EngineSettings,
    FailureReason, Outcome, PlannedAction, ResourceStatus, RetryPolicy, RunContext, RunOutcome,
    RunSummary, VerifyError,
};

const RUNBOOK_URI: &str = "https://raw.githubusercontent.com/Azure/azure-quickstart-templates/master/101-automation-runbook-getvms/Runbooks/Get-AzureVMTutorial.ps1";
const RUNBOOK_HASH: &str = "115775B8FF2BE672D8A946BD0B489918C724DDE15A440373CA54461D53010A80";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Resource group, account and a PowerShellWorkflow runbook. `content` is
/// spliced into the `publish_content_link` block and `extra` into the
/// runbook body.
fn config(content: &str, extra: &str) -> String {
    format!(
        r#"
resource "azurerm_resource_group" "test" {{
  name     = "acctestRG-4711"
  location = "westeurope"
}}

resource "azurerm_automation_account" "test" {{
  name                = "acctest-4711"
  location            = "${{azurerm_resource_group.test.location}}"
  resource_group_name = "${{azurerm_resource_group.test.name}}"
  sku {{
    name = "Free"
  }}
}}

resource "azurerm_automation_runbook" "test" {{
  name                = "Get-AzureVMTutorial"
  location            = "${{azurerm_resource_group.test.location}}"
  resource_group_name = "${{azurerm_resource_group.test.name}}"
  account_name        = "${{azurerm_automation_account.test.name}}"
  log_verbose         = "true"
  log_progress        = "true"
  description         = "This is a test runbook for terraform acceptance test"
  runbook_type        = "PowerShellWorkflow"

  publish_content_link {{
    uri     = "{RUNBOOK_URI}"
    version = "1.0.0.0"
    {content}
  }}
  {extra}
}}
"#
    )
}

fn without_hash() -> Manifest {
    parse_manifest(&config("", "")).expect("parse")
}

fn with_hash() -> Manifest {
    let hash = format!(
        r#"hash {{
      algorithm = "SHA256"
      value     = "{RUNBOOK_HASH}"
    }}"#
    );
    parse_manifest(&config(&hash, "")).expect("parse")
}

fn group() -> ResourceAddr {
    ResourceAddr::new(RESOURCE_GROUP, "test")
}

fn account() -> ResourceAddr {
    ResourceAddr::new(AUTOMATION_ACCOUNT, "test")
}

fn runbook() -> ResourceAddr {
    ResourceAddr::new(AUTOMATION_RUNBOOK, "test")
}

fn setup() -> (Arc<MemoryControlPlane>, RunContext) {
    init_tracing();
    let plane = Arc::new(MemoryControlPlane::new());
    let ctx = run_context(plane.clone()).with_settings(EngineSettings {
        retry: RetryPolicy::new(3, 1, 5).without_jitter(),
        verify: RetryPolicy::new(3, 1, 5).without_jitter(),
        ..EngineSettings::default()
    });
    (plane, ctx)
}

fn converged(outcome: RunOutcome) -> RunSummary {
    match outcome {
        RunOutcome::Converged(summary) => summary,
        other => panic!("expected convergence, got {other:#?}"),
    }
}

fn partial(outcome: RunOutcome) -> RunSummary {
    match outcome {
        RunOutcome::Partial(summary) => summary,
        other => panic!("expected a partial run, got {other:#?}"),
    }
}

fn outcome_of<'a>(summary: &'a RunSummary, addr: &ResourceAddr) -> &'a Outcome {
    &summary
        .get(addr)
        .unwrap_or_else(|| panic!("no result for {addr}"))
        .outcome
}

#[tokio::test]
async fn runbook_is_created_and_reports_its_type() {
    let (plane, ctx) = setup();

    let summary = converged(apply(&ctx, &without_hash()).await.unwrap());

    for addr in [group(), account(), runbook()] {
        assert_eq!(summary.get(&addr).unwrap().action, Some(PlannedAction::Create));
    }
    let observed = expect_exists(
        plane.as_ref(),
        &ctx.store,
        &runbook(),
        &[
            ("runbook_type", RunbookType::PowerShellWorkflow.into()),
            ("state", Value::from("Published")),
            ("publish_content_link.version", Value::from("1.0.0.0")),
        ],
    )
    .await
    .unwrap();
    assert_eq!(
        observed["id"],
        Value::from(
            "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/acctestRG-4711\
             /providers/Microsoft.Automation/automationAccounts/acctest-4711/runbooks/Get-AzureVMTutorial"
        )
    );
    assert_eq!(observed["log_verbose"], Value::Bool(true));
    assert_eq!(
        ctx.store.get(&runbook()).unwrap().status,
        ResourceStatus::Created
    );
}

#[tokio::test]
async fn parents_are_created_before_children() {
    let (plane, ctx) = setup();

    converged(apply(&ctx, &with_hash()).await.unwrap());

    let calls = plane.calls();
    let at = |call: &str| {
        calls
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("no `{call}` in {calls:?}"))
    };
    assert!(
        at("create azurerm_resource_group acctestRG-4711")
            < at("create azurerm_automation_account acctest-4711")
    );
    assert!(
        at("create azurerm_automation_account acctest-4711")
            < at("create azurerm_automation_runbook Get-AzureVMTutorial")
    );
}

#[tokio::test]
async fn replanning_after_apply_is_empty() {
    let (plane, ctx) = setup();
    let manifest = with_hash();
    converged(apply(&ctx, &manifest).await.unwrap());
    plane.clear_calls();

    let plan = plan(&ctx, &manifest).await.unwrap();
    assert!(!plan.has_changes(), "{plan:#?}");
    assert_eq!(plan.get(&runbook()).unwrap().cause, Cause::InSync);

    let summary = converged(apply(&ctx, &manifest).await.unwrap());
    assert!(summary.results.iter().all(|r| r.action == Some(PlannedAction::NoOp)));
    assert!(plane.calls().iter().all(|c| c.starts_with("get ")), "{:?}", plane.calls());
}

#[tokio::test]
async fn adding_a_content_hash_updates_only_the_link() {
    let (plane, ctx) = setup();
    converged(apply(&ctx, &without_hash()).await.unwrap());
    let etag_before = plane
        .object(AUTOMATION_RUNBOOK, &["acctestRG-4711", "acctest-4711", "Get-AzureVMTutorial"])
        .unwrap()["etag"]
        .clone();

    let manifest = with_hash();
    let plan = plan(&ctx, &manifest).await.unwrap();
    let entry = plan.get(&runbook()).unwrap();
    assert_eq!(
        entry.action,
        PlannedAction::Update {
            changed: vec!["publish_content_link.hash".into()]
        }
    );
    assert_eq!(entry.cause, Cause::Drift);
    assert_eq!(plan.get(&account()).unwrap().action, PlannedAction::NoOp);

    let summary = converged(apply(&ctx, &manifest).await.unwrap());
    assert_eq!(
        summary.get(&runbook()).unwrap().action,
        Some(PlannedAction::Update {
            changed: vec!["publish_content_link.hash".into()]
        })
    );
    assert_eq!(plane.count_calls(Operation::Update, AUTOMATION_RUNBOOK), 1);
    assert_eq!(plane.count_calls(Operation::Update, AUTOMATION_ACCOUNT), 0);

    let stored = plane
        .object(AUTOMATION_RUNBOOK, &["acctestRG-4711", "acctest-4711", "Get-AzureVMTutorial"])
        .unwrap();
    assert_ne!(stored["etag"], etag_before);
    expect_exists(
        plane.as_ref(),
        &ctx.store,
        &runbook(),
        &[
            ("publish_content_link.hash.algorithm", Value::from("SHA256")),
            ("publish_content_link.hash.value", Value::from(RUNBOOK_HASH)),
        ],
    )
    .await
    .unwrap();
    assert_eq!(ctx.store.get(&runbook()).unwrap().status, ResourceStatus::Updated);
}

#[tokio::test]
async fn destroy_removes_everything_children_first() {
    let (plane, ctx) = setup();
    let manifest = with_hash();
    converged(apply(&ctx, &manifest).await.unwrap());
    let before = ctx.store.snapshot();
    plane.clear_calls();

    let summary = converged(destroy(&ctx, &manifest).await.unwrap());

    assert_eq!(summary.get(&runbook()).unwrap().action, Some(PlannedAction::Delete));
    expect_destroyed(plane.as_ref(), &before.resources, AUTOMATION_RUNBOOK)
        .await
        .unwrap();
    expect_destroyed(plane.as_ref(), &before.resources, RESOURCE_GROUP)
        .await
        .unwrap();
    assert!(plane.is_empty());
    assert!(ctx.store.is_empty());

    let calls = plane.calls();
    let deleted = |resource_type: &str| {
        calls
            .iter()
            .position(|c| c.starts_with(&format!("delete {resource_type} ")))
            .unwrap()
    };
    assert!(deleted(AUTOMATION_RUNBOOK) < deleted(AUTOMATION_ACCOUNT));
    assert!(deleted(AUTOMATION_ACCOUNT) < deleted(RESOURCE_GROUP));
}

#[tokio::test]
async fn destroy_waits_out_a_lagging_read() {
    let (plane, ctx) = setup();
    let manifest = without_hash();
    converged(apply(&ctx, &manifest).await.unwrap());
    plane.stale_reads(AUTOMATION_RUNBOOK, 1);

    let summary = converged(destroy(&ctx, &manifest).await.unwrap());

    // The first read after the delete still saw the runbook.
    assert_eq!(summary.get(&runbook()).unwrap().retries, 1);
    assert_eq!(plane.count_calls(Operation::Delete, AUTOMATION_RUNBOOK), 1);
    assert!(plane.is_empty());
}

#[tokio::test]
async fn runbook_that_never_goes_away_fails_teardown() {
    let (plane, ctx) = setup();
    let manifest = without_hash();
    converged(apply(&ctx, &manifest).await.unwrap());
    let before = ctx.store.snapshot();
    plane.sticky_deletes(AUTOMATION_RUNBOOK);

    let summary = partial(destroy(&ctx, &manifest).await.unwrap());

    match outcome_of(&summary, &runbook()) {
        Outcome::Failed(FailureReason::DriftAfterRetryBudget { attempts, drift }) => {
            assert_eq!(*attempts, 3);
            assert_eq!(
                drift[0].to_string(),
                "name: expected (absent), got \"Get-AzureVMTutorial\""
            );
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(outcome_of(&summary, &account()), &Outcome::Blocked { by: runbook() });
    assert_eq!(outcome_of(&summary, &group()), &Outcome::Blocked { by: runbook() });
    assert_eq!(plane.count_calls(Operation::Delete, AUTOMATION_ACCOUNT), 0);

    assert_eq!(
        expect_destroyed(plane.as_ref(), &before.resources, AUTOMATION_RUNBOOK).await,
        Err(VerifyError::StillExists { addr: runbook() })
    );
}

#[tokio::test]
async fn remote_type_mismatch_is_drift_not_absence() {
    let (plane, ctx) = setup();
    let manifest = without_hash();
    converged(apply(&ctx, &manifest).await.unwrap());
    plane.override_field(AUTOMATION_RUNBOOK, "runbook_type", RunbookType::PowerShell);

    let err = expect_exists(
        plane.as_ref(),
        &ctx.store,
        &runbook(),
        &[("runbook_type", RunbookType::PowerShellWorkflow.into())],
    )
    .await
    .unwrap_err();
    assert_eq!(
        err,
        VerifyError::Mismatch {
            addr: runbook(),
            field: "runbook_type".into(),
            expected: Value::from("PowerShellWorkflow"),
            actual: Value::from("PowerShell"),
        }
    );

    let plan = plan(&ctx, &manifest).await.unwrap();
    let entry = plan.get(&runbook()).unwrap();
    assert_eq!(entry.cause, Cause::Drift);
    assert_eq!(
        entry.drift[0].to_string(),
        "runbook_type: expected \"PowerShellWorkflow\", got \"PowerShell\""
    );

    let summary = partial(apply(&ctx, &manifest).await.unwrap());
    match outcome_of(&summary, &runbook()) {
        Outcome::Failed(FailureReason::DriftAfterRetryBudget { drift, .. }) => {
            assert_eq!(drift.len(), 1);
            assert_eq!(drift[0].field, "runbook_type");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(ctx.store.get(&runbook()).unwrap().status, ResourceStatus::Drifted);
}

#[tokio::test]
async fn write_only_content_link_needs_ignore_changes() {
    let (plane, ctx) = setup();
    plane.write_only(AUTOMATION_RUNBOOK, "publish_content_link");

    let summary = partial(apply(&ctx, &without_hash()).await.unwrap());
    match outcome_of(&summary, &runbook()) {
        Outcome::Failed(FailureReason::DriftAfterRetryBudget { drift, .. }) => {
            assert_eq!(drift[0].field, "publish_content_link");
            assert_eq!(drift[0].actual, None);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(outcome_of(&summary, &account()), &Outcome::Converged);

    let (plane, ctx) = setup();
    plane.write_only(AUTOMATION_RUNBOOK, "publish_content_link");
    let manifest = parse_manifest(&config(
        "",
        r#"lifecycle {
    ignore_changes = ["publish_content_link"]
  }"#,
    ))
    .unwrap();

    converged(apply(&ctx, &manifest).await.unwrap());
    assert!(!plan(&ctx, &manifest).await.unwrap().has_changes());
    // Written, just never read back.
    let stored = plane
        .object(AUTOMATION_RUNBOOK, &["acctestRG-4711", "acctest-4711", "Get-AzureVMTutorial"])
        .unwrap();
    assert!(stored.contains_key("publish_content_link"));
}

#[tokio::test]
async fn throttled_calls_are_retried() {
    let (plane, ctx) = setup();
    plane.fail_transiently(Operation::Create, AUTOMATION_RUNBOOK, 2);
    plane.fail_transiently(Operation::Get, AUTOMATION_ACCOUNT, 1);

    let summary = converged(apply(&ctx, &with_hash()).await.unwrap());

    assert_eq!(summary.get(&runbook()).unwrap().retries, 2);
    assert_eq!(summary.get(&account()).unwrap().retries, 1);
    assert_eq!(plane.count_calls(Operation::Create, AUTOMATION_RUNBOOK), 3);
}

#[tokio::test]
async fn persistent_throttling_exhausts_the_retry_budget() {
    let (plane, ctx) = setup();
    plane.fail_transiently(Operation::Create, AUTOMATION_RUNBOOK, 10);

    let summary = partial(apply(&ctx, &with_hash()).await.unwrap());

    match outcome_of(&summary, &runbook()) {
        Outcome::Failed(FailureReason::TransientExhausted { attempts, last }) => {
            assert_eq!(*attempts, 3);
            assert!(last.contains("429"), "{last}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!plane.contains(AUTOMATION_RUNBOOK, &["acctestRG-4711", "acctest-4711", "Get-AzureVMTutorial"]));
}

#[tokio::test]
async fn malformed_hash_fails_before_any_runbook_call() {
    let (plane, ctx) = setup();
    let manifest = parse_manifest(&config(
        r#"hash {
      algorithm = "SHA256"
      value     = "not-a-digest"
    }"#,
        "",
    ))
    .unwrap();

    let summary = partial(apply(&ctx, &manifest).await.unwrap());

    match outcome_of(&summary, &runbook()) {
        Outcome::Failed(FailureReason::Validation(ValidationError::Invalid { field, .. })) => {
            assert_eq!(field, "publish_content_link.hash.value");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(plane.calls().iter().all(|c| !c.contains(AUTOMATION_RUNBOOK)));
    assert_eq!(outcome_of(&summary, &account()), &Outcome::Converged);
}

#[tokio::test]
async fn unsupported_sku_blocks_the_runbook() {
    let (plane, ctx) = setup();
    let source = config("", "").replace(r#"name = "Free""#, r#"name = "Premium""#);
    let manifest = parse_manifest(&source).unwrap();

    let summary = partial(apply(&ctx, &manifest).await.unwrap());

    assert_eq!(
        outcome_of(&summary, &account()),
        &Outcome::Failed(FailureReason::Validation(ValidationError::NotAllowed {
            field: "sku.name".into(),
            value: "Premium".into(),
            allowed: "Free, Basic".into(),
        }))
    );
    assert_eq!(outcome_of(&summary, &runbook()), &Outcome::Blocked { by: account() });
    assert_eq!(plane.len(), 1);
}

#[tokio::test]
async fn structurally_built_manifest_reconciles_too() {
    let (plane, ctx) = setup();
    let manifest = ManifestBuilder::new()
        .resource(RESOURCE_GROUP, "ops", |r| {
            r.set("name", "ops-rg").set("location", "northeurope")
        })
        .resource(AUTOMATION_ACCOUNT, "ops", |r| {
            r.set("name", "ops-automation")
                .reference("location", RESOURCE_GROUP, "ops", "location")
                .reference("resource_group_name", RESOURCE_GROUP, "ops", "name")
                .block("sku", |b| b.set("name", "Basic"))
        })
        .resource(AUTOMATION_RUNBOOK, "cleanup", |r| {
            r.set("name", "Remove-StaleDisks")
                .reference("location", RESOURCE_GROUP, "ops", "location")
                .reference("resource_group_name", RESOURCE_GROUP, "ops", "name")
                .reference("account_name", AUTOMATION_ACCOUNT, "ops", "name")
                .set("log_verbose", false)
                .set("log_progress", true)
                .set("runbook_type", RunbookType::Script)
                .block("publish_content_link", |b| {
                    b.set("uri", "https://example.test/Remove-StaleDisks.py")
                })
        })
        .build()
        .unwrap();

    converged(apply(&ctx, &manifest).await.unwrap());

    let cleanup = ResourceAddr::new(AUTOMATION_RUNBOOK, "cleanup");
    expect_exists(
        plane.as_ref(),
        &ctx.store,
        &cleanup,
        &[
            ("runbook_type", Value::from("Script")),
            ("log_verbose", Value::Bool(false)),
        ],
    )
    .await
    .unwrap();
    assert_eq!(
        ctx.store.get(&cleanup).unwrap().declared["account_name"],
        Value::from("ops-automation")
    );
}
