//! End-to-end closure scenarios against the orchestration engine.

use std::sync::Arc;

use chrono::{Duration, Utc};
use closing_audit::{replay, AuditAction, AuditQuery, AuditStore, InMemoryAuditStore};
use closing_calculators::{CalculatorRegistry, DoubtfulReceivablesProvision, StaticLedger};
use closing_controls::{builtin_catalog, ControlCatalog};
use closing_core::{
    ActorId, ClosureType, InMemoryEventPublisher, PeriodAttributes, StepCategory, StepKind,
};
use closing_infra::{InMemoryNotificationSink, WorkReceiver};
use closing_workflow::{
    ClosureEngine, ClosureError, ExecutionCondition, PeriodStatus, StepOutcome, StepStatus,
    StepTemplate, TemplateError, WorkflowTemplate,
};
use rust_decimal::Decimal;

struct Harness {
    engine: ClosureEngine,
    receiver: WorkReceiver,
    audit: Arc<InMemoryAuditStore>,
    notifications: Arc<InMemoryNotificationSink>,
    events: Arc<InMemoryEventPublisher>,
}

async fn harness(ledger: StaticLedger, controls: ControlCatalog) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("closing_workflow=debug")
        .try_init();

    let audit = Arc::new(InMemoryAuditStore::new());
    let notifications = Arc::new(InMemoryNotificationSink::new());
    let events = Arc::new(InMemoryEventPublisher::new());

    let (engine, receiver) = ClosureEngine::builder()
        .audit(audit.clone())
        .controls(Arc::new(controls))
        .ledger(Arc::new(ledger))
        .notifications(notifications.clone())
        .events(events.clone())
        .build();

    Harness {
        engine,
        receiver,
        audit,
        notifications,
        events,
    }
}

fn monthly_attributes() -> PeriodAttributes {
    PeriodAttributes::new("retail", ClosureType::Monthly, Utc::now() + Duration::days(10))
}

fn actor(name: &str) -> ActorId {
    ActorId::new(name)
}

/// Template of the canonical propagation scenario: A automatic, B
/// automatic depending on A, C manual mandatory depending on A.
fn abc_template() -> WorkflowTemplate {
    WorkflowTemplate::new("abc", "propagation scenario")
        .add_step(
            StepTemplate::new("a", "Step A", StepCategory::Preparation, StepKind::Automatic)
                .with_order(10),
        )
        .add_step(
            StepTemplate::new("b", "Step B", StepCategory::Preparation, StepKind::Automatic)
                .with_order(20)
                .depends_on("a"),
        )
        .add_step(
            StepTemplate::new("c", "Step C", StepCategory::Validation, StepKind::Manual)
                .with_order(30)
                .depends_on("a")
                .mandatory(),
        )
}

#[tokio::test]
async fn cyclic_template_creates_nothing() {
    let h = harness(StaticLedger::new(), ControlCatalog::new()).await;

    let cyclic = WorkflowTemplate::new("cyclic", "")
        .add_step(
            StepTemplate::new("x", "X", StepCategory::Preparation, StepKind::Automatic)
                .depends_on("y"),
        )
        .add_step(
            StepTemplate::new("y", "Y", StepCategory::Preparation, StepKind::Automatic)
                .depends_on("x"),
        );

    let err = h.engine.templates().register(cyclic).await.unwrap_err();
    assert!(matches!(err, TemplateError::CycleDetected(_)));
    assert!(h.engine.templates().list().await.is_empty());
}

#[tokio::test]
async fn propagation_scenario_reaches_pending_approval() {
    let mut h = harness(StaticLedger::new(), ControlCatalog::new()).await;
    let operator = actor("jdupont");

    let template_id = h.engine.templates().register(abc_template()).await.unwrap();
    let period_id = h
        .engine
        .create_period(template_id, "2026-07", monthly_attributes())
        .await
        .unwrap();

    // Only A has no dependencies.
    let ready = h.engine.start_closure(period_id, operator.clone()).await.unwrap();
    let a_id = h.engine.step_id_by_code(period_id, "a").await.unwrap();
    assert_eq!(ready, vec![a_id]);

    let first = h.receiver.next().await.unwrap();
    assert_eq!(first.step_code, "a");
    assert!(first.auto_executable);

    // Completing A auto-executes B and leaves manual C pending but ready.
    let outcome = h.engine.execute_step(a_id, operator.clone()).await.unwrap();
    assert_eq!(outcome, StepOutcome::Completed);

    let snapshot = h.engine.get_period_status(period_id).await.unwrap();
    assert_eq!(snapshot.period.status, PeriodStatus::InProgress);
    assert!((snapshot.period.completion_percentage - 200.0 / 3.0).abs() < 0.01);

    let by_code = |code: &str| {
        snapshot
            .steps
            .iter()
            .find(|s| s.code == code)
            .map(|s| s.status)
    };
    assert_eq!(by_code("a"), Some(StepStatus::Completed));
    assert_eq!(by_code("b"), Some(StepStatus::Completed));
    assert_eq!(by_code("c"), Some(StepStatus::Pending));

    // The assignee of C was notified that the step is ready.
    let sent = h.notifications.sent().await;
    assert!(sent.iter().any(|n| n.template == "step_ready"));

    // Completing mandatory C drives the period to pending approval.
    let c_id = h.engine.step_id_by_code(period_id, "c").await.unwrap();
    let outcome = h.engine.execute_step(c_id, operator.clone()).await.unwrap();
    assert_eq!(outcome, StepOutcome::AwaitingManual);
    h.engine
        .complete_manual_step(c_id, operator.clone(), None)
        .await
        .unwrap();

    let snapshot = h.engine.get_period_status(period_id).await.unwrap();
    assert_eq!(snapshot.period.status, PeriodStatus::PendingApproval);
    assert!((snapshot.period.completion_percentage - 100.0).abs() < f64::EPSILON);

    let score = snapshot.period.compliance_score.expect("score must be set");
    assert!((0.0..=100.0).contains(&score));

    assert_eq!(h.events.matching("period.pending_approval").await.len(), 1);
}

#[tokio::test]
async fn completion_percentage_is_monotonic_in_audit_trail() {
    let h = harness(StaticLedger::new(), ControlCatalog::new()).await;
    let operator = actor("jdupont");

    let template_id = h.engine.templates().register(abc_template()).await.unwrap();
    let period_id = h
        .engine
        .create_period(template_id, "2026-07", monthly_attributes())
        .await
        .unwrap();

    h.engine.start_closure(period_id, operator.clone()).await.unwrap();
    let a_id = h.engine.step_id_by_code(period_id, "a").await.unwrap();
    h.engine.execute_step(a_id, operator.clone()).await.unwrap();
    let c_id = h.engine.step_id_by_code(period_id, "c").await.unwrap();
    h.engine.execute_step(c_id, operator.clone()).await.unwrap();
    h.engine
        .complete_manual_step(c_id, operator, None)
        .await
        .unwrap();

    let entries = h
        .engine
        .get_audit_trail(period_id, AuditQuery::default())
        .await
        .unwrap();

    let mut last = -1.0;
    for entry in &entries {
        if let Some(pct) = entry
            .after_state
            .get("completion_percentage")
            .and_then(|v| v.as_f64())
        {
            assert!(
                pct >= last,
                "completion went backwards: {} after {}",
                pct,
                last
            );
            last = pct;
        }
    }
    assert!((last - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn blocking_control_failure_blocks_the_period() {
    // Suspense account carries a balance; the counterpart keeps the
    // trial balance in equilibrium so only the suspense control fails.
    let ledger = StaticLedger::new()
        .with_account("471000", Decimal::new(10_000, 2))
        .with_account("512000", Decimal::new(-10_000, 2));
    let h = harness(ledger, builtin_catalog().await).await;
    let operator = actor("jdupont");

    let template = WorkflowTemplate::new("controlled", "")
        .add_step(
            StepTemplate::new("prep", "Prepare", StepCategory::Preparation, StepKind::Automatic)
                .mandatory(),
        )
        .add_step(
            StepTemplate::new(
                "controls.final",
                "Final controls",
                StepCategory::Validation,
                StepKind::Control,
            )
            .depends_on("prep")
            .mandatory(),
        );

    let template_id = h.engine.templates().register(template).await.unwrap();
    let period_id = h
        .engine
        .create_period(template_id, "2026-07", monthly_attributes())
        .await
        .unwrap();

    h.engine.start_closure(period_id, operator.clone()).await.unwrap();
    let prep_id = h.engine.step_id_by_code(period_id, "prep").await.unwrap();
    h.engine.execute_step(prep_id, operator.clone()).await.unwrap();

    let control_id = h
        .engine
        .step_id_by_code(period_id, "controls.final")
        .await
        .unwrap();
    let err = h
        .engine
        .execute_step(control_id, operator.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ClosureError::ComplianceViolation { .. }));

    let snapshot = h.engine.get_period_status(period_id).await.unwrap();
    let control_step = snapshot
        .steps
        .iter()
        .find(|s| s.code == "controls.final")
        .unwrap();

    assert_eq!(control_step.status, StepStatus::Failed);
    assert_eq!(control_step.controls_failed, 1);
    assert!(control_step.controls_passed >= 3);
    assert!(control_step
        .error_message
        .as_deref()
        .unwrap()
        .contains("suspense"));

    // Every mandatory step is settled and one failed: the period is
    // surfaced as Error, never PendingApproval.
    assert_eq!(snapshot.period.status, PeriodStatus::Error);
    assert!(snapshot.period.compliance_score.is_none());
}

#[tokio::test]
async fn concurrent_execution_has_exactly_one_winner() {
    let h = harness(StaticLedger::new(), ControlCatalog::new()).await;

    let template = WorkflowTemplate::new("single", "").add_step(StepTemplate::new(
        "only",
        "Only step",
        StepCategory::Preparation,
        StepKind::Automatic,
    ));

    let template_id = h.engine.templates().register(template).await.unwrap();
    let period_id = h
        .engine
        .create_period(template_id, "2026-07", monthly_attributes())
        .await
        .unwrap();
    h.engine
        .start_closure(period_id, actor("scheduler"))
        .await
        .unwrap();

    let step_id = h.engine.step_id_by_code(period_id, "only").await.unwrap();

    let (left, right) = tokio::join!(
        h.engine.execute_step(step_id, actor("worker-1")),
        h.engine.execute_step(step_id, actor("worker-2")),
    );

    let successes = [&left, &right].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one execution must win");

    let loser = if left.is_ok() { right } else { left };
    assert!(matches!(
        loser,
        Err(ClosureError::ConcurrencyConflict { .. }) | Err(ClosureError::InvalidState { .. })
    ));

    // Exactly one claim and one completion were recorded.
    let entries = h.audit.entries(period_id).await.unwrap();
    let count = |action: AuditAction| entries.iter().filter(|e| e.action == action).count();
    assert_eq!(count(AuditAction::StepStarted), 1);
    assert_eq!(count(AuditAction::StepCompleted), 1);
}

#[tokio::test]
async fn execution_conditions_exclude_steps_at_materialization() {
    let h = harness(StaticLedger::new(), ControlCatalog::new()).await;
    let operator = actor("jdupont");

    let annual_only = ExecutionCondition::closure_type_in([ClosureType::Annual]);
    let template = WorkflowTemplate::new("conditional", "")
        .add_step(StepTemplate::new(
            "monthly.core",
            "Core",
            StepCategory::Preparation,
            StepKind::Automatic,
        ))
        .add_step(
            StepTemplate::new(
                "annual.inventory",
                "Physical inventory",
                StepCategory::Validation,
                StepKind::Manual,
            )
            .with_condition(annual_only),
        );

    let template_id = h.engine.templates().register(template).await.unwrap();
    let period_id = h
        .engine
        .create_period(template_id, "2026-07", monthly_attributes())
        .await
        .unwrap();

    h.engine.start_closure(period_id, operator).await.unwrap();

    let snapshot = h.engine.get_period_status(period_id).await.unwrap();
    assert_eq!(snapshot.steps.len(), 1);
    assert_eq!(snapshot.steps[0].code, "monthly.core");
    assert!(h
        .engine
        .step_id_by_code(period_id, "annual.inventory")
        .await
        .is_err());
}

#[tokio::test]
async fn full_closure_with_calculation_controls_and_audit_replay() {
    let operator = actor("jdupont");
    let approver = actor("cfo");

    let calculators = CalculatorRegistry::new();
    calculators
        .register(
            "provisions.compute",
            Arc::new(DoubtfulReceivablesProvision::new(
                vec!["411".to_string()],
                Decimal::new(5, 2),
            )),
        )
        .await;

    // Balanced ledger, empty suspense accounts, receivables to provision.
    let (engine, _receiver) = ClosureEngine::builder()
        .controls(Arc::new(builtin_catalog().await))
        .ledger(Arc::new(
            StaticLedger::new()
                .with_account("411000", Decimal::new(100_000, 2))
                .with_account("701000", Decimal::new(-100_000, 2)),
        ))
        .calculators(calculators)
        .build();

    let template = WorkflowTemplate::new("monthly-close", "full closing run")
        .add_step(
            StepTemplate::new(
                "prep.lock_journals",
                "Lock journals",
                StepCategory::Preparation,
                StepKind::Automatic,
            )
            .mandatory()
            .with_order(10),
        )
        .add_step(
            StepTemplate::new(
                "provisions.compute",
                "Compute provisions",
                StepCategory::Provisions,
                StepKind::Calculation,
            )
            .depends_on("prep.lock_journals")
            .mandatory()
            .auto_executable(true)
            .with_order(20),
        )
        .add_step(
            StepTemplate::new(
                "controls.final",
                "Final controls",
                StepCategory::Validation,
                StepKind::Control,
            )
            .depends_on("provisions.compute")
            .mandatory()
            .auto_executable(true)
            .with_order(30),
        );

    let template_id = engine.templates().register(template).await.unwrap();
    let period_id = engine
        .create_period(template_id, "2026-07", monthly_attributes())
        .await
        .unwrap();

    engine.start_closure(period_id, operator.clone()).await.unwrap();

    // One call drives the whole chain through auto-execution.
    let prep_id = engine
        .step_id_by_code(period_id, "prep.lock_journals")
        .await
        .unwrap();
    engine.execute_step(prep_id, operator.clone()).await.unwrap();

    let snapshot = engine.get_period_status(period_id).await.unwrap();
    assert_eq!(snapshot.period.status, PeriodStatus::PendingApproval);
    assert!((snapshot.period.completion_percentage - 100.0).abs() < f64::EPSILON);

    // The provision produced a justified regularization entry.
    assert_eq!(snapshot.regularizations.len(), 1);
    assert_eq!(
        snapshot.regularizations[0].calculated_amount,
        Decimal::new(5_000, 2)
    );
    assert!(snapshot.regularizations[0].is_justified());

    // 4 of 5 builtin controls pass (unvalidated regularizations warn):
    // 30 * 0.8 + 25 + 20 + 15 + 10 = 94.
    let score = snapshot.period.compliance_score.unwrap();
    assert!((score - 94.0).abs() < 0.01);

    // Human tail of the lifecycle.
    engine.approve_period(period_id, approver.clone()).await.unwrap();
    engine.close_period(period_id, approver.clone()).await.unwrap();
    engine.lock_period(period_id, approver.clone()).await.unwrap();

    let snapshot = engine.get_period_status(period_id).await.unwrap();
    assert_eq!(snapshot.period.status, PeriodStatus::Locked);

    // The audit chain verifies and replays to the final state.
    engine.verify_audit_trail(period_id).await.unwrap();

    let entries = engine
        .get_audit_trail(period_id, AuditQuery::default())
        .await
        .unwrap();
    let replayed = replay(&entries);

    assert_eq!(replayed.period_status.as_deref(), Some("locked"));
    assert_eq!(replayed.completion_percentage, Some(100.0));
    assert_eq!(replayed.compliance_score, Some(score));
    assert_eq!(replayed.step_status("prep.lock_journals"), Some("completed"));
    assert_eq!(replayed.step_status("provisions.compute"), Some("completed"));
    assert_eq!(replayed.step_status("controls.final"), Some("completed"));

    // Locked periods accept no further mutation without an unlock.
    let err = engine
        .approve_period(period_id, approver.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ClosureError::InvalidState { .. }));

    engine
        .unlock(period_id, actor("auditor"), "court-ordered restatement")
        .await
        .unwrap();
    let snapshot = engine.get_period_status(period_id).await.unwrap();
    assert_eq!(snapshot.period.status, PeriodStatus::InProgress);

    let unlocks = engine
        .get_audit_trail(
            period_id,
            AuditQuery::default().with_action(AuditAction::PeriodUnlocked),
        )
        .await
        .unwrap();
    assert_eq!(unlocks.len(), 1);
    assert_eq!(
        unlocks[0].after_state.get("reason").and_then(|v| v.as_str()),
        Some("court-ordered restatement")
    );
}

#[tokio::test]
async fn invalid_state_transitions_are_rejected() {
    let h = harness(StaticLedger::new(), ControlCatalog::new()).await;
    let operator = actor("jdupont");

    let template_id = h.engine.templates().register(abc_template()).await.unwrap();
    let period_id = h
        .engine
        .create_period(template_id, "2026-07", monthly_attributes())
        .await
        .unwrap();

    // Approving before any closure started.
    let err = h
        .engine
        .approve_period(period_id, operator.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ClosureError::InvalidState { .. }));

    h.engine.start_closure(period_id, operator.clone()).await.unwrap();

    // Starting twice.
    let err = h
        .engine
        .start_closure(period_id, operator.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ClosureError::InvalidState { .. }));

    // Executing a step whose dependencies are unmet.
    let b_id = h.engine.step_id_by_code(period_id, "b").await.unwrap();
    let err = h.engine.execute_step(b_id, operator.clone()).await.unwrap_err();
    assert!(matches!(err, ClosureError::InvalidState { .. }));

    // Unlocking a period that is not locked.
    let err = h
        .engine
        .unlock(period_id, operator.clone(), "no reason")
        .await
        .unwrap_err();
    assert!(matches!(err, ClosureError::InvalidState { .. }));

    // Re-executing a completed step.
    let a_id = h.engine.step_id_by_code(period_id, "a").await.unwrap();
    h.engine.execute_step(a_id, operator.clone()).await.unwrap();
    let err = h.engine.execute_step(a_id, operator).await.unwrap_err();
    assert!(matches!(err, ClosureError::InvalidState { .. }));
}

#[tokio::test]
async fn optional_step_failure_does_not_block_the_period() {
    let h = harness(StaticLedger::new(), ControlCatalog::new()).await;
    let operator = actor("jdupont");

    let template = WorkflowTemplate::new("optional-failure", "")
        .add_step(
            StepTemplate::new("core", "Core", StepCategory::Preparation, StepKind::Automatic)
                .mandatory(),
        )
        .add_step(StepTemplate::new(
            "extra.report",
            "Optional report",
            StepCategory::Statements,
            StepKind::Calculation,
        ));

    let template_id = h.engine.templates().register(template).await.unwrap();
    let period_id = h
        .engine
        .create_period(template_id, "2026-07", monthly_attributes())
        .await
        .unwrap();
    h.engine.start_closure(period_id, operator.clone()).await.unwrap();

    // No calculator registered: the optional step fails and is absorbed.
    let extra_id = h
        .engine
        .step_id_by_code(period_id, "extra.report")
        .await
        .unwrap();
    let outcome = h.engine.execute_step(extra_id, operator.clone()).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Failed { .. }));

    // The mandatory step still completes the period.
    let core_id = h.engine.step_id_by_code(period_id, "core").await.unwrap();
    h.engine.execute_step(core_id, operator).await.unwrap();

    let snapshot = h.engine.get_period_status(period_id).await.unwrap();
    assert_eq!(snapshot.period.status, PeriodStatus::PendingApproval);
    // The failed optional step keeps the completion below 100%.
    assert!((snapshot.period.completion_percentage - 50.0).abs() < f64::EPSILON);
}
