//! The closure orchestration engine.
//!
//! The engine is stateless between calls in the sense that every
//! operation re-reads current state under the relevant locks; any number
//! of workers may drive it concurrently. Locks guard only the
//! read-check-write transition sections, never handler bodies.

use chrono::{DateTime, Utc};
use closing_audit::{AuditAction, AuditEntry, AuditQuery, AuditStore, InMemoryAuditStore, NewAuditRecord};
use closing_calculators::{
    Calculator, CalculatorRegistry, LedgerQuery, PeriodContext, RegularizationDraft,
    RegularizationEntry, StaticLedger,
};
use closing_controls::{ControlCatalog, ControlFramework, ControlRunSummary};
use closing_core::{
    ActorId, EngineConfig, Event, EventPublisher, NullEventPublisher, PeriodAttributes, PeriodId,
    StepCategory, StepId, StepKind, TemplateId,
};
use closing_infra::{
    retry_with, with_timeout, LockKey, LockManager, Notification, NotificationSink, RetryPolicy,
    StepReady, TracingNotificationSink, WorkQueue, WorkReceiver,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::conditions::evaluate_all;
use crate::dag::TemplateDag;
use crate::period::{ClosurePeriod, PeriodStatus};
use crate::scheduling::scheduled_starts;
use crate::scoring::{compliance_score, ScoreInputs};
use crate::step::{StepStatus, WorkflowStep};
use crate::template::{StepTemplate, TemplateError, TemplateStore};
use crate::{ClosureError, Result};

/// Caller-visible outcome of one `execute_step` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed { reason: String },
    /// Manual step claimed; a separate completion call drives the
    /// transition.
    AwaitingManual,
    /// Approval requested; `approve` drives the transition.
    AwaitingApproval,
}

/// Read-only view of a period and its steps.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodSnapshot {
    pub period: ClosurePeriod,
    pub steps: Vec<WorkflowStep>,
    pub regularizations: Vec<RegularizationEntry>,
}

/// Live state of one period run.
struct PeriodRun {
    period: ClosurePeriod,
    template: crate::template::WorkflowTemplate,
    steps: HashMap<StepId, WorkflowStep>,
    steps_by_code: HashMap<String, StepId>,
    regularizations: Vec<RegularizationEntry>,
    data_quality: Vec<f64>,
}

impl PeriodRun {
    fn completed_codes(&self) -> HashSet<String> {
        self.steps
            .values()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.code.clone())
            .collect()
    }

    fn recalc_progression(&mut self) {
        let total = self.steps.len();
        if total == 0 {
            self.period.completion_percentage = 0.0;
            return;
        }
        let completed = self
            .steps
            .values()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        self.period.completion_percentage = completed as f64 / total as f64 * 100.0;
    }

    fn mandatory_all_completed(&self) -> bool {
        self.steps
            .values()
            .filter(|s| s.mandatory)
            .all(|s| s.status == StepStatus::Completed)
    }

    /// Every mandatory step reached a terminal status and at least one
    /// of them failed.
    fn mandatory_settled_with_failure(&self) -> bool {
        let mandatory: Vec<&WorkflowStep> =
            self.steps.values().filter(|s| s.mandatory).collect();
        mandatory.iter().all(|s| s.is_terminal())
            && mandatory.iter().any(|s| s.status == StepStatus::Failed)
    }

    fn score_inputs(&self, completed_at: DateTime<Utc>) -> ScoreInputs {
        let controls_passed = self.steps.values().map(|s| s.controls_passed).sum();
        let controls_failed = self.steps.values().map(|s| s.controls_failed).sum();
        let mandatory_total = self.steps.values().filter(|s| s.mandatory).count() as u32;
        let mandatory_completed = self
            .steps
            .values()
            .filter(|s| s.mandatory && s.status == StepStatus::Completed)
            .count() as u32;

        let data_quality = if self.data_quality.is_empty() {
            None
        } else {
            Some(self.data_quality.iter().sum::<f64>() / self.data_quality.len() as f64)
        };

        let justified_entries = self
            .regularizations
            .iter()
            .filter(|e| e.is_justified())
            .count() as u32;

        ScoreInputs {
            controls_passed,
            controls_failed,
            deadline: self.period.attributes.deadline,
            completed_at,
            mandatory_total,
            mandatory_completed,
            data_quality,
            justified_entries,
            total_entries: self.regularizations.len() as u32,
        }
    }

    fn period_snapshot_json(&self) -> Value {
        json!({
            "period_status": self.period.status.as_str(),
            "completion_percentage": self.period.completion_percentage,
            "compliance_score": self.period.compliance_score,
        })
    }

    fn step_snapshot_json(&self, step: &WorkflowStep) -> Value {
        json!({
            "step_code": step.code,
            "step_status": step.status.as_str(),
            "period_status": self.period.status.as_str(),
            "completion_percentage": self.period.completion_percentage,
        })
    }
}

/// Side effects accumulated inside a transition critical section and
/// flushed after the state change is committed.
#[derive(Default)]
struct TransitionEffects {
    audits: Vec<NewAuditRecord>,
    events: Vec<Event>,
    ready: Vec<StepReady>,
    notifications: Vec<Notification>,
    auto_ready: Vec<StepId>,
}

/// Everything a handler needs, captured while the claim lock was held.
struct DispatchContext {
    period_id: PeriodId,
    step_id: StepId,
    code: String,
    period_name: String,
    kind: StepKind,
    category: StepCategory,
    assigned_to: Option<ActorId>,
    ctx: PeriodContext,
}

/// Result of one executable handler body (automatic, calculation,
/// control, notification).
enum ExecVerdict {
    Complete {
        result_data: Value,
        controls: Option<(u32, u32)>,
        drafts: Vec<RegularizationDraft>,
        data_quality: Option<f64>,
    },
    Fail {
        reason: String,
        controls: Option<(u32, u32)>,
        /// Set when the failure comes from blocking control outcomes.
        blocking_details: Option<String>,
    },
}

/// Orchestrates closure periods: materializes steps from templates,
/// dispatches execution by kind, propagates completions through the
/// dependency graph and maintains the audit trail.
#[derive(Clone)]
pub struct ClosureEngine {
    templates: Arc<TemplateStore>,
    periods: Arc<RwLock<HashMap<PeriodId, PeriodRun>>>,
    step_index: Arc<RwLock<HashMap<StepId, PeriodId>>>,
    locks: LockManager,
    audit: Arc<dyn AuditStore>,
    controls: Arc<dyn ControlFramework>,
    calculators: CalculatorRegistry,
    ledger: Arc<dyn LedgerQuery>,
    notifications: Arc<dyn NotificationSink>,
    events: Arc<dyn EventPublisher>,
    queue: WorkQueue,
    config: EngineConfig,
}

pub struct ClosureEngineBuilder {
    templates: Arc<TemplateStore>,
    audit: Arc<dyn AuditStore>,
    controls: Arc<dyn ControlFramework>,
    calculators: CalculatorRegistry,
    ledger: Arc<dyn LedgerQuery>,
    notifications: Arc<dyn NotificationSink>,
    events: Arc<dyn EventPublisher>,
    config: EngineConfig,
}

impl Default for ClosureEngineBuilder {
    fn default() -> Self {
        Self {
            templates: Arc::new(TemplateStore::new()),
            audit: Arc::new(InMemoryAuditStore::new()),
            controls: Arc::new(ControlCatalog::new()),
            calculators: CalculatorRegistry::new(),
            ledger: Arc::new(StaticLedger::new()),
            notifications: Arc::new(TracingNotificationSink),
            events: Arc::new(NullEventPublisher),
            config: EngineConfig::default(),
        }
    }
}

impl ClosureEngineBuilder {
    pub fn templates(mut self, templates: Arc<TemplateStore>) -> Self {
        self.templates = templates;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = audit;
        self
    }

    pub fn controls(mut self, controls: Arc<dyn ControlFramework>) -> Self {
        self.controls = controls;
        self
    }

    pub fn calculators(mut self, calculators: CalculatorRegistry) -> Self {
        self.calculators = calculators;
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn LedgerQuery>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn notifications(mut self, notifications: Arc<dyn NotificationSink>) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine and the consumer half of its work queue.
    pub fn build(self) -> (ClosureEngine, WorkReceiver) {
        let (queue, receiver) = closing_infra::work_queue(self.config.queue_capacity);
        let engine = ClosureEngine {
            templates: self.templates,
            periods: Arc::new(RwLock::new(HashMap::new())),
            step_index: Arc::new(RwLock::new(HashMap::new())),
            locks: LockManager::new(),
            audit: self.audit,
            controls: self.controls,
            calculators: self.calculators,
            ledger: self.ledger,
            notifications: self.notifications,
            events: self.events,
            queue,
            config: self.config,
        };
        (engine, receiver)
    }
}

impl ClosureEngine {
    pub fn builder() -> ClosureEngineBuilder {
        ClosureEngineBuilder::default()
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn calculators(&self) -> &CalculatorRegistry {
        &self.calculators
    }

    /// Create a period in Open status from a registered template.
    pub async fn create_period(
        &self,
        template_id: TemplateId,
        name: impl Into<String>,
        attributes: PeriodAttributes,
    ) -> Result<PeriodId> {
        let template = self
            .templates
            .get(template_id)
            .await
            .ok_or_else(|| ClosureError::NotFound(format!("template {}", template_id)))?;

        let period = ClosurePeriod::new(template_id, name, attributes);
        let period_id = period.id;

        tracing::info!(
            period_id = %period_id,
            template = %template.name,
            "closure period created"
        );

        self.periods.write().await.insert(
            period_id,
            PeriodRun {
                period,
                template,
                steps: HashMap::new(),
                steps_by_code: HashMap::new(),
                regularizations: Vec::new(),
                data_quality: Vec::new(),
            },
        );

        Ok(period_id)
    }

    /// Start the closure: evaluate execution conditions, materialize the
    /// steps, move the period to InProgress and announce the
    /// initially-ready steps. Returns their ids for external scheduling.
    pub async fn start_closure(&self, period_id: PeriodId, actor: ActorId) -> Result<Vec<StepId>> {
        let _period_guard = self.locks.try_acquire(LockKey::Period(period_id))?;
        let now = Utc::now();

        let (before, after, effects, ready_ids, index_entries) = {
            let mut periods = self.periods.write().await;
            let run = periods
                .get_mut(&period_id)
                .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;

            if run.period.status != PeriodStatus::Open {
                return Err(invalid_state(
                    format!("period {}", run.period.name),
                    run.period.status.as_str(),
                    "start_closure",
                ));
            }

            let attrs = run.period.attributes.clone();
            let included: Vec<&StepTemplate> = run
                .template
                .steps
                .iter()
                .filter(|s| evaluate_all(&s.execution_conditions, &attrs))
                .collect();

            if included.is_empty() {
                return Err(TemplateError::NoMaterializedSteps.into());
            }

            // The template validator guarantees dependents carry their
            // dependencies' conditions; this guards against templates
            // registered through other channels.
            let codes: HashSet<&str> = included.iter().map(|s| s.code.as_str()).collect();
            for step in &included {
                for dep in &step.dependencies {
                    if !codes.contains(dep.as_str()) {
                        return Err(TemplateError::UnknownDependency {
                            step: step.code.clone(),
                            dependency: dep.clone(),
                        }
                        .into());
                    }
                }
            }

            let dag = TemplateDag::build(included.iter().copied())?;
            let starts = scheduled_starts(&included, &dag, now);

            let before = run.period_snapshot_json();

            let mut steps = HashMap::new();
            let mut by_code = HashMap::new();
            let mut index_entries = Vec::new();
            for template in &included {
                let start = starts.get(&template.code).copied().unwrap_or(now);
                let step = WorkflowStep::from_template(period_id, template, start);
                index_entries.push(step.id);
                by_code.insert(step.code.clone(), step.id);
                steps.insert(step.id, step);
            }
            run.steps = steps;
            run.steps_by_code = by_code;
            run.period.status = PeriodStatus::InProgress;
            run.period.started_at = Some(now);
            run.recalc_progression();

            let after = run.period_snapshot_json();

            let mut effects = TransitionEffects::default();
            let mut ready_ids = Vec::new();
            for step in run.steps.values() {
                if step.dependencies.is_empty() {
                    ready_ids.push(step.id);
                    effects.ready.push(StepReady::new(
                        period_id,
                        step.id,
                        step.code.as_str(),
                        step.auto_executable,
                    ));
                    if !step.auto_executable {
                        effects.notifications.push(step_ready_notification(run, step));
                    }
                }
            }
            effects.events.push(Event::new(
                "period.started",
                json!({"period_id": period_id, "steps": run.steps.len()}),
            ));

            (before, after, effects, ready_ids, index_entries)
        };

        {
            let mut index = self.step_index.write().await;
            for step_id in index_entries {
                index.insert(step_id, period_id);
            }
        }

        self.audit
            .append(NewAuditRecord::new(
                period_id,
                AuditAction::PeriodStarted,
                actor,
                before,
                after,
            ))
            .await?;

        tracing::info!(
            period_id = %period_id,
            ready = ready_ids.len(),
            "closure started"
        );

        self.flush_side_effects(effects).await;
        Ok(ready_ids)
    }

    /// Execute one pending step. At most one concurrent execution per
    /// step; the loser of a race receives `ConcurrencyConflict`.
    pub async fn execute_step(&self, step_id: StepId, actor: ActorId) -> Result<StepOutcome> {
        let (outcome, auto_ready) = self.execute_step_inner(step_id, actor).await?;
        self.drive_ready(auto_ready).await;
        Ok(outcome)
    }

    async fn execute_step_inner(
        &self,
        step_id: StepId,
        actor: ActorId,
    ) -> Result<(StepOutcome, Vec<StepId>)> {
        let period_id = self.period_of(step_id).await?;
        let now = Utc::now();

        // Claim section: verify preconditions, move Pending to
        // InProgress. The step lock makes the claim at-most-once; the
        // period lock orders the audit append with other transitions.
        let step_guard = self.locks.try_acquire(LockKey::Step(step_id))?;
        let dispatch = {
            let _period_guard = self.locks.acquire(LockKey::Period(period_id)).await;

            let (dispatch, before, after) = {
                let mut periods = self.periods.write().await;
                let run = periods
                    .get_mut(&period_id)
                    .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;

                if !run.period.status.accepts_step_execution() {
                    return Err(invalid_state(
                        format!("period {}", run.period.name),
                        run.period.status.as_str(),
                        "execute_step",
                    ));
                }

                let completed = run.completed_codes();
                let step = run
                    .steps
                    .get(&step_id)
                    .ok_or_else(|| ClosureError::NotFound(format!("step {}", step_id)))?;

                if step.status != StepStatus::Pending {
                    return Err(invalid_state(
                        format!("step {}", step.code),
                        step.status.as_str(),
                        "execute_step",
                    ));
                }

                let unmet: Vec<&String> = step
                    .dependencies
                    .iter()
                    .filter(|d| !completed.contains(*d))
                    .collect();
                if !unmet.is_empty() {
                    return Err(invalid_state(
                        format!("step {}", step.code),
                        step.status.as_str(),
                        "execute_step with unmet dependencies",
                    ));
                }

                let before = run.step_snapshot_json(step);
                let ctx = PeriodContext::new(
                    period_id,
                    run.period.name.clone(),
                    run.period.attributes.clone(),
                    now,
                    run.regularizations.clone(),
                    self.ledger.clone(),
                );

                let step = run
                    .steps
                    .get_mut(&step_id)
                    .ok_or_else(|| ClosureError::NotFound(format!("step {}", step_id)))?;
                step.status = StepStatus::InProgress;
                step.actual_start = Some(now);
                if step.assigned_to.is_none() {
                    step.assigned_to = Some(actor.clone());
                }

                let dispatch = DispatchContext {
                    period_id,
                    step_id,
                    code: step.code.clone(),
                    period_name: run.period.name.clone(),
                    kind: step.kind,
                    category: step.category,
                    assigned_to: step.assigned_to.clone(),
                    ctx,
                };

                let step = &run.steps[&step_id];
                let after = run.step_snapshot_json(step);
                (dispatch, before, after)
            };

            self.audit
                .append(NewAuditRecord::new(
                    period_id,
                    AuditAction::StepStarted,
                    actor.clone(),
                    before,
                    after,
                ))
                .await?;

            dispatch
        };

        // The handler body runs outside the step lock; the lock protects
        // transitions, not external calls.
        drop(step_guard);

        tracing::info!(
            period_id = %period_id,
            step_code = %dispatch.code,
            kind = %dispatch.kind,
            "step execution started"
        );

        match dispatch.kind {
            StepKind::Manual | StepKind::Validation => {
                self.notify(action_required_notification(&dispatch)).await;
                return Ok((StepOutcome::AwaitingManual, Vec::new()));
            }
            StepKind::Approval => {
                self.request_approval(&dispatch, &actor).await?;
                self.notify(action_required_notification(&dispatch)).await;
                return Ok((StepOutcome::AwaitingApproval, Vec::new()));
            }
            _ => {}
        }

        let verdict = self.run_handler(&dispatch).await;
        self.settle(dispatch, actor, verdict).await
    }

    /// Completion critical section for executable handler kinds.
    async fn settle(
        &self,
        dispatch: DispatchContext,
        actor: ActorId,
        verdict: ExecVerdict,
    ) -> Result<(StepOutcome, Vec<StepId>)> {
        let period_id = dispatch.period_id;
        let step_id = dispatch.step_id;
        let now = Utc::now();

        let _step_guard = self.locks.acquire(LockKey::Step(step_id)).await;
        let _period_guard = self.locks.acquire(LockKey::Period(period_id)).await;

        let (outcome, effects, violation) = {
            let mut periods = self.periods.write().await;
            let run = periods
                .get_mut(&period_id)
                .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;

            let current = run
                .steps
                .get(&step_id)
                .ok_or_else(|| ClosureError::NotFound(format!("step {}", step_id)))?
                .status;
            if current != StepStatus::InProgress {
                // Force-failed by an administrator while the handler ran.
                return Err(invalid_state(
                    format!("step {}", dispatch.code),
                    current.as_str(),
                    "record handler outcome",
                ));
            }

            match verdict {
                ExecVerdict::Complete {
                    result_data,
                    controls,
                    drafts,
                    data_quality,
                } => {
                    let entries: Vec<RegularizationEntry> = drafts
                        .into_iter()
                        .map(|d| RegularizationEntry::from_draft(period_id, dispatch.code.as_str(), d))
                        .collect();
                    run.regularizations.extend(entries);
                    if let Some(dq) = data_quality {
                        run.data_quality.push(dq);
                    }

                    let effects = apply_completion(
                        run,
                        step_id,
                        &actor,
                        AuditAction::StepCompleted,
                        Some(result_data),
                        controls,
                        now,
                    )?;
                    (StepOutcome::Completed, effects, None)
                }
                ExecVerdict::Fail {
                    reason,
                    controls,
                    blocking_details,
                } => {
                    let effects = apply_failure(run, step_id, &actor, &reason, controls, now)?;
                    (StepOutcome::Failed { reason }, effects, blocking_details)
                }
            }
        };

        let auto_ready = self.commit(period_id, effects).await?;

        if let Some(details) = violation {
            return Err(ClosureError::ComplianceViolation {
                step: dispatch.code,
                details,
            });
        }
        Ok((outcome, auto_ready))
    }

    /// Transition an approval step from InProgress to RequiresApproval.
    async fn request_approval(&self, dispatch: &DispatchContext, actor: &ActorId) -> Result<()> {
        let _step_guard = self.locks.acquire(LockKey::Step(dispatch.step_id)).await;
        let _period_guard = self.locks.acquire(LockKey::Period(dispatch.period_id)).await;

        let (before, after) = {
            let mut periods = self.periods.write().await;
            let run = periods
                .get_mut(&dispatch.period_id)
                .ok_or_else(|| ClosureError::NotFound(format!("period {}", dispatch.period_id)))?;

            let step = run
                .steps
                .get(&dispatch.step_id)
                .ok_or_else(|| ClosureError::NotFound(format!("step {}", dispatch.step_id)))?;
            if step.status != StepStatus::InProgress {
                return Err(invalid_state(
                    format!("step {}", step.code),
                    step.status.as_str(),
                    "request_approval",
                ));
            }

            let before = run.step_snapshot_json(step);
            if let Some(step) = run.steps.get_mut(&dispatch.step_id) {
                step.status = StepStatus::RequiresApproval;
            }
            let after = run.step_snapshot_json(&run.steps[&dispatch.step_id]);
            (before, after)
        };

        self.audit
            .append(NewAuditRecord::new(
                dispatch.period_id,
                AuditAction::StepApprovalRequested,
                actor.clone(),
                before,
                after,
            ))
            .await?;

        Ok(())
    }

    /// Complete a manual or validation step after the human action.
    pub async fn complete_manual_step(
        &self,
        step_id: StepId,
        actor: ActorId,
        result_data: Option<Value>,
    ) -> Result<()> {
        let period_id = self.period_of(step_id).await?;
        let now = Utc::now();

        let _step_guard = self.locks.try_acquire(LockKey::Step(step_id))?;
        let _period_guard = self.locks.acquire(LockKey::Period(period_id)).await;

        let effects = {
            let mut periods = self.periods.write().await;
            let run = periods
                .get_mut(&period_id)
                .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;

            let step = run
                .steps
                .get(&step_id)
                .ok_or_else(|| ClosureError::NotFound(format!("step {}", step_id)))?;

            if !matches!(step.kind, StepKind::Manual | StepKind::Validation) {
                return Err(invalid_state(
                    format!("step {}", step.code),
                    step.kind.as_str(),
                    "complete_manual_step",
                ));
            }
            if step.status != StepStatus::InProgress {
                return Err(invalid_state(
                    format!("step {}", step.code),
                    step.status.as_str(),
                    "complete_manual_step",
                ));
            }

            let data = result_data
                .unwrap_or_else(|| json!({"completed_by": actor.as_str()}));
            apply_completion(
                run,
                step_id,
                &actor,
                AuditAction::StepCompleted,
                Some(data),
                None,
                now,
            )?
        };

        let auto_ready = self.commit(period_id, effects).await?;
        drop(_period_guard);
        drop(_step_guard);
        self.drive_ready(auto_ready).await;
        Ok(())
    }

    /// Approve a step in RequiresApproval, completing it.
    pub async fn approve(
        &self,
        step_id: StepId,
        actor: ActorId,
        comments: Option<String>,
    ) -> Result<()> {
        let period_id = self.period_of(step_id).await?;
        let now = Utc::now();

        let _step_guard = self.locks.try_acquire(LockKey::Step(step_id))?;
        let _period_guard = self.locks.acquire(LockKey::Period(period_id)).await;

        let effects = {
            let mut periods = self.periods.write().await;
            let run = periods
                .get_mut(&period_id)
                .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;

            let step = run
                .steps
                .get(&step_id)
                .ok_or_else(|| ClosureError::NotFound(format!("step {}", step_id)))?;

            if step.status != StepStatus::RequiresApproval {
                return Err(invalid_state(
                    format!("step {}", step.code),
                    step.status.as_str(),
                    "approve",
                ));
            }

            let data = json!({"approved_by": actor.as_str(), "comments": comments});
            apply_completion(
                run,
                step_id,
                &actor,
                AuditAction::StepApproved,
                Some(data),
                None,
                now,
            )?
        };

        let auto_ready = self.commit(period_id, effects).await?;
        drop(_period_guard);
        drop(_step_guard);
        self.drive_ready(auto_ready).await;
        Ok(())
    }

    /// Skip an optional pending step. Refused when other steps still
    /// depend on it.
    pub async fn skip_step(&self, step_id: StepId, actor: ActorId, reason: &str) -> Result<()> {
        let period_id = self.period_of(step_id).await?;
        let now = Utc::now();

        let _step_guard = self.locks.try_acquire(LockKey::Step(step_id))?;
        let _period_guard = self.locks.acquire(LockKey::Period(period_id)).await;

        let effects = {
            let mut periods = self.periods.write().await;
            let run = periods
                .get_mut(&period_id)
                .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;

            let step = run
                .steps
                .get(&step_id)
                .ok_or_else(|| ClosureError::NotFound(format!("step {}", step_id)))?;

            if step.status != StepStatus::Pending {
                return Err(invalid_state(
                    format!("step {}", step.code),
                    step.status.as_str(),
                    "skip_step",
                ));
            }
            if step.mandatory {
                return Err(invalid_state(
                    format!("step {}", step.code),
                    "mandatory",
                    "skip_step",
                ));
            }
            let code = step.code.clone();
            let blocked_dependents: Vec<String> = run
                .steps
                .values()
                .filter(|s| s.dependencies.contains(&code) && !s.is_terminal())
                .map(|s| s.code.clone())
                .collect();
            if !blocked_dependents.is_empty() {
                return Err(invalid_state(
                    format!("step {}", code),
                    &format!("depended on by {}", blocked_dependents.join(", ")),
                    "skip_step",
                ));
            }

            let before = run.step_snapshot_json(&run.steps[&step_id]);
            if let Some(step) = run.steps.get_mut(&step_id) {
                step.status = StepStatus::Skipped;
                step.actual_end = Some(now);
                step.result_data = Some(json!({"skipped_by": actor.as_str(), "reason": reason}));
            }
            run.recalc_progression();
            let after = run.step_snapshot_json(&run.steps[&step_id]);

            let mut effects = TransitionEffects::default();
            effects.audits.push(NewAuditRecord::new(
                period_id,
                AuditAction::StepSkipped,
                actor.clone(),
                before,
                after,
            ));
            effects
        };

        self.commit(period_id, effects).await?;
        Ok(())
    }

    /// Administrative force-fail, used after a handler hung or an actor
    /// abandoned an approval. Only valid once the handler is no longer
    /// holding the step (the step lock enforces this).
    pub async fn mark_step_failed(
        &self,
        step_id: StepId,
        actor: ActorId,
        reason: &str,
    ) -> Result<()> {
        let period_id = self.period_of(step_id).await?;
        let now = Utc::now();

        let _step_guard = self.locks.try_acquire(LockKey::Step(step_id))?;
        let _period_guard = self.locks.acquire(LockKey::Period(period_id)).await;

        let effects = {
            let mut periods = self.periods.write().await;
            let run = periods
                .get_mut(&period_id)
                .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;

            let step = run
                .steps
                .get(&step_id)
                .ok_or_else(|| ClosureError::NotFound(format!("step {}", step_id)))?;

            if !matches!(
                step.status,
                StepStatus::InProgress | StepStatus::RequiresApproval
            ) {
                return Err(invalid_state(
                    format!("step {}", step.code),
                    step.status.as_str(),
                    "mark_step_failed",
                ));
            }

            apply_failure(run, step_id, &actor, reason, None, now)?
        };

        self.commit(period_id, effects).await?;
        Ok(())
    }

    /// PendingApproval to Approved, by explicit human action.
    pub async fn approve_period(&self, period_id: PeriodId, actor: ActorId) -> Result<()> {
        self.transition_period(
            period_id,
            actor,
            PeriodStatus::Approved,
            AuditAction::PeriodApproved,
            Some(Event::new("period.approved", json!({"period_id": period_id}))),
        )
        .await
    }

    /// Approved to Closed.
    pub async fn close_period(&self, period_id: PeriodId, actor: ActorId) -> Result<()> {
        self.transition_period(
            period_id,
            actor,
            PeriodStatus::Closed,
            AuditAction::PeriodClosed,
            Some(Event::new("period.closed", json!({"period_id": period_id}))),
        )
        .await
    }

    /// Closed to Locked; a locked period accepts no further mutation
    /// apart from the audited unlock.
    pub async fn lock_period(&self, period_id: PeriodId, actor: ActorId) -> Result<()> {
        self.transition_period(
            period_id,
            actor,
            PeriodStatus::Locked,
            AuditAction::PeriodLocked,
            Some(Event::new("period.locked", json!({"period_id": period_id}))),
        )
        .await
    }

    /// Audited unlock: the one sanctioned backwards transition. The
    /// caller is responsible for the actor's authorization.
    pub async fn unlock(&self, period_id: PeriodId, actor: ActorId, reason: &str) -> Result<()> {
        let _guard = self.locks.try_acquire(LockKey::Period(period_id))?;

        let (before, after) = {
            let mut periods = self.periods.write().await;
            let run = periods
                .get_mut(&period_id)
                .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;

            if run.period.status != PeriodStatus::Locked {
                return Err(invalid_state(
                    format!("period {}", run.period.name),
                    run.period.status.as_str(),
                    "unlock",
                ));
            }

            let before = run.period_snapshot_json();
            run.period.status = PeriodStatus::InProgress;
            let mut after = run.period_snapshot_json();
            if let Some(map) = after.as_object_mut() {
                map.insert("reason".to_string(), json!(reason));
            }
            (before, after)
        };

        self.audit
            .append(NewAuditRecord::new(
                period_id,
                AuditAction::PeriodUnlocked,
                actor,
                before,
                after,
            ))
            .await?;

        tracing::warn!(period_id = %period_id, reason, "period unlocked");
        self.publish(Event::new(
            "period.unlocked",
            json!({"period_id": period_id, "reason": reason}),
        ))
        .await;

        Ok(())
    }

    pub async fn get_period_status(&self, period_id: PeriodId) -> Result<PeriodSnapshot> {
        let periods = self.periods.read().await;
        let run = periods
            .get(&period_id)
            .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;

        let mut steps: Vec<WorkflowStep> = run.steps.values().cloned().collect();
        steps.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.code.cmp(&b.code)));

        Ok(PeriodSnapshot {
            period: run.period.clone(),
            steps,
            regularizations: run.regularizations.clone(),
        })
    }

    /// Id of the step materialized from the given template code.
    pub async fn step_id_by_code(&self, period_id: PeriodId, code: &str) -> Result<StepId> {
        let periods = self.periods.read().await;
        let run = periods
            .get(&period_id)
            .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;
        run.steps_by_code
            .get(code)
            .copied()
            .ok_or_else(|| ClosureError::NotFound(format!("step {}", code)))
    }

    pub async fn get_audit_trail(
        &self,
        period_id: PeriodId,
        query: AuditQuery,
    ) -> Result<Vec<AuditEntry>> {
        match self.audit.query(period_id, query).await {
            Ok(entries) => Ok(entries),
            Err(closing_audit::AuditError::UnknownPeriod(_)) => {
                // A period that exists but was never started has an
                // empty trail.
                let periods = self.periods.read().await;
                if periods.contains_key(&period_id) {
                    Ok(Vec::new())
                } else {
                    Err(ClosureError::NotFound(format!("period {}", period_id)))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Batch verification of a period's audit chain.
    pub async fn verify_audit_trail(&self, period_id: PeriodId) -> Result<()> {
        let entries = self.get_audit_trail(period_id, AuditQuery::default()).await?;
        closing_audit::verify_chain(&entries)
            .map_err(closing_audit::AuditError::CorruptChain)?;
        Ok(())
    }

    // ---- handler bodies -------------------------------------------------

    async fn run_handler(&self, dispatch: &DispatchContext) -> ExecVerdict {
        match dispatch.kind {
            StepKind::Automatic => ExecVerdict::Complete {
                result_data: json!({"handler": "automatic"}),
                controls: None,
                drafts: Vec::new(),
                data_quality: None,
            },
            StepKind::Calculation => self.run_calculation(dispatch).await,
            StepKind::Control => self.run_controls(dispatch).await,
            StepKind::Notification => self.run_notification(dispatch).await,
            // Diverted before dispatch; kept for exhaustiveness.
            StepKind::Manual | StepKind::Validation | StepKind::Approval => ExecVerdict::Fail {
                reason: format!("kind {} has no executable handler", dispatch.kind),
                controls: None,
                blocking_details: None,
            },
        }
    }

    async fn run_calculation(&self, dispatch: &DispatchContext) -> ExecVerdict {
        let Some(calculator) = self.calculators.get(&dispatch.code).await else {
            return ExecVerdict::Fail {
                reason: format!("no calculator registered for step {}", dispatch.code),
                controls: None,
                blocking_details: None,
            };
        };

        let policy = RetryPolicy::new(self.config.max_calculation_retries);
        let timeout = self.config.handler_timeout();
        let ctx = &dispatch.ctx;
        let code = dispatch.code.as_str();

        let result = retry_with(
            &policy,
            || async {
                match with_timeout(timeout, code, || calculator.calculate(ctx)).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(t) => Err(t.to_string()),
                }
            },
            |_| true,
        )
        .await;

        match result {
            Ok(result) => ExecVerdict::Complete {
                result_data: json!({
                    "amounts": result.amounts,
                    "data_quality_score": result.data_quality_score,
                    "regularization_count": result.regularizations.len(),
                }),
                controls: None,
                data_quality: Some(result.data_quality_score),
                drafts: result.regularizations,
            },
            Err(reason) => ExecVerdict::Fail {
                reason,
                controls: None,
                blocking_details: None,
            },
        }
    }

    async fn run_controls(&self, dispatch: &DispatchContext) -> ExecVerdict {
        let definitions = self.controls.controls_for(dispatch.category).await;
        let policy = RetryPolicy::new(self.config.max_calculation_retries);
        let timeout = self.config.handler_timeout();

        let mut outcomes = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            let id = definition.id.as_str();
            let ctx = &dispatch.ctx;
            let result = retry_with(
                &policy,
                || async {
                    match with_timeout(timeout, id, || self.controls.evaluate(ctx, id)).await {
                        Ok(Ok(outcome)) => Ok(outcome),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(t) => Err(t.to_string()),
                    }
                },
                |_| true,
            )
            .await;

            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(reason) => {
                    return ExecVerdict::Fail {
                        reason: format!("control {} failed to run: {}", id, reason),
                        controls: None,
                        blocking_details: None,
                    }
                }
            }
        }

        let summary = ControlRunSummary::from_outcomes(outcomes);
        let counts = (summary.passed, summary.failed);

        if summary.has_blocking_failure() {
            let details = summary
                .blocking_failures()
                .iter()
                .map(|o| format!("{} [{}]: {}", o.control_id, o.severity, o.details))
                .collect::<Vec<_>>()
                .join("; ");
            ExecVerdict::Fail {
                reason: format!("blocking control failure: {}", details),
                controls: Some(counts),
                blocking_details: Some(details),
            }
        } else {
            ExecVerdict::Complete {
                result_data: json!({
                    "controls_passed": summary.passed,
                    "controls_failed": summary.failed,
                    "outcomes": summary.outcomes,
                }),
                controls: Some(counts),
                drafts: Vec::new(),
                data_quality: None,
            }
        }
    }

    async fn run_notification(&self, dispatch: &DispatchContext) -> ExecVerdict {
        let recipient = dispatch
            .assigned_to
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "closing-team".to_string());
        let notification = Notification::new(
            recipient,
            "closing_step_notification",
            json!({"period": dispatch.period_name, "step": dispatch.code}),
        );

        let timeout = self.config.handler_timeout();
        match with_timeout(timeout, &dispatch.code, || {
            self.notifications.enqueue(notification)
        })
        .await
        {
            Ok(Ok(ack)) => ExecVerdict::Complete {
                result_data: json!({"reference": ack.reference, "queued_at": ack.queued_at}),
                controls: None,
                drafts: Vec::new(),
                data_quality: None,
            },
            Ok(Err(e)) => ExecVerdict::Fail {
                reason: e.to_string(),
                controls: None,
                blocking_details: None,
            },
            Err(t) => ExecVerdict::Fail {
                reason: t.to_string(),
                controls: None,
                blocking_details: None,
            },
        }
    }

    // ---- plumbing -------------------------------------------------------

    async fn period_of(&self, step_id: StepId) -> Result<PeriodId> {
        self.step_index
            .read()
            .await
            .get(&step_id)
            .copied()
            .ok_or_else(|| ClosureError::NotFound(format!("step {}", step_id)))
    }

    /// Append the ordered audit records, then release the remaining
    /// effects. Returns the auto-executable ready steps for the caller
    /// to drive.
    async fn commit(
        &self,
        period_id: PeriodId,
        mut effects: TransitionEffects,
    ) -> Result<Vec<StepId>> {
        for record in effects.audits.drain(..) {
            debug_assert_eq!(record.period_id, period_id);
            self.audit.append(record).await?;
        }
        let auto_ready = std::mem::take(&mut effects.auto_ready);
        self.flush_side_effects(effects).await;
        Ok(auto_ready)
    }

    async fn flush_side_effects(&self, effects: TransitionEffects) {
        for event in effects.events {
            self.publish(event).await;
        }
        for item in effects.ready {
            if let Err(e) = self.queue.try_publish(item) {
                tracing::debug!(error = %e, "work queue publish skipped");
            }
        }
        for notification in effects.notifications {
            self.notify(notification).await;
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.events.publish(event).await {
            tracing::warn!(error = %e, "event publication failed");
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifications.enqueue(notification).await {
            tracing::warn!(error = %e, "notification enqueue failed");
        }
    }

    /// Execute newly-ready auto-executable steps in-process. Races with
    /// external workers consuming the queue are benign: the loser of the
    /// step lock backs off.
    async fn drive_ready(&self, mut ready: Vec<StepId>) {
        if !self.config.auto_execute {
            return;
        }
        while let Some(step_id) = ready.pop() {
            match Box::pin(self.execute_step_inner(step_id, ActorId::system())).await {
                Ok((_, more)) => ready.extend(more),
                Err(ClosureError::ConcurrencyConflict { .. }) => {}
                Err(e) => {
                    tracing::warn!(step_id = %step_id, error = %e, "automatic step failed");
                }
            }
        }
    }

    async fn transition_period(
        &self,
        period_id: PeriodId,
        actor: ActorId,
        next: PeriodStatus,
        action: AuditAction,
        event: Option<Event>,
    ) -> Result<()> {
        let _guard = self.locks.try_acquire(LockKey::Period(period_id))?;

        let (before, after) = {
            let mut periods = self.periods.write().await;
            let run = periods
                .get_mut(&period_id)
                .ok_or_else(|| ClosureError::NotFound(format!("period {}", period_id)))?;

            if !run.period.status.permits(next) {
                return Err(invalid_state(
                    format!("period {}", run.period.name),
                    run.period.status.as_str(),
                    next.as_str(),
                ));
            }

            let before = run.period_snapshot_json();
            run.period.status = next;
            if next == PeriodStatus::Closed {
                run.period.closed_at = Some(Utc::now());
            }
            let after = run.period_snapshot_json();
            (before, after)
        };

        self.audit
            .append(NewAuditRecord::new(period_id, action, actor, before, after))
            .await?;

        tracing::info!(period_id = %period_id, status = next.as_str(), "period transitioned");

        if let Some(event) = event {
            self.publish(event).await;
        }
        Ok(())
    }
}

fn invalid_state(entity: String, current: &str, attempted: &str) -> ClosureError {
    ClosureError::InvalidState {
        entity,
        current: current.to_string(),
        attempted: attempted.to_string(),
    }
}

fn step_ready_notification(run: &PeriodRun, step: &WorkflowStep) -> Notification {
    let recipient = step
        .assigned_to
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "closing-team".to_string());
    Notification::new(
        recipient,
        "step_ready",
        json!({
            "period": run.period.name,
            "step": step.code,
            "scheduled_start": step.scheduled_start,
        }),
    )
}

fn action_required_notification(dispatch: &DispatchContext) -> Notification {
    let recipient = dispatch
        .assigned_to
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "closing-team".to_string());
    Notification::new(
        recipient,
        "action_required",
        json!({"period": dispatch.period_name, "step": dispatch.code}),
    )
}

/// Record a completion transition and propagate it: recompute
/// progression, announce newly-ready dependents, and auto-advance the
/// period when every mandatory step is completed.
fn apply_completion(
    run: &mut PeriodRun,
    step_id: StepId,
    actor: &ActorId,
    action: AuditAction,
    result_data: Option<Value>,
    controls: Option<(u32, u32)>,
    now: DateTime<Utc>,
) -> Result<TransitionEffects> {
    let mut effects = TransitionEffects::default();
    let period_id = run.period.id;

    let (code, before) = {
        let step = run
            .steps
            .get(&step_id)
            .ok_or_else(|| ClosureError::NotFound(format!("step {}", step_id)))?;
        (step.code.clone(), run.step_snapshot_json(step))
    };

    if let Some(step) = run.steps.get_mut(&step_id) {
        step.status = StepStatus::Completed;
        step.actual_end = Some(now);
        if result_data.is_some() {
            step.result_data = result_data;
        }
        if let Some((passed, failed)) = controls {
            step.controls_passed = passed;
            step.controls_failed = failed;
        }
    }
    run.recalc_progression();

    let after = run.step_snapshot_json(&run.steps[&step_id]);
    effects.audits.push(NewAuditRecord::new(
        period_id,
        action,
        actor.clone(),
        before,
        after,
    ));
    effects.events.push(Event::new(
        "step.completed",
        json!({"period_id": period_id, "step_code": code}),
    ));

    // Dependency propagation: announce every pending step that the
    // completed code just unblocked.
    let completed = run.completed_codes();
    for candidate in run.steps.values() {
        if candidate.status == StepStatus::Pending
            && candidate.dependencies.contains(&code)
            && candidate.dependencies.iter().all(|d| completed.contains(d))
        {
            effects.ready.push(StepReady::new(
                period_id,
                candidate.id,
                candidate.code.as_str(),
                candidate.auto_executable,
            ));
            if candidate.auto_executable {
                effects.auto_ready.push(candidate.id);
            } else {
                effects.notifications.push(step_ready_notification(run, candidate));
            }
        }
    }

    if run.period.status == PeriodStatus::InProgress && run.mandatory_all_completed() {
        let before_period = run.period_snapshot_json();
        run.period.status = PeriodStatus::PendingApproval;
        let score = compliance_score(&run.score_inputs(now));
        run.period.compliance_score = Some(score);
        let after_period = run.period_snapshot_json();

        effects.audits.push(NewAuditRecord::new(
            period_id,
            AuditAction::PeriodPendingApproval,
            actor.clone(),
            before_period,
            after_period,
        ));
        effects.events.push(Event::new(
            "period.pending_approval",
            json!({"period_id": period_id, "compliance_score": score}),
        ));
    }

    Ok(effects)
}

/// Record a failure transition. A failed mandatory step cannot be
/// retried; once every mandatory step is settled and one of them failed,
/// the period is surfaced as Error instead of silently stalling.
fn apply_failure(
    run: &mut PeriodRun,
    step_id: StepId,
    actor: &ActorId,
    reason: &str,
    controls: Option<(u32, u32)>,
    now: DateTime<Utc>,
) -> Result<TransitionEffects> {
    let mut effects = TransitionEffects::default();
    let period_id = run.period.id;

    let (code, mandatory, before) = {
        let step = run
            .steps
            .get(&step_id)
            .ok_or_else(|| ClosureError::NotFound(format!("step {}", step_id)))?;
        (step.code.clone(), step.mandatory, run.step_snapshot_json(step))
    };

    if let Some(step) = run.steps.get_mut(&step_id) {
        step.status = StepStatus::Failed;
        step.actual_end = Some(now);
        step.error_message = Some(reason.to_string());
        if let Some((passed, failed)) = controls {
            step.controls_passed = passed;
            step.controls_failed = failed;
        }
    }
    run.recalc_progression();

    let after = run.step_snapshot_json(&run.steps[&step_id]);
    effects.audits.push(NewAuditRecord::new(
        period_id,
        AuditAction::StepFailed,
        actor.clone(),
        before,
        after,
    ));
    effects.events.push(Event::new(
        "step.failed",
        json!({"period_id": period_id, "step_code": code, "mandatory": mandatory, "reason": reason}),
    ));

    if run.period.status == PeriodStatus::InProgress && run.mandatory_settled_with_failure() {
        let before_period = run.period_snapshot_json();
        run.period.status = PeriodStatus::Error;
        let after_period = run.period_snapshot_json();

        effects.audits.push(NewAuditRecord::new(
            period_id,
            AuditAction::PeriodError,
            actor.clone(),
            before_period,
            after_period,
        ));
        effects.events.push(Event::new(
            "period.error",
            json!({"period_id": period_id, "failed_step": code}),
        ));
    }

    Ok(effects)
}
