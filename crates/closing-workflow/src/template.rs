//! Workflow templates: immutable definitions of a closing workflow.

use chrono::{DateTime, Utc};
use closing_core::{ActorId, StepCategory, StepKind, TemplateId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::conditions::ExecutionCondition;
use crate::dag::TemplateDag;

/// Template configuration errors. Fatal at registration time; a validated
/// template can always be materialized.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template has no steps")]
    EmptyTemplate,

    #[error("no steps materialized: every step is excluded by its conditions")]
    NoMaterializedSteps,

    #[error("duplicate step code: {0}")]
    DuplicateStep(String),

    #[error("step {step} depends on {dependency} which does not exist")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle: {0}")]
    CycleDetected(String),

    #[error(
        "step {step} must carry the execution conditions of its dependency {dependency}, \
         or it could dangle when the dependency is excluded"
    )]
    ConditionMismatch { step: String, dependency: String },
}

/// Immutable definition of one unit of work within a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    /// Stable code, unique within the template, e.g. "provisions.compute".
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Display/ordering hint; execution order comes from dependencies.
    pub order: u32,
    pub category: StepCategory,
    pub kind: StepKind,
    /// Codes of steps that must complete first.
    #[serde(default)]
    pub dependencies: HashSet<String>,
    /// Mandatory steps gate the period's advance to approval.
    pub mandatory: bool,
    /// Whether the engine may execute the step as soon as it is ready.
    pub auto_executable: bool,
    #[serde(default)]
    pub execution_conditions: Vec<ExecutionCondition>,
    pub estimated_duration_minutes: u32,
    /// Default assignee for manual and approval steps.
    #[serde(default)]
    pub default_assignee: Option<ActorId>,
}

impl StepTemplate {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        category: StepCategory,
        kind: StepKind,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: String::new(),
            order: 0,
            category,
            kind,
            dependencies: HashSet::new(),
            mandatory: false,
            auto_executable: matches!(kind, StepKind::Automatic),
            execution_conditions: Vec::new(),
            estimated_duration_minutes: 30,
            default_assignee: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn depends_on(mut self, code: impl Into<String>) -> Self {
        self.dependencies.insert(code.into());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn auto_executable(mut self, auto: bool) -> Self {
        self.auto_executable = auto;
        self
    }

    pub fn with_condition(mut self, condition: ExecutionCondition) -> Self {
        self.execution_conditions.push(condition);
        self
    }

    pub fn with_estimated_minutes(mut self, minutes: u32) -> Self {
        self.estimated_duration_minutes = minutes;
        self
    }

    pub fn assigned_to(mut self, actor: ActorId) -> Self {
        self.default_assignee = Some(actor);
        self
    }
}

/// Ordered set of step templates forming one closing workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: TemplateId,
    pub name: String,
    pub description: String,
    pub version: String,
    pub steps: Vec<StepTemplate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TemplateId::new(),
            name: name.into(),
            description: description.into(),
            version: "1.0.0".to_string(),
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn add_step(mut self, step: StepTemplate) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step(&self, code: &str) -> Option<&StepTemplate> {
        self.steps.iter().find(|s| s.code == code)
    }

    /// Validate the template: structure, acyclicity, and the condition
    /// rule. A step depending on a conditional step must carry at least
    /// the dependency's conditions, otherwise a period could materialize
    /// the dependent without its dependency.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.steps.is_empty() {
            return Err(TemplateError::EmptyTemplate);
        }

        TemplateDag::build(self.steps.iter())?;

        let by_code: HashMap<&str, &StepTemplate> =
            self.steps.iter().map(|s| (s.code.as_str(), s)).collect();

        for step in &self.steps {
            for dep_code in &step.dependencies {
                let dep = by_code[dep_code.as_str()];
                for condition in &dep.execution_conditions {
                    if !step.execution_conditions.contains(condition) {
                        return Err(TemplateError::ConditionMismatch {
                            step: step.code.clone(),
                            dependency: dep.code.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// Registry of validated workflow templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: Arc<RwLock<HashMap<TemplateId, WorkflowTemplate>>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a template. Invalid templates are rejected and
    /// never become visible.
    pub async fn register(&self, template: WorkflowTemplate) -> Result<TemplateId, TemplateError> {
        template.validate()?;

        let id = template.id;
        tracing::info!(
            template_id = %id,
            name = %template.name,
            step_count = template.steps.len(),
            "workflow template registered"
        );

        self.templates.write().await.insert(id, template);
        Ok(id)
    }

    pub async fn get(&self, id: TemplateId) -> Option<WorkflowTemplate> {
        self.templates.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<WorkflowTemplate> {
        self.templates.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use closing_core::ClosureType;

    fn simple_step(code: &str) -> StepTemplate {
        StepTemplate::new(code, code, StepCategory::Preparation, StepKind::Automatic)
    }

    #[tokio::test]
    async fn test_register_valid_template() {
        let store = TemplateStore::new();
        let template = WorkflowTemplate::new("monthly-close", "Standard monthly close")
            .add_step(simple_step("a"))
            .add_step(simple_step("b").depends_on("a"));

        let id = store.register(template).await.unwrap();
        assert!(store.get(id).await.is_some());
    }

    #[tokio::test]
    async fn test_cyclic_template_rejected() {
        let store = TemplateStore::new();
        let template = WorkflowTemplate::new("broken", "")
            .add_step(simple_step("a").depends_on("b"))
            .add_step(simple_step("b").depends_on("a"));

        let err = store.register(template).await.unwrap_err();
        assert!(matches!(err, TemplateError::CycleDetected(_)));
        assert!(store.list().await.is_empty());
    }

    #[test]
    fn test_empty_template_rejected() {
        let template = WorkflowTemplate::new("empty", "");
        assert!(matches!(
            template.validate(),
            Err(TemplateError::EmptyTemplate)
        ));
    }

    #[test]
    fn test_condition_mismatch_rejected() {
        let annual_only = ExecutionCondition::closure_type_in([ClosureType::Annual]);

        // "b" depends on the conditional "a" without carrying its
        // condition: a monthly period would materialize b but not a.
        let template = WorkflowTemplate::new("dangling", "")
            .add_step(simple_step("a").with_condition(annual_only.clone()))
            .add_step(simple_step("b").depends_on("a"));

        assert!(matches!(
            template.validate(),
            Err(TemplateError::ConditionMismatch { .. })
        ));

        // Carrying the same condition makes the template valid.
        let template = WorkflowTemplate::new("aligned", "")
            .add_step(simple_step("a").with_condition(annual_only.clone()))
            .add_step(simple_step("b").depends_on("a").with_condition(annual_only));

        assert!(template.validate().is_ok());
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let template = WorkflowTemplate::new("dup", "")
            .add_step(simple_step("a"))
            .add_step(simple_step("a"));

        assert!(matches!(
            template.validate(),
            Err(TemplateError::DuplicateStep(_))
        ));
    }
}
