//! Control catalog: the registry of named checks.

use async_trait::async_trait;
use closing_calculators::PeriodContext;
use closing_core::StepCategory;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::control::{ControlCheck, ControlDefinition, ControlFramework, ControlOutcome};
use crate::{ControlError, Result};

struct RegisteredControl {
    definition: ControlDefinition,
    check: Arc<dyn ControlCheck>,
}

/// In-memory control registry keyed by control id.
#[derive(Clone, Default)]
pub struct ControlCatalog {
    controls: Arc<RwLock<HashMap<String, RegisteredControl>>>,
}

impl ControlCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, definition: ControlDefinition, check: Arc<dyn ControlCheck>) {
        tracing::info!(
            control_id = %definition.id,
            category = %definition.category,
            severity = %definition.severity,
            "control registered"
        );
        self.controls
            .write()
            .await
            .insert(definition.id.clone(), RegisteredControl { definition, check });
    }

    pub async fn definitions(&self) -> Vec<ControlDefinition> {
        self.controls
            .read()
            .await
            .values()
            .map(|c| c.definition.clone())
            .collect()
    }
}

impl std::fmt::Debug for ControlCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlCatalog").finish_non_exhaustive()
    }
}

#[async_trait]
impl ControlFramework for ControlCatalog {
    async fn controls_for(&self, category: StepCategory) -> Vec<ControlDefinition> {
        let mut scoped: Vec<ControlDefinition> = self
            .controls
            .read()
            .await
            .values()
            .filter(|c| c.definition.category == category)
            .map(|c| c.definition.clone())
            .collect();
        scoped.sort_by(|a, b| a.id.cmp(&b.id));
        scoped
    }

    async fn evaluate(&self, ctx: &PeriodContext, control_id: &str) -> Result<ControlOutcome> {
        let (definition, check) = {
            let controls = self.controls.read().await;
            let registered = controls
                .get(control_id)
                .ok_or_else(|| ControlError::UnknownControl(control_id.to_string()))?;
            (registered.definition.clone(), registered.check.clone())
        };

        let finding = check.run(ctx).await?;

        if !finding.passed {
            tracing::warn!(
                control_id = %control_id,
                severity = %definition.severity,
                details = %finding.details,
                "control failed"
            );
        }

        Ok(ControlOutcome {
            control_id: definition.id,
            passed: finding.passed,
            severity: definition.severity,
            details: finding.details,
        })
    }
}
