//! Registry binding step codes to calculator implementations.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Calculator;

/// Maps the code of a calculation step to the calculator the engine must
/// invoke for it.
#[derive(Clone, Default)]
pub struct CalculatorRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Calculator>>>>,
}

impl CalculatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, step_code: impl Into<String>, calculator: Arc<dyn Calculator>) {
        let step_code = step_code.into();
        tracing::info!(
            step_code = %step_code,
            calculator = calculator.name(),
            "calculator registered"
        );
        self.inner.write().await.insert(step_code, calculator);
    }

    pub async fn get(&self, step_code: &str) -> Option<Arc<dyn Calculator>> {
        self.inner.read().await.get(step_code).cloned()
    }

    pub async fn codes(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

impl std::fmt::Debug for CalculatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalculatorRegistry").finish_non_exhaustive()
    }
}
