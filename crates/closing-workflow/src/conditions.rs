//! Execution-condition predicates.
//!
//! Step templates carry a closed set of typed predicates evaluated against
//! the period's attributes at materialization time. A step whose
//! conditions do not all hold is not materialized for that period.

use closing_core::{ClosureType, PeriodAttributes};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExecutionCondition {
    /// The attribute must equal the value exactly.
    AttributeEquals { key: String, value: String },
    /// The attribute must be one of the listed values.
    AttributeInSet { key: String, values: BTreeSet<String> },
    /// The period's closure type must be one of the listed types.
    ClosureTypeIn { types: BTreeSet<ClosureType> },
}

impl ExecutionCondition {
    pub fn attribute_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::AttributeEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn attribute_in<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AttributeInSet {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn closure_type_in(types: impl IntoIterator<Item = ClosureType>) -> Self {
        Self::ClosureTypeIn {
            types: types.into_iter().collect(),
        }
    }

    pub fn evaluate(&self, attributes: &PeriodAttributes) -> bool {
        match self {
            ExecutionCondition::AttributeEquals { key, value } => {
                attributes.attribute(key) == Some(value.as_str())
            }
            ExecutionCondition::AttributeInSet { key, values } => attributes
                .attribute(key)
                .map(|v| values.contains(v))
                .unwrap_or(false),
            ExecutionCondition::ClosureTypeIn { types } => types.contains(&attributes.closure_type),
        }
    }
}

/// All conditions must hold; an empty set always holds.
pub fn evaluate_all(conditions: &[ExecutionCondition], attributes: &PeriodAttributes) -> bool {
    conditions.iter().all(|c| c.evaluate(attributes))
}
