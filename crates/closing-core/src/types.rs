use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// Newtype wrappers for type safety

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodId(Uuid);

impl PeriodId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PeriodId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeriodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(Uuid);

impl TemplateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the human or system actor behind an operation.
///
/// Unlike the uuid-backed identifiers above this wraps a free-form
/// principal name, so service accounts ("system") and directory users
/// ("jdupont") share one representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// Closure vocabulary shared across crates

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureType {
    Monthly,
    Quarterly,
    Annual,
}

impl std::fmt::Display for ClosureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClosureType::Monthly => write!(f, "monthly"),
            ClosureType::Quarterly => write!(f, "quarterly"),
            ClosureType::Annual => write!(f, "annual"),
        }
    }
}

/// Functional family of a closing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Preparation,
    Provisions,
    Depreciation,
    Regularization,
    Statements,
    Validation,
    Archiving,
}

impl StepCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepCategory::Preparation => "preparation",
            StepCategory::Provisions => "provisions",
            StepCategory::Depreciation => "depreciation",
            StepCategory::Regularization => "regularization",
            StepCategory::Statements => "statements",
            StepCategory::Validation => "validation",
            StepCategory::Archiving => "archiving",
        }
    }
}

impl std::fmt::Display for StepCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution discipline of a closing step; drives handler dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Automatic,
    Manual,
    Calculation,
    Control,
    Approval,
    Validation,
    Notification,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Automatic => "automatic",
            StepKind::Manual => "manual",
            StepKind::Calculation => "calculation",
            StepKind::Control => "control",
            StepKind::Approval => "approval",
            StepKind::Validation => "validation",
            StepKind::Notification => "notification",
        }
    }

    /// Calculation and control handlers are required to be idempotent and
    /// are the only kinds eligible for automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepKind::Calculation | StepKind::Control)
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Attributes of one accounting period, evaluated by execution-condition
/// predicates and by the compliance scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodAttributes {
    /// Business sector of the entity being closed (e.g. "retail").
    pub sector: String,
    pub closure_type: ClosureType,
    /// Legal deadline for the closure; drives the deadline-adherence score.
    pub deadline: DateTime<Utc>,
    /// Free-form attributes consulted by condition predicates.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl PeriodAttributes {
    pub fn new(sector: impl Into<String>, closure_type: ClosureType, deadline: DateTime<Utc>) -> Self {
        Self {
            sector: sector.into(),
            closure_type,
            deadline,
            extra: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Look up an attribute by key. "sector" resolves to the dedicated
    /// field; anything else goes through the extra map.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        if key == "sector" {
            return Some(self.sector.as_str());
        }
        self.extra.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_id_uniqueness() {
        let id1 = PeriodId::new();
        let id2 = PeriodId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_actor_id_display() {
        let actor = ActorId::new("jdupont");
        assert_eq!(actor.to_string(), "jdupont");
        assert_eq!(ActorId::system().as_str(), "system");
    }

    #[test]
    fn test_attribute_lookup() {
        let attrs = PeriodAttributes::new("retail", ClosureType::Monthly, Utc::now())
            .with_attribute("country", "FR");

        assert_eq!(attrs.attribute("sector"), Some("retail"));
        assert_eq!(attrs.attribute("country"), Some("FR"));
        assert_eq!(attrs.attribute("region"), None);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(StepKind::Calculation.is_retryable());
        assert!(StepKind::Control.is_retryable());
        assert!(!StepKind::Manual.is_retryable());
        assert!(!StepKind::Notification.is_retryable());
    }
}
