use serde::{Deserialize, Serialize};

/// Severity of a control. Ordered from informational to blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlSeverity {
    Info,
    Warning,
    Error,
    Blocking,
    Critical,
}

impl ControlSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlSeverity::Info => "info",
            ControlSeverity::Warning => "warning",
            ControlSeverity::Error => "error",
            ControlSeverity::Blocking => "blocking",
            ControlSeverity::Critical => "critical",
        }
    }

    /// A failed control of blocking severity prevents step completion.
    pub fn is_blocking(&self) -> bool {
        matches!(self, ControlSeverity::Blocking | ControlSeverity::Critical)
    }
}

impl std::fmt::Display for ControlSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(ControlSeverity::Info < ControlSeverity::Warning);
        assert!(ControlSeverity::Warning < ControlSeverity::Error);
        assert!(ControlSeverity::Error < ControlSeverity::Blocking);
        assert!(ControlSeverity::Blocking < ControlSeverity::Critical);
    }

    #[test]
    fn test_blocking_levels() {
        assert!(!ControlSeverity::Error.is_blocking());
        assert!(ControlSeverity::Blocking.is_blocking());
        assert!(ControlSeverity::Critical.is_blocking());
    }
}
