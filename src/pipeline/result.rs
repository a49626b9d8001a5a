// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mutable status carrier threaded through a module's lifecycle.

use crate::error::XmError;

/// Where a module stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleStatus {
    /// Created, not finished.
    #[default]
    Pending,
    /// Ran to completion.
    Success,
    /// Skipped by `is_skip`.
    Skipped,
    /// At least one critical error was recorded.
    Failed,
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleStatus::Pending => write!(f, "PENDING"),
            ModuleStatus::Success => write!(f, "SUCCESS"),
            ModuleStatus::Skipped => write!(f, "SKIPPED"),
            ModuleStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// One recorded error, tagged by severity.
#[derive(Debug)]
pub struct ResultError {
    /// Critical errors fail the module; non-critical ones (post-hook
    /// failures, chmod warnings) never abort anything.
    pub critical: bool,
    pub error: XmError,
}

/// Status, message and the ordered error list of one module execution.
///
/// Mutated by run/until/post-hook; read by the pipeline to decide whether to
/// continue under `IgnoreError`.
#[derive(Debug, Default)]
pub struct ModuleResult {
    status: ModuleStatus,
    message: String,
    errors: Vec<ResultError>,
}

impl ModuleResult {
    /// A fresh pending result.
    #[must_use]
    pub fn pending() -> Self {
        Self::default()
    }

    /// Mark the module successful.
    pub fn succeed(&mut self, message: impl Into<String>) {
        self.status = ModuleStatus::Success;
        self.message = message.into();
    }

    /// Mark the module skipped.
    pub fn skip(&mut self, message: impl Into<String>) {
        self.status = ModuleStatus::Skipped;
        self.message = message.into();
    }

    /// Record an error. A critical error also moves the status to Failed.
    pub fn record(&mut self, error: XmError, critical: bool) {
        if critical {
            self.status = ModuleStatus::Failed;
            if self.message.is_empty() {
                self.message = error.to_string();
            }
        }
        self.errors.push(ResultError { critical, error });
    }

    /// True iff any critical error is present.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.errors.iter().any(|e| e.critical)
    }

    #[must_use]
    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn errors(&self) -> &[ResultError] {
        &self.errors
    }

    /// The critical errors joined into one line for terminal status output.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        self.errors
            .iter()
            .filter(|e| e.critical)
            .map(|e| e.error.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_result_is_pending() {
        let result = ModuleResult::pending();
        assert_eq!(result.status(), ModuleStatus::Pending);
        assert!(!result.is_failed());
    }

    #[test]
    fn test_critical_error_fails() {
        let mut result = ModuleResult::pending();
        result.record(XmError::Module("boom".to_string()), true);
        assert!(result.is_failed());
        assert_eq!(result.status(), ModuleStatus::Failed);
        assert!(result.message().contains("boom"));
    }

    #[test]
    fn test_non_critical_error_does_not_fail() {
        let mut result = ModuleResult::pending();
        result.record(XmError::Module("chmod warning".to_string()), false);
        assert!(!result.is_failed());
        assert_eq!(result.status(), ModuleStatus::Pending);
        result.succeed("done");
        assert_eq!(result.status(), ModuleStatus::Success);
        assert_eq!(result.errors().len(), 1);
    }

    #[test]
    fn test_skip() {
        let mut result = ModuleResult::pending();
        result.skip("no loadbalancer hosts");
        assert_eq!(result.status(), ModuleStatus::Skipped);
        assert!(!result.is_failed());
    }

    #[test]
    fn test_failure_summary_lists_critical_only() {
        let mut result = ModuleResult::pending();
        result.record(XmError::Module("minor".to_string()), false);
        result.record(XmError::Module("major".to_string()), true);
        let summary = result.failure_summary();
        assert!(summary.contains("major"));
        assert!(!summary.contains("minor"));
    }
}
