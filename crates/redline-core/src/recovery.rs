//! Audit trail and outcome metrics for the review/fix loop.

use crate::issue::{FixStrategy, SeverityCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reminder attached to every outcome snapshot.
pub const OUTCOME_NOTE: &str = "operations_succeeded counts fixes that changed the markdown; \
it is not the number of issues resolved. Compare the before/after severity counts: a fix \
can resolve one issue while the next review reports new ones.";

/// One attempted section-level operation, recorded whether or not it changed anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixApplied {
    pub iteration: u32,
    pub strategy: FixStrategy,
    pub target: String,
    pub reason: String,
    pub success: bool,
    #[serde(default)]
    pub issues_addressed: usize,
    pub at: DateTime<Utc>,
}

impl FixApplied {
    pub fn new(
        iteration: u32,
        strategy: FixStrategy,
        target: impl Into<String>,
        reason: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            iteration,
            strategy,
            target: target.into(),
            reason: reason.into(),
            success,
            issues_addressed: 0,
            at: Utc::now(),
        }
    }

    pub fn with_issues_addressed(mut self, count: usize) -> Self {
        self.issues_addressed = count;
        self
    }
}

/// Before/after issue counts around the fix passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeMetrics {
    /// Counts from the review right before the first fix.
    pub before: SeverityCounts,
    /// Counts from the review after the last fix. `None` if that review failed.
    pub after: Option<SeverityCounts>,
    pub operations_attempted: usize,
    pub operations_succeeded: usize,
    pub note: String,
}

impl OutcomeMetrics {
    pub fn new(before: SeverityCounts) -> Self {
        Self {
            before,
            after: None,
            operations_attempted: 0,
            operations_succeeded: 0,
            note: OUTCOME_NOTE.to_string(),
        }
    }

    /// Net change in total issues (negative means fewer issues after fixing).
    pub fn issue_delta(&self) -> Option<i64> {
        self.after
            .map(|after| after.total() as i64 - self.before.total() as i64)
    }
}

/// Recovery bookkeeping handed back with the final article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryMetadata {
    /// Plan regeneration attempts made upstream, carried through for reporting.
    pub plan_retries: u32,
    /// Fix passes actually executed.
    pub fixer_iterations: u32,
    pub fixes_applied: Vec<FixApplied>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_metrics: Option<OutcomeMetrics>,
}

impl RecoveryMetadata {
    pub fn with_plan_retries(mut self, plan_retries: u32) -> Self {
        self.plan_retries = plan_retries;
        self
    }

    pub fn record(&mut self, fix: FixApplied) {
        if let Some(metrics) = self.outcome_metrics.as_mut() {
            metrics.operations_attempted += 1;
            if fix.success {
                metrics.operations_succeeded += 1;
            }
        }
        self.fixes_applied.push(fix);
    }

    pub fn succeeded(&self) -> usize {
        self.fixes_applied.iter().filter(|f| f.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_updates_operation_counters() {
        let mut meta = RecoveryMetadata::default();
        meta.outcome_metrics = Some(OutcomeMetrics::new(SeverityCounts {
            critical: 1,
            major: 0,
            minor: 2,
        }));
        meta.record(FixApplied::new(1, FixStrategy::DirectEdit, "A", "ok", true));
        meta.record(FixApplied::new(1, FixStrategy::Regenerate, "B", "failed", false));

        let metrics = meta.outcome_metrics.as_ref().unwrap();
        assert_eq!(metrics.operations_attempted, 2);
        assert_eq!(metrics.operations_succeeded, 1);
        assert_eq!(meta.succeeded(), 1);
        assert!(metrics.issue_delta().is_none());
    }

    #[test]
    fn test_issue_delta_reports_new_issues_honestly() {
        let mut metrics = OutcomeMetrics::new(SeverityCounts {
            critical: 0,
            major: 1,
            minor: 1,
        });
        metrics.after = Some(SeverityCounts {
            critical: 0,
            major: 2,
            minor: 1,
        });
        assert_eq!(metrics.issue_delta(), Some(1));
        assert!(metrics.note.contains("not the number of issues resolved"));
    }

    #[test]
    fn test_fix_applied_serializes_strategy_snake_case() {
        let fix = FixApplied::new(2, FixStrategy::AddSection, "Bosses", "inserted", true);
        let json = serde_json::to_value(&fix).unwrap();
        assert_eq!(json["strategy"], "add_section");
        assert_eq!(json["iteration"], 2);
    }
}
