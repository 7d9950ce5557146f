//! Review, dispatch, fix, re-review.
//!
//! The controller owns the article for the whole run and threads each new
//! version forward; executors only ever see a borrowed snapshot. The markdown
//! changes only when an operation reports success, so a cancelled or failed
//! operation can never leave a half-applied edit behind.

use crate::fix::{apply_batch_fix, apply_special_fix, BatchFixConfig, FixResult, SpecialFixContext};
use crate::llm::client::{LlmError, StructuredLlm};
use crate::review::{review_article, ReviewConfig, ReviewInput, ReviewOutcome};
use crate::writer::SectionWriter;
use chrono::{DateTime, Utc};
use redline_core::{
    merge_usage, plan_fixes, FixApplied, FixOperation, Issue, OutcomeMetrics, Plan,
    RecoveryMetadata, ResearchPool, SectionFixPlan, SeverityCounts, Usage,
    MAX_FIXES_PER_ITERATION,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Fix passes allowed. The review after the last pass is always run.
    pub max_iterations: u32,
    pub max_fixes_per_iteration: usize,
    pub review: ReviewConfig,
    pub batch: BatchFixConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_fixes_per_iteration: MAX_FIXES_PER_ITERATION,
            review: ReviewConfig::default(),
            batch: BatchFixConfig::default(),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Approved,
    /// The review left nothing actionable.
    IssuesExhausted,
    MaxIterations,
    Cancelled,
}

/// One fix pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationReport {
    pub iteration: u32,
    #[serde(skip)]
    pub markdown: String,
    pub fixes_applied: Vec<FixApplied>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub run_id: Uuid,
    pub markdown: String,
    pub approved: bool,
    pub termination: Termination,
    /// Issues from the last successful review.
    pub remaining_issues: Vec<Issue>,
    pub suggestions: Vec<String>,
    pub iterations: Vec<IterationReport>,
    pub metadata: RecoveryMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("review failed in iteration {iteration}")]
    Review {
        iteration: u32,
        #[source]
        source: LlmError,
    },
}

pub struct RecoveryLoop {
    llm: Arc<dyn StructuredLlm>,
    writer: Arc<dyn SectionWriter>,
    config: RecoveryConfig,
    plan_retries: u32,
}

impl RecoveryLoop {
    pub fn new(
        llm: Arc<dyn StructuredLlm>,
        writer: Arc<dyn SectionWriter>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            llm,
            writer,
            config,
            plan_retries: 0,
        }
    }

    /// Plan regeneration attempts made before this loop, reported as-is.
    pub fn with_plan_retries(mut self, plan_retries: u32) -> Self {
        self.plan_retries = plan_retries;
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// A single review of `markdown`.
    pub async fn review(
        &self,
        markdown: &str,
        plan: &Plan,
        pool: &ResearchPool,
        cancel: &CancellationToken,
    ) -> Result<ReviewOutcome, LlmError> {
        let input = ReviewInput {
            plan,
            markdown,
            research: pool,
        };
        review_article(self.llm.as_ref(), &input, &self.config.review, cancel).await
    }

    async fn execute(
        &self,
        markdown: &str,
        fix: &SectionFixPlan,
        ctx: SpecialFixContext<'_>,
        cancel: &CancellationToken,
    ) -> FixResult {
        match &fix.operation {
            FixOperation::Special(issue) => apply_special_fix(markdown, issue, ctx, cancel).await,
            FixOperation::Batch(issues) => {
                apply_batch_fix(
                    self.llm.as_ref(),
                    markdown,
                    &fix.target,
                    issues,
                    &self.config.batch,
                    cancel,
                )
                .await
            }
        }
    }

    /// Run the loop until the article is approved, nothing actionable is
    /// left, the fix budget runs out or `cancel` fires.
    ///
    /// Only a failed review escalates. The one exception is the verification
    /// review after the final pass: its failure is logged and the last known
    /// issues are reported instead.
    pub async fn run(
        &self,
        markdown: &str,
        plan: &Plan,
        pool: &ResearchPool,
        cancel: &CancellationToken,
    ) -> Result<RecoveryReport, RecoveryError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let max_passes = self.config.max_iterations;
        let cap = self.config.max_fixes_per_iteration.max(1);

        let mut markdown = markdown.to_string();
        let mut metadata = RecoveryMetadata::default().with_plan_retries(self.plan_retries);
        let mut iterations: Vec<IterationReport> = Vec::new();
        let mut usage: Option<Usage> = None;
        let mut remaining: Vec<Issue> = Vec::new();
        let mut suggestions: Vec<String> = Vec::new();
        let mut approved = false;
        let mut passes: u32 = 0;

        info!(%run_id, max_passes, cap, "recovery loop started");

        let termination = loop {
            if cancel.is_cancelled() {
                break Termination::Cancelled;
            }

            let review = match self.review(&markdown, plan, pool, cancel).await {
                Ok(review) => review,
                Err(LlmError::Cancelled) => break Termination::Cancelled,
                Err(err) if passes > 0 && passes >= max_passes => {
                    warn!(%run_id, error = %err, "verification review failed; reporting last known issues");
                    break Termination::MaxIterations;
                }
                Err(source) => {
                    return Err(RecoveryError::Review {
                        iteration: passes + 1,
                        source,
                    })
                }
            };

            usage = merge_usage(usage, review.usage.clone());
            let counts = SeverityCounts::from_issues(&review.issues);
            match metadata.outcome_metrics.as_mut() {
                Some(metrics) => metrics.after = Some(counts),
                None => {
                    let mut metrics = OutcomeMetrics::new(counts);
                    metrics.after = Some(counts);
                    metadata.outcome_metrics = Some(metrics);
                }
            }
            approved = review.approved;
            remaining = review.issues;
            suggestions = review.suggestions;

            if approved {
                break Termination::Approved;
            }
            let plans = plan_fixes(&remaining);
            if plans.is_empty() {
                break Termination::IssuesExhausted;
            }
            if passes >= max_passes {
                break Termination::MaxIterations;
            }

            passes += 1;
            if let Some(metrics) = metadata.outcome_metrics.as_mut() {
                metrics.after = None;
            }
            if plans.len() > cap {
                debug!(iteration = passes, skipped = plans.len() - cap, "per-iteration cap reached");
            }

            let ctx = SpecialFixContext {
                plan,
                pool,
                writer: self.writer.as_ref(),
            };
            let mut pass_usage: Option<Usage> = None;
            let mut pass_fixes: Vec<FixApplied> = Vec::new();
            let mut cancelled = false;

            for fix in plans.iter().take(cap) {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let strategy = fix.operation.strategy();
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = self.execute(&markdown, fix, ctx, cancel) => Some(result),
                };
                let Some(result) = result else {
                    cancelled = true;
                    break;
                };

                info!(
                    iteration = passes,
                    section = %fix.target,
                    strategy = strategy.label(),
                    success = result.success,
                    "{}",
                    result.description
                );
                if !fix.deferred.is_empty() {
                    debug!(section = %fix.target, deferred = fix.deferred.len(), "issues left for next review");
                }

                pass_usage = merge_usage(pass_usage, result.usage.clone());
                let record = FixApplied::new(
                    passes,
                    strategy,
                    fix.target.clone(),
                    result.description,
                    result.success,
                )
                .with_issues_addressed(result.issues_addressed);
                pass_fixes.push(record.clone());
                metadata.record(record);
                if result.success {
                    markdown = result.markdown;
                }
            }

            metadata.fixer_iterations = passes;
            usage = merge_usage(usage, pass_usage.clone());
            iterations.push(IterationReport {
                iteration: passes,
                markdown: markdown.clone(),
                fixes_applied: pass_fixes,
                usage: pass_usage,
            });

            if cancelled {
                break Termination::Cancelled;
            }
        };

        info!(
            %run_id,
            ?termination,
            approved,
            passes,
            remaining = remaining.len(),
            "recovery loop finished"
        );

        Ok(RecoveryReport {
            run_id,
            markdown,
            approved,
            termination,
            remaining_issues: remaining,
            suggestions,
            iterations,
            metadata,
            usage,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingWriter, ScriptedLlm};
    use redline_core::SectionPlan;
    use serde_json::json;

    fn plan() -> Plan {
        Plan {
            title: "Guide".to_string(),
            category_slug: "guides".to_string(),
            sections: vec![SectionPlan::new("Intro", "Hook")],
            safety: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_zero_iterations_only_reviews() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_json(
            "article_review",
            json!({"approved": false, "issues": [{
                "severity": "minor", "category": "style", "location": "Intro",
                "message": "x", "fixInstruction": "y", "fixStrategy": "direct_edit"
            }], "suggestions": []}),
        );
        let controller = RecoveryLoop::new(
            llm.clone(),
            Arc::new(RecordingWriter::new()),
            RecoveryConfig {
                max_iterations: 0,
                ..RecoveryConfig::default()
            },
        );
        let report = controller
            .run("## Intro\n\nHi.\n", &plan(), &ResearchPool::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::MaxIterations);
        assert!(report.iterations.is_empty());
        assert_eq!(report.remaining_issues.len(), 1);
        let metrics = report.metadata.outcome_metrics.unwrap();
        assert_eq!(metrics.after, Some(metrics.before));
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_does_nothing() {
        let llm = Arc::new(ScriptedLlm::new());
        let controller = RecoveryLoop::new(
            llm.clone(),
            Arc::new(RecordingWriter::new()),
            RecoveryConfig::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = controller
            .run("## Intro\n\nHi.\n", &plan(), &ResearchPool::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::Cancelled);
        assert_eq!(report.markdown, "## Intro\n\nHi.\n");
        assert_eq!(llm.calls("article_review"), 0);
    }

    #[test]
    fn test_report_serializes_without_iteration_markdown() {
        let report = IterationReport {
            iteration: 1,
            markdown: "secret draft".to_string(),
            fixes_applied: Vec::new(),
            usage: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("markdown").is_none());
        assert_eq!(json["iteration"], 1);
        assert_eq!(
            serde_json::to_value(Termination::IssuesExhausted).unwrap(),
            "issues_exhausted"
        );
    }
}
