//! Core domain model for Redline: issues, sections, plans and fix routing.
//!
//! Nothing in this crate performs I/O or talks to a model.

pub mod dispatch;
pub mod issue;
pub mod plan;
pub mod recovery;
pub mod section;
pub mod usage;

pub use dispatch::{plan_fixes, FixOperation, SectionFixPlan, MAX_FIXES_PER_ITERATION};
pub use issue::{FixStrategy, Issue, IssueCategory, Severity, SeverityCounts, GLOBAL_LOCATION};
pub use plan::{Plan, PlanSafety, ResearchPool, ResearchSource, SectionPlan, DEFAULT_SECTION_WORDS};
pub use recovery::{FixApplied, OutcomeMetrics, RecoveryMetadata};
pub use section::Section;
pub use usage::{merge_usage, Usage};
