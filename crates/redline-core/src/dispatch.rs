//! Routing of reviewer issues to section-level fix operations.
//!
//! Input issues are never filtered in place; every step builds a new
//! partition. Per section at most one operation runs per iteration: a special
//! (writer-backed) fix when one exists, otherwise one batch edit covering all
//! remaining issues for that section.

use crate::issue::{FixStrategy, Issue, Severity, GLOBAL_LOCATION};
use crate::section::normalize_headline;
use tracing::warn;

/// Default cap on sections touched in one iteration.
pub const MAX_FIXES_PER_ITERATION: usize = 5;

/// The single operation chosen for a section this iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum FixOperation {
    /// Regenerate or add a section through the section writer.
    Special(Issue),
    /// One edit call resolving every listed issue.
    Batch(Vec<Issue>),
}

impl FixOperation {
    /// Strategy recorded in the audit trail. Two or more batched issues are a
    /// synthesized `batch`; a single one keeps its own strategy.
    pub fn strategy(&self) -> FixStrategy {
        match self {
            FixOperation::Special(issue) => issue.fix_strategy,
            FixOperation::Batch(issues) if issues.len() == 1 => issues[0].fix_strategy,
            FixOperation::Batch(_) => FixStrategy::Batch,
        }
    }

    pub fn issues(&self) -> &[Issue] {
        match self {
            FixOperation::Special(issue) => std::slice::from_ref(issue),
            FixOperation::Batch(issues) => issues,
        }
    }
}

/// Everything planned for one target section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionFixPlan {
    /// Section headline as first spelled by the reviewer, or `"global"`.
    pub target: String,
    pub operation: FixOperation,
    /// Issues for this section left for the next review to re-assess.
    pub deferred: Vec<Issue>,
}

impl SectionFixPlan {
    pub fn worst_severity(&self) -> Severity {
        self.operation
            .issues()
            .iter()
            .chain(self.deferred.iter())
            .map(|i| i.severity)
            .max()
            .unwrap_or_default()
    }

    /// A batch edit aimed at `"global"`, which names no section and so can
    /// never be applied.
    pub fn is_global_batch(&self) -> bool {
        matches!(self.operation, FixOperation::Batch(_))
            && self.target.eq_ignore_ascii_case(GLOBAL_LOCATION)
    }
}

#[derive(Debug, Default)]
struct Group {
    target: String,
    key: String,
    special: Vec<Issue>,
    batchable: Vec<Issue>,
}

/// Pick the special issue to run: `regenerate` beats `add_section`, otherwise first.
fn select_special(special: &[Issue]) -> Option<usize> {
    special
        .iter()
        .position(|i| i.fix_strategy == FixStrategy::Regenerate)
        .or(if special.is_empty() { None } else { Some(0) })
}

/// Partition issues into per-section fix plans.
///
/// `no_action` issues are dropped, unknown strategies are logged and ignored.
/// Plans come back ordered by their worst severity (critical first), ties in
/// order of first appearance, so a per-iteration cap touches the worst
/// sections first. Global batch plans sort after every section plan.
pub fn plan_fixes(issues: &[Issue]) -> Vec<SectionFixPlan> {
    let mut groups: Vec<Group> = Vec::new();

    for issue in issues {
        match issue.fix_strategy {
            FixStrategy::NoAction => continue,
            FixStrategy::Unknown => {
                warn!(
                    section = issue.target(),
                    message = %issue.message,
                    "ignoring issue with unknown fix strategy"
                );
                continue;
            }
            _ => {}
        }

        let target = issue.target();
        let key = normalize_headline(target);
        let idx = match groups.iter().position(|g| g.key == key) {
            Some(idx) => idx,
            None => {
                groups.push(Group {
                    target: target.to_string(),
                    key,
                    ..Group::default()
                });
                groups.len() - 1
            }
        };

        if issue.fix_strategy.is_special() {
            groups[idx].special.push(issue.clone());
        } else {
            groups[idx].batchable.push(issue.clone());
        }
    }

    let mut plans: Vec<SectionFixPlan> = groups
        .into_iter()
        .filter_map(|group| match select_special(&group.special) {
            Some(chosen) => {
                let mut deferred: Vec<Issue> = group
                    .special
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != chosen)
                    .map(|(_, issue)| issue.clone())
                    .collect();
                deferred.extend(group.batchable.iter().cloned());
                Some(SectionFixPlan {
                    target: group.target,
                    operation: FixOperation::Special(group.special[chosen].clone()),
                    deferred,
                })
            }
            None if !group.batchable.is_empty() => Some(SectionFixPlan {
                target: group.target,
                operation: FixOperation::Batch(group.batchable),
                deferred: Vec::new(),
            }),
            None => None,
        })
        .collect();

    // Stable: equal keys keep first-appearance order.
    plans.sort_by_key(|plan| (plan.is_global_batch(), std::cmp::Reverse(plan.worst_severity())));
    plans
}
