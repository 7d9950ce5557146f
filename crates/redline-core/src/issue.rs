//! Issue vocabulary shared by the reviewer, dispatcher and fixers.
//!
//! Issues are produced fresh by every review. Nothing downstream mutates them;
//! the dispatcher builds new read-only partitions instead.

use serde::{Deserialize, Serialize};

/// Location value the reviewer uses for document-wide issues.
pub const GLOBAL_LOCATION: &str = "global";

/// How badly an issue hurts the article. Critical issues block publication.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        }
    }
}

/// Informational category. Routing never looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Redundancy,
    Coverage,
    Factual,
    #[default]
    Style,
    Seo,
    Structure,
    Checklist,
}

/// Repair method assigned to an issue.
///
/// `Batch` is synthesized internally and never comes from the reviewer.
/// Strategies this build does not know deserialize to `Unknown` so a new
/// reviewer vocabulary cannot crash the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    DirectEdit,
    Regenerate,
    AddSection,
    Expand,
    Batch,
    NoAction,
    #[serde(other)]
    Unknown,
}

impl FixStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            FixStrategy::DirectEdit => "direct_edit",
            FixStrategy::Regenerate => "regenerate",
            FixStrategy::AddSection => "add_section",
            FixStrategy::Expand => "expand",
            FixStrategy::Batch => "batch",
            FixStrategy::NoAction => "no_action",
            FixStrategy::Unknown => "unknown",
        }
    }

    /// Strategies handled by the external section writer rather than an edit call.
    pub fn is_special(&self) -> bool {
        matches!(self, FixStrategy::Regenerate | FixStrategy::AddSection)
    }
}

/// One defect reported by the reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: Severity,
    #[serde(default)]
    pub category: IssueCategory,
    /// Section headline, `"global"`, or absent for document-wide issues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_instruction: Option<String>,
    pub fix_strategy: FixStrategy,
}

impl Issue {
    pub fn new(severity: Severity, message: impl Into<String>, strategy: FixStrategy) -> Self {
        Self {
            severity,
            category: IssueCategory::default(),
            location: None,
            message: message.into(),
            fix_instruction: None,
            fix_strategy: strategy,
        }
    }

    pub fn with_category(mut self, category: IssueCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.fix_instruction = Some(instruction.into());
        self
    }

    /// Grouping key: the location, or `"global"` when absent or blank.
    pub fn target(&self) -> &str {
        self.location
            .as_deref()
            .map(str::trim)
            .filter(|loc| !loc.is_empty())
            .unwrap_or(GLOBAL_LOCATION)
    }

    /// True when the issue points at a whole-document concern rather than a section.
    pub fn is_global(&self) -> bool {
        self.target().eq_ignore_ascii_case(GLOBAL_LOCATION)
    }

    /// Non-empty fix instruction, if any.
    pub fn instruction(&self) -> Option<&str> {
        self.fix_instruction
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty())
    }

    /// Whether the fixer should ever see this issue.
    pub fn is_actionable(&self) -> bool {
        !matches!(self.fix_strategy, FixStrategy::NoAction)
    }
}

/// Issue counts by severity, used for before/after outcome snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub major: usize,
    pub minor: usize,
}

impl SeverityCounts {
    pub fn from_issues(issues: &[Issue]) -> Self {
        issues.iter().fold(Self::default(), |mut acc, issue| {
            match issue.severity {
                Severity::Critical => acc.critical += 1,
                Severity::Major => acc.major += 1,
                Severity::Minor => acc.minor += 1,
            }
            acc
        })
    }

    pub fn total(&self) -> usize {
        self.critical + self.major + self.minor
    }

    /// Publication is blocked while any critical issue remains.
    pub fn blocks_publication(&self) -> bool {
        self.critical > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_deserializes_camel_case_reviewer_shape() {
        let json = r#"{
            "severity": "major",
            "category": "style",
            "location": "Combat",
            "message": "Wordy phrasing",
            "fixInstruction": "replace 'utilize' with 'use'",
            "fixStrategy": "direct_edit"
        }"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.severity, Severity::Major);
        assert_eq!(issue.target(), "Combat");
        assert_eq!(issue.instruction(), Some("replace 'utilize' with 'use'"));
        assert_eq!(issue.fix_strategy, FixStrategy::DirectEdit);
    }

    #[test]
    fn test_unknown_strategy_does_not_fail_parsing() {
        let json = r#"{"severity":"minor","message":"m","fixStrategy":"rewrite_everything"}"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.fix_strategy, FixStrategy::Unknown);
        assert_eq!(issue.category, IssueCategory::Style);
    }

    #[test]
    fn test_missing_or_blank_location_targets_global() {
        let issue = Issue::new(Severity::Minor, "m", FixStrategy::Expand);
        assert_eq!(issue.target(), GLOBAL_LOCATION);
        assert!(issue.is_global());

        let blank = issue.clone().with_location("   ");
        assert_eq!(blank.target(), GLOBAL_LOCATION);
    }

    #[test]
    fn test_blank_instruction_counts_as_missing() {
        let issue = Issue::new(Severity::Minor, "m", FixStrategy::DirectEdit).with_instruction(" ");
        assert!(issue.instruction().is_none());
    }

    #[test]
    fn test_severity_counts() {
        let issues = vec![
            Issue::new(Severity::Critical, "a", FixStrategy::Regenerate),
            Issue::new(Severity::Minor, "b", FixStrategy::DirectEdit),
            Issue::new(Severity::Minor, "c", FixStrategy::NoAction),
        ];
        let counts = SeverityCounts::from_issues(&issues);
        assert_eq!(counts.critical, 1);
        assert_eq!(counts.minor, 2);
        assert_eq!(counts.total(), 3);
        assert!(counts.blocks_publication());
    }
}
