//! Article plan and research pool handed in by the generation pipeline.
//!
//! Both are read-only here. `add_section` fixes extend a copy of the plan;
//! the caller's plan is never mutated.

use serde::{Deserialize, Serialize};

/// Section length used when neither the plan nor the document gives one.
pub const DEFAULT_SECTION_WORDS: u32 = 350;

/// One planned section of the article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionPlan {
    pub headline: String,
    pub goal: String,
    #[serde(default)]
    pub research_queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_words: Option<u32>,
}

impl SectionPlan {
    pub fn new(headline: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            headline: headline.into(),
            goal: goal.into(),
            research_queries: Vec::new(),
            target_words: None,
        }
    }
}

/// Content-safety constraints the writer must keep honouring during repairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSafety {
    #[serde(default)]
    pub avoid_spoilers: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl PlanSafety {
    /// Prompt-ready summary, empty when there is nothing to say.
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        if self.avoid_spoilers {
            lines.push("- Avoid story spoilers.".to_string());
        }
        lines.extend(
            self.notes
                .iter()
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .map(|n| format!("- {}", n)),
        );
        lines.join("\n")
    }
}

/// Planned structure of the article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub title: String,
    pub category_slug: String,
    #[serde(default)]
    pub sections: Vec<SectionPlan>,
    #[serde(default)]
    pub safety: PlanSafety,
}

impl Plan {
    /// Index of the planned section whose headline matches case-insensitively.
    pub fn section_index(&self, headline: &str) -> Option<usize> {
        let wanted = headline.trim();
        self.sections
            .iter()
            .position(|s| s.headline.trim().eq_ignore_ascii_case(wanted))
    }

    /// A copy of this plan with one more section appended, plus the new index.
    pub fn with_extra_section(&self, section: SectionPlan) -> (Plan, usize) {
        let mut extended = self.clone();
        extended.sections.push(section);
        let index = extended.sections.len() - 1;
        (extended, index)
    }
}

/// One gathered research source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchSource {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub summary: String,
}

/// Research gathered before writing. Passed through to the section writer;
/// the reviewer only sees a condensed summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchPool {
    #[serde(default)]
    pub sources: Vec<ResearchSource>,
}

impl ResearchPool {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Compact per-source digest bounded to `max_chars` characters.
    pub fn condensed_summary(&self, max_chars: usize) -> String {
        let mut out = String::new();
        let mut used = 0usize;
        for source in &self.sources {
            let summary: String = source.summary.split_whitespace().collect::<Vec<_>>().join(" ");
            let line = match &source.url {
                Some(url) => format!("- {} ({}): {}\n", source.title.trim(), url, summary),
                None => format!("- {}: {}\n", source.title.trim(), summary),
            };
            let len = line.chars().count();
            if used + len > max_chars {
                let remaining = max_chars.saturating_sub(used);
                if remaining > 16 {
                    out.extend(line.chars().take(remaining.saturating_sub(4)));
                    out.push_str("...\n");
                }
                break;
            }
            out.push_str(&line);
            used += len;
        }
        out
    }
}
