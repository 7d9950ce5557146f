//! One-call rewrite of a section resolving every batched issue at once.

use super::FixResult;
use crate::llm::client::{call_structured, StructuredLlm, StructuredRequest};
use crate::llm::models::Model;
use crate::llm::parse::{clean_section_text, truncate_str};
use crate::llm::prompts::batch_fix_system_prompt;
use redline_core::section::{has_section_heading, headlines, replace_section, section_content};
use redline_core::{FixStrategy, Issue, Severity};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Length acceptance gate, in characters of the trimmed section body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    /// Removal floor, capped at half the original so short sections can't
    /// be gutted.
    pub min_removal_chars: usize,
    /// Removal tolerated as a percentage of the original length.
    pub removal_ratio_pct: usize,
    pub addition_per_issue: usize,
    /// Applied to the addition bound when any issue is `expand` or critical.
    pub expansive_multiplier: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_removal_chars: 150,
            removal_ratio_pct: 40,
            addition_per_issue: 500,
            expansive_multiplier: 3,
        }
    }
}

/// Largest tolerated shrink and growth for one edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBounds {
    pub removal: usize,
    pub addition: usize,
}

pub fn length_bounds(original_chars: usize, issues: &[Issue], gate: &GateConfig) -> LengthBounds {
    let ratio = original_chars * gate.removal_ratio_pct / 100;
    let removal = ratio.max(gate.min_removal_chars.min(original_chars / 2));
    let expansive = issues
        .iter()
        .any(|i| i.fix_strategy == FixStrategy::Expand || i.severity == Severity::Critical);
    let mut addition = gate.addition_per_issue * issues.len().max(1);
    if expansive {
        addition *= gate.expansive_multiplier.max(1);
    }
    LengthBounds { removal, addition }
}

/// Accept an edit whose length delta stays within `bounds` (inclusive).
pub fn check_length(original_chars: usize, edited_chars: usize, bounds: LengthBounds) -> Result<i64, String> {
    let delta = edited_chars as i64 - original_chars as i64;
    if delta < -(bounds.removal as i64) {
        return Err(format!(
            "edit removed {} characters (limit {})",
            -delta, bounds.removal
        ));
    }
    if delta > bounds.addition as i64 {
        return Err(format!(
            "edit added {} characters (limit {})",
            delta, bounds.addition
        ));
    }
    Ok(delta)
}

#[derive(Debug, Clone)]
pub struct BatchFixConfig {
    pub gate: GateConfig,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for BatchFixConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            max_tokens: 8_000,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchFixResponseJson {
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    changes: Vec<ChangeJson>,
    #[serde(default)]
    grammar_check: Option<GrammarCheckJson>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChangeJson {
    #[serde(default)]
    issue: Option<usize>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GrammarCheckJson {
    #[serde(default)]
    passed: bool,
    #[serde(default)]
    notes: String,
}

fn batch_fix_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "reasoning": { "type": "string", "description": "Brief plan for resolving the issues" },
            "content": { "type": "string", "description": "Full replacement body of the section, no heading" },
            "changes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "issue": { "type": "integer", "description": "Number of the issue addressed" },
                        "summary": { "type": "string" },
                        "after": { "type": "string", "description": "Short verbatim excerpt of the new text" }
                    },
                    "required": ["issue", "summary", "after"],
                    "additionalProperties": false
                }
            },
            "grammarCheck": {
                "type": "object",
                "properties": {
                    "passed": { "type": "boolean" },
                    "notes": { "type": "string" }
                },
                "required": ["passed", "notes"],
                "additionalProperties": false
            }
        },
        "required": ["reasoning", "content", "changes", "grammarCheck"],
        "additionalProperties": false
    })
}

fn build_batch_prompt(markdown: &str, headline: &str, content: &str, issues: &[&Issue]) -> String {
    let others: Vec<String> = headlines(markdown)
        .into_iter()
        .filter(|h| !h.trim().eq_ignore_ascii_case(headline.trim()))
        .map(|h| format!("- {}", h))
        .collect();
    let listed: Vec<String> = issues
        .iter()
        .enumerate()
        .map(|(idx, issue)| {
            format!(
                "{}. [{}] ({}) {}\n   Instruction: {}",
                idx + 1,
                issue.severity.label(),
                issue.fix_strategy.label(),
                issue.message,
                issue.instruction().unwrap_or_default()
            )
        })
        .collect();

    format!(
        "SECTION: {}\n\nOTHER SECTIONS (do not duplicate their content):\n{}\n\nCURRENT SECTION BODY:\n{}\n\nISSUES TO FIX:\n{}\n\nRewrite the section body so every issue is resolved. Return JSON.",
        headline,
        if others.is_empty() {
            "(none)".to_string()
        } else {
            others.join("\n")
        },
        content.trim(),
        listed.join("\n")
    )
}

/// Claimed changes whose `after` excerpt (when given) shows up in the edit.
/// Approximate: the model reports these itself.
fn count_addressed(changes: &[ChangeJson], edited: &str, issue_count: usize) -> usize {
    changes
        .iter()
        .filter(|change| match change.after.as_deref().map(str::trim) {
            Some(after) if !after.is_empty() => edited.contains(after),
            _ => true,
        })
        .count()
        .min(issue_count)
}

/// Rewrite `headline` once to resolve every issue in `issues`.
///
/// Never fails outright: model errors, missing sections and gate rejections
/// all come back as an unsuccessful `FixResult` holding the input markdown.
pub async fn apply_batch_fix(
    llm: &dyn StructuredLlm,
    markdown: &str,
    headline: &str,
    issues: &[Issue],
    config: &BatchFixConfig,
    cancel: &CancellationToken,
) -> FixResult {
    let actionable: Vec<&Issue> = issues.iter().filter(|i| i.instruction().is_some()).collect();
    if actionable.is_empty() {
        return FixResult::skipped(markdown, "no issue carried a fix instruction");
    }

    let Some(original) = section_content(markdown, headline) else {
        return FixResult::failed(markdown, format!("section '{}' not found", headline));
    };

    let request = StructuredRequest {
        model: Model::Speed,
        schema_name: "section_batch_fix".to_string(),
        schema: batch_fix_schema(),
        system: batch_fix_system_prompt(),
        prompt: build_batch_prompt(markdown, headline, &original, &actionable),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let response = match call_structured::<BatchFixResponseJson>(llm, &request, cancel).await {
        Ok(response) => response,
        Err(err) => {
            warn!(section = %headline, error = %err, "batch fix call failed");
            return FixResult::failed(markdown, format!("fix call failed: {}", err));
        }
    };
    let usage = response.usage;
    let data = response.data;
    trace!(section = %headline, reasoning = %truncate_str(&data.reasoning, 200), "batch fix response");
    if let Some(check) = data.grammar_check.as_ref().filter(|c| !c.passed) {
        debug!(section = %headline, notes = %check.notes, "model reported grammar problems");
    }

    let edited = clean_section_text(&data.content, headline);
    if has_section_heading(&edited) {
        warn!(section = %headline, "edit rejected: it adds a section heading");
        return FixResult::failed(markdown, "rejected: edit introduced a section heading").with_usage(usage);
    }
    let original_chars = original.trim().chars().count();
    let edited_chars = edited.chars().count();
    let owned: Vec<Issue> = actionable.iter().map(|i| (*i).clone()).collect();
    let bounds = length_bounds(original_chars, &owned, &config.gate);
    let delta = match check_length(original_chars, edited_chars, bounds) {
        Ok(delta) => delta,
        Err(reason) => {
            warn!(section = %headline, original_chars, edited_chars, "edit rejected by length gate");
            return FixResult::failed(markdown, format!("rejected: {}", reason)).with_usage(usage);
        }
    };

    let Some(updated) = replace_section(markdown, headline, &edited) else {
        return FixResult::failed(markdown, format!("section '{}' vanished before replace", headline))
            .with_usage(usage);
    };
    if updated == markdown {
        return FixResult::failed(markdown, "edit produced no change").with_usage(usage);
    }

    let addressed = count_addressed(&data.changes, &edited, actionable.len());
    let summaries: Vec<String> = data
        .changes
        .iter()
        .filter(|c| !c.summary.trim().is_empty())
        .map(|c| match c.issue {
            Some(n) => format!("#{} {}", n, c.summary.trim()),
            None => c.summary.trim().to_string(),
        })
        .collect();
    info!(section = %headline, delta, addressed, issues = actionable.len(), "section edited");

    FixResult {
        markdown: updated,
        success: true,
        description: if summaries.is_empty() {
            format!("edited '{}'", headline)
        } else {
            summaries.join("; ")
        },
        issues_addressed: addressed,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::LlmError;
    use crate::testing::ScriptedLlm;
    use serde_json::json;

    const ARTICLE: &str = "# Guide\n\n## Intro\n\nWelcome.\n\n## Combat\n\nYou utilize the sword to utilize openings.\n\n## Sources\n\n- https://example.com\n";

    fn edit_issue() -> Issue {
        Issue::new(Severity::Minor, "Wordy verb", FixStrategy::DirectEdit)
            .with_location("Combat")
            .with_instruction("replace 'utilize' with 'use'")
    }

    fn response(content: &str) -> serde_json::Value {
        json!({
            "reasoning": "swap the verb",
            "content": content,
            "changes": [{"issue": 1, "summary": "swapped verb", "after": "use the sword"}],
            "grammarCheck": {"passed": true, "notes": ""}
        })
    }

    #[test]
    fn test_length_bounds_scale_with_issues() {
        let gate = GateConfig::default();
        let minor = edit_issue();
        assert_eq!(
            length_bounds(100, &[minor.clone()], &gate),
            LengthBounds { removal: 50, addition: 500 }
        );
        assert_eq!(length_bounds(1_000, &[minor.clone(), minor.clone()], &gate).addition, 1_000);
        assert_eq!(length_bounds(1_000, &[minor.clone()], &gate).removal, 400);
        assert_eq!(length_bounds(300, &[minor.clone()], &gate).removal, 150);

        let expand = Issue::new(Severity::Minor, "thin", FixStrategy::Expand);
        assert_eq!(length_bounds(100, &[expand], &gate).addition, 1_500);
        let critical = Issue::new(Severity::Critical, "wrong", FixStrategy::DirectEdit);
        assert_eq!(length_bounds(100, &[critical], &gate).addition, 1_500);
    }

    #[test]
    fn test_check_length_is_inclusive_at_bounds() {
        let bounds = LengthBounds { removal: 150, addition: 500 };
        assert_eq!(check_length(1_000, 1_500, bounds), Ok(500));
        assert!(check_length(1_000, 1_501, bounds).is_err());
        assert_eq!(check_length(1_000, 850, bounds), Ok(-150));
        assert!(check_length(1_000, 849, bounds).is_err());
    }

    #[test]
    fn test_short_sections_cannot_shrink_to_a_stub() {
        let gate = GateConfig::default();
        for original in [10usize, 42, 96, 166, 300, 1_000] {
            let bounds = length_bounds(original, &[edit_issue()], &gate);
            let stub = original / 10;
            assert!(
                check_length(original, stub, bounds).is_err(),
                "{} -> {} accepted",
                original,
                stub
            );
        }
    }

    #[test]
    fn test_count_addressed_checks_excerpts_and_caps() {
        let changes = vec![
            ChangeJson { issue: Some(1), summary: "a".into(), after: Some("use the".into()) },
            ChangeJson { issue: Some(2), summary: "b".into(), after: Some("not there".into()) },
            ChangeJson { issue: Some(3), summary: "c".into(), after: None },
        ];
        assert_eq!(count_addressed(&changes, "You use the sword.", 5), 2);
        assert_eq!(count_addressed(&changes, "You use the sword.", 1), 1);
    }

    #[tokio::test]
    async fn test_batch_fix_only_touches_target_section() {
        let llm = ScriptedLlm::new();
        llm.push_json(
            "section_batch_fix",
            response("## Combat\n\nYou use the sword to use openings."),
        );
        let result = apply_batch_fix(
            &llm,
            ARTICLE,
            "Combat",
            &[edit_issue()],
            &BatchFixConfig::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.success, "{}", result.description);
        assert_eq!(result.issues_addressed, 1);
        let combat = section_content(&result.markdown, "Combat").unwrap();
        assert!(!combat.contains("utilize"));
        assert_eq!(
            section_content(&result.markdown, "Intro"),
            section_content(ARTICLE, "Intro")
        );
        assert!(result.markdown.ends_with("## Sources\n\n- https://example.com\n"));
    }

    #[tokio::test]
    async fn test_batch_fix_without_instructions_is_a_noop() {
        let llm = ScriptedLlm::new();
        let issue = Issue::new(Severity::Minor, "meh", FixStrategy::DirectEdit).with_location("Combat");
        let result = apply_batch_fix(
            &llm,
            ARTICLE,
            "Combat",
            &[issue],
            &BatchFixConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(result.success);
        assert_eq!(result.markdown, ARTICLE);
        assert_eq!(llm.calls("section_batch_fix"), 0);
    }

    #[tokio::test]
    async fn test_batch_fix_missing_section_fails() {
        let llm = ScriptedLlm::new();
        let issue = edit_issue().with_location("Lore");
        let result = apply_batch_fix(
            &llm,
            ARTICLE,
            "Lore",
            &[issue],
            &BatchFixConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(!result.success);
        assert!(result.description.contains("not found"));
        assert_eq!(llm.calls("section_batch_fix"), 0);
    }

    #[tokio::test]
    async fn test_batch_fix_unchanged_content_is_not_success() {
        let llm = ScriptedLlm::new();
        llm.push_json(
            "section_batch_fix",
            response("You utilize the sword to utilize openings."),
        );
        let result = apply_batch_fix(
            &llm,
            ARTICLE,
            "Combat",
            &[edit_issue()],
            &BatchFixConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.markdown, ARTICLE);
    }

    #[tokio::test]
    async fn test_batch_fix_rejects_stub_of_short_section() {
        let llm = ScriptedLlm::new();
        llm.push_json("section_batch_fix", response("You u"));
        let result = apply_batch_fix(
            &llm,
            ARTICLE,
            "Combat",
            &[edit_issue()],
            &BatchFixConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(!result.success);
        assert!(result.description.contains("removed"), "{}", result.description);
        assert_eq!(result.markdown, ARTICLE);
    }

    #[tokio::test]
    async fn test_batch_fix_rejects_new_section_heading() {
        let llm = ScriptedLlm::new();
        llm.push_json(
            "section_batch_fix",
            response("You use the sword to use openings.\n\n## Bonus Tips\n\nExtra."),
        );
        let result = apply_batch_fix(
            &llm,
            ARTICLE,
            "Combat",
            &[edit_issue()],
            &BatchFixConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(!result.success);
        assert!(result.description.contains("section heading"));
        assert_eq!(result.markdown, ARTICLE);
        assert_eq!(headlines(&result.markdown), vec!["Intro", "Combat", "Sources"]);
    }

    #[tokio::test]
    async fn test_batch_fix_keeps_subheadings() {
        let llm = ScriptedLlm::new();
        llm.push_json(
            "section_batch_fix",
            response("### Basics\n\nYou use the sword to use openings."),
        );
        let result = apply_batch_fix(
            &llm,
            ARTICLE,
            "Combat",
            &[edit_issue()],
            &BatchFixConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(result.success, "{}", result.description);
        assert!(section_content(&result.markdown, "Combat").unwrap().contains("### Basics"));
    }

    #[tokio::test]
    async fn test_batch_fix_llm_error_becomes_failed_result() {
        let llm = ScriptedLlm::new();
        llm.push_error("section_batch_fix", LlmError::Transport("reset".into()));
        let result = apply_batch_fix(
            &llm,
            ARTICLE,
            "Combat",
            &[edit_issue()],
            &BatchFixConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(!result.success);
        assert!(result.description.contains("reset"));
        assert_eq!(result.markdown, ARTICLE);
    }
}
