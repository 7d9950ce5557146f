//! Article review: one structured model call turning markdown into an
//! approval flag and a list of actionable issues.

use crate::llm::client::{call_structured, LlmError, StructuredLlm, StructuredRequest};
use crate::llm::models::Model;
use crate::llm::parse::truncate_content;
use crate::llm::prompts::review_system_prompt;
use redline_core::section::sections;
use redline_core::{
    merge_usage, FixStrategy, Issue, IssueCategory, Plan, ResearchPool, Severity, Usage,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reviewer tuning.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    /// Total attempts, including the first. Only network/format failures retry.
    pub max_attempts: u32,
    /// Article characters shown to the reviewer before truncation.
    pub max_document_chars: usize,
    pub max_research_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            max_document_chars: 60_000,
            max_research_chars: 6_000,
            max_tokens: 4_096,
            temperature: 0.2,
        }
    }
}

/// What the reviewer looks at.
#[derive(Debug, Clone, Copy)]
pub struct ReviewInput<'a> {
    pub plan: &'a Plan,
    pub markdown: &'a str,
    pub research: &'a ResearchPool,
}

/// Result of one review.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewOutcome {
    /// Publishable as-is. Non-critical issues may still be present.
    pub approved: bool,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ReviewOutcome {
    pub fn actionable_issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_actionable())
    }

    pub fn has_actionable_issues(&self) -> bool {
        self.actionable_issues().next().is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewResponseJson {
    #[serde(default)]
    approved: bool,
    #[serde(default)]
    issues: Vec<IssueJson>,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Issue structure for JSON parsing (with defaults for robustness)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueJson {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    fix_instruction: Option<String>,
    #[serde(default)]
    fix_strategy: String,
}

/// JSON Schema for the review response - used for structured output.
pub(crate) fn review_response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "approved": {
                "type": "boolean",
                "description": "True when the article is publishable as-is"
            },
            "issues": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "severity": { "type": "string", "enum": ["critical", "major", "minor"] },
                        "category": {
                            "type": "string",
                            "enum": ["redundancy", "coverage", "factual", "style", "seo", "structure", "checklist"]
                        },
                        "location": {
                            "type": "string",
                            "description": "Exact section headline, or \"global\""
                        },
                        "message": { "type": "string", "description": "What is wrong" },
                        "fixInstruction": {
                            "type": "string",
                            "description": "Imperative instruction for the fixer; empty for no_action"
                        },
                        "fixStrategy": {
                            "type": "string",
                            "enum": ["direct_edit", "regenerate", "add_section", "expand", "no_action"]
                        }
                    },
                    "required": ["severity", "category", "location", "message", "fixInstruction", "fixStrategy"],
                    "additionalProperties": false
                }
            },
            "suggestions": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Optional improvement ideas that are not defects"
            }
        },
        "required": ["approved", "issues", "suggestions"],
        "additionalProperties": false
    })
}

fn parse_severity(raw: &str) -> Option<Severity> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "critical" => Some(Severity::Critical),
        "major" => Some(Severity::Major),
        "minor" => Some(Severity::Minor),
        _ => None,
    }
}

fn parse_category(raw: &str) -> IssueCategory {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase()))
        .unwrap_or_default()
}

fn parse_strategy(raw: &str) -> FixStrategy {
    let strategy: FixStrategy =
        serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase()))
            .unwrap_or(FixStrategy::Unknown);
    // `batch` is ours to synthesize; a reviewer asking for it means a plain edit.
    if strategy == FixStrategy::Batch {
        FixStrategy::DirectEdit
    } else {
        strategy
    }
}

/// Turn the raw response into domain issues, rejecting semantically broken output.
fn normalize_review(parsed: ReviewResponseJson) -> Result<ReviewOutcome, LlmError> {
    let mut issues = Vec::with_capacity(parsed.issues.len());
    for raw in parsed.issues {
        let severity = parse_severity(&raw.severity).ok_or_else(|| {
            LlmError::Format(format!("invalid issue severity '{}'", raw.severity))
        })?;
        if raw.message.trim().is_empty() {
            return Err(LlmError::Format("review issue message is empty".to_string()));
        }
        let fix_strategy = parse_strategy(&raw.fix_strategy);
        let location = raw
            .location
            .map(|l| l.trim().trim_start_matches('#').trim().to_string())
            .filter(|l| !l.is_empty());
        let fix_instruction = match fix_strategy {
            FixStrategy::NoAction => None,
            _ => raw
                .fix_instruction
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty()),
        };
        if fix_strategy != FixStrategy::NoAction && fix_instruction.is_none() {
            debug!(message = %raw.message, "review issue has no fix instruction");
        }
        issues.push(Issue {
            severity,
            category: parse_category(&raw.category),
            location,
            message: raw.message.trim().to_string(),
            fix_instruction,
            fix_strategy,
        });
    }

    Ok(ReviewOutcome {
        approved: parsed.approved,
        issues,
        suggestions: parsed
            .suggestions
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        usage: None,
    })
}

fn format_plan(plan: &Plan) -> String {
    let mut lines = vec![
        format!("Title: {}", plan.title),
        format!("Category: {}", plan.category_slug),
        "Planned sections:".to_string(),
    ];
    for (idx, section) in plan.sections.iter().enumerate() {
        lines.push(format!("{}. {} - {}", idx + 1, section.headline, section.goal));
    }
    let safety = plan.safety.describe();
    if !safety.is_empty() {
        lines.push(format!("Safety constraints:\n{}", safety));
    }
    lines.join("\n")
}

fn build_review_prompt(input: &ReviewInput<'_>, config: &ReviewConfig) -> String {
    let present: Vec<String> = sections(input.markdown)
        .into_iter()
        .map(|s| format!("- {}", s.heading))
        .collect();
    let research = input.research.condensed_summary(config.max_research_chars);

    format!(
        "ARTICLE PLAN:\n{}\n\nSECTIONS PRESENT:\n{}\n\nRESEARCH SUMMARY:\n{}\n\nARTICLE MARKDOWN:\n{}\n\nReview the article against the plan and research. Return JSON.",
        format_plan(input.plan),
        if present.is_empty() {
            "(none)".to_string()
        } else {
            present.join("\n")
        },
        if research.trim().is_empty() {
            "(no research provided)".to_string()
        } else {
            research
        },
        truncate_content(input.markdown, config.max_document_chars)
    )
}

/// Review the article. Transport and format failures retry up to
/// `config.max_attempts`; after that the error is returned, never an approval.
pub async fn review_article(
    llm: &dyn StructuredLlm,
    input: &ReviewInput<'_>,
    config: &ReviewConfig,
    cancel: &CancellationToken,
) -> Result<ReviewOutcome, LlmError> {
    let request = StructuredRequest {
        model: Model::Smart,
        schema_name: "article_review".to_string(),
        schema: review_response_schema(),
        system: review_system_prompt(&input.plan.category_slug),
        prompt: build_review_prompt(input, config),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let max_attempts = config.max_attempts.max(1);
    let mut usage: Option<Usage> = None;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match call_structured::<ReviewResponseJson>(llm, &request, cancel).await {
            Ok(response) => {
                usage = merge_usage(usage, response.usage);
                normalize_review(response.data)
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(mut outcome) => {
                outcome.usage = usage;
                info!(
                    approved = outcome.approved,
                    issues = outcome.issues.len(),
                    attempt,
                    "article review complete"
                );
                return Ok(outcome);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!(attempt, error = %err, "review attempt failed, retrying");
            }
            Err(err) => return Err(err),
        }
    }
}
